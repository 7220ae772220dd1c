// Line transports
// Non-blocking sources of complete text lines: an in-process channel and a
// serial device read on a background thread

use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use thiserror::Error;

use crate::config::TransportConfig;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("No input device at index {index:?} ({available} available)")]
    Unavailable {
        index: Option<usize>,
        available: usize,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A source of complete, unterminated text lines
pub trait LineSource {
    /// Move every line available right now into `out`
    /// Must return immediately when nothing is pending.
    fn poll_lines(&mut self, out: &mut Vec<String>);
}

/// Lines pushed from elsewhere in the host through an mpsc channel
pub struct ChannelSource {
    receiver: Receiver<String>,
    disconnected: bool,
}

impl ChannelSource {
    /// Create a connected sender/source pair
    pub fn pair() -> (Sender<String>, ChannelSource) {
        let (sender, receiver) = mpsc::channel();
        (
            sender,
            ChannelSource {
                receiver,
                disconnected: false,
            },
        )
    }

    /// True once every sender has been dropped
    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }
}

impl LineSource for ChannelSource {
    fn poll_lines(&mut self, out: &mut Vec<String>) {
        loop {
            match self.receiver.try_recv() {
                Ok(line) => out.push(line),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !self.disconnected {
                        log::info!("Line channel closed");
                    }
                    self.disconnected = true;
                    break;
                }
            }
        }
    }
}

/// List serial devices matching the configured prefixes, sorted by name
pub fn list_devices(config: &TransportConfig) -> Result<Vec<PathBuf>, TransportError> {
    let mut devices: Vec<PathBuf> = fs::read_dir(&config.device_dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            config
                .device_prefixes
                .iter()
                .any(|prefix| name.starts_with(prefix.as_str()))
        })
        .map(|entry| entry.path())
        .collect();
    devices.sort();
    Ok(devices)
}

/// Serial device read line by line on a dedicated thread
/// The port must already be configured (115200 8N1) by the host.
///
/// Reads block, so a dropped source only stops its reader once the next line
/// or EOF arrives; the device handle is closed when the reader exits.
pub struct DeviceSource {
    path: PathBuf,
    lines: Arc<Mutex<VecDeque<String>>>,
    connected: Arc<AtomicBool>,
    stop_signal: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl DeviceSource {
    /// Open the device selected by `config.device_index`
    pub fn open(config: &TransportConfig) -> Result<Self, TransportError> {
        let devices = list_devices(config)?;
        let path = config
            .device_index
            .and_then(|index| devices.get(index))
            .cloned()
            .ok_or(TransportError::Unavailable {
                index: config.device_index,
                available: devices.len(),
            })?;

        Self::open_path(&path)
    }

    /// Open a specific device or file
    pub fn open_path(path: &Path) -> Result<Self, TransportError> {
        let file = File::open(path)?;

        let lines = Arc::new(Mutex::new(VecDeque::new()));
        let connected = Arc::new(AtomicBool::new(true));
        let stop_signal = Arc::new(AtomicBool::new(false));

        let reader_lines = Arc::clone(&lines);
        let reader_connected = Arc::clone(&connected);
        let reader_stop = Arc::clone(&stop_signal);
        let reader_path = path.to_path_buf();

        let reader = thread::spawn(move || {
            run_reader(BufReader::new(file), &reader_lines, &reader_stop);
            reader_connected.store(false, Ordering::SeqCst);
            log::info!("Serial reader for {} stopped", reader_path.display());
        });

        log::info!("Reading sensor lines from {}", path.display());

        Ok(DeviceSource {
            path: path.to_path_buf(),
            lines,
            connected,
            stop_signal,
            reader: Some(reader),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// False once the reader thread hit EOF or a read error
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// True once the reader thread has exited
    pub fn reader_finished(&self) -> bool {
        self.reader.as_ref().map_or(true, |r| r.is_finished())
    }
}

impl LineSource for DeviceSource {
    fn poll_lines(&mut self, out: &mut Vec<String>) {
        let mut queue = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        out.extend(queue.drain(..));
    }
}

impl Drop for DeviceSource {
    fn drop(&mut self) {
        self.stop_signal.store(true, Ordering::SeqCst);

        let Some(reader) = self.reader.take() else {
            return;
        };
        if reader.is_finished() {
            if reader.join().is_err() {
                log::error!("Serial reader for {} panicked", self.path.display());
            }
        } else {
            log::debug!(
                "Serial reader for {} exits after its next line or EOF",
                self.path.display()
            );
        }
    }
}

/// Read newline-terminated lines until EOF, error, or stop signal
/// The stop signal is checked before every read.
fn run_reader<R: BufRead>(
    mut reader: R,
    lines: &Mutex<VecDeque<String>>,
    stop_signal: &AtomicBool,
) {
    let mut buf = String::new();

    while !stop_signal.load(Ordering::SeqCst) {
        buf.clear();
        match reader.read_line(&mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let line = buf.trim_end_matches(['\r', '\n']).to_string();
                lines
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push_back(line);
            }
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                // Non-UTF-8 bytes on the wire; the decoder would drop the line anyway
                log::debug!("Skipping undecodable serial line: {}", e);
            }
            Err(e) => {
                log::error!("Serial read failed: {}", e);
                break;
            }
        }
    }
}
