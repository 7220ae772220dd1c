//! A recorded live run replays to the same per-tick pipeline output.

use std::sync::mpsc::Sender;

use tempfile::TempDir;
use touchgrid::config::{PipelineConfig, RecordTarget};
use touchgrid::input::ChannelSource;
use touchgrid::pipeline::{FrameClock, FrameSnapshot, ManualClock, PipelineEvent};
use touchgrid::session::read_session_log;
use touchgrid::CalibrationState;

const TICK_MS: u64 = 20;

fn config() -> PipelineConfig {
    let mut config = PipelineConfig::new(3, 4);
    config.warmup_ms = 50;
    config.capabilities.autogain = true;
    config
}

/// Lines the sensor sends before each tick
fn script() -> Vec<Vec<&'static str>> {
    vec![
        vec!["0,100,102,98,101", "garbage", "1,99,100,101,100", "7,1,2,3,4"],
        vec!["2,100,100,100,100\r"],
        vec!["0,101,103,99,100", "1,100,100,100,101", "2,99,101,100,100"],
        vec![],
        vec!["0,100,102,98,101", "1,99,100,101,100", "2,100,100,100,100"],
        vec!["1,100,400,180,100", "1,,2"],
        vec!["1,100,350,260,100", "2,100,120,100,100"],
        vec![],
        vec!["2,10,100,100,100"],
        vec!["0,100,102,98,101", "1,99,100,101,100", "2,100,100,100,100"],
        vec!["0,300,102,98,101"],
    ]
}

fn send(sender: &Sender<String>, lines: &[&str]) {
    for line in lines {
        sender.send(line.to_string()).unwrap();
    }
}

fn calibration_events(snapshot: &FrameSnapshot) -> Vec<PipelineEvent> {
    snapshot
        .events
        .iter()
        .filter(|e| e.is_calibration())
        .cloned()
        .collect()
}

#[test]
fn test_replay_reproduces_live_run() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("run.jsonl");

    // Live run, recorded
    let clock = ManualClock::new();
    clock.set(5_000);
    let (sender, source) = ChannelSource::pair();
    let mut live = FrameClock::new(config(), Box::new(clock.clone()))
        .unwrap()
        .with_source(Box::new(source));
    live.start_recording(RecordTarget::Path(path.clone()));

    let mut recorded = Vec::new();
    for lines in script() {
        send(&sender, &lines);
        recorded.push(live.tick());
        clock.advance(TICK_MS);
    }
    live.stop_recording();
    live.tick();

    let log = read_session_log(&path).unwrap();
    assert_eq!(log.entries.len(), recorded.len());
    assert_eq!(log.entries[3].lines().len(), 0);
    assert_eq!(log.entries[3].elapsed_ms, 3 * TICK_MS);

    // The live run went through every calibration phase
    let ready_ticks: Vec<u64> = recorded
        .iter()
        .filter(|s| s.events.contains(&PipelineEvent::CalibrationReady))
        .map(|s| s.tick)
        .collect();
    assert_eq!(ready_ticks, vec![3]);
    assert!(recorded[8].events.contains(&PipelineEvent::CalibrationAnomaly));
    assert!(recorded.last().unwrap().calibration_error);
    assert_eq!(recorded[0].stats.rejected, 1);
    assert_eq!(recorded[0].stats.out_of_range, 1);

    // Replay, no live input
    let mut replay_config = config();
    replay_config.capabilities.replay = Some(path.clone());
    let mut replay = FrameClock::new(replay_config, Box::new(ManualClock::new())).unwrap();

    let replayed: Vec<FrameSnapshot> = (0..recorded.len()).map(|_| replay.tick()).collect();

    assert!(replayed[0].events.contains(&PipelineEvent::ReplayStarted {
        path: path.clone(),
        entries: recorded.len(),
        config_matches: true,
    }));

    for (live_tick, replay_tick) in recorded.iter().zip(&replayed) {
        assert_eq!(live_tick.grid, replay_tick.grid, "tick {}", live_tick.tick);
        assert_eq!(live_tick.baseline, replay_tick.baseline, "tick {}", live_tick.tick);
        assert_eq!(live_tick.pixels, replay_tick.pixels, "tick {}", live_tick.tick);
        assert_eq!(live_tick.calibration_state, replay_tick.calibration_state);
        assert_eq!(live_tick.calibration_error, replay_tick.calibration_error);
        assert_eq!(
            calibration_events(live_tick),
            calibration_events(replay_tick),
            "tick {}",
            live_tick.tick
        );
        // Only accepted lines were recorded
        assert_eq!(live_tick.stats.accepted, replay_tick.stats.accepted);
        assert_eq!(replay_tick.stats.rejected, 0);
    }

    let complete: Vec<bool> = replayed.iter().map(|s| s.replay_complete).collect();
    let mut expected = vec![false; recorded.len()];
    expected[recorded.len() - 1] = true;
    assert_eq!(complete, expected);

    // Exhausted playback is inert
    let idle = replay.tick();
    assert!(!idle.replay_complete);
    assert_eq!(idle.grid, replayed.last().unwrap().grid);
    assert_eq!(idle.calibration_state, CalibrationState::Ready);
}

#[test]
fn test_replay_with_different_settings_still_runs() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("run.jsonl");

    let clock = ManualClock::new();
    let (sender, source) = ChannelSource::pair();
    let mut recording_config = config();
    recording_config.capabilities.record = Some(RecordTarget::Path(path.clone()));
    let mut live = FrameClock::new(recording_config, Box::new(clock.clone()))
        .unwrap()
        .with_source(Box::new(source));
    for lines in script() {
        send(&sender, &lines);
        live.tick();
        clock.advance(TICK_MS);
    }
    drop(live);

    let mut tuned = config();
    tuned.capabilities.autogain = false;
    tuned.capabilities.replay = Some(path.clone());
    let mut replay = FrameClock::new(tuned, Box::new(ManualClock::new())).unwrap();

    let first = replay.tick();
    assert!(first.events.iter().any(|e| matches!(
        e,
        PipelineEvent::ReplayStarted {
            config_matches: false,
            ..
        }
    )));
    assert!(replay.is_replaying());
    // The recording's settings win while it plays
    assert!(replay.config().capabilities.autogain);
}

#[test]
fn test_replay_follows_mid_run_restart_and_config() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("controls.jsonl");

    let mut base = PipelineConfig::new(2, 2);
    base.warmup_ms = 30;

    let mut tuned = base.clone();
    tuned.warmup_ms = 50;
    tuned.capabilities.autogain = true;
    tuned.capabilities.record = Some(RecordTarget::Path(path.clone()));

    let clock = ManualClock::new();
    let (sender, source) = ChannelSource::pair();
    let mut live = FrameClock::new(base.clone(), Box::new(clock.clone()))
        .unwrap()
        .with_source(Box::new(source));
    live.start_recording(RecordTarget::Path(path.clone()));

    let mut recorded = Vec::new();
    for tick in 0..16 {
        match tick {
            2 | 9 => live.restart_calibration(),
            7 => live.queue_config(tuned.clone()).unwrap(),
            _ => {}
        }
        if tick == 8 {
            send(&sender, &["0,200,150", "1,100,100"]);
        } else {
            send(&sender, &["0,100,100", "1,100,100"]);
        }
        recorded.push(live.tick());
        clock.advance(10);
    }
    live.stop_recording();
    live.tick();

    let live_states: Vec<CalibrationState> =
        recorded.iter().map(|s| s.calibration_state).collect();
    // Restart at tick 2 rearms at 20ms; tuned 50ms warm-up after the tick 9 restart
    assert_eq!(live_states[4], CalibrationState::Accumulating);
    assert_eq!(live_states[5], CalibrationState::Ready);
    assert_eq!(live_states[13], CalibrationState::Accumulating);
    assert_eq!(live_states[14], CalibrationState::Ready);
    assert_eq!(recorded[8].pixels.data, vec![255, 127, 0, 0]);

    let log = read_session_log(&path).unwrap();
    let restarts: Vec<usize> = log
        .entries
        .iter()
        .enumerate()
        .filter(|(_, e)| e.restart)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(restarts, vec![2, 9]);
    assert_eq!(log.entries[7].settings, Some(tuned.signal_settings()));

    let mut replay = FrameClock::new(base.clone(), Box::new(ManualClock::new())).unwrap();
    replay.start_replay(path.clone());
    let replayed: Vec<FrameSnapshot> = (0..recorded.len()).map(|_| replay.tick()).collect();

    let replay_states: Vec<CalibrationState> =
        replayed.iter().map(|s| s.calibration_state).collect();
    assert_eq!(live_states, replay_states);
    for (live_tick, replay_tick) in recorded.iter().zip(&replayed) {
        assert_eq!(live_tick.grid, replay_tick.grid, "tick {}", live_tick.tick);
        assert_eq!(live_tick.baseline, replay_tick.baseline, "tick {}", live_tick.tick);
        assert_eq!(live_tick.pixels, replay_tick.pixels, "tick {}", live_tick.tick);
        assert_eq!(
            calibration_events(live_tick),
            calibration_events(replay_tick),
            "tick {}",
            live_tick.tick
        );
    }
    assert!(replay.config().capabilities.autogain);
    assert_eq!(replay.config().warmup_ms, 50);

    // Stopping the replay brings back the settings it started with
    replay.stop_replay();
    replay.tick();
    assert!(!replay.config().capabilities.autogain);
    assert_eq!(replay.config().warmup_ms, 30);
    assert_eq!(replay.config().signal_settings(), base.signal_settings());
}
