// Input module
// Line transports and the wire-format decoder

pub mod decoder;
pub mod transport;

pub use decoder::{decode_line, sanitize_line, DecodeError, DecodedRow, LineFrameDecoder};
pub use transport::{list_devices, ChannelSource, DeviceSource, LineSource, TransportError};
