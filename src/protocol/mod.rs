//! SlimProto control protocol

pub mod codec;
pub mod frames;

pub use codec::{decode_server_frame, read_client_frame, read_server_frame};
pub use frames::{AudioGain, Bye, Helo, ServerFrame, Stat, StatusEvent, Strm, StrmCommand};
