//! Audio subsystem module

pub mod backend;
pub mod buffer;
pub mod cpal_backend;
pub mod device;
pub mod format;
pub mod null;
pub mod output;

pub use backend::PcmBackend;
pub use buffer::StreamBuffer;
pub use cpal_backend::CpalBackend;
pub use device::{find_output_device, list_output_devices, OutputDeviceInfo};
pub use format::{PcmFormat, SampleEncoding};
pub use null::{NullBackend, NullHandle, NULL_DEVICE};
pub use output::AudioOutput;

/// Create the backend matching an output device name
pub fn backend_for(device: &str, buffer_frames: usize) -> Box<dyn PcmBackend> {
    if device == NULL_DEVICE {
        Box::new(NullBackend::new())
    } else {
        Box::new(CpalBackend::new(buffer_frames))
    }
}
