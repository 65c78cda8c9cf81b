//! Output device enumeration and lookup

use cpal::traits::{DeviceTrait, HostTrait};

use crate::error::AudioError;

/// Alias for the host's default output device
pub const DEFAULT_DEVICE: &str = "default";

/// Sample rates probed when listing devices
const COMMON_RATES: [u32; 8] = [8000, 11025, 22050, 44100, 48000, 96000, 176400, 192000];

/// Description of an output device for display
#[derive(Debug, Clone)]
pub struct OutputDeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub channels: Vec<u16>,
}

/// List all output devices of the default host
pub fn list_output_devices() -> Vec<OutputDeviceInfo> {
    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    let mut devices = Vec::new();
    if let Ok(outputs) = host.output_devices() {
        for device in outputs {
            if let Ok(name) = device.name() {
                let (sample_rates, channels) = device_capabilities(&device);
                devices.push(OutputDeviceInfo {
                    is_default: default_name.as_ref() == Some(&name),
                    name,
                    sample_rates,
                    channels,
                });
            }
        }
    }

    devices
}

fn device_capabilities(device: &cpal::Device) -> (Vec<u32>, Vec<u16>) {
    let mut rates = Vec::new();
    let mut channels = Vec::new();

    if let Ok(configs) = device.supported_output_configs() {
        for config in configs {
            for rate in COMMON_RATES {
                let sample_rate = cpal::SampleRate(rate);
                if sample_rate >= config.min_sample_rate()
                    && sample_rate <= config.max_sample_rate()
                    && !rates.contains(&rate)
                {
                    rates.push(rate);
                }
            }
            if !channels.contains(&config.channels()) {
                channels.push(config.channels());
            }
        }
    }

    rates.sort_unstable();
    channels.sort_unstable();
    (rates, channels)
}

/// Find an output device by name; `default` selects the host default
pub fn find_output_device(name: &str) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();

    if name == DEFAULT_DEVICE {
        return host.default_output_device().ok_or_else(|| AudioError::DeviceOpen {
            device: name.to_string(),
            reason: "no default output device".to_string(),
        });
    }

    let devices = host.output_devices().map_err(|e| AudioError::DeviceOpen {
        device: name.to_string(),
        reason: e.to_string(),
    })?;

    for device in devices {
        if device.name().map(|n| n == name).unwrap_or(false) {
            return Ok(device);
        }
    }

    Err(AudioError::DeviceOpen {
        device: name.to_string(),
        reason: "no such output device".to_string(),
    })
}

/// Highest sample rate any output configuration of `device` supports
pub fn max_sample_rate(device: &cpal::Device) -> Result<u32, AudioError> {
    let configs = device
        .supported_output_configs()
        .map_err(|e| AudioError::device("max sample rate probe", e))?;

    configs
        .map(|c| c.max_sample_rate().0)
        .max()
        .ok_or_else(|| AudioError::device("max sample rate probe", "no output configurations"))
}
