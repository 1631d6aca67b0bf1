use candle_core::Device;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    #[default]
    Auto,
    Cpu,
    Cuda,
    Metal,
}

/// Resolve the compute device. Never fails: an unusable accelerator falls back to CPU.
pub fn select_device(preference: DevicePreference) -> Device {
    match preference {
        DevicePreference::Cpu => Device::Cpu,
        DevicePreference::Cuda => Device::new_cuda(0).unwrap_or_else(|e| {
            tracing::warn!("CUDA requested but unavailable ({}), falling back to CPU", e);
            Device::Cpu
        }),
        DevicePreference::Metal => Device::new_metal(0).unwrap_or_else(|e| {
            tracing::warn!("Metal requested but unavailable ({}), falling back to CPU", e);
            Device::Cpu
        }),
        DevicePreference::Auto => match Device::cuda_if_available(0) {
            Ok(device) if device.is_cuda() => device,
            _ => Device::metal_if_available(0).unwrap_or(Device::Cpu),
        },
    }
}

/// Short name reported in health and response details.
pub fn device_label(device: &Device) -> &'static str {
    if device.is_cuda() {
        "cuda"
    } else if device.is_metal() {
        "metal"
    } else {
        "cpu"
    }
}
