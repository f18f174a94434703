//! Compute device selection.
//!
//! Probing happens once, before any execution strategy is tried, and the
//! result is passed into every construction attempt.

use candle_core::Device;
use duet_domain::ComputeDevice;
use tracing::{info, warn};

/// Decides which device the backend should target.
pub trait DeviceProbe: Send + Sync {
    fn probe(&self) -> ComputeDevice;
}

/// Asks candle which accelerators this build and machine can use.
#[derive(Debug, Clone, Copy, Default)]
pub struct CandleDeviceProbe {
    force_cpu: bool,
}

impl CandleDeviceProbe {
    pub fn new(force_cpu: bool) -> Self {
        Self { force_cpu }
    }
}

impl DeviceProbe for CandleDeviceProbe {
    fn probe(&self) -> ComputeDevice {
        if self.force_cpu {
            info!("• CPU forced by configuration");
            return ComputeDevice::Cpu;
        }
        if candle_core::utils::cuda_is_available() {
            match Device::new_cuda(0) {
                Ok(_) => {
                    info!("• using CUDA device");
                    return ComputeDevice::Cuda;
                }
                Err(e) => warn!(error = %e, "• CUDA error, trying next device"),
            }
        }
        if candle_core::utils::metal_is_available() {
            match Device::new_metal(0) {
                Ok(_) => {
                    info!("• using Metal device");
                    return ComputeDevice::Metal;
                }
                Err(e) => warn!(error = %e, "• Metal error, falling back to CPU"),
            }
        }
        info!(
            avx = candle_core::utils::with_avx(),
            neon = candle_core::utils::with_neon(),
            "• no GPU acceleration available (compile with --features cuda or --features metal)"
        );
        ComputeDevice::Cpu
    }
}

/// Always answers the same device.
#[derive(Debug, Clone, Copy)]
pub struct FixedDevice(pub ComputeDevice);

impl DeviceProbe for FixedDevice {
    fn probe(&self) -> ComputeDevice {
        self.0
    }
}
