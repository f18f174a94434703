//! Execution strategies, compute devices and precisions the backend
//! initializer negotiates over.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Backend computation pathway, fastest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    #[serde(rename = "flash_attention_2")]
    FlashAttention2,
    Sdpa,
    Eager,
}

impl ExecutionStrategy {
    /// Default candidate order: most specialised first, most portable last.
    pub const FALLBACK_ORDER: [ExecutionStrategy; 3] = [Self::FlashAttention2, Self::Sdpa, Self::Eager];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FlashAttention2 => "flash_attention_2",
            Self::Sdpa => "sdpa",
            Self::Eager => "eager",
        }
    }

    /// Whether this pathway can run on `device` at all.
    pub fn supports(self, device: ComputeDevice) -> bool {
        match self {
            Self::FlashAttention2 => device == ComputeDevice::Cuda,
            Self::Sdpa | Self::Eager => true,
        }
    }
}

impl fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "flash_attention_2" | "flash-attention-2" | "flash" => Ok(Self::FlashAttention2),
            "sdpa" => Ok(Self::Sdpa),
            "eager" => Ok(Self::Eager),
            other => Err(format!(
                "unknown execution strategy `{other}` (expected flash_attention_2, sdpa or eager)"
            )),
        }
    }
}

/// Where the backend runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeDevice {
    Cuda,
    Metal,
    Cpu,
}

impl ComputeDevice {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cuda => "cuda",
            Self::Metal => "metal",
            Self::Cpu => "cpu",
        }
    }

    pub const fn is_accelerator(self) -> bool {
        !matches!(self, Self::Cpu)
    }
}

impl fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Weight precision requested from the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    Bf16,
    Fp16,
    Fp32,
}

impl Precision {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bf16 => "bf16",
            Self::Fp16 => "fp16",
            Self::Fp32 => "fp32",
        }
    }

    /// Precision the device can actually execute.
    pub fn effective_for(self, device: ComputeDevice) -> Self {
        match (device, self) {
            (ComputeDevice::Cpu, _) => Self::Fp32,
            (ComputeDevice::Metal, Self::Bf16) => Self::Fp16,
            (_, requested) => requested,
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Precision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bf16" | "bfloat16" => Ok(Self::Bf16),
            "fp16" | "f16" | "float16" => Ok(Self::Fp16),
            "fp32" | "f32" | "float32" => Ok(Self::Fp32),
            other => Err(format!("unknown precision `{other}` (expected bf16, fp16 or fp32)")),
        }
    }
}

/// Why one candidate strategy was not used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyAttempt {
    pub strategy: ExecutionStrategy,
    pub error: String,
}
