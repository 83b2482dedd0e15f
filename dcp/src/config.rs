//! Driver configuration.
//!
//! Everything here is platform data that the embedder knows and the firmware does not: which
//! register ranges the firmware may map, how tall the panel notch is, and how long to wait at the
//! blocking entry points. A [Config] can be built in code or loaded from JSON.
use alloc::vec::Vec;
use iomfb::{FirmwareVersion, MAX_NOTCH_HEIGHT};
use serde::Deserialize;
use snafu::{ensure, Snafu};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    #[snafu(display("invalid configuration document: {cause:?}"))]
    Json { cause: serde_json_core::de::Error },
    #[snafu(display("notch height {height} exceeds the maximum of {MAX_NOTCH_HEIGHT}"))]
    NotchTooTall { height: u32 },
    #[snafu(display("register range {index} is empty"))]
    EmptyRegisterRange { index: usize },
}

/// A physical register range the firmware may map.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
pub struct RegisterRange {
    pub start: u64,
    pub size: u64,
}

impl RegisterRange {
    /// True if `[start, start + size)` lies within this range.
    pub fn contains(&self, start: u64, size: u64) -> bool {
        match (start.checked_add(size), self.start.checked_add(self.size)) {
            (Some(end), Some(limit)) => start >= self.start && end <= limit,
            _ => false,
        }
    }
}

/// A mode the extractor refuses to report.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
pub struct DeniedMode {
    pub width: u32,
    pub height: u32,
    pub refresh_hz: u32,
}

/// Bounds for the blocking entry points, in milliseconds.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub modeset_ms: u64,
    pub power_on_ms: u64,
    pub power_off_swap_ms: u64,
    pub power_off_ms: u64,
    /// Delay before a synthesized vblank is delivered.
    pub vblank_delay_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            modeset_ms: 500,
            power_on_ms: 500,
            power_off_swap_ms: 50,
            power_off_ms: 1000,
            vblank_delay_ms: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub firmware: FirmwareVersion,
    /// Height of the panel notch in pixels.
    pub notch_height: u32,
    /// Report the notch area as part of the display instead of hiding it.
    pub show_notch: bool,
    /// Bits OR-ed into the shared memory address announced to the firmware.
    pub asc_dram_mask: u64,
    /// Answer to the firmware's clock frequency query.
    pub clock_rate_hz: u64,
    pub disp_registers: Vec<RegisterRange>,
    pub mode_deny_list: Vec<DeniedMode>,
    pub timeouts: Timeouts,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            firmware: FirmwareVersion::V12_3,
            notch_height: 0,
            show_notch: false,
            asc_dram_mask: 0,
            clock_rate_hz: 0,
            disp_registers: Vec::new(),
            mode_deny_list: Vec::new(),
            timeouts: Timeouts::default(),
        }
    }
}

impl Config {
    /// Load and validate a configuration from a JSON document. Missing fields take their defaults.
    pub fn from_json(json: &[u8]) -> Result<Config, ConfigError> {
        let (config, _) = serde_json_core::from_slice::<Config>(json)
            .map_err(|cause| ConfigError::Json { cause })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(
            self.notch_height <= MAX_NOTCH_HEIGHT,
            NotchTooTallSnafu {
                height: self.notch_height
            }
        );
        for (index, r) in self.disp_registers.iter().enumerate() {
            ensure!(r.size > 0, EmptyRegisterRangeSnafu { index });
        }
        Ok(())
    }

    /// Notch height to remove from reported modes, zero if the notch is shown.
    pub fn hidden_notch_height(&self) -> u32 {
        if self.show_notch {
            0
        } else {
            self.notch_height
        }
    }

    /// True if the register range `[start, start + size)` was declared to the firmware.
    pub fn is_disp_register(&self, start: u64, size: u64) -> bool {
        self.disp_registers.iter().any(|r| r.contains(start, size))
    }
}
