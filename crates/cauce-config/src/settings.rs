//! The settings file format.

use std::path::Path;
use std::time::Duration;

use cauce_dsp::{CpuFlags, ResampleConfig, ResampleMethod};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::validation::{ValidationError, ValidationResult, collect};

/// Graph clock settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClockSettings {
    /// Graph sample rate in Hz.
    pub rate: u32,
    /// Frames per graph cycle.
    pub quantum: u32,
    /// Smallest quantum a node may request.
    pub min_quantum: u32,
    /// Largest quantum a node may request.
    pub max_quantum: u32,
}

impl Default for ClockSettings {
    fn default() -> Self {
        Self {
            rate: 48000,
            quantum: 1024,
            min_quantum: 32,
            max_quantum: 8192,
        }
    }
}

impl ClockSettings {
    /// Wall time of one quantum at the graph rate.
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(f64::from(self.quantum) / f64::from(self.rate.max(1)))
    }
}

/// Resampler settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ResampleSettings {
    /// Quality table index, 0 to 14.
    pub quality: u32,
    /// Use the peak decimator instead of the polyphase filter.
    pub peaks: bool,
}

impl Default for ResampleSettings {
    fn default() -> Self {
        Self {
            quality: cauce_dsp::resample::DEFAULT_QUALITY,
            peaks: false,
        }
    }
}

/// Per-node behaviour.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NodeSettings {
    /// Send `Pause` when a node goes idle. Disable for nodes that must keep
    /// running.
    pub pause_on_idle: bool,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            pause_on_idle: true,
        }
    }
}

/// Engine settings.
///
/// All fields default, so any subset may appear in the file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// How long a starting driver waits for its followers before forcing
    /// `RUNNING`, in milliseconds.
    pub sync_timeout_ms: u64,
    /// CPU feature mask override such as `"sse2,avx2"`. Detected at
    /// runtime when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_flags: Option<String>,
    /// Graph clock.
    pub clock: ClockSettings,
    /// Resampler selection.
    pub resample: ResampleSettings,
    /// Node behaviour.
    pub node: NodeSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sync_timeout_ms: 5000,
            cpu_flags: None,
            clock: ClockSettings::default(),
            resample: ResampleSettings::default(),
            node: NodeSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        Self::from_toml_str(&content)
    }

    /// Load settings from a TOML string.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Load and validate the file at `path`, or return the defaults when
    /// it does not exist.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let settings = Self::from_file(path)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Save the settings to a TOML file, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::create_dir(parent, e))?;
        }
        let content = self.to_toml()?;
        std::fs::write(path, content).map_err(|e| ConfigError::write_file(path, e))?;
        Ok(())
    }

    /// Render as a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Checks every field, reporting all problems at once.
    pub fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();
        crate::validation::check_clock(&self.clock, &mut errors);
        if self.sync_timeout_ms == 0 {
            errors.push(ValidationError::out_of_range("sync_timeout_ms", 0, 1, u64::MAX));
        }
        if self.resample.quality >= cauce_dsp::resample::QUALITY_COUNT {
            errors.push(ValidationError::out_of_range(
                "resample.quality",
                u64::from(self.resample.quality),
                0,
                u64::from(cauce_dsp::resample::QUALITY_COUNT - 1),
            ));
        }
        if let Err(e) = self.parsed_cpu_flags() {
            errors.push(e);
        }
        collect(errors)
    }

    /// The sync timeout as a duration.
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }

    /// The configured CPU flag override, if any.
    pub fn parsed_cpu_flags(&self) -> ValidationResult<Option<CpuFlags>> {
        self.cpu_flags
            .as_deref()
            .map(|s| s.parse().map_err(|_| ValidationError::InvalidCpuFlags(s.to_string())))
            .transpose()
    }

    /// CPU flags to hand to converters: the override when present,
    /// otherwise what the running CPU reports. An override that fails to
    /// parse falls back to detection.
    pub fn effective_cpu_flags(&self) -> CpuFlags {
        match self.parsed_cpu_flags() {
            Ok(Some(flags)) => flags,
            _ => CpuFlags::detect(),
        }
    }

    /// Resampler configuration for a stream with these settings.
    pub fn resample_config(&self, channels: u32, in_rate: u32, out_rate: u32) -> ResampleConfig {
        let method = if self.resample.peaks {
            ResampleMethod::Peaks
        } else {
            ResampleMethod::Native
        };
        ResampleConfig::new(channels, in_rate, out_rate)
            .with_quality(self.resample.quality)
            .with_method(method)
    }
}
