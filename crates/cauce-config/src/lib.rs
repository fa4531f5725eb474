//! Engine settings for the cauce audio graph.
//!
//! Settings are plain TOML. Every field has a default, so an empty file or
//! a partial one is valid input:
//!
//! ```toml
//! sync_timeout_ms = 5000
//! cpu_flags = "sse2,avx2"
//!
//! [clock]
//! rate = 48000
//! quantum = 1024
//! min_quantum = 32
//! max_quantum = 8192
//!
//! [resample]
//! quality = 4
//! peaks = false
//!
//! [node]
//! pause_on_idle = true
//! ```
//!
//! # Example
//!
//! ```rust
//! use cauce_config::Settings;
//!
//! let settings = Settings::from_toml_str("[clock]\nquantum = 256\n").unwrap();
//! settings.validate().unwrap();
//! assert_eq!(settings.clock.quantum, 256);
//! assert_eq!(settings.clock.rate, 48000);
//! ```

mod error;
mod settings;

/// Default locations of the settings file.
pub mod paths;

/// Range and consistency checks for settings.
pub mod validation;

pub use error::ConfigError;
pub use paths::{default_settings_path, user_config_dir};
pub use settings::{ClockSettings, NodeSettings, ResampleSettings, Settings};
pub use validation::{ValidationError, ValidationResult};
