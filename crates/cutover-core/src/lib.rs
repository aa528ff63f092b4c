pub mod config;
pub mod phases;
pub mod types;

pub use config::{
    parse_duration, ConfigError, CutoverConfig, FlagSettings, MonitorSettings, RolloutSettings,
};
pub use phases::{next_phase_after, phase_for_percentage, RolloutPhase, PHASES};
pub use types::*;
