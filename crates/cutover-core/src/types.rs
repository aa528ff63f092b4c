//! Shared types used across cutover crates.

use std::time::{SystemTime, UNIX_EPOCH};

/// Unix timestamp in milliseconds.
pub type TimestampMs = u64;

/// Actor recorded on flag writes performed by the automatic rollback paths.
pub const EMERGENCY_ACTOR: &str = "emergency_system";

/// Current wall-clock time as unix milliseconds.
pub fn epoch_millis() -> TimestampMs {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Current wall-clock time as unix seconds.
pub fn epoch_secs() -> u64 {
    epoch_millis() / 1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_values_are_consistent() {
        let secs = epoch_secs();
        let millis = epoch_millis();
        // After 2020-01-01.
        assert!(secs > 1_577_836_800);
        assert!(millis / 1000 >= secs);
    }
}
