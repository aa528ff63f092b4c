//! The rollout phase table.
//!
//! Phases are ordered by strictly increasing traffic percentage. Reads
//! against the migrated path switch on at 10%, writes at 50%.

use serde::Serialize;

/// One step of the rollout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RolloutPhase {
    /// Share of traffic routed to the migrated path (0-100).
    pub percentage: u8,
    pub description: &'static str,
    pub enable_reads: bool,
    pub enable_writes: bool,
    /// Operator guidance for how long to observe the phase before advancing.
    pub estimated_soak_minutes: u32,
}

/// The static phase table.
pub const PHASES: [RolloutPhase; 6] = [
    RolloutPhase {
        percentage: 0,
        description: "validation only, all traffic on the legacy path",
        enable_reads: false,
        enable_writes: false,
        estimated_soak_minutes: 5,
    },
    RolloutPhase {
        percentage: 10,
        description: "migrated reads for 10% of traffic",
        enable_reads: true,
        enable_writes: false,
        estimated_soak_minutes: 30,
    },
    RolloutPhase {
        percentage: 25,
        description: "migrated reads for 25% of traffic",
        enable_reads: true,
        enable_writes: false,
        estimated_soak_minutes: 60,
    },
    RolloutPhase {
        percentage: 50,
        description: "migrated reads and writes for 50% of traffic",
        enable_reads: true,
        enable_writes: true,
        estimated_soak_minutes: 120,
    },
    RolloutPhase {
        percentage: 75,
        description: "migrated reads and writes for 75% of traffic",
        enable_reads: true,
        enable_writes: true,
        estimated_soak_minutes: 240,
    },
    RolloutPhase {
        percentage: 100,
        description: "all traffic on the migrated path",
        enable_reads: true,
        enable_writes: true,
        estimated_soak_minutes: 1440,
    },
];

impl RolloutPhase {
    /// Whether this is the last phase of the table.
    pub fn is_final(&self) -> bool {
        self.percentage == PHASES[PHASES.len() - 1].percentage
    }
}

/// The phase in effect for a persisted percentage.
///
/// Percentages between table entries resolve to the highest phase not above
/// them, so a hand-edited flag never maps to a phase with more traffic than
/// it actually carries.
pub fn phase_for_percentage(percentage: u8) -> &'static RolloutPhase {
    PHASES
        .iter()
        .rev()
        .find(|p| p.percentage <= percentage)
        .unwrap_or(&PHASES[0])
}

/// The phase strictly after `percentage`, or `None` at the final phase.
pub fn next_phase_after(percentage: u8) -> Option<&'static RolloutPhase> {
    PHASES.iter().find(|p| p.percentage > percentage)
}
