// src/models/mod.rs

pub mod emergency;
pub mod finance;
pub mod ipd;
pub mod laboratory;
pub mod patient;
pub mod pharmacy;
pub mod support;

pub use emergency::*;
pub use finance::*;
pub use ipd::*;
pub use laboratory::*;
pub use patient::*;
pub use pharmacy::*;
pub use support::*;

use std::str::FromStr;

// ==================== LIFECYCLE ====================

/// Enumerated status with an allow-list of next states.
pub trait Lifecycle: FromStr + Copy + PartialEq + 'static {
    fn next(&self) -> &'static [Self];

    fn is_terminal(&self) -> bool {
        self.next().is_empty()
    }
}

/// Unknown statuses on either side never pass.
pub fn transition_allowed<S: Lifecycle>(from: &str, to: &str) -> bool {
    match (S::from_str(from), S::from_str(to)) {
        (Ok(from), Ok(to)) => from == to || from.next().contains(&to),
        _ => false,
    }
}

pub const GENDERS: &[&str] = &["male", "female", "other"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_follow_tables() {
        assert!(transition_allowed::<AppointmentStatus>("scheduled", "confirmed"));
        assert!(transition_allowed::<AppointmentStatus>("confirmed", "completed"));
        assert!(!transition_allowed::<AppointmentStatus>("completed", "scheduled"));
        assert!(!transition_allowed::<AppointmentStatus>("scheduled", "archived"));

        assert!(transition_allowed::<LabOrderStatus>("ordered", "sample-collected"));
        assert!(!transition_allowed::<LabOrderStatus>("ordered", "completed"));
        assert!(LabOrderStatus::Completed.is_terminal());

        assert!(transition_allowed::<TicketStatus>("resolved", "open"));
        assert!(!transition_allowed::<TicketStatus>("closed", "open"));
    }
}
