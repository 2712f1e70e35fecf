use tracing::{debug, warn};

use shared_models::auth::Role;

use crate::models::{AppointmentError, AppointmentStatus};

/// Role-aware appointment state machine. No I/O.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusWorkflow;

impl StatusWorkflow {
    pub fn new() -> Self {
        Self
    }

    /// Validate that `role` may move an appointment from `current` to `target`
    pub fn validate(
        &self,
        current: AppointmentStatus,
        target: AppointmentStatus,
        role: Role,
    ) -> Result<(), AppointmentError> {
        debug!("Validating status transition {} -> {} for {}", current, target, role);

        if !self.allowed_targets(current, role).contains(&target) {
            warn!("Invalid status transition attempted by {}: {} -> {}", role, current, target);
            return Err(AppointmentError::InvalidTransition { from: current, to: target });
        }

        Ok(())
    }

    /// Get all statuses `role` may set from `current`
    pub fn allowed_targets(&self, current: AppointmentStatus, role: Role) -> &'static [AppointmentStatus] {
        use AppointmentStatus::*;

        match (current, role) {
            (Requested, Role::Patient) => &[Cancelled],
            (Requested, Role::Provider) => &[Confirmed, Cancelled],
            (Confirmed, Role::Patient) => &[Cancelled],
            (Confirmed, Role::Provider) => &[InProgress, Cancelled],
            (InProgress, Role::Patient) => &[],
            (InProgress, Role::Provider) => &[Completed],
            // Terminal states - no transitions allowed
            (Completed, _) | (Cancelled, _) => &[],
        }
    }

    /// Whether the appointment can still be moved to another slot.
    pub fn can_reschedule(&self, current: AppointmentStatus) -> bool {
        matches!(current, AppointmentStatus::Requested | AppointmentStatus::Confirmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use AppointmentStatus::*;

    const TABLE: &[(AppointmentStatus, Role, &[AppointmentStatus])] = &[
        (Requested, Role::Patient, &[Cancelled]),
        (Requested, Role::Provider, &[Confirmed, Cancelled]),
        (Confirmed, Role::Patient, &[Cancelled]),
        (Confirmed, Role::Provider, &[InProgress, Cancelled]),
        (InProgress, Role::Patient, &[]),
        (InProgress, Role::Provider, &[Completed]),
        (Completed, Role::Patient, &[]),
        (Completed, Role::Provider, &[]),
        (Cancelled, Role::Patient, &[]),
        (Cancelled, Role::Provider, &[]),
    ];

    #[test]
    fn test_every_transition_matches_the_table() {
        let workflow = StatusWorkflow::new();

        for (current, role, allowed) in TABLE {
            for target in AppointmentStatus::ALL {
                let outcome = workflow.validate(*current, target, *role);
                if allowed.contains(&target) {
                    assert!(outcome.is_ok(), "{} should move {} -> {}", role, current, target);
                } else {
                    assert_matches!(
                        outcome,
                        Err(AppointmentError::InvalidTransition { from, to }) if from == *current && to == target,
                        "{} should not move {} -> {}", role, current, target
                    );
                }
            }
        }
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        let workflow = StatusWorkflow::new();
        for status in AppointmentStatus::ALL.into_iter().filter(AppointmentStatus::is_terminal) {
            assert!(workflow.allowed_targets(status, Role::Patient).is_empty());
            assert!(workflow.allowed_targets(status, Role::Provider).is_empty());
        }
    }

    #[test]
    fn test_self_transition_is_rejected() {
        let workflow = StatusWorkflow::new();
        assert!(workflow.validate(Confirmed, Confirmed, Role::Provider).is_err());
    }

    #[test]
    fn test_reschedule_window() {
        let workflow = StatusWorkflow::new();
        assert!(workflow.can_reschedule(Requested));
        assert!(workflow.can_reschedule(Confirmed));
        assert!(!workflow.can_reschedule(InProgress));
        assert!(!workflow.can_reschedule(Cancelled));
    }
}
