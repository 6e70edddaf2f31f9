//! Status transition detection.
//!
//! [`detect`] is pure: it compares the endpoint's last effective status with a
//! new outcome and reports whether the up/down category changed.

use crate::model::{EndpointStatus, Outcome};

/// Result of comparing the previous status with a new outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    /// Status the endpoint should hold after this check
    pub status: EndpointStatus,
    /// Whether the status category changed
    pub transitioned: bool,
}

/// Decide the endpoint's new status after a check.
///
/// `pending` always moves to the outcome's status. `up`/`down` transition only
/// when the outcome differs. Paused endpoints are never checked; if one reaches
/// here anyway it stays paused and nothing transitions.
pub fn detect(previous: EndpointStatus, outcome: Outcome) -> Detection {
    let next = EndpointStatus::from(outcome);
    match previous {
        EndpointStatus::Paused => Detection {
            status: EndpointStatus::Paused,
            transitioned: false,
        },
        EndpointStatus::Pending => Detection {
            status: next,
            transitioned: true,
        },
        EndpointStatus::Up | EndpointStatus::Down => Detection {
            status: next,
            transitioned: previous != next,
        },
    }
}

/// Whether a detected transition raises an alert.
///
/// The first result after registration or resume only establishes a baseline,
/// unless `notify_on_first_check` asks for `pending -> down` alerts. Resume
/// resets the status to pending, so an endpoint that was down before a pause
/// and is still down afterwards raises no alert by default.
pub fn should_notify(
    previous: EndpointStatus,
    detection: Detection,
    notify_on_first_check: bool,
) -> bool {
    if !detection.transitioned {
        return false;
    }
    match previous {
        EndpointStatus::Pending => {
            notify_on_first_check && detection.status == EndpointStatus::Down
        }
        EndpointStatus::Up | EndpointStatus::Down => true,
        EndpointStatus::Paused => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(status: EndpointStatus, transitioned: bool) -> Detection {
        Detection { status, transitioned }
    }

    #[test]
    fn test_detect_table() {
        use EndpointStatus::*;

        assert_eq!(detect(Pending, Outcome::Up), d(Up, true));
        assert_eq!(detect(Pending, Outcome::Down), d(Down, true));
        assert_eq!(detect(Up, Outcome::Up), d(Up, false));
        assert_eq!(detect(Up, Outcome::Down), d(Down, true));
        assert_eq!(detect(Down, Outcome::Down), d(Down, false));
        assert_eq!(detect(Down, Outcome::Up), d(Up, true));
    }

    #[test]
    fn test_paused_never_transitions() {
        assert_eq!(detect(EndpointStatus::Paused, Outcome::Up), d(EndpointStatus::Paused, false));
        assert_eq!(
            detect(EndpointStatus::Paused, Outcome::Down),
            d(EndpointStatus::Paused, false)
        );
    }

    #[test]
    fn test_repeated_outcomes_signal_once() {
        let mut status = EndpointStatus::Up;
        let mut signals = 0;
        for outcome in [Outcome::Down, Outcome::Down, Outcome::Down, Outcome::Up, Outcome::Up] {
            let detection = detect(status, outcome);
            if detection.transitioned {
                signals += 1;
            }
            status = detection.status;
        }
        assert_eq!(signals, 2);
        assert_eq!(status, EndpointStatus::Up);
    }

    #[test]
    fn test_first_check_does_not_notify_by_default() {
        use EndpointStatus::*;

        assert!(!should_notify(Pending, detect(Pending, Outcome::Up), false));
        assert!(!should_notify(Pending, detect(Pending, Outcome::Down), false));
        assert!(should_notify(Up, detect(Up, Outcome::Down), false));
        assert!(should_notify(Down, detect(Down, Outcome::Up), false));
        assert!(!should_notify(Down, detect(Down, Outcome::Down), false));
    }

    #[test]
    fn test_first_check_down_notifies_when_enabled() {
        use EndpointStatus::*;

        assert!(should_notify(Pending, detect(Pending, Outcome::Down), true));
        assert!(!should_notify(Pending, detect(Pending, Outcome::Up), true));
    }
}
