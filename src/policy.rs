//! Threshold policy engine.
//!
//! A pure, per-watch state machine: the observed rate either exceeds the
//! threshold or it doesn't, and an action is signalled only on the *change*
//! of that verdict (edge-triggered). A device sitting above threshold for
//! many cycles is blocked exactly once; one sitting below is unblocked
//! exactly once.
//!
//! Deliberately no hysteresis band: a rate oscillating around the threshold
//! will flap. That matches the deployed policy; widening it into a band is
//! a policy change, not a tuning knob, so it does not happen silently here.

use crate::types::BlockState;

/// Outcome of one policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// The state the watch should be in given the observed rate.
    pub next: BlockState,
    /// Whether `next` differs from the current state, i.e. whether the
    /// rule set must be applied this cycle.
    pub transitioned: bool,
}

/// Evaluate one rate observation against the threshold.
///
/// The comparison is strict: a rate exactly equal to the threshold is
/// acceptable traffic.
pub fn evaluate(rate: f64, threshold: f64, current: BlockState) -> Decision {
    let next = if rate > threshold {
        BlockState::Blocked
    } else {
        BlockState::Allowed
    };
    Decision {
        next,
        transitioned: next != current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_above_threshold_blocks() {
        let d = evaluate(15.0, 10.0, BlockState::Allowed);
        assert_eq!(d.next, BlockState::Blocked);
        assert!(d.transitioned);
    }

    #[test]
    fn rate_below_threshold_unblocks() {
        let d = evaluate(2.0, 10.0, BlockState::Blocked);
        assert_eq!(d.next, BlockState::Allowed);
        assert!(d.transitioned);
    }

    #[test]
    fn comparison_is_strict() {
        // Exactly at threshold is acceptable traffic.
        let d = evaluate(10.0, 10.0, BlockState::Allowed);
        assert_eq!(d.next, BlockState::Allowed);
        assert!(!d.transitioned);
    }

    #[test]
    fn sustained_high_rate_triggers_once() {
        let mut state = BlockState::Allowed;
        let mut transitions = 0;
        for _ in 0..5 {
            let d = evaluate(15.0, 10.0, state);
            if d.transitioned {
                transitions += 1;
            }
            state = d.next;
        }
        assert_eq!(transitions, 1);
        assert_eq!(state, BlockState::Blocked);
    }

    #[test]
    fn sustained_low_rate_never_retriggers() {
        let mut state = BlockState::Allowed;
        for _ in 0..5 {
            let d = evaluate(0.0, 10.0, state);
            assert!(!d.transitioned);
            state = d.next;
        }
    }

    #[test]
    fn evaluation_is_pure() {
        let a = evaluate(15.0, 10.0, BlockState::Allowed);
        let b = evaluate(15.0, 10.0, BlockState::Allowed);
        assert_eq!(a, b);
    }
}
