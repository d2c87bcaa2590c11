//! Client-side confirmation state machine.
//!
//! Every transition is a pure function of `(state, event)` that returns the
//! next state and at most one [`Effect`] for the driver to perform. Nothing
//! here touches the network, so the whole flow is testable in isolation; see
//! [`crate::session`] for the driver.
//!
//! ```text
//! Initializing --resolved--> Ready --submit--> Submitting --committed--> Committed
//!      |                       ^                    |
//!      +--not found/error--> Failed                 +--denied / transport error--> Ready
//! ```

use std::fmt;

use crate::constants::{
    COMMITTED_MESSAGE, INCOMPLETE_PIN_MESSAGE, INVALID_LINK_MESSAGE, RESOLVE_TRANSPORT_MESSAGE,
    SUBMIT_TRANSPORT_MESSAGE,
};
use crate::pin::PinCandidate;
use crate::protocol::{ResolveOutcome, TransferDetails, VerifyOutcome};
use crate::reference::TransactionReference;

/// The single source of truth for a confirmation session.
///
/// Not `Clone`: the `Ready` state owns the only copy of the PIN candidate.
#[derive(Debug, PartialEq, Eq)]
pub enum ConfirmationState {
    /// Reference extracted, `get_transaction` in flight.
    Initializing { reference: TransactionReference },
    /// Details shown, PIN input enabled. `notice` carries the last error.
    Ready {
        reference: TransactionReference,
        details: TransferDetails,
        candidate: PinCandidate,
        notice: Option<String>,
    },
    /// `verify_pin` in flight, input disabled.
    Submitting {
        reference: TransactionReference,
        details: TransferDetails,
    },
    /// Funds released. Terminal.
    Committed {
        reference: TransactionReference,
        details: TransferDetails,
    },
    /// Link unusable for this session. Terminal.
    Failed { reason: String },
}

/// Discriminant of [`ConfirmationState`], for display and assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initializing,
    Ready,
    Submitting,
    Committed,
    Failed,
}

/// Inputs to the machine: user actions and completed requests.
#[derive(Clone, PartialEq, Eq)]
pub enum Event {
    Resolved(ResolveOutcome),
    ResolveFailed(String),
    Input(String),
    Submit,
    Verified(VerifyOutcome),
    SubmitFailed(String),
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Resolved(outcome) => f.debug_tuple("Resolved").field(outcome).finish(),
            Event::ResolveFailed(e) => f.debug_tuple("ResolveFailed").field(e).finish(),
            Event::Input(_) => f.write_str("Input(..)"),
            Event::Submit => f.write_str("Submit"),
            Event::Verified(outcome) => f.debug_tuple("Verified").field(outcome).finish(),
            Event::SubmitFailed(e) => f.debug_tuple("SubmitFailed").field(e).finish(),
        }
    }
}

/// Work the driver must perform after a transition.
#[derive(Debug, PartialEq, Eq)]
pub enum Effect {
    /// Issue the one `get_transaction` request for this session.
    Resolve(TransactionReference),
    /// Issue one `verify_pin` request. The candidate moves out of the state
    /// into this effect, so it can be sent at most once.
    SendPin {
        reference: TransactionReference,
        pin: PinCandidate,
    },
    /// Tear the view down after the session's teardown delay. The commit
    /// is already final.
    ScheduleTeardown,
}

/// What a front-end needs to render the current state. Holds no PIN digits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationView {
    pub phase: Phase,
    pub details: Option<TransferDetails>,
    pub notice: Option<String>,
    pub candidate_len: usize,
    pub input_enabled: bool,
    pub can_submit: bool,
}

impl ConfirmationState {
    /// Enter the machine from a link. A missing or malformed reference goes
    /// straight to `Failed` and requests nothing.
    pub fn mount(link: Option<&str>) -> (Self, Option<Effect>) {
        let reference = link.and_then(|l| TransactionReference::from_link(l).ok());
        match reference {
            Some(reference) => (
                ConfirmationState::Initializing {
                    reference: reference.clone(),
                },
                Some(Effect::Resolve(reference)),
            ),
            None => (
                ConfirmationState::Failed {
                    reason: INVALID_LINK_MESSAGE.to_string(),
                },
                None,
            ),
        }
    }

    /// Apply one event. Events that make no sense in the current state
    /// (including a second submit while one is in flight) leave it unchanged
    /// and produce no effect.
    pub fn transition(self, event: Event) -> (Self, Option<Effect>) {
        use ConfirmationState as S;

        match (self, event) {
            (S::Initializing { reference }, Event::Resolved(ResolveOutcome::Found(details))) => (
                S::Ready {
                    reference,
                    details,
                    candidate: PinCandidate::new(),
                    notice: None,
                },
                None,
            ),
            (S::Initializing { .. }, Event::Resolved(ResolveOutcome::NotFound(reason))) => {
                (S::Failed { reason }, None)
            }
            (S::Initializing { .. }, Event::ResolveFailed(_)) => (
                S::Failed {
                    reason: RESOLVE_TRANSPORT_MESSAGE.to_string(),
                },
                None,
            ),

            (
                S::Ready {
                    reference,
                    details,
                    mut candidate,
                    notice,
                },
                Event::Input(raw),
            ) => {
                candidate.apply_input(&raw);
                (
                    S::Ready {
                        reference,
                        details,
                        candidate,
                        notice,
                    },
                    None,
                )
            }
            (
                S::Ready {
                    reference,
                    details,
                    candidate,
                    ..
                },
                Event::Submit,
            ) => {
                if candidate.is_complete() {
                    (
                        S::Submitting {
                            reference: reference.clone(),
                            details,
                        },
                        Some(Effect::SendPin {
                            reference,
                            pin: candidate,
                        }),
                    )
                } else {
                    (
                        S::Ready {
                            reference,
                            details,
                            candidate,
                            notice: Some(INCOMPLETE_PIN_MESSAGE.to_string()),
                        },
                        None,
                    )
                }
            }

            (S::Submitting { reference, details }, Event::Verified(VerifyOutcome::Committed)) => (
                S::Committed { reference, details },
                Some(Effect::ScheduleTeardown),
            ),
            (
                S::Submitting { reference, details },
                Event::Verified(VerifyOutcome::Denied(reason)),
            ) => (
                S::Ready {
                    reference,
                    details,
                    candidate: PinCandidate::new(),
                    notice: Some(reason),
                },
                None,
            ),
            (S::Submitting { reference, details }, Event::SubmitFailed(_)) => (
                S::Ready {
                    reference,
                    details,
                    candidate: PinCandidate::new(),
                    notice: Some(SUBMIT_TRANSPORT_MESSAGE.to_string()),
                },
                None,
            ),

            (state, event) => {
                tracing::debug!(phase = ?state.phase(), event = ?event, "event ignored");
                (state, None)
            }
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            ConfirmationState::Initializing { .. } => Phase::Initializing,
            ConfirmationState::Ready { .. } => Phase::Ready,
            ConfirmationState::Submitting { .. } => Phase::Submitting,
            ConfirmationState::Committed { .. } => Phase::Committed,
            ConfirmationState::Failed { .. } => Phase::Failed,
        }
    }

    pub fn details(&self) -> Option<&TransferDetails> {
        match self {
            ConfirmationState::Ready { details, .. }
            | ConfirmationState::Submitting { details, .. }
            | ConfirmationState::Committed { details, .. } => Some(details),
            ConfirmationState::Initializing { .. } | ConfirmationState::Failed { .. } => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConfirmationState::Committed { .. } | ConfirmationState::Failed { .. }
        )
    }

    pub fn view(&self) -> ConfirmationView {
        let (notice, candidate_len, input_enabled, can_submit) = match self {
            ConfirmationState::Ready {
                candidate, notice, ..
            } => (
                notice.clone(),
                candidate.len(),
                true,
                candidate.is_complete(),
            ),
            ConfirmationState::Committed { .. } => {
                (Some(COMMITTED_MESSAGE.to_string()), 0, false, false)
            }
            ConfirmationState::Failed { reason } => (Some(reason.clone()), 0, false, false),
            ConfirmationState::Initializing { .. } | ConfirmationState::Submitting { .. } => {
                (None, 0, false, false)
            }
        };
        ConfirmationView {
            phase: self.phase(),
            details: self.details().cloned(),
            notice,
            candidate_len,
            input_enabled,
            can_submit,
        }
    }
}
