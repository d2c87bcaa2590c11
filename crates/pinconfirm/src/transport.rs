//! The client's view of the verification endpoint.

use std::sync::Arc;

use crate::error::ConfirmError;
use crate::pin::PinCandidate;
use crate::protocol::{ResolveOutcome, VerifyOutcome};
use crate::reference::TransactionReference;

/// Request/response channel to the verification endpoint.
///
/// Implementations issue exactly one request per call and never retry;
/// `Err` means the request could not be completed (transport failure or an
/// unreadable response), while server-side refusals come back as `Ok`.
pub trait ConfirmationTransport: Send + Sync {
    /// `get_transaction` for `reference`.
    fn get_transaction(
        &self,
        reference: &TransactionReference,
    ) -> impl std::future::Future<Output = Result<ResolveOutcome, ConfirmError>> + Send;

    /// `verify_pin` for `reference` with one candidate.
    fn verify_pin(
        &self,
        reference: &TransactionReference,
        pin: &PinCandidate,
    ) -> impl std::future::Future<Output = Result<VerifyOutcome, ConfirmError>> + Send;
}

impl<T: ConfirmationTransport> ConfirmationTransport for Arc<T> {
    fn get_transaction(
        &self,
        reference: &TransactionReference,
    ) -> impl std::future::Future<Output = Result<ResolveOutcome, ConfirmError>> + Send {
        (**self).get_transaction(reference)
    }

    fn verify_pin(
        &self,
        reference: &TransactionReference,
        pin: &PinCandidate,
    ) -> impl std::future::Future<Output = Result<VerifyOutcome, ConfirmError>> + Send {
        (**self).verify_pin(reference, pin)
    }
}
