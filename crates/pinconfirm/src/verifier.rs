//! Server-side half of the protocol: resolves references, checks PINs,
//! counts failures and commits each transfer at most once.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::constants::{
    ALREADY_COMPLETED_REASON, CONFIRMATION_PAGE_PATH, DEFAULT_MAX_FAILED_ATTEMPTS,
    DEFAULT_TRANSFER_TTL_SECS, EXPIRED_OR_UNKNOWN_REASON, LEDGER_FAILED_REASON, LINK_PARAM,
    LOCKED_REASON, MALFORMED_PIN_REASON, NO_LONGER_VALID_REASON, NO_PIN_REASON, VERIFY_FALLBACK,
};
use crate::credential::PinHasher;
use crate::error::ConfirmError;
use crate::ledger::TransferLedger;
use crate::pin::PinCandidate;
use crate::protocol::{
    NewTransfer, RegisteredTransfer, ResolveOutcome, TransferDetails, VerifyOutcome,
    VerifyResponse,
};
use crate::reference::TransactionReference;
use crate::store::{
    unix_now, CredentialStore, FailureOutcome, InMemoryStore, PendingTransfer, TransferStatus,
    TransferStore,
};
use crate::transport::ConfirmationTransport;

/// Tunables of the verifier.
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Failed attempts after which a reference is cancelled.
    pub max_failed_attempts: u32,
    /// Lifetime of a pending transfer, in seconds.
    pub transfer_ttl_secs: u64,
    /// Base URL used to build confirmation links.
    pub public_base_url: String,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            max_failed_attempts: DEFAULT_MAX_FAILED_ATTEMPTS,
            transfer_ttl_secs: DEFAULT_TRANSFER_TTL_SECS,
            public_base_url: "http://localhost:4030".to_string(),
        }
    }
}

/// Outcome of one `verify_pin` on the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinVerdict {
    /// The PIN matched and the ledger released the funds.
    Committed {
        receipt: String,
        transfer: PendingTransfer,
    },
    /// Refused. The transfer, if any, is unchanged apart from its counter.
    Denied { reason: String },
    /// This attempt used up the last one and cancelled the transfer.
    Locked { transfer: PendingTransfer },
    /// The PIN matched but the ledger refused. The reference is burnt.
    Failed { transfer: PendingTransfer },
}

impl PinVerdict {
    fn denied(reason: impl Into<String>) -> Self {
        PinVerdict::Denied {
            reason: reason.into(),
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, PinVerdict::Committed { .. })
    }

    /// Reason shown to the user, `None` once committed.
    pub fn reason(&self) -> Option<&str> {
        match self {
            PinVerdict::Committed { .. } => None,
            PinVerdict::Denied { reason } => Some(reason),
            PinVerdict::Locked { .. } => Some(LOCKED_REASON),
            PinVerdict::Failed { .. } => Some(LEDGER_FAILED_REASON),
        }
    }

    /// Short name used for metrics labels.
    pub fn label(&self) -> &'static str {
        match self {
            PinVerdict::Committed { .. } => "committed",
            PinVerdict::Denied { .. } => "denied",
            PinVerdict::Locked { .. } => "locked",
            PinVerdict::Failed { .. } => "failed",
        }
    }

    /// The transfer this verdict changed for good, if any.
    pub fn settled_transfer(&self) -> Option<&PendingTransfer> {
        match self {
            PinVerdict::Committed { transfer, .. }
            | PinVerdict::Locked { transfer }
            | PinVerdict::Failed { transfer } => Some(transfer),
            PinVerdict::Denied { .. } => None,
        }
    }

    pub fn to_response(&self) -> VerifyResponse {
        match self.reason() {
            None => VerifyResponse::committed(),
            Some(reason) => VerifyResponse::failure(reason),
        }
    }
}

/// Denial reason for a wrong PIN that still leaves attempts.
pub fn attempts_remaining_reason(remaining: u32) -> String {
    format!("Incorrect PIN. {remaining} attempt(s) remaining.")
}

/// Verifies PINs against stored hashes and commits pending transfers.
///
/// Every `verify_and_commit` for a reference runs under that reference's
/// async mutex. The store's `try_claim` is still the commit point, so two
/// processes sharing one SQLite file cannot both release a transfer.
pub struct PinVerifier<L> {
    ledger: L,
    hasher: PinHasher,
    transfers: Arc<dyn TransferStore>,
    credentials: Arc<dyn CredentialStore>,
    reference_locks: Arc<DashMap<TransactionReference, Arc<Mutex<()>>>>,
    config: VerifierConfig,
}

impl<L> PinVerifier<L> {
    /// Maximum number of concurrent reference locks to prevent memory exhaustion.
    const MAX_REFERENCE_LOCKS: usize = 100_000;

    /// Verifier with an in-memory store. State is lost on restart; use
    /// [`with_store`](Self::with_store) with a `SqliteStore` in production.
    pub fn new(ledger: L, hasher: PinHasher) -> Self {
        let store = Arc::new(InMemoryStore::new());
        Self {
            ledger,
            hasher,
            transfers: store.clone(),
            credentials: store,
            reference_locks: Arc::new(DashMap::new()),
            config: VerifierConfig::default(),
        }
    }

    /// Use `store` for both transfers and PIN credentials.
    pub fn with_store<S>(mut self, store: Arc<S>) -> Self
    where
        S: TransferStore + CredentialStore + 'static,
    {
        let transfers: Arc<dyn TransferStore> = store.clone();
        let credentials: Arc<dyn CredentialStore> = store;
        self.transfers = transfers;
        self.credentials = credentials;
        self
    }

    pub fn with_config(mut self, config: VerifierConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Register a pending transfer and mint its confirmation link.
    pub fn register(&self, new: NewTransfer) -> Result<RegisteredTransfer, ConfirmError> {
        for (field, value) in [
            ("account_id", &new.account_id),
            ("recipient_name", &new.recipient_name),
            ("account_number", &new.account_number),
            ("bank", &new.bank),
        ] {
            if value.trim().is_empty() {
                return Err(ConfirmError::InvalidTransfer(format!(
                    "{field} must not be empty"
                )));
            }
        }

        let reference = TransactionReference::generate();
        let now = unix_now();
        let expires_at = now.saturating_add(self.config.transfer_ttl_secs);
        self.transfers.insert(PendingTransfer {
            reference: reference.clone(),
            account_id: new.account_id,
            details: TransferDetails {
                amount: new.amount,
                recipient_name: new.recipient_name,
                account_number: new.account_number,
                bank: new.bank,
            },
            created_at: now,
            expires_at,
            failed_attempts: 0,
            status: TransferStatus::Pending,
        })?;

        tracing::info!(reference = %reference, expires_at, "pending transfer registered");

        Ok(RegisteredTransfer {
            link: format!(
                "{}{CONFIRMATION_PAGE_PATH}?{LINK_PARAM}={reference}",
                self.config.public_base_url.trim_end_matches('/')
            ),
            transaction_id: reference.to_string(),
            expires_at,
        })
    }

    /// Set or replace the PIN of `account_id`.
    pub fn set_pin(&self, account_id: &str, pin: &str) -> Result<(), ConfirmError> {
        if account_id.trim().is_empty() {
            return Err(ConfirmError::InvalidTransfer(
                "account_id must not be empty".to_string(),
            ));
        }
        let candidate = PinCandidate::parse_exact(pin)?;
        self.credentials
            .set_pin_hash(account_id, self.hasher.hash(account_id, &candidate))?;
        tracing::info!(account_id = %account_id, "transaction PIN set");
        Ok(())
    }

    /// Answer `get_transaction`. Only unexpired pending transfers are found.
    pub fn resolve_transaction(
        &self,
        reference: &TransactionReference,
    ) -> Result<ResolveOutcome, ConfirmError> {
        match self.transfers.get(reference)? {
            Some(t) if t.status == TransferStatus::Pending && !t.is_expired(unix_now()) => {
                Ok(ResolveOutcome::Found(t.details))
            }
            _ => Ok(ResolveOutcome::NotFound(EXPIRED_OR_UNKNOWN_REASON.to_string())),
        }
    }

    /// Check the store is reachable.
    pub fn health_check(&self) -> Result<(), ConfirmError> {
        self.transfers
            .get(&TransactionReference::parse("health-probe")?)
            .map(|_| ())
    }

    /// Get or create the mutex serializing attempts on one reference.
    fn reference_lock(
        &self,
        reference: &TransactionReference,
    ) -> Result<Arc<Mutex<()>>, ConfirmError> {
        if self.reference_locks.len() >= Self::MAX_REFERENCE_LOCKS
            && !self.reference_locks.contains_key(reference)
        {
            return Err(ConfirmError::Store(
                "too many concurrent confirmations, try again later".to_string(),
            ));
        }
        Ok(self
            .reference_locks
            .entry(reference.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }
}

impl<L: Send + Sync + 'static> PinVerifier<L> {
    /// Start a background task that purges expired transfers and idle
    /// reference locks every 60 seconds.
    pub fn start_cleanup(&self) {
        let transfers = Arc::clone(&self.transfers);
        let locks = Arc::clone(&self.reference_locks);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                match transfers.purge_expired(unix_now(), 60) {
                    Ok(0) => {}
                    Ok(purged) => tracing::info!(purged, "purged expired transfers"),
                    Err(e) => tracing::error!(error = %e, "failed to purge expired transfers"),
                }

                // An Arc held elsewhere or a held mutex means the lock is in use.
                let before = locks.len();
                locks.retain(|_, lock| Arc::strong_count(lock) > 1 || lock.try_lock().is_err());
                let removed = before - locks.len();
                if removed > 0 {
                    tracing::debug!(removed, "cleaned up idle reference locks");
                }
            }
        });
    }
}

impl<L: TransferLedger> PinVerifier<L> {
    /// Answer `verify_pin`: check the PIN and, if it matches, claim the
    /// reference and release the funds.
    ///
    /// The claim happens before the ledger call and is never undone. A ledger
    /// failure leaves the transfer `Failed` and the reference unusable.
    pub async fn verify_and_commit(
        &self,
        reference: &TransactionReference,
        pin: &str,
    ) -> Result<PinVerdict, ConfirmError> {
        let lock = self.reference_lock(reference)?;
        let _guard = lock.lock().await;

        let Some(transfer) = self.transfers.get(reference)? else {
            tracing::info!(reference = %reference, "pin attempt for unknown reference");
            return Ok(PinVerdict::denied(EXPIRED_OR_UNKNOWN_REASON));
        };

        match transfer.status {
            TransferStatus::Pending if transfer.is_expired(unix_now()) => {
                tracing::info!(reference = %reference, "pin attempt for expired transfer");
                return Ok(PinVerdict::denied(EXPIRED_OR_UNKNOWN_REASON));
            }
            TransferStatus::Pending => {}
            TransferStatus::Committed => return Ok(PinVerdict::denied(ALREADY_COMPLETED_REASON)),
            TransferStatus::Locked => return Ok(PinVerdict::denied(LOCKED_REASON)),
            TransferStatus::Failed => return Ok(PinVerdict::denied(NO_LONGER_VALID_REASON)),
        }

        let Ok(candidate) = PinCandidate::parse_exact(pin) else {
            return Ok(PinVerdict::denied(MALFORMED_PIN_REASON));
        };

        let Some(stored) = self.credentials.pin_hash(&transfer.account_id)? else {
            tracing::warn!(reference = %reference, "account has no PIN set");
            return Ok(PinVerdict::denied(NO_PIN_REASON));
        };

        if !self.hasher.verify(&transfer.account_id, &candidate, &stored) {
            drop(candidate);
            return Ok(
                match self
                    .transfers
                    .record_failure(reference, self.config.max_failed_attempts)?
                {
                    FailureOutcome::Remaining(remaining) => {
                        tracing::info!(reference = %reference, remaining, "incorrect PIN");
                        PinVerdict::denied(attempts_remaining_reason(remaining))
                    }
                    FailureOutcome::Locked => {
                        tracing::warn!(
                            reference = %reference,
                            attempts = self.config.max_failed_attempts,
                            "transfer cancelled after too many failed attempts"
                        );
                        PinVerdict::Locked {
                            transfer: PendingTransfer {
                                failed_attempts: self.config.max_failed_attempts,
                                status: TransferStatus::Locked,
                                ..transfer
                            },
                        }
                    }
                    FailureOutcome::Unavailable => PinVerdict::denied(NO_LONGER_VALID_REASON),
                },
            );
        }
        drop(candidate);

        if !self.transfers.try_claim(reference, unix_now())? {
            tracing::warn!(reference = %reference, "claim race: transfer no longer pending");
            return Ok(PinVerdict::denied(NO_LONGER_VALID_REASON));
        }

        match self.ledger.release(&transfer).await {
            Ok(receipt) => {
                tracing::info!(
                    reference = %reference,
                    amount = %transfer.details.amount,
                    receipt = %receipt,
                    "transfer committed"
                );
                Ok(PinVerdict::Committed {
                    receipt,
                    transfer: PendingTransfer {
                        status: TransferStatus::Committed,
                        ..transfer
                    },
                })
            }
            Err(e) => {
                tracing::error!(
                    reference = %reference,
                    error = %e,
                    "ledger release failed, reference remains claimed"
                );
                if let Err(mark) = self.transfers.mark_failed(reference) {
                    tracing::error!(reference = %reference, error = %mark, "failed to mark transfer failed");
                }
                Ok(PinVerdict::Failed {
                    transfer: PendingTransfer {
                        status: TransferStatus::Failed,
                        ..transfer
                    },
                })
            }
        }
    }
}

/// In-process transport, so a session can run against a verifier directly.
impl<L: TransferLedger> ConfirmationTransport for PinVerifier<L> {
    async fn get_transaction(
        &self,
        reference: &TransactionReference,
    ) -> Result<ResolveOutcome, ConfirmError> {
        self.resolve_transaction(reference)
    }

    async fn verify_pin(
        &self,
        reference: &TransactionReference,
        pin: &PinCandidate,
    ) -> Result<VerifyOutcome, ConfirmError> {
        Ok(
            match self.verify_and_commit(reference, pin.expose()).await? {
                PinVerdict::Committed { .. } => VerifyOutcome::Committed,
                denied => VerifyOutcome::Denied(
                    denied.reason().unwrap_or(VERIFY_FALLBACK).to_string(),
                ),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::RecordingLedger;
    use crate::protocol::Amount;
    use crate::store::SqliteStore;

    fn new_transfer() -> NewTransfer {
        NewTransfer {
            account_id: "acct-1".to_string(),
            amount: Amount::new(5000).unwrap(),
            recipient_name: "Jane Doe".to_string(),
            account_number: "0123456789".to_string(),
            bank: "Acme Bank".to_string(),
        }
    }

    fn verifier() -> PinVerifier<RecordingLedger> {
        let v = PinVerifier::new(RecordingLedger::new(), PinHasher::new(b"pepper".to_vec()));
        v.set_pin("acct-1", "1234").unwrap();
        v
    }

    fn registered(v: &PinVerifier<RecordingLedger>) -> TransactionReference {
        let reg = v.register(new_transfer()).unwrap();
        TransactionReference::parse(&reg.transaction_id).unwrap()
    }

    fn reason(verdict: &PinVerdict) -> &str {
        verdict.reason().expect("unexpected commit")
    }

    #[test]
    fn test_register_builds_link() {
        let v = verifier().with_config(VerifierConfig {
            public_base_url: "https://pay.example.com/".to_string(),
            ..VerifierConfig::default()
        });
        let reg = v.register(new_transfer()).unwrap();
        assert_eq!(
            reg.link,
            format!("https://pay.example.com/verify-pin?txn_id={}", reg.transaction_id)
        );
        let parsed = TransactionReference::from_link(&reg.link).unwrap();
        assert_eq!(parsed.as_str(), reg.transaction_id);
        assert!(reg.expires_at >= unix_now() + DEFAULT_TRANSFER_TTL_SECS - 1);
    }

    #[test]
    fn test_register_rejects_blank_fields() {
        let v = verifier();
        let mut t = new_transfer();
        t.bank = "  ".to_string();
        assert!(matches!(
            v.register(t),
            Err(ConfirmError::InvalidTransfer(_))
        ));
    }

    #[test]
    fn test_set_pin_requires_four_digits() {
        let v = verifier();
        assert!(matches!(
            v.set_pin("acct-1", "12a4"),
            Err(ConfirmError::InvalidPin(_))
        ));
        assert!(v.set_pin("acct-1", "12345").is_err());
        assert!(matches!(
            v.set_pin(" ", "1234"),
            Err(ConfirmError::InvalidTransfer(_))
        ));
    }

    #[test]
    fn test_resolve_pending_and_unknown() {
        let v = verifier();
        let r = registered(&v);
        match v.resolve_transaction(&r).unwrap() {
            ResolveOutcome::Found(d) => assert_eq!(d.recipient_name, "Jane Doe"),
            other => panic!("unexpected {other:?}"),
        }
        let unknown = TransactionReference::parse("NOPE").unwrap();
        assert_eq!(
            v.resolve_transaction(&unknown).unwrap(),
            ResolveOutcome::NotFound(EXPIRED_OR_UNKNOWN_REASON.to_string())
        );
    }

    #[tokio::test]
    async fn test_correct_pin_commits_once() {
        let v = verifier();
        let r = registered(&v);

        let verdict = v.verify_and_commit(&r, "1234").await.unwrap();
        match &verdict {
            PinVerdict::Committed { receipt, transfer } => {
                assert_eq!(receipt, &format!("RCPT-{r}"));
                assert_eq!(transfer.status, TransferStatus::Committed);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(verdict.to_response(), VerifyResponse::committed());

        let again = v.verify_and_commit(&r, "1234").await.unwrap();
        assert_eq!(reason(&again), ALREADY_COMPLETED_REASON);
        assert_eq!(v.ledger().release_count(), 1);
        assert!(matches!(
            v.resolve_transaction(&r).unwrap(),
            ResolveOutcome::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_lockout_after_three_failures() {
        let v = verifier();
        let r = registered(&v);

        let first = v.verify_and_commit(&r, "0000").await.unwrap();
        assert_eq!(reason(&first), "Incorrect PIN. 2 attempt(s) remaining.");
        let second = v.verify_and_commit(&r, "0001").await.unwrap();
        assert_eq!(reason(&second), "Incorrect PIN. 1 attempt(s) remaining.");
        let third = v.verify_and_commit(&r, "0002").await.unwrap();
        match &third {
            PinVerdict::Locked { transfer } => {
                assert_eq!(transfer.reference, r);
                assert_eq!(transfer.status, TransferStatus::Locked);
                assert_eq!(transfer.failed_attempts, 3);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(third.reason(), Some(LOCKED_REASON));
        assert_eq!(third.label(), "locked");
        assert_eq!(third.to_response(), VerifyResponse::failure(LOCKED_REASON));

        // Correct PIN no longer helps.
        let after = v.verify_and_commit(&r, "1234").await.unwrap();
        assert_eq!(reason(&after), LOCKED_REASON);
        assert_eq!(v.ledger().release_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_pin_is_not_counted() {
        let v = verifier();
        let r = registered(&v);
        for bad in ["", "12", "abcd", "12345"] {
            let verdict = v.verify_and_commit(&r, bad).await.unwrap();
            assert_eq!(reason(&verdict), MALFORMED_PIN_REASON);
        }
        assert!(v.verify_and_commit(&r, "1234").await.unwrap().is_committed());
    }

    #[tokio::test]
    async fn test_account_without_pin() {
        let v = PinVerifier::new(RecordingLedger::new(), PinHasher::new(b"pepper".to_vec()));
        let r = registered(&v);
        let verdict = v.verify_and_commit(&r, "1234").await.unwrap();
        assert_eq!(reason(&verdict), NO_PIN_REASON);
    }

    #[tokio::test]
    async fn test_expired_transfer_is_denied() {
        let v = verifier().with_config(VerifierConfig {
            transfer_ttl_secs: 0,
            ..VerifierConfig::default()
        });
        let r = registered(&v);
        assert!(matches!(
            v.resolve_transaction(&r).unwrap(),
            ResolveOutcome::NotFound(_)
        ));
        let verdict = v.verify_and_commit(&r, "1234").await.unwrap();
        assert_eq!(reason(&verdict), EXPIRED_OR_UNKNOWN_REASON);
    }

    #[tokio::test]
    async fn test_ledger_failure_burns_reference() {
        let v = PinVerifier::new(RecordingLedger::refusing(), PinHasher::new(b"pepper".to_vec()));
        v.set_pin("acct-1", "1234").unwrap();
        let reg = v.register(new_transfer()).unwrap();
        let r = TransactionReference::parse(&reg.transaction_id).unwrap();

        let verdict = v.verify_and_commit(&r, "1234").await.unwrap();
        match &verdict {
            PinVerdict::Failed { transfer } => {
                assert_eq!(transfer.status, TransferStatus::Failed);
                assert_eq!(transfer.details.recipient_name, "Jane Doe");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(reason(&verdict), LEDGER_FAILED_REASON);
        assert_eq!(verdict.label(), "failed");
        assert!(verdict.settled_transfer().is_some());
        let again = v.verify_and_commit(&r, "1234").await.unwrap();
        assert_eq!(reason(&again), NO_LONGER_VALID_REASON);
    }

    #[tokio::test]
    async fn test_concurrent_correct_pins_commit_once() {
        let v = Arc::new(verifier());
        let r = registered(&v);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let v = Arc::clone(&v);
                let r = r.clone();
                tokio::spawn(async move { v.verify_and_commit(&r, "1234").await.unwrap() })
            })
            .collect();

        let mut committed = 0;
        for h in handles {
            if h.await.unwrap().is_committed() {
                committed += 1;
            }
        }
        assert_eq!(committed, 1);
        assert_eq!(v.ledger().release_count(), 1);
    }

    #[tokio::test]
    async fn test_sqlite_backed_verifier() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("verifier.db");
        let store = Arc::new(SqliteStore::open(path.to_str().unwrap()).unwrap());
        let v = PinVerifier::new(RecordingLedger::new(), PinHasher::new(b"pepper".to_vec()))
            .with_store(store);
        v.set_pin("acct-1", "1234").unwrap();
        let r = registered(&v);

        assert_eq!(
            reason(&v.verify_and_commit(&r, "9999").await.unwrap()),
            "Incorrect PIN. 2 attempt(s) remaining."
        );
        assert!(v.verify_and_commit(&r, "1234").await.unwrap().is_committed());
        assert!(v.health_check().is_ok());
    }

    #[tokio::test]
    async fn test_in_process_transport() {
        let v = verifier();
        let r = registered(&v);
        assert!(matches!(
            v.get_transaction(&r).await.unwrap(),
            ResolveOutcome::Found(_)
        ));
        let pin = PinCandidate::from_input("1234");
        assert_eq!(
            v.verify_pin(&r, &pin).await.unwrap(),
            VerifyOutcome::Committed
        );
    }
}
