//! Release of funds once a PIN has been accepted.

use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::credential::sign_body;
use crate::error::ConfirmError;
use crate::protocol::Amount;
use crate::reference::TransactionReference;
use crate::store::PendingTransfer;

/// Header carrying the HMAC of a ledger request body.
pub const LEDGER_AUTH_HEADER: &str = "X-Ledger-Auth";

/// Moves money for a claimed transfer.
///
/// Called at most once per reference: the verifier claims the reference
/// before calling `release`, and a failed release is never retried.
pub trait TransferLedger: Send + Sync {
    /// Release the funds and return the ledger's receipt identifier.
    fn release(
        &self,
        transfer: &PendingTransfer,
    ) -> impl std::future::Future<Output = Result<String, ConfirmError>> + Send;
}

/// In-process ledger that records every release. Used in development and tests.
#[derive(Debug, Default)]
pub struct RecordingLedger {
    receipts: DashMap<TransactionReference, String>,
    refuse: bool,
}

impl RecordingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// A ledger that refuses every release.
    pub fn refusing() -> Self {
        Self {
            receipts: DashMap::new(),
            refuse: true,
        }
    }

    pub fn receipt(&self, reference: &TransactionReference) -> Option<String> {
        self.receipts.get(reference).map(|r| r.clone())
    }

    /// Number of releases performed.
    pub fn release_count(&self) -> usize {
        self.receipts.len()
    }
}

impl TransferLedger for RecordingLedger {
    async fn release(&self, transfer: &PendingTransfer) -> Result<String, ConfirmError> {
        if self.refuse {
            return Err(ConfirmError::Ledger("release refused".to_string()));
        }
        use dashmap::mapref::entry::Entry;
        match self.receipts.entry(transfer.reference.clone()) {
            Entry::Occupied(_) => Err(ConfirmError::Ledger(format!(
                "{} already released",
                transfer.reference
            ))),
            Entry::Vacant(v) => {
                let receipt = format!("RCPT-{}", transfer.reference);
                v.insert(receipt.clone());
                Ok(receipt)
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct ReleaseRequest<'a> {
    transaction_id: &'a str,
    account_id: &'a str,
    amount: Amount,
    recipient_name: &'a str,
    account_number: &'a str,
    bank: &'a str,
}

#[derive(Debug, Deserialize)]
struct ReleaseResponse {
    success: bool,
    #[serde(default)]
    receipt: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Ledger reached over HTTP: one signed JSON `POST` per release.
#[derive(Clone)]
pub struct HttpLedger {
    http: reqwest::Client,
    url: String,
    secret: Option<Vec<u8>>,
}

impl HttpLedger {
    pub fn new(url: impl Into<String>, secret: Option<Vec<u8>>) -> Result<Self, ConfirmError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ConfirmError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            url: url.into(),
            secret,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl std::fmt::Debug for HttpLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpLedger")
            .field("url", &self.url)
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl TransferLedger for HttpLedger {
    async fn release(&self, transfer: &PendingTransfer) -> Result<String, ConfirmError> {
        let body = serde_json::to_vec(&ReleaseRequest {
            transaction_id: transfer.reference.as_str(),
            account_id: &transfer.account_id,
            amount: transfer.details.amount,
            recipient_name: &transfer.details.recipient_name,
            account_number: &transfer.details.account_number,
            bank: &transfer.details.bank,
        })?;

        let mut req = self
            .http
            .post(&self.url)
            .header("Content-Type", "application/json");
        if let Some(secret) = &self.secret {
            req = req.header(LEDGER_AUTH_HEADER, sign_body(secret, &body));
        }

        let resp = req
            .body(body)
            .send()
            .await
            .map_err(|e| ConfirmError::Ledger(format!("request failed: {e}")))?;
        let status = resp.status();
        let parsed: ReleaseResponse = resp
            .json()
            .await
            .map_err(|e| ConfirmError::Ledger(format!("unreadable response (status {status}): {e}")))?;

        match (parsed.success, parsed.receipt) {
            (true, Some(receipt)) if !receipt.is_empty() => Ok(receipt),
            (true, _) => Err(ConfirmError::Ledger(
                "ledger accepted release without a receipt".to_string(),
            )),
            (false, _) => Err(ConfirmError::Ledger(
                parsed.error.unwrap_or_else(|| format!("release refused (status {status})")),
            )),
        }
    }
}

/// Ledger chosen at start-up.
#[derive(Debug)]
pub enum ConfiguredLedger {
    Recording(RecordingLedger),
    Http(HttpLedger),
}

impl TransferLedger for ConfiguredLedger {
    async fn release(&self, transfer: &PendingTransfer) -> Result<String, ConfirmError> {
        match self {
            ConfiguredLedger::Recording(l) => l.release(transfer).await,
            ConfiguredLedger::Http(l) => l.release(transfer).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TransferDetails;
    use crate::store::TransferStatus;

    fn transfer(reference: &str) -> PendingTransfer {
        PendingTransfer {
            reference: TransactionReference::parse(reference).unwrap(),
            account_id: "acct-1".to_string(),
            details: TransferDetails {
                amount: Amount::new(5000).unwrap(),
                recipient_name: "Jane Doe".to_string(),
                account_number: "0123456789".to_string(),
                bank: "Acme Bank".to_string(),
            },
            created_at: 0,
            expires_at: 900,
            failed_attempts: 0,
            status: TransferStatus::Committed,
        }
    }

    #[tokio::test]
    async fn test_recording_ledger_releases_once() {
        let ledger = RecordingLedger::new();
        let t = transfer("T1");
        let receipt = ledger.release(&t).await.unwrap();
        assert_eq!(receipt, "RCPT-T1");
        assert_eq!(ledger.receipt(&t.reference).as_deref(), Some("RCPT-T1"));
        assert!(matches!(
            ledger.release(&t).await,
            Err(ConfirmError::Ledger(_))
        ));
        assert_eq!(ledger.release_count(), 1);
    }

    #[tokio::test]
    async fn test_refusing_ledger() {
        let ledger = RecordingLedger::refusing();
        assert!(ledger.release(&transfer("T1")).await.is_err());
        assert_eq!(ledger.release_count(), 0);
    }

    #[tokio::test]
    async fn test_http_ledger_unreachable() {
        let ledger = HttpLedger::new("http://127.0.0.1:1/release", Some(b"k".to_vec())).unwrap();
        assert!(matches!(
            ledger.release(&transfer("T1")).await,
            Err(ConfirmError::Ledger(_))
        ));
    }

    #[test]
    fn test_http_ledger_debug_redacts_secret() {
        let ledger = HttpLedger::new("http://ledger", Some(b"supersecret".to_vec())).unwrap();
        let shown = format!("{ledger:?}");
        assert!(!shown.contains("supersecret"));
        assert!(shown.contains("REDACTED"));
    }
}
