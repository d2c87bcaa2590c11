use std::time::Duration;

use crate::constants::VERIFY_ENDPOINT_PATH;
use crate::error::ConfirmError;
use crate::pin::PinCandidate;
use crate::protocol::{ResolveOutcome, VerifyOutcome, VerifyRequest, VerifyResponse};
use crate::reference::TransactionReference;
use crate::transport::ConfirmationTransport;

/// [`ConfirmationTransport`] over HTTP: one JSON `POST` per action.
///
/// Wraps `reqwest::Client`. Redirects are not followed and every request
/// has a timeout; neither failure is retried.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    /// Transport posting to the full endpoint URL (e.g. `https://host/api/verify-pin`).
    pub fn new(endpoint: impl Into<String>) -> Result<Self, ConfirmError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ConfirmError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_http_client(endpoint, http))
    }

    /// Transport for a server base URL, appending the standard endpoint path.
    pub fn for_base_url(base_url: &str) -> Result<Self, ConfirmError> {
        Self::new(format!(
            "{}{VERIFY_ENDPOINT_PATH}",
            base_url.trim_end_matches('/')
        ))
    }

    /// Create a transport with a custom reqwest::Client.
    pub fn with_http_client(endpoint: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post(&self, request: &VerifyRequest) -> Result<VerifyResponse, ConfirmError> {
        let resp = self
            .http
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| ConfirmError::Transport(format!("request failed: {e}")))?;

        // Refusals may come with any status; the body decides.
        let status = resp.status();
        resp.json::<VerifyResponse>().await.map_err(|e| {
            ConfirmError::Transport(format!("unreadable response (status {status}): {e}"))
        })
    }
}

impl ConfirmationTransport for HttpTransport {
    async fn get_transaction(
        &self,
        reference: &TransactionReference,
    ) -> Result<ResolveOutcome, ConfirmError> {
        let request = VerifyRequest::GetTransaction {
            transaction_id: reference.to_string(),
        };
        self.post(&request).await?.into_resolve_outcome()
    }

    async fn verify_pin(
        &self,
        reference: &TransactionReference,
        pin: &PinCandidate,
    ) -> Result<VerifyOutcome, ConfirmError> {
        let request = VerifyRequest::VerifyPin {
            transaction_id: reference.to_string(),
            pin: pin.expose().to_string(),
        };
        Ok(self.post(&request).await?.into_verify_outcome())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_base_url_appends_endpoint_path() {
        let t = HttpTransport::for_base_url("https://pay.example.com/").unwrap();
        assert_eq!(t.endpoint(), "https://pay.example.com/api/verify-pin");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        let t = HttpTransport::new("http://127.0.0.1:1/api/verify-pin").unwrap();
        let reference = TransactionReference::parse("T1").unwrap();
        let err = t.get_transaction(&reference).await.unwrap_err();
        assert!(matches!(err, ConfirmError::Transport(_)));
    }
}
