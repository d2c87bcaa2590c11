use pinconfirm::{Amount, PinVerdict};
use serde::Serialize;
use url::Url;

/// Header carrying the HMAC of a webhook body.
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// Notification sent when a PIN attempt settles a transfer for good:
/// `transfer.committed`, `transfer.locked` or `transfer.failed`.
#[derive(Debug, Clone, Serialize)]
pub struct TransferWebhook {
    pub event: String,
    pub transaction_id: String,
    pub account_id: String,
    pub amount: Amount,
    pub recipient_name: String,
    pub bank: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<String>,
    pub failed_attempts: u32,
    pub timestamp: u64,
}

impl TransferWebhook {
    /// Plain denials leave the transfer pending and notify nobody.
    pub fn for_verdict(verdict: &PinVerdict, timestamp: u64) -> Option<Self> {
        let transfer = verdict.settled_transfer()?;
        let receipt = match verdict {
            PinVerdict::Committed { receipt, .. } => Some(receipt.clone()),
            _ => None,
        };
        Some(Self {
            event: format!("transfer.{}", verdict.label()),
            transaction_id: transfer.reference.to_string(),
            account_id: transfer.account_id.clone(),
            amount: transfer.details.amount,
            recipient_name: transfer.details.recipient_name.clone(),
            bank: transfer.details.bank.clone(),
            receipt,
            failed_attempts: transfer.failed_attempts,
            timestamp,
        })
    }
}

/// Reject unparsable webhook URLs and warn on cleartext ones. Called at startup.
pub fn validate_webhook_urls(urls: &[String]) -> Result<(), String> {
    for url in urls {
        let parsed = Url::parse(url).map_err(|e| format!("invalid webhook URL {url}: {e}"))?;
        match parsed.scheme() {
            "https" => {}
            "http" => tracing::warn!(
                url = %url,
                "webhook URL does not use HTTPS, payloads will be sent in cleartext"
            ),
            other => return Err(format!("unsupported webhook scheme {other} in {url}")),
        }
    }
    Ok(())
}

/// HTTP client used for webhook delivery. Redirects are not followed.
pub fn webhook_client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap_or_default()
}

/// Fire-and-forget POST to each webhook URL.
/// If `hmac_secret` is provided, includes an `X-Webhook-Signature` HMAC header.
pub fn fire_webhooks(
    client: &reqwest::Client,
    urls: &[String],
    webhook: TransferWebhook,
    hmac_secret: Option<&[u8]>,
) {
    let body_bytes = match serde_json::to_vec(&webhook) {
        Ok(b) => b,
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize webhook payload");
            return;
        }
    };

    for url in urls {
        let client = client.clone();
        let url = url.clone();
        let body = body_bytes.clone();
        let signature = hmac_secret.map(|secret| pinconfirm::credential::sign_body(secret, &body));

        tokio::spawn(async move {
            let mut req = client
                .post(&url)
                .header("content-type", "application/json")
                .timeout(std::time::Duration::from_secs(5));

            if let Some(ref sig) = signature {
                req = req.header(SIGNATURE_HEADER, sig.as_str());
            }

            match req.body(body).send().await {
                Ok(resp) => {
                    tracing::debug!(url = %url, status = %resp.status(), "webhook delivered")
                }
                Err(e) => tracing::warn!(url = %url, error = %e, "webhook delivery failed"),
            }
        });
    }
}
