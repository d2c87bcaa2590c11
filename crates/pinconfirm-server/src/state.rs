use pinconfirm::{ConfiguredLedger, PinVerifier};

/// Shared application state for the confirmation server.
pub struct AppState {
    pub verifier: PinVerifier<ConfiguredLedger>,
    /// HMAC secret authenticating upstream registration and PIN enrolment.
    pub upstream_secret: Vec<u8>,
    pub webhook_urls: Vec<String>,
    pub http_client: reqwest::Client,
    /// Bearer token for /metrics (not the upstream secret).
    pub metrics_token: Option<Vec<u8>>,
    /// Derived key for webhook HMAC signing (domain-separated from the upstream secret).
    pub webhook_hmac_key: Option<Vec<u8>>,
}
