//! Build the shared [`AppState`] from a [`ServerConfig`].

use std::sync::Arc;

use pinconfirm::credential::sign_body;
use pinconfirm::{
    ConfiguredLedger, HttpLedger, PinHasher, PinVerifier, RecordingLedger, SqliteStore,
    VerifierConfig,
};

use crate::config::ServerConfig;
use crate::state::AppState;
use crate::webhook;

/// Errors that stop the server from starting.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("failed to open store at {path}: {source}")]
    Store {
        path: String,
        source: pinconfirm::ConfirmError,
    },

    #[error("invalid ledger configuration: {0}")]
    Ledger(pinconfirm::ConfirmError),

    #[error("invalid webhook configuration: {0}")]
    Webhook(String),
}

/// Derive a purpose-bound key from the upstream secret.
fn derive_key(secret: &[u8], purpose: &[u8]) -> Vec<u8> {
    sign_body(secret, purpose).into_bytes()
}

/// Open the SQLite store, choose the ledger, validate webhook URLs and start
/// the background cleanup.
///
/// Refuses to fall back to an in-memory store when SQLite cannot be opened:
/// attempt counters and commit flags would be lost on restart.
pub fn bootstrap(config: &ServerConfig) -> Result<Arc<AppState>, BootstrapError> {
    let store = SqliteStore::open(&config.db_path).map_err(|source| BootstrapError::Store {
        path: config.db_path.clone(),
        source,
    })?;
    tracing::info!("Transfer store: SQLite at {}", config.db_path);
    if config.db_path == ":memory:" {
        tracing::warn!("DB_PATH is :memory:, pending transfers are lost on restart");
    }

    let ledger = match &config.ledger_url {
        Some(url) => {
            tracing::info!(url = %url, "Ledger: HTTP");
            ConfiguredLedger::Http(
                HttpLedger::new(
                    url.clone(),
                    Some(derive_key(&config.upstream_secret, b"pinconfirm-ledger-hmac")),
                )
                .map_err(BootstrapError::Ledger)?,
            )
        }
        None => {
            tracing::warn!("LEDGER_URL not set, using in-process recording ledger");
            ConfiguredLedger::Recording(RecordingLedger::new())
        }
    };

    let verifier = PinVerifier::new(ledger, PinHasher::new(config.pin_pepper.clone()))
        .with_store(Arc::new(store))
        .with_config(VerifierConfig {
            max_failed_attempts: config.max_failed_attempts,
            transfer_ttl_secs: config.transfer_ttl_secs,
            public_base_url: config.public_base_url.clone(),
        });
    verifier.start_cleanup();

    if !config.webhook_urls.is_empty() {
        tracing::info!("Webhook URLs configured: {}", config.webhook_urls.len());
        webhook::validate_webhook_urls(&config.webhook_urls).map_err(BootstrapError::Webhook)?;
    }

    Ok(Arc::new(AppState {
        verifier,
        upstream_secret: config.upstream_secret.clone(),
        webhook_urls: config.webhook_urls.clone(),
        http_client: webhook::webhook_client(),
        metrics_token: config.metrics_token.clone(),
        webhook_hmac_key: Some(derive_key(
            &config.upstream_secret,
            b"pinconfirm-webhook-hmac",
        )),
    }))
}
