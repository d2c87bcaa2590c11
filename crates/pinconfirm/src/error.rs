use thiserror::Error;

/// Errors returned by confirmation operations.
///
/// An unknown reference, a wrong PIN and a lockout are ordinary answers of
/// the protocol, not errors: see [`ResolveOutcome`](crate::ResolveOutcome),
/// [`VerifyOutcome`](crate::VerifyOutcome) and [`PinVerdict`](crate::PinVerdict).
#[derive(Debug, Error)]
pub enum ConfirmError {
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid pin: {0}")]
    InvalidPin(String),

    #[error("invalid transfer: {0}")]
    InvalidTransfer(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("ledger error: {0}")]
    Ledger(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for ConfirmError {
    fn from(e: rusqlite::Error) -> Self {
        ConfirmError::Store(e.to_string())
    }
}
