//! Link-scoped PIN confirmation for pending transfers.
//!
//! A user receives a link carrying an opaque transaction reference, reviews
//! the pending transfer and authorizes it with a 4-digit PIN. The server
//! releases the funds at most once per reference.
//!
//! # Two sides
//!
//! - **Client** ([`ConfirmationState`], [`ConfirmationSession`]): a pure state
//!   machine and a driver that runs it against any [`ConfirmationTransport`]
//!   ([`HttpTransport`] over the network)
//! - **Verifier** ([`PinVerifier`]): resolves references, checks PINs with
//!   lockout, claims the reference and releases funds through a
//!   [`TransferLedger`]
//!
//! # Quick example (client)
//!
//! ```no_run
//! use pinconfirm::{ConfirmationSession, HttpTransport};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let transport = HttpTransport::for_base_url("https://pay.example.com").unwrap();
//! let session = ConfirmationSession::start(
//!     transport,
//!     Some("https://pay.example.com/verify-pin?txn_id=TX42"),
//! )
//! .await;
//!
//! session.input("1234");
//! let view = session.submit().await;
//! println!("{:?}", view.phase);
//! # }
//! ```

// Core types
pub mod constants;
pub mod error;
pub mod pin;
pub mod protocol;
pub mod reference;

// Client side
pub mod http_client;
pub mod machine;
pub mod session;
pub mod transport;

// Server side
pub mod credential;
pub mod ledger;
pub mod store;
pub mod verifier;

// Re-exports
pub use constants::*;
pub use credential::PinHasher;
pub use error::ConfirmError;
pub use http_client::HttpTransport;
pub use ledger::{ConfiguredLedger, HttpLedger, RecordingLedger, TransferLedger};
pub use machine::{ConfirmationState, ConfirmationView, Effect, Event, Phase};
pub use pin::PinCandidate;
pub use protocol::{
    Amount, NewTransfer, RegisteredTransfer, ResolveOutcome, SetPinRequest, TransferDetails,
    VerifyOutcome, VerifyRequest, VerifyResponse,
};
pub use reference::TransactionReference;
pub use session::ConfirmationSession;
pub use store::{
    CredentialStore, FailureOutcome, InMemoryStore, PendingTransfer, SqliteStore, TransferStatus,
    TransferStore,
};
pub use transport::ConfirmationTransport;
pub use verifier::{PinVerdict, PinVerifier, VerifierConfig};
