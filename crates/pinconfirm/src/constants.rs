use std::time::Duration;

/// Number of digits in a transaction PIN.
pub const PIN_LENGTH: usize = 4;

/// Query-string parameter carrying the transaction reference in a confirmation link.
pub const LINK_PARAM: &str = "txn_id";

/// Path of the single verification endpoint.
pub const VERIFY_ENDPOINT_PATH: &str = "/api/verify-pin";

/// Path of the confirmation page that links point at.
pub const CONFIRMATION_PAGE_PATH: &str = "/verify-pin";

/// Upper bound on reference length accepted from a link.
pub const MAX_REFERENCE_LEN: usize = 128;

/// Failed PIN attempts allowed per reference before it is cancelled.
pub const DEFAULT_MAX_FAILED_ATTEMPTS: u32 = 3;

/// Lifetime of a pending transfer (15 minutes).
pub const DEFAULT_TRANSFER_TTL_SECS: u64 = 900;

/// Delay between observing `Committed` and tearing the view down.
pub const TEARDOWN_DELAY: Duration = Duration::from_secs(2);

// User-visible texts. Server reasons are shown verbatim; these are the
// client-side messages and the fallbacks used when a server omits its reason.
pub const INVALID_LINK_MESSAGE: &str = "Invalid transaction link";
pub const NOT_FOUND_FALLBACK: &str = "Transaction not found";
pub const RESOLVE_TRANSPORT_MESSAGE: &str = "Failed to load transaction details";
pub const VERIFY_FALLBACK: &str = "PIN verification failed";
pub const SUBMIT_TRANSPORT_MESSAGE: &str = "Network error. Please try again.";
pub const INCOMPLETE_PIN_MESSAGE: &str = "Please enter a 4-digit PIN";
pub const COMMITTED_MESSAGE: &str = "Transfer completed successfully!";

// Server-side denial reasons.
pub const EXPIRED_OR_UNKNOWN_REASON: &str = "Transaction not found or expired";
pub const MALFORMED_PIN_REASON: &str = "PIN must be exactly 4 digits";
pub const LOCKED_REASON: &str = "Transaction cancelled - too many failed attempts";
pub const ALREADY_COMPLETED_REASON: &str = "Transaction already completed";
pub const NO_LONGER_VALID_REASON: &str = "Transaction can no longer be completed";
pub const NO_PIN_REASON: &str = "No PIN set. Please set up your transaction PIN first.";
pub const LEDGER_FAILED_REASON: &str = "Transfer could not be completed";
/// Generic reason returned when the server fails internally.
pub const INTERNAL_ERROR_REASON: &str = "Unable to process request. Please try again.";
