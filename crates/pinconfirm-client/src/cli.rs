//! Command-line arguments for `pinconfirm-client`.

use clap::Parser;

/// Confirm a pending transfer with your transaction PIN.
///
/// Loads the transfer named by the link, shows its details and asks for the
/// 4-digit PIN until the transfer is committed, refused for good, or stdin
/// closes.
#[derive(Parser, Debug)]
#[command(name = "pinconfirm-client", version, about = "Confirm a pending transfer")]
pub struct ClientCli {
    /// Confirmation link, e.g. `https://pay.example.com/verify-pin?txn_id=TX42`.
    pub link: String,

    /// Full URL of the verification endpoint.
    #[arg(
        long,
        env = "PINCONFIRM_ENDPOINT",
        default_value = "http://localhost:4030/api/verify-pin"
    )]
    pub endpoint: String,

    /// Seconds to keep the success message on screen before exiting.
    #[arg(long, default_value_t = 2)]
    pub teardown_secs: u64,
}
