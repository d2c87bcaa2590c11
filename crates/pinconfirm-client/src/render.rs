//! Plain-text rendering of a [`ConfirmationView`].

use std::fmt::Write as _;

use pinconfirm::{ConfirmationView, Phase, PIN_LENGTH};

/// Render the view as the lines shown to the user. Never includes PIN digits.
pub fn render(view: &ConfirmationView) -> String {
    let mut out = String::new();

    match view.phase {
        Phase::Initializing => out.push_str("Loading transaction details...\n"),
        Phase::Submitting => out.push_str("Verifying PIN...\n"),
        _ => {}
    }

    if let Some(details) = &view.details {
        let _ = writeln!(out, "Confirm transfer");
        let _ = writeln!(out, "  Amount:          {}", details.amount);
        let _ = writeln!(out, "  Recipient:       {}", details.recipient_name);
        let _ = writeln!(out, "  Account number:  {}", details.account_number);
        let _ = writeln!(out, "  Bank:            {}", details.bank);
    }

    if let Some(notice) = &view.notice {
        let prefix = match view.phase {
            Phase::Committed => "",
            Phase::Failed => "Error: ",
            _ => "! ",
        };
        let _ = writeln!(out, "{prefix}{notice}");
    }

    if view.input_enabled {
        let _ = writeln!(
            out,
            "PIN: {}{}",
            "*".repeat(view.candidate_len),
            "_".repeat(PIN_LENGTH.saturating_sub(view.candidate_len))
        );
    }

    out
}
