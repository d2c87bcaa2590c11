//! Terminal front-end for link-scoped PIN confirmation.
//!
//! [`run`] drives a [`ConfirmationSession`] from lines of input: each line is
//! one PIN attempt. The binary wires it to stdin/stdout and an
//! [`HttpTransport`](pinconfirm::HttpTransport).

pub mod cli;
pub mod render;

use std::io::Write;

use pinconfirm::{ConfirmationSession, ConfirmationTransport, Phase};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

pub use render::render;

/// Prompt for PINs on `input` until the session is committed, fails for
/// good, or input ends. Returns the final phase.
///
/// After a commit the success message stays up for the session's teardown
/// delay before returning.
pub async fn run<T, R, W>(
    session: &ConfirmationSession<T>,
    input: R,
    mut output: W,
) -> std::io::Result<Phase>
where
    T: ConfirmationTransport,
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut lines = input.lines();
    write!(output, "{}", render(&session.view()))?;

    while session.view().phase == Phase::Ready {
        write!(output, "Enter PIN: ")?;
        output.flush()?;

        let Some(line) = lines.next_line().await? else {
            writeln!(output)?;
            tracing::info!("input closed before the transfer was confirmed");
            break;
        };

        session.input(line.trim());
        let view = session.submit().await;
        write!(output, "{}", render(&view))?;
    }

    session.wait_for_teardown().await;
    Ok(session.view().phase)
}
