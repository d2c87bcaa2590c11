//! The candidate PIN typed by the user for one attempt.

use std::fmt;

use crate::constants::{MALFORMED_PIN_REASON, PIN_LENGTH};
use crate::error::ConfirmError;

/// A fixed-length numeric PIN held in memory for a single attempt.
///
/// Never serialized on its own, redacted in `Debug`, and wiped on `clear()`
/// and on drop. There is no `Clone`, so each attempt has exactly one copy.
#[derive(Default, PartialEq, Eq)]
pub struct PinCandidate(String);

impl PinCandidate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a candidate from raw keyboard input (see [`apply_input`](Self::apply_input)).
    pub fn from_input(raw: &str) -> Self {
        let mut candidate = Self::new();
        candidate.apply_input(raw);
        candidate
    }

    /// Replace the candidate with the digits of `raw`.
    ///
    /// Non-digit characters are stripped first. Input that would leave more
    /// than [`PIN_LENGTH`] digits is ignored and the previous value is kept,
    /// so an over-long candidate is unreachable. Returns whether the input
    /// was applied.
    pub fn apply_input(&mut self, raw: &str) -> bool {
        let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
        if digits.len() > PIN_LENGTH {
            return false;
        }
        self.wipe();
        self.0 = digits;
        true
    }

    /// Strict parse used on the server side: exactly [`PIN_LENGTH`] ASCII
    /// digits, nothing stripped.
    pub fn parse_exact(raw: &str) -> Result<Self, ConfirmError> {
        if raw.len() != PIN_LENGTH || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ConfirmError::InvalidPin(MALFORMED_PIN_REASON.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn is_complete(&self) -> bool {
        self.0.len() == PIN_LENGTH
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The digits themselves. Call sites are limited to the wire encoder and
    /// the hasher.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn clear(&mut self) {
        self.wipe();
    }

    fn wipe(&mut self) {
        let mut bytes = std::mem::take(&mut self.0).into_bytes();
        bytes.iter_mut().for_each(|b| *b = 0);
        std::hint::black_box(&bytes);
    }
}

impl Drop for PinCandidate {
    fn drop(&mut self) {
        self.wipe();
    }
}

impl fmt::Debug for PinCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PinCandidate({} of {PIN_LENGTH} digits)", self.0.len())
    }
}
