//! Transaction references and confirmation-link parsing.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::constants::{LINK_PARAM, MAX_REFERENCE_LEN};
use crate::error::ConfirmError;

/// Opaque identifier naming one pending transfer.
///
/// Only ASCII alphanumerics, `-` and `_` are accepted, so a reference can be
/// embedded in a link and a log line without escaping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TransactionReference(String);

impl TransactionReference {
    pub fn parse(raw: &str) -> Result<Self, ConfirmError> {
        if raw.is_empty() {
            return Err(ConfirmError::InvalidReference("empty reference".to_string()));
        }
        if raw.len() > MAX_REFERENCE_LEN {
            return Err(ConfirmError::InvalidReference(format!(
                "reference longer than {MAX_REFERENCE_LEN} characters"
            )));
        }
        if !raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ConfirmError::InvalidReference(
                "reference contains unsupported characters".to_string(),
            ));
        }
        Ok(Self(raw.to_string()))
    }

    /// Extract the reference from a confirmation link.
    ///
    /// Accepts absolute URLs as well as relative forms such as
    /// `/verify-pin?txn_id=...` or a bare `?txn_id=...` query string.
    pub fn from_link(link: &str) -> Result<Self, ConfirmError> {
        let url = match Url::parse(link) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse("http://localhost/")
                .and_then(|base| base.join(link))
                .map_err(|e| ConfirmError::InvalidReference(format!("malformed link: {e}")))?,
            Err(e) => {
                return Err(ConfirmError::InvalidReference(format!(
                    "malformed link: {e}"
                )))
            }
        };

        let value = url
            .query_pairs()
            .find(|(key, _)| key == LINK_PARAM)
            .map(|(_, value)| value.into_owned())
            .ok_or_else(|| {
                ConfirmError::InvalidReference(format!("link has no {LINK_PARAM} parameter"))
            })?;

        Self::parse(&value)
    }

    /// Mint a fresh, unguessable reference (122 random bits).
    pub fn generate() -> Self {
        Self(format!("TX{}", uuid::Uuid::new_v4().simple()).to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TransactionReference {
    type Error = ConfirmError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TransactionReference> for String {
    fn from(reference: TransactionReference) -> Self {
        reference.0
    }
}
