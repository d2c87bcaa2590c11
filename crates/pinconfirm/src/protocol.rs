//! Wire format of the verification endpoint.
//!
//! One endpoint, JSON in both directions, requests discriminated by an
//! `action` field:
//!
//! ```text
//! {"action":"get_transaction","transaction_id":"T1"}
//!   -> {"success":true,"transaction":{"amount":5000,"recipient_name":..,"account_number":..,"bank":..}}
//!   -> {"success":false,"error":"Transaction not found or expired"}
//! {"action":"verify_pin","transaction_id":"T1","pin":"1234"}
//!   -> {"success":true}
//!   -> {"success":false,"error":"Incorrect PIN. 2 attempt(s) remaining."}
//! ```

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::constants::{NOT_FOUND_FALLBACK, VERIFY_FALLBACK};
use crate::error::ConfirmError;

/// Hundredths per currency unit.
const MINOR_PER_UNIT: u64 = 100;

/// Largest minor-unit count an `f64` still represents exactly.
const MAX_EXACT_MINOR: f64 = 9_007_199_254_740_992.0;

/// Positive transfer amount, kept in minor units (hundredths).
///
/// On the wire it is a plain JSON number, whole (`5000`, `5000.0`) or with at
/// most two decimals (`2500.50`). Whole amounts serialize back as integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount {
    minor: u64,
}

impl Amount {
    /// Amount of `units` whole currency units.
    pub fn new(units: u64) -> Result<Self, ConfirmError> {
        let minor = units
            .checked_mul(MINOR_PER_UNIT)
            .ok_or_else(|| ConfirmError::InvalidTransfer("amount out of range".to_string()))?;
        Self::from_minor_units(minor)
    }

    pub fn from_minor_units(minor: u64) -> Result<Self, ConfirmError> {
        if minor == 0 {
            return Err(ConfirmError::InvalidTransfer(
                "amount must be positive".to_string(),
            ));
        }
        Ok(Self { minor })
    }

    pub fn minor_units(&self) -> u64 {
        self.minor
    }

    /// Whole units, with any fraction dropped.
    pub fn units(&self) -> u64 {
        self.minor / MINOR_PER_UNIT
    }

    /// The fractional part in hundredths, `0..100`.
    pub fn cents(&self) -> u64 {
        self.minor % MINOR_PER_UNIT
    }
}

impl TryFrom<&serde_json::Number> for Amount {
    type Error = ConfirmError;

    fn try_from(number: &serde_json::Number) -> Result<Self, Self::Error> {
        if let Some(units) = number.as_u64() {
            return Self::new(units);
        }
        let value = number
            .as_f64()
            .filter(|v| v.is_finite() && *v > 0.0)
            .ok_or_else(|| ConfirmError::InvalidTransfer("amount must be positive".to_string()))?;

        let scaled = value * MINOR_PER_UNIT as f64;
        let minor = scaled.round();
        if (scaled - minor).abs() > 1e-6 {
            return Err(ConfirmError::InvalidTransfer(
                "amount has more than two decimal places".to_string(),
            ));
        }
        if minor > MAX_EXACT_MINOR {
            return Err(ConfirmError::InvalidTransfer("amount out of range".to_string()));
        }
        Self::from_minor_units(minor as u64)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.cents() == 0 {
            serializer.serialize_u64(self.units())
        } else {
            serializer.serialize_f64(self.minor as f64 / MINOR_PER_UNIT as f64)
        }
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let number = serde_json::Number::deserialize(deserializer)?;
        Amount::try_from(&number).map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for Amount {
    /// Units grouped in thousands, cents only when present:
    /// `1234567` -> `1,234,567`, `2500.5` -> `2,500.50`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.units().to_string();
        let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
        for (i, c) in digits.chars().enumerate() {
            if i > 0 && (digits.len() - i) % 3 == 0 {
                grouped.push(',');
            }
            grouped.push(c);
        }
        f.write_str(&grouped)?;
        match self.cents() {
            0 => Ok(()),
            cents => write!(f, ".{cents:02}"),
        }
    }
}

/// Read-only projection of a pending transfer, as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferDetails {
    pub amount: Amount,
    pub recipient_name: String,
    pub account_number: String,
    pub bank: String,
}

/// Request body of the verification endpoint.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum VerifyRequest {
    GetTransaction { transaction_id: String },
    VerifyPin { transaction_id: String, pin: String },
}

impl VerifyRequest {
    pub fn transaction_id(&self) -> &str {
        match self {
            VerifyRequest::GetTransaction { transaction_id }
            | VerifyRequest::VerifyPin { transaction_id, .. } => transaction_id,
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            VerifyRequest::GetTransaction { .. } => "get_transaction",
            VerifyRequest::VerifyPin { .. } => "verify_pin",
        }
    }
}

impl fmt::Debug for VerifyRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifyRequest")
            .field("action", &self.action())
            .field("transaction_id", &self.transaction_id())
            .finish_non_exhaustive()
    }
}

/// Response body of the verification endpoint, for both actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<TransferDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VerifyResponse {
    pub fn resolved(details: TransferDetails) -> Self {
        Self {
            success: true,
            transaction: Some(details),
            error: None,
        }
    }

    pub fn committed() -> Self {
        Self {
            success: true,
            transaction: None,
            error: None,
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            transaction: None,
            error: Some(reason.into()),
        }
    }

    /// Interpret this body as the answer to `get_transaction`.
    pub fn into_resolve_outcome(self) -> Result<ResolveOutcome, ConfirmError> {
        match (self.success, self.transaction) {
            (true, Some(details)) => Ok(ResolveOutcome::Found(details)),
            (true, None) => Err(ConfirmError::Transport(
                "success response without transaction details".to_string(),
            )),
            (false, _) => Ok(ResolveOutcome::NotFound(reason_or(
                self.error,
                NOT_FOUND_FALLBACK,
            ))),
        }
    }

    /// Interpret this body as the answer to `verify_pin`.
    pub fn into_verify_outcome(self) -> VerifyOutcome {
        if self.success {
            VerifyOutcome::Committed
        } else {
            VerifyOutcome::Denied(reason_or(self.error, VERIFY_FALLBACK))
        }
    }
}

fn reason_or(reason: Option<String>, fallback: &str) -> String {
    reason
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

/// Result of resolving a reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    Found(TransferDetails),
    NotFound(String),
}

/// Result of a PIN submission as seen by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    Committed,
    Denied(String),
}

/// Body of the upstream `POST /api/transactions` call registering a pending transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTransfer {
    pub account_id: String,
    pub amount: Amount,
    pub recipient_name: String,
    pub account_number: String,
    pub bank: String,
}

/// Answer to a successful registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredTransfer {
    pub transaction_id: String,
    pub link: String,
    pub expires_at: u64,
}

/// Body of `PUT /api/accounts/{account_id}/pin`.
#[derive(Clone, Deserialize)]
pub struct SetPinRequest {
    pub pin: String,
}

impl fmt::Debug for SetPinRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SetPinRequest { .. }")
    }
}
