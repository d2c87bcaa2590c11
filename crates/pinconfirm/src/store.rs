use std::sync::{Mutex, MutexGuard};

use dashmap::DashMap;
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};

use crate::error::ConfirmError;
use crate::protocol::{Amount, TransferDetails};
use crate::reference::TransactionReference;

/// Lifecycle of a pending transfer on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    /// Awaiting a correct PIN.
    Pending,
    /// Claimed for release. Never returns to `Pending`.
    Committed,
    /// Cancelled after too many failed attempts.
    Locked,
    /// The ledger refused or errored after the claim.
    Failed,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Committed => "committed",
            TransferStatus::Locked => "locked",
            TransferStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TransferStatus::Pending),
            "committed" => Some(TransferStatus::Committed),
            "locked" => Some(TransferStatus::Locked),
            "failed" => Some(TransferStatus::Failed),
            _ => None,
        }
    }
}

/// Server-side record of a transfer awaiting PIN confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransfer {
    pub reference: TransactionReference,
    /// Account whose PIN authorizes the transfer.
    pub account_id: String,
    pub details: TransferDetails,
    pub created_at: u64,
    pub expires_at: u64,
    pub failed_attempts: u32,
    pub status: TransferStatus,
}

impl PendingTransfer {
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }
}

/// Result of counting a failed PIN attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Still pending; this many attempts remain.
    Remaining(u32),
    /// The threshold was reached by this attempt; the transfer is now locked.
    Locked,
    /// No pending transfer under that reference.
    Unavailable,
}

/// Storage for pending transfers, their attempt counters and commit flags.
///
/// `record_failure` and `try_claim` must be atomic check-and-set operations:
/// concurrent callers for the same reference must never both succeed in
/// claiming, and must never lose an increment.
pub trait TransferStore: Send + Sync {
    /// Insert a new transfer. Fails if the reference already exists.
    fn insert(&self, transfer: PendingTransfer) -> Result<(), ConfirmError>;

    fn get(&self, reference: &TransactionReference)
        -> Result<Option<PendingTransfer>, ConfirmError>;

    /// Count one failed attempt against a pending transfer, locking it when
    /// `max_attempts` is reached.
    fn record_failure(
        &self,
        reference: &TransactionReference,
        max_attempts: u32,
    ) -> Result<FailureOutcome, ConfirmError>;

    /// Atomically move an unexpired `Pending` transfer to `Committed`.
    /// Returns `true` only for the caller that performed the move.
    fn try_claim(&self, reference: &TransactionReference, now: u64)
        -> Result<bool, ConfirmError>;

    /// Mark a claimed transfer as failed. The claim is not released.
    fn mark_failed(&self, reference: &TransactionReference) -> Result<(), ConfirmError>;

    /// Delete records that expired more than `retention_secs` before `now`.
    /// Returns the number deleted.
    fn purge_expired(&self, now: u64, retention_secs: u64) -> Result<usize, ConfirmError>;
}

/// Storage for per-account PIN hashes.
pub trait CredentialStore: Send + Sync {
    fn pin_hash(&self, account_id: &str) -> Result<Option<String>, ConfirmError>;

    fn set_pin_hash(&self, account_id: &str, pin_hash: String) -> Result<(), ConfirmError>;
}

/// Current unix time in seconds.
///
/// On clock error returns 0, which makes every pending transfer look
/// unexpired but also prevents any purge from deleting live records.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_else(|_| {
            tracing::error!("system clock before UNIX epoch");
            0
        })
}

/// In-memory store backed by DashMap. Fast but lost on restart.
#[derive(Default)]
pub struct InMemoryStore {
    transfers: DashMap<TransactionReference, PendingTransfer>,
    credentials: DashMap<String, String>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransferStore for InMemoryStore {
    fn insert(&self, transfer: PendingTransfer) -> Result<(), ConfirmError> {
        use dashmap::mapref::entry::Entry;
        match self.transfers.entry(transfer.reference.clone()) {
            Entry::Occupied(_) => Err(ConfirmError::Store(format!(
                "reference {} already exists",
                transfer.reference
            ))),
            Entry::Vacant(v) => {
                v.insert(transfer);
                Ok(())
            }
        }
    }

    fn get(
        &self,
        reference: &TransactionReference,
    ) -> Result<Option<PendingTransfer>, ConfirmError> {
        Ok(self.transfers.get(reference).map(|t| t.clone()))
    }

    fn record_failure(
        &self,
        reference: &TransactionReference,
        max_attempts: u32,
    ) -> Result<FailureOutcome, ConfirmError> {
        // get_mut holds the shard write lock for the whole update
        let Some(mut transfer) = self.transfers.get_mut(reference) else {
            return Ok(FailureOutcome::Unavailable);
        };
        if transfer.status != TransferStatus::Pending {
            return Ok(FailureOutcome::Unavailable);
        }
        transfer.failed_attempts = transfer.failed_attempts.saturating_add(1);
        if transfer.failed_attempts >= max_attempts {
            transfer.status = TransferStatus::Locked;
            Ok(FailureOutcome::Locked)
        } else {
            Ok(FailureOutcome::Remaining(
                max_attempts - transfer.failed_attempts,
            ))
        }
    }

    fn try_claim(&self, reference: &TransactionReference, now: u64) -> Result<bool, ConfirmError> {
        let Some(mut transfer) = self.transfers.get_mut(reference) else {
            return Ok(false);
        };
        if transfer.status != TransferStatus::Pending || transfer.is_expired(now) {
            return Ok(false);
        }
        transfer.status = TransferStatus::Committed;
        Ok(true)
    }

    fn mark_failed(&self, reference: &TransactionReference) -> Result<(), ConfirmError> {
        if let Some(mut transfer) = self.transfers.get_mut(reference) {
            transfer.status = TransferStatus::Failed;
        }
        Ok(())
    }

    fn purge_expired(&self, now: u64, retention_secs: u64) -> Result<usize, ConfirmError> {
        let before = self.transfers.len();
        self.transfers
            .retain(|_, t| t.expires_at.saturating_add(retention_secs) >= now);
        Ok(before - self.transfers.len())
    }
}

impl CredentialStore for InMemoryStore {
    fn pin_hash(&self, account_id: &str) -> Result<Option<String>, ConfirmError> {
        Ok(self.credentials.get(account_id).map(|h| h.clone()))
    }

    fn set_pin_hash(&self, account_id: &str, pin_hash: String) -> Result<(), ConfirmError> {
        self.credentials.insert(account_id.to_string(), pin_hash);
        Ok(())
    }
}

/// Persistent store backed by SQLite. Survives restarts.
///
/// Attempt counting and claiming are single `UPDATE ... WHERE status =
/// 'pending'` statements, so they stay atomic across processes sharing the
/// database file.
pub struct SqliteStore {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`. `:memory:` is accepted.
    ///
    /// On Unix the file is restricted to 0600, since it holds PIN hashes.
    pub fn open(path: &str) -> Result<Self, ConfirmError> {
        let conn = rusqlite::Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS pending_transfers (
                reference TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                amount_minor INTEGER NOT NULL,
                recipient_name TEXT NOT NULL,
                account_number TEXT NOT NULL,
                bank TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                failed_attempts INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'pending'
            );
            CREATE INDEX IF NOT EXISTS idx_transfers_expires_at ON pending_transfers(expires_at);
            CREATE TABLE IF NOT EXISTS pin_credentials (
                account_id TEXT PRIMARY KEY,
                pin_hash TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            PRAGMA journal_mode=WAL;",
        )?;

        #[cfg(unix)]
        if path != ":memory:" {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            {
                tracing::warn!(
                    path = %path,
                    error = %e,
                    "failed to set store file permissions to 0600"
                );
            }
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, rusqlite::Connection> {
        match self.conn.lock() {
            Ok(c) => c,
            Err(poisoned) => {
                tracing::error!("store mutex poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

fn to_sql_int(value: u64, field: &str) -> Result<i64, ConfirmError> {
    i64::try_from(value).map_err(|_| ConfirmError::Store(format!("{field} out of range")))
}

fn from_sql_int(value: i64, field: &str) -> Result<u64, ConfirmError> {
    u64::try_from(value).map_err(|_| ConfirmError::Store(format!("negative {field} in store")))
}

struct TransferRow {
    reference: String,
    account_id: String,
    amount_minor: i64,
    recipient_name: String,
    account_number: String,
    bank: String,
    created_at: i64,
    expires_at: i64,
    failed_attempts: i64,
    status: String,
}

impl TransferRow {
    fn into_transfer(self) -> Result<PendingTransfer, ConfirmError> {
        Ok(PendingTransfer {
            reference: TransactionReference::parse(&self.reference)?,
            account_id: self.account_id,
            details: TransferDetails {
                amount: Amount::from_minor_units(from_sql_int(self.amount_minor, "amount_minor")?)?,
                recipient_name: self.recipient_name,
                account_number: self.account_number,
                bank: self.bank,
            },
            created_at: from_sql_int(self.created_at, "created_at")?,
            expires_at: from_sql_int(self.expires_at, "expires_at")?,
            failed_attempts: u32::try_from(self.failed_attempts)
                .map_err(|_| ConfirmError::Store("failed_attempts out of range".to_string()))?,
            status: TransferStatus::parse(&self.status)
                .ok_or_else(|| ConfirmError::Store(format!("unknown status {}", self.status)))?,
        })
    }
}

impl TransferStore for SqliteStore {
    fn insert(&self, transfer: PendingTransfer) -> Result<(), ConfirmError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO pending_transfers (reference, account_id, amount_minor, recipient_name,
                account_number, bank, created_at, expires_at, failed_attempts, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            rusqlite::params![
                transfer.reference.as_str(),
                transfer.account_id,
                to_sql_int(transfer.details.amount.minor_units(), "amount_minor")?,
                transfer.details.recipient_name,
                transfer.details.account_number,
                transfer.details.bank,
                to_sql_int(transfer.created_at, "created_at")?,
                to_sql_int(transfer.expires_at, "expires_at")?,
                i64::from(transfer.failed_attempts),
                transfer.status.as_str(),
            ],
        )?;
        Ok(())
    }

    fn get(
        &self,
        reference: &TransactionReference,
    ) -> Result<Option<PendingTransfer>, ConfirmError> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT reference, account_id, amount_minor, recipient_name, account_number, bank,
                        created_at, expires_at, failed_attempts, status
                 FROM pending_transfers WHERE reference = ?1",
                [reference.as_str()],
                |row| {
                    Ok(TransferRow {
                        reference: row.get(0)?,
                        account_id: row.get(1)?,
                        amount_minor: row.get(2)?,
                        recipient_name: row.get(3)?,
                        account_number: row.get(4)?,
                        bank: row.get(5)?,
                        created_at: row.get(6)?,
                        expires_at: row.get(7)?,
                        failed_attempts: row.get(8)?,
                        status: row.get(9)?,
                    })
                },
            )
            .optional()?;
        row.map(TransferRow::into_transfer).transpose()
    }

    fn record_failure(
        &self,
        reference: &TransactionReference,
        max_attempts: u32,
    ) -> Result<FailureOutcome, ConfirmError> {
        let conn = self.conn();
        let updated: Option<(i64, String)> = conn
            .query_row(
                "UPDATE pending_transfers
                 SET failed_attempts = failed_attempts + 1,
                     status = CASE WHEN failed_attempts + 1 >= ?2 THEN 'locked' ELSE status END
                 WHERE reference = ?1 AND status = 'pending'
                 RETURNING failed_attempts, status",
                rusqlite::params![reference.as_str(), i64::from(max_attempts)],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        Ok(match updated {
            None => FailureOutcome::Unavailable,
            Some((_, status)) if status == TransferStatus::Locked.as_str() => FailureOutcome::Locked,
            Some((attempts, _)) => {
                let attempts = u32::try_from(attempts).unwrap_or(max_attempts);
                FailureOutcome::Remaining(max_attempts.saturating_sub(attempts))
            }
        })
    }

    fn try_claim(&self, reference: &TransactionReference, now: u64) -> Result<bool, ConfirmError> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE pending_transfers SET status = 'committed'
             WHERE reference = ?1 AND status = 'pending' AND expires_at > ?2",
            rusqlite::params![reference.as_str(), to_sql_int(now, "now")?],
        )?;
        Ok(changed == 1)
    }

    fn mark_failed(&self, reference: &TransactionReference) -> Result<(), ConfirmError> {
        let conn = self.conn();
        conn.execute(
            "UPDATE pending_transfers SET status = 'failed' WHERE reference = ?1",
            [reference.as_str()],
        )?;
        Ok(())
    }

    fn purge_expired(&self, now: u64, retention_secs: u64) -> Result<usize, ConfirmError> {
        let cutoff = to_sql_int(now.saturating_sub(retention_secs), "cutoff")?;
        let conn = self.conn();
        Ok(conn.execute(
            "DELETE FROM pending_transfers WHERE expires_at < ?1",
            rusqlite::params![cutoff],
        )?)
    }
}

impl CredentialStore for SqliteStore {
    fn pin_hash(&self, account_id: &str) -> Result<Option<String>, ConfirmError> {
        let conn = self.conn();
        Ok(conn
            .query_row(
                "SELECT pin_hash FROM pin_credentials WHERE account_id = ?1",
                [account_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn set_pin_hash(&self, account_id: &str, pin_hash: String) -> Result<(), ConfirmError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO pin_credentials (account_id, pin_hash, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(account_id) DO UPDATE SET pin_hash = excluded.pin_hash,
                                                   updated_at = excluded.updated_at",
            rusqlite::params![account_id, pin_hash, to_sql_int(unix_now(), "updated_at")?],
        )?;
        Ok(())
    }
}
