//! Transaction Journal
//!
//! Append-only record of every interbank attempt's status walk, one JSON
//! snapshot per line. On open, the file is replayed and the last line per id
//! wins, giving the coordinator (and the recovery worker) the latest state
//! of every transaction it ever touched. Advancing a status appends the new
//! snapshot durably BEFORE the in-memory index changes, so a crash can lose
//! at most an un-acted-on transition.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::PaymentError;
use crate::types::{BankId, TxnId, TxnStatus};

/// One transaction's journaled state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxnRecord {
    pub id: TxnId,
    pub sender: String,
    pub receiver: String,
    pub sender_bank: BankId,
    pub receiver_bank: BankId,
    pub amount: u64,
    pub status: TxnStatus,
    /// 1 for the first attempt, bumped when a FAILED/ABORTED id reopens
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TxnRecord {
    pub fn new(
        id: TxnId,
        sender: impl Into<String>,
        receiver: impl Into<String>,
        sender_bank: BankId,
        receiver_bank: BankId,
        amount: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            sender: sender.into(),
            receiver: receiver.into(),
            sender_bank,
            receiver_bank,
            amount,
            status: TxnStatus::Initiated,
            attempt: 1,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Append-only journal with a latest-state index
pub struct TxnJournal {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
    index: DashMap<TxnId, TxnRecord>,
}

impl TxnJournal {
    /// Open (or create) the journal and replay it; later lines win per id
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PaymentError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let index = DashMap::new();
        let mut entries = 0u64;
        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            for line in reader.lines() {
                let line = line?;
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<TxnRecord>(&line) {
                    Ok(record) => {
                        entries += 1;
                        index.insert(record.id, record);
                    }
                    Err(e) => warn!(error = %e, "Skipping unparsable journal line"),
                }
            }
        }

        // Terminate a torn final line so the next append starts clean
        let needs_newline = if path.exists() {
            use std::io::{Read, Seek, SeekFrom};
            let mut f = File::open(&path)?;
            let len = f.metadata()?.len();
            if len == 0 {
                false
            } else {
                f.seek(SeekFrom::End(-1))?;
                let mut last = [0u8; 1];
                f.read_exact(&mut last)?;
                last[0] != b'\n'
            }
        } else {
            false
        };

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut writer = BufWriter::with_capacity(64 * 1024, file);
        if needs_newline {
            writer.write_all(b"\n")?;
            writer.flush()?;
        }

        info!(
            path = %path.display(),
            entries,
            transactions = index.len(),
            "Transaction journal opened"
        );

        Ok(Self {
            path,
            writer: Mutex::new(writer),
            index,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append_line(&self, record: &TxnRecord) -> Result<(), PaymentError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut writer = self.writer.lock().unwrap();
        writer.write_all(line.as_bytes())?;
        writer.flush()?;
        writer.get_ref().sync_data()?;
        Ok(())
    }

    /// Record a fresh attempt.
    ///
    /// A known id reopens only from ABORTED or FAILED; the reopened record
    /// keeps the original creation time and bumps `attempt`. Ids that are
    /// settling or settled never reopen here, the replay guard answers those.
    pub fn begin(&self, record: TxnRecord) -> Result<TxnRecord, PaymentError> {
        match self.index.entry(record.id) {
            Entry::Occupied(mut entry) => {
                let existing = entry.get();
                match existing.status {
                    TxnStatus::Aborted | TxnStatus::Failed => {
                        let mut reopened = record;
                        reopened.attempt = existing.attempt + 1;
                        reopened.status = TxnStatus::Initiated;
                        reopened.created_at = existing.created_at;
                        reopened.updated_at = Utc::now();

                        self.append_line(&reopened)?;
                        entry.insert(reopened.clone());
                        info!(
                            txn_id = %reopened.id,
                            attempt = reopened.attempt,
                            "Transaction reopened after failed attempt"
                        );
                        Ok(reopened)
                    }
                    TxnStatus::Committed | TxnStatus::Completed => {
                        Err(PaymentError::InvalidState(format!(
                            "transaction {} already {}",
                            existing.id,
                            existing.status.as_str()
                        )))
                    }
                    TxnStatus::Initiated | TxnStatus::Prepared => {
                        Err(PaymentError::InvalidState(format!(
                            "transaction {} already in flight",
                            existing.id
                        )))
                    }
                }
            }
            Entry::Vacant(entry) => {
                self.append_line(&record)?;
                entry.insert(record.clone());
                Ok(record)
            }
        }
    }

    /// Compare-and-advance one status step, durably.
    ///
    /// Fails when the current status is not `from` or the step is not a
    /// legal forward transition. The snapshot hits disk before the index
    /// moves, so an acknowledged COMMITTED can never be lost.
    pub fn advance(
        &self,
        id: TxnId,
        from: TxnStatus,
        to: TxnStatus,
    ) -> Result<TxnRecord, PaymentError> {
        let mut entry = self.index.get_mut(&id).ok_or_else(|| {
            PaymentError::InvalidState(format!("transaction {} not journaled", id))
        })?;

        if entry.status != from {
            return Err(PaymentError::InvalidState(format!(
                "transaction {} is {}, expected {}",
                id,
                entry.status.as_str(),
                from.as_str()
            )));
        }
        if !from.can_advance_to(to) {
            return Err(PaymentError::InvalidState(format!(
                "illegal transition {} -> {} for transaction {}",
                from.as_str(),
                to.as_str(),
                id
            )));
        }

        let mut updated = entry.clone();
        updated.status = to;
        updated.updated_at = Utc::now();
        self.append_line(&updated)?;
        *entry = updated.clone();
        Ok(updated)
    }

    /// Latest journaled state for an id
    pub fn get(&self, id: TxnId) -> Option<TxnRecord> {
        self.index.get(&id).map(|r| r.clone())
    }

    /// Transactions past the point of no return but not yet completed.
    /// The recovery worker re-drives exactly these.
    pub fn in_flight(&self) -> Vec<TxnRecord> {
        self.index
            .iter()
            .filter(|entry| entry.status.is_settling())
            .map(|entry| entry.clone())
            .collect()
    }

    /// Attempts interrupted before the commit decision (INITIATED or
    /// PREPARED). Only meaningful at startup, before new requests arrive;
    /// a live coordinator always drives these to a terminal state itself.
    pub fn stalled(&self) -> Vec<TxnRecord> {
        self.index
            .iter()
            .filter(|entry| !entry.status.is_terminal() && !entry.status.is_settling())
            .map(|entry| entry.clone())
            .collect()
    }

    /// Number of distinct transactions in the journal
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}
