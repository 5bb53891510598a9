//! Outcome Ledger
//!
//! Append-only record of every terminal payment attempt, one JSON object
//! per line. Never rewritten. On open, the file is replayed once to build
//! an in-memory index of ids with a successful outcome; the replay guard
//! consults that index instead of scanning the file.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::PaymentError;
use crate::types::{BankId, TxnId};

/// Movement class of a logged attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// Both accounts at the sender's own bank
    Transfer,
    /// Settled across banks via 2PC
    InterbankTransfer,
}

/// Terminal status of a logged attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeStatus {
    Completed,
    Failed,
    Aborted,
}

/// One terminal attempt, as written to the outcome log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub timestamp: DateTime<Utc>,
    pub txn_id: TxnId,
    pub sender: String,
    pub receiver: String,
    pub sender_bank: BankId,
    pub receiver_bank: BankId,
    pub amount: u64,
    pub kind: OutcomeKind,
    pub status: OutcomeStatus,
    pub detail: String,
}

impl OutcomeRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        txn_id: TxnId,
        sender: impl Into<String>,
        receiver: impl Into<String>,
        sender_bank: BankId,
        receiver_bank: BankId,
        amount: u64,
        kind: OutcomeKind,
        status: OutcomeStatus,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            txn_id,
            sender: sender.into(),
            receiver: receiver.into(),
            sender_bank,
            receiver_bank,
            amount,
            kind,
            status,
            detail: detail.into(),
        }
    }
}

/// Append-only outcome log with an in-memory success index
pub struct OutcomeLedger {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
    settled: DashSet<TxnId>,
}

impl OutcomeLedger {
    /// Open (or create) the log and replay it to rebuild the success index
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PaymentError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let settled = DashSet::new();
        let mut entries = 0u64;
        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            for line in reader.lines() {
                let line = line?;
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<OutcomeRecord>(&line) {
                    Ok(record) => {
                        entries += 1;
                        if record.status == OutcomeStatus::Completed {
                            settled.insert(record.txn_id);
                        }
                    }
                    // A torn final line from a crash mid-append is expected;
                    // anything else still only costs us a warning plus a
                    // conservative (absent) index entry.
                    Err(e) => warn!(error = %e, "Skipping unparsable outcome log line"),
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
            settled = settled.len(),
            "Outcome ledger opened"
        );

        Ok(Self {
            path,
            writer: Mutex::new(writer),
            settled,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a terminal record and make it durable before returning
    pub fn append(&self, record: &OutcomeRecord) -> Result<(), PaymentError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        {
            let mut writer = self.writer.lock().unwrap();
            writer.write_all(line.as_bytes())?;
            writer.flush()?;
            writer.get_ref().sync_data()?;
        }

        if record.status == OutcomeStatus::Completed {
            self.settled.insert(record.txn_id);
        }
        Ok(())
    }

    /// Does this id already have a successful terminal outcome?
    pub fn has_settled(&self, id: TxnId) -> bool {
        self.settled.contains(&id)
    }

    /// Number of ids with a successful outcome
    pub fn settled_count(&self) -> usize {
        self.settled.len()
    }
}
