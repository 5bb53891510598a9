//! Transaction Id Generator
//!
//! Snowflake-style 64-bit ids: 41-bit ms timestamp since a custom epoch,
//! 5-bit datacenter id, 5-bit machine id, 12-bit per-millisecond sequence.
//! One generator instance per process; the internal mutex is the
//! serialization point that makes concurrent draws safe.
//!
//! A backward system clock never yields a possibly-duplicate id. The call
//! fails with `ClockRegression` and the caller must surface it.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::PaymentError;
use crate::types::{
    DATACENTER_BITS, MACHINE_BITS, MAX_DATACENTER_ID, MAX_MACHINE_ID, MAX_SEQUENCE, SEQUENCE_BITS,
    TXN_ID_EPOCH_MS, TxnId,
};

fn current_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

struct GeneratorState {
    sequence: u64,
    last_timestamp: u64,
}

/// Snowflake transaction id generator
///
/// `next_id` draws ids that are unique across all generator instances with
/// distinct (datacenter_id, machine_id) pairs and non-decreasing within one
/// instance.
pub struct TxnIdGenerator {
    datacenter_id: u8,
    machine_id: u8,
    state: Mutex<GeneratorState>,
}

impl TxnIdGenerator {
    /// Create a generator for the given node identity
    ///
    /// Both ids must fit their 5-bit fields (0..=31).
    pub fn new(datacenter_id: u8, machine_id: u8) -> Result<Self, PaymentError> {
        if datacenter_id > MAX_DATACENTER_ID {
            return Err(PaymentError::Config(format!(
                "datacenter id {} out of range 0..={}",
                datacenter_id, MAX_DATACENTER_ID
            )));
        }
        if machine_id > MAX_MACHINE_ID {
            return Err(PaymentError::Config(format!(
                "machine id {} out of range 0..={}",
                machine_id, MAX_MACHINE_ID
            )));
        }

        Ok(Self {
            datacenter_id,
            machine_id,
            state: Mutex::new(GeneratorState {
                sequence: 0,
                last_timestamp: 0,
            }),
        })
    }

    /// Draw the next unique id
    pub fn next_id(&self) -> Result<TxnId, PaymentError> {
        self.next_id_with_clock(current_millis)
    }

    /// Datacenter id this generator stamps into ids
    pub fn datacenter_id(&self) -> u8 {
        self.datacenter_id
    }

    /// Machine id this generator stamps into ids
    pub fn machine_id(&self) -> u8 {
        self.machine_id
    }

    // Clock injected for tests. Holds the lock across the spin so a
    // same-millisecond burst cannot interleave with the wait.
    fn next_id_with_clock<F>(&self, clock: F) -> Result<TxnId, PaymentError>
    where
        F: Fn() -> u64,
    {
        let mut state = self.state.lock().unwrap();

        let mut timestamp = clock();
        if timestamp < state.last_timestamp {
            return Err(PaymentError::ClockRegression);
        }
        // Ids cannot represent times before the custom epoch
        if timestamp < TXN_ID_EPOCH_MS {
            return Err(PaymentError::ClockRegression);
        }

        if timestamp == state.last_timestamp {
            state.sequence = (state.sequence + 1) & MAX_SEQUENCE;
            if state.sequence == 0 {
                // Sequence exhausted for this millisecond - spin to the next
                while timestamp <= state.last_timestamp {
                    timestamp = clock();
                }
            }
        } else {
            state.sequence = 0;
        }
        state.last_timestamp = timestamp;

        let raw = ((timestamp - TXN_ID_EPOCH_MS)
            << (SEQUENCE_BITS + MACHINE_BITS + DATACENTER_BITS))
            | ((self.datacenter_id as u64) << (SEQUENCE_BITS + MACHINE_BITS))
            | ((self.machine_id as u64) << SEQUENCE_BITS)
            | state.sequence;

        Ok(TxnId::new(raw))
    }
}
