//! Account Store
//!
//! Holds accounts for one process (the gateway's own book or a bank node's).
//! ALL balance mutations go through `debit_once` / `credit_once`, which are
//! idempotent per transaction id: the applied-op record is written in the
//! same document as the balance, so a crash can never leave a balance moved
//! without its marker or vice versa.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::PaymentError;
use crate::types::{BankId, TxnId};

/// A customer account held at one bank
///
/// Fields are private; balances change only through the owning store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    owner: String,
    bank: BankId,
    balance: u64,
    password_hash: String,
}

impl Account {
    pub fn new(
        owner: impl Into<String>,
        bank: BankId,
        balance: u64,
        password_hash: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            bank,
            balance,
            password_hash: password_hash.into(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn bank(&self) -> &BankId {
        &self.bank
    }

    pub fn balance(&self) -> u64 {
        self.balance
    }

    pub fn password_hash(&self) -> &str {
        &self.password_hash
    }
}

/// Result of an idempotent balance mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Balance moved in this call
    Applied,
    /// This (id, op) was already applied; balance untouched
    AlreadyApplied,
}

/// Per-process account storage
///
/// `debit_once` and `credit_once` MUST be idempotent per transaction id:
/// a second call with the same id returns `AlreadyApplied` without moving
/// funds.
pub trait AccountStore: Send + Sync {
    /// Look up an account by owner name
    fn get(&self, owner: &str) -> Option<Account>;

    /// Debit `amount` from `owner` exactly once for this transaction id
    fn debit_once(&self, id: TxnId, owner: &str, amount: u64)
    -> Result<ApplyOutcome, PaymentError>;

    /// Credit `amount` to `owner` exactly once for this transaction id
    fn credit_once(
        &self,
        id: TxnId,
        owner: &str,
        amount: u64,
    ) -> Result<ApplyOutcome, PaymentError>;

    /// Create an account (seeding); replaces any existing record
    fn upsert(&self, account: Account) -> Result<(), PaymentError>;

    fn balance_of(&self, owner: &str) -> Option<u64> {
        self.get(owner).map(|a| a.balance())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct StoreData {
    accounts: BTreeMap<String, Account>,
    /// Keys look like "debit:7151395345430904832" / "credit:..."
    applied_ops: BTreeSet<String>,
}

fn applied_key(op: &str, id: TxnId) -> String {
    format!("{}:{}", op, id)
}

impl StoreData {
    // Returns Some(outcome) when settled here; the caller persists on Applied.
    fn apply_debit(
        &mut self,
        id: TxnId,
        owner: &str,
        amount: u64,
    ) -> Result<ApplyOutcome, PaymentError> {
        let key = applied_key("debit", id);
        if self.applied_ops.contains(&key) {
            return Ok(ApplyOutcome::AlreadyApplied);
        }

        let account = self
            .accounts
            .get_mut(owner)
            .ok_or_else(|| PaymentError::UnknownAccount(owner.to_string()))?;

        account.balance = account
            .balance
            .checked_sub(amount)
            .ok_or(PaymentError::InsufficientFunds)?;
        self.applied_ops.insert(key);
        Ok(ApplyOutcome::Applied)
    }

    fn apply_credit(
        &mut self,
        id: TxnId,
        owner: &str,
        amount: u64,
    ) -> Result<ApplyOutcome, PaymentError> {
        let key = applied_key("credit", id);
        if self.applied_ops.contains(&key) {
            return Ok(ApplyOutcome::AlreadyApplied);
        }

        let account = self
            .accounts
            .get_mut(owner)
            .ok_or_else(|| PaymentError::UnknownAccount(owner.to_string()))?;

        account.balance = account
            .balance
            .checked_add(amount)
            .ok_or_else(|| PaymentError::Store("balance overflow on credit".to_string()))?;
        self.applied_ops.insert(key);
        Ok(ApplyOutcome::Applied)
    }

    fn revert_debit(&mut self, id: TxnId, owner: &str, amount: u64) {
        self.applied_ops.remove(&applied_key("debit", id));
        if let Some(account) = self.accounts.get_mut(owner) {
            // Restores the value we just subtracted
            account.balance += amount;
        }
    }

    fn revert_credit(&mut self, id: TxnId, owner: &str, amount: u64) {
        self.applied_ops.remove(&applied_key("credit", id));
        if let Some(account) = self.accounts.get_mut(owner) {
            account.balance -= amount;
        }
    }
}

// =============================================================================
// In-memory store (tests, single-process demos)
// =============================================================================

#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<StoreData>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AccountStore for MemoryStore {
    fn get(&self, owner: &str) -> Option<Account> {
        self.data.lock().unwrap().accounts.get(owner).cloned()
    }

    fn debit_once(
        &self,
        id: TxnId,
        owner: &str,
        amount: u64,
    ) -> Result<ApplyOutcome, PaymentError> {
        self.data.lock().unwrap().apply_debit(id, owner, amount)
    }

    fn credit_once(
        &self,
        id: TxnId,
        owner: &str,
        amount: u64,
    ) -> Result<ApplyOutcome, PaymentError> {
        self.data.lock().unwrap().apply_credit(id, owner, amount)
    }

    fn upsert(&self, account: Account) -> Result<(), PaymentError> {
        self.data
            .lock()
            .unwrap()
            .accounts
            .insert(account.owner().to_string(), account);
        Ok(())
    }
}

// =============================================================================
// File-backed store
// =============================================================================

/// JSON-file account store
///
/// The whole document (accounts + applied ops) is rewritten through a tmp
/// file and renamed into place, so readers only ever see a complete state.
pub struct JsonStore {
    path: PathBuf,
    data: Mutex<StoreData>,
}

impl JsonStore {
    /// Load an existing store, or start empty if the file is absent
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, PaymentError> {
        let path = path.into();
        let data = if path.exists() {
            let bytes = fs::read(&path)?;
            if bytes.is_empty() {
                StoreData::default()
            } else {
                serde_json::from_slice(&bytes)?
            }
        } else {
            StoreData::default()
        };

        info!(
            path = %path.display(),
            accounts = data.accounts.len(),
            "Account store loaded"
        );

        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, data: &StoreData) -> Result<(), PaymentError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let bytes = serde_json::to_vec_pretty(data)?;
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, bytes)?;
        fs::rename(tmp_path, &self.path)?;
        Ok(())
    }
}

impl AccountStore for JsonStore {
    fn get(&self, owner: &str) -> Option<Account> {
        self.data.lock().unwrap().accounts.get(owner).cloned()
    }

    fn debit_once(
        &self,
        id: TxnId,
        owner: &str,
        amount: u64,
    ) -> Result<ApplyOutcome, PaymentError> {
        let mut data = self.data.lock().unwrap();
        let outcome = data.apply_debit(id, owner, amount)?;

        if outcome == ApplyOutcome::Applied
            && let Err(e) = self.persist(&data)
        {
            // Keep memory consistent with disk when the write fails
            data.revert_debit(id, owner, amount);
            return Err(e);
        }
        Ok(outcome)
    }

    fn credit_once(
        &self,
        id: TxnId,
        owner: &str,
        amount: u64,
    ) -> Result<ApplyOutcome, PaymentError> {
        let mut data = self.data.lock().unwrap();
        let outcome = data.apply_credit(id, owner, amount)?;

        if outcome == ApplyOutcome::Applied
            && let Err(e) = self.persist(&data)
        {
            data.revert_credit(id, owner, amount);
            return Err(e);
        }
        Ok(outcome)
    }

    fn upsert(&self, account: Account) -> Result<(), PaymentError> {
        let mut data = self.data.lock().unwrap();
        data.accounts
            .insert(account.owner().to_string(), account);
        self.persist(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acct(owner: &str, bank: &str, balance: u64) -> Account {
        Account::new(owner, BankId::from(bank), balance, "argon2-hash")
    }

    #[test]
    fn test_debit_and_credit() {
        let store = MemoryStore::new();
        store.upsert(acct("alice", "BankA", 10_000)).unwrap();

        let id = TxnId::new(1001);
        assert_eq!(
            store.debit_once(id, "alice", 4_000).unwrap(),
            ApplyOutcome::Applied
        );
        assert_eq!(store.balance_of("alice"), Some(6_000));

        assert_eq!(
            store.credit_once(id, "alice", 500).unwrap(),
            ApplyOutcome::Applied
        );
        assert_eq!(store.balance_of("alice"), Some(6_500));
    }

    #[test]
    fn test_insufficient_funds_leaves_balance() {
        let store = MemoryStore::new();
        store.upsert(acct("bob", "BankB", 5_000)).unwrap();

        let result = store.debit_once(TxnId::new(1), "bob", 10_000);
        assert!(matches!(result, Err(PaymentError::InsufficientFunds)));
        assert_eq!(store.balance_of("bob"), Some(5_000));
    }

    #[test]
    fn test_unknown_account() {
        let store = MemoryStore::new();
        let result = store.debit_once(TxnId::new(1), "ghost", 100);
        assert!(matches!(result, Err(PaymentError::UnknownAccount(_))));
    }

    #[test]
    fn test_debit_is_idempotent_per_id() {
        let store = MemoryStore::new();
        store.upsert(acct("alice", "BankA", 10_000)).unwrap();

        let id = TxnId::new(42);
        assert_eq!(
            store.debit_once(id, "alice", 1_000).unwrap(),
            ApplyOutcome::Applied
        );
        assert_eq!(
            store.debit_once(id, "alice", 1_000).unwrap(),
            ApplyOutcome::AlreadyApplied
        );
        assert_eq!(store.balance_of("alice"), Some(9_000));
    }

    #[test]
    fn test_credit_is_idempotent_per_id() {
        let store = MemoryStore::new();
        store.upsert(acct("bob", "BankB", 1_000)).unwrap();

        let id = TxnId::new(77);
        assert_eq!(
            store.credit_once(id, "bob", 5_000).unwrap(),
            ApplyOutcome::Applied
        );
        assert_eq!(
            store.credit_once(id, "bob", 5_000).unwrap(),
            ApplyOutcome::AlreadyApplied
        );
        assert_eq!(store.balance_of("bob"), Some(6_000));
    }

    #[test]
    fn test_same_id_debit_then_credit_both_apply() {
        // debit and credit are distinct ops for one id (sender and receiver
        // may share a store when both bank at the same node)
        let store = MemoryStore::new();
        store.upsert(acct("alice", "BankA", 10_000)).unwrap();
        store.upsert(acct("bob", "BankA", 1_000)).unwrap();

        let id = TxnId::new(9);
        assert_eq!(
            store.debit_once(id, "alice", 4_000).unwrap(),
            ApplyOutcome::Applied
        );
        assert_eq!(
            store.credit_once(id, "bob", 4_000).unwrap(),
            ApplyOutcome::Applied
        );
        assert_eq!(store.balance_of("alice"), Some(6_000));
        assert_eq!(store.balance_of("bob"), Some(5_000));
    }

    #[test]
    fn test_json_store_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::load(dir.path().join("accounts.json")).unwrap();
        assert!(store.get("anyone").is_none());
    }

    #[test]
    fn test_json_store_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");

        {
            let store = JsonStore::load(&path).unwrap();
            store.upsert(acct("alice", "BankA", 10_000)).unwrap();
            store
                .debit_once(TxnId::new(555), "alice", 2_500)
                .unwrap();
        }

        let reloaded = JsonStore::load(&path).unwrap();
        assert_eq!(reloaded.balance_of("alice"), Some(7_500));
        let account = reloaded.get("alice").unwrap();
        assert_eq!(account.bank().as_str(), "BankA");
        assert_eq!(account.password_hash(), "argon2-hash");
    }

    #[test]
    fn test_double_credit_refused_across_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        let id = TxnId::new(888);

        {
            let store = JsonStore::load(&path).unwrap();
            store.upsert(acct("bob", "BankB", 1_000)).unwrap();
            assert_eq!(
                store.credit_once(id, "bob", 4_000).unwrap(),
                ApplyOutcome::Applied
            );
        }

        // A restarted node must still refuse to re-apply the credit
        let reloaded = JsonStore::load(&path).unwrap();
        assert_eq!(
            reloaded.credit_once(id, "bob", 4_000).unwrap(),
            ApplyOutcome::AlreadyApplied
        );
        assert_eq!(reloaded.balance_of("bob"), Some(5_000));
    }
}
