//! Bank Registry
//!
//! Injected capability mapping bank ids to node addresses and an online
//! flag. The coordinator refuses payments toward offline banks, and login
//! is refused while the user's own bank is offline.

use std::collections::BTreeMap;

use dashmap::DashMap;
use tracing::info;

use crate::config::BankSeed;
use crate::types::BankId;

#[derive(Debug, Clone)]
struct BankEntry {
    address: String,
    online: bool,
}

#[derive(Default)]
pub struct BankRegistry {
    banks: DashMap<BankId, BankEntry>,
}

impl BankRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from the config seed table
    pub fn from_config(seed: &BTreeMap<String, BankSeed>) -> Self {
        let registry = Self::new();
        for (id, bank) in seed {
            registry.register(BankId::new(id.clone()), bank.address.clone(), bank.online);
        }
        registry
    }

    pub fn register(&self, id: BankId, address: String, online: bool) {
        info!(bank = %id, address = %address, online, "Bank registered");
        self.banks.insert(id, BankEntry { address, online });
    }

    /// Online flag, or None for an unknown bank
    pub fn is_online(&self, id: &BankId) -> Option<bool> {
        self.banks.get(id).map(|e| e.online)
    }

    /// Flip the online flag; false when the bank is unknown
    pub fn set_online(&self, id: &BankId, online: bool) -> bool {
        match self.banks.get_mut(id) {
            Some(mut entry) => {
                info!(bank = %id, online, "Bank status updated");
                entry.online = online;
                true
            }
            None => false,
        }
    }

    /// Node address, or None for an unknown bank
    pub fn address(&self, id: &BankId) -> Option<String> {
        self.banks.get(id).map(|e| e.address.clone())
    }

    pub fn contains(&self, id: &BankId) -> bool {
        self.banks.contains_key(id)
    }

    pub fn bank_ids(&self) -> Vec<BankId> {
        let mut ids: Vec<BankId> = self.banks.iter().map(|e| e.key().clone()).collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        ids
    }
}
