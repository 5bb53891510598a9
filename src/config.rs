use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub txid: TxnIdConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub client: ClientConfig,
    /// Bank registry seed: bank id -> node address and initial online flag
    #[serde(default)]
    pub banks: BTreeMap<String, BankSeed>,
    /// Accounts created at boot for owners not present in the store yet
    #[serde(default)]
    pub seed_accounts: Vec<SeedAccount>,
    /// Which bank this process settles accounts for (bank node binary)
    #[serde(default)]
    pub bank_node: Option<BankNodeConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "dev-only-secret-change-me".to_string(),
            token_ttl_hours: 1,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TxnIdConfig {
    pub datacenter_id: u8,
    pub machine_id: u8,
}

impl Default for TxnIdConfig {
    fn default() -> Self {
        Self {
            datacenter_id: 0,
            machine_id: 0,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CoordinatorConfig {
    /// Per-call budget for prepare/commit/abort/credit RPCs to bank nodes
    pub rpc_timeout_ms: u64,
    /// How often the recovery worker rescans the journal
    pub recovery_scan_interval_secs: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            rpc_timeout_ms: 5_000,
            recovery_scan_interval_secs: 30,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DataConfig {
    pub dir: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: "./data".to_string(),
        }
    }
}

impl DataConfig {
    pub fn accounts_file(&self) -> String {
        format!("{}/accounts.json", self.dir)
    }

    pub fn bank_accounts_file(&self, bank_id: &str) -> String {
        format!("{}/bank_{}_accounts.json", self.dir, bank_id)
    }

    pub fn outcome_log_file(&self) -> String {
        format!("{}/transactions.log", self.dir)
    }

    pub fn journal_file(&self) -> String {
        format!("{}/txn_journal.log", self.dir)
    }

    pub fn pending_file(&self) -> String {
        format!("{}/pending_payments.json", self.dir)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClientConfig {
    pub gateway_url: String,
    pub retry_interval_secs: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            gateway_url: "http://127.0.0.1:8080".to_string(),
            retry_interval_secs: 60,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BankSeed {
    pub address: String,
    #[serde(default = "default_online")]
    pub online: bool,
}

fn default_online() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SeedAccount {
    pub owner: String,
    pub bank: String,
    /// Opening balance as a decimal string, e.g. "100.00"
    pub balance: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BankNodeConfig {
    pub bank_id: String,
    pub host: String,
    pub port: u16,
}

impl AppConfig {
    pub fn load(env: &str) -> Self {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .unwrap_or_else(|_| panic!("Failed to read config file: {}", config_path));
        serde_yaml::from_str(&content).expect("Failed to parse config yaml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_yaml_fills_defaults() {
        let yaml = r#"
log_level: info
log_dir: logs
log_file: payrail.log
use_json: false
rotation: daily
gateway:
  host: 127.0.0.1
  port: 8080
"#;
        let cfg: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.gateway.port, 8080);
        assert_eq!(cfg.coordinator.rpc_timeout_ms, 5_000);
        assert_eq!(cfg.client.retry_interval_secs, 60);
        assert_eq!(cfg.auth.token_ttl_hours, 1);
        assert!(cfg.banks.is_empty());
        assert!(cfg.bank_node.is_none());
    }

    #[test]
    fn test_bank_seed_defaults_online() {
        let yaml = r#"
log_level: info
log_dir: logs
log_file: payrail.log
use_json: false
rotation: never
gateway:
  host: 127.0.0.1
  port: 8080
banks:
  BankA:
    address: http://127.0.0.1:7101
  BankB:
    address: http://127.0.0.1:7102
    online: false
"#;
        let cfg: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(cfg.banks["BankA"].online);
        assert!(!cfg.banks["BankB"].online);
    }

    #[test]
    fn test_seed_accounts_parse() {
        let yaml = r#"
log_level: info
log_dir: logs
log_file: payrail.log
use_json: false
rotation: daily
gateway:
  host: 127.0.0.1
  port: 8080
seed_accounts:
  - owner: alice
    bank: BankA
    balance: "100.00"
    password: alice-pw
"#;
        let cfg: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.seed_accounts.len(), 1);
        assert_eq!(cfg.seed_accounts[0].owner, "alice");
        assert_eq!(cfg.seed_accounts[0].balance, "100.00");
    }

    #[test]
    fn test_data_file_paths() {
        let data = DataConfig {
            dir: "/tmp/payrail".to_string(),
        };
        assert_eq!(data.accounts_file(), "/tmp/payrail/accounts.json");
        assert_eq!(
            data.bank_accounts_file("BankB"),
            "/tmp/payrail/bank_BankB_accounts.json"
        );
        assert_eq!(data.outcome_log_file(), "/tmp/payrail/transactions.log");
        assert_eq!(data.journal_file(), "/tmp/payrail/txn_journal.log");
        assert_eq!(data.pending_file(), "/tmp/payrail/pending_payments.json");
    }
}
