//! Authentication
//!
//! Argon2 password credentials stored on the account record, JWT bearer
//! tokens for everything after login. Login is refused while the user's
//! own bank is offline, so a user cannot initiate payments their bank
//! cannot settle.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::PaymentError;
use crate::registry::BankRegistry;
use crate::store::AccountStore;

/// JWT Claims structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String, // Subject (username)
    pub exp: usize,  // Expiration time (as UTC timestamp)
    pub iat: usize,  // Issued at
}

/// Pull the token out of an `Authorization: Bearer ...` header
pub fn bearer_token(headers: &axum::http::HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

pub struct AuthService {
    jwt_secret: String,
    token_ttl_hours: i64,
}

impl AuthService {
    pub fn new(jwt_secret: impl Into<String>, token_ttl_hours: i64) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            token_ttl_hours,
        }
    }

    /// Hash a password for storage on the account record
    pub fn hash_password(password: &str) -> Result<String, PaymentError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| PaymentError::Store(format!("password hashing failed: {}", e)))?;
        Ok(hash.to_string())
    }

    /// Authenticate a user and issue a token
    ///
    /// The same generic failure covers unknown users and bad passwords.
    pub fn login(
        &self,
        store: &dyn AccountStore,
        registry: &BankRegistry,
        username: &str,
        password: &str,
    ) -> Result<String, PaymentError> {
        let account = store.get(username).ok_or_else(|| {
            PaymentError::Authentication("invalid username or password".to_string())
        })?;

        let parsed_hash = PasswordHash::new(account.password_hash())
            .map_err(|e| PaymentError::Store(format!("stored hash unreadable: {}", e)))?;

        Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .map_err(|_| {
                PaymentError::Authentication("invalid username or password".to_string())
            })?;

        // A user whose bank cannot settle must not get a session
        match registry.is_online(account.bank()) {
            Some(true) => {}
            Some(false) => {
                return Err(PaymentError::BankOffline(account.bank().to_string()));
            }
            None => return Err(PaymentError::UnknownBank(account.bank().to_string())),
        }

        let token = self.issue_token(username)?;
        info!(user = username, bank = %account.bank(), "Login succeeded");
        Ok(token)
    }

    /// Issue a signed token for an already-authenticated user
    pub fn issue_token(&self, username: &str) -> Result<String, PaymentError> {
        let now = Utc::now();
        let expiration = now
            .checked_add_signed(Duration::hours(self.token_ttl_hours))
            .ok_or_else(|| PaymentError::Config("token ttl out of range".to_string()))?
            .timestamp();

        let claims = Claims {
            sub: username.to_string(),
            exp: expiration as usize,
            iat: now.timestamp() as usize,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
        .map_err(|e| PaymentError::Store(format!("token signing failed: {}", e)))
    }

    /// Verify a bearer token and recover its claims
    pub fn verify_token(&self, token: &str) -> Result<Claims, PaymentError> {
        let decoding_key = DecodingKey::from_secret(self.jwt_secret.as_bytes());
        let validation = Validation::new(Algorithm::HS256);
        let token_data = decode::<Claims>(token, &decoding_key, &validation)
            .map_err(|_| PaymentError::InvalidToken)?;
        Ok(token_data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Account, MemoryStore};
    use crate::types::BankId;

    fn fixture() -> (MemoryStore, BankRegistry, AuthService) {
        let auth = AuthService::new("test-secret", 1);
        let store = MemoryStore::new();
        let hash = AuthService::hash_password("hunter2").unwrap();
        store
            .upsert(Account::new("alice", BankId::from("BankA"), 10_000, hash))
            .unwrap();

        let registry = BankRegistry::new();
        registry.register(BankId::from("BankA"), "http://127.0.0.1:7101".into(), true);

        (store, registry, auth)
    }

    #[test]
    fn test_login_and_verify() {
        let (store, registry, auth) = fixture();

        let token = auth.login(&store, &registry, "alice", "hunter2").unwrap();
        let claims = auth.verify_token(&token).unwrap();
        assert_eq!(claims.sub, "alice");
    }

    #[test]
    fn test_wrong_password_rejected() {
        let (store, registry, auth) = fixture();
        let result = auth.login(&store, &registry, "alice", "wrong");
        assert!(matches!(result, Err(PaymentError::Authentication(_))));
    }

    #[test]
    fn test_unknown_user_rejected_with_same_error() {
        let (store, registry, auth) = fixture();
        let result = auth.login(&store, &registry, "mallory", "hunter2");
        assert!(matches!(result, Err(PaymentError::Authentication(_))));
    }

    #[test]
    fn test_login_refused_while_home_bank_offline() {
        let (store, registry, auth) = fixture();
        registry.set_online(&BankId::from("BankA"), false);

        let result = auth.login(&store, &registry, "alice", "hunter2");
        assert!(matches!(result, Err(PaymentError::BankOffline(_))));

        registry.set_online(&BankId::from("BankA"), true);
        assert!(auth.login(&store, &registry, "alice", "hunter2").is_ok());
    }

    #[test]
    fn test_tampered_token_rejected() {
        let (_, _, auth) = fixture();
        let token = auth.issue_token("alice").unwrap();

        let mut tampered = token.clone();
        tampered.push('x');
        assert!(matches!(
            auth.verify_token(&tampered),
            Err(PaymentError::InvalidToken)
        ));

        // Token signed with another secret fails too
        let other = AuthService::new("other-secret", 1);
        let foreign = other.issue_token("alice").unwrap();
        assert!(matches!(
            auth.verify_token(&foreign),
            Err(PaymentError::InvalidToken)
        ));
    }

    #[test]
    fn test_expired_token_rejected() {
        // Negative ttl backdates the expiry beyond the default leeway
        let auth = AuthService::new("test-secret", -2);
        let token = auth.issue_token("alice").unwrap();
        assert!(matches!(
            auth.verify_token(&token),
            Err(PaymentError::InvalidToken)
        ));
    }

    #[test]
    fn test_hashes_are_salted() {
        let h1 = AuthService::hash_password("hunter2").unwrap();
        let h2 = AuthService::hash_password("hunter2").unwrap();
        assert_ne!(h1, h2);
    }

    #[test]
    fn test_bearer_token_extraction() {
        let mut headers = axum::http::HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Bearer abc.def.ghi".parse().unwrap(),
        );
        assert_eq!(bearer_token(&headers), Some("abc.def.ghi"));

        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Basic dXNlcjpwYXNz".parse().unwrap(),
        );
        assert_eq!(bearer_token(&headers), None);
    }
}
