//! OKX WebSocket Login Signing
//!
//! The login directive carries an HMAC-SHA256 signature over the current
//! Unix time in seconds, the method `GET` and the path `/users/self/verify`,
//! base64 encoded.
//!
//! # Login Flow
//!
//! 1. Connect to the private endpoint
//! 2. Send `{"op":"login","args":[{"apiKey","passphrase","timestamp","sign"}]}`
//! 3. Receive `{"event":"login","code":"0"}` or `{"event":"error","code":"60009",...}`
//!
//! The venue rejects timestamps more than 30 seconds from its clock, so the
//! signature is computed fresh for every attempt.
//!
//! # References
//!
//! - [Login](https://www.okx.com/docs-v5/en/#overview-websocket-login)

use std::collections::BTreeMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::application::ports::{KeySigner, SignError};

type HmacSha256 = Hmac<Sha256>;

/// Method and path covered by the login signature.
const VERIFY_PREHASH_SUFFIX: &str = "GET/users/self/verify";

/// API credentials for the private and business services.
#[derive(Clone)]
pub struct OkxCredentials {
    api_key: String,
    secret_key: String,
    passphrase: String,
}

impl OkxCredentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(api_key: String, secret_key: String, passphrase: String) -> Self {
        Self {
            api_key,
            secret_key,
            passphrase,
        }
    }

    /// Get the API key.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Sign `timestamp` (Unix seconds) for the login directive.
    ///
    /// # Errors
    ///
    /// Returns `SignError::InvalidKey` if the secret cannot key the MAC.
    pub fn sign(&self, timestamp: &str) -> Result<String, SignError> {
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .map_err(|e| SignError::InvalidKey(e.to_string()))?;
        mac.update(timestamp.as_bytes());
        mac.update(VERIFY_PREHASH_SUFFIX.as_bytes());
        Ok(STANDARD.encode(mac.finalize().into_bytes()))
    }

    /// Build the login argument for a given timestamp.
    ///
    /// # Errors
    ///
    /// Returns `SignError::MissingCredential` when any field is empty.
    pub fn login_args_at(&self, timestamp: &str) -> Result<BTreeMap<String, String>, SignError> {
        if self.api_key.is_empty() {
            return Err(SignError::MissingCredential("api key"));
        }
        if self.secret_key.is_empty() {
            return Err(SignError::MissingCredential("secret key"));
        }
        if self.passphrase.is_empty() {
            return Err(SignError::MissingCredential("passphrase"));
        }

        let sign = self.sign(timestamp)?;
        Ok(BTreeMap::from([
            ("apiKey".to_string(), self.api_key.clone()),
            ("passphrase".to_string(), self.passphrase.clone()),
            ("timestamp".to_string(), timestamp.to_string()),
            ("sign".to_string(), sign),
        ]))
    }
}

impl KeySigner for OkxCredentials {
    fn login_args(&self) -> Result<BTreeMap<String, String>, SignError> {
        let timestamp = chrono::Utc::now().timestamp().to_string();
        self.login_args_at(&timestamp)
    }
}

impl std::fmt::Debug for OkxCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OkxCredentials")
            .field("api_key", &"[REDACTED]")
            .field("secret_key", &"[REDACTED]")
            .field("passphrase", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> OkxCredentials {
        OkxCredentials::new(
            "985d5b66-57ce-40fb-b714-afc0b9787083".to_string(),
            "22582BD0CFF14C41EDBF1AB98506286D".to_string(),
            "123456".to_string(),
        )
    }

    #[test]
    fn signature_matches_known_vector() {
        let sign = credentials().sign("1538054050").unwrap();
        assert_eq!(sign, "+LdIr8lkkvhr5hoA3g9TMC0+uQJ849ftAcocA/ouu4M=");
    }

    #[test]
    fn login_args_carry_all_fields() {
        let args = credentials().login_args_at("1538054050").unwrap();
        let keys: Vec<_> = args.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["apiKey", "passphrase", "sign", "timestamp"]);
        assert_eq!(args["timestamp"], "1538054050");
    }

    #[test]
    fn live_timestamp_is_unix_seconds() {
        let args = credentials().login_args().unwrap();
        let ts: i64 = args["timestamp"].parse().unwrap();
        let now = chrono::Utc::now().timestamp();
        assert!((now - ts).abs() < 5);
    }

    #[test]
    fn missing_passphrase_is_reported() {
        let creds = OkxCredentials::new("k".to_string(), "s".to_string(), String::new());
        let err = creds.login_args().unwrap_err();
        assert!(matches!(err, SignError::MissingCredential("passphrase")));
    }

    #[test]
    fn debug_redacts_secrets() {
        let rendered = format!("{:?}", credentials());
        assert!(!rendered.contains("22582BD0"));
        assert!(!rendered.contains("123456"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
