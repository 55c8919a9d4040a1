//! Sign-In with Ethereum (EIP-4361) messages presented to the wallet at login.

use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt;

pub const SIWE_VERSION: &str = "1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiweMessage {
    pub domain: String,
    pub address: String,
    pub statement: Option<String>,
    pub uri: String,
    pub version: String,
    pub chain_id: u64,
    pub nonce: String,
    pub issued_at: DateTime<Utc>,
    pub expiration_time: Option<DateTime<Utc>>,
}

impl SiweMessage {
    /// Fresh message for `address` with a random nonce, issued now.
    pub fn new(domain: &str, address: &str, statement: Option<&str>, uri: &str, chain_id: u64) -> Self {
        Self {
            domain: domain.to_string(),
            address: address.to_string(),
            statement: statement.filter(|s| !s.trim().is_empty()).map(str::to_string),
            uri: uri.to_string(),
            version: SIWE_VERSION.to_string(),
            chain_id,
            nonce: generate_nonce(),
            issued_at: Utc::now(),
            expiration_time: None,
        }
    }

    pub fn with_expiration(mut self, expiration_time: DateTime<Utc>) -> Self {
        self.expiration_time = Some(expiration_time);
        self
    }
}

impl fmt::Display for SiweMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} wants you to sign in with your Ethereum account:", self.domain)?;
        writeln!(f, "{}", self.address)?;
        writeln!(f)?;
        if let Some(statement) = &self.statement {
            writeln!(f, "{}", statement)?;
            writeln!(f)?;
        }
        writeln!(f, "URI: {}", self.uri)?;
        writeln!(f, "Version: {}", self.version)?;
        writeln!(f, "Chain ID: {}", self.chain_id)?;
        writeln!(f, "Nonce: {}", self.nonce)?;
        write!(
            f,
            "Issued At: {}",
            self.issued_at.to_rfc3339_opts(SecondsFormat::Millis, true)
        )?;
        if let Some(expiration) = &self.expiration_time {
            write!(
                f,
                "\nExpiration Time: {}",
                expiration.to_rfc3339_opts(SecondsFormat::Millis, true)
            )?;
        }
        Ok(())
    }
}

/// Alphanumeric nonce, 32 characters.
pub fn generate_nonce() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
