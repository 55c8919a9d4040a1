use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;

use crate::error::{AppError, Result};

/// A wallet able to produce EIP-191 `personal_sign` signatures.
#[async_trait]
pub trait WalletSigner: Send + Sync {
    /// Checksummed `0x` address.
    fn address(&self) -> String;

    /// `0x`-prefixed hex signature over `message`.
    async fn sign_message(&self, message: &str) -> Result<String>;
}

/// Normalized form of an address used as the session partition key.
pub fn normalize_account(address: &str) -> String {
    address.trim().to_lowercase()
}

pub struct LocalWallet {
    signer: PrivateKeySigner,
}

impl LocalWallet {
    pub fn from_private_key(private_key_hex: &str) -> Result<Self> {
        let signer = private_key_hex
            .trim()
            .parse::<PrivateKeySigner>()
            .map_err(|e| AppError::Init(format!("Invalid private key: {}", e)))?;

        Ok(Self { signer })
    }

    pub fn random() -> Self {
        Self {
            signer: PrivateKeySigner::random(),
        }
    }
}

#[async_trait]
impl WalletSigner for LocalWallet {
    fn address(&self) -> String {
        self.signer.address().to_checksum(None)
    }

    async fn sign_message(&self, message: &str) -> Result<String> {
        let signature = self
            .signer
            .sign_message_sync(message.as_bytes())
            .map_err(|e| AppError::Signer(e.to_string()))?;

        Ok(format!("0x{}", hex::encode(signature.as_bytes())))
    }
}
