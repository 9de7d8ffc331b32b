//! Identity store
//!
//! Owns the signing secrets for every managed node. Everything else in the
//! crank only ever sees the derived address.

use alloy::primitives::hex;
use alloy::signers::{local::PrivateKeySigner, SignerSync};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use tracing::{error, info};

/// Lines at or below this length are never treated as secrets
pub const MIN_SECRET_LEN: usize = 30;

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("No valid private keys found")]
    NoIdentities,
    #[error("Private key not found for {0}")]
    UnknownAddress(String),
    #[error("Signing failed: {0}")]
    Signing(String),
}

/// Address -> signer map, preserving the order secrets were loaded in
pub struct IdentityStore {
    addresses: Vec<String>,
    signers: HashMap<String, PrivateKeySigner>,
}

impl IdentityStore {
    /// Derive identities from newline-delimited secrets.
    ///
    /// Lines that fail to derive are logged (without the secret) and skipped.
    /// Only an empty result is an error.
    pub fn load(raw: &str) -> Result<Self, IdentityError> {
        let mut addresses = Vec::new();
        let mut signers = HashMap::new();

        for (line_no, line) in raw.lines().enumerate() {
            let secret = line.trim();
            if secret.len() <= MIN_SECRET_LEN {
                continue;
            }

            match PrivateKeySigner::from_str(secret.strip_prefix("0x").unwrap_or(secret)) {
                Ok(signer) => {
                    let address = signer.address().to_string();
                    if signers.contains_key(&address) {
                        continue;
                    }
                    addresses.push(address.clone());
                    signers.insert(address, signer);
                }
                Err(e) => {
                    error!("Skipping key on line {}: {}", line_no + 1, e);
                }
            }
        }

        if addresses.is_empty() {
            return Err(IdentityError::NoIdentities);
        }

        Ok(Self { addresses, signers })
    }

    pub fn load_file(path: &Path) -> Result<Self, IdentityError> {
        let raw = std::fs::read_to_string(path).map_err(|source| IdentityError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let store = Self::load(&raw)?;
        info!("Loaded {} identities from {}", store.len(), path.display());
        Ok(store)
    }

    /// Addresses in load order
    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    pub fn contains(&self, address: &str) -> bool {
        self.signers.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// EIP-191 personal-message signature as a `0x` hex string
    pub fn sign(&self, address: &str, message: &str) -> Result<String, IdentityError> {
        let signer = self
            .signers
            .get(address)
            .ok_or_else(|| IdentityError::UnknownAddress(address.to_string()))?;
        let signature = signer
            .sign_message_sync(message.as_bytes())
            .map_err(|e| IdentityError::Signing(e.to_string()))?;
        Ok(hex::encode_prefixed(signature.as_bytes()))
    }
}

impl std::fmt::Debug for IdentityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityStore")
            .field("addresses", &self.addresses)
            .finish_non_exhaustive()
    }
}
