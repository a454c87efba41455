//! Ephemeral escrow keypairs and their encrypted envelopes.
//!
//! Each transfer gets a fresh keypair. The private key lives in memory only
//! for the duration of a leg; what gets persisted is an [`EncryptedEscrow`]
//! sealed with `password + destination`.

use std::fmt;
use std::str::FromStr;

use alloy::primitives::B256;
use alloy::signers::local::PrivateKeySigner;
use bitcoin::secp256k1::{Secp256k1, SecretKey};
use bitcoin::{CompressedPublicKey, Network, NetworkKind, PrivateKey};
use courier_core::types::{CryptoType, Password};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::WalletError;
use crate::worker::CryptoWorker;

/// Envelope format version written by [`EscrowKeyManager::encrypt`].
const ENVELOPE_VERSION: u8 = 1;

/// Key format of an escrow, fixed by the chain family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyScheme {
    /// Raw 32-byte secp256k1 key, hex-encoded.
    Ethereum,
    /// WIF-encoded compressed key controlling a P2SH-P2WPKH address.
    Bitcoin,
}

impl From<&CryptoType> for KeyScheme {
    fn from(crypto: &CryptoType) -> Self {
        match crypto {
            CryptoType::Bitcoin => Self::Bitcoin,
            CryptoType::Ethereum | CryptoType::Erc20(_) => Self::Ethereum,
        }
    }
}

/// Plaintext private key material. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial(String);

impl KeyMaterial {
    /// The plaintext key. Handle with care.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyMaterial([REDACTED])")
    }
}

/// A decrypted escrow account.
#[derive(Debug, Clone)]
pub struct EscrowAccount {
    scheme: KeyScheme,
    address: String,
    key: KeyMaterial,
}

impl EscrowAccount {
    /// Generate a fresh keypair. `network` only matters for Bitcoin.
    pub fn generate(scheme: KeyScheme, network: Network) -> Result<Self, WalletError> {
        let secret = random_secret_key()?;
        match scheme {
            KeyScheme::Ethereum => {
                let bytes = B256::from(secret.secret_bytes());
                let signer = PrivateKeySigner::from_bytes(&bytes)
                    .map_err(|e| WalletError::KeyMaterial(e.to_string()))?;
                Ok(Self {
                    scheme,
                    address: signer.address().to_string(),
                    key: KeyMaterial(format!("0x{}", hex::encode(bytes))),
                })
            }
            KeyScheme::Bitcoin => {
                let private = PrivateKey::new(secret, network);
                Ok(Self {
                    scheme,
                    address: p2sh_p2wpkh_address(&private, network)?.to_string(),
                    key: KeyMaterial(private.to_wif()),
                })
            }
        }
    }

    /// Rebuild an account from plaintext key material, deriving its address.
    pub fn from_key_material(scheme: KeyScheme, material: &str, network: Network) -> Result<Self, WalletError> {
        let address = match scheme {
            KeyScheme::Ethereum => eth_signer_from(material)?.address().to_string(),
            KeyScheme::Bitcoin => {
                let private = btc_key_from(material, network)?;
                p2sh_p2wpkh_address(&private, network)?.to_string()
            }
        };
        Ok(Self {
            scheme,
            address,
            key: KeyMaterial(material.to_string()),
        })
    }

    pub fn scheme(&self) -> KeyScheme {
        self.scheme
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn key_material(&self) -> &KeyMaterial {
        &self.key
    }

    pub fn eth_signer(&self) -> Result<PrivateKeySigner, WalletError> {
        match self.scheme {
            KeyScheme::Ethereum => eth_signer_from(self.key.expose()),
            KeyScheme::Bitcoin => Err(WalletError::KeyMaterial("not an ethereum escrow".into())),
        }
    }

    pub fn btc_private_key(&self, network: Network) -> Result<PrivateKey, WalletError> {
        match self.scheme {
            KeyScheme::Bitcoin => btc_key_from(self.key.expose(), network),
            KeyScheme::Ethereum => Err(WalletError::KeyMaterial("not a bitcoin escrow".into())),
        }
    }
}

fn random_secret_key() -> Result<SecretKey, WalletError> {
    use rand::RngCore;
    let mut bytes = Zeroizing::new([0u8; 32]);
    // Out-of-range scalars are rejected; draw again.
    for _ in 0..8 {
        rand::rngs::OsRng.fill_bytes(&mut bytes[..]);
        if let Ok(secret) = SecretKey::from_slice(&bytes[..]) {
            return Ok(secret);
        }
    }
    Err(WalletError::KeyMaterial("could not draw a valid secp256k1 key".into()))
}

fn eth_signer_from(material: &str) -> Result<PrivateKeySigner, WalletError> {
    let bytes = B256::from_str(material.trim())
        .map_err(|e| WalletError::KeyMaterial(format!("ethereum key: {e}")))?;
    PrivateKeySigner::from_bytes(&bytes).map_err(|e| WalletError::KeyMaterial(e.to_string()))
}

fn btc_key_from(wif: &str, network: Network) -> Result<PrivateKey, WalletError> {
    let private = PrivateKey::from_wif(wif.trim()).map_err(|e| WalletError::KeyMaterial(format!("wif: {e}")))?;
    if private.network != NetworkKind::from(network) {
        return Err(WalletError::KeyMaterial(format!("wif is not for {network}")));
    }
    if !private.compressed {
        return Err(WalletError::KeyMaterial("uncompressed keys cannot spend segwit".into()));
    }
    Ok(private)
}

/// Nested segwit address controlled by `private`.
pub fn p2sh_p2wpkh_address(private: &PrivateKey, network: Network) -> Result<bitcoin::Address, WalletError> {
    let secp = Secp256k1::signing_only();
    let public = CompressedPublicKey::from_private_key(&secp, private)
        .map_err(|e| WalletError::KeyMaterial(e.to_string()))?;
    Ok(bitcoin::Address::p2shwpkh(&public, network))
}

/// The secret an escrow is sealed with: the password followed by the
/// recipient's identifier.
pub fn escrow_secret(password: &Password, destination: &str) -> Password {
    let mut joined = String::with_capacity(password.expose().len() + destination.len());
    joined.push_str(password.expose());
    joined.push_str(destination);
    Password::new(joined)
}

/// Persisted form of an escrow. Serialized as JSON into ledger records
/// and backups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEscrow {
    pub version: u8,
    pub scheme: KeyScheme,
    pub address: String,
    /// Hex of `salt || nonce || ciphertext+tag`.
    pub ciphertext: String,
}

impl EncryptedEscrow {
    pub fn to_json(&self) -> Result<String, WalletError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(s: &str) -> Result<Self, WalletError> {
        let envelope: Self =
            serde_json::from_str(s).map_err(|e| WalletError::CorruptedEnvelope(e.to_string()))?;
        if envelope.version != ENVELOPE_VERSION {
            return Err(WalletError::CorruptedEnvelope(format!(
                "unsupported envelope version {}",
                envelope.version
            )));
        }
        Ok(envelope)
    }
}

/// Generates escrow keypairs and seals/unseals them on the crypto worker.
pub struct EscrowKeyManager {
    worker: CryptoWorker,
    network: Network,
}

impl EscrowKeyManager {
    pub fn new(network: Network) -> Result<Self, WalletError> {
        Ok(Self::with_worker(CryptoWorker::spawn()?, network))
    }

    pub fn with_worker(worker: CryptoWorker, network: Network) -> Self {
        Self { worker, network }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn worker(&self) -> &CryptoWorker {
        &self.worker
    }

    pub fn generate(&self, scheme: KeyScheme) -> Result<EscrowAccount, WalletError> {
        EscrowAccount::generate(scheme, self.network)
    }

    /// Seal the account's key under `secret`, returning the envelope JSON.
    pub async fn encrypt(&self, account: &EscrowAccount, secret: &Password) -> Result<String, WalletError> {
        let plaintext = Zeroizing::new(account.key.expose().as_bytes().to_vec());
        let sealed = self.worker.encrypt(plaintext, secret.clone()).await?;
        EncryptedEscrow {
            version: ENVELOPE_VERSION,
            scheme: account.scheme,
            address: account.address.clone(),
            ciphertext: hex::encode(sealed),
        }
        .to_json()
    }

    /// Open an envelope. A wrong secret yields [`WalletError::DecryptionFailed`].
    pub async fn decrypt(&self, envelope: &str, secret: &Password) -> Result<EscrowAccount, WalletError> {
        let envelope = EncryptedEscrow::from_json(envelope)?;
        let sealed = hex::decode(&envelope.ciphertext)
            .map_err(|e| WalletError::CorruptedEnvelope(format!("ciphertext hex: {e}")))?;
        let plaintext = self.worker.decrypt(sealed, secret.clone()).await?;
        let material = std::str::from_utf8(&plaintext)
            .map_err(|_| WalletError::CorruptedEnvelope("key material is not utf-8".into()))?;
        let account = EscrowAccount::from_key_material(envelope.scheme, material, self.network)?;
        if account.address != envelope.address {
            return Err(WalletError::CorruptedEnvelope(format!(
                "key controls {}, envelope names {}",
                account.address, envelope.address
            )));
        }
        Ok(account)
    }
}
