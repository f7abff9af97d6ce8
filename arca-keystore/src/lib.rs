//! File-backed keystore for the arca wallet host.
//!
//! One encrypted blob per wallet under the data directory, plus an
//! `index.json` with public metadata (chain, address, label, timestamps).
//! Blobs hold the BIP-39 phrase encrypted with ChaCha20-Poly1305 under an
//! Argon2id key (see [`crypto`]). Decrypted phrases live only in memory
//! while the keystore is unlocked and are zeroed on lock.
//!
//! Signing happens inside this crate: callers hand in digests or message
//! bytes and get detached signatures back, per the
//! [`arca::keystore::Keystore`] contract.

/// Blob encryption (Argon2id + ChaCha20-Poly1305).
pub mod crypto;
/// BIP-39 phrases and per-chain derivation.
pub mod mnemonic;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use alloy_signer::SignerSync;
use async_trait::async_trait;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use serde::{Deserialize, Serialize};
use solana_signer::Signer as SolanaSigner;
use zeroize::Zeroizing;

use arca::chain::{ChainFamily, ChainRef};
use arca::error::HostError;
use arca::keystore::{Keystore, Secp256k1Signature, WalletInfo};
use arca::timestamp::UnixTimestamp;

const INDEX_FILE: &str = "index.json";

/// One wallet's public metadata, as persisted in `index.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WalletRecord {
    id: String,
    chain: ChainRef,
    address: String,
    public_key: String,
    label: Option<String>,
    created_at: UnixTimestamp,
    imported_at: Option<UnixTimestamp>,
    active: bool,
    blob_file: String,
    derivation_path: Option<String>,
}

impl WalletRecord {
    fn to_info(&self) -> WalletInfo {
        WalletInfo {
            id: self.id.clone(),
            chain: self.chain,
            address: self.address.clone(),
            public_key: self.public_key.clone(),
            label: self.label.clone(),
            created_at: self.created_at,
            imported_at: self.imported_at,
            active: self.active,
        }
    }
}

/// Decrypted phrases per address, present only while unlocked.
struct UnlockedState {
    phrases: HashMap<String, Zeroizing<String>>,
}

/// File-backed [`Keystore`] implementation.
pub struct FileKeystore {
    data_dir: PathBuf,
    min_password_len: usize,
    index: Mutex<Vec<WalletRecord>>,
    unlocked: Mutex<Option<UnlockedState>>,
}

impl std::fmt::Debug for FileKeystore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileKeystore")
            .field("data_dir", &self.data_dir)
            .finish_non_exhaustive()
    }
}

impl FileKeystore {
    /// Opens (or initializes) a keystore in `data_dir`. Starts locked.
    ///
    /// # Errors
    ///
    /// Fails with [`HostError::Internal`] when the directory cannot be
    /// created or the index cannot be read. A corrupted index is fatal.
    pub fn open(data_dir: PathBuf, min_password_len: usize) -> Result<Self, HostError> {
        std::fs::create_dir_all(&data_dir)
            .map_err(|e| HostError::internal(format!("cannot create data dir: {e}")))?;

        let index_path = data_dir.join(INDEX_FILE);
        let index = if index_path.exists() {
            let content = std::fs::read_to_string(&index_path)
                .map_err(|e| HostError::internal(format!("cannot read wallet index: {e}")))?;
            serde_json::from_str(&content)
                .map_err(|e| HostError::internal(format!("corrupted wallet index: {e}")))?
        } else {
            Vec::new()
        };

        Ok(Self {
            data_dir,
            min_password_len,
            index: Mutex::new(index),
            unlocked: Mutex::new(None),
        })
    }

    fn persist_index(&self, records: &[WalletRecord]) -> Result<(), HostError> {
        let content = serde_json::to_string_pretty(records)
            .map_err(|e| HostError::internal(format!("cannot serialize wallet index: {e}")))?;
        std::fs::write(self.data_dir.join(INDEX_FILE), content)
            .map_err(|e| HostError::internal(format!("cannot write wallet index: {e}")))
    }

    fn check_password_strength(&self, password: &str) -> Result<(), HostError> {
        if password.len() < self.min_password_len {
            return Err(HostError::WeakPassword {
                min_len: self.min_password_len,
            });
        }
        Ok(())
    }

    fn read_blob(&self, record: &WalletRecord) -> Result<crypto::EncryptedBlob, HostError> {
        let content = std::fs::read_to_string(self.data_dir.join(&record.blob_file))
            .map_err(|e| HostError::internal(format!("cannot read wallet blob: {e}")))?;
        serde_json::from_str(&content).map_err(|e| HostError::StorageEncryption {
            message: format!("corrupted wallet blob: {e}"),
        })
    }

    /// Ensures the keystore is unlocked, unlocking with `password` when it
    /// is not. Used by create/import, which already hold the password.
    fn ensure_unlocked_with(&self, password: &str) -> Result<(), HostError> {
        if self.is_unlocked() {
            return Ok(());
        }
        self.unlock_sync(password)
    }

    fn unlock_sync(&self, password: &str) -> Result<(), HostError> {
        let records = self.index.lock().expect("keystore index lock poisoned").clone();
        let mut phrases = HashMap::new();
        for record in &records {
            let blob = self.read_blob(record)?;
            let plaintext = crypto::decrypt(password, &blob)?;
            let phrase = String::from_utf8(plaintext.to_vec())
                .map_err(|_| HostError::StorageEncryption {
                    message: "corrupted wallet blob: not UTF-8".to_owned(),
                })?;
            phrases.insert(record.address.clone(), Zeroizing::new(phrase));
        }
        *self.unlocked.lock().expect("keystore state lock poisoned") =
            Some(UnlockedState { phrases });
        tracing::info!(wallets = records.len(), "keystore unlocked");
        Ok(())
    }

    fn derive_address(
        chain: ChainRef,
        phrase: &str,
        path: Option<&str>,
    ) -> Result<(String, String), HostError> {
        match chain.family() {
            ChainFamily::Evm => {
                let signer = mnemonic::derive_evm(phrase, path)?;
                let address = signer.address().to_string();
                let point = signer.credential().verifying_key().to_encoded_point(false);
                let public_key = format!("0x{}", alloy_primitives::hex::encode(point.as_bytes()));
                Ok((address, public_key))
            }
            ChainFamily::Solana => {
                let keypair = mnemonic::derive_solana(phrase, path)?;
                let address = keypair.pubkey().to_string();
                Ok((address.clone(), address))
            }
        }
    }

    fn add_wallet(
        &self,
        chain: ChainRef,
        phrase: &Zeroizing<String>,
        password: &str,
        derivation_path: Option<&str>,
        imported: bool,
    ) -> Result<WalletInfo, HostError> {
        self.check_password_strength(password)?;
        self.ensure_unlocked_with(password)?;

        let (address, public_key) = Self::derive_address(chain, phrase, derivation_path)?;

        let mut records = self.index.lock().expect("keystore index lock poisoned");
        if records
            .iter()
            .any(|r| r.chain == chain && r.address == address)
        {
            return Err(HostError::DuplicateWallet {
                chain: chain.to_string(),
                address,
            });
        }

        let blob = crypto::encrypt(password, phrase.as_bytes())?;
        let blob_file = format!("{chain}-{address}.json");
        let blob_json = serde_json::to_string_pretty(&blob)
            .map_err(|e| HostError::internal(format!("cannot serialize blob: {e}")))?;
        std::fs::write(self.data_dir.join(&blob_file), blob_json)
            .map_err(|e| HostError::internal(format!("cannot write wallet blob: {e}")))?;

        let now = UnixTimestamp::now();
        let record = WalletRecord {
            id: format!("{chain}:{address}"),
            chain,
            address: address.clone(),
            public_key,
            label: None,
            created_at: now,
            imported_at: imported.then_some(now),
            active: !records.iter().any(|r| r.chain == chain && r.active),
            blob_file,
            derivation_path: derivation_path.map(str::to_owned),
        };
        records.push(record.clone());
        self.persist_index(&records)?;
        drop(records);

        if let Some(state) = self
            .unlocked
            .lock()
            .expect("keystore state lock poisoned")
            .as_mut()
        {
            state
                .phrases
                .insert(address.clone(), Zeroizing::new(phrase.to_string()));
        }

        tracing::info!(chain = %chain, address = %address, imported, "wallet added");
        Ok(record.to_info())
    }

    fn record_for(&self, address: &str) -> Result<WalletRecord, HostError> {
        self.index
            .lock()
            .expect("keystore index lock poisoned")
            .iter()
            .find(|r| r.address == address)
            .cloned()
            .ok_or_else(|| HostError::WalletNotFound {
                address: address.to_owned(),
            })
    }

    fn phrase_for(&self, address: &str) -> Result<Zeroizing<String>, HostError> {
        let state = self.unlocked.lock().expect("keystore state lock poisoned");
        let Some(state) = state.as_ref() else {
            return Err(HostError::WalletLocked);
        };
        state
            .phrases
            .get(address)
            .cloned()
            .ok_or_else(|| HostError::WalletNotFound {
                address: address.to_owned(),
            })
    }
}

#[async_trait]
impl Keystore for FileKeystore {
    async fn create_wallet(
        &self,
        chain: ChainRef,
        password: &str,
    ) -> Result<WalletInfo, HostError> {
        let phrase = mnemonic::generate();
        self.add_wallet(chain, &phrase, password, None, false)
    }

    async fn import_wallet(
        &self,
        chain: ChainRef,
        mnemonic: &str,
        password: &str,
        derivation_path: Option<&str>,
    ) -> Result<WalletInfo, HostError> {
        mnemonic::validate(mnemonic)?;
        let phrase = Zeroizing::new(mnemonic.trim().to_owned());
        self.add_wallet(chain, &phrase, password, derivation_path, true)
    }

    async fn list_wallets(&self) -> Result<Vec<WalletInfo>, HostError> {
        Ok(self
            .index
            .lock()
            .expect("keystore index lock poisoned")
            .iter()
            .map(WalletRecord::to_info)
            .collect())
    }

    async fn switch_active(&self, chain: ChainRef, address: &str) -> Result<(), HostError> {
        let mut records = self.index.lock().expect("keystore index lock poisoned");
        if !records
            .iter()
            .any(|r| r.chain == chain && r.address == address)
        {
            return Err(HostError::WalletNotFound {
                address: address.to_owned(),
            });
        }
        for record in records.iter_mut().filter(|r| r.chain == chain) {
            record.active = record.address == address;
        }
        self.persist_index(&records)
    }

    async fn set_label(&self, address: &str, label: &str) -> Result<(), HostError> {
        let mut records = self.index.lock().expect("keystore index lock poisoned");
        let record = records
            .iter_mut()
            .find(|r| r.address == address)
            .ok_or_else(|| HostError::WalletNotFound {
                address: address.to_owned(),
            })?;
        record.label = Some(label.to_owned());
        self.persist_index(&records)
    }

    async fn delete_wallet(&self, address: &str, password: &str) -> Result<(), HostError> {
        let record = self.record_for(address)?;
        // The current password must authenticate against this wallet's blob
        // before anything is removed.
        let blob = self.read_blob(&record)?;
        crypto::decrypt(password, &blob)?;

        let mut records = self.index.lock().expect("keystore index lock poisoned");
        records.retain(|r| r.address != address);
        self.persist_index(&records)?;
        drop(records);

        let _ = std::fs::remove_file(self.data_dir.join(&record.blob_file));
        if let Some(state) = self
            .unlocked
            .lock()
            .expect("keystore state lock poisoned")
            .as_mut()
        {
            state.phrases.remove(address);
        }
        tracing::info!(address = %address, "wallet deleted");
        Ok(())
    }

    async fn unlock(&self, password: &str) -> Result<(), HostError> {
        self.unlock_sync(password)
    }

    async fn lock(&self) {
        // Dropping UnlockedState zeroes every cached phrase.
        *self.unlocked.lock().expect("keystore state lock poisoned") = None;
        tracing::info!("keystore locked");
    }

    fn is_unlocked(&self) -> bool {
        self.unlocked
            .lock()
            .expect("keystore state lock poisoned")
            .is_some()
    }

    async fn active_wallet(&self, chain: ChainRef) -> Result<Option<WalletInfo>, HostError> {
        Ok(self
            .index
            .lock()
            .expect("keystore index lock poisoned")
            .iter()
            .find(|r| r.chain == chain && r.active)
            .map(WalletRecord::to_info))
    }

    async fn sign_secp256k1(
        &self,
        address: &str,
        digest: [u8; 32],
    ) -> Result<Secp256k1Signature, HostError> {
        let record = self.record_for(address)?;
        if record.chain.family() != ChainFamily::Evm {
            return Err(HostError::invalid_args(format!(
                "{address} is not a secp256k1 wallet"
            )));
        }
        let phrase = self.phrase_for(address)?;
        let signer = mnemonic::derive_evm(&phrase, record.derivation_path.as_deref())?;
        let signature = signer
            .sign_hash_sync(&alloy_primitives::B256::from(digest))
            .map_err(|e| HostError::internal(format!("signing failed: {e}")))?;
        Ok(Secp256k1Signature {
            r: signature.r().to_be_bytes::<32>(),
            s: signature.s().to_be_bytes::<32>(),
            v: u8::from(signature.v()),
        })
    }

    async fn sign_ed25519(&self, address: &str, message: &[u8]) -> Result<[u8; 64], HostError> {
        let record = self.record_for(address)?;
        if record.chain.family() != ChainFamily::Solana {
            return Err(HostError::invalid_args(format!(
                "{address} is not an ed25519 wallet"
            )));
        }
        let phrase = self.phrase_for(address)?;
        let keypair = mnemonic::derive_solana(&phrase, record.derivation_path.as_deref())?;
        let signature = keypair.sign_message(message);
        let bytes: [u8; 64] = signature
            .as_ref()
            .try_into()
            .map_err(|_| HostError::internal("unexpected signature length"))?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PHRASE: &str =
        "test test test test test test test test test test test junk";
    const PASSWORD: &str = "correct horse battery staple";

    fn temp_keystore() -> FileKeystore {
        let dir = std::env::temp_dir().join(format!(
            "arca-keystore-test-{}-{:x}",
            std::process::id(),
            {
                use rand::Rng;
                rand::rng().next_u64()
            }
        ));
        FileKeystore::open(dir, 8).unwrap()
    }

    #[tokio::test]
    async fn test_create_then_sign() {
        let ks = temp_keystore();
        let info = ks.create_wallet(ChainRef::Ethereum, PASSWORD).await.unwrap();
        assert!(info.address.starts_with("0x"));
        assert!(info.active);

        let sig = ks.sign_secp256k1(&info.address, [7u8; 32]).await.unwrap();
        assert!(sig.v <= 1);
    }

    #[tokio::test]
    async fn test_import_is_deterministic() {
        let ks = temp_keystore();
        let info = ks
            .import_wallet(ChainRef::Ethereum, PHRASE, PASSWORD, None)
            .await
            .unwrap();
        assert_eq!(
            info.address.to_ascii_lowercase(),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
        assert!(info.imported_at.is_some());

        let other = temp_keystore();
        let again = other
            .import_wallet(ChainRef::Ethereum, PHRASE, PASSWORD, None)
            .await
            .unwrap();
        assert_eq!(info.address, again.address);
    }

    #[tokio::test]
    async fn test_duplicate_import_rejected() {
        let ks = temp_keystore();
        ks.import_wallet(ChainRef::Bsc, PHRASE, PASSWORD, None)
            .await
            .unwrap();
        let err = ks
            .import_wallet(ChainRef::Bsc, PHRASE, PASSWORD, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "duplicate_wallet");
    }

    #[tokio::test]
    async fn test_weak_password_rejected() {
        let ks = temp_keystore();
        let err = ks
            .create_wallet(ChainRef::Ethereum, "short")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "weak_password");
    }

    #[tokio::test]
    async fn test_invalid_mnemonic_rejected() {
        let ks = temp_keystore();
        let err = ks
            .import_wallet(ChainRef::Ethereum, "not a mnemonic at all", PASSWORD, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_mnemonic");
    }

    #[tokio::test]
    async fn test_lock_blocks_signing() {
        let ks = temp_keystore();
        let info = ks.create_wallet(ChainRef::Ethereum, PASSWORD).await.unwrap();

        ks.lock().await;
        assert!(!ks.is_unlocked());
        let err = ks.sign_secp256k1(&info.address, [0u8; 32]).await.unwrap_err();
        assert_eq!(err.kind(), "wallet_locked");

        ks.unlock(PASSWORD).await.unwrap();
        ks.sign_secp256k1(&info.address, [0u8; 32]).await.unwrap();
    }

    #[tokio::test]
    async fn test_wrong_password_unlock_fails() {
        let ks = temp_keystore();
        ks.create_wallet(ChainRef::Ethereum, PASSWORD).await.unwrap();
        ks.lock().await;
        assert!(ks.unlock("totally wrong password").await.is_err());
        assert!(!ks.is_unlocked());
    }

    #[tokio::test]
    async fn test_delete_requires_password() {
        let ks = temp_keystore();
        let info = ks.create_wallet(ChainRef::Ethereum, PASSWORD).await.unwrap();

        assert!(ks.delete_wallet(&info.address, "wrong password!").await.is_err());
        ks.delete_wallet(&info.address, PASSWORD).await.unwrap();
        assert!(ks.list_wallets().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_solana_wallet_signs_ed25519() {
        let ks = temp_keystore();
        let info = ks
            .import_wallet(ChainRef::Solana, PHRASE, PASSWORD, None)
            .await
            .unwrap();
        let sig = ks.sign_ed25519(&info.address, b"hello").await.unwrap();
        assert_eq!(sig.len(), 64);

        // Same message, same key, same signature (ed25519 is deterministic).
        let again = ks.sign_ed25519(&info.address, b"hello").await.unwrap();
        assert_eq!(sig, again);
    }

    #[tokio::test]
    async fn test_index_survives_reopen() {
        let ks = temp_keystore();
        let dir = ks.data_dir.clone();
        let info = ks.create_wallet(ChainRef::Bsc, PASSWORD).await.unwrap();
        drop(ks);

        let reopened = FileKeystore::open(dir, 8).unwrap();
        assert!(!reopened.is_unlocked());
        let wallets = reopened.list_wallets().await.unwrap();
        assert_eq!(wallets.len(), 1);
        assert_eq!(wallets[0].address, info.address);
    }
}
