//! Keystore contract.
//!
//! The dispatcher and chain adapters consume wallets exclusively through
//! this trait. Seeds and private keys never cross it: signing requests go
//! in, detached signatures come out. The file-backed implementation lives
//! in the `arca-keystore` crate; [`mock::MockKeystore`] backs test mode.

use async_trait::async_trait;
use serde::Serialize;

use crate::chain::ChainRef;
use crate::error::HostError;
use crate::timestamp::UnixTimestamp;

/// Public description of a wallet. Never contains key material.
#[derive(Debug, Clone, Serialize)]
pub struct WalletInfo {
    /// Stable wallet id.
    pub id: String,
    /// Chain the wallet was derived for.
    pub chain: ChainRef,
    /// Account address.
    pub address: String,
    /// Public key in the chain's customary encoding.
    pub public_key: String,
    /// User-assigned label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// When the wallet was created by this host.
    pub created_at: UnixTimestamp,
    /// When the wallet was imported, if it was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imported_at: Option<UnixTimestamp>,
    /// Whether this is the active wallet for its chain.
    pub active: bool,
}

/// A detached secp256k1 signature with recovery parity.
#[derive(Debug, Clone, Copy)]
pub struct Secp256k1Signature {
    /// 32-byte `r` scalar.
    pub r: [u8; 32],
    /// 32-byte `s` scalar.
    pub s: [u8; 32],
    /// y-parity (0 or 1).
    pub v: u8,
}

/// Wallet storage, derivation, and signing.
#[async_trait]
pub trait Keystore: Send + Sync {
    /// Generates a new wallet for the chain. The mnemonic is written to
    /// encrypted storage and never returned.
    async fn create_wallet(&self, chain: ChainRef, password: &str)
    -> Result<WalletInfo, HostError>;

    /// Imports a wallet from a BIP-39 mnemonic.
    ///
    /// `derivation_path` overrides the chain's default path.
    async fn import_wallet(
        &self,
        chain: ChainRef,
        mnemonic: &str,
        password: &str,
        derivation_path: Option<&str>,
    ) -> Result<WalletInfo, HostError>;

    /// Lists all wallets.
    async fn list_wallets(&self) -> Result<Vec<WalletInfo>, HostError>;

    /// Makes the wallet with this address the active one for its chain.
    async fn switch_active(&self, chain: ChainRef, address: &str) -> Result<(), HostError>;

    /// Sets a wallet's label.
    async fn set_label(&self, address: &str, label: &str) -> Result<(), HostError>;

    /// Deletes a wallet. Requires the current password.
    async fn delete_wallet(&self, address: &str, password: &str) -> Result<(), HostError>;

    /// Unlocks the keystore, decrypting seeds into memory.
    async fn unlock(&self, password: &str) -> Result<(), HostError>;

    /// Locks the keystore, zeroing decrypted material.
    async fn lock(&self);

    /// Whether signing operations are currently possible.
    fn is_unlocked(&self) -> bool;

    /// The active wallet for a chain, if one exists.
    async fn active_wallet(&self, chain: ChainRef) -> Result<Option<WalletInfo>, HostError>;

    /// Signs a 32-byte digest with the address's secp256k1 key.
    async fn sign_secp256k1(
        &self,
        address: &str,
        digest: [u8; 32],
    ) -> Result<Secp256k1Signature, HostError>;

    /// Signs arbitrary bytes with the address's ed25519 key.
    async fn sign_ed25519(&self, address: &str, message: &[u8]) -> Result<[u8; 64], HostError>;
}

pub mod mock {
    //! Deterministic in-memory keystore for tests and test mode.

    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    use async_trait::async_trait;

    use super::{Keystore, Secp256k1Signature, WalletInfo};
    use crate::chain::{ChainFamily, ChainRef};
    use crate::error::HostError;
    use crate::timestamp::UnixTimestamp;

    /// In-memory keystore with fabricated addresses and signatures.
    ///
    /// Exists so the dispatcher and transports can be exercised without
    /// disk or real key derivation. Signatures are deterministic digests of
    /// the input, not cryptographically valid.
    #[derive(Debug, Default)]
    pub struct MockKeystore {
        unlocked: AtomicBool,
        counter: AtomicU64,
        wallets: Mutex<Vec<WalletInfo>>,
        mnemonics: Mutex<HashMap<String, String>>,
    }

    impl MockKeystore {
        /// Creates an empty, locked mock keystore.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Creates an unlocked mock keystore, for tests that skip the
        /// unlock step.
        #[must_use]
        pub fn unlocked() -> Self {
            let ks = Self::default();
            ks.unlocked.store(true, Ordering::Release);
            ks
        }

        fn fabricate_address(&self, chain: ChainRef, seed: u64) -> (String, String) {
            match chain.family() {
                ChainFamily::Evm => {
                    let addr = format!("0x{seed:040x}");
                    let pk = format!("0x{seed:0128x}");
                    (addr, pk)
                }
                ChainFamily::Solana => {
                    let mut bytes = [0u8; 32];
                    bytes[..8].copy_from_slice(&seed.to_be_bytes());
                    let addr = bs58::encode(bytes).into_string();
                    (addr.clone(), addr)
                }
            }
        }

        fn require_unlocked(&self) -> Result<(), HostError> {
            if self.is_unlocked() {
                Ok(())
            } else {
                Err(HostError::WalletLocked)
            }
        }

        fn add_wallet(
            &self,
            chain: ChainRef,
            seed: u64,
            imported: bool,
        ) -> Result<WalletInfo, HostError> {
            let (address, public_key) = self.fabricate_address(chain, seed);
            let mut wallets = self.wallets.lock().expect("mock keystore lock poisoned");
            if wallets
                .iter()
                .any(|w| w.chain == chain && w.address == address)
            {
                return Err(HostError::DuplicateWallet {
                    chain: chain.to_string(),
                    address,
                });
            }
            let active = !wallets.iter().any(|w| w.chain == chain && w.active);
            let info = WalletInfo {
                id: format!("wallet_{seed}"),
                chain,
                address,
                public_key,
                label: None,
                created_at: UnixTimestamp::now(),
                imported_at: imported.then(UnixTimestamp::now),
                active,
            };
            wallets.push(info.clone());
            Ok(info)
        }
    }

    #[async_trait]
    impl Keystore for MockKeystore {
        async fn create_wallet(
            &self,
            chain: ChainRef,
            password: &str,
        ) -> Result<WalletInfo, HostError> {
            if password.len() < 8 {
                return Err(HostError::WeakPassword { min_len: 8 });
            }
            let seed = self.counter.fetch_add(1, Ordering::Relaxed) + 0x1000;
            self.unlocked.store(true, Ordering::Release);
            self.add_wallet(chain, seed, false)
        }

        async fn import_wallet(
            &self,
            chain: ChainRef,
            mnemonic: &str,
            password: &str,
            _derivation_path: Option<&str>,
        ) -> Result<WalletInfo, HostError> {
            let words = mnemonic.split_whitespace().count();
            if words != 12 && words != 24 {
                return Err(HostError::InvalidMnemonic);
            }
            if password.len() < 8 {
                return Err(HostError::WeakPassword { min_len: 8 });
            }
            // Same mnemonic, same fabricated address.
            let seed = mnemonic
                .bytes()
                .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(u64::from(b)));
            self.unlocked.store(true, Ordering::Release);
            let info = self.add_wallet(chain, seed, true)?;
            self.mnemonics
                .lock()
                .expect("mock keystore lock poisoned")
                .insert(info.address.clone(), mnemonic.to_owned());
            Ok(info)
        }

        async fn list_wallets(&self) -> Result<Vec<WalletInfo>, HostError> {
            Ok(self
                .wallets
                .lock()
                .expect("mock keystore lock poisoned")
                .clone())
        }

        async fn switch_active(&self, chain: ChainRef, address: &str) -> Result<(), HostError> {
            let mut wallets = self.wallets.lock().expect("mock keystore lock poisoned");
            if !wallets
                .iter()
                .any(|w| w.chain == chain && w.address == address)
            {
                return Err(HostError::WalletNotFound {
                    address: address.to_owned(),
                });
            }
            for w in wallets.iter_mut().filter(|w| w.chain == chain) {
                w.active = w.address == address;
            }
            Ok(())
        }

        async fn set_label(&self, address: &str, label: &str) -> Result<(), HostError> {
            let mut wallets = self.wallets.lock().expect("mock keystore lock poisoned");
            let wallet = wallets
                .iter_mut()
                .find(|w| w.address == address)
                .ok_or_else(|| HostError::WalletNotFound {
                    address: address.to_owned(),
                })?;
            wallet.label = Some(label.to_owned());
            Ok(())
        }

        async fn delete_wallet(&self, address: &str, _password: &str) -> Result<(), HostError> {
            let mut wallets = self.wallets.lock().expect("mock keystore lock poisoned");
            let before = wallets.len();
            wallets.retain(|w| w.address != address);
            if wallets.len() == before {
                return Err(HostError::WalletNotFound {
                    address: address.to_owned(),
                });
            }
            Ok(())
        }

        async fn unlock(&self, _password: &str) -> Result<(), HostError> {
            self.unlocked.store(true, Ordering::Release);
            Ok(())
        }

        async fn lock(&self) {
            self.unlocked.store(false, Ordering::Release);
        }

        fn is_unlocked(&self) -> bool {
            self.unlocked.load(Ordering::Acquire)
        }

        async fn active_wallet(&self, chain: ChainRef) -> Result<Option<WalletInfo>, HostError> {
            Ok(self
                .wallets
                .lock()
                .expect("mock keystore lock poisoned")
                .iter()
                .find(|w| w.chain == chain && w.active)
                .cloned())
        }

        async fn sign_secp256k1(
            &self,
            address: &str,
            digest: [u8; 32],
        ) -> Result<Secp256k1Signature, HostError> {
            self.require_unlocked()?;
            let _ = address;
            Ok(Secp256k1Signature {
                r: digest,
                s: digest,
                v: 0,
            })
        }

        async fn sign_ed25519(
            &self,
            address: &str,
            message: &[u8],
        ) -> Result<[u8; 64], HostError> {
            self.require_unlocked()?;
            let _ = address;
            let mut out = [0u8; 64];
            for (i, b) in message.iter().take(64).enumerate() {
                out[i] = *b;
            }
            Ok(out)
        }
    }
}
