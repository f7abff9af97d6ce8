//! BIP-39 mnemonics and per-chain key derivation.
//!
//! EVM keys follow BIP-32 secp256k1 derivation (default path
//! `m/44'/60'/0'/0/0`) through the alloy mnemonic builder. Solana keys
//! follow SLIP-0010 ed25519 derivation (default path `m/44'/501'/0'/0'`),
//! which only admits hardened steps.

use alloy_signer_local::{MnemonicBuilder, PrivateKeySigner, coins_bip39::English};
use bip39::{Language, Mnemonic, MnemonicType, Seed};
use hmac::{Hmac, Mac};
use sha2::Sha512;
use solana_keypair::{Keypair, keypair_from_seed};
use zeroize::Zeroizing;

use arca::error::HostError;

/// Default EVM derivation path.
pub const EVM_DEFAULT_PATH: &str = "m/44'/60'/0'/0/0";
/// Default Solana derivation path.
pub const SOLANA_DEFAULT_PATH: &str = "m/44'/501'/0'/0'";

/// Generates a fresh 12-word mnemonic.
#[must_use]
pub fn generate() -> Zeroizing<String> {
    let mnemonic = Mnemonic::new(MnemonicType::Words12, Language::English);
    Zeroizing::new(mnemonic.phrase().to_owned())
}

/// Validates a phrase against the BIP-39 word list and checksum.
///
/// # Errors
///
/// Fails with [`HostError::InvalidMnemonic`] for anything that is not a
/// checksummed 12- or 24-word phrase.
pub fn validate(phrase: &str) -> Result<(), HostError> {
    let words = phrase.split_whitespace().count();
    if words != 12 && words != 24 {
        return Err(HostError::InvalidMnemonic);
    }
    Mnemonic::from_phrase(phrase, Language::English).map_err(|_| HostError::InvalidMnemonic)?;
    Ok(())
}

/// Derives an EVM signer from a phrase.
///
/// # Errors
///
/// Fails with [`HostError::InvalidMnemonic`] for invalid phrases and
/// [`HostError::InvalidArgs`] for malformed derivation paths.
pub fn derive_evm(phrase: &str, path: Option<&str>) -> Result<PrivateKeySigner, HostError> {
    validate(phrase)?;
    let path = path.unwrap_or(EVM_DEFAULT_PATH);
    MnemonicBuilder::<English>::default()
        .phrase(phrase)
        .derivation_path(path)
        .map_err(|e| HostError::invalid_args(format!("invalid derivation path {path}: {e}")))?
        .build()
        .map_err(|_| HostError::InvalidMnemonic)
}

/// Derives a Solana keypair from a phrase.
///
/// # Errors
///
/// Fails with [`HostError::InvalidMnemonic`] for invalid phrases and
/// [`HostError::InvalidArgs`] for malformed or non-hardened paths.
pub fn derive_solana(phrase: &str, path: Option<&str>) -> Result<Keypair, HostError> {
    validate(phrase)?;
    let mnemonic =
        Mnemonic::from_phrase(phrase, Language::English).map_err(|_| HostError::InvalidMnemonic)?;
    let seed = Seed::new(&mnemonic, "");
    let indexes = parse_hardened_path(path.unwrap_or(SOLANA_DEFAULT_PATH))?;
    let key = slip10_ed25519(seed.as_bytes(), &indexes);
    keypair_from_seed(key.as_slice()).map_err(|e| HostError::StorageEncryption {
        message: format!("keypair derivation failed: {e}"),
    })
}

/// Parses a derivation path whose steps are all hardened
/// (`m/44'/501'/0'/0'`).
fn parse_hardened_path(path: &str) -> Result<Vec<u32>, HostError> {
    let rest = path
        .strip_prefix("m/")
        .ok_or_else(|| HostError::invalid_args(format!("derivation path must start with m/: {path}")))?;
    rest.split('/')
        .map(|step| {
            let index = step.strip_suffix('\'').ok_or_else(|| {
                HostError::invalid_args(format!(
                    "ed25519 derivation only supports hardened steps: {step}"
                ))
            })?;
            index
                .parse::<u32>()
                .map_err(|_| HostError::invalid_args(format!("invalid path step: {step}")))
        })
        .collect()
}

/// SLIP-0010 ed25519 master key and hardened child derivation.
fn slip10_ed25519(seed: &[u8], indexes: &[u32]) -> Zeroizing<[u8; 32]> {
    type HmacSha512 = Hmac<Sha512>;

    let mut mac =
        HmacSha512::new_from_slice(b"ed25519 seed").expect("HMAC accepts any key length");
    mac.update(seed);
    let digest = mac.finalize().into_bytes();

    let mut key = Zeroizing::new([0u8; 32]);
    let mut chain_code = Zeroizing::new([0u8; 32]);
    key.copy_from_slice(&digest[..32]);
    chain_code.copy_from_slice(&digest[32..]);

    for &index in indexes {
        let hardened = index | 0x8000_0000;
        let mut mac =
            HmacSha512::new_from_slice(chain_code.as_ref()).expect("HMAC accepts any key length");
        mac.update(&[0u8]);
        mac.update(key.as_ref());
        mac.update(&hardened.to_be_bytes());
        let digest = mac.finalize().into_bytes();
        key.copy_from_slice(&digest[..32]);
        chain_code.copy_from_slice(&digest[32..]);
    }

    key
}

#[cfg(test)]
mod tests {
    use super::*;

    // BIP-39 test phrase with a valid checksum.
    const PHRASE: &str =
        "test test test test test test test test test test test junk";

    #[test]
    fn test_generate_validates() {
        let phrase = generate();
        validate(&phrase).unwrap();
        assert_eq!(phrase.split_whitespace().count(), 12);
    }

    #[test]
    fn test_validate_rejects_bad_checksum() {
        let err = validate("test test test test test test test test test test test test")
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_mnemonic");
        assert!(validate("one two three").is_err());
    }

    #[test]
    fn test_evm_derivation_is_deterministic() {
        let a = derive_evm(PHRASE, None).unwrap();
        let b = derive_evm(PHRASE, None).unwrap();
        assert_eq!(a.address(), b.address());
        // Well-known address for this phrase at m/44'/60'/0'/0/0.
        assert_eq!(
            format!("{:#x}", a.address()),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
    }

    #[test]
    fn test_evm_alternate_path_differs() {
        let default = derive_evm(PHRASE, None).unwrap();
        let other = derive_evm(PHRASE, Some("m/44'/60'/0'/0/1")).unwrap();
        assert_ne!(default.address(), other.address());
    }

    #[test]
    fn test_solana_derivation_is_deterministic() {
        use solana_signer::Signer;
        let a = derive_solana(PHRASE, None).unwrap();
        let b = derive_solana(PHRASE, None).unwrap();
        assert_eq!(a.pubkey(), b.pubkey());
    }

    #[test]
    fn test_slip10_master_key_vector() {
        // SLIP-0010 ed25519 test vector 1, chain m/0'.
        let seed: Vec<u8> = (0u8..16).collect();
        let key = slip10_ed25519(&seed, &[0]);
        let hex: String = key.iter().map(|b| format!("{b:02x}")).collect();
        assert_eq!(
            hex,
            "68e0fe46dfb67e368c75379acec591dad19df3cde26e63b93a8e704f1dade7a3"
        );
    }

    #[test]
    fn test_hardened_path_parsing() {
        assert_eq!(parse_hardened_path("m/44'/501'/0'/0'").unwrap(), vec![44, 501, 0, 0]);
        assert!(parse_hardened_path("m/44'/501'/0/0").is_err());
        assert!(parse_hardened_path("44'/501'").is_err());
    }
}
