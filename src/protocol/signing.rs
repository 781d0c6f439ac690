//! Signing and signer recovery for data packages
//!
//! The hash function and curve are a [`SignatureScheme`] value passed into
//! every routine, so a new chain target is a new scheme constant rather than a
//! change to these functions.

use ethers::core::k256::ecdsa::SigningKey;
use ethers::signers::Wallet;
use ethers::types::{Address, Signature, H256};
use ethers::utils::{hash_message, keccak256};

use crate::error::{OracleError, Result};
use crate::protocol::codec::encode_data_package;
use crate::types::{DataPackage, SignedDataPackage};

/// Hash/sign/recover strategy bound to one chain's conventions
#[derive(Debug, Clone, Copy)]
pub struct SignatureScheme {
    pub name: &'static str,
    pub hash: fn(&[u8]) -> H256,
    pub sign: fn(H256, &SigningKey) -> Result<Vec<u8>>,
    pub recover: fn(H256, &[u8]) -> Result<Address>,
}

impl SignatureScheme {
    /// keccak256 digest signed directly with secp256k1, v in {27, 28}.
    pub const EVM: SignatureScheme = SignatureScheme {
        name: "evm-secp256k1",
        hash: keccak_digest,
        sign: sign_secp256k1,
        recover: recover_secp256k1,
    };

    /// EIP-191 `personal_sign` digest, for signers that only expose that API.
    pub const EVM_PERSONAL_SIGN: SignatureScheme = SignatureScheme {
        name: "evm-personal-sign",
        hash: personal_sign_digest,
        sign: sign_secp256k1,
        recover: recover_secp256k1,
    };

    pub fn digest(&self, bytes: &[u8]) -> H256 {
        (self.hash)(bytes)
    }
}

impl Default for SignatureScheme {
    fn default() -> Self {
        Self::EVM
    }
}

fn keccak_digest(bytes: &[u8]) -> H256 {
    H256::from(keccak256(bytes))
}

fn personal_sign_digest(bytes: &[u8]) -> H256 {
    hash_message(bytes)
}

fn sign_secp256k1(digest: H256, key: &SigningKey) -> Result<Vec<u8>> {
    let wallet = Wallet::from(key.clone());
    let signature = wallet
        .sign_hash(digest)
        .map_err(|e| OracleError::Signature(e.to_string()))?;
    Ok(signature.to_vec())
}

fn recover_secp256k1(digest: H256, signature: &[u8]) -> Result<Address> {
    let signature = Signature::try_from(signature)
        .map_err(|e| OracleError::Signature(format!("malformed signature: {}", e)))?;
    signature
        .recover(digest)
        .map_err(|e| OracleError::Signature(format!("recovery failed: {}", e)))
}

/// Digest the signer committed to for this package.
pub fn data_package_digest(package: &DataPackage, scheme: &SignatureScheme) -> Result<H256> {
    Ok(scheme.digest(&encode_data_package(package)?))
}

/// Sign a package the way an oracle node does before publishing it.
pub fn sign_data_package(
    package: DataPackage,
    key: &SigningKey,
    scheme: &SignatureScheme,
) -> Result<SignedDataPackage> {
    let digest = data_package_digest(&package, scheme)?;
    let signature = (scheme.sign)(digest, key)?;
    SignedDataPackage::new(package, signature)
}

/// Recover the address that produced the package signature.
pub fn recover_signer_address(
    signed: &SignedDataPackage,
    scheme: &SignatureScheme,
) -> Result<Address> {
    let digest = data_package_digest(signed.data_package(), scheme)?;
    (scheme.recover)(digest, signed.signature())
}

/// Fail unless the package was signed by `expected`.
pub fn verify_signer(
    signed: &SignedDataPackage,
    expected: Address,
    scheme: &SignatureScheme,
) -> Result<()> {
    let actual = recover_signer_address(signed, scheme)?;
    if actual != expected {
        return Err(OracleError::SignerMismatch { expected, actual });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataPoint;
    use ethers::signers::{LocalWallet, Signer};
    use ethers::utils::secret_key_to_address;

    const KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn key() -> SigningKey {
        KEY.parse::<LocalWallet>().unwrap().signer().clone()
    }

    fn package() -> DataPackage {
        DataPackage::new(vec![DataPoint::numeric("ETH", 1650.0).unwrap()], 1_654_353_400_000)
    }

    #[test]
    fn test_recovers_signer_address() {
        let key = key();
        let signed = sign_data_package(package(), &key, &SignatureScheme::EVM).unwrap();
        let recovered = recover_signer_address(&signed, &SignatureScheme::EVM).unwrap();
        assert_eq!(recovered, secret_key_to_address(&key));
        assert!(matches!(signed.signature()[64], 27 | 28));
    }

    #[test]
    fn test_schemes_are_not_interchangeable() {
        let key = key();
        let signed = sign_data_package(package(), &key, &SignatureScheme::EVM_PERSONAL_SIGN).unwrap();
        assert_eq!(
            recover_signer_address(&signed, &SignatureScheme::EVM_PERSONAL_SIGN).unwrap(),
            secret_key_to_address(&key)
        );
        assert_ne!(
            recover_signer_address(&signed, &SignatureScheme::EVM).unwrap(),
            secret_key_to_address(&key)
        );
    }

    #[test]
    fn test_tampered_package_changes_signer() {
        let key = key();
        let signed = sign_data_package(package(), &key, &SignatureScheme::EVM).unwrap();
        let tampered = SignedDataPackage::new(
            DataPackage::new(vec![DataPoint::numeric("ETH", 9999.0).unwrap()], 1_654_353_400_000),
            signed.signature().to_vec(),
        )
        .unwrap();
        let err = verify_signer(&tampered, secret_key_to_address(&key), &SignatureScheme::EVM);
        assert!(matches!(
            err,
            Err(OracleError::SignerMismatch { .. }) | Err(OracleError::Signature(_))
        ));
    }

    #[test]
    fn test_personal_sign_matches_wallet() {
        let wallet: LocalWallet = KEY.parse().unwrap();
        let bytes = encode_data_package(&package()).unwrap();
        let expected = SignatureScheme::EVM_PERSONAL_SIGN.digest(&bytes);
        assert_eq!(expected, hash_message(&bytes));
        assert_eq!(wallet.address(), secret_key_to_address(wallet.signer()));
    }
}
