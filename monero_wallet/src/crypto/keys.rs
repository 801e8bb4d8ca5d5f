use std::fs;
use std::io::Write;
use std::path::Path;

use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek::scalar::Scalar;
use monero::{Address, Network};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::types::{KeyError, Result};

const COMMIT_DOMAIN: &[u8] = b"eth-xmr-swap/commit";
const VIEW_DOMAIN: &[u8] = b"eth-xmr-swap/view";

/// A private spend or view key. The raw bytes are reduced mod the group
/// order whenever the key is used as a scalar.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey([u8; 32]);

impl SecretKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_scalar(scalar: Scalar) -> Self {
        Self(scalar.to_bytes())
    }

    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_scalar(&self) -> Scalar {
        Scalar::from_bytes_mod_order(self.0)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }

    pub fn public(&self) -> PublicKey {
        PublicKey(EdwardsPoint::mul_base(&self.as_scalar()))
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PublicKey(EdwardsPoint);

impl PublicKey {
    pub fn from_compressed(bytes: [u8; 32]) -> std::result::Result<Self, KeyError> {
        let point = CompressedEdwardsY(bytes)
            .decompress()
            .ok_or(KeyError::InvalidPoint)?;

        if point.is_small_order() {
            return Err(KeyError::SmallOrderPoint);
        }

        Ok(Self(point))
    }

    pub fn point(&self) -> &EdwardsPoint {
        &self.0
    }

    pub fn to_compressed(&self) -> [u8; 32] {
        self.0.compress().to_bytes()
    }
}

pub fn sum_public_keys(a: &PublicKey, b: &PublicKey) -> PublicKey {
    PublicKey(a.0 + b.0)
}

pub fn sum_secret_keys(a: &SecretKey, b: &SecretKey) -> SecretKey {
    SecretKey::from_scalar(a.as_scalar() + b.as_scalar())
}

/// Commitment to a spend key: `H_commit(s)`. Published before any funds
/// move so that the on-chain reveal of `s` lets the counterparty rebuild
/// the joint key.
pub fn spend_key_commitment(spend_bytes: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(COMMIT_DOMAIN);
    hasher.update(spend_bytes);
    hasher.finalize().into()
}

/// Derives the private view key from a spend-key commitment:
/// `v = H_view(h) mod l`.
pub fn view_key_from_commitment(commitment: &[u8; 32]) -> SecretKey {
    let mut hasher = Sha256::new();
    hasher.update(VIEW_DOMAIN);
    hasher.update(commitment);
    let digest: [u8; 32] = hasher.finalize().into();
    SecretKey::from_scalar(Scalar::from_bytes_mod_order(digest))
}

/// Derives the private view key directly from the spend key,
/// `v = H_view(H_commit(s))`.
pub fn derive_view_key(spend: &SecretKey) -> SecretKey {
    view_key_from_commitment(&spend_key_commitment(&spend.to_bytes()))
}

pub fn standard_address(
    network: Network,
    spend: &PublicKey,
    view: &PublicKey,
) -> std::result::Result<Address, KeyError> {
    let spend = monero::PublicKey::from_slice(&spend.to_compressed())
        .map_err(|_| KeyError::InvalidPoint)?;
    let view = monero::PublicKey::from_slice(&view.to_compressed())
        .map_err(|_| KeyError::InvalidPoint)?;
    Ok(Address::standard(network, spend, view))
}

/// A spendable key pair for a (usually joint) Monero account.
#[derive(Clone, Debug)]
pub struct PrivateKeyPair {
    spend: SecretKey,
    view: SecretKey,
}

impl PrivateKeyPair {
    pub fn new(spend: SecretKey, view: SecretKey) -> Self {
        Self { spend, view }
    }

    pub fn spend_bytes(&self) -> [u8; 32] {
        // canonical scalar form, as the wallet RPC expects
        self.spend.as_scalar().to_bytes()
    }

    pub fn view_bytes(&self) -> [u8; 32] {
        self.view.as_scalar().to_bytes()
    }

    pub fn public_spend(&self) -> PublicKey {
        self.spend.public()
    }

    pub fn public_view(&self) -> PublicKey {
        self.view.public()
    }

    pub fn address(&self, network: Network) -> std::result::Result<Address, KeyError> {
        standard_address(network, &self.public_spend(), &self.public_view())
    }

    /// Dumps the pair to `path` so the account stays recoverable even if
    /// the process dies before the wallet exists. Written via a temp file
    /// and rename so a crash never leaves a half-written dump.
    pub fn write_to_file(&self, path: &Path, network: Network) -> Result<()> {
        let address = self.address(network)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            writeln!(file, "address: {address}")?;
            writeln!(file, "private spend key: {}", hex::encode(self.spend_bytes()))?;
            writeln!(file, "private view key: {}", hex::encode(self.view_bytes()))?;
            writeln!(file, "network: {network:?}")?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_key_is_deterministic() {
        let spend = SecretKey::from_bytes([7u8; 32]);
        let a = derive_view_key(&spend);
        let b = derive_view_key(&spend);
        assert_eq!(a.to_bytes(), b.to_bytes());
    }

    #[test]
    fn view_key_matches_commitment_chain() {
        let spend = SecretKey::random();
        let commitment = spend_key_commitment(&spend.to_bytes());
        let via_commitment = view_key_from_commitment(&commitment);
        assert_eq!(derive_view_key(&spend).to_bytes(), via_commitment.to_bytes());
    }

    #[test]
    fn rejects_small_order_point() {
        use curve25519_dalek::traits::Identity;

        let identity = EdwardsPoint::identity().compress().to_bytes();
        assert!(matches!(
            PublicKey::from_compressed(identity),
            Err(KeyError::SmallOrderPoint)
        ));
    }

    #[test]
    fn sum_of_publics_matches_public_of_sum() {
        let a = SecretKey::random();
        let b = SecretKey::random();
        let summed = sum_secret_keys(&a, &b).public();
        let added = sum_public_keys(&a.public(), &b.public());
        assert_eq!(summed.to_compressed(), added.to_compressed());
    }

    #[test]
    fn writes_recovery_dump() {
        let dir = tempfile::tempdir().unwrap();
        let pair = PrivateKeyPair::new(SecretKey::random(), SecretKey::random());
        let path = dir.path().join("7").join("swap-secret");
        pair.write_to_file(&path, Network::Stagenet).unwrap();

        let dump = fs::read_to_string(&path).unwrap();
        assert!(dump.contains("private spend key"));
        assert!(dump.contains(&hex::encode(pair.spend_bytes())));
    }
}
