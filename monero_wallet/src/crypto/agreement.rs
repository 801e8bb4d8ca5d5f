//! Session key agreement for the swap protocol.
//!
//! Each side generates a fresh spend key per session and announces
//! `(S, v, h)` where `h = H_commit(s)` and `v = H_view(h)`. The escrow
//! later reveals one party's `s` on-chain, which is the missing half of
//! the joint account's spend key.

use monero::{Address, Network};
use tracing::warn;

use crate::crypto::keys::{
    spend_key_commitment, standard_address, sum_public_keys, sum_secret_keys,
    view_key_from_commitment, PrivateKeyPair, PublicKey, SecretKey,
};
use crate::types::KeyError;

/// Hex wire form of a key announcement, as carried by `SendKeys`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyAnnouncement {
    pub public_spend_key: String,
    pub private_view_key: String,
    pub spend_key_hash: String,
}

/// One side's session secrets.
pub struct SessionKeys {
    spend: SecretKey,
    view: SecretKey,
    commitment: [u8; 32],
}

impl SessionKeys {
    pub fn generate() -> Self {
        let spend = SecretKey::random();
        let commitment = spend_key_commitment(&spend.to_bytes());
        let view = view_key_from_commitment(&commitment);
        Self {
            spend,
            view,
            commitment,
        }
    }

    pub fn announcement(&self) -> KeyAnnouncement {
        KeyAnnouncement {
            public_spend_key: hex::encode(self.public_spend().to_compressed()),
            private_view_key: hex::encode(self.view.to_bytes()),
            spend_key_hash: hex::encode(self.commitment),
        }
    }

    pub fn public_spend(&self) -> PublicKey {
        self.spend.public()
    }

    pub fn public_view(&self) -> PublicKey {
        self.view.public()
    }

    /// Raw spend secret, in the form revealed to the escrow contract.
    pub fn spend_secret(&self) -> [u8; 32] {
        self.spend.to_bytes()
    }

    pub fn view_key(&self) -> &SecretKey {
        &self.view
    }
}

/// The peer's verified key material.
#[derive(Clone, Debug)]
pub struct PeerKeys {
    public_spend: PublicKey,
    view: SecretKey,
    commitment: [u8; 32],
}

impl PeerKeys {
    pub fn public_spend(&self) -> PublicKey {
        self.public_spend
    }

    pub fn public_view(&self) -> PublicKey {
        self.view.public()
    }

    pub fn view_bytes(&self) -> [u8; 32] {
        self.view.as_scalar().to_bytes()
    }

    pub fn commitment(&self) -> [u8; 32] {
        self.commitment
    }

    /// The peer's own standard address, used for the view-only wallet
    /// check before anything moves on either chain.
    pub fn address(&self, network: Network) -> Result<Address, KeyError> {
        standard_address(network, &self.public_spend, &self.public_view())
    }
}

fn decode32(field: &'static str, value: &str) -> Result<[u8; 32], KeyError> {
    if value.is_empty() {
        return Err(KeyError::MissingField { field });
    }
    let bytes = hex::decode(value).map_err(|_| KeyError::InvalidEncoding { field })?;
    bytes
        .try_into()
        .map_err(|_| KeyError::InvalidEncoding { field })
}

/// Checks an incoming announcement: all fields present, the spend-key
/// hash derives the announced view key, the public spend key is a valid
/// point, and the pair forms a standard address on `network`. The
/// wallet-level view-only check is the caller's job.
pub fn verify_announcement(
    announcement: &KeyAnnouncement,
    network: Network,
) -> Result<PeerKeys, KeyError> {
    let spend_bytes = decode32("public spend key", &announcement.public_spend_key)?;
    let view_bytes = decode32("private view key", &announcement.private_view_key)?;
    let commitment = decode32("spend key hash", &announcement.spend_key_hash)?;

    let derived = view_key_from_commitment(&commitment);
    let announced = SecretKey::from_bytes(view_bytes);
    if derived.as_scalar() != announced.as_scalar() {
        return Err(KeyError::ViewKeyMismatch);
    }

    let public_spend = PublicKey::from_compressed(spend_bytes)?;
    let peer = PeerKeys {
        public_spend,
        view: derived,
        commitment,
    };
    peer.address(network)?;
    Ok(peer)
}

/// The jointly controlled account: address plus the joint view key, which
/// is all a view-only audit needs.
pub struct JointAccount {
    pub address: Address,
    view: SecretKey,
}

impl JointAccount {
    pub fn view_bytes(&self) -> [u8; 32] {
        self.view.as_scalar().to_bytes()
    }
}

/// `A = address(S_ours + S_peer, (v_ours + v_peer)·G)`.
pub fn joint_account(
    ours: &SessionKeys,
    peer: &PeerKeys,
    network: Network,
) -> Result<JointAccount, KeyError> {
    let spend = sum_public_keys(&ours.public_spend(), &peer.public_spend());
    let view = sum_secret_keys(ours.view_key(), &peer.view);
    let address = standard_address(network, &spend, &view.public())?;
    Ok(JointAccount { address, view })
}

/// Rebuilds the full joint key pair once the peer's spend key has been
/// revealed by the escrow. The revealed scalar is checked against the
/// announced commitment; a mismatch is logged but recovery proceeds with
/// the revealed value, since the funds live wherever the real keys point.
pub fn recover_joint_keypair(
    ours: &SessionKeys,
    peer_commitment: &[u8; 32],
    revealed_spend: [u8; 32],
) -> PrivateKeyPair {
    let commitment = spend_key_commitment(&revealed_spend);
    if &commitment != peer_commitment {
        warn!("revealed spend key does not match the announced commitment");
    }

    let peer_spend = SecretKey::from_bytes(revealed_spend);
    let peer_view = view_key_from_commitment(&commitment);
    PrivateKeyPair::new(
        sum_secret_keys(&SecretKey::from_bytes(ours.spend_secret()), &peer_spend),
        sum_secret_keys(ours.view_key(), &peer_view),
    )
}
