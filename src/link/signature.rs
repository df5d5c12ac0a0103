//! Ed25519 request/grant signatures over a (master, slave) pairing.
//!
//! The signed message is a domain tag followed by the raw master key bytes
//! and the raw slave key bytes, so a request signature can never be replayed
//! as a grant and vice versa.

use ring::signature::{self, Ed25519KeyPair, KeyPair, UnparsedPublicKey};

/// Length of a raw Ed25519 public key.
pub const PUBLIC_KEY_LEN: usize = 32;

/// Length of an Ed25519 signature.
pub const SIGNATURE_LEN: usize = 64;

const REQUEST_TAG: &[u8] = b"devicelink/request/v1";
const GRANT_TAG: &[u8] = b"devicelink/grant/v1";

/// Which half of the link a signature covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureKind {
    /// Made by the master key: the master authorizes the slave.
    Request,
    /// Made by the slave key: the slave accepts the pairing.
    Grant,
}

impl SignatureKind {
    fn tag(self) -> &'static [u8] {
        match self {
            Self::Request => REQUEST_TAG,
            Self::Grant => GRANT_TAG,
        }
    }
}

/// Decode a hex-encoded Ed25519 public key.
///
/// Only the canonical form (lowercase, no surrounding whitespace) is
/// accepted. Keys are stored and published as strings, so two spellings of
/// one key would otherwise name two different accounts.
pub fn decode_public_key(key: &str) -> Result<[u8; PUBLIC_KEY_LEN], String> {
    let bytes = hex::decode(key).map_err(|e| format!("not hex: {e}"))?;
    let decoded = <[u8; PUBLIC_KEY_LEN]>::try_from(bytes.as_slice())
        .map_err(|_| format!("expected {PUBLIC_KEY_LEN} bytes, got {}", bytes.len()))?;
    if hex::encode(decoded) != key {
        return Err("not in canonical lowercase hex form".into());
    }
    Ok(decoded)
}

/// Hex-encoded public key of a key pair.
pub fn public_key_hex(pair: &Ed25519KeyPair) -> String {
    hex::encode(pair.public_key().as_ref())
}

/// Bytes covered by a signature of the given kind.
pub fn signed_payload(
    kind: SignatureKind,
    master: &[u8; PUBLIC_KEY_LEN],
    slave: &[u8; PUBLIC_KEY_LEN],
) -> Vec<u8> {
    let tag = kind.tag();
    let mut payload = Vec::with_capacity(tag.len() + 2 * PUBLIC_KEY_LEN);
    payload.extend_from_slice(tag);
    payload.extend_from_slice(master);
    payload.extend_from_slice(slave);
    payload
}

/// Sign the pairing with `pair`.
pub fn sign(
    pair: &Ed25519KeyPair,
    kind: SignatureKind,
    master: &[u8; PUBLIC_KEY_LEN],
    slave: &[u8; PUBLIC_KEY_LEN],
) -> Vec<u8> {
    pair.sign(&signed_payload(kind, master, slave))
        .as_ref()
        .to_vec()
}

/// Verify a signature of the given kind against `signer`.
pub fn verify(
    signer: &[u8; PUBLIC_KEY_LEN],
    kind: SignatureKind,
    master: &[u8; PUBLIC_KEY_LEN],
    slave: &[u8; PUBLIC_KEY_LEN],
    sig: &[u8],
) -> bool {
    if sig.len() != SIGNATURE_LEN {
        return false;
    }
    UnparsedPublicKey::new(&signature::ED25519, signer)
        .verify(&signed_payload(kind, master, slave), sig)
        .is_ok()
}
