//! Algorithm registry and algorithm-tagged digests ("imprints").
//!
//! An imprint is the wire representation `algo-id ‖ digest`, the unit the
//! rest of the verification core reasons about instead of raw hash bytes.
//! The registry tracks, per algorithm, whether it is still trustworthy for
//! a given point in time (`AlgorithmStatus`) so that rules elsewhere (see
//! `ksi-verify`) can reject chains signed with a now-deprecated algorithm.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ImprintError {
    #[error("unknown or unregistered algorithm id: 0x{0:02x}")]
    UnknownAlgorithm(u8),
    #[error("invalid digest length for {algorithm:?}: expected {expected}, got {actual}")]
    InvalidLength {
        algorithm: HashAlgorithm,
        expected: usize,
        actual: usize,
    },
    #[error("imprint is empty")]
    Empty,
    #[error("algorithm {0:?} has no hashing implementation in this build")]
    NotImplemented(HashAlgorithm),
}

/// Trust status of a registered algorithm at a given point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlgorithmStatus {
    Normal,
    /// Still usable, but a rule set may choose to reject it after the given
    /// unix time (seconds).
    DeprecatedAfter(u64),
    /// Must not be trusted for any aggregation performed after the given
    /// unix time (seconds).
    ObsoleteAfter(u64),
}

/// Hash algorithms known to the registry. Tag values mirror the
/// illustrative wire shape from the signature format (`spec.md` §6):
/// a one-byte algorithm id prefixes every imprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum HashAlgorithm {
    Sha1 = 0x00,
    Sha256 = 0x01,
    Sha384 = 0x04,
    Sha512 = 0x05,
}

impl HashAlgorithm {
    pub const ALL: [HashAlgorithm; 4] = [
        HashAlgorithm::Sha1,
        HashAlgorithm::Sha256,
        HashAlgorithm::Sha384,
        HashAlgorithm::Sha512,
    ];

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Result<Self, ImprintError> {
        match id {
            0x00 => Ok(HashAlgorithm::Sha1),
            0x01 => Ok(HashAlgorithm::Sha256),
            0x04 => Ok(HashAlgorithm::Sha384),
            0x05 => Ok(HashAlgorithm::Sha512),
            other => Err(ImprintError::UnknownAlgorithm(other)),
        }
    }

    /// Digest length in bytes, independent of any imprint instance.
    pub fn digest_len(self) -> usize {
        match self {
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 => 64,
        }
    }

    /// Registry status. SHA-1 is carried as deprecated the way a production
    /// registry would keep an old algorithm recognizable without trusting
    /// it for new aggregations; the cutover date below is illustrative.
    pub fn status(self) -> AlgorithmStatus {
        match self {
            HashAlgorithm::Sha1 => AlgorithmStatus::DeprecatedAfter(1_467_331_200), // 2016-07-01
            HashAlgorithm::Sha256 | HashAlgorithm::Sha384 | HashAlgorithm::Sha512 => {
                AlgorithmStatus::Normal
            }
        }
    }

    /// Whether this algorithm may be used to aggregate at `time` (unix
    /// seconds). Deprecated algorithms are still considered trustworthy up
    /// to (and including) their cutover; obsolete algorithms never are once
    /// past cutover.
    pub fn trusted_at(self, time: u64) -> bool {
        match self.status() {
            AlgorithmStatus::Normal => true,
            AlgorithmStatus::DeprecatedAfter(cutover) | AlgorithmStatus::ObsoleteAfter(cutover) => {
                time <= cutover
            }
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HashAlgorithm::Sha1 => "SHA-1",
            HashAlgorithm::Sha256 => "SHA-256",
            HashAlgorithm::Sha384 => "SHA-384",
            HashAlgorithm::Sha512 => "SHA-512",
        };
        f.write_str(name)
    }
}

/// An algorithm-tagged digest: `algo-id ‖ digest`. Two imprints are equal
/// iff byte-equal (derived `PartialEq` on `(algorithm, digest)` gives this
/// directly since `digest` length is a function of `algorithm`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Imprint {
    algorithm: HashAlgorithm,
    digest: Vec<u8>,
}

impl Imprint {
    pub fn new(algorithm: HashAlgorithm, digest: Vec<u8>) -> Result<Self, ImprintError> {
        let expected = algorithm.digest_len();
        if digest.len() != expected {
            return Err(ImprintError::InvalidLength {
                algorithm,
                expected,
                actual: digest.len(),
            });
        }
        Ok(Self { algorithm, digest })
    }

    /// Parse `algo-id ‖ digest` off the wire.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ImprintError> {
        let (id, rest) = bytes.split_first().ok_or(ImprintError::Empty)?;
        let algorithm = HashAlgorithm::from_id(*id)?;
        Self::new(algorithm, rest.to_vec())
    }

    /// Serialize back to `algo-id ‖ digest`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.digest.len());
        out.push(self.algorithm.id());
        out.extend_from_slice(&self.digest);
        out
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn digest(&self) -> &[u8] {
        &self.digest
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }
}

impl fmt::Display for Imprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, hex::encode(&self.digest))
    }
}

/// Streaming hasher interface, implemented per algorithm below. Object-safe
/// so callers can hold `Box<dyn StreamingHasher>` without knowing the
/// concrete algorithm ahead of time (mirrors the incremental-hash /
/// finalize split in `bpi-hash::HashEngine`).
pub trait StreamingHasher {
    fn update(&mut self, data: &[u8]);
    fn finalize(self: Box<Self>) -> Imprint;
}

struct Sha1Hasher(Sha1);
struct Sha256Hasher(Sha256);
struct Sha384Hasher(Sha384);
struct Sha512Hasher(Sha512);

impl StreamingHasher for Sha1Hasher {
    fn update(&mut self, data: &[u8]) {
        Digest::update(&mut self.0, data);
    }
    fn finalize(self: Box<Self>) -> Imprint {
        let digest = self.0.finalize().to_vec();
        Imprint::new(HashAlgorithm::Sha1, digest).expect("sha1 digest length is fixed")
    }
}

impl StreamingHasher for Sha256Hasher {
    fn update(&mut self, data: &[u8]) {
        Digest::update(&mut self.0, data);
    }
    fn finalize(self: Box<Self>) -> Imprint {
        let digest = self.0.finalize().to_vec();
        Imprint::new(HashAlgorithm::Sha256, digest).expect("sha256 digest length is fixed")
    }
}

impl StreamingHasher for Sha384Hasher {
    fn update(&mut self, data: &[u8]) {
        Digest::update(&mut self.0, data);
    }
    fn finalize(self: Box<Self>) -> Imprint {
        let digest = self.0.finalize().to_vec();
        Imprint::new(HashAlgorithm::Sha384, digest).expect("sha384 digest length is fixed")
    }
}

impl StreamingHasher for Sha512Hasher {
    fn update(&mut self, data: &[u8]) {
        Digest::update(&mut self.0, data);
    }
    fn finalize(self: Box<Self>) -> Imprint {
        let digest = self.0.finalize().to_vec();
        Imprint::new(HashAlgorithm::Sha512, digest).expect("sha512 digest length is fixed")
    }
}

/// Open a streaming hasher for `algorithm`.
pub fn hasher(algorithm: HashAlgorithm) -> Box<dyn StreamingHasher> {
    match algorithm {
        HashAlgorithm::Sha1 => Box::new(Sha1Hasher(Sha1::new())),
        HashAlgorithm::Sha256 => Box::new(Sha256Hasher(Sha256::new())),
        HashAlgorithm::Sha384 => Box::new(Sha384Hasher(Sha384::new())),
        HashAlgorithm::Sha512 => Box::new(Sha512Hasher(Sha512::new())),
    }
}

/// Hash `data` in one shot and wrap the result as an imprint.
pub fn hash_imprint(algorithm: HashAlgorithm, data: &[u8]) -> Imprint {
    let mut h = hasher(algorithm);
    h.update(data);
    h.finalize()
}
