//! The PKI collaborator contract.
//!
//! Certificate parsing and signature-primitive verification are explicitly
//! out of scope for this core (`spec.md` §1): callers inject an
//! implementation of [`Pki`] backed by whatever certificate store and
//! crypto library they already run (the same "minimal contract" shape as
//! the extender in `ksi-verify`).

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("PKI verification failed: {0}")]
pub struct PkiError(pub String);

/// Verifies a detached signature against one of a set of candidate
/// certificates. Implementations choose which certificate (if any)
/// satisfies caller-configured constraints (e.g. subject DN) and perform
/// the actual signature-primitive check; `Ok(())` means some candidate
/// verified, `Err` otherwise.
pub trait Pki {
    fn verify(
        &self,
        algorithm: &str,
        signature: &[u8],
        signed_bytes: &[u8],
        candidate_certificates: &[&[u8]],
    ) -> Result<(), PkiError>;
}
