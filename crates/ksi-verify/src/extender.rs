//! The extender service contract.
//!
//! The core never performs network I/O (`spec.md` §5): callers inject an
//! `Extender` backed by whatever transport they run. `extend` with
//! `publication_time = None` asks for a chain to the latest available
//! calendar record.

use ksi_signature::CalendarChain;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtenderError {
    #[error("no extender collaborator configured for this verification context")]
    NotConfigured,
    #[error("extender request failed: {0}")]
    NetworkError(String),
}

pub trait Extender {
    fn extend(
        &self,
        aggregation_time: u64,
        publication_time: Option<u64>,
    ) -> Result<CalendarChain, ExtenderError>;
}
