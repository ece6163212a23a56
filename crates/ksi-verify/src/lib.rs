//! Verification rules and policy engine for KSI signatures (`spec.md`
//! §4.3–§4.4): a catalog of atomic, independently testable rules plus the
//! policy compositions that sequence them into a pass/fail verdict with a
//! full trace, mirroring how a certificate chain validator separates
//! "check this one thing" from "which chain of checks decides trust".

pub mod context;
pub mod extender;
pub mod policy;
pub mod result;
pub mod rules;

pub use context::VerificationContext;
pub use extender::{Extender, ExtenderError};
pub use policy::{
    calendar_based_policy, extender_substitution_guard, general_policy, internal_policy, key_based_policy,
    publications_file_policy, user_provided_policy, Policy, PolicyResult,
};
pub use result::{RuleErrorCode, RuleResult, RuleStatus};
pub use rules::Rule;
