//! The shared vocabulary every rule and every policy speaks.

/// Outcome of a single rule evaluation. `Na` ("not applicable") is
/// distinct from `Fail`: it means the rule had nothing to check given this
/// context (e.g. no calendar authentication record present), and policy
/// evaluation treats it as a pass-through rather than a stop condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleStatus {
    Ok,
    Na,
    Fail,
}

/// Coarse-grained error classification, analogous to the original format's
/// `KSI_VER_ERR_*` tags, attached to a failing rule result so callers can
/// branch on category without string-matching the description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleErrorCode {
    None,
    StructuralError,
    ChainHashMismatch,
    ChainTimeInconsistent,
    ChainIndexMismatch,
    CalendarTimeMismatch,
    AlgorithmDeprecated,
    MetadataPaddingInvalid,
    Rfc3161Mismatch,
    CertificateNotFound,
    SignatureInvalid,
    PublicationNotFound,
    PublicationMismatch,
    ExtensionNotPermitted,
    ExtenderSubstitution,
    UserPublicationMismatch,
    NetworkError,
    /// The rule has nothing conclusive to report not because the context
    /// doesn't apply to it, but because the upstream design never finished
    /// specifying its semantics (`spec.md` §9 Open Questions). Distinct from
    /// a plain `Na` so a caller can tell "nothing to check here" apart from
    /// "this check is known-incomplete, do not treat silence as a pass".
    Inconclusive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleResult {
    pub status: RuleStatus,
    pub code: RuleErrorCode,
    pub step_id: &'static str,
    pub description: String,
}

impl RuleResult {
    pub fn ok(step_id: &'static str) -> Self {
        Self {
            status: RuleStatus::Ok,
            code: RuleErrorCode::None,
            step_id,
            description: String::new(),
        }
    }

    pub fn na(step_id: &'static str, reason: impl Into<String>) -> Self {
        Self {
            status: RuleStatus::Na,
            code: RuleErrorCode::None,
            step_id,
            description: reason.into(),
        }
    }

    pub fn fail(step_id: &'static str, code: RuleErrorCode, description: impl Into<String>) -> Self {
        Self {
            status: RuleStatus::Fail,
            code,
            step_id,
            description: description.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == RuleStatus::Ok
    }

    pub fn is_fail(&self) -> bool {
        self.status == RuleStatus::Fail
    }
}
