//! Policy engine: composes named rules into the ordered, short-circuiting
//! evaluation described by `spec.md` §4.4, the same shape as a
//! middleware chain — each rule gets a turn, a `Fail` stops the chain, an
//! `Na` lets the next rule decide, and a whole policy can itself fall back
//! to another policy when it produces no conclusive answer.
//!
//! Internal consistency rules (`GEN-*`/`INT-*`) run in every policy but
//! never by themselves make a policy conclusive — a well-formed chain
//! passes them regardless of whether any trust anchor was actually
//! checked. Only a policy's *anchor* rules (the ones that actually reach
//! out to a calendar chain, a certificate, or a publication) can turn a
//! policy's verdict into `Ok`; if none of them fire, evaluation falls
//! through to the configured fallback policy instead.

use tracing::{info, warn};

use crate::context::VerificationContext;
use crate::result::{RuleResult, RuleStatus};
use crate::rules::{self, Rule};

/// Outcome of evaluating a whole policy: the final status plus the
/// ordered trace of every rule that ran, so a caller can explain *why*
/// a signature passed or failed without re-running anything.
#[derive(Debug, Clone)]
pub struct PolicyResult {
    pub status: RuleStatus,
    pub trace: Vec<RuleResult>,
}

impl PolicyResult {
    pub fn is_ok(&self) -> bool {
        self.status == RuleStatus::Ok
    }
}

struct Step {
    rule: Rule,
    /// Whether an `Ok` from this rule counts toward making the whole
    /// policy conclusive. `false` for the shared internal-consistency
    /// rules, `true` for a policy's own trust-anchor rules.
    anchor: bool,
}

/// An ordered list of rules plus an optional fallback policy to try when
/// none of this policy's anchor rules fired (`spec.md` §4.4:
/// publications-file policy falls back to key-based, which falls back to
/// calendar-based).
pub struct Policy {
    pub name: &'static str,
    steps: Vec<Step>,
    fallback: Option<Box<Policy>>,
}

impl Policy {
    fn from_steps(name: &'static str, steps: Vec<Step>) -> Self {
        Self {
            name,
            steps,
            fallback: None,
        }
    }

    /// Build a policy from shared internal-consistency rules plus this
    /// policy's own anchor rules. Internal rules still run (and can still
    /// `Fail`) but only an anchor rule's `Ok` makes the policy conclusive.
    fn with_internal_and_anchor(name: &'static str, internal: Vec<Rule>, anchor: Vec<Rule>) -> Self {
        Self::with_internal_and_mixed_anchor(name, internal, anchor.into_iter().map(|rule| (rule, true)).collect())
    }

    /// Like `with_internal_and_anchor`, but lets each trailing rule declare
    /// for itself whether its `Ok` counts toward making the policy
    /// conclusive. Needed when a policy's trust-anchor rules include
    /// supporting checks (e.g. certificate lookup, validity window) that
    /// are meaningless on their own — only the rule that actually performs
    /// the cryptographic verification should be able to anchor the policy.
    fn with_internal_and_mixed_anchor(name: &'static str, internal: Vec<Rule>, anchor: Vec<(Rule, bool)>) -> Self {
        let mut steps: Vec<Step> = internal.into_iter().map(|rule| Step { rule, anchor: false }).collect();
        steps.extend(anchor.into_iter().map(|(rule, anchor)| Step { rule, anchor }));
        Self::from_steps(name, steps)
    }

    pub fn with_fallback(mut self, fallback: Policy) -> Self {
        self.fallback = Some(Box::new(fallback));
        self
    }

    /// Run every rule in order. A `Fail` stops evaluation immediately. If
    /// at least one anchor rule resolves `Ok`, the policy is `Ok`. If no
    /// anchor rule fires (all `Na`, nothing to check), fall through to the
    /// configured fallback policy; with no fallback the policy is `Na`.
    pub fn evaluate(&self, ctx: &VerificationContext) -> PolicyResult {
        let mut trace = Vec::new();
        let mut anchor_passed = false;

        for step in &self.steps {
            let result = (step.rule)(ctx);
            match result.status {
                RuleStatus::Fail => {
                    warn!(policy = self.name, step = result.step_id, code = ?result.code, "verification rule failed");
                    trace.push(result);
                    return PolicyResult {
                        status: RuleStatus::Fail,
                        trace,
                    };
                }
                RuleStatus::Ok if step.anchor => anchor_passed = true,
                RuleStatus::Ok | RuleStatus::Na => {}
            }
            trace.push(result);
        }

        if anchor_passed {
            info!(policy = self.name, "policy evaluation passed");
            return PolicyResult {
                status: RuleStatus::Ok,
                trace,
            };
        }

        if let Some(fallback) = &self.fallback {
            info!(policy = self.name, fallback = fallback.name, "policy inconclusive, trying fallback");
            let mut sub = fallback.evaluate(ctx);
            trace.append(&mut sub.trace);
            return PolicyResult {
                status: sub.status,
                trace,
            };
        }

        PolicyResult {
            status: RuleStatus::Na,
            trace,
        }
    }
}

/// Rules every policy runs regardless of trust anchor: internal chain
/// consistency (`spec.md` §4.3 GEN-*/INT-*). Per `spec.md` §4.4 ("Internal
/// — GEN-01..05, INT-09..11 ... Terminal"), this includes the calendar
/// chain's own shape/time checks (`GEN-04`, `GEN-05`, `CAL-02`) and the
/// calendar authentication record's self-consistency check (`INT-11`) —
/// none of these reach out to an external collaborator, so they belong in
/// every policy's internal set rather than being quarantined behind a
/// trust anchor. Without them the terminal Internal policy never runs
/// `GEN-05`, so a flipped calendar right/left link (`spec.md` §8 scenario
/// 3) would pass Internal evaluation undetected.
fn internal_rules() -> Vec<Rule> {
    vec![
        rules::gen01_chain_hash_consistency,
        rules::gen02_chain_time_consistency,
        rules::gen03_chain_index_continuation,
        rules::gen04_calendar_time_matches_last_chain,
        rules::gen05_calendar_time_reconstruction,
        rules::cal02_calendar_input_matches_last_chain_output,
        rules::gen06_chain_index_length_decreases,
        rules::gen07_document_hash_verification,
        rules::int01_input_level,
        rules::int02_rfc3161_existence_pairing,
        rules::int03_rfc3161_output_algorithm_deprecation,
        rules::int04_rfc3161_internal_algorithm_deprecation,
        rules::int05_metadata_padding,
        rules::int09_rfc3161_output_matches_first_chain,
        rules::int10_aggregation_algorithm_deprecation,
        rules::int11_calendar_auth_references_chain,
        rules::int12_aggregation_auth_record_verification,
    ]
}

/// Internal policy (`spec.md` §4.4): checks chain-internal consistency
/// only, makes no trust-anchor determination. Its own anchor rule is a
/// no-op that always succeeds, since "no trust anchor was requested" is
/// itself this policy's whole point.
pub fn internal_policy() -> Policy {
    Policy::with_internal_and_anchor("internal", internal_rules(), vec![always_ok_terminator])
}

fn always_ok_terminator(_ctx: &VerificationContext) -> RuleResult {
    RuleResult::ok("GEN-00")
}

/// Calendar-based policy: internal consistency (which already includes
/// `INT-11`) plus the calendar authentication record's time cross-check
/// (`CAL-03`) as its anchor; a signature with a calendar chain but no
/// authentication record has nothing for this policy to anchor on.
pub fn calendar_based_policy() -> Policy {
    Policy::with_internal_and_anchor("calendar-based", internal_rules(), vec![rules::cal03_calendar_auth_time_matches])
}

/// Key-based policy: internal consistency plus a PKI signature over the
/// calendar chain's root, falling back to the calendar-based policy when
/// no PKI collaborator/certificate resolves.
///
/// `KEY-01` (certificate lookup) and `KEY-03` (validity window) only
/// narrow down *which* certificate is a candidate; neither one performs
/// cryptographic verification, so neither can anchor the policy by
/// itself. Only `KEY-02`, which actually runs the PKI signature check,
/// is allowed to make this policy conclusive.
pub fn key_based_policy() -> Policy {
    let mut internal = internal_rules();
    internal.push(rules::pubf01_publications_file_signature_verifies);
    Policy::with_internal_and_mixed_anchor(
        "key-based",
        internal,
        vec![
            (rules::key01_certificate_by_id_exists, false),
            (rules::key02_pki_signature_verifies, true),
            (rules::key03_certificate_validity_period, false),
        ],
    )
    .with_fallback(calendar_based_policy())
}

/// Publications-file policy: either the signature's own publication
/// record matches an entry in the file (`PUB-01`), or the file has a
/// later publication the signature can be extended to reach (`PUB-02`
/// + `PUB-03`). Falls back to the key-based policy (and from there to
/// calendar-based) when no publications file resolves anything.
///
/// `PUB-04` only checks the signature's own embedded publication record
/// against its own calendar root — a consistency check, not a trust
/// anchor, since it reads nothing external. Only `PUB-01`/`PUB-02`/
/// `PUB-03` (which all read the configured publications file) may anchor
/// this policy; otherwise a self-made publication record with no file
/// configured would verify `Ok` on zero external trust input.
pub fn publications_file_policy() -> Policy {
    let mut internal = internal_rules();
    internal.push(rules::pubf01_publications_file_signature_verifies);
    Policy::with_internal_and_mixed_anchor(
        "publications-file",
        internal,
        vec![
            (rules::pub01_publication_record_in_file, true),
            (rules::pub02_publication_available_for_extension, true),
            (rules::pub03_extended_chain_matches_publication, true),
            (rules::pub04_publication_record_matches_calendar_root, false),
        ],
    )
    .with_fallback(key_based_policy())
}

/// User-provided-publication policy: verifies against a publication
/// supplied directly by the caller rather than read from a trust file,
/// extending to reach it if the signature does not already cover it.
pub fn user_provided_policy() -> Policy {
    Policy::with_internal_and_anchor("user-provided", internal_rules(), vec![rules::user01_user_publication_matches])
}

/// General policy (`spec.md` §4.4): tries every configured trust anchor in
/// the standard preference order — user-provided publication first (most
/// specific), then publications file, and only then key-based/calendar as
/// fallbacks baked into the publications-file chain. This is the default
/// a caller reaches for when they haven't picked a specific anchor.
pub fn general_policy(ctx: &VerificationContext) -> Policy {
    if ctx.user_publication.is_some() {
        user_provided_policy().with_fallback(publications_file_policy())
    } else {
        publications_file_policy()
    }
}

/// Calendar-chain substitution guard (`CAL-01`), run ahead of any policy
/// whose verdict depends on an extender result, so a hostile or buggy
/// extender can't quietly swap in a different calendar root for a time the
/// signature already covers. Not bundled into the standard policies above
/// because it only applies when both an existing calendar chain and a live
/// extender are present; callers that configure both should run it first.
pub fn extender_substitution_guard() -> Policy {
    Policy::with_internal_and_anchor("extender-substitution-guard", vec![], vec![rules::cal01_extender_matches_existing_right_links])
}
