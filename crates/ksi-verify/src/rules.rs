//! Atomic verification predicates, each a pure function over a
//! [`VerificationContext`]. Grouped by the prefix used in `spec.md` §4.3:
//! `GEN-*` (internal chain consistency), `INT-*` (internal/algorithm
//! checks plus RFC-3161 compatibility), `CAL-*` (calendar-chain checks),
//! `KEY-*`/`PUB-*`/`USER-*` (trust-anchor checks requiring a collaborator).

use ksi_hashchain::{aggregate_calendar, aggregate_chain, aggregate_chain_from_level};
use ksi_signature::{CertSelector, Direction};
use tracing::debug;

use crate::context::VerificationContext;
use crate::result::{RuleErrorCode, RuleResult, RuleStatus};

pub type Rule = fn(&VerificationContext) -> RuleResult;

fn chain_output(
    ctx: &VerificationContext,
    index: usize,
) -> Result<ksi_hashchain::AggregateResult, ksi_hashchain::ChainError> {
    let chain = &ctx.signature.aggregation_chains[index];
    if index == 0 {
        aggregate_chain_from_level(chain, ctx.document_input_level)
    } else {
        aggregate_chain(chain)
    }
}

/// `GEN-01`: aggregation-chain input-hash of chain *i+1* equals output-hash
/// of chain *i*.
pub fn gen01_chain_hash_consistency(ctx: &VerificationContext) -> RuleResult {
    let chains = &ctx.signature.aggregation_chains;
    for i in 0..chains.len().saturating_sub(1) {
        let output = match chain_output(ctx, i) {
            Ok(r) => r,
            Err(e) => return RuleResult::fail("GEN-01", RuleErrorCode::StructuralError, e.to_string()),
        };
        if output.output_hash != chains[i + 1].input_hash {
            return RuleResult::fail(
                "GEN-01",
                RuleErrorCode::ChainHashMismatch,
                format!("aggregation chain {i} output does not match chain {}'s input hash", i + 1),
            );
        }
    }
    RuleResult::ok("GEN-01")
}

/// `GEN-02`: aggregation-chain time consistency (monotonic leaf-to-root).
pub fn gen02_chain_time_consistency(ctx: &VerificationContext) -> RuleResult {
    let chains = &ctx.signature.aggregation_chains;
    for pair in chains.windows(2) {
        if pair[0].aggregation_time > pair[1].aggregation_time {
            return RuleResult::fail(
                "GEN-02",
                RuleErrorCode::ChainTimeInconsistent,
                "aggregation chain times are not monotonic leaf-to-root",
            );
        }
    }
    RuleResult::ok("GEN-02")
}

/// `GEN-03`: chain-index continuation — the root-ward chain's index is a
/// prefix of its leaf-ward neighbor's index.
pub fn gen03_chain_index_continuation(ctx: &VerificationContext) -> RuleResult {
    let chains = &ctx.signature.aggregation_chains;
    for pair in chains.windows(2) {
        let (leafward, rootward) = (&pair[0].chain_index, &pair[1].chain_index);
        if rootward.len() > leafward.len() || rootward != &leafward[..rootward.len()] {
            return RuleResult::fail(
                "GEN-03",
                RuleErrorCode::ChainIndexMismatch,
                "chain index is not a prefix continuation between adjacent aggregation chains",
            );
        }
    }
    RuleResult::ok("GEN-03")
}

/// `GEN-04`: calendar chain's declared aggregation-time equals the
/// root-most aggregation chain's time.
pub fn gen04_calendar_time_matches_last_chain(ctx: &VerificationContext) -> RuleResult {
    let Some(cal) = &ctx.signature.calendar_chain else {
        return RuleResult::na("GEN-04", "signature has no calendar chain");
    };
    let Some(last) = ctx.signature.aggregation_chains.last() else {
        return RuleResult::na("GEN-04", "signature has no aggregation chains");
    };
    if cal.aggregation_time != last.aggregation_time {
        return RuleResult::fail(
            "GEN-04",
            RuleErrorCode::ChainTimeInconsistent,
            "calendar chain aggregation time does not match last aggregation chain's time",
        );
    }
    RuleResult::ok("GEN-04")
}

/// `GEN-05`: calendar chain's shape reconstructs its declared
/// aggregation-time.
pub fn gen05_calendar_time_reconstruction(ctx: &VerificationContext) -> RuleResult {
    let Some(cal) = &ctx.signature.calendar_chain else {
        return RuleResult::na("GEN-05", "signature has no calendar chain");
    };
    match ksi_hashchain::verify_calendar_time(cal) {
        Ok(()) => RuleResult::ok("GEN-05"),
        Err(e) => RuleResult::fail("GEN-05", RuleErrorCode::CalendarTimeMismatch, e.to_string()),
    }
}

/// `GEN-06`: each chain's `chain-index` length strictly decreases
/// root-ward.
pub fn gen06_chain_index_length_decreases(ctx: &VerificationContext) -> RuleResult {
    let chains = &ctx.signature.aggregation_chains;
    for pair in chains.windows(2) {
        if pair[1].chain_index.len() >= pair[0].chain_index.len() {
            return RuleResult::fail(
                "GEN-06",
                RuleErrorCode::ChainIndexMismatch,
                "chain index length does not strictly decrease root-ward",
            );
        }
    }
    RuleResult::ok("GEN-06")
}

/// `INT-01`: the document input level does not overflow the first chain's
/// level arithmetic.
pub fn int01_input_level(ctx: &VerificationContext) -> RuleResult {
    if ctx.signature.aggregation_chains.is_empty() {
        return RuleResult::na("INT-01", "signature has no aggregation chains");
    }
    match chain_output(ctx, 0) {
        Ok(_) => RuleResult::ok("INT-01"),
        Err(e @ ksi_hashchain::ChainError::LevelOverflow { .. }) => {
            RuleResult::fail("INT-01", RuleErrorCode::StructuralError, e.to_string())
        }
        Err(e) => RuleResult::fail("INT-01", RuleErrorCode::StructuralError, e.to_string()),
    }
}

/// `INT-02`: RFC-3161 record existence/absence is consistent with whether
/// the first aggregation chain carries legacy input-data.
pub fn int02_rfc3161_existence_pairing(ctx: &VerificationContext) -> RuleResult {
    let Some(first) = ctx.signature.aggregation_chains.first() else {
        return RuleResult::na("INT-02", "signature has no aggregation chains");
    };
    let has_input_data = first.input_data.is_some();
    let has_rfc3161 = ctx.signature.rfc3161_record.is_some();
    if has_input_data != has_rfc3161 {
        return RuleResult::fail(
            "INT-02",
            RuleErrorCode::Rfc3161Mismatch,
            "RFC-3161 record presence does not match first chain's legacy input-data marker",
        );
    }
    RuleResult::ok("INT-02")
}

/// `INT-03`: RFC-3161 record's output hash algorithm is not deprecated at
/// aggregation time.
pub fn int03_rfc3161_output_algorithm_deprecation(ctx: &VerificationContext) -> RuleResult {
    let Some(rec) = &ctx.signature.rfc3161_record else {
        return RuleResult::na("INT-03", "signature has no RFC-3161 record");
    };
    if !rec.input_hash.algorithm().trusted_at(rec.aggregation_time) {
        return RuleResult::fail(
            "INT-03",
            RuleErrorCode::AlgorithmDeprecated,
            format!("{} is deprecated at RFC-3161 aggregation time", rec.input_hash.algorithm()),
        );
    }
    RuleResult::ok("INT-03")
}

/// `INT-04`: RFC-3161 record's internal digest algorithm is not deprecated
/// at aggregation time.
pub fn int04_rfc3161_internal_algorithm_deprecation(ctx: &VerificationContext) -> RuleResult {
    let Some(rec) = &ctx.signature.rfc3161_record else {
        return RuleResult::na("INT-04", "signature has no RFC-3161 record");
    };
    if !rec.digest_algorithm.trusted_at(rec.aggregation_time) {
        return RuleResult::fail(
            "INT-04",
            RuleErrorCode::AlgorithmDeprecated,
            format!("{} is deprecated at RFC-3161 aggregation time", rec.digest_algorithm),
        );
    }
    RuleResult::ok("INT-04")
}

/// `INT-05`: every metadata link carries valid (non-imprint-colliding)
/// padding — the concrete form of P6.
pub fn int05_metadata_padding(ctx: &VerificationContext) -> RuleResult {
    for (ci, chain) in ctx.signature.aggregation_chains.iter().enumerate() {
        for (li, link) in chain.links.iter().enumerate() {
            if let ksi_signature::LinkContent::Metadata(meta) = &link.content {
                if !meta.has_valid_padding() {
                    return RuleResult::fail(
                        "INT-05",
                        RuleErrorCode::MetadataPaddingInvalid,
                        format!("chain {ci} link {li} metadata has invalid or missing padding"),
                    );
                }
            }
        }
    }
    RuleResult::ok("INT-05")
}

/// `INT-09`: the RFC-3161 record's re-derived chain input hash (see
/// `Rfc3161Record::derive_chain_input_hash`) equals the first aggregation
/// chain's declared input hash. Comparing `input_hash` directly would make
/// the prefix/suffix fields decorative, since nothing would then constrain
/// them to actually contain `input_hash` where the legacy timestamp claims
/// it does.
pub fn int09_rfc3161_output_matches_first_chain(ctx: &VerificationContext) -> RuleResult {
    let Some(rec) = &ctx.signature.rfc3161_record else {
        return RuleResult::na("INT-09", "signature has no RFC-3161 record");
    };
    let Some(first) = ctx.signature.aggregation_chains.first() else {
        return RuleResult::na("INT-09", "signature has no aggregation chains");
    };
    if rec.derive_chain_input_hash() != first.input_hash {
        return RuleResult::fail(
            "INT-09",
            RuleErrorCode::Rfc3161Mismatch,
            "RFC-3161 record's derived chain input hash does not match first aggregation chain's input hash",
        );
    }
    RuleResult::ok("INT-09")
}

/// `INT-10`: no aggregation chain uses an algorithm deprecated at its
/// aggregation time.
pub fn int10_aggregation_algorithm_deprecation(ctx: &VerificationContext) -> RuleResult {
    for (i, chain) in ctx.signature.aggregation_chains.iter().enumerate() {
        if !chain.aggr_algorithm.trusted_at(chain.aggregation_time) {
            return RuleResult::fail(
                "INT-10",
                RuleErrorCode::AlgorithmDeprecated,
                format!("chain {i} uses {} which is deprecated at its aggregation time", chain.aggr_algorithm),
            );
        }
    }
    RuleResult::ok("INT-10")
}

/// `INT-11`: calendar authentication record references the calendar
/// chain's root hash and publication time.
pub fn int11_calendar_auth_references_chain(ctx: &VerificationContext) -> RuleResult {
    let Some(rec) = &ctx.signature.calendar_auth_record else {
        return RuleResult::na("INT-11", "signature has no calendar authentication record");
    };
    let Some(cal) = &ctx.signature.calendar_chain else {
        return RuleResult::fail(
            "INT-11",
            RuleErrorCode::StructuralError,
            "calendar authentication record present without a calendar chain",
        );
    };
    if rec.published_data.publication_time != cal.publication_time {
        return RuleResult::fail(
            "INT-11",
            RuleErrorCode::PublicationMismatch,
            "calendar authentication record publication time does not match calendar chain",
        );
    }
    match aggregate_calendar(cal) {
        Ok(result) if result.output_hash == rec.published_data.publication_hash => RuleResult::ok("INT-11"),
        Ok(_) => RuleResult::fail(
            "INT-11",
            RuleErrorCode::PublicationMismatch,
            "calendar authentication record hash does not match calendar chain root",
        ),
        Err(e) => RuleResult::fail("INT-11", RuleErrorCode::StructuralError, e.to_string()),
    }
}

/// `GEN-07`: the caller-supplied document hash equals the first aggregation
/// chain's declared input hash (ports
/// `KSI_VerificationRule_DocumentHashVerification`). `Na` when the caller
/// supplied no document hash to check against, and likewise `Na` for an
/// RFC-3161 legacy signature — there the first chain's input hash is
/// derived from the RFC-3161 structure (checked by `INT-09`), not compared
/// directly against a caller-supplied hash.
pub fn gen07_document_hash_verification(ctx: &VerificationContext) -> RuleResult {
    let Some(doc_hash) = &ctx.document_hash else {
        return RuleResult::na("GEN-07", "no document hash supplied by caller");
    };
    if ctx.signature.rfc3161_record.is_some() {
        return RuleResult::na(
            "GEN-07",
            "signature uses RFC-3161 legacy input; document hash is not compared directly",
        );
    }
    let Some(first) = ctx.signature.aggregation_chains.first() else {
        return RuleResult::na("GEN-07", "signature has no aggregation chains");
    };
    if doc_hash != &first.input_hash {
        return RuleResult::fail(
            "GEN-07",
            RuleErrorCode::ChainHashMismatch,
            "caller-supplied document hash does not match first aggregation chain's input hash",
        );
    }
    RuleResult::ok("GEN-07")
}

/// `INT-12`: aggregation authentication record verification. The original
/// implementation never finished this rule (`spec.md` §9 Open Questions:
/// "several verification rules in the source reference unimplemented or
/// `TODO!` branches"); rather than guess at semantics and silently pass,
/// this rule reports `Na` with `RuleErrorCode::Inconclusive` whenever the
/// record is present, so a caller can distinguish "nothing to check" from
/// "this check is known-incomplete".
pub fn int12_aggregation_auth_record_verification(ctx: &VerificationContext) -> RuleResult {
    if ctx.signature.aggregation_auth_record.is_none() {
        return RuleResult::na("INT-12", "signature has no aggregation authentication record");
    }
    debug!("INT-12 aggregation authentication record verification is unimplemented upstream; reporting inconclusive");
    RuleResult {
        status: RuleStatus::Na,
        code: RuleErrorCode::Inconclusive,
        step_id: "INT-12",
        description: "aggregation authentication record verification has no specified semantics; not checked"
            .to_string(),
    }
}

/// `CAL-02`: calendar chain's declared input hash equals the root-most
/// aggregation chain's output hash.
pub fn cal02_calendar_input_matches_last_chain_output(ctx: &VerificationContext) -> RuleResult {
    let Some(cal) = &ctx.signature.calendar_chain else {
        return RuleResult::na("CAL-02", "signature has no calendar chain");
    };
    let Some(last_index) = ctx.signature.aggregation_chains.len().checked_sub(1) else {
        return RuleResult::na("CAL-02", "signature has no aggregation chains");
    };
    match chain_output(ctx, last_index) {
        Ok(result) if result.output_hash == cal.input_hash => RuleResult::ok("CAL-02"),
        Ok(_) => RuleResult::fail(
            "CAL-02",
            RuleErrorCode::ChainHashMismatch,
            "calendar chain input hash does not match last aggregation chain's output",
        ),
        Err(e) => RuleResult::fail("CAL-02", RuleErrorCode::StructuralError, e.to_string()),
    }
}

/// `CAL-03`: calendar authentication record's publication time matches the
/// calendar chain's publication time (time only, narrower than `INT-11`).
pub fn cal03_calendar_auth_time_matches(ctx: &VerificationContext) -> RuleResult {
    let Some(rec) = &ctx.signature.calendar_auth_record else {
        return RuleResult::na("CAL-03", "signature has no calendar authentication record");
    };
    let Some(cal) = &ctx.signature.calendar_chain else {
        return RuleResult::na("CAL-03", "signature has no calendar chain");
    };
    if rec.published_data.publication_time != cal.publication_time {
        return RuleResult::fail(
            "CAL-03",
            RuleErrorCode::PublicationMismatch,
            "calendar authentication record publication time does not match calendar chain",
        );
    }
    RuleResult::ok("CAL-03")
}

/// `PUB-04`: publication record's published-data equals the reconstructed
/// calendar root when both are present.
pub fn pub04_publication_record_matches_calendar_root(ctx: &VerificationContext) -> RuleResult {
    let Some(rec) = &ctx.signature.publication_record else {
        return RuleResult::na("PUB-04", "signature has no publication record");
    };
    let Some(cal) = &ctx.signature.calendar_chain else {
        return RuleResult::fail(
            "PUB-04",
            RuleErrorCode::StructuralError,
            "publication record present without a calendar chain",
        );
    };
    if rec.published_data.publication_time != cal.publication_time {
        return RuleResult::fail(
            "PUB-04",
            RuleErrorCode::PublicationMismatch,
            "publication record time does not match calendar chain",
        );
    }
    match aggregate_calendar(cal) {
        Ok(result) if result.output_hash == rec.published_data.publication_hash => RuleResult::ok("PUB-04"),
        Ok(_) => RuleResult::fail(
            "PUB-04",
            RuleErrorCode::PublicationMismatch,
            "publication record hash does not match reconstructed calendar root",
        ),
        Err(e) => RuleResult::fail("PUB-04", RuleErrorCode::StructuralError, e.to_string()),
    }
}

/// `PUBF-01`: a configured publications file is itself authentic before any
/// rule trusts a lookup against it. `KEY-01`/`KEY-02` (certificate by id) and
/// `PUB-01`..`PUB-04` (publication lookup) all read out of the file; none of
/// them re-verify its own PKI signature, so without this rule a file could
/// be swapped for an unsigned or tampered one and every lookup against it
/// would still report `Ok`. `Na` when no file is configured (nothing to
/// anchor on in that case); `Fail` — not `Na` — when a file *is* configured
/// but there is no `Pki` collaborator to check it against, since silently
/// treating that as "not applicable" is exactly the gap this rule exists to
/// close.
pub fn pubf01_publications_file_signature_verifies(ctx: &VerificationContext) -> RuleResult {
    let Some(file) = ctx.publications_file() else {
        return RuleResult::na("PUBF-01", "no publications file configured");
    };
    let Some(pki) = ctx.pki() else {
        return RuleResult::fail(
            "PUBF-01",
            RuleErrorCode::SignatureInvalid,
            "publications file configured but no PKI collaborator available to verify it",
        );
    };
    match file.verify_signature(pki) {
        Ok(()) => RuleResult::ok("PUBF-01"),
        Err(e) => RuleResult::fail("PUBF-01", RuleErrorCode::SignatureInvalid, e.to_string()),
    }
}

/// `KEY-01`: the calendar authentication record's certificate id is present
/// in the publications file.
pub fn key01_certificate_by_id_exists(ctx: &VerificationContext) -> RuleResult {
    let Some(rec) = &ctx.signature.calendar_auth_record else {
        return RuleResult::na("KEY-01", "signature has no calendar authentication record");
    };
    let CertSelector::Id(id) = &rec.cert_selector else {
        return RuleResult::na("KEY-01", "calendar authentication record does not select a certificate by id");
    };
    let Some(file) = ctx.publications_file() else {
        return RuleResult::na("KEY-01", "no publications file configured");
    };
    if file.cert_by_id(id).is_some() {
        RuleResult::ok("KEY-01")
    } else {
        RuleResult::fail("KEY-01", RuleErrorCode::CertificateNotFound, "certificate id not found in publications file")
    }
}

/// `KEY-02`: the PKI signature on `published-data` verifies under the
/// selected certificate with the declared algorithm.
pub fn key02_pki_signature_verifies(ctx: &VerificationContext) -> RuleResult {
    let Some(rec) = &ctx.signature.calendar_auth_record else {
        return RuleResult::na("KEY-02", "signature has no calendar authentication record");
    };
    let Some(pki) = ctx.pki() else {
        return RuleResult::na("KEY-02", "no PKI collaborator configured");
    };
    let cert_bytes: Vec<u8> = match &rec.cert_selector {
        CertSelector::Bytes(b) => b.clone(),
        CertSelector::Id(id) => {
            let Some(file) = ctx.publications_file() else {
                return RuleResult::na("KEY-02", "certificate selected by id but no publications file configured");
            };
            match file.cert_by_id(id) {
                Some(bytes) => bytes.to_vec(),
                None => {
                    return RuleResult::fail("KEY-02", RuleErrorCode::CertificateNotFound, "certificate id not found");
                }
            }
        }
        CertSelector::RepositoryUri(_) => {
            return RuleResult::na("KEY-02", "certificate selected by repository URI requires network transport");
        }
    };
    match pki.verify(&rec.sig_algo, &rec.sig_value, &rec.published_data.raw_encoding, &[cert_bytes.as_slice()]) {
        Ok(()) => RuleResult::ok("KEY-02"),
        Err(e) => RuleResult::fail("KEY-02", RuleErrorCode::SignatureInvalid, e.to_string()),
    }
}

/// `KEY-03`: certificate validity covers the aggregation time. Certificate
/// parsing is explicitly out of scope for this core (`spec.md` §1); the
/// validity window is expected to be enforced by the `Pki` collaborator's
/// own verify step (`KEY-02`), so this rule is always `NA` here. Kept as a
/// named step so a policy trace still shows where the original rule set
/// places this check.
pub fn key03_certificate_validity_period(_ctx: &VerificationContext) -> RuleResult {
    debug!("KEY-03 delegated entirely to the PKI collaborator; no certificate parsing in this core");
    RuleResult::na("KEY-03", "certificate validity periods are not parsed by this core")
}

/// `PUB-01`: publications file contains a publication record whose hash
/// equals the signature's own publication record.
pub fn pub01_publication_record_in_file(ctx: &VerificationContext) -> RuleResult {
    let Some(sig_pub) = &ctx.signature.publication_record else {
        return RuleResult::na("PUB-01", "signature has no publication record");
    };
    let Some(file) = ctx.publications_file() else {
        return RuleResult::na("PUB-01", "no publications file configured");
    };
    let found = file.publications.iter().any(|p| {
        p.published_data.publication_time == sig_pub.published_data.publication_time
            && p.published_data.publication_hash == sig_pub.published_data.publication_hash
    });
    if found {
        RuleResult::ok("PUB-01")
    } else {
        RuleResult::fail("PUB-01", RuleErrorCode::PublicationNotFound, "signature's publication record not found in publications file")
    }
}

/// `PUB-02`: publications file has a publication at or after the
/// signature's aggregation time, and extending to reach it (if needed) is
/// permitted.
pub fn pub02_publication_available_for_extension(ctx: &VerificationContext) -> RuleResult {
    let Some(last) = ctx.signature.aggregation_chains.last() else {
        return RuleResult::na("PUB-02", "signature has no aggregation chains");
    };
    let Some(file) = ctx.publications_file() else {
        return RuleResult::na("PUB-02", "no publications file configured");
    };
    let Some(candidate) = file.publication_after(last.aggregation_time) else {
        return RuleResult::fail("PUB-02", RuleErrorCode::PublicationNotFound, "no publication at or after signature's aggregation time");
    };
    let needs_extending = ctx
        .signature
        .calendar_chain
        .as_ref()
        .map(|c| c.publication_time != candidate.published_data.publication_time)
        .unwrap_or(true);
    if needs_extending && !ctx.allow_extending {
        return RuleResult::fail("PUB-02", RuleErrorCode::ExtensionNotPermitted, "extending required to reach candidate publication but not permitted");
    }
    RuleResult::ok("PUB-02")
}

/// `PUB-03`: the extended calendar chain hashes to the candidate
/// publication's hash.
pub fn pub03_extended_chain_matches_publication(ctx: &VerificationContext) -> RuleResult {
    let Some(last) = ctx.signature.aggregation_chains.last() else {
        return RuleResult::na("PUB-03", "signature has no aggregation chains");
    };
    let Some(file) = ctx.publications_file() else {
        return RuleResult::na("PUB-03", "no publications file configured");
    };
    let Some(candidate) = file.publication_after(last.aggregation_time) else {
        return RuleResult::na("PUB-03", "no candidate publication to extend to");
    };
    if !ctx.allow_extending {
        return RuleResult::na("PUB-03", "extending not permitted for this context");
    }
    let extended = match ctx.extend(last.aggregation_time, Some(candidate.published_data.publication_time)) {
        Ok(chain) => chain,
        Err(e) => return RuleResult::fail("PUB-03", RuleErrorCode::NetworkError, e.to_string()),
    };
    match aggregate_calendar(&extended) {
        Ok(result) if result.output_hash == candidate.published_data.publication_hash => RuleResult::ok("PUB-03"),
        Ok(_) => RuleResult::fail("PUB-03", RuleErrorCode::PublicationMismatch, "extended calendar chain does not hash to candidate publication"),
        Err(e) => RuleResult::fail("PUB-03", RuleErrorCode::StructuralError, e.to_string()),
    }
}

/// `USER-01`: the user-supplied publication's time/hash matches the
/// signature, extending to reach it if necessary and permitted.
pub fn user01_user_publication_matches(ctx: &VerificationContext) -> RuleResult {
    let Some(user_pub) = &ctx.user_publication else {
        return RuleResult::na("USER-01", "no user-provided publication configured");
    };
    let Some(last) = ctx.signature.aggregation_chains.last() else {
        return RuleResult::na("USER-01", "signature has no aggregation chains");
    };

    if let Some(cal) = &ctx.signature.calendar_chain {
        if cal.publication_time == user_pub.publication_time {
            return match aggregate_calendar(cal) {
                Ok(result) if result.output_hash == user_pub.publication_hash => RuleResult::ok("USER-01"),
                Ok(_) => RuleResult::fail("USER-01", RuleErrorCode::UserPublicationMismatch, "calendar chain does not hash to user-provided publication"),
                Err(e) => RuleResult::fail("USER-01", RuleErrorCode::StructuralError, e.to_string()),
            };
        }
    }

    if !ctx.allow_extending {
        return RuleResult::fail("USER-01", RuleErrorCode::ExtensionNotPermitted, "extending required to reach user-provided publication but not permitted");
    }
    let extended = match ctx.extend(last.aggregation_time, Some(user_pub.publication_time)) {
        Ok(chain) => chain,
        Err(e) => return RuleResult::fail("USER-01", RuleErrorCode::NetworkError, e.to_string()),
    };
    match aggregate_calendar(&extended) {
        Ok(result) if result.output_hash == user_pub.publication_hash => RuleResult::ok("USER-01"),
        Ok(_) => RuleResult::fail("USER-01", RuleErrorCode::UserPublicationMismatch, "extended calendar chain does not hash to user-provided publication"),
        Err(e) => RuleResult::fail("USER-01", RuleErrorCode::StructuralError, e.to_string()),
    }
}

/// `CAL-01`: the extender's calendar chain right-links match the
/// signature's existing right-links, guarding against an extender
/// substituting a different calendar root for the same time.
pub fn cal01_extender_matches_existing_right_links(ctx: &VerificationContext) -> RuleResult {
    let Some(existing) = &ctx.signature.calendar_chain else {
        return RuleResult::na("CAL-01", "signature has no calendar chain");
    };
    let extended = match ctx.extend(existing.aggregation_time, None) {
        Ok(chain) => chain,
        Err(e) => return RuleResult::fail("CAL-01", RuleErrorCode::NetworkError, e.to_string()),
    };
    let existing_rights: Vec<_> = existing.links.iter().filter(|l| l.direction == Direction::Right).collect();
    let extended_rights: Vec<_> = extended.links.iter().filter(|l| l.direction == Direction::Right).collect();
    if existing_rights.len() > extended_rights.len() {
        return RuleResult::fail("CAL-01", RuleErrorCode::ExtenderSubstitution, "extender returned fewer right links than the signature already has");
    }
    let matches = existing_rights
        .iter()
        .zip(extended_rights.iter())
        .all(|(a, b)| a.combine_bytes() == b.combine_bytes());
    if matches {
        RuleResult::ok("CAL-01")
    } else {
        RuleResult::fail("CAL-01", RuleErrorCode::ExtenderSubstitution, "extender's calendar chain right links diverge from the signature's")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ksi_imprint::{hash_imprint, HashAlgorithm};
    use ksi_signature::{AggregationChain, HashChainLink, LinkContent, Signature};

    struct AlwaysOkPki;
    impl ksi_pubfile::Pki for AlwaysOkPki {
        fn verify(&self, _: &str, _: &[u8], _: &[u8], _: &[&[u8]]) -> Result<(), ksi_pubfile::PkiError> {
            Ok(())
        }
    }

    struct AlwaysRejectPki;
    impl ksi_pubfile::Pki for AlwaysRejectPki {
        fn verify(&self, _: &str, _: &[u8], _: &[u8], _: &[&[u8]]) -> Result<(), ksi_pubfile::PkiError> {
            Err(ksi_pubfile::PkiError("rejected by test double".into()))
        }
    }

    fn sample_publications_file() -> ksi_pubfile::PublicationsFile {
        let sig_tlv = ksi_tlv::Tlv::new_nested(
            0x0704,
            false,
            false,
            &[
                ksi_tlv::Tlv::new_utf8(0x01, false, false, "RSA-SHA256"),
                ksi_tlv::Tlv::new_raw(0x02, false, false, vec![9, 9, 9]),
            ],
        );
        let mut bytes = ksi_pubfile::PUBLICATIONS_FILE_MAGIC.to_vec();
        bytes.extend(sig_tlv.encode());
        ksi_pubfile::PublicationsFile::parse(&bytes).unwrap()
    }

    fn single_chain_signature(time: u64, sibling_seed: &[u8]) -> Signature {
        let agg = AggregationChain::new(
            time,
            vec![1],
            hash_imprint(HashAlgorithm::Sha256, b"doc"),
            None,
            HashAlgorithm::Sha256,
            vec![HashChainLink {
                direction: Direction::Left,
                level_correction: 0,
                content: LinkContent::Sibling(hash_imprint(HashAlgorithm::Sha256, sibling_seed)),
            }],
        )
        .unwrap();
        let tlv = ksi_tlv::Tlv::new_nested(ksi_signature::TAG_SIGNATURE, false, false, &[agg.to_tlv().unwrap()]);
        Signature::parse(&tlv.encode()).unwrap()
    }

    #[test]
    fn gen01_passes_on_single_chain() {
        let ctx = VerificationContext::new(single_chain_signature(1, b"s"));
        assert_eq!(gen01_chain_hash_consistency(&ctx).status, RuleStatus::Ok);
    }

    #[test]
    fn gen04_is_na_without_calendar_chain() {
        let ctx = VerificationContext::new(single_chain_signature(1, b"s"));
        assert_eq!(gen04_calendar_time_matches_last_chain(&ctx).status, RuleStatus::Na);
    }

    #[test]
    fn int10_fails_for_deprecated_algorithm_past_cutover() {
        let agg = AggregationChain::new(
            2_000_000_000,
            vec![1],
            hash_imprint(HashAlgorithm::Sha1, b"doc"),
            None,
            HashAlgorithm::Sha1,
            vec![HashChainLink {
                direction: Direction::Left,
                level_correction: 0,
                content: LinkContent::Sibling(hash_imprint(HashAlgorithm::Sha1, b"s")),
            }],
        )
        .unwrap();
        let tlv = ksi_tlv::Tlv::new_nested(ksi_signature::TAG_SIGNATURE, false, false, &[agg.to_tlv().unwrap()]);
        let sig = Signature::parse(&tlv.encode()).unwrap();
        let ctx = VerificationContext::new(sig);
        let result = int10_aggregation_algorithm_deprecation(&ctx);
        assert_eq!(result.status, RuleStatus::Fail);
        assert_eq!(result.code, RuleErrorCode::AlgorithmDeprecated);
    }

    #[test]
    fn key03_is_always_na() {
        let ctx = VerificationContext::new(single_chain_signature(1, b"s"));
        assert_eq!(key03_certificate_validity_period(&ctx).status, RuleStatus::Na);
    }

    #[test]
    fn gen07_is_na_without_document_hash() {
        let ctx = VerificationContext::new(single_chain_signature(1, b"s"));
        assert_eq!(gen07_document_hash_verification(&ctx).status, RuleStatus::Na);
    }

    #[test]
    fn gen07_passes_when_document_hash_matches() {
        let ctx = VerificationContext::new(single_chain_signature(1, b"s"))
            .with_document_hash(hash_imprint(HashAlgorithm::Sha256, b"doc"));
        assert_eq!(gen07_document_hash_verification(&ctx).status, RuleStatus::Ok);
    }

    #[test]
    fn gen07_fails_when_document_hash_diverges() {
        let ctx = VerificationContext::new(single_chain_signature(1, b"s"))
            .with_document_hash(hash_imprint(HashAlgorithm::Sha256, b"not the document"));
        let result = gen07_document_hash_verification(&ctx);
        assert_eq!(result.status, RuleStatus::Fail);
        assert_eq!(result.code, RuleErrorCode::ChainHashMismatch);
    }

    fn signature_with_rfc3161_record(rec: ksi_signature::Rfc3161Record, first_chain_input: ksi_imprint::Imprint) -> Signature {
        let agg = AggregationChain::new(
            rec.aggregation_time,
            vec![1],
            first_chain_input,
            None,
            HashAlgorithm::Sha256,
            vec![HashChainLink {
                direction: Direction::Left,
                level_correction: 0,
                content: LinkContent::Sibling(hash_imprint(HashAlgorithm::Sha256, b"s")),
            }],
        )
        .unwrap();
        let tlv = ksi_tlv::Tlv::new_nested(
            ksi_signature::TAG_SIGNATURE,
            false,
            false,
            &[agg.to_tlv().unwrap(), rec.to_tlv()],
        );
        Signature::parse(&tlv.encode()).unwrap()
    }

    fn sample_rfc3161_record() -> ksi_signature::Rfc3161Record {
        ksi_signature::Rfc3161Record {
            aggregation_time: 1,
            tst_info_prefix: vec![1, 2],
            tst_info_suffix: vec![3, 4],
            signed_attr_prefix: vec![5],
            signed_attr_suffix: vec![6],
            digest_algorithm: HashAlgorithm::Sha256,
            input_hash: hash_imprint(HashAlgorithm::Sha256, b"doc"),
        }
    }

    #[test]
    fn int09_passes_when_first_chain_matches_derived_hash() {
        let rec = sample_rfc3161_record();
        let ctx = VerificationContext::new(signature_with_rfc3161_record(rec.clone(), rec.derive_chain_input_hash()));
        assert_eq!(int09_rfc3161_output_matches_first_chain(&ctx).status, RuleStatus::Ok);
    }

    #[test]
    fn int09_fails_when_raw_input_hash_matches_but_derivation_does_not() {
        let rec = sample_rfc3161_record();
        // rec.input_hash equals first chain's input hash directly, but the
        // actual combination over prefix/suffix bytes derives to something
        // else — this is exactly the bypass the fix closes.
        let ctx = VerificationContext::new(signature_with_rfc3161_record(rec.clone(), rec.input_hash.clone()));
        let result = int09_rfc3161_output_matches_first_chain(&ctx);
        assert_eq!(result.status, RuleStatus::Fail);
        assert_eq!(result.code, RuleErrorCode::Rfc3161Mismatch);
    }

    #[test]
    fn int12_is_na_without_aggregation_auth_record() {
        let ctx = VerificationContext::new(single_chain_signature(1, b"s"));
        assert_eq!(int12_aggregation_auth_record_verification(&ctx).status, RuleStatus::Na);
    }

    #[test]
    fn pubf01_is_na_without_publications_file() {
        let ctx = VerificationContext::new(single_chain_signature(1, b"s"));
        assert_eq!(pubf01_publications_file_signature_verifies(&ctx).status, RuleStatus::Na);
    }

    #[test]
    fn pubf01_fails_when_file_configured_without_pki() {
        let file = sample_publications_file();
        let ctx = VerificationContext::new(single_chain_signature(1, b"s")).with_publications_file(file);
        let result = pubf01_publications_file_signature_verifies(&ctx);
        assert_eq!(result.status, RuleStatus::Fail);
        assert_eq!(result.code, RuleErrorCode::SignatureInvalid);
    }

    #[test]
    fn pubf01_passes_when_pki_verifies_file() {
        let file = sample_publications_file();
        let ctx = VerificationContext::new(single_chain_signature(1, b"s"))
            .with_publications_file(file)
            .with_pki(AlwaysOkPki);
        assert_eq!(pubf01_publications_file_signature_verifies(&ctx).status, RuleStatus::Ok);
    }

    #[test]
    fn pubf01_fails_when_pki_rejects_file() {
        let file = sample_publications_file();
        let ctx = VerificationContext::new(single_chain_signature(1, b"s"))
            .with_publications_file(file)
            .with_pki(AlwaysRejectPki);
        let result = pubf01_publications_file_signature_verifies(&ctx);
        assert_eq!(result.status, RuleStatus::Fail);
        assert_eq!(result.code, RuleErrorCode::SignatureInvalid);
    }

    #[test]
    fn int12_reports_inconclusive_when_record_present() {
        let agg = AggregationChain::new(
            1,
            vec![1],
            hash_imprint(HashAlgorithm::Sha256, b"doc"),
            None,
            HashAlgorithm::Sha256,
            vec![HashChainLink {
                direction: Direction::Left,
                level_correction: 0,
                content: LinkContent::Sibling(hash_imprint(HashAlgorithm::Sha256, b"s")),
            }],
        )
        .unwrap();
        let aggr_auth = ksi_signature::AggregationAuthenticationRecord {
            signature_type: "RSA-SHA256".into(),
            signature_value: vec![1, 2, 3],
        };
        let tlv = ksi_tlv::Tlv::new_nested(
            ksi_signature::TAG_SIGNATURE,
            false,
            false,
            &[agg.to_tlv().unwrap(), aggr_auth.to_tlv()],
        );
        let sig = Signature::parse(&tlv.encode()).unwrap();
        let ctx = VerificationContext::new(sig);
        let result = int12_aggregation_auth_record_verification(&ctx);
        assert_eq!(result.status, RuleStatus::Na);
        assert_eq!(result.code, RuleErrorCode::Inconclusive);
    }
}
