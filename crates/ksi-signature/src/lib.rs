//! Typed object graph for a KSI signature and its TLV (de)serialization.
//!
//! A signature is a container TLV holding one or more aggregation chains,
//! an optional calendar chain, and a choice of trust anchor (a publication
//! record, a calendar authentication record, or an aggregator
//! authentication record). This mirrors `receipts::lib`'s pattern of a
//! thin top-level struct assembled from sibling modules, each owning one
//! part of the wire format.

pub mod chain;
pub mod records;

pub use chain::{
    AggregationChain, CalendarChain, ChainFormatError, Direction, HashChainLink, LinkContent,
    LinkMetadata,
};
pub use records::{
    AggregationAuthenticationRecord, CalendarAuthenticationRecord, CertSelector,
    PublicationRecord, PublishedData, RecordFormatError, Rfc3161Record,
};

use ksi_tlv::{Template, TemplateEntry, Tlv};
use thiserror::Error;

pub const TAG_SIGNATURE: u16 = 0x0800;
pub const TAG_AGGREGATION_CHAIN: u16 = 0x0801;
pub const TAG_CALENDAR_CHAIN: u16 = 0x0802;
pub const TAG_PUBLICATION_RECORD: u16 = 0x0803;
pub const TAG_AGGR_AUTH_RECORD: u16 = 0x0804;
pub const TAG_CALENDAR_AUTH_RECORD: u16 = 0x0805;
pub const TAG_RFC3161_RECORD: u16 = 0x0806;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("TLV error: {0}")]
    Tlv(#[from] ksi_tlv::TlvError),
    #[error("{0}")]
    Chain(#[from] ChainFormatError),
    #[error("{0}")]
    Record(#[from] RecordFormatError),
    #[error("top level TLV tag 0x{0:x} is not a KSI signature")]
    NotASignature(u16),
    #[error("signature must contain at least one aggregation chain")]
    NoAggregationChains,
    #[error("signature carries a publication record but no calendar chain")]
    PublicationWithoutCalendarChain,
}

/// A parsed KSI signature. `base_tlv` retains the original container's
/// flags and any unrecognized-but-forwarded elements so a re-serialize
/// that touches nothing reproduces the exact input bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    base_tlv: Tlv,
    pub aggregation_chains: Vec<AggregationChain>,
    pub calendar_chain: Option<CalendarChain>,
    pub calendar_auth_record: Option<CalendarAuthenticationRecord>,
    pub aggregation_auth_record: Option<AggregationAuthenticationRecord>,
    pub rfc3161_record: Option<Rfc3161Record>,
    pub publication_record: Option<PublicationRecord>,
}

impl Signature {
    const TEMPLATE: Template = Template {
        entries: &[
            TemplateEntry::many(TAG_AGGREGATION_CHAIN, "aggregation_chain"),
            TemplateEntry::optional(TAG_CALENDAR_CHAIN, "calendar_chain"),
            TemplateEntry::optional(TAG_PUBLICATION_RECORD, "publication_record"),
            TemplateEntry::optional(TAG_AGGR_AUTH_RECORD, "aggregation_auth_record"),
            TemplateEntry::optional(TAG_CALENDAR_AUTH_RECORD, "calendar_auth_record"),
            TemplateEntry::optional(TAG_RFC3161_RECORD, "rfc3161_record"),
        ],
        lenient: false,
        forward_unknown: false,
    };

    pub fn parse(bytes: &[u8]) -> Result<Self, SignatureError> {
        let (tlv, consumed) = ksi_tlv::parse_one(bytes)?;
        if consumed != bytes.len() {
            return Err(SignatureError::Tlv(ksi_tlv::TlvError::InvalidFormat(
                "trailing bytes after signature".into(),
            )));
        }
        Self::from_tlv(tlv)
    }

    fn from_tlv(tlv: Tlv) -> Result<Self, SignatureError> {
        if tlv.tag != TAG_SIGNATURE {
            return Err(SignatureError::NotASignature(tlv.tag));
        }
        let children = tlv.as_nested()?;
        let decoded = Self::TEMPLATE.decode(&children)?;

        let aggregation_chains = decoded
            .many(TAG_AGGREGATION_CHAIN)
            .iter()
            .map(AggregationChain::from_tlv)
            .collect::<Result<Vec<_>, _>>()?;
        let calendar_chain = decoded.one(TAG_CALENDAR_CHAIN).map(CalendarChain::from_tlv).transpose()?;
        let publication_record = decoded.one(TAG_PUBLICATION_RECORD).map(PublicationRecord::from_tlv).transpose()?;
        let aggregation_auth_record = decoded
            .one(TAG_AGGR_AUTH_RECORD)
            .map(AggregationAuthenticationRecord::from_tlv)
            .transpose()?;
        let calendar_auth_record = decoded
            .one(TAG_CALENDAR_AUTH_RECORD)
            .map(CalendarAuthenticationRecord::from_tlv)
            .transpose()?;
        let rfc3161_record = decoded.one(TAG_RFC3161_RECORD).map(Rfc3161Record::from_tlv).transpose()?;

        if aggregation_chains.is_empty() {
            return Err(SignatureError::NoAggregationChains);
        }
        if publication_record.is_some() && calendar_chain.is_none() {
            return Err(SignatureError::PublicationWithoutCalendarChain);
        }

        Ok(Self {
            base_tlv: tlv,
            aggregation_chains,
            calendar_chain,
            calendar_auth_record,
            aggregation_auth_record,
            rfc3161_record,
            publication_record,
        })
    }

    /// Verbatim re-serialization: the original bytes, unless the calendar
    /// chain has been swapped via [`Signature::with_extended_calendar`], in
    /// which case only that subtree is rebuilt and everything else
    /// (including unrecognized forwarded elements) is carried over
    /// untouched.
    pub fn serialize(&self) -> Vec<u8> {
        self.base_tlv.encode()
    }

    pub fn base_tlv(&self) -> &Tlv {
        &self.base_tlv
    }

    /// Replace the calendar chain, rebuilding only that part of the
    /// container. Used by the extend-to-publication path (`spec.md` §5,
    /// `Extender`), which never touches aggregation chains or records.
    pub fn with_extended_calendar(&self, new_chain: CalendarChain) -> Result<Self, SignatureError> {
        let new_calendar_tlv = new_chain.to_tlv()?;
        let mut children: Vec<Tlv> = self
            .base_tlv
            .as_nested()?
            .into_iter()
            .filter(|c| c.tag != TAG_CALENDAR_CHAIN)
            .collect();
        children.push(new_calendar_tlv);
        let rebuilt = Tlv::new_nested(
            TAG_SIGNATURE,
            self.base_tlv.non_critical,
            self.base_tlv.forward,
            &children,
        );
        let mut out = self.clone();
        out.calendar_chain = Some(new_chain);
        out.base_tlv = rebuilt;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ksi_imprint::{hash_imprint, HashAlgorithm};

    fn sample_aggregation_chain() -> AggregationChain {
        AggregationChain::new(
            1_700_000_000,
            vec![1],
            hash_imprint(HashAlgorithm::Sha256, b"document"),
            None,
            HashAlgorithm::Sha256,
            vec![HashChainLink {
                direction: Direction::Left,
                level_correction: 0,
                content: LinkContent::Sibling(hash_imprint(HashAlgorithm::Sha256, b"sibling")),
            }],
        )
        .unwrap()
    }

    fn build_signature(with_publication: bool) -> Signature {
        let agg = sample_aggregation_chain();
        let cal = CalendarChain {
            aggregation_time: 1_700_000_000,
            publication_time: 1_700_003_600,
            input_hash: hash_imprint(HashAlgorithm::Sha256, b"aggregator-root"),
            links: vec![HashChainLink {
                direction: Direction::Right,
                level_correction: 0,
                content: LinkContent::Sibling(hash_imprint(HashAlgorithm::Sha256, b"cal-sibling")),
            }],
        };
        let mut children = vec![agg.to_tlv().unwrap(), cal.to_tlv().unwrap()];
        if with_publication {
            let published_data = PublishedData {
                publication_time: 1_700_003_600,
                publication_hash: hash_imprint(HashAlgorithm::Sha256, b"published-root"),
                raw_encoding: Vec::new(),
            };
            let rec = PublicationRecord {
                published_data,
                refs: vec!["https://example.test/pub".into()],
            };
            children.push(rec.to_tlv());
        }
        let tlv = Tlv::new_nested(TAG_SIGNATURE, false, false, &children);
        Signature::from_tlv(tlv).unwrap()
    }

    #[test]
    fn parses_minimal_signature_with_one_aggregation_chain() {
        let sig = build_signature(false);
        assert_eq!(sig.aggregation_chains.len(), 1);
        assert!(sig.calendar_chain.is_some());
        assert!(sig.publication_record.is_none());
    }

    #[test]
    fn round_trips_through_serialize_and_parse() {
        let sig = build_signature(true);
        let bytes = sig.serialize();
        let parsed = Signature::parse(&bytes).unwrap();
        assert_eq!(parsed, sig);
    }

    #[test]
    fn rejects_zero_aggregation_chains() {
        let tlv = Tlv::new_nested(TAG_SIGNATURE, false, false, &[]);
        let err = Signature::from_tlv(tlv).unwrap_err();
        assert_eq!(err, SignatureError::NoAggregationChains);
    }

    #[test]
    fn rejects_publication_without_calendar_chain() {
        let agg = sample_aggregation_chain();
        let published_data = PublishedData {
            publication_time: 1,
            publication_hash: hash_imprint(HashAlgorithm::Sha256, b"x"),
            raw_encoding: Vec::new(),
        };
        let rec = PublicationRecord {
            published_data,
            refs: vec![],
        };
        let tlv = Tlv::new_nested(TAG_SIGNATURE, false, false, &[agg.to_tlv().unwrap(), rec.to_tlv()]);
        let err = Signature::from_tlv(tlv).unwrap_err();
        assert_eq!(err, SignatureError::PublicationWithoutCalendarChain);
    }

    #[test]
    fn rejects_unknown_critical_child_tag() {
        let agg = sample_aggregation_chain();
        let unknown = Tlv::new_raw(0x0899, false, false, vec![1]);
        let tlv = Tlv::new_nested(TAG_SIGNATURE, false, false, &[agg.to_tlv().unwrap(), unknown]);
        let err = Signature::from_tlv(tlv).unwrap_err();
        assert_eq!(err, SignatureError::Tlv(ksi_tlv::TlvError::UnknownCriticalTag(0x0899)));
    }

    #[test]
    fn drops_unknown_non_critical_child_tag() {
        let agg = sample_aggregation_chain();
        let unknown = Tlv::new_raw(0x0899, true, false, vec![1]);
        let tlv = Tlv::new_nested(TAG_SIGNATURE, false, false, &[agg.to_tlv().unwrap(), unknown]);
        let sig = Signature::from_tlv(tlv).unwrap();
        assert_eq!(sig.aggregation_chains.len(), 1);
    }

    #[test]
    fn with_extended_calendar_preserves_everything_else() {
        let sig = build_signature(true);
        let new_cal = CalendarChain {
            aggregation_time: 1_700_000_000,
            publication_time: 1_800_000_000,
            input_hash: hash_imprint(HashAlgorithm::Sha256, b"aggregator-root"),
            links: vec![HashChainLink {
                direction: Direction::Left,
                level_correction: 0,
                content: LinkContent::Sibling(hash_imprint(HashAlgorithm::Sha256, b"new-sibling")),
            }],
        };
        let extended = sig.with_extended_calendar(new_cal.clone()).unwrap();
        assert_eq!(extended.calendar_chain, Some(new_cal));
        assert_eq!(extended.aggregation_chains, sig.aggregation_chains);
        assert_eq!(extended.publication_record, sig.publication_record);
    }
}
