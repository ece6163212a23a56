//! Hash-chain link and chain container types.
//!
//! These are pure data — the aggregation arithmetic that walks a chain's
//! links lives in `ksi-hashchain`, which depends on this crate the way
//! `bpi-merkle`'s tree/proof types are walked by the proof-verification
//! loop that sits right next to them.

use ksi_imprint::{HashAlgorithm, Imprint, ImprintError};
use ksi_tlv::{Template, TemplateEntry, Tlv, TlvError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tags shared between aggregation chains and calendar chains (`spec.md` §6).
pub const TAG_LEVEL_CORRECTION: u16 = 0x01;
pub const TAG_SIBLING: u16 = 0x02;
pub const TAG_METADATA: u16 = 0x03;
pub const TAG_LEFT_LINK: u16 = 0x07;
pub const TAG_RIGHT_LINK: u16 = 0x08;

pub const TAG_AGGR_TIME: u16 = 0x02;
pub const TAG_CHAIN_INDEX: u16 = 0x03;
pub const TAG_INPUT_DATA: u16 = 0x04;
pub const TAG_INPUT_HASH: u16 = 0x05;
pub const TAG_AGGR_ALGO: u16 = 0x06;

pub const TAG_CAL_PUB_TIME: u16 = 0x01;
pub const TAG_CAL_AGGR_TIME: u16 = 0x02;
pub const TAG_CAL_INPUT_HASH: u16 = 0x05;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainFormatError {
    #[error("TLV error: {0}")]
    Tlv(#[from] TlvError),
    #[error("imprint error: {0}")]
    Imprint(#[from] ImprintError),
    #[error("hash chain link must carry exactly one of sibling or metadata, got {0}")]
    LinkAmbiguous(&'static str),
    #[error("aggregation chain must have at least one hash chain link")]
    EmptyLinks,
    #[error("aggregation chain index must not be empty")]
    EmptyChainIndex,
    #[error("level correction {0} out of range for one byte")]
    LevelCorrectionRange(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Left,
    Right,
}

/// Metadata record used in place of a raw sibling imprint. Its canonical
/// encoding is prefixed with [`LinkMetadata::DISAMBIGUATION_MARKER`], a byte
/// outside the set of registered algorithm ids, so a metadata payload can
/// never be mistaken for an imprint (P6 in `spec.md` §8).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkMetadata {
    pub client_id: String,
    pub machine_id: Option<String>,
    pub sequence_nr: Option<u64>,
    pub request_time: Option<u64>,
    /// Padding bytes; a non-empty padding is what the original format uses
    /// to push the encoded length away from any plausible imprint length.
    pub padding: Vec<u8>,
}

impl LinkMetadata {
    /// Not a valid `HashAlgorithm` id (`ksi-imprint` only registers
    /// 0x00/0x01/0x04/0x05), so `Imprint::from_bytes` can never succeed on
    /// a metadata encoding.
    pub const DISAMBIGUATION_MARKER: u8 = 0xff;

    const TAG_CLIENT_ID: u16 = 0x01;
    const TAG_MACHINE_ID: u16 = 0x02;
    const TAG_SEQUENCE_NR: u16 = 0x03;
    const TAG_REQUEST_TIME: u16 = 0x04;
    const TAG_PADDING: u16 = 0x1e;

    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut children = vec![Tlv::new_utf8(Self::TAG_CLIENT_ID, false, false, &self.client_id)];
        if let Some(m) = &self.machine_id {
            children.push(Tlv::new_utf8(Self::TAG_MACHINE_ID, false, false, m));
        }
        if let Some(s) = self.sequence_nr {
            children.push(Tlv::new_uint(Self::TAG_SEQUENCE_NR, false, false, s));
        }
        if let Some(t) = self.request_time {
            children.push(Tlv::new_uint(Self::TAG_REQUEST_TIME, false, false, t));
        }
        if !self.padding.is_empty() {
            children.push(Tlv::new_raw(
                Self::TAG_PADDING,
                true,
                false,
                self.padding.clone(),
            ));
        }
        let mut out = vec![Self::DISAMBIGUATION_MARKER];
        out.extend(ksi_tlv::encode_sequence(&children));
        out
    }

    fn decode(raw: &[u8]) -> Result<Self, ChainFormatError> {
        let (marker, body) = raw
            .split_first()
            .ok_or_else(|| ChainFormatError::Tlv(TlvError::InvalidFormat("empty metadata".into())))?;
        if *marker != Self::DISAMBIGUATION_MARKER {
            return Err(ChainFormatError::Tlv(TlvError::InvalidFormat(
                "metadata missing disambiguation marker".into(),
            )));
        }
        let children = ksi_tlv::parse_sequence(body)?;
        let mut client_id = None;
        let mut machine_id = None;
        let mut sequence_nr = None;
        let mut request_time = None;
        let mut padding = Vec::new();
        for c in &children {
            match c.tag {
                t if t == Self::TAG_CLIENT_ID => client_id = Some(c.as_utf8()?),
                t if t == Self::TAG_MACHINE_ID => machine_id = Some(c.as_utf8()?),
                t if t == Self::TAG_SEQUENCE_NR => sequence_nr = Some(c.as_uint()?),
                t if t == Self::TAG_REQUEST_TIME => request_time = Some(c.as_uint()?),
                t if t == Self::TAG_PADDING => padding = c.as_raw().to_vec(),
                _ => {}
            }
        }
        let client_id = client_id
            .ok_or_else(|| ChainFormatError::Tlv(TlvError::InvalidFormat("metadata missing client id".into())))?;
        Ok(Self {
            client_id,
            machine_id,
            sequence_nr,
            request_time,
            padding,
        })
    }

    /// Invariant checked by rule `INT-05` (`AggregationChainMetaDataVerification`):
    /// padding must be present and the canonical encoding must not be
    /// byte-parseable as an imprint.
    pub fn has_valid_padding(&self) -> bool {
        !self.padding.is_empty() && Imprint::from_bytes(&self.canonical_bytes()).is_err()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkContent {
    Sibling(Imprint),
    Metadata(LinkMetadata),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashChainLink {
    pub direction: Direction,
    pub level_correction: u8,
    pub content: LinkContent,
}

impl HashChainLink {
    /// The bytes combined with the running hash for this link: the sibling
    /// imprint's wire bytes, or the metadata's canonical encoding.
    pub fn combine_bytes(&self) -> Vec<u8> {
        match &self.content {
            LinkContent::Sibling(imprint) => imprint.to_bytes(),
            LinkContent::Metadata(meta) => meta.canonical_bytes(),
        }
    }

    pub fn to_tlv(&self) -> Result<Tlv, ChainFormatError> {
        let level = Tlv::new_uint(TAG_LEVEL_CORRECTION, false, false, self.level_correction as u64);
        let content = match &self.content {
            LinkContent::Sibling(imprint) => {
                Tlv::new_raw(TAG_SIBLING, false, false, imprint.to_bytes())
            }
            LinkContent::Metadata(meta) => {
                Tlv::new_raw(TAG_METADATA, true, true, meta.canonical_bytes())
            }
        };
        let tag = match self.direction {
            Direction::Left => TAG_LEFT_LINK,
            Direction::Right => TAG_RIGHT_LINK,
        };
        Ok(Tlv::new_nested(tag, false, false, &[level, content]))
    }

    const TEMPLATE: Template = Template {
        entries: &[
            TemplateEntry::optional(TAG_LEVEL_CORRECTION, "level_correction"),
            TemplateEntry::optional(TAG_SIBLING, "sibling"),
            TemplateEntry::optional(TAG_METADATA, "metadata"),
        ],
        lenient: false,
        forward_unknown: false,
    };

    pub fn from_tlv(tlv: &Tlv) -> Result<Self, ChainFormatError> {
        let direction = match tlv.tag {
            t if t == TAG_LEFT_LINK => Direction::Left,
            t if t == TAG_RIGHT_LINK => Direction::Right,
            other => {
                return Err(ChainFormatError::Tlv(TlvError::InvalidFormat(format!(
                    "tag 0x{other:x} is not a hash chain link"
                ))))
            }
        };
        let children = tlv.as_nested()?;
        let decoded = Self::TEMPLATE.decode(&children)?;

        let level_correction = match decoded.one(TAG_LEVEL_CORRECTION) {
            Some(c) => {
                let v = c.as_uint()?;
                if v > u8::MAX as u64 {
                    return Err(ChainFormatError::LevelCorrectionRange(v));
                }
                v as u8
            }
            None => 0,
        };
        let sibling = decoded
            .one(TAG_SIBLING)
            .map(|c| Imprint::from_bytes(c.as_raw()))
            .transpose()?;
        let metadata = decoded
            .one(TAG_METADATA)
            .map(|c| LinkMetadata::decode(c.as_raw()))
            .transpose()?;
        let content = match (sibling, metadata) {
            (Some(s), None) => LinkContent::Sibling(s),
            (None, Some(m)) => LinkContent::Metadata(m),
            (Some(_), Some(_)) => return Err(ChainFormatError::LinkAmbiguous("both present")),
            (None, None) => return Err(ChainFormatError::LinkAmbiguous("neither present")),
        };
        Ok(Self {
            direction,
            level_correction,
            content,
        })
    }
}

/// Merkle path from a document hash leaf to one per-round aggregator root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationChain {
    pub aggregation_time: u64,
    pub chain_index: Vec<u64>,
    pub input_hash: Imprint,
    pub input_data: Option<Vec<u8>>,
    pub aggr_algorithm: HashAlgorithm,
    pub links: Vec<HashChainLink>,
}

impl AggregationChain {
    pub fn new(
        aggregation_time: u64,
        chain_index: Vec<u64>,
        input_hash: Imprint,
        input_data: Option<Vec<u8>>,
        aggr_algorithm: HashAlgorithm,
        links: Vec<HashChainLink>,
    ) -> Result<Self, ChainFormatError> {
        if links.is_empty() {
            return Err(ChainFormatError::EmptyLinks);
        }
        if chain_index.is_empty() {
            return Err(ChainFormatError::EmptyChainIndex);
        }
        Ok(Self {
            aggregation_time,
            chain_index,
            input_hash,
            input_data,
            aggr_algorithm,
            links,
        })
    }

    pub fn to_tlv(&self) -> Result<Tlv, ChainFormatError> {
        let mut children = vec![
            Tlv::new_uint(TAG_AGGR_TIME, false, false, self.aggregation_time),
        ];
        for idx in &self.chain_index {
            children.push(Tlv::new_uint(TAG_CHAIN_INDEX, false, false, *idx));
        }
        if let Some(data) = &self.input_data {
            children.push(Tlv::new_raw(TAG_INPUT_DATA, false, false, data.clone()));
        }
        children.push(Tlv::new_raw(TAG_INPUT_HASH, false, false, self.input_hash.to_bytes()));
        children.push(Tlv::new_uint(TAG_AGGR_ALGO, false, false, self.aggr_algorithm.id() as u64));
        for link in &self.links {
            children.push(link.to_tlv()?);
        }
        Ok(Tlv::new_nested(super::TAG_AGGREGATION_CHAIN, false, false, &children))
    }

    const TEMPLATE: Template = Template {
        entries: &[
            TemplateEntry::one(TAG_AGGR_TIME, "aggregation_time"),
            TemplateEntry::many(TAG_CHAIN_INDEX, "chain_index"),
            TemplateEntry::optional(TAG_INPUT_DATA, "input_data"),
            TemplateEntry::one(TAG_INPUT_HASH, "input_hash"),
            TemplateEntry::one(TAG_AGGR_ALGO, "aggr_algorithm"),
            TemplateEntry::many(TAG_LEFT_LINK, "left_link"),
            TemplateEntry::many(TAG_RIGHT_LINK, "right_link"),
        ],
        lenient: false,
        forward_unknown: false,
    };

    pub fn from_tlv(tlv: &Tlv) -> Result<Self, ChainFormatError> {
        let children = tlv.as_nested()?;
        let decoded = Self::TEMPLATE.decode(&children)?;

        let aggregation_time = decoded
            .one(TAG_AGGR_TIME)
            .expect("template guarantees exactly one aggregation-time")
            .as_uint()?;
        let chain_index = decoded
            .many(TAG_CHAIN_INDEX)
            .iter()
            .map(|c| c.as_uint())
            .collect::<Result<Vec<_>, _>>()?;
        let input_data = decoded.one(TAG_INPUT_DATA).map(|c| c.as_raw().to_vec());
        let input_hash = Imprint::from_bytes(
            decoded
                .one(TAG_INPUT_HASH)
                .expect("template guarantees exactly one input-hash")
                .as_raw(),
        )?;
        let aggr_algorithm = HashAlgorithm::from_id(
            decoded
                .one(TAG_AGGR_ALGO)
                .expect("template guarantees exactly one aggregation-algorithm")
                .as_uint()? as u8,
        )?;
        // left/right links are grouped under distinct tags by the template
        // but their relative interleave across tags is itself significant.
        let links = decoded
            .ordered_among(&[TAG_LEFT_LINK, TAG_RIGHT_LINK])
            .map(HashChainLink::from_tlv)
            .collect::<Result<Vec<_>, _>>()?;

        AggregationChain::new(
            aggregation_time,
            chain_index,
            input_hash,
            input_data,
            aggr_algorithm,
            links,
        )
    }
}

/// Hash chain from an aggregator root to the publication root for a later
/// time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarChain {
    pub aggregation_time: u64,
    pub publication_time: u64,
    pub input_hash: Imprint,
    pub links: Vec<HashChainLink>,
}

impl CalendarChain {
    pub fn to_tlv(&self) -> Result<Tlv, ChainFormatError> {
        let mut children = vec![
            Tlv::new_uint(TAG_CAL_PUB_TIME, false, false, self.publication_time),
            Tlv::new_uint(TAG_CAL_AGGR_TIME, false, false, self.aggregation_time),
            Tlv::new_raw(TAG_CAL_INPUT_HASH, false, false, self.input_hash.to_bytes()),
        ];
        for link in &self.links {
            children.push(link.to_tlv()?);
        }
        Ok(Tlv::new_nested(super::TAG_CALENDAR_CHAIN, false, false, &children))
    }

    const TEMPLATE: Template = Template {
        entries: &[
            TemplateEntry::one(TAG_CAL_PUB_TIME, "publication_time"),
            TemplateEntry::one(TAG_CAL_AGGR_TIME, "aggregation_time"),
            TemplateEntry::one(TAG_CAL_INPUT_HASH, "input_hash"),
            TemplateEntry::many(TAG_LEFT_LINK, "left_link"),
            TemplateEntry::many(TAG_RIGHT_LINK, "right_link"),
        ],
        lenient: false,
        forward_unknown: false,
    };

    pub fn from_tlv(tlv: &Tlv) -> Result<Self, ChainFormatError> {
        let children = tlv.as_nested()?;
        let decoded = Self::TEMPLATE.decode(&children)?;

        let publication_time = decoded
            .one(TAG_CAL_PUB_TIME)
            .expect("template guarantees exactly one publication-time")
            .as_uint()?;
        let aggregation_time = decoded
            .one(TAG_CAL_AGGR_TIME)
            .expect("template guarantees exactly one aggregation-time")
            .as_uint()?;
        let input_hash = Imprint::from_bytes(
            decoded
                .one(TAG_CAL_INPUT_HASH)
                .expect("template guarantees exactly one input-hash")
                .as_raw(),
        )?;
        let links = decoded
            .ordered_among(&[TAG_LEFT_LINK, TAG_RIGHT_LINK])
            .map(HashChainLink::from_tlv)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            aggregation_time,
            publication_time,
            input_hash,
            links,
        })
    }
}
