//! Optional signature payloads: publication bindings, authentication
//! records, and RFC 3161 compatibility records.

use ksi_imprint::{hash_imprint, HashAlgorithm, Imprint, ImprintError};
use ksi_tlv::{Template, TemplateEntry, Tlv, TlvError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const TAG_PUBLISHED_DATA: u16 = 0x10;
const TAG_PUB_TIME: u16 = 0x02;
const TAG_PUB_HASH: u16 = 0x04;

const TAG_PUBREC_REF: u16 = 0x09;

const TAG_SIG_INFO: u16 = 0x0b;
const TAG_SIG_ALGO: u16 = 0x01;
const TAG_SIG_VALUE: u16 = 0x02;
const TAG_CERT_ID: u16 = 0x03;
const TAG_CERT_REPOSITORY_URI: u16 = 0x04;
const TAG_CERT_BYTES: u16 = 0x05;

const TAG_AGGR_AUTH_SIG_TYPE: u16 = 0x01;
const TAG_AGGR_AUTH_SIG_VALUE: u16 = 0x02;

const TAG_RFC3161_AGGR_TIME: u16 = 0x02;
const TAG_RFC3161_TST_PREFIX: u16 = 0x03;
const TAG_RFC3161_TST_SUFFIX: u16 = 0x04;
const TAG_RFC3161_SIGNED_ATTR_PREFIX: u16 = 0x05;
const TAG_RFC3161_SIGNED_ATTR_SUFFIX: u16 = 0x06;
const TAG_RFC3161_DIGEST_ALGO: u16 = 0x07;
const TAG_RFC3161_INPUT_HASH: u16 = 0x08;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordFormatError {
    #[error("TLV error: {0}")]
    Tlv(#[from] TlvError),
    #[error("imprint error: {0}")]
    Imprint(#[from] ImprintError),
    #[error("calendar authentication record must select exactly one certificate, got {0}")]
    CertSelectorAmbiguous(usize),
}

/// The `(time, hash)` pair a calendar commits to at publication, carried
/// verbatim inside both publication records and calendar authentication
/// records. `raw_encoding` is kept alongside the typed fields because a PKI
/// signature over a calendar authentication record covers these exact
/// bytes, not a re-derived encoding (`spec.md` §6, `KEY-`/`PUB-` rules).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedData {
    pub publication_time: u64,
    pub publication_hash: Imprint,
    pub raw_encoding: Vec<u8>,
}

impl PublishedData {
    pub fn to_tlv(&self) -> Tlv {
        let children = [
            Tlv::new_uint(TAG_PUB_TIME, false, false, self.publication_time),
            Tlv::new_raw(TAG_PUB_HASH, false, false, self.publication_hash.to_bytes()),
        ];
        Tlv::new_nested(TAG_PUBLISHED_DATA, false, false, &children)
    }

    const TEMPLATE: Template = Template {
        entries: &[
            TemplateEntry::one(TAG_PUB_TIME, "publication_time"),
            TemplateEntry::one(TAG_PUB_HASH, "publication_hash"),
        ],
        lenient: false,
        forward_unknown: false,
    };

    pub fn from_tlv(tlv: &Tlv) -> Result<Self, RecordFormatError> {
        let children = tlv.as_nested()?;
        let decoded = Self::TEMPLATE.decode(&children)?;
        let publication_time = decoded
            .one(TAG_PUB_TIME)
            .expect("template guarantees exactly one publication_time")
            .as_uint()?;
        let publication_hash = Imprint::from_bytes(
            decoded
                .one(TAG_PUB_HASH)
                .expect("template guarantees exactly one publication_hash")
                .as_raw(),
        )?;
        Ok(Self {
            publication_time,
            publication_hash,
            raw_encoding: tlv.as_raw().to_vec(),
        })
    }
}

/// Binds a calendar-chain output to a human-distributed publication,
/// optionally pointing at where independent confirmation can be found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationRecord {
    pub published_data: PublishedData,
    pub refs: Vec<String>,
}

impl PublicationRecord {
    pub fn to_tlv(&self) -> Tlv {
        let mut children = vec![self.published_data.to_tlv()];
        for r in &self.refs {
            children.push(Tlv::new_utf8(TAG_PUBREC_REF, true, true, r));
        }
        Tlv::new_nested(super::TAG_PUBLICATION_RECORD, false, false, &children)
    }

    const TEMPLATE: Template = Template {
        entries: &[
            TemplateEntry::one(TAG_PUBLISHED_DATA, "published_data"),
            TemplateEntry::many(TAG_PUBREC_REF, "refs"),
        ],
        lenient: false,
        forward_unknown: false,
    };

    pub fn from_tlv(tlv: &Tlv) -> Result<Self, RecordFormatError> {
        let children = tlv.as_nested()?;
        let decoded = Self::TEMPLATE.decode(&children)?;
        let published_data = PublishedData::from_tlv(
            decoded
                .one(TAG_PUBLISHED_DATA)
                .expect("template guarantees exactly one published_data"),
        )?;
        let refs = decoded
            .many(TAG_PUBREC_REF)
            .iter()
            .map(|c| c.as_utf8())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { published_data, refs })
    }
}

/// The one certificate selector a calendar authentication record's
/// signature info may carry. The wire format allows three distinct tags
/// for this (inline bytes, an id into a publications-file cert store, or a
/// repository URI); exactly one may be present, a constraint the generic
/// `ksi-tlv` template cardinality machinery cannot express since it spans
/// three different tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CertSelector {
    Bytes(Vec<u8>),
    Id(Vec<u8>),
    RepositoryUri(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarAuthenticationRecord {
    pub published_data: PublishedData,
    pub sig_algo: String,
    pub sig_value: Vec<u8>,
    pub cert_selector: CertSelector,
}

impl CalendarAuthenticationRecord {
    pub fn to_tlv(&self) -> Tlv {
        let cert_child = match &self.cert_selector {
            CertSelector::Bytes(b) => Tlv::new_raw(TAG_CERT_BYTES, false, false, b.clone()),
            CertSelector::Id(b) => Tlv::new_raw(TAG_CERT_ID, false, false, b.clone()),
            CertSelector::RepositoryUri(s) => Tlv::new_utf8(TAG_CERT_REPOSITORY_URI, false, false, s),
        };
        let sig_info = Tlv::new_nested(
            TAG_SIG_INFO,
            false,
            false,
            &[
                Tlv::new_utf8(TAG_SIG_ALGO, false, false, &self.sig_algo),
                Tlv::new_raw(TAG_SIG_VALUE, false, false, self.sig_value.clone()),
                cert_child,
            ],
        );
        Tlv::new_nested(
            super::TAG_CALENDAR_AUTH_RECORD,
            false,
            false,
            &[self.published_data.to_tlv(), sig_info],
        )
    }

    const TEMPLATE: Template = Template {
        entries: &[
            TemplateEntry::one(TAG_PUBLISHED_DATA, "published_data"),
            TemplateEntry::one(TAG_SIG_INFO, "sig_info"),
        ],
        lenient: false,
        forward_unknown: false,
    };

    // Exactly one of the three cert selector tags may appear; that
    // constraint spans distinct tags and so can't be expressed by template
    // cardinality alone, which only constrains occurrences of a single tag.
    const SIG_INFO_TEMPLATE: Template = Template {
        entries: &[
            TemplateEntry::one(TAG_SIG_ALGO, "sig_algo"),
            TemplateEntry::one(TAG_SIG_VALUE, "sig_value"),
            TemplateEntry::optional(TAG_CERT_BYTES, "cert_bytes"),
            TemplateEntry::optional(TAG_CERT_ID, "cert_id"),
            TemplateEntry::optional(TAG_CERT_REPOSITORY_URI, "cert_repository_uri"),
        ],
        lenient: false,
        forward_unknown: false,
    };

    pub fn from_tlv(tlv: &Tlv) -> Result<Self, RecordFormatError> {
        let children = tlv.as_nested()?;
        let decoded = Self::TEMPLATE.decode(&children)?;
        let published_data = PublishedData::from_tlv(
            decoded
                .one(TAG_PUBLISHED_DATA)
                .expect("template guarantees exactly one published_data"),
        )?;

        let sig_info_children = decoded
            .one(TAG_SIG_INFO)
            .expect("template guarantees exactly one sig_info")
            .as_nested()?;
        let sig_decoded = Self::SIG_INFO_TEMPLATE.decode(&sig_info_children)?;
        let sig_algo = sig_decoded
            .one(TAG_SIG_ALGO)
            .expect("template guarantees exactly one sig_algo")
            .as_utf8()?;
        let sig_value = sig_decoded
            .one(TAG_SIG_VALUE)
            .expect("template guarantees exactly one sig_value")
            .as_raw()
            .to_vec();

        let mut selectors = Vec::new();
        if let Some(c) = sig_decoded.one(TAG_CERT_BYTES) {
            selectors.push(CertSelector::Bytes(c.as_raw().to_vec()));
        }
        if let Some(c) = sig_decoded.one(TAG_CERT_ID) {
            selectors.push(CertSelector::Id(c.as_raw().to_vec()));
        }
        if let Some(c) = sig_decoded.one(TAG_CERT_REPOSITORY_URI) {
            selectors.push(CertSelector::RepositoryUri(c.as_utf8()?));
        }
        if selectors.len() != 1 {
            return Err(RecordFormatError::CertSelectorAmbiguous(selectors.len()));
        }

        Ok(Self {
            published_data,
            sig_algo,
            sig_value,
            cert_selector: selectors.into_iter().next().unwrap(),
        })
    }
}

/// Deliberately minimal: the original format's aggregator authentication
/// record carries an implementation-defined signature blob whose inner
/// semantics this client does not interpret (see Open Question decision in
/// the design notes) — it is preserved for forwarding, not parsed further.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationAuthenticationRecord {
    pub signature_type: String,
    pub signature_value: Vec<u8>,
}

impl AggregationAuthenticationRecord {
    pub fn to_tlv(&self) -> Tlv {
        let children = [
            Tlv::new_utf8(TAG_AGGR_AUTH_SIG_TYPE, false, false, &self.signature_type),
            Tlv::new_raw(TAG_AGGR_AUTH_SIG_VALUE, false, false, self.signature_value.clone()),
        ];
        Tlv::new_nested(super::TAG_AGGR_AUTH_RECORD, false, false, &children)
    }

    const TEMPLATE: Template = Template {
        entries: &[
            TemplateEntry::one(TAG_AGGR_AUTH_SIG_TYPE, "signature_type"),
            TemplateEntry::one(TAG_AGGR_AUTH_SIG_VALUE, "signature_value"),
        ],
        lenient: false,
        forward_unknown: false,
    };

    pub fn from_tlv(tlv: &Tlv) -> Result<Self, RecordFormatError> {
        let children = tlv.as_nested()?;
        let decoded = Self::TEMPLATE.decode(&children)?;
        let signature_type = decoded
            .one(TAG_AGGR_AUTH_SIG_TYPE)
            .expect("template guarantees exactly one signature_type")
            .as_utf8()?;
        let signature_value = decoded
            .one(TAG_AGGR_AUTH_SIG_VALUE)
            .expect("template guarantees exactly one signature_value")
            .as_raw()
            .to_vec();
        Ok(Self {
            signature_type,
            signature_value,
        })
    }
}

/// Legacy RFC 3161 timestamp compatibility record. The original wire
/// format stores the enclosing `TSTInfo`/`SignedAttributes` ASN.1
/// structures pre-split around where this chain's input hash is spliced
/// in, rather than as parsed DER — this client follows the same layout
/// rather than attempting ASN.1 reconstruction (no DER crate in the stack).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rfc3161Record {
    pub aggregation_time: u64,
    pub tst_info_prefix: Vec<u8>,
    pub tst_info_suffix: Vec<u8>,
    pub signed_attr_prefix: Vec<u8>,
    pub signed_attr_suffix: Vec<u8>,
    pub digest_algorithm: HashAlgorithm,
    pub input_hash: Imprint,
}

impl Rfc3161Record {
    pub fn to_tlv(&self) -> Tlv {
        let children = [
            Tlv::new_uint(TAG_RFC3161_AGGR_TIME, false, false, self.aggregation_time),
            Tlv::new_raw(TAG_RFC3161_TST_PREFIX, false, false, self.tst_info_prefix.clone()),
            Tlv::new_raw(TAG_RFC3161_TST_SUFFIX, false, false, self.tst_info_suffix.clone()),
            Tlv::new_raw(
                TAG_RFC3161_SIGNED_ATTR_PREFIX,
                false,
                false,
                self.signed_attr_prefix.clone(),
            ),
            Tlv::new_raw(
                TAG_RFC3161_SIGNED_ATTR_SUFFIX,
                false,
                false,
                self.signed_attr_suffix.clone(),
            ),
            Tlv::new_uint(
                TAG_RFC3161_DIGEST_ALGO,
                false,
                false,
                self.digest_algorithm.id() as u64,
            ),
            Tlv::new_raw(TAG_RFC3161_INPUT_HASH, false, false, self.input_hash.to_bytes()),
        ];
        Tlv::new_nested(super::TAG_RFC3161_RECORD, false, false, &children)
    }

    const TEMPLATE: Template = Template {
        entries: &[
            TemplateEntry::one(TAG_RFC3161_AGGR_TIME, "aggregation_time"),
            TemplateEntry::one(TAG_RFC3161_TST_PREFIX, "tst_info_prefix"),
            TemplateEntry::one(TAG_RFC3161_TST_SUFFIX, "tst_info_suffix"),
            TemplateEntry::one(TAG_RFC3161_SIGNED_ATTR_PREFIX, "signed_attr_prefix"),
            TemplateEntry::one(TAG_RFC3161_SIGNED_ATTR_SUFFIX, "signed_attr_suffix"),
            TemplateEntry::one(TAG_RFC3161_DIGEST_ALGO, "digest_algorithm"),
            TemplateEntry::one(TAG_RFC3161_INPUT_HASH, "input_hash"),
        ],
        lenient: false,
        forward_unknown: false,
    };

    pub fn from_tlv(tlv: &Tlv) -> Result<Self, RecordFormatError> {
        let children = tlv.as_nested()?;
        let decoded = Self::TEMPLATE.decode(&children)?;
        let field = |tag, name| decoded.one(tag).unwrap_or_else(|| panic!("template guarantees exactly one {name}"));

        let aggregation_time = field(TAG_RFC3161_AGGR_TIME, "aggregation_time").as_uint()?;
        let tst_info_prefix = field(TAG_RFC3161_TST_PREFIX, "tst_info_prefix").as_raw().to_vec();
        let tst_info_suffix = field(TAG_RFC3161_TST_SUFFIX, "tst_info_suffix").as_raw().to_vec();
        let signed_attr_prefix = field(TAG_RFC3161_SIGNED_ATTR_PREFIX, "signed_attr_prefix")
            .as_raw()
            .to_vec();
        let signed_attr_suffix = field(TAG_RFC3161_SIGNED_ATTR_SUFFIX, "signed_attr_suffix")
            .as_raw()
            .to_vec();
        let digest_algorithm =
            HashAlgorithm::from_id(field(TAG_RFC3161_DIGEST_ALGO, "digest_algorithm").as_uint()? as u8)?;
        let input_hash = Imprint::from_bytes(field(TAG_RFC3161_INPUT_HASH, "input_hash").as_raw())?;

        Ok(Self {
            aggregation_time,
            tst_info_prefix,
            tst_info_suffix,
            signed_attr_prefix,
            signed_attr_suffix,
            digest_algorithm,
            input_hash,
        })
    }

    /// Re-derives the hash this record actually feeds into the first
    /// aggregation chain, by splicing `input_hash` into the surrounding
    /// `SignedAttributes`/`TSTInfo` byte ranges the same way the legacy RFC
    /// 3161 timestamp itself was hashed, rather than trusting `input_hash`
    /// on its own (`spec.md` §3):
    ///
    /// `output = hash(alg, signed_attr_prefix ‖ input_hash ‖ signed_attr_suffix)`
    /// `agg_input = hash(alg, tst_info_prefix ‖ output ‖ tst_info_suffix)`
    pub fn derive_chain_input_hash(&self) -> Imprint {
        let mut signed_attrs = Vec::with_capacity(
            self.signed_attr_prefix.len() + self.signed_attr_suffix.len() + self.input_hash.to_bytes().len(),
        );
        signed_attrs.extend_from_slice(&self.signed_attr_prefix);
        signed_attrs.extend_from_slice(&self.input_hash.to_bytes());
        signed_attrs.extend_from_slice(&self.signed_attr_suffix);
        let output = hash_imprint(self.digest_algorithm, &signed_attrs);

        let mut tst_info = Vec::with_capacity(
            self.tst_info_prefix.len() + self.tst_info_suffix.len() + output.to_bytes().len(),
        );
        tst_info.extend_from_slice(&self.tst_info_prefix);
        tst_info.extend_from_slice(&output.to_bytes());
        tst_info.extend_from_slice(&self.tst_info_suffix);
        hash_imprint(self.digest_algorithm, &tst_info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ksi_imprint::hash_imprint;

    fn sample_published_data() -> PublishedData {
        let hash = hash_imprint(HashAlgorithm::Sha256, b"publication");
        let mut pd = PublishedData {
            publication_time: 1_700_000_000,
            publication_hash: hash,
            raw_encoding: Vec::new(),
        };
        pd.raw_encoding = pd.to_tlv().encode();
        pd
    }

    #[test]
    fn published_data_round_trips() {
        let pd = sample_published_data();
        let tlv = pd.to_tlv();
        let parsed = PublishedData::from_tlv(&tlv).unwrap();
        assert_eq!(parsed.publication_time, pd.publication_time);
        assert_eq!(parsed.publication_hash, pd.publication_hash);
    }

    #[test]
    fn publication_record_round_trips_with_refs() {
        let rec = PublicationRecord {
            published_data: sample_published_data(),
            refs: vec!["https://example.test/pub".into()],
        };
        let tlv = rec.to_tlv();
        let parsed = PublicationRecord::from_tlv(&tlv).unwrap();
        assert_eq!(parsed, rec);
    }

    #[test]
    fn calendar_auth_record_round_trips_with_single_selector() {
        let rec = CalendarAuthenticationRecord {
            published_data: sample_published_data(),
            sig_algo: "RSA-SHA256".into(),
            sig_value: vec![1, 2, 3, 4],
            cert_selector: CertSelector::Id(vec![0xaa, 0xbb]),
        };
        let tlv = rec.to_tlv();
        let parsed = CalendarAuthenticationRecord::from_tlv(&tlv).unwrap();
        assert_eq!(parsed, rec);
    }

    #[test]
    fn calendar_auth_record_rejects_two_selectors() {
        let cert_a = Tlv::new_raw(TAG_CERT_ID, false, false, vec![1]);
        let cert_b = Tlv::new_utf8(TAG_CERT_REPOSITORY_URI, false, false, "https://x");
        let sig_info = Tlv::new_nested(
            TAG_SIG_INFO,
            false,
            false,
            &[
                Tlv::new_utf8(TAG_SIG_ALGO, false, false, "RSA-SHA256"),
                Tlv::new_raw(TAG_SIG_VALUE, false, false, vec![9]),
                cert_a,
                cert_b,
            ],
        );
        let tlv = Tlv::new_nested(
            super::super::TAG_CALENDAR_AUTH_RECORD,
            false,
            false,
            &[sample_published_data().to_tlv(), sig_info],
        );
        let err = CalendarAuthenticationRecord::from_tlv(&tlv).unwrap_err();
        assert_eq!(err, RecordFormatError::CertSelectorAmbiguous(2));
    }

    #[test]
    fn rfc3161_record_round_trips() {
        let rec = Rfc3161Record {
            aggregation_time: 1_700_000_000,
            tst_info_prefix: vec![1, 2],
            tst_info_suffix: vec![3, 4],
            signed_attr_prefix: vec![5],
            signed_attr_suffix: vec![6],
            digest_algorithm: HashAlgorithm::Sha256,
            input_hash: hash_imprint(HashAlgorithm::Sha256, b"doc"),
        };
        let tlv = rec.to_tlv();
        let parsed = Rfc3161Record::from_tlv(&tlv).unwrap();
        assert_eq!(parsed, rec);
    }

    #[test]
    fn derive_chain_input_hash_combines_prefix_and_suffix() {
        let input_hash = hash_imprint(HashAlgorithm::Sha256, b"doc");
        let rec = Rfc3161Record {
            aggregation_time: 1_700_000_000,
            tst_info_prefix: vec![1, 2],
            tst_info_suffix: vec![3, 4],
            signed_attr_prefix: vec![5],
            signed_attr_suffix: vec![6],
            digest_algorithm: HashAlgorithm::Sha256,
            input_hash,
        };

        let mut signed_attrs = rec.signed_attr_prefix.clone();
        signed_attrs.extend_from_slice(&rec.input_hash.to_bytes());
        signed_attrs.extend_from_slice(&rec.signed_attr_suffix);
        let expected_output = hash_imprint(HashAlgorithm::Sha256, &signed_attrs);

        let mut tst_info = rec.tst_info_prefix.clone();
        tst_info.extend_from_slice(&expected_output.to_bytes());
        tst_info.extend_from_slice(&rec.tst_info_suffix);
        let expected = hash_imprint(HashAlgorithm::Sha256, &tst_info);

        assert_eq!(rec.derive_chain_input_hash(), expected);
    }

    #[test]
    fn derive_chain_input_hash_changes_if_prefix_tampered() {
        let input_hash = hash_imprint(HashAlgorithm::Sha256, b"doc");
        let rec = Rfc3161Record {
            aggregation_time: 1_700_000_000,
            tst_info_prefix: vec![1, 2],
            tst_info_suffix: vec![3, 4],
            signed_attr_prefix: vec![5],
            signed_attr_suffix: vec![6],
            digest_algorithm: HashAlgorithm::Sha256,
            input_hash,
        };
        let mut tampered = rec.clone();
        tampered.signed_attr_prefix = vec![9];
        assert_ne!(rec.derive_chain_input_hash(), tampered.derive_chain_input_hash());
    }
}
