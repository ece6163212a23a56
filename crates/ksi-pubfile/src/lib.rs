//! Publications (trust) file parsing and lookup.
//!
//! Mirrors the read-then-index shape of a storage/query module pair: parse
//! once into an in-memory structure, then serve `cert_by_id`/
//! `publication_after` lookups against it. The file's own PKI signature
//! covers every byte that precedes it; this crate tracks that byte range
//! during parsing rather than re-deriving it from a later re-encode, so the
//! signature is always checked against exactly what was on the wire.

pub mod pki;

pub use pki::{Pki, PkiError};

use std::collections::BTreeMap;

use ksi_imprint::ImprintError;
use ksi_signature::{PublicationRecord, RecordFormatError};
use ksi_tlv::{Template, TemplateEntry, Tlv, TlvError};
use thiserror::Error;

/// Opaque file-format cookie checked before any TLV parsing begins.
pub const PUBLICATIONS_FILE_MAGIC: &[u8; 8] = b"KSIPUBLF";

const TAG_HEADER: u16 = 0x0701;
const TAG_CERT_RECORD: u16 = 0x0702;
const TAG_PUBLICATION_RECORD: u16 = 0x0703;
const TAG_PKI_SIGNATURE: u16 = 0x0704;

const TAG_HEADER_VERSION: u16 = 0x01;
const TAG_HEADER_CREATION_TIME: u16 = 0x02;
const TAG_CERT_ID: u16 = 0x01;
const TAG_CERT_VALUE: u16 = 0x02;
const TAG_SIG_ALGO: u16 = 0x01;
const TAG_SIG_VALUE: u16 = 0x02;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PubFileError {
    #[error("TLV error: {0}")]
    Tlv(#[from] TlvError),
    #[error("imprint error: {0}")]
    Imprint(#[from] ImprintError),
    #[error("publication record error: {0}")]
    Record(#[from] RecordFormatError),
    #[error("publications file does not start with the expected magic cookie")]
    BadMagic,
    #[error("unknown top-level tag 0x{0:x} in publications file")]
    UnknownTag(u16),
    #[error("publications file carries more than one PKI signature record")]
    DuplicateSignature,
    #[error("publications file is missing its PKI signature record")]
    MissingPkiSignature,
    #[error("publications file has trailing bytes after its PKI signature record")]
    TrailingAfterSignature,
    #[error("publication times are not strictly increasing")]
    PublicationTimesNotIncreasing,
    #[error(transparent)]
    Pki(#[from] PkiError),
}

/// The PKI signature block terminating the file, covering every byte
/// before it (`signed_bytes`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkiSignatureRecord {
    pub sig_algo: String,
    pub sig_value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicationsFile {
    pub version: Option<u64>,
    pub creation_time: Option<u64>,
    pub publications: Vec<PublicationRecord>,
    cert_records: BTreeMap<Vec<u8>, Vec<u8>>,
    pub signature: PkiSignatureRecord,
    signed_bytes: Vec<u8>,
}

impl PublicationsFile {
    pub fn parse(bytes: &[u8]) -> Result<Self, PubFileError> {
        if bytes.len() < PUBLICATIONS_FILE_MAGIC.len()
            || &bytes[..PUBLICATIONS_FILE_MAGIC.len()] != PUBLICATIONS_FILE_MAGIC
        {
            return Err(PubFileError::BadMagic);
        }
        let body = &bytes[PUBLICATIONS_FILE_MAGIC.len()..];

        let mut version = None;
        let mut creation_time = None;
        let mut publications = Vec::new();
        let mut cert_records = BTreeMap::new();
        let mut signature = None;
        let mut signature_start_in_body = None;

        let mut offset = 0;
        while offset < body.len() {
            let start = offset;
            let (tlv, consumed) = ksi_tlv::parse_one(&body[offset..])?;
            offset += consumed;

            if signature.is_some() {
                return Err(PubFileError::TrailingAfterSignature);
            }

            match tlv.tag {
                t if t == TAG_HEADER => {
                    let (v, c) = parse_header(&tlv)?;
                    version = v;
                    creation_time = c;
                }
                t if t == TAG_CERT_RECORD => {
                    let (id, value) = parse_cert_record(&tlv)?;
                    cert_records.insert(id, value);
                }
                t if t == TAG_PUBLICATION_RECORD => {
                    publications.push(PublicationRecord::from_tlv(&tlv)?);
                }
                t if t == TAG_PKI_SIGNATURE => {
                    signature = Some(parse_signature(&tlv)?);
                    signature_start_in_body = Some(start);
                }
                other => return Err(PubFileError::UnknownTag(other)),
            }
        }

        let signature = signature.ok_or(PubFileError::MissingPkiSignature)?;
        let sig_start = signature_start_in_body.expect("signature present implies start recorded");
        let signed_bytes = bytes[..PUBLICATIONS_FILE_MAGIC.len() + sig_start].to_vec();

        for pair in publications.windows(2) {
            if pair[0].published_data.publication_time >= pair[1].published_data.publication_time {
                return Err(PubFileError::PublicationTimesNotIncreasing);
            }
        }

        Ok(Self {
            version,
            creation_time,
            publications,
            cert_records,
            signature,
            signed_bytes,
        })
    }

    /// Re-encode from scratch (used to build wire bytes for a file this
    /// process assembles itself, e.g. in tests); the result is not
    /// guaranteed byte-identical to a file this was originally parsed
    /// from.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = PUBLICATIONS_FILE_MAGIC.to_vec();
        if self.version.is_some() || self.creation_time.is_some() {
            out.extend(header_tlv(self.version, self.creation_time).encode());
        }
        for p in &self.publications {
            out.extend(publication_record_tlv(p).encode());
        }
        for (id, value) in &self.cert_records {
            out.extend(cert_record_tlv(id, value).encode());
        }
        out.extend(signature_tlv(&self.signature).encode());
        out
    }

    /// `KEY-01`: certificate lookup by id. Backed by a `BTreeMap`, giving
    /// `O(log n)` lookup as required by `spec.md` §4.6.
    pub fn cert_by_id(&self, id: &[u8]) -> Option<&[u8]> {
        self.cert_records.get(id).map(|v| v.as_slice())
    }

    /// `PUB-02`: earliest publication with `publication_time >= time`.
    /// `publications` is kept time-ordered by the strictly-increasing
    /// invariant checked at parse time, so this is a binary search.
    pub fn publication_after(&self, time: u64) -> Option<&PublicationRecord> {
        let idx = self
            .publications
            .partition_point(|p| p.published_data.publication_time < time);
        self.publications.get(idx)
    }

    /// Verify the file's own trailing PKI signature against its configured
    /// certificate set, delegating the actual cryptographic check to the
    /// injected [`Pki`] collaborator.
    pub fn verify_signature(&self, pki: &dyn Pki) -> Result<(), PubFileError> {
        let certs: Vec<&[u8]> = self.cert_records.values().map(|v| v.as_slice()).collect();
        pki.verify(
            &self.signature.sig_algo,
            &self.signature.sig_value,
            &self.signed_bytes,
            &certs,
        )
        .map_err(PubFileError::Pki)
    }
}

const HEADER_TEMPLATE: Template = Template {
    entries: &[
        TemplateEntry::optional(TAG_HEADER_VERSION, "version"),
        TemplateEntry::optional(TAG_HEADER_CREATION_TIME, "creation_time"),
    ],
    lenient: false,
    forward_unknown: false,
};

fn parse_header(tlv: &Tlv) -> Result<(Option<u64>, Option<u64>), PubFileError> {
    let children = tlv.as_nested()?;
    let decoded = HEADER_TEMPLATE.decode(&children)?;
    let version = decoded.one(TAG_HEADER_VERSION).map(|c| c.as_uint()).transpose()?;
    let creation_time = decoded.one(TAG_HEADER_CREATION_TIME).map(|c| c.as_uint()).transpose()?;
    Ok((version, creation_time))
}

fn header_tlv(version: Option<u64>, creation_time: Option<u64>) -> Tlv {
    let mut children = Vec::new();
    if let Some(v) = version {
        children.push(Tlv::new_uint(TAG_HEADER_VERSION, false, false, v));
    }
    if let Some(t) = creation_time {
        children.push(Tlv::new_uint(TAG_HEADER_CREATION_TIME, false, false, t));
    }
    Tlv::new_nested(TAG_HEADER, false, false, &children)
}

const CERT_RECORD_TEMPLATE: Template = Template {
    entries: &[
        TemplateEntry::one(TAG_CERT_ID, "cert_id"),
        TemplateEntry::one(TAG_CERT_VALUE, "cert_value"),
    ],
    lenient: false,
    forward_unknown: false,
};

fn parse_cert_record(tlv: &Tlv) -> Result<(Vec<u8>, Vec<u8>), PubFileError> {
    let children = tlv.as_nested()?;
    let decoded = CERT_RECORD_TEMPLATE.decode(&children)?;
    let id = decoded
        .one(TAG_CERT_ID)
        .expect("template guarantees exactly one cert_id")
        .as_raw()
        .to_vec();
    let value = decoded
        .one(TAG_CERT_VALUE)
        .expect("template guarantees exactly one cert_value")
        .as_raw()
        .to_vec();
    Ok((id, value))
}

fn cert_record_tlv(id: &[u8], value: &[u8]) -> Tlv {
    let children = [
        Tlv::new_raw(TAG_CERT_ID, false, false, id.to_vec()),
        Tlv::new_raw(TAG_CERT_VALUE, false, false, value.to_vec()),
    ];
    Tlv::new_nested(TAG_CERT_RECORD, false, false, &children)
}

const SIGNATURE_TEMPLATE: Template = Template {
    entries: &[
        TemplateEntry::one(TAG_SIG_ALGO, "sig_algo"),
        TemplateEntry::one(TAG_SIG_VALUE, "sig_value"),
    ],
    lenient: false,
    forward_unknown: false,
};

fn parse_signature(tlv: &Tlv) -> Result<PkiSignatureRecord, PubFileError> {
    let children = tlv.as_nested()?;
    let decoded = SIGNATURE_TEMPLATE.decode(&children)?;
    let sig_algo = decoded
        .one(TAG_SIG_ALGO)
        .expect("template guarantees exactly one sig_algo")
        .as_utf8()?;
    let sig_value = decoded
        .one(TAG_SIG_VALUE)
        .expect("template guarantees exactly one sig_value")
        .as_raw()
        .to_vec();
    Ok(PkiSignatureRecord { sig_algo, sig_value })
}

fn signature_tlv(sig: &PkiSignatureRecord) -> Tlv {
    let children = [
        Tlv::new_utf8(TAG_SIG_ALGO, false, false, &sig.sig_algo),
        Tlv::new_raw(TAG_SIG_VALUE, false, false, sig.sig_value.clone()),
    ];
    Tlv::new_nested(TAG_PKI_SIGNATURE, false, false, &children)
}

fn publication_record_tlv(rec: &PublicationRecord) -> Tlv {
    let mut children = vec![rec.published_data.to_tlv()];
    for r in &rec.refs {
        children.push(Tlv::new_utf8(0x09, true, true, r));
    }
    Tlv::new_nested(TAG_PUBLICATION_RECORD, false, false, &children)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ksi_imprint::{hash_imprint, HashAlgorithm};
    use ksi_signature::PublishedData;

    struct AlwaysOkPki;
    impl Pki for AlwaysOkPki {
        fn verify(&self, _: &str, _: &[u8], _: &[u8], certs: &[&[u8]]) -> Result<(), PkiError> {
            if certs.is_empty() {
                return Err(PkiError("no candidate certificates".into()));
            }
            Ok(())
        }
    }

    fn sample_publication(time: u64) -> PublicationRecord {
        let mut pd = PublishedData {
            publication_time: time,
            publication_hash: hash_imprint(HashAlgorithm::Sha256, format!("pub-{time}").as_bytes()),
            raw_encoding: Vec::new(),
        };
        pd.raw_encoding = pd.to_tlv().encode();
        PublicationRecord {
            published_data: pd,
            refs: vec![],
        }
    }

    fn sample_file() -> PublicationsFile {
        let unsigned = PublicationsFile {
            version: Some(1),
            creation_time: Some(1_600_000_000),
            publications: vec![sample_publication(100), sample_publication(200)],
            cert_records: BTreeMap::from([(vec![0xaa], vec![1, 2, 3])]),
            signature: PkiSignatureRecord {
                sig_algo: "RSA-SHA256".into(),
                sig_value: vec![9, 9, 9],
            },
            signed_bytes: Vec::new(),
        };
        let bytes = unsigned.encode();
        PublicationsFile::parse(&bytes).unwrap()
    }

    #[test]
    fn parses_round_tripped_file() {
        let file = sample_file();
        assert_eq!(file.publications.len(), 2);
        assert_eq!(file.version, Some(1));
    }

    #[test]
    fn rejects_missing_magic() {
        let err = PublicationsFile::parse(b"notmagic").unwrap_err();
        assert_eq!(err, PubFileError::BadMagic);
    }

    #[test]
    fn cert_lookup_by_id() {
        let file = sample_file();
        assert_eq!(file.cert_by_id(&[0xaa]), Some([1u8, 2, 3].as_slice()));
        assert_eq!(file.cert_by_id(&[0xbb]), None);
    }

    #[test]
    fn publication_after_finds_earliest_match() {
        let file = sample_file();
        assert_eq!(
            file.publication_after(150).unwrap().published_data.publication_time,
            200
        );
        assert_eq!(
            file.publication_after(100).unwrap().published_data.publication_time,
            100
        );
        assert!(file.publication_after(201).is_none());
    }

    #[test]
    fn detects_non_increasing_publication_times() {
        let unsigned = PublicationsFile {
            version: None,
            creation_time: None,
            publications: vec![sample_publication(200), sample_publication(100)],
            cert_records: BTreeMap::new(),
            signature: PkiSignatureRecord {
                sig_algo: "RSA-SHA256".into(),
                sig_value: vec![1],
            },
            signed_bytes: Vec::new(),
        };
        let bytes = unsigned.encode();
        let err = PublicationsFile::parse(&bytes).unwrap_err();
        assert_eq!(err, PubFileError::PublicationTimesNotIncreasing);
    }

    #[test]
    fn verify_signature_delegates_to_pki_collaborator() {
        let file = sample_file();
        assert!(file.verify_signature(&AlwaysOkPki).is_ok());
    }
}
