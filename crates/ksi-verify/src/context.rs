//! Verification context: the signature under test plus its injected
//! collaborators (extender, publications file, PKI) and per-context
//! caches, the way a header verifier bundles together the validator set
//! and caches it consults while checking one chain of headers.

use std::cell::RefCell;
use std::collections::HashMap;

use ksi_imprint::Imprint;
use ksi_pubfile::{Pki, PublicationsFile};
use ksi_signature::{PublishedData, Signature};

use crate::extender::{Extender, ExtenderError};

pub struct VerificationContext {
    pub signature: Signature,
    pub document_hash: Option<Imprint>,
    pub document_input_level: u8,
    pub user_publication: Option<PublishedData>,
    pub allow_extending: bool,
    extender: Option<Box<dyn Extender>>,
    publications_file: Option<PublicationsFile>,
    pki: Option<Box<dyn Pki>>,
    extend_cache: RefCell<HashMap<(u64, Option<u64>), ksi_signature::CalendarChain>>,
}

impl VerificationContext {
    pub fn new(signature: Signature) -> Self {
        Self {
            signature,
            document_hash: None,
            document_input_level: 0,
            user_publication: None,
            allow_extending: false,
            extender: None,
            publications_file: None,
            pki: None,
            extend_cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn with_document_hash(mut self, hash: Imprint) -> Self {
        self.document_hash = Some(hash);
        self
    }

    pub fn with_document_input_level(mut self, level: u8) -> Self {
        self.document_input_level = level;
        self
    }

    pub fn with_user_publication(mut self, publication: PublishedData) -> Self {
        self.user_publication = Some(publication);
        self
    }

    pub fn with_allow_extending(mut self, allow: bool) -> Self {
        self.allow_extending = allow;
        self
    }

    pub fn with_extender(mut self, extender: impl Extender + 'static) -> Self {
        self.extender = Some(Box::new(extender));
        self
    }

    pub fn with_publications_file(mut self, file: PublicationsFile) -> Self {
        self.publications_file = Some(file);
        self
    }

    pub fn with_pki(mut self, pki: impl Pki + 'static) -> Self {
        self.pki = Some(Box::new(pki));
        self
    }

    pub fn publications_file(&self) -> Option<&PublicationsFile> {
        self.publications_file.as_ref()
    }

    pub fn pki(&self) -> Option<&dyn Pki> {
        self.pki.as_deref()
    }

    /// Request a calendar chain, serving from the per-context cache when
    /// the same `(aggregation_time, publication_time)` pair was already
    /// requested (`spec.md` §4.5).
    pub fn extend(
        &self,
        aggregation_time: u64,
        publication_time: Option<u64>,
    ) -> Result<ksi_signature::CalendarChain, ExtenderError> {
        let key = (aggregation_time, publication_time);
        if let Some(cached) = self.extend_cache.borrow().get(&key) {
            return Ok(cached.clone());
        }
        let extender = self.extender.as_ref().ok_or(ExtenderError::NotConfigured)?;
        let chain = extender.extend(aggregation_time, publication_time)?;
        self.extend_cache.borrow_mut().insert(key, chain.clone());
        Ok(chain)
    }
}
