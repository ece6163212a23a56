//! Data-driven template descriptors for decoding a composite TLV's children.
//!
//! A [`Template`] is an ordered list of [`TemplateEntry`] values, each
//! describing one permitted child tag, its cardinality, and whether it must
//! be preserved verbatim if unrecognized. Interpreting a template is the job
//! of a single generic function (`Template::decode`) rather than per-field
//! callback functions — the re-architecture called for in `spec.md` §9
//! ("callback-based TLV templates... become data-driven template
//! descriptors... interpreted by a single generic decoder").

use std::collections::HashMap;

use crate::{Tlv, TlvError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    One,
    Optional,
    Many,
}

#[derive(Debug, Clone, Copy)]
pub struct TemplateEntry {
    pub tag: u16,
    pub cardinality: Cardinality,
    pub name: &'static str,
}

impl TemplateEntry {
    pub const fn one(tag: u16, name: &'static str) -> Self {
        Self {
            tag,
            cardinality: Cardinality::One,
            name,
        }
    }
    pub const fn optional(tag: u16, name: &'static str) -> Self {
        Self {
            tag,
            cardinality: Cardinality::Optional,
            name,
        }
    }
    pub const fn many(tag: u16, name: &'static str) -> Self {
        Self {
            tag,
            cardinality: Cardinality::Many,
            name,
        }
    }
}

/// A template: the set of children a composite TLV is allowed to carry.
pub struct Template {
    pub entries: &'static [TemplateEntry],
    /// If true, an unrecognized *critical* (non `non_critical`) tag is
    /// tolerated instead of failing with `UnknownCriticalTag`.
    pub lenient: bool,
    /// If true, unrecognized non-critical tags with the `forward` flag set
    /// are kept in `Decoded::remainder` for verbatim re-emission; otherwise
    /// they are silently dropped.
    pub forward_unknown: bool,
}

/// Result of routing a composite's children against a [`Template`].
pub struct Decoded {
    matched: HashMap<u16, Vec<Tlv>>,
    /// Every recognized child in original wire order, regardless of tag.
    /// Needed wherever a template groups several distinct tags into one
    /// logical sequence (e.g. interleaved left/right hash chain links)
    /// whose relative order across tags is itself significant — grouping
    /// by tag in `matched` alone would lose it.
    pub ordered: Vec<Tlv>,
    /// Unknown non-critical, forward-flagged elements preserved in
    /// encounter order for round-trip re-emission.
    pub remainder: Vec<Tlv>,
}

impl Decoded {
    pub fn one(&self, tag: u16) -> Option<&Tlv> {
        self.matched.get(&tag).and_then(|v| v.first())
    }

    pub fn many(&self, tag: u16) -> &[Tlv] {
        self.matched.get(&tag).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Every recognized child whose tag is in `tags`, in original wire
    /// order.
    pub fn ordered_among<'a>(&'a self, tags: &'a [u16]) -> impl Iterator<Item = &'a Tlv> + 'a {
        self.ordered.iter().filter(move |c| tags.contains(&c.tag))
    }
}

impl Template {
    /// Route `children` against this template, returning the matched
    /// elements grouped by tag plus any forwarded unknowns.
    ///
    /// Fails with [`TlvError::InvalidFormat`] if a `One` entry is matched
    /// zero or more than once, and with [`TlvError::UnknownCriticalTag`] if
    /// an unrecognized critical tag appears and the template is not
    /// `lenient`.
    pub fn decode(&self, children: &[Tlv]) -> Result<Decoded, TlvError> {
        let known: HashMap<u16, &TemplateEntry> =
            self.entries.iter().map(|e| (e.tag, e)).collect();

        let mut matched: HashMap<u16, Vec<Tlv>> = HashMap::new();
        let mut ordered = Vec::new();
        let mut remainder = Vec::new();

        for child in children {
            if known.contains_key(&child.tag) {
                matched.entry(child.tag).or_default().push(child.clone());
                ordered.push(child.clone());
            } else if child.non_critical {
                if self.forward_unknown && child.forward {
                    remainder.push(child.clone());
                }
                // otherwise: non-critical unknowns without forward are dropped.
            } else if self.lenient {
                // tolerated: treated like a dropped non-critical unknown.
            } else {
                return Err(TlvError::UnknownCriticalTag(child.tag));
            }
        }

        for entry in self.entries {
            let count = matched.get(&entry.tag).map(|v| v.len()).unwrap_or(0);
            match entry.cardinality {
                Cardinality::One if count != 1 => {
                    return Err(TlvError::InvalidFormat(format!(
                        "field `{}` (tag 0x{:x}) must appear exactly once, appeared {}",
                        entry.name, entry.tag, count
                    )));
                }
                Cardinality::Optional if count > 1 => {
                    return Err(TlvError::InvalidFormat(format!(
                        "field `{}` (tag 0x{:x}) must appear at most once, appeared {}",
                        entry.name, entry.tag, count
                    )));
                }
                _ => {}
            }
        }

        Ok(Decoded { matched, ordered, remainder })
    }
}
