//! Attribute disjunctions: one policy slot satisfied by any of its attributes.
//!
//! Two JSON forms are accepted for `attributes`: a bare list of identifiers,
//! or an object mapping each identifier to the literal value it must have.
//! Document order is kept in both forms since it breaks ties between
//! candidates.

use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::traits::TrustStore;
use crate::types::AttributeTypeIdentifier;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeDisjunction {
    pub label: String,
    pub attributes: Vec<AttributeTypeIdentifier>,
    pub values: BTreeMap<AttributeTypeIdentifier, String>,
    selected: Option<AttributeTypeIdentifier>,
}

impl AttributeDisjunction {
    pub fn new(label: impl Into<String>, attributes: Vec<AttributeTypeIdentifier>) -> Self {
        Self {
            label: label.into(),
            attributes,
            ..Self::default()
        }
    }

    pub fn with_values(
        label: impl Into<String>,
        pairs: Vec<(AttributeTypeIdentifier, String)>,
    ) -> Self {
        let attributes = pairs.iter().map(|(id, _)| id.clone()).collect();
        Self {
            label: label.into(),
            attributes,
            values: pairs.into_iter().collect(),
            selected: None,
        }
    }

    /// True only when required values were given.
    pub fn has_values(&self) -> bool {
        !self.values.is_empty()
    }

    pub fn selected(&self) -> Option<&AttributeTypeIdentifier> {
        self.selected.as_ref()
    }

    /// Record the resolved choice. Refused unless `id` is one of the attributes.
    pub fn select(&mut self, id: &AttributeTypeIdentifier) -> bool {
        if !self.attributes.contains(id) {
            return false;
        }
        self.selected = Some(id.clone());
        true
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    pub fn satisfied(&self) -> bool {
        self.selected
            .as_ref()
            .is_some_and(|s| self.attributes.contains(s))
    }

    /// Every attribute belongs to a credential type the store knows.
    pub fn matches_store(&self, store: &dyn TrustStore) -> bool {
        self.attributes.iter().all(|attr| {
            store
                .credential_type(&attr.credential_type_identifier())
                .is_some_and(|ct| ct.contains_attribute(attr))
        })
    }
}

// ---------------------------------------------------------------------------
// serde
// ---------------------------------------------------------------------------

struct AttributesField<'a>(&'a AttributeDisjunction);

impl Serialize for AttributesField<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let d = self.0;
        if !d.has_values() {
            return d.attributes.serialize(serializer);
        }
        let mut map = serializer.serialize_map(Some(d.attributes.len()))?;
        for id in &d.attributes {
            map.serialize_entry(id, d.values.get(id).map(String::as_str).unwrap_or(""))?;
        }
        map.end()
    }
}

impl Serialize for AttributeDisjunction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("AttributeDisjunction", 3)?;
        s.serialize_field("label", &self.label)?;
        s.serialize_field("attributes", &AttributesField(self))?;
        match &self.selected {
            Some(selected) => s.serialize_field("selected", selected)?,
            None => s.skip_field("selected")?,
        }
        s.end()
    }
}

enum AttributeList {
    Bare(Vec<AttributeTypeIdentifier>),
    Valued(Vec<(AttributeTypeIdentifier, String)>),
}

struct AttributeListVisitor;

impl<'de> Visitor<'de> for AttributeListVisitor {
    type Value = AttributeList;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a list of attribute identifiers or a map of identifier to value")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<AttributeList, A::Error> {
        let mut ids = Vec::new();
        while let Some(id) = seq.next_element()? {
            ids.push(id);
        }
        Ok(AttributeList::Bare(ids))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<AttributeList, A::Error> {
        let mut pairs = Vec::new();
        while let Some(entry) = map.next_entry()? {
            pairs.push(entry);
        }
        Ok(AttributeList::Valued(pairs))
    }
}

impl<'de> Deserialize<'de> for AttributeList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(AttributeListVisitor)
    }
}

#[derive(Deserialize)]
struct DisjunctionRepr {
    #[serde(default)]
    label: String,
    attributes: AttributeList,
    #[serde(default)]
    selected: Option<AttributeTypeIdentifier>,
}

impl<'de> Deserialize<'de> for AttributeDisjunction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = DisjunctionRepr::deserialize(deserializer)?;
        let mut disjunction = match repr.attributes {
            AttributeList::Bare(ids) => AttributeDisjunction::new(repr.label, ids),
            AttributeList::Valued(pairs) => AttributeDisjunction::with_values(repr.label, pairs),
        };
        if disjunction.attributes.is_empty() {
            return Err(de::Error::custom("disjunction has no attributes"));
        }
        if let Some(selected) = &repr.selected {
            if !disjunction.select(selected) {
                return Err(de::Error::custom(format!(
                    "selected attribute {selected} is not in the disjunction"
                )));
            }
        }
        Ok(disjunction)
    }
}
