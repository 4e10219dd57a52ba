//! Credential type and public key definitions, plus an in-memory store.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::{CoreError, CoreResult};
use crate::metadata::{credential_type_hash, hash_index_key};
use crate::traits::TrustStore;
use crate::types::{AttributeTypeIdentifier, CredentialTypeIdentifier, IssuerIdentifier};

/// A credential type: its identifier and the ordered names of its attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialType {
    pub id: CredentialTypeIdentifier,
    pub attributes: Vec<String>,
}

impl CredentialType {
    pub fn new(id: CredentialTypeIdentifier, attributes: Vec<String>) -> Self {
        Self { id, attributes }
    }

    /// Position of `attr` among this type's attributes, not counting metadata.
    pub fn index_of(&self, attr: &AttributeTypeIdentifier) -> Option<usize> {
        if attr.credential_type_identifier() != self.id || attr.is_credential() {
            return None;
        }
        self.attributes.iter().position(|a| a == attr.name())
    }

    /// True if `attr` is one of this type's attributes or names the type itself.
    pub fn contains_attribute(&self, attr: &AttributeTypeIdentifier) -> bool {
        if attr.is_credential() {
            return attr.credential_type_identifier() == self.id;
        }
        self.index_of(attr).is_some()
    }

    pub fn attribute_identifier(&self, index: usize) -> Option<AttributeTypeIdentifier> {
        self.attributes
            .get(index)
            .map(|name| AttributeTypeIdentifier::new(format!("{}.{}", self.id, name)))
    }
}

/// Issuer public key. `key` is hex-encoded and opaque to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    pub issuer: IssuerIdentifier,
    pub counter: u32,
    pub key: String,
}

/// On-disk form of a trust store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrustStoreDocument {
    #[serde(default)]
    pub credential_types: Vec<CredentialType>,
    #[serde(default)]
    pub public_keys: Vec<PublicKey>,
}

/// Trust store held entirely in memory, with a reverse index from truncated
/// credential type hashes to types.
#[derive(Debug, Default)]
pub struct InMemoryTrustStore {
    credential_types: HashMap<CredentialTypeIdentifier, Arc<CredentialType>>,
    reverse_hashes: HashMap<String, CredentialTypeIdentifier>,
    public_keys: HashMap<(IssuerIdentifier, u32), PublicKey>,
}

impl InMemoryTrustStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_document(doc: TrustStoreDocument) -> Self {
        let mut store = Self::new();
        for credential_type in doc.credential_types {
            store.add_credential_type(credential_type);
        }
        for key in doc.public_keys {
            store.add_public_key(key);
        }
        store
    }

    pub fn from_json(json: &str) -> CoreResult<Self> {
        let doc: TrustStoreDocument = serde_json::from_str(json)?;
        Ok(Self::from_document(doc))
    }

    pub fn load(path: &Path) -> CoreResult<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| CoreError::TrustStore(format!("{}: {}", path.display(), e)))?;
        let store = Self::from_json(&contents)?;
        tracing::info!(
            path = %path.display(),
            credential_types = store.credential_types.len(),
            public_keys = store.public_keys.len(),
            "trust store loaded"
        );
        Ok(store)
    }

    pub fn add_credential_type(&mut self, credential_type: CredentialType) {
        let hash = hash_index_key(&credential_type_hash(&credential_type.id));
        self.reverse_hashes.insert(hash, credential_type.id.clone());
        self.credential_types
            .insert(credential_type.id.clone(), Arc::new(credential_type));
    }

    pub fn add_public_key(&mut self, key: PublicKey) {
        self.public_keys
            .insert((key.issuer.clone(), key.counter), key);
    }

    pub fn contains_hash(&self, index_key: &str) -> bool {
        self.reverse_hashes.contains_key(index_key)
    }
}

impl TrustStore for InMemoryTrustStore {
    fn credential_type(&self, id: &CredentialTypeIdentifier) -> Option<Arc<CredentialType>> {
        self.credential_types.get(id).cloned()
    }

    fn credential_type_by_hash(&self, hash: &[u8]) -> Option<Arc<CredentialType>> {
        self.reverse_hashes
            .get(&hash_index_key(hash))
            .and_then(|id| self.credential_types.get(id))
            .cloned()
    }

    fn public_key(&self, issuer: &IssuerIdentifier, counter: u32) -> CoreResult<Option<PublicKey>> {
        Ok(self.public_keys.get(&(issuer.clone(), counter)).cloned())
    }
}
