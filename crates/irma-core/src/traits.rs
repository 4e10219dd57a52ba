use std::sync::Arc;

use crate::error::CoreResult;
use crate::request::{DisclosedCredential, IssueSignatureMessage, ProofBinding};
use crate::trust_store::{CredentialType, PublicKey};
use crate::types::{CredentialTypeIdentifier, IssuerIdentifier};

// ---------------------------------------------------------------------------
// TrustStore: scheme, issuer and credential type definitions
//
// Loading, verifying and distributing schemes happens elsewhere. The session
// engine only needs these lookups.
// ---------------------------------------------------------------------------

pub trait TrustStore: Send + Sync {
    fn credential_type(&self, id: &CredentialTypeIdentifier) -> Option<Arc<CredentialType>>;

    /// Lookup by truncated credential type hash, as carried in metadata attributes.
    fn credential_type_by_hash(&self, hash: &[u8]) -> Option<Arc<CredentialType>>;

    /// `Ok(None)` when the key is absent; `Err` only when the store itself fails.
    fn public_key(&self, issuer: &IssuerIdentifier, counter: u32) -> CoreResult<Option<PublicKey>>;

    fn contains_credential_type(&self, id: &CredentialTypeIdentifier) -> bool {
        self.credential_type(id).is_some()
    }
}

// ---------------------------------------------------------------------------
// ProofVerifier: opaque verification oracle
// ---------------------------------------------------------------------------

pub trait ProofVerifier: Send + Sync {
    /// Verify each disclosed credential's proof against the public key at the
    /// same position. `Ok(false)` is a cryptographic failure; `Err` means the
    /// verifier could not run at all.
    fn verify(
        &self,
        proofs: &[DisclosedCredential],
        public_keys: &[PublicKey],
        binding: &ProofBinding,
    ) -> CoreResult<bool>;
}

// ---------------------------------------------------------------------------
// CredentialIssuer: holds issuer private keys and signs new credentials
// ---------------------------------------------------------------------------

pub trait CredentialIssuer: Send + Sync {
    /// Counter of the private key held for `issuer`, if any.
    fn key_counter(&self, issuer: &IssuerIdentifier) -> Option<u32>;

    /// Sign a credential whose first attribute is the packed metadata and
    /// whose remaining attributes follow the credential type's order.
    fn issue(
        &self,
        credential: &CredentialTypeIdentifier,
        attributes: &[String],
        commitment: &str,
        binding: &ProofBinding,
    ) -> CoreResult<IssueSignatureMessage>;
}
