//! Disclosure verification pipeline.
//!
//! Checks run in a fixed order and the first failure decides the outcome:
//! metadata and key lookup, the proof oracle, expiry, then disjunction
//! coverage. Only collaborator failures are errors; everything the wallet
//! can get wrong ends up as a `ProofStatus`.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use irma_core::{
    candidates, AttributeDisjunction, AttributeProofStatus, CredentialInstance, CredentialType,
    DisclosedAttribute, DisclosedCredential, MetadataAttribute, ProofBinding, ProofStatus,
    ProofVerifier, TrustStore,
};

use crate::error::ServerResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub status: ProofStatus,
    pub disclosed: Vec<DisclosedAttribute>,
}

impl Verification {
    fn failed(status: ProofStatus) -> Self {
        Self {
            status,
            disclosed: Vec::new(),
        }
    }
}

/// Verify `proofs` against the request's disjunctions, recording the chosen
/// attribute in each disjunction.
pub fn verify_disclosure(
    proofs: &[DisclosedCredential],
    disjunctions: &mut [AttributeDisjunction],
    binding: &ProofBinding,
    store: &dyn TrustStore,
    verifier: &dyn ProofVerifier,
    now: DateTime<Utc>,
) -> ServerResult<Verification> {
    let mut types: Vec<Arc<CredentialType>> = Vec::with_capacity(proofs.len());
    let mut instances = Vec::with_capacity(proofs.len());
    let mut metadata = Vec::with_capacity(proofs.len());
    let mut keys = Vec::with_capacity(proofs.len());

    for proof in proofs {
        let Ok(meta) = MetadataAttribute::from_int(&proof.metadata) else {
            tracing::debug!("undecodable metadata attribute");
            return Ok(Verification::failed(ProofStatus::Invalid));
        };
        let Some(credential_type) = meta.credential_type(store) else {
            tracing::debug!("metadata names an unknown credential type");
            return Ok(Verification::failed(ProofStatus::Invalid));
        };
        let issuer = credential_type.id.issuer_identifier();
        let Some(key) = store.public_key(&issuer, u32::from(meta.key_counter()))? else {
            tracing::debug!(issuer = %issuer, counter = meta.key_counter(), "unknown public key");
            return Ok(Verification::failed(ProofStatus::Invalid));
        };

        let mut values = vec![String::new(); credential_type.attributes.len()];
        for (&index, value) in &proof.attributes {
            let Some(slot) = values.get_mut(index) else {
                return Ok(Verification::failed(ProofStatus::Invalid));
            };
            *slot = value.clone();
        }

        instances.push(CredentialInstance::new(credential_type.id.clone(), values));
        types.push(credential_type);
        metadata.push(meta);
        keys.push(key);
    }

    if !verifier.verify(proofs, &keys, binding)? {
        return Ok(Verification::failed(ProofStatus::Invalid));
    }
    if metadata.iter().any(|m| !m.is_valid_on(now)) {
        return Ok(Verification::failed(ProofStatus::Expired));
    }

    let mut status = ProofStatus::Valid;
    let mut disclosed = Vec::new();
    for disjunction in disjunctions.iter_mut() {
        disjunction.clear_selection();
        match candidates(disjunction, &instances, store).into_iter().next() {
            Some(candidate) => {
                disjunction.select(&candidate.attribute_type);
                disclosed.push(DisclosedAttribute {
                    id: candidate.attribute_type,
                    value: candidate.value,
                    status: AttributeProofStatus::Present,
                });
            }
            None => {
                tracing::debug!(label = %disjunction.label, "disjunction not satisfied");
                status = ProofStatus::MissingAttributes;
            }
        }
    }

    // Disclosed values nobody asked for.
    for (credential_type, instance) in types.iter().zip(&instances) {
        for (index, value) in instance.attributes.iter().enumerate() {
            if value.is_empty() {
                continue;
            }
            let Some(id) = credential_type.attribute_identifier(index) else {
                continue;
            };
            if disclosed.iter().any(|a| a.id == id && a.value.as_ref() == Some(value)) {
                continue;
            }
            disclosed.push(DisclosedAttribute {
                id,
                value: Some(value.clone()),
                status: AttributeProofStatus::Extra,
            });
        }
    }

    Ok(Verification { status, disclosed })
}
