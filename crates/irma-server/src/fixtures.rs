//! Shared test setup: a trust store with one credential type and an issuer
//! holding the matching key.

use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::SigningKey;
use num_bigint::BigUint;
use std::collections::BTreeMap;
use std::sync::Arc;

use irma_core::{
    credential_type_hash, AttributeDisjunction, AttributeTypeIdentifier, BaseRequest,
    CredentialRequest, CredentialType, CredentialTypeIdentifier, DisclosedCredential,
    DisclosureRequest, Ed25519Issuer, Ed25519Verifier, InMemoryTrustStore, IssuanceRequest,
    IssuerIdentifier, MetadataAttribute, ProofBinding, SessionRequest, SignatureRequest,
    CURRENT_VERSION,
};

use crate::session::Collaborators;

pub(crate) const KEY_COUNTER: u32 = 2;

pub(crate) fn student_card() -> CredentialTypeIdentifier {
    CredentialTypeIdentifier::new("irma-demo.RU.studentCard")
}

pub(crate) fn student_id() -> AttributeTypeIdentifier {
    AttributeTypeIdentifier::new("irma-demo.RU.studentCard.studentID")
}

pub(crate) fn level() -> AttributeTypeIdentifier {
    AttributeTypeIdentifier::new("irma-demo.RU.studentCard.level")
}

pub(crate) struct Fixture {
    pub issuer: Arc<Ed25519Issuer>,
    pub collaborators: Collaborators,
}

pub(crate) fn fixture() -> Fixture {
    let issuer_id = IssuerIdentifier::new("irma-demo.RU");
    let mut issuer = Ed25519Issuer::new();
    issuer.add_key(issuer_id.clone(), KEY_COUNTER, SigningKey::from_bytes(&[7u8; 32]));

    let mut store = InMemoryTrustStore::new();
    store.add_credential_type(CredentialType::new(
        student_card(),
        vec![
            "university".into(),
            "studentCardNumber".into(),
            "studentID".into(),
            "level".into(),
        ],
    ));
    if let Some(pk) = issuer.public_key(&issuer_id) {
        store.add_public_key(pk);
    }

    let issuer = Arc::new(issuer);
    Fixture {
        issuer: issuer.clone(),
        collaborators: Collaborators {
            trust_store: Arc::new(store),
            verifier: Arc::new(Ed25519Verifier),
            issuer,
        },
    }
}

/// Metadata for a student card signed at `signed` and valid for `weeks`.
pub(crate) fn metadata(signed: DateTime<Utc>, weeks: i64) -> BigUint {
    MetadataAttribute::encode(
        CURRENT_VERSION,
        signed,
        Duration::weeks(weeks),
        KEY_COUNTER as u16,
        credential_type_hash(&student_card()),
    )
    .unwrap()
    .to_int()
}

pub(crate) fn valid_metadata() -> BigUint {
    metadata(Utc::now(), 26)
}

pub(crate) fn prove(
    fixture: &Fixture,
    metadata: BigUint,
    attributes: &[(usize, &str)],
    binding: &ProofBinding,
) -> DisclosedCredential {
    let attributes: BTreeMap<usize, String> = attributes
        .iter()
        .map(|(i, v)| (*i, v.to_string()))
        .collect();
    fixture
        .issuer
        .prove(&IssuerIdentifier::new("irma-demo.RU"), metadata, attributes, binding)
        .unwrap()
}

fn base() -> BaseRequest {
    BaseRequest {
        context: Some("context".into()),
        nonce: Some("nonce".into()),
        ..BaseRequest::default()
    }
}

pub(crate) fn disclosure_request(content: Vec<AttributeDisjunction>) -> SessionRequest {
    SessionRequest::Disclosing(DisclosureRequest {
        base: base(),
        content,
    })
}

pub(crate) fn signature_request(message: &str) -> SessionRequest {
    SessionRequest::Signing(SignatureRequest {
        base: base(),
        message: message.into(),
        content: vec![AttributeDisjunction::new("ID", vec![student_id()])],
    })
}

pub(crate) fn issuance_request() -> SessionRequest {
    let attributes = [
        ("university", "Radboud"),
        ("studentCardNumber", "0812345673"),
        ("studentID", "456"),
        ("level", "PhD"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    SessionRequest::Issuing(IssuanceRequest {
        base: base(),
        credentials: vec![CredentialRequest {
            credential: student_card(),
            validity: None,
            key_counter: None,
            attributes,
        }],
        disclose: vec![],
    })
}
