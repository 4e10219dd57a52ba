//! Session requests and the messages a wallet posts back.

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::disjunction::AttributeDisjunction;
use crate::types::{Action, AttributeTypeIdentifier, CredentialTypeIdentifier, ProtocolVersion};

// ---------------------------------------------------------------------------
// Session requests
// ---------------------------------------------------------------------------

/// Fields shared by all session requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<ProtocolVersion>,
    /// Seconds the wallet may take to pick up the session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_timeout: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisclosureRequest {
    #[serde(flatten)]
    pub base: BaseRequest,
    pub content: Vec<AttributeDisjunction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureRequest {
    #[serde(flatten)]
    pub base: BaseRequest,
    pub message: String,
    pub content: Vec<AttributeDisjunction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRequest {
    pub credential: CredentialTypeIdentifier,
    /// Expiry as Unix seconds; defaulted at session start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validity: Option<i64>,
    /// Filled in at session start from the issuer's private key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_counter: Option<u32>,
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuanceRequest {
    #[serde(flatten)]
    pub base: BaseRequest,
    pub credentials: Vec<CredentialRequest>,
    #[serde(default)]
    pub disclose: Vec<AttributeDisjunction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SessionRequest {
    Disclosing(DisclosureRequest),
    Signing(SignatureRequest),
    Issuing(IssuanceRequest),
}

impl SessionRequest {
    pub fn action(&self) -> Action {
        match self {
            SessionRequest::Disclosing(_) => Action::Disclosing,
            SessionRequest::Signing(_) => Action::Signing,
            SessionRequest::Issuing(_) => Action::Issuing,
        }
    }

    pub fn base(&self) -> &BaseRequest {
        match self {
            SessionRequest::Disclosing(r) => &r.base,
            SessionRequest::Signing(r) => &r.base,
            SessionRequest::Issuing(r) => &r.base,
        }
    }

    pub fn base_mut(&mut self) -> &mut BaseRequest {
        match self {
            SessionRequest::Disclosing(r) => &mut r.base,
            SessionRequest::Signing(r) => &mut r.base,
            SessionRequest::Issuing(r) => &mut r.base,
        }
    }

    /// The disjunctions the wallet has to satisfy.
    pub fn disjunctions(&self) -> &[AttributeDisjunction] {
        match self {
            SessionRequest::Disclosing(r) => &r.content,
            SessionRequest::Signing(r) => &r.content,
            SessionRequest::Issuing(r) => &r.disclose,
        }
    }

    pub fn disjunctions_mut(&mut self) -> &mut [AttributeDisjunction] {
        match self {
            SessionRequest::Disclosing(r) => &mut r.content,
            SessionRequest::Signing(r) => &mut r.content,
            SessionRequest::Issuing(r) => &mut r.disclose,
        }
    }

    pub fn binding(&self) -> ProofBinding {
        let base = self.base();
        ProofBinding {
            nonce: base.nonce.clone().unwrap_or_default(),
            context: base.context.clone().unwrap_or_default(),
            message: match self {
                SessionRequest::Signing(r) => Some(r.message.clone()),
                _ => None,
            },
        }
    }
}

/// Pointer handed to the wallet (usually rendered as a QR code).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Qr {
    pub u: String,
    pub irmaqr: Action,
}

// ---------------------------------------------------------------------------
// Wallet messages
// ---------------------------------------------------------------------------

/// What proofs are bound to: the session nonce and context, plus the signed
/// message for attribute-based signatures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofBinding {
    pub nonce: String,
    pub context: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// One credential in a disclosure: its metadata attribute, the disclosed
/// attribute values keyed by position in the credential type, and the
/// opaque proof over them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisclosedCredential {
    #[serde(with = "decimal")]
    pub metadata: BigUint,
    #[serde(default)]
    pub attributes: BTreeMap<usize, String>,
    pub proof: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disclosure {
    pub proofs: Vec<DisclosedCredential>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedMessage {
    pub message: String,
    pub proofs: Vec<DisclosedCredential>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueCommitmentMessage {
    /// Disclosure proofs for the request's `disclose` part.
    #[serde(default)]
    pub proofs: Vec<DisclosedCredential>,
    /// One secret key commitment per requested credential.
    pub commitments: Vec<String>,
    pub nonce2: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueSignatureMessage {
    pub credential: CredentialTypeIdentifier,
    /// Metadata attribute (decimal) followed by the attribute values.
    pub attributes: Vec<String>,
    pub signature: String,
}

// ---------------------------------------------------------------------------
// Verification outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProofStatus {
    Valid,
    Invalid,
    Expired,
    MissingAttributes,
    UnmatchedRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttributeProofStatus {
    /// Disclosed and requested.
    Present,
    /// Disclosed but not asked for.
    Extra,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisclosedAttribute {
    pub id: AttributeTypeIdentifier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub status: AttributeProofStatus,
}

mod decimal {
    use num_bigint::BigUint;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_str_radix(10))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigUint, D::Error> {
        let s = String::deserialize(deserializer)?;
        BigUint::parse_bytes(s.as_bytes(), 10)
            .ok_or_else(|| de::Error::custom("expected a decimal integer"))
    }
}
