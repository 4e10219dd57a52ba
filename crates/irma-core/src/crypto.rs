//! Ed25519-backed proof oracle.
//!
//! Stands in for the zero-knowledge proof system behind the `ProofVerifier`
//! and `CredentialIssuer` traits. A "proof" is an Ed25519 signature by the
//! issuer key over the disclosed values and the session binding; issuance
//! signs the minted attribute list. The session engine never looks inside.

use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use num_bigint::BigUint;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::error::{CoreError, CoreResult};
use crate::request::{DisclosedCredential, IssueSignatureMessage, ProofBinding};
use crate::traits::{CredentialIssuer, ProofVerifier};
use crate::trust_store::PublicKey;
use crate::types::{CredentialTypeIdentifier, IssuerIdentifier};

fn disclosure_digest(
    metadata: &BigUint,
    attributes: &BTreeMap<usize, String>,
    binding: &ProofBinding,
) -> CoreResult<[u8; 32]> {
    let canonical = serde_json::to_vec(&(
        "disclosure",
        binding,
        metadata.to_str_radix(10),
        attributes,
    ))?;
    Ok(Sha256::digest(canonical).into())
}

fn issuance_digest(
    credential: &CredentialTypeIdentifier,
    attributes: &[String],
    commitment: &str,
    binding: &ProofBinding,
) -> CoreResult<[u8; 32]> {
    let canonical = serde_json::to_vec(&("issuance", binding, credential, attributes, commitment))?;
    Ok(Sha256::digest(canonical).into())
}

fn verifying_key(public_key: &PublicKey) -> CoreResult<VerifyingKey> {
    let bytes: [u8; 32] = hex::decode(&public_key.key)
        .map_err(|_| CoreError::MalformedKey)?
        .try_into()
        .map_err(|_| CoreError::MalformedKey)?;
    VerifyingKey::from_bytes(&bytes).map_err(|_| CoreError::MalformedKey)
}

fn parse_signature(hex_sig: &str) -> Option<Signature> {
    let bytes: [u8; 64] = hex::decode(hex_sig).ok()?.try_into().ok()?;
    Some(Signature::from_bytes(&bytes))
}

/// Produce a disclosure proof for one credential.
pub fn prove_disclosure(
    key: &SigningKey,
    metadata: BigUint,
    attributes: BTreeMap<usize, String>,
    binding: &ProofBinding,
) -> CoreResult<DisclosedCredential> {
    let digest = disclosure_digest(&metadata, &attributes, binding)?;
    Ok(DisclosedCredential {
        metadata,
        attributes,
        proof: hex::encode(key.sign(&digest).to_bytes()),
    })
}

/// Check an issuance signature against the issuer's public key.
pub fn verify_issued(
    message: &IssueSignatureMessage,
    public_key: &PublicKey,
    commitment: &str,
    binding: &ProofBinding,
) -> CoreResult<bool> {
    let key = verifying_key(public_key)?;
    let Some(signature) = parse_signature(&message.signature) else {
        return Ok(false);
    };
    let digest = issuance_digest(&message.credential, &message.attributes, commitment, binding)?;
    Ok(key.verify(&digest, &signature).is_ok())
}

// ---------------------------------------------------------------------------
// Ed25519Verifier
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy)]
pub struct Ed25519Verifier;

impl ProofVerifier for Ed25519Verifier {
    fn verify(
        &self,
        proofs: &[DisclosedCredential],
        public_keys: &[PublicKey],
        binding: &ProofBinding,
    ) -> CoreResult<bool> {
        if proofs.len() != public_keys.len() {
            return Ok(false);
        }
        for (proof, public_key) in proofs.iter().zip(public_keys) {
            let key = verifying_key(public_key)?;
            let Some(signature) = parse_signature(&proof.proof) else {
                return Ok(false);
            };
            let digest = disclosure_digest(&proof.metadata, &proof.attributes, binding)?;
            if key.verify(&digest, &signature).is_err() {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Ed25519Issuer
// ---------------------------------------------------------------------------

/// On-disk issuer key: `<issuer>.json` holding the counter and a hex seed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuerKeyFile {
    pub issuer: IssuerIdentifier,
    pub counter: u32,
    pub seed: String,
}

struct IssuerKey {
    counter: u32,
    signing_key: SigningKey,
}

/// Holds issuer signing keys, one per issuer.
#[derive(Default)]
pub struct Ed25519Issuer {
    keys: HashMap<IssuerIdentifier, IssuerKey>,
}

impl Ed25519Issuer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_key(&mut self, issuer: IssuerIdentifier, counter: u32, signing_key: SigningKey) {
        self.keys.insert(
            issuer,
            IssuerKey {
                counter,
                signing_key,
            },
        );
    }

    /// Create a fresh random key for `issuer` and return its seed file.
    pub fn generate(&mut self, issuer: IssuerIdentifier, counter: u32) -> IssuerKeyFile {
        let signing_key = SigningKey::generate(&mut OsRng);
        let file = IssuerKeyFile {
            issuer: issuer.clone(),
            counter,
            seed: hex::encode(signing_key.to_bytes()),
        };
        self.add_key(issuer, counter, signing_key);
        file
    }

    pub fn add_key_file(&mut self, file: &IssuerKeyFile) -> CoreResult<()> {
        let seed: [u8; 32] = hex::decode(&file.seed)
            .map_err(|_| CoreError::MalformedKey)?
            .try_into()
            .map_err(|_| CoreError::MalformedKey)?;
        self.add_key(file.issuer.clone(), file.counter, SigningKey::from_bytes(&seed));
        Ok(())
    }

    /// Load every `*.json` key file in `dir`.
    pub fn load_dir(dir: &Path) -> CoreResult<Self> {
        let mut issuer = Self::new();
        let entries = std::fs::read_dir(dir)
            .map_err(|e| CoreError::Issuance(format!("{}: {}", dir.display(), e)))?;
        for entry in entries {
            let path = entry
                .map_err(|e| CoreError::Issuance(e.to_string()))?
                .path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| CoreError::Issuance(format!("{}: {}", path.display(), e)))?;
            let file: IssuerKeyFile = serde_json::from_str(&contents)?;
            issuer.add_key_file(&file)?;
            tracing::debug!(issuer = %file.issuer, counter = file.counter, "issuer key loaded");
        }
        Ok(issuer)
    }

    pub fn issuers(&self) -> impl Iterator<Item = &IssuerIdentifier> {
        self.keys.keys()
    }

    /// Public half of the key held for `issuer`.
    pub fn public_key(&self, issuer: &IssuerIdentifier) -> Option<PublicKey> {
        self.keys.get(issuer).map(|k| PublicKey {
            issuer: issuer.clone(),
            counter: k.counter,
            key: hex::encode(k.signing_key.verifying_key().to_bytes()),
        })
    }

    /// Produce a disclosure proof with `issuer`'s key.
    pub fn prove(
        &self,
        issuer: &IssuerIdentifier,
        metadata: BigUint,
        attributes: BTreeMap<usize, String>,
        binding: &ProofBinding,
    ) -> CoreResult<DisclosedCredential> {
        let key = self
            .keys
            .get(issuer)
            .ok_or_else(|| CoreError::Issuance(format!("no private key for {issuer}")))?;
        prove_disclosure(&key.signing_key, metadata, attributes, binding)
    }
}

impl CredentialIssuer for Ed25519Issuer {
    fn key_counter(&self, issuer: &IssuerIdentifier) -> Option<u32> {
        self.keys.get(issuer).map(|k| k.counter)
    }

    fn issue(
        &self,
        credential: &CredentialTypeIdentifier,
        attributes: &[String],
        commitment: &str,
        binding: &ProofBinding,
    ) -> CoreResult<IssueSignatureMessage> {
        let issuer = credential.issuer_identifier();
        let key = self
            .keys
            .get(&issuer)
            .ok_or_else(|| CoreError::Issuance(format!("no private key for {issuer}")))?;
        let digest = issuance_digest(credential, attributes, commitment, binding)?;
        Ok(IssueSignatureMessage {
            credential: credential.clone(),
            attributes: attributes.to_vec(),
            signature: hex::encode(key.signing_key.sign(&digest).to_bytes()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding() -> ProofBinding {
        ProofBinding {
            nonce: "nonce".into(),
            context: "context".into(),
            message: None,
        }
    }

    fn issuer() -> (Ed25519Issuer, IssuerIdentifier) {
        let id = IssuerIdentifier::new("irma-demo.RU");
        let mut issuer = Ed25519Issuer::new();
        issuer.add_key(id.clone(), 2, SigningKey::from_bytes(&[7u8; 32]));
        (issuer, id)
    }

    #[test]
    fn test_disclosure_proof_verifies() {
        let (issuer, id) = issuer();
        let pk = issuer.public_key(&id).unwrap();
        let attrs = BTreeMap::from([(2usize, "456".to_string())]);
        let proof = issuer
            .prove(&id, BigUint::from(42u32), attrs, &binding())
            .unwrap();
        assert!(Ed25519Verifier.verify(&[proof], &[pk], &binding()).unwrap());
    }

    #[test]
    fn test_tampered_or_rebound_proof_fails() {
        let (issuer, id) = issuer();
        let pk = issuer.public_key(&id).unwrap();
        let attrs = BTreeMap::from([(2usize, "456".to_string())]);
        let proof = issuer
            .prove(&id, BigUint::from(42u32), attrs, &binding())
            .unwrap();

        let mut tampered = proof.clone();
        tampered.attributes.insert(2, "457".into());
        assert!(!Ed25519Verifier
            .verify(&[tampered], &[pk.clone()], &binding())
            .unwrap());

        let other = ProofBinding {
            nonce: "other".into(),
            ..binding()
        };
        assert!(!Ed25519Verifier
            .verify(&[proof.clone()], &[pk.clone()], &other)
            .unwrap());

        let mut garbage = proof;
        garbage.proof = "zz".into();
        assert!(!Ed25519Verifier.verify(&[garbage], &[pk], &binding()).unwrap());
    }

    #[test]
    fn test_key_count_mismatch_is_invalid() {
        let (issuer, id) = issuer();
        let proof = issuer
            .prove(&id, BigUint::from(1u32), BTreeMap::new(), &binding())
            .unwrap();
        assert!(!Ed25519Verifier.verify(&[proof], &[], &binding()).unwrap());
    }

    #[test]
    fn test_malformed_public_key_is_error() {
        let (issuer, id) = issuer();
        let proof = issuer
            .prove(&id, BigUint::from(1u32), BTreeMap::new(), &binding())
            .unwrap();
        let pk = PublicKey {
            issuer: id,
            counter: 2,
            key: "not hex".into(),
        };
        assert_eq!(
            Ed25519Verifier.verify(&[proof], &[pk], &binding()),
            Err(CoreError::MalformedKey)
        );
    }

    #[test]
    fn test_issue_and_verify() {
        let (issuer, id) = issuer();
        assert_eq!(issuer.key_counter(&id), Some(2));
        let credential = CredentialTypeIdentifier::new("irma-demo.RU.studentCard");
        let attrs = vec!["123".to_string(), "456".to_string()];
        let sig = issuer.issue(&credential, &attrs, "commitment", &binding()).unwrap();
        let pk = issuer.public_key(&id).unwrap();
        assert!(verify_issued(&sig, &pk, "commitment", &binding()).unwrap());
        assert!(!verify_issued(&sig, &pk, "other", &binding()).unwrap());
    }

    #[test]
    fn test_unknown_issuer_cannot_issue() {
        let (issuer, _) = issuer();
        let credential = CredentialTypeIdentifier::new("other.X.card");
        assert!(issuer.issue(&credential, &[], "c", &binding()).is_err());
        assert!(issuer.key_counter(&IssuerIdentifier::new("other.X")).is_none());
    }

    #[test]
    fn test_generated_key_file_reloads() {
        let id = IssuerIdentifier::new("irma-demo.MijnOverheid");
        let mut first = Ed25519Issuer::new();
        let file = first.generate(id.clone(), 1);

        let mut second = Ed25519Issuer::new();
        second.add_key_file(&file).unwrap();
        assert_eq!(first.public_key(&id), second.public_key(&id));
    }

    #[test]
    fn test_key_file_seed_validation() {
        let mut issuer = Ed25519Issuer::new();
        let file = IssuerKeyFile {
            issuer: IssuerIdentifier::new("irma-demo.RU"),
            counter: 0,
            seed: "abcd".into(),
        };
        assert_eq!(issuer.add_key_file(&file), Err(CoreError::MalformedKey));
    }
}
