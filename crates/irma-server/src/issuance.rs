//! Issuance request validation and credential minting.

use chrono::{DateTime, Months, TimeZone, Utc};

use irma_core::{
    credential_type_hash, CredentialIssuer, CredentialRequest, IssuanceRequest,
    IssueSignatureMessage, MetadataAttribute, ProofBinding, TrustStore, CURRENT_VERSION,
};

use crate::error::{ServerError, ServerResult};

/// Default validity of issued credentials.
pub const DEFAULT_VALIDITY_MONTHS: u32 = 6;

/// Check an issuance request before a session is created for it, filling in
/// each credential's key counter and default validity.
pub fn validate_issuance_request(
    request: &mut IssuanceRequest,
    store: &dyn TrustStore,
    issuer: &dyn CredentialIssuer,
    now: DateTime<Utc>,
) -> ServerResult<()> {
    if request.credentials.is_empty() {
        return Err(ServerError::InvalidRequest(
            "issuance request contains no credentials".into(),
        ));
    }
    for credential in &mut request.credentials {
        validate_credential(credential, store, issuer, now)?;
    }
    Ok(())
}

fn validate_credential(
    credential: &mut CredentialRequest,
    store: &dyn TrustStore,
    issuer: &dyn CredentialIssuer,
    now: DateTime<Utc>,
) -> ServerResult<()> {
    let credential_type = store.credential_type(&credential.credential).ok_or_else(|| {
        ServerError::InvalidRequest(format!("unknown credential type {}", credential.credential))
    })?;

    let issuer_id = credential.credential.issuer_identifier();
    let counter = issuer.key_counter(&issuer_id).ok_or_else(|| {
        ServerError::InvalidRequest(format!("missing private key of issuer {issuer_id}"))
    })?;
    if u16::try_from(counter).is_err() {
        return Err(ServerError::InvalidRequest(format!(
            "key counter {counter} of issuer {issuer_id} does not fit in metadata"
        )));
    }
    if store.public_key(&issuer_id, counter)?.is_none() {
        return Err(ServerError::InvalidRequest(format!(
            "missing public key {issuer_id}-{counter}"
        )));
    }
    credential.key_counter = Some(counter);

    if let Some(unknown) = credential
        .attributes
        .keys()
        .find(|name| !credential_type.attributes.contains(*name))
    {
        return Err(ServerError::InvalidRequest(format!(
            "credential type {} has no attribute {unknown}",
            credential.credential
        )));
    }
    if let Some(missing) = credential_type
        .attributes
        .iter()
        .find(|name| !credential.attributes.contains_key(*name))
    {
        return Err(ServerError::InvalidRequest(format!(
            "attribute {missing} of {} not specified",
            credential.credential
        )));
    }

    let expiry = match credential.validity {
        Some(validity) => validity,
        None => now
            .checked_add_months(Months::new(DEFAULT_VALIDITY_MONTHS))
            .ok_or_else(|| ServerError::Internal("default validity out of range".into()))?
            .timestamp(),
    };
    if expiry <= now.timestamp() {
        return Err(ServerError::InvalidRequest(
            "cannot issue expired credentials".into(),
        ));
    }
    credential.validity = Some(expiry);
    Ok(())
}

/// Mint metadata for every requested credential and have the issuer sign
/// them, one commitment per credential.
pub fn issue_credentials(
    request: &IssuanceRequest,
    commitments: &[String],
    binding: &ProofBinding,
    store: &dyn TrustStore,
    issuer: &dyn CredentialIssuer,
    now: DateTime<Utc>,
) -> ServerResult<Vec<IssueSignatureMessage>> {
    if commitments.len() != request.credentials.len() {
        return Err(ServerError::MalformedInput(format!(
            "expected {} commitments, got {}",
            request.credentials.len(),
            commitments.len()
        )));
    }

    request
        .credentials
        .iter()
        .zip(commitments)
        .map(|(credential, commitment)| -> ServerResult<IssueSignatureMessage> {
            let attributes = credential_attributes(credential, store, now)?;
            Ok(issuer.issue(&credential.credential, &attributes, commitment, binding)?)
        })
        .collect()
}

/// Metadata attribute first, then the values in credential type order.
fn credential_attributes(
    credential: &CredentialRequest,
    store: &dyn TrustStore,
    now: DateTime<Utc>,
) -> ServerResult<Vec<String>> {
    let unvalidated = || ServerError::Internal("credential request was not validated".into());
    let counter = credential
        .key_counter
        .and_then(|c| u16::try_from(c).ok())
        .ok_or_else(unvalidated)?;
    let expiry = credential
        .validity
        .and_then(|t| Utc.timestamp_opt(t, 0).single())
        .ok_or_else(unvalidated)?;
    if expiry <= now {
        return Err(ServerError::InvalidRequest(
            "credential expired before it was issued".into(),
        ));
    }
    let credential_type = store.credential_type(&credential.credential).ok_or_else(|| {
        ServerError::Internal(format!("credential type {} disappeared", credential.credential))
    })?;

    let metadata = MetadataAttribute::encode_until(
        CURRENT_VERSION,
        now,
        expiry,
        counter,
        credential_type_hash(&credential.credential),
    )?;

    let mut attributes = Vec::with_capacity(credential_type.attributes.len() + 1);
    attributes.push(metadata.to_int().to_str_radix(10));
    for name in &credential_type.attributes {
        attributes.push(credential.attributes.get(name).cloned().unwrap_or_default());
    }
    Ok(attributes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::*;
    use irma_core::{verify_issued, IssuerIdentifier, SessionRequest};
    use num_bigint::BigUint;

    fn request() -> IssuanceRequest {
        match issuance_request() {
            SessionRequest::Issuing(r) => r,
            _ => unreachable!(),
        }
    }

    fn binding() -> ProofBinding {
        ProofBinding {
            nonce: "nonce".into(),
            context: "context".into(),
            message: None,
        }
    }

    #[test]
    fn test_validation_fills_counter_and_validity() {
        let f = fixture();
        let now = Utc::now();
        let mut req = request();
        validate_issuance_request(
            &mut req,
            f.collaborators.trust_store.as_ref(),
            f.collaborators.issuer.as_ref(),
            now,
        )
        .unwrap();
        let credential = &req.credentials[0];
        assert_eq!(credential.key_counter, Some(KEY_COUNTER));
        let expiry = credential.validity.unwrap();
        let six_months = now.checked_add_months(Months::new(6)).unwrap().timestamp();
        assert_eq!(expiry, six_months);
    }

    #[test]
    fn test_validation_rejects_bad_requests() {
        let f = fixture();
        let store = f.collaborators.trust_store.as_ref();
        let issuer = f.collaborators.issuer.as_ref();
        let now = Utc::now();

        let mut expired = request();
        expired.credentials[0].validity = Some(now.timestamp() - 10);
        assert!(matches!(
            validate_issuance_request(&mut expired, store, issuer, now),
            Err(ServerError::InvalidRequest(_))
        ));

        let mut missing = request();
        missing.credentials[0].attributes.remove("level");
        assert!(validate_issuance_request(&mut missing, store, issuer, now).is_err());

        let mut unknown = request();
        unknown.credentials[0]
            .attributes
            .insert("shoeSize".into(), "44".into());
        assert!(validate_issuance_request(&mut unknown, store, issuer, now).is_err());

        let mut no_key = request();
        no_key.credentials[0].credential = "irma-demo.MijnOverheid.root".parse().unwrap();
        assert!(validate_issuance_request(&mut no_key, store, issuer, now).is_err());

        let mut empty = request();
        empty.credentials.clear();
        assert!(validate_issuance_request(&mut empty, store, issuer, now).is_err());
    }

    #[test]
    fn test_issue_mints_metadata_and_signs() {
        let f = fixture();
        let store = f.collaborators.trust_store.as_ref();
        let issuer = f.collaborators.issuer.as_ref();
        let now = Utc::now();
        let mut req = request();
        validate_issuance_request(&mut req, store, issuer, now).unwrap();

        let signatures =
            issue_credentials(&req, &["commitment".into()], &binding(), store, issuer, now)
                .unwrap();
        assert_eq!(signatures.len(), 1);
        let sig = &signatures[0];
        assert_eq!(
            sig.attributes[1..].to_vec(),
            vec!["Radboud", "0812345673", "456", "PhD"]
        );

        let metadata = BigUint::parse_bytes(sig.attributes[0].as_bytes(), 10).unwrap();
        let metadata = MetadataAttribute::from_int(&metadata).unwrap();
        assert_eq!(metadata.version(), CURRENT_VERSION);
        assert_eq!(u32::from(metadata.key_counter()), KEY_COUNTER);
        assert_eq!(metadata.type_hash(), &credential_type_hash(&student_card()));
        assert!(metadata.is_valid_on(now));

        let pk = f.issuer.public_key(&IssuerIdentifier::new("irma-demo.RU")).unwrap();
        assert!(verify_issued(sig, &pk, "commitment", &binding()).unwrap());
    }

    #[test]
    fn test_short_validity_is_rounded_up() {
        let f = fixture();
        let store = f.collaborators.trust_store.as_ref();
        let issuer = f.collaborators.issuer.as_ref();
        // Five days into a metadata week.
        let now = Utc.timestamp_opt(1_499_904_000 + 5 * 86_400, 0).unwrap();
        let requested = now + chrono::Duration::days(3);
        let mut req = request();
        req.credentials[0].validity = Some(requested.timestamp());
        validate_issuance_request(&mut req, store, issuer, now).unwrap();

        let signatures =
            issue_credentials(&req, &["commitment".into()], &binding(), store, issuer, now)
                .unwrap();
        let metadata = BigUint::parse_bytes(signatures[0].attributes[0].as_bytes(), 10).unwrap();
        let metadata = MetadataAttribute::from_int(&metadata).unwrap();
        assert!(metadata.is_valid_on(now));
        assert!(metadata.expiry() >= requested);
        assert!(metadata.expiry() - requested < chrono::Duration::weeks(1));
    }

    #[test]
    fn test_commitment_count_mismatch() {
        let f = fixture();
        let store = f.collaborators.trust_store.as_ref();
        let issuer = f.collaborators.issuer.as_ref();
        let now = Utc::now();
        let mut req = request();
        validate_issuance_request(&mut req, store, issuer, now).unwrap();

        let err = issue_credentials(&req, &[], &binding(), store, issuer, now).unwrap_err();
        assert!(matches!(err, ServerError::MalformedInput(_)));
    }

    #[test]
    fn test_unvalidated_request_is_internal_error() {
        let f = fixture();
        let err = issue_credentials(
            &request(),
            &["c".into()],
            &binding(),
            f.collaborators.trust_store.as_ref(),
            f.collaborators.issuer.as_ref(),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, ServerError::Internal(_)));
    }
}
