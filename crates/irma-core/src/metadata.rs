//! Metadata attribute codec.
//!
//! Every credential carries a hidden first attribute that packs its format
//! version, signing date, validity, issuer key counter and a truncated hash of
//! its credential type into a single unsigned integer. Fields are stored
//! big-endian, most significant field first:
//!
//! ```text
//! | version | signing date | validity | key counter | credential type hash |
//! |  1 byte |    3 bytes   |  2 bytes |   2 bytes   |       16 bytes       |
//! ```
//!
//! Dates are counted in weeks since the Unix epoch.

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Duration, Months, TimeZone, Utc};
use num_bigint::BigUint;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::error::{CoreError, CoreResult};
use crate::traits::TrustStore;
use crate::trust_store::CredentialType;
use crate::types::CredentialTypeIdentifier;

/// Granularity of signing and expiry dates, in seconds (one week).
pub const EXPIRY_FACTOR: i64 = 60 * 60 * 24 * 7;

/// Version written into newly minted metadata attributes.
pub const CURRENT_VERSION: u8 = 0x03;

/// Total packed length in bytes.
pub const METADATA_LENGTH: usize = 24;

/// Length of the truncated credential type hash.
pub const TYPE_HASH_LENGTH: usize = 16;

#[derive(Debug, Clone, Copy)]
struct MetadataField {
    offset: usize,
    length: usize,
}

const VERSION_FIELD: MetadataField = MetadataField { offset: 0, length: 1 };
const SIGNING_DATE_FIELD: MetadataField = MetadataField { offset: 1, length: 3 };
const VALIDITY_FIELD: MetadataField = MetadataField { offset: 4, length: 2 };
const KEY_COUNTER_FIELD: MetadataField = MetadataField { offset: 6, length: 2 };
const CREDENTIAL_ID_FIELD: MetadataField = MetadataField {
    offset: 8,
    length: TYPE_HASH_LENGTH,
};

const MAX_SIGNING_UNITS: u64 = (1 << 24) - 1;

/// Truncated SHA-256 of the dotted credential type identifier.
pub fn credential_type_hash(id: &CredentialTypeIdentifier) -> [u8; TYPE_HASH_LENGTH] {
    let digest = Sha256::digest(id.as_str().as_bytes());
    let mut hash = [0u8; TYPE_HASH_LENGTH];
    hash.copy_from_slice(&digest[..TYPE_HASH_LENGTH]);
    hash
}

/// Key under which a trust store indexes credential types by hash.
pub fn hash_index_key(hash: &[u8]) -> String {
    STANDARD.encode(hash)
}

/// Decoded metadata attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataAttribute {
    version: u8,
    signing_units: u32,
    validity_units: u16,
    key_counter: u16,
    type_hash: [u8; TYPE_HASH_LENGTH],
}

impl MetadataAttribute {
    /// Metadata for a credential signed now with the default six month validity.
    pub fn new(version: u8, credential_type: &CredentialTypeIdentifier) -> CoreResult<Self> {
        let now = Utc::now();
        let expiry = now
            .checked_add_months(Months::new(6))
            .ok_or_else(|| CoreError::InvalidMetadata("expiry out of range".into()))?;
        Self::encode(version, now, expiry - now, 0, credential_type_hash(credential_type))
    }

    /// Build metadata from raw unit counts.
    pub fn from_fields(
        version: u8,
        signing_units: u32,
        validity_units: u16,
        key_counter: u16,
        type_hash: [u8; TYPE_HASH_LENGTH],
    ) -> CoreResult<Self> {
        if u64::from(signing_units) > MAX_SIGNING_UNITS {
            return Err(CoreError::InvalidMetadata(format!(
                "signing date {signing_units} does not fit in 3 bytes"
            )));
        }
        Ok(Self {
            version,
            signing_units,
            validity_units,
            key_counter,
            type_hash,
        })
    }

    /// Pack the fields for a credential signed at `now`. The signing date is
    /// floored to the week; the validity window is counted in whole weeks.
    pub fn encode(
        version: u8,
        now: DateTime<Utc>,
        validity: Duration,
        key_counter: u16,
        type_hash: [u8; TYPE_HASH_LENGTH],
    ) -> CoreResult<Self> {
        let signing = now.timestamp().div_euclid(EXPIRY_FACTOR);
        let signing_units = u32::try_from(signing)
            .map_err(|_| CoreError::InvalidMetadata("signing date before epoch".into()))?;
        let validity_units = u16::try_from(validity.num_seconds() / EXPIRY_FACTOR)
            .map_err(|_| CoreError::InvalidMetadata("validity out of range".into()))?;
        Self::from_fields(version, signing_units, validity_units, key_counter, type_hash)
    }

    /// Pack the fields for a credential signed at `now` that stays valid
    /// until at least `expiry`. The signing date is floored to the week, so
    /// the validity is counted from there and rounded up to whole weeks.
    pub fn encode_until(
        version: u8,
        now: DateTime<Utc>,
        expiry: DateTime<Utc>,
        key_counter: u16,
        type_hash: [u8; TYPE_HASH_LENGTH],
    ) -> CoreResult<Self> {
        let signing = now.timestamp().div_euclid(EXPIRY_FACTOR);
        let signing_units = u32::try_from(signing)
            .map_err(|_| CoreError::InvalidMetadata("signing date before epoch".into()))?;
        let remaining = (expiry.timestamp() - signing * EXPIRY_FACTOR).max(0);
        let weeks = (remaining + EXPIRY_FACTOR - 1) / EXPIRY_FACTOR;
        let validity_units = u16::try_from(weeks)
            .map_err(|_| CoreError::InvalidMetadata("validity out of range".into()))?;
        Self::from_fields(version, signing_units, validity_units, key_counter, type_hash)
    }

    /// Split a packed integer into its fields.
    pub fn from_int(value: &BigUint) -> CoreResult<Self> {
        let raw = value.to_bytes_be();
        if raw.len() > METADATA_LENGTH {
            return Err(CoreError::InvalidMetadata(format!(
                "expected at most {METADATA_LENGTH} bytes, got {}",
                raw.len()
            )));
        }
        let mut bytes = [0u8; METADATA_LENGTH];
        bytes[METADATA_LENGTH - raw.len()..].copy_from_slice(&raw);

        let mut type_hash = [0u8; TYPE_HASH_LENGTH];
        type_hash.copy_from_slice(field(&bytes, CREDENTIAL_ID_FIELD));

        Ok(Self {
            version: bytes[VERSION_FIELD.offset],
            signing_units: read_uint(field(&bytes, SIGNING_DATE_FIELD)) as u32,
            validity_units: read_uint(field(&bytes, VALIDITY_FIELD)) as u16,
            key_counter: read_uint(field(&bytes, KEY_COUNTER_FIELD)) as u16,
            type_hash,
        })
    }

    /// Pack into the attribute value carried by the credential.
    pub fn to_int(&self) -> BigUint {
        let mut bytes = [0u8; METADATA_LENGTH];
        bytes[VERSION_FIELD.offset] = self.version;
        write_uint(&mut bytes, SIGNING_DATE_FIELD, u64::from(self.signing_units));
        write_uint(&mut bytes, VALIDITY_FIELD, u64::from(self.validity_units));
        write_uint(&mut bytes, KEY_COUNTER_FIELD, u64::from(self.key_counter));
        bytes[CREDENTIAL_ID_FIELD.offset..CREDENTIAL_ID_FIELD.offset + CREDENTIAL_ID_FIELD.length]
            .copy_from_slice(&self.type_hash);
        BigUint::from_bytes_be(&bytes)
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn signing_date(&self) -> DateTime<Utc> {
        units_to_date(i64::from(self.signing_units))
    }

    pub fn expiry(&self) -> DateTime<Utc> {
        units_to_date(i64::from(self.signing_units) + i64::from(self.validity_units))
    }

    /// Validity window in weeks.
    pub fn validity_duration(&self) -> u16 {
        self.validity_units
    }

    pub fn key_counter(&self) -> u16 {
        self.key_counter
    }

    pub fn type_hash(&self) -> &[u8; TYPE_HASH_LENGTH] {
        &self.type_hash
    }

    /// Resolve the credential type through the trust store's hash index.
    /// `None` means the store does not (yet) know the type.
    pub fn credential_type(&self, store: &dyn TrustStore) -> Option<Arc<CredentialType>> {
        store.credential_type_by_hash(&self.type_hash)
    }

    pub fn is_valid_on(&self, t: DateTime<Utc>) -> bool {
        t < self.expiry()
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_on(Utc::now())
    }
}

fn field(bytes: &[u8; METADATA_LENGTH], f: MetadataField) -> &[u8] {
    &bytes[f.offset..f.offset + f.length]
}

fn read_uint(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}

fn write_uint(bytes: &mut [u8; METADATA_LENGTH], f: MetadataField, value: u64) {
    for i in 0..f.length {
        let shift = 8 * (f.length - 1 - i);
        bytes[f.offset + i] = (value >> shift) as u8;
    }
}

fn units_to_date(units: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(units * EXPIRY_FACTOR, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
