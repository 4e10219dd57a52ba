//! Candidate resolution: which held attributes can satisfy a disjunction.

use serde::{Deserialize, Serialize};

use crate::disjunction::AttributeDisjunction;
use crate::traits::TrustStore;
use crate::types::{AttributeTypeIdentifier, CredentialTypeIdentifier};

/// A credential as seen by the resolver. `attributes` follows the credential
/// type's attribute order; an empty string means the value is absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialInstance {
    pub credential_type: CredentialTypeIdentifier,
    pub attributes: Vec<String>,
    #[serde(default)]
    pub disabled: bool,
}

impl CredentialInstance {
    pub fn new(credential_type: CredentialTypeIdentifier, attributes: Vec<String>) -> Self {
        Self {
            credential_type,
            attributes,
            disabled: false,
        }
    }
}

/// One concrete attribute that satisfies a disjunction.
///
/// `index` is the position of the credential among the `count` held
/// instances of its type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeCandidate {
    #[serde(rename = "type")]
    pub attribute_type: AttributeTypeIdentifier,
    pub index: usize,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Resolve the attributes in `credentials` that satisfy `disjunction`.
///
/// Identifiers are tried in the disjunction's order and credentials in the
/// given order. Types unknown to `store` and disabled credentials are
/// skipped. An empty result is a normal outcome.
pub fn candidates(
    disjunction: &AttributeDisjunction,
    credentials: &[CredentialInstance],
    store: &dyn TrustStore,
) -> Vec<AttributeCandidate> {
    let mut result = Vec::new();

    for attribute in &disjunction.attributes {
        let type_id = attribute.credential_type_identifier();
        let Some(credential_type) = store.credential_type(&type_id) else {
            continue;
        };
        let held: Vec<&CredentialInstance> = credentials
            .iter()
            .filter(|c| c.credential_type == type_id)
            .collect();
        let count = held.len();

        for (index, credential) in held.into_iter().enumerate() {
            if credential.disabled {
                continue;
            }
            if attribute.is_credential() {
                result.push(AttributeCandidate {
                    attribute_type: attribute.clone(),
                    index,
                    count,
                    value: None,
                });
                continue;
            }

            let value = credential_type
                .index_of(attribute)
                .and_then(|pos| credential.attributes.get(pos))
                .filter(|v| !v.is_empty());
            let Some(value) = value else {
                continue;
            };
            if let Some(required) = disjunction.values.get(attribute) {
                if value != required {
                    continue;
                }
            }
            result.push(AttributeCandidate {
                attribute_type: attribute.clone(),
                index,
                count,
                value: Some(value.clone()),
            });
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trust_store::{CredentialType, InMemoryTrustStore};

    fn student_card() -> CredentialTypeIdentifier {
        CredentialTypeIdentifier::new("irma-demo.RU.studentCard")
    }

    fn student_id() -> AttributeTypeIdentifier {
        AttributeTypeIdentifier::new("irma-demo.RU.studentCard.studentID")
    }

    fn store() -> InMemoryTrustStore {
        let mut store = InMemoryTrustStore::new();
        store.add_credential_type(CredentialType::new(
            student_card(),
            vec!["university".into(), "studentCardNumber".into(), "studentID".into(), "level".into()],
        ));
        store.add_credential_type(CredentialType::new(
            CredentialTypeIdentifier::new("irma-demo.MijnOverheid.ageLower"),
            vec!["over12".into(), "over16".into(), "over18".into()],
        ));
        store
    }

    fn card(id: &str) -> CredentialInstance {
        CredentialInstance::new(
            student_card(),
            vec!["Radboud".into(), "0812345673".into(), id.into(), "PhD".into()],
        )
    }

    #[test]
    fn test_single_candidate_without_value() {
        let disjunction = AttributeDisjunction::new("ID", vec![student_id()]);
        let found = candidates(&disjunction, &[card("456")], &store());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].attribute_type, student_id());
        assert_eq!(found[0].value.as_deref(), Some("456"));
        assert_eq!((found[0].index, found[0].count), (0, 1));
    }

    #[test]
    fn test_required_value_matches() {
        let disjunction =
            AttributeDisjunction::with_values("ID", vec![(student_id(), "456".into())]);
        let found = candidates(&disjunction, &[card("456")], &store());
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_required_value_mismatch_is_empty() {
        let disjunction =
            AttributeDisjunction::with_values("ID", vec![(student_id(), "foobarbaz".into())]);
        let found = candidates(&disjunction, &[card("456")], &store());
        assert!(found.is_empty());
    }

    #[test]
    fn test_order_follows_disjunction_then_store() {
        let over18 = AttributeTypeIdentifier::new("irma-demo.MijnOverheid.ageLower.over18");
        let disjunction = AttributeDisjunction::new("any", vec![over18.clone(), student_id()]);
        let credentials = vec![
            card("1"),
            CredentialInstance::new(
                CredentialTypeIdentifier::new("irma-demo.MijnOverheid.ageLower"),
                vec!["yes".into(), "yes".into(), "yes".into()],
            ),
            card("2"),
        ];
        let found = candidates(&disjunction, &credentials, &store());
        let summary: Vec<(String, usize, Option<String>)> = found
            .into_iter()
            .map(|c| (c.attribute_type.name().to_string(), c.index, c.value))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("over18".into(), 0, Some("yes".into())),
                ("studentID".into(), 0, Some("1".into())),
                ("studentID".into(), 1, Some("2".into())),
            ]
        );
    }

    #[test]
    fn test_skips_disabled_absent_and_unknown() {
        let mut disabled = card("1");
        disabled.disabled = true;
        let absent = card("");
        let disjunction = AttributeDisjunction::new(
            "ID",
            vec![AttributeTypeIdentifier::new("other.RU.card.id"), student_id()],
        );
        let found = candidates(&disjunction, &[disabled, absent, card("3")], &store());
        assert_eq!(found.len(), 1);
        assert_eq!((found[0].index, found[0].count), (2, 3));
    }

    #[test]
    fn test_whole_credential_identifier() {
        let disjunction = AttributeDisjunction::new(
            "card",
            vec![AttributeTypeIdentifier::new("irma-demo.RU.studentCard")],
        );
        let found = candidates(&disjunction, &[card("1")], &store());
        assert_eq!(found.len(), 1);
        assert!(found[0].value.is_none());
    }
}
