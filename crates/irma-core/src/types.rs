use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, CoreResult};

// ---------------------------------------------------------------------------
// Dotted identifiers: scheme.issuer.credential.attribute
// ---------------------------------------------------------------------------

fn check_segments(id: &str, allowed: &[usize]) -> CoreResult<()> {
    let segments: Vec<&str> = id.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) || !allowed.contains(&segments.len()) {
        return Err(CoreError::InvalidIdentifier(id.to_string()));
    }
    Ok(())
}

fn parent_of(id: &str) -> &str {
    id.rsplit_once('.').map(|(parent, _)| parent).unwrap_or("")
}

macro_rules! define_identifier {
    ($name:ident, $doc:expr, $segments:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Wraps a dotted string without validating it.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Last segment of the dotted form.
            pub fn name(&self) -> &str {
                self.0.rsplit('.').next().unwrap_or(&self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> CoreResult<Self> {
                check_segments(s, $segments)?;
                Ok(Self(s.to_string()))
            }
        }

        impl TryFrom<String> for $name {
            type Error = CoreError;

            fn try_from(s: String) -> CoreResult<Self> {
                check_segments(&s, $segments)?;
                Ok(Self(s))
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> String {
                id.0
            }
        }
    };
}

define_identifier!(
    SchemeManagerIdentifier,
    "Identifier of a scheme manager, e.g. `irma-demo`.",
    &[1]
);
define_identifier!(
    IssuerIdentifier,
    "Identifier of an issuer, e.g. `irma-demo.RU`.",
    &[2]
);
define_identifier!(
    CredentialTypeIdentifier,
    "Identifier of a credential type, e.g. `irma-demo.RU.studentCard`.",
    &[3]
);
define_identifier!(
    AttributeTypeIdentifier,
    "Identifier of an attribute type, e.g. `irma-demo.RU.studentCard.studentID`.\n\nA three-segment value names a whole credential instead of one of its attributes.",
    &[3, 4]
);

impl IssuerIdentifier {
    pub fn scheme_manager_identifier(&self) -> SchemeManagerIdentifier {
        SchemeManagerIdentifier::new(parent_of(&self.0))
    }
}

impl CredentialTypeIdentifier {
    pub fn issuer_identifier(&self) -> IssuerIdentifier {
        IssuerIdentifier::new(parent_of(&self.0))
    }
}

impl AttributeTypeIdentifier {
    /// True when this identifier names a credential rather than an attribute.
    pub fn is_credential(&self) -> bool {
        self.0.matches('.').count() == 2
    }

    pub fn credential_type_identifier(&self) -> CredentialTypeIdentifier {
        if self.is_credential() {
            CredentialTypeIdentifier::new(self.0.clone())
        } else {
            CredentialTypeIdentifier::new(parent_of(&self.0))
        }
    }
}

// ---------------------------------------------------------------------------
// Action: the three session kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Disclosing,
    Signing,
    Issuing,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Disclosing => write!(f, "disclosing"),
            Action::Signing => write!(f, "signing"),
            Action::Issuing => write!(f, "issuing"),
        }
    }
}

// ---------------------------------------------------------------------------
// ProtocolVersion: {major, minor}, ordered lexicographically
// ---------------------------------------------------------------------------

/// Wallet protocol version.
///
/// Accepts both the structured `{"major": 2, "minor": 4}` form and the
/// legacy `"2.4"` string form when deserializing; always serializes the
/// structured form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "VersionRepr")]
pub struct ProtocolVersion {
    pub major: u32,
    pub minor: u32,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum VersionRepr {
    Structured { major: u32, minor: u32 },
    Dotted(String),
}

impl TryFrom<VersionRepr> for ProtocolVersion {
    type Error = CoreError;

    fn try_from(repr: VersionRepr) -> CoreResult<Self> {
        match repr {
            VersionRepr::Structured { major, minor } => Ok(Self::new(major, minor)),
            VersionRepr::Dotted(s) => s.parse(),
        }
    }
}

impl ProtocolVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for ProtocolVersion {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        let invalid = || CoreError::Serialization(format!("invalid protocol version: {s}"));
        let (major, minor) = s.split_once('.').ok_or_else(invalid)?;
        Ok(Self {
            major: major.parse().map_err(|_| invalid())?,
            minor: minor.parse().map_err(|_| invalid())?,
        })
    }
}
