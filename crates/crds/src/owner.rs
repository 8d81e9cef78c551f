//! Owner identities stored in pool allocation records
//!
//! An owner identity names the controlling workload of a pod. On the wire it
//! is the string `<namespace>/<kind>/<name>`; in code it is an
//! [`OwnerIdentity`], validated when parsed from external input.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Workload kinds an owner identity can refer to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OwnerKind {
    StatefulSet,
    Deployment,
    ReplicaSet,
    DaemonSet,
    Job,
    /// Any other kind. Carried through untouched; never looked up.
    Other(String),
}

impl OwnerKind {
    /// The kind as it appears in `ownerReferences` and identity strings.
    pub fn as_str(&self) -> &str {
        match self {
            OwnerKind::StatefulSet => "StatefulSet",
            OwnerKind::Deployment => "Deployment",
            OwnerKind::ReplicaSet => "ReplicaSet",
            OwnerKind::DaemonSet => "DaemonSet",
            OwnerKind::Job => "Job",
            OwnerKind::Other(kind) => kind,
        }
    }

    /// Returns true for kinds the controller can look up.
    pub fn is_supported(&self) -> bool {
        !matches!(self, OwnerKind::Other(_))
    }
}

impl From<&str> for OwnerKind {
    fn from(kind: &str) -> Self {
        match kind {
            "StatefulSet" => OwnerKind::StatefulSet,
            "Deployment" => OwnerKind::Deployment,
            "ReplicaSet" => OwnerKind::ReplicaSet,
            "DaemonSet" => OwnerKind::DaemonSet,
            "Job" => OwnerKind::Job,
            other => OwnerKind::Other(other.to_string()),
        }
    }
}

impl fmt::Display for OwnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised when an identity string does not have the expected shape.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OwnerParseError {
    /// Not exactly three `/`-separated parts
    #[error("expected <namespace>/<kind>/<name>, got {parts} part(s) in '{raw}'")]
    PartCount { raw: String, parts: usize },

    /// One of the parts is empty
    #[error("empty {field} in owner identity '{raw}'")]
    EmptyPart { raw: String, field: &'static str },
}

/// Identity of the workload that reserved a pool address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OwnerIdentity {
    pub namespace: String,
    pub kind: OwnerKind,
    pub name: String,
}

impl OwnerIdentity {
    /// Creates an identity from its parts.
    pub fn new(namespace: impl Into<String>, kind: impl Into<OwnerKind>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            kind: kind.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for OwnerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.kind, self.name)
    }
}

impl FromStr for OwnerIdentity {
    type Err = OwnerParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = raw.split('/').collect();
        let [namespace, kind, name] = parts.as_slice() else {
            return Err(OwnerParseError::PartCount {
                raw: raw.to_string(),
                parts: parts.len(),
            });
        };

        for (field, value) in [("namespace", namespace), ("kind", kind), ("name", name)] {
            if value.is_empty() {
                return Err(OwnerParseError::EmptyPart {
                    raw: raw.to_string(),
                    field,
                });
            }
        }

        Ok(OwnerIdentity::new(*namespace, OwnerKind::from(*kind), *name))
    }
}
