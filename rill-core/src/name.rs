//! Log and consumer group names.
//!
//! A [`Name`] is a `namespace` plus a local `name`. It is the registry key
//! of a log or of a consumer group, so it must be stable across process
//! restarts: two names are equal iff both parts are equal.
//!
//! - URN form: `namespace/name` (used in logs and for display)
//! - Id form: `namespace-name` (filesystem-safe)

use std::fmt;

use crate::error::{Error, Result};
use crate::limits::{DEFAULT_NAMESPACE, NAME_PART_LENGTH_MAX};

/// Identifier of a log or of a consumer group.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Name {
    namespace: String,
    name: String,
}

impl Name {
    /// Creates a name from its namespace and local name.
    ///
    /// # Errors
    /// Returns `InvalidName` if a part is empty, too long, or contains a
    /// character outside `[A-Za-z0-9_.-]`.
    pub fn of(namespace: &str, name: &str) -> Result<Self> {
        validate_part(namespace)?;
        validate_part(name)?;
        Ok(Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }

    /// Parses a URN of the form `namespace/name`.
    ///
    /// A URN without separator lands in the default namespace.
    ///
    /// # Errors
    /// Returns `InvalidName` if the URN has more than one separator or if a
    /// part is invalid.
    pub fn of_urn(urn: &str) -> Result<Self> {
        match urn.split_once('/') {
            None => Self::of(DEFAULT_NAMESPACE, urn),
            Some((_, rest)) if rest.contains('/') => Err(Error::InvalidName {
                input: urn.to_string(),
                reason: "too many separators",
            }),
            Some((namespace, name)) => Self::of(namespace, name),
        }
    }

    /// Returns the namespace part.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the local name part.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the URN form, `namespace/name`.
    #[must_use]
    pub fn urn(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Returns the filesystem-safe id form, `namespace-name`.
    #[must_use]
    pub fn id(&self) -> String {
        format!("{}-{}", self.namespace, self.name)
    }
}

fn validate_part(part: &str) -> Result<()> {
    if part.is_empty() {
        return Err(Error::InvalidName {
            input: part.to_string(),
            reason: "empty part",
        });
    }
    if part.len() > NAME_PART_LENGTH_MAX {
        return Err(Error::InvalidName {
            input: part.to_string(),
            reason: "part too long",
        });
    }
    if !part
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err(Error::InvalidName {
            input: part.to_string(),
            reason: "unsupported character",
        });
    }
    Ok(())
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name({}/{})", self.namespace, self.name)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
