//! Bucket name validation.
//!
//! A bucket name becomes a file stem under the store root, so it must not be
//! able to escape that directory. Valid names:
//! - Must be non-empty
//! - Must not contain whitespace, `/`, `\`, `:` or NUL
//! - Must not contain `..`
//! - Must not start with `.`

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Characters that are forbidden anywhere in a bucket name.
const FORBIDDEN_CHARS: &[char] = &['/', '\\', ':', '\0'];

/// Identifier of one bucket: the simple name of the record type stored in it.
///
/// # Examples
///
/// ```
/// use shelf_types::BucketId;
///
/// assert!(BucketId::new("User").is_ok());
/// assert!(BucketId::new("").is_err());
/// assert!(BucketId::new("../etc").is_err());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BucketId(String);

impl BucketId {
    /// Validate `name` and wrap it as a bucket identifier.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        validate(&name)?;
        Ok(Self(name))
    }

    /// The bucket name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of this bucket with the given extension (`User.db`).
    pub fn file_name(&self, extension: &str) -> String {
        if extension.is_empty() {
            self.0.clone()
        } else {
            format!("{}.{}", self.0, extension)
        }
    }
}

fn validate(name: &str) -> Result<(), TypeError> {
    let invalid = |reason: &str| TypeError::InvalidBucketName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("bucket name must not be empty"));
    }
    if let Some(ch) = name
        .chars()
        .find(|c| c.is_whitespace() || FORBIDDEN_CHARS.contains(c))
    {
        return Err(invalid(&format!("contains forbidden character: {ch:?}")));
    }
    if name.contains("..") {
        return Err(invalid("must not contain '..'"));
    }
    if name.starts_with('.') {
        return Err(invalid("must not start with '.'"));
    }
    Ok(())
}

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for BucketId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for BucketId {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for BucketId {
    type Error = TypeError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BucketId> for String {
    fn from(id: BucketId) -> Self {
        id.0
    }
}
