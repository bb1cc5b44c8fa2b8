use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::errors::CacheErrorKind;

pub const MAX_KEY_LENGTH: usize = 2048;

/// Identifier of a cached object, usually the URL it was downloaded from.
///
/// Only constructible through [`CacheKey::parse`], so holding one means the
/// key already passed validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CacheKey(String);

impl CacheKey {
    pub fn parse(raw: impl Into<String>) -> Result<Self, CacheErrorKind> {
        let key = raw.into();

        if key.is_empty() {
            return Err(CacheErrorKind::KeyInvalid("key is empty".into()));
        }

        if key.len() > MAX_KEY_LENGTH {
            return Err(CacheErrorKind::KeyInvalid(format!(
                "key is {} bytes, limit is {}",
                key.len(),
                MAX_KEY_LENGTH
            )));
        }

        if let Some(bad) = key.chars().find(|c| c.is_whitespace() || c.is_control()) {
            return Err(CacheErrorKind::KeyInvalid(format!(
                "key contains {:?}",
                bad
            )));
        }

        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CacheKey {
    fn fmt(&self, format: &mut Formatter) -> FmtResult {
        write!(format, "{}", self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for CacheKey {
    type Err = CacheErrorKind;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::parse(raw)
    }
}

impl TryFrom<String> for CacheKey {
    type Error = CacheErrorKind;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(raw)
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.0
    }
}
