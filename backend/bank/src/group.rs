use std::fmt;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::ValidationError;

pub const GROUP_KEY_LEN: usize = 6;

const ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Short shared key naming a pantry group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GroupKey(String);

impl GroupKey {
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let key = (0..GROUP_KEY_LEN)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect();

        Self(key)
    }

    /// Normalizes user input (`" ab12cd"` -> `AB12CD`) and checks the format.
    pub fn parse(candidate: &str) -> Result<Self, ValidationError> {
        let normalized = candidate.trim().to_ascii_uppercase();

        if normalized.len() != GROUP_KEY_LEN
            || !normalized.bytes().all(|b| ALPHABET.contains(&b))
        {
            return Err(ValidationError::GroupKey(candidate.to_string()));
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for GroupKey {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<GroupKey> for String {
    fn from(key: GroupKey) -> Self {
        key.0
    }
}

/// Existence marker written once when a group is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMarker {
    pub created_at: DateTime<Utc>,
}

impl GroupMarker {
    pub fn now() -> Self {
        Self {
            created_at: Utc::now(),
        }
    }
}
