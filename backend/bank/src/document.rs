use std::fmt;

use rand::{Rng, distributions::Alphanumeric};
use serde::{Deserialize, Serialize};

use crate::ValidationError;

pub const DOCUMENT_ID_LEN: usize = 20;

/// Body of a stored document.
pub type Fields = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self(
            rng.sample_iter(&Alphanumeric)
                .take(DOCUMENT_ID_LEN)
                .map(char::from)
                .collect(),
        )
    }

    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let trimmed = raw.trim();

        if trimmed.is_empty() {
            return Err(ValidationError::EmptyId);
        }

        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Items,
    Recipes,
}

impl Collection {
    pub const ALL: [Collection; 2] = [Collection::Items, Collection::Recipes];

    pub fn as_str(self) -> &'static str {
        match self {
            Collection::Items => "items",
            Collection::Recipes => "recipes",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: DocumentId,
    pub fields: Fields,
}

impl Document {
    pub fn new(id: DocumentId, fields: Fields) -> Self {
        Self { id, fields }
    }
}

/// Serializes a struct into a document body. Only structs map to objects,
/// which is all the model ever writes.
pub(crate) fn to_fields<T: Serialize>(value: &T) -> Fields {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::Object(fields)) => fields,
        _ => Fields::new(),
    }
}
