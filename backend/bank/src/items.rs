use serde::{Deserialize, Serialize};

use crate::{
    DecodeError, ValidationError,
    document::{Document, DocumentId, Fields, to_fields},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub id: DocumentId,
    pub name: String,
    pub quantity: u32,
}

#[derive(Serialize, Deserialize)]
struct ItemBody {
    name: String,
    quantity: i64,
}

impl Item {
    pub fn from_document(document: &Document) -> Result<Self, DecodeError> {
        let body: ItemBody = serde_json::from_value(document.fields.clone().into()).map_err(
            |source| DecodeError::Malformed {
                id: document.id.clone(),
                source,
            },
        )?;

        let draft = ItemDraft::new(&body.name, body.quantity).map_err(|source| {
            DecodeError::Invalid {
                id: document.id.clone(),
                source,
            }
        })?;

        Ok(Self {
            id: document.id.clone(),
            name: draft.name,
            quantity: draft.quantity,
        })
    }
}

/// Validated input for a new item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemDraft {
    name: String,
    quantity: u32,
}

impl ItemDraft {
    pub fn new(name: &str, quantity: i64) -> Result<Self, ValidationError> {
        let name = name.trim();

        if name.is_empty() {
            return Err(ValidationError::EmptyName);
        }

        Ok(Self {
            name: name.to_string(),
            quantity: QuantityUpdate::new(quantity)?.quantity,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn quantity(&self) -> u32 {
        self.quantity
    }

    pub fn to_fields(&self) -> Fields {
        to_fields(&ItemBody {
            name: self.name.clone(),
            quantity: i64::from(self.quantity),
        })
    }
}

/// Validated partial update of an item's quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantityUpdate {
    quantity: u32,
}

impl QuantityUpdate {
    pub fn new(quantity: i64) -> Result<Self, ValidationError> {
        match u32::try_from(quantity) {
            Ok(quantity) if quantity >= 1 => Ok(Self { quantity }),
            _ => Err(ValidationError::Quantity(quantity)),
        }
    }

    pub fn quantity(&self) -> u32 {
        self.quantity
    }

    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("quantity".to_string(), self.quantity.into());
        fields
    }
}
