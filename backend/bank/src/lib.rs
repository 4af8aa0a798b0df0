//! # Pantry Bank
//!
//! Shared data model for the pantry tracker.
//!
//! ## Overall Data Structures
//!
//! - Group key (**string**, 6 chars `[0-9A-Z]`): scopes every read and write. Generated on "create group",
//!   typed in by other members on "join group". Always uppercase, both on create and join.
//!
//! - Item (id: **string**, name: **string**, quantity: **int** >= 1): one pantry entry.
//!
//! - Recipe (id: **string**, name: **string**, ingredients: **list of strings**): ingredients come from a
//!   comma separated input, each token trimmed, empty tokens dropped, order kept.
//!
//! ### Documents
//! - Everything lives in the remote document store as JSON objects under `{group}/{collection}/{id}`.
//! - Ids are assigned by the store on creation and never change.
//! - The group itself is a marker document holding its creation timestamp.
//!
//! ## Notes
//! - Drafts are the only way to build a write, so a write that reaches the store has already been validated.
//! - Decoding a stored document re-checks the invariants since other clients can write anything.

pub mod document;
pub mod group;
pub mod items;
pub mod recipes;

use thiserror::Error;

pub use document::{Collection, Document, DocumentId, Fields};
pub use group::{GroupKey, GroupMarker};
pub use items::{Item, ItemDraft, QuantityUpdate};
pub use recipes::{Recipe, RecipeDraft, parse_ingredients};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Name must not be empty")]
    EmptyName,

    #[error("Quantity must be at least 1, got {0}")]
    Quantity(i64),

    #[error("Recipe needs at least one ingredient")]
    NoIngredients,

    #[error("Invalid group key {0:?}, expected {len} characters from 0-9 and A-Z", len = group::GROUP_KEY_LEN)]
    GroupKey(String),

    #[error("Document id must not be empty")]
    EmptyId,
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Malformed document {id}: {source}")]
    Malformed {
        id: DocumentId,
        source: serde_json::Error,
    },

    #[error("Invalid document {id}: {source}")]
    Invalid {
        id: DocumentId,
        source: ValidationError,
    },
}
