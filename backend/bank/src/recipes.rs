use serde::{Deserialize, Serialize};

use crate::{
    DecodeError, ValidationError,
    document::{Document, DocumentId, Fields, to_fields},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipe {
    pub id: DocumentId,
    pub name: String,
    pub ingredients: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct RecipeBody {
    name: String,
    ingredients: Vec<String>,
}

impl Recipe {
    pub fn from_document(document: &Document) -> Result<Self, DecodeError> {
        let body: RecipeBody = serde_json::from_value(document.fields.clone().into()).map_err(
            |source| DecodeError::Malformed {
                id: document.id.clone(),
                source,
            },
        )?;

        let name = body.name.trim();
        let ingredients: Vec<String> = body
            .ingredients
            .iter()
            .map(|ingredient| ingredient.trim())
            .filter(|ingredient| !ingredient.is_empty())
            .map(str::to_string)
            .collect();

        let invalid = |source| DecodeError::Invalid {
            id: document.id.clone(),
            source,
        };

        if name.is_empty() {
            return Err(invalid(ValidationError::EmptyName));
        }
        if ingredients.is_empty() {
            return Err(invalid(ValidationError::NoIngredients));
        }

        Ok(Self {
            id: document.id.clone(),
            name: name.to_string(),
            ingredients,
        })
    }
}

/// Splits `"carrot, onion,,salt "` into `["carrot", "onion", "salt"]`.
pub fn parse_ingredients(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

/// Validated input for creating or rewriting a recipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipeDraft {
    name: String,
    ingredients: Vec<String>,
}

impl RecipeDraft {
    pub fn new(name: &str, ingredients: &str) -> Result<Self, ValidationError> {
        let name = name.trim();

        if name.is_empty() {
            return Err(ValidationError::EmptyName);
        }

        let ingredients = parse_ingredients(ingredients);

        if ingredients.is_empty() {
            return Err(ValidationError::NoIngredients);
        }

        Ok(Self {
            name: name.to_string(),
            ingredients,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ingredients(&self) -> &[String] {
        &self.ingredients
    }

    pub fn to_fields(&self) -> Fields {
        to_fields(&RecipeBody {
            name: self.name.clone(),
            ingredients: self.ingredients.clone(),
        })
    }
}
