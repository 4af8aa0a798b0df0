//! # Search
//!
//! Narrows the projected lists down to what the user typed.
//!
//! Runs on the client over the live lists. A pantry holds tens of items per group, so there is no search index to
//! keep in sync with the store.
//!
//! ## Rules
//! - Case-insensitive substring on the name
//! - Empty term matches everything
//! - Order of the input list is kept
use bank::{Item, Recipe};

pub trait Named {
    fn name(&self) -> &str;
}

impl Named for Item {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Named for Recipe {
    fn name(&self) -> &str {
        &self.name
    }
}

pub fn filter_by_name<'a, T: Named>(entries: &'a [T], term: &str) -> Vec<&'a T> {
    let term = term.trim().to_lowercase();

    entries
        .iter()
        .filter(|entry| entry.name().to_lowercase().contains(&term))
        .collect()
}

/// Ingredients of `recipe` no pantry item is named after.
pub fn missing_ingredients<'a>(recipe: &'a Recipe, items: &[Item]) -> Vec<&'a str> {
    let stocked: Vec<String> = items
        .iter()
        .map(|item| item.name.trim().to_lowercase())
        .collect();

    recipe
        .ingredients
        .iter()
        .map(String::as_str)
        .filter(|ingredient| !stocked.contains(&ingredient.trim().to_lowercase()))
        .collect()
}
