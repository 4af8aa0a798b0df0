use std::sync::Arc;

use bank::{Collection, DocumentId, Item, ItemDraft, QuantityUpdate, Recipe, RecipeDraft};
use tracing::{info, warn};

use crate::{error::PantryError, gateway::Gateway, session::SessionContext};

/// Validated writes against the active group.
///
/// Every operation validates first, then requires a group, then talks to the
/// gateway. Local state is never touched here, the subscription brings the
/// write back.
#[derive(Clone)]
pub struct Mutations {
    gateway: Arc<dyn Gateway>,
}

impl Mutations {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self { gateway }
    }

    pub async fn create_item(
        &self,
        context: &SessionContext,
        name: &str,
        quantity: i64,
    ) -> Result<DocumentId, PantryError> {
        let draft = ItemDraft::new(name, quantity)?;
        let group = context.require()?;

        let id = self
            .gateway
            .create(group, Collection::Items, draft.to_fields())
            .await?;
        info!("Added item {id} ({} x{}) to {group}", draft.name(), draft.quantity());

        Ok(id)
    }

    pub async fn update_item_quantity(
        &self,
        context: &SessionContext,
        id: &DocumentId,
        quantity: i64,
    ) -> Result<(), PantryError> {
        let update = QuantityUpdate::new(quantity)?;
        let group = context.require()?;

        self.gateway
            .update(group, Collection::Items, id, update.to_fields())
            .await?;
        info!("Set item {id} quantity to {}", update.quantity());

        Ok(())
    }

    pub async fn remove_item(
        &self,
        context: &SessionContext,
        id: &DocumentId,
    ) -> Result<(), PantryError> {
        let group = context.require()?;

        self.gateway.delete(group, Collection::Items, id).await?;
        info!("Removed item {id} from {group}");

        Ok(())
    }

    pub async fn create_recipe(
        &self,
        context: &SessionContext,
        name: &str,
        ingredients: &str,
    ) -> Result<DocumentId, PantryError> {
        let draft = RecipeDraft::new(name, ingredients)?;
        let group = context.require()?;

        let id = self
            .gateway
            .create(group, Collection::Recipes, draft.to_fields())
            .await?;
        info!(
            "Added recipe {id} ({}, {} ingredients) to {group}",
            draft.name(),
            draft.ingredients().len()
        );

        Ok(id)
    }

    /// Rewrites name and ingredients, the ingredient input is split again.
    pub async fn update_recipe(
        &self,
        context: &SessionContext,
        id: &DocumentId,
        name: &str,
        ingredients: &str,
    ) -> Result<(), PantryError> {
        let draft = RecipeDraft::new(name, ingredients)?;
        let group = context.require()?;

        self.gateway
            .update(group, Collection::Recipes, id, draft.to_fields())
            .await?;
        info!("Updated recipe {id}");

        Ok(())
    }

    pub async fn remove_recipe(
        &self,
        context: &SessionContext,
        id: &DocumentId,
    ) -> Result<(), PantryError> {
        let group = context.require()?;

        self.gateway.delete(group, Collection::Recipes, id).await?;
        info!("Removed recipe {id} from {group}");

        Ok(())
    }

    /// One-shot read, no subscription involved.
    pub async fn fetch_items(&self, context: &SessionContext) -> Result<Vec<Item>, PantryError> {
        let group = context.require()?;
        let snapshot = self.gateway.get_all(group, Collection::Items).await?;

        Ok(snapshot
            .iter()
            .filter_map(|document| {
                Item::from_document(document)
                    .map_err(|e| warn!("Skipping document: {e}"))
                    .ok()
            })
            .collect())
    }

    pub async fn fetch_recipes(
        &self,
        context: &SessionContext,
    ) -> Result<Vec<Recipe>, PantryError> {
        let group = context.require()?;
        let snapshot = self.gateway.get_all(group, Collection::Recipes).await?;

        Ok(snapshot
            .iter()
            .filter_map(|document| {
                Recipe::from_document(document)
                    .map_err(|e| warn!("Skipping document: {e}"))
                    .ok()
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use bank::{GroupKey, ValidationError};

    use super::*;
    use crate::{error::GatewayError, memory::MemoryGateway};

    fn setup() -> (Arc<MemoryGateway>, Mutations, SessionContext) {
        let memory = Arc::new(MemoryGateway::new());
        let mutations = Mutations::new(memory.clone());
        let context = SessionContext::with_group(GroupKey::parse("AB12CD").unwrap());

        (memory, mutations, context)
    }

    #[tokio::test]
    async fn test_create_then_fetch() {
        let (_, mutations, context) = setup();

        let id = mutations.create_item(&context, "Rice", 2).await.unwrap();
        let items = mutations.fetch_items(&context).await.unwrap();

        assert_eq!(
            items,
            vec![Item {
                id,
                name: "Rice".to_string(),
                quantity: 2
            }]
        );
    }

    #[tokio::test]
    async fn test_invalid_quantity_never_reaches_gateway() {
        let (memory, mutations, context) = setup();

        for quantity in [0, -1, i64::MIN] {
            assert!(matches!(
                mutations.create_item(&context, "Rice", quantity).await,
                Err(PantryError::Validation(ValidationError::Quantity(_)))
            ));
        }

        let id = mutations.create_item(&context, "Rice", 2).await.unwrap();
        assert!(matches!(
            mutations.update_item_quantity(&context, &id, 0).await,
            Err(PantryError::Validation(ValidationError::Quantity(0)))
        ));

        assert_eq!(memory.write_count(), 1);
        assert_eq!(mutations.fetch_items(&context).await.unwrap()[0].quantity, 2);
    }

    #[tokio::test]
    async fn test_update_quantity_round_trip() {
        let (_, mutations, context) = setup();
        let id = mutations.create_item(&context, "Rice", 2).await.unwrap();

        for quantity in [1, 5, 1000] {
            mutations
                .update_item_quantity(&context, &id, quantity)
                .await
                .unwrap();

            let items = mutations.fetch_items(&context).await.unwrap();
            assert_eq!(i64::from(items[0].quantity), quantity);
            assert_eq!(items[0].name, "Rice");
        }
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let (_, mutations, context) = setup();
        let missing = DocumentId::parse("missing").unwrap();

        let err = mutations
            .update_item_quantity(&context, &missing, 3)
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        assert!(matches!(
            err,
            PantryError::Gateway(GatewayError::NotFound {
                collection: Collection::Items,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_remove_twice() {
        let (_, mutations, context) = setup();
        let id = mutations.create_item(&context, "Rice", 2).await.unwrap();

        mutations.remove_item(&context, &id).await.unwrap();
        mutations.remove_item(&context, &id).await.unwrap();

        assert!(mutations.fetch_items(&context).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_active_group() {
        let (memory, mutations, _) = setup();
        let context = SessionContext::default();

        let err = mutations.create_item(&context, "Rice", 2).await.unwrap_err();
        assert!(err.is_silent());

        let id = DocumentId::parse("x").unwrap();
        assert!(mutations.remove_recipe(&context, &id).await.unwrap_err().is_silent());
        assert_eq!(memory.write_count(), 0);
    }

    #[tokio::test]
    async fn test_recipe_ingredients_split() {
        let (_, mutations, context) = setup();

        let id = mutations
            .create_recipe(&context, "Soup", "carrot, onion, salt")
            .await
            .unwrap();
        let recipes = mutations.fetch_recipes(&context).await.unwrap();

        assert_eq!(recipes[0].id, id);
        assert_eq!(recipes[0].ingredients, vec!["carrot", "onion", "salt"]);

        mutations
            .update_recipe(&context, &id, "Stew", " beef ,, potato ")
            .await
            .unwrap();
        let recipes = mutations.fetch_recipes(&context).await.unwrap();

        assert_eq!(recipes[0].name, "Stew");
        assert_eq!(recipes[0].ingredients, vec!["beef", "potato"]);
    }

    #[tokio::test]
    async fn test_recipe_validation() {
        let (memory, mutations, context) = setup();

        assert!(matches!(
            mutations.create_recipe(&context, "Soup", " , ").await,
            Err(PantryError::Validation(ValidationError::NoIngredients))
        ));
        assert!(matches!(
            mutations.create_recipe(&context, "  ", "salt").await,
            Err(PantryError::Validation(ValidationError::EmptyName))
        ));
        assert_eq!(memory.write_count(), 0);
    }

    #[tokio::test]
    async fn test_gateway_failure_is_transient() {
        let (memory, mutations, context) = setup();
        memory.set_offline(true);

        let err = mutations.create_item(&context, "Rice", 2).await.unwrap_err();
        assert!(err.is_transient());

        memory.set_offline(false);
        assert!(mutations.create_item(&context, "Rice", 2).await.is_ok());
    }
}
