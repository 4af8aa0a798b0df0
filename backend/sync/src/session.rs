use std::sync::Arc;

use bank::{DocumentId, GroupKey, GroupMarker, Item, Recipe};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::{
    config::Config,
    database::init_redis,
    error::PantryError,
    gateway::Gateway,
    identity::{FileStorage, IdentityStore, LocalStorage},
    live::{LiveSync, PantryView, SyncState},
    mutations::Mutations,
};

/// Attempts at drawing an unused key before giving up on `create_group`.
pub const MAX_GROUP_KEY_ATTEMPTS: usize = 8;

/// The active group, or none. Only group lifecycle operations change it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    group: Option<GroupKey>,
}

impl SessionContext {
    pub fn with_group(group: GroupKey) -> Self {
        Self { group: Some(group) }
    }

    pub fn group(&self) -> Option<&GroupKey> {
        self.group.as_ref()
    }

    pub fn require(&self) -> Result<&GroupKey, PantryError> {
        self.group.as_ref().ok_or(PantryError::NoActiveGroup)
    }
}

pub struct Session {
    gateway: Arc<dyn Gateway>,
    identity: IdentityStore,
    sync: LiveSync,
    mutations: Mutations,
    context: SessionContext,
}

impl Session {
    pub fn new(gateway: Arc<dyn Gateway>, storage: Arc<dyn LocalStorage>) -> Self {
        Self {
            mutations: Mutations::new(gateway.clone()),
            gateway,
            identity: IdentityStore::new(storage),
            sync: LiveSync::new(),
            context: SessionContext::default(),
        }
    }

    /// Redis gateway plus file-backed identity, both from `config`.
    pub async fn connect(config: &Config) -> Result<Self, PantryError> {
        let gateway = init_redis(config).await?;
        let storage = FileStorage::new(config.storage_dir.clone());

        Ok(Self::new(Arc::new(gateway), Arc::new(storage)))
    }

    /// Resumes the group saved by a previous run, if any, and subscribes to it.
    pub async fn start(&mut self) -> Result<Option<GroupKey>, PantryError> {
        let Some(group) = self.saved_group() else {
            return Ok(None);
        };

        self.activate(group.clone()).await?;

        Ok(Some(group))
    }

    /// Makes the saved group active for one-shot reads and writes without
    /// subscribing to it. Never contacts the store.
    pub fn restore(&mut self) -> Option<GroupKey> {
        let group = self.saved_group()?;
        self.context.group = Some(group.clone());

        Some(group)
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn active_group(&self) -> Option<&GroupKey> {
        self.context.group()
    }

    pub fn sync_state(&self) -> SyncState {
        self.sync.state()
    }

    pub fn view(&self) -> PantryView {
        self.sync.view()
    }

    pub fn watch(&self) -> watch::Receiver<PantryView> {
        self.sync.watch()
    }

    pub async fn create_group(&mut self) -> Result<GroupKey, PantryError> {
        let group = self.claim_group_key().await?;
        info!("Created group {group}");

        self.activate(group.clone()).await?;
        self.identity.save(&group);

        Ok(group)
    }

    /// Fails with [`PantryError::GroupNotFound`] when no such group was ever
    /// created, leaving the current group in place.
    pub async fn join_group(&mut self, candidate: &str) -> Result<GroupKey, PantryError> {
        let group = GroupKey::parse(candidate)?;

        if !self.gateway.group_exists(&group).await? {
            warn!("Join failed, group {group} does not exist");
            return Err(PantryError::GroupNotFound(group));
        }

        self.activate(group.clone()).await?;
        self.identity.save(&group);
        info!("Joined group {group}");

        Ok(group)
    }

    /// Forgets the group locally, remote data stays.
    pub fn leave_group(&mut self) {
        if let Some(group) = self.context.group.take() {
            info!("Left group {group}");
        }

        self.sync.teardown();
        self.identity.clear();
    }

    pub fn shutdown(&mut self) {
        self.sync.teardown();
    }

    pub async fn add_item(&self, name: &str, quantity: i64) -> Result<DocumentId, PantryError> {
        self.mutations
            .create_item(&self.context, name, quantity)
            .await
    }

    pub async fn set_item_quantity(
        &self,
        id: &DocumentId,
        quantity: i64,
    ) -> Result<(), PantryError> {
        self.mutations
            .update_item_quantity(&self.context, id, quantity)
            .await
    }

    pub async fn remove_item(&self, id: &DocumentId) -> Result<(), PantryError> {
        self.mutations.remove_item(&self.context, id).await
    }

    pub async fn add_recipe(
        &self,
        name: &str,
        ingredients: &str,
    ) -> Result<DocumentId, PantryError> {
        self.mutations
            .create_recipe(&self.context, name, ingredients)
            .await
    }

    pub async fn update_recipe(
        &self,
        id: &DocumentId,
        name: &str,
        ingredients: &str,
    ) -> Result<(), PantryError> {
        self.mutations
            .update_recipe(&self.context, id, name, ingredients)
            .await
    }

    pub async fn remove_recipe(&self, id: &DocumentId) -> Result<(), PantryError> {
        self.mutations.remove_recipe(&self.context, id).await
    }

    pub async fn fetch_items(&self) -> Result<Vec<Item>, PantryError> {
        self.mutations.fetch_items(&self.context).await
    }

    pub async fn fetch_recipes(&self) -> Result<Vec<Recipe>, PantryError> {
        self.mutations.fetch_recipes(&self.context).await
    }

    fn saved_group(&self) -> Option<GroupKey> {
        match self.identity.load() {
            Some(group) => {
                info!("Resuming group {group}");
                Some(group)
            }
            None => {
                info!("No saved group");
                None
            }
        }
    }

    async fn activate(&mut self, group: GroupKey) -> Result<(), PantryError> {
        self.sync.attach(&self.gateway, &group).await?;
        self.context.group = Some(group);

        Ok(())
    }

    async fn claim_group_key(&self) -> Result<GroupKey, PantryError> {
        for _ in 0..MAX_GROUP_KEY_ATTEMPTS {
            let group = GroupKey::generate(&mut rand::thread_rng());

            if self
                .gateway
                .create_group_marker(&group, &GroupMarker::now())
                .await?
            {
                return Ok(group);
            }

            warn!("Generated group key {group} is taken, drawing another");
        }

        Err(PantryError::GroupKeyExhausted(MAX_GROUP_KEY_ATTEMPTS))
    }
}
