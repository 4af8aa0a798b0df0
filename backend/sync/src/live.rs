//! # Live Synchronization
//!
//! Keeps the local item and recipe lists equal to what the store holds for the active group.
//!
//! ## States
//! - **Unsubscribed**: no group, nothing attached
//! - **Subscribed(group)**: one forwarding task per sub-collection, each fed by a gateway subscription
//!
//! ## Rules
//! - Every snapshot **replaces** its whole list, no delta merging. The store already guarantees snapshot
//!   consistency, so the projection is always some state the store actually had.
//! - Switching groups opens the new subscriptions first, then releases the old ones and bumps the generation.
//! - A forwarding task only writes while the view generation matches its own, so a snapshot that was already in
//!   flight for the old group is dropped instead of leaking into the new one.
//! - No retry here, the gateway reconnects on its own.
use std::sync::Arc;

use bank::{Collection, GroupKey, Item, Recipe};
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    error::GatewayError,
    gateway::{Gateway, Snapshot, Subscription},
};

/// Local projection of the active group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PantryView {
    pub group: Option<GroupKey>,
    pub generation: u64,
    pub items: Vec<Item>,
    pub recipes: Vec<Recipe>,
    pub items_loaded: bool,
    pub recipes_loaded: bool,
}

impl PantryView {
    /// Both initial snapshots arrived.
    pub fn is_loaded(&self) -> bool {
        self.items_loaded && self.recipes_loaded
    }

    fn apply(&mut self, collection: Collection, snapshot: &Snapshot) {
        match collection {
            Collection::Items => {
                self.items = decode_all(snapshot, Item::from_document);
                self.items_loaded = true;
            }
            Collection::Recipes => {
                self.recipes = decode_all(snapshot, Recipe::from_document);
                self.recipes_loaded = true;
            }
        }
    }
}

fn decode_all<T, E: std::fmt::Display>(
    snapshot: &Snapshot,
    decode: impl Fn(&bank::Document) -> Result<T, E>,
) -> Vec<T> {
    snapshot
        .iter()
        .filter_map(|document| {
            decode(document)
                .map_err(|e| {
                    warn!("Skipping document: {e}");
                })
                .ok()
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    Unsubscribed,
    Subscribed(GroupKey),
}

struct Attached {
    group: GroupKey,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

pub struct LiveSync {
    view: Arc<watch::Sender<PantryView>>,
    attached: Option<Attached>,
    generation: u64,
}

impl Default for LiveSync {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveSync {
    pub fn new() -> Self {
        let (view, _) = watch::channel(PantryView::default());

        Self {
            view: Arc::new(view),
            attached: None,
            generation: 0,
        }
    }

    pub fn state(&self) -> SyncState {
        match &self.attached {
            Some(attached) => SyncState::Subscribed(attached.group.clone()),
            None => SyncState::Unsubscribed,
        }
    }

    pub fn view(&self) -> PantryView {
        self.view.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<PantryView> {
        self.view.subscribe()
    }

    /// Points the projection at `group`. On error the previous state is kept.
    pub async fn attach(
        &mut self,
        gateway: &Arc<dyn Gateway>,
        group: &GroupKey,
    ) -> Result<(), GatewayError> {
        if matches!(&self.attached, Some(attached) if attached.group == *group) {
            return Ok(());
        }

        let items = gateway.subscribe(group, Collection::Items).await?;
        let recipes = gateway.subscribe(group, Collection::Recipes).await?;

        self.teardown();

        let generation = self.generation;
        self.view.send_modify(|view| {
            view.group = Some(group.clone());
        });

        let cancel = CancellationToken::new();
        let tasks = [(Collection::Items, items), (Collection::Recipes, recipes)]
            .into_iter()
            .map(|(collection, subscription)| {
                tokio::spawn(forward(
                    subscription,
                    collection,
                    self.view.clone(),
                    generation,
                    cancel.child_token(),
                ))
            })
            .collect();

        info!(
            "Subscribed to group {group} on {} (generation {generation})",
            gateway.backend_tag()
        );

        self.attached = Some(Attached {
            group: group.clone(),
            cancel,
            tasks,
        });

        Ok(())
    }

    /// Releases every subscription and empties the projection.
    pub fn teardown(&mut self) {
        if let Some(attached) = self.attached.take() {
            attached.cancel.cancel();
            for task in attached.tasks {
                task.abort();
            }

            info!("Unsubscribed from group {}", attached.group);
        }

        self.generation += 1;

        let generation = self.generation;
        self.view.send_modify(|view| {
            *view = PantryView {
                generation,
                ..PantryView::default()
            };
        });
    }
}

impl Drop for LiveSync {
    fn drop(&mut self) {
        if let Some(attached) = self.attached.take() {
            attached.cancel.cancel();
            for task in attached.tasks {
                task.abort();
            }
        }
    }
}

async fn forward(
    mut subscription: Subscription,
    collection: Collection,
    view: Arc<watch::Sender<PantryView>>,
    generation: u64,
    cancel: CancellationToken,
) {
    loop {
        let snapshot = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            snapshot = subscription.next() => snapshot,
        };

        let Some(snapshot) = snapshot else {
            break;
        };

        let applied = view.send_if_modified(|view| {
            if view.generation != generation {
                return false;
            }

            view.apply(collection, &snapshot);
            true
        });

        if !applied {
            debug!("Dropped stale {collection} snapshot from generation {generation}");
            break;
        }

        debug!(
            "Applied {collection} snapshot: {} documents (generation {generation})",
            snapshot.len()
        );
    }

    subscription.cancel();
}

#[cfg(test)]
mod tests {
    use bank::{Fields, GroupMarker};
    use serde_json::json;
    use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};

    use super::*;
    use crate::memory::MemoryGateway;

    fn group(raw: &str) -> GroupKey {
        GroupKey::parse(raw).unwrap()
    }

    fn item(name: &str, quantity: u32) -> Fields {
        match json!({ "name": name, "quantity": quantity }) {
            serde_json::Value::Object(fields) => fields,
            _ => unreachable!(),
        }
    }

    async fn wait_until(sync: &LiveSync, check: impl FnMut(&PantryView) -> bool) -> PantryView {
        let mut watch = sync.watch();
        let view = tokio::time::timeout(std::time::Duration::from_secs(2), watch.wait_for(check))
            .await
            .expect("view never reached the expected state")
            .expect("view sender dropped")
            .clone();

        view
    }

    #[tokio::test]
    async fn test_attach_loads_initial_snapshot() {
        let memory = Arc::new(MemoryGateway::new());
        memory
            .create(&group("AAAAAA"), Collection::Items, item("Rice", 2))
            .await
            .unwrap();
        let gateway: Arc<dyn Gateway> = memory;

        let mut sync = LiveSync::new();
        sync.attach(&gateway, &group("AAAAAA")).await.unwrap();

        let view = wait_until(&sync, PantryView::is_loaded).await;

        assert_eq!(sync.state(), SyncState::Subscribed(group("AAAAAA")));
        assert_eq!(view.items.len(), 1);
        assert_eq!(view.items[0].name, "Rice");
        assert!(view.recipes.is_empty());
    }

    #[tokio::test]
    async fn test_teardown_releases_subscriptions() {
        let memory = Arc::new(MemoryGateway::new());
        let gateway: Arc<dyn Gateway> = memory.clone();

        let mut sync = LiveSync::new();
        sync.attach(&gateway, &group("AAAAAA")).await.unwrap();
        wait_until(&sync, PantryView::is_loaded).await;

        sync.teardown();

        let released = || {
            Collection::ALL
                .iter()
                .all(|&collection| memory.subscriber_count(&group("AAAAAA"), collection) == 0)
        };
        for _ in 0..10 {
            if released() {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert_eq!(sync.state(), SyncState::Unsubscribed);
        assert_eq!(sync.view().group, None);
        assert!(released());
    }

    #[tokio::test]
    async fn test_attach_failure_keeps_previous_group() {
        let memory = Arc::new(MemoryGateway::new());
        let gateway: Arc<dyn Gateway> = memory.clone();

        let mut sync = LiveSync::new();
        sync.attach(&gateway, &group("AAAAAA")).await.unwrap();

        memory.set_offline(true);
        assert!(sync.attach(&gateway, &group("BBBBBB")).await.is_err());

        assert_eq!(sync.state(), SyncState::Subscribed(group("AAAAAA")));
        assert_eq!(sync.view().group, Some(group("AAAAAA")));
    }

    /// Gateway handing out subscriptions whose feeds the test controls.
    #[derive(Default)]
    struct ManualGateway {
        feeds: std::sync::Mutex<Vec<(GroupKey, Collection, UnboundedSender<Snapshot>)>>,
    }

    impl ManualGateway {
        fn push(&self, group: &GroupKey, collection: Collection, snapshot: Snapshot) {
            for (g, c, sender) in self.feeds.lock().unwrap().iter() {
                if g == group && *c == collection {
                    let _ = sender.send(snapshot.clone());
                }
            }
        }
    }

    #[async_trait::async_trait]
    impl Gateway for ManualGateway {
        fn backend_tag(&self) -> &'static str {
            "manual"
        }

        async fn get_all(&self, _: &GroupKey, _: Collection) -> Result<Snapshot, GatewayError> {
            Ok(Vec::new())
        }

        async fn subscribe(
            &self,
            group: &GroupKey,
            collection: Collection,
        ) -> Result<Subscription, GatewayError> {
            let (sender, receiver) = unbounded_channel();
            self.feeds
                .lock()
                .unwrap()
                .push((group.clone(), collection, sender));

            Ok(Subscription::new(receiver, CancellationToken::new()))
        }

        async fn create(
            &self,
            _: &GroupKey,
            _: Collection,
            _: Fields,
        ) -> Result<bank::DocumentId, GatewayError> {
            unimplemented!()
        }

        async fn update(
            &self,
            _: &GroupKey,
            _: Collection,
            _: &bank::DocumentId,
            _: Fields,
        ) -> Result<(), GatewayError> {
            unimplemented!()
        }

        async fn delete(
            &self,
            _: &GroupKey,
            _: Collection,
            _: &bank::DocumentId,
        ) -> Result<(), GatewayError> {
            unimplemented!()
        }

        async fn group_exists(&self, _: &GroupKey) -> Result<bool, GatewayError> {
            Ok(true)
        }

        async fn create_group_marker(
            &self,
            _: &GroupKey,
            _: &GroupMarker,
        ) -> Result<bool, GatewayError> {
            Ok(true)
        }
    }

    fn document(id: &str, name: &str) -> bank::Document {
        bank::Document::new(bank::DocumentId::parse(id).unwrap(), item(name, 1))
    }

    #[tokio::test]
    async fn test_late_snapshot_from_old_group_is_dropped() {
        let manual = Arc::new(ManualGateway::default());
        let gateway: Arc<dyn Gateway> = manual.clone();

        let mut sync = LiveSync::new();
        sync.attach(&gateway, &group("AAAAAA")).await.unwrap();
        manual.push(&group("AAAAAA"), Collection::Items, vec![document("a", "Old")]);
        wait_until(&sync, |view| view.items.len() == 1).await;

        sync.attach(&gateway, &group("BBBBBB")).await.unwrap();
        manual.push(&group("BBBBBB"), Collection::Items, vec![document("b", "New")]);

        // Late notification for the group we just left.
        manual.push(&group("AAAAAA"), Collection::Items, vec![document("c", "Leak")]);

        let view = wait_until(&sync, |view| view.items_loaded).await;
        tokio::task::yield_now().await;
        let view_after = sync.view();

        assert_eq!(view.group, Some(group("BBBBBB")));
        assert_eq!(view_after.items.len(), 1);
        assert_eq!(view_after.items[0].name, "New");
    }

    #[tokio::test]
    async fn test_stale_generation_is_rejected() {
        let sync = LiveSync::new();
        let (sender, receiver) = unbounded_channel();
        let stale_generation = sync.generation + 1;

        let task = tokio::spawn(forward(
            Subscription::new(receiver, CancellationToken::new()),
            Collection::Items,
            sync.view.clone(),
            stale_generation,
            CancellationToken::new(),
        ));

        sender.send(vec![document("a", "Leak")]).unwrap();
        task.await.unwrap();

        assert!(sync.view().items.is_empty());
        assert!(!sync.view().items_loaded);
    }

    #[tokio::test]
    async fn test_same_group_attach_is_noop() {
        let memory = Arc::new(MemoryGateway::new());
        let gateway: Arc<dyn Gateway> = memory.clone();

        let mut sync = LiveSync::new();
        sync.attach(&gateway, &group("AAAAAA")).await.unwrap();
        let generation = sync.view().generation;

        sync.attach(&gateway, &group("AAAAAA")).await.unwrap();

        assert_eq!(sync.view().generation, generation);
        assert_eq!(memory.subscriber_count(&group("AAAAAA"), Collection::Items), 1);
    }
}
