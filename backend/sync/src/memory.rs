use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use bank::{Collection, Document, DocumentId, Fields, GroupKey, GroupMarker};
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};
use tokio_util::sync::CancellationToken;

use crate::{
    error::GatewayError,
    gateway::{Gateway, Snapshot, Subscription},
};

type CollectionKey = (GroupKey, Collection);

/// Process-local store with the same contract as the Redis gateway.
#[derive(Default)]
pub struct MemoryGateway {
    state: Mutex<MemoryState>,
    offline: AtomicBool,
    writes: AtomicU64,
}

#[derive(Default)]
struct MemoryState {
    markers: HashMap<GroupKey, GroupMarker>,
    collections: HashMap<CollectionKey, BTreeMap<DocumentId, Fields>>,
    listeners: Vec<Listener>,
}

struct Listener {
    key: CollectionKey,
    sender: UnboundedSender<Snapshot>,
}

impl MemoryState {
    fn snapshot(&self, key: &CollectionKey) -> Snapshot {
        self.collections
            .get(key)
            .map(|documents| {
                documents
                    .iter()
                    .map(|(id, fields)| Document::new(id.clone(), fields.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn publish(&mut self, key: &CollectionKey) {
        let snapshot = self.snapshot(key);

        self.listeners.retain(|listener| {
            if listener.key != *key {
                return !listener.sender.is_closed();
            }

            listener.sender.send(snapshot.clone()).is_ok()
        });
    }
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails with [`GatewayError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of acknowledged writes, markers included.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self, group: &GroupKey, collection: Collection) -> usize {
        let key = (group.clone(), collection);

        self.lock()
            .listeners
            .iter()
            .filter(|listener| listener.key == key && !listener.sender.is_closed())
            .count()
    }

    /// Writes a document under a chosen id, the way another client (or a
    /// broken one) could.
    pub fn put(&self, group: &GroupKey, collection: Collection, id: DocumentId, fields: Fields) {
        let key = (group.clone(), collection);
        let mut state = self.lock();

        state.collections.entry(key.clone()).or_default().insert(id, fields);
        state.publish(&key);
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_online(&self) -> Result<(), GatewayError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("memory store is offline".to_string()));
        }

        Ok(())
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Gateway for MemoryGateway {
    fn backend_tag(&self) -> &'static str {
        "memory"
    }

    async fn get_all(
        &self,
        group: &GroupKey,
        collection: Collection,
    ) -> Result<Snapshot, GatewayError> {
        self.check_online()?;

        Ok(self.lock().snapshot(&(group.clone(), collection)))
    }

    async fn subscribe(
        &self,
        group: &GroupKey,
        collection: Collection,
    ) -> Result<Subscription, GatewayError> {
        self.check_online()?;

        let key = (group.clone(), collection);
        let (sender, receiver) = unbounded_channel();
        let mut state = self.lock();

        let _ = sender.send(state.snapshot(&key));
        state.listeners.push(Listener { key, sender });

        Ok(Subscription::new(receiver, CancellationToken::new()))
    }

    async fn create(
        &self,
        group: &GroupKey,
        collection: Collection,
        fields: Fields,
    ) -> Result<DocumentId, GatewayError> {
        self.check_online()?;

        let key = (group.clone(), collection);
        let mut state = self.lock();
        let documents = state.collections.entry(key.clone()).or_default();

        let id = loop {
            let id = DocumentId::generate(&mut rand::thread_rng());
            if !documents.contains_key(&id) {
                break id;
            }
        };

        documents.insert(id.clone(), fields);
        state.publish(&key);
        self.record_write();

        Ok(id)
    }

    async fn update(
        &self,
        group: &GroupKey,
        collection: Collection,
        id: &DocumentId,
        fields: Fields,
    ) -> Result<(), GatewayError> {
        self.check_online()?;

        let key = (group.clone(), collection);
        let mut state = self.lock();

        let document = state
            .collections
            .get_mut(&key)
            .and_then(|documents| documents.get_mut(id))
            .ok_or_else(|| GatewayError::NotFound {
                collection,
                id: id.clone(),
            })?;

        document.extend(fields);
        state.publish(&key);
        self.record_write();

        Ok(())
    }

    async fn delete(
        &self,
        group: &GroupKey,
        collection: Collection,
        id: &DocumentId,
    ) -> Result<(), GatewayError> {
        self.check_online()?;

        let key = (group.clone(), collection);
        let mut state = self.lock();

        let removed = state
            .collections
            .get_mut(&key)
            .and_then(|documents| documents.remove(id))
            .is_some();

        if removed {
            state.publish(&key);
            self.record_write();
        }

        Ok(())
    }

    async fn group_exists(&self, group: &GroupKey) -> Result<bool, GatewayError> {
        self.check_online()?;

        Ok(self.lock().markers.contains_key(group))
    }

    async fn create_group_marker(
        &self,
        group: &GroupKey,
        marker: &GroupMarker,
    ) -> Result<bool, GatewayError> {
        self.check_online()?;

        let mut state = self.lock();
        if state.markers.contains_key(group) {
            return Ok(false);
        }

        state.markers.insert(group.clone(), marker.clone());
        self.record_write();

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn group() -> GroupKey {
        GroupKey::parse("AB12CD").unwrap()
    }

    fn fields(value: serde_json::Value) -> Fields {
        match value {
            serde_json::Value::Object(fields) => fields,
            _ => panic!("fixture must be an object"),
        }
    }

    #[tokio::test]
    async fn test_create_then_get_all() {
        let gateway = MemoryGateway::new();
        let id = gateway
            .create(&group(), Collection::Items, fields(json!({ "name": "Rice", "quantity": 2 })))
            .await
            .unwrap();

        let snapshot = gateway.get_all(&group(), Collection::Items).await.unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, id);
        assert!(gateway.get_all(&group(), Collection::Recipes).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_merges_and_reports_missing() {
        let gateway = MemoryGateway::new();
        let id = gateway
            .create(&group(), Collection::Items, fields(json!({ "name": "Rice", "quantity": 2 })))
            .await
            .unwrap();

        gateway
            .update(&group(), Collection::Items, &id, fields(json!({ "quantity": 5 })))
            .await
            .unwrap();

        let snapshot = gateway.get_all(&group(), Collection::Items).await.unwrap();
        assert_eq!(
            serde_json::Value::Object(snapshot[0].fields.clone()),
            json!({ "name": "Rice", "quantity": 5 })
        );

        let missing = DocumentId::parse("missing").unwrap();
        assert!(matches!(
            gateway
                .update(&group(), Collection::Items, &missing, Fields::new())
                .await,
            Err(GatewayError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_subscription_fan_out_and_release() {
        let gateway = MemoryGateway::new();
        let mut subscription = gateway.subscribe(&group(), Collection::Items).await.unwrap();

        assert_eq!(subscription.next().await, Some(Vec::new()));

        let id = gateway
            .create(&group(), Collection::Items, fields(json!({ "name": "Rice", "quantity": 2 })))
            .await
            .unwrap();
        let snapshot = subscription.next().await.unwrap();
        assert_eq!(snapshot[0].id, id);

        assert_eq!(gateway.subscriber_count(&group(), Collection::Items), 1);
        drop(subscription);
        assert_eq!(gateway.subscriber_count(&group(), Collection::Items), 0);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let gateway = MemoryGateway::new();
        let id = gateway
            .create(&group(), Collection::Items, fields(json!({ "name": "Rice", "quantity": 2 })))
            .await
            .unwrap();

        gateway.delete(&group(), Collection::Items, &id).await.unwrap();
        gateway.delete(&group(), Collection::Items, &id).await.unwrap();

        assert!(gateway.get_all(&group(), Collection::Items).await.unwrap().is_empty());
        assert_eq!(gateway.write_count(), 2);
    }

    #[tokio::test]
    async fn test_group_marker_claimed_once() {
        let gateway = MemoryGateway::new();
        let first = GroupMarker::now();

        assert!(gateway.create_group_marker(&group(), &first).await.unwrap());
        assert!(!gateway.create_group_marker(&group(), &GroupMarker::now()).await.unwrap());

        assert!(gateway.group_exists(&group()).await.unwrap());
        assert_eq!(gateway.lock().markers.get(&group()), Some(&first));
        assert_eq!(gateway.write_count(), 1);
    }

    #[tokio::test]
    async fn test_offline() {
        let gateway = MemoryGateway::new();
        gateway.set_offline(true);

        assert!(matches!(
            gateway.group_exists(&group()).await,
            Err(GatewayError::Unavailable(_))
        ));

        gateway.set_offline(false);
        assert!(!gateway.group_exists(&group()).await.unwrap());
    }
}
