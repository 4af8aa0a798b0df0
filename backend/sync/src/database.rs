//! # Redis
//!
//! Document store behind the pantry.
//!
//! Core purpose is to hold every group's items and recipes and to push changes to every client watching a group.
//!
//! ## Requirements
//!
//! - Documents scoped by group key and sub-collection
//! - Full snapshot to every watcher after each write
//! - Small dataset per group, a pantry is tens of items, not thousands
//!
//! ## Implementation
//!
//! - Marker: `{prefix}:{group}:marker` string holding the JSON marker, existence == group exists
//! - Sub-collection: `{prefix}:{group}:{collection}` hash, document id -> JSON body
//! - Changes: `{prefix}:{group}:{collection}:changes` pub/sub channel, payload is the touched id
//! - Writers publish after every write, watchers re-read the whole hash on each message
//! - Watchers subscribe **before** the initial read so nothing between the two is missed
//! - Updates merge on the client and write back through a Lua compare-and-set, retried when another writer got
//!   there first. A document deleted meanwhile stays deleted and the update reports not found
use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use bank::{Collection, Document, DocumentId, Fields, GroupKey, GroupMarker};
use futures::StreamExt;
use redis::{
    AsyncCommands, Client, Script,
    aio::{ConnectionManager, ConnectionManagerConfig, PubSub},
};
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    error::GatewayError,
    gateway::{Gateway, Snapshot, Subscription},
};

pub const RESUBSCRIBE_DELAY: Duration = Duration::from_millis(500);

/// Reads before giving up on an update that keeps losing to other writers.
pub const MAX_UPDATE_ATTEMPTS: usize = 8;

/// Writes `ARGV[3]` only while the field still holds `ARGV[2]`.
/// Returns 1 on write, -1 when the field is gone, 0 when it changed.
const REPLACE_IF_UNCHANGED: &str = r"
local current = redis.call('HGET', KEYS[1], ARGV[1])
if not current then
    return -1
end
if current ~= ARGV[2] then
    return 0
end
redis.call('HSET', KEYS[1], ARGV[1], ARGV[3])
return 1
";

#[derive(Clone)]
pub struct RedisGateway {
    client: Client,
    connection: ConnectionManager,
    keys: Arc<KeyLayout>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayout {
    prefix: String,
}

impl KeyLayout {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
        }
    }

    pub fn marker(&self, group: &GroupKey) -> String {
        format!("{}:{group}:marker", self.prefix)
    }

    pub fn collection(&self, group: &GroupKey, collection: Collection) -> String {
        format!("{}:{group}:{collection}", self.prefix)
    }

    pub fn changes(&self, group: &GroupKey, collection: Collection) -> String {
        format!("{}:{group}:{collection}:changes", self.prefix)
    }
}

pub async fn init_redis(config: &Config) -> Result<RedisGateway, GatewayError> {
    let manager_config = ConnectionManagerConfig::new()
        .set_number_of_retries(config.redis_retries)
        .set_connection_timeout(Duration::from_millis(config.redis_connect_timeout_ms));

    let client = Client::open(config.redis_url.as_str())?;
    let connection = client
        .get_connection_manager_with_config(manager_config)
        .await?;

    info!("Connected to Redis, key prefix {}", config.key_prefix);

    Ok(RedisGateway {
        client,
        connection,
        keys: Arc::new(KeyLayout::new(&config.key_prefix)),
    })
}

impl RedisGateway {
    async fn read_collection(
        &self,
        group: &GroupKey,
        collection: Collection,
    ) -> Result<Snapshot, GatewayError> {
        let raw: HashMap<String, String> = self
            .connection
            .clone()
            .hgetall(self.keys.collection(group, collection))
            .await?;

        Ok(decode_snapshot(raw))
    }

    async fn notify(
        &self,
        group: &GroupKey,
        collection: Collection,
        id: &DocumentId,
    ) -> Result<(), GatewayError> {
        let _: i64 = self
            .connection
            .clone()
            .publish(self.keys.changes(group, collection), id.as_str())
            .await?;

        Ok(())
    }

    async fn open_changes(
        &self,
        group: &GroupKey,
        collection: Collection,
    ) -> Result<PubSub, GatewayError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(self.keys.changes(group, collection)).await?;

        Ok(pubsub)
    }
}

fn decode_snapshot(raw: HashMap<String, String>) -> Snapshot {
    let mut snapshot = Vec::with_capacity(raw.len());

    for (id, body) in raw {
        let Ok(id) = DocumentId::parse(&id) else {
            warn!("Skipping hash field with an empty document id");
            continue;
        };
        let fields: Fields = match serde_json::from_str(&body) {
            Ok(fields) => fields,
            Err(e) => {
                warn!("Skipping document {id}, body is not a JSON object: {e}");
                continue;
            }
        };

        snapshot.push(Document::new(id, fields));
    }

    snapshot.sort_by(|a, b| a.id.cmp(&b.id));

    snapshot
}

/// Overlays `fields` on a stored JSON body.
fn merge_document(stored: &str, fields: Fields) -> Result<String, GatewayError> {
    let mut document: Fields = serde_json::from_str(stored)?;
    document.extend(fields);

    Ok(serde_json::to_string(&document)?)
}

/// Result of [`REPLACE_IF_UNCHANGED`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Replace {
    Written,
    Missing,
    Changed,
}

impl From<i64> for Replace {
    fn from(code: i64) -> Self {
        match code {
            1 => Replace::Written,
            -1 => Replace::Missing,
            _ => Replace::Changed,
        }
    }
}

#[async_trait]
impl Gateway for RedisGateway {
    fn backend_tag(&self) -> &'static str {
        "redis"
    }

    async fn get_all(
        &self,
        group: &GroupKey,
        collection: Collection,
    ) -> Result<Snapshot, GatewayError> {
        self.read_collection(group, collection).await
    }

    async fn subscribe(
        &self,
        group: &GroupKey,
        collection: Collection,
    ) -> Result<Subscription, GatewayError> {
        let pubsub = self.open_changes(group, collection).await?;
        let initial = self.read_collection(group, collection).await?;

        let (sender, receiver) = unbounded_channel();
        let _ = sender.send(initial);

        let cancel = CancellationToken::new();

        tokio::spawn(forward_changes(
            self.clone(),
            group.clone(),
            collection,
            pubsub,
            sender,
            cancel.clone(),
        ));

        Ok(Subscription::new(receiver, cancel))
    }

    async fn create(
        &self,
        group: &GroupKey,
        collection: Collection,
        fields: Fields,
    ) -> Result<DocumentId, GatewayError> {
        let body = serde_json::to_string(&fields)?;
        let key = self.keys.collection(group, collection);

        let id = loop {
            let id = DocumentId::generate(&mut rand::thread_rng());
            let inserted: bool = self
                .connection
                .clone()
                .hset_nx(&key, id.as_str(), &body)
                .await?;

            if inserted {
                break id;
            }
        };

        self.notify(group, collection, &id).await?;

        Ok(id)
    }

    async fn update(
        &self,
        group: &GroupKey,
        collection: Collection,
        id: &DocumentId,
        fields: Fields,
    ) -> Result<(), GatewayError> {
        let key = self.keys.collection(group, collection);
        let mut connection = self.connection.clone();
        let script = Script::new(REPLACE_IF_UNCHANGED);

        for _ in 0..MAX_UPDATE_ATTEMPTS {
            let stored: Option<String> = connection.hget(&key, id.as_str()).await?;
            let Some(stored) = stored else {
                break;
            };
            let merged = merge_document(&stored, fields.clone())?;

            let code: i64 = script
                .key(&key)
                .arg(id.as_str())
                .arg(&stored)
                .arg(&merged)
                .invoke_async(&mut connection)
                .await?;

            match Replace::from(code) {
                Replace::Written => return self.notify(group, collection, id).await,
                Replace::Missing => break,
                Replace::Changed => debug!("Document {id} changed during update, retrying"),
            }
        }

        if connection.hexists(&key, id.as_str()).await? {
            return Err(GatewayError::Unavailable(format!(
                "document {id} kept changing during update"
            )));
        }

        Err(GatewayError::NotFound {
            collection,
            id: id.clone(),
        })
    }

    async fn delete(
        &self,
        group: &GroupKey,
        collection: Collection,
        id: &DocumentId,
    ) -> Result<(), GatewayError> {
        let removed: i64 = self
            .connection
            .clone()
            .hdel(self.keys.collection(group, collection), id.as_str())
            .await?;

        if removed > 0 {
            self.notify(group, collection, id).await?;
        }

        Ok(())
    }

    async fn group_exists(&self, group: &GroupKey) -> Result<bool, GatewayError> {
        let exists: bool = self.connection.clone().exists(self.keys.marker(group)).await?;

        Ok(exists)
    }

    async fn create_group_marker(
        &self,
        group: &GroupKey,
        marker: &GroupMarker,
    ) -> Result<bool, GatewayError> {
        let claimed: bool = self
            .connection
            .clone()
            .set_nx(self.keys.marker(group), serde_json::to_string(marker)?)
            .await?;

        Ok(claimed)
    }
}

/// Re-reads the sub-collection on every change message until cancelled.
/// A dropped pub/sub connection is reopened after [`RESUBSCRIBE_DELAY`], followed
/// by a fresh snapshot since messages may have been missed meanwhile.
async fn forward_changes(
    gateway: RedisGateway,
    group: GroupKey,
    collection: Collection,
    pubsub: PubSub,
    sender: UnboundedSender<Snapshot>,
    cancel: CancellationToken,
) {
    let mut pubsub = pubsub;

    loop {
        let mut messages = Box::pin(pubsub.into_on_message());

        loop {
            let message = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                message = messages.next() => message,
            };

            let Some(message) = message else {
                warn!("Change stream for {group}/{collection} closed");
                break;
            };

            debug!(
                "Change on {group}/{collection}: {:?}",
                message.get_payload::<String>().ok()
            );

            if !send_snapshot(&gateway, &group, collection, &sender).await {
                return;
            }
        }

        pubsub = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(RESUBSCRIBE_DELAY) => {}
            }

            match gateway.open_changes(&group, collection).await {
                Ok(pubsub) => break pubsub,
                Err(e) => warn!("Resubscribing to {group}/{collection} failed: {e}"),
            }
        };

        info!("Resubscribed to {group}/{collection}");

        if !send_snapshot(&gateway, &group, collection, &sender).await {
            return;
        }
    }
}

/// Returns false once the subscriber is gone.
async fn send_snapshot(
    gateway: &RedisGateway,
    group: &GroupKey,
    collection: Collection,
    sender: &UnboundedSender<Snapshot>,
) -> bool {
    match gateway.read_collection(group, collection).await {
        Ok(snapshot) => {
            debug!("Snapshot of {group}/{collection}: {} documents", snapshot.len());
            sender.send(snapshot).is_ok()
        }
        Err(e) => {
            warn!("Reading {group}/{collection} failed: {e}");
            !sender.is_closed()
        }
    }
}
