//! # Gateway
//!
//! Contract of the remote document store.
//!
//! Every call is scoped by group key and, for documents, by sub-collection. The store is the only source of
//! truth, all local lists are projections of what it pushes through subscriptions.
//!
//! ## Subscriptions
//! - On attach the subscriber receives a full snapshot of the sub-collection.
//! - After that, every add/update/delete in the sub-collection produces another **full** snapshot, never a delta.
//! - Snapshots are ordered by document id.
//! - Reconnecting after transient failures is the gateway's job, consumers treat a subscription as long-lived.
use async_trait::async_trait;
use bank::{Collection, Document, DocumentId, Fields, GroupKey, GroupMarker};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use crate::error::GatewayError;

pub type Snapshot = Vec<Document>;

#[async_trait]
pub trait Gateway: Send + Sync {
    fn backend_tag(&self) -> &'static str;

    async fn get_all(
        &self,
        group: &GroupKey,
        collection: Collection,
    ) -> Result<Snapshot, GatewayError>;

    async fn subscribe(
        &self,
        group: &GroupKey,
        collection: Collection,
    ) -> Result<Subscription, GatewayError>;

    async fn create(
        &self,
        group: &GroupKey,
        collection: Collection,
        fields: Fields,
    ) -> Result<DocumentId, GatewayError>;

    /// Merges `fields` over the stored document. Fails with
    /// [`GatewayError::NotFound`] when there is no such document.
    async fn update(
        &self,
        group: &GroupKey,
        collection: Collection,
        id: &DocumentId,
        fields: Fields,
    ) -> Result<(), GatewayError>;

    /// Deleting a missing document is not an error.
    async fn delete(
        &self,
        group: &GroupKey,
        collection: Collection,
        id: &DocumentId,
    ) -> Result<(), GatewayError>;

    async fn group_exists(&self, group: &GroupKey) -> Result<bool, GatewayError>;

    /// Claims `group` by writing its marker. Returns false without touching
    /// the existing marker when the group already exists.
    async fn create_group_marker(
        &self,
        group: &GroupKey,
        marker: &GroupMarker,
    ) -> Result<bool, GatewayError>;
}

/// Live feed of full snapshots for one sub-collection.
///
/// Released on [`cancel`](Self::cancel) or drop. Once released, [`next`](Self::next)
/// yields `None` even if snapshots were still buffered.
#[derive(Debug)]
pub struct Subscription {
    snapshots: UnboundedReceiver<Snapshot>,
    cancel: CancellationToken,
}

impl Subscription {
    pub fn new(snapshots: UnboundedReceiver<Snapshot>, cancel: CancellationToken) -> Self {
        Self { snapshots, cancel }
    }

    pub async fn next(&mut self) -> Option<Snapshot> {
        if self.cancel.is_cancelled() {
            return None;
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            snapshot = self.snapshots.recv() => snapshot,
        }
    }

    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.snapshots.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc::unbounded_channel;

    use super::*;

    #[tokio::test]
    async fn test_next_yields_snapshots() {
        let (sender, receiver) = unbounded_channel();
        let mut subscription = Subscription::new(receiver, CancellationToken::new());

        sender.send(Vec::new()).unwrap();
        assert_eq!(subscription.next().await, Some(Vec::new()));

        drop(sender);
        assert_eq!(subscription.next().await, None);
    }

    #[tokio::test]
    async fn test_cancel_discards_buffered() {
        let (sender, receiver) = unbounded_channel();
        let token = CancellationToken::new();
        let mut subscription = Subscription::new(receiver, token.clone());

        sender.send(Vec::new()).unwrap();
        subscription.cancel();

        assert!(token.is_cancelled());
        assert_eq!(subscription.next().await, None);
        assert!(sender.send(Vec::new()).is_err());
    }

    #[tokio::test]
    async fn test_drop_cancels() {
        let (_sender, receiver) = unbounded_channel::<Snapshot>();
        let token = CancellationToken::new();

        drop(Subscription::new(receiver, token.clone()));

        assert!(token.is_cancelled());
    }
}
