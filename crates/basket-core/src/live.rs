//! Live refresh wiring
//!
//! Connects change-notification subscriptions to reconciler refreshes for
//! one open view. Refreshes run one at a time on a single worker task, so a
//! burst of signals never starts overlapping fetches.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::models::EntityId;
use crate::notify::{Scope, Subscriber, Subscription};
use crate::reconciler::Reconciler;

/// What a signal asks the worker to re-fetch
#[derive(Debug, Clone, PartialEq, Eq)]
enum Refresh {
    Lists,
    Items(EntityId),
}

/// Keeps one view's state fresh while it is open
pub struct LiveSync {
    subscriptions: Vec<Subscription>,
    stopped: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl LiveSync {
    /// Dashboard: any list or item change of the owner re-fetches everything
    pub fn dashboard(reconciler: Reconciler, subscriber: &Subscriber) -> Self {
        let owner = reconciler.owner().clone();
        Self::start(
            reconciler,
            subscriber,
            vec![
                (Scope::UserLists(owner.clone()), Refresh::Lists),
                (Scope::UserItems(owner), Refresh::Lists),
            ],
        )
    }

    /// List view: changes to one list's items re-fetch that list's items
    pub fn list_view(reconciler: Reconciler, subscriber: &Subscriber, list_id: EntityId) -> Self {
        let list_id = reconciler.resolve(&list_id);
        Self::start(
            reconciler,
            subscriber,
            vec![(Scope::ListItems(list_id.clone()), Refresh::Items(list_id))],
        )
    }

    fn start(
        reconciler: Reconciler,
        subscriber: &Subscriber,
        routes: Vec<(Scope, Refresh)>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let stopped = Arc::new(AtomicBool::new(false));

        let subscriptions = routes
            .into_iter()
            .map(|(scope, refresh)| {
                let tx = tx.clone();
                subscriber.subscribe(scope, move |_| {
                    let _ = tx.send(refresh.clone());
                })
            })
            .collect();

        let worker = tokio::spawn(refresh_worker(reconciler, rx, stopped.clone()));

        Self {
            subscriptions,
            stopped,
            worker: Some(worker),
        }
    }

    pub fn scopes(&self) -> Vec<Scope> {
        self.subscriptions.iter().map(|s| s.scope().clone()).collect()
    }

    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst)
    }

    /// Unsubscribe everything
    ///
    /// A refresh already running finishes; no new one starts.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        for subscription in &self.subscriptions {
            subscription.unsubscribe();
        }
        debug!("Live sync stopped");
    }

    /// Stop and wait for the worker to exit
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
    }
}

impl Drop for LiveSync {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn refresh_worker(
    reconciler: Reconciler,
    mut rx: mpsc::UnboundedReceiver<Refresh>,
    stopped: Arc<AtomicBool>,
) {
    while let Some(first) = rx.recv().await {
        // Signals that piled up while the last refresh ran collapse into one each
        let mut pending = vec![first];
        while let Ok(next) = rx.try_recv() {
            if !pending.contains(&next) {
                pending.push(next);
            }
        }

        for refresh in pending {
            if stopped.load(Ordering::SeqCst) || reconciler.is_closed() {
                return;
            }
            let result = match &refresh {
                Refresh::Lists => reconciler.refresh_lists().await,
                Refresh::Items(list_id) => reconciler.refresh_items(list_id).await,
            };
            if let Err(e) = result {
                warn!("Live refresh {:?} failed: {}", refresh, e);
            }
        }

        if stopped.load(Ordering::SeqCst) {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteErrorKind;
    use crate::models::UserId;
    use crate::reconciler::testing::ScriptedStore;
    use crate::remote::{RemoteStore, SqliteBackend};
    use std::time::Duration;

    async fn setup() -> (SqliteBackend, Arc<ScriptedStore>, Reconciler, Subscriber) {
        let (backend, store) = ScriptedStore::in_memory("alice");
        let reconciler = Reconciler::new(store.clone(), UserId::new("alice"));
        reconciler.load().await.unwrap();
        let subscriber = Subscriber::new(Arc::new(backend.clone()));
        (backend, store, reconciler, subscriber)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_dashboard_follows_other_sessions() {
        let (backend, _store, reconciler, subscriber) = setup().await;
        let live = LiveSync::dashboard(reconciler.clone(), &subscriber);
        assert_eq!(live.scopes().len(), 2);

        let other = backend.client(UserId::new("alice"));
        let list = other
            .create_list(&UserId::new("alice"), "Groceries", None)
            .await
            .unwrap();
        settle().await;
        assert_eq!(reconciler.lists().len(), 1);

        other.create_item(&list.id, "Milk", 1).await.unwrap();
        settle().await;
        assert_eq!(reconciler.items(&list.id).len(), 1);

        live.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_view_refreshes_only_its_list() {
        let (backend, store, reconciler, subscriber) = setup().await;
        let groceries = reconciler.create_list("Groceries", None).await.unwrap();
        let hardware = reconciler.create_list("Hardware", None).await.unwrap();
        let live = LiveSync::list_view(reconciler.clone(), &subscriber, groceries.id.clone());

        let other = backend.client(UserId::new("alice"));
        other.create_item(&hardware.id, "Nails", 1).await.unwrap();
        settle().await;
        assert_eq!(store.calls("list_items"), 0);
        assert!(reconciler.items(&hardware.id).is_empty());

        other.create_item(&groceries.id, "Milk", 1).await.unwrap();
        settle().await;
        assert_eq!(store.calls("list_items"), 1);
        assert_eq!(reconciler.items(&groceries.id).len(), 1);

        live.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_refreshes() {
        let (backend, store, reconciler, subscriber) = setup().await;
        let live = LiveSync::dashboard(reconciler.clone(), &subscriber);
        live.stop();
        assert!(!live.is_running());

        let other = backend.client(UserId::new("alice"));
        other
            .create_list(&UserId::new("alice"), "Groceries", None)
            .await
            .unwrap();
        settle().await;

        assert_eq!(store.calls("list_lists"), 1);
        assert!(reconciler.lists().is_empty());
        live.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_keeps_worker_alive() {
        let (backend, store, reconciler, subscriber) = setup().await;
        let live = LiveSync::dashboard(reconciler.clone(), &subscriber);
        let other = backend.client(UserId::new("alice"));

        store.fail_next("list_lists", RemoteErrorKind::Transport);
        other
            .create_list(&UserId::new("alice"), "Groceries", None)
            .await
            .unwrap();
        settle().await;
        assert_eq!(store.calls("list_lists"), 2);
        assert!(reconciler.lists().is_empty());

        other
            .create_list(&UserId::new("alice"), "Hardware", None)
            .await
            .unwrap();
        settle().await;
        assert_eq!(reconciler.lists().len(), 2);

        live.shutdown().await;
    }
}
