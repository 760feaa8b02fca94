//! Change notification subscriber
//!
//! Turns the store's row-level change feed into scoped "something changed"
//! signals. A signal carries no row content; whoever receives it re-fetches.
//!
//! ## Delivery
//!
//! - At least once: a burst of N writes yields between 1 and N callbacks.
//!   Events arriving while a callback's settle delay runs are folded into it.
//! - Each callback waits a settle delay first, so the re-fetch it triggers is
//!   less likely to read a replica that has not caught up yet. This reduces
//!   staleness; it does not rule it out.
//! - After `unsubscribe` returns no callback is delivered, including one that
//!   was already waiting out its settle delay.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::models::{EntityId, UserId};
use crate::remote::{ChangeFeed, RawChangeEvent, Table};

/// What a subscription listens to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "kebab-case")]
pub enum Scope {
    /// All lists owned by a user
    UserLists(UserId),
    /// All items of one list
    ListItems(EntityId),
    /// All items across every list owned by a user
    UserItems(UserId),
}

impl Scope {
    /// Whether a raw change falls inside this scope
    pub fn matches(&self, event: &RawChangeEvent) -> bool {
        match self {
            Scope::UserLists(user) => event.table == Table::Lists && &event.owner == user,
            Scope::ListItems(list_id) => event.table == Table::Items && &event.list_id == list_id,
            Scope::UserItems(user) => event.table == Table::Items && &event.owner == user,
        }
    }

    /// Whether this scope watches items rather than lists
    pub fn is_item_scope(&self) -> bool {
        matches!(self, Scope::ListItems(_) | Scope::UserItems(_))
    }
}

/// Minimum wait between a change event and the callback it triggers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettleDelays {
    pub items: Duration,
    pub lists: Duration,
}

impl Default for SettleDelays {
    fn default() -> Self {
        Self {
            items: Duration::from_millis(50),
            lists: Duration::from_millis(100),
        }
    }
}

impl SettleDelays {
    pub fn for_scope(&self, scope: &Scope) -> Duration {
        if scope.is_item_scope() {
            self.items
        } else {
            self.lists
        }
    }
}

/// Hands out scoped subscriptions over a change feed
#[derive(Clone)]
pub struct Subscriber {
    feed: Arc<dyn ChangeFeed>,
    delays: SettleDelays,
}

impl Subscriber {
    pub fn new(feed: Arc<dyn ChangeFeed>) -> Self {
        Self {
            feed,
            delays: SettleDelays::default(),
        }
    }

    pub fn with_delays(mut self, delays: SettleDelays) -> Self {
        self.delays = delays;
        self
    }

    pub fn delays(&self) -> SettleDelays {
        self.delays
    }

    /// Call `on_change` whenever something changes inside `scope`
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe<F>(&self, scope: Scope, on_change: F) -> Subscription
    where
        F: Fn(&Scope) + Send + Sync + 'static,
    {
        let receiver = self.feed.changes();
        let active = Arc::new(AtomicBool::new(true));
        let (stop_tx, stop_rx) = watch::channel(false);
        let delay = self.delays.for_scope(&scope);

        debug!("subscribing to {:?} (settle {:?})", scope, delay);

        let task = tokio::spawn(delivery_loop(
            scope.clone(),
            delay,
            receiver,
            stop_rx,
            active.clone(),
            on_change,
        ));

        Subscription {
            scope,
            active,
            stop: stop_tx,
            task,
        }
    }

    /// Receive change signals for `scope` as a channel
    ///
    /// The channel closes once the subscription is dropped or unsubscribed.
    pub fn subscribe_channel(&self, scope: Scope) -> (Subscription, mpsc::UnboundedReceiver<Scope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(scope, move |scope| {
            let _ = tx.send(scope.clone());
        });
        (subscription, rx)
    }
}

/// Handle to a live subscription; dropping it unsubscribes
pub struct Subscription {
    scope: Scope,
    active: Arc<AtomicBool>,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Stop delivery. Calling it again is a no-op.
    pub fn unsubscribe(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            debug!("unsubscribed from {:?}", self.scope);
            let _ = self.stop.send(true);
            self.task.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

async fn delivery_loop<F>(
    scope: Scope,
    delay: Duration,
    mut receiver: tokio::sync::broadcast::Receiver<RawChangeEvent>,
    mut stop: watch::Receiver<bool>,
    active: Arc<AtomicBool>,
    on_change: F,
) where
    F: Fn(&Scope) + Send + Sync + 'static,
{
    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            received = receiver.recv() => match received {
                Ok(event) if scope.matches(&event) => {}
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    // Dropped events may have been ours
                    warn!("{:?} lagged behind by {} events", scope, skipped);
                }
                Err(RecvError::Closed) => break,
            },
        }

        tokio::select! {
            biased;
            _ = stop.changed() => break,
            _ = tokio::time::sleep(delay) => {}
        }

        // Fold whatever arrived during the settle window into this callback
        let mut feed_closed = false;
        loop {
            match receiver.try_recv() {
                Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Closed) => {
                    feed_closed = true;
                    break;
                }
            }
        }

        if !active.load(Ordering::SeqCst) {
            break;
        }
        on_change(&scope);

        if feed_closed {
            break;
        }
    }
    debug!("delivery for {:?} stopped", scope);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{ChangeKind, RemoteStore, SqliteBackend};
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::broadcast;

    struct TestFeed {
        tx: broadcast::Sender<RawChangeEvent>,
    }

    impl TestFeed {
        fn new() -> Arc<Self> {
            let (tx, _) = broadcast::channel(64);
            Arc::new(Self { tx })
        }

        fn emit(&self, table: Table, list: &str, owner: &str) {
            let _ = self.tx.send(RawChangeEvent {
                table,
                kind: ChangeKind::Update,
                row_id: EntityId::generate(),
                list_id: EntityId::new(list),
                owner: UserId::new(owner),
            });
        }
    }

    impl ChangeFeed for TestFeed {
        fn changes(&self) -> broadcast::Receiver<RawChangeEvent> {
            self.tx.subscribe()
        }
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&Scope) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        (count, move |_: &Scope| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn event(table: Table, list: &str, owner: &str) -> RawChangeEvent {
        RawChangeEvent {
            table,
            kind: ChangeKind::Insert,
            row_id: EntityId::new("row"),
            list_id: EntityId::new(list),
            owner: UserId::new(owner),
        }
    }

    #[test]
    fn test_scope_matching() {
        let lists = Scope::UserLists(UserId::new("alice"));
        let items = Scope::ListItems(EntityId::new("l1"));
        let all_items = Scope::UserItems(UserId::new("alice"));

        assert!(lists.matches(&event(Table::Lists, "l1", "alice")));
        assert!(!lists.matches(&event(Table::Items, "l1", "alice")));
        assert!(!lists.matches(&event(Table::Lists, "l1", "bob")));

        assert!(items.matches(&event(Table::Items, "l1", "alice")));
        assert!(!items.matches(&event(Table::Items, "l2", "alice")));

        assert!(all_items.matches(&event(Table::Items, "l2", "alice")));
        assert!(!all_items.matches(&event(Table::Items, "l2", "bob")));
    }

    #[test]
    fn test_default_settle_delays() {
        let delays = SettleDelays::default();
        assert_eq!(
            delays.for_scope(&Scope::ListItems(EntityId::new("l1"))),
            Duration::from_millis(50)
        );
        assert_eq!(
            delays.for_scope(&Scope::UserItems(UserId::new("alice"))),
            Duration::from_millis(50)
        );
        assert_eq!(
            delays.for_scope(&Scope::UserLists(UserId::new("alice"))),
            Duration::from_millis(100)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_waits_for_settle_delay() {
        let feed = TestFeed::new();
        let subscriber = Subscriber::new(feed.clone());
        let (count, on_change) = counter();

        let _sub = subscriber.subscribe(Scope::UserLists(UserId::new("alice")), on_change);
        tokio::task::yield_now().await;

        feed.emit(Table::Lists, "l1", "alice");

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_is_folded() {
        let feed = TestFeed::new();
        let subscriber = Subscriber::new(feed.clone());
        let (count, on_change) = counter();

        let _sub = subscriber.subscribe(Scope::ListItems(EntityId::new("l1")), on_change);
        tokio::task::yield_now().await;

        for _ in 0..5 {
            feed.emit(Table::Items, "l1", "alice");
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        let delivered = count.load(Ordering::SeqCst);
        assert!((1..=5).contains(&delivered));
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_scopes_are_ignored() {
        let feed = TestFeed::new();
        let subscriber = Subscriber::new(feed.clone());
        let (count, on_change) = counter();

        let _sub = subscriber.subscribe(Scope::ListItems(EntityId::new("l1")), on_change);
        tokio::task::yield_now().await;

        feed.emit(Table::Items, "l2", "alice");
        feed.emit(Table::Lists, "l1", "alice");
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_suppresses_in_flight_notification() {
        let feed = TestFeed::new();
        let subscriber = Subscriber::new(feed.clone());
        let (count, on_change) = counter();

        let sub = subscriber.subscribe(Scope::UserLists(UserId::new("alice")), on_change);
        tokio::task::yield_now().await;

        feed.emit(Table::Lists, "l1", "alice");
        // Inside the settle window
        tokio::time::sleep(Duration::from_millis(30)).await;

        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!sub.is_active());

        feed.emit(Table::Lists, "l1", "alice");
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_delays() {
        let feed = TestFeed::new();
        let subscriber = Subscriber::new(feed.clone()).with_delays(SettleDelays {
            items: Duration::from_millis(5),
            lists: Duration::from_millis(5),
        });
        let (count, on_change) = counter();

        let _sub = subscriber.subscribe(Scope::UserLists(UserId::new("alice")), on_change);
        tokio::task::yield_now().await;

        feed.emit(Table::Lists, "l1", "alice");
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_channel_receives_backend_changes() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        let alice = UserId::new("alice");
        let client = backend.client(alice.clone());
        let subscriber = Subscriber::new(Arc::new(backend.clone())).with_delays(SettleDelays {
            items: Duration::from_millis(1),
            lists: Duration::from_millis(1),
        });

        let (sub, mut rx) = subscriber.subscribe_channel(Scope::UserLists(alice.clone()));

        client.create_list(&alice, "Groceries", None).await.unwrap();

        let scope = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(scope, Scope::UserLists(alice));

        drop(sub);
        assert!(rx.recv().await.is_none());
    }
}
