use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::commands::query_trades;
use crate::db::Database;
use crate::models::TradeRecord;

pub type Snapshot = Arc<Vec<TradeRecord>>;

type Channels = Arc<Mutex<HashMap<String, watch::Sender<Snapshot>>>>;

/// Live view of each subscribed user's records, newest open date first.
///
/// Every subscriber of a user shares one watch channel. A background poller
/// (see [`RecordFeed::start`]) reloads subscribed users and publishes only
/// snapshots that differ from the last one, so writes from other processes
/// show up too. Load failures are logged and the last snapshot stays.
#[derive(Clone)]
pub struct RecordFeed {
    db: Arc<Database>,
    channels: Channels,
    poller: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl RecordFeed {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            channels: Arc::new(Mutex::new(HashMap::new())),
            poller: Arc::new(Mutex::new(None)),
        }
    }

    fn load(&self, user_id: &str) -> Option<Vec<TradeRecord>> {
        let result = self
            .db
            .lock()
            .and_then(|conn| query_trades(&conn, user_id).map_err(Into::into));

        match result {
            Ok(records) => Some(records),
            Err(e) => {
                log::error!("Feed load failed for {}: {}", user_id, e);
                None
            }
        }
    }

    /// Starts watching `user_id`. The subscription holds the current snapshot
    /// right away; dropping it unsubscribes.
    pub fn subscribe(&self, user_id: &str) -> Subscription {
        // Loaded outside the channel lock; db and channel locks never nest
        let initial = self.load(user_id).unwrap_or_default();

        let mut channels = match self.channels.lock() {
            Ok(channels) => channels,
            Err(poisoned) => poisoned.into_inner(),
        };
        let receiver = match channels.get(user_id) {
            Some(sender) => sender.subscribe(),
            None => {
                let (sender, receiver) = watch::channel(Arc::new(initial));
                channels.insert(user_id.to_string(), sender);
                log::info!("Feed subscribed: {}", user_id);
                receiver
            }
        };

        Subscription {
            user_id: user_id.to_string(),
            receiver,
            channels: Arc::clone(&self.channels),
        }
    }

    pub fn is_subscribed(&self, user_id: &str) -> bool {
        self.channels
            .lock()
            .map(|channels| channels.contains_key(user_id))
            .unwrap_or(false)
    }

    fn subscribed_users(&self) -> Vec<String> {
        self.channels
            .lock()
            .map(|channels| channels.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Reloads one user and notifies subscribers if anything changed.
    /// Returns whether a new snapshot was published.
    pub fn refresh(&self, user_id: &str) -> bool {
        if !self.is_subscribed(user_id) {
            return false;
        }
        let Some(records) = self.load(user_id) else {
            return false;
        };

        let Ok(channels) = self.channels.lock() else {
            return false;
        };
        let Some(sender) = channels.get(user_id) else {
            return false;
        };

        sender.send_if_modified(|current| {
            if current.as_slice() == records.as_slice() {
                false
            } else {
                *current = Arc::new(records);
                true
            }
        })
    }

    pub fn refresh_all(&self) -> usize {
        self.subscribed_users()
            .iter()
            .filter(|user_id| self.refresh(user_id))
            .count()
    }

    /// Spawns the polling task. Calling it again replaces the running poller.
    pub fn start(&self, period: Duration) {
        let feed = self.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;

                let feed = feed.clone();
                match tokio::task::spawn_blocking(move || feed.refresh_all()).await {
                    Ok(0) => {}
                    Ok(published) => log::debug!("Feed published {} snapshot(s)", published),
                    Err(e) => log::error!("Feed poll task failed: {}", e),
                }
            }
        });

        if let Ok(mut poller) = self.poller.lock() {
            if let Some(previous) = poller.replace(handle) {
                previous.abort();
            }
        }
        log::info!("Feed poller started ({}ms)", period.as_millis());
    }

    pub fn stop(&self) {
        if let Ok(mut poller) = self.poller.lock() {
            if let Some(handle) = poller.take() {
                handle.abort();
                log::info!("Feed poller stopped");
            }
        }
    }
}

pub struct Subscription {
    user_id: String,
    receiver: watch::Receiver<Snapshot>,
    channels: Channels,
}

impl Subscription {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn current(&self) -> Snapshot {
        Arc::clone(&self.receiver.borrow())
    }

    /// True when a snapshot arrived that [`Subscription::changed`] has not returned yet.
    pub fn has_changed(&self) -> bool {
        self.receiver.has_changed().unwrap_or(false)
    }

    /// Waits for the next snapshot. `None` once the feed is gone.
    pub async fn changed(&mut self) -> Option<Snapshot> {
        self.receiver.changed().await.ok()?;
        Some(Arc::clone(&self.receiver.borrow_and_update()))
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut channels = match self.channels.lock() {
            Ok(channels) => channels,
            Err(poisoned) => poisoned.into_inner(),
        };
        // This receiver is still alive here, so 1 means it was the last one
        let last = channels
            .get(&self.user_id)
            .is_some_and(|sender| sender.receiver_count() <= 1);
        if last {
            channels.remove(&self.user_id);
            log::info!("Feed unsubscribed: {}", self.user_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{create_trade, delete_trade};
    use crate::models::CreateTradeInput;

    const USER: &str = "feed-user";

    fn feed() -> RecordFeed {
        RecordFeed::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    #[tokio::test]
    async fn subscription_starts_with_current_records() {
        let feed = feed();
        create_trade(&feed.db, USER, CreateTradeInput::new("btc")).unwrap();

        let sub = feed.subscribe(USER);
        assert_eq!(sub.current().len(), 1);
        assert!(!sub.has_changed());
    }

    #[tokio::test]
    async fn refresh_pushes_changes_only() {
        let feed = feed();
        let mut sub = feed.subscribe(USER);
        assert!(sub.current().is_empty());

        assert!(!feed.refresh(USER), "nothing changed yet");
        assert!(!sub.has_changed());

        let trade = create_trade(&feed.db, USER, CreateTradeInput::new("btc")).unwrap();
        assert!(feed.refresh(USER));
        let snapshot = sub.changed().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, trade.id);

        delete_trade(&feed.db, USER, &trade.id).unwrap();
        assert!(feed.refresh(USER));
        assert!(sub.changed().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn other_users_writes_do_not_notify() {
        let feed = feed();
        let sub = feed.subscribe(USER);

        create_trade(&feed.db, "someone-else", CreateTradeInput::new("btc")).unwrap();
        assert_eq!(feed.refresh_all(), 0);
        assert!(!sub.has_changed());
    }

    #[tokio::test]
    async fn dropping_last_subscription_unsubscribes() {
        let feed = feed();
        let first = feed.subscribe(USER);
        let second = feed.subscribe(USER);
        assert!(feed.is_subscribed(USER));

        drop(first);
        assert!(feed.is_subscribed(USER));

        drop(second);
        assert!(!feed.is_subscribed(USER));
        assert!(!feed.refresh(USER));
    }

    #[tokio::test]
    async fn poller_publishes_new_records() {
        let feed = feed();
        let mut sub = feed.subscribe(USER);
        feed.start(Duration::from_millis(10));

        create_trade(&feed.db, USER, CreateTradeInput::new("eth")).unwrap();

        let snapshot = tokio::time::timeout(Duration::from_secs(5), sub.changed())
            .await
            .expect("poller should publish within timeout")
            .unwrap();
        assert_eq!(snapshot[0].symbol, "ETH");

        feed.stop();
    }
}
