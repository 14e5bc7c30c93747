//! Storage layout for the ledger.
//!
//! ```text
//! meta/next_event_id                    -> EventId
//! event/{id:020}                        -> Event
//! holding/{id:020}/{holder}             -> Holding   (absent when zero)
//! ```
//!
//! Event ids are zero-padded so prefix scans come back in id order.
//! Transactions on one event (and on its holdings) share the partition
//! `event/{id:020}`; event creation runs in the `registry` partition.

use crate::reducer::EventScope;
use crate::types::{Event, EventId, Holding};
use std::sync::Arc;
use ticket_escrow_core::Identity;
use ticket_escrow_core::kv_store::{self, KeyValueStore, StorageError, StoreFuture, WriteBatch};
use ticket_escrow_core::repository::Repository;

const NEXT_EVENT_ID_KEY: &str = "meta/next_event_id";
const EVENT_PREFIX: &str = "event/";
const HOLDING_PREFIX: &str = "holding/";
const REGISTRY_PARTITION: &str = "registry";

/// Which records a transaction touches
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ScopeKey {
    /// The id counter; used to create events
    Registry,
    /// One event
    Event(EventId),
    /// One event and one identity's holding for it
    Holding(EventId, Identity),
}

fn event_key(event_id: EventId) -> String {
    format!("{EVENT_PREFIX}{:020}", event_id.value())
}

fn holding_prefix(event_id: EventId) -> String {
    format!("{HOLDING_PREFIX}{:020}/", event_id.value())
}

fn holding_key(event_id: EventId, holder: &Identity) -> String {
    format!("{}{holder}", holding_prefix(event_id))
}

/// Repository mapping [`ScopeKey`]s onto key-value records
#[derive(Clone)]
pub struct LedgerRepository {
    kv: Arc<dyn KeyValueStore>,
}

impl LedgerRepository {
    /// Creates a repository over `kv`
    #[must_use]
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        match self.kv.get(key).await? {
            Some(bytes) => kv_store::decode(key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Id the next created event will receive
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the counter cannot be read.
    pub async fn next_event_id(&self) -> Result<EventId, StorageError> {
        Ok(self.get(NEXT_EVENT_ID_KEY).await?.unwrap_or(EventId::FIRST))
    }

    /// Every event, in id order
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the scan or a decode fails.
    pub async fn list_events(&self) -> Result<Vec<Event>, StorageError> {
        self.kv
            .scan_prefix(EVENT_PREFIX)
            .await?
            .iter()
            .map(|(key, bytes)| kv_store::decode(key, bytes))
            .collect()
    }

    /// Every non-empty holding for one event
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the scan or a decode fails.
    pub async fn holdings_for(&self, event_id: EventId) -> Result<Vec<Holding>, StorageError> {
        self.kv
            .scan_prefix(&holding_prefix(event_id))
            .await?
            .iter()
            .map(|(key, bytes)| kv_store::decode(key, bytes))
            .collect()
    }

    /// Every non-empty holding owned by `holder`, in event order
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the scan or a decode fails.
    pub async fn holdings_of(&self, holder: &Identity) -> Result<Vec<Holding>, StorageError> {
        let entries = self.kv.scan_prefix(HOLDING_PREFIX).await?;
        let mut holdings = Vec::new();
        for (key, bytes) in &entries {
            let holding: Holding = kv_store::decode(key, bytes)?;
            if &holding.holder == holder {
                holdings.push(holding);
            }
        }
        Ok(holdings)
    }
}

impl Repository for LedgerRepository {
    type Key = ScopeKey;
    type State = EventScope;

    fn partition(&self, key: &ScopeKey) -> String {
        match key {
            ScopeKey::Registry => REGISTRY_PARTITION.to_string(),
            ScopeKey::Event(event_id) | ScopeKey::Holding(event_id, _) => event_key(*event_id),
        }
    }

    fn load<'a>(&'a self, key: &'a ScopeKey) -> StoreFuture<'a, EventScope> {
        Box::pin(async move {
            let scope = match key {
                ScopeKey::Registry => EventScope {
                    next_event_id: Some(self.next_event_id().await?),
                    ..EventScope::default()
                },
                ScopeKey::Event(event_id) => EventScope {
                    event: self.get(&event_key(*event_id)).await?,
                    ..EventScope::default()
                },
                ScopeKey::Holding(event_id, holder) => EventScope {
                    next_event_id: None,
                    event: self.get(&event_key(*event_id)).await?,
                    holding: self.get(&holding_key(*event_id, holder)).await?,
                },
            };
            Ok(scope)
        })
    }

    fn save<'a>(&'a self, key: &'a ScopeKey, state: &'a EventScope) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut batch = WriteBatch::new();
            if let Some(next) = state.next_event_id {
                batch.put(NEXT_EVENT_ID_KEY, kv_store::encode(NEXT_EVENT_ID_KEY, &next)?);
            }
            if let Some(event) = &state.event {
                let record = event_key(event.id);
                let bytes = kv_store::encode(&record, event)?;
                batch.put(record, bytes);
            }
            match (&state.holding, key) {
                (Some(holding), _) => {
                    let record = holding_key(holding.event_id, &holding.holder);
                    if holding.quantity == 0 {
                        batch.delete(record);
                    } else {
                        let bytes = kv_store::encode(&record, holding)?;
                        batch.put(record, bytes);
                    }
                }
                // A restored pre-image with no holding means none existed
                (None, ScopeKey::Holding(event_id, holder)) => {
                    batch.delete(holding_key(*event_id, holder));
                }
                (None, _) => {}
            }
            if batch.is_empty() {
                return Ok(());
            }
            self.kv.apply(batch).await
        })
    }

    fn flush(&self) -> StoreFuture<'_, ()> {
        self.kv.flush()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::NewEvent;
    use ticket_escrow_core::Amount;
    use ticket_escrow_runtime::InMemoryKeyValueStore;

    fn repository() -> (Arc<InMemoryKeyValueStore>, LedgerRepository) {
        let kv = Arc::new(InMemoryKeyValueStore::new());
        (kv.clone(), LedgerRepository::new(kv))
    }

    fn event(id: u64) -> Event {
        Event::new(
            EventId::new(id),
            Identity::from("organizer"),
            NewEvent::new("Show", Amount::from_units(5), 10, 20, 3),
        )
    }

    #[test]
    fn test_partitions() {
        let (_, repo) = repository();
        assert_eq!(repo.partition(&ScopeKey::Registry), "registry");
        assert_eq!(
            repo.partition(&ScopeKey::Event(EventId::new(7))),
            "event/00000000000000000007"
        );
        assert_eq!(
            repo.partition(&ScopeKey::Holding(EventId::new(7), Identity::from("bob"))),
            repo.partition(&ScopeKey::Event(EventId::new(7)))
        );
    }

    #[tokio::test]
    async fn test_empty_store_starts_at_first_id() {
        let (_, repo) = repository();
        let scope = repo.load(&ScopeKey::Registry).await.unwrap();
        assert_eq!(scope.next_event_id, Some(EventId::FIRST));
        assert!(scope.event.is_none());
    }

    #[tokio::test]
    async fn test_zero_holding_is_deleted() {
        let (kv, repo) = repository();
        let key = ScopeKey::Holding(EventId::new(0), Identity::from("bob"));
        let mut scope = EventScope {
            next_event_id: None,
            event: Some(event(0)),
            holding: Some(Holding {
                event_id: EventId::new(0),
                holder: Identity::from("bob"),
                quantity: 2,
            }),
        };
        repo.save(&key, &scope).await.unwrap();
        assert_eq!(kv.len(), 2);
        assert_eq!(repo.load(&key).await.unwrap(), scope);

        scope.holding = Some(Holding::empty(EventId::new(0), Identity::from("bob")));
        repo.save(&key, &scope).await.unwrap();
        assert_eq!(kv.len(), 1);
        assert!(repo.load(&key).await.unwrap().holding.is_none());
    }

    #[tokio::test]
    async fn test_scans() {
        let (_, repo) = repository();
        for id in [2, 0, 11] {
            let key = ScopeKey::Holding(EventId::new(id), Identity::from("bob"));
            let scope = EventScope {
                next_event_id: None,
                event: Some(event(id)),
                holding: Some(Holding {
                    event_id: EventId::new(id),
                    holder: Identity::from("bob"),
                    quantity: 1,
                }),
            };
            repo.save(&key, &scope).await.unwrap();
        }

        let ids: Vec<u64> = repo
            .list_events()
            .await
            .unwrap()
            .iter()
            .map(|e| e.id.value())
            .collect();
        assert_eq!(ids, vec![0, 2, 11]);

        assert_eq!(repo.holdings_of(&Identity::from("bob")).await.unwrap().len(), 3);
        assert!(repo.holdings_of(&Identity::from("carol")).await.unwrap().is_empty());
        assert_eq!(repo.holdings_for(EventId::new(2)).await.unwrap().len(), 1);
    }
}
