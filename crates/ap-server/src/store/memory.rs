//! In-process store
//!
//! Holds everything behind a single async mutex, which makes a claim or a
//! version check trivially atomic. Backs the unit and pipeline tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{BatchStore, BatchWithEvents, EventStore, FailedEventFilter, StoreError, StoreResult};
use crate::domain::{BatchUpload, EventStatus, ProcessingEvent};

#[derive(Default)]
struct State {
    batches: HashMap<Uuid, BatchUpload>,
    /// Insertion order doubles as the tiebreak for equal `created_at`
    events: Vec<ProcessingEvent>,
}

impl State {
    fn owner_of(&self, batch_id: Uuid) -> Option<&str> {
        self.batches.get(&batch_id).map(|b| b.owner())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored event, in insertion order
    pub async fn all_events(&self) -> Vec<ProcessingEvent> {
        self.state.lock().await.events.clone()
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn claim_pending_events(&self, limit: usize) -> StoreResult<Vec<ProcessingEvent>> {
        let mut state = self.state.lock().await;

        let mut pending: Vec<usize> = state
            .events
            .iter()
            .enumerate()
            .filter(|(_, e)| e.status() == EventStatus::Pending)
            .map(|(idx, _)| idx)
            .collect();
        pending.sort_by_key(|&idx| (state.events[idx].created_at(), idx));
        pending.truncate(limit);

        let mut claimed = Vec::with_capacity(pending.len());
        for idx in pending {
            let event = &mut state.events[idx];
            event.start()?;
            claimed.push(event.clone());
        }

        Ok(claimed)
    }

    async fn update_event(&self, event: &ProcessingEvent) -> StoreResult<()> {
        let mut state = self.state.lock().await;

        let stored = state
            .events
            .iter_mut()
            .find(|e| e.id() == event.id())
            .ok_or_else(|| StoreError::not_found("Event", event.id()))?;
        *stored = event.clone();

        Ok(())
    }

    async fn record_outcome(&self, event: &ProcessingEvent) -> StoreResult<bool> {
        let mut state = self.state.lock().await;

        let Some(stored) = state.events.iter_mut().find(|e| e.id() == event.id()) else {
            return Ok(false);
        };
        let same_claim = stored.status() == EventStatus::Processing
            && stored.started_at().is_some()
            && stored.started_at() == event.started_at();
        if same_claim {
            *stored = event.clone();
        }

        Ok(same_claim)
    }

    async fn get_event(&self, id: Uuid) -> StoreResult<Option<ProcessingEvent>> {
        let state = self.state.lock().await;
        Ok(state.events.iter().find(|e| e.id() == id).cloned())
    }

    async fn failed_events(&self, filter: &FailedEventFilter) -> StoreResult<Vec<ProcessingEvent>> {
        let state = self.state.lock().await;

        let mut failed: Vec<ProcessingEvent> = state
            .events
            .iter()
            .filter(|e| e.status() == EventStatus::Failed)
            .filter(|e| match filter {
                FailedEventFilter::All => true,
                FailedEventFilter::Batch(batch_id) => e.batch_id() == *batch_id,
                FailedEventFilter::Owner(owner) => state.owner_of(e.batch_id()) == Some(owner.as_str()),
            })
            .cloned()
            .collect();
        failed.sort_by(|a, b| b.completed_at().cmp(&a.completed_at()));

        Ok(failed)
    }

    async fn reclaim_stale_events(&self, started_before: DateTime<Utc>) -> StoreResult<u64> {
        let mut state = self.state.lock().await;

        let mut released = 0;
        for event in state.events.iter_mut() {
            let stale = event.status() == EventStatus::Processing
                && event.started_at().is_some_and(|at| at < started_before);
            if stale {
                event.release()?;
                released += 1;
            }
        }

        Ok(released)
    }
}

#[async_trait]
impl BatchStore for MemoryStore {
    async fn create_batch(&self, batch: &BatchUpload, events: &[ProcessingEvent]) -> StoreResult<()> {
        let mut state = self.state.lock().await;

        if state.batches.contains_key(&batch.id()) {
            return Err(StoreError::duplicate("Batch", batch.id()));
        }
        if let Some(dup) = events.iter().find(|e| state.events.iter().any(|s| s.id() == e.id())) {
            return Err(StoreError::duplicate("Event", dup.id()));
        }

        state.batches.insert(batch.id(), batch.clone());
        state.events.extend(events.iter().cloned());

        Ok(())
    }

    async fn get_batch(&self, id: Uuid) -> StoreResult<Option<BatchUpload>> {
        let state = self.state.lock().await;
        Ok(state.batches.get(&id).cloned())
    }

    async fn get_batch_with_events(&self, id: Uuid) -> StoreResult<Option<BatchWithEvents>> {
        let state = self.state.lock().await;

        Ok(state.batches.get(&id).map(|batch| BatchWithEvents {
            batch: batch.clone(),
            events: state
                .events
                .iter()
                .filter(|e| e.batch_id() == id)
                .cloned()
                .collect(),
        }))
    }

    async fn try_update_batch(&self, batch: &mut BatchUpload) -> StoreResult<bool> {
        let mut state = self.state.lock().await;

        let stored = state
            .batches
            .get_mut(&batch.id())
            .ok_or_else(|| StoreError::not_found("Batch", batch.id()))?;

        if stored.version() != batch.version() {
            return Ok(false);
        }

        batch.version += 1;
        *stored = batch.clone();

        Ok(true)
    }

    async fn list_batches(
        &self,
        owner: Option<&str>,
        skip: i64,
        take: i64,
    ) -> StoreResult<Vec<BatchUpload>> {
        let state = self.state.lock().await;

        let mut batches: Vec<BatchUpload> = state
            .batches
            .values()
            .filter(|b| owner.is_none_or(|o| b.owner() == o))
            .cloned()
            .collect();
        batches.sort_by(|a, b| b.created_at().cmp(&a.created_at()));

        Ok(batches
            .into_iter()
            .skip(usize::try_from(skip).unwrap_or(0))
            .take(usize::try_from(take).unwrap_or(0))
            .collect())
    }

    async fn find_active_batch(&self, owner: &str) -> StoreResult<Option<BatchUpload>> {
        let state = self.state.lock().await;

        Ok(state
            .batches
            .values()
            .filter(|b| b.owner() == owner && b.is_active())
            .max_by_key(|b| b.created_at())
            .cloned())
    }

    async fn has_unfinished_events(&self, owner: &str) -> StoreResult<bool> {
        let state = self.state.lock().await;

        Ok(state
            .events
            .iter()
            .any(|e| !e.is_terminal() && state.owner_of(e.batch_id()) == Some(owner)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BatchStatus, EventData};
    use std::collections::HashSet;
    use std::sync::Arc;

    async fn seeded(owner: &str, rows: usize) -> (MemoryStore, BatchUpload, Vec<ProcessingEvent>) {
        let store = MemoryStore::new();
        let mut batch = BatchUpload::new("input.csv", 128, owner);
        let events: Vec<_> = (0..rows)
            .map(|i| {
                ProcessingEvent::new(
                    batch.id(),
                    EventData::new(format!("doc-{i}"), "client", "SAMPLE_ACTION"),
                )
            })
            .collect();
        batch.set_total_events(rows as i32).unwrap();
        store.create_batch(&batch, &events).await.unwrap();
        (store, batch, events)
    }

    #[tokio::test]
    async fn test_claim_marks_events_processing_in_creation_order() {
        let (store, _, events) = seeded("alice@example.com", 5).await;

        let claimed = store.claim_pending_events(3).await.unwrap();

        assert_eq!(claimed.len(), 3);
        assert!(claimed.iter().all(|e| e.status() == EventStatus::Processing));
        assert!(claimed.iter().all(|e| e.started_at().is_some()));
        let ids: Vec<_> = claimed.iter().map(|e| e.id()).collect();
        let expected: Vec<_> = events.iter().take(3).map(|e| e.id()).collect();
        assert_eq!(ids, expected);

        let rest = store.claim_pending_events(10).await.unwrap();
        assert_eq!(rest.len(), 2);
        assert!(store.claim_pending_events(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_claims_are_disjoint() {
        let (store, _, _) = seeded("alice@example.com", 40).await;
        let store = Arc::new(store);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.claim_pending_events(15).await.unwrap() })
            })
            .collect();

        let mut seen = HashSet::new();
        let mut total = 0;
        for handle in handles {
            for event in handle.await.unwrap() {
                total += 1;
                assert!(seen.insert(event.id()), "event claimed twice");
            }
        }
        assert_eq!(total, 40);
    }

    #[tokio::test]
    async fn test_outcome_of_a_released_claim_is_refused() {
        let (store, _, _) = seeded("alice@example.com", 1).await;
        let mut first = store.claim_pending_events(1).await.unwrap().remove(0);

        store
            .reclaim_stale_events(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        let mut second = store.claim_pending_events(1).await.unwrap().remove(0);
        assert_eq!(first.id(), second.id());

        first.fail("slow worker").unwrap();
        assert!(!store.record_outcome(&first).await.unwrap());

        second.complete(Some("fresh".into())).unwrap();
        assert!(store.record_outcome(&second).await.unwrap());
        // a claim is spent once its outcome is in
        assert!(!store.record_outcome(&second).await.unwrap());

        let stored = store.get_event(second.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), EventStatus::Completed);
        assert_eq!(stored.response_data(), Some("fresh"));
        assert_eq!(stored.retry_count(), 0);
    }

    #[tokio::test]
    async fn test_stale_version_is_rejected() {
        let (store, batch, _) = seeded("alice@example.com", 1).await;

        let mut first = batch.clone();
        let mut second = batch.clone();

        first.start().unwrap();
        assert!(store.try_update_batch(&mut first).await.unwrap());
        assert_eq!(first.version(), 1);

        second.fail("late writer").unwrap();
        assert!(!store.try_update_batch(&mut second).await.unwrap());
        assert_eq!(second.version(), 0);

        let stored = store.get_batch(batch.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), BatchStatus::Processing);
        assert_eq!(stored.version(), 1);
    }

    #[tokio::test]
    async fn test_update_unknown_event_is_not_found() {
        let store = MemoryStore::new();
        let event = ProcessingEvent::new(Uuid::new_v4(), EventData::new("d", "c", "A"));
        let err = store.update_event(&event).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_failed_events_scoped_by_owner_and_batch() {
        let (store, batch, _) = seeded("alice@example.com", 2).await;
        let other = BatchUpload::new("other.csv", 10, "bob@example.com");
        let other_event = ProcessingEvent::new(other.id(), EventData::new("d", "c", "A"));
        store.create_batch(&other, &[other_event]).await.unwrap();

        for mut event in store.claim_pending_events(10).await.unwrap() {
            event.fail("boom").unwrap();
            store.update_event(&event).await.unwrap();
        }

        assert_eq!(store.failed_events(&FailedEventFilter::All).await.unwrap().len(), 3);
        assert_eq!(
            store
                .failed_events(&FailedEventFilter::Batch(batch.id()))
                .await
                .unwrap()
                .len(),
            2
        );
        let bobs = store
            .failed_events(&FailedEventFilter::Owner("bob@example.com".into()))
            .await
            .unwrap();
        assert_eq!(bobs.len(), 1);
        assert_eq!(bobs[0].batch_id(), other.id());
    }

    #[tokio::test]
    async fn test_reclaim_releases_only_stale_claims() {
        let (store, _, _) = seeded("alice@example.com", 2).await;
        let claimed = store.claim_pending_events(10).await.unwrap();
        assert_eq!(claimed.len(), 2);

        let released = store
            .reclaim_stale_events(Utc::now() - chrono::Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(released, 0);

        let released = store
            .reclaim_stale_events(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(released, 2);
        assert_eq!(store.claim_pending_events(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_owner_activity_queries() {
        let (store, batch, _) = seeded("alice@example.com", 1).await;

        assert_eq!(
            store.find_active_batch("alice@example.com").await.unwrap().map(|b| b.id()),
            Some(batch.id())
        );
        assert!(store.has_unfinished_events("alice@example.com").await.unwrap());
        assert!(store.find_active_batch("bob@example.com").await.unwrap().is_none());
        assert!(!store.has_unfinished_events("bob@example.com").await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_batch_is_rejected() {
        let (store, batch, _) = seeded("alice@example.com", 1).await;
        let err = store.create_batch(&batch, &[]).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
    }
}
