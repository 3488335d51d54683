//! Fixtures for command and query tests

use uuid::Uuid;

use crate::domain::{BatchUpload, EventData, ProcessingEvent};
use crate::store::{BatchStore, EventStore, MemoryStore};

/// Outcome to force on a seeded event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seed {
    Pending,
    Completed,
    Failed { times: i32 },
}

/// Builder for a batch with events in chosen states
pub struct TestBatch {
    owner: String,
    seeds: Vec<Seed>,
}

impl TestBatch {
    pub fn new(owner: &str) -> Self {
        Self {
            owner: owner.to_string(),
            seeds: Vec::new(),
        }
    }

    pub fn with(mut self, seed: Seed) -> Self {
        self.seeds.push(seed);
        self
    }

    /// Insert the batch, drive its events to the requested states and settle
    /// the batch status from them. Returns the batch id and event ids.
    pub async fn insert(self, store: &MemoryStore) -> (Uuid, Vec<Uuid>) {
        let mut batch = BatchUpload::new("seed.csv", 64, self.owner.as_str());
        let events: Vec<ProcessingEvent> = self
            .seeds
            .iter()
            .enumerate()
            .map(|(i, _)| {
                ProcessingEvent::new(
                    batch.id(),
                    EventData::new(format!("doc-{i}"), "client", "SAMPLE_ACTION"),
                )
            })
            .collect();
        batch.set_total_events(events.len() as i32).unwrap();
        store.create_batch(&batch, &events).await.unwrap();

        for (mut event, seed) in events.iter().cloned().zip(self.seeds.iter().copied()) {
            match seed {
                Seed::Pending => continue,
                Seed::Completed => {
                    event.start().unwrap();
                    event.complete(None).unwrap();
                },
                Seed::Failed { times } => {
                    for n in 0..times {
                        if n > 0 {
                            event.reset_for_retry().unwrap();
                        }
                        event.start().unwrap();
                        event.fail("seeded failure").unwrap();
                    }
                },
            }
            store.update_event(&event).await.unwrap();
        }

        let snapshot = store.get_batch_with_events(batch.id()).await.unwrap().unwrap();
        let mut batch = snapshot.batch.clone();
        if !self.seeds.is_empty() && self.seeds.iter().all(|s| *s != Seed::Pending) {
            batch.start().unwrap();
            match BatchUpload::determine_completion_status(&snapshot.events) {
                crate::domain::BatchStatus::Completed => batch.complete().unwrap(),
                crate::domain::BatchStatus::Failed => batch.fail("seeded").unwrap(),
                _ => {},
            }
            assert!(store.try_update_batch(&mut batch).await.unwrap());
        }

        (batch.id(), events.iter().map(|e| e.id()).collect())
    }
}
