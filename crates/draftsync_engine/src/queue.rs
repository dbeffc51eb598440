//! Batch queue, failed set and in-flight set.
//!
//! Every accepted edit gets a revision number. Deliveries and failures
//! only touch queue entries whose revision is not newer than the attempt,
//! so an edit made while an older copy of the same record is on the wire
//! is never dropped by that older copy's outcome.

use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashSet;

/// How a record reaches the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryMode {
    /// A single `write(id, data)`.
    Single,
    /// A two-phase write of the record under `record_key` plus its backup.
    Dual {
        /// Key of the record target.
        record_key: String,
    },
}

/// A pending batched edit.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncItem {
    /// Record id.
    pub id: String,
    /// Latest payload.
    pub payload: Value,
    /// When the id entered the queue, in epoch milliseconds.
    pub enqueued_at: u64,
    /// Failed attempts carried over from earlier deliveries.
    pub retries: u32,
    /// Revision of `payload`.
    pub revision: u64,
    /// Path the delivery takes.
    pub mode: DeliveryMode,
}

/// A delivery that failed and awaits retry.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedSyncItem {
    /// Record id.
    pub id: String,
    /// Payload to deliver.
    pub payload: Value,
    /// Message of the last failure.
    pub last_error: String,
    /// When the last attempt failed, in epoch milliseconds.
    pub last_attempt_at: u64,
    /// Failed attempts so far.
    pub retries: u32,
    /// Whether `retries` reached the advisory retry limit.
    pub exhausted: bool,
    /// Path the retry takes.
    pub mode: DeliveryMode,
    /// Revision of `payload`.
    pub revision: u64,
}

/// One delivery attempt.
#[derive(Debug, Clone)]
pub(crate) struct Attempt {
    pub(crate) id: String,
    pub(crate) payload: Value,
    pub(crate) revision: u64,
    pub(crate) retries: u32,
    pub(crate) mode: DeliveryMode,
}

impl From<SyncItem> for Attempt {
    fn from(item: SyncItem) -> Self {
        Self {
            id: item.id,
            payload: item.payload,
            revision: item.revision,
            retries: item.retries,
            mode: item.mode,
        }
    }
}

impl From<FailedSyncItem> for Attempt {
    fn from(item: FailedSyncItem) -> Self {
        Self {
            id: item.id,
            payload: item.payload,
            revision: item.revision,
            retries: item.retries,
            mode: item.mode,
        }
    }
}

/// Result of claiming a record for an immediate delivery.
#[derive(Debug)]
pub(crate) enum Claim {
    /// The caller owns the delivery.
    Started(Attempt),
    /// Another delivery of the record is on the wire. The edit was queued
    /// for the next batch instead.
    Deferred {
        /// Batch queue size after the edit was queued.
        queue_size: usize,
    },
}

/// All in-memory delivery state of one engine.
#[derive(Debug, Default)]
pub(crate) struct SyncQueues {
    pub(crate) batch: IndexMap<String, SyncItem>,
    pub(crate) failed: IndexMap<String, FailedSyncItem>,
    pub(crate) in_flight: HashSet<String>,
    last_revision: u64,
}

impl SyncQueues {
    fn next_revision(&mut self) -> u64 {
        self.last_revision += 1;
        self.last_revision
    }

    /// Upserts a batched edit and returns the queue size.
    ///
    /// An overwritten entry keeps its position, enqueue time and retry count.
    pub(crate) fn enqueue(
        &mut self,
        id: &str,
        payload: Value,
        mode: DeliveryMode,
        now: u64,
    ) -> usize {
        let revision = self.next_revision();
        if let Some(item) = self.batch.get_mut(id) {
            item.payload = payload;
            item.revision = revision;
            item.mode = mode;
        } else {
            let retries = self.failed.get(id).map_or(0, |failed| failed.retries);
            self.batch.insert(
                id.to_string(),
                SyncItem {
                    id: id.to_string(),
                    payload,
                    enqueued_at: now,
                    retries,
                    revision,
                    mode,
                },
            );
        }
        self.batch.len()
    }

    /// Claims `id` for an immediate delivery. If another immediate
    /// delivery of `id` is in flight, the edit joins the batch queue under a
    /// newer revision, so the running delivery cannot settle the record.
    pub(crate) fn begin_immediate(
        &mut self,
        id: &str,
        payload: Value,
        mode: DeliveryMode,
        now: u64,
    ) -> Claim {
        if !self.in_flight.insert(id.to_string()) {
            let queue_size = self.enqueue(id, payload, mode, now);
            return Claim::Deferred { queue_size };
        }
        let retries = self.failed.get(id).map_or(0, |failed| failed.retries);
        Claim::Started(Attempt {
            id: id.to_string(),
            payload,
            revision: self.next_revision(),
            retries,
            mode,
        })
    }

    /// Claims a failed record for a retry. Fails if the entry was resolved
    /// or replaced since `attempt` was read, or if the id is in flight.
    pub(crate) fn begin_retry(&mut self, attempt: &Attempt) -> bool {
        let current = self
            .failed
            .get(&attempt.id)
            .is_some_and(|item| item.revision == attempt.revision);
        current && self.in_flight.insert(attempt.id.clone())
    }

    pub(crate) fn finish_immediate(&mut self, id: &str) {
        self.in_flight.remove(id);
    }

    /// Drops every queued copy of the record that `attempt` superseded.
    ///
    /// Returns true when nothing newer for the record is pending or on the
    /// wire, i.e. the remote now holds the latest accepted edit.
    pub(crate) fn delivered(&mut self, attempt: &Attempt) -> bool {
        let id = attempt.id.as_str();
        self.discard_up_to(id, attempt.revision);
        self.batch.get(id).is_none()
            && self.failed.get(id).is_none()
            && !self.in_flight.contains(id)
    }

    /// Drops queued copies without recording a failure. Used for failures
    /// that retrying cannot fix.
    pub(crate) fn rejected(&mut self, attempt: &Attempt) {
        self.discard_up_to(&attempt.id, attempt.revision);
    }

    fn discard_up_to(&mut self, id: &str, revision: u64) {
        if self
            .batch
            .get(id)
            .is_some_and(|item| item.revision <= revision)
        {
            self.batch.shift_remove(id);
        }
        if self
            .failed
            .get(id)
            .is_some_and(|item| item.revision <= revision)
        {
            self.failed.shift_remove(id);
        }
    }

    /// Moves a failed attempt into the failed set and returns its retry
    /// count. Returns `None` when a newer edit of the record is already
    /// pending, in which case that edit is delivered instead.
    pub(crate) fn record_failure(
        &mut self,
        attempt: Attempt,
        error: String,
        now: u64,
        max_retries: u32,
    ) -> Option<u32> {
        let id = attempt.id.as_str();
        let newer_pending = self
            .batch
            .get(id)
            .is_some_and(|item| item.revision > attempt.revision)
            || self
                .failed
                .get(id)
                .is_some_and(|item| item.revision > attempt.revision);
        if newer_pending {
            return None;
        }

        self.batch.shift_remove(id);
        let previous = self.failed.get(id).map_or(0, |item| item.retries);
        let retries = previous.max(attempt.retries) + 1;
        self.failed.insert(
            id.to_string(),
            FailedSyncItem {
                id: attempt.id.clone(),
                payload: attempt.payload,
                last_error: error,
                last_attempt_at: now,
                retries,
                exhausted: retries >= max_retries,
                mode: attempt.mode,
                revision: attempt.revision,
            },
        );
        Some(retries)
    }

    /// Smallest retry count in the failed set.
    pub(crate) fn min_retries(&self) -> Option<u32> {
        self.failed.values().map(|item| item.retries).min()
    }

    /// Copies of the queued edits, in delivery order.
    pub(crate) fn queued(&self) -> Vec<SyncItem> {
        self.batch.values().cloned().collect()
    }

    /// Copies of the failed deliveries, oldest first.
    pub(crate) fn failures(&self) -> Vec<FailedSyncItem> {
        self.failed.values().cloned().collect()
    }

    pub(crate) fn clear(&mut self) {
        self.batch.clear();
        self.failed.clear();
        self.in_flight.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn start(queues: &mut SyncQueues, id: &str, payload: Value) -> Attempt {
        match queues.begin_immediate(id, payload, DeliveryMode::Single, 0) {
            Claim::Started(attempt) => attempt,
            Claim::Deferred { .. } => panic!("{id} already in flight"),
        }
    }

    fn enqueue(queues: &mut SyncQueues, id: &str, payload: Value, now: u64) -> usize {
        queues.enqueue(id, payload, DeliveryMode::Single, now)
    }

    #[test]
    fn enqueue_is_last_write_wins() {
        let mut queues = SyncQueues::default();
        assert_eq!(enqueue(&mut queues, "q1", json!({"total": 100}), 1), 1);
        assert_eq!(enqueue(&mut queues, "q2", json!(2), 2), 2);
        queues.batch.get_mut("q1").unwrap().retries = 2;
        assert_eq!(enqueue(&mut queues, "q1", json!({"total": 150}), 5), 2);

        let items = queues.queued();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "q1");
        assert_eq!(items[0].payload, json!({"total": 150}));
        assert_eq!(items[0].retries, 2);
        assert_eq!(items[0].enqueued_at, 1);
    }

    #[test]
    fn removal_keeps_remaining_order() {
        let mut queues = SyncQueues::default();
        for id in ["a", "b", "c"] {
            enqueue(&mut queues, id, json!(id), 0);
        }
        let b: Attempt = queues.batch["b"].clone().into();
        queues.delivered(&b);

        let ids: Vec<_> = queues.queued().into_iter().map(|item| item.id).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn in_flight_guard_defers_second_edit() {
        let mut queues = SyncQueues::default();
        let first = start(&mut queues, "q1", json!(1));

        match queues.begin_immediate("q1", json!(2), DeliveryMode::Single, 7) {
            Claim::Deferred { queue_size } => assert_eq!(queue_size, 1),
            Claim::Started(_) => panic!("second delivery started"),
        }
        assert_eq!(queues.batch["q1"].payload, json!(2));
        assert_eq!(queues.batch["q1"].enqueued_at, 7);

        queues.finish_immediate("q1");
        assert!(!queues.delivered(&first));
        assert_eq!(queues.batch.len(), 1);
        start(&mut queues, "q1", json!(3));
    }

    #[test]
    fn deferred_edit_keeps_its_delivery_mode() {
        let mut queues = SyncQueues::default();
        start(&mut queues, "q1", json!(1));
        let dual = DeliveryMode::Dual {
            record_key: "q1.json".into(),
        };
        queues.begin_immediate("q1", json!(2), dual.clone(), 0);

        let attempt: Attempt = queues.queued().remove(0).into();
        assert_eq!(attempt.mode, dual);
    }

    #[test]
    fn retry_claim_requires_current_entry() {
        let mut queues = SyncQueues::default();
        let attempt = start(&mut queues, "q1", json!(1));
        queues.finish_immediate("q1");
        queues.record_failure(attempt, "e".into(), 0, 3);

        let stale: Attempt = queues.failures().remove(0).into();
        assert!(queues.begin_retry(&stale));
        assert!(!queues.begin_retry(&stale));
        queues.finish_immediate("q1");

        queues.delivered(&stale);
        assert!(!queues.begin_retry(&stale));
    }

    #[test]
    fn failure_moves_item_and_counts_retries() {
        let mut queues = SyncQueues::default();
        enqueue(&mut queues, "q1", json!(1), 0);
        let attempt: Attempt = queues.queued().remove(0).into();

        let retries = queues.record_failure(attempt.clone(), "boom".into(), 10, 3);
        assert_eq!(retries, Some(1));
        assert_eq!(queues.batch.len(), 0);

        let failed: Attempt = queues.failures().remove(0).into();
        assert_eq!(queues.record_failure(failed, "boom".into(), 20, 3), Some(2));
        assert_eq!(queues.min_retries(), Some(2));
        assert_eq!(queues.failed["q1"].last_attempt_at, 20);
    }

    #[test]
    fn exhausted_at_max_retries() {
        let mut queues = SyncQueues::default();
        let attempt = start(&mut queues, "q1", json!(1));
        queues.record_failure(attempt.clone(), "e".into(), 0, 2);
        assert!(!queues.failed["q1"].exhausted);
        queues.record_failure(attempt, "e".into(), 0, 2);
        assert!(queues.failed["q1"].exhausted);
    }

    #[test]
    fn newer_edit_survives_older_outcomes() {
        let mut queues = SyncQueues::default();
        enqueue(&mut queues, "q1", json!("old"), 0);
        let old: Attempt = queues.queued().remove(0).into();

        // Edited again while the old copy is on the wire.
        enqueue(&mut queues, "q1", json!("new"), 1);

        assert_eq!(queues.record_failure(old.clone(), "e".into(), 2, 3), None);
        assert!(!queues.delivered(&old));
        assert_eq!(queues.batch["q1"].payload, json!("new"));
        assert_eq!(queues.failed.len(), 0);
    }

    #[test]
    fn delivery_clears_older_copies() {
        let mut queues = SyncQueues::default();
        enqueue(&mut queues, "q1", json!("queued"), 0);
        let attempt = start(&mut queues, "q1", json!("critical"));

        queues.finish_immediate("q1");
        assert!(queues.delivered(&attempt));
        assert_eq!(queues.batch.len(), 0);
        assert!(queues.in_flight.is_empty());
    }

    #[test]
    fn failure_supersedes_older_queued_copy() {
        let mut queues = SyncQueues::default();
        enqueue(&mut queues, "q1", json!("queued"), 0);
        let attempt = start(&mut queues, "q1", json!("critical"));

        queues.record_failure(attempt, "e".into(), 1, 3);
        assert_eq!(queues.batch.len(), 0);
        assert_eq!(queues.failed["q1"].payload, json!("critical"));
    }
}
