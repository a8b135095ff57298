//! Outcome recording.
//!
//! Persists run metadata and context usage feedback after a pipeline run
//! completes. Recording is fire-and-forget: it runs on a spawned task and
//! failures are logged, never surfaced to the caller. A slow or broken
//! store must not delay the answer.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::models::{ContextItemId, RunMetadata, Tier};
use crate::store::ContextStore;

/// Usage feedback for one retrieved context item.
#[derive(Debug, Clone)]
pub struct UsageFeedback {
    /// The item that was included in the prompt.
    pub item_id: ContextItemId,
    /// Whether the run that used it succeeded.
    pub helpful: bool,
}

/// Records run outcomes and context usage against the store.
#[derive(Clone)]
pub struct OutcomeRecorder {
    store: Arc<dyn ContextStore>,
}

impl OutcomeRecorder {
    /// Creates a recorder backed by `store`.
    #[must_use]
    pub fn new(store: Arc<dyn ContextStore>) -> Self {
        Self { store }
    }

    /// Spawns a background task that appends the run record and applies
    /// usage feedback. Returns immediately.
    pub fn record(&self, metadata: RunMetadata, feedback: Vec<UsageFeedback>) {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            Self::record_inner(store.as_ref(), metadata, feedback).await;
        });
    }

    /// Same as [`record`](Self::record) but awaited in place, for callers
    /// that must not return before the write lands.
    pub async fn record_now(&self, metadata: RunMetadata, feedback: Vec<UsageFeedback>) {
        Self::record_inner(self.store.as_ref(), metadata, feedback).await;
    }

    async fn record_inner(
        store: &dyn ContextStore,
        metadata: RunMetadata,
        feedback: Vec<UsageFeedback>,
    ) {
        let run_id = metadata.run_id;
        let used_at = crate::current_timestamp();

        for entry in feedback {
            match store
                .record_usage(&entry.item_id, entry.helpful, used_at)
                .await
            {
                Ok(Some(count)) => {
                    debug!(item_id = %entry.item_id, use_count = count, "recorded context usage");
                }
                Ok(None) => {
                    debug!(item_id = %entry.item_id, "usage feedback for unknown item, skipped");
                }
                Err(err) => {
                    warn!(item_id = %entry.item_id, error = %err, "usage recording failed");
                }
            }
        }

        let answered_by = metadata.answered_by;
        if let Err(err) = store.append_run(metadata).await {
            warn!(%run_id, error = %err, "run recording failed");
            return;
        }

        metrics::counter!("axon_runs_recorded_total").increment(1);
        if let Some(tier) = answered_by {
            match tier {
                Tier::Teacher => metrics::counter!("axon_answers_teacher_total").increment(1),
                Tier::Student => metrics::counter!("axon_answers_student_total").increment(1),
            }
        }
        debug!(%run_id, "run recorded");
    }
}

impl std::fmt::Debug for OutcomeRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutcomeRecorder").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContextItem, RunMetadata};
    use crate::store::MemoryStore;
    use uuid::Uuid;

    fn metadata() -> RunMetadata {
        RunMetadata::new(Uuid::now_v7(), "rust")
    }

    #[tokio::test]
    async fn test_record_now_appends_run() {
        let store = Arc::new(MemoryStore::new());
        let recorder = OutcomeRecorder::new(Arc::clone(&store) as Arc<dyn ContextStore>);

        recorder.record_now(metadata(), Vec::new()).await;

        let runs = store.recent_runs(10).await.unwrap();
        assert_eq!(runs.len(), 1);
    }

    #[tokio::test]
    async fn test_feedback_updates_item_counters() {
        let store = Arc::new(MemoryStore::new());
        let item = ContextItem::new("it-1", "borrow checker notes", "rust");
        store.upsert(item).await.unwrap();

        let recorder = OutcomeRecorder::new(Arc::clone(&store) as Arc<dyn ContextStore>);
        recorder
            .record_now(
                metadata(),
                vec![UsageFeedback {
                    item_id: ContextItemId::new("it-1"),
                    helpful: true,
                }],
            )
            .await;

        let item = store.get(&ContextItemId::new("it-1")).await.unwrap().unwrap();
        assert_eq!(item.helpful_count, 1);
        assert_eq!(item.harmful_count, 0);
    }

    #[tokio::test]
    async fn test_unknown_item_feedback_is_ignored() {
        let store = Arc::new(MemoryStore::new());
        let recorder = OutcomeRecorder::new(Arc::clone(&store) as Arc<dyn ContextStore>);

        recorder
            .record_now(
                metadata(),
                vec![UsageFeedback {
                    item_id: ContextItemId::new("missing"),
                    helpful: false,
                }],
            )
            .await;

        let runs = store.recent_runs(10).await.unwrap();
        assert_eq!(runs.len(), 1);
    }
}
