//! Checkpoint client - durable graph state, one blob per node
//!
//! A write failure must abort the iteration before any persisted mutation,
//! so saves retry briefly and then surface the error; the prior checkpoint
//! stays authoritative and resume re-executes the lost node.

use std::time::Duration;

use eyre::{Context, Result, eyre};
use jobstore::StoreHandle;
use tracing::{debug, warn};

use crate::graph::GraphState;

const SAVE_ATTEMPTS: u32 = 3;
const SAVE_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Worker-side view of the checkpoints table
#[derive(Clone)]
pub struct CheckpointStore {
    handle: StoreHandle,
}

impl CheckpointStore {
    pub fn new(handle: StoreHandle) -> Self {
        Self { handle }
    }

    /// Persist the state as the next checkpoint step.
    ///
    /// Increments `state.step` only after the write lands, so a failed
    /// write leaves the step counter aligned with the store.
    pub async fn save(&self, state: &mut GraphState) -> Result<()> {
        let next_step = state.step + 1;
        let mut staged = state.clone();
        staged.step = next_step;
        let blob = staged.to_blob().context("serialize graph state")?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.handle.append_checkpoint(&state.job_id, next_step, blob.clone()).await {
                Ok(()) => {
                    state.step = next_step;
                    debug!(job_id = %state.job_id, step = next_step, "checkpoint saved");
                    return Ok(());
                }
                Err(e) if e.is_retryable() && attempt < SAVE_ATTEMPTS => {
                    warn!(error = %e, attempt, "checkpoint write failed, retrying");
                    tokio::time::sleep(SAVE_RETRY_DELAY).await;
                }
                Err(e) => {
                    return Err(eyre!("checkpoint write failed after {} attempts: {}", attempt, e));
                }
            }
        }
    }

    /// Load the latest checkpoint for a job
    pub async fn load_latest(&self, job_id: &str) -> Result<Option<GraphState>> {
        let Some(cp) = self.handle.latest_checkpoint(job_id).await? else {
            return Ok(None);
        };
        let state = GraphState::from_blob(&cp.blob).context("deserialize graph state")?;
        Ok(Some(state))
    }

    pub async fn count(&self, job_id: &str) -> Result<u32> {
        Ok(self.handle.checkpoint_count(job_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphNode;

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let handle = StoreHandle::spawn_in_memory().unwrap();
        let store = CheckpointStore::new(handle);

        let mut state = GraphState::new("job-1");
        state.node = GraphNode::Process;

        store.save(&mut state).await.unwrap();
        assert_eq!(state.step, 1);

        state.iteration_count = 5;
        store.save(&mut state).await.unwrap();
        assert_eq!(state.step, 2);

        let loaded = store.load_latest("job-1").await.unwrap().unwrap();
        assert_eq!(loaded.step, 2);
        assert_eq!(loaded.iteration_count, 5);
        assert_eq!(loaded.node, GraphNode::Process);

        assert_eq!(store.count("job-1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_load_missing_job() {
        let handle = StoreHandle::spawn_in_memory().unwrap();
        let store = CheckpointStore::new(handle);
        assert!(store.load_latest("ghost").await.unwrap().is_none());
    }
}
