//! Assignment loop - pair pending jobs with idle workers
//!
//! A single periodic task: each tick assigns as many pending jobs as there
//! are idle workers, then sweeps wall-clock timeouts. Claims are
//! transactional in the store, so running several orchestrator replicas
//! against one database cannot double-assign a job.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use crate::lifecycle::Orchestrator;

/// Run the assignment loop until the process exits
pub async fn run_assignment_loop(orchestrator: Arc<Orchestrator>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        // Drain: keep pairing until either side is exhausted
        loop {
            match orchestrator.assign_once().await {
                Ok(Some(job_id)) => {
                    debug!(%job_id, "assigned");
                }
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "assignment pass failed");
                    break;
                }
            }
        }

        if let Err(e) = orchestrator.sweep_timeouts().await {
            error!(error = %e, "timeout sweep failed");
        }
    }
}
