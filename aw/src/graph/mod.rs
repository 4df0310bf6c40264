//! Phase graph - the nested strategic/tactical loop
//!
//! Outer (strategic) loop: init -> examine workspace -> update plan ->
//! create_next_todos -> handle_transition. Inner (tactical) loop:
//! process -> update_todos -> check_todos -> (repeat | exit). The two
//! loops share one serializable [`GraphState`] checkpointed at every node.

mod engine;
mod state;

pub use engine::{GraphEngine, Progress, RunOutcome};
pub use state::{GraphNode, GraphState, PhaseTransition, PhaseType};
