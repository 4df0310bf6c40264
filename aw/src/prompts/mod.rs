//! Prompt templates for the phase graph

pub mod embedded;
mod loader;

pub use loader::{
    CreateTodosContext, FeedbackContext, PromptLoader, SprintExhaustedContext, TransitionContext,
};
