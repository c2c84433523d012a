//! Per-prompt state machine for the query pipeline.

use thiserror::Error;
use tracing::debug;

/// States a prompt passes through on its way to being emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    /// Generated, not yet looked at.
    Pending,
    /// Looking the prompt up in the response cache.
    CacheCheck,
    /// The cache already holds enough responses.
    Satisfied,
    /// Some responses are missing and must be requested.
    NeedsMore,
    /// The backend call is in flight.
    Dispatched,
    /// New responses were combined with the cached ones.
    Merged,
    /// The backend call failed; the failure will be emitted as a value.
    FailedSoft,
    /// The whole cache map was written to the store.
    Persisted,
    /// The outcome was handed to the consumer.
    Emitted,
}

impl QueryState {
    /// Returns `true` once the prompt's outcome has been emitted.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Emitted)
    }

    const fn allows(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::CacheCheck)
                | (Self::CacheCheck, Self::Satisfied | Self::NeedsMore)
                | (Self::NeedsMore, Self::Dispatched)
                | (Self::Dispatched, Self::Merged | Self::FailedSoft)
                | (Self::Merged, Self::Persisted | Self::Emitted)
                | (Self::Satisfied | Self::FailedSoft | Self::Persisted, Self::Emitted)
        )
    }
}

/// Tracks one prompt through [`QueryState`]s.
#[derive(Debug, Clone, Copy)]
pub struct PromptLifecycle {
    prompt_index: usize,
    state: QueryState,
}

impl PromptLifecycle {
    /// Starts tracking the prompt at `prompt_index` in generation order.
    #[must_use]
    pub const fn new(prompt_index: usize) -> Self {
        Self {
            prompt_index,
            state: QueryState::Pending,
        }
    }

    /// Returns the prompt's position in generation order.
    #[must_use]
    pub const fn prompt_index(&self) -> usize {
        self.prompt_index
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> QueryState {
        self.state
    }

    /// Moves to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::InvalidTransition`] when `next` is not reachable
    /// from the current state.
    pub fn advance(&mut self, next: QueryState) -> StateResult<QueryState> {
        if !self.state.allows(next) {
            return Err(StateError::InvalidTransition {
                prompt_index: self.prompt_index,
                from: self.state,
                to: next,
            });
        }

        debug!(
            prompt_index = self.prompt_index,
            from = ?self.state,
            to = ?next,
            "prompt state transition"
        );
        self.state = next;
        Ok(self.state)
    }
}

/// Errors emitted by the prompt state machine.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    /// Transition was not permitted from the current state.
    #[error("invalid transition from {from:?} to {to:?} for prompt #{prompt_index}")]
    InvalidTransition {
        /// Prompt whose transition failed.
        prompt_index: usize,
        /// State prior to the attempted transition.
        from: QueryState,
        /// Requested state.
        to: QueryState,
    },
}

/// Result alias used for state transitions.
pub type StateResult<T> = Result<T, StateError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn walk(steps: &[QueryState]) -> PromptLifecycle {
        let mut lifecycle = PromptLifecycle::new(0);
        for step in steps {
            lifecycle.advance(*step).unwrap();
        }
        lifecycle
    }

    #[test]
    fn cache_hit_path() {
        let lifecycle = walk(&[QueryState::CacheCheck, QueryState::Satisfied, QueryState::Emitted]);
        assert!(lifecycle.state().is_terminal());
    }

    #[test]
    fn dispatch_paths() {
        walk(&[
            QueryState::CacheCheck,
            QueryState::NeedsMore,
            QueryState::Dispatched,
            QueryState::Merged,
            QueryState::Persisted,
            QueryState::Emitted,
        ]);
        walk(&[
            QueryState::CacheCheck,
            QueryState::NeedsMore,
            QueryState::Dispatched,
            QueryState::FailedSoft,
            QueryState::Emitted,
        ]);
    }

    #[test]
    fn skipping_the_cache_is_rejected() {
        let mut lifecycle = PromptLifecycle::new(4);
        let err = lifecycle.advance(QueryState::Dispatched).unwrap_err();
        assert_eq!(
            err,
            StateError::InvalidTransition {
                prompt_index: 4,
                from: QueryState::Pending,
                to: QueryState::Dispatched,
            }
        );
        assert_eq!(lifecycle.state(), QueryState::Pending);
    }

    #[test]
    fn emitted_is_final() {
        let mut lifecycle =
            walk(&[QueryState::CacheCheck, QueryState::Satisfied, QueryState::Emitted]);
        assert!(lifecycle.advance(QueryState::CacheCheck).is_err());
    }
}
