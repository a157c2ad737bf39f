//! Cancellation framework: CancellationToken + generation guard.
//! Each new request on a stream advances the generation and cancels the
//! token handed to the previous one, so a superseded task can neither fire
//! nor publish.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Generation counter for one logical stream (text input, audio output).
pub struct TaskGeneration {
    current_token: Mutex<CancellationToken>,
    generation: Arc<AtomicU64>,
}

impl TaskGeneration {
    pub fn new() -> Self {
        Self {
            current_token: Mutex::new(CancellationToken::new()),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Cancel the current task, advance the generation and return a guard
    /// for the task that replaces it.
    pub fn cancel_and_advance(&self) -> GenerationGuard {
        let mut token_guard = self.current_token.lock();
        token_guard.cancel();
        let token = CancellationToken::new();
        *token_guard = token.clone();
        let gen = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        GenerationGuard {
            generation: Arc::clone(&self.generation),
            my_generation: gen,
            token,
        }
    }

    /// Cancel the current task without advancing the generation.
    pub fn cancel_current(&self) {
        self.current_token.lock().cancel();
    }

    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

impl Default for TaskGeneration {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that a task checks before acting on or publishing results.
#[derive(Clone)]
pub struct GenerationGuard {
    generation: Arc<AtomicU64>,
    my_generation: u64,
    token: CancellationToken,
}

impl GenerationGuard {
    /// Returns true if no newer task has been issued on this stream.
    #[inline]
    pub fn is_current(&self) -> bool {
        self.generation.load(Ordering::SeqCst) == self.my_generation
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    #[inline]
    pub fn should_continue(&self) -> bool {
        !self.is_cancelled() && self.is_current()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn my_generation(&self) -> u64 {
        self.my_generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advancing_cancels_the_previous_guard() {
        let gen = TaskGeneration::new();
        let first = gen.cancel_and_advance();
        assert!(first.should_continue());

        let second = gen.cancel_and_advance();
        assert!(first.is_cancelled());
        assert!(!first.is_current());
        assert!(second.should_continue());
        assert_eq!(second.my_generation(), 2);
    }

    #[test]
    fn cancel_current_keeps_generation() {
        let gen = TaskGeneration::new();
        let guard = gen.cancel_and_advance();
        gen.cancel_current();
        assert!(guard.is_cancelled());
        assert!(guard.is_current());
        assert_eq!(gen.current_generation(), 1);
    }
}
