//! Settle-once task handles
//!
//! A [`TaskHandle`] is returned to every caller interested in a task's
//! outcome. All clones observe the same single settlement.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::cancel::CancellationToken;
use crate::PageIndex;

type Continuation<T, E> = Box<dyn FnOnce(&Result<T, E>) + Send>;

struct CompletionState<T, E> {
    result: Option<Result<T, E>>,
    continuations: Vec<Continuation<T, E>>,
}

struct Completion<T, E> {
    state: Mutex<CompletionState<T, E>>,
    settled: Condvar,
}

impl<T, E> Completion<T, E> {
    fn new(result: Option<Result<T, E>>) -> Self {
        Self {
            state: Mutex::new(CompletionState {
                result,
                continuations: Vec::new(),
            }),
            settled: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CompletionState<T, E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to the eventual outcome of a page task.
///
/// Settles exactly once, with a value or an error. Waiting never times out
/// on its own; use [`TaskHandle::wait_timeout`] for a bounded wait.
pub struct TaskHandle<T, E> {
    page: PageIndex,
    token: CancellationToken,
    completion: Arc<Completion<T, E>>,
}

impl<T, E> Clone for TaskHandle<T, E> {
    fn clone(&self) -> Self {
        Self {
            page: self.page,
            token: self.token.clone(),
            completion: Arc::clone(&self.completion),
        }
    }
}

impl<T, E> TaskHandle<T, E> {
    /// Create an unsettled handle
    pub fn pending(page: PageIndex, token: CancellationToken) -> Self {
        Self {
            page,
            token,
            completion: Arc::new(Completion::new(None)),
        }
    }

    /// Create a handle that is already settled
    pub fn ready(page: PageIndex, result: Result<T, E>) -> Self {
        Self {
            page,
            token: CancellationToken::new(),
            completion: Arc::new(Completion::new(Some(result))),
        }
    }

    pub fn page(&self) -> PageIndex {
        self.page
    }

    /// Cancellation token of the underlying task
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_settled(&self) -> bool {
        self.completion.lock().result.is_some()
    }

    /// Whether both handles refer to the same task
    pub fn same_task(&self, other: &TaskHandle<T, E>) -> bool {
        Arc::ptr_eq(&self.completion, &other.completion)
    }
}

impl<T: Clone, E: Clone> TaskHandle<T, E> {
    /// Settle the handle. The first settlement wins; later calls return false.
    ///
    /// Waiters are woken and registered continuations run on the calling
    /// thread, outside the internal lock.
    pub fn settle(&self, result: Result<T, E>) -> bool {
        let continuations = {
            let mut state = self.completion.lock();
            if state.result.is_some() {
                return false;
            }
            state.result = Some(result.clone());
            std::mem::take(&mut state.continuations)
        };
        self.completion.settled.notify_all();

        for continuation in continuations {
            continuation(&result);
        }
        true
    }

    /// Block until settled and return the outcome
    pub fn wait(&self) -> Result<T, E> {
        let mut state = self.completion.lock();
        loop {
            if let Some(result) = state.result.as_ref() {
                return result.clone();
            }
            state = self
                .completion
                .settled
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block for at most `timeout`. Returns `None` if still unsettled.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T, E>> {
        let state = self.completion.lock();
        let (state, _) = self
            .completion
            .settled
            .wait_timeout_while(state, timeout, |state| state.result.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        state.result.clone()
    }

    /// Outcome if already settled, without blocking
    pub fn try_result(&self) -> Option<Result<T, E>> {
        self.completion.lock().result.clone()
    }

    /// Run `continuation` once the handle settles.
    ///
    /// Runs immediately on the calling thread if already settled, otherwise
    /// on the thread that settles the handle.
    pub fn on_settle<F>(&self, continuation: F)
    where
        F: FnOnce(&Result<T, E>) + Send + 'static,
    {
        let settled = {
            let mut state = self.completion.lock();
            match state.result.as_ref() {
                Some(result) => Some(result.clone()),
                None => {
                    state.continuations.push(Box::new(continuation));
                    return;
                }
            }
        };
        if let Some(result) = settled {
            continuation(&result);
        }
    }
}

impl<T, E> fmt::Debug for TaskHandle<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("page", &self.page)
            .field("settled", &self.is_settled())
            .finish()
    }
}
