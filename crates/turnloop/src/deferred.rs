//! Single-assignment deferred values.
//!
//! A [`Deferred`] is a container that is resolved or rejected exactly once;
//! later settlements are ignored. Callbacks registered with [`Deferred::then`]
//! always run as microtasks — even when the value is already settled at
//! registration time — so observers see a consistent ordering regardless of
//! when they subscribe. `then` returns a downstream deferred settled from the
//! callback's result, so chains compose.
//!
//! Callback errors reject the downstream deferred; they do not reach the
//! scheduler's error sink.

use crate::error::TaskError;
use crate::scheduler::Scheduler;
use std::cell::RefCell;
use std::rc::Rc;

type Callback<T> = Box<dyn FnOnce(&mut Scheduler, Result<T, TaskError>)>;

enum State<T> {
    /// Not yet settled; callbacks wait here
    Pending(Vec<Callback<T>>),
    /// Settled with a value or an error
    Settled(Result<T, TaskError>),
}

/// A value that becomes available later, observed through microtasks.
pub struct Deferred<T> {
    state: Rc<RefCell<State<T>>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T: Clone + 'static> Deferred<T> {
    /// Create a new unsettled deferred
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(State::Pending(Vec::new()))),
        }
    }

    /// Settle with a value. No-op if already settled.
    pub fn resolve(&self, scheduler: &mut Scheduler, value: T) {
        self.settle(scheduler, Ok(value));
    }

    /// Settle with an error. No-op if already settled.
    pub fn reject(&self, scheduler: &mut Scheduler, error: TaskError) {
        self.settle(scheduler, Err(error));
    }

    /// Whether the deferred has been resolved or rejected
    pub fn is_settled(&self) -> bool {
        matches!(&*self.state.borrow(), State::Settled(_))
    }

    /// The settled result, if any
    pub fn result(&self) -> Option<Result<T, TaskError>> {
        match &*self.state.borrow() {
            State::Settled(result) => Some(result.clone()),
            State::Pending(_) => None,
        }
    }

    /// Register a callback to run as a microtask once this deferred settles.
    ///
    /// Returns a downstream deferred settled from the callback's result.
    pub fn then<U, F>(&self, scheduler: &mut Scheduler, f: F) -> Deferred<U>
    where
        U: Clone + 'static,
        F: FnOnce(&mut Scheduler, Result<T, TaskError>) -> Result<U, TaskError> + 'static,
    {
        let next = Deferred::new();
        let downstream = next.clone();
        let callback: Callback<T> = Box::new(move |scheduler, result| {
            match f(scheduler, result) {
                Ok(value) => downstream.resolve(scheduler, value),
                Err(error) => downstream.reject(scheduler, error),
            }
        });

        // Release the borrow before touching the scheduler: the enqueued
        // microtask may resolve further deferreds sharing this state.
        let already_settled = {
            let mut state = self.state.borrow_mut();
            match &mut *state {
                State::Pending(callbacks) => {
                    callbacks.push(callback);
                    None
                }
                State::Settled(result) => Some((callback, result.clone())),
            }
        };

        if let Some((callback, result)) = already_settled {
            scheduler.enqueue_microtask(move |s| {
                callback(s, result);
                Ok(())
            });
        }

        next
    }

    fn settle(&self, scheduler: &mut Scheduler, result: Result<T, TaskError>) {
        let callbacks = {
            let mut state = self.state.borrow_mut();
            match &mut *state {
                State::Settled(_) => return, // first settlement wins
                State::Pending(callbacks) => {
                    let callbacks = std::mem::take(callbacks);
                    *state = State::Settled(result.clone());
                    callbacks
                }
            }
        };

        for callback in callbacks {
            let result = result.clone();
            scheduler.enqueue_microtask(move |s| {
                callback(s, result);
                Ok(())
            });
        }
    }
}

impl<T: Clone + 'static> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_first_settlement_wins() {
        let mut scheduler = Scheduler::new();
        let deferred = Deferred::new();

        deferred.resolve(&mut scheduler, 1);
        deferred.resolve(&mut scheduler, 2);
        deferred.reject(&mut scheduler, TaskError::new("late"));

        assert_eq!(deferred.result(), Some(Ok(1)));
    }

    #[test]
    fn test_then_on_settled_still_runs_as_microtask() {
        let mut scheduler = Scheduler::new();
        let deferred = Deferred::new();
        deferred.resolve(&mut scheduler, 7);

        let observed = Rc::new(RefCell::new(None));
        let seen = observed.clone();
        deferred.then(&mut scheduler, move |_, result| {
            *seen.borrow_mut() = Some(result.expect("resolved"));
            Ok(())
        });

        // Not yet: the callback is queued, not run inline.
        assert_eq!(*observed.borrow(), None);

        scheduler.run_until_idle().expect("driver not re-entered");
        assert_eq!(*observed.borrow(), Some(7));
    }

    #[test]
    fn test_then_chains_propagate_values() {
        let mut scheduler = Scheduler::new();
        let deferred: Deferred<u32> = Deferred::new();

        let observed = Rc::new(RefCell::new(None));
        let seen = observed.clone();
        deferred
            .then(&mut scheduler, |_, result| result.map(|v| v * 2))
            .then(&mut scheduler, move |_, result| {
                *seen.borrow_mut() = Some(result.expect("resolved"));
                Ok(())
            });

        deferred.resolve(&mut scheduler, 21);
        scheduler.run_until_idle().expect("driver not re-entered");

        assert_eq!(*observed.borrow(), Some(42));
    }

    #[test]
    fn test_callback_error_rejects_downstream() {
        let mut scheduler = Scheduler::new();
        let deferred: Deferred<u32> = Deferred::new();

        let observed = Rc::new(RefCell::new(None));
        let seen = observed.clone();
        deferred
            .then::<u32, _>(&mut scheduler, |_, _| Err(TaskError::new("mapped away")))
            .then(&mut scheduler, move |_, result| {
                *seen.borrow_mut() = Some(result);
                Ok(())
            });

        deferred.resolve(&mut scheduler, 1);
        scheduler.run_until_idle().expect("driver not re-entered");

        assert_eq!(
            *observed.borrow(),
            Some(Err(TaskError::new("mapped away")))
        );
    }
}
