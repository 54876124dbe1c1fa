//! Backpressured Async Stream
//!
//! A single-consumer lazy sequence driven by a producing coroutine. The
//! producer side ([`Emitter`]) pushes values one at a time; every emit
//! returns a promise that settles only when the consumer has advanced past
//! that specific value, giving one-by-one backpressure. The consumer side
//! ([`AsyncIterator`]) pulls with `advance`/`current`; dropping it disposes
//! the stream, resuming a blocked producer whose next emit observes the
//! disposal.
//!
//! Producer and consumer share one interior-mutable state value; the
//! consumer handle is the sole owner of the position cursor.

use crate::error::{Error, Result};
use crate::promise::{Deferred, Promise, PromiseLike};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::OnceLock;

/// Double-completion diagnostics are gated on the `TEMPO_DEBUG` environment
/// variable so the backtrace capture costs nothing when disabled.
fn debug_enabled() -> bool {
    static ENABLED: OnceLock<bool> = OnceLock::new();
    *ENABLED.get_or_init(|| match std::env::var("TEMPO_DEBUG") {
        Ok(value) => value != "0" && !value.eq_ignore_ascii_case("false"),
        Err(_) => false,
    })
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// State shared by the emitter, the producer, and the consumer handle.
///
/// Buffers are keyed by the logical emit index, a stable identity that
/// survives sparse freeing as the consumer advances, unlike an array offset.
struct StreamState<T> {
    /// Unconsumed values by emit index.
    values: BTreeMap<u64, T>,
    /// One backpressure deferred per unconsumed value; keys always mirror
    /// `values`.
    back_pressure: BTreeMap<u64, Deferred<()>>,
    /// Index the next emit will occupy.
    next_index: u64,
    /// Terminal state: fulfilled `false` on normal end, failed on error.
    complete: Option<Promise<bool>>,
    /// The deferred the consumer is currently parked on, if any.
    waiting: Option<Deferred<bool>>,
    /// Set by the consumer handle's destructor.
    disposed: bool,
    /// A consumer handle has been handed out.
    consumed: bool,
    /// Backtrace of the first completion, captured when debugging.
    first_completion: Option<String>,
}

impl<T> StreamState<T> {
    fn shared() -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self {
            values: BTreeMap::new(),
            back_pressure: BTreeMap::new(),
            next_index: 0,
            complete: None,
            waiting: None,
            disposed: false,
            consumed: false,
            first_completion: None,
        }))
    }
}

// ---------------------------------------------------------------------------
// Emitter
// ---------------------------------------------------------------------------

/// The emit capability handed to a producing coroutine.
pub struct Emitter<T> {
    state: Rc<RefCell<StreamState<T>>>,
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<T: Clone + 'static> Emitter<T> {
    /// Append a value to the stream.
    ///
    /// Returns the backpressure promise: it settles when the consumer has
    /// advanced past this value. After the consumer handle was dropped the
    /// returned promise is already failed with disposed (and the stream's
    /// terminal state is installed); emitting after completion is a
    /// synchronous already-complete error.
    pub fn emit(&self, value: T) -> Result<Promise<()>> {
        let (waiting, emit_promise) = {
            let mut st = self.state.borrow_mut();
            if st.disposed {
                if st.complete.is_none() {
                    st.complete = Some(Promise::failed(Error::Disposed));
                }
                let error = match st.complete.as_ref().and_then(|c| c.settled_result()) {
                    Some(Err(error)) => error,
                    _ => Error::Disposed,
                };
                return Ok(Promise::failed(error));
            }
            if st.complete.is_some() {
                return Err(Error::AlreadyComplete {
                    first_completion: st.first_completion.clone(),
                });
            }
            let index = st.next_index;
            st.next_index += 1;
            st.values.insert(index, value);
            let back_pressure = Deferred::new();
            let emit_promise = back_pressure.promise();
            st.back_pressure.insert(index, back_pressure);
            (st.waiting.take(), emit_promise)
        };
        if let Some(waiting) = waiting {
            waiting.resolve(true)?;
        }
        Ok(emit_promise)
    }

    /// Emit the eventual value of a promise-shaped input.
    ///
    /// The input is awaited and its fulfilment re-emitted transparently; a
    /// failed input fails the stream with the same error. If the stream
    /// completes while the input is still pending, the returned promise
    /// fails with a dedicated error distinct from already-complete.
    pub fn emit_from<P>(&self, source: P) -> Result<Promise<()>>
    where
        P: PromiseLike<T> + 'static,
    {
        {
            let st = self.state.borrow();
            if !st.disposed && st.complete.is_some() {
                return Err(Error::AlreadyComplete {
                    first_completion: st.first_completion.clone(),
                });
            }
        }
        let outcome = Rc::new(Deferred::<()>::new());
        let outcome_promise = outcome.promise();

        let fulfil_outcome = Rc::clone(&outcome);
        let fulfil_emitter = self.clone();
        let fail_outcome = outcome;
        let fail_emitter = self.clone();
        source.subscribe(
            Box::new(move |value| match fulfil_emitter.emit(value) {
                Ok(back_pressure) => fulfil_outcome.resolve_from(back_pressure),
                Err(Error::AlreadyComplete { .. }) => fulfil_outcome.fail(Error::failure(
                    "stream was completed before the promised value could be emitted",
                )),
                Err(error) => fulfil_outcome.fail(error),
            }),
            Box::new(move |error| {
                let live = {
                    let st = fail_emitter.state.borrow();
                    st.complete.is_none() && !st.disposed
                };
                if live {
                    fail_emitter.fail(error.clone())?;
                }
                fail_outcome.fail(error)
            }),
        )?;
        Ok(outcome_promise)
    }

    /// End the stream normally; the consumer's final `advance` yields
    /// `false`. A second completion is a synchronous error.
    pub fn complete(&self) -> Result<()> {
        self.finish(Promise::fulfilled(false))
    }

    /// End the stream with a terminal error surfaced by the consumer's next
    /// `advance`.
    pub fn fail(&self, error: Error) -> Result<()> {
        self.finish(Promise::failed(error))
    }

    fn finish(&self, terminal: Promise<bool>) -> Result<()> {
        let waiting = {
            let mut st = self.state.borrow_mut();
            if st.complete.is_some() {
                return Err(Error::AlreadyComplete {
                    first_completion: st.first_completion.clone(),
                });
            }
            if debug_enabled() {
                st.first_completion =
                    Some(std::backtrace::Backtrace::force_capture().to_string());
            }
            st.complete = Some(terminal.clone());
            st.waiting.take()
        };
        if let Some(waiting) = waiting {
            // The parked consumer observes the terminal state directly.
            waiting.resolve_from(terminal)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Producer
// ---------------------------------------------------------------------------

/// A stream driven by a user-supplied coroutine.
///
/// The coroutine factory receives the [`Emitter`] capability and returns the
/// completion promise of its computation; any coroutine flavour that can
/// express its completion as a promise fits. Normal completion ends the
/// stream; a failed completion fails it.
pub struct Producer<T> {
    state: Rc<RefCell<StreamState<T>>>,
}

impl<T: Clone + 'static> Producer<T> {
    /// Start the producing coroutine.
    pub fn new<F>(coroutine: F) -> Result<Self>
    where
        F: FnOnce(Emitter<T>) -> Promise<()>,
    {
        let state = StreamState::shared();
        let emitter = Emitter {
            state: Rc::clone(&state),
        };
        let completion = coroutine(emitter.clone());

        let settled = emitter;
        completion.when(move |result| {
            let already_terminal = settled.state.borrow().complete.is_some();
            match result {
                Ok(()) => {
                    if already_terminal {
                        Ok(())
                    } else {
                        settled.complete()
                    }
                }
                Err(error) => {
                    if !already_terminal {
                        settled.fail(error)?;
                        Ok(())
                    } else if error.is_disposed() {
                        // Disposal unwound the coroutine; the terminal state
                        // is already installed.
                        Ok(())
                    } else {
                        Err(error)
                    }
                }
            }
        })?;
        Ok(Self { state })
    }

    /// Acquire the single consumer handle. A second acquisition fails.
    pub fn iterate(&self) -> Result<AsyncIterator<T>> {
        let mut st = self.state.borrow_mut();
        if st.consumed {
            return Err(Error::invalid_argument("stream can only be consumed once"));
        }
        st.consumed = true;
        Ok(AsyncIterator {
            state: Rc::clone(&self.state),
            position: -1,
        })
    }
}

// ---------------------------------------------------------------------------
// AsyncIterator
// ---------------------------------------------------------------------------

/// The single consumer handle of a stream.
///
/// Owns the position cursor exclusively. Dropping the handle disposes the
/// stream: buffered values are discarded and every outstanding backpressure
/// deferred is resolved so a blocked producer resumes, whose next emit then
/// observes the disposal.
pub struct AsyncIterator<T> {
    state: Rc<RefCell<StreamState<T>>>,
    /// Logical emit index of the current value; starts before the first slot.
    position: i64,
}

impl<T: Clone + 'static> AsyncIterator<T> {
    /// Move to the next value.
    ///
    /// Releases the backpressure of the value being left behind, then yields
    /// `true` when a value is available, `false` when the stream completed
    /// normally, or the stream's terminal failure. Calling again while a
    /// prior `advance` is still pending is a synchronous overlapped-advance
    /// error.
    pub fn advance(&mut self) -> Result<Promise<bool>> {
        let released = {
            let mut st = self.state.borrow_mut();
            if st.waiting.is_some() {
                return Err(Error::OverlappedAdvance);
            }
            if self.position >= 0 {
                let index = self.position as u64;
                st.values.remove(&index);
                st.back_pressure.remove(&index)
            } else {
                None
            }
        };
        if let Some(back_pressure) = released {
            back_pressure.resolve(())?;
        }

        self.position += 1;
        let mut st = self.state.borrow_mut();
        let index = self.position as u64;
        if st.values.contains_key(&index) {
            return Ok(Promise::fulfilled(true));
        }
        if let Some(complete) = &st.complete {
            return Ok(complete.clone());
        }
        let waiting = Deferred::new();
        let promise = waiting.promise();
        st.waiting = Some(waiting);
        Ok(promise)
    }

    /// The value at the current position.
    ///
    /// Fails with completed once the stream is exhausted, or not-ready while
    /// no `advance` promise has settled for this position.
    pub fn current(&self) -> Result<T> {
        let st = self.state.borrow();
        if self.position >= 0 {
            if let Some(value) = st.values.get(&(self.position as u64)) {
                return Ok(value.clone());
            }
        }
        if st.complete.is_some() && st.values.is_empty() {
            return Err(Error::Completed);
        }
        Err(Error::NotReady)
    }
}

impl<T> Drop for AsyncIterator<T> {
    fn drop(&mut self) {
        let released = {
            let mut st = self.state.borrow_mut();
            if st.disposed {
                return;
            }
            st.disposed = true;
            st.values.clear();
            std::mem::take(&mut st.back_pressure)
        };
        // Resume a producer parked on any of these emits; its next emit
        // observes the disposal. Settlement failures cannot propagate out of
        // a destructor.
        for (_, back_pressure) in released {
            let _ = back_pressure.resolve(());
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
