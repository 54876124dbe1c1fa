//! Promise Primitive
//!
//! A [`Promise`] is a single-assignment eventual value with ordered
//! continuation dispatch, integrated with the event loop for proper async
//! semantics: a continuation registered with [`Promise::when`] never runs
//! synchronously. Settled or not, it fires on a later tick through the
//! current driver's defer queue.
//!
//! [`Deferred`] is the write capability paired with one promise. Settling a
//! deferred with another promise-shaped value is an explicit *adoption*
//! ([`Deferred::resolve_from`]); the [`PromiseLike`] trait is the adaptation
//! point for foreign promise implementations.

use crate::error::{Error, Result};
use crate::event_loop::accessor;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// A registered continuation.
///
/// Exactly one of fulfilment value or failure is delivered, discriminated by
/// the `Result`; fulfilment with an empty value is expressed by `T = ()` or
/// an `Option` element type. The handler's own error is rethrown into the
/// loop, reaching the driver's error funnel.
pub type WhenHandler<T> = Box<dyn FnOnce(Result<T>) -> Result<()>>;

/// Settlement state visible through [`Promise::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseStatus {
    Pending,
    Fulfilled,
    Failed,
}

struct PromiseCell<T> {
    /// `None` while pending; immutable once set.
    result: Option<Result<T>>,
    /// Continuations in registration order.
    handlers: Vec<WhenHandler<T>>,
    /// A drain defer is already queued on the current driver.
    drain_scheduled: bool,
    /// An adoption is in flight; direct settlement is a programming error.
    resolving: bool,
}

impl<T> PromiseCell<T> {
    fn new(result: Option<Result<T>>) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self {
            result,
            handlers: Vec::new(),
            drain_scheduled: false,
            resolving: false,
        }))
    }
}

// ---------------------------------------------------------------------------
// Promise
// ---------------------------------------------------------------------------

/// A single-assignment eventual value.
///
/// Cheaply clonable; all clones observe the same settlement. Element types
/// are `Clone` because one settlement fans out to every registered
/// continuation.
pub struct Promise<T> {
    cell: Rc<RefCell<PromiseCell<T>>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Rc::clone(&self.cell),
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match &self.cell.borrow().result {
            None => PromiseStatus::Pending,
            Some(Ok(_)) => PromiseStatus::Fulfilled,
            Some(Err(_)) => PromiseStatus::Failed,
        };
        f.debug_struct("Promise").field("status", &status).finish()
    }
}

impl<T: Clone + 'static> Promise<T> {
    /// An immediately-fulfilled promise.
    ///
    /// Accidental nesting is ruled out by construction: the argument is a
    /// plain `T`, and turning another promise into this one is the explicit
    /// adoption operation on [`Deferred`].
    pub fn fulfilled(value: T) -> Self {
        Self {
            cell: PromiseCell::new(Some(Ok(value))),
        }
    }

    /// An immediately-failed promise carrying `error`.
    pub fn failed(error: Error) -> Self {
        Self {
            cell: PromiseCell::new(Some(Err(error))),
        }
    }

    /// Wrap any [`PromiseLike`] value as a native promise.
    pub fn adapt<P>(source: P) -> Result<Self>
    where
        P: PromiseLike<T> + 'static,
    {
        let deferred = Deferred::new();
        let promise = deferred.promise();
        deferred.resolve_from(source)?;
        Ok(promise)
    }

    /// Current settlement state.
    pub fn status(&self) -> PromiseStatus {
        match &self.cell.borrow().result {
            None => PromiseStatus::Pending,
            Some(Ok(_)) => PromiseStatus::Fulfilled,
            Some(Err(_)) => PromiseStatus::Failed,
        }
    }

    /// `true` once the promise is fulfilled or failed.
    pub fn is_settled(&self) -> bool {
        self.cell.borrow().result.is_some()
    }

    /// The settled result, if any, without registering a continuation.
    pub fn settled_result(&self) -> Option<Result<T>> {
        self.cell.borrow().result.clone()
    }

    /// Register a continuation.
    ///
    /// Handlers fire in registration order, always on a later tick:
    /// continuations of a pending promise run on the first tick after
    /// settlement; continuations of an already-settled promise are queued
    /// through the current driver's defer and run no earlier than the next
    /// tick. Fails only when no driver is installed to defer into.
    pub fn when<F>(&self, handler: F) -> Result<()>
    where
        F: FnOnce(Result<T>) -> Result<()> + 'static,
    {
        let needs_schedule = {
            let cell = self.cell.borrow();
            cell.result.is_some() && !cell.drain_scheduled
        };
        if needs_schedule {
            let driver = accessor::get()?;
            {
                let mut cell = self.cell.borrow_mut();
                cell.handlers.push(Box::new(handler));
                cell.drain_scheduled = true;
            }
            let cell = Rc::clone(&self.cell);
            driver.defer(move |_, _| Self::drain(&cell));
        } else {
            self.cell.borrow_mut().handlers.push(Box::new(handler));
        }
        Ok(())
    }

    /// Settle a cell, scheduling a continuation drain when needed.
    ///
    /// `adopted` distinguishes settlement arriving through an adoption chain
    /// from direct `resolve`/`fail` calls, which are rejected while an
    /// adoption is in flight.
    fn settle_cell(cell: &Rc<RefCell<PromiseCell<T>>>, result: Result<T>, adopted: bool) -> Result<()> {
        let driver = {
            let c = cell.borrow();
            if c.result.is_some() || (c.resolving && !adopted) {
                return Err(Error::AlreadySettled);
            }
            if !c.handlers.is_empty() && !c.drain_scheduled {
                Some(accessor::get()?)
            } else {
                None
            }
        };
        {
            let mut c = cell.borrow_mut();
            c.result = Some(result);
            if driver.is_some() {
                c.drain_scheduled = true;
            }
        }
        if let Some(driver) = driver {
            let cell = Rc::clone(cell);
            driver.defer(move |_, _| Self::drain(&cell));
        }
        Ok(())
    }

    /// Run the queued continuations in registration order.
    ///
    /// A handler error is rethrown into the loop through a fresh defer so it
    /// reaches the error funnel without starving sibling handlers.
    fn drain(cell: &Rc<RefCell<PromiseCell<T>>>) -> Result<()> {
        let (handlers, result) = {
            let mut c = cell.borrow_mut();
            c.drain_scheduled = false;
            let result = match &c.result {
                Some(result) => result.clone(),
                None => return Ok(()),
            };
            (std::mem::take(&mut c.handlers), result)
        };
        let mut fallback = None;
        for handler in handlers {
            if let Err(error) = handler(result.clone()) {
                match accessor::get() {
                    Ok(driver) => {
                        driver.defer(move |_, _| Err(error.clone()));
                    }
                    Err(_) => {
                        if fallback.is_none() {
                            fallback = Some(error);
                        }
                    }
                }
            }
        }
        match fallback {
            None => Ok(()),
            Some(error) => Err(error),
        }
    }
}

// ---------------------------------------------------------------------------
// Deferred
// ---------------------------------------------------------------------------

/// The write capability over exactly one promise.
///
/// Supports `resolve` / `fail` exactly once; later settlement attempts fail
/// with already-settled. Dropping a deferred without settling leaves its
/// promise pending forever; this is legal, and the stream subsystem relies
/// on it during disposal.
pub struct Deferred<T> {
    cell: Rc<RefCell<PromiseCell<T>>>,
}

impl<T: Clone + 'static> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + 'static> Deferred<T> {
    /// Create a deferred paired with a fresh pending promise.
    pub fn new() -> Self {
        Self {
            cell: PromiseCell::new(None),
        }
    }

    /// The promise this deferred settles.
    pub fn promise(&self) -> Promise<T> {
        Promise {
            cell: Rc::clone(&self.cell),
        }
    }

    /// Fulfil the promise with `value`.
    pub fn resolve(&self, value: T) -> Result<()> {
        Promise::settle_cell(&self.cell, Ok(value), false)
    }

    /// Fail the promise with `error`.
    pub fn fail(&self, error: Error) -> Result<()> {
        Promise::settle_cell(&self.cell, Err(error), false)
    }

    /// Adopt another promise-shaped value: this deferred's promise settles
    /// with the same state as `source`, at the time `source` settles.
    ///
    /// Adoption is transitive-flat: each link chains exactly one
    /// continuation on its source, so adopting an adopter adds no wake-ups
    /// beyond what the inputs already perform.
    pub fn resolve_from<P>(&self, source: P) -> Result<()>
    where
        P: PromiseLike<T> + 'static,
    {
        {
            let mut cell = self.cell.borrow_mut();
            if cell.result.is_some() || cell.resolving {
                return Err(Error::AlreadySettled);
            }
            cell.resolving = true;
        }
        let fulfil_cell = Rc::clone(&self.cell);
        let fail_cell = Rc::clone(&self.cell);
        source.subscribe(
            Box::new(move |value| Promise::settle_cell(&fulfil_cell, Ok(value), true)),
            Box::new(move |error| Promise::settle_cell(&fail_cell, Err(error), true)),
        )
    }
}

// ---------------------------------------------------------------------------
// PromiseLike
// ---------------------------------------------------------------------------

/// The adaptation point for foreign promise implementations.
///
/// A value is promise-like if it supports a two-callback registration:
/// exactly one of the callbacks is eventually invoked with the settlement.
/// The native [`Promise`] implements it, so anything generic over
/// `PromiseLike` accepts both.
pub trait PromiseLike<T> {
    /// Register the settlement callbacks.
    fn subscribe(
        self,
        on_fulfilled: Box<dyn FnOnce(T) -> Result<()>>,
        on_failed: Box<dyn FnOnce(Error) -> Result<()>>,
    ) -> Result<()>;
}

impl<T: Clone + 'static> PromiseLike<T> for Promise<T> {
    fn subscribe(
        self,
        on_fulfilled: Box<dyn FnOnce(T) -> Result<()>>,
        on_failed: Box<dyn FnOnce(Error) -> Result<()>>,
    ) -> Result<()> {
        self.when(move |result| match result {
            Ok(value) => on_fulfilled(value),
            Err(error) => on_failed(error),
        })
    }
}

// ===========================================================================
// Tests
// ===========================================================================
