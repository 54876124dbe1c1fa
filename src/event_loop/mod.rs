//! Event Loop Driver
//!
//! This module provides the single-threaded cooperative event loop at the
//! heart of the crate: a scheduler of *watchers* (deferred callbacks,
//! one-shot and repeating timers, stream readability/writability interests,
//! and signal interests) dispatched with a fixed per-tick class order.
//!
//! # Tick discipline
//!
//! One tick processes watcher classes in this order:
//!
//! 1. all activated `defer` callbacks, in enabling order;
//! 2. expired `delay` / `repeat` timers, by deadline ascending;
//! 3. readiness events for watched fds;
//! 4. signal deliveries accumulated since the last tick.
//!
//! A watcher enabled during tick *n* is activated at the start of tick
//! *n + 1* and can never fire in the tick that enabled it. After dispatch the
//! driver blocks in its [`Poller`] up to the nearest timer deadline.
//!
//! The loop runs until stopped or until no *referenced* enabled watchers
//! remain; unreferenced watchers keep firing but do not extend the loop's
//! lifetime.

pub mod accessor;
pub mod poller;
pub mod watcher;

use crate::error::{Error, Result};
use poller::{Interest, PollEvent, Poller, SleepPoller};
use rustc_hash::FxHashMap;
use std::any::Any;
use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::os::fd::RawFd;
use std::rc::Rc;
use watcher::{Callback, LoopInfo, Watcher, WatcherData, WatcherId, WatcherKind};

/// Sink for errors raised inside watcher callbacks.
///
/// The handler may itself fail, in which case its error terminates `run`.
/// Installing a handler returns the previous one.
pub type ErrorHandler = Box<dyn FnMut(&Error) -> Result<()>>;

// ---------------------------------------------------------------------------
// Driver state
// ---------------------------------------------------------------------------

struct LoopInner {
    poller: Box<dyn Poller>,
    /// Every live (non-cancelled, non-fired-one-shot) watcher, by raw id.
    watchers: FxHashMap<u64, Watcher>,
    next_id: u64,
    /// Watchers enabled since the last activation pass, in enabling order.
    pending_activation: Vec<WatcherId>,
    /// Activated defers awaiting dispatch, in enabling order.
    defer_queue: VecDeque<WatcherId>,
    /// Active timers keyed by (deadline, raw id) for deadline-ordered sweep.
    timers: BTreeMap<(u64, u64), WatcherId>,
    /// Active I/O watchers per fd.
    io_watchers: FxHashMap<RawFd, Vec<WatcherId>>,
    /// Active signal watchers per signal number.
    signal_watchers: FxHashMap<i32, Vec<WatcherId>>,
    running: bool,
    stop_requested: bool,
    error_handler: Option<ErrorHandler>,
    /// Loop-bound key/value registry.
    state: FxHashMap<String, Rc<dyn Any>>,
}

impl LoopInner {
    /// Remove a watcher from the active dispatch structure for its kind.
    fn unlink_active(
        &mut self,
        id: WatcherId,
        kind: WatcherKind,
        deadline: u64,
        fd: Option<RawFd>,
        signo: Option<i32>,
    ) {
        match kind {
            WatcherKind::Defer => {
                self.defer_queue.retain(|queued| *queued != id);
            }
            WatcherKind::Delay | WatcherKind::Repeat => {
                self.timers.remove(&(deadline, id.0));
            }
            WatcherKind::OnReadable | WatcherKind::OnWritable => {
                if let Some(fd) = fd {
                    self.remove_io_watcher(fd, id);
                }
            }
            WatcherKind::OnSignal => {
                if let Some(signo) = signo {
                    self.remove_signal_watcher(signo, id);
                }
            }
        }
    }

    fn remove_io_watcher(&mut self, fd: RawFd, id: WatcherId) {
        let emptied = match self.io_watchers.get_mut(&fd) {
            Some(list) => {
                list.retain(|watching| *watching != id);
                list.is_empty()
            }
            None => return,
        };
        if emptied {
            self.io_watchers.remove(&fd);
            let _ = self.poller.deregister(fd);
        } else {
            let _ = self.refresh_interest(fd);
        }
    }

    /// Recompute the poller interest for an fd from its enabled watchers.
    fn refresh_interest(&mut self, fd: RawFd) -> Result<()> {
        let Some(list) = self.io_watchers.get(&fd) else {
            return Ok(());
        };
        let mut interest = Interest::default();
        for id in list {
            if let Some(w) = self.watchers.get(&id.0) {
                if w.enabled {
                    match w.kind {
                        WatcherKind::OnReadable => interest.readable = true,
                        WatcherKind::OnWritable => interest.writable = true,
                        _ => {}
                    }
                }
            }
        }
        self.poller.update(fd, interest)
    }

    fn remove_signal_watcher(&mut self, signo: i32, id: WatcherId) {
        let emptied = match self.signal_watchers.get_mut(&signo) {
            Some(list) => {
                list.retain(|watching| *watching != id);
                list.is_empty()
            }
            None => return,
        };
        if emptied {
            self.signal_watchers.remove(&signo);
            let _ = self.poller.unwatch_signal(signo);
        }
    }
}

// ---------------------------------------------------------------------------
// EventLoop
// ---------------------------------------------------------------------------

/// Handle to a single-threaded event loop driver.
///
/// The handle is cheaply clonable; all clones share one driver. Watcher
/// callbacks receive a handle-free environment and may re-enter the driver
/// through any clone (or through [`accessor`]); no callback is ever invoked
/// while the driver's internal state is borrowed.
pub struct EventLoop {
    inner: Rc<RefCell<LoopInner>>,
}

impl Clone for EventLoop {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoop {
    /// Create a driver backed by the portable [`SleepPoller`].
    pub fn new() -> Self {
        Self::with_poller(Box::new(SleepPoller::new()))
    }

    /// Create a driver backed by the given poller.
    pub fn with_poller(poller: Box<dyn Poller>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(LoopInner {
                poller,
                watchers: FxHashMap::default(),
                next_id: 1,
                pending_activation: Vec::new(),
                defer_queue: VecDeque::new(),
                timers: BTreeMap::new(),
                io_watchers: FxHashMap::default(),
                signal_watchers: FxHashMap::default(),
                running: false,
                stop_requested: false,
                error_handler: None,
                state: FxHashMap::default(),
            })),
        }
    }

    // -- Watcher constructors ----------------------------------------------

    /// Register a callback dispatched once at the start of the next tick.
    pub fn defer<F>(&self, callback: F) -> WatcherId
    where
        F: FnMut(WatcherId, WatcherData) -> Result<()> + 'static,
    {
        self.add_plain(WatcherKind::Defer, 0, None, Box::new(callback))
    }

    /// [`defer`](Self::defer) with a caller datum handed to the callback.
    pub fn defer_with<F>(&self, data: Rc<dyn Any>, callback: F) -> WatcherId
    where
        F: FnMut(WatcherId, WatcherData) -> Result<()> + 'static,
    {
        self.add_plain(WatcherKind::Defer, 0, Some(data), Box::new(callback))
    }

    /// Register a one-shot timer firing `ms` milliseconds after activation.
    pub fn delay<F>(&self, ms: u64, callback: F) -> WatcherId
    where
        F: FnMut(WatcherId, WatcherData) -> Result<()> + 'static,
    {
        self.add_plain(WatcherKind::Delay, ms, None, Box::new(callback))
    }

    /// [`delay`](Self::delay) with a caller datum.
    pub fn delay_with<F>(&self, ms: u64, data: Rc<dyn Any>, callback: F) -> WatcherId
    where
        F: FnMut(WatcherId, WatcherData) -> Result<()> + 'static,
    {
        self.add_plain(WatcherKind::Delay, ms, Some(data), Box::new(callback))
    }

    /// Register a repeating timer with the given interval.
    ///
    /// The first firing deadline is `now + interval` at activation; after
    /// every dispatch the next deadline is recomputed from the current clock,
    /// so a blocked loop coalesces missed firings into one.
    pub fn repeat<F>(&self, interval_ms: u64, callback: F) -> WatcherId
    where
        F: FnMut(WatcherId, WatcherData) -> Result<()> + 'static,
    {
        self.add_plain(WatcherKind::Repeat, interval_ms, None, Box::new(callback))
    }

    /// [`repeat`](Self::repeat) with a caller datum.
    pub fn repeat_with<F>(&self, interval_ms: u64, data: Rc<dyn Any>, callback: F) -> WatcherId
    where
        F: FnMut(WatcherId, WatcherData) -> Result<()> + 'static,
    {
        self.add_plain(WatcherKind::Repeat, interval_ms, Some(data), Box::new(callback))
    }

    /// Watch an fd for readability. The fd stays owned by the caller, who
    /// must cancel the watcher before closing it.
    pub fn on_readable<F>(&self, fd: RawFd, callback: F) -> Result<WatcherId>
    where
        F: FnMut(WatcherId, RawFd, WatcherData) -> Result<()> + 'static,
    {
        self.add_io(WatcherKind::OnReadable, fd, None, Box::new(callback))
    }

    /// [`on_readable`](Self::on_readable) with a caller datum.
    pub fn on_readable_with<F>(&self, fd: RawFd, data: Rc<dyn Any>, callback: F) -> Result<WatcherId>
    where
        F: FnMut(WatcherId, RawFd, WatcherData) -> Result<()> + 'static,
    {
        self.add_io(WatcherKind::OnReadable, fd, Some(data), Box::new(callback))
    }

    /// Watch an fd for writability.
    pub fn on_writable<F>(&self, fd: RawFd, callback: F) -> Result<WatcherId>
    where
        F: FnMut(WatcherId, RawFd, WatcherData) -> Result<()> + 'static,
    {
        self.add_io(WatcherKind::OnWritable, fd, None, Box::new(callback))
    }

    /// [`on_writable`](Self::on_writable) with a caller datum.
    pub fn on_writable_with<F>(&self, fd: RawFd, data: Rc<dyn Any>, callback: F) -> Result<WatcherId>
    where
        F: FnMut(WatcherId, RawFd, WatcherData) -> Result<()> + 'static,
    {
        self.add_io(WatcherKind::OnWritable, fd, Some(data), Box::new(callback))
    }

    /// Watch a signal number.
    pub fn on_signal<F>(&self, signo: i32, callback: F) -> Result<WatcherId>
    where
        F: FnMut(WatcherId, i32, WatcherData) -> Result<()> + 'static,
    {
        self.add_signal(signo, None, Box::new(callback))
    }

    /// [`on_signal`](Self::on_signal) with a caller datum.
    pub fn on_signal_with<F>(&self, signo: i32, data: Rc<dyn Any>, callback: F) -> Result<WatcherId>
    where
        F: FnMut(WatcherId, i32, WatcherData) -> Result<()> + 'static,
    {
        self.add_signal(signo, Some(data), Box::new(callback))
    }

    fn add_plain(
        &self,
        kind: WatcherKind,
        interval_ms: u64,
        data: WatcherData,
        callback: Box<dyn FnMut(WatcherId, WatcherData) -> Result<()>>,
    ) -> WatcherId {
        self.add_watcher(kind, interval_ms, None, None, data, Callback::Plain(callback))
    }

    fn add_io(
        &self,
        kind: WatcherKind,
        fd: RawFd,
        data: WatcherData,
        callback: Box<dyn FnMut(WatcherId, RawFd, WatcherData) -> Result<()>>,
    ) -> Result<WatcherId> {
        if !self.inner.borrow().poller.supports_io() {
            return Err(Error::unsupported(
                "the installed poller cannot watch fd readiness",
            ));
        }
        Ok(self.add_watcher(kind, 0, Some(fd), None, data, Callback::Io(callback)))
    }

    fn add_signal(
        &self,
        signo: i32,
        data: WatcherData,
        callback: Box<dyn FnMut(WatcherId, i32, WatcherData) -> Result<()>>,
    ) -> Result<WatcherId> {
        if !self.inner.borrow().poller.supports_signals() {
            return Err(Error::unsupported(
                "the installed poller cannot watch signals",
            ));
        }
        Ok(self.add_watcher(
            WatcherKind::OnSignal,
            0,
            None,
            Some(signo),
            data,
            Callback::Signal(callback),
        ))
    }

    fn add_watcher(
        &self,
        kind: WatcherKind,
        interval_ms: u64,
        fd: Option<RawFd>,
        signo: Option<i32>,
        data: WatcherData,
        callback: Callback,
    ) -> WatcherId {
        let mut inner = self.inner.borrow_mut();
        let id = WatcherId(inner.next_id);
        inner.next_id += 1;
        let mut w = Watcher::new(id, kind, data, callback);
        w.interval_ms = interval_ms;
        w.fd = fd;
        w.signo = signo;
        inner.watchers.insert(id.0, w);
        inner.pending_activation.push(id);
        id
    }

    // -- Watcher controls --------------------------------------------------

    /// Re-enable a disabled watcher; it activates at the start of the next
    /// tick. Fails with invalid-watcher on unknown or cancelled ids.
    pub fn enable(&self, id: WatcherId) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        let needs_queue = {
            let w = inner
                .watchers
                .get_mut(&id.0)
                .ok_or(Error::invalid_watcher(id))?;
            if w.enabled {
                false
            } else {
                w.enabled = true;
                if !w.pending && !w.active {
                    w.pending = true;
                    true
                } else {
                    false
                }
            }
        };
        if needs_queue {
            inner.pending_activation.push(id);
        }
        Ok(())
    }

    /// Disable a watcher, effective immediately: it cannot fire later in the
    /// current tick. A no-op on unknown ids.
    pub fn disable(&self, id: WatcherId) {
        let mut inner = self.inner.borrow_mut();
        let unlink = {
            let Some(w) = inner.watchers.get_mut(&id.0) else {
                return;
            };
            if !w.enabled {
                return;
            }
            w.enabled = false;
            if w.active {
                w.active = false;
                Some((w.kind, w.deadline, w.fd, w.signo))
            } else {
                None
            }
        };
        if let Some((kind, deadline, fd, signo)) = unlink {
            inner.unlink_active(id, kind, deadline, fd, signo);
        }
    }

    /// Cancel a watcher, releasing its poller resources and permanently
    /// invalidating its id. A no-op on unknown ids.
    pub fn cancel(&self, id: WatcherId) {
        let mut inner = self.inner.borrow_mut();
        let unlink = match inner.watchers.get(&id.0) {
            Some(w) if w.active => Some((w.kind, w.deadline, w.fd, w.signo)),
            Some(_) => None,
            None => return,
        };
        if let Some((kind, deadline, fd, signo)) = unlink {
            inner.unlink_active(id, kind, deadline, fd, signo);
        }
        inner.pending_activation.retain(|pending| *pending != id);
        inner.watchers.remove(&id.0);
    }

    /// Mark a watcher as keeping the loop alive (the default).
    pub fn reference(&self, id: WatcherId) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        let w = inner
            .watchers
            .get_mut(&id.0)
            .ok_or(Error::invalid_watcher(id))?;
        w.referenced = true;
        Ok(())
    }

    /// Mark a watcher as not extending the loop's lifetime.
    pub fn unreference(&self, id: WatcherId) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        let w = inner
            .watchers
            .get_mut(&id.0)
            .ok_or(Error::invalid_watcher(id))?;
        w.referenced = false;
        Ok(())
    }

    // -- Error handler and loop-bound state --------------------------------

    /// Install (or clear) the callback error sink, returning the previous
    /// handler.
    pub fn set_error_handler(&self, handler: Option<ErrorHandler>) -> Option<ErrorHandler> {
        std::mem::replace(&mut self.inner.borrow_mut().error_handler, handler)
    }

    /// Store a loop-bound value under a key.
    pub fn set_state(&self, key: impl Into<String>, value: Rc<dyn Any>) {
        self.inner.borrow_mut().state.insert(key.into(), value);
    }

    /// Fetch a loop-bound value by key.
    pub fn get_state(&self, key: &str) -> Option<Rc<dyn Any>> {
        self.inner.borrow().state.get(key).cloned()
    }

    /// Snapshot the driver's watcher counts and running flag.
    pub fn info(&self) -> LoopInfo {
        let inner = self.inner.borrow();
        let mut info = LoopInfo::default();
        for w in inner.watchers.values() {
            let counts = info.counts_mut(w.kind);
            if w.enabled {
                counts.enabled += 1;
                if w.referenced {
                    info.enabled_watchers.referenced += 1;
                } else {
                    info.enabled_watchers.unreferenced += 1;
                }
            } else {
                counts.disabled += 1;
            }
        }
        info.running = inner.running;
        info
    }

    // -- Lifecycle ---------------------------------------------------------

    /// Run the loop until it is stopped or all referenced enabled watchers
    /// are drained. An error unhandled by the error funnel terminates the
    /// run and is returned.
    pub fn run(&self) -> Result<()> {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.running {
                return Err(Error::invalid_argument("driver is already running"));
            }
            inner.running = true;
            inner.stop_requested = false;
        }
        let result = self.run_loop();
        self.inner.borrow_mut().running = false;
        result
    }

    /// Request the loop to stop after the current tick.
    pub fn stop(&self) {
        self.inner.borrow_mut().stop_requested = true;
    }

    fn run_loop(&self) -> Result<()> {
        loop {
            self.tick()?;
            let inner = self.inner.borrow();
            if inner.stop_requested {
                return Ok(());
            }
            let alive = inner.watchers.values().any(|w| w.enabled && w.referenced);
            if !alive {
                return Ok(());
            }
        }
    }

    // -- Tick phases -------------------------------------------------------

    fn tick(&self) -> Result<()> {
        self.activate_pending()?;
        self.dispatch_defers()?;

        // Block up to the nearest timer deadline; do not block at all while
        // watchers await activation; skip the poll when nothing can wake us
        // or when only unreferenced watchers remain (they must not extend
        // the loop's lifetime by holding it in the poller).
        let timeout = {
            let inner = self.inner.borrow();
            let alive = inner.watchers.values().any(|w| w.enabled && w.referenced);
            if !alive {
                None
            } else if !inner.pending_activation.is_empty() {
                Some(Some(0))
            } else if let Some((&(deadline, _), _)) = inner.timers.iter().next() {
                let now = inner.poller.now();
                Some(Some(deadline.saturating_sub(now)))
            } else if !inner.io_watchers.is_empty() || !inner.signal_watchers.is_empty() {
                Some(None)
            } else {
                None
            }
        };

        let mut events = Vec::new();
        if let Some(timeout) = timeout {
            let mut inner = self.inner.borrow_mut();
            inner.poller.poll(timeout, &mut events)?;
        }

        self.dispatch_timers()?;
        self.dispatch_io(&events)?;
        self.dispatch_signals(&events)?;
        Ok(())
    }

    /// Move watchers enabled since the last tick into their dispatch
    /// structures.
    fn activate_pending(&self) -> Result<()> {
        let pending = std::mem::take(&mut self.inner.borrow_mut().pending_activation);
        for id in pending {
            let mut inner = self.inner.borrow_mut();
            let staged = {
                let Some(w) = inner.watchers.get_mut(&id.0) else {
                    continue;
                };
                w.pending = false;
                if !w.enabled || w.active {
                    continue;
                }
                w.active = true;
                (w.kind, w.interval_ms, w.fd, w.signo)
            };
            let (kind, interval_ms, fd, signo) = staged;
            match kind {
                WatcherKind::Defer => inner.defer_queue.push_back(id),
                WatcherKind::Delay | WatcherKind::Repeat => {
                    let deadline = inner.poller.now() + interval_ms;
                    if let Some(w) = inner.watchers.get_mut(&id.0) {
                        w.deadline = deadline;
                    }
                    inner.timers.insert((deadline, id.0), id);
                }
                WatcherKind::OnReadable | WatcherKind::OnWritable => {
                    let Some(fd) = fd else { continue };
                    let newly_watched = !inner.io_watchers.contains_key(&fd);
                    inner.io_watchers.entry(fd).or_default().push(id);
                    if newly_watched {
                        inner.poller.register(fd, Interest::default())?;
                    }
                    inner.refresh_interest(fd)?;
                }
                WatcherKind::OnSignal => {
                    let Some(signo) = signo else { continue };
                    let newly_watched = !inner.signal_watchers.contains_key(&signo);
                    inner.signal_watchers.entry(signo).or_default().push(id);
                    if newly_watched {
                        inner.poller.watch_signal(signo)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn dispatch_defers(&self) -> Result<()> {
        let batch: Vec<WatcherId> = {
            let mut inner = self.inner.borrow_mut();
            inner.defer_queue.drain(..).collect()
        };
        for id in batch {
            self.invoke(id)?;
        }
        Ok(())
    }

    fn dispatch_timers(&self) -> Result<()> {
        // Snapshot the due set once; repeats rescheduled during this sweep
        // wait for the next tick even when their new deadline has passed.
        let due: Vec<(u64, WatcherId)> = {
            let inner = self.inner.borrow();
            let now = inner.poller.now();
            inner
                .timers
                .range(..=(now, u64::MAX))
                .map(|(&(deadline, _), &id)| (deadline, id))
                .collect()
        };
        for (deadline, id) in due {
            let still_linked = self
                .inner
                .borrow_mut()
                .timers
                .remove(&(deadline, id.0))
                .is_some();
            if !still_linked {
                continue;
            }
            self.invoke(id)?;

            let mut inner = self.inner.borrow_mut();
            let reschedule = match inner.watchers.get(&id.0) {
                Some(w) if w.kind == WatcherKind::Repeat && w.enabled && w.active => {
                    Some(w.interval_ms)
                }
                _ => None,
            };
            if let Some(interval_ms) = reschedule {
                let next_deadline = inner.poller.now() + interval_ms;
                if let Some(w) = inner.watchers.get_mut(&id.0) {
                    w.deadline = next_deadline;
                }
                inner.timers.insert((next_deadline, id.0), id);
            }
        }
        Ok(())
    }

    fn dispatch_io(&self, events: &[PollEvent]) -> Result<()> {
        for event in events {
            let PollEvent::Io {
                fd,
                readable,
                writable,
            } = event
            else {
                continue;
            };
            let ids: Vec<WatcherId> = self
                .inner
                .borrow()
                .io_watchers
                .get(fd)
                .cloned()
                .unwrap_or_default();
            for id in ids {
                let fire = match self.inner.borrow().watchers.get(&id.0).map(|w| w.kind) {
                    Some(WatcherKind::OnReadable) => *readable,
                    Some(WatcherKind::OnWritable) => *writable,
                    _ => false,
                };
                if fire {
                    self.invoke(id)?;
                }
            }
        }
        Ok(())
    }

    fn dispatch_signals(&self, events: &[PollEvent]) -> Result<()> {
        for event in events {
            let PollEvent::Signal(signo) = event else {
                continue;
            };
            let ids: Vec<WatcherId> = self
                .inner
                .borrow()
                .signal_watchers
                .get(signo)
                .cloned()
                .unwrap_or_default();
            for id in ids {
                self.invoke(id)?;
            }
        }
        Ok(())
    }

    // -- Dispatch ----------------------------------------------------------

    /// Fire one watcher. One-shot watchers are unregistered (their id
    /// invalidated) before the callback runs; multi-shot callbacks are taken
    /// out of the registry for the duration of the call so they can re-enter
    /// the driver.
    fn invoke(&self, id: WatcherId) -> Result<()> {
        let taken = {
            let mut inner = self.inner.borrow_mut();
            let Some(w) = inner.watchers.get(&id.0) else {
                return Ok(());
            };
            if !w.enabled || !w.active {
                return Ok(());
            }
            let kind = w.kind;
            if kind.is_one_shot() {
                match inner.watchers.remove(&id.0) {
                    Some(w) => (w.callback, w.data, kind, w.fd, w.signo),
                    None => return Ok(()),
                }
            } else {
                let Some(w) = inner.watchers.get_mut(&id.0) else {
                    return Ok(());
                };
                (w.callback.take(), w.data.clone(), kind, w.fd, w.signo)
            }
        };
        let (callback, data, kind, fd, signo) = taken;
        let Some(mut callback) = callback else {
            return Ok(());
        };

        let result = match &mut callback {
            Callback::Plain(f) => f(id, data),
            Callback::Io(f) => match fd {
                Some(fd) => f(id, fd, data),
                None => Ok(()),
            },
            Callback::Signal(f) => match signo {
                Some(signo) => f(id, signo, data),
                None => Ok(()),
            },
        };

        if !kind.is_one_shot() {
            let mut inner = self.inner.borrow_mut();
            if let Some(w) = inner.watchers.get_mut(&id.0) {
                w.callback = Some(callback);
            }
        }

        match result {
            Ok(()) => Ok(()),
            Err(error) => self.funnel(error),
        }
    }

    /// Route a callback error through the installed handler; without one (or
    /// when the handler itself fails) the error terminates the run.
    fn funnel(&self, error: Error) -> Result<()> {
        let handler = self.inner.borrow_mut().error_handler.take();
        match handler {
            Some(mut handler) => {
                let result = handler(&error);
                let mut inner = self.inner.borrow_mut();
                if inner.error_handler.is_none() {
                    inner.error_handler = Some(handler);
                }
                result
            }
            None => Err(error),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
