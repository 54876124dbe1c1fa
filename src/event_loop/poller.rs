//! Poller contract and in-tree implementations
//!
//! The driver does not talk to epoll/kqueue/IOCP directly; it blocks in a
//! [`Poller`], which supplies a monotonic millisecond clock, fd interest
//! registration, signal watching, and a blocking poll call. Any adapter
//! honouring this contract can drive the loop.
//!
//! Two implementations ship in-tree:
//!
//! - [`SleepPoller`] — the portable default. Timers and defers are fully
//!   functional; fd and signal registration report unsupported-feature.
//! - [`VirtualPoller`] — a deterministic poller for tests and simulations:
//!   the clock is virtual and readiness/signals are scripted by the caller.

use crate::error::{Error, Result};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

/// Readiness interest for a watched fd.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Interest {
    pub readable: bool,
    pub writable: bool,
}

impl Interest {
    /// No interest in either direction.
    pub fn is_empty(&self) -> bool {
        !self.readable && !self.writable
    }
}

/// One event reported by a poll call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvent {
    /// An fd became ready in at least one watched direction
    Io {
        fd: RawFd,
        readable: bool,
        writable: bool,
    },
    /// A watched signal was delivered
    Signal(i32),
}

/// The multiplexer contract the driver blocks in.
pub trait Poller {
    /// Monotonic clock in integer milliseconds.
    fn now(&self) -> u64;

    /// Whether fd readiness watching is available.
    fn supports_io(&self) -> bool;

    /// Whether signal watching is available.
    fn supports_signals(&self) -> bool;

    /// Start watching an fd with the given interest.
    fn register(&mut self, fd: RawFd, interest: Interest) -> Result<()>;

    /// Replace the interest set of an already-watched fd.
    fn update(&mut self, fd: RawFd, interest: Interest) -> Result<()>;

    /// Stop watching an fd.
    fn deregister(&mut self, fd: RawFd) -> Result<()>;

    /// Start watching a signal number.
    fn watch_signal(&mut self, signo: i32) -> Result<()>;

    /// Stop watching a signal number.
    fn unwatch_signal(&mut self, signo: i32) -> Result<()>;

    /// Block up to `timeout` milliseconds (indefinitely when `None`) and
    /// append any readiness events to `events`.
    fn poll(&mut self, timeout: Option<u64>, events: &mut Vec<PollEvent>) -> Result<()>;
}

// ---------------------------------------------------------------------------
// SleepPoller
// ---------------------------------------------------------------------------

/// Portable fallback poller.
///
/// Blocks with `thread::sleep` up to the requested timeout and never reports
/// readiness. Suitable for timer- and defer-only programs on any platform;
/// fd and signal registration fail with unsupported-feature.
#[derive(Debug)]
pub struct SleepPoller {
    started: Instant,
}

impl SleepPoller {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for SleepPoller {
    fn default() -> Self {
        Self::new()
    }
}

impl Poller for SleepPoller {
    fn now(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn supports_io(&self) -> bool {
        false
    }

    fn supports_signals(&self) -> bool {
        false
    }

    fn register(&mut self, _fd: RawFd, _interest: Interest) -> Result<()> {
        Err(Error::unsupported("fd watching requires an I/O-capable poller"))
    }

    fn update(&mut self, _fd: RawFd, _interest: Interest) -> Result<()> {
        Err(Error::unsupported("fd watching requires an I/O-capable poller"))
    }

    fn deregister(&mut self, _fd: RawFd) -> Result<()> {
        Err(Error::unsupported("fd watching requires an I/O-capable poller"))
    }

    fn watch_signal(&mut self, _signo: i32) -> Result<()> {
        Err(Error::unsupported(
            "signal watching requires a signal-capable poller",
        ))
    }

    fn unwatch_signal(&mut self, _signo: i32) -> Result<()> {
        Err(Error::unsupported(
            "signal watching requires a signal-capable poller",
        ))
    }

    fn poll(&mut self, timeout: Option<u64>, _events: &mut Vec<PollEvent>) -> Result<()> {
        match timeout {
            Some(ms) => {
                if ms > 0 {
                    std::thread::sleep(Duration::from_millis(ms));
                }
                Ok(())
            }
            // Nothing can ever wake this poller, so an indefinite block
            // would hang the thread.
            None => Err(Error::unsupported(
                "sleep poller cannot block indefinitely",
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// VirtualPoller
// ---------------------------------------------------------------------------

struct VirtualInner {
    now: u64,
    interests: FxHashMap<RawFd, Interest>,
    readable: FxHashMap<RawFd, bool>,
    writable: FxHashMap<RawFd, bool>,
    watched_signals: FxHashMap<i32, bool>,
    pending_signals: VecDeque<i32>,
}

/// Deterministic poller with a virtual clock and scripted readiness.
///
/// Cloning yields another handle to the same poller, so a test can keep a
/// handle after moving the poller into a driver and continue to advance
/// time, flip fd readiness, and raise signals.
#[derive(Clone)]
pub struct VirtualPoller {
    inner: Rc<RefCell<VirtualInner>>,
}

impl VirtualPoller {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(VirtualInner {
                now: 0,
                interests: FxHashMap::default(),
                readable: FxHashMap::default(),
                writable: FxHashMap::default(),
                watched_signals: FxHashMap::default(),
                pending_signals: VecDeque::new(),
            })),
        }
    }

    /// Advance the virtual clock by `ms` milliseconds.
    pub fn advance(&self, ms: u64) {
        self.inner.borrow_mut().now += ms;
    }

    /// Mark an fd readable or not; readiness is level-triggered and sticky
    /// until cleared.
    pub fn set_readable(&self, fd: RawFd, ready: bool) {
        self.inner.borrow_mut().readable.insert(fd, ready);
    }

    /// Mark an fd writable or not.
    pub fn set_writable(&self, fd: RawFd, ready: bool) {
        self.inner.borrow_mut().writable.insert(fd, ready);
    }

    /// Queue a signal delivery; reported by the next poll if the signal is
    /// watched.
    pub fn raise_signal(&self, signo: i32) {
        self.inner.borrow_mut().pending_signals.push_back(signo);
    }

    fn ready_events(inner: &mut VirtualInner, events: &mut Vec<PollEvent>) {
        for (&fd, interest) in &inner.interests {
            let readable = interest.readable && inner.readable.get(&fd).copied().unwrap_or(false);
            let writable = interest.writable && inner.writable.get(&fd).copied().unwrap_or(false);
            if readable || writable {
                events.push(PollEvent::Io {
                    fd,
                    readable,
                    writable,
                });
            }
        }
        let mut unwatched = VecDeque::new();
        while let Some(signo) = inner.pending_signals.pop_front() {
            if inner.watched_signals.get(&signo).copied().unwrap_or(false) {
                events.push(PollEvent::Signal(signo));
            } else {
                unwatched.push_back(signo);
            }
        }
        // Signals nobody watches yet stay queued for a later tick.
        inner.pending_signals = unwatched;
    }
}

impl Default for VirtualPoller {
    fn default() -> Self {
        Self::new()
    }
}

impl Poller for VirtualPoller {
    fn now(&self) -> u64 {
        self.inner.borrow().now
    }

    fn supports_io(&self) -> bool {
        true
    }

    fn supports_signals(&self) -> bool {
        true
    }

    fn register(&mut self, fd: RawFd, interest: Interest) -> Result<()> {
        self.inner.borrow_mut().interests.insert(fd, interest);
        Ok(())
    }

    fn update(&mut self, fd: RawFd, interest: Interest) -> Result<()> {
        self.inner.borrow_mut().interests.insert(fd, interest);
        Ok(())
    }

    fn deregister(&mut self, fd: RawFd) -> Result<()> {
        self.inner.borrow_mut().interests.remove(&fd);
        Ok(())
    }

    fn watch_signal(&mut self, signo: i32) -> Result<()> {
        self.inner.borrow_mut().watched_signals.insert(signo, true);
        Ok(())
    }

    fn unwatch_signal(&mut self, signo: i32) -> Result<()> {
        self.inner.borrow_mut().watched_signals.remove(&signo);
        Ok(())
    }

    fn poll(&mut self, timeout: Option<u64>, events: &mut Vec<PollEvent>) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        let before = events.len();
        Self::ready_events(&mut inner, events);
        if events.len() > before {
            return Ok(());
        }
        match timeout {
            Some(ms) => {
                // Nothing ready: jump the clock to the requested deadline.
                inner.now += ms;
                Self::ready_events(&mut inner, events);
                Ok(())
            }
            None => Err(Error::failure(
                "virtual poller would block forever: no readiness scripted and no timer pending",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sleep_poller_clock_is_monotonic() {
        let poller = SleepPoller::new();
        let a = poller.now();
        let b = poller.now();
        assert!(b >= a);
    }

    #[test]
    fn test_sleep_poller_rejects_io_and_signals() {
        let mut poller = SleepPoller::new();
        assert!(!poller.supports_io());
        assert!(!poller.supports_signals());
        assert!(matches!(
            poller.register(3, Interest { readable: true, writable: false }),
            Err(Error::UnsupportedFeature(_))
        ));
        assert!(matches!(
            poller.watch_signal(2),
            Err(Error::UnsupportedFeature(_))
        ));
    }

    #[test]
    fn test_sleep_poller_rejects_indefinite_block() {
        let mut poller = SleepPoller::new();
        let mut events = Vec::new();
        assert!(poller.poll(None, &mut events).is_err());
    }

    #[test]
    fn test_virtual_clock_advances_on_timeout() {
        let mut poller = VirtualPoller::new();
        let mut events = Vec::new();
        poller.poll(Some(25), &mut events).unwrap();
        assert_eq!(poller.now(), 25);
        assert!(events.is_empty());
    }

    #[test]
    fn test_virtual_readiness_reported_per_interest() {
        let mut poller = VirtualPoller::new();
        poller
            .register(5, Interest { readable: true, writable: false })
            .unwrap();
        poller.set_readable(5, true);
        poller.set_writable(5, true);

        let mut events = Vec::new();
        poller.poll(Some(10), &mut events).unwrap();
        assert_eq!(
            events,
            vec![PollEvent::Io {
                fd: 5,
                readable: true,
                // writable readiness is masked by the registered interest
                writable: false,
            }]
        );
        // Readiness did not consume the timeout.
        assert_eq!(poller.now(), 0);
    }

    #[test]
    fn test_virtual_signal_queueing() {
        let mut poller = VirtualPoller::new();
        poller.raise_signal(10);

        // Unwatched signals stay queued.
        let mut events = Vec::new();
        poller.poll(Some(1), &mut events).unwrap();
        assert!(events.is_empty());

        poller.watch_signal(10).unwrap();
        let mut events = Vec::new();
        poller.poll(Some(1), &mut events).unwrap();
        assert_eq!(events, vec![PollEvent::Signal(10)]);
    }

    #[test]
    fn test_virtual_handles_share_state() {
        let poller = VirtualPoller::new();
        let handle = poller.clone();
        handle.advance(40);
        assert_eq!(poller.now(), 40);
    }

    #[test]
    fn test_virtual_indefinite_block_is_an_error() {
        let mut poller = VirtualPoller::new();
        let mut events = Vec::new();
        assert!(poller.poll(None, &mut events).is_err());
    }

    #[test]
    fn test_deregistered_fd_reports_nothing() {
        let mut poller = VirtualPoller::new();
        poller
            .register(7, Interest { readable: true, writable: true })
            .unwrap();
        poller.set_readable(7, true);
        poller.deregister(7).unwrap();

        let mut events = Vec::new();
        poller.poll(Some(1), &mut events).unwrap();
        assert!(events.is_empty());
    }
}
