//! Watcher identity and bookkeeping
//!
//! A watcher is a registered interest in an event source: a deferred
//! callback, a one-shot or repeating timer, stream readability or
//! writability, or a signal. The driver hands out opaque [`WatcherId`]
//! tokens and keeps the per-watcher record here.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::os::fd::RawFd;
use std::rc::Rc;

/// Unique identifier for a watcher within a driver.
///
/// Ids are allocated from a monotonic counter and are never reused; once a
/// watcher is cancelled (or a one-shot watcher has fired) its id is
/// permanently invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatcherId(pub(crate) u64);

impl fmt::Display for WatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "watcher-{}", self.0)
    }
}

/// The kind of event a watcher is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatcherKind {
    /// Callback dispatched at the start of the next tick
    Defer,
    /// One-shot timer
    Delay,
    /// Repeating timer
    Repeat,
    /// Stream readability
    OnReadable,
    /// Stream writability
    OnWritable,
    /// Signal delivery
    OnSignal,
}

impl WatcherKind {
    /// Returns `true` for watcher kinds that are invalidated by firing once.
    pub fn is_one_shot(&self) -> bool {
        matches!(self, WatcherKind::Defer | WatcherKind::Delay)
    }
}

impl fmt::Display for WatcherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatcherKind::Defer => write!(f, "defer"),
            WatcherKind::Delay => write!(f, "delay"),
            WatcherKind::Repeat => write!(f, "repeat"),
            WatcherKind::OnReadable => write!(f, "on_readable"),
            WatcherKind::OnWritable => write!(f, "on_writable"),
            WatcherKind::OnSignal => write!(f, "on_signal"),
        }
    }
}

/// Caller-supplied datum handed back to the callback on every invocation.
pub type WatcherData = Option<Rc<dyn Any>>;

/// The callback stored for a watcher.
///
/// Every callback receives the watcher id first and the caller datum last;
/// I/O callbacks additionally receive the stream fd, signal callbacks the
/// signal number.
pub(crate) enum Callback {
    Plain(Box<dyn FnMut(WatcherId, WatcherData) -> Result<()>>),
    Io(Box<dyn FnMut(WatcherId, RawFd, WatcherData) -> Result<()>>),
    Signal(Box<dyn FnMut(WatcherId, i32, WatcherData) -> Result<()>>),
}

/// Per-watcher record held by the driver registry.
pub(crate) struct Watcher {
    pub id: WatcherId,
    pub kind: WatcherKind,
    /// Disabled watchers stay registered but never dispatch.
    pub enabled: bool,
    /// Referenced watchers keep `run` alive; watchers start referenced.
    pub referenced: bool,
    /// Queued for activation at the start of the next tick.
    pub pending: bool,
    /// Present in the active dispatch structure for its kind.
    pub active: bool,
    /// Timer interval in milliseconds (`Delay` / `Repeat`).
    pub interval_ms: u64,
    /// Current deadline for an active timer, used to unlink it on disable.
    pub deadline: u64,
    /// Watched stream fd (`OnReadable` / `OnWritable`).
    pub fd: Option<RawFd>,
    /// Watched signal number (`OnSignal`).
    pub signo: Option<i32>,
    /// Caller-supplied datum, cloned into every invocation.
    pub data: WatcherData,
    /// Taken out of the record while the callback runs so the callback can
    /// re-enter the driver.
    pub callback: Option<Callback>,
}

impl Watcher {
    pub(crate) fn new(id: WatcherId, kind: WatcherKind, data: WatcherData, callback: Callback) -> Self {
        Self {
            id,
            kind,
            enabled: true,
            referenced: true,
            pending: true,
            active: false,
            interval_ms: 0,
            deadline: 0,
            fd: None,
            signo: None,
            data,
            callback: Some(callback),
        }
    }
}

/// Enabled/disabled counts for one watcher kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindCounts {
    /// Watchers of this kind that are currently enabled
    pub enabled: usize,
    /// Watchers of this kind that are registered but disabled
    pub disabled: usize,
}

/// Referenced/unreferenced counts over the currently-enabled watcher set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceCounts {
    /// Enabled watchers that keep the loop alive
    pub referenced: usize,
    /// Enabled watchers that do not extend the loop's lifetime
    pub unreferenced: usize,
}

/// Snapshot of driver state for diagnostics.
///
/// The shape is stable: per-kind enabled/disabled counts, referenced counts
/// over the enabled set, and whether the driver is inside `run`. Counts
/// reflect the moment of the call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopInfo {
    pub defer: KindCounts,
    pub delay: KindCounts,
    pub repeat: KindCounts,
    pub on_readable: KindCounts,
    pub on_writable: KindCounts,
    pub on_signal: KindCounts,
    pub enabled_watchers: ReferenceCounts,
    pub running: bool,
}

impl LoopInfo {
    /// Mutable access to the counts for one kind.
    pub(crate) fn counts_mut(&mut self, kind: WatcherKind) -> &mut KindCounts {
        match kind {
            WatcherKind::Defer => &mut self.defer,
            WatcherKind::Delay => &mut self.delay,
            WatcherKind::Repeat => &mut self.repeat,
            WatcherKind::OnReadable => &mut self.on_readable,
            WatcherKind::OnWritable => &mut self.on_writable,
            WatcherKind::OnSignal => &mut self.on_signal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watcher_id_display() {
        assert_eq!(format!("{}", WatcherId(7)), "watcher-7");
    }

    #[test]
    fn test_one_shot_kinds() {
        assert!(WatcherKind::Defer.is_one_shot());
        assert!(WatcherKind::Delay.is_one_shot());
        assert!(!WatcherKind::Repeat.is_one_shot());
        assert!(!WatcherKind::OnReadable.is_one_shot());
        assert!(!WatcherKind::OnWritable.is_one_shot());
        assert!(!WatcherKind::OnSignal.is_one_shot());
    }

    #[test]
    fn test_kind_display_matches_info_keys() {
        assert_eq!(WatcherKind::OnReadable.to_string(), "on_readable");
        assert_eq!(WatcherKind::OnSignal.to_string(), "on_signal");
        assert_eq!(WatcherKind::Defer.to_string(), "defer");
    }

    #[test]
    fn test_new_watcher_defaults() {
        let w = Watcher::new(
            WatcherId(1),
            WatcherKind::Defer,
            None,
            Callback::Plain(Box::new(|_, _| Ok(()))),
        );
        assert!(w.enabled);
        assert!(w.referenced);
        assert!(w.pending);
        assert!(!w.active);
    }

    #[test]
    fn test_info_counts_mut_routing() {
        let mut info = LoopInfo::default();
        info.counts_mut(WatcherKind::Repeat).enabled = 3;
        assert_eq!(info.repeat.enabled, 3);
        assert_eq!(info.delay.enabled, 0);
    }
}
