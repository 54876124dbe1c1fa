//! Thread-local access to the current event loop driver
//!
//! The accessor is the crate's primary import surface: free functions that
//! forward to the driver currently installed for this thread. A default
//! driver (backed by the portable sleep poller) is installed lazily on first
//! touch, so casual callers need no setup; tests install their own driver
//! with [`set`] before each case.

use super::watcher::{LoopInfo, WatcherData, WatcherId};
use super::{ErrorHandler, EventLoop};
use crate::error::{Error, Result};
use std::any::Any;
use std::cell::RefCell;
use std::os::fd::RawFd;
use std::rc::Rc;

thread_local! {
    static CURRENT: RefCell<Option<EventLoop>> = RefCell::new(Some(EventLoop::new()));
}

/// Install a driver for this thread (or clear it with `None`), returning the
/// previously installed driver.
///
/// After `set(None)` every passthrough fails with no-driver until a new
/// driver is installed.
pub fn set(driver: Option<EventLoop>) -> Option<EventLoop> {
    CURRENT.with(|cell| std::mem::replace(&mut *cell.borrow_mut(), driver))
}

/// The driver currently installed for this thread.
pub fn get() -> Result<EventLoop> {
    CURRENT
        .with(|cell| cell.borrow().clone())
        .ok_or(Error::NoDriver)
}

/// Run the current driver; see [`EventLoop::run`].
pub fn run() -> Result<()> {
    get()?.run()
}

/// Stop the current driver after its current tick.
pub fn stop() -> Result<()> {
    get().map(|driver| driver.stop())
}

/// Register a deferred callback on the current driver.
pub fn defer<F>(callback: F) -> Result<WatcherId>
where
    F: FnMut(WatcherId, WatcherData) -> Result<()> + 'static,
{
    Ok(get()?.defer(callback))
}

/// Register a deferred callback with a caller datum.
pub fn defer_with<F>(data: Rc<dyn Any>, callback: F) -> Result<WatcherId>
where
    F: FnMut(WatcherId, WatcherData) -> Result<()> + 'static,
{
    Ok(get()?.defer_with(data, callback))
}

/// Register a one-shot timer on the current driver.
pub fn delay<F>(ms: u64, callback: F) -> Result<WatcherId>
where
    F: FnMut(WatcherId, WatcherData) -> Result<()> + 'static,
{
    Ok(get()?.delay(ms, callback))
}

/// Register a one-shot timer with a caller datum.
pub fn delay_with<F>(ms: u64, data: Rc<dyn Any>, callback: F) -> Result<WatcherId>
where
    F: FnMut(WatcherId, WatcherData) -> Result<()> + 'static,
{
    Ok(get()?.delay_with(ms, data, callback))
}

/// Register a repeating timer on the current driver.
pub fn repeat<F>(interval_ms: u64, callback: F) -> Result<WatcherId>
where
    F: FnMut(WatcherId, WatcherData) -> Result<()> + 'static,
{
    Ok(get()?.repeat(interval_ms, callback))
}

/// Register a repeating timer with a caller datum.
pub fn repeat_with<F>(interval_ms: u64, data: Rc<dyn Any>, callback: F) -> Result<WatcherId>
where
    F: FnMut(WatcherId, WatcherData) -> Result<()> + 'static,
{
    Ok(get()?.repeat_with(interval_ms, data, callback))
}

/// Watch an fd for readability on the current driver.
pub fn on_readable<F>(fd: RawFd, callback: F) -> Result<WatcherId>
where
    F: FnMut(WatcherId, RawFd, WatcherData) -> Result<()> + 'static,
{
    get()?.on_readable(fd, callback)
}

/// Watch an fd for writability on the current driver.
pub fn on_writable<F>(fd: RawFd, callback: F) -> Result<WatcherId>
where
    F: FnMut(WatcherId, RawFd, WatcherData) -> Result<()> + 'static,
{
    get()?.on_writable(fd, callback)
}

/// Watch a signal number on the current driver.
pub fn on_signal<F>(signo: i32, callback: F) -> Result<WatcherId>
where
    F: FnMut(WatcherId, i32, WatcherData) -> Result<()> + 'static,
{
    get()?.on_signal(signo, callback)
}

/// Re-enable a disabled watcher.
pub fn enable(id: WatcherId) -> Result<()> {
    get()?.enable(id)
}

/// Disable a watcher, effective immediately.
pub fn disable(id: WatcherId) -> Result<()> {
    get().map(|driver| driver.disable(id))
}

/// Cancel a watcher and invalidate its id.
pub fn cancel(id: WatcherId) -> Result<()> {
    get().map(|driver| driver.cancel(id))
}

/// Mark a watcher as keeping the loop alive.
pub fn reference(id: WatcherId) -> Result<()> {
    get()?.reference(id)
}

/// Mark a watcher as not extending the loop's lifetime.
pub fn unreference(id: WatcherId) -> Result<()> {
    get()?.unreference(id)
}

/// Install the callback error sink, returning the previous handler.
pub fn set_error_handler(handler: Option<ErrorHandler>) -> Result<Option<ErrorHandler>> {
    Ok(get()?.set_error_handler(handler))
}

/// Store a loop-bound value under a key.
pub fn set_state(key: impl Into<String>, value: Rc<dyn Any>) -> Result<()> {
    get().map(|driver| driver.set_state(key, value))
}

/// Fetch a loop-bound value by key.
pub fn get_state(key: &str) -> Result<Option<Rc<dyn Any>>> {
    Ok(get()?.get_state(key))
}

/// Snapshot the current driver's watcher counts.
pub fn info() -> Result<LoopInfo> {
    Ok(get()?.info())
}

#[cfg(test)]
mod tests {
    use super::super::poller::VirtualPoller;
    use super::*;

    #[test]
    fn test_default_driver_is_installed_lazily() {
        // First touch on this thread installs the sleep-poller driver.
        let driver = get().unwrap();
        let id = driver.defer(|_, _| Ok(()));
        driver.cancel(id);
    }

    #[test]
    fn test_set_none_clears_the_driver() {
        let previous = set(None);
        assert!(matches!(get(), Err(Error::NoDriver)));
        assert!(matches!(defer(|_, _| Ok(())), Err(Error::NoDriver)));
        assert!(matches!(info(), Err(Error::NoDriver)));
        set(previous);
    }

    #[test]
    fn test_set_returns_previous_driver() {
        let replacement = EventLoop::with_poller(Box::new(VirtualPoller::new()));
        let previous = set(Some(replacement.clone()));
        assert!(previous.is_some());
        let id = defer(|_, _| Ok(())).unwrap();
        // The id resolves against the replacement driver, not the default.
        replacement.disable(id);
        replacement.enable(id).unwrap();
        replacement.cancel(id);
        set(previous);
    }

    #[test]
    fn test_passthroughs_reach_the_installed_driver() {
        let poller = VirtualPoller::new();
        let driver = EventLoop::with_poller(Box::new(poller));
        let previous = set(Some(driver.clone()));

        let fired = std::rc::Rc::new(std::cell::RefCell::new(false));
        let f = std::rc::Rc::clone(&fired);
        defer(move |_, _| {
            *f.borrow_mut() = true;
            Ok(())
        })
        .unwrap();
        run().unwrap();
        assert!(*fired.borrow());

        set(previous);
    }
}
