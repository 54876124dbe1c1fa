//! Shared test helpers for integration tests

use tempo::{accessor, EventLoop, VirtualPoller};

/// Install a fresh virtual-time driver for the current thread and return it
/// together with a handle to its poller.
pub fn install_virtual_driver() -> (EventLoop, VirtualPoller) {
    let poller = VirtualPoller::new();
    let driver = EventLoop::with_poller(Box::new(poller.clone()));
    accessor::set(Some(driver.clone()));
    (driver, poller)
}
