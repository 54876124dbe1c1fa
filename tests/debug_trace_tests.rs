//! Double-completion diagnostics behind the debug environment toggle.
//!
//! The toggle is read once per process, so this binary holds the single test
//! that needs it enabled.

mod common;
use common::install_virtual_driver;

use std::cell::RefCell;
use std::rc::Rc;
use tempo::{Deferred, Error, Producer};

#[test]
fn test_double_complete_reports_the_first_completion_site() {
    std::env::set_var("TEMPO_DEBUG", "1");
    let (_driver, _) = install_virtual_driver();

    let emitter_slot = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&emitter_slot);
    let _producer: Producer<i32> = Producer::new(move |emit| {
        *slot.borrow_mut() = Some(emit);
        Deferred::new().promise()
    })
    .unwrap();
    let emitter = emitter_slot.borrow().clone().unwrap();

    emitter.complete().unwrap();

    match emitter.complete() {
        Err(Error::AlreadyComplete {
            first_completion: Some(trace),
        }) => assert!(!trace.is_empty()),
        other => panic!("expected a traced already-complete error, got {:?}", other),
    }

    // Emitting after completion carries the same context.
    match emitter.emit(1) {
        Err(error @ Error::AlreadyComplete {
            first_completion: Some(_),
        }) => {
            let message = error.to_string();
            assert!(message.contains("first completed at:"));
        }
        other => panic!("expected a traced already-complete error, got {:?}", other),
    }
}
