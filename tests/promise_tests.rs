//! Integration tests for the promise primitive: settlement semantics,
//! continuation ordering, and adoption.

mod common;
use common::install_virtual_driver;

use std::cell::RefCell;
use std::rc::Rc;
use tempo::{Deferred, Error, Promise, PromiseStatus};

fn shared_log() -> Rc<RefCell<Vec<String>>> {
    Rc::new(RefCell::new(Vec::new()))
}

mod settlement {
    use super::*;

    #[test]
    fn test_handler_never_runs_synchronously() {
        let (driver, _) = install_virtual_driver();
        let fired = Rc::new(RefCell::new(false));

        let promise = Promise::fulfilled(1);
        let f = Rc::clone(&fired);
        promise
            .when(move |_| {
                *f.borrow_mut() = true;
                Ok(())
            })
            .unwrap();
        assert!(!*fired.borrow());

        driver.run().unwrap();
        assert!(*fired.borrow());
    }

    #[test]
    fn test_resolution_does_not_run_handlers_synchronously() {
        let (driver, _) = install_virtual_driver();
        let fired = Rc::new(RefCell::new(false));

        let deferred = Deferred::new();
        let f = Rc::clone(&fired);
        deferred
            .promise()
            .when(move |_| {
                *f.borrow_mut() = true;
                Ok(())
            })
            .unwrap();

        deferred.resolve(3).unwrap();
        assert!(!*fired.borrow());
        driver.run().unwrap();
        assert!(*fired.borrow());
    }

    #[test]
    fn test_handlers_fire_in_registration_order_across_both_paths() {
        let (driver, _) = install_virtual_driver();
        let log = shared_log();

        let deferred = Deferred::new();
        let promise = deferred.promise();
        // Two handlers registered while pending.
        for tag in ["pending-1", "pending-2"] {
            let l = Rc::clone(&log);
            promise
                .when(move |_| {
                    l.borrow_mut().push(tag.to_string());
                    Ok(())
                })
                .unwrap();
        }
        deferred.resolve(0).unwrap();
        // One more registered after settlement.
        let l = Rc::clone(&log);
        promise
            .when(move |_| {
                l.borrow_mut().push("settled-3".to_string());
                Ok(())
            })
            .unwrap();

        driver.run().unwrap();
        assert_eq!(
            *log.borrow(),
            vec![
                "pending-1".to_string(),
                "pending-2".to_string(),
                "settled-3".to_string()
            ]
        );
    }

    #[test]
    fn test_fulfilment_and_failure_are_discriminated() {
        let (driver, _) = install_virtual_driver();
        let outcomes = shared_log();

        let ok: Promise<Option<u32>> = Promise::fulfilled(None);
        let o = Rc::clone(&outcomes);
        ok.when(move |result| {
            // Fulfilment with an empty value is still fulfilment.
            assert_eq!(result.unwrap(), None);
            o.borrow_mut().push("fulfilled".to_string());
            Ok(())
        })
        .unwrap();

        let bad: Promise<Option<u32>> = Promise::failed(Error::failure("broken"));
        let o = Rc::clone(&outcomes);
        bad.when(move |result| {
            o.borrow_mut().push(result.unwrap_err().to_string());
            Ok(())
        })
        .unwrap();

        driver.run().unwrap();
        assert_eq!(
            *outcomes.borrow(),
            vec!["fulfilled".to_string(), "broken".to_string()]
        );
    }
}

mod deferred {
    use super::*;

    #[test]
    fn test_second_settlement_fails() {
        let (_driver, _) = install_virtual_driver();
        let deferred = Deferred::new();
        deferred.resolve(1).unwrap();
        assert!(matches!(deferred.resolve(1), Err(Error::AlreadySettled)));
        assert!(matches!(
            deferred.fail(Error::failure("late")),
            Err(Error::AlreadySettled)
        ));
    }

    #[test]
    fn test_dropping_a_deferred_leaves_its_promise_pending() {
        let (driver, _) = install_virtual_driver();
        let fired = Rc::new(RefCell::new(false));

        let promise = {
            let deferred: Deferred<u8> = Deferred::new();
            deferred.promise()
        };
        let f = Rc::clone(&fired);
        promise
            .when(move |_| {
                *f.borrow_mut() = true;
                Ok(())
            })
            .unwrap();

        driver.run().unwrap();
        assert_eq!(promise.status(), PromiseStatus::Pending);
        assert!(!*fired.borrow());
    }
}

mod adoption {
    use super::*;

    #[test]
    fn test_adoption_settles_with_the_source_on_a_later_tick() {
        let (driver, _) = install_virtual_driver();
        let log = shared_log();

        let outer = Deferred::new();
        let inner = Deferred::new();
        outer.resolve_from(inner.promise()).unwrap();

        let l = Rc::clone(&log);
        outer
            .promise()
            .when(move |result| {
                l.borrow_mut().push(format!("outer={}", result.unwrap()));
                Ok(())
            })
            .unwrap();

        let l = Rc::clone(&log);
        driver.defer(move |_, _| {
            l.borrow_mut().push("inner-resolved".to_string());
            inner.resolve(11)
        });

        driver.run().unwrap();
        assert_eq!(
            *log.borrow(),
            vec!["inner-resolved".to_string(), "outer=11".to_string()]
        );
    }

    #[test]
    fn test_adoption_chain_stays_flat() {
        let (driver, _) = install_virtual_driver();
        let observed = Rc::new(RefCell::new(None));

        // a adopts b, b adopts c; settling c settles the whole chain.
        let a = Deferred::new();
        let b = Deferred::new();
        let c = Deferred::new();
        b.resolve_from(c.promise()).unwrap();
        a.resolve_from(b.promise()).unwrap();

        let o = Rc::clone(&observed);
        a.promise()
            .when(move |result| {
                *o.borrow_mut() = Some(result.unwrap());
                Ok(())
            })
            .unwrap();

        c.resolve(99).unwrap();
        driver.run().unwrap();
        assert_eq!(*observed.borrow(), Some(99));
    }

    #[test]
    fn test_adoption_of_a_failed_source() {
        let (driver, _) = install_virtual_driver();
        let observed = Rc::new(RefCell::new(None));

        let outer: Deferred<u8> = Deferred::new();
        outer
            .resolve_from(Promise::failed(Error::failure("source failed")))
            .unwrap();
        let o = Rc::clone(&observed);
        outer
            .promise()
            .when(move |result| {
                *o.borrow_mut() = Some(result.unwrap_err().to_string());
                Ok(())
            })
            .unwrap();

        driver.run().unwrap();
        assert_eq!(observed.borrow().as_deref(), Some("source failed"));
    }

    #[test]
    fn test_direct_settlement_conflicts_with_adoption() {
        let (_driver, _) = install_virtual_driver();
        let outer: Deferred<u8> = Deferred::new();
        let inner: Deferred<u8> = Deferred::new();
        outer.resolve_from(inner.promise()).unwrap();
        assert!(matches!(outer.resolve(1), Err(Error::AlreadySettled)));
    }
}

mod funnel {
    use super::*;

    #[test]
    fn test_handler_errors_reach_the_loop_error_handler() {
        let (driver, _) = install_virtual_driver();
        let funnelled = shared_log();
        let sibling = Rc::new(RefCell::new(false));

        let f = Rc::clone(&funnelled);
        driver.set_error_handler(Some(Box::new(move |error| {
            f.borrow_mut().push(error.to_string());
            Ok(())
        })));

        let promise = Promise::fulfilled(1);
        promise
            .when(|_| Err(Error::failure("continuation failed")))
            .unwrap();
        let s = Rc::clone(&sibling);
        promise
            .when(move |_| {
                *s.borrow_mut() = true;
                Ok(())
            })
            .unwrap();

        driver.run().unwrap();
        assert_eq!(*funnelled.borrow(), vec!["continuation failed".to_string()]);
        assert!(*sibling.borrow());
    }
}
