//! Performance benchmarks for the tempo concurrency core
//!
//! Run with: cargo bench
//!
//! These benchmarks measure key performance characteristics:
//! - Defer dispatch throughput (the hot path of every tick)
//! - Timer registration and expiry sweep
//! - Promise settlement fan-out
//! - Stream emit/advance round-trips under backpressure release

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tempo::{accessor, Deferred, EventLoop, Promise, VirtualPoller};

fn install_virtual_driver() -> EventLoop {
    let poller = VirtualPoller::new();
    let driver = EventLoop::with_poller(Box::new(poller));
    accessor::set(Some(driver.clone()));
    driver
}

/// Benchmark: dispatching a tick full of defers
fn bench_defer_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("defer");

    group.bench_function("dispatch_1000", |b| {
        b.iter(|| {
            let driver = install_virtual_driver();
            for _ in 0..1000 {
                driver.defer(|_, _| Ok(()));
            }
            driver.run().unwrap();
            black_box(driver.info())
        })
    });

    group.bench_function("chained_100", |b| {
        b.iter(|| {
            let driver = install_virtual_driver();
            fn chain(driver: &EventLoop, depth: u32) {
                if depth == 0 {
                    return;
                }
                let next = driver.clone();
                driver.defer(move |_, _| {
                    chain(&next, depth - 1);
                    Ok(())
                });
            }
            chain(&driver, 100);
            driver.run().unwrap();
        })
    });

    group.finish();
}

/// Benchmark: timer registration and expiry sweep
fn bench_timers(c: &mut Criterion) {
    c.bench_function("timers_expire_1000", |b| {
        b.iter(|| {
            let driver = install_virtual_driver();
            for ms in 0..1000u64 {
                driver.delay(ms % 50, |_, _| Ok(()));
            }
            driver.run().unwrap();
        })
    });
}

/// Benchmark: promise settlement fan-out to many continuations
fn bench_promise_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("promise");

    group.bench_function("fanout_100_handlers", |b| {
        b.iter(|| {
            let driver = install_virtual_driver();
            let deferred = Deferred::new();
            let promise = deferred.promise();
            for _ in 0..100 {
                promise.when(|result| {
                    black_box(result.unwrap());
                    Ok(())
                })
                .unwrap();
            }
            deferred.resolve(42u64).unwrap();
            driver.run().unwrap();
        })
    });

    group.bench_function("settled_registration", |b| {
        b.iter(|| {
            let driver = install_virtual_driver();
            let promise = Promise::fulfilled(1u64);
            for _ in 0..100 {
                promise.when(|_| Ok(())).unwrap();
            }
            driver.run().unwrap();
        })
    });

    group.finish();
}

/// Benchmark: stream emit/advance round-trip with backpressure release
fn bench_stream_round_trip(c: &mut Criterion) {
    c.bench_function("stream_round_trip_100", |b| {
        b.iter(|| {
            let driver = install_virtual_driver();
            let producer = tempo::Producer::new(|emit| {
                for value in 0..100u32 {
                    emit.emit(value).unwrap();
                }
                emit.complete().unwrap();
                Promise::fulfilled(())
            })
            .unwrap();

            let mut it = producer.iterate().unwrap();
            let mut total = 0u64;
            loop {
                match it.advance().unwrap().settled_result() {
                    Some(Ok(true)) => total += u64::from(it.current().unwrap()),
                    _ => break,
                }
            }
            driver.run().unwrap();
            black_box(total)
        })
    });
}

criterion_group!(
    benches,
    bench_defer_dispatch,
    bench_timers,
    bench_promise_fanout,
    bench_stream_round_trip
);
criterion_main!(benches);
