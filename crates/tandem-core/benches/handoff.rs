use criterion::{
    black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tandem_core::{AcquireOrder, ActorId, Backoff, Message, OrderedLockPair, SignalQueue};

fn bench_uncontended_queue(c: &mut Criterion) {
    let queue = SignalQueue::unbounded();

    c.bench_function("queue_enqueue_dequeue", |b| {
        b.iter(|| {
            queue.enqueue(Message::Data(black_box(42u64)));
            queue.try_dequeue()
        });
    });
}

fn bench_handoff(c: &mut Criterion) {
    let mut group = c.benchmark_group("handoff");

    for &messages in &[100u64, 1_000] {
        group.throughput(Throughput::Elements(messages));

        group.bench_with_input(BenchmarkId::new("unbounded", messages), &messages, |b, &n| {
            b.iter(|| handoff(SignalQueue::unbounded(), n));
        });

        group.bench_with_input(BenchmarkId::new("lockstep", messages), &messages, |b, &n| {
            b.iter(|| handoff(SignalQueue::bounded(1), n));
        });
    }

    group.finish();
}

fn handoff(queue: SignalQueue<u64>, n: u64) -> u64 {
    let queue = Arc::new(queue);
    let consumer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            let mut sum = 0;
            while let Message::Data(value) = queue.dequeue_blocking() {
                sum += value;
            }
            sum
        })
    };
    for i in 0..n {
        queue.enqueue_with_backpressure(Message::Data(i)).unwrap();
    }
    queue.enqueue(Message::Done);
    consumer.join().unwrap()
}

fn bench_lock_pair(c: &mut Criterion) {
    let mut group = c.benchmark_group("lock_pair");
    let pair = OrderedLockPair::new(0u64, 0u64);
    let actor = ActorId::next();

    group.bench_function("with_both", |b| {
        b.iter(|| {
            pair.with_both(actor, |a, b| {
                *a += 1;
                *b += 1;
            })
        });
    });

    group.bench_function("try_with_both", |b| {
        b.iter(|| {
            pair.try_with_both(actor, AcquireOrder::BThenA, Duration::from_millis(1), |a, b| {
                *a += 1;
                *b += 1;
            })
        });
    });

    group.bench_function("retry_with_both", |b| {
        let backoff = Backoff::default();
        b.iter(|| {
            pair.retry_with_both(
                actor,
                AcquireOrder::AThenB,
                Duration::from_millis(1),
                &backoff,
                |a, b| {
                    *a += 1;
                    *b += 1;
                },
            )
        });
    });

    group.finish();
}

criterion_group!(benches, bench_uncontended_queue, bench_handoff, bench_lock_pair);
criterion_main!(benches);
