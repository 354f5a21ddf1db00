use chrono::{NaiveTime, Utc};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use std::sync::Arc;
use tokio::runtime::Runtime;
use uuid::Uuid;

use queue_system::models::TimeSlot;
use queue_system::services::catalog::{NewEvent, NewTimeSlot};
use queue_system::services::notifier::RecordingNotifier;
use queue_system::services::{CoreContext, QueueCore};
use queue_system::store::MemoryStore;

const JOINS: usize = 100;

fn setup(rt: &Runtime) -> (QueueCore, TimeSlot) {
    let core = QueueCore::new(CoreContext::new(
        Arc::new(MemoryStore::new()),
        Arc::new(RecordingNotifier::new()),
    ));
    let created = rt
        .block_on(core.catalog.create_event(NewEvent {
            name: "bench".to_string(),
            description: None,
            date: Utc::now(),
            location: "bench".to_string(),
            capacity: 10_000,
            status: None,
            time_slots: vec![NewTimeSlot {
                start_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
                end_time: NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
                max_capacity: 10_000,
            }],
        }))
        .unwrap();
    let slot = created.time_slots[0].clone();
    (core, slot)
}

fn bench_join_queue(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    c.bench_function("join_queue sequential x100", |b| {
        b.iter_batched(
            || setup(&rt),
            |(core, slot)| {
                rt.block_on(async {
                    for _ in 0..JOINS {
                        core.admission.join_queue(slot.event_id, slot.id, Uuid::new_v4()).await.unwrap();
                    }
                })
            },
            BatchSize::SmallInput,
        )
    });

    c.bench_function("join_queue concurrent x100", |b| {
        b.iter_batched(
            || setup(&rt),
            |(core, slot)| {
                rt.block_on(async {
                    let joins = (0..JOINS).map(|_| core.admission.join_queue(slot.event_id, slot.id, Uuid::new_v4()));
                    for result in futures::future::join_all(joins).await {
                        result.unwrap();
                    }
                })
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_join_queue);
criterion_main!(benches);
