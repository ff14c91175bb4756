//! Ordering, single-flight and identifier properties.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use supertask_engine::{QueueOptions, QueueState, StepOutput, StepSpec};

use crate::common::{Event, instant, settle_on, sleeper, spawn};

#[tokio::test(start_paused = true)]
async fn steps_run_by_order_key_with_stable_ties() {
    let steps = vec![
        instant(0).id(1).order(5),
        instant(0).id(2).order(-1),
        instant(0).id(3).order(5),
        instant(0).id(4).order(0),
        instant(0).id(5),
        instant(0).id(6).order(-1),
    ];
    let (queue, journal) = spawn(steps, QueueOptions::immediate());
    settle_on(&queue, QueueState::Finished).await;

    // Step 5 has no order key and sorts by its identifier.
    assert_eq!(journal.started_steps(), vec![2, 6, 4, 1, 3, 5]);
}

#[tokio::test(start_paused = true)]
async fn at_most_one_step_in_flight() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let step = |work: u64| {
        let active = Arc::clone(&active);
        let peak = Arc::clone(&peak);
        StepSpec::new(move || {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(work)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(StepOutput::empty())
            }
        })
    };
    let (queue, journal) = spawn(
        vec![step(30), step(10), step(20), step(0)],
        QueueOptions::immediate(),
    );

    // Control traffic while steps are running must not start extra work.
    for _ in 0..5 {
        queue.resume().await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    settle_on(&queue, QueueState::Finished).await;
    assert_eq!(peak.load(Ordering::SeqCst), 1);

    let events = journal.events();
    for id in 1..4 {
        let after = events.iter().position(|e| *e == Event::AfterStep(id)).unwrap();
        let next = events
            .iter()
            .position(|e| *e == Event::BeforeStep(id + 1))
            .unwrap();
        assert!(after < next, "step {id} must finish before step {} starts", id + 1);
    }
}

#[tokio::test(start_paused = true)]
async fn auto_ids_never_repeat_across_replacements() {
    let (queue, journal) = spawn(
        vec![instant(0), instant(0), instant(0)],
        QueueOptions::default(),
    );
    queue
        .replace_queue(vec![instant(0), instant(0), instant(0)], false)
        .await
        .unwrap();
    queue
        .replace_queue(vec![instant(0), instant(0)], true)
        .await
        .unwrap();
    settle_on(&queue, QueueState::Finished).await;

    assert_eq!(journal.started_steps(), vec![7, 8]);
    assert!(queue.result(7).await.unwrap().is_some());
    assert!(queue.result(1).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn resume_from_ready_starts_at_zero() {
    let (queue, journal) = spawn(vec![instant(1), instant(2)], QueueOptions::default());
    assert_eq!(queue.snapshot().current.map(|id| id.value()), Some(1));
    queue.resume().await.unwrap();
    settle_on(&queue, QueueState::Finished).await;
    assert_eq!(journal.started_steps(), vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn restart_sequence_is_ready_then_executing() {
    let (queue, journal) = spawn(
        vec![sleeper(Duration::from_millis(10), 1)],
        QueueOptions::immediate(),
    );
    settle_on(&queue, QueueState::Finished).await;

    queue.restart(Duration::from_millis(200)).await.unwrap();
    settle_on(&queue, QueueState::Finished).await;

    let statuses: Vec<_> = journal
        .events()
        .into_iter()
        .filter(|e| matches!(e, Event::Status(..)))
        .collect();
    assert_eq!(
        statuses,
        vec![
            Event::Status(QueueState::Executing, QueueState::Ready),
            Event::Status(QueueState::Finished, QueueState::Executing),
            Event::Status(QueueState::Ready, QueueState::Finished),
            Event::Status(QueueState::Executing, QueueState::Ready),
            Event::Status(QueueState::Finished, QueueState::Executing),
        ]
    );
}
