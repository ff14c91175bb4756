//! End-to-end queue scenarios driven through the public control API.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use supertask_engine::{QueueOptions, QueueState, StepOutput, StepSpec};

use crate::common::{Event, Gate, instant, settle_on, sleeper, spawn};

#[tokio::test(start_paused = true)]
async fn three_delayed_steps_run_in_sequence() {
    let wait = Duration::from_millis(100);
    let steps = (1..=3)
        .map(|n| sleeper(Duration::from_millis(10), n).wait(wait))
        .collect();
    let (queue, journal) = spawn(steps, QueueOptions::immediate());
    settle_on(&queue, QueueState::Finished).await;

    let events = journal.events();
    assert_eq!(journal.count(&Event::BeforeQueue), 1);
    assert_eq!(journal.count(&Event::AfterQueue), 1);
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, Event::BeforeStep(_) | Event::AfterStep(_)))
            .cloned()
            .collect::<Vec<_>>(),
        vec![
            Event::BeforeStep(1),
            Event::AfterStep(1),
            Event::BeforeStep(2),
            Event::AfterStep(2),
            Event::BeforeStep(3),
            Event::AfterStep(3),
        ]
    );
    assert_eq!(
        events.last(),
        Some(&Event::Status(QueueState::Finished, QueueState::Executing))
    );

    let timed = journal.timed();
    let after = |id| timed.iter().find(|(_, e)| *e == Event::AfterStep(id)).unwrap().0;
    let before = |id| timed.iter().find(|(_, e)| *e == Event::BeforeStep(id)).unwrap().0;
    assert!(before(2) - after(1) >= wait);
    assert!(before(3) - after(2) >= wait);
}

#[tokio::test(start_paused = true)]
async fn pause_during_second_step_holds_third() {
    let mut gate = Gate::new();
    let (queue, journal) = spawn(
        vec![instant(1), gate.step(), instant(3)],
        QueueOptions::immediate(),
    );
    gate.started().await;
    assert_eq!(queue.pause().await.unwrap(), QueueState::Executing);

    gate.open();
    settle_on(&queue, QueueState::Pending).await;
    assert_eq!(journal.count(&Event::AfterStep(2)), 1);
    assert_eq!(queue.snapshot().cursor, 2);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(journal.count(&Event::BeforeStep(3)), 0);

    assert_eq!(queue.resume().await.unwrap(), QueueState::Executing);
    settle_on(&queue, QueueState::Finished).await;
    assert_eq!(journal.started_steps(), vec![1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn destroy_during_first_step_replaces_second() {
    let mut gate = Gate::new();
    let (queue, journal) = spawn(vec![gate.step(), instant(2)], QueueOptions::immediate());
    gate.started().await;
    assert_eq!(queue.destroy().await.unwrap(), QueueState::Executing);

    gate.open();
    settle_on(&queue, QueueState::Destroyed).await;

    assert_eq!(journal.started_steps(), vec![1]);
    let after_step = journal.position(&Event::AfterStep(1)).unwrap();
    let before_destroy = journal.position(&Event::BeforeDestroy).unwrap();
    let after_destroyed = journal.position(&Event::AfterDestroyed).unwrap();
    assert!(after_step < before_destroy);
    assert!(before_destroy < after_destroyed);
    assert_eq!(journal.count(&Event::AfterQueue), 0);
}

#[tokio::test(start_paused = true)]
async fn restart_after_pause_runs_from_the_top() {
    let disposed = Arc::new(AtomicUsize::new(0));
    let tracked = |value: i64| {
        let disposed = Arc::clone(&disposed);
        StepSpec::new(move || {
            let disposed = Arc::clone(&disposed);
            async move {
                Ok(StepOutput::new(value).with_disposer(move || {
                    disposed.fetch_add(1, Ordering::SeqCst);
                }))
            }
        })
    };
    let mut gate = Gate::new();
    let (queue, journal) = spawn(
        vec![tracked(1), gate.step(), tracked(3)],
        QueueOptions::immediate(),
    );
    gate.started().await;
    queue.pause().await.unwrap();
    gate.open();
    settle_on(&queue, QueueState::Pending).await;

    let delay = Duration::from_millis(300);
    assert_eq!(queue.restart(delay).await.unwrap(), QueueState::Ready);
    // Only step 1 carries a disposer among the stored results.
    assert_eq!(disposed.load(Ordering::SeqCst), 1);
    assert!(queue.result(1).await.unwrap().is_none());
    assert_eq!(queue.snapshot().cursor, 0);

    gate.open();
    settle_on(&queue, QueueState::Finished).await;
    assert_eq!(journal.started_steps(), vec![1, 2, 1, 2, 3]);
    assert_eq!(journal.count(&Event::BeforeQueue), 2);
}

#[tokio::test(start_paused = true)]
async fn failure_surfaces_and_destroy_still_works() {
    let failing = StepSpec::new(|| async { Err("disk full".into()) });
    let (queue, journal) = spawn(vec![instant(1), failing, instant(3)], QueueOptions::immediate());
    settle_on(&queue, QueueState::Failed).await;

    assert_eq!(journal.count(&Event::Failed(2)), 1);
    assert_eq!(journal.count(&Event::AfterStep(2)), 0);
    assert_eq!(journal.count(&Event::BeforeStep(3)), 0);

    assert_eq!(queue.pause().await.unwrap(), QueueState::Failed);
    assert_eq!(queue.destroy().await.unwrap(), QueueState::Destroyed);
    assert_eq!(journal.count(&Event::AfterDestroyed), 1);
}

#[tokio::test(start_paused = true)]
async fn dropping_every_handle_lets_scheduled_work_finish() {
    let ran = Arc::new(AtomicUsize::new(0));
    let observed = Arc::clone(&ran);
    let last = StepSpec::new(move || {
        let observed = Arc::clone(&observed);
        async move {
            observed.fetch_add(1, Ordering::SeqCst);
            Ok(StepOutput::empty())
        }
    });
    let (queue, journal) = spawn(
        vec![sleeper(Duration::from_millis(50), 1), last],
        QueueOptions::immediate(),
    );
    drop(queue);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(ran.load(Ordering::SeqCst), 1);
    assert_eq!(journal.count(&Event::AfterQueue), 1);
}
