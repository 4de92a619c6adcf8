use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use starling::errors::TaskError;
use starling::scheduler::{DeferredTask, QueueStrategy, SchedulerStats, TaskOutcome, TaskScheduler};
use starling::SchedulerConfig;
use tokio::sync::mpsc;
use tokio::time::Instant;

fn config(concurrency_limit: usize, tasks_per_interval: usize, interval_ms: u64) -> SchedulerConfig {
    SchedulerConfig::new(concurrency_limit, tasks_per_interval, Duration::from_millis(interval_ms))
}

async fn sleep_task(ms: u64) -> Result<u64, String> {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    Ok(ms)
}

fn collect_outcomes<T: Clone + Send + 'static>(
    scheduler: &TaskScheduler<T>,
) -> mpsc::UnboundedReceiver<TaskOutcome<T>> {
    let (tx, rx) = mpsc::unbounded_channel();
    scheduler
        .on_task_complete(move |outcome: &TaskOutcome<T>| {
            let _ = tx.send(outcome.clone());
        })
        .unwrap();
    rx
}

#[tokio::test(start_paused = true)]
async fn test_windowed_admission_scenario() {
    let scheduler = TaskScheduler::<u64>::new(config(2, 3, 1000)).unwrap();
    let start = Instant::now();

    for _ in 0..4 {
        scheduler.schedule_task(sleep_task, 100).unwrap();
    }
    assert_eq!(
        scheduler.stats().await.unwrap(),
        SchedulerStats {
            running_tasks: 2,
            tasks_initiated_in_window: 2,
            queued_tasks: 2,
        }
    );

    // The first two finish at 100ms; only one more fits in the window.
    tokio::time::sleep_until(start + Duration::from_millis(150)).await;
    assert_eq!(
        scheduler.stats().await.unwrap(),
        SchedulerStats {
            running_tasks: 1,
            tasks_initiated_in_window: 3,
            queued_tasks: 1,
        }
    );

    tokio::time::sleep_until(start + Duration::from_millis(250)).await;
    assert_eq!(
        scheduler.stats().await.unwrap(),
        SchedulerStats {
            running_tasks: 0,
            tasks_initiated_in_window: 3,
            queued_tasks: 1,
        }
    );

    // Nothing completes in between; the window rollover alone admits the last task.
    tokio::time::sleep_until(start + Duration::from_millis(1050)).await;
    assert_eq!(
        scheduler.stats().await.unwrap(),
        SchedulerStats {
            running_tasks: 1,
            tasks_initiated_in_window: 1,
            queued_tasks: 0,
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_admission_invariant_holds() {
    const CONCURRENCY: usize = 3;
    const PER_WINDOW: usize = 5;
    const TASKS: usize = 20;

    let scheduler = TaskScheduler::<()>::new(config(CONCURRENCY, PER_WINDOW, 1000)).unwrap();
    let mut outcomes = collect_outcomes(&scheduler);
    let start = Instant::now();

    let running = Arc::new(AtomicUsize::new(0));
    let max_running = Arc::new(AtomicUsize::new(0));
    let starts = Arc::new(Mutex::new(Vec::new()));

    for _ in 0..TASKS {
        let running = running.clone();
        let max_running = max_running.clone();
        let starts = starts.clone();
        scheduler
            .schedule_task(
                move |_: ()| async move {
                    starts.lock().unwrap().push(start.elapsed());
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    max_running.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, String>(())
                },
                (),
            )
            .unwrap();
    }

    for _ in 0..TASKS {
        let stats = scheduler.stats().await.unwrap();
        assert!(stats.running_tasks <= CONCURRENCY);
        assert!(stats.tasks_initiated_in_window <= PER_WINDOW);
        assert!(outcomes.recv().await.unwrap().is_success());
    }

    assert!(max_running.load(Ordering::SeqCst) <= CONCURRENCY);

    let starts = starts.lock().unwrap();
    assert_eq!(starts.len(), TASKS);
    let mut per_window = [0usize; 8];
    for started in starts.iter() {
        per_window[(started.as_millis() / 1000) as usize] += 1;
    }
    assert!(per_window.iter().all(|count| *count <= PER_WINDOW), "{per_window:?}");
    // Twenty initiations at five per window need four windows.
    assert!(starts.iter().max().unwrap() >= &Duration::from_millis(3000));
}

#[tokio::test(start_paused = true)]
async fn test_errors_and_panics_surface_in_outcomes() {
    let scheduler = TaskScheduler::<u32>::new(config(4, 10, 1000)).unwrap();
    let mut outcomes = collect_outcomes(&scheduler);

    let failing = scheduler
        .schedule_task(|_: ()| async { Err::<u32, _>("bad input") }, ())
        .unwrap();
    let panicking = scheduler
        .schedule_task(
            |_: ()| async {
                if true {
                    panic!("boom");
                }
                Ok::<u32, String>(0)
            },
            (),
        )
        .unwrap();
    let ok = scheduler.schedule_task(|n: u32| async move { Ok::<_, String>(n + 1) }, 1).unwrap();

    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.push(outcomes.recv().await.unwrap());
    }
    seen.sort_by_key(|outcome| outcome.task_id);

    assert_eq!(seen[0].task_id, failing);
    assert_eq!(seen[0].error(), Some(&TaskError::Execution("bad input".into())));
    assert_eq!(seen[1].task_id, panicking);
    assert_eq!(seen[1].error(), Some(&TaskError::Panicked("boom".into())));
    assert_eq!(seen[2].task_id, ok);
    assert_eq!(seen[2].value(), Some(&2));

    // The admission loop survived both failures.
    assert_eq!(scheduler.stats().await.unwrap().running_tasks, 0);
}

#[tokio::test(start_paused = true)]
async fn test_queued_tasks_admitted_in_arrival_order() {
    let scheduler = TaskScheduler::<usize>::new(config(1, 100, 1000)).unwrap();
    let mut outcomes = collect_outcomes(&scheduler);
    let order = Arc::new(Mutex::new(Vec::new()));

    for i in 0..5 {
        let order = order.clone();
        scheduler
            .schedule_task(
                move |i: usize| async move {
                    order.lock().unwrap().push(i);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok::<_, String>(i)
                },
                i,
            )
            .unwrap();
    }
    for _ in 0..5 {
        outcomes.recv().await.unwrap();
    }

    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
}

/// Admits the most recent arrival first.
struct LifoQueue<T>(VecDeque<T>);

impl<T: Send> QueueStrategy<T> for LifoQueue<T> {
    fn enqueue(&mut self, item: T) {
        self.0.push_back(item);
    }

    fn dequeue(&mut self) -> Option<T> {
        self.0.pop_back()
    }

    fn len(&self) -> usize {
        self.0.len()
    }
}

#[tokio::test(start_paused = true)]
async fn test_custom_queue_strategy() {
    let queue: Box<dyn QueueStrategy<DeferredTask<usize>>> = Box::new(LifoQueue(VecDeque::new()));
    let scheduler = TaskScheduler::with_queue(config(1, 100, 1000), queue).unwrap();
    let mut outcomes = collect_outcomes(&scheduler);

    let ids: Vec<_> = (0..4)
        .map(|i| {
            scheduler
                .schedule_task(
                    |i: usize| async move {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Ok::<_, String>(i)
                    },
                    i,
                )
                .unwrap()
        })
        .collect();

    let mut completed = Vec::new();
    for _ in 0..4 {
        completed.push(outcomes.recv().await.unwrap().task_id);
    }
    assert_eq!(completed, vec![ids[0], ids[3], ids[2], ids[1]]);
}

#[tokio::test(start_paused = true)]
async fn test_panicking_listener_does_not_stop_notifications() {
    let scheduler = TaskScheduler::<u32>::new(config(2, 10, 1000)).unwrap();
    scheduler
        .on_task_complete(|_: &TaskOutcome<u32>| panic!("listener exploded"))
        .unwrap();
    let mut outcomes = collect_outcomes(&scheduler);

    scheduler.schedule_task(|_: ()| async { Ok::<_, String>(1) }, ()).unwrap();
    scheduler.schedule_task(|_: ()| async { Ok::<_, String>(2) }, ()).unwrap();

    let mut values = vec![
        *outcomes.recv().await.unwrap().value().unwrap(),
        *outcomes.recv().await.unwrap().value().unwrap(),
    ];
    values.sort();
    assert_eq!(values, vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn test_gauges_track_running_and_queued() {
    let scheduler = TaskScheduler::<u64>::new(config(1, 10, 1000)).unwrap();
    scheduler.schedule_task(sleep_task, 500).unwrap();
    scheduler.schedule_task(sleep_task, 500).unwrap();

    // Stats round-trips through the owner task, after which the gauges are published.
    scheduler.stats().await.unwrap();
    assert_eq!(scheduler.running_tasks(), 1);
    assert_eq!(scheduler.queue_len(), 1);
}
