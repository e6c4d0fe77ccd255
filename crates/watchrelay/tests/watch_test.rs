//! Watch façade end-to-end: catch-up plus live tailing, resume, typed
//! isolation, slow-consumer eviction, and lifecycle.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{fast_config, open_relay, open_relay_with, task, temp_dir, user, Task, User};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use watchrelay::{Event, EventAction};

const WAIT: Duration = Duration::from_secs(5);

async fn collect_tasks(
    watch: &mut watchrelay::WatchResult<Task>,
    count: usize,
) -> Vec<Event<Task>> {
    let mut events = Vec::new();
    while events.len() < count {
        let batch = timeout(WAIT, watch.events.recv())
            .await
            .expect("watch should keep delivering")
            .expect("watch stream should stay open");
        events.extend(batch);
    }
    events
}

#[tokio::test(flavor = "multi_thread")]
async fn test_watch_from_zero_streams_all_creates() {
    let dir = temp_dir();
    let relay = open_relay(&dir);
    relay.register_resource::<Task>().unwrap();

    let mut watch = relay
        .watch::<Task>(CancellationToken::new(), None, 0)
        .await
        .unwrap();
    assert_eq!(watch.revision, 0);

    for i in 0..10 {
        relay
            .create(None, None, &mut [task(&format!("t{i}"))])
            .unwrap();
    }

    let events = collect_tasks(&mut watch, 10).await;
    let revisions: Vec<u64> = events.iter().map(|e| e.revision).collect();
    assert_eq!(revisions, (1..=10).collect::<Vec<u64>>());
    assert!(events.iter().all(|e| e.action == EventAction::Create));
    let uuids: Vec<String> = events
        .iter()
        .map(|e| e.value.as_ref().unwrap().uuid.clone())
        .collect();
    assert_eq!(
        uuids,
        (0..10).map(|i| format!("t{i}")).collect::<Vec<String>>()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_watch_resumes_from_revision_inclusive() {
    let dir = temp_dir();
    let relay = open_relay(&dir);
    relay.register_resource::<Task>().unwrap();

    for i in 1..=6 {
        relay
            .create(None, None, &mut [task(&format!("t{i}"))])
            .unwrap();
    }

    // Resume from revision 5: the event at 5 itself is included.
    let mut watch = relay
        .watch::<Task>(CancellationToken::new(), None, 5)
        .await
        .unwrap();

    relay.create(None, None, &mut [task("t7")]).unwrap();

    let events = collect_tasks(&mut watch, 3).await;
    let revisions: Vec<u64> = events.iter().map(|e| e.revision).collect();
    assert_eq!(revisions, vec![5, 6, 7]);
    assert!(events.iter().all(|e| e.revision >= 5));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_watch_resumes_across_restart() {
    let dir = temp_dir();
    {
        let relay = open_relay(&dir);
        relay.register_resource::<Task>().unwrap();
        for i in 1..=5 {
            relay
                .create(None, None, &mut [task(&format!("t{i}"))])
                .unwrap();
        }
        relay.close();
    }

    // A fresh instance seeds its sequence from the persisted log.
    let relay = open_relay(&dir);
    relay.register_resource::<Task>().unwrap();
    relay.create(None, None, &mut [task("t6")]).unwrap();
    assert_eq!(relay.current_revision(), 6);

    // Resume with the cursor a subscriber stored before the restart.
    let mut watch = relay
        .watch::<Task>(CancellationToken::new(), None, 3)
        .await
        .unwrap();
    relay.create(None, None, &mut [task("t7")]).unwrap();

    let events = collect_tasks(&mut watch, 5).await;
    let revisions: Vec<u64> = events.iter().map(|e| e.revision).collect();
    assert_eq!(revisions, vec![3, 4, 5, 6, 7]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_typed_watchers_are_isolated() {
    let dir = temp_dir();
    let relay = open_relay(&dir);
    relay.register_resource::<Task>().unwrap();
    relay.register_resource::<User>().unwrap();

    let mut task_watch = relay
        .watch::<Task>(CancellationToken::new(), None, 0)
        .await
        .unwrap();
    let mut user_watch = relay
        .watch::<User>(CancellationToken::new(), None, 0)
        .await
        .unwrap();
    let mut all_watch = relay
        .watch_all(CancellationToken::new(), 0)
        .await
        .unwrap();

    relay.create(None, None, &mut [task("t1")]).unwrap();
    relay.create(None, None, &mut [user("u1")]).unwrap();
    relay.create(None, None, &mut [task("t2")]).unwrap();
    relay.create(None, None, &mut [user("u2")]).unwrap();

    let tasks = collect_tasks(&mut task_watch, 2).await;
    assert_eq!(
        tasks.iter().map(|e| e.revision).collect::<Vec<u64>>(),
        vec![1, 3]
    );
    assert!(tasks.iter().all(|e| e.resource_name == "task"));

    let mut users = Vec::new();
    while users.len() < 2 {
        let batch = timeout(WAIT, user_watch.events.recv())
            .await
            .unwrap()
            .unwrap();
        users.extend(batch);
    }
    assert_eq!(
        users.iter().map(|e| e.revision).collect::<Vec<u64>>(),
        vec![2, 4]
    );
    assert!(users.iter().all(|e| e.resource_name == "user"));

    let mut all = Vec::new();
    while all.len() < 4 {
        let batch = timeout(WAIT, all_watch.events.recv())
            .await
            .unwrap()
            .unwrap();
        all.extend(batch);
    }
    assert_eq!(
        all.iter().map(|e| e.revision()).collect::<Vec<u64>>(),
        vec![1, 2, 3, 4]
    );
    assert_eq!(
        all.iter().map(|e| e.resource_name()).collect::<Vec<&str>>(),
        vec!["task", "user", "task", "user"]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_watch_predicate_filters_live_events() {
    let dir = temp_dir();
    let relay = open_relay(&dir);
    relay.register_resource::<Task>().unwrap();

    let cond: watchrelay::EventPredicate<Task> = Box::new(|t| t.uuid.starts_with("keep"));
    let mut watch = relay
        .watch::<Task>(CancellationToken::new(), Some(cond), 0)
        .await
        .unwrap();

    relay.create(None, None, &mut [task("drop-1")]).unwrap();
    relay.create(None, None, &mut [task("keep-1")]).unwrap();
    relay.create(None, None, &mut [task("drop-2")]).unwrap();
    relay.create(None, None, &mut [task("keep-2")]).unwrap();

    let events = collect_tasks(&mut watch, 2).await;
    let uuids: Vec<&str> = events
        .iter()
        .map(|e| e.value.as_ref().unwrap().uuid.as_str())
        .collect();
    assert_eq!(uuids, vec!["keep-1", "keep-2"]);
    assert_eq!(
        events.iter().map(|e| e.revision).collect::<Vec<u64>>(),
        vec![2, 4]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_slow_subscriber_is_evicted_without_stalling_others() {
    let dir = temp_dir();
    // Small pages and buffers so 1,000 events overflow the slow side.
    let relay = Arc::new(open_relay_with(
        &dir,
        fast_config()
            .with_subscriber_buffer(4)
            .with_poll_batch_size(16)
            .with_fast_path_threshold(16),
    ));
    relay.register_resource::<Task>().unwrap();

    let mut fast = relay.watch_all(CancellationToken::new(), 0).await.unwrap();
    // Never read until the producer is done.
    let mut slow = relay
        .watch::<Task>(CancellationToken::new(), None, 0)
        .await
        .unwrap();

    let producer = {
        let relay = Arc::clone(&relay);
        tokio::task::spawn_blocking(move || {
            for chunk in 0..100 {
                let mut tasks: Vec<Task> = (0..10)
                    .map(|i| task(&format!("t{}", chunk * 10 + i)))
                    .collect();
                relay.create(None, None, &mut tasks).unwrap();
            }
        })
    };

    let mut fast_revisions = Vec::new();
    while fast_revisions.len() < 1000 {
        let batch = timeout(WAIT, fast.events.recv())
            .await
            .expect("fast subscriber must not be starved")
            .expect("fast subscriber must stay subscribed");
        fast_revisions.extend(batch.iter().map(|e| e.revision()));
    }
    producer.await.unwrap();

    assert_eq!(fast_revisions.len(), 1000);
    assert!(fast_revisions.windows(2).all(|w| w[0] < w[1]));

    // The slow subscriber got a bounded prefix and then end-of-stream.
    let drained = timeout(WAIT, async {
        let mut count = 0usize;
        while let Some(batch) = slow.events.recv().await {
            count += batch.len();
        }
        count
    })
    .await
    .expect("evicted subscriber must see a closed stream");
    assert!(drained < 1000, "slow subscriber received {drained} events");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancellation_closes_the_stream() {
    let dir = temp_dir();
    let relay = open_relay(&dir);
    relay.register_resource::<Task>().unwrap();

    let token = CancellationToken::new();
    let mut watch = relay.watch::<Task>(token.clone(), None, 0).await.unwrap();

    relay.create(None, None, &mut [task("t1")]).unwrap();
    let events = collect_tasks(&mut watch, 1).await;
    assert_eq!(events[0].revision, 1);

    token.cancel();
    let end = timeout(WAIT, async {
        loop {
            if watch.events.recv().await.is_none() {
                break;
            }
        }
    })
    .await;
    assert!(end.is_ok(), "cancelled watch must close its stream");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_close_terminates_all_watchers() {
    let dir = temp_dir();
    let relay = open_relay(&dir);
    relay.register_resource::<Task>().unwrap();

    let mut w1 = relay
        .watch::<Task>(CancellationToken::new(), None, 0)
        .await
        .unwrap();
    let mut w2 = relay.watch_all(CancellationToken::new(), 0).await.unwrap();

    relay.close();

    for end in [
        timeout(WAIT, async {
            while w1.events.recv().await.is_some() {}
        })
        .await,
        timeout(WAIT, async {
            while w2.events.recv().await.is_some() {}
        })
        .await,
    ] {
        assert!(end.is_ok(), "close must end every watch stream");
    }

    let err = relay
        .watch::<Task>(CancellationToken::new(), None, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, watchrelay::WatchRelayError::Cancelled));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_writers_lose_nothing() {
    let dir = temp_dir();
    let relay = Arc::new(open_relay(&dir));
    relay.register_resource::<Task>().unwrap();

    let mut watch = relay.watch_all(CancellationToken::new(), 0).await.unwrap();

    const WRITERS: usize = 4;
    const PER_WRITER: usize = 50;
    let handles: Vec<_> = (0..WRITERS)
        .map(|w| {
            let relay = Arc::clone(&relay);
            std::thread::spawn(move || {
                for i in 0..PER_WRITER {
                    relay
                        .create(None, None, &mut [task(&format!("w{w}-{i}"))])
                        .unwrap();
                }
            })
        })
        .collect();

    let mut revisions = Vec::new();
    while revisions.len() < WRITERS * PER_WRITER {
        let batch = timeout(WAIT, watch.events.recv())
            .await
            .expect("events from concurrent writers expected")
            .expect("subscriber must survive concurrent writers");
        revisions.extend(batch.iter().filter(|e| !e.is_gap()).map(|e| e.revision()));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(revisions.len(), WRITERS * PER_WRITER);
    assert!(revisions.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(*revisions.last().unwrap() as usize, WRITERS * PER_WRITER);
}
