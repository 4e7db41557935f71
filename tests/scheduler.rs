//! Scheduling, failover and accounting against real TCP backends.

mod common;

use common::{hung_backend, outcome, refused_address, round_trip, start_tagged_echo_backend, TestScheduler};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tcp_balancer::health::state::HealthState;
use tcp_balancer::load_balancer::{Backend, Connector, ScheduleError};
use tokio::io::AsyncReadExt;

#[tokio::test]
async fn sequential_sessions_rotate_across_idle_backends() {
    let a = start_tagged_echo_backend(b'a').await;
    let b = start_tagged_echo_backend(b'b').await;
    let c = start_tagged_echo_backend(b'c').await;
    let scheduler = TestScheduler::start(&[a.address.clone(), b.address.clone(), c.address.clone()], false);

    let mut tags = Vec::new();
    for _ in 0..6 {
        let (client, done) = scheduler.connect().await;
        tags.push(round_trip(client, b"ping").await);
        // Each session is released before the next is scheduled.
        outcome(done).await.unwrap();
    }

    assert_eq!(tags, b"abcabc");
}

#[tokio::test]
async fn ongoing_returns_to_zero_after_concurrent_churn() {
    let backends = [
        start_tagged_echo_backend(b'a').await,
        start_tagged_echo_backend(b'b').await,
        start_tagged_echo_backend(b'c').await,
    ];
    let addresses: Vec<_> = backends.iter().map(|b| b.address.clone()).collect();
    let scheduler = TestScheduler::start(&addresses, false);

    let mut sessions = Vec::new();
    for i in 0..50u32 {
        let (client, done) = scheduler.connect().await;
        sessions.push(tokio::spawn(async move {
            round_trip(client, &i.to_be_bytes()).await;
            outcome(done).await.unwrap()
        }));
    }
    for session in sessions {
        session.await.unwrap();
    }

    let status = scheduler.handle.backend_status().await.unwrap();
    assert!(status.iter().all(|s| s.ongoing == 0), "{status:?}");
    assert_eq!(backends.iter().map(|b| b.accepted()).sum::<usize>(), 50);
    // Equal-load selection spreads the sessions over every backend.
    assert!(backends.iter().all(|b| b.accepted() > 0));
    assert_eq!(scheduler.sessions.active_count(), 0);
}

#[tokio::test]
async fn all_down_refuses_without_dialing() {
    let a = start_tagged_echo_backend(b'a').await;
    let b = start_tagged_echo_backend(b'b').await;
    let scheduler = TestScheduler::start(&[a.address.clone(), b.address.clone()], true);
    scheduler
        .apply(&[(&a.address, HealthState::Down), (&b.address, HealthState::Down)])
        .await;

    let (mut client, done) = scheduler.connect().await;
    assert!(matches!(outcome(done).await, Err(ScheduleError::NoBackendAvailable)));

    let mut buf = Vec::new();
    assert_eq!(client.read_to_end(&mut buf).await.unwrap(), 0);
    assert_eq!(a.accepted() + b.accepted(), 0);
}

#[tokio::test]
async fn failover_skips_unreachable_backends_and_marks_them_down() {
    let dead_a = refused_address().await;
    let dead_b = refused_address().await;
    let live = start_tagged_echo_backend(b'c').await;
    let scheduler = TestScheduler::start(&[dead_a.clone(), dead_b.clone(), live.address.clone()], true);

    let (client, done) = scheduler.connect().await;
    assert_eq!(round_trip(client, b"hello").await, b'c');
    let summary = outcome(done).await.unwrap();
    assert_eq!(summary.backend, live.address);

    assert_eq!(
        scheduler.health().await,
        vec![HealthState::Down, HealthState::Down, HealthState::Up]
    );
}

#[tokio::test]
async fn without_failover_a_dial_failure_is_terminal() {
    let dead = refused_address().await;
    let live = start_tagged_echo_backend(b'b').await;
    let scheduler = TestScheduler::start(&[dead.clone(), live.address.clone()], false);

    let (_client, done) = scheduler.connect().await;
    match outcome(done).await {
        Err(ScheduleError::BackendUnreachable { address, .. }) => assert_eq!(address, dead),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(scheduler.health().await, vec![HealthState::Down, HealthState::Up]);

    // The next connection only sees the remaining backend.
    let (client, done) = scheduler.connect().await;
    assert_eq!(round_trip(client, b"x").await, b'b');
    outcome(done).await.unwrap();
}

#[tokio::test]
async fn dial_timeout_fails_over_to_next_backend() {
    let live = start_tagged_echo_backend(b'l').await;
    let dial_timeout = Duration::from_millis(300);
    let scheduler = TestScheduler::with_backends(
        vec![
            hung_backend("10.255.0.1:3306"),
            Arc::new(Backend::new(live.address.clone(), Connector::Direct)),
        ],
        true,
        dial_timeout,
    );

    let started = Instant::now();
    let (client, done) = scheduler.connect().await;
    assert_eq!(round_trip(client, b"slow").await, b'l');
    let elapsed = started.elapsed();
    assert!(elapsed >= dial_timeout, "{elapsed:?}");
    assert!(elapsed < dial_timeout * 5, "{elapsed:?}");
    outcome(done).await.unwrap();

    let status = scheduler.handle.backend_status().await.unwrap();
    assert_eq!(status[0].health, HealthState::Down);
    assert_eq!(status[1].health, HealthState::Up);
    assert!(status.iter().all(|s| s.ongoing == 0), "{status:?}");
}

#[tokio::test]
async fn dial_timeout_without_failover_is_unreachable() {
    let scheduler = TestScheduler::with_backends(
        vec![hung_backend("10.255.0.1:3306")],
        false,
        Duration::from_millis(100),
    );

    let (_client, done) = scheduler.connect().await;
    match outcome(done).await {
        Err(ScheduleError::BackendUnreachable { address, source }) => {
            assert_eq!(address, "10.255.0.1:3306");
            assert_eq!(source.kind(), io::ErrorKind::TimedOut);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(scheduler.health().await, vec![HealthState::Down]);
}

#[tokio::test]
async fn failover_exhaustion_reports_every_attempt() {
    let addresses = vec![refused_address().await, refused_address().await, refused_address().await];
    let scheduler = TestScheduler::start(&addresses, true);

    let (_client, done) = scheduler.connect().await;
    assert!(matches!(
        outcome(done).await,
        Err(ScheduleError::AllBackendsUnreachable { attempts: 3 })
    ));
    assert!(scheduler.health().await.iter().all(|h| *h == HealthState::Down));

    let status = scheduler.handle.backend_status().await.unwrap();
    assert!(status.iter().all(|s| s.ongoing == 0));
}

#[tokio::test]
async fn snapshot_revives_a_marked_down_backend() {
    let dead = refused_address().await;
    let scheduler = TestScheduler::start(&[dead.clone()], false);

    let (_client, done) = scheduler.connect().await;
    assert!(outcome(done).await.is_err());
    assert_eq!(scheduler.health().await, vec![HealthState::Down]);

    scheduler.apply(&[(&dead, HealthState::Up)]).await;
    assert_eq!(scheduler.health().await, vec![HealthState::Up]);

    // Applying the same snapshot again changes nothing.
    let before = scheduler.handle.backend_status().await.unwrap();
    scheduler.apply(&[(&dead, HealthState::Up)]).await;
    assert_eq!(scheduler.handle.backend_status().await.unwrap(), before);
}

#[tokio::test]
async fn bytes_are_accounted_per_direction() {
    let backend = start_tagged_echo_backend(b'a').await;
    let scheduler = TestScheduler::start(&[backend.address.clone()], false);

    let payload = vec![42u8; 10_000];
    let (client, done) = scheduler.connect().await;
    round_trip(client, &payload).await;
    let summary = outcome(done).await.unwrap();

    // The backend sent its one-byte tag on top of the echo.
    assert_eq!(summary.traffic.rx_bytes, 10_000);
    assert_eq!(summary.traffic.tx_bytes, 10_001);
    assert_eq!(summary.io_error, None);

    let status = &scheduler.handle.backend_status().await.unwrap()[0];
    assert_eq!((status.rx_bytes, status.tx_bytes), (10_000, 10_001));
}

#[tokio::test]
async fn one_refusing_backend_under_concurrent_load() {
    let a = start_tagged_echo_backend(b'a').await;
    let dead = refused_address().await;
    let c = start_tagged_echo_backend(b'c').await;
    let scheduler = TestScheduler::start(&[a.address.clone(), dead.clone(), c.address.clone()], true);

    let mut sessions = Vec::new();
    for i in 0..10u8 {
        let (client, done) = scheduler.connect().await;
        sessions.push(tokio::spawn(async move {
            let tag = round_trip(client, &[i; 32]).await;
            outcome(done).await.unwrap();
            tag
        }));
    }
    for session in sessions {
        let tag = session.await.unwrap();
        assert!(tag == b'a' || tag == b'c');
    }

    let status = scheduler.handle.backend_status().await.unwrap();
    assert_eq!(status[1].health, HealthState::Down);
    assert!(status.iter().all(|s| s.ongoing == 0), "{status:?}");
    assert_eq!(a.accepted() + c.accepted(), 10);
}

#[tokio::test]
async fn queued_requests_are_refused_after_shutdown() {
    let backend = start_tagged_echo_backend(b'a').await;
    let scheduler = TestScheduler::start(&[backend.address.clone()], false);
    scheduler.stop();

    tokio::time::timeout(Duration::from_secs(1), async {
        while !scheduler.handle.is_closed() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    assert!(scheduler.handle.backend_status().await.is_err());
}
