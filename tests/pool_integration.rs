mod support;

use resp_pool::command::cmd;
use resp_pool::connection_info::ConnectionInfo;
use resp_pool::pool::{CapPolicy, Pool, PoolConfig};
use support::spawn_fake_server;

#[tokio::test]
async fn round_robins_across_configured_addresses() {
    let a = spawn_fake_server().await;
    let b = spawn_fake_server().await;
    let pool = Pool::connect(vec![a.clone(), b.clone()], ConnectionInfo::new(&a), PoolConfig::default())
        .await
        .unwrap();

    let mut seen = Vec::new();
    for _ in 0..4 {
        let lease = pool.lease().await.unwrap();
        let pong: String = lease
            .send(cmd("PING").into_command_with(|v| match v {
                resp_pool::RespValue::SimpleString(s) => Ok(s),
                other => Err(resp_pool::RedisError::new(
                    resp_pool::ErrorKind::Protocol,
                    format!("unexpected {other:?}"),
                )),
            }))
            .await
            .unwrap();
        seen.push(pong);
    }
    assert_eq!(seen, vec!["PONG"; 4]);
}

#[tokio::test]
async fn hard_cap_queues_past_lease_queue_bound() {
    let addr = spawn_fake_server().await;
    let config = PoolConfig {
        cap_policy: CapPolicy::Hard { max: 1 },
        max_pending_leases: 0,
        ..PoolConfig::default()
    };
    let pool = Pool::connect(vec![addr.clone()], ConnectionInfo::new(&addr), config).await.unwrap();

    let first = pool.lease().await.unwrap();
    let err = pool.lease().await.unwrap_err();
    assert_eq!(err.kind(), resp_pool::ErrorKind::LeaseQueueFull);
    drop(first);
}

#[tokio::test]
async fn returning_a_lease_resolves_a_suspended_second_lease_with_the_same_connection() {
    let addr = spawn_fake_server().await;
    let config = PoolConfig {
        cap_policy: CapPolicy::Hard { max: 1 },
        ..PoolConfig::default()
    };
    let pool = Pool::connect(vec![addr.clone()], ConnectionInfo::new(&addr), config).await.unwrap();

    let first = pool.lease().await.unwrap();
    let first_id = first.id();

    let pool2 = pool.clone();
    let second = tokio::spawn(async move { pool2.lease().await.unwrap() });
    // Give the spawned lease a chance to queue on the idle channel before we return `first`.
    tokio::task::yield_now().await;
    drop(first);

    let second = second.await.unwrap();
    assert_eq!(second.id(), first_id);
}

#[tokio::test]
async fn min_count_creates_connections_round_robin_across_addresses() {
    let a = spawn_fake_server().await;
    let b = spawn_fake_server().await;
    let c = spawn_fake_server().await;
    let config = PoolConfig {
        cap_policy: CapPolicy::Hard { max: 3 },
        min_count: 3,
        ..PoolConfig::default()
    };
    let pool = Pool::connect(vec![a, b, c], ConnectionInfo::new("unused"), config)
        .await
        .unwrap();

    // All three connections are already idle; three leases in a row must not
    // need to dial out (each resolves instantly from the idle set).
    let leases: Vec<_> = futures_util::future::join_all((0..3).map(|_| pool.lease())).await;
    for lease in leases {
        lease.unwrap();
    }
}

#[tokio::test]
async fn lease_buffers_until_addresses_are_supplied_then_fails_past_the_bound() {
    let config = PoolConfig {
        max_pending_leases: 1,
        ..PoolConfig::default()
    };
    let pool = Pool::connect(Vec::new(), ConnectionInfo::new("unused"), config)
        .await
        .unwrap();

    let waiting = tokio::spawn({
        let pool = pool.clone();
        async move { pool.lease().await }
    });
    tokio::task::yield_now().await;

    let overflow = pool.lease().await.unwrap_err();
    assert_eq!(overflow.kind(), resp_pool::ErrorKind::NoAvailableConnectionTarget);

    let addr = spawn_fake_server().await;
    pool.update_addresses(vec![addr]);

    let leased = waiting.await.unwrap().unwrap();
    assert!(!leased.is_closed());
}

#[tokio::test]
async fn closing_pool_rejects_further_leases() {
    let addr = spawn_fake_server().await;
    let pool = Pool::connect(vec![addr.clone()], ConnectionInfo::new(&addr), PoolConfig::default())
        .await
        .unwrap();
    pool.close().await;
    let err = pool.lease().await.unwrap_err();
    assert_eq!(err.kind(), resp_pool::ErrorKind::PoolClosed);
}
