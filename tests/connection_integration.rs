mod support;

use resp_pool::command::cmd;
use resp_pool::connection;
use resp_pool::connection_info::ConnectionInfo;
use resp_pool::transport::connect_tcp;
use std::sync::{Arc, Mutex};
use support::spawn_fake_server;

#[tokio::test]
async fn pipelined_gets_resolve_to_their_own_key() {
    let addr = spawn_fake_server().await;
    let stream = connect_tcp(&addr).await.unwrap();
    let info = ConnectionInfo::new(&addr);
    let connection = connection::spawn(stream, &info).await.unwrap();

    let replies = futures_util::future::join_all((0..10).map(|i| {
        let connection = connection.clone();
        async move {
            let key = format!("key-{i}");
            let value: String = connection.send(cmd("GET").arg(key.clone()).into_command()).await.unwrap();
            (key, value)
        }
    }))
    .await;

    for (key, value) in replies {
        assert_eq!(key, value);
    }
}

#[tokio::test]
async fn subscribe_receives_messages_and_unsubscribe_leaves_subscribe_mode() {
    let addr = spawn_fake_server().await;
    let stream = connect_tcp(&addr).await.unwrap();
    let mut info = ConnectionInfo::new(&addr);
    info.subscriptions_allowed = true;
    let connection = connection::spawn(stream, &info).await.unwrap();

    let subscribe_counts = Arc::new(Mutex::new(Vec::new()));
    let counts = subscribe_counts.clone();
    let count = connection
        .subscribe(
            vec![b"news".to_vec()],
            false,
            |_name| Box::new(move |_channel, _payload| {}),
            move |_name| {
                let counts = counts.clone();
                Some(Box::new(move |n| counts.lock().unwrap().push(n)))
            },
            |_name| None,
        )
        .await
        .unwrap();
    assert_eq!(count, 1);
    assert_eq!(*subscribe_counts.lock().unwrap(), vec![1]);

    let remaining = connection.unsubscribe(vec![b"news".to_vec()], false).await.unwrap();
    assert_eq!(remaining, 0);

    // Subscribe mode has been left; ordinary commands work again.
    let pong: String = connection
        .send(cmd("PING").into_command_with(|v| match v {
            resp_pool::RespValue::SimpleString(s) => Ok(s),
            other => Err(resp_pool::RedisError::new(
                resp_pool::ErrorKind::Protocol,
                format!("unexpected {other:?}"),
            )),
        }))
        .await
        .unwrap();
    assert_eq!(pong, "PONG");
}

#[tokio::test]
async fn subscriptions_rejected_when_not_allowed() {
    let addr = spawn_fake_server().await;
    let stream = connect_tcp(&addr).await.unwrap();
    let info = ConnectionInfo::new(&addr);
    let connection = connection::spawn(stream, &info).await.unwrap();

    let err = connection
        .subscribe(vec![b"news".to_vec()], false, |_| Box::new(|_, _| {}), |_| None, |_| None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), resp_pool::ErrorKind::Usage);
}
