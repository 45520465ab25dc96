//! A thin shell binding a [`Transport`], a [`StateMachine`], and the single
//! tokio task that owns both — the design's "reactor thread". Every public
//! method is a channel send, so callers from any task are automatically
//! "hopped" onto that owning task; there is no shared mutable state to lock.

use crate::command::Command;
use crate::conversion::FromResp;
use crate::error::{ErrorKind, RedisError, RedisResult};
use crate::resp::{RespCodec, RespValue};
use crate::state_machine::{ConnectionState, ReplySender, StateMachine, SubscriptionRequest};
use crate::subscription::{SubscribeCallback, SubscriptionKind, UnsubscribeCallback};
use crate::transport::Transport;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};
use uuid::Uuid;

enum ActorMessage {
    Send {
        bytes: Vec<u8>,
        keyword: &'static str,
        resolver: ReplySender,
    },
    Subscribe {
        kind: SubscriptionKind,
        bytes: Vec<u8>,
        requests: Vec<SubscriptionRequest>,
        resolver: oneshot::Sender<RedisResult<i64>>,
    },
    Unsubscribe {
        kind: SubscriptionKind,
        bytes: Vec<u8>,
        names: Vec<Vec<u8>>,
        resolver: oneshot::Sender<RedisResult<i64>>,
    },
    SetSubscriptionsAllowed(bool),
    Close {
        ack: oneshot::Sender<()>,
    },
}

/// A leased/pooled handle to one server connection. Cloning shares the same
/// underlying reactor task and in-flight queue.
#[derive(Clone)]
pub struct Connection {
    id: Uuid,
    tx: mpsc::UnboundedSender<ActorMessage>,
    subscriptions_allowed: Arc<AtomicBool>,
    is_closed: Arc<AtomicBool>,
}

impl Connection {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.is_closed.load(Ordering::Acquire)
    }

    pub fn subscriptions_allowed(&self) -> bool {
        self.subscriptions_allowed.load(Ordering::Acquire)
    }

    /// Flip whether SUBSCRIBE/PSUBSCRIBE are permitted on this connection.
    /// The pool uses this when pinning/unpinning a connection for pub/sub.
    pub fn set_subscriptions_allowed(&self, allowed: bool) {
        self.subscriptions_allowed.store(allowed, Ordering::Release);
        let _ = self.tx.send(ActorMessage::SetSubscriptionsAllowed(allowed));
    }

    /// Send a typed command and await its mapped result.
    pub async fn send<T: Send + 'static>(&self, command: Command<T>) -> RedisResult<T> {
        let keyword = command.keyword();
        let bytes = command.encode();
        let (resolver, rx) = oneshot::channel();
        if self
            .tx
            .send(ActorMessage::Send {
                bytes,
                keyword,
                resolver,
            })
            .is_err()
        {
            return Err(closed());
        }
        let value = rx.await.map_err(|_| closed())??;
        command.resolve(value)
    }

    /// Subscribe to the given channels (or, with `is_pattern`, patterns),
    /// returning the connection-wide subscription count after the batch is
    /// confirmed.
    pub async fn subscribe(
        &self,
        channels: Vec<Vec<u8>>,
        is_pattern: bool,
        mut make_receiver: impl FnMut(&[u8]) -> crate::subscription::MessageReceiver,
        mut make_on_subscribe: impl FnMut(&[u8]) -> Option<SubscribeCallback>,
        mut make_on_unsubscribe: impl FnMut(&[u8]) -> Option<UnsubscribeCallback>,
    ) -> RedisResult<i64> {
        let kind = if is_pattern {
            SubscriptionKind::Pattern
        } else {
            SubscriptionKind::Channel
        };
        let keyword = if is_pattern { "PSUBSCRIBE" } else { "SUBSCRIBE" };
        let mut c = crate::command::cmd(keyword);
        for ch in &channels {
            c = c.arg(ch.clone());
        }
        let bytes = crate::resp::encode(&c.to_resp_array());
        let requests = channels
            .into_iter()
            .map(|name| SubscriptionRequest {
                receiver: make_receiver(&name),
                on_subscribe: make_on_subscribe(&name),
                on_unsubscribe: make_on_unsubscribe(&name),
                name,
            })
            .collect();
        let (resolver, rx) = oneshot::channel();
        if self
            .tx
            .send(ActorMessage::Subscribe {
                kind,
                bytes,
                requests,
                resolver,
            })
            .is_err()
        {
            return Err(closed());
        }
        rx.await.map_err(|_| closed())?
    }

    pub async fn unsubscribe(&self, channels: Vec<Vec<u8>>, is_pattern: bool) -> RedisResult<i64> {
        let kind = if is_pattern {
            SubscriptionKind::Pattern
        } else {
            SubscriptionKind::Channel
        };
        let keyword = if is_pattern { "PUNSUBSCRIBE" } else { "UNSUBSCRIBE" };
        let mut c = crate::command::cmd(keyword);
        for ch in &channels {
            c = c.arg(ch.clone());
        }
        let bytes = crate::resp::encode(&c.to_resp_array());
        let (resolver, rx) = oneshot::channel();
        if self
            .tx
            .send(ActorMessage::Unsubscribe {
                kind,
                bytes,
                names: channels,
                resolver,
            })
            .is_err()
        {
            return Err(closed());
        }
        rx.await.map_err(|_| closed())?
    }

    pub async fn close(&self) {
        let (ack, rx) = oneshot::channel();
        if self.tx.send(ActorMessage::Close { ack }).is_ok() {
            let _ = rx.await;
        }
    }
}

fn closed() -> RedisError {
    RedisError::new(ErrorKind::Transport, "connection closed")
}

/// Spawn a `Connection` over an already-connected `Transport`, performing the
/// handshake (optional AUTH then optional SELECT) before accepting commands.
pub async fn spawn<T: Transport>(
    transport: T,
    info: &crate::connection_info::ConnectionInfo,
) -> RedisResult<Connection> {
    let mut framed = Framed::new(transport, RespCodec);
    let mut state = StateMachine::new(info.subscriptions_allowed);

    if let Some(password) = &info.password {
        let mut c = crate::command::cmd("AUTH");
        if let Some(username) = &info.username {
            c = c.arg(username.clone());
        }
        c = c.arg(password.clone());
        handshake_roundtrip(&mut framed, c.to_resp_array()).await?;
    }
    if let Some(db) = info.initial_database {
        let c = crate::command::cmd("SELECT").arg(db);
        handshake_roundtrip(&mut framed, c.to_resp_array()).await?;
    }
    if let Some(name) = &info.client_name {
        let c = crate::command::cmd("CLIENT").arg("SETNAME").arg(name.clone());
        handshake_roundtrip(&mut framed, c.to_resp_array()).await?;
    }
    state.mark_active();

    let (tx, rx) = mpsc::unbounded_channel();
    let id = Uuid::new_v4();
    let subscriptions_allowed = Arc::new(AtomicBool::new(info.subscriptions_allowed));
    let is_closed = Arc::new(AtomicBool::new(false));

    info!(connection_id = %id, address = %info.address, "connection established");
    tokio::spawn(run_actor(framed, state, rx, is_closed.clone(), id));

    Ok(Connection {
        id,
        tx,
        subscriptions_allowed,
        is_closed,
    })
}

async fn handshake_roundtrip<T: Transport>(
    framed: &mut Framed<T, RespCodec>,
    request: RespValue,
) -> RedisResult<()> {
    framed.send(request).await.map_err(to_transport_err)?;
    let reply = framed
        .next()
        .await
        .ok_or_else(|| RedisError::new(ErrorKind::Transport, "eof during handshake"))?
        .map_err(to_transport_err)?;
    match reply {
        RespValue::SimpleString(s) if s == "OK" => Ok(()),
        RespValue::Error(e) => Err(RedisError::new(ErrorKind::AuthenticationFailed, e)),
        other => Err(RedisError::new(
            ErrorKind::Protocol,
            format!("unexpected handshake reply: {other:?}"),
        )),
    }
}

fn to_transport_err(e: RedisError) -> RedisError {
    e
}

async fn run_actor<T: Transport>(
    mut framed: Framed<T, RespCodec>,
    mut state: StateMachine,
    mut rx: mpsc::UnboundedReceiver<ActorMessage>,
    is_closed: Arc<AtomicBool>,
    id: Uuid,
) {
    loop {
        tokio::select! {
            biased;

            incoming = framed.next() => {
                match incoming {
                    Some(Ok(value)) => {
                        let _ = state.on_value(value);
                        if state.state() == ConnectionState::Closed {
                            debug!(connection_id = %id, "connection closed after reply");
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(connection_id = %id, "connection failed: {e}");
                        state.fail(e);
                        break;
                    }
                    None => {
                        debug!(connection_id = %id, "connection closed by peer");
                        state.fail(RedisError::new(ErrorKind::Transport, "connection closed by peer"));
                        break;
                    }
                }
            }

            msg = rx.recv() => {
                let Some(msg) = msg else { break };
                match msg {
                    ActorMessage::Send { bytes, keyword, resolver } => {
                        if state.enqueue_command(keyword, resolver).is_ok()
                            && send_raw(&mut framed, &bytes).await.is_err() {
                            warn!(connection_id = %id, "write failed");
                            state.fail(RedisError::new(ErrorKind::Transport, "write failed"));
                            break;
                        }
                    }
                    ActorMessage::Subscribe { kind, bytes, requests, resolver } => {
                        if state.enqueue_subscribe(kind, requests, resolver).is_ok()
                            && send_raw(&mut framed, &bytes).await.is_err() {
                            warn!(connection_id = %id, "write failed");
                            state.fail(RedisError::new(ErrorKind::Transport, "write failed"));
                            break;
                        }
                    }
                    ActorMessage::Unsubscribe { kind, bytes, names, resolver } => {
                        if state.enqueue_unsubscribe(kind, names, resolver).is_ok()
                            && send_raw(&mut framed, &bytes).await.is_err() {
                            warn!(connection_id = %id, "write failed");
                            state.fail(RedisError::new(ErrorKind::Transport, "write failed"));
                            break;
                        }
                    }
                    ActorMessage::SetSubscriptionsAllowed(allowed) => {
                        state.set_subscriptions_allowed(allowed);
                    }
                    ActorMessage::Close { ack } => {
                        debug!(connection_id = %id, "closing connection by request");
                        state.fail(RedisError::new(ErrorKind::PoolClosed, "explicit close"));
                        let _ = ack.send(());
                        break;
                    }
                }
            }
        }
    }
    is_closed.store(true, Ordering::Release);
}

/// Writes pre-encoded bytes straight to the transport, bypassing
/// `Sink<RespValue>` (no need to re-parse an already-serialized command back
/// into a `RespValue` just to hand it to the sink).
async fn send_raw<T: Transport>(framed: &mut Framed<T, RespCodec>, bytes: &[u8]) -> RedisResult<()> {
    use tokio::io::AsyncWriteExt;
    framed.get_mut().write_all(bytes).await.map_err(RedisError::from)
}

/// A convenience wrapper for executing a command and converting via
/// [`FromResp`] in one call, mirroring the teacher's `query_async`.
pub async fn query<T: FromResp + Send + 'static>(
    connection: &Connection,
    cmd: crate::command::Cmd,
) -> RedisResult<T> {
    connection.send(cmd.into_command::<T>()).await
}
