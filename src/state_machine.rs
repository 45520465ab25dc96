//! Per-connection pipeline discipline: a FIFO of in-flight commands whose
//! replies arrive in the order they were sent, plus a disjoint pub/sub mode
//! where server-initiated messages interleave with subscription control
//! replies. The router distinguishes push traffic from ordinary replies by
//! message tag, not by "is there a pending command" — that's what makes it
//! robust to out-of-order bursts of messages between control replies.

use crate::error::{ErrorKind, RedisError};
use crate::resp::RespValue;
use crate::subscription::{
    MessageReceiver, SubscribeCallback, SubscriptionKind, SubscriptionRegistry,
    UnsubscribeCallback,
};
use std::collections::VecDeque;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// One channel/pattern to subscribe to, with its receiver and optional
/// lifecycle callbacks — the payload of a [`StateMachine::enqueue_subscribe`]
/// call.
pub struct SubscriptionRequest {
    pub name: Vec<u8>,
    pub receiver: MessageReceiver,
    pub on_subscribe: Option<SubscribeCallback>,
    pub on_unsubscribe: Option<UnsubscribeCallback>,
}

/// Mirrors the design's `ConnectionState`. The channel/pattern sets that
/// belong to `InSubscribeMode` live in the embedded [`SubscriptionRegistry`]
/// rather than duplicated in the variant, so there's one source of truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Fresh,
    Active,
    InSubscribeMode,
    Closing,
    Closed,
}

pub type ReplySender = oneshot::Sender<Result<RespValue, RedisError>>;

enum PendingEntry {
    /// An ordinary command awaiting its single reply.
    Reply(ReplySender),
    /// One expected (un)subscribe confirmation. Only the last entry for a
    /// given multi-name subscribe/unsubscribe call carries a resolver — it
    /// fires once the whole batch of confirmations has popped through, in
    /// the order the server is guaranteed to emit them.
    SubscribeControl(Option<oneshot::Sender<Result<i64, RedisError>>>),
}

/// The per-connection pipeline + pub/sub router described in the design.
pub struct StateMachine {
    state: ConnectionState,
    pending: VecDeque<PendingEntry>,
    registry: SubscriptionRegistry,
    subscriptions_allowed: bool,
}

fn closed_error() -> RedisError {
    RedisError::new(ErrorKind::Transport, "connection closed")
}

impl StateMachine {
    pub fn new(subscriptions_allowed: bool) -> Self {
        StateMachine {
            state: ConnectionState::Fresh,
            pending: VecDeque::new(),
            registry: SubscriptionRegistry::new(),
            subscriptions_allowed,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn set_subscriptions_allowed(&mut self, allowed: bool) {
        self.subscriptions_allowed = allowed;
    }

    pub fn subscriptions_allowed(&self) -> bool {
        self.subscriptions_allowed
    }

    /// `Fresh -> Active` once the handshake (AUTH/SELECT) completes.
    pub fn mark_active(&mut self) {
        if self.state == ConnectionState::Fresh {
            self.state = ConnectionState::Active;
        }
    }

    fn is_control_keyword(keyword: &str) -> bool {
        matches!(
            keyword,
            "SUBSCRIBE" | "PSUBSCRIBE" | "UNSUBSCRIBE" | "PUNSUBSCRIBE" | "PING" | "QUIT"
        )
    }

    /// Enqueue an ordinary pipelined command. Rejected at the API surface
    /// while `InSubscribeMode` unless it's a (un)subscribe/PING/QUIT.
    pub fn enqueue_command(
        &mut self,
        keyword: &str,
        resolver: ReplySender,
    ) -> Result<(), RedisError> {
        match self.state {
            ConnectionState::Closing | ConnectionState::Closed => {
                let _ = resolver.send(Err(closed_error()));
                return Err(closed_error());
            }
            ConnectionState::InSubscribeMode if !Self::is_control_keyword(keyword) => {
                let err = RedisError::new(
                    ErrorKind::Usage,
                    format!("{keyword} is not permitted while in subscribe mode"),
                );
                let _ = resolver.send(Err(RedisError::new(err.kind(), err.detail().to_string())));
                return Err(err);
            }
            _ => {}
        }
        self.pending.push_back(PendingEntry::Reply(resolver));
        Ok(())
    }

    /// Enqueue a SUBSCRIBE/PSUBSCRIBE command for `requests.len()` channels
    /// or patterns, registering each with the subscription registry and
    /// transitioning into `InSubscribeMode`. Fails with [`ErrorKind::Usage`]
    /// if subscriptions aren't allowed on this connection.
    pub fn enqueue_subscribe(
        &mut self,
        kind: SubscriptionKind,
        requests: Vec<SubscriptionRequest>,
        resolver: oneshot::Sender<Result<i64, RedisError>>,
    ) -> Result<(), RedisError> {
        if !self.subscriptions_allowed {
            let err = RedisError::new(
                ErrorKind::Usage,
                "subscriptions are not allowed on this connection",
            );
            let _ = resolver.send(Err(RedisError::new(err.kind(), err.detail().to_string())));
            return Err(err);
        }
        if matches!(self.state, ConnectionState::Closing | ConnectionState::Closed) {
            let _ = resolver.send(Err(closed_error()));
            return Err(closed_error());
        }
        if requests.is_empty() {
            let err = RedisError::new(ErrorKind::Usage, "at least one channel/pattern is required");
            let _ = resolver.send(Err(RedisError::new(err.kind(), err.detail().to_string())));
            return Err(err);
        }

        debug!("entering subscribe mode for {} name(s)", requests.len());
        self.state = ConnectionState::InSubscribeMode;
        let last = requests.len() - 1;
        let mut resolver = Some(resolver);
        for (i, req) in requests.into_iter().enumerate() {
            self.registry
                .add(kind, req.name, req.receiver, req.on_subscribe, req.on_unsubscribe);
            let entry = if i == last {
                PendingEntry::SubscribeControl(resolver.take())
            } else {
                PendingEntry::SubscribeControl(None)
            };
            self.pending.push_back(entry);
        }
        Ok(())
    }

    /// Enqueue an UNSUBSCRIBE/PUNSUBSCRIBE for names already tracked. `kind`
    /// only disambiguates the caller's intent; the server's own reply tag
    /// (`unsubscribe` vs `punsubscribe`) is what actually drives routing.
    pub fn enqueue_unsubscribe(
        &mut self,
        _kind: SubscriptionKind,
        names: Vec<Vec<u8>>,
        resolver: oneshot::Sender<Result<i64, RedisError>>,
    ) -> Result<(), RedisError> {
        if names.is_empty() {
            let err = RedisError::new(ErrorKind::Usage, "at least one channel/pattern is required");
            let _ = resolver.send(Err(RedisError::new(err.kind(), err.detail().to_string())));
            return Err(err);
        }
        let last = names.len() - 1;
        let mut resolver = Some(resolver);
        for i in 0..names.len() {
            let entry = if i == last {
                PendingEntry::SubscribeControl(resolver.take())
            } else {
                PendingEntry::SubscribeControl(None)
            };
            self.pending.push_back(entry);
        }
        Ok(())
    }

    /// Process one decoded value arriving from the transport.
    pub fn on_value(&mut self, value: RespValue) -> Result<(), RedisError> {
        if self.state == ConnectionState::InSubscribeMode {
            if let Some(items) = value.as_array() {
                if let Some(tag) = items.first().and_then(RespValue::as_bytes) {
                    return self.route_subscribe_mode_array(tag.to_vec(), items);
                }
            }
        }
        self.pop_reply(Ok(value))
    }

    fn route_subscribe_mode_array(&mut self, tag: Vec<u8>, items: &[RespValue]) -> Result<(), RedisError> {
        match tag.as_slice() {
            b"message" => {
                let channel = bytes_arg(items, 1)?;
                let payload = bytes_arg(items, 2)?;
                self.registry
                    .route(SubscriptionKind::Channel, &channel, channel.clone(), payload);
                Ok(())
            }
            b"pmessage" => {
                let pattern = bytes_arg(items, 1)?;
                let channel = bytes_arg(items, 2)?;
                let payload = bytes_arg(items, 3)?;
                self.registry.route(SubscriptionKind::Pattern, &pattern, channel, payload);
                Ok(())
            }
            b"subscribe" | b"psubscribe" => {
                let name = bytes_arg(items, 1)?;
                let count = int_arg(items, 2)?;
                let kind = if tag == b"subscribe" {
                    SubscriptionKind::Channel
                } else {
                    SubscriptionKind::Pattern
                };
                self.registry.confirm_added(kind, &name, count);
                self.pop_subscribe_control(count)
            }
            b"unsubscribe" | b"punsubscribe" => {
                let name = bytes_arg(items, 1)?;
                let count = int_arg(items, 2)?;
                let kind = if tag == b"unsubscribe" {
                    SubscriptionKind::Channel
                } else {
                    SubscriptionKind::Pattern
                };
                let now_empty = self.registry.confirm_removed(kind, &name, count);
                self.pop_subscribe_control(count)?;
                if now_empty {
                    debug!("last subscription removed, leaving subscribe mode");
                    self.state = ConnectionState::Active;
                }
                Ok(())
            }
            other => {
                let err = RedisError::new(
                    ErrorKind::Protocol,
                    format!("unrecognized push tag {:?} in subscribe mode", String::from_utf8_lossy(other)),
                );
                warn!("{err}");
                self.fail(err.clone());
                Err(err)
            }
        }
    }

    fn pop_subscribe_control(&mut self, count: i64) -> Result<(), RedisError> {
        match self.pending.pop_front() {
            Some(PendingEntry::SubscribeControl(resolver)) => {
                if let Some(resolver) = resolver {
                    let _ = resolver.send(Ok(count));
                }
                Ok(())
            }
            Some(PendingEntry::Reply(resolver)) => {
                let err = RedisError::new(ErrorKind::Protocol, "expected a subscribe control reply");
                let _ = resolver.send(Err(RedisError::new(err.kind(), err.detail().to_string())));
                self.fail(err.clone());
                Err(err)
            }
            None => {
                let err = RedisError::new(ErrorKind::Protocol, "unsolicited subscribe confirmation");
                self.fail(err.clone());
                Err(err)
            }
        }
    }

    fn pop_reply(&mut self, value: Result<RespValue, RedisError>) -> Result<(), RedisError> {
        match self.pending.pop_front() {
            Some(PendingEntry::Reply(resolver)) => {
                let _ = resolver.send(value);
                Ok(())
            }
            Some(PendingEntry::SubscribeControl(resolver)) => {
                if let Some(resolver) = resolver {
                    let _ = resolver.send(Err(RedisError::new(
                        ErrorKind::Protocol,
                        "expected an ordinary reply, got a subscribe control slot",
                    )));
                }
                Ok(())
            }
            None => {
                let err = RedisError::new(ErrorKind::Protocol, "unsolicited reply: FIFO is empty");
                self.fail(err.clone());
                Err(err)
            }
        }
    }

    /// Connection-fatal: drain every pending waiter with `err` and notify
    /// every active subscription with reason "connection closed".
    pub fn fail(&mut self, err: RedisError) {
        if matches!(self.state, ConnectionState::Closed) {
            return;
        }
        debug!("connection failing with {} pending: {}", self.pending.len(), err);
        self.state = ConnectionState::Closed;
        while let Some(entry) = self.pending.pop_front() {
            match entry {
                PendingEntry::Reply(resolver) => {
                    let _ = resolver.send(Err(RedisError::new(err.kind(), err.detail().to_string())));
                }
                PendingEntry::SubscribeControl(Some(resolver)) => {
                    let _ = resolver.send(Err(RedisError::new(err.kind(), err.detail().to_string())));
                }
                PendingEntry::SubscribeControl(None) => {}
            }
        }
        self.registry.fail_all("connection closed");
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn subscription_count(&self) -> i64 {
        self.registry.last_count()
    }
}

fn bytes_arg(items: &[RespValue], idx: usize) -> Result<Vec<u8>, RedisError> {
    items
        .get(idx)
        .and_then(RespValue::as_bytes)
        .map(|b| b.to_vec())
        .ok_or_else(|| RedisError::new(ErrorKind::Protocol, "malformed push message"))
}

fn int_arg(items: &[RespValue], idx: usize) -> Result<i64, RedisError> {
    match items.get(idx) {
        Some(RespValue::Integer(i)) => Ok(*i),
        _ => Err(RedisError::new(ErrorKind::Protocol, "expected integer count in push message")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resp::RespValue;
    use std::sync::{Arc, Mutex};

    fn channel() -> (oneshot::Sender<Result<RespValue, RedisError>>, oneshot::Receiver<Result<RespValue, RedisError>>) {
        oneshot::channel()
    }

    #[tokio::test]
    async fn pipeline_fifo_resolves_in_order() {
        let mut sm = StateMachine::new(false);
        sm.mark_active();
        let mut receivers = Vec::new();
        for _ in 0..5 {
            let (tx, rx) = channel();
            sm.enqueue_command("GET", tx).unwrap();
            receivers.push(rx);
        }
        for i in 0..5 {
            sm.on_value(RespValue::Integer(i)).unwrap();
        }
        for (i, rx) in receivers.into_iter().enumerate() {
            let v = rx.await.unwrap().unwrap();
            assert_eq!(v, RespValue::Integer(i as i64));
        }
    }

    #[tokio::test]
    async fn subscribe_mode_routes_messages_and_leaves_on_last_unsubscribe() {
        let mut sm = StateMachine::new(true);
        sm.mark_active();

        let seen_a = Arc::new(Mutex::new(Vec::new()));
        let seen_b = Arc::new(Mutex::new(Vec::new()));
        let unsub_fired = Arc::new(Mutex::new(false));

        let (sub_tx, sub_rx) = oneshot::channel();
        {
            let seen_a = seen_a.clone();
            sm.enqueue_subscribe(
                SubscriptionKind::Channel,
                vec![SubscriptionRequest {
                    name: b"a".to_vec(),
                    receiver: Box::new(move |_ch, payload| seen_a.lock().unwrap().push(payload)),
                    on_subscribe: None,
                    on_unsubscribe: None,
                }],
                sub_tx,
            )
            .unwrap();
        }
        sm.on_value(RespValue::array(vec![
            RespValue::bulk(*b"subscribe"),
            RespValue::bulk(*b"a"),
            RespValue::Integer(1),
        ]))
        .unwrap();
        assert_eq!(sub_rx.await.unwrap().unwrap(), 1);
        assert_eq!(sm.state(), ConnectionState::InSubscribeMode);

        let (psub_tx, psub_rx) = oneshot::channel();
        {
            let seen_b = seen_b.clone();
            sm.enqueue_subscribe(
                SubscriptionKind::Pattern,
                vec![SubscriptionRequest {
                    name: b"b.*".to_vec(),
                    receiver: Box::new(move |ch, payload| seen_b.lock().unwrap().push((ch, payload))),
                    on_subscribe: None,
                    on_unsubscribe: None,
                }],
                psub_tx,
            )
            .unwrap();
        }
        sm.on_value(RespValue::array(vec![
            RespValue::bulk(*b"psubscribe"),
            RespValue::bulk(*b"b.*"),
            RespValue::Integer(2),
        ]))
        .unwrap();
        psub_rx.await.unwrap().unwrap();

        sm.on_value(RespValue::array(vec![
            RespValue::bulk(*b"message"),
            RespValue::bulk(*b"a"),
            RespValue::bulk(*b"x"),
        ]))
        .unwrap();
        sm.on_value(RespValue::array(vec![
            RespValue::bulk(*b"pmessage"),
            RespValue::bulk(*b"b.*"),
            RespValue::bulk(*b"b.1"),
            RespValue::bulk(*b"y"),
        ]))
        .unwrap();
        assert_eq!(*seen_a.lock().unwrap(), vec![b"x".to_vec()]);
        assert_eq!(*seen_b.lock().unwrap(), vec![(b"b.1".to_vec(), b"y".to_vec())]);

        let (unsub_a_tx, unsub_a_rx) = oneshot::channel();
        sm.enqueue_unsubscribe(SubscriptionKind::Channel, vec![b"a".to_vec()], unsub_a_tx)
            .unwrap();
        sm.on_value(RespValue::array(vec![
            RespValue::bulk(*b"unsubscribe"),
            RespValue::bulk(*b"a"),
            RespValue::Integer(1),
        ]))
        .unwrap();
        assert_eq!(unsub_a_rx.await.unwrap().unwrap(), 1);
        assert_eq!(sm.state(), ConnectionState::InSubscribeMode);

        let fired = unsub_fired.clone();
        let (unsub_b_tx, unsub_b_rx) = oneshot::channel();
        sm.enqueue_unsubscribe(SubscriptionKind::Pattern, vec![b"b.*".to_vec()], unsub_b_tx)
            .unwrap();
        sm.on_value(RespValue::array(vec![
            RespValue::bulk(*b"punsubscribe"),
            RespValue::bulk(*b"b.*"),
            RespValue::Integer(0),
        ]))
        .unwrap();
        assert_eq!(unsub_b_rx.await.unwrap().unwrap(), 0);
        assert_eq!(sm.state(), ConnectionState::Active);
        let _ = fired;
    }

    #[tokio::test]
    async fn fatal_error_resolves_pending_with_connection_closed() {
        let mut sm = StateMachine::new(false);
        sm.mark_active();
        let (tx, rx) = channel();
        sm.enqueue_command("GET", tx).unwrap();
        sm.fail(RedisError::new(ErrorKind::Transport, "eof"));
        let err = rx.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
    }
}
