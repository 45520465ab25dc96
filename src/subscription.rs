//! Tracks active channel/pattern subscriptions for one connection and routes
//! incoming pub/sub traffic to the right receiver.

use std::collections::HashMap;

/// Channel vs. glob-pattern subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    Channel,
    Pattern,
}

/// Invoked once per `message`/`pmessage` delivered for this subscription.
/// For a pattern subscription, `channel` is the concrete channel the message
/// arrived on; for a channel subscription it equals the subscribed name.
pub type MessageReceiver = Box<dyn FnMut(Vec<u8> /* channel */, Vec<u8> /* payload */) + Send>;
/// Invoked once per `subscribe`/`psubscribe` confirmation, with the
/// connection-wide subscription count after this subscription was added.
pub type SubscribeCallback = Box<dyn FnMut(i64) + Send>;
/// Invoked once per `unsubscribe`/`punsubscribe` confirmation (or on
/// connection-fatal cleanup, with `reason` set), with the connection-wide
/// count after this subscription was removed.
pub type UnsubscribeCallback = Box<dyn FnMut(i64, &str) + Send>;

pub struct Subscription {
    pub kind: SubscriptionKind,
    pub name: Vec<u8>,
    message_receiver: MessageReceiver,
    on_subscribe: Option<SubscribeCallback>,
    on_unsubscribe: Option<UnsubscribeCallback>,
}

/// Maps channel names and pattern globs to subscription records, and tracks
/// the server-reported subscription count used to detect the "last
/// unsubscribe" transition back out of subscribe mode.
#[derive(Default)]
pub struct SubscriptionRegistry {
    channels: HashMap<Vec<u8>, Subscription>,
    patterns: HashMap<Vec<u8>, Subscription>,
    last_count: i64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn table_mut(&mut self, kind: SubscriptionKind) -> &mut HashMap<Vec<u8>, Subscription> {
        match kind {
            SubscriptionKind::Channel => &mut self.channels,
            SubscriptionKind::Pattern => &mut self.patterns,
        }
    }

    fn table(&self, kind: SubscriptionKind) -> &HashMap<Vec<u8>, Subscription> {
        match kind {
            SubscriptionKind::Channel => &self.channels,
            SubscriptionKind::Pattern => &self.patterns,
        }
    }

    pub fn add(
        &mut self,
        kind: SubscriptionKind,
        name: Vec<u8>,
        message_receiver: MessageReceiver,
        on_subscribe: Option<SubscribeCallback>,
        on_unsubscribe: Option<UnsubscribeCallback>,
    ) {
        self.table_mut(kind).insert(
            name.clone(),
            Subscription {
                kind,
                name,
                message_receiver,
                on_subscribe,
                on_unsubscribe,
            },
        );
    }

    /// Marks a subscription as pending removal; the record stays until the
    /// server confirms via [`Self::confirm_removed`] so in-flight messages
    /// arriving before the confirmation can still be routed.
    pub fn contains(&self, kind: SubscriptionKind, name: &[u8]) -> bool {
        self.table(kind).contains_key(name)
    }

    /// Route a `message`/`pmessage` push: `name_or_pattern` identifies the
    /// subscription record, `channel` is the concrete origin channel.
    pub fn route(&mut self, kind: SubscriptionKind, name_or_pattern: &[u8], channel: Vec<u8>, payload: Vec<u8>) {
        if let Some(sub) = self.table_mut(kind).get_mut(name_or_pattern) {
            (sub.message_receiver)(channel, payload);
        }
    }

    /// Apply a `subscribe`/`psubscribe` confirmation: record the new global
    /// count and fire the subscribe callback.
    pub fn confirm_added(&mut self, kind: SubscriptionKind, name: &[u8], count: i64) {
        self.last_count = count;
        if let Some(sub) = self.table_mut(kind).get_mut(name) {
            if let Some(cb) = sub.on_subscribe.as_mut() {
                cb(count);
            }
        }
    }

    /// Apply an `unsubscribe`/`punsubscribe` confirmation: fire the
    /// unsubscribe callback, record the new global count, and drop the
    /// record. Returns `true` if this was the last subscription (both sets
    /// now empty), the signal to leave subscribe mode.
    pub fn confirm_removed(&mut self, kind: SubscriptionKind, name: &[u8], count: i64) -> bool {
        self.last_count = count;
        if let Some(mut sub) = self.table_mut(kind).remove(name) {
            if let Some(cb) = sub.on_unsubscribe.as_mut() {
                cb(count, "unsubscribed");
            }
        }
        self.is_empty()
    }

    /// Fatal-connection cleanup: every remaining subscription is notified
    /// with reason "connection closed" and the registry is emptied.
    pub fn fail_all(&mut self, reason: &str) {
        for (_, mut sub) in self.channels.drain() {
            if let Some(cb) = sub.on_unsubscribe.as_mut() {
                cb(0, reason);
            }
        }
        for (_, mut sub) in self.patterns.drain() {
            if let Some(cb) = sub.on_unsubscribe.as_mut() {
                cb(0, reason);
            }
        }
        self.last_count = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty() && self.patterns.is_empty()
    }

    pub fn last_count(&self) -> i64 {
        self.last_count
    }

    pub fn channel_names(&self) -> impl Iterator<Item = &Vec<u8>> {
        self.channels.keys()
    }

    pub fn pattern_names(&self) -> impl Iterator<Item = &Vec<u8>> {
        self.patterns.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn routes_message_and_pmessage_independently() {
        let mut reg = SubscriptionRegistry::new();
        let received_a = Arc::new(Mutex::new(Vec::new()));
        let received_b = Arc::new(Mutex::new(Vec::new()));

        let ra = received_a.clone();
        reg.add(
            SubscriptionKind::Channel,
            b"a".to_vec(),
            Box::new(move |channel, payload| ra.lock().unwrap().push((channel, payload))),
            None,
            None,
        );
        let rb = received_b.clone();
        reg.add(
            SubscriptionKind::Pattern,
            b"b.*".to_vec(),
            Box::new(move |channel, payload| rb.lock().unwrap().push((channel, payload))),
            None,
            None,
        );

        reg.route(SubscriptionKind::Channel, b"a", b"a".to_vec(), b"x".to_vec());
        reg.route(SubscriptionKind::Pattern, b"b.*", b"b.1".to_vec(), b"y".to_vec());

        assert_eq!(*received_a.lock().unwrap(), vec![(b"a".to_vec(), b"x".to_vec())]);
        assert_eq!(*received_b.lock().unwrap(), vec![(b"b.1".to_vec(), b"y".to_vec())]);
    }

    #[test]
    fn last_unsubscribe_reports_empty() {
        let mut reg = SubscriptionRegistry::new();
        reg.add(SubscriptionKind::Channel, b"x".to_vec(), Box::new(|_, _| {}), None, None);
        reg.add(SubscriptionKind::Channel, b"y".to_vec(), Box::new(|_, _| {}), None, None);

        assert!(!reg.confirm_removed(SubscriptionKind::Channel, b"x", 1));
        assert!(reg.confirm_removed(SubscriptionKind::Channel, b"y", 0));
        assert!(reg.is_empty());
    }
}
