use crate::{topic_matches, LastWill, Message, MessageBus, Result, Timestamp, TransportError};
use std::collections::VecDeque;
use time::OffsetDateTime;

const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024;

/// A simple in-process broker stand-in. Each bus instance is independent.
///
/// Tests drive it from the outside: [`MockBus::connect`] / [`MockBus::disconnect`]
/// toggle the link, [`MockBus::inject`] queues an inbound message and
/// [`MockBus::take_published`] drains everything the node sent.
#[derive(Debug)]
pub struct MockBus {
    connected: bool,
    sessions: u32,
    max_payload: usize,
    fail_publish: bool,
    subscriptions: Vec<String>,
    inbound: VecDeque<Message>,
    published: Vec<Message>,
    last_will: Option<LastWill>,
}

impl Default for MockBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBus {
    pub fn new() -> Self {
        Self {
            connected: false,
            sessions: 0,
            max_payload: DEFAULT_MAX_PAYLOAD,
            fail_publish: false,
            subscriptions: Vec::new(),
            inbound: VecDeque::new(),
            published: Vec::new(),
            last_will: None,
        }
    }

    pub fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload;
        self
    }

    /// Bring the link up. A new session drops all subscriptions, like a
    /// clean-session broker connect.
    pub fn connect(&mut self) {
        if !self.connected {
            self.connected = true;
            self.sessions += 1;
            self.subscriptions.clear();
            tracing::debug!(session = self.sessions, "mock bus connected");
        }
    }

    /// Drop the link. The last will, if any, is "published" by the broker.
    pub fn disconnect(&mut self) {
        if self.connected {
            self.connected = false;
            if let Some(will) = self.last_will.clone() {
                self.published.push(Message {
                    topic: will.topic,
                    payload: will.payload,
                    retain: will.retain,
                    timestamp: Some(Timestamp(OffsetDateTime::now_utc())),
                });
            }
        }
    }

    /// Make every publish fail with an I/O error until cleared.
    pub fn set_fail_publish(&mut self, fail: bool) {
        self.fail_publish = fail;
    }

    /// Queue an inbound message. It is delivered by the next `service` call if
    /// a matching subscription exists at that point.
    pub fn inject(&mut self, topic: impl Into<String>, payload: impl Into<String>) {
        self.inbound.push_back(Message::new(topic, payload));
    }

    pub fn published(&self) -> &[Message] {
        &self.published
    }

    pub fn take_published(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.published)
    }

    pub fn subscriptions(&self) -> &[String] {
        &self.subscriptions
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.subscriptions.iter().any(|f| topic_matches(f, topic))
    }

    pub fn last_will(&self) -> Option<&LastWill> {
        self.last_will.as_ref()
    }
}

impl MessageBus for MockBus {
    fn is_connected(&self) -> bool {
        self.connected
    }

    fn sessions_established(&self) -> u32 {
        self.sessions
    }

    fn max_payload(&self) -> usize {
        self.max_payload
    }

    fn service(&mut self) -> Result<Vec<Message>> {
        if !self.connected {
            return Ok(Vec::new());
        }
        let mut delivered = Vec::new();
        while let Some(mut msg) = self.inbound.pop_front() {
            if self.is_subscribed(&msg.topic) {
                msg.timestamp = Some(Timestamp(OffsetDateTime::now_utc()));
                delivered.push(msg);
            } else {
                tracing::trace!(topic = %msg.topic, "mock bus dropped unsubscribed message");
            }
        }
        Ok(delivered)
    }

    fn publish(&mut self, topic: &str, payload: &str, retain: bool) -> Result<()> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        if topic.is_empty() {
            return Err(TransportError::InvalidTopic("empty topic"));
        }
        if payload.len() > self.max_payload {
            return Err(TransportError::PayloadTooLarge {
                size: payload.len(),
                max: self.max_payload,
            });
        }
        if self.fail_publish {
            return Err(TransportError::Io("publish failed (injected)".to_string()));
        }
        self.published.push(Message {
            topic: topic.to_string(),
            payload: payload.to_string(),
            retain,
            timestamp: Some(Timestamp(OffsetDateTime::now_utc())),
        });
        Ok(())
    }

    fn subscribe(&mut self, filter: &str) -> Result<()> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        if filter.is_empty() {
            return Err(TransportError::InvalidTopic("empty filter"));
        }
        if !self.subscriptions.iter().any(|f| f == filter) {
            self.subscriptions.push(filter.to_string());
        }
        Ok(())
    }

    fn unsubscribe(&mut self, filter: &str) -> Result<()> {
        self.subscriptions.retain(|f| f != filter);
        Ok(())
    }

    fn set_last_will(&mut self, will: LastWill) -> Result<()> {
        self.last_will = Some(will);
        Ok(())
    }
}
