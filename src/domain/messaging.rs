//! Broker-neutral message and delivery types.
//!
//! A [`Delivery`] must be settled exactly once through [`Delivery::ack`],
//! [`Delivery::requeue`] or [`Delivery::dead_letter`]. Until then the broker
//! counts the message as in flight. A delivery dropped unsettled is requeued.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Message {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    /// 1 on first delivery, incremented on every redelivery.
    pub delivery_count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    Ack,
    Requeue,
    DeadLetter(String),
}

/// Broker-side hook that receives the settlement of a delivery.
pub trait Acknowledger: Send + Sync {
    fn settle(&self, message: Message, disposition: Disposition);
}

pub struct Delivery {
    pub message: Message,
    acker: Option<Arc<dyn Acknowledger>>,
}

impl Delivery {
    pub fn new(message: Message, acker: Arc<dyn Acknowledger>) -> Self {
        Self {
            message,
            acker: Some(acker),
        }
    }

    pub fn ack(mut self) {
        self.settle(Disposition::Ack);
    }

    pub fn requeue(mut self) {
        self.settle(Disposition::Requeue);
    }

    pub fn dead_letter(mut self, reason: impl Into<String>) {
        self.settle(Disposition::DeadLetter(reason.into()));
    }

    fn settle(&mut self, disposition: Disposition) {
        if let Some(acker) = self.acker.take() {
            acker.settle(std::mem::take(&mut self.message), disposition);
        }
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if self.acker.is_some() {
            warn!(
                routing_key = %self.message.routing_key,
                delivery_count = self.message.delivery_count,
                "Delivery dropped without settlement, requeueing"
            );
            self.settle(Disposition::Requeue);
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("exchange", &self.message.exchange)
            .field("routing_key", &self.message.routing_key)
            .field("delivery_count", &self.message.delivery_count)
            .finish()
    }
}

/// A consumer attached to one durable queue.
#[async_trait]
pub trait Subscription: Send {
    fn queue(&self) -> &str;

    /// Waits for the next delivery. `None` once the broker has shut down.
    async fn next(&mut self) -> Option<Delivery>;
}

pub type SubscriptionBox = Box<dyn Subscription>;

/// Topic-exchange matching: words are separated by `.`, `*` matches exactly
/// one word and `#` matches zero or more words.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    match_words(&pattern, &key)
}

fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| match_words(rest, &key[skip..])),
        Some((&word, rest)) => match key.split_first() {
            Some((&first, key_rest)) if word == "*" || word == first => {
                match_words(rest, key_rest)
            }
            _ => false,
        },
    }
}
