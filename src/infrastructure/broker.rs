use crate::domain::messaging::{
    Acknowledger, Delivery, Disposition, Message, Subscription, SubscriptionBox, topic_matches,
};
use crate::domain::ports::MessageBus;
use crate::error::{LendingError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Default number of deliveries before a message is dead-lettered.
pub const DEFAULT_MAX_DELIVERIES: u32 = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    pub queue: String,
    pub message: Message,
    pub reason: String,
}

struct QueueInner {
    name: String,
    messages: Mutex<VecDeque<Message>>,
    ready: Notify,
}

impl QueueInner {
    fn push(&self, message: Message) {
        lock(&self.messages).push_back(message);
        self.ready.notify_one();
    }

    fn pop(&self) -> Option<Message> {
        lock(&self.messages).pop_front()
    }
}

struct QueueEntry {
    queue: Arc<QueueInner>,
    bindings: Vec<(String, String)>,
}

#[derive(Default)]
struct Topology {
    exchanges: HashSet<String>,
    queues: HashMap<String, QueueEntry>,
}

struct BrokerInner {
    topology: Mutex<Topology>,
    dead_letters: Mutex<Vec<DeadLetter>>,
    in_flight: AtomicUsize,
    idle: Notify,
    closed: AtomicBool,
    max_deliveries: u32,
}

impl BrokerInner {
    fn release(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An in-process topic broker with durable queues and at-least-once delivery.
///
/// Exchanges route by topic pattern to every bound queue. Queues buffer
/// messages until a consumer pulls them; several consumers attached to the
/// same queue compete for its messages. A message stays in flight until its
/// delivery is settled, and is dead-lettered once it has been delivered
/// `max_deliveries` times without being acknowledged.
///
/// `Clone` shares the same broker.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DELIVERIES)
    }
}

impl InMemoryBroker {
    pub fn new(max_deliveries: u32) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                topology: Mutex::new(Topology::default()),
                dead_letters: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
                closed: AtomicBool::new(false),
                max_deliveries: max_deliveries.max(1),
            }),
        }
    }

    /// Resolves once every routed message has been settled.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.inner.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        lock(&self.inner.dead_letters).clone()
    }

    /// Messages waiting in `queue` that no consumer has picked up yet.
    pub fn queue_depth(&self, queue: &str) -> usize {
        lock(&self.inner.topology)
            .queues
            .get(queue)
            .map(|entry| lock(&entry.queue.messages).len())
            .unwrap_or(0)
    }

    /// Closes the broker. Publishing fails afterwards and every consumer's
    /// `next()` returns `None`.
    pub fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let topology = lock(&self.inner.topology);
        for entry in topology.queues.values() {
            entry.queue.ready.notify_waiters();
            entry.queue.ready.notify_one();
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            Err(LendingError::BrokerError("broker is shut down".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MessageBus for InMemoryBroker {
    async fn declare_exchange(&self, exchange: &str) -> Result<()> {
        self.ensure_open()?;
        lock(&self.inner.topology)
            .exchanges
            .insert(exchange.to_string());
        Ok(())
    }

    async fn publish(&self, exchange: &str, routing_key: &str, body: Vec<u8>) -> Result<()> {
        self.ensure_open()?;
        let targets: Vec<Arc<QueueInner>> = {
            let topology = lock(&self.inner.topology);
            if !topology.exchanges.contains(exchange) {
                return Err(LendingError::BrokerError(format!(
                    "exchange '{exchange}' is not declared"
                )));
            }
            topology
                .queues
                .values()
                .filter(|entry| {
                    entry
                        .bindings
                        .iter()
                        .any(|(ex, pattern)| ex == exchange && topic_matches(pattern, routing_key))
                })
                .map(|entry| entry.queue.clone())
                .collect()
        };

        if targets.is_empty() {
            debug!(exchange, routing_key, "Dropping unroutable message");
            return Ok(());
        }

        for queue in targets {
            self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
            queue.push(Message {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                body: body.clone(),
                delivery_count: 1,
            });
        }
        Ok(())
    }

    async fn bind(
        &self,
        queue: &str,
        exchange: &str,
        patterns: &[&str],
    ) -> Result<SubscriptionBox> {
        self.ensure_open()?;
        let mut topology = lock(&self.inner.topology);
        topology.exchanges.insert(exchange.to_string());
        let entry = topology
            .queues
            .entry(queue.to_string())
            .or_insert_with(|| QueueEntry {
                queue: Arc::new(QueueInner {
                    name: queue.to_string(),
                    messages: Mutex::new(VecDeque::new()),
                    ready: Notify::new(),
                }),
                bindings: Vec::new(),
            });
        for pattern in patterns {
            let binding = (exchange.to_string(), pattern.to_string());
            if !entry.bindings.contains(&binding) {
                entry.bindings.push(binding);
            }
        }

        Ok(Box::new(QueueConsumer {
            queue: entry.queue.clone(),
            broker: self.inner.clone(),
        }))
    }

    fn is_healthy(&self) -> bool {
        !self.inner.closed.load(Ordering::SeqCst)
    }
}

struct QueueConsumer {
    queue: Arc<QueueInner>,
    broker: Arc<BrokerInner>,
}

#[async_trait]
impl Subscription for QueueConsumer {
    fn queue(&self) -> &str {
        &self.queue.name
    }

    async fn next(&mut self) -> Option<Delivery> {
        loop {
            if self.broker.closed.load(Ordering::SeqCst) {
                return None;
            }
            if let Some(message) = self.queue.pop() {
                let acker = Arc::new(QueueAcker {
                    queue: self.queue.clone(),
                    broker: self.broker.clone(),
                });
                return Some(Delivery::new(message, acker));
            }
            self.queue.ready.notified().await;
        }
    }
}

struct QueueAcker {
    queue: Arc<QueueInner>,
    broker: Arc<BrokerInner>,
}

impl QueueAcker {
    fn dead_letter(&self, message: Message, reason: String) {
        warn!(
            queue = %self.queue.name,
            routing_key = %message.routing_key,
            delivery_count = message.delivery_count,
            %reason,
            "Message dead-lettered"
        );
        lock(&self.broker.dead_letters).push(DeadLetter {
            queue: self.queue.name.clone(),
            message,
            reason,
        });
        self.broker.release();
    }
}

impl Acknowledger for QueueAcker {
    fn settle(&self, mut message: Message, disposition: Disposition) {
        match disposition {
            Disposition::Ack => self.broker.release(),
            Disposition::DeadLetter(reason) => self.dead_letter(message, reason),
            Disposition::Requeue if message.delivery_count >= self.broker.max_deliveries => {
                let reason = format!("gave up after {} deliveries", message.delivery_count);
                self.dead_letter(message, reason);
            }
            Disposition::Requeue if self.broker.closed.load(Ordering::SeqCst) => {
                self.broker.release();
            }
            Disposition::Requeue => {
                message.delivery_count += 1;
                self.queue.push(message);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn next(sub: &mut SubscriptionBox) -> Delivery {
        timeout(Duration::from_secs(1), sub.next())
            .await
            .expect("timed out waiting for delivery")
            .expect("subscription closed")
    }

    #[tokio::test]
    async fn test_routes_to_every_matching_queue() {
        let broker = InMemoryBroker::default();
        broker.declare_exchange("loan_events").await.unwrap();
        let mut emi = broker
            .bind("emi-loan-approved", "loan_events", &["loan.approved"])
            .await
            .unwrap();
        let mut audit = broker
            .bind("audit", "loan_events", &["loan.*"])
            .await
            .unwrap();

        broker
            .publish("loan_events", "loan.approved", b"a".to_vec())
            .await
            .unwrap();
        broker
            .publish("loan_events", "loan.rejected", b"r".to_vec())
            .await
            .unwrap();

        assert_eq!(broker.queue_depth("emi-loan-approved"), 1);
        assert_eq!(broker.queue_depth("audit"), 2);
        assert_eq!(broker.in_flight(), 3);

        next(&mut emi).await.ack();
        next(&mut audit).await.ack();
        next(&mut audit).await.ack();
        timeout(Duration::from_secs(1), broker.wait_idle())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_queue_bound_twice_gets_single_copy() {
        let broker = InMemoryBroker::default();
        broker.declare_exchange("loan_events").await.unwrap();
        let _sub = broker
            .bind("notify", "loan_events", &["loan.applied", "loan.*"])
            .await
            .unwrap();
        broker
            .publish("loan_events", "loan.applied", vec![])
            .await
            .unwrap();
        assert_eq!(broker.queue_depth("notify"), 1);
    }

    #[tokio::test]
    async fn test_publish_requires_declared_exchange() {
        let broker = InMemoryBroker::default();
        let err = broker
            .publish("nowhere", "loan.approved", vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, LendingError::BrokerError(_)));
    }

    #[tokio::test]
    async fn test_unroutable_messages_are_dropped() {
        let broker = InMemoryBroker::default();
        broker.declare_exchange("payment_events").await.unwrap();
        broker
            .publish("payment_events", "payment.created", vec![1])
            .await
            .unwrap();
        assert_eq!(broker.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_queue_buffers_until_consumer_reads() {
        let broker = InMemoryBroker::default();
        broker.declare_exchange("loan_events").await.unwrap();
        let first = broker
            .bind("emi", "loan_events", &["loan.approved"])
            .await
            .unwrap();

        broker
            .publish("loan_events", "loan.approved", b"x".to_vec())
            .await
            .unwrap();
        drop(first);
        assert_eq!(broker.queue_depth("emi"), 1);

        // A consumer attaching later still receives the buffered message.
        let mut second = broker
            .bind("emi", "loan_events", &["loan.approved"])
            .await
            .unwrap();
        let delivery = next(&mut second).await;
        assert_eq!(delivery.message.body, b"x".to_vec());
        delivery.ack();
    }

    #[tokio::test]
    async fn test_requeue_redelivers_then_dead_letters() {
        let broker = InMemoryBroker::new(3);
        broker.declare_exchange("loan_events").await.unwrap();
        let mut sub = broker
            .bind("emi", "loan_events", &["loan.approved"])
            .await
            .unwrap();
        broker
            .publish("loan_events", "loan.approved", vec![])
            .await
            .unwrap();

        for expected in 1..=3 {
            let delivery = next(&mut sub).await;
            assert_eq!(delivery.message.delivery_count, expected);
            delivery.requeue();
        }

        assert_eq!(broker.queue_depth("emi"), 0);
        assert_eq!(broker.in_flight(), 0);
        let dead = broker.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].queue, "emi");
        assert!(dead[0].reason.contains("3 deliveries"));
    }

    #[tokio::test]
    async fn test_explicit_dead_letter() {
        let broker = InMemoryBroker::default();
        broker.declare_exchange("loan_events").await.unwrap();
        let mut sub = broker
            .bind("emi", "loan_events", &["loan.approved"])
            .await
            .unwrap();
        broker
            .publish("loan_events", "loan.approved", b"{}".to_vec())
            .await
            .unwrap();
        next(&mut sub).await.dead_letter("schema");
        assert_eq!(broker.dead_letters()[0].reason, "schema");
        assert_eq!(broker.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_dropped_delivery_is_redelivered() {
        let broker = InMemoryBroker::default();
        broker.declare_exchange("loan_events").await.unwrap();
        let mut sub = broker
            .bind("emi", "loan_events", &["loan.approved"])
            .await
            .unwrap();
        broker
            .publish("loan_events", "loan.approved", b"y".to_vec())
            .await
            .unwrap();

        drop(next(&mut sub).await);
        let again = next(&mut sub).await;
        assert_eq!(again.message.body, b"y".to_vec());
        assert_eq!(again.message.delivery_count, 2);
        again.ack();
        assert_eq!(broker.in_flight(), 0);
        assert!(broker.dead_letters().is_empty());
    }

    #[tokio::test]
    async fn test_competing_consumers_share_a_queue() {
        let broker = InMemoryBroker::default();
        broker.declare_exchange("loan_events").await.unwrap();
        let mut a = broker
            .bind("emi", "loan_events", &["loan.approved"])
            .await
            .unwrap();
        let mut b = broker
            .bind("emi", "loan_events", &["loan.approved"])
            .await
            .unwrap();
        for i in 0..2u8 {
            broker
                .publish("loan_events", "loan.approved", vec![i])
                .await
                .unwrap();
        }

        let first = next(&mut a).await;
        let second = next(&mut b).await;
        assert_ne!(first.message.body, second.message.body);
        first.ack();
        second.ack();
        assert_eq!(broker.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_closes_subscriptions() {
        let broker = InMemoryBroker::default();
        let mut sub = broker
            .bind("emi", "loan_events", &["loan.approved"])
            .await
            .unwrap();
        let waiter = tokio::spawn(async move { sub.next().await.is_none() });
        tokio::task::yield_now().await;

        broker.shutdown();
        assert!(timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap());
        assert!(!broker.is_healthy());
        assert!(
            broker
                .publish("loan_events", "loan.approved", vec![])
                .await
                .is_err()
        );
    }
}
