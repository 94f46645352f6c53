use crate::domain::events::EventEnvelope;
use crate::domain::messaging::{Delivery, SubscriptionBox};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Reacts to one kind of event. Must tolerate seeing the same envelope more
/// than once.
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, envelope: EventEnvelope) -> Result<()>;
}

pub type EventHandlerRef = Arc<dyn EventHandler>;

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    Acked,
    Requeued,
    DeadLettered,
}

/// Decodes, handles and settles a single delivery.
///
/// Undecodable payloads and permanent handler failures are dead-lettered;
/// transient failures are requeued for another attempt. The handler runs in
/// its own task so a panic settles the delivery as a requeue.
pub async fn process_delivery(delivery: Delivery, handler: &EventHandlerRef) -> Settled {
    let envelope = match EventEnvelope::decode(&delivery.message.body) {
        Ok(envelope) => envelope,
        Err(e) => {
            error!(
                handler = handler.name(),
                routing_key = %delivery.message.routing_key,
                error = %e,
                "Rejecting malformed event"
            );
            delivery.dead_letter(e.to_string());
            return Settled::DeadLettered;
        }
    };

    let event_id = envelope.id;
    let task = {
        let handler = handler.clone();
        tokio::spawn(async move { handler.handle(envelope).await })
    };
    match task.await {
        Ok(Ok(())) => {
            delivery.ack();
            Settled::Acked
        }
        Ok(Err(e)) if e.is_retryable() => {
            warn!(
                handler = handler.name(),
                %event_id,
                attempt = delivery.message.delivery_count,
                error = %e,
                "Handler failed, requeueing"
            );
            delivery.requeue();
            Settled::Requeued
        }
        Ok(Err(e)) => {
            error!(handler = handler.name(), %event_id, error = %e, "Handler failed permanently");
            delivery.dead_letter(e.to_string());
            Settled::DeadLettered
        }
        Err(e) => {
            error!(
                handler = handler.name(),
                %event_id,
                attempt = delivery.message.delivery_count,
                error = %e,
                "Handler panicked, requeueing"
            );
            delivery.requeue();
            Settled::Requeued
        }
    }
}

/// Consumes `subscription` until the broker closes it or `shutdown` flips to
/// `true`. A delivery already being handled is always settled before exit.
pub async fn run_consumer(
    mut subscription: SubscriptionBox,
    handler: EventHandlerRef,
    mut shutdown: watch::Receiver<bool>,
) {
    let queue = subscription.queue().to_string();
    info!(queue = %queue, handler = handler.name(), "Consumer started");

    loop {
        if *shutdown.borrow() {
            break;
        }
        let delivery = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            next = subscription.next() => match next {
                Some(delivery) => delivery,
                None => break,
            },
        };
        let settled = process_delivery(delivery, &handler).await;
        debug!(queue = %queue, ?settled, "Delivery settled");
    }

    info!(queue = %queue, "Consumer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::{DomainEvent, LOAN_EXCHANGE, LoanRejected};
    use crate::domain::ports::MessageBus;
    use crate::error::LendingError;
    use crate::infrastructure::broker::InMemoryBroker;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct Flaky {
        calls: AtomicUsize,
        fail_first: usize,
        permanent: bool,
    }

    #[async_trait]
    impl EventHandler for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn handle(&self, _envelope: EventEnvelope) -> Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                if self.permanent {
                    return Err(LendingError::ValidationError("bad".to_string()));
                }
                return Err(LendingError::UpstreamUnavailable("down".to_string()));
            }
            Ok(())
        }
    }

    fn event_bytes() -> Vec<u8> {
        EventEnvelope::new(DomainEvent::LoanRejected(LoanRejected {
            loan_id: Uuid::new_v4(),
            user_id: "U1".to_string(),
            reason: "score".to_string(),
        }))
        .encode()
        .unwrap()
    }

    struct PanicsOnce {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EventHandler for PanicsOnce {
        fn name(&self) -> &'static str {
            "panics_once"
        }

        async fn handle(&self, _envelope: EventEnvelope) -> Result<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("handler bug");
            }
            Ok(())
        }
    }

    async fn run_until_idle(broker: &InMemoryBroker, handler: EventHandlerRef, body: Vec<u8>) {
        let sub = broker
            .bind("q", LOAN_EXCHANGE, &["loan.*"])
            .await
            .unwrap();
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(run_consumer(sub, handler, rx));
        broker
            .publish(LOAN_EXCHANGE, "loan.rejected", body)
            .await
            .unwrap();
        broker.wait_idle().await;
        tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_transient_failure_is_redelivered() {
        let broker = InMemoryBroker::new(5);
        let handler = Arc::new(Flaky {
            calls: AtomicUsize::new(0),
            fail_first: 2,
            permanent: false,
        });
        run_until_idle(&broker, handler.clone(), event_bytes()).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert!(broker.dead_letters().is_empty());
    }

    #[tokio::test]
    async fn test_transient_failure_gives_up_after_max_deliveries() {
        let broker = InMemoryBroker::new(3);
        let handler = Arc::new(Flaky {
            calls: AtomicUsize::new(0),
            fail_first: usize::MAX,
            permanent: false,
        });
        run_until_idle(&broker, handler.clone(), event_bytes()).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert_eq!(broker.dead_letters().len(), 1);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let broker = InMemoryBroker::default();
        let handler = Arc::new(Flaky {
            calls: AtomicUsize::new(0),
            fail_first: 1,
            permanent: true,
        });
        run_until_idle(&broker, handler.clone(), event_bytes()).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(broker.dead_letters().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_payload_never_reaches_handler() {
        let broker = InMemoryBroker::default();
        let handler = Arc::new(Flaky {
            calls: AtomicUsize::new(0),
            fail_first: 0,
            permanent: false,
        });
        run_until_idle(&broker, handler.clone(), b"{not json".to_vec()).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        assert_eq!(broker.dead_letters().len(), 1);
    }

    #[tokio::test]
    async fn test_handler_panic_requeues_and_consumer_survives() {
        let broker = InMemoryBroker::default();
        let handler = Arc::new(PanicsOnce {
            calls: AtomicUsize::new(0),
        });
        let sub = broker
            .bind("q", LOAN_EXCHANGE, &["loan.*"])
            .await
            .unwrap();
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(run_consumer(sub, handler.clone(), rx));

        broker
            .publish(LOAN_EXCHANGE, "loan.rejected", event_bytes())
            .await
            .unwrap();
        broker.wait_idle().await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        assert!(broker.dead_letters().is_empty());
        assert!(!task.is_finished());

        broker
            .publish(LOAN_EXCHANGE, "loan.rejected", event_bytes())
            .await
            .unwrap();
        broker.wait_idle().await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);

        tx.send(true).unwrap();
        task.await.unwrap();
    }
}
