use crate::domain::events::{DomainEvent, EventEnvelope};
use crate::domain::ports::MessageBusRef;
use crate::error::Result;
use std::collections::VecDeque;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Publishes a service's events, deferring the ones the broker refuses.
///
/// Callers persist first and publish second. A publish failure never undoes
/// the persisted change: the encoded event is parked in the outbox and sent
/// by a later [`EventPublisher::flush`] or by the next successful publish.
/// Events leave the outbox in the order they were produced.
pub struct EventPublisher {
    service: &'static str,
    bus: MessageBusRef,
    outbox: Mutex<VecDeque<Pending>>,
}

struct Pending {
    envelope: EventEnvelope,
    body: Vec<u8>,
}

impl EventPublisher {
    pub fn new(service: &'static str, bus: MessageBusRef) -> Self {
        Self {
            service,
            bus,
            outbox: Mutex::new(VecDeque::new()),
        }
    }

    /// Wraps `event` in a fresh envelope and publishes it, or defers it.
    ///
    /// Only an encoding failure is returned as an error.
    pub async fn publish(&self, event: DomainEvent) -> Result<EventEnvelope> {
        let envelope = EventEnvelope::new(event);
        let body = envelope.encode()?;

        let mut outbox = self.outbox.lock().await;
        if !outbox.is_empty() {
            self.drain(&mut outbox).await;
        }
        if outbox.is_empty() {
            match self.send(&envelope, body.clone()).await {
                Ok(()) => return Ok(envelope),
                Err(e) => warn!(
                    service = self.service,
                    event = envelope.routing_key(),
                    event_id = %envelope.id,
                    error = %e,
                    "Publish failed, event deferred to outbox"
                ),
            }
        }
        outbox.push_back(Pending {
            envelope: envelope.clone(),
            body,
        });
        Ok(envelope)
    }

    /// Retries deferred events in order. Returns how many were sent.
    pub async fn flush(&self) -> usize {
        let mut outbox = self.outbox.lock().await;
        self.drain(&mut outbox).await
    }

    pub async fn pending(&self) -> usize {
        self.outbox.lock().await.len()
    }

    async fn drain(&self, outbox: &mut VecDeque<Pending>) -> usize {
        let mut sent = 0;
        while let Some(next) = outbox.front() {
            if let Err(e) = self.send(&next.envelope, next.body.clone()).await {
                debug!(service = self.service, error = %e, "Outbox still blocked");
                break;
            }
            outbox.pop_front();
            sent += 1;
        }
        sent
    }

    async fn send(&self, envelope: &EventEnvelope, body: Vec<u8>) -> Result<()> {
        self.bus
            .publish(envelope.exchange(), envelope.routing_key(), body)
            .await?;
        debug!(
            service = self.service,
            event = envelope.routing_key(),
            event_id = %envelope.id,
            "Event published"
        );
        Ok(())
    }
}
