//! The pub/sub broker port.
//!
//! The router consumes exactly this capability set: publish a payload to a
//! subject, subscribe a handler to a subject, close. Subjects are opaque
//! strings and payloads opaque bytes, so any broker with those properties
//! can back the router. Reconnection is the adapter's concern; the router
//! treats broker outages as transient.

mod memory;

pub use memory::MemoryBroker;

use goro_common::types::subject_for_peer;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::debug;

/// Callback invoked once per delivery on an arbitrary task.
///
/// Handlers must not block: the contract is to hand the payload to a
/// bounded queue and return.
pub type DeliveryHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Errors surfaced by a broker adapter.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// A publish could not be handed to the transport.
    #[error("publish to {subject} failed: {reason}")]
    Publish {
        /// Target subject.
        subject: String,
        /// Adapter-specific failure description.
        reason: String,
    },
    /// A subscription could not be established.
    #[error("subscribe to {subject} failed: {reason}")]
    Subscribe {
        /// Target subject.
        subject: String,
        /// Adapter-specific failure description.
        reason: String,
    },
}

/// The broker capability the router is written against.
pub trait Broker: Send + Sync + 'static {
    /// Publishes `payload` to `subject`, fire-and-forget. Transport errors
    /// are surfaced to the caller.
    fn publish(&self, subject: &str, payload: &[u8]) -> Result<(), BrokerError>;

    /// Registers `handler` for every delivery on `subject`.
    fn subscribe(
        &self,
        subject: &str,
        handler: DeliveryHandler,
    ) -> Result<Subscription, BrokerError>;

    /// Drains pending publishes and tears down the transport.
    fn close(&self);
}

/// A live subscription; dropping it does not unsubscribe.
pub struct Subscription {
    subject: String,
    cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    /// Creates a subscription whose cancellation runs `cancel` once.
    #[must_use]
    pub fn new(subject: String, cancel: Box<dyn FnOnce() + Send>) -> Self {
        Self {
            subject,
            cancel: Mutex::new(Some(cancel)),
        }
    }

    /// Tears down the subscription. Idempotent: only the first call has
    /// any effect.
    pub fn unsubscribe(&self) {
        let cancel = self.cancel.lock().expect("subscription lock poisoned").take();
        if let Some(cancel) = cancel {
            debug!(subject = %self.subject, "subscriber: unsubscribing");
            cancel();
        }
    }

    /// The subject this subscription listens on.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}

/// Publishes envelopes addressed to peers.
#[derive(Clone)]
pub struct Publisher {
    broker: Arc<dyn Broker>,
}

impl Publisher {
    /// Creates a publisher over the given broker.
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    /// Publishes `data` to the subject owned by `to_pub_key_hex`.
    ///
    /// The hex key must already be validated; subject templates never see
    /// unvalidated input.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError`] if the transport rejects the publish.
    pub fn publish(&self, to_pub_key_hex: &str, data: &[u8]) -> Result<(), BrokerError> {
        let subject = subject_for_peer(to_pub_key_hex);
        debug!(subject = %subject, size = data.len(), "publisher: publishing");
        self.broker.publish(&subject, data)
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher").finish_non_exhaustive()
    }
}

/// Subscribes `handler` to the subject owned by `pub_key_hex`.
///
/// # Errors
///
/// Returns [`BrokerError`] if the subscription cannot be established.
pub fn subscribe_for_peer(
    broker: &Arc<dyn Broker>,
    pub_key_hex: &str,
    handler: DeliveryHandler,
) -> Result<Subscription, BrokerError> {
    let subject = subject_for_peer(pub_key_hex);
    debug!(subject = %subject, "subscriber: creating");
    broker.subscribe(&subject, handler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn unsubscribe_is_idempotent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let sub = Subscription::new(
            "goro.msg.test".to_string(),
            Box::new(move || {
                calls2.fetch_add(1, Ordering::SeqCst);
            }),
        );
        sub.unsubscribe();
        sub.unsubscribe();
        sub.unsubscribe();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn publisher_targets_peer_subject() {
        let broker = Arc::new(MemoryBroker::new());
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        let hex = "ab".repeat(32);

        let dyn_broker: Arc<dyn Broker> = broker;
        let _sub = subscribe_for_peer(
            &dyn_broker,
            &hex,
            Arc::new(move |_| {
                seen2.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

        Publisher::new(dyn_broker).publish(&hex, b"payload").unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
