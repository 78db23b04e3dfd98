//! In-process broker adapter.
//!
//! Fans a published payload out to every handler subscribed to the same
//! subject, synchronously on the publisher's task. Suitable for
//! single-instance deployments and tests; cross-instance delivery needs an
//! external broker behind the same trait.

use super::{Broker, BrokerError, DeliveryHandler, Subscription};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

struct SubEntry {
    id: u64,
    handler: DeliveryHandler,
}

struct Inner {
    subjects: DashMap<String, Vec<SubEntry>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

/// An in-process subject map implementing the broker port.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl MemoryBroker {
    /// Creates an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                subjects: DashMap::new(),
                next_id: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Number of live subscriptions across all subjects.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.subjects.iter().map(|e| e.value().len()).sum()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl Broker for MemoryBroker {
    fn publish(&self, subject: &str, payload: &[u8]) -> Result<(), BrokerError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Publish {
                subject: subject.to_string(),
                reason: "broker closed".to_string(),
            });
        }

        // Clone the handler list out of the map before invoking: a handler
        // may unsubscribe (peer teardown), which needs a write lock on the
        // same shard.
        let handlers: Vec<DeliveryHandler> = match self.inner.subjects.get(subject) {
            Some(entry) => entry.iter().map(|s| s.handler.clone()).collect(),
            None => return Ok(()),
        };
        for handler in handlers {
            handler(payload);
        }
        Ok(())
    }

    fn subscribe(
        &self,
        subject: &str,
        handler: DeliveryHandler,
    ) -> Result<Subscription, BrokerError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Subscribe {
                subject: subject.to_string(),
                reason: "broker closed".to_string(),
            });
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subjects
            .entry(subject.to_string())
            .or_default()
            .push(SubEntry { id, handler });

        let inner = self.inner.clone();
        let cancel_subject = subject.to_string();
        let cancel = Box::new(move || {
            if let Some(mut subs) = inner.subjects.get_mut(&cancel_subject) {
                subs.retain(|e| e.id != id);
            }
            inner
                .subjects
                .remove_if(&cancel_subject, |_, subs| subs.is_empty());
        });

        Ok(Subscription::new(subject.to_string(), cancel))
    }

    fn close(&self) {
        debug!("broker: closing");
        self.inner.closed.store(true, Ordering::Release);
        self.inner.subjects.clear();
    }
}
