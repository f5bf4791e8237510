//! Scripted deliverers for queue tests.

use async_trait::async_trait;
use message_delivery::{DeliveryError, DeliveryResult, MessageDeliverer, OutgoingMessage};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Fails the first `failures` calls, then succeeds. Records every call.
#[derive(Default)]
pub struct ScriptedDeliverer {
    failures: AtomicUsize,
    calls: Mutex<Vec<OutgoingMessage>>,
}

impl ScriptedDeliverer {
    pub fn succeeding() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_first(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            failures: AtomicUsize::new(failures),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn always_failing() -> Arc<Self> {
        Self::failing_first(usize::MAX)
    }

    /// Stop failing from the next call on.
    pub fn recover(&self) {
        self.failures.store(0, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn delivered_ids(&self) -> Vec<String> {
        self.calls.lock().iter().map(|m| m.id.clone()).collect()
    }
}

#[async_trait]
impl MessageDeliverer for ScriptedDeliverer {
    async fn deliver(&self, message: &OutgoingMessage) -> DeliveryResult<()> {
        self.calls.lock().push(message.clone());
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            if remaining != usize::MAX {
                self.failures.fetch_sub(1, Ordering::SeqCst);
            }
            return Err(DeliveryError::Unavailable("network down".into()));
        }
        Ok(())
    }
}

/// Never answers within any reasonable timeout.
pub struct HangingDeliverer;

#[async_trait]
impl MessageDeliverer for HangingDeliverer {
    async fn deliver(&self, _message: &OutgoingMessage) -> DeliveryResult<()> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}

/// Blocks every delivery until `open` is called; tracks peak concurrency.
#[derive(Default)]
pub struct GatedDeliverer {
    gate: Notify,
    entered: Notify,
    active: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl GatedDeliverer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Resolves once a delivery is waiting on the gate.
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn open(&self) {
        self.gate.notify_waiters();
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageDeliverer for GatedDeliverer {
    async fn deliver(&self, _message: &OutgoingMessage) -> DeliveryResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_active, Ordering::SeqCst);

        let opened = self.gate.notified();
        tokio::pin!(opened);
        opened.as_mut().enable();
        self.entered.notify_one();
        opened.await;

        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Rejects messages whose content matches, accepts the rest.
pub struct RejectingDeliverer {
    pub reject_content: String,
}

#[async_trait]
impl MessageDeliverer for RejectingDeliverer {
    async fn deliver(&self, message: &OutgoingMessage) -> DeliveryResult<()> {
        if message.content == self.reject_content {
            return Err(DeliveryError::Rejected("row violates policy".into()));
        }
        Ok(())
    }
}

/// Succeeds after a per-message delay. Records ids in call order.
pub struct DelayedDeliverer {
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<String>>,
}

impl DelayedDeliverer {
    pub fn new(delays: &[(&str, Duration)]) -> Arc<Self> {
        Arc::new(Self {
            delays: delays
                .iter()
                .map(|(id, delay)| (id.to_string(), *delay))
                .collect(),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl MessageDeliverer for DelayedDeliverer {
    async fn deliver(&self, message: &OutgoingMessage) -> DeliveryResult<()> {
        self.calls.lock().push(message.id.clone());
        if let Some(delay) = self.delays.get(&message.id) {
            tokio::time::sleep(*delay).await;
        }
        Ok(())
    }
}
