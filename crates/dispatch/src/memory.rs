//! In-process publisher that records messages instead of sending them.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use notigate_common::types::DispatchMessage;

use crate::publisher::{DispatchError, Publisher};
use crate::topology::clamp_priority;

/// A message captured by [`MemoryPublisher`].
#[derive(Debug, Clone)]
pub struct Published {
    pub routing_key: String,
    pub message: DispatchMessage,
    pub priority: u8,
    pub correlation_id: String,
}

/// Records every publish; can be switched into a failing mode to simulate a
/// broker outage.
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    published: Mutex<Vec<Published>>,
    failing: AtomicBool,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent publishes fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<Published> {
        self.published
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.published.lock().map(|p| p.len()).unwrap_or_default()
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(
        &self,
        routing_key: &str,
        message: &DispatchMessage,
        priority: u8,
        correlation_id: &str,
    ) -> Result<(), DispatchError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DispatchError::Rejected("broker unreachable".to_string()));
        }

        let record = Published {
            routing_key: routing_key.to_string(),
            message: message.clone(),
            priority: clamp_priority(priority),
            correlation_id: correlation_id.to_string(),
        };
        if let Ok(mut published) = self.published.lock() {
            published.push(record);
        }
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        !self.failing.load(Ordering::SeqCst)
    }
}
