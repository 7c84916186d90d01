use std::io::Read;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::trace;

use crate::error::ProxyError;
use crate::extension::Deserializer;
use crate::types::ReturnType;

/// Decodes JSON bodies with `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDeserializer;

impl Deserializer for JsonDeserializer {
    fn deserialize(&self, body: &mut dyn Read, target: &ReturnType) -> Result<Value, ProxyError> {
        serde_json::from_reader(body)
            .map_err(|e| ProxyError::Deserialization(format!("{}: {e}", target.type_name)))
    }
}

/// Limits concurrent decodes to a fixed number of slots.
///
/// A decode waits at most `wait` for a free slot and fails with
/// `ProxyError::DecodeTimeout` otherwise.
pub struct BoundedDeserializer {
    inner: Arc<dyn Deserializer>,
    free: Mutex<usize>,
    released: Condvar,
    wait: Duration,
}

struct Slot<'a> {
    owner: &'a BoundedDeserializer,
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        *self.owner.free.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        self.owner.released.notify_one();
    }
}

impl BoundedDeserializer {
    pub fn new(inner: Arc<dyn Deserializer>, slots: usize, wait: Duration) -> Self {
        Self {
            inner,
            free: Mutex::new(slots.max(1)),
            released: Condvar::new(),
            wait,
        }
    }

    fn acquire(&self) -> Result<Slot<'_>, ProxyError> {
        // `None` when the wait is too long to represent: block until a slot frees up.
        let deadline = Instant::now().checked_add(self.wait);
        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        while *free == 0 {
            let Some(deadline) = deadline else {
                free = self.released.wait(free).unwrap_or_else(PoisonError::into_inner);
                continue;
            };
            let now = Instant::now();
            if now >= deadline {
                trace!(target: "restproxy::response", wait_ms = self.wait.as_millis() as u64, "no decode slot");
                return Err(ProxyError::DecodeTimeout(self.wait));
            }
            free = self
                .released
                .wait_timeout(free, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        *free -= 1;
        Ok(Slot { owner: self })
    }
}

impl Deserializer for BoundedDeserializer {
    fn deserialize(&self, body: &mut dyn Read, target: &ReturnType) -> Result<Value, ProxyError> {
        let _slot = self.acquire()?;
        self.inner.deserialize(body, target)
    }
}
