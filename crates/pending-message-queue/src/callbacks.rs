//! Save-confirmation callbacks keyed by conversation.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Invoked once when a conversation's awaited saves have all landed.
pub type SaveCallback = Box<dyn FnOnce() + Send + 'static>;

struct Registration {
    generation: u64,
    required_count: usize,
    saved_count: usize,
    callback: SaveCallback,
    created_at: Instant,
    timeout_task: Option<JoinHandle<()>>,
}

impl Registration {
    fn cancel_timeout(&mut self) {
        if let Some(task) = self.timeout_task.take() {
            task.abort();
        }
    }
}

#[derive(Default)]
struct RegistryState {
    next_generation: u64,
    registrations: HashMap<String, Registration>,
}

/// At most one pending registration per conversation.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone, Default)]
pub struct SaveCallbackRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl SaveCallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for `required_count` saves in `conversation_id`, then run `callback`.
    ///
    /// Replaces (without invoking) any registration already present for the
    /// conversation. If the count is not reached within `timeout` the
    /// registration is dropped and `callback` never runs. A `required_count`
    /// of zero is treated as one.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn register(
        &self,
        conversation_id: &str,
        required_count: usize,
        callback: SaveCallback,
        timeout: Duration,
    ) {
        let mut state = self.state.lock();
        state.next_generation += 1;
        let generation = state.next_generation;

        let timeout_task = tokio::spawn(expire_after(
            Arc::downgrade(&self.state),
            conversation_id.to_string(),
            generation,
            timeout,
        ));

        let registration = Registration {
            generation,
            required_count: required_count.max(1),
            saved_count: 0,
            callback,
            created_at: Instant::now(),
            timeout_task: Some(timeout_task),
        };

        if let Some(mut replaced) = state
            .registrations
            .insert(conversation_id.to_string(), registration)
        {
            replaced.cancel_timeout();
            debug!(
                conversation_id,
                saved = replaced.saved_count,
                required = replaced.required_count,
                "Replaced pending save callback"
            );
        }

        debug!(
            conversation_id,
            required = required_count.max(1),
            "Registered save callback"
        );
    }

    /// Record one successful save in `conversation_id`.
    ///
    /// Returns `true` when this save completed the registration and its
    /// callback ran.
    pub fn trigger(&self, conversation_id: &str) -> bool {
        let ready = {
            let mut state = self.state.lock();
            let Some(registration) = state.registrations.get_mut(conversation_id) else {
                return false;
            };
            registration.saved_count += 1;
            if registration.saved_count < registration.required_count {
                debug!(
                    conversation_id,
                    saved = registration.saved_count,
                    required = registration.required_count,
                    "Save recorded"
                );
                return false;
            }
            state.registrations.remove(conversation_id)
        };

        let Some(mut registration) = ready else {
            return false;
        };
        registration.cancel_timeout();

        info!(
            conversation_id,
            saved = registration.saved_count,
            elapsed_ms = registration.created_at.elapsed().as_millis() as u64,
            "All saves confirmed, running save callback"
        );

        if catch_unwind(AssertUnwindSafe(registration.callback)).is_err() {
            error!(conversation_id, "Save callback panicked");
        }
        true
    }

    /// Number of registrations still waiting.
    pub fn len(&self) -> usize {
        self.state.lock().registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_registered(&self, conversation_id: &str) -> bool {
        self.state.lock().registrations.contains_key(conversation_id)
    }
}

impl std::fmt::Debug for SaveCallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaveCallbackRegistry")
            .field("pending", &self.len())
            .finish()
    }
}

async fn expire_after(
    state: Weak<Mutex<RegistryState>>,
    conversation_id: String,
    generation: u64,
    timeout: Duration,
) {
    tokio::time::sleep(timeout).await;

    let Some(state) = state.upgrade() else {
        return;
    };
    let mut state = state.lock();
    let expired = state
        .registrations
        .get(&conversation_id)
        .is_some_and(|r| r.generation == generation);
    if !expired {
        return;
    }

    if let Some(registration) = state.registrations.remove(&conversation_id) {
        warn!(
            conversation_id = %conversation_id,
            saved = registration.saved_count,
            required = registration.required_count,
            timeout_ms = timeout.as_millis() as u64,
            "Save callback timed out, dropping it"
        );
    }
}
