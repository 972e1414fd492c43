//! Capability Cache (spec §3 / §4.3 step 4): `modelId → bool` with a
//! 1-hour TTL, and at-most-one in-flight probe per model id shared across
//! concurrent callers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};

const TTL: Duration = Duration::from_secs(3600);

#[derive(Clone, Copy)]
struct Entry {
    value: bool,
    set_at: Instant,
}

enum Slot {
    Settled(Entry),
    /// A probe is in flight; subsequent callers wait on the `Notify`
    /// rather than issuing their own probe.
    InFlight(Arc<Notify>),
}

pub struct CapabilityCache {
    slots: Mutex<HashMap<String, Slot>>,
}

/// What a caller should do after consulting the cache.
pub enum Lookup {
    /// Cached, fresh answer.
    Cached(bool),
    /// This caller is now the probe owner and must call
    /// `resolve_probe` when it is done.
    BecomeProbeOwner,
    /// Another caller is already probing; wait for it, then look up again.
    WaitForProbe(Arc<Notify>),
}

impl CapabilityCache {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub async fn lookup(&self, model_id: &str) -> Lookup {
        let mut slots = self.slots.lock().await;
        match slots.get(model_id) {
            Some(Slot::Settled(entry)) if entry.set_at.elapsed() < TTL => {
                Lookup::Cached(entry.value)
            }
            Some(Slot::InFlight(notify)) => Lookup::WaitForProbe(notify.clone()),
            _ => {
                let notify = Arc::new(Notify::new());
                slots.insert(model_id.to_string(), Slot::InFlight(notify));
                Lookup::BecomeProbeOwner
            }
        }
    }

    /// Called by the probe owner once the probe completes (or times out).
    pub async fn resolve_probe(&self, model_id: &str, value: bool) {
        let notify = {
            let mut slots = self.slots.lock().await;
            let previous = slots.insert(
                model_id.to_string(),
                Slot::Settled(Entry {
                    value,
                    set_at: Instant::now(),
                }),
            );
            match previous {
                Some(Slot::InFlight(notify)) => Some(notify),
                _ => None,
            }
        };
        if let Some(notify) = notify {
            notify.notify_waiters();
        }
    }

    /// Explicit invalidation on a format-error response (spec §3).
    pub async fn invalidate_to_false(&self, model_id: &str) {
        let mut slots = self.slots.lock().await;
        slots.insert(
            model_id.to_string(),
            Slot::Settled(Entry {
                value: false,
                set_at: Instant::now(),
            }),
        );
    }
}

impl Default for CapabilityCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_lookup_becomes_probe_owner() {
        let cache = CapabilityCache::new();
        assert!(matches!(
            cache.lookup("openai:gpt-5").await,
            Lookup::BecomeProbeOwner
        ));
    }

    #[tokio::test]
    async fn concurrent_lookup_waits_for_probe() {
        let cache = CapabilityCache::new();
        assert!(matches!(
            cache.lookup("openai:gpt-5").await,
            Lookup::BecomeProbeOwner
        ));
        match cache.lookup("openai:gpt-5").await {
            Lookup::WaitForProbe(_) => {}
            _ => panic!("expected WaitForProbe"),
        }
    }

    #[tokio::test]
    async fn resolved_probe_is_cached() {
        let cache = CapabilityCache::new();
        let _ = cache.lookup("openai:gpt-5").await;
        cache.resolve_probe("openai:gpt-5", true).await;
        assert!(matches!(
            cache.lookup("openai:gpt-5").await,
            Lookup::Cached(true)
        ));
    }

    #[tokio::test]
    async fn invalidate_forces_false() {
        let cache = CapabilityCache::new();
        let _ = cache.lookup("openai:gpt-5").await;
        cache.resolve_probe("openai:gpt-5", true).await;
        cache.invalidate_to_false("openai:gpt-5").await;
        assert!(matches!(
            cache.lookup("openai:gpt-5").await,
            Lookup::Cached(false)
        ));
    }
}
