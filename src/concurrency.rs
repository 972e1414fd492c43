//! Per-provider concurrency limiter (spec §4.2).

use crate::registry::Provider;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Semaphore, SemaphorePermit};

/// A FIFO-fair semaphore per provider, sized to that provider's fixed
/// capacity. Every outbound upstream call, sync or async, acquires its
/// provider's permit before sending and releases on completion or
/// cancellation (drop).
pub struct ConcurrencyLimiter {
    semaphores: HashMap<Provider, Arc<Semaphore>>,
}

impl ConcurrencyLimiter {
    pub fn new() -> Self {
        let semaphores = Provider::all()
            .into_iter()
            .map(|p| (p, Arc::new(Semaphore::new(p.concurrency_cap()))))
            .collect();
        Self { semaphores }
    }

    /// Acquire a permit for `provider`, suspending the caller (spec §5
    /// suspension point "(a)") until a slot is free. Never fails except on
    /// semaphore closure, which this type never performs.
    pub async fn acquire(&self, provider: Provider) -> SemaphorePermit<'_> {
        self.semaphores
            .get(&provider)
            .expect("all providers have a semaphore")
            .acquire()
            .await
            .expect("semaphore is never closed")
    }

    pub fn available_permits(&self, provider: Provider) -> usize {
        self.semaphores
            .get(&provider)
            .expect("all providers have a semaphore")
            .available_permits()
    }
}

impl Default for ConcurrencyLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn capacity_matches_spec_table() {
        let limiter = ConcurrencyLimiter::new();
        assert_eq!(limiter.available_permits(Provider::Openai), 8);
        assert_eq!(limiter.available_permits(Provider::Google), 6);
        assert_eq!(limiter.available_permits(Provider::Anthropic), 6);
        assert_eq!(limiter.available_permits(Provider::Xai), 4);
    }

    #[tokio::test]
    async fn acquire_blocks_until_release() {
        let limiter = ConcurrencyLimiter::new();
        let mut permits = Vec::new();
        for _ in 0..4 {
            permits.push(limiter.acquire(Provider::Xai).await);
        }
        assert_eq!(limiter.available_permits(Provider::Xai), 0);
        drop(permits.pop());
        assert_eq!(limiter.available_permits(Provider::Xai), 1);
    }
}
