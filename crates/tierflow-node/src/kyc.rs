//! KYC verdict lookup with timeout and positive-verdict cache

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tierflow_core::{Address, CompensationError, Result};

/// Read interface of an external KYC service
#[async_trait]
pub trait KycProvider: Send + Sync {
    async fn is_verified(&self, address: &Address) -> Result<bool>;
}

/// Provider backed by an in-memory allow list
#[derive(Default)]
pub struct StaticKycProvider {
    verified: RwLock<HashSet<Address>>,
}

impl StaticKycProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn verify(&self, address: Address) {
        self.verified.write().insert(address);
    }

    pub fn revoke(&self, address: &Address) {
        self.verified.write().remove(address);
    }
}

#[async_trait]
impl KycProvider for StaticKycProvider {
    async fn is_verified(&self, address: &Address) -> Result<bool> {
        Ok(self.verified.read().contains(address))
    }
}

/// Enforces KYC when the platform requires it
pub struct KycGate {
    provider: Arc<dyn KycProvider>,
    timeout: Duration,
    cache: RwLock<HashSet<Address>>,
}

impl KycGate {
    pub fn new(provider: Arc<dyn KycProvider>, timeout: Duration) -> Self {
        Self {
            provider,
            timeout,
            cache: RwLock::new(HashSet::new()),
        }
    }

    /// Succeed only for a verified address
    ///
    /// A fresh negative verdict evicts the cached one; an unreachable
    /// provider falls back to the cache.
    pub async fn check(&self, address: &Address) -> Result<()> {
        match tokio::time::timeout(self.timeout, self.provider.is_verified(address)).await {
            Ok(Ok(true)) => {
                self.cache.write().insert(*address);
                Ok(())
            }
            Ok(Ok(false)) => {
                self.cache.write().remove(address);
                Err(CompensationError::KycRequired(*address))
            }
            Ok(Err(e)) => {
                tracing::warn!(address = %address, error = %e, "KYC provider failed");
                self.cached(address)
            }
            Err(_) => {
                tracing::warn!(address = %address, "KYC provider timed out");
                self.cached(address)
            }
        }
    }

    fn cached(&self, address: &Address) -> Result<()> {
        if self.cache.read().contains(address) {
            Ok(())
        } else {
            Err(CompensationError::KycRequired(*address))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Answers from an allow list until switched offline
    struct FlakyProvider {
        inner: StaticKycProvider,
        offline: AtomicBool,
    }

    #[async_trait]
    impl KycProvider for FlakyProvider {
        async fn is_verified(&self, address: &Address) -> Result<bool> {
            if self.offline.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            self.inner.is_verified(address).await
        }
    }

    #[tokio::test]
    async fn test_verified_and_unverified() {
        let provider = Arc::new(StaticKycProvider::new());
        let alice = Address::from_label(b"alice");
        provider.verify(alice);
        let gate = KycGate::new(provider, Duration::from_millis(100));

        assert!(gate.check(&alice).await.is_ok());
        let bob = Address::from_label(b"bob");
        assert_eq!(gate.check(&bob).await, Err(CompensationError::KycRequired(bob)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_uses_cached_verdict() {
        let provider = Arc::new(FlakyProvider {
            inner: StaticKycProvider::new(),
            offline: AtomicBool::new(false),
        });
        let alice = Address::from_label(b"alice");
        let bob = Address::from_label(b"bob");
        provider.inner.verify(alice);
        let gate = KycGate::new(provider.clone(), Duration::from_millis(100));

        gate.check(&alice).await.unwrap();
        provider.offline.store(true, Ordering::SeqCst);

        assert!(gate.check(&alice).await.is_ok());
        assert!(matches!(
            gate.check(&bob).await,
            Err(CompensationError::KycRequired(_))
        ));
    }

    #[tokio::test]
    async fn test_revocation_evicts_cache() {
        let provider = Arc::new(StaticKycProvider::new());
        let alice = Address::from_label(b"alice");
        provider.verify(alice);
        let gate = KycGate::new(provider.clone(), Duration::from_millis(100));
        gate.check(&alice).await.unwrap();

        provider.revoke(&alice);
        assert!(gate.check(&alice).await.is_err());
    }
}
