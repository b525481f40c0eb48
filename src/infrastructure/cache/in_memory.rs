use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::{sync::RwLock, time::Instant};

use crate::domain::repositories::MessageCache;

#[derive(Default)]
pub struct InMemoryMessageCache {
    entries: Arc<RwLock<HashMap<String, (String, Instant)>>>,
    writes: AtomicUsize,
    unavailable: AtomicBool,
}

impl InMemoryMessageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Successful `set` calls so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|(_, expires_at)| Instant::now() < *expires_at)
            .map(|(value, _)| value.clone())
    }

    fn ensure_available(&self) -> anyhow::Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            anyhow::bail!("cache is unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl MessageCache for InMemoryMessageCache {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()> {
        self.ensure_available()?;
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, (_, expires_at)| now < *expires_at);
        entries.insert(key.to_string(), (value.to_string(), now + ttl));
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn ping(&self) -> anyhow::Result<()> {
        self.ensure_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = InMemoryMessageCache::new();
        cache
            .set("message:ext-1", "id:ts", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(cache.get("message:ext-1").await.as_deref(), Some("id:ts"));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(cache.get("message:ext-1").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn writes_evict_expired_entries() {
        let cache = InMemoryMessageCache::new();
        for i in 0..3 {
            cache
                .set(&format!("message:old-{i}"), "v", Duration::from_secs(5))
                .await
                .unwrap();
        }
        tokio::time::advance(Duration::from_secs(5)).await;

        cache
            .set("message:new", "v", Duration::from_secs(5))
            .await
            .unwrap();

        let entries = cache.entries.read().await;
        assert_eq!(entries.len(), 1);
        assert!(entries.contains_key("message:new"));
        drop(entries);
        assert_eq!(cache.writes(), 4);
    }

    #[tokio::test]
    async fn unavailable_cache_rejects_writes_and_pings() {
        let cache = InMemoryMessageCache::new();
        cache.set_unavailable(true);

        assert!(cache.set("k", "v", Duration::from_secs(1)).await.is_err());
        assert!(cache.ping().await.is_err());
        assert_eq!(cache.writes(), 0);
    }
}
