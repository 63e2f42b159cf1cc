//! Response cache policy — normalization, keys, and cacheability.
//!
//! The cache is exact-match over a normalized message, scoped per tenant.
//! Normalization: Unicode lowercasing, whitespace runs collapsed, ends
//! trimmed, trailing sentence punctuation stripped. Accents are significant
//! ("más" and "mas" are different questions).

use aula_config::CacheConfig;
use aula_core::message::TenantId;
use aula_core::store::{CacheEntry, CacheStore};
use aula_core::tool::ToolRegistry;
use chrono::{Duration, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, warn};

/// Normalize a message for cache lookup.
pub fn normalize(message: &str) -> String {
    let lowered = message.to_lowercase();
    let collapsed = lowered.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_end_matches(['.', '!', '?', '¡', '¿'])
        .trim()
        .to_string()
}

/// Cache key: SHA-256 over tenant id and normalized message, hex-encoded.
pub fn cache_key(tenant: &TenantId, normalized: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tenant.to_string().as_bytes());
    hasher.update([0u8]); // separator so tenant/message boundaries can't collide
    hasher.update(normalized.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Tenant-scoped exact-match response cache.
pub struct ResponseCache {
    config: CacheConfig,
    store: Arc<dyn CacheStore>,
}

impl ResponseCache {
    pub fn new(config: CacheConfig, store: Arc<dyn CacheStore>) -> Self {
        Self { config, store }
    }

    /// Look up a fresh cached response for this message.
    pub async fn get(&self, message: &str, tenant: &TenantId) -> Option<CacheEntry> {
        if !self.config.enabled {
            return None;
        }
        let key = cache_key(tenant, &normalize(message));
        match self.store.get(&key).await {
            Ok(hit) => hit,
            Err(e) => {
                // A broken cache never breaks the turn.
                warn!(error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    /// Whether a finished turn's answer may be cached.
    ///
    /// Cacheable iff the normalized message is non-empty and every tool used
    /// has stable (tenant-wide, slowly-changing) results. The volatile set —
    /// student_search, collections_aging, advisor_performance — disqualifies
    /// the turn; see each tool's `volatility()`.
    pub fn is_cacheable(&self, message: &str, tools_used: &[String], registry: &ToolRegistry) -> bool {
        if !self.config.enabled || normalize(message).is_empty() {
            return false;
        }
        registry.all_stable(tools_used)
    }

    /// Store a response. Last write wins on concurrent identical misses.
    pub async fn put(
        &self,
        message: &str,
        response: &str,
        tools_used: &[String],
        tenant: &TenantId,
    ) {
        let normalized = normalize(message);
        let key = cache_key(tenant, &normalized);
        let now = Utc::now();
        let entry = CacheEntry {
            key: key.clone(),
            tenant: tenant.clone(),
            response: response.to_string(),
            tools_used: tools_used.to_vec(),
            created_at: now,
            expires_at: now + Duration::minutes(self.config.ttl_minutes as i64),
        };
        match self.store.put(entry).await {
            Ok(()) => debug!(%tenant, key = %key, "Cached response"),
            Err(e) => warn!(error = %e, "Cache write failed, turn unaffected"),
        }
    }
}
