//! Two-tier cache for computed query views.
//!
//! The per-query tier keys on the query alone and expires shortly after
//! write, absorbing identical concurrent queries. The per-session tier keys
//! on (query, client) and expires after access; it pins follow-up pages of a
//! paging session to the snapshot the session started from.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;

use crate::config::FleetConfig;
use crate::query::{LabQuery, LabQueryResult};

struct CacheEntry {
    result: Arc<LabQueryResult>,
    written: Instant,
    last_access: Instant,
}

impl CacheEntry {
    fn new(result: Arc<LabQueryResult>) -> Self {
        let now = Instant::now();
        Self {
            result,
            written: now,
            last_access: now,
        }
    }
}

pub struct QueryCache {
    query_cache: DashMap<LabQuery, CacheEntry>,
    session_cache: DashMap<(LabQuery, String), CacheEntry>,
    config: FleetConfig,
}

impl QueryCache {
    pub fn new(config: FleetConfig) -> Self {
        Self {
            query_cache: DashMap::new(),
            session_cache: DashMap::new(),
            config,
        }
    }

    /// Looks up a cached result. The session tier is consulted only for
    /// follow-up pages; every per-query hit is copied into the caller's
    /// session so later pages stay on the same snapshot, even when page zero
    /// was served from the shared tier.
    pub fn get(
        &self,
        query: &LabQuery,
        client_id: &str,
        follow_up_page: bool,
    ) -> Option<Arc<LabQueryResult>> {
        self.evict_expired();

        if follow_up_page {
            let session_key = (query.clone(), client_id.to_string());
            if let Some(mut entry) = self.session_cache.get_mut(&session_key) {
                entry.last_access = Instant::now();
                tracing::debug!(client = client_id, "Query served from session cache");
                return Some(entry.result.clone());
            }
        }

        let result = self.query_cache.get(query).map(|entry| entry.result.clone());
        if let Some(result) = &result {
            tracing::debug!(client = client_id, "Query served from per-query cache");
            self.session_cache.insert(
                (query.clone(), client_id.to_string()),
                CacheEntry::new(result.clone()),
            );
        }
        result
    }

    /// Stores a freshly computed result in both tiers.
    pub fn put(&self, query: &LabQuery, client_id: &str, result: Arc<LabQueryResult>) {
        self.query_cache
            .insert(query.clone(), CacheEntry::new(result.clone()));
        self.session_cache.insert(
            (query.clone(), client_id.to_string()),
            CacheEntry::new(result),
        );
    }

    fn evict_expired(&self) {
        let query_ttl = self.config.query_cache_ttl;
        self.query_cache
            .retain(|_, entry| entry.written.elapsed() <= query_ttl);
        let session_ttl = self.config.session_cache_ttl;
        self.session_cache
            .retain(|_, entry| entry.last_access.elapsed() <= session_ttl);
    }
}
