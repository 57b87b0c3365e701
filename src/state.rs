use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use crate::cache::RedisCache;
use crate::db::DatabaseProxy;
use crate::engine::PersonalizationEngine;

/// Runtime toggles flippable without a restart. Engine component flags
/// live in the engine config; these cover the outer infrastructure.
#[derive(Debug)]
pub struct RuntimeConfig {
    pub redis_enabled: AtomicBool,
    pub llm_enabled: AtomicBool,
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self {
            redis_enabled: AtomicBool::new(true),
            llm_enabled: AtomicBool::new(true),
        }
    }

    pub fn is_redis_enabled(&self) -> bool {
        self.redis_enabled.load(Ordering::Relaxed)
    }

    pub fn is_llm_enabled(&self) -> bool {
        self.llm_enabled.load(Ordering::Relaxed)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct AppState {
    started_at: Instant,
    started_at_system: SystemTime,
    db_proxy: Option<Arc<DatabaseProxy>>,
    cache: Option<Arc<RedisCache>>,
    engine: Arc<PersonalizationEngine>,
    runtime: Arc<RuntimeConfig>,
}

impl AppState {
    pub fn new(
        db_proxy: Option<Arc<DatabaseProxy>>,
        engine: Arc<PersonalizationEngine>,
        cache: Option<Arc<RedisCache>>,
    ) -> Self {
        Self {
            started_at: Instant::now(),
            started_at_system: SystemTime::now(),
            db_proxy,
            cache,
            engine,
            runtime: Arc::new(RuntimeConfig::new()),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn started_at_system(&self) -> SystemTime {
        self.started_at_system
    }

    pub fn db_proxy(&self) -> Option<Arc<DatabaseProxy>> {
        self.db_proxy.clone()
    }

    pub fn cache(&self) -> Option<Arc<RedisCache>> {
        if !self.runtime.is_redis_enabled() {
            return None;
        }
        self.cache.clone()
    }

    pub fn engine(&self) -> Arc<PersonalizationEngine> {
        Arc::clone(&self.engine)
    }

    pub fn runtime(&self) -> Arc<RuntimeConfig> {
        Arc::clone(&self.runtime)
    }
}
