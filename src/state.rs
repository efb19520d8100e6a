use crate::error_reason::LastError;
use std::sync::{atomic::AtomicU64, Arc};
use tokio::sync::RwLock;
use tripwire::config::Config;
use tripwire::Breaker;

pub struct AppState {
    pub cfg: Arc<RwLock<Config>>,
    // Swapped wholesale when a reload changes the breaker section
    pub breaker: RwLock<Arc<Breaker>>,
    pub last_error: LastError,

    // Global counters for the live dashboard
    pub total_calls: AtomicU64,      // incoming POST /
    pub rejected_calls: AtomicU64,   // turned away by the breaker
    pub upstream_failures: AtomicU64,
}

impl AppState {
    pub fn new(cfg: Config) -> Self {
        let breaker = Breaker::new(cfg.breaker.to_options());
        Self {
            cfg: Arc::new(RwLock::new(cfg)),
            breaker: RwLock::new(Arc::new(breaker)),
            last_error: LastError::default(),
            total_calls: AtomicU64::new(0),
            rejected_calls: AtomicU64::new(0),
            upstream_failures: AtomicU64::new(0),
        }
    }

    pub async fn breaker(&self) -> Arc<Breaker> {
        self.breaker.read().await.clone()
    }

    /// Applies a reloaded config. Returns true when the breaker was replaced.
    pub async fn apply_config(&self, new_cfg: Config) -> bool {
        let options = new_cfg.breaker.to_options();
        // Held across the swap so overlapping reloads install breaker and config together
        let mut cfg = self.cfg.write().await;
        let rebuild = cfg.breaker != new_cfg.breaker;
        *cfg = new_cfg;
        if rebuild {
            *self.breaker.write().await = Arc::new(Breaker::new(options));
        }
        rebuild
    }
}
