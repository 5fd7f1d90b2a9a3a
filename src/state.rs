//! Shared application state and background task management.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::audit::AccessLogger;
use crate::config::Config;
use crate::middleware::{SecurityContext, SecurityLayer, SecurityOptions};
use crate::rate_limit::{InMemoryRateLimitStore, RateLimitStore};
use crate::store::{InMemoryDirectory, SubjectDirectory};
use crate::token::TokenCodec;

/// Shared handles threaded through the router.
///
/// Cheap to clone; every field is an `Arc` or equivalent.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub limiter: Arc<InMemoryRateLimitStore>,
    pub codec: Arc<TokenCodec>,
    pub audit: AccessLogger,
    pub directory: Arc<dyn SubjectDirectory>,
    pub started_at: Instant,
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Build state from validated configuration with the in-memory directory.
    pub fn new(config: Config) -> Self {
        Self::with_directory(config, Arc::new(InMemoryDirectory::new()))
    }

    /// Build state with an explicit subject directory.
    pub fn with_directory(config: Config, directory: Arc<dyn SubjectDirectory>) -> Self {
        let codec = Arc::new(TokenCodec::from_config(&config));
        Self {
            config: Arc::new(config),
            limiter: Arc::new(InMemoryRateLimitStore::new()),
            codec,
            audit: AccessLogger::new(),
            directory,
            started_at: Instant::now(),
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// The shared handles the security layers need.
    pub fn security_context(&self) -> SecurityContext {
        SecurityContext::new(
            Arc::clone(&self.config),
            Arc::clone(&self.limiter) as Arc<dyn RateLimitStore>,
            Arc::clone(&self.codec),
            self.audit.clone(),
        )
    }

    /// A pipeline layer for one route group.
    pub fn security_layer(&self, options: SecurityOptions) -> SecurityLayer {
        SecurityLayer::new(self.security_context(), options)
    }

    /// Start the periodic sweep that deletes expired rate-limit counters.
    pub fn spawn_cleanup_task(&self) {
        let limiter = Arc::clone(&self.limiter);
        let interval = self.config.rate_limits.cleanup_interval;
        let token = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // First tick fires immediately; skip it so startup stays quiet
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => {
                        debug!("Rate limit cleanup task stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        match limiter.cleanup() {
                            Ok(removed) if removed > 0 => {
                                debug!(removed, "Swept expired rate limit records");
                            }
                            Ok(_) => {}
                            Err(e) => warn!(error = %e, "Rate limit cleanup failed"),
                        }
                    }
                }
            }
        });
    }

    /// Stop background tasks and wait for them to finish.
    pub async fn shutdown(&self) {
        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;
        debug!("Background tasks stopped");
    }

    /// Seconds since the process started serving.
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
