pub mod agent;
pub mod commands;

use std::sync::Arc;

use crate::cache::FileStore;
use crate::clock::{Clock, SystemClock};
use crate::config::ClientConfig;
use crate::matcher::TimeMatcher;
use crate::sync::{RestApi, SyncCoordinator};
use crate::AppError;

/// The pieces every entry point shares, wired from config.
pub struct Core {
    pub sync: Arc<SyncCoordinator>,
    pub matcher: Arc<TimeMatcher>,
    pub clock: Arc<dyn Clock>,
}

pub fn build(cfg: &ClientConfig) -> Result<Core, AppError> {
    let tz = cfg.tz()?;
    let cache = FileStore::open(cfg.cache_file()?)?;
    tracing::debug!(path = %cache.path().display(), "cache opened");
    let matcher = Arc::new(TimeMatcher::new(tz));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let sync = Arc::new(SyncCoordinator::new(
        Arc::new(RestApi::new(cfg.base_url(), cfg.phone_number.clone())),
        Arc::new(cache),
        matcher.clone(),
        clock.clone(),
        cfg.alert_prefs(),
    ));
    Ok(Core {
        sync,
        matcher,
        clock,
    })
}
