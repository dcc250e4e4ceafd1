pub mod form_sync;
pub mod prices;
pub mod submissions;

use anyhow::Result;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::api::error::ApiError;
use crate::auth::{AuthProvider, HostedAuth};
use crate::config::Config;
use crate::domain::DomainError;
use crate::notify::{build_notifier, Notifier};
use crate::store::{build_store, PriceStore, StoreError};

pub use form_sync::{FormSync, SyncReport};
pub use prices::PriceService;
pub use submissions::SubmissionService;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    PartialFailure(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Internal(String),
}

impl From<ServiceError> for ApiError {
    fn from(error: ServiceError) -> Self {
        match error {
            ServiceError::Store(e) => e.into(),
            ServiceError::Domain(e) => e.into(),
            ServiceError::NotFound(m) => ApiError::NotFound(m),
            ServiceError::PartialFailure(m) => ApiError::PartialFailure(m),
            ServiceError::Unavailable(m) => ApiError::ServiceUnavailable(m),
            ServiceError::Internal(m) => ApiError::InternalError(m),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub cfg: Config,
    pub store: Arc<dyn PriceStore>,
    pub auth: Arc<dyn AuthProvider>,
    pub prices: Arc<PriceService>,
    pub submissions: Arc<SubmissionService>,
    pub sync: Arc<FormSync>,
}

impl AppState {
    pub async fn new(cfg: Config) -> Result<Self> {
        let store = build_store(&cfg).await?;
        let auth: Arc<dyn AuthProvider> = Arc::new(HostedAuth::new(&cfg.backend)?);
        let notifier = build_notifier(&cfg)?;
        Self::from_parts(cfg, store, auth, notifier)
    }

    /// Wire the services over already-built seams
    pub fn from_parts(
        cfg: Config,
        store: Arc<dyn PriceStore>,
        auth: Arc<dyn AuthProvider>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let prices = Arc::new(PriceService::new(store.clone(), cfg.merge.coverage, cfg.merge.page_size));
        let submissions = Arc::new(SubmissionService::new(store.clone(), notifier));
        let sync = Arc::new(FormSync::new(store.clone(), &cfg.sync, &cfg.backend)?);
        Ok(Self {
            cfg,
            store,
            auth,
            prices,
            submissions,
            sync,
        })
    }
}

pub fn spawn_background_tasks(state: AppState, cfg: Config) {
    if !cfg.sync.enabled {
        info!("form sync disabled");
        return;
    }
    let sync = state.sync.clone();
    tokio::spawn(async move { form_sync_loop(sync, cfg.sync.interval_minutes).await });
}

async fn form_sync_loop(sync: Arc<FormSync>, every_minutes: u64) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(every_minutes.max(1) * 60));
    loop {
        interval.tick().await;
        if let Err(e) = sync.run().await {
            warn!(error = %e, "form sync failed");
        }
    }
}
