use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::aggregator::{AggregatorSettings, SourceAggregator};
use crate::calculator::CalculatorClassifier;
use crate::config::{validate, Config, ConfigError};
use crate::contract::{AckResponse, CoreRequest, CoreResponse, SnapshotDto};
use crate::controller::{ControllerSettings, QueryController, SearchSnapshot};
use crate::model::{Candidate, SourceType};
use crate::preference_store::{ExclusionPurpose, PreferenceEditor, SqlitePreferenceStore, StoreError};
use crate::section_order::{PermissionProvider, StaticPermissions};
use crate::shortcuts::ShortcutTable;
use crate::sources::{AppCache, CachedAppSource, CatalogSource, FileSystemSource, SearchSource};
use crate::worker_pool::{PoolError, WorkerPool};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("worker pool error: {0}")]
    Pool(#[from] PoolError),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Sources and permissions the standalone runtime wires up.
pub struct RuntimeSources {
    pub app_cache: Arc<AppCache>,
    pub sources: Vec<Arc<dyn SearchSource>>,
    pub permissions: Arc<dyn PermissionProvider>,
}

pub fn runtime_sources(config: &Config) -> RuntimeSources {
    let app_cache = Arc::new(AppCache::new());
    let mut sources: Vec<Arc<dyn SearchSource>> = vec![
        Arc::new(CachedAppSource::new(Arc::clone(&app_cache))),
        Arc::new(CatalogSource::device_settings()),
    ];
    let mut granted = Vec::new();
    if !config.file_roots.is_empty() {
        sources.push(Arc::new(FileSystemSource::new(
            config.file_roots.clone(),
            config.file_scan_depth,
        )));
        granted.push(crate::model::Permission::Storage);
    }
    RuntimeSources {
        app_cache,
        sources,
        permissions: Arc::new(StaticPermissions::with_granted(&granted)),
    }
}

pub struct CoreService {
    config: Config,
    preferences: Arc<SqlitePreferenceStore>,
    controller: QueryController,
    app_cache: Option<Arc<AppCache>>,
}

impl CoreService {
    pub fn new(
        config: Config,
        sources: Vec<Arc<dyn SearchSource>>,
        permissions: Arc<dyn PermissionProvider>,
    ) -> Result<Self, ServiceError> {
        validate(&config)?;
        if let Some(parent) = config.preferences_db_path.parent() {
            std::fs::create_dir_all(parent).map_err(StoreError::from)?;
        }
        let store = SqlitePreferenceStore::open(&config.preferences_db_path)?;
        Self::with_store(config, Arc::new(store), sources, permissions)
    }

    pub fn with_store(
        config: Config,
        preferences: Arc<SqlitePreferenceStore>,
        sources: Vec<Arc<dyn SearchSource>>,
        permissions: Arc<dyn PermissionProvider>,
    ) -> Result<Self, ServiceError> {
        validate(&config)?;
        let pool = WorkerPool::new(config.worker_threads)?;

        let mut aggregator =
            SourceAggregator::new(preferences.clone(), AggregatorSettings::from_config(&config));
        for source in sources {
            aggregator = aggregator.with_source(source);
        }
        info!(
            sources = aggregator.source_types().len(),
            workers = config.worker_threads,
            "search service ready"
        );

        let controller = QueryController::new(
            Arc::new(aggregator),
            Arc::new(pool),
            preferences.clone(),
            permissions,
            ControllerSettings::from_config(&config),
        )
        .with_shortcuts(Box::new(ShortcutTable::from_config_or_disabled(
            &config.shortcuts,
        )));

        Ok(Self {
            config,
            preferences,
            controller,
            app_cache: None,
        })
    }

    /// Standalone wiring: app cache, device settings and configured file roots.
    pub fn from_config(config: Config) -> Result<Self, ServiceError> {
        let runtime = runtime_sources(&config);
        Ok(Self::new(config, runtime.sources, runtime.permissions)?.with_app_cache(runtime.app_cache))
    }

    pub fn with_calculator(mut self, calculator: Box<dyn CalculatorClassifier>) -> Self {
        self.controller = self.controller.with_calculator(calculator);
        self
    }

    /// Lets `set_apps` refresh the catalog behind the app source.
    pub fn with_app_cache(mut self, cache: Arc<AppCache>) -> Self {
        self.app_cache = Some(cache);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn controller(&self) -> &QueryController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut QueryController {
        &mut self.controller
    }

    fn settle_timeout(&self) -> Duration {
        Duration::from_millis(self.config.settle_timeout_ms)
    }

    /// Runs `raw` and waits for the background sections of its generation.
    pub fn query(&mut self, raw: &str) -> &SearchSnapshot {
        let timeout = self.settle_timeout();
        self.controller.set_query(raw);
        self.controller.settle(timeout);
        self.controller.snapshot()
    }

    pub fn clear(&mut self) -> &SearchSnapshot {
        self.controller.clear()
    }

    pub fn snapshot(&mut self) -> &SearchSnapshot {
        self.controller.drain_completions();
        self.controller.snapshot()
    }

    fn rerun(&mut self) -> u64 {
        let timeout = self.settle_timeout();
        self.controller.rerun();
        self.controller.settle(timeout);
        self.controller.generation()
    }

    pub fn pin(&mut self, source: SourceType, id: &str) -> Result<u64, ServiceError> {
        self.preferences.pin(source, require_id(id)?)?;
        Ok(self.rerun())
    }

    pub fn unpin(&mut self, source: SourceType, id: &str) -> Result<u64, ServiceError> {
        self.preferences.unpin(source, require_id(id)?)?;
        Ok(self.rerun())
    }

    pub fn exclude(
        &mut self,
        source: SourceType,
        id: &str,
        purpose: ExclusionPurpose,
    ) -> Result<u64, ServiceError> {
        self.preferences.exclude(source, require_id(id)?, purpose)?;
        Ok(self.rerun())
    }

    pub fn include(
        &mut self,
        source: SourceType,
        id: &str,
        purpose: ExclusionPurpose,
    ) -> Result<u64, ServiceError> {
        self.preferences.include(source, require_id(id)?, purpose)?;
        Ok(self.rerun())
    }

    pub fn set_nickname(
        &mut self,
        source: SourceType,
        id: &str,
        nickname: Option<&str>,
    ) -> Result<u64, ServiceError> {
        let id = require_id(id)?;
        match nickname {
            Some(value) => self.preferences.set_nickname(source, id, value)?,
            None => self.preferences.clear_nickname(source, id)?,
        }
        Ok(self.rerun())
    }

    pub fn set_section_order(&mut self, order: &[SourceType]) -> Result<u64, ServiceError> {
        self.preferences.set_section_order(order)?;
        Ok(self.rerun())
    }

    pub fn set_section_disabled(
        &mut self,
        source: SourceType,
        disabled: bool,
    ) -> Result<u64, ServiceError> {
        self.preferences.set_section_disabled(source, disabled)?;
        Ok(self.rerun())
    }

    pub fn set_apps(&mut self, apps: Vec<Candidate>) -> Result<u64, ServiceError> {
        let cache = self
            .app_cache
            .as_ref()
            .ok_or_else(|| ServiceError::InvalidRequest("no app catalog is attached".into()))?;
        let version = cache.replace(apps);
        info!(version, "app catalog replaced");
        Ok(self.rerun())
    }

    pub fn handle_command(&mut self, request: CoreRequest) -> Result<CoreResponse, ServiceError> {
        let generation = match request {
            CoreRequest::Query(payload) => {
                let snapshot = self.query(&payload.query);
                return Ok(CoreResponse::Snapshot(SnapshotDto::from(snapshot)));
            }
            CoreRequest::Clear => {
                let snapshot = self.clear();
                return Ok(CoreResponse::Snapshot(SnapshotDto::from(snapshot)));
            }
            CoreRequest::Snapshot => {
                let snapshot = self.snapshot();
                return Ok(CoreResponse::Snapshot(SnapshotDto::from(snapshot)));
            }
            CoreRequest::Pin(item) => self.pin(item.source, &item.id)?,
            CoreRequest::Unpin(item) => self.unpin(item.source, &item.id)?,
            CoreRequest::Exclude(item) => self.exclude(item.source, &item.id, item.purpose)?,
            CoreRequest::Include(item) => self.include(item.source, &item.id, item.purpose)?,
            CoreRequest::SetNickname(payload) => {
                self.set_nickname(payload.source, &payload.id, payload.nickname.as_deref())?
            }
            CoreRequest::SetSectionOrder(payload) => self.set_section_order(&payload.order)?,
            CoreRequest::SetSectionDisabled(payload) => {
                self.set_section_disabled(payload.source, payload.disabled)?
            }
            CoreRequest::SetApps(payload) => {
                self.set_apps(payload.apps.into_iter().map(Candidate::from).collect())?
            }
        };
        Ok(CoreResponse::Ack(AckResponse { generation }))
    }
}

fn require_id(id: &str) -> Result<&str, ServiceError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::InvalidRequest("id must not be empty".into()));
    }
    Ok(trimmed)
}
