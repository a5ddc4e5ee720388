use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use walkdir::{DirEntry, WalkDir};

use crate::model::{Candidate, Permission, Query, SourceType};
use crate::ranking;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("permission denied: {0:?}")]
    PermissionDenied(Permission),
    #[error("{source_type} source unavailable: {message}")]
    Unavailable {
        source_type: SourceType,
        message: String,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Document,
    Image,
    Audio,
    Video,
    Archive,
    Other,
}

impl FileType {
    pub fn classify(path: &Path) -> Self {
        let extension = path
            .extension()
            .and_then(|value| value.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match extension.as_str() {
            "pdf" | "doc" | "docx" | "odt" | "txt" | "md" | "rtf" | "xls" | "xlsx" | "ods"
            | "csv" | "ppt" | "pptx" | "odp" => Self::Document,
            "png" | "jpg" | "jpeg" | "gif" | "webp" | "heic" | "bmp" | "svg" => Self::Image,
            "mp3" | "flac" | "ogg" | "wav" | "m4a" | "opus" => Self::Audio,
            "mp4" | "mkv" | "webm" | "mov" | "avi" => Self::Video,
            "zip" | "tar" | "gz" | "7z" | "rar" | "xz" => Self::Archive,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileFilters {
    /// Allowed file types; empty allows every type.
    pub types: Vec<FileType>,
    pub show_folders: bool,
    pub show_system: bool,
    pub show_hidden: bool,
}

impl Default for FileFilters {
    fn default() -> Self {
        Self {
            types: Vec::new(),
            show_folders: true,
            show_system: false,
            show_hidden: false,
        }
    }
}

/// Per-source knobs that travel with every search call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchFilters {
    pub contact_limit: usize,
    pub files: FileFilters,
}

impl Default for SearchFilters {
    fn default() -> Self {
        Self {
            contact_limit: 10,
            files: FileFilters::default(),
        }
    }
}

/// Boundary every data source is adapted to.
///
/// Sources may return candidates that do not match the query; ranking drops
/// them. A source that caps its output must apply the cap after matching, so
/// non-matches never crowd out real hits. Failures are reported as errors and
/// turned into an empty section by the aggregator.
pub trait SearchSource: Send + Sync {
    fn source_type(&self) -> SourceType;
    fn search(&self, query: &Query, filters: &SearchFilters) -> Result<Vec<Candidate>, SourceError>;

    /// Looks up known ids, honoring the same filters as `search`.
    fn fetch_by_ids(
        &self,
        ids: &[String],
        filters: &SearchFilters,
    ) -> Result<Vec<Candidate>, SourceError>;

    /// Changes whenever the underlying data is refreshed.
    fn revision(&self) -> u64 {
        0
    }

    /// Candidates offered while the query is blank.
    fn suggestions(&self, _limit: usize) -> Result<Vec<Candidate>, SourceError> {
        Ok(Vec::new())
    }
}

fn matches_query(candidate: &Candidate, query: &Query) -> bool {
    ranking::matches(candidate, query)
}

fn select_by_ids(items: &[Candidate], ids: &[String]) -> Vec<Candidate> {
    items
        .iter()
        .filter(|item| ids.iter().any(|id| *id == item.key))
        .cloned()
        .collect()
}

#[derive(Debug, Default)]
struct AppCacheState {
    version: u64,
    apps: Arc<Vec<Candidate>>,
}

/// Installed-app catalog shared with the app source.
///
/// Refreshed only by `replace` and `invalidate`; every refresh bumps the
/// version so holders of an old snapshot can tell it apart.
#[derive(Debug, Default)]
pub struct AppCache {
    state: RwLock<AppCacheState>,
}

impl AppCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_apps(apps: Vec<Candidate>) -> Self {
        let cache = Self::default();
        cache.replace(apps);
        cache
    }

    pub fn replace(&self, apps: Vec<Candidate>) -> u64 {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.version += 1;
        state.apps = Arc::new(apps);
        state.version
    }

    pub fn invalidate(&self) -> u64 {
        self.replace(Vec::new())
    }

    pub fn version(&self) -> u64 {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .version
    }

    pub fn snapshot(&self) -> Arc<Vec<Candidate>> {
        Arc::clone(
            &self
                .state
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .apps,
        )
    }
}

pub struct CachedAppSource {
    cache: Arc<AppCache>,
}

impl CachedAppSource {
    pub fn new(cache: Arc<AppCache>) -> Self {
        Self { cache }
    }
}

impl SearchSource for CachedAppSource {
    fn source_type(&self) -> SourceType {
        SourceType::App
    }

    fn search(&self, query: &Query, _filters: &SearchFilters) -> Result<Vec<Candidate>, SourceError> {
        Ok(self
            .cache
            .snapshot()
            .iter()
            .filter(|app| matches_query(app, query))
            .cloned()
            .collect())
    }

    fn fetch_by_ids(
        &self,
        ids: &[String],
        _filters: &SearchFilters,
    ) -> Result<Vec<Candidate>, SourceError> {
        Ok(select_by_ids(&self.cache.snapshot(), ids))
    }

    fn revision(&self) -> u64 {
        self.cache.version()
    }

    fn suggestions(&self, limit: usize) -> Result<Vec<Candidate>, SourceError> {
        let mut apps: Vec<Candidate> = self
            .cache
            .snapshot()
            .iter()
            .filter(|app| app.usage.is_some())
            .cloned()
            .collect();
        apps.sort_by(|a, b| {
            b.usage
                .cmp(&a.usage)
                .then_with(|| a.normalized_name().cmp(b.normalized_name()))
        });
        apps.truncate(limit);
        Ok(apps)
    }
}

/// Small fixed catalog such as device settings or app shortcuts.
pub struct CatalogSource {
    source_type: SourceType,
    items: Vec<Candidate>,
}

impl CatalogSource {
    pub fn new(source_type: SourceType, items: Vec<Candidate>) -> Self {
        Self { source_type, items }
    }

    pub fn device_settings() -> Self {
        let entries: &[(&str, &str)] = &[
            ("android.settings.WIFI_SETTINGS", "Wi-Fi"),
            ("android.settings.BLUETOOTH_SETTINGS", "Bluetooth"),
            ("android.settings.DISPLAY_SETTINGS", "Display"),
            ("android.settings.SOUND_SETTINGS", "Sound"),
            ("android.settings.BATTERY_SAVER_SETTINGS", "Battery"),
            ("android.settings.APPLICATION_SETTINGS", "Apps"),
            ("android.settings.INTERNAL_STORAGE_SETTINGS", "Storage"),
            ("android.settings.LOCATION_SOURCE_SETTINGS", "Location"),
            ("android.settings.SECURITY_SETTINGS", "Security"),
            ("android.settings.ACCESSIBILITY_SETTINGS", "Accessibility"),
            ("android.settings.DATE_SETTINGS", "Date & time"),
            ("android.settings.DEVICE_INFO_SETTINGS", "About phone"),
        ];
        Self::new(
            SourceType::Setting,
            entries
                .iter()
                .map(|(id, name)| Candidate::new(SourceType::Setting, id, name).with_detail(id))
                .collect(),
        )
    }
}

impl SearchSource for CatalogSource {
    fn source_type(&self) -> SourceType {
        self.source_type
    }

    fn search(&self, query: &Query, _filters: &SearchFilters) -> Result<Vec<Candidate>, SourceError> {
        Ok(self
            .items
            .iter()
            .filter(|item| matches_query(item, query))
            .cloned()
            .collect())
    }

    fn fetch_by_ids(
        &self,
        ids: &[String],
        _filters: &SearchFilters,
    ) -> Result<Vec<Candidate>, SourceError> {
        Ok(select_by_ids(&self.items, ids))
    }
}

/// Contact directory held in memory, guarded by a revocable permission.
pub struct InMemoryContactSource {
    contacts: Vec<Candidate>,
    permission_granted: AtomicBool,
}

impl InMemoryContactSource {
    pub fn from_contacts(contacts: Vec<Candidate>) -> Self {
        Self {
            contacts,
            permission_granted: AtomicBool::new(true),
        }
    }

    pub fn set_permission_granted(&self, granted: bool) {
        self.permission_granted.store(granted, Ordering::SeqCst);
    }

    fn ensure_permission(&self) -> Result<(), SourceError> {
        if self.permission_granted.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SourceError::PermissionDenied(Permission::Contacts))
        }
    }
}

impl SearchSource for InMemoryContactSource {
    fn source_type(&self) -> SourceType {
        SourceType::Contact
    }

    fn search(&self, query: &Query, filters: &SearchFilters) -> Result<Vec<Candidate>, SourceError> {
        self.ensure_permission()?;
        Ok(self
            .contacts
            .iter()
            .filter(|contact| matches_query(contact, query))
            .take(filters.contact_limit)
            .cloned()
            .collect())
    }

    fn fetch_by_ids(
        &self,
        ids: &[String],
        _filters: &SearchFilters,
    ) -> Result<Vec<Candidate>, SourceError> {
        self.ensure_permission()?;
        Ok(select_by_ids(&self.contacts, ids))
    }
}

const FILE_URI_PREFIX: &str = "file://";

/// Scans configured roots on every search.
pub struct FileSystemSource {
    roots: Vec<PathBuf>,
    max_depth: usize,
    max_results: usize,
}

impl FileSystemSource {
    pub fn new(roots: Vec<PathBuf>, max_depth: usize) -> Self {
        Self {
            roots,
            max_depth,
            max_results: 200,
        }
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    fn accepts(&self, entry: &DirEntry, filters: &FileFilters) -> bool {
        self.accepts_path(entry.path(), entry.file_type().is_dir(), filters)
    }

    /// Dot-prefixed anywhere below its scan root, matching what `search` skips.
    fn is_hidden_path(&self, path: &Path) -> bool {
        match self
            .roots
            .iter()
            .find_map(|root| path.strip_prefix(root).ok())
        {
            Some(relative) => relative
                .components()
                .any(|component| is_dot_name(component.as_os_str())),
            None => path.file_name().is_some_and(is_dot_name),
        }
    }

    fn accepts_path(&self, path: &Path, is_dir: bool, filters: &FileFilters) -> bool {
        let name = path
            .file_name()
            .map(|value| value.to_string_lossy())
            .unwrap_or_default();
        if !filters.show_system && is_system_file(&name) {
            return false;
        }
        if is_dir {
            return filters.show_folders;
        }
        filters.types.is_empty() || filters.types.contains(&FileType::classify(path))
    }
}

impl SearchSource for FileSystemSource {
    fn source_type(&self) -> SourceType {
        SourceType::File
    }

    fn search(&self, query: &Query, filters: &SearchFilters) -> Result<Vec<Candidate>, SourceError> {
        let file_filters = &filters.files;
        let mut out = Vec::new();
        for root in &self.roots {
            let walker = WalkDir::new(root)
                .min_depth(1)
                .max_depth(self.max_depth)
                .into_iter()
                .filter_entry(|entry| file_filters.show_hidden || !is_hidden(entry));
            for entry in walker.filter_map(|entry| entry.ok()) {
                if !self.accepts(&entry, file_filters) {
                    continue;
                }
                let candidate = file_candidate(entry.path());
                if !matches_query(&candidate, query) {
                    continue;
                }
                out.push(candidate);
                if out.len() >= self.max_results {
                    return Ok(out);
                }
            }
        }
        Ok(out)
    }

    fn fetch_by_ids(
        &self,
        ids: &[String],
        filters: &SearchFilters,
    ) -> Result<Vec<Candidate>, SourceError> {
        let file_filters = &filters.files;
        Ok(ids
            .iter()
            .filter_map(|uri| uri.strip_prefix(FILE_URI_PREFIX))
            .map(Path::new)
            .filter(|path| file_filters.show_hidden || !self.is_hidden_path(path))
            .filter_map(|path| {
                let is_dir = std::fs::metadata(path).ok()?.is_dir();
                self.accepts_path(path, is_dir, file_filters)
                    .then(|| file_candidate(path))
            })
            .collect())
    }
}

pub fn file_uri(path: &Path) -> String {
    format!("{FILE_URI_PREFIX}{}", path.to_string_lossy())
}

fn file_candidate(path: &Path) -> Candidate {
    let name = path
        .file_name()
        .map(|value| value.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned());
    let candidate = Candidate::from_owned(SourceType::File, file_uri(path), name)
        .with_detail(&path.to_string_lossy());
    match modified_epoch_secs(path) {
        Some(modified) => candidate.with_usage(modified),
        None => candidate,
    }
}

fn modified_epoch_secs(path: &Path) -> Option<u64> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    modified
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|duration| duration.as_secs())
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with('.'))
}

fn is_dot_name(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|name| name.starts_with('.'))
}

fn is_system_file(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    matches!(lower.as_str(), "thumbs.db" | "desktop.ini" | "lost+found")
        || lower.starts_with("~$")
        || lower.ends_with(".sys")
}
