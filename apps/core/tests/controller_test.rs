use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};
use launchsearch_core::aggregator::{AggregatorSettings, SourceAggregator};
use launchsearch_core::calculator::CalculatorResult;
use launchsearch_core::controller::{ControllerSettings, QueryController, QueryPhase};
use launchsearch_core::model::{Candidate, Permission, Query, SourceType};
use launchsearch_core::preference_store::{
    ExclusionPurpose, PreferenceEditor, PreferenceStore, SqlitePreferenceStore,
};
use launchsearch_core::section_order::{Slot, StaticPermissions};
use launchsearch_core::shortcuts::{default_shortcuts, ShortcutTable};
use launchsearch_core::sources::{
    AppCache, CachedAppSource, InMemoryContactSource, SearchFilters, SearchSource, SourceError,
};
use launchsearch_core::worker_pool::WorkerPool;

const SETTLE: Duration = Duration::from_secs(5);

/// Contact source whose searches block until the test opens the gate for that query.
struct GatedContacts {
    contacts: Vec<Candidate>,
    gates: Mutex<HashMap<String, Receiver<()>>>,
}

impl GatedContacts {
    fn new(contacts: Vec<Candidate>) -> Self {
        Self {
            contacts,
            gates: Mutex::new(HashMap::new()),
        }
    }

    fn gate(&self, query: &str) -> Sender<()> {
        let (sender, receiver) = bounded(1);
        self.gates.lock().unwrap().insert(query.to_string(), receiver);
        sender
    }
}

impl SearchSource for GatedContacts {
    fn source_type(&self) -> SourceType {
        SourceType::Contact
    }

    fn search(&self, query: &Query, _filters: &SearchFilters) -> Result<Vec<Candidate>, SourceError> {
        let gate = self.gates.lock().unwrap().get(query.normalized()).cloned();
        if let Some(gate) = gate {
            let _ = gate.recv_timeout(SETTLE);
        }
        Ok(self
            .contacts
            .iter()
            .filter(|contact| contact.normalized_name().contains(query.normalized()))
            .cloned()
            .collect())
    }

    fn fetch_by_ids(
        &self,
        ids: &[String],
        _filters: &SearchFilters,
    ) -> Result<Vec<Candidate>, SourceError> {
        Ok(self
            .contacts
            .iter()
            .filter(|contact| ids.contains(&contact.key))
            .cloned()
            .collect())
    }
}

struct CountingSettings {
    calls: AtomicUsize,
}

impl SearchSource for CountingSettings {
    fn source_type(&self) -> SourceType {
        SourceType::Setting
    }

    fn search(&self, _query: &Query, _filters: &SearchFilters) -> Result<Vec<Candidate>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![Candidate::new(SourceType::Setting, "display", "Display 2+2")])
    }

    fn fetch_by_ids(
        &self,
        _ids: &[String],
        _filters: &SearchFilters,
    ) -> Result<Vec<Candidate>, SourceError> {
        Ok(Vec::new())
    }
}

/// Settings catalog that can change without reporting a new revision.
struct MutableSettings {
    items: Mutex<Vec<Candidate>>,
}

impl SearchSource for MutableSettings {
    fn source_type(&self) -> SourceType {
        SourceType::Setting
    }

    fn search(&self, query: &Query, _filters: &SearchFilters) -> Result<Vec<Candidate>, SourceError> {
        Ok(self
            .items
            .lock()
            .unwrap()
            .iter()
            .filter(|item| item.normalized_name().contains(query.normalized()))
            .cloned()
            .collect())
    }

    fn fetch_by_ids(
        &self,
        _ids: &[String],
        _filters: &SearchFilters,
    ) -> Result<Vec<Candidate>, SourceError> {
        Ok(Vec::new())
    }
}

fn app_source() -> Arc<CachedAppSource> {
    Arc::new(CachedAppSource::new(Arc::new(AppCache::with_apps(vec![
        Candidate::new(SourceType::App, "com.google.maps", "Maps").with_usage(90),
        Candidate::new(SourceType::App, "com.spotify", "Spotify").with_usage(70),
        Candidate::new(SourceType::App, "com.sparrow", "Sparrow").with_usage(10),
        Candidate::new(SourceType::App, "com.mail", "Mail").with_usage(40),
        Candidate::new(SourceType::App, "com.camera", "Camera"),
    ]))))
}

fn controller_with(
    store: Arc<SqlitePreferenceStore>,
    permissions: Arc<StaticPermissions>,
    sources: Vec<Arc<dyn SearchSource>>,
    settings: ControllerSettings,
) -> QueryController {
    let mut aggregator = SourceAggregator::new(store.clone(), AggregatorSettings::default());
    for source in sources {
        aggregator = aggregator.with_source(source);
    }
    QueryController::new(
        Arc::new(aggregator),
        Arc::new(WorkerPool::new(2).unwrap()),
        store,
        permissions,
        settings,
    )
}

fn contacts() -> Vec<Candidate> {
    vec![
        Candidate::new(SourceType::Contact, "1", "Alice Smith"),
        Candidate::new(SourceType::Contact, "2", "Albert Jones"),
    ]
}

#[test]
fn stale_completion_never_overwrites_newer_generation() {
    let store = Arc::new(SqlitePreferenceStore::open_memory().unwrap());
    let gated = Arc::new(GatedContacts::new(contacts()));
    let release_first = gated.gate("al");
    let mut controller = controller_with(
        store,
        Arc::new(StaticPermissions::all_granted()),
        vec![gated.clone()],
        ControllerSettings::default(),
    );

    controller.set_query("al");
    let first_generation = controller.generation();
    assert!(controller.snapshot().pending.contains(&SourceType::Contact));

    controller.set_query("alice");
    let second_generation = controller.generation();
    assert!(second_generation > first_generation);
    assert!(controller.settle(SETTLE));
    assert_eq!(
        controller.snapshot().section(SourceType::Contact).unwrap().keys(),
        ["1"]
    );

    release_first.send(()).unwrap();
    let deadline = Instant::now() + SETTLE;
    while controller.discarded_count() == 0 && Instant::now() < deadline {
        controller.drain_completions();
        std::thread::sleep(Duration::from_millis(5));
    }

    assert_eq!(controller.discarded_count(), 1);
    let section = controller.snapshot().section(SourceType::Contact).unwrap();
    assert_eq!(section.generation(), second_generation);
    assert_eq!(section.keys(), ["1"]);
}

#[test]
fn calculator_result_skips_dispatch() {
    let store = Arc::new(SqlitePreferenceStore::open_memory().unwrap());
    let settings_source = Arc::new(CountingSettings {
        calls: AtomicUsize::new(0),
    });
    let mut controller = controller_with(
        store,
        Arc::new(StaticPermissions::all_granted()),
        vec![app_source(), settings_source.clone()],
        ControllerSettings::default(),
    )
    .with_calculator(Box::new(|text: &str| {
        (text == "2+2").then(|| CalculatorResult::new(text, 4.0))
    }));

    let snapshot = controller.set_query("2+2");
    assert_eq!(snapshot.phase, QueryPhase::ShortCircuited);
    assert!(snapshot.sections.is_empty());
    assert!(snapshot.pending.is_empty());
    assert!(snapshot.layout.contains(&Slot::Calculator));

    assert!(controller.settle(Duration::from_millis(50)));
    assert_eq!(settings_source.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn trailing_shortcut_emits_navigation_and_searches_residual() {
    let store = Arc::new(SqlitePreferenceStore::open_memory().unwrap());
    let mut controller = controller_with(
        store,
        Arc::new(StaticPermissions::all_granted()),
        vec![app_source()],
        ControllerSettings::default(),
    )
    .with_shortcuts(Box::new(ShortcutTable::from_entries(default_shortcuts()).unwrap()));

    let snapshot = controller.set_query("maps ddg");
    assert_eq!(snapshot.phase, QueryPhase::Evaluating);
    assert_eq!(snapshot.query, "maps");
    assert_eq!(
        snapshot.section(SourceType::App).unwrap().keys(),
        ["com.google.maps"]
    );

    let event = controller.take_navigation().unwrap();
    assert_eq!(event.label, "DuckDuckGo");
    assert_eq!(event.url, "https://duckduckgo.com/?q=maps");
    assert!(controller.take_navigation().is_none());
}

#[test]
fn debounce_applies_only_settled_input() {
    let store = Arc::new(SqlitePreferenceStore::open_memory().unwrap());
    let settings = ControllerSettings {
        debounce: Duration::from_millis(100),
        ..ControllerSettings::default()
    };
    let mut controller = controller_with(
        store,
        Arc::new(StaticPermissions::all_granted()),
        vec![app_source()],
        settings,
    );
    let start = controller.generation();
    let t0 = Instant::now();

    controller.on_keystroke("ma", t0);
    assert!(!controller.tick(t0 + Duration::from_millis(50)));
    controller.on_keystroke("map", t0 + Duration::from_millis(60));
    assert!(!controller.tick(t0 + Duration::from_millis(120)));
    assert_eq!(controller.generation(), start);

    assert!(controller.tick(t0 + Duration::from_millis(160)));
    assert_eq!(controller.generation(), start + 1);
    assert_eq!(controller.snapshot().query, "map");
    assert!(!controller.tick(t0 + Duration::from_millis(400)));
}

#[test]
fn idle_publishes_favorites_and_filtered_suggestions() {
    let store = Arc::new(SqlitePreferenceStore::open_memory().unwrap());
    store.pin(SourceType::App, "com.mail").unwrap();
    store
        .exclude(SourceType::App, "com.google.maps", ExclusionPurpose::Suggestions)
        .unwrap();
    let mut controller = controller_with(
        store,
        Arc::new(StaticPermissions::all_granted()),
        vec![app_source()],
        ControllerSettings::default(),
    );

    controller.set_query("spot");
    let snapshot = controller.clear();
    assert_eq!(snapshot.phase, QueryPhase::Idle);
    assert!(snapshot.sections.is_empty());
    assert_eq!(snapshot.layout.first(), Some(&Slot::Favorites));

    let favorites: Vec<&str> = snapshot.favorites.iter().map(|c| c.key.as_str()).collect();
    assert_eq!(favorites, ["com.mail"]);
    let suggestions: Vec<&str> = snapshot.suggestions.iter().map(|c| c.key.as_str()).collect();
    assert_eq!(suggestions, ["com.spotify", "com.sparrow"]);
}

#[test]
fn revoked_permission_hides_section_without_touching_preferences() {
    let store = Arc::new(SqlitePreferenceStore::open_memory().unwrap());
    let permissions = Arc::new(StaticPermissions::all_granted());
    let contacts = Arc::new(InMemoryContactSource::from_contacts(contacts()));
    let mut controller = controller_with(
        store.clone(),
        permissions.clone(),
        vec![app_source(), contacts],
        ControllerSettings::default(),
    );

    controller.set_query("alice");
    assert!(controller.settle(SETTLE));
    assert_eq!(controller.snapshot().section(SourceType::Contact).unwrap().len(), 1);

    permissions.revoke(Permission::Contacts);
    controller.refresh_layout();
    let snapshot = controller.snapshot();
    assert!(snapshot.section(SourceType::Contact).is_none());
    assert!(!snapshot.layout.contains(&Slot::Section(SourceType::Contact)));
    assert_eq!(snapshot.layout.first(), Some(&Slot::ErrorBanner));
    assert!(store.disabled_sections().unwrap().is_empty());

    controller.rerun();
    assert!(controller.snapshot().pending.is_empty() || controller.settle(SETTLE));
    assert!(controller.snapshot().section(SourceType::Contact).is_none());

    permissions.grant(Permission::Contacts);
    controller.rerun();
    assert!(controller.settle(SETTLE));
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.section(SourceType::Contact).unwrap().len(), 1);
    assert!(!snapshot.layout.contains(&Slot::ErrorBanner));
}

#[test]
fn regranted_permission_dispatches_section_in_current_generation() {
    let store = Arc::new(SqlitePreferenceStore::open_memory().unwrap());
    let permissions = Arc::new(StaticPermissions::all_granted());
    permissions.revoke(Permission::Contacts);
    let mut controller = controller_with(
        store,
        permissions.clone(),
        vec![app_source(), Arc::new(InMemoryContactSource::from_contacts(contacts()))],
        ControllerSettings::default(),
    );

    controller.set_query("alice");
    assert!(controller.settle(SETTLE));
    assert!(controller.snapshot().section(SourceType::Contact).is_none());
    let generation = controller.generation();

    permissions.grant(Permission::Contacts);
    controller.refresh_layout();
    assert!(controller.snapshot().pending.contains(&SourceType::Contact));
    assert!(controller.settle(SETTLE));

    assert_eq!(controller.generation(), generation);
    let section = controller.snapshot().section(SourceType::Contact).unwrap();
    assert_eq!(section.keys(), ["1"]);
    assert_eq!(section.generation(), generation);
}

#[test]
fn rerun_forgets_empty_prefixes() {
    let store = Arc::new(SqlitePreferenceStore::open_memory().unwrap());
    let source = Arc::new(MutableSettings {
        items: Mutex::new(Vec::new()),
    });
    let settings = AggregatorSettings {
        skip_after_empty_prefix: true,
        ..AggregatorSettings::default()
    };
    let aggregator = SourceAggregator::new(store.clone(), settings).with_source(source.clone());
    let mut controller = QueryController::new(
        Arc::new(aggregator),
        Arc::new(WorkerPool::new(1).unwrap()),
        store,
        Arc::new(StaticPermissions::all_granted()),
        ControllerSettings::default(),
    );

    controller.set_query("ter");
    assert!(controller.settle(SETTLE));
    assert!(controller.snapshot().section(SourceType::Setting).unwrap().is_empty());

    *source.items.lock().unwrap() =
        vec![Candidate::new(SourceType::Setting, "term", "Terminal settings")];
    controller.set_query("term");
    assert!(controller.settle(SETTLE));
    assert!(controller.snapshot().section(SourceType::Setting).unwrap().is_empty());

    controller.rerun();
    assert!(controller.settle(SETTLE));
    assert_eq!(
        controller.snapshot().section(SourceType::Setting).unwrap().keys(),
        ["term"]
    );
}

#[test]
fn user_disabled_section_is_not_dispatched() {
    let store = Arc::new(SqlitePreferenceStore::open_memory().unwrap());
    store.set_section_disabled(SourceType::Setting, true).unwrap();
    let settings_source = Arc::new(CountingSettings {
        calls: AtomicUsize::new(0),
    });
    let mut controller = controller_with(
        store,
        Arc::new(StaticPermissions::all_granted()),
        vec![app_source(), settings_source.clone()],
        ControllerSettings::default(),
    );

    controller.set_query("display");
    assert!(controller.settle(SETTLE));
    assert!(controller.snapshot().section(SourceType::Setting).is_none());
    assert_eq!(settings_source.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn sections_follow_user_order() {
    let store = Arc::new(SqlitePreferenceStore::open_memory().unwrap());
    store
        .set_section_order(&[SourceType::Contact, SourceType::App])
        .unwrap();
    let mut controller = controller_with(
        store,
        Arc::new(StaticPermissions::all_granted()),
        vec![
            app_source(),
            Arc::new(InMemoryContactSource::from_contacts(vec![Candidate::new(
                SourceType::Contact,
                "7",
                "Mapes Mark",
            )])),
        ],
        ControllerSettings::default(),
    );

    controller.set_query("map");
    assert!(controller.settle(SETTLE));
    let order: Vec<SourceType> = controller
        .snapshot()
        .ordered_sections()
        .iter()
        .map(|set| set.source())
        .collect();
    assert_eq!(order, [SourceType::Contact, SourceType::App]);
}
