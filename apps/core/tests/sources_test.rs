use std::fs;

use launchsearch_core::model::{Candidate, Query, SourceType};
use launchsearch_core::sources::{
    file_uri, CatalogSource, FileFilters, FileSystemSource, FileType, InMemoryContactSource,
    SearchFilters, SearchSource, SourceError,
};

fn file_tree() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("reports")).unwrap();
    fs::create_dir_all(dir.path().join(".secret")).unwrap();
    fs::write(dir.path().join("reports").join("q4-report.pdf"), b"pdf").unwrap();
    fs::write(dir.path().join("report-photo.jpg"), b"jpg").unwrap();
    fs::write(dir.path().join(".secret").join("report.txt"), b"txt").unwrap();
    fs::write(dir.path().join("Thumbs.db"), b"db").unwrap();
    dir
}

fn names(found: &[Candidate]) -> Vec<String> {
    let mut names: Vec<String> = found.iter().map(|c| c.name.clone()).collect();
    names.sort();
    names
}

#[test]
fn file_source_honors_hidden_folder_and_type_filters() {
    let dir = file_tree();
    let source = FileSystemSource::new(vec![dir.path().to_path_buf()], 4);
    let query = Query::new("report", 1);

    let defaults = source.search(&query, &SearchFilters::default()).unwrap();
    assert_eq!(names(&defaults), ["q4-report.pdf", "report-photo.jpg", "reports"]);

    let documents_only = SearchFilters {
        files: FileFilters {
            types: vec![FileType::Document],
            show_folders: false,
            ..FileFilters::default()
        },
        ..SearchFilters::default()
    };
    let found = source.search(&query, &documents_only).unwrap();
    assert_eq!(names(&found), ["q4-report.pdf"]);

    let with_hidden = SearchFilters {
        files: FileFilters {
            show_hidden: true,
            show_folders: false,
            ..FileFilters::default()
        },
        ..SearchFilters::default()
    };
    let found = source.search(&query, &with_hidden).unwrap();
    assert_eq!(
        names(&found),
        ["q4-report.pdf", "report-photo.jpg", "report.txt"]
    );
}

#[test]
fn system_files_require_opt_in() {
    let dir = file_tree();
    let source = FileSystemSource::new(vec![dir.path().to_path_buf()], 2);
    let query = Query::new("thumbs", 1);

    assert!(source
        .search(&query, &SearchFilters::default())
        .unwrap()
        .is_empty());

    let filters = SearchFilters {
        files: FileFilters {
            show_system: true,
            ..FileFilters::default()
        },
        ..SearchFilters::default()
    };
    assert_eq!(names(&source.search(&query, &filters).unwrap()), ["Thumbs.db"]);
}

#[test]
fn file_fetch_by_ids_resolves_existing_uris_only() {
    let dir = file_tree();
    let source = FileSystemSource::new(vec![dir.path().to_path_buf()], 4);
    let existing = file_uri(&dir.path().join("report-photo.jpg"));
    let missing = file_uri(&dir.path().join("gone.txt"));

    let found = source
        .fetch_by_ids(&[existing.clone(), missing], &SearchFilters::default())
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].key, existing);
    assert!(found[0].usage.is_some());
}

#[test]
fn file_fetch_by_ids_applies_search_filters() {
    let dir = file_tree();
    let source = FileSystemSource::new(vec![dir.path().to_path_buf()], 4);
    let hidden = file_uri(&dir.path().join(".secret").join("report.txt"));
    let system = file_uri(&dir.path().join("Thumbs.db"));
    let photo = file_uri(&dir.path().join("report-photo.jpg"));
    let ids = [hidden, system, photo];

    let found = source.fetch_by_ids(&ids, &SearchFilters::default()).unwrap();
    assert_eq!(names(&found), ["report-photo.jpg"]);

    let documents_only = SearchFilters {
        files: FileFilters {
            types: vec![FileType::Document],
            ..FileFilters::default()
        },
        ..SearchFilters::default()
    };
    assert!(source.fetch_by_ids(&ids, &documents_only).unwrap().is_empty());

    let everything = SearchFilters {
        files: FileFilters {
            show_hidden: true,
            show_system: true,
            ..FileFilters::default()
        },
        ..SearchFilters::default()
    };
    let found = source.fetch_by_ids(&ids, &everything).unwrap();
    assert_eq!(names(&found), ["Thumbs.db", "report-photo.jpg", "report.txt"]);
}

#[test]
fn contact_source_keeps_full_matches_past_partial_ones() {
    let mut contacts: Vec<Candidate> = (0..10)
        .map(|i| Candidate::from_owned(SourceType::Contact, i.to_string(), format!("Alan Doe{i}")))
        .collect();
    contacts.push(Candidate::new(SourceType::Contact, "target", "Alice Smith"));
    let source = InMemoryContactSource::from_contacts(contacts);

    let found = source
        .search(&Query::new("al smith", 1), &SearchFilters::default())
        .unwrap();
    assert_eq!(names(&found), ["Alice Smith"]);
}

#[test]
fn contact_source_limits_results_and_reports_revoked_permission() {
    let contacts = (0..5)
        .map(|i| Candidate::from_owned(SourceType::Contact, i.to_string(), format!("Alex {i}")))
        .collect();
    let source = InMemoryContactSource::from_contacts(contacts);
    let filters = SearchFilters {
        contact_limit: 3,
        ..SearchFilters::default()
    };

    assert_eq!(source.search(&Query::new("alex", 1), &filters).unwrap().len(), 3);

    source.set_permission_granted(false);
    assert!(matches!(
        source.search(&Query::new("alex", 1), &filters),
        Err(SourceError::PermissionDenied(_))
    ));
    assert!(source
        .fetch_by_ids(&["1".to_string()], &filters)
        .is_err());
}

#[test]
fn device_settings_catalog_is_searchable() {
    let source = CatalogSource::device_settings();
    assert_eq!(source.source_type(), SourceType::Setting);
    let found = source
        .search(&Query::new("blue", 1), &SearchFilters::default())
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name, "Bluetooth");
}
