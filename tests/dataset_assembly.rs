//! Training-side views of a populated store.

mod common;

use std::fs;

use chrono::{TimeZone, Utc};
use common::{capture_annotated, export_all, ledger_with_products};
use shrinkwatch::bundle::import_bundle;
use shrinkwatch::dataset::{
    class_stats, mark_trained, register_class, verify_store, write_data_yaml, DatasetStore,
    TrainingSelection,
};
use shrinkwatch::ir::ClassId;
use shrinkwatch::validation::IssueCode;
use tempfile::TempDir;

const SKOL: &str = "SKOL 350ml";
const BRAHMA: &str = "Brahma 350ml";

/// Store with three entries: SKOL, BRAHMA, and SKOL+BRAHMA+BRAHMA.
fn populated_store() -> (TempDir, DatasetStore) {
    let temp = tempfile::tempdir().expect("create temp dir");
    let (mut ledger, p) =
        ledger_with_products(&temp.path().join("ledger"), "loja-01", &[SKOL, BRAHMA]);
    capture_annotated(&mut ledger, 4, &[p[0]]);
    capture_annotated(&mut ledger, 5, &[p[1]]);
    capture_annotated(&mut ledger, 6, &[p[0], p[1], p[1]]);
    let bundle = export_all(&mut ledger, &temp.path().join("out"));

    let store = DatasetStore::open(&temp.path().join("dataset")).expect("open store");
    let report = import_bundle(&bundle, &store, None).expect("import");
    assert_eq!(report.imported.len(), 3);
    (temp, store)
}

#[test]
fn stats_count_images_by_primary_class_and_boxes_by_class() {
    let (_temp, store) = populated_store();
    let stats = class_stats(&store);

    assert_eq!(stats.images, 3);
    assert_eq!(stats.annotations, 5);
    assert_eq!(stats.untrained, 3);

    let skol = &stats.classes[0];
    assert_eq!((skol.name.as_str(), skol.images, skol.annotations), (SKOL, 2, 2));
    let brahma = &stats.classes[1];
    assert_eq!((brahma.name.as_str(), brahma.images, brahma.annotations), (BRAHMA, 1, 3));

    let text = stats.to_string();
    assert!(text.contains("Dataset: 3 image(s), 5 annotation(s), 2 class(es)"));
}

#[test]
fn mark_trained_follows_the_selection() {
    let (_temp, store) = populated_store();
    let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();

    let updated = mark_trained(&store, &TrainingSelection::Classes(vec![ClassId::new(1)]), at)
        .expect("mark by class");
    assert_eq!(updated, 2);

    let updated = mark_trained(&store, &TrainingSelection::Untrained, at).expect("mark rest");
    assert_eq!(updated, 1);
    let updated = mark_trained(&store, &TrainingSelection::Untrained, at).expect("nothing left");
    assert_eq!(updated, 0);

    let stats = class_stats(&store);
    assert_eq!((stats.trained, stats.untrained), (3, 0));

    // Persisted under the field name the training pipeline reads.
    let entries = fs::read_to_string(store.root().join("entries.json")).unwrap();
    assert!(entries.contains("\"treinada\": true"));
    let reopened = DatasetStore::open(store.root()).expect("reopen");
    assert!(reopened
        .snapshot()
        .entries()
        .iter()
        .all(|e| e.trained && e.trained_at == Some(at)));
}

#[test]
fn mark_trained_by_checksum() {
    let (_temp, store) = populated_store();
    let target = store.snapshot().entries()[1].checksum.clone();

    let updated = mark_trained(
        &store,
        &TrainingSelection::Checksums(vec![target.clone()]),
        Utc::now(),
    )
    .expect("mark");
    assert_eq!(updated, 1);
    let snapshot = store.snapshot();
    let trained: Vec<_> = snapshot.entries().iter().filter(|e| e.trained).collect();
    assert_eq!(trained.len(), 1);
    assert_eq!(trained[0].checksum, target);
}

#[test]
fn data_yaml_lists_classes_in_id_order() {
    let (_temp, store) = populated_store();
    let path = write_data_yaml(&store).expect("write");
    assert_eq!(path, store.root().join("data.yaml"));

    let yaml = fs::read_to_string(&path).unwrap();
    let value: serde_yaml::Value = serde_yaml::from_str(&yaml).expect("valid yaml");
    assert_eq!(value["nc"].as_u64(), Some(2));
    assert_eq!(value["train"].as_str(), Some("images"));
    assert_eq!(value["names"][0].as_str(), Some(SKOL));
    assert_eq!(value["names"][1].as_str(), Some(BRAHMA));
}

#[test]
fn data_yaml_quotes_the_store_root() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let root = temp.path().join("lojas: norte #1");
    let store = DatasetStore::open(&root).expect("open store");
    register_class(&store, ClassId::new(0), SKOL).expect("register");

    let yaml = fs::read_to_string(write_data_yaml(&store).expect("write")).unwrap();
    let value: serde_yaml::Value = serde_yaml::from_str(&yaml).expect("valid yaml");
    assert_eq!(value["path"].as_str(), Some(root.to_string_lossy().as_ref()));
    assert_eq!(value["nc"].as_u64(), Some(1));
}

#[test]
fn verify_is_clean_after_a_merge() {
    let (_temp, store) = populated_store();
    let report = verify_store(&store).expect("verify");
    assert!(report.is_clean(), "unexpected issues: {}", report);
}

#[test]
fn verify_flags_damaged_trees() {
    let (_temp, store) = populated_store();
    let snapshot = store.snapshot();
    let entries = snapshot.entries();

    fs::remove_file(store.root().join(&entries[0].image_path)).unwrap();
    fs::remove_file(store.root().join(&entries[1].label_path)).unwrap();
    fs::write(store.root().join(&entries[2].label_path), "7 0.5 0.5 0.1 0.1\nnot a label\n")
        .unwrap();
    fs::write(store.root().join("labels").join("stray.txt"), "0 0.5 0.5 0.1 0.1\n").unwrap();
    fs::write(store.root().join("images").join("stray.bmp"), common::bmp_bytes(3, 3)).unwrap();

    let report = verify_store(&store).expect("verify");
    for code in [
        IssueCode::MissingImageFile,
        IssueCode::MissingLabelFile,
        IssueCode::UnknownClassId,
        IssueCode::InvalidLabelLine,
        IssueCode::AnnotationCountMismatch,
        IssueCode::OrphanLabel,
        IssueCode::UntrackedFile,
    ] {
        assert!(report.has_code(code), "missing {:?} in:\n{}", code, report);
    }
    assert!(!report.is_ok());
}
