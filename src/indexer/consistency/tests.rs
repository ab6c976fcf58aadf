use super::*;

fn index_with_ingested(fingerprints: &[&str]) -> VectorIndex {
    let mut index = VectorIndex::new("test-model");
    for fp in fingerprints {
        let source_path = fp.split('@').next().unwrap_or(fp);
        index.record_ingested(source_path, Fingerprint::from(*fp));
    }
    index
}

fn manifest_of(fingerprints: &[&str]) -> Manifest {
    fingerprints.iter().map(|fp| Fingerprint::from(*fp)).collect()
}

#[test]
fn matching_manifest_is_consistent() {
    let index = index_with_ingested(&["a.txt@1", "b.txt@1"]);
    let mut manifest = manifest_of(&["a.txt@1", "b.txt@1"]);

    let report = ConsistencyValidator::new(&index, &mut manifest).validate();

    assert!(report.is_consistent);
    assert_eq!(report.total_issues(), 0);
    assert_eq!(report.manifest_entries, 2);
    assert_eq!(report.index_documents, 2);
    assert!(report.summary().contains("Manifest is consistent"));
}

#[test]
fn reports_drift_in_both_directions() {
    let index = index_with_ingested(&["a.txt@1", "c.txt@1"]);
    let mut manifest = manifest_of(&["a.txt@1", "b.txt@1"]);

    let report = ConsistencyValidator::new(&index, &mut manifest).validate();

    assert!(!report.is_consistent);
    assert_eq!(report.missing_in_index, vec![Fingerprint::from("b.txt@1")]);
    assert_eq!(
        report.unrecorded_in_manifest,
        vec![Fingerprint::from("c.txt@1")]
    );
    assert_eq!(report.total_issues(), 2);
    assert!(report.summary().contains("1 missing in index"));
}

#[test]
fn repair_drops_entries_missing_from_index() {
    let index = index_with_ingested(&["a.txt@1", "c.txt@1"]);
    let mut manifest = manifest_of(&["a.txt@1", "b.txt@1"]);

    let removed = ConsistencyValidator::new(&index, &mut manifest).repair();

    assert_eq!(removed, 1);
    assert_eq!(manifest, manifest_of(&["a.txt@1"]));
}

#[test]
fn repair_of_empty_manifest_keeps_it_empty() {
    let index = index_with_ingested(&["a.txt@1"]);
    let mut manifest = Manifest::new();

    let removed = ConsistencyValidator::new(&index, &mut manifest).repair();

    assert_eq!(removed, 0);
    assert!(manifest.is_empty());
}
