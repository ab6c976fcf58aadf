use super::*;
use std::fs::File;
use std::time::Duration;
use tempfile::TempDir;

fn txt_detector(dir: &Path, policy: FingerprintPolicy) -> ChangeDetector {
    ChangeDetector::new(dir, &["txt".to_string()], policy)
}

fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).expect("can write file");
    path
}

fn set_mtime(path: &Path, secs: u64) {
    let file = File::options()
        .write(true)
        .open(path)
        .expect("can open file");
    file.set_modified(UNIX_EPOCH + Duration::from_secs(secs))
        .expect("can set mtime");
}

#[test]
fn fingerprint_format() {
    assert_eq!(
        Fingerprint::new(FingerprintPolicy::PathAndModified, "a.txt", 1234).as_str(),
        "a.txt@1234"
    );
    assert_eq!(
        Fingerprint::new(FingerprintPolicy::PathOnly, "a.txt", 1234).as_str(),
        "a.txt"
    );
}

#[test]
fn fingerprints_of_distinct_paths_differ() {
    let paths = ["a.txt", "a.txt@1", "b.txt", "a", "a@1.txt"];
    for policy in [FingerprintPolicy::PathAndModified, FingerprintPolicy::PathOnly] {
        let mut seen = std::collections::HashSet::new();
        // Same mtime for every file so only the path can tell them apart
        for path in paths {
            assert!(seen.insert(Fingerprint::new(policy, path, 1)));
        }
    }
    assert_ne!(
        Fingerprint::new(FingerprintPolicy::PathAndModified, "a.txt@1", 2),
        Fingerprint::new(FingerprintPolicy::PathAndModified, "a.txt", 12)
    );
}

#[tokio::test]
async fn detects_only_allowed_extensions_in_sorted_order() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    write_file(temp_dir.path(), "b.txt", "Goodbye.");
    write_file(temp_dir.path(), "a.TXT", "Hello world.");
    write_file(temp_dir.path(), "notes.md", "# ignored");
    write_file(temp_dir.path(), "README", "ignored");
    std::fs::create_dir(temp_dir.path().join("dir.txt")).expect("can create dir");

    let detector = txt_detector(temp_dir.path(), FingerprintPolicy::PathAndModified);
    let documents = detector
        .detect(&Manifest::new())
        .await
        .expect("detection succeeds");

    let names: Vec<_> = documents.iter().map(|d| d.source_path.as_str()).collect();
    assert_eq!(names, vec!["a.TXT", "b.txt"]);
    assert_eq!(documents[0].content, b"Hello world.");
}

#[tokio::test]
async fn skips_documents_in_manifest() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    write_file(temp_dir.path(), "a.txt", "Hello world.");
    write_file(temp_dir.path(), "b.txt", "Goodbye.");

    let detector = txt_detector(temp_dir.path(), FingerprintPolicy::PathOnly);
    let manifest: Manifest = std::iter::once(Fingerprint::from("a.txt")).collect();

    let documents = detector.detect(&manifest).await.expect("detection succeeds");
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].source_path, "b.txt");
}

#[tokio::test]
async fn all_ingested_yields_empty() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    write_file(temp_dir.path(), "a.txt", "Hello world.");

    let detector = txt_detector(temp_dir.path(), FingerprintPolicy::PathAndModified);
    let manifest: Manifest = detector
        .scan()
        .await
        .expect("scan succeeds")
        .into_iter()
        .map(|c| c.fingerprint)
        .collect();

    let documents = detector.detect(&manifest).await.expect("detection succeeds");
    assert!(documents.is_empty());
}

#[tokio::test]
async fn empty_directory_yields_empty() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let detector = txt_detector(temp_dir.path(), FingerprintPolicy::PathAndModified);

    let documents = detector
        .detect(&Manifest::new())
        .await
        .expect("detection succeeds");
    assert!(documents.is_empty());
}

#[tokio::test]
async fn missing_directory_is_detection_error() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let detector = txt_detector(
        &temp_dir.path().join("missing"),
        FingerprintPolicy::PathAndModified,
    );

    let result = detector.detect(&Manifest::new()).await;
    assert!(matches!(result, Err(KbError::Detection(_))));
}

#[tokio::test]
async fn edit_changes_fingerprint_only_with_mtime_policy() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = write_file(temp_dir.path(), "a.txt", "Hello world.");
    set_mtime(&path, 1_000);

    let with_mtime = txt_detector(temp_dir.path(), FingerprintPolicy::PathAndModified);
    let path_only = txt_detector(temp_dir.path(), FingerprintPolicy::PathOnly);

    let before_mtime = with_mtime.scan().await.expect("scan succeeds");
    let before_path = path_only.scan().await.expect("scan succeeds");
    assert_eq!(before_mtime[0].fingerprint.as_str(), "a.txt@1000000");

    std::fs::write(&path, "Hello again.").expect("can rewrite file");
    set_mtime(&path, 2_000);

    let manifest_mtime: Manifest = before_mtime.into_iter().map(|c| c.fingerprint).collect();
    let manifest_path: Manifest = before_path.into_iter().map(|c| c.fingerprint).collect();

    let changed = with_mtime
        .detect(&manifest_mtime)
        .await
        .expect("detection succeeds");
    assert_eq!(changed.len(), 1);
    assert_eq!(changed[0].fingerprint.as_str(), "a.txt@2000000");
    assert_eq!(changed[0].content, b"Hello again.");

    let unchanged = path_only
        .detect(&manifest_path)
        .await
        .expect("detection succeeds");
    assert!(unchanged.is_empty());
}

#[test]
fn from_config_uses_knowledge_base_settings() {
    let mut config = Config::with_base_dir("/srv/yucca");
    config.knowledge_base.extensions = vec!["TXT".to_string(), "text".to_string()];
    config.knowledge_base.fingerprint = FingerprintPolicy::PathOnly;

    let detector = ChangeDetector::from_config(&config);
    assert_eq!(detector.source_dir(), Path::new("/srv/yucca/kb"));
    assert_eq!(detector.policy(), FingerprintPolicy::PathOnly);
    assert!(detector.is_eligible(Path::new("doc.txt")));
    assert!(detector.is_eligible(Path::new("doc.TEXT")));
    assert!(!detector.is_eligible(Path::new("doc.md")));
}

#[test]
fn policy_serializes_snake_case() {
    assert_eq!(
        serde_json::to_string(&FingerprintPolicy::PathAndModified).expect("serializes"),
        "\"path_and_modified\""
    );
    assert_eq!(FingerprintPolicy::PathOnly.to_string(), "path_only");
}
