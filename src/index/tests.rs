use super::*;
use crate::embeddings::fake::FakeEmbeddings;
use std::sync::Arc;
use tempfile::TempDir;

fn chunk(source_path: &str, chunk_index: usize, text: &str) -> Chunk {
    Chunk {
        text: text.to_string(),
        source_path: source_path.to_string(),
        chunk_index,
        fingerprint: Fingerprint::from(format!("{source_path}@1")),
    }
}

fn index_with(vectors: &[(&str, Vec<f32>)]) -> VectorIndex {
    let mut index = VectorIndex::new("test-model");
    for (i, (text, vector)) in vectors.iter().enumerate() {
        index
            .push(&chunk(&format!("doc{i}.txt"), 0, text), vector.clone())
            .expect("push succeeds");
    }
    index
}

/// Persist `index` so it can be searched
async fn saved(mut index: VectorIndex) -> (TempDir, VectorIndex) {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = LanceIndexStore::new(Arc::new(FakeEmbeddings::new(2)), 16);
    store
        .save(&mut index, &temp_dir.path().join("vectorstore"))
        .await
        .expect("index saves");
    (temp_dir, index)
}

fn texts(results: &[SearchResult]) -> Vec<&str> {
    results.iter().map(|r| r.text.as_str()).collect()
}

#[test]
fn new_index_is_empty() {
    let index = VectorIndex::new("test-model");
    assert!(index.is_empty());
    assert!(!index.is_saved());
    assert_eq!(index.metadata().model, "test-model");
    assert_eq!(index.metadata().dimension, None);
    assert!(index.ingested().is_empty());
}

#[test]
fn first_push_fixes_dimension() {
    let mut index = VectorIndex::new("test-model");
    index
        .push(&chunk("a.txt", 0, "Hello"), vec![1.0, 0.0, 0.0])
        .expect("push succeeds");

    assert_eq!(index.metadata().dimension, Some(3));
    assert!(index.is_ingested(&Fingerprint::from("a.txt@1")));

    let result = index.push(&chunk("b.txt", 0, "Bye"), vec![1.0, 0.0]);
    assert!(matches!(
        result,
        Err(KbError::EmbeddingProvider {
            kind: ProviderErrorKind::InvalidResponse,
            ..
        })
    ));
    assert_eq!(index.len(), 1);
}

#[test]
fn empty_vector_is_rejected() {
    let mut index = VectorIndex::new("test-model");
    assert!(index.push(&chunk("a.txt", 0, "Hello"), Vec::new()).is_err());
    assert!(index.is_empty());
}

#[test]
fn record_ingested_tracks_documents_without_entries() {
    let mut index = VectorIndex::new("test-model");
    index.record_ingested("blank.txt", Fingerprint::from("blank.txt@1"));

    assert!(index.is_empty());
    assert!(index.is_ingested(&Fingerprint::from("blank.txt@1")));
    assert_eq!(
        index.latest_fingerprint("blank.txt"),
        Some(&Fingerprint::from("blank.txt@1"))
    );
}

#[test]
fn newer_fingerprint_supersedes_older_entries() {
    let mut index = VectorIndex::new("test-model");
    let old = Chunk {
        fingerprint: Fingerprint::from("fees.txt@100"),
        ..chunk("fees.txt", 0, "Tuition is 100 dollars.")
    };
    let new = Chunk {
        fingerprint: Fingerprint::from("fees.txt@200"),
        ..chunk("fees.txt", 0, "Tuition is 999 dollars.")
    };
    index.push(&old, vec![1.0, 0.0]).expect("push succeeds");
    index.push(&new, vec![1.0, 0.1]).expect("push succeeds");

    assert!(!index.is_current(&index.entries()[0]));
    assert!(index.is_current(&index.entries()[1]));
    assert_eq!(index.superseded(), 1);
    assert!(index.is_ingested(&Fingerprint::from("fees.txt@100")));

    // An edit that leaves the document blank hides every chunk of it
    index.record_ingested("fees.txt", Fingerprint::from("fees.txt@300"));
    assert_eq!(index.superseded(), 2);
}

#[tokio::test]
async fn search_ranks_by_cosine_similarity() {
    let (_dir, index) = saved(index_with(&[
        ("east", vec![1.0, 0.0]),
        ("north", vec![0.0, 1.0]),
        ("north-east", vec![1.0, 1.0]),
    ]))
    .await;

    let results = index.search(&[0.0, 2.0], 10).await.expect("search runs");
    assert_eq!(texts(&results), vec!["north", "north-east", "east"]);
    assert!((results[0].score - 1.0).abs() < 1e-5);
    assert!(results[2].score.abs() < 1e-5);
}

#[tokio::test]
async fn search_ties_keep_insertion_order() {
    let (_dir, index) = saved(index_with(&[
        ("first", vec![1.0, 0.0]),
        ("second", vec![2.0, 0.0]),
        ("third", vec![3.0, 0.0]),
    ]))
    .await;

    let results = index.search(&[1.0, 0.0], 10).await.expect("search runs");
    assert_eq!(texts(&results), vec!["first", "second", "third"]);
}

#[tokio::test]
async fn search_respects_limit() {
    let (_dir, index) = saved(index_with(&[("a", vec![1.0, 0.0]), ("b", vec![0.0, 1.0])])).await;

    assert_eq!(index.search(&[1.0, 0.0], 1).await.expect("search runs").len(), 1);
    assert!(index.search(&[1.0, 0.0], 0).await.expect("search runs").is_empty());
    assert!(
        VectorIndex::new("m")
            .search(&[1.0], 5)
            .await
            .expect("empty index searches")
            .is_empty()
    );
}

#[tokio::test]
async fn search_skips_superseded_entries() {
    let mut index = VectorIndex::new("test-model");
    let old = Chunk {
        fingerprint: Fingerprint::from("fees.txt@100"),
        ..chunk("fees.txt", 0, "Tuition is 100 dollars.")
    };
    let new = Chunk {
        fingerprint: Fingerprint::from("fees.txt@200"),
        ..chunk("fees.txt", 0, "Tuition is 999 dollars.")
    };
    index.push(&old, vec![1.0, 0.0]).expect("push succeeds");
    index
        .push(&chunk("hours.txt", 0, "Open nine to five."), vec![0.0, 1.0])
        .expect("push succeeds");
    index.push(&new, vec![1.0, 0.2]).expect("push succeeds");
    let (_dir, index) = saved(index).await;

    let results = index.search(&[1.0, 0.0], 2).await.expect("search runs");
    assert_eq!(
        texts(&results),
        vec!["Tuition is 999 dollars.", "Open nine to five."]
    );
}

#[tokio::test]
async fn unsaved_index_cannot_be_searched() {
    let index = index_with(&[("a", vec![1.0, 0.0])]);
    let result = index.search(&[1.0, 0.0], 1).await;
    assert!(matches!(result, Err(KbError::NoData(_))));
}

#[test]
fn from_parts_rejects_dimension_mismatch() {
    let index = index_with(&[("a", vec![1.0, 0.0])]);
    let mut entries = index.entries().to_vec();
    entries[0].vector = vec![1.0, 0.0, 0.0];

    let result = VectorIndex::from_parts(
        index.metadata().clone(),
        entries,
        BTreeSet::new(),
        BTreeMap::new(),
    );
    assert!(matches!(result, Err(KbError::CorruptIndex(_))));
}
