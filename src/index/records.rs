// Arrow layout of the lancedb tables behind a stored index

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray,
    UInt64Array,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{IndexEntry, IndexMetadata};
use crate::detector::Fingerprint;
use crate::{KbError, Result};

/// Embedded chunks, one row per [`IndexEntry`]
pub(crate) const CHUNKS_TABLE: &str = "chunks";
/// Every ingested document fingerprint
pub(crate) const DOCUMENTS_TABLE: &str = "documents";
/// A single row with the index metadata
pub(crate) const METADATA_TABLE: &str = "metadata";

pub(crate) const VECTOR_COLUMN: &str = "vector";
const DISTANCE_COLUMN: &str = "_distance";

pub(crate) type BatchReader = RecordBatchIterator<std::iter::Once<std::result::Result<RecordBatch, ArrowError>>>;

/// Single-batch reader accepted by lancedb writes
pub(crate) fn reader(batch: RecordBatch) -> BatchReader {
    let schema = batch.schema();
    RecordBatchIterator::new(std::iter::once(Ok(batch)), schema)
}

fn vector_field() -> Arc<Field> {
    Arc::new(Field::new("item", DataType::Float32, false))
}

pub(crate) fn chunks_schema(dimension: usize) -> Result<SchemaRef> {
    let size = i32::try_from(dimension)
        .map_err(|_| KbError::Database(format!("vector dimension {dimension} is too large")))?;

    Ok(Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("position", DataType::UInt64, false),
        Field::new(
            VECTOR_COLUMN,
            DataType::FixedSizeList(vector_field(), size),
            false,
        ),
        Field::new("text", DataType::Utf8, false),
        Field::new("source_path", DataType::Utf8, false),
        Field::new("chunk_index", DataType::UInt64, false),
        Field::new("fingerprint", DataType::Utf8, false),
    ])))
}

fn documents_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("fingerprint", DataType::Utf8, false),
        // Set while this document's chunks are the ones served for its path
        Field::new("source_path", DataType::Utf8, true),
    ]))
}

fn metadata_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("model", DataType::Utf8, false),
        Field::new("created_at", DataType::Utf8, false),
        Field::new("updated_at", DataType::Utf8, false),
    ]))
}

/// Rows for `entries`, numbered from `first_position`
pub(crate) fn chunks_batch(
    entries: &[IndexEntry],
    first_position: usize,
    dimension: usize,
) -> Result<RecordBatch> {
    let schema = chunks_schema(dimension)?;
    let size = i32::try_from(dimension)
        .map_err(|_| KbError::Database(format!("vector dimension {dimension} is too large")))?;

    let mut flat_values = Vec::with_capacity(entries.len() * dimension);
    for entry in entries {
        flat_values.extend_from_slice(&entry.vector);
    }
    let vectors = FixedSizeListArray::try_new(
        vector_field(),
        size,
        Arc::new(Float32Array::from(flat_values)),
        None,
    )
    .map_err(|e| KbError::Database(format!("Failed to create vector array: {e}")))?;

    let ids: Vec<String> = entries.iter().map(|e| e.id.to_string()).collect();
    let positions: Vec<u64> = (first_position..first_position + entries.len())
        .map(|p| p as u64)
        .collect();

    let arrays: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from(ids)),
        Arc::new(UInt64Array::from(positions)),
        Arc::new(vectors),
        Arc::new(StringArray::from_iter_values(
            entries.iter().map(|e| e.text.as_str()),
        )),
        Arc::new(StringArray::from_iter_values(
            entries.iter().map(|e| e.source_path.as_str()),
        )),
        Arc::new(UInt64Array::from_iter_values(
            entries.iter().map(|e| e.chunk_index as u64),
        )),
        Arc::new(StringArray::from_iter_values(
            entries.iter().map(|e| e.fingerprint.as_str()),
        )),
    ];

    RecordBatch::try_new(schema, arrays)
        .map_err(|e| KbError::Database(format!("Failed to create record batch: {e}")))
}

/// One row per ingested fingerprint, with the source path of the ones currently served
pub(crate) fn documents_batch<'a, I>(documents: I) -> Result<RecordBatch>
where
    I: IntoIterator<Item = (&'a Fingerprint, Option<&'a str>)>,
{
    let (fingerprints, paths): (Vec<&str>, Vec<Option<&str>>) = documents
        .into_iter()
        .map(|(fingerprint, path)| (fingerprint.as_str(), path))
        .unzip();

    let arrays: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from(fingerprints)),
        Arc::new(StringArray::from(paths)),
    ];
    RecordBatch::try_new(documents_schema(), arrays)
        .map_err(|e| KbError::Database(format!("Failed to create record batch: {e}")))
}

pub(crate) fn metadata_batch(metadata: &IndexMetadata) -> Result<RecordBatch> {
    let arrays: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from(vec![metadata.model.as_str()])),
        Arc::new(StringArray::from(vec![metadata.created_at.to_rfc3339()])),
        Arc::new(StringArray::from(vec![metadata.updated_at.to_rfc3339()])),
    ];
    RecordBatch::try_new(metadata_schema(), arrays)
        .map_err(|e| KbError::Database(format!("Failed to create record batch: {e}")))
}

fn column<'a, T: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .ok_or_else(|| KbError::CorruptIndex(format!("missing {name} column")))?
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| KbError::CorruptIndex(format!("invalid {name} column type")))
}

fn position(value: u64) -> Result<usize> {
    usize::try_from(value)
        .map_err(|_| KbError::CorruptIndex(format!("row position {value} out of range")))
}

/// Vector length declared by a chunks table schema
pub(crate) fn vector_dimension(schema: &Schema) -> Result<usize> {
    match schema.field_with_name(VECTOR_COLUMN).map(Field::data_type) {
        Ok(DataType::FixedSizeList(_, size)) => usize::try_from(*size)
            .map_err(|_| KbError::CorruptIndex(format!("invalid vector size {size}"))),
        _ => Err(KbError::CorruptIndex(
            "could not find vector column or determine dimension".to_string(),
        )),
    }
}

/// Entries stored in a chunks batch, paired with their row position
pub(crate) fn read_entries(batch: &RecordBatch) -> Result<Vec<(usize, IndexEntry)>> {
    let ids = column::<StringArray>(batch, "id")?;
    let positions = column::<UInt64Array>(batch, "position")?;
    let vectors = column::<FixedSizeListArray>(batch, VECTOR_COLUMN)?;
    let texts = column::<StringArray>(batch, "text")?;
    let source_paths = column::<StringArray>(batch, "source_path")?;
    let chunk_indices = column::<UInt64Array>(batch, "chunk_index")?;
    let fingerprints = column::<StringArray>(batch, "fingerprint")?;

    let mut entries = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let id = Uuid::parse_str(ids.value(row))
            .map_err(|e| KbError::CorruptIndex(format!("invalid entry id: {e}")))?;
        let vector_values = vectors.value(row);
        let vector = vector_values
            .as_any()
            .downcast_ref::<Float32Array>()
            .ok_or_else(|| KbError::CorruptIndex("invalid vector values".to_string()))?
            .values()
            .to_vec();

        entries.push((
            position(positions.value(row))?,
            IndexEntry {
                id,
                vector,
                text: texts.value(row).to_string(),
                source_path: source_paths.value(row).to_string(),
                chunk_index: position(chunk_indices.value(row))?,
                fingerprint: Fingerprint::from(fingerprints.value(row)),
            },
        ));
    }
    Ok(entries)
}

pub(crate) fn read_documents(batch: &RecordBatch) -> Result<Vec<(Fingerprint, Option<String>)>> {
    let fingerprints = column::<StringArray>(batch, "fingerprint")?;
    let paths = column::<StringArray>(batch, "source_path")?;

    Ok((0..batch.num_rows())
        .map(|row| {
            let path = (!paths.is_null(row)).then(|| paths.value(row).to_string());
            (Fingerprint::from(fingerprints.value(row)), path)
        })
        .collect())
}

fn timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| KbError::CorruptIndex(format!("invalid timestamp {value:?}: {e}")))
}

/// Model and timestamps from the metadata table; the dimension comes from the chunks schema
pub(crate) fn read_metadata(batch: &RecordBatch, dimension: usize) -> Result<IndexMetadata> {
    if batch.num_rows() == 0 {
        return Err(KbError::CorruptIndex("metadata table is empty".to_string()));
    }
    let models = column::<StringArray>(batch, "model")?;
    let created = column::<StringArray>(batch, "created_at")?;
    let updated = column::<StringArray>(batch, "updated_at")?;

    Ok(IndexMetadata {
        model: models.value(0).to_string(),
        dimension: Some(dimension),
        created_at: timestamp(created.value(0))?,
        updated_at: timestamp(updated.value(0))?,
    })
}

/// Row positions and cosine distances of a vector search batch
pub(crate) fn read_hits(batch: &RecordBatch) -> Result<Vec<(usize, f32)>> {
    let positions = column::<UInt64Array>(batch, "position")?;
    let distances = batch
        .column_by_name(DISTANCE_COLUMN)
        .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

    (0..batch.num_rows())
        .map(|row| {
            let distance = distances.map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) });
            Ok((position(positions.value(row))?, distance))
        })
        .collect()
}
