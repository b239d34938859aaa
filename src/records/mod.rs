//! Relational dataset records: CSV loading, CRUD and vector-store export.

mod loader;
mod store;

pub use loader::{
    embed_dataset, record_source, record_text, remove_dataset, remove_record, DatasetLoader,
    LoadReport, DATASET_COLLECTION,
};
pub use store::{validate_dataset_name, DatasetSummary, Record, RecordStore};
