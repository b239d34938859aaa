//! CRUD tools over the record store.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{optional_i64, required_i64, required_object, required_str, Tool, ToolOutput};
use crate::core::errors::ApiError;
use crate::rag::KnowledgeBase;
use crate::records::{remove_record, RecordStore};

const DEFAULT_PAGE: i64 = 20;
const MAX_PAGE: i64 = 100;

pub struct ListDatasetsTool {
    records: RecordStore,
}

impl ListDatasetsTool {
    pub fn new(records: RecordStore) -> Self {
        Self { records }
    }
}

#[async_trait]
impl Tool for ListDatasetsTool {
    fn name(&self) -> &str {
        "list_datasets"
    }

    fn description(&self) -> &str {
        "List the loaded datasets with their record counts."
    }

    fn parameters(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _args: Value) -> Result<ToolOutput, ApiError> {
        let datasets = self.records.list_datasets().await?;
        if datasets.is_empty() {
            return Ok(ToolOutput::text("No datasets loaded."));
        }
        ToolOutput::json(&json!(datasets))
    }
}

pub struct ListRecordsTool {
    records: RecordStore,
}

impl ListRecordsTool {
    pub fn new(records: RecordStore) -> Self {
        Self { records }
    }
}

#[async_trait]
impl Tool for ListRecordsTool {
    fn name(&self) -> &str {
        "list_records"
    }

    fn description(&self) -> &str {
        "List records of a dataset, oldest first."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "dataset": { "type": "string" },
                "limit": { "type": "integer", "minimum": 1, "maximum": MAX_PAGE },
                "offset": { "type": "integer", "minimum": 0 }
            },
            "required": ["dataset"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, ApiError> {
        let dataset = required_str(&args, "dataset")?;
        let limit = optional_i64(&args, "limit")?.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);
        let offset = optional_i64(&args, "offset")?.unwrap_or(0).max(0);

        let records = self.records.list(dataset, limit, offset).await?;
        if records.is_empty() {
            return Ok(ToolOutput::text(format!("No records in dataset {} at offset {}.", dataset, offset)));
        }
        ToolOutput::json(&json!(records))
    }
}

pub struct GetRecordTool {
    records: RecordStore,
}

impl GetRecordTool {
    pub fn new(records: RecordStore) -> Self {
        Self { records }
    }
}

#[async_trait]
impl Tool for GetRecordTool {
    fn name(&self) -> &str {
        "get_record"
    }

    fn description(&self) -> &str {
        "Fetch one record by id."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "id": { "type": "integer" } },
            "required": ["id"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, ApiError> {
        let id = required_i64(&args, "id")?;
        let record = self
            .records
            .get(id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Record {} not found", id)))?;
        ToolOutput::json(&json!(record))
    }
}

pub struct CreateRecordTool {
    records: RecordStore,
}

impl CreateRecordTool {
    pub fn new(records: RecordStore) -> Self {
        Self { records }
    }
}

#[async_trait]
impl Tool for CreateRecordTool {
    fn name(&self) -> &str {
        "create_record"
    }

    fn description(&self) -> &str {
        "Add a record (a JSON object) to a dataset. Creates the dataset if needed."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "dataset": { "type": "string" },
                "data": { "type": "object" }
            },
            "required": ["dataset", "data"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, ApiError> {
        let dataset = required_str(&args, "dataset")?;
        let data = required_object(&args, "data")?;
        let record = self.records.create(dataset, data).await?;
        ToolOutput::json(&json!(record))
    }
}

pub struct UpdateRecordTool {
    records: RecordStore,
}

impl UpdateRecordTool {
    pub fn new(records: RecordStore) -> Self {
        Self { records }
    }
}

#[async_trait]
impl Tool for UpdateRecordTool {
    fn name(&self) -> &str {
        "update_record"
    }

    fn description(&self) -> &str {
        "Update a record. With merge=true (default) the given fields are merged into the existing data; otherwise the data is replaced."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "integer" },
                "data": { "type": "object" },
                "merge": { "type": "boolean", "default": true }
            },
            "required": ["id", "data"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, ApiError> {
        let id = required_i64(&args, "id")?;
        let data = required_object(&args, "data")?;
        let merge = args.get("merge").and_then(Value::as_bool).unwrap_or(true);
        let record = self.records.update(id, data, merge).await?;
        ToolOutput::json(&json!(record))
    }
}

/// Deletes a record and any vectors embedded from it.
pub struct DeleteRecordTool {
    records: RecordStore,
    knowledge: Option<Arc<KnowledgeBase>>,
}

impl DeleteRecordTool {
    pub fn new(records: RecordStore, knowledge: Option<Arc<KnowledgeBase>>) -> Self {
        Self { records, knowledge }
    }
}

#[async_trait]
impl Tool for DeleteRecordTool {
    fn name(&self) -> &str {
        "delete_record"
    }

    fn description(&self) -> &str {
        "Delete a record by id."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "id": { "type": "integer" } },
            "required": ["id"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, ApiError> {
        let id = required_i64(&args, "id")?;
        let record = remove_record(&self.records, self.knowledge.as_deref(), id).await?;
        Ok(ToolOutput::text(format!("Deleted record {} from {}.", id, record.dataset)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db;
    use tempfile::TempDir;

    async fn store() -> (TempDir, RecordStore) {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::connect(&dir.path().join("records.db")).await.unwrap();
        (dir, RecordStore::with_pool(pool).await.unwrap())
    }

    #[tokio::test]
    async fn crud_through_tools() {
        let (_dir, records) = store().await;

        let created = CreateRecordTool::new(records.clone())
            .execute(json!({ "dataset": "pets", "data": { "name": "Tom", "kind": "cat" } }))
            .await
            .unwrap();
        let created: Value = serde_json::from_str(&created.content).unwrap();
        let id = created["id"].as_i64().unwrap();

        UpdateRecordTool::new(records.clone())
            .execute(json!({ "id": id, "data": { "kind": "tabby" } }))
            .await
            .unwrap();
        let fetched = GetRecordTool::new(records.clone())
            .execute(json!({ "id": id.to_string() }))
            .await
            .unwrap();
        let fetched: Value = serde_json::from_str(&fetched.content).unwrap();
        assert_eq!(fetched["data"], json!({ "name": "Tom", "kind": "tabby" }));

        let listed = ListDatasetsTool::new(records.clone()).execute(json!({})).await.unwrap();
        assert!(listed.content.contains("\"pets\""));

        let deleted = DeleteRecordTool::new(records.clone(), None)
            .execute(json!({ "id": id }))
            .await
            .unwrap();
        assert!(deleted.content.contains("Deleted record"));

        let err = GetRecordTool::new(records.clone())
            .execute(json!({ "id": id }))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));

        let empty = ListRecordsTool::new(records).execute(json!({ "dataset": "pets" })).await.unwrap();
        assert!(empty.content.starts_with("No records"));
    }

    #[tokio::test]
    async fn missing_arguments_are_named() {
        let (_dir, records) = store().await;
        let err = CreateRecordTool::new(records)
            .execute(json!({ "dataset": "pets" }))
            .await
            .unwrap_err();
        match err {
            ApiError::BadRequest(message) => assert!(message.contains("data")),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
