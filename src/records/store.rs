use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use crate::core::config::service::deep_merge;
use crate::core::errors::ApiError;

const MAX_DATASET_NAME_LEN: usize = 64;
const MAX_PAGE_SIZE: i64 = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: i64,
    pub dataset: String,
    pub data: Value,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub name: String,
    pub records: i64,
}

/// JSON rows grouped by dataset name.
#[derive(Clone)]
pub struct RecordStore {
    pool: SqlitePool,
}

impl RecordStore {
    pub async fn with_pool(pool: SqlitePool) -> Result<Self, ApiError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                dataset TEXT NOT NULL,
                data JSON NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to init records table: {}", e)))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_dataset ON records(dataset)")
            .execute(&pool)
            .await
            .map_err(|e| ApiError::internal(format!("Failed to create index: {}", e)))?;

        Ok(Self { pool })
    }

    pub async fn create(&self, dataset: &str, data: Value) -> Result<Record, ApiError> {
        validate_dataset_name(dataset)?;
        let data = expect_object(data)?;

        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;
        let id = insert_row(&mut tx, dataset, &data).await?;
        tx.commit().await.map_err(ApiError::internal)?;

        self.require(id).await
    }

    /// Inserts every row in one transaction and returns how many were written.
    pub async fn create_many(&self, dataset: &str, rows: Vec<Value>) -> Result<usize, ApiError> {
        validate_dataset_name(dataset)?;

        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;
        let mut written = 0usize;
        for row in rows {
            let row = expect_object(row)?;
            insert_row(&mut tx, dataset, &row).await?;
            written += 1;
        }
        tx.commit().await.map_err(ApiError::internal)?;

        Ok(written)
    }

    pub async fn get(&self, id: i64) -> Result<Option<Record>, ApiError> {
        let row = sqlx::query(
            "SELECT id, dataset, data, created_at, updated_at FROM records WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        row.as_ref().map(row_to_record).transpose()
    }

    /// Replaces the record's data, or deep-merges into it when `merge` is set.
    pub async fn update(&self, id: i64, data: Value, merge: bool) -> Result<Record, ApiError> {
        let data = expect_object(data)?;
        let existing = self.require(id).await?;

        let new_data = if merge {
            deep_merge(&existing.data, &data)
        } else {
            data
        };
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query("UPDATE records SET data = ?, updated_at = ? WHERE id = ?")
            .bind(serde_json::to_string(&new_data).map_err(ApiError::internal)?)
            .bind(&now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        self.require(id).await
    }

    pub async fn delete(&self, id: i64) -> Result<bool, ApiError> {
        let result = sqlx::query("DELETE FROM records WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        Ok(result.rows_affected() > 0)
    }

    /// Records of one dataset in id order.
    pub async fn list(&self, dataset: &str, limit: i64, offset: i64) -> Result<Vec<Record>, ApiError> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let rows = sqlx::query(
            "SELECT id, dataset, data, created_at, updated_at
             FROM records
             WHERE dataset = ?
             ORDER BY id ASC
             LIMIT ? OFFSET ?",
        )
        .bind(dataset)
        .bind(limit)
        .bind(offset.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        rows.iter().map(row_to_record).collect()
    }

    pub async fn list_datasets(&self) -> Result<Vec<DatasetSummary>, ApiError> {
        let rows = sqlx::query(
            "SELECT dataset, COUNT(*) AS records FROM records GROUP BY dataset ORDER BY dataset",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(rows
            .iter()
            .map(|row| DatasetSummary {
                name: row.get("dataset"),
                records: row.get("records"),
            })
            .collect())
    }

    /// Record count for one dataset, or across all datasets.
    pub async fn count(&self, dataset: Option<&str>) -> Result<i64, ApiError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE ?1 IS NULL OR dataset = ?1")
            .bind(dataset)
            .fetch_one(&self.pool)
            .await
            .map_err(ApiError::internal)
    }

    pub async fn delete_dataset(&self, dataset: &str) -> Result<u64, ApiError> {
        let result = sqlx::query("DELETE FROM records WHERE dataset = ?")
            .bind(dataset)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        Ok(result.rows_affected())
    }

    async fn require(&self, id: i64) -> Result<Record, ApiError> {
        self.get(id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Record {} not found", id)))
    }
}

async fn insert_row(
    tx: &mut Transaction<'_, Sqlite>,
    dataset: &str,
    data: &Value,
) -> Result<i64, ApiError> {
    let now = chrono::Utc::now().to_rfc3339();
    let result = sqlx::query(
        "INSERT INTO records (dataset, data, created_at, updated_at) VALUES (?, ?, ?, ?)",
    )
    .bind(dataset)
    .bind(serde_json::to_string(data).map_err(ApiError::internal)?)
    .bind(&now)
    .bind(&now)
    .execute(&mut **tx)
    .await
    .map_err(ApiError::internal)?;

    Ok(result.last_insert_rowid())
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<Record, ApiError> {
    let raw: String = row.try_get("data").map_err(ApiError::internal)?;
    Ok(Record {
        id: row.try_get("id").map_err(ApiError::internal)?,
        dataset: row.try_get("dataset").map_err(ApiError::internal)?,
        data: serde_json::from_str(&raw).map_err(ApiError::internal)?,
        created_at: row.try_get("created_at").unwrap_or_default(),
        updated_at: row.try_get("updated_at").unwrap_or_default(),
    })
}

fn expect_object(data: Value) -> Result<Value, ApiError> {
    if data.is_object() {
        Ok(data)
    } else {
        Err(ApiError::BadRequest("record data must be a JSON object".to_string()))
    }
}

/// Dataset names become URL path segments and vector-store sources.
pub fn validate_dataset_name(name: &str) -> Result<(), ApiError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_DATASET_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(ApiError::BadRequest(format!(
            "Invalid dataset name '{}': use up to {} letters, digits, '_', '-' or '.'",
            name, MAX_DATASET_NAME_LEN
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db;
    use serde_json::json;
    use tempfile::TempDir;

    async fn store() -> (TempDir, RecordStore) {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::connect(&dir.path().join("records.db")).await.unwrap();
        (dir, RecordStore::with_pool(pool).await.unwrap())
    }

    #[tokio::test]
    async fn crud_lifecycle() {
        let (_dir, store) = store().await;

        let created = store
            .create("pets", json!({ "name": "Tom", "traits": { "color": "grey" } }))
            .await
            .unwrap();
        assert_eq!(created.dataset, "pets");

        let merged = store
            .update(created.id, json!({ "traits": { "age": 3 } }), true)
            .await
            .unwrap();
        assert_eq!(merged.data, json!({ "name": "Tom", "traits": { "color": "grey", "age": 3 } }));

        let replaced = store.update(created.id, json!({ "name": "Jerry" }), false).await.unwrap();
        assert_eq!(replaced.data, json!({ "name": "Jerry" }));

        assert!(store.delete(created.id).await.unwrap());
        assert!(!store.delete(created.id).await.unwrap());
        assert!(store.get(created.id).await.unwrap().is_none());

        let err = store.update(created.id, json!({}), true).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn rejects_non_objects_and_bad_names() {
        let (_dir, store) = store().await;

        let err = store.create("pets", json!([1, 2])).await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        let err = store.create("../etc", json!({})).await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn listing_and_paging() {
        let (_dir, store) = store().await;
        let rows = (0..5).map(|i| json!({ "n": i })).collect();
        assert_eq!(store.create_many("numbers", rows).await.unwrap(), 5);
        store.create("pets", json!({ "name": "Rex" })).await.unwrap();

        let page = store.list("numbers", 2, 2).await.unwrap();
        let values: Vec<i64> = page.iter().map(|r| r.data["n"].as_i64().unwrap()).collect();
        assert_eq!(values, vec![2, 3]);

        assert_eq!(
            store.list_datasets().await.unwrap(),
            vec![
                DatasetSummary { name: "numbers".into(), records: 5 },
                DatasetSummary { name: "pets".into(), records: 1 },
            ]
        );
        assert_eq!(store.count(None).await.unwrap(), 6);
        assert_eq!(store.delete_dataset("numbers").await.unwrap(), 5);
        assert_eq!(store.count(Some("numbers")).await.unwrap(), 0);
    }
}
