// Collection persistence
//
// One row per collection; the whole record, proposals included, lives in a
// JSONB column keyed by collection id.

use crate::collection::Collection;
use crate::error::AppError;
use deadpool_postgres::Pool;
use tracing::{debug, error};
use uuid::Uuid;

pub struct CollectionRepository {
    pool: Pool,
}

impl CollectionRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    // Load every stored collection; undecodable rows are reported and skipped
    pub async fn load_all(&self) -> Result<Vec<Collection>, AppError> {
        let client = self.pool.get().await?;
        let rows = client
            .query("SELECT id, record FROM collections ORDER BY id", &[])
            .await?;

        let mut collections = Vec::with_capacity(rows.len());
        for row in rows {
            let id: Uuid = row.get(0);
            let record: serde_json::Value = row.get(1);
            match serde_json::from_value::<Collection>(record) {
                Ok(collection) => collections.push(collection),
                Err(e) => error!("Stored collection {} could not be decoded: {}", id, e),
            }
        }

        debug!("Loaded {} collections from the database", collections.len());
        Ok(collections)
    }

    // Upsert a collection record
    pub async fn save(&self, collection: &Collection) -> Result<(), AppError> {
        let record = serde_json::to_value(collection)
            .map_err(|e| AppError::Internal(format!("Failed to encode collection: {}", e)))?;

        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO collections (id, record, updated_at) VALUES ($1, $2, $3)
                 ON CONFLICT (id) DO UPDATE SET record = EXCLUDED.record, updated_at = EXCLUDED.updated_at",
                &[&collection.id, &record, &collection.updated_at],
            )
            .await?;
        Ok(())
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), AppError> {
        let client = self.pool.get().await?;
        client
            .execute("DELETE FROM collections WHERE id = $1", &[&id])
            .await?;
        Ok(())
    }
}
