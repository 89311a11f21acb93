use sqlx::{Pool, Sqlite};

use crate::error::EngineError;

/// The set of punch ids already reduced into attendance. Inserts are
/// conflict-ignore so reprocessing a punch is always safe; removal only
/// happens on the recalculation path.
pub struct ProcessedCursor<'a> {
    pool: &'a Pool<Sqlite>,
}

impl<'a> ProcessedCursor<'a> {
    pub fn new(pool: &'a Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub async fn contains(&self, id: i64) -> Result<bool, EngineError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM processed_logs WHERE id = ?")
            .bind(id)
            .fetch_one(self.pool)
            .await?;
        Ok(count > 0)
    }

    /// Record a batch of reduced punch ids. Applied after the batch's
    /// reductions commit; failure maps to `BulkWriteFailed` so the run can
    /// report itself as partial.
    pub async fn add_many(&self, ids: &[i64]) -> Result<(), EngineError> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| EngineError::bulk_write_failed(e.to_string()))?;
        for id in ids {
            sqlx::query("INSERT OR IGNORE INTO processed_logs (id) VALUES (?)")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(|e| EngineError::bulk_write_failed(e.to_string()))?;
        }
        tx.commit()
            .await
            .map_err(|e| EngineError::bulk_write_failed(e.to_string()))?;
        Ok(())
    }

    /// Drop every cursor entry; the whole punch history becomes "new" again.
    pub async fn remove_all(&self) -> Result<u64, EngineError> {
        let res = sqlx::query("DELETE FROM processed_logs")
            .execute(self.pool)
            .await?;
        Ok(res.rows_affected())
    }

    /// Forget punches at or past `min_id`, for bounded recalculations.
    pub async fn remove_from(&self, min_id: i64) -> Result<u64, EngineError> {
        let res = sqlx::query("DELETE FROM processed_logs WHERE id >= ?")
            .bind(min_id)
            .execute(self.pool)
            .await?;
        Ok(res.rows_affected())
    }

    pub async fn len(&self) -> Result<i64, EngineError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM processed_logs")
            .fetch_one(self.pool)
            .await?;
        Ok(count)
    }
}
