use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Pool, Row, Sqlite};

use crate::error::EngineError;
use crate::models::external::{ExternalDbCredential, ExternalDbKind};

/// Upstream paging size.
pub const SYNC_BATCH: i64 = 100_000;

/// One punch row as the upstream hands it over, already mapped onto our
/// field names via the credential's column mapping.
#[derive(Debug, Clone)]
pub struct ExternalLogRow {
    pub id: i64,
    pub employeeid: String,
    pub direction: String,
    pub shortname: Option<String>,
    pub serialno: Option<String>,
    pub log_datetime: DateTime<Utc>,
}

/// The transport boundary to the upstream punch table. Everything the
/// ingestion loop needs: a connectivity probe, the upstream high-water
/// mark, and id-ordered batches.
pub trait LogSource {
    fn probe(&self) -> impl std::future::Future<Output = Result<(), EngineError>> + Send;
    fn max_id(&self) -> impl std::future::Future<Output = Result<i64, EngineError>> + Send;
    fn fetch_batch(
        &self,
        after_id: i64,
        limit: i64,
    ) -> impl std::future::Future<Output = Result<Vec<ExternalLogRow>, EngineError>> + Send;
}

pub async fn load_credential(
    pool: &Pool<Sqlite>,
) -> Result<Option<ExternalDbCredential>, EngineError> {
    let credential = sqlx::query_as::<_, ExternalDbCredential>(
        "SELECT * FROM external_db_credentials ORDER BY id LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;
    Ok(credential)
}

/// Pull the upstream punch table into the local store. Pages ascending by
/// the upstream id starting from our own high-water mark, so interrupted
/// syncs resume where they left off. Returns the number of rows upserted.
pub async fn sync_logs<S: LogSource>(pool: &Pool<Sqlite>, source: &S) -> Result<u64, EngineError> {
    let mut last_id: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(id), 0) FROM logs")
        .fetch_one(pool)
        .await?;
    let upstream_max = source.max_id().await?;

    log::info!("external sync starting from id {last_id} (upstream max {upstream_max})");

    let mut total = 0u64;
    loop {
        let records = source.fetch_batch(last_id, SYNC_BATCH).await?;
        if records.is_empty() {
            break;
        }

        let mut tx = pool.begin().await?;
        for record in &records {
            sqlx::query(
                "INSERT INTO logs (id, employeeid, direction, shortname, serialno, log_datetime) \
                 VALUES (?, ?, ?, ?, ?, ?) \
                 ON CONFLICT (id) DO UPDATE SET \
                     employeeid = excluded.employeeid, \
                     direction = excluded.direction, \
                     shortname = excluded.shortname, \
                     serialno = excluded.serialno, \
                     log_datetime = excluded.log_datetime \
                 WHERE excluded.log_datetime >= logs.log_datetime",
            )
            .bind(record.id)
            .bind(&record.employeeid)
            .bind(&record.direction)
            .bind(&record.shortname)
            .bind(&record.serialno)
            .bind(record.log_datetime)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        last_id = records.last().map(|r| r.id).unwrap_or(last_id);
        total += records.len() as u64;
        log::info!("external sync batch: {} rows, total {total}, last id {last_id}", records.len());
    }

    log::info!("external sync done: {total} rows");
    Ok(total)
}

/// Connect a transport for the stored credential. PostgreSQL upstreams ride
/// the same sqlx stack as local storage; an MS SQL upstream needs a wire
/// driver this build does not carry.
pub async fn connect_source(
    credential: &ExternalDbCredential,
) -> Result<PostgresLogSource, EngineError> {
    match credential.database_type {
        ExternalDbKind::Postgresql => PostgresLogSource::connect(credential.clone()).await,
        ExternalDbKind::MsSql => Err(EngineError::source_unreachable(
            "MS SQL upstreams are not supported by this build; mirror the table into PostgreSQL or swap the credential type",
        )),
    }
}

/// PostgreSQL-backed transport. Column and table names come from the
/// operator-managed credential record, exactly like the source system's
/// field mapping.
pub struct PostgresLogSource {
    pool: PgPool,
    credential: ExternalDbCredential,
}

impl PostgresLogSource {
    pub async fn connect(credential: ExternalDbCredential) -> Result<Self, EngineError> {
        let url = format!(
            "postgres://{}:{}@{}:{}/{}",
            credential.username, credential.password, credential.host, credential.port, credential.name
        );
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(&url)
            .await
            .map_err(|e| EngineError::source_unreachable(e.to_string()))?;
        Ok(Self { pool, credential })
    }
}

impl LogSource for PostgresLogSource {
    async fn probe(&self) -> Result<(), EngineError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_name = $1)",
        )
        .bind(&self.credential.table_name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| EngineError::source_unreachable(e.to_string()))?;
        if !exists {
            return Err(EngineError::source_unreachable(format!(
                "table '{}' does not exist upstream",
                self.credential.table_name
            )));
        }

        for field in self.credential.mapped_fields() {
            let present: bool = sqlx::query_scalar(
                "SELECT EXISTS (SELECT 1 FROM information_schema.columns \
                 WHERE table_name = $1 AND column_name = $2)",
            )
            .bind(&self.credential.table_name)
            .bind(field)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| EngineError::source_unreachable(e.to_string()))?;
            if !present {
                return Err(EngineError::source_unreachable(format!(
                    "column '{}' does not exist in upstream table '{}'",
                    field, self.credential.table_name
                )));
            }
        }
        Ok(())
    }

    async fn max_id(&self) -> Result<i64, EngineError> {
        let query = format!(
            "SELECT COALESCE(MAX({id}), 0) FROM {table}",
            id = self.credential.id_field,
            table = self.credential.table_name
        );
        sqlx::query_scalar(&query)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| EngineError::source_unreachable(e.to_string()))
    }

    async fn fetch_batch(
        &self,
        after_id: i64,
        limit: i64,
    ) -> Result<Vec<ExternalLogRow>, EngineError> {
        let c = &self.credential;
        let query = format!(
            "SELECT DISTINCT {id}, {emp}, {dir}, {short}, {serial}, {ts} \
             FROM {table} WHERE {id} > $1 ORDER BY {id} LIMIT $2",
            id = c.id_field,
            emp = c.employeeid_field,
            dir = c.direction_field,
            short = c.shortname_field,
            serial = c.serialno_field,
            ts = c.log_datetime_field,
            table = c.table_name
        );

        let rows = sqlx::query(&query)
            .bind(after_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| EngineError::source_unreachable(e.to_string()))?;

        rows.into_iter()
            .map(|row| {
                Ok(ExternalLogRow {
                    id: row
                        .try_get::<i64, _>(0)
                        .map_err(|e| EngineError::source_unreachable(e.to_string()))?,
                    employeeid: row
                        .try_get::<String, _>(1)
                        .map_err(|e| EngineError::source_unreachable(e.to_string()))?,
                    direction: row
                        .try_get::<String, _>(2)
                        .map_err(|e| EngineError::source_unreachable(e.to_string()))?,
                    shortname: row
                        .try_get::<Option<String>, _>(3)
                        .map_err(|e| EngineError::source_unreachable(e.to_string()))?,
                    serialno: row
                        .try_get::<Option<String>, _>(4)
                        .map_err(|e| EngineError::source_unreachable(e.to_string()))?,
                    log_datetime: row
                        .try_get::<DateTime<Utc>, _>(5)
                        .map_err(|e| EngineError::source_unreachable(e.to_string()))?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{sync_logs, ExternalLogRow, LogSource};
    use crate::error::EngineError;
    use crate::models::punch::Log;
    use crate::testutil::test_pool;
    use chrono::{DateTime, TimeZone, Utc};

    struct FakeSource {
        rows: Vec<ExternalLogRow>,
    }

    impl LogSource for FakeSource {
        async fn probe(&self) -> Result<(), EngineError> {
            Ok(())
        }

        async fn max_id(&self) -> Result<i64, EngineError> {
            Ok(self.rows.iter().map(|r| r.id).max().unwrap_or(0))
        }

        async fn fetch_batch(
            &self,
            after_id: i64,
            limit: i64,
        ) -> Result<Vec<ExternalLogRow>, EngineError> {
            Ok(self
                .rows
                .iter()
                .filter(|r| r.id > after_id)
                .take(limit as usize)
                .cloned()
                .collect())
        }
    }

    fn row(id: i64, at: DateTime<Utc>) -> ExternalLogRow {
        ExternalLogRow {
            id,
            employeeid: "E1".to_string(),
            direction: "in".to_string(),
            shortname: Some("GATE".to_string()),
            serialno: Some("SN1".to_string()),
            log_datetime: at,
        }
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 11, hour, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn pulls_everything_past_the_local_high_water_mark() {
        let pool = test_pool().await;
        let source = FakeSource {
            rows: (1..=5).map(|id| row(id, at(id as u32))).collect(),
        };

        let total = sync_logs(&pool, &source).await.unwrap();
        assert_eq!(total, 5);

        // Resume: rows 1..=5 are already local, only 6 is new.
        let source = FakeSource {
            rows: (1..=6).map(|id| row(id, at(id as u32))).collect(),
        };
        let total = sync_logs(&pool, &source).await.unwrap();
        assert_eq!(total, 1);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM logs")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 6);
    }

    #[tokio::test]
    async fn upsert_replaces_non_key_fields_only_for_newer_timestamps() {
        let pool = test_pool().await;

        let upsert = "INSERT INTO logs (id, employeeid, direction, shortname, serialno, log_datetime) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT (id) DO UPDATE SET \
                 employeeid = excluded.employeeid, \
                 direction = excluded.direction, \
                 shortname = excluded.shortname, \
                 serialno = excluded.serialno, \
                 log_datetime = excluded.log_datetime \
             WHERE excluded.log_datetime >= logs.log_datetime";
        let apply = |shortname: &'static str, when: DateTime<Utc>| {
            let pool = pool.clone();
            async move {
                sqlx::query(upsert)
                    .bind(1_i64)
                    .bind("E1")
                    .bind("in")
                    .bind(shortname)
                    .bind("SN1")
                    .bind(when)
                    .execute(&pool)
                    .await
                    .unwrap();
            }
        };

        apply("FIRST", at(12)).await;
        // An older re-observation of the same id must not win.
        apply("STALE", at(9)).await;
        let stored: Log = sqlx::query_as("SELECT * FROM logs WHERE id = 1")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(stored.shortname.as_deref(), Some("FIRST"));
        assert_eq!(stored.log_datetime, at(12));

        // A newer one replaces the non-key fields.
        apply("NEWER", at(15)).await;
        let stored: Log = sqlx::query_as("SELECT * FROM logs WHERE id = 1")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(stored.shortname.as_deref(), Some("NEWER"));
        assert_eq!(stored.log_datetime, at(15));
    }
}
