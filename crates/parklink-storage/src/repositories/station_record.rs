#![allow(async_fn_in_trait)]

use crate::error::{StorageError, StorageResult};
use chrono::{DateTime, Utc};
use parklink_core::{SpaceNumber, StationId, StationRecord, VehicleId, VisitRecord};
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

/// Persistence of per-station records.
///
/// History is append-only in the domain, so `save` only writes the visits
/// that are not stored yet.
pub trait StationRecordRepository: Send + Sync {
    /// Load a station's record; `None` when nothing was ever saved.
    async fn load(&self, station_id: StationId) -> StorageResult<Option<StationRecord>>;

    /// Store a station's record, replacing the previous one.
    async fn save(&self, station_id: StationId, record: &StationRecord) -> StorageResult<()>;

    /// Stations that have a stored record.
    async fn station_ids(&self) -> StorageResult<Vec<StationId>>;

    /// Remove a station's record and history. Returns whether one existed.
    async fn delete(&self, station_id: StationId) -> StorageResult<bool>;
}

#[derive(Debug, FromRow)]
struct RecordRow {
    exchange_rate: f64,
    last_exchange_refresh: Option<DateTime<Utc>>,
}

#[derive(Debug, FromRow)]
struct VisitRow {
    vehicle_id: String,
    space: i64,
    entry_time: DateTime<Utc>,
    exit_time: DateTime<Utc>,
    duration_secs: i64,
    fee: i64,
}

impl VisitRow {
    fn into_visit(self, station_id: StationId) -> StorageResult<VisitRecord> {
        let space = u8::try_from(self.space)
            .ok()
            // Rows were validated against the station layout when recorded.
            .and_then(|space| SpaceNumber::new(space, u8::MAX).ok())
            .ok_or_else(|| StorageError::corrupt(station_id, format!("space {}", self.space)))?;
        let duration_secs = u64::try_from(self.duration_secs).map_err(|_| {
            StorageError::corrupt(station_id, format!("duration {}", self.duration_secs))
        })?;
        let fee = u64::try_from(self.fee)
            .map_err(|_| StorageError::corrupt(station_id, format!("fee {}", self.fee)))?;

        Ok(VisitRecord {
            vehicle_id: VehicleId::from(self.vehicle_id),
            space,
            entry_time: self.entry_time,
            exit_time: self.exit_time,
            duration_secs,
            fee,
        })
    }
}

fn to_i64(value: u64, what: &str) -> StorageResult<i64> {
    i64::try_from(value).map_err(|_| StorageError::OutOfRange(format!("{what} {value}")))
}

/// SQLite implementation of StationRecordRepository
#[derive(Debug, Clone)]
pub struct SqliteStationRecordRepository {
    pool: SqlitePool,
}

impl SqliteStationRecordRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl StationRecordRepository for SqliteStationRecordRepository {
    async fn load(&self, station_id: StationId) -> StorageResult<Option<StationRecord>> {
        let row = sqlx::query_as::<_, RecordRow>(
            r#"
            SELECT exchange_rate, last_exchange_refresh
            FROM station_records
            WHERE station_id = ?
            "#,
        )
        .bind(station_id.as_u8())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let visits = sqlx::query_as::<_, VisitRow>(
            r#"
            SELECT vehicle_id, space, entry_time, exit_time, duration_secs, fee
            FROM visit_history
            WHERE station_id = ?
            ORDER BY sequence ASC
            "#,
        )
        .bind(station_id.as_u8())
        .fetch_all(&self.pool)
        .await?;

        let visit_history = visits
            .into_iter()
            .map(|visit| visit.into_visit(station_id))
            .collect::<StorageResult<Vec<_>>>()?;

        debug!(station_id = %station_id, visits = visit_history.len(), "Station record loaded");

        Ok(Some(StationRecord {
            visit_history,
            exchange_rate: row.exchange_rate,
            last_exchange_refresh: row.last_exchange_refresh,
        }))
    }

    async fn save(&self, station_id: StationId, record: &StationRecord) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO station_records (station_id, exchange_rate, last_exchange_refresh, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (station_id) DO UPDATE SET
                exchange_rate = excluded.exchange_rate,
                last_exchange_refresh = excluded.last_exchange_refresh,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(station_id.as_u8())
        .bind(record.exchange_rate)
        .bind(record.last_exchange_refresh)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        let (stored,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM visit_history WHERE station_id = ?")
                .bind(station_id.as_u8())
                .fetch_one(&mut *tx)
                .await?;
        let len = to_i64(record.visit_history.len() as u64, "history length")?;

        // A shorter history means the record was replaced wholesale.
        let first_new = if stored > len {
            sqlx::query("DELETE FROM visit_history WHERE station_id = ?")
                .bind(station_id.as_u8())
                .execute(&mut *tx)
                .await?;
            0
        } else {
            stored
        };

        for (sequence, visit) in record.visit_history.iter().enumerate().skip(first_new as usize) {
            sqlx::query(
                r#"
                INSERT INTO visit_history (
                    station_id, sequence, vehicle_id, space,
                    entry_time, exit_time, duration_secs, fee
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(station_id.as_u8())
            .bind(to_i64(sequence as u64, "sequence")?)
            .bind(visit.vehicle_id.as_str())
            .bind(visit.space.get())
            .bind(visit.entry_time)
            .bind(visit.exit_time)
            .bind(to_i64(visit.duration_secs, "duration")?)
            .bind(to_i64(visit.fee, "fee")?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!(
            station_id = %station_id,
            appended = record.visit_history.len() - first_new as usize,
            "Station record saved"
        );
        Ok(())
    }

    async fn station_ids(&self) -> StorageResult<Vec<StationId>> {
        let rows: Vec<(i64,)> =
            sqlx::query_as("SELECT station_id FROM station_records ORDER BY station_id")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter()
            .map(|(id,)| {
                u8::try_from(id)
                    .ok()
                    .and_then(|id| StationId::new(id).ok())
                    .ok_or_else(|| StorageError::OutOfRange(format!("station id {id}")))
            })
            .collect()
    }

    async fn delete(&self, station_id: StationId) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM station_records WHERE station_id = ?")
            .bind(station_id.as_u8())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
