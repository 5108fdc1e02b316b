use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, QueryBuilder, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::debug;

use shared::domain::{
    ControlField, ControlValue, ControlsId, ControlsPatch, ControlsRecord, NewSensorReading,
    ReadingId, SensorReading,
};

const CONTROLS_COLUMNS: &str =
    "id, led1, led2, led3, rgb_r, rgb_g, rgb_b, strip, timer_hours, timer_minutes, buzzer";

/// SQLite-backed shared store: the singleton controls row plus the append-only
/// sensor reading log.
#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Every connection to `sqlite::memory:` opens a fresh database.
        let pool_options = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options.connect_with(connect_options).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn read_controls(&self, controls_id: ControlsId) -> Result<Option<ControlsRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {CONTROLS_COLUMNS} FROM controls WHERE id = ?"
        ))
        .bind(controls_id.0)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to read controls {}", controls_id.0))?;
        row.map(|r| controls_from_row(&r)).transpose()
    }

    /// Create-or-update of the fields present in `patch`; absent fields keep
    /// their stored value (or the column default when the row is created).
    pub async fn upsert_controls(&self, controls_id: ControlsId, patch: &ControlsPatch) -> Result<()> {
        let entries = patch.entries();

        let mut query = QueryBuilder::<Sqlite>::new("INSERT INTO controls (id");
        for (field, _) in &entries {
            query.push(", ").push(field.as_str());
        }
        query.push(") VALUES (").push_bind(controls_id.0);
        for (_, value) in &entries {
            query.push(", ");
            match *value {
                ControlValue::Int(v) => query.push_bind(v),
                ControlValue::Flag(v) => query.push_bind(v),
            };
        }
        query.push(")");

        if entries.is_empty() {
            query.push(" ON CONFLICT(id) DO NOTHING");
        } else {
            query.push(" ON CONFLICT(id) DO UPDATE SET ");
            {
                let mut assignments = query.separated(", ");
                for (field, _) in &entries {
                    assignments.push(format!("{0} = excluded.{0}", field.as_str()));
                }
            }
            query.push(", updated_at = CURRENT_TIMESTAMP");
        }

        query
            .build()
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to upsert controls {}", controls_id.0))?;
        debug!(
            controls_id = controls_id.0,
            fields = entries.len(),
            "storage: controls upserted"
        );
        Ok(())
    }

    pub async fn read_latest_sensor_reading(&self) -> Result<Option<SensorReading>> {
        let row = sqlx::query(
            "SELECT id, temperature, humidity, light, created_at
             FROM sensor_readings
             ORDER BY created_at DESC, id DESC
             LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .context("failed to read latest sensor reading")?;
        row.map(|r| reading_from_row(&r)).transpose()
    }

    /// Appends a reading. `created_at` is assigned here and never goes backwards,
    /// even if the wall clock does.
    pub async fn append_sensor_reading(&self, reading: &NewSensorReading) -> Result<SensorReading> {
        let now_micros = Utc::now().timestamp_micros();
        let row = sqlx::query(
            "INSERT INTO sensor_readings (temperature, humidity, light, created_at)
             VALUES (?, ?, ?, MAX(?, COALESCE((SELECT MAX(created_at) FROM sensor_readings), 0) + 1))
             RETURNING id, temperature, humidity, light, created_at",
        )
        .bind(reading.temperature)
        .bind(reading.humidity)
        .bind(reading.light)
        .bind(now_micros)
        .fetch_one(&self.pool)
        .await
        .context("failed to append sensor reading")?;
        reading_from_row(&row)
    }

    pub async fn count_sensor_readings(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sensor_readings")
            .fetch_one(&self.pool)
            .await
            .context("failed to count sensor readings")?;
        Ok(count)
    }
}

fn controls_from_row(row: &SqliteRow) -> Result<ControlsRecord> {
    let mut record = ControlsRecord {
        id: ControlsId(row.try_get::<i64, _>("id")?),
        ..ControlsRecord::default()
    };
    for field in ControlField::ALL {
        let value = match field {
            ControlField::Strip | ControlField::Buzzer => {
                ControlValue::Flag(row.try_get::<bool, _>(field.as_str())?)
            }
            _ => ControlValue::Int(row.try_get::<i64, _>(field.as_str())?),
        };
        record
            .set(field, value)
            .map_err(|err| anyhow!("stored controls row is malformed: {err}"))?;
    }
    Ok(record)
}

fn reading_from_row(row: &SqliteRow) -> Result<SensorReading> {
    let created_micros = row.try_get::<i64, _>("created_at")?;
    let created_at = DateTime::<Utc>::from_timestamp_micros(created_micros)
        .ok_or_else(|| anyhow!("sensor reading has invalid created_at {created_micros}"))?;
    Ok(SensorReading {
        id: ReadingId(row.try_get::<i64, _>("id")?),
        temperature: row.try_get::<f64, _>("temperature")?,
        humidity: row.try_get::<f64, _>("humidity")?,
        light: row.try_get::<i64, _>("light")?,
        created_at,
    })
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.contains(":memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
