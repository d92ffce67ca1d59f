use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::models::{CalibrationRow, ReadingRow, StatusLogRow, StatusTransition};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("timestamp format error: {0}")]
    Format(#[from] time::error::Format),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Moyenne et nombre de lectures sur une fenêtre (journée courante ou période).
#[derive(Debug, Clone, Serialize)]
pub struct WindowStats {
    pub average: f64,
    pub count: i64,
}

/// Accès SQLite partagé entre les handlers HTTP, l'ingestion et le journal
/// de statut. Les requêtes sont courtes et le verrou n'est jamais tenu à
/// travers un await.
#[derive(Clone)]
pub struct Storage {
    conn: Arc<Mutex<Connection>>,
}

impl Storage {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
        "#,
        )?;
        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        storage.create_tables()?;
        log::info!("[storage] database opened at {path}");
        Ok(storage)
    }

    /// Base en mémoire, pour les tests.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let storage = Self {
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
        };
        storage.create_tables()?;
        Ok(storage)
    }

    fn create_tables(&self) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS readings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                value REAL NOT NULL,
                recorded_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_readings_recorded_at ON readings(recorded_at);

            CREATE TABLE IF NOT EXISTS calibration (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sensor TEXT NOT NULL,
                value REAL NOT NULL,
                recorded_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_calibration_sensor ON calibration(sensor);

            CREATE TABLE IF NOT EXISTS status_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                device_id TEXT NOT NULL,
                status TEXT NOT NULL,
                recorded_at TEXT NOT NULL
            );
        "#,
        )?;
        Ok(())
    }

    pub fn insert_reading(&self, value: f64, ts: OffsetDateTime) -> Result<(), StorageError> {
        let stamp = ts.format(&Rfc3339)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO readings (value, recorded_at) VALUES (?1, ?2)",
            params![value, stamp],
        )?;
        Ok(())
    }

    /// Les `limit` dernières lectures, rendues en ordre chronologique.
    pub fn recent_readings(&self, limit: usize) -> Result<Vec<ReadingRow>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT value, recorded_at FROM readings ORDER BY id DESC LIMIT ?1",
        )?;
        let mut rows: Vec<ReadingRow> = stmt
            .query_map(params![limit as i64], |row| {
                Ok(ReadingRow {
                    value: row.get(0)?,
                    recorded_at: row.get(1)?,
                })
            })?
            .collect::<Result<_, _>>()?;
        rows.reverse();
        Ok(rows)
    }

    pub fn latest_reading(&self) -> Result<Option<ReadingRow>, StorageError> {
        let conn = self.conn.lock();
        let result = conn.query_row(
            "SELECT value, recorded_at FROM readings ORDER BY id DESC LIMIT 1",
            [],
            |row| {
                Ok(ReadingRow {
                    value: row.get(0)?,
                    recorded_at: row.get(1)?,
                })
            },
        );
        match result {
            Ok(row) => Ok(Some(row)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn stats_today(&self) -> Result<WindowStats, StorageError> {
        let conn = self.conn.lock();
        let (average, count) = conn.query_row(
            "SELECT AVG(value), COUNT(*) FROM readings WHERE date(recorded_at) = date('now')",
            [],
            |row| Ok((row.get::<_, Option<f64>>(0)?, row.get::<_, i64>(1)?)),
        )?;
        Ok(WindowStats {
            average: average.unwrap_or(0.0),
            count,
        })
    }

    /// Moyenne/compte entre deux dates (bornes incluses, format YYYY-MM-DD).
    pub fn stats_period(&self, start: &str, end: &str) -> Result<WindowStats, StorageError> {
        let conn = self.conn.lock();
        let (average, count) = conn.query_row(
            "SELECT AVG(value), COUNT(*) FROM readings \
             WHERE date(recorded_at) >= date(?1) AND date(recorded_at) <= date(?2)",
            params![start, end],
            |row| Ok((row.get::<_, Option<f64>>(0)?, row.get::<_, i64>(1)?)),
        )?;
        Ok(WindowStats {
            average: average.unwrap_or(0.0),
            count,
        })
    }

    pub fn readings_between(
        &self,
        start: &str,
        end: &str,
        limit: usize,
    ) -> Result<Vec<ReadingRow>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT value, recorded_at FROM readings \
             WHERE date(recorded_at) >= date(?1) AND date(recorded_at) <= date(?2) \
             ORDER BY recorded_at ASC LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(params![start, end, limit as i64], |row| {
                Ok(ReadingRow {
                    value: row.get(0)?,
                    recorded_at: row.get(1)?,
                })
            })?
            .collect::<Result<_, _>>()?;
        Ok(rows)
    }

    pub fn insert_calibration(
        &self,
        sensor: &str,
        value: f64,
        ts: OffsetDateTime,
    ) -> Result<(), StorageError> {
        let stamp = ts.format(&Rfc3339)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO calibration (sensor, value, recorded_at) VALUES (?1, ?2, ?3)",
            params![sensor, value, stamp],
        )?;
        Ok(())
    }

    /// Les derniers échantillons de calibration, ordre chronologique,
    /// optionnellement restreints à un capteur.
    pub fn calibration_recent(
        &self,
        limit: usize,
        sensor: Option<&str>,
    ) -> Result<Vec<CalibrationRow>, StorageError> {
        let conn = self.conn.lock();
        let mut rows: Vec<CalibrationRow> = match sensor {
            Some(sensor) => {
                let mut stmt = conn.prepare(
                    "SELECT sensor, value, recorded_at FROM calibration \
                     WHERE sensor = ?1 ORDER BY id DESC LIMIT ?2",
                )?;
                let rows = stmt
                    .query_map(params![sensor, limit as i64], map_calibration_row)?
                    .collect::<Result<_, _>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT sensor, value, recorded_at FROM calibration \
                     ORDER BY id DESC LIMIT ?1",
                )?;
                let rows = stmt
                    .query_map(params![limit as i64], map_calibration_row)?
                    .collect::<Result<_, _>>()?;
                rows
            }
        };
        rows.reverse();
        Ok(rows)
    }

    pub fn calibration_between(
        &self,
        start: &str,
        end: &str,
        limit: usize,
        sensor: Option<&str>,
    ) -> Result<Vec<CalibrationRow>, StorageError> {
        let conn = self.conn.lock();
        let rows = match sensor {
            Some(sensor) => {
                let mut stmt = conn.prepare(
                    "SELECT sensor, value, recorded_at FROM calibration \
                     WHERE date(recorded_at) >= date(?1) AND date(recorded_at) <= date(?2) \
                       AND sensor = ?3 \
                     ORDER BY recorded_at ASC LIMIT ?4",
                )?;
                let rows = stmt
                    .query_map(params![start, end, sensor, limit as i64], map_calibration_row)?
                    .collect::<Result<_, _>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT sensor, value, recorded_at FROM calibration \
                     WHERE date(recorded_at) >= date(?1) AND date(recorded_at) <= date(?2) \
                     ORDER BY recorded_at ASC LIMIT ?3",
                )?;
                let rows = stmt
                    .query_map(params![start, end, limit as i64], map_calibration_row)?
                    .collect::<Result<_, _>>()?;
                rows
            }
        };
        Ok(rows)
    }

    pub fn insert_status_event(&self, t: &StatusTransition) -> Result<(), StorageError> {
        let stamp = t.at.format(&Rfc3339)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO status_log (device_id, status, recorded_at) VALUES (?1, ?2, ?3)",
            params![t.device_id, t.state.as_str(), stamp],
        )?;
        Ok(())
    }

    /// Les dernières entrées du journal de statut, plus récente d'abord.
    pub fn recent_status_events(&self, limit: usize) -> Result<Vec<StatusLogRow>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT device_id, status, recorded_at FROM status_log ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(StatusLogRow {
                    device_id: row.get(0)?,
                    status: row.get(1)?,
                    recorded_at: row.get(2)?,
                })
            })?
            .collect::<Result<_, _>>()?;
        Ok(rows)
    }
}

fn map_calibration_row(row: &rusqlite::Row<'_>) -> Result<CalibrationRow, rusqlite::Error> {
    Ok(CalibrationRow {
        sensor: row.get(0)?,
        value: row.get(1)?,
        recorded_at: row.get(2)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeviceState;
    use time::macros::datetime;

    #[test]
    fn readings_roundtrip_in_order() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .insert_reading(21.5, datetime!(2026-08-07 10:00:00 UTC))
            .unwrap();
        storage
            .insert_reading(22.0, datetime!(2026-08-07 10:01:00 UTC))
            .unwrap();
        storage
            .insert_reading(22.5, datetime!(2026-08-07 10:02:00 UTC))
            .unwrap();

        let rows = storage.recent_readings(2).unwrap();
        assert_eq!(rows.len(), 2);
        // chronologique : l'avant-dernière d'abord
        assert_eq!(rows[0].value, 22.0);
        assert_eq!(rows[1].value, 22.5);

        let latest = storage.latest_reading().unwrap().unwrap();
        assert_eq!(latest.value, 22.5);
        assert_eq!(latest.recorded_at, "2026-08-07T10:02:00Z");
    }

    #[test]
    fn empty_database_yields_no_latest_and_zero_stats() {
        let storage = Storage::open_in_memory().unwrap();
        assert!(storage.latest_reading().unwrap().is_none());
        let stats = storage.stats_today().unwrap();
        assert_eq!(stats.count, 0);
        assert_eq!(stats.average, 0.0);
    }

    #[test]
    fn period_stats_and_range_filter_by_date() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .insert_reading(10.0, datetime!(2026-08-01 08:00:00 UTC))
            .unwrap();
        storage
            .insert_reading(20.0, datetime!(2026-08-02 08:00:00 UTC))
            .unwrap();
        storage
            .insert_reading(90.0, datetime!(2026-08-15 08:00:00 UTC))
            .unwrap();

        let stats = storage.stats_period("2026-08-01", "2026-08-02").unwrap();
        assert_eq!(stats.count, 2);
        assert!((stats.average - 15.0).abs() < f64::EPSILON);

        let rows = storage
            .readings_between("2026-08-01", "2026-08-02", 100)
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].value, 10.0);
    }

    #[test]
    fn calibration_filters_by_sensor() {
        let storage = Storage::open_in_memory().unwrap();
        let ts = datetime!(2026-08-07 09:00:00 UTC);
        storage.insert_calibration("sonde-a", 1.5, ts).unwrap();
        storage.insert_calibration("sonde-b", 2.5, ts).unwrap();
        storage.insert_calibration("sonde-a", 1.6, ts).unwrap();

        let all = storage.calibration_recent(10, None).unwrap();
        assert_eq!(all.len(), 3);

        let only_a = storage.calibration_recent(10, Some("sonde-a")).unwrap();
        assert_eq!(only_a.len(), 2);
        assert!(only_a.iter().all(|r| r.sensor == "sonde-a"));

        let ranged = storage
            .calibration_between("2026-08-07", "2026-08-07", 10, Some("sonde-b"))
            .unwrap();
        assert_eq!(ranged.len(), 1);
        assert_eq!(ranged[0].value, 2.5);
    }

    #[test]
    fn status_events_append_and_list() {
        let storage = Storage::open_in_memory().unwrap();
        let t = StatusTransition {
            device_id: "main-probe".into(),
            state: DeviceState::Online,
            at: datetime!(2026-08-07 09:00:00 UTC),
        };
        storage.insert_status_event(&t).unwrap();
        let t2 = StatusTransition {
            device_id: "main-probe".into(),
            state: DeviceState::Offline,
            at: datetime!(2026-08-07 09:05:00 UTC),
        };
        storage.insert_status_event(&t2).unwrap();

        let rows = storage.recent_status_events(10).unwrap();
        assert_eq!(rows.len(), 2);
        // plus récent d'abord
        assert_eq!(rows[0].status, "offline");
        assert_eq!(rows[1].status, "online");
    }
}
