use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use crate::db::{
    connection::Database,
    guard::checked,
    helpers::{parse_datetime, parse_optional_datetime, parse_status, to_i64, to_u64},
    models::{ParkingSession, SessionStats, SessionStatus},
};

const SESSION_COLUMNS: &str = "id, plate, entry_lane, exit_lane, entry_time, exit_time, duration_ms, status, created_at, updated_at";

fn row_to_session(row: &Row) -> Result<ParkingSession> {
    let entry_time: String = row.get("entry_time")?;
    let exit_time: Option<String> = row.get("exit_time")?;
    let duration_ms: Option<i64> = row.get("duration_ms")?;
    let status: String = row.get("status")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(ParkingSession {
        id: row.get("id")?,
        plate: row.get("plate")?,
        entry_lane: row.get("entry_lane")?,
        exit_lane: row.get("exit_lane")?,
        entry_time: parse_datetime(&entry_time, "entry_time")?,
        exit_time: parse_optional_datetime(exit_time, "exit_time")?,
        duration_ms: duration_ms
            .map(|ms| to_u64(ms, "duration_ms"))
            .transpose()?,
        status: parse_status(&status)?,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

fn find_open(conn: &Connection, plate: &str) -> Result<Option<ParkingSession>> {
    let sql = format!(
        "SELECT {SESSION_COLUMNS} FROM parking_sessions WHERE plate = ?1 AND status = 'open'"
    );
    let mut stmt = conn.prepare(checked(&sql)?)?;
    stmt.query_row(params![plate], |row| Ok(row_to_session(row)))
        .optional()?
        .transpose()
}

fn collect_sessions(conn: &Connection, sql: &str, args: impl rusqlite::Params) -> Result<Vec<ParkingSession>> {
    let mut stmt = conn.prepare(checked(sql)?)?;
    let mut rows = stmt.query(args)?;
    let mut sessions = Vec::new();
    while let Some(row) = rows.next()? {
        sessions.push(row_to_session(row)?);
    }
    Ok(sessions)
}

/// Result of trying to open a session for a plate.
#[derive(Debug, Clone, PartialEq)]
pub enum OpenOutcome {
    Opened(ParkingSession),
    /// Id of the session already open for the plate.
    AlreadyOpen(String),
}

impl Database {
    pub async fn find_open_session(&self, plate: &str) -> Result<Option<ParkingSession>> {
        let plate = plate.to_string();
        self.execute(move |conn| find_open(conn, &plate)).await
    }

    /// Check and insert run in one immediate transaction so two lanes cannot
    /// both open a session for the same plate.
    pub async fn open_parking_session(
        &self,
        plate: &str,
        lane: &str,
        entry_time: DateTime<Utc>,
    ) -> Result<OpenOutcome> {
        let session = ParkingSession::opened(plate, lane, entry_time);
        self.execute(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            if let Some(existing) = find_open(&tx, &session.plate)? {
                return Ok(OpenOutcome::AlreadyOpen(existing.id));
            }

            tx.execute(
                checked(
                    "INSERT INTO parking_sessions (id, plate, entry_lane, exit_lane, entry_time, exit_time, duration_ms, status, created_at, updated_at)
                     VALUES (?1, ?2, ?3, NULL, ?4, NULL, NULL, ?5, ?6, ?7)",
                )?,
                params![
                    session.id,
                    session.plate,
                    session.entry_lane,
                    session.entry_time.to_rfc3339(),
                    session.status.as_str(),
                    session.created_at.to_rfc3339(),
                    session.updated_at.to_rfc3339(),
                ],
            )?;
            tx.commit()?;
            Ok(OpenOutcome::Opened(session))
        })
        .await
    }

    /// Closes the plate's open session, or returns `None` when there is none.
    pub async fn close_parking_session(
        &self,
        plate: &str,
        lane: &str,
        exit_time: DateTime<Utc>,
    ) -> Result<Option<ParkingSession>> {
        let plate = plate.to_string();
        let lane = lane.to_string();
        self.execute(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let Some(mut session) = find_open(&tx, &plate)? else {
                return Ok(None);
            };

            let duration_ms = (exit_time - session.entry_time).num_milliseconds().max(0) as u64;
            let now = Utc::now();
            tx.execute(
                checked(
                    "UPDATE parking_sessions
                     SET exit_lane = ?1,
                         exit_time = ?2,
                         duration_ms = ?3,
                         status = ?4,
                         updated_at = ?5
                     WHERE id = ?6",
                )?,
                params![
                    lane,
                    exit_time.to_rfc3339(),
                    to_i64(duration_ms)?,
                    SessionStatus::Closed.as_str(),
                    now.to_rfc3339(),
                    session.id,
                ],
            )?;
            tx.commit()?;

            session.exit_lane = Some(lane);
            session.exit_time = Some(exit_time);
            session.duration_ms = Some(duration_ms);
            session.status = SessionStatus::Closed;
            session.updated_at = now;
            Ok(Some(session))
        })
        .await
    }

    /// Newest first.
    pub async fn list_sessions_paginated(&self, limit: u32, offset: u32) -> Result<Vec<ParkingSession>> {
        self.execute(move |conn| {
            let sql = format!(
                "SELECT {SESSION_COLUMNS} FROM parking_sessions ORDER BY entry_time DESC LIMIT ?1 OFFSET ?2"
            );
            collect_sessions(conn, &sql, params![limit, offset])
        })
        .await
    }

    pub async fn list_open_sessions(&self) -> Result<Vec<ParkingSession>> {
        self.execute(|conn| {
            let sql = format!(
                "SELECT {SESSION_COLUMNS} FROM parking_sessions WHERE status = 'open' ORDER BY entry_time ASC"
            );
            collect_sessions(conn, &sql, [])
        })
        .await
    }

    pub async fn session_stats(&self) -> Result<SessionStats> {
        self.execute(|conn| {
            let count = |sql: &str| -> Result<u64> {
                let value: i64 = conn.query_row(checked(sql)?, [], |row| row.get(0))?;
                Ok(value.max(0) as u64)
            };
            Ok(SessionStats {
                total_sessions: count("SELECT COUNT(*) FROM parking_sessions")?,
                open_sessions: count("SELECT COUNT(*) FROM parking_sessions WHERE status = 'open'")?,
                closed_sessions: count("SELECT COUNT(*) FROM parking_sessions WHERE status = 'closed'")?,
                registered_vehicles: count("SELECT COUNT(*) FROM vehicles")?,
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn second_open_for_same_plate_reports_existing_session() {
        let db = Database::in_memory().expect("db");
        let t0 = Utc::now();

        let first = db.open_parking_session("KA01AB1234", "entry", t0).await.expect("open");
        let OpenOutcome::Opened(session) = first else {
            panic!("first open should succeed");
        };
        let second = db.open_parking_session("KA01AB1234", "exit", t0).await.expect("open");
        assert_eq!(second, OpenOutcome::AlreadyOpen(session.id));
    }

    #[tokio::test]
    async fn close_sets_exit_and_duration() {
        let db = Database::in_memory().expect("db");
        let t0 = Utc::now();
        db.open_parking_session("MH12DE1433", "entry", t0).await.expect("open");

        let closed = db
            .close_parking_session("MH12DE1433", "exit", t0 + Duration::minutes(42))
            .await
            .expect("close")
            .expect("was open");
        assert_eq!(closed.status, SessionStatus::Closed);
        assert_eq!(closed.duration(), Some(Duration::minutes(42)));
        assert_eq!(closed.duration_ms, Some(42 * 60 * 1000));

        assert!(db.close_parking_session("MH12DE1433", "exit", t0).await.expect("close").is_none());
        let stored = db.list_sessions_paginated(10, 0).await.expect("list");
        assert_eq!(stored, vec![closed]);
    }

    #[tokio::test]
    async fn stats_count_sessions_by_status() {
        let db = Database::in_memory().expect("db");
        let t0 = Utc::now();
        db.open_parking_session("KA01AB1234", "entry", t0).await.expect("open");
        db.open_parking_session("DL8CAF5031", "entry", t0).await.expect("open");
        db.close_parking_session("DL8CAF5031", "exit", t0 + Duration::hours(1))
            .await
            .expect("close");

        let stats = db.session_stats().await.expect("stats");
        assert_eq!(stats.total_sessions, 2);
        assert_eq!(stats.open_sessions, 1);
        assert_eq!(stats.closed_sessions, 1);
        assert_eq!(db.list_open_sessions().await.expect("open list").len(), 1);
    }
}
