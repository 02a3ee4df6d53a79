use anyhow::{anyhow, Result};
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::config::validate_sheet_id;
use crate::detect::Template;
use crate::session::CountSession;

/// One inventory line written for a confirmed session.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SheetRow {
    pub row_id: String,
    pub sheet_id: String,
    pub session_id: String,
    pub template: Template,
    pub quantity: u64,
    pub recorded_at_ms: u64,
    /// Full confirmed snapshot, including detections and markers.
    pub session: CountSession,
}

impl SheetRow {
    fn from_session(session: &CountSession) -> Result<Self> {
        let end = session
            .end_time_ms
            .ok_or_else(|| anyhow!("session {} is not finalized", session.id))?;
        let sheet_id = session
            .sheet_id
            .clone()
            .ok_or_else(|| anyhow!("session {} has no sheet id", session.id))?;
        validate_sheet_id(&sheet_id)?;
        let row_id = session
            .row_id
            .clone()
            .ok_or_else(|| anyhow!("session {} has no row id", session.id))?;
        Ok(Self {
            row_id,
            sheet_id,
            session_id: session.id.clone(),
            template: session.template,
            quantity: session.total_count,
            recorded_at_ms: end,
            session: session.clone(),
        })
    }
}

/// Destination for confirmed sessions.
///
/// Writes are keyed by row id, so appending the same snapshot twice leaves a
/// single row. `append_row` returns whether a new row was written.
pub trait SheetStore {
    fn append_row(&mut self, session: &CountSession) -> Result<bool>;

    /// Rows for one sheet, oldest first.
    fn rows(&mut self, sheet_id: &str) -> Result<Vec<SheetRow>>;

    fn total_quantity(&mut self, sheet_id: &str) -> Result<u64> {
        Ok(self.rows(sheet_id)?.iter().map(|r| r.quantity).sum())
    }
}

pub struct SqliteSheetStore {
    conn: Connection,
}

impl SqliteSheetStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS inventory_rows (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              row_id TEXT NOT NULL UNIQUE,
              sheet_id TEXT NOT NULL,
              session_id TEXT NOT NULL,
              template TEXT NOT NULL,
              quantity INTEGER NOT NULL,
              recorded_at INTEGER NOT NULL,
              payload_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_rows_sheet ON inventory_rows(sheet_id);
            "#,
        )?;
        Ok(())
    }
}

impl SheetStore for SqliteSheetStore {
    fn append_row(&mut self, session: &CountSession) -> Result<bool> {
        let row = SheetRow::from_session(session)?;
        let quantity =
            i64::try_from(row.quantity).map_err(|_| anyhow!("quantity exceeds i64 range"))?;
        let recorded_at = i64::try_from(row.recorded_at_ms)
            .map_err(|_| anyhow!("recorded_at exceeds i64 range"))?;
        let payload_json = serde_json::to_string(session)?;

        let inserted = self.conn.execute(
            r#"
            INSERT OR IGNORE INTO inventory_rows
              (row_id, sheet_id, session_id, template, quantity, recorded_at, payload_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                row.row_id,
                row.sheet_id,
                row.session_id,
                row.template.as_str(),
                quantity,
                recorded_at,
                payload_json
            ],
        )?;
        if inserted == 0 {
            log::info!("row {} already present in {}", row.row_id, row.sheet_id);
        }
        Ok(inserted > 0)
    }

    fn rows(&mut self, sheet_id: &str) -> Result<Vec<SheetRow>> {
        let payloads = {
            let mut stmt = self.conn.prepare(
                "SELECT payload_json FROM inventory_rows WHERE sheet_id = ?1 ORDER BY id ASC",
            )?;
            let mut rows = stmt.query(params![sheet_id])?;
            let mut payloads = Vec::new();
            while let Some(row) = rows.next()? {
                let payload: String = row.get(0)?;
                payloads.push(payload);
            }
            payloads
        };

        let mut out = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let session: CountSession = serde_json::from_str(&payload)?;
            out.push(SheetRow::from_session(&session)?);
        }
        Ok(out)
    }

    fn total_quantity(&mut self, sheet_id: &str) -> Result<u64> {
        let total: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(quantity), 0) FROM inventory_rows WHERE sheet_id = ?1",
            params![sheet_id],
            |row| row.get(0),
        )?;
        u64::try_from(total).map_err(|_| anyhow!("corrupt inventory: negative total"))
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemorySheetStore {
    rows: Vec<SheetRow>,
}

impl SheetStore for InMemorySheetStore {
    fn append_row(&mut self, session: &CountSession) -> Result<bool> {
        let row = SheetRow::from_session(session)?;
        if self.rows.iter().any(|r| r.row_id == row.row_id) {
            return Ok(false);
        }
        self.rows.push(row);
        Ok(true)
    }

    fn rows(&mut self, sheet_id: &str) -> Result<Vec<SheetRow>> {
        Ok(self
            .rows
            .iter()
            .filter(|r| r.sheet_id == sheet_id)
            .cloned()
            .collect())
    }
}
