use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::{span, Level};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

/// Rows kept after each open; older records are dropped first.
const MAX_ROWS: i64 = 10_000;

const SCHEMA: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    CREATE TABLE IF NOT EXISTS logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        level TEXT NOT NULL,
        target TEXT NOT NULL,
        message TEXT NOT NULL,
        kind TEXT,
        session_id TEXT,
        fields TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_logs_kind ON logs(kind);
    CREATE INDEX IF NOT EXISTS idx_logs_session ON logs(session_id);
";

/// A persisted warning or error.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: i64,
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    /// Error classification (`error_kind()`) when the event carried one.
    pub kind: Option<String>,
    pub session_id: Option<String>,
    /// Remaining structured fields as a JSON object.
    pub fields: Option<Value>,
}

#[derive(Clone, Debug, Default)]
pub struct LogQuery {
    /// Exact level, e.g. "error". Case-insensitive.
    pub level: Option<String>,
    pub kind: Option<String>,
    pub session_id: Option<String>,
    /// RFC 3339 lower bound on the timestamp.
    pub since: Option<String>,
    pub limit: Option<u32>,
}

/// SQLite table of warn+ events, newest first on query.
pub struct SqliteLogSink {
    conn: Mutex<Connection>,
}

impl SqliteLogSink {
    pub fn new(db_path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = db_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        Self::open(Connection::open(db_path)?)
    }

    pub fn in_memory() -> Result<Self, rusqlite::Error> {
        Self::open(Connection::open_in_memory()?)
    }

    fn open(conn: Connection) -> Result<Self, rusqlite::Error> {
        conn.execute_batch(SCHEMA)?;
        let sink = Self {
            conn: Mutex::new(conn),
        };
        sink.retain_latest(MAX_ROWS)?;
        Ok(sink)
    }

    /// Drop all but the newest `keep` rows. Returns how many were removed.
    pub fn retain_latest(&self, keep: i64) -> Result<usize, rusqlite::Error> {
        self.conn.lock().execute(
            "DELETE FROM logs WHERE id <= (SELECT COALESCE(MAX(id), 0) FROM logs) - ?1",
            [keep],
        )
    }

    fn insert(&self, entry: &LogEntry) -> Result<(), rusqlite::Error> {
        self.conn.lock().execute(
            "INSERT INTO logs (timestamp, level, target, message, kind, session_id, fields)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                entry.timestamp,
                entry.level,
                entry.target,
                entry.message,
                entry.kind,
                entry.session_id,
                entry.fields,
            ],
        )?;
        Ok(())
    }

    pub fn query(&self, q: &LogQuery) -> Result<Vec<LogRecord>, rusqlite::Error> {
        let mut clauses = Vec::new();
        let mut args: Vec<String> = Vec::new();
        let filters = [
            ("level = ?", q.level.as_ref().map(|l| l.to_uppercase())),
            ("kind = ?", q.kind.clone()),
            ("session_id = ?", q.session_id.clone()),
            ("timestamp >= ?", q.since.clone()),
        ];
        for (clause, value) in filters {
            if let Some(value) = value {
                clauses.push(clause);
                args.push(value);
            }
        }

        let mut sql = String::from(
            "SELECT id, timestamp, level, target, message, kind, session_id, fields FROM logs",
        );
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(&format!(" ORDER BY id DESC LIMIT {}", q.limit.unwrap_or(100)));

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
            let fields: Option<String> = row.get(7)?;
            Ok(LogRecord {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                level: row.get(2)?,
                target: row.get(3)?,
                message: row.get(4)?,
                kind: row.get(5)?,
                session_id: row.get(6)?,
                fields: fields.and_then(|f| serde_json::from_str(&f).ok()),
            })
        })?;
        rows.collect()
    }

    pub fn count(&self) -> Result<i64, rusqlite::Error> {
        self.conn
            .lock()
            .query_row("SELECT COUNT(*) FROM logs", [], |row| row.get(0))
    }
}

struct LogEntry {
    timestamp: String,
    level: String,
    target: String,
    message: String,
    kind: Option<String>,
    session_id: Option<String>,
    fields: Option<String>,
}

/// Collects an event's message, its `kind` and `session_id`, and everything else.
#[derive(Default)]
struct EventFields {
    message: String,
    kind: Option<String>,
    session_id: Option<String>,
    rest: Map<String, Value>,
}

impl EventFields {
    fn put(&mut self, field: &Field, value: Value) {
        match (field.name(), value) {
            ("message", Value::String(s)) => self.message = s,
            ("kind", Value::String(s)) => self.kind = Some(s),
            ("session_id", Value::String(s)) => self.session_id = Some(s),
            (name, value) => {
                self.rest.insert(name.to_string(), value);
            }
        }
    }
}

impl Visit for EventFields {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.put(field, Value::String(format!("{value:?}")));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.put(field, value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, value.into());
    }
}

/// Session id recorded on a span, inherited by events inside it.
struct SpanSession(String);

/// Layer persisting WARN and ERROR events.
pub struct SqliteLogLayer {
    sink: Arc<SqliteLogSink>,
}

impl SqliteLogLayer {
    pub fn new(sink: Arc<SqliteLogSink>) -> Self {
        Self { sink }
    }
}

impl<S> Layer<S> for SqliteLogLayer
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut fields = EventFields::default();
        attrs.record(&mut fields);
        if let (Some(session_id), Some(span)) = (fields.session_id, ctx.span(id)) {
            span.extensions_mut().insert(SpanSession(session_id));
        }
    }

    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > Level::WARN {
            return;
        }

        let mut fields = EventFields::default();
        event.record(&mut fields);

        if fields.session_id.is_none() {
            fields.session_id = ctx.event_scope(event).and_then(|scope| {
                scope
                    .into_iter()
                    .find_map(|span| span.extensions().get::<SpanSession>().map(|s| s.0.clone()))
            });
        }

        let entry = LogEntry {
            timestamp: Utc::now().to_rfc3339(),
            level: level.as_str().to_string(),
            target: event.metadata().target().to_string(),
            message: fields.message,
            kind: fields.kind,
            session_id: fields.session_id,
            fields: (!fields.rest.is_empty())
                .then(|| Value::Object(fields.rest).to_string()),
        };
        // Failing to persist must not itself produce log events
        let _ = self.sink.insert(&entry);
    }
}
