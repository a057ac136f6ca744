use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection};

/// Append-only log of task outcomes. The connection is opened, written, and
/// closed per record: the engine is single-writer, so no coordination beyond
/// that is needed.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    path: PathBuf,
}

const RECALL_LIMIT: i64 = 2;
const DETAIL_CHARS: usize = 100;

impl MemoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)
            .with_context(|| format!("failed to open memory store at {}", self.path.display()))?;
        Ok(conn)
    }

    /// Create the schema if it does not exist yet.
    pub fn init(&self) -> Result<()> {
        let conn = self.open()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS memories
             (id INTEGER PRIMARY KEY, timestamp TEXT, content TEXT)",
            [],
        )?;
        Ok(())
    }

    /// Append one record. Rows are never updated or deleted.
    pub fn save(&self, content: &str) -> Result<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO memories (timestamp, content) VALUES (?1, ?2)",
            params![Utc::now().to_rfc3339(), content],
        )?;
        Ok(())
    }

    /// Record a step outcome when its detail passes the gate predicate. The
    /// gate is policy, not contract: callers supply the substrings that mark
    /// an outcome worth remembering.
    pub fn save_outcome(
        &self,
        task_desc: &str,
        result: &str,
        success: bool,
        gate: &[String],
    ) -> Result<()> {
        if !gate.iter().any(|g| result.contains(g.as_str())) {
            return Ok(());
        }
        let status = if success { "SUCCESS" } else { "FAILED" };
        let detail: String = result.chars().take(DETAIL_CHARS).collect();
        self.save(&format!("{}: {} -> {}", status, task_desc, detail))
    }

    /// Retrieval hook: newest records matching the task, past failures, or
    /// the task's prefix. Not called by the control loop; kept for prompt
    /// biasing by hosts that want it.
    pub fn recall(&self, task: &str) -> Result<String> {
        let prefix = task.split(':').next().unwrap_or(task);
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT content FROM memories
             WHERE content LIKE ?1 OR content LIKE ?2 OR content LIKE ?3
             ORDER BY timestamp DESC LIMIT ?4",
        )?;
        let rows = stmt.query_map(
            params![
                format!("%{}%", task),
                "%FAILED%",
                format!("%{}%", prefix),
                RECALL_LIMIT
            ],
            |row| row.get::<_, String>(0),
        )?;

        let memories: Vec<String> = rows.filter_map(Result::ok).collect();
        if memories.is_empty() {
            Ok("No relevant experience".to_string())
        } else {
            Ok(format!("Past experience: {}", memories.join(" | ")))
        }
    }
}
