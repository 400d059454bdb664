use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::detect::{BoundingBox, Detection};
use crate::frame::DetectionMode;

/// Wall-clock format of persisted timestamps.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One persisted detection batch.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetectionEvent {
    pub timestamp: String,
    pub class_labels: Vec<String>,
    pub bounding_boxes: Vec<BoundingBox>,
    pub confidences: Vec<f32>,
    pub image_path: String,
    pub mode: DetectionMode,
    pub operator: String,
    pub role: String,
}

impl DetectionEvent {
    /// Event for a batch, stamped with the current local time.
    pub fn from_detections(
        detections: &[Detection],
        image_path: impl Into<String>,
        mode: DetectionMode,
        operator: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: chrono::Local::now().format(TIMESTAMP_FORMAT).to_string(),
            class_labels: detections
                .iter()
                .map(|d| d.class_label().to_string())
                .collect(),
            bounding_boxes: detections.iter().map(|d| d.bounding_box()).collect(),
            confidences: detections.iter().map(|d| d.confidence()).collect(),
            image_path: image_path.into(),
            mode,
            operator: operator.into(),
            role: role.into(),
        }
    }
}

/// One audit trail row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AuditEntry {
    pub actor: String,
    pub action: String,
    pub timestamp: String,
}

/// Append-only sink for detection events and the audit trail.
pub trait DetectionStore: Send {
    /// Append one detection event.
    fn insert(&mut self, event: &DetectionEvent) -> Result<()>;

    /// Append one audit trail entry.
    fn log(&mut self, actor: &str, message: &str) -> Result<()>;
}

pub struct SqliteDetectionStore {
    conn: Connection,
}

impl SqliteDetectionStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("open detection store {}", db_path))?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS detections (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              timestamp TEXT,
              classes TEXT,
              bboxes TEXT,
              confidences TEXT,
              image_path TEXT,
              mode TEXT,
              operator TEXT,
              role TEXT
            );

            CREATE TABLE IF NOT EXISTS logs (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              user TEXT,
              action TEXT,
              timestamp TEXT
            );
            "#,
        )?;
        // Databases written before operator tracking lack these columns.
        ensure_columns(&self.conn, "detections", &[("operator", "TEXT"), ("role", "TEXT")])?;
        Ok(())
    }

    /// Persisted events, newest first.
    pub fn fetch_detections(&self, limit: usize) -> Result<Vec<DetectionEvent>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT timestamp, classes, bboxes, confidences, image_path, mode, operator, role
            FROM detections ORDER BY id DESC LIMIT ?1
            "#,
        )?;
        let mut rows = stmt.query(params![limit as i64])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mode: Option<String> = row.get(5)?;
            let mode = mode
                .as_deref()
                .and_then(DetectionMode::parse)
                .unwrap_or(DetectionMode::Video);
            out.push(DetectionEvent {
                timestamp: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                class_labels: decode_classes(&row.get::<_, Option<String>>(1)?.unwrap_or_default()),
                bounding_boxes: decode_boxes(&row.get::<_, Option<String>>(2)?.unwrap_or_default())?,
                confidences: decode_confidences(
                    &row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                )?,
                image_path: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                mode,
                operator: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
                role: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
            });
        }
        Ok(out)
    }

    /// Number of persisted rows each class label appears in.
    pub fn detection_statistics(&self) -> Result<BTreeMap<String, u64>> {
        let mut stmt = self.conn.prepare("SELECT classes FROM detections")?;
        let mut rows = stmt.query([])?;
        let mut counts = BTreeMap::new();
        while let Some(row) = rows.next()? {
            let classes: Option<String> = row.get(0)?;
            for label in decode_classes(&classes.unwrap_or_default()) {
                *counts.entry(label).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    /// Audit trail, newest first.
    pub fn audit_log(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let mut stmt = self
            .conn
            .prepare("SELECT user, action, timestamp FROM logs ORDER BY id DESC LIMIT ?1")?;
        let mut rows = stmt.query(params![limit as i64])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(AuditEntry {
                actor: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                action: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                timestamp: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            });
        }
        Ok(out)
    }
}

impl DetectionStore for SqliteDetectionStore {
    fn insert(&mut self, event: &DetectionEvent) -> Result<()> {
        self.conn
            .execute(
                r#"
                INSERT INTO detections
                  (timestamp, classes, bboxes, confidences, image_path, mode, operator, role)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
                params![
                    event.timestamp,
                    encode_classes(&event.class_labels),
                    encode_boxes(&event.bounding_boxes),
                    encode_confidences(&event.confidences),
                    event.image_path,
                    event.mode.as_str(),
                    event.operator,
                    event.role
                ],
            )
            .context("insert detection row")?;
        Ok(())
    }

    fn log(&mut self, actor: &str, message: &str) -> Result<()> {
        let timestamp = chrono::Local::now().format(TIMESTAMP_FORMAT).to_string();
        self.conn
            .execute(
                "INSERT INTO logs (user, action, timestamp) VALUES (?1, ?2, ?3)",
                params![actor, message, timestamp],
            )
            .context("insert audit log row")?;
        Ok(())
    }
}

/// Add any missing columns to an existing table.
pub(crate) fn ensure_columns(
    conn: &Connection,
    table: &str,
    columns: &[(&str, &str)],
) -> Result<()> {
    let existing = {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
        let mut rows = stmt.query([])?;
        let mut names = Vec::new();
        while let Some(row) = rows.next()? {
            let name: String = row.get(1)?;
            names.push(name);
        }
        names
    };
    for (name, sql_type) in columns {
        if existing.iter().any(|c| c == name) {
            continue;
        }
        conn.execute(
            &format!("ALTER TABLE {} ADD COLUMN {} {}", table, name, sql_type),
            [],
        )?;
        log::info!("storage: added column {}.{}", table, name);
    }
    Ok(())
}

fn encode_classes(labels: &[String]) -> String {
    labels.join(", ")
}

fn decode_classes(raw: &str) -> Vec<String> {
    raw.split(", ")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn encode_boxes(boxes: &[BoundingBox]) -> String {
    boxes
        .iter()
        .map(|b| b.to_string())
        .collect::<Vec<_>>()
        .join(";")
}

fn decode_boxes(raw: &str) -> Result<Vec<BoundingBox>> {
    raw.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let coords = entry
                .trim_start_matches(['[', '('])
                .trim_end_matches([']', ')'])
                .split(',')
                .map(|v| {
                    v.trim()
                        .parse::<i32>()
                        .map_err(|_| anyhow!("bad box coordinate in '{}'", entry))
                })
                .collect::<Result<Vec<_>>>()?;
            match coords.as_slice() {
                [x1, y1, x2, y2] => BoundingBox::new(*x1, *y1, *x2, *y2),
                _ => Err(anyhow!("bad box '{}'", entry)),
            }
        })
        .collect()
}

fn encode_confidences(confidences: &[f32]) -> String {
    confidences
        .iter()
        .map(|c| format!("{:.2}", c))
        .collect::<Vec<_>>()
        .join(";")
}

fn decode_confidences(raw: &str) -> Result<Vec<f32>> {
    raw.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|v| {
            v.parse::<f32>()
                .map_err(|_| anyhow!("bad confidence '{}'", v))
        })
        .collect()
}

#[derive(Debug, Default)]
struct InMemoryInner {
    events: Vec<DetectionEvent>,
    audit: Vec<AuditEntry>,
}

/// Shared in-memory store. Clones see the same rows, so a test can keep a
/// handle while a session owns another.
#[derive(Clone, Debug, Default)]
pub struct InMemoryDetectionStore {
    inner: Arc<Mutex<InMemoryInner>>,
}

impl InMemoryDetectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DetectionEvent> {
        self.inner
            .lock()
            .map(|inner| inner.events.clone())
            .unwrap_or_default()
    }

    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        self.inner
            .lock()
            .map(|inner| inner.audit.clone())
            .unwrap_or_default()
    }
}

impl DetectionStore for InMemoryDetectionStore {
    fn insert(&mut self, event: &DetectionEvent) -> Result<()> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))?;
        inner.events.push(event.clone());
        Ok(())
    }

    fn log(&mut self, actor: &str, message: &str) -> Result<()> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))?;
        inner.audit.push(AuditEntry {
            actor: actor.to_string(),
            action: message.to_string(),
            timestamp: chrono::Local::now().format(TIMESTAMP_FORMAT).to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event(labels: &[&str]) -> DetectionEvent {
        DetectionEvent {
            timestamp: "2025-01-02 03:04:05".to_string(),
            class_labels: labels.iter().map(|l| l.to_string()).collect(),
            bounding_boxes: labels
                .iter()
                .enumerate()
                .map(|(i, _)| BoundingBox::new(i as i32, 2, 30 + i as i32, 40).unwrap())
                .collect(),
            confidences: labels.iter().map(|_| 0.916).collect(),
            image_path: "results/video_frame_20250102_030405.jpg".to_string(),
            mode: DetectionMode::Video,
            operator: "ayse".to_string(),
            role: "operator".to_string(),
        }
    }

    #[test]
    fn sqlite_store_uses_the_original_column_encodings() -> Result<()> {
        let mut store = SqliteDetectionStore::open(":memory:")?;
        store.insert(&sample_event(&["Gun", "Scissor"]))?;

        let (classes, bboxes, confidences): (String, String, String) = store.conn.query_row(
            "SELECT classes, bboxes, confidences FROM detections",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        assert_eq!(classes, "Gun, Scissor");
        assert_eq!(bboxes, "[0, 2, 30, 40];[1, 2, 31, 40]");
        assert_eq!(confidences, "0.92;0.92");

        let fetched = store.fetch_detections(10)?;
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].class_labels, vec!["Gun", "Scissor"]);
        assert_eq!(fetched[0].bounding_boxes[1].as_array(), [1, 2, 31, 40]);
        assert_eq!(fetched[0].confidences, vec![0.92, 0.92]);
        assert_eq!(fetched[0].operator, "ayse");
        Ok(())
    }

    #[test]
    fn fetch_is_newest_first_and_statistics_count_rows() -> Result<()> {
        let mut store = SqliteDetectionStore::open(":memory:")?;
        store.insert(&sample_event(&["Gun"]))?;
        store.insert(&sample_event(&["Gun", "Wrench"]))?;
        store.insert(&sample_event(&["Pliers"]))?;

        let fetched = store.fetch_detections(2)?;
        assert_eq!(fetched.len(), 2);
        assert_eq!(fetched[0].class_labels, vec!["Pliers"]);

        let stats = store.detection_statistics()?;
        assert_eq!(stats.get("Gun"), Some(&2));
        assert_eq!(stats.get("Wrench"), Some(&1));
        assert_eq!(stats.get("Pliers"), Some(&1));
        Ok(())
    }

    #[test]
    fn audit_log_round_trip() -> Result<()> {
        let mut store = SqliteDetectionStore::open(":memory:")?;
        store.log("ayse", "video detection saved: [Gun]")?;
        let entries = store.audit_log(5)?;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].actor, "ayse");
        assert_eq!(entries[0].action, "video detection saved: [Gun]");
        Ok(())
    }

    #[test]
    fn legacy_table_gains_operator_columns() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("legacy.db");
        let path = path.to_string_lossy().to_string();
        {
            let conn = Connection::open(&path)?;
            conn.execute_batch(
                r#"
                CREATE TABLE detections (
                  id INTEGER PRIMARY KEY AUTOINCREMENT,
                  timestamp TEXT, classes TEXT, bboxes TEXT,
                  confidences TEXT, image_path TEXT, mode TEXT
                );
                INSERT INTO detections (timestamp, classes, bboxes, confidences, image_path, mode)
                VALUES ('2024-05-01 10:00:00', 'Gun', '', '', 'results/detect_x.jpg', 'image');
                "#,
            )?;
        }

        let mut store = SqliteDetectionStore::open(&path)?;
        store.insert(&sample_event(&["Wrench"]))?;
        let fetched = store.fetch_detections(10)?;
        assert_eq!(fetched.len(), 2);
        assert_eq!(fetched[1].mode, DetectionMode::Image);
        assert_eq!(fetched[1].operator, "");
        assert_eq!(fetched[0].role, "operator");
        Ok(())
    }

    #[test]
    fn in_memory_clones_share_rows() -> Result<()> {
        let store = InMemoryDetectionStore::new();
        let mut writer = store.clone();
        writer.insert(&sample_event(&["Gun"]))?;
        writer.log("ayse", "saved")?;
        assert_eq!(store.events().len(), 1);
        assert_eq!(store.audit_entries()[0].action, "saved");
        Ok(())
    }

    #[test]
    fn decodes_python_style_tuples() -> Result<()> {
        let boxes = decode_boxes("(1, 2, 3, 4);[5, 6, 7, 8]")?;
        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[0].as_array(), [1, 2, 3, 4]);
        assert!(decode_boxes("[1, 2, 3]").is_err());
        Ok(())
    }
}
