use anyhow::{anyhow, Context, Result};
use rand::RngCore;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};

use crate::model::{
    ClassifiedDetection, FailedResult, FailureReason, ImageId, ImageResult, ObjectCounts,
    Status, SuccessResult,
};

/// Stored source image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawImage {
    pub id: ImageId,
    pub filename: String,
    pub data: Vec<u8>,
}

/// Destination collection for a finished [`ImageResult`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultCollection {
    Success,
    Failure,
}

impl ResultCollection {
    pub fn for_status(status: Status) -> Self {
        match status {
            Status::Success => ResultCollection::Success,
            Status::Failed => ResultCollection::Failure,
        }
    }

    pub fn table(self) -> &'static str {
        match self {
            ResultCollection::Success => "detect_images",
            ResultCollection::Failure => "failed_results",
        }
    }
}

pub trait ImageStore {
    /// Look up a raw image. `Ok(None)` when no record exists.
    fn find_image(&self, id: &ImageId) -> Result<Option<RawImage>>;

    /// Store a raw image under a fresh identifier.
    fn insert_image(&mut self, filename: &str, data: &[u8]) -> Result<ImageId>;
}

pub trait ResultStore {
    /// Append a result. No dedup: the same image may appear many times.
    fn insert_result(&mut self, collection: ResultCollection, result: &ImageResult)
        -> Result<()>;

    /// Read back up to `limit` results in insertion order.
    fn results(&self, collection: ResultCollection, limit: usize) -> Result<Vec<ImageResult>>;
}

pub fn new_image_id() -> ImageId {
    let mut bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut bytes);
    ImageId::from_bytes(bytes)
}

/// Unique shared-cache in-memory database URI.
pub fn shared_memory_uri() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!(
        "file:wildlife_detect_{:x}?mode=memory&cache=shared",
        u64::from_le_bytes(bytes)
    )
}

fn open_db_connection(db_path: &str) -> Result<Connection> {
    if db_path.starts_with("file:") {
        return Ok(Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?);
    }
    Ok(Connection::open(db_path)?)
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = open_db_connection(db_path)
            .with_context(|| format!("failed to open database {}", db_path))?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS raw_images (
              id TEXT PRIMARY KEY,
              filename TEXT NOT NULL,
              data BLOB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS detect_images (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              image_id TEXT NOT NULL,
              filename TEXT NOT NULL,
              status TEXT NOT NULL,
              annotated_image BLOB,
              detections_json TEXT NOT NULL,
              object_counts_json TEXT NOT NULL,
              reason TEXT
            );

            CREATE TABLE IF NOT EXISTS failed_results (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              image_id TEXT NOT NULL,
              filename TEXT NOT NULL,
              status TEXT NOT NULL,
              annotated_image BLOB,
              detections_json TEXT NOT NULL,
              object_counts_json TEXT NOT NULL,
              reason TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_detect_images_image_id ON detect_images(image_id);
            CREATE INDEX IF NOT EXISTS idx_failed_results_image_id ON failed_results(image_id);
            "#,
        )?;
        Ok(())
    }

    /// Insert a raw image under a caller-chosen identifier.
    pub fn insert_image_with_id(
        &mut self,
        id: &ImageId,
        filename: &str,
        data: &[u8],
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO raw_images(id, filename, data) VALUES (?1, ?2, ?3)",
            params![id.key(), filename, data],
        )?;
        Ok(())
    }
}

impl ImageStore for SqliteStore {
    fn find_image(&self, id: &ImageId) -> Result<Option<RawImage>> {
        let row = self
            .conn
            .query_row(
                "SELECT filename, data FROM raw_images WHERE id = ?1",
                params![id.key()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?)),
            )
            .optional()?;
        Ok(row.map(|(filename, data)| RawImage {
            id: id.clone(),
            filename,
            data,
        }))
    }

    fn insert_image(&mut self, filename: &str, data: &[u8]) -> Result<ImageId> {
        let id = new_image_id();
        self.insert_image_with_id(&id, filename, data)?;
        Ok(id)
    }
}

impl ResultStore for SqliteStore {
    fn insert_result(
        &mut self,
        collection: ResultCollection,
        result: &ImageResult,
    ) -> Result<()> {
        let detections_json = serde_json::to_string(result.detections())?;
        let object_counts_json = serde_json::to_string(&result.object_counts())?;
        let sql = format!(
            r#"
            INSERT INTO {}(image_id, filename, status, annotated_image, detections_json, object_counts_json, reason)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            collection.table()
        );
        self.conn.execute(
            &sql,
            params![
                result.image_id(),
                result.filename(),
                result.status().as_str(),
                result.annotated_image(),
                detections_json,
                object_counts_json,
                result.failure_reason().map(FailureReason::as_str),
            ],
        )?;
        Ok(())
    }

    fn results(&self, collection: ResultCollection, limit: usize) -> Result<Vec<ImageResult>> {
        let sql = format!(
            "SELECT image_id, filename, status, annotated_image, detections_json, object_counts_json, reason FROM {} ORDER BY id ASC LIMIT ?1",
            collection.table()
        );
        let rows = {
            let mut stmt = self.conn.prepare(&sql)?;
            let mut rows = stmt.query(params![limit as i64])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(StoredRow::read(row)?);
            }
            out
        };
        rows.into_iter().map(StoredRow::into_result).collect()
    }
}

struct StoredRow {
    image_id: String,
    filename: String,
    status: String,
    annotated_image: Option<Vec<u8>>,
    detections_json: String,
    object_counts_json: String,
    reason: Option<String>,
}

impl StoredRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            image_id: row.get(0)?,
            filename: row.get(1)?,
            status: row.get(2)?,
            annotated_image: row.get(3)?,
            detections_json: row.get(4)?,
            object_counts_json: row.get(5)?,
            reason: row.get(6)?,
        })
    }

    fn into_result(self) -> Result<ImageResult> {
        let object_counts: ObjectCounts = serde_json::from_str(&self.object_counts_json)
            .context("corrupt result: object_counts_json")?;
        match self.status.as_str() {
            "Success" => {
                let detections: Vec<ClassifiedDetection> =
                    serde_json::from_str(&self.detections_json)
                        .context("corrupt result: detections_json")?;
                let annotated_image = self
                    .annotated_image
                    .ok_or_else(|| anyhow!("corrupt result: success without image"))?;
                Ok(ImageResult::Success(SuccessResult {
                    image_id: self.image_id,
                    filename: self.filename,
                    annotated_image,
                    detections,
                    object_counts,
                }))
            }
            "Failed" => {
                let reason = self
                    .reason
                    .ok_or_else(|| anyhow!("corrupt result: failure without reason"))?
                    .parse()?;
                Ok(ImageResult::Failed(FailedResult {
                    image_id: self.image_id,
                    filename: self.filename,
                    annotated_image: self.annotated_image,
                    object_counts,
                    reason,
                }))
            }
            other => Err(anyhow!("corrupt result: unknown status '{}'", other)),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryStore {
    images: Vec<RawImage>,
    success: Vec<ImageResult>,
    failure: Vec<ImageResult>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a raw image under a caller-chosen identifier.
    pub fn insert_image_with_id(&mut self, id: &ImageId, filename: &str, data: &[u8]) {
        self.images.push(RawImage {
            id: id.clone(),
            filename: filename.to_string(),
            data: data.to_vec(),
        });
    }

    fn collection(&self, collection: ResultCollection) -> &Vec<ImageResult> {
        match collection {
            ResultCollection::Success => &self.success,
            ResultCollection::Failure => &self.failure,
        }
    }
}

impl ImageStore for InMemoryStore {
    fn find_image(&self, id: &ImageId) -> Result<Option<RawImage>> {
        Ok(self
            .images
            .iter()
            .find(|image| image.id.key() == id.key())
            .map(|image| RawImage {
                id: id.clone(),
                filename: image.filename.clone(),
                data: image.data.clone(),
            }))
    }

    fn insert_image(&mut self, filename: &str, data: &[u8]) -> Result<ImageId> {
        let id = new_image_id();
        self.insert_image_with_id(&id, filename, data);
        Ok(id)
    }
}

impl ResultStore for InMemoryStore {
    fn insert_result(
        &mut self,
        collection: ResultCollection,
        result: &ImageResult,
    ) -> Result<()> {
        match collection {
            ResultCollection::Success => self.success.push(result.clone()),
            ResultCollection::Failure => self.failure.push(result.clone()),
        }
        Ok(())
    }

    fn results(&self, collection: ResultCollection, limit: usize) -> Result<Vec<ImageResult>> {
        Ok(self
            .collection(collection)
            .iter()
            .take(limit)
            .cloned()
            .collect())
    }
}
