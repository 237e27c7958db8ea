use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fs::{File, OpenOptions},
    io::{ErrorKind, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::{Mutex, RwLock},
    time::Instant,
};

/// A found item as persisted by a [`RecordStore`].
///
/// Embeddings are not part of the durable record; they are recomputed (or
/// taken from the vector snapshot) when the store is replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub id: String,
    pub description: String,
    pub category: String,
    pub created_at: DateTime<Utc>,
}

/// Durable home of item records.
///
/// Replaying `load_all` through the retrieval service in order rebuilds the
/// whole in-memory index.
pub trait RecordStore: Send + Sync {
    /// All records in original insertion order.
    fn load_all(&self) -> anyhow::Result<Vec<ItemRecord>>;
    /// Persist one record. Must be durable when this returns `Ok`.
    fn save(&self, record: &ItemRecord) -> anyhow::Result<()>;
    /// Short name for logs.
    fn kind(&self) -> &'static str;
}

/// Process-lifetime store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: RwLock<Vec<ItemRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for InMemoryStore {
    fn load_all(&self) -> anyhow::Result<Vec<ItemRecord>> {
        let records = self
            .records
            .read()
            .map_err(|err| anyhow!("record lock poisoned: {err}"))?;
        Ok(records.clone())
    }

    fn save(&self, record: &ItemRecord) -> anyhow::Result<()> {
        self.records
            .write()
            .map_err(|err| anyhow!("record lock poisoned: {err}"))?
            .push(record.clone());
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}

const CSV_HEADERS: [&str; 4] = ["id", "description", "category", "created_at"];

/// Append-only CSV file store.
#[derive(Debug)]
pub struct CsvStore {
    path: PathBuf,
    /// Serializes appends
    write_lock: Mutex<()>,
}

impl CsvStore {
    /// Open the store at `path`, creating the file with a header row if it
    /// does not exist yet.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Err(err) = std::fs::metadata(path) {
            match err.kind() {
                ErrorKind::NotFound => {
                    log::info!("Creating new item store at {}", path.display());
                    let mut csv_wrt = csv::Writer::from_path(path)?;
                    csv_wrt.write_record(CSV_HEADERS)?;
                    csv_wrt.flush()?;
                }
                _ => Err(err)?,
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            write_lock: Mutex::new(()),
        })
    }
}

impl CsvStore {
    /// Drop a torn final row left by an interrupted append, and make sure
    /// the next append starts on a fresh line.
    fn repair_tail(&self, torn_at: Option<u64>) -> anyhow::Result<()> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;

        if let Some(offset) = torn_at {
            file.set_len(offset)?;
        }

        let len = file.metadata()?.len();
        if len > 0 {
            let mut last = [0u8; 1];
            file.seek(SeekFrom::Start(len - 1))?;
            file.read_exact(&mut last)?;
            if last[0] != b'\n' {
                file.seek(SeekFrom::End(0))?;
                file.write_all(b"\n")?;
            }
        }

        file.sync_data()?;
        Ok(())
    }
}

fn parse_row(row: &csv::ByteRecord) -> anyhow::Result<ItemRecord> {
    if row.len() != CSV_HEADERS.len() {
        return Err(anyhow!(
            "expected {} fields, found {}",
            CSV_HEADERS.len(),
            row.len()
        ));
    }

    let field = |idx: usize| -> anyhow::Result<String> {
        let bytes = row.get(idx).unwrap_or_default();
        String::from_utf8(bytes.to_vec())
            .map_err(|_| anyhow!("field {} is not valid utf-8", CSV_HEADERS[idx]))
    };

    let created_at = field(3)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .with_context(|| format!("bad created_at {created_at:?}"))?
        .with_timezone(&Utc);

    Ok(ItemRecord {
        id: field(0)?,
        description: field(1)?,
        category: field(2)?,
        created_at,
    })
}

impl RecordStore for CsvStore {
    fn load_all(&self) -> anyhow::Result<Vec<ItemRecord>> {
        let now = Instant::now();
        let _guard = self
            .write_lock
            .lock()
            .map_err(|err| anyhow!("store lock poisoned: {err}"))?;

        let mut csv_reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&self.path)?;

        let rows = csv_reader
            .byte_records()
            .collect::<Result<Vec<_>, _>>()?;

        let mut records = Vec::with_capacity(rows.len());
        let mut torn_at = None;

        for (idx, row) in rows.iter().enumerate() {
            match parse_row(row) {
                Ok(record) => records.push(record),
                Err(err) if idx + 1 == rows.len() => {
                    let offset = row.position().map(|pos| pos.byte());
                    log::warn!(
                        "dropping incomplete last row {} of {}: {err}",
                        idx + 1,
                        self.path.display()
                    );
                    torn_at = offset;
                }
                Err(err) => return Err(err.context(format!("row {}", idx + 1))),
            }
        }

        self.repair_tail(torn_at)?;

        log::debug!(
            "loaded {} records from {} in {:?}",
            records.len(),
            self.path.display(),
            now.elapsed()
        );

        Ok(records)
    }

    fn save(&self, record: &ItemRecord) -> anyhow::Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|err| anyhow!("store lock poisoned: {err}"))?;

        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        let len_before = file.metadata()?.len();

        if let Err(err) = append_row(&mut file, record) {
            // never leave half a row behind
            if let Err(trunc_err) = file.set_len(len_before) {
                log::error!("failed to roll back {}: {trunc_err}", self.path.display());
            }
            return Err(err);
        }

        Ok(())
    }

    fn kind(&self) -> &'static str {
        "csv"
    }
}

fn append_row(file: &mut File, record: &ItemRecord) -> anyhow::Result<()> {
    let mut csv_wrt = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(&mut *file);
    csv_wrt.write_record([
        record.id.as_str(),
        record.description.as_str(),
        record.category.as_str(),
        record.created_at.to_rfc3339().as_str(),
    ])?;
    csv_wrt.flush()?;
    drop(csv_wrt);

    file.sync_data()?;
    Ok(())
}
