use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::init_database;
use crate::types::StampRecord;

/// A stored row, as written by the `export` command
#[derive(Debug, Clone, Serialize)]
pub struct StoredStamp {
    pub id: i64,
    pub product_id: String,
    pub image_url: String,
    pub stamp_number: String,
    pub year: String,
    pub country: String,
    pub price: f64,
    pub category: Option<String>,
    pub condition: Option<String>,
    pub scraped_at: Option<String>,
}

/// Opened per batch; `product_id` uniqueness is enforced by the table
pub struct StampStore {
    path: PathBuf,
}

impl StampStore {
    /// Create the database file and schema if needed
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let store = Self { path: path.into() };
        let conn = store.connect()?;
        init_database(&conn)
            .with_context(|| format!("Failed to initialize {}", store.path.display()))?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection> {
        Connection::open(&self.path)
            .with_context(|| format!("Failed to open database {}", self.path.display()))
    }

    /// Insert a batch in one transaction. Returns how many rows were new.
    pub fn insert_batch(&self, batch: &[StampRecord]) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }

        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let scraped_at = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO stamps
                 (product_id, image_url, stamp_number, year, country, price, category, condition, scraped_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for stamp in batch {
                inserted += stmt.execute((
                    &stamp.product_id,
                    &stamp.image_url,
                    &stamp.stamp_number,
                    &stamp.year,
                    &stamp.country,
                    stamp.price,
                    &stamp.category,
                    &stamp.condition,
                    &scraped_at,
                ))?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM stamps", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Every stored row, oldest first
    pub fn export_all(&self) -> Result<Vec<StoredStamp>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, product_id, image_url, stamp_number, year, country, price, category, condition, scraped_at
             FROM stamps ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(StoredStamp {
                id: row.get(0)?,
                product_id: row.get(1)?,
                image_url: row.get(2)?,
                stamp_number: row.get(3)?,
                year: row.get(4)?,
                country: row.get(5)?,
                price: row.get(6)?,
                category: row.get(7)?,
                condition: row.get(8)?,
                scraped_at: row.get(9)?,
            })
        })?;
        let stamps = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(stamps)
    }
}
