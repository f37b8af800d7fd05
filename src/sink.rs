use anyhow::Result;
use tracing::debug;

use crate::export::JsonExport;
use crate::store::StampStore;
use crate::types::StampRecord;

pub trait StampSink {
    /// Persist one batch of accepted records
    fn persist(&mut self, batch: &[StampRecord]) -> Result<()>;
}

/// The database plus the JSON export buffer
pub struct Outputs {
    pub store: StampStore,
    pub export: JsonExport,
}

impl StampSink for Outputs {
    fn persist(&mut self, batch: &[StampRecord]) -> Result<()> {
        let inserted = self.store.insert_batch(batch)?;
        if inserted < batch.len() {
            debug!(
                ignored = batch.len() - inserted,
                "records already in the database"
            );
        }
        self.export.push(batch);
        Ok(())
    }
}

impl StampSink for Vec<StampRecord> {
    fn persist(&mut self, batch: &[StampRecord]) -> Result<()> {
        self.extend_from_slice(batch);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outputs_write_store_and_buffer_export() {
        let dir = tempfile::tempdir().unwrap();
        let mut outputs = Outputs {
            store: StampStore::open(dir.path().join("stamps.db")).unwrap(),
            export: JsonExport::new(dir.path().join("stamps.json"), false),
        };
        let stamp = StampRecord {
            product_id: "1".to_string(),
            image_url: "https://x/1.jpg".to_string(),
            stamp_number: "Norway 1".to_string(),
            year: "1855".to_string(),
            country: "Norway".to_string(),
            price: 3.0,
            category: None,
            condition: None,
        };

        outputs.persist(&[stamp.clone()]).unwrap();
        outputs.persist(&[stamp]).unwrap();

        assert_eq!(outputs.store.count().unwrap(), 1);
        assert_eq!(outputs.export.pending(), 2);
    }
}
