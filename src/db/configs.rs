use rusqlite::{OptionalExtension, Row, params};
use sha2::{Digest, Sha256};

use super::models::StoredConfiguration;
use super::{Database, Result};
use crate::indices::registry::{IndexSet, IndexSpec};

/// Short content hash of a configuration fragment: first 16 hex chars of SHA-256
/// over its compact JSON (object keys sorted).
pub fn content_hash(fragment: &serde_json::Value) -> String {
    let digest = Sha256::digest(fragment.to_string().as_bytes());
    let mut hex = format!("{digest:x}");
    hex.truncate(16);
    hex
}

fn row_to_configuration(row: &Row<'_>) -> rusqlite::Result<StoredConfiguration> {
    Ok(StoredConfiguration {
        id: row.get(0)?,
        config_source: row.get(1)?,
        index_name: row.get(2)?,
        cosmetic_name: row.get(3)?,
        processor: row.get(4)?,
        processing_domain: row.get(5)?,
        config_fragment: row.get(6)?,
        content_hash: row.get(7)?,
        created_at: row.get(8)?,
    })
}

const CONFIG_COLUMNS: &str = "id, config_source, index_name, cosmetic_name, processor,
    processing_domain, config_fragment, content_hash, created_at";

impl Database {
    /// Record which configuration produced an index. Returns false when an identical
    /// entry (same source, name and content) is already registered.
    pub fn store_index_configuration(&self, config_source: &str, spec: &IndexSpec) -> Result<bool> {
        let fragment = spec.config_fragment();
        let hash = content_hash(&fragment);
        let json = serde_json::to_string(&fragment)?;

        let inserted = self.conn.execute(
            "INSERT INTO index_configurations (
                config_source, index_name, cosmetic_name, processor,
                processing_domain, config_fragment, content_hash
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(config_source, index_name, content_hash) DO NOTHING",
            params![
                config_source,
                spec.persistence_name,
                spec.cosmetic_name,
                spec.processor.identifier(),
                spec.domain.as_str(),
                json,
                hash,
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Register every index of a set. Returns the number of new entries.
    pub fn store_index_set(&self, config_source: &str, set: &IndexSet) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut added = 0;
        for spec in set.specs() {
            if self.store_index_configuration(config_source, spec)? {
                added += 1;
            }
        }
        tx.commit()?;
        if added > 0 {
            log::info!(
                "Registered {} new {} index configuration(s) from {}",
                added,
                set.domain(),
                config_source
            );
        }
        Ok(added)
    }

    /// Most recently registered configuration of an index name.
    pub fn get_index_configuration(
        &self,
        index_name: &str,
        config_source: Option<&str>,
    ) -> Result<Option<StoredConfiguration>> {
        let sql = format!(
            "SELECT {CONFIG_COLUMNS} FROM index_configurations
             WHERE index_name = ?1 AND (?2 IS NULL OR config_source = ?2)
             ORDER BY created_at DESC, id DESC
             LIMIT 1"
        );
        let config = self
            .conn
            .query_row(&sql, params![index_name, config_source], row_to_configuration)
            .optional()?;
        Ok(config)
    }

    pub fn all_configurations(&self, config_source: Option<&str>) -> Result<Vec<StoredConfiguration>> {
        let sql = format!(
            "SELECT {CONFIG_COLUMNS} FROM index_configurations
             WHERE (?1 IS NULL OR config_source = ?1)
             ORDER BY config_source, processing_domain, index_name, id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let configs = stmt
            .query_map(params![config_source], row_to_configuration)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(configs)
    }
}
