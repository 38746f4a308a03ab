use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use rusqlite::types::Value;
use rusqlite::{OptionalExtension, params, params_from_iter};

use super::models::{IndexRow, IndexStat, Recording, SkipMark, StoreStats};
use super::{Database, DbError, MAX_IDS_PER_QUERY, Result};
use crate::indices::ProcessingDomain;

/// Index name → one value per chunk, in chunk order.
pub type IndexValues = BTreeMap<String, Vec<f64>>;

/// Key used for a recording path in `audio_files.filepath`.
pub fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// `?start, ?start+1, ...` for `n` bound parameters.
fn placeholders(start: usize, n: usize) -> String {
    (start..start + n)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn dedup_ids(ids: &[i64]) -> Vec<i64> {
    let mut ids = ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    ids
}

impl Database {
    // ── Recordings ───────────────────────────────────────────────────

    /// Register recordings by path (no-op for known paths). Returns path → id.
    pub fn ensure_recordings<P: AsRef<Path>>(&self, paths: &[P]) -> Result<HashMap<String, i64>> {
        let keys: Vec<String> = paths.iter().map(|p| path_key(p.as_ref())).collect();

        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO audio_files (filename, filepath) VALUES (?1, ?2)
                 ON CONFLICT(filepath) DO NOTHING",
            )?;
            for (path, key) in paths.iter().zip(&keys) {
                let filename = path
                    .as_ref()
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| key.clone());
                stmt.execute(params![filename, key])?;
            }
        }
        tx.commit()?;

        self.recording_ids(&keys)
    }

    /// Bulk lookup of recording ids. Unknown paths are absent from the result.
    pub fn recording_ids(&self, paths: &[String]) -> Result<HashMap<String, i64>> {
        let mut ids = HashMap::with_capacity(paths.len());
        for batch in paths.chunks(MAX_IDS_PER_QUERY) {
            let sql = format!(
                "SELECT filepath, id FROM audio_files WHERE filepath IN ({})",
                placeholders(1, batch.len())
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(batch.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (path, id) = row?;
                ids.insert(path, id);
            }
        }
        Ok(ids)
    }

    pub fn get_recording(&self, path: &str) -> Result<Option<Recording>> {
        let recording = self
            .conn
            .query_row(
                "SELECT id, filename, filepath, duration_seconds, samplerate_hz
                 FROM audio_files WHERE filepath = ?1",
                params![path],
                |row| {
                    Ok(Recording {
                        id: row.get(0)?,
                        filename: row.get(1)?,
                        filepath: row.get(2)?,
                        duration_seconds: row.get(3)?,
                        samplerate_hz: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(recording)
    }

    /// Flag a recording so later passes over `domain` report it as skipped without
    /// loading it again. The other domain is unaffected.
    pub fn mark_skipped(&self, file_id: i64, domain: ProcessingDomain, reason: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO recording_skips (file_id, processing_domain, reason)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(file_id, processing_domain) DO UPDATE SET
                reason = excluded.reason,
                skipped_at = datetime('now')",
            params![file_id, domain.as_str(), reason],
        )?;
        Ok(())
    }

    pub fn clear_skip(&self, file_id: i64, domain: ProcessingDomain) -> Result<()> {
        self.conn.execute(
            "DELETE FROM recording_skips WHERE file_id = ?1 AND processing_domain = ?2",
            params![file_id, domain.as_str()],
        )?;
        Ok(())
    }

    /// Skip reasons of the recordings among `file_ids` that `domain` rejected.
    pub fn skip_status(
        &self,
        file_ids: &[i64],
        domain: ProcessingDomain,
    ) -> Result<HashMap<i64, String>> {
        let mut skipped = HashMap::new();
        for batch in dedup_ids(file_ids).chunks(MAX_IDS_PER_QUERY) {
            let sql = format!(
                "SELECT file_id, reason FROM recording_skips
                 WHERE processing_domain = ?1 AND file_id IN ({})",
                placeholders(2, batch.len())
            );
            let mut bind: Vec<Value> = Vec::with_capacity(batch.len() + 1);
            bind.push(Value::Text(domain.as_str().to_string()));
            bind.extend(batch.iter().map(|&id| Value::Integer(id)));

            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(bind.iter()), |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (id, reason) = row?;
                skipped.insert(id, reason);
            }
        }
        Ok(skipped)
    }

    /// Skip marks of one recording, across domains.
    pub fn skip_marks(&self, file_id: i64) -> Result<Vec<SkipMark>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT processing_domain, reason, skipped_at FROM recording_skips
             WHERE file_id = ?1 ORDER BY processing_domain",
        )?;
        let marks = stmt
            .query_map(params![file_id], |row| {
                Ok(SkipMark {
                    domain: row.get(0)?,
                    reason: row.get(1)?,
                    skipped_at: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(marks)
    }

    // ── Index values ─────────────────────────────────────────────────

    /// Write all sequences of one file in a single transaction. Returns rows written.
    ///
    /// Existing `(file, index, chunk)` rows are overwritten and chunks past the new
    /// sequence length are removed, so a file is never left with a mix of old and new
    /// values. A successful store also lifts a previous skip mark of the same domain.
    pub fn store(
        &self,
        file_id: i64,
        domain: ProcessingDomain,
        values: &IndexValues,
        timestamps: &[f64],
    ) -> Result<usize> {
        for (name, series) in values {
            if series.len() != timestamps.len() {
                return Err(DbError::LengthMismatch {
                    index: name.clone(),
                    values: series.len(),
                    timestamps: timestamps.len(),
                });
            }
        }

        let computed_at = chrono::Utc::now().to_rfc3339();
        let tx = self.conn.unchecked_transaction()?;
        let mut written = 0;
        {
            let mut upsert = tx.prepare_cached(
                "INSERT INTO acoustic_indices (
                    file_id, index_name, chunk_index, start_time_sec, value,
                    processing_domain, computed_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(file_id, index_name, chunk_index) DO UPDATE SET
                    start_time_sec = excluded.start_time_sec,
                    value = excluded.value,
                    processing_domain = excluded.processing_domain,
                    computed_at = excluded.computed_at",
            )?;
            let mut prune = tx.prepare_cached(
                "DELETE FROM acoustic_indices
                 WHERE file_id = ?1 AND index_name = ?2 AND chunk_index >= ?3",
            )?;

            for (name, series) in values {
                for (i, (value, start)) in series.iter().zip(timestamps).enumerate() {
                    written += upsert.execute(params![
                        file_id,
                        name,
                        i as i64,
                        start,
                        value,
                        domain.as_str(),
                        computed_at,
                    ])?;
                }
                prune.execute(params![file_id, name, series.len() as i64])?;
            }

            tx.execute(
                "DELETE FROM recording_skips WHERE file_id = ?1 AND processing_domain = ?2",
                params![file_id, domain.as_str()],
            )?;
        }
        tx.commit()?;

        log::debug!(
            "Stored {} {} values for file {}",
            written,
            domain,
            file_id
        );
        Ok(written)
    }

    /// Values of many files at once, one query per batch of ids.
    /// Files without stored values are absent from the result.
    pub fn get_many(
        &self,
        file_ids: &[i64],
        domain: ProcessingDomain,
        index_names: Option<&[String]>,
    ) -> Result<HashMap<i64, IndexValues>> {
        let wanted: Option<HashSet<&str>> =
            index_names.map(|names| names.iter().map(String::as_str).collect());
        let mut out: HashMap<i64, IndexValues> = HashMap::new();

        for batch in dedup_ids(file_ids).chunks(MAX_IDS_PER_QUERY) {
            let sql = format!(
                "SELECT file_id, index_name, value FROM acoustic_indices
                 WHERE processing_domain = ?1 AND file_id IN ({})
                 ORDER BY file_id, index_name, chunk_index",
                placeholders(2, batch.len())
            );
            let mut bind: Vec<Value> = Vec::with_capacity(batch.len() + 1);
            bind.push(Value::Text(domain.as_str().to_string()));
            bind.extend(batch.iter().map(|&id| Value::Integer(id)));

            let mut stmt = self.conn.prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(bind.iter()))?;
            while let Some(row) = rows.next()? {
                let file_id: i64 = row.get(0)?;
                let name: String = row.get(1)?;
                if wanted.as_ref().is_some_and(|w| !w.contains(name.as_str())) {
                    continue;
                }
                out.entry(file_id)
                    .or_default()
                    .entry(name)
                    .or_default()
                    .push(row.get(2)?);
            }
        }
        Ok(out)
    }

    /// Values of one file, optionally restricted to a domain and a set of index names.
    pub fn get_indices(
        &self,
        file_id: i64,
        domain: Option<ProcessingDomain>,
        index_names: Option<&[String]>,
    ) -> Result<IndexValues> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT index_name, value FROM acoustic_indices
             WHERE file_id = ?1 AND (?2 IS NULL OR processing_domain = ?2)
             ORDER BY index_name, chunk_index",
        )?;
        let rows = stmt.query_map(params![file_id, domain.map(|d| d.as_str())], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?;

        let mut out = IndexValues::new();
        for row in rows {
            let (name, value) = row?;
            if index_names.is_some_and(|names| !names.contains(&name)) {
                continue;
            }
            out.entry(name).or_default().push(value);
        }
        Ok(out)
    }

    /// Raw rows of one file, for display.
    pub fn get_index_rows(
        &self,
        file_id: i64,
        domain: Option<ProcessingDomain>,
    ) -> Result<Vec<IndexRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT index_name, chunk_index, start_time_sec, value, processing_domain, computed_at
             FROM acoustic_indices
             WHERE file_id = ?1 AND (?2 IS NULL OR processing_domain = ?2)
             ORDER BY processing_domain, index_name, chunk_index",
        )?;
        let rows = stmt
            .query_map(params![file_id, domain.map(|d| d.as_str())], |row| {
                Ok(IndexRow {
                    index_name: row.get(0)?,
                    chunk_index: row.get(1)?,
                    start_time_sec: row.get(2)?,
                    value: row.get(3)?,
                    domain: row.get(4)?,
                    computed_at: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Delete stored values, optionally for one file and/or one domain. Returns rows deleted.
    pub fn clear(&self, file_id: Option<i64>, domain: Option<ProcessingDomain>) -> Result<usize> {
        let deleted = self.conn.execute(
            "DELETE FROM acoustic_indices
             WHERE (?1 IS NULL OR file_id = ?1) AND (?2 IS NULL OR processing_domain = ?2)",
            params![file_id, domain.map(|d| d.as_str())],
        )?;
        Ok(deleted)
    }

    /// Paths of recordings that have at least one stored value.
    pub fn files_with_indices(&self, domain: Option<ProcessingDomain>) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT a.filepath
             FROM acoustic_indices i
             JOIN audio_files a ON a.id = i.file_id
             WHERE (?1 IS NULL OR i.processing_domain = ?1)
             ORDER BY a.filepath",
        )?;
        let paths = stmt
            .query_map(params![domain.map(|d| d.as_str())], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(paths)
    }

    pub fn index_stats(&self) -> Result<StoreStats> {
        let count = |sql: &str| -> Result<i64> {
            Ok(self.conn.query_row(sql, [], |row| row.get(0))?)
        };

        let recordings = count("SELECT COUNT(*) FROM audio_files")?;
        let skipped_recordings = count("SELECT COUNT(DISTINCT file_id) FROM recording_skips")?;
        let files_with_indices = count("SELECT COUNT(DISTINCT file_id) FROM acoustic_indices")?;
        let total_rows = count("SELECT COUNT(*) FROM acoustic_indices")?;

        let mut stmt = self.conn.prepare(
            "SELECT processing_domain, index_name, COUNT(*), COUNT(DISTINCT file_id),
                    MIN(value), MAX(value)
             FROM acoustic_indices
             GROUP BY processing_domain, index_name
             ORDER BY processing_domain, index_name",
        )?;
        let per_index: Vec<IndexStat> = stmt
            .query_map([], |row| {
                Ok(IndexStat {
                    domain: row.get(0)?,
                    index_name: row.get(1)?,
                    rows: row.get(2)?,
                    files: row.get(3)?,
                    min_value: row.get(4)?,
                    max_value: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let domain_rows = |domain: ProcessingDomain| -> i64 {
            per_index
                .iter()
                .filter(|s| s.domain == domain.as_str())
                .map(|s| s.rows)
                .sum()
        };

        Ok(StoreStats {
            recordings,
            skipped_recordings,
            files_with_indices,
            total_rows,
            temporal_rows: domain_rows(ProcessingDomain::Temporal),
            spectral_rows: domain_rows(ProcessingDomain::Spectral),
            per_index,
        })
    }
}
