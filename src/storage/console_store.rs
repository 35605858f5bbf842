//! Persists a console log-entry collection plus the level and error
//! sub-indexes needed to query it cheaply without loading every
//! collection in the namespace.

use super::StorageBase;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::types::{ConsoleLevel, ConsoleLogEntry, StorageCategory, StorageRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsoleSummary {
    pub total: usize,
    pub by_level: HashMap<String, usize>,
    pub error_count: usize,
    pub warning_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleCollection {
    pub url: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub entries: Vec<ConsoleLogEntry>,
    pub summary: ConsoleSummary,
}

#[derive(Debug, Default, Clone)]
pub struct ConsoleFilter {
    pub url: Option<String>,
    pub level: Option<ConsoleLevel>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub search_text: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Clone)]
pub struct ConsoleQuery {
    pub url: Option<String>,
    pub has_errors: Option<bool>,
    pub has_warnings: Option<bool>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ConsoleSearchHit {
    pub reference: StorageRef,
    pub matches: Vec<ConsoleLogEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct ConsoleGlobalStats {
    pub collections: usize,
    pub total_entries: usize,
    pub total_errors: usize,
    pub total_warnings: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ErrorIndexEntry {
    url: String,
    error_count: usize,
    timestamp: DateTime<Utc>,
    errors: Vec<ErrorIndexItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ErrorIndexItem {
    message: String,
    timestamp: DateTime<Utc>,
    source: Option<String>,
}

fn summarize(entries: &[ConsoleLogEntry]) -> ConsoleSummary {
    let mut by_level: HashMap<String, usize> = HashMap::new();
    for level in ConsoleLevel::all() {
        by_level.insert(level.as_str().to_string(), 0);
    }
    for entry in entries {
        *by_level.entry(entry.level.as_str().to_string()).or_insert(0) += 1;
    }
    ConsoleSummary {
        total: entries.len(),
        error_count: *by_level.get("error").unwrap_or(&0),
        warning_count: *by_level.get("warn").unwrap_or(&0),
        by_level,
    }
}

pub struct ConsoleStore {
    base: StorageBase,
}

impl ConsoleStore {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            base: StorageBase::new(&config.storage_base_dir, "console"),
        }
    }

    pub async fn initialize(&self) -> Result<(), EngineError> {
        self.base.initialize().await
    }

    pub async fn store(
        &self,
        test_id: &str,
        step_id: Option<&str>,
        url: &str,
        entries: Vec<ConsoleLogEntry>,
    ) -> Result<StorageRef, EngineError> {
        let summary = summarize(&entries);
        let now = Utc::now();
        let collection = ConsoleCollection {
            url: url.to_string(),
            start_time: entries.first().map(|e| e.timestamp).unwrap_or(now),
            end_time: entries.last().map(|e| e.timestamp).unwrap_or(now),
            entries: entries.clone(),
            summary: summary.clone(),
        };

        let id = self.base.generate_id("console");
        let path = self.base.item_path(&id, "json");
        let size = self.base.write_json(&path, &collection).await?;

        let mut tags = HashMap::new();
        tags.insert("url".to_string(), url.to_string());
        tags.insert("entryCount".to_string(), summary.total.to_string());
        tags.insert("errorCount".to_string(), summary.error_count.to_string());
        tags.insert("warningCount".to_string(), summary.warning_count.to_string());
        tags.insert("startTime".to_string(), collection.start_time.to_rfc3339());
        tags.insert("endTime".to_string(), collection.end_time.to_rfc3339());

        let bytes = serde_json::to_vec(&collection).unwrap_or_default();
        let reference = self.base.create_ref(
            StorageCategory::ConsoleLog,
            test_id,
            step_id,
            &path,
            size,
            &bytes,
            tags,
        );

        let guard = self.base.lock_index().await;
        self.append_main_index(&id, &reference).await?;
        for level in ConsoleLevel::all() {
            let count = *summary.by_level.get(level.as_str()).unwrap_or(&0);
            if count > 0 {
                self.append_level_index(level, &id).await?;
            }
        }
        if summary.error_count > 0 {
            self.append_error_index(&id, &collection).await?;
        }
        drop(guard);

        Ok(reference)
    }

    pub async fn retrieve(&self, reference: &StorageRef) -> Result<ConsoleCollection, EngineError> {
        self.base
            .read_json(std::path::Path::new(&reference.path))
            .await
    }

    pub async fn retrieve_filtered(
        &self,
        reference: &StorageRef,
        filter: &ConsoleFilter,
    ) -> Result<Vec<ConsoleLogEntry>, EngineError> {
        let collection = self.retrieve(reference).await?;
        Ok(apply_filter(&collection.entries, filter))
    }

    pub async fn get_errors(&self, reference: &StorageRef) -> Result<Vec<ConsoleLogEntry>, EngineError> {
        let collection = self.retrieve(reference).await?;
        Ok(collection
            .entries
            .into_iter()
            .filter(|e| e.level == ConsoleLevel::Error)
            .collect())
    }

    pub async fn get_warnings(&self, reference: &StorageRef) -> Result<Vec<ConsoleLogEntry>, EngineError> {
        let collection = self.retrieve(reference).await?;
        Ok(collection
            .entries
            .into_iter()
            .filter(|e| e.level == ConsoleLevel::Warn)
            .collect())
    }

    pub async fn get_summary(&self, reference: &StorageRef) -> Result<ConsoleSummary, EngineError> {
        Ok(self.retrieve(reference).await?.summary)
    }

    /// Searches every collection in the namespace, not just one
    /// reference — case-insensitive substring match, optionally narrowed
    /// by the same fields as `retrieve_filtered`.
    pub async fn search(
        &self,
        text: &str,
        filter: Option<&ConsoleFilter>,
    ) -> Result<Vec<ConsoleSearchHit>, EngineError> {
        let needle = text.to_lowercase();
        let index = self.load_main_index().await?;
        let mut hits = Vec::new();
        for reference in index.into_values() {
            let collection = self.retrieve(&reference).await?;
            let mut entries = collection.entries;
            if let Some(f) = filter {
                entries = apply_filter(&entries, f);
            }
            let matches: Vec<ConsoleLogEntry> = entries
                .into_iter()
                .filter(|e| e.message.to_lowercase().contains(&needle))
                .collect();
            if !matches.is_empty() {
                hits.push(ConsoleSearchHit { reference, matches });
            }
        }
        Ok(hits)
    }

    /// Index lookup without loading every collection: url/has-errors/
    /// has-warnings narrowing over the main index's tags.
    pub async fn query(&self, query: &ConsoleQuery) -> Result<Vec<StorageRef>, EngineError> {
        let index = self.load_main_index().await?;
        let mut out: Vec<StorageRef> = index
            .into_values()
            .filter(|r| {
                query
                    .url
                    .as_ref()
                    .map_or(true, |u| r.tags.get("url").map_or(false, |v| v == u))
            })
            .filter(|r| {
                query.has_errors.map_or(true, |want| {
                    let has = r.tags.get("errorCount").map_or(false, |v| v != "0");
                    has == want
                })
            })
            .filter(|r| {
                query.has_warnings.map_or(true, |want| {
                    let has = r.tags.get("warningCount").map_or(false, |v| v != "0");
                    has == want
                })
            })
            .collect();
        out.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        if let Some(limit) = query.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    /// Collections containing at least one entry at `level`, read from
    /// the per-level id list rather than scanning the main index.
    pub async fn query_by_level(&self, level: ConsoleLevel) -> Result<Vec<StorageRef>, EngineError> {
        let path = self
            .base
            .namespace_dir()
            .join(format!("level_index_{}.json", level.as_str()));
        if !self.base.exists(&path).await {
            return Ok(Vec::new());
        }
        let ids: Vec<String> = self.base.read_json(&path).await?;
        let index = self.load_main_index().await?;
        Ok(ids.into_iter().filter_map(|id| index.get(&id).cloned()).collect())
    }

    pub async fn get_global_stats(&self) -> Result<ConsoleGlobalStats, EngineError> {
        let index = self.load_main_index().await?;
        let mut stats = ConsoleGlobalStats {
            collections: index.len(),
            ..Default::default()
        };
        for reference in index.values() {
            let collection = self.retrieve(reference).await?;
            stats.total_entries += collection.summary.total;
            stats.total_errors += collection.summary.error_count;
            stats.total_warnings += collection.summary.warning_count;
        }
        Ok(stats)
    }

    async fn load_main_index(&self) -> Result<HashMap<String, StorageRef>, EngineError> {
        let path = self.base.namespace_dir().join("index.json");
        if !self.base.exists(&path).await {
            return Ok(HashMap::new());
        }
        self.base.read_json(&path).await
    }

    async fn append_main_index(&self, id: &str, reference: &StorageRef) -> Result<(), EngineError> {
        let path = self.base.namespace_dir().join("index.json");
        let mut index = self.load_main_index().await.unwrap_or_default();
        index.insert(id.to_string(), reference.clone());
        self.base.write_json(&path, &index).await?;
        Ok(())
    }

    async fn append_level_index(&self, level: ConsoleLevel, id: &str) -> Result<(), EngineError> {
        let path = self
            .base
            .namespace_dir()
            .join(format!("level_index_{}.json", level.as_str()));
        let mut ids: Vec<String> = if self.base.exists(&path).await {
            self.base.read_json(&path).await.unwrap_or_default()
        } else {
            Vec::new()
        };
        ids.push(id.to_string());
        self.base.write_json(&path, &ids).await?;
        Ok(())
    }

    async fn append_error_index(
        &self,
        id: &str,
        collection: &ConsoleCollection,
    ) -> Result<(), EngineError> {
        let path = self.base.namespace_dir().join("error_index.json");
        let mut index: HashMap<String, ErrorIndexEntry> = if self.base.exists(&path).await {
            self.base.read_json(&path).await.unwrap_or_default()
        } else {
            HashMap::new()
        };
        let errors: Vec<ErrorIndexItem> = collection
            .entries
            .iter()
            .filter(|e| e.level == ConsoleLevel::Error)
            .map(|e| ErrorIndexItem {
                message: e.message.clone(),
                timestamp: e.timestamp,
                source: e.source.as_ref().and_then(|s| s.url.clone()),
            })
            .collect();
        index.insert(
            id.to_string(),
            ErrorIndexEntry {
                url: collection.url.clone(),
                error_count: errors.len(),
                timestamp: collection.start_time,
                errors,
            },
        );
        self.base.write_json(&path, &index).await?;
        Ok(())
    }
}

fn apply_filter(entries: &[ConsoleLogEntry], filter: &ConsoleFilter) -> Vec<ConsoleLogEntry> {
    let mut out: Vec<ConsoleLogEntry> = entries
        .iter()
        .filter(|e| filter.level.map_or(true, |l| e.level == l))
        .filter(|e| {
            filter
                .start_time
                .map_or(true, |start| e.timestamp >= start)
        })
        .filter(|e| filter.end_time.map_or(true, |end| e.timestamp <= end))
        .filter(|e| {
            filter
                .search_text
                .as_ref()
                .map_or(true, |needle| e.message.to_lowercase().contains(&needle.to_lowercase()))
        })
        .cloned()
        .collect();
    if let Some(limit) = filter.limit {
        out.truncate(limit);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(level: ConsoleLevel, message: &str) -> ConsoleLogEntry {
        ConsoleLogEntry {
            timestamp: Utc::now(),
            level,
            message: message.to_string(),
            args: vec![],
            stack: None,
            source: None,
        }
    }

    #[test]
    fn summary_counts_match_entries() {
        let entries = vec![
            entry(ConsoleLevel::Log, "a"),
            entry(ConsoleLevel::Error, "boom"),
            entry(ConsoleLevel::Error, "boom2"),
            entry(ConsoleLevel::Warn, "careful"),
        ];
        let summary = summarize(&entries);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.error_count, 2);
        assert_eq!(summary.warning_count, 1);
        assert_eq!(summary.by_level.get("log"), Some(&1));
    }

    #[test]
    fn filter_by_level_and_text() {
        let entries = vec![
            entry(ConsoleLevel::Error, "payment failed"),
            entry(ConsoleLevel::Warn, "deprecated api"),
        ];
        let filter = ConsoleFilter {
            level: Some(ConsoleLevel::Error),
            ..Default::default()
        };
        let filtered = apply_filter(&entries, &filter);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].message, "payment failed");
    }
}
