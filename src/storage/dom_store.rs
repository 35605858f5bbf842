//! Persists an HTML capture as a chunked, preorder-flattened node tree
//! so large documents never require a single unbounded in-memory blob,
//! and supports CSS-selector querying over a stored capture without
//! the caller holding the full original HTML string.

use super::StorageBase;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::types::{StorageCategory, StorageRef};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomNode {
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub parent: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomChunk {
    pub index: usize,
    pub node_count: usize,
    pub nodes: Vec<DomNode>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomMetadata {
    pub title: Option<String>,
    pub charset: Option<String>,
    pub viewport: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomDocument {
    pub url: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub total_nodes: usize,
    pub chunks: Vec<DomChunk>,
    pub metadata: DomMetadata,
}

#[derive(Debug, Clone)]
pub struct QueriedElement {
    pub tag: String,
    pub attributes: HashMap<String, String>,
    pub text: String,
    pub html: String,
}

pub struct DomStore {
    base: StorageBase,
    default_chunk_size: usize,
}

impl DomStore {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            base: StorageBase::new(&config.storage_base_dir, "dom"),
            default_chunk_size: config.default_chunk_size,
        }
    }

    pub async fn initialize(&self) -> Result<(), EngineError> {
        self.base.initialize().await
    }

    pub async fn store(
        &self,
        test_id: &str,
        step_id: Option<&str>,
        html: &str,
        url: &str,
        chunk_size: Option<usize>,
    ) -> Result<StorageRef, EngineError> {
        let document = scraper::Html::parse_document(html);
        let nodes = flatten(&document);
        let total_nodes = nodes.len();
        let chunk_size = chunk_size.unwrap_or(self.default_chunk_size).max(1);

        let chunks: Vec<DomChunk> = nodes
            .chunks(chunk_size)
            .enumerate()
            .map(|(index, slice)| DomChunk {
                index,
                node_count: slice.len(),
                nodes: slice.to_vec(),
            })
            .collect();

        let title_selector = scraper::Selector::parse("title")
            .map_err(|e| EngineError::ValidationEngineError(format!("{e:?}")))?;
        let title = document
            .select(&title_selector)
            .next()
            .map(|e| e.text().collect::<String>());

        let doc = DomDocument {
            url: url.to_string(),
            timestamp: chrono::Utc::now(),
            total_nodes,
            chunks,
            metadata: DomMetadata {
                title,
                charset: None,
                viewport: None,
            },
        };

        let id = self.base.generate_id("dom");
        let path = self.base.item_path(&id, "json");
        let size = self.base.write_json(&path, &doc).await?;

        let mut tags = HashMap::new();
        tags.insert("url".to_string(), url.to_string());
        tags.insert("totalNodes".to_string(), total_nodes.to_string());
        tags.insert("chunkCount".to_string(), doc.chunks.len().to_string());
        if let Some(t) = &doc.metadata.title {
            tags.insert("title".to_string(), t.clone());
        }

        let reference = self.base.create_ref(
            StorageCategory::Html,
            test_id,
            step_id,
            &path,
            size,
            html.as_bytes(),
            tags,
        );

        let guard = self.base.lock_index().await;
        self.append_index(&id, &reference).await?;
        drop(guard);

        Ok(reference)
    }

    /// Index lookup by url/title substring, no document load required.
    pub async fn query(&self, url: Option<&str>, limit: Option<usize>) -> Result<Vec<StorageRef>, EngineError> {
        let index = self.load_index().await?;
        let mut out: Vec<StorageRef> = index
            .into_values()
            .filter(|r| url.map_or(true, |u| r.tags.get("url").map_or(false, |v| v == u)))
            .collect();
        out.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        if let Some(limit) = limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    async fn load_index(&self) -> Result<HashMap<String, StorageRef>, EngineError> {
        let index_path = self.base.namespace_dir().join("index.json");
        if !self.base.exists(&index_path).await {
            return Ok(HashMap::new());
        }
        self.base.read_json(&index_path).await
    }

    async fn load_document(&self, reference: &StorageRef) -> Result<DomDocument, EngineError> {
        self.base
            .read_json(std::path::Path::new(&reference.path))
            .await
    }

    /// Reconstructs the full tree from every chunk, in order, and
    /// serializes it back to an HTML string.
    pub async fn retrieve(&self, reference: &StorageRef) -> Result<String, EngineError> {
        let doc = self.load_document(reference).await?;
        let all_nodes: Vec<DomNode> = doc.chunks.into_iter().flat_map(|c| c.nodes).collect();
        Ok(serialize_nodes(&all_nodes))
    }

    pub async fn retrieve_chunk(
        &self,
        reference: &StorageRef,
        index: usize,
    ) -> Result<DomChunk, EngineError> {
        let doc = self.load_document(reference).await?;
        doc.chunks
            .into_iter()
            .find(|c| c.index == index)
            .ok_or_else(|| EngineError::ValidationEngineError(format!("no chunk at index {index}")))
    }

    /// Evaluates a CSS selector against the reconstructed document
    /// without requiring the caller to hold the original HTML.
    pub async fn query_by_selector(
        &self,
        reference: &StorageRef,
        css_selector: &str,
    ) -> Result<Vec<QueriedElement>, EngineError> {
        let html = self.retrieve(reference).await?;
        query_html_by_selector(&html, css_selector)
    }

    pub async fn get_stats(&self, reference: &StorageRef) -> Result<(usize, usize), EngineError> {
        let doc = self.load_document(reference).await?;
        Ok((doc.total_nodes, doc.chunks.len()))
    }

    async fn append_index(&self, id: &str, reference: &StorageRef) -> Result<(), EngineError> {
        let index_path = self.base.namespace_dir().join("index.json");
        let mut index = self.load_index().await.unwrap_or_default();
        index.insert(id.to_string(), reference.clone());
        self.base.write_json(&index_path, &index).await?;
        Ok(())
    }
}

pub fn query_html_by_selector(
    html: &str,
    css_selector: &str,
) -> Result<Vec<QueriedElement>, EngineError> {
    let document = scraper::Html::parse_document(html);
    let sel = scraper::Selector::parse(css_selector)
        .map_err(|e| EngineError::ValidationEngineError(format!("invalid selector: {e:?}")))?;
    Ok(document
        .select(&sel)
        .map(|el| QueriedElement {
            tag: el.value().name().to_string(),
            attributes: el
                .value()
                .attrs()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            text: el.text().collect::<String>(),
            html: el.html(),
        })
        .collect())
}

fn flatten(document: &scraper::Html) -> Vec<DomNode> {
    let mut out = Vec::new();
    for child in document.tree.root().children() {
        flatten_node(child, None, &mut out);
    }
    out
}

fn flatten_node(node: ego_tree::NodeRef<scraper::Node>, parent: Option<usize>, out: &mut Vec<DomNode>) {
    match node.value() {
        scraper::Node::Element(el) => {
            let idx = out.len();
            out.push(DomNode {
                tag: Some(el.name().to_string()),
                attributes: el
                    .attrs()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                text: None,
                parent,
            });
            for child in node.children() {
                flatten_node(child, Some(idx), out);
            }
        }
        scraper::Node::Text(text) => {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                out.push(DomNode {
                    tag: None,
                    attributes: HashMap::new(),
                    text: Some(trimmed.to_string()),
                    parent,
                });
            }
        }
        _ => {
            for child in node.children() {
                flatten_node(child, parent, out);
            }
        }
    }
}

fn serialize_nodes(nodes: &[DomNode]) -> String {
    let mut children: HashMap<Option<usize>, Vec<usize>> = HashMap::new();
    for (i, n) in nodes.iter().enumerate() {
        children.entry(n.parent).or_default().push(i);
    }
    let mut out = String::new();
    if let Some(roots) = children.get(&None) {
        for &r in roots {
            serialize_node(r, nodes, &children, &mut out);
        }
    }
    out
}

fn serialize_node(
    idx: usize,
    nodes: &[DomNode],
    children: &HashMap<Option<usize>, Vec<usize>>,
    out: &mut String,
) {
    let node = &nodes[idx];
    match &node.tag {
        Some(tag) => {
            out.push('<');
            out.push_str(tag);
            for (k, v) in &node.attributes {
                out.push(' ');
                out.push_str(k);
                out.push_str("=\"");
                out.push_str(&v.replace('"', "&quot;"));
                out.push('"');
            }
            out.push('>');
            if let Some(kids) = children.get(&Some(idx)) {
                for &k in kids {
                    serialize_node(k, nodes, children, out);
                }
            }
            out.push_str("</");
            out.push_str(tag);
            out.push('>');
        }
        None => {
            if let Some(text) = &node.text {
                out.push_str(text);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_html(card_count: usize) -> String {
        let cards: String = (0..card_count)
            .map(|i| format!("<div class=\"card\">card {i}</div>"))
            .collect();
        format!("<html><head><title>Sample</title></head><body>{cards}</body></html>")
    }

    #[test]
    fn flatten_drops_empty_text_nodes() {
        let document = scraper::Html::parse_document("<div>  <span>hi</span>  </div>");
        let nodes = flatten(&document);
        assert!(nodes.iter().all(|n| match &n.text {
            Some(t) => !t.trim().is_empty(),
            None => true,
        }));
    }

    #[test]
    fn query_by_selector_counts_match_source() {
        let html = sample_html(7);
        let direct = query_html_by_selector(&html, "div.card").unwrap();
        assert_eq!(direct.len(), 7);
    }

    #[test]
    fn round_trip_serialization_preserves_selector_count() {
        let html = sample_html(3);
        let document = scraper::Html::parse_document(&html);
        let nodes = flatten(&document);
        let rebuilt = serialize_nodes(&nodes);
        let rebuilt_matches = query_html_by_selector(&rebuilt, "div.card").unwrap();
        assert_eq!(rebuilt_matches.len(), 3);
    }
}
