use std::collections::{HashMap, HashSet};
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use concierge_core::domain::assistant::BusinessId;
use concierge_core::domain::response::SourceReference;

use crate::conversation::tokenize;

/// One ranked knowledge hit; only `content` and `score` drive the pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeSnippet {
    pub content: String,
    pub score: f64,
    pub source: String,
    pub source_id: String,
}

impl KnowledgeSnippet {
    pub fn reference(&self) -> SourceReference {
        SourceReference {
            source: self.source.clone(),
            source_id: self.source_id.clone(),
            score: self.score,
        }
    }
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("could not read knowledge file `{path}`: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("could not parse knowledge file `{path}`: {source}")]
    Parse { path: String, source: serde_json::Error },
    #[error("retrieval service unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Retriever: Send + Sync {
    /// Ranked snippets for `query`, best first, scoped to one business.
    async fn search(
        &self,
        query: &str,
        business_id: &BusinessId,
        limit: usize,
        min_score: f64,
    ) -> Result<Vec<KnowledgeSnippet>, RetrievalError>;
}

#[derive(Clone, Debug, Default)]
pub struct NoopRetriever;

#[async_trait]
impl Retriever for NoopRetriever {
    async fn search(
        &self,
        _query: &str,
        _business_id: &BusinessId,
        _limit: usize,
        _min_score: f64,
    ) -> Result<Vec<KnowledgeSnippet>, RetrievalError> {
        Ok(Vec::new())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub business_id: String,
    pub source: String,
    pub source_id: String,
    pub content: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

struct IndexedEntry {
    entry: KnowledgeEntry,
    terms: HashSet<String>,
}

/// In-memory knowledge base ranked by query-term overlap.
///
/// The score of an entry is the share of distinct query terms (three or more
/// characters) found in its content or keywords.
#[derive(Default)]
pub struct KeywordRetriever {
    entries: HashMap<String, Vec<IndexedEntry>>,
}

impl KeywordRetriever {
    pub fn from_entries(entries: Vec<KnowledgeEntry>) -> Self {
        let mut indexed: HashMap<String, Vec<IndexedEntry>> = HashMap::new();
        for entry in entries {
            let mut terms: HashSet<String> = tokenize(&entry.content).into_iter().collect();
            terms.extend(entry.keywords.iter().flat_map(|keyword| tokenize(keyword)));
            indexed
                .entry(entry.business_id.clone())
                .or_default()
                .push(IndexedEntry { entry, terms });
        }
        Self { entries: indexed }
    }

    pub async fn from_json_file(path: &Path) -> Result<Self, RetrievalError> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|source| {
            RetrievalError::Read { path: path.display().to_string(), source }
        })?;
        let entries: Vec<KnowledgeEntry> = serde_json::from_str(&raw).map_err(|source| {
            RetrievalError::Parse { path: path.display().to_string(), source }
        })?;

        info!(
            event_name = "retrieval.knowledge.loaded",
            path = %path.display(),
            entry_count = entries.len(),
            "loaded keyword knowledge base"
        );
        Ok(Self::from_entries(entries))
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Retriever for KeywordRetriever {
    async fn search(
        &self,
        query: &str,
        business_id: &BusinessId,
        limit: usize,
        min_score: f64,
    ) -> Result<Vec<KnowledgeSnippet>, RetrievalError> {
        let Some(entries) = self.entries.get(business_id.as_str()) else {
            return Ok(Vec::new());
        };

        let query_terms: HashSet<String> =
            tokenize(query).into_iter().filter(|term| term.chars().count() >= 3).collect();
        if query_terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut ranked: Vec<KnowledgeSnippet> = entries
            .iter()
            .filter_map(|indexed| {
                let hits = query_terms.iter().filter(|term| indexed.terms.contains(*term)).count();
                let score = hits as f64 / query_terms.len() as f64;
                (hits > 0 && score >= min_score).then(|| KnowledgeSnippet {
                    content: indexed.entry.content.clone(),
                    score: (score * 1000.0).round() / 1000.0,
                    source: indexed.entry.source.clone(),
                    source_id: indexed.entry.source_id.clone(),
                })
            })
            .collect();

        ranked.sort_by(|left, right| {
            right.score.total_cmp(&left.score).then_with(|| left.source_id.cmp(&right.source_id))
        });
        ranked.truncate(limit);
        Ok(ranked)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use concierge_core::domain::assistant::BusinessId;

    use super::{KeywordRetriever, KnowledgeEntry, NoopRetriever, RetrievalError, Retriever};

    fn entry(business: &str, id: &str, content: &str, keywords: &[&str]) -> KnowledgeEntry {
        KnowledgeEntry {
            business_id: business.to_string(),
            source: "faq".to_string(),
            source_id: id.to_string(),
            content: content.to_string(),
            keywords: keywords.iter().map(|keyword| keyword.to_string()).collect(),
        }
    }

    fn retriever() -> KeywordRetriever {
        KeywordRetriever::from_entries(vec![
            entry("b1", "hours", "Abrimos de segunda a sábado das 7h às 19h.", &["horário"]),
            entry("b1", "delivery", "Fazemos entrega no bairro com taxa fixa.", &["delivery"]),
            entry("b2", "hours", "Open every day from 9am to 5pm.", &["hours"]),
        ])
    }

    #[tokio::test]
    async fn ranks_entries_by_term_overlap() {
        let hits = retriever()
            .search("qual o horário de sábado?", &BusinessId::new("b1"), 5, 0.1)
            .await
            .expect("search");

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source_id, "hours");
        // "horário" and "sábado" match, "qual" does not.
        assert!((hits[0].score - 0.667).abs() < 1e-9);
    }

    #[tokio::test]
    async fn results_are_scoped_to_business() {
        let hits = retriever()
            .search("hours", &BusinessId::new("b3"), 5, 0.0)
            .await
            .expect("search");
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn min_score_and_limit_are_applied() {
        let retriever = retriever();
        let business = BusinessId::new("b1");

        let strict = retriever
            .search("entrega no sábado custa quanto", &business, 5, 0.5)
            .await
            .expect("search");
        assert!(strict.is_empty());

        let loose = retriever
            .search("entrega no sábado custa quanto", &business, 1, 0.1)
            .await
            .expect("search");
        assert_eq!(loose.len(), 1);
    }

    #[tokio::test]
    async fn loads_entries_from_json() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"[{{"business_id":"b1","source":"faq","source_id":"pix","content":"Aceitamos pix e cartão."}}]"#
        )
        .expect("write knowledge");

        let retriever = KeywordRetriever::from_json_file(file.path()).await.expect("load");
        assert_eq!(retriever.len(), 1);

        let hits =
            retriever.search("vocês aceitam pix?", &BusinessId::new("b1"), 3, 0.0).await.expect("search");
        assert_eq!(hits.first().map(|hit| hit.source_id.as_str()), Some("pix"));
    }

    #[tokio::test]
    async fn malformed_json_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, "not json").expect("write");

        let result = KeywordRetriever::from_json_file(file.path()).await;
        assert!(matches!(result, Err(RetrievalError::Parse { .. })));
    }

    #[tokio::test]
    async fn noop_retriever_returns_nothing() {
        let hits = NoopRetriever.search("anything", &BusinessId::new("b1"), 5, 0.0).await;
        assert!(hits.expect("search").is_empty());
    }
}
