//! Hybrid retriever: vector + lexical + graph, fused and deduplicated.
//!
//! Steps per query: vector top-k from the routed profile, lexical top-k
//! from full-text search, graph expansion when the query mentions a
//! known entity (one hop, two on complex queries), then score fusion
//! `α·vector + β·lexical + γ/graph_distance` deduplicated by span hash.
//! An optional pair scorer reorders the top of the list; without one,
//! fusion order stands. Results carry a freshness tag from the gate.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use llmc_core::graph::{EntityGraph, TraversalDirection};
use llmc_core::store::IndexStore;
use llmc_core::sync::SyncEngine;
use llmc_core::types::{EdgeType, Entity, Freshness, Relation, SpanKind};

use crate::error::{Result, SearchError};
use crate::providers::EmbeddingProvider;
use crate::router::{QueryRouter, RerankPolicy};

/// Fusion weights.
#[derive(Debug, Clone, Copy)]
pub struct RetrieverWeights {
    pub alpha: f32,
    pub beta: f32,
    pub gamma: f32,
}

impl Default for RetrieverWeights {
    fn default() -> Self {
        Self {
            alpha: 0.6,
            beta: 0.3,
            gamma: 0.4,
        }
    }
}

/// Retriever tuning.
#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    /// Vector/lexical candidate depth.
    pub top_k: usize,
    /// How many fused results the pair scorer may reorder.
    pub rerank_depth: usize,
    /// Token count at which graph expansion goes to two hops.
    pub two_hop_complexity: usize,
    /// Refuse to answer rather than tag results stale.
    pub refuse_stale: bool,
    pub weights: RetrieverWeights,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            top_k: 20,
            rerank_depth: 10,
            two_hop_complexity: 8,
            refuse_stale: false,
            weights: RetrieverWeights::default(),
        }
    }
}

/// One retrieved span.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub span_hash: String,
    pub file_path: String,
    pub symbol_name: Option<String>,
    pub kind: SpanKind,
    pub start_line: u32,
    pub end_line: u32,
    pub score: f32,
    /// First lines of the span.
    pub snippet: String,
    /// Which steps surfaced this hit ("vector", "lexical", "graph").
    pub sources: Vec<String>,
    /// Enrichment summary when one exists.
    pub summary: Option<String>,
}

/// Retrieval response.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    /// "vector" | "lexical" | "graph" | "hybrid"
    pub source: String,
    pub freshness: Freshness,
}

/// A materialized graph neighborhood for lineage queries.
#[derive(Debug, Clone, Serialize)]
pub struct GraphSlice {
    pub roots: Vec<String>,
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
}

/// Optional cross-encoder hook; fusion order is kept when absent.
#[async_trait]
pub trait PairScorer: Send + Sync {
    async fn score_pairs(&self, query: &str, candidates: &[String]) -> Result<Vec<f32>>;
}

#[derive(Default)]
struct FusionEntry {
    vector: f32,
    lexical: f32,
    graph: f32,
    sources: Vec<String>,
}

/// The hybrid retriever.
pub struct Retriever {
    store: Arc<IndexStore>,
    sync: Arc<SyncEngine>,
    router: QueryRouter,
    providers: HashMap<String, Arc<dyn EmbeddingProvider>>,
    config: RetrieverConfig,
    rerank: Option<Arc<dyn PairScorer>>,
}

impl Retriever {
    pub fn new(
        store: Arc<IndexStore>,
        sync: Arc<SyncEngine>,
        router: QueryRouter,
        providers: HashMap<String, Arc<dyn EmbeddingProvider>>,
        config: RetrieverConfig,
    ) -> Self {
        Self {
            store,
            sync,
            router,
            providers,
            config,
            rerank: None,
        }
    }

    /// Install a pair scorer for the rerank step.
    pub fn with_pair_scorer(mut self, scorer: Arc<dyn PairScorer>) -> Self {
        self.rerank = Some(scorer);
        self
    }

    pub fn router(&self) -> &QueryRouter {
        &self.router
    }

    /// Freshness gate: compare the index against the working tree.
    pub fn freshness(&self) -> Result<Freshness> {
        Ok(if self.sync.is_stale()? {
            Freshness::Stale
        } else {
            Freshness::Ready
        })
    }

    /// Hybrid search.
    pub async fn search(&self, query: &str, limit: usize) -> Result<SearchResponse> {
        let freshness = self.freshness()?;
        if freshness == Freshness::Stale && self.config.refuse_stale {
            return Err(SearchError::StaleIndex);
        }

        let route = self.router.route(query, None);
        let mut fusion: HashMap<String, FusionEntry> = HashMap::new();

        // Vector step. Provider trouble degrades to lexical-only rather
        // than failing the query.
        match self.vector_hits(query, &route.target_index_profile).await {
            Ok(hits) => {
                for hit in hits {
                    let entry = fusion.entry(hit.span_hash).or_default();
                    entry.vector = hit.score.clamp(0.0, 1.0);
                    entry.sources.push("vector".to_string());
                }
            }
            Err(e) => warn!("vector step unavailable: {e}"),
        }

        // Lexical step.
        let lexical = self.store.search_lexical(query, self.config.top_k)?;
        let max_lexical = lexical.iter().map(|h| h.score).fold(0.0f32, f32::max);
        for hit in lexical {
            let entry = fusion.entry(hit.span_hash).or_default();
            entry.lexical = if max_lexical > 0.0 {
                hit.score / max_lexical
            } else {
                0.0
            };
            entry.sources.push("lexical".to_string());
        }

        // Graph step.
        for (span_hash, distance) in self.graph_hits(query)? {
            let entry = fusion.entry(span_hash).or_default();
            entry.graph = 1.0 / distance as f32;
            entry.sources.push("graph".to_string());
        }

        let weights = self.config.weights;
        let mut scored: Vec<(String, f32, Vec<String>)> = fusion
            .into_iter()
            .map(|(hash, entry)| {
                let combined = weights.alpha * entry.vector
                    + weights.beta * entry.lexical
                    + weights.gamma * entry.graph;
                (hash, combined, entry.sources)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit.max(1));

        let mut results = self.materialize(scored)?;
        if route.rerank_policy == RerankPolicy::PairScorer {
            self.apply_rerank(query, &mut results).await;
        }

        let source = overall_source(&results);
        Ok(SearchResponse {
            results,
            source,
            freshness,
        })
    }

    /// Graph query: spans whose symbols use the given symbol.
    pub fn where_used(&self, symbol: &str, limit: usize) -> Result<SearchResponse> {
        let freshness = self.freshness()?;
        let (entities, relations) = self.store.load_graph()?;
        let graph = EntityGraph::from_rows(entities, &relations);

        let origins = graph.find_entities(symbol);
        if origins.is_empty() {
            return Err(SearchError::UnknownSymbol(symbol.to_string()));
        }

        let mut scored = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for origin in origins.iter().take(3) {
            for hit in graph.neighbors(origin, 1, TraversalDirection::Upstream, Some(EdgeType::Calls))
            {
                if let Some(span_hash) = self.span_hash_for_entity(&hit.entity)? {
                    if seen.insert(span_hash.clone()) {
                        scored.push((span_hash, 1.0 / hit.distance as f32, vec!["graph".to_string()]));
                    }
                }
            }
        }
        scored.truncate(limit.max(1));

        let results = self.materialize(scored)?;
        Ok(SearchResponse {
            results,
            source: "graph".to_string(),
            freshness,
        })
    }

    /// Materialize the call/dependency neighborhood of a symbol.
    pub fn lineage(
        &self,
        symbol: &str,
        direction: TraversalDirection,
        depth: u32,
    ) -> Result<GraphSlice> {
        let (entities, relations) = self.store.load_graph()?;
        let graph = EntityGraph::from_rows(entities, &relations);

        let roots = graph.find_entities(symbol);
        if roots.is_empty() {
            return Err(SearchError::UnknownSymbol(symbol.to_string()));
        }

        let mut included: std::collections::BTreeSet<String> = roots.iter().cloned().collect();
        for root in &roots {
            for hit in graph.neighbors(root, depth, direction, None) {
                included.insert(hit.entity.id.clone());
            }
        }

        let slice_entities: Vec<Entity> = included
            .iter()
            .filter_map(|id| graph.entity(id).cloned())
            .collect();
        let slice_relations: Vec<Relation> = relations
            .into_iter()
            .filter(|r| included.contains(&r.src_id) && included.contains(&r.dst_id))
            .collect();

        Ok(GraphSlice {
            roots,
            entities: slice_entities,
            relations: slice_relations,
        })
    }

    // ------------------------------------------------------------------
    // Steps
    // ------------------------------------------------------------------

    async fn vector_hits(
        &self,
        query: &str,
        profile: &str,
    ) -> Result<Vec<llmc_core::store::VectorHit>> {
        let provider = self
            .providers
            .get(profile)
            .ok_or_else(|| SearchError::UnknownProfile(profile.to_string()))?;
        let vectors = provider.embed(&[query.to_string()]).await?;
        let query_vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| SearchError::ProviderUnavailable("no query vector".to_string()))?;

        // Narrow the scan with a lexical prefilter when the corpus is
        // large enough for it to matter.
        let prefilter: Vec<String> = self
            .store
            .search_lexical(query, llmc_core::store::VECTOR_PREFILTER_CAP)?
            .into_iter()
            .map(|h| h.span_hash)
            .collect();
        let prefilter_ref = if prefilter.is_empty() {
            None
        } else {
            Some(prefilter.as_slice())
        };

        self.store
            .search_vector(profile, &query_vector, self.config.top_k, prefilter_ref)
            .map_err(Into::into)
    }

    /// Entities mentioned in the query, expanded through the graph.
    /// Returns `(span_hash, distance)` pairs.
    fn graph_hits(&self, query: &str) -> Result<Vec<(String, u32)>> {
        let tokens: Vec<&str> = query
            .split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '.'))
            .filter(|t| t.len() >= 3)
            .collect();
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let (entities, relations) = self.store.load_graph()?;
        if entities.is_empty() {
            return Ok(Vec::new());
        }
        let graph = EntityGraph::from_rows(entities, &relations);

        // Identifier-shaped tokens only; prose words would fuzzy-match
        // half the graph.
        let mut origins: Vec<String> = Vec::new();
        for token in &tokens {
            let identifier_shaped = token.contains('.')
                || token.contains('_')
                || token.chars().any(|c| c.is_uppercase());
            if !identifier_shaped {
                continue;
            }
            for id in graph.find_entities(token) {
                if !origins.contains(&id) {
                    origins.push(id);
                }
            }
        }
        origins.truncate(3);
        if origins.is_empty() {
            return Ok(Vec::new());
        }

        let hops = if tokens.len() >= self.config.two_hop_complexity {
            2
        } else {
            1
        };
        let edge_filter = edge_filter_from_query(query);
        let direction = if query.to_lowercase().contains("who calls")
            || query.to_lowercase().contains("used by")
            || query.to_lowercase().contains("callers")
        {
            TraversalDirection::Upstream
        } else {
            TraversalDirection::Downstream
        };

        debug!(?origins, hops, ?edge_filter, "graph expansion");
        let mut hits = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for origin in &origins {
            // The mentioned entity's own span anchors the result set.
            if let Some(entity) = graph.entity(origin) {
                if let Some(span_hash) = self.span_hash_for_entity(entity)? {
                    if seen.insert(span_hash.clone()) {
                        hits.push((span_hash, 1));
                    }
                }
            }
            for hit in graph.neighbors(origin, hops, direction, edge_filter) {
                if let Some(span_hash) = self.span_hash_for_entity(&hit.entity)? {
                    if seen.insert(span_hash.clone()) {
                        hits.push((span_hash, hit.distance));
                    }
                }
            }
        }
        Ok(hits)
    }

    fn span_hash_for_entity(&self, entity: &Entity) -> Result<Option<String>> {
        let (Some(path), Some(symbol)) = (
            entity.path_ref.as_deref(),
            entity.metadata.symbol_name.as_deref(),
        ) else {
            return Ok(None);
        };
        Ok(self
            .store
            .span_for_symbol(path, symbol)?
            .map(|row| row.span.span_hash))
    }

    fn materialize(&self, scored: Vec<(String, f32, Vec<String>)>) -> Result<Vec<SearchHit>> {
        let mut results = Vec::with_capacity(scored.len());
        for (span_hash, score, mut sources) in scored {
            let Some(row) = self.store.span_by_hash(&span_hash)? else {
                continue;
            };
            sources.sort();
            sources.dedup();
            let summary = self.store.enrichment(&span_hash)?.map(|e| e.summary);
            results.push(SearchHit {
                snippet: snippet_of(&row.span.content),
                span_hash,
                file_path: row.file_path,
                symbol_name: row.span.symbol_name,
                kind: row.span.kind,
                start_line: row.span.start_line,
                end_line: row.span.end_line,
                score,
                sources,
                summary,
            });
        }
        Ok(results)
    }

    async fn apply_rerank(&self, query: &str, results: &mut [SearchHit]) {
        let Some(scorer) = &self.rerank else {
            // No cross-encoder installed: fusion order is kept.
            return;
        };
        let depth = self.config.rerank_depth.min(results.len());
        if depth < 2 {
            return;
        }
        let candidates: Vec<String> = results[..depth]
            .iter()
            .map(|r| format!("{}\n{}", r.symbol_name.as_deref().unwrap_or(""), r.snippet))
            .collect();
        match scorer.score_pairs(query, &candidates).await {
            Ok(scores) if scores.len() == depth => {
                let mut order: Vec<usize> = (0..depth).collect();
                order.sort_by(|&a, &b| {
                    scores[b]
                        .partial_cmp(&scores[a])
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                let head: Vec<SearchHit> = order.iter().map(|&i| results[i].clone()).collect();
                for (slot, hit) in results[..depth].iter_mut().zip(head) {
                    *slot = hit;
                }
            }
            Ok(_) | Err(_) => {
                // Scorer unavailable or inconsistent: keep fusion order.
            }
        }
    }
}

fn edge_filter_from_query(query: &str) -> Option<EdgeType> {
    let lower = query.to_lowercase();
    if lower.contains("call") {
        Some(EdgeType::Calls)
    } else if lower.contains("import") {
        Some(EdgeType::Imports)
    } else if lower.contains("extend") || lower.contains("inherit") {
        Some(EdgeType::Extends)
    } else if lower.contains("write") {
        Some(EdgeType::Writes)
    } else if lower.contains("read") {
        Some(EdgeType::Reads)
    } else {
        None
    }
}

fn snippet_of(content: &str) -> String {
    content.lines().take(6).collect::<Vec<_>>().join("\n")
}

/// Aggregate source label: "hybrid" when more than one step contributed.
fn overall_source(results: &[SearchHit]) -> String {
    let mut kinds: Vec<&str> = results
        .iter()
        .flat_map(|r| r.sources.iter().map(String::as_str))
        .collect();
    kinds.sort_unstable();
    kinds.dedup();
    match kinds.len() {
        0 => "lexical".to_string(),
        1 => kinds[0].to_string(),
        _ => "hybrid".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_filter_from_query() {
        assert_eq!(edge_filter_from_query("who calls db.query"), Some(EdgeType::Calls));
        assert_eq!(edge_filter_from_query("what imports utils"), Some(EdgeType::Imports));
        assert_eq!(edge_filter_from_query("find auth logic"), None);
    }

    #[test]
    fn test_overall_source_labels() {
        let hit = |sources: &[&str]| SearchHit {
            span_hash: "h".to_string(),
            file_path: "f".to_string(),
            symbol_name: None,
            kind: SpanKind::Function,
            start_line: 1,
            end_line: 2,
            score: 1.0,
            snippet: String::new(),
            sources: sources.iter().map(|s| s.to_string()).collect(),
            summary: None,
        };
        assert_eq!(overall_source(&[]), "lexical");
        assert_eq!(overall_source(&[hit(&["vector"])]), "vector");
        assert_eq!(overall_source(&[hit(&["vector"]), hit(&["lexical"])]), "hybrid");
    }
}
