//! llmc-search: query classification, routing, and hybrid retrieval.
//!
//! The classifier scores a query into code/docs/domain, the router maps
//! that to an embedding profile and a cascade start tier, and the
//! retriever fuses vector, lexical, and graph evidence into ranked
//! spans behind a freshness gate. Embedding providers live here too and
//! are shared with the pipeline's embedder.

pub mod api;
pub mod error;
pub mod providers;
pub mod retriever;
pub mod router;

pub use api::{parse_direction, ApiError, QueryEngine};
pub use error::{Result, SearchError};
pub use providers::{
    build_provider, EmbeddingProvider, LocalEmbeddingProvider, OpenAiEmbeddingProvider,
};
pub use retriever::{
    GraphSlice, PairScorer, Retriever, RetrieverConfig, RetrieverWeights, SearchHit,
    SearchResponse,
};
pub use router::{
    Classification, QueryClass, QueryRouter, RerankPolicy, Route, RouteExplanation, Signals,
};
