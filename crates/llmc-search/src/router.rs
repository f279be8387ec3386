//! Query classifier and router.
//!
//! The classifier computes boolean signals over the query text and
//! scores three candidate classes (code, docs, domain). Priority order,
//! highest first: tool-context override, fenced code, code structure,
//! domain identifier, code keyword, domain keyword, docs default. A
//! configurable margin breaks code/domain ties in favor of code.
//!
//! The router maps a classification to `{target profile, start tier,
//! rerank policy}` and exposes `explain` for observability.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use llmc_core::types::SpanKind;

use crate::error::{Result, SearchError};

/// Target class of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryClass {
    Code,
    Docs,
    Domain,
}

impl QueryClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryClass::Code => "code",
            QueryClass::Docs => "docs",
            QueryClass::Domain => "domain",
        }
    }
}

/// Boolean signals computed over a query.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Signals {
    pub fenced_code_present: bool,
    pub code_structure_regex: bool,
    pub erp_keyword: bool,
    pub code_keyword: bool,
    pub tool_context_override: Option<QueryClass>,
}

/// Classification outcome.
#[derive(Debug, Clone, Serialize)]
pub struct Classification {
    pub class: QueryClass,
    pub score: f32,
    pub reason: String,
    pub signals: Signals,
}

/// Rerank behavior for a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RerankPolicy {
    /// Keep fusion order.
    FusionOrder,
    /// Reorder the top N with a pair scorer when one is installed.
    PairScorer,
}

/// A routing decision.
#[derive(Debug, Clone, Serialize)]
pub struct Route {
    pub target_index_profile: String,
    pub start_tier: String,
    pub rerank_policy: RerankPolicy,
}

/// `explain()` payload.
#[derive(Debug, Clone, Serialize)]
pub struct RouteExplanation {
    pub decision: Route,
    pub reason: String,
    pub score: f32,
    /// Competing classes with their scores, best first.
    pub alternatives: Vec<(String, f32)>,
}

/// Signal weights: ordered so that each higher-priority signal outranks
/// any combination of lower ones.
const WEIGHT_FENCED: f32 = 8.0;
const WEIGHT_CODE_STRUCT: f32 = 4.0;
const WEIGHT_ERP: f32 = 2.0;
const WEIGHT_CODE_KEYWORD: f32 = 1.0;
const WEIGHT_DOMAIN_KEYWORD: f32 = 0.5;

static CODE_KEYWORDS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "function", "class", "method", "struct", "impl", "trait", "api", "endpoint", "bug",
        "compile", "stack", "trace", "test", "refactor", "import", "module", "callback",
    ]
});

static DOMAIN_KEYWORDS: Lazy<Vec<&'static str>> =
    Lazy::new(|| vec!["report", "customer", "order", "workflow", "process", "account"]);

static FENCE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"```").expect("static regex"));

/// Classifier plus route selection.
pub struct QueryRouter {
    routing: llmc_config::RoutingConfig,
    code_struct: Regex,
    default_profile: String,
    cascade: Vec<String>,
    configured_start_tier: Option<String>,
}

impl QueryRouter {
    pub fn new(config: &llmc_config::LlmcConfig) -> Result<Self> {
        let code_struct = Regex::new(&config.routing.code_struct_regex).map_err(|e| {
            SearchError::ProviderUnavailable(format!("routing.code_struct_regex: {e}"))
        })?;
        let default_profile = config
            .embeddings
            .profiles
            .keys()
            .next()
            .cloned()
            .unwrap_or_else(|| "code".to_string());
        Ok(Self {
            routing: config.routing.clone(),
            code_struct,
            default_profile,
            cascade: config.enrichment.cascade.clone(),
            configured_start_tier: config.enrichment.start_tier.clone(),
        })
    }

    /// Compute signals and classify a query.
    pub fn classify(&self, query: &str, tool_context: Option<QueryClass>) -> Classification {
        let lower = query.to_lowercase();
        let signals = Signals {
            fenced_code_present: FENCE_RE.is_match(query),
            code_structure_regex: self.code_struct.is_match(query),
            erp_keyword: self
                .routing
                .erp_keywords
                .iter()
                .any(|kw| lower.contains(&kw.to_lowercase())),
            code_keyword: CODE_KEYWORDS.iter().any(|kw| lower.contains(kw)),
            tool_context_override: tool_context,
        };

        // Tool context overrides every text signal.
        if let Some(class) = signals.tool_context_override {
            return Classification {
                class,
                score: 10.0,
                reason: "tool context override".to_string(),
                signals,
            };
        }

        let mut code_score = 0.0;
        let mut domain_score = 0.0;
        let mut reasons: Vec<&str> = Vec::new();

        if signals.fenced_code_present {
            code_score += WEIGHT_FENCED;
            reasons.push("fenced code block");
        }
        if signals.code_structure_regex {
            code_score += WEIGHT_CODE_STRUCT;
            reasons.push("code structure");
        }
        if signals.erp_keyword {
            domain_score += WEIGHT_ERP;
            reasons.push("domain identifier");
        }
        if signals.code_keyword {
            code_score += WEIGHT_CODE_KEYWORD;
            reasons.push("code keyword");
        }
        if DOMAIN_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
            domain_score += WEIGHT_DOMAIN_KEYWORD;
            reasons.push("domain keyword");
        }

        let margin = if self.routing.prefer_code_on_conflict {
            self.routing.conflict_margin
        } else {
            0.0
        };

        let (class, score) = if code_score <= 0.0 && domain_score <= 0.0 {
            reasons.push("docs default");
            (QueryClass::Docs, 0.0)
        } else if code_score + margin >= domain_score {
            (QueryClass::Code, code_score)
        } else {
            (QueryClass::Domain, domain_score)
        };

        debug!(query, class = class.as_str(), score, "query classified");
        Classification {
            class,
            score,
            reason: reasons.join(" + "),
            signals,
        }
    }

    /// Select the route for a query.
    pub fn route(&self, query: &str, tool_context: Option<QueryClass>) -> Route {
        let classification = self.classify(query, tool_context);
        self.route_for_class(classification.class)
    }

    fn route_for_class(&self, class: QueryClass) -> Route {
        let start_tier = match class {
            // Docs summarize well on the cheapest tier.
            QueryClass::Docs => self.first_tier(),
            QueryClass::Code | QueryClass::Domain => self
                .configured_start_tier
                .clone()
                .unwrap_or_else(|| self.first_tier()),
        };
        Route {
            target_index_profile: self.default_profile.clone(),
            start_tier,
            rerank_policy: RerankPolicy::PairScorer,
        }
    }

    /// Cascade starting tier for a span, used by the enrichment
    /// pipeline: docs content starts at the cheapest tier, code follows
    /// the configured start tier.
    pub fn start_tier_for_span(&self, kind: SpanKind, content_type: &str) -> String {
        match (kind, content_type) {
            (SpanKind::MarkdownSection, _) | (_, "markdown") | (_, "text") => self.first_tier(),
            _ => self
                .configured_start_tier
                .clone()
                .unwrap_or_else(|| self.first_tier()),
        }
    }

    /// Observability: decision, reason, score, and scored alternatives.
    pub fn explain(&self, query: &str) -> RouteExplanation {
        let classification = self.classify(query, None);
        let decision = self.route_for_class(classification.class);

        let mut alternatives = vec![
            (QueryClass::Code, self.classify_as(query, QueryClass::Code)),
            (QueryClass::Docs, self.classify_as(query, QueryClass::Docs)),
            (
                QueryClass::Domain,
                self.classify_as(query, QueryClass::Domain),
            ),
        ];
        alternatives.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        RouteExplanation {
            decision,
            reason: classification.reason,
            score: classification.score,
            alternatives: alternatives
                .into_iter()
                .map(|(class, score)| (class.as_str().to_string(), score))
                .collect(),
        }
    }

    /// Score the query as if it were the given class (for alternatives).
    fn classify_as(&self, query: &str, class: QueryClass) -> f32 {
        let classification = self.classify(query, None);
        if classification.class == class {
            classification.score
        } else {
            let lower = query.to_lowercase();
            match class {
                QueryClass::Code => {
                    let mut score = 0.0;
                    if classification.signals.code_structure_regex {
                        score += WEIGHT_CODE_STRUCT;
                    }
                    if classification.signals.code_keyword {
                        score += WEIGHT_CODE_KEYWORD;
                    }
                    score
                }
                QueryClass::Domain => {
                    let mut score = 0.0;
                    if classification.signals.erp_keyword {
                        score += WEIGHT_ERP;
                    }
                    if DOMAIN_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
                        score += WEIGHT_DOMAIN_KEYWORD;
                    }
                    score
                }
                QueryClass::Docs => 0.0,
            }
        }
    }

    fn first_tier(&self) -> String {
        self.cascade
            .first()
            .cloned()
            .unwrap_or_else(|| "local_small".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> QueryRouter {
        QueryRouter::new(&llmc_config::LlmcConfig::default()).unwrap()
    }

    #[test]
    fn test_fenced_code_wins() {
        let c = router().classify("what does this do ```fn main() {}```", None);
        assert_eq!(c.class, QueryClass::Code);
        assert!(c.signals.fenced_code_present);
    }

    #[test]
    fn test_code_structure_detected() {
        let c = router().classify("why does parse_file() return None", None);
        assert_eq!(c.class, QueryClass::Code);
        assert!(c.signals.code_structure_regex);
    }

    #[test]
    fn test_erp_identifier_beats_code_keyword() {
        // Domain identifier (2.0) outranks a bare code keyword (1.0)
        // plus margin.
        let c = router().classify("which module posts the invoice", None);
        assert_eq!(c.class, QueryClass::Domain);
        assert!(c.signals.erp_keyword);
    }

    #[test]
    fn test_docs_default() {
        let c = router().classify("tell me about the project", None);
        assert_eq!(c.class, QueryClass::Docs);
        assert!(c.reason.contains("docs default"));
    }

    #[test]
    fn test_tool_context_overrides_everything() {
        let c = router().classify("invoice ledger warehouse", Some(QueryClass::Code));
        assert_eq!(c.class, QueryClass::Code);
    }

    #[test]
    fn test_conflict_margin_prefers_code() {
        // erp keyword (2.0) vs code structure (4.0): code wins outright;
        // with equal scores the margin breaks toward code.
        let c = router().classify("invoice::post", None);
        assert_eq!(c.class, QueryClass::Code);
    }

    #[test]
    fn test_explain_reports_alternatives() {
        let explanation = router().explain("who calls process_order()");
        assert_eq!(explanation.alternatives.len(), 3);
        assert!(explanation.score >= explanation.alternatives[1].1);
        assert!(!explanation.decision.start_tier.is_empty());
    }

    #[test]
    fn test_span_start_tier_routing() {
        let r = router();
        assert_eq!(
            r.start_tier_for_span(SpanKind::MarkdownSection, "markdown"),
            "local_small"
        );
        assert_eq!(r.start_tier_for_span(SpanKind::Function, "code"), "local_small");
    }
}
