//! Graph construction from extractor output.
//!
//! The builder resolves per-file symbol observations into a repo-wide
//! entity/relation set. Entity ids are structured strings
//! (`mod:src.auth`, `sym:src.auth.login`, `type:Result`,
//! `var:src.auth.SESSION`) so edges persist as plain rows and cycles
//! carry no ownership. Unresolved references are dropped silently but
//! counted. The builder is deterministic: the same input produces the
//! same sorted, deduplicated edge multiset.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use petgraph::stable_graph::{NodeIndex, StableGraph};
use petgraph::Direction;

use crate::extract::{Extraction, RefKind};
use crate::types::{EdgeType, Entity, EntityKind, EntityMetadata, Relation};

/// One file's extraction, keyed by repo-relative path.
#[derive(Debug, Clone)]
pub struct FileExtraction {
    pub path: String,
    pub extraction: Extraction,
}

/// The resolved graph for a repository.
#[derive(Debug, Clone, Default)]
pub struct BuiltGraph {
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
    /// References that matched no entity and were dropped.
    pub unresolved: u64,
}

/// Derive the dotted module name from a repo-relative path:
/// `src/auth.py` → `src.auth`.
pub fn module_name(path: &str) -> String {
    let without_ext = match path.rsplit_once('.') {
        Some((stem, _ext)) if !stem.is_empty() => stem,
        _ => path,
    };
    without_ext.replace(['/', '\\'], ".")
}

/// Resolve extractions into entities and relations.
pub fn build(files: &[FileExtraction]) -> BuiltGraph {
    let mut entities: BTreeMap<String, Entity> = BTreeMap::new();
    let mut relations: BTreeSet<Relation> = BTreeSet::new();
    let mut unresolved: u64 = 0;

    // Symbol tables for resolution:
    // full dotted suffix ("module.Class.name" pieces) and bare names.
    let mut by_name: HashMap<String, Vec<String>> = HashMap::new();
    let mut module_ids: HashMap<String, String> = HashMap::new();

    // Pass 1: declare modules and symbols.
    for file in files {
        let module = module_name(&file.path);
        let module_id = format!("mod:{module}");
        module_ids.insert(module.clone(), module_id.clone());
        entities.entry(module_id.clone()).or_insert_with(|| Entity {
            id: module_id.clone(),
            kind: EntityKind::Module,
            path_ref: Some(file.path.clone()),
            metadata: EntityMetadata::default(),
        });

        for symbol in &file.extraction.symbols {
            let qualified = match &symbol.parent {
                Some(parent) => format!("{module}.{parent}.{}", symbol.name),
                None => format!("{module}.{}", symbol.name),
            };
            let id = format!("sym:{qualified}");
            entities.entry(id.clone()).or_insert_with(|| Entity {
                id: id.clone(),
                kind: symbol.kind,
                path_ref: Some(file.path.clone()),
                metadata: EntityMetadata {
                    symbol_name: Some(match &symbol.parent {
                        Some(parent) => format!("{parent}.{}", symbol.name),
                        None => symbol.name.clone(),
                    }),
                    start_line: Some(symbol.start_line),
                    end_line: Some(symbol.end_line),
                },
            });

            by_name.entry(symbol.name.clone()).or_default().push(id.clone());
            if let Some(parent) = &symbol.parent {
                by_name
                    .entry(format!("{parent}.{}", symbol.name))
                    .or_default()
                    .push(id.clone());
            }

            // Declaration-site edges.
            relations.insert(Relation {
                src_id: module_id.clone(),
                edge_type: EdgeType::Defines,
                dst_id: id.clone(),
            });
            if let Some(parent) = &symbol.parent {
                let parent_id = format!("sym:{module}.{parent}");
                if entities.contains_key(&parent_id) {
                    relations.insert(Relation {
                        src_id: parent_id,
                        edge_type: EdgeType::Defines,
                        dst_id: id.clone(),
                    });
                }
            }
        }
    }

    // Sort the name table so resolution is order-independent.
    for ids in by_name.values_mut() {
        ids.sort();
        ids.dedup();
    }

    // Pass 2: resolve references.
    for file in files {
        let module = module_name(&file.path);
        let module_id = format!("mod:{module}");

        for reference in &file.extraction.refs {
            let src_id = match &reference.from {
                Some(symbol) => {
                    let id = format!("sym:{module}.{symbol}");
                    if entities.contains_key(&id) {
                        id
                    } else {
                        module_id.clone()
                    }
                }
                None => module_id.clone(),
            };

            match reference.kind {
                RefKind::Calls | RefKind::Extends => {
                    let edge = if reference.kind == RefKind::Calls {
                        EdgeType::Calls
                    } else {
                        EdgeType::Extends
                    };
                    match resolve_symbol(&reference.target, &module, &entities, &by_name) {
                        Some(dst_id) if dst_id != src_id => {
                            relations.insert(Relation {
                                src_id,
                                edge_type: edge,
                                dst_id,
                            });
                        }
                        Some(_) => {}
                        None => unresolved += 1,
                    }
                }
                RefKind::Imports => {
                    match resolve_module(&reference.target, &module_ids) {
                        Some(dst_id) if dst_id != src_id => {
                            relations.insert(Relation {
                                src_id: module_id.clone(),
                                edge_type: EdgeType::Imports,
                                dst_id,
                            });
                        }
                        Some(_) => {}
                        None => unresolved += 1,
                    }
                }
                RefKind::Returns => {
                    let type_id = format!("type:{}", reference.target);
                    entities.entry(type_id.clone()).or_insert_with(|| Entity {
                        id: type_id.clone(),
                        kind: EntityKind::Type,
                        path_ref: None,
                        metadata: EntityMetadata {
                            symbol_name: Some(reference.target.clone()),
                            ..Default::default()
                        },
                    });
                    relations.insert(Relation {
                        src_id,
                        edge_type: EdgeType::Returns,
                        dst_id: type_id,
                    });
                }
                RefKind::Reads | RefKind::Writes => {
                    let var_id = format!("var:{module}.{}", reference.target);
                    entities.entry(var_id.clone()).or_insert_with(|| Entity {
                        id: var_id.clone(),
                        kind: EntityKind::Variable,
                        path_ref: Some(file.path.clone()),
                        metadata: EntityMetadata {
                            symbol_name: Some(reference.target.clone()),
                            ..Default::default()
                        },
                    });
                    let edge = if reference.kind == RefKind::Reads {
                        EdgeType::Reads
                    } else {
                        EdgeType::Writes
                    };
                    relations.insert(Relation {
                        src_id,
                        edge_type: edge,
                        dst_id: var_id,
                    });
                }
            }
        }
    }

    BuiltGraph {
        entities: entities.into_values().collect(),
        relations: relations.into_iter().collect(),
        unresolved,
    }
}

/// Resolve a (possibly dotted) reference to a symbol entity id.
///
/// Order: same-module qualified match, dotted-suffix match, bare-name
/// match in the same module, unique bare-name match anywhere.
fn resolve_symbol(
    target: &str,
    module: &str,
    entities: &BTreeMap<String, Entity>,
    by_name: &HashMap<String, Vec<String>>,
) -> Option<String> {
    // Same module, fully qualified.
    let local = format!("sym:{module}.{target}");
    if entities.contains_key(&local) {
        return Some(local);
    }

    // Dotted targets may carry their module prefix ("db.query").
    if target.contains('.') {
        let qualified = format!("sym:{target}");
        if entities.contains_key(&qualified) {
            return Some(qualified);
        }
        let suffix = format!(".{target}");
        let mut matches = entities
            .keys()
            .filter(|id| id.starts_with("sym:") && id.ends_with(&suffix));
        if let Some(first) = matches.next() {
            if matches.next().is_none() {
                return Some(first.clone());
            }
            return None; // ambiguous
        }
    }

    // Bare name: prefer same module, else a unique global match.
    let last = target.rsplit('.').next().unwrap_or(target);
    let candidates = by_name.get(last)?;
    let module_prefix = format!("sym:{module}.");
    if let Some(local_match) = candidates.iter().find(|id| id.starts_with(&module_prefix)) {
        return Some(local_match.clone());
    }
    if candidates.len() == 1 {
        return Some(candidates[0].clone());
    }
    None
}

/// Resolve an import target against known modules.
fn resolve_module(target: &str, module_ids: &HashMap<String, String>) -> Option<String> {
    let normalized = target
        .trim_start_matches("./")
        .trim_start_matches("crate::")
        .replace("::", ".")
        .replace('/', ".");
    if let Some(id) = module_ids.get(&normalized) {
        return Some(id.clone());
    }
    // Suffix match: `utils` resolves to `src.utils` when unique.
    let suffix = format!(".{normalized}");
    let mut matches = module_ids
        .iter()
        .filter(|(name, _)| name.ends_with(&suffix))
        .map(|(_, id)| id);
    let first = matches.next()?;
    matches.next().is_none().then(|| first.clone())
}

// ============================================================================
// In-memory traversal
// ============================================================================

/// An entity graph materialized for traversal (where-used, lineage).
///
/// Backed by a petgraph [`StableGraph`]; the store remains the source of
/// truth, this is a read-only view.
pub struct EntityGraph {
    graph: StableGraph<Entity, EdgeType>,
    index: HashMap<String, NodeIndex>,
}

/// One traversal hit with its hop distance from the origin.
#[derive(Debug, Clone)]
pub struct TraversalHit {
    pub entity: Entity,
    pub edge_type: EdgeType,
    pub distance: u32,
}

/// Traversal direction relative to edge orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalDirection {
    /// Follow edges forward (what does this use / call).
    Downstream,
    /// Follow edges backward (who uses / calls this).
    Upstream,
}

impl EntityGraph {
    /// Build the traversal view from stored rows. Relations with missing
    /// endpoints are skipped; the store validates them at write time, so
    /// a miss here means a concurrent rewrite and losing the edge is the
    /// right behavior.
    pub fn from_rows(entities: Vec<Entity>, relations: &[Relation]) -> Self {
        let mut graph = StableGraph::new();
        let mut index = HashMap::new();
        for entity in entities {
            let id = entity.id.clone();
            let node = graph.add_node(entity);
            index.insert(id, node);
        }
        for relation in relations {
            if let (Some(&src), Some(&dst)) =
                (index.get(&relation.src_id), index.get(&relation.dst_id))
            {
                graph.add_edge(src, dst, relation.edge_type);
            }
        }
        Self { graph, index }
    }

    pub fn contains(&self, entity_id: &str) -> bool {
        self.index.contains_key(entity_id)
    }

    pub fn entity(&self, entity_id: &str) -> Option<&Entity> {
        self.index.get(entity_id).map(|&n| &self.graph[n])
    }

    /// All entity ids, sorted.
    pub fn entity_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.index.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Bounded BFS from `entity_id`. Cycles are handled with an explicit
    /// visited set; `edge_filter` limits which relation kinds are
    /// followed.
    pub fn neighbors(
        &self,
        entity_id: &str,
        hops: u32,
        direction: TraversalDirection,
        edge_filter: Option<EdgeType>,
    ) -> Vec<TraversalHit> {
        let Some(&origin) = self.index.get(entity_id) else {
            return Vec::new();
        };
        let petgraph_dir = match direction {
            TraversalDirection::Downstream => Direction::Outgoing,
            TraversalDirection::Upstream => Direction::Incoming,
        };

        let mut visited: BTreeSet<NodeIndex> = BTreeSet::new();
        visited.insert(origin);
        let mut queue: VecDeque<(NodeIndex, u32)> = VecDeque::new();
        queue.push_back((origin, 0));
        let mut hits = Vec::new();

        while let Some((node, distance)) = queue.pop_front() {
            if distance >= hops {
                continue;
            }
            let mut edges: Vec<(NodeIndex, EdgeType)> = self
                .graph
                .edges_directed(node, petgraph_dir)
                .map(|edge| {
                    use petgraph::visit::EdgeRef;
                    let other = if petgraph_dir == Direction::Outgoing {
                        edge.target()
                    } else {
                        edge.source()
                    };
                    (other, *edge.weight())
                })
                .collect();
            edges.sort_by_key(|(n, e)| (self.graph[*n].id.clone(), e.as_str()));

            for (next, edge_type) in edges {
                if let Some(filter) = edge_filter {
                    if edge_type != filter {
                        continue;
                    }
                }
                if visited.insert(next) {
                    hits.push(TraversalHit {
                        entity: self.graph[next].clone(),
                        edge_type,
                        distance: distance + 1,
                    });
                    queue.push_back((next, distance + 1));
                }
            }
        }
        hits
    }

    /// Fuzzy identifier match against entity ids: exact id, exact symbol
    /// name, dotted suffix, then case-insensitive bare-name match.
    pub fn find_entities(&self, needle: &str) -> Vec<String> {
        if self.index.contains_key(needle) {
            return vec![needle.to_string()];
        }
        let mut ids = self.entity_ids();
        let suffix = format!(".{needle}");
        ids.retain(|id| {
            let body = id.split_once(':').map(|(_, b)| b).unwrap_or(id);
            body == needle || body.ends_with(&suffix) || {
                let last = body.rsplit('.').next().unwrap_or(body);
                last.eq_ignore_ascii_case(needle.rsplit('.').next().unwrap_or(needle))
            }
        });
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::extract;
    use std::path::Path;

    fn graph_for(files: &[(&str, &str)]) -> BuiltGraph {
        let extractions: Vec<FileExtraction> = files
            .iter()
            .map(|(path, source)| FileExtraction {
                path: path.to_string(),
                extraction: extract(Path::new(path), source).unwrap(),
            })
            .collect();
        build(&extractions)
    }

    #[test]
    fn test_module_name() {
        assert_eq!(module_name("src/auth.py"), "src.auth");
        assert_eq!(module_name("db.py"), "db");
        assert_eq!(module_name("Makefile"), "Makefile");
    }

    #[test]
    fn test_cross_file_call_resolution() {
        let built = graph_for(&[
            ("auth.py", "import db\n\ndef login():\n    return db.query()\n"),
            ("db.py", "def query():\n    return []\n"),
        ]);

        assert!(built.relations.contains(&Relation {
            src_id: "sym:auth.login".to_string(),
            edge_type: EdgeType::Calls,
            dst_id: "sym:db.query".to_string(),
        }));
        assert!(built.relations.contains(&Relation {
            src_id: "mod:auth".to_string(),
            edge_type: EdgeType::Imports,
            dst_id: "mod:db".to_string(),
        }));
    }

    #[test]
    fn test_defines_edges() {
        let built = graph_for(&[("m.py", "def f():\n    pass\n")]);
        assert!(built.relations.contains(&Relation {
            src_id: "mod:m".to_string(),
            edge_type: EdgeType::Defines,
            dst_id: "sym:m.f".to_string(),
        }));
    }

    #[test]
    fn test_unresolved_references_are_counted() {
        let built = graph_for(&[("m.py", "import nonexistent\n\ndef f():\n    mystery()\n")]);
        assert!(built.unresolved >= 2);
        assert!(!built
            .relations
            .iter()
            .any(|r| r.dst_id.contains("mystery") || r.dst_id.contains("nonexistent")));
    }

    #[test]
    fn test_determinism() {
        let files = [
            ("a.py", "def one():\n    two()\n"),
            ("b.py", "def two():\n    one()\n"),
        ];
        let first = graph_for(&files);
        let second = graph_for(&files);
        assert_eq!(first.entities.len(), second.entities.len());
        assert_eq!(first.relations, second.relations);
    }

    #[test]
    fn test_traversal_handles_cycles() {
        let built = graph_for(&[
            ("a.py", "def one():\n    two()\n"),
            ("b.py", "def two():\n    one()\n"),
        ]);
        let graph = EntityGraph::from_rows(built.entities, &built.relations);
        // A cyclic call graph must terminate under a hop bound.
        let hits = graph.neighbors("sym:a.one", 10, TraversalDirection::Downstream, Some(EdgeType::Calls));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entity.id, "sym:b.two");
    }

    #[test]
    fn test_where_used_direction() {
        let built = graph_for(&[
            ("auth.py", "import db\n\ndef login():\n    return db.query()\n"),
            ("db.py", "def query():\n    return []\n"),
        ]);
        let graph = EntityGraph::from_rows(built.entities, &built.relations);
        let hits = graph.neighbors("sym:db.query", 1, TraversalDirection::Upstream, Some(EdgeType::Calls));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entity.id, "sym:auth.login");
    }

    #[test]
    fn test_find_entities_fuzzy() {
        let built = graph_for(&[("db.py", "def query():\n    return []\n")]);
        let graph = EntityGraph::from_rows(built.entities, &built.relations);
        assert_eq!(graph.find_entities("db.query"), vec!["sym:db.query"]);
        assert_eq!(graph.find_entities("query"), vec!["sym:db.query"]);
        assert!(graph.find_entities("sym:db.query").len() == 1);
    }
}
