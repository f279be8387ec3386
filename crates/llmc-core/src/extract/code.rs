//! Generic tree-sitter walker producing spans and symbol observations.
//!
//! One walker serves every supported language, driven by the per-language
//! [`NodeSpec`] tables. It emits:
//!
//! - a `function`/`method`/`class` span per top-level declaration,
//! - `block` spans for top-level code not covered by a declaration,
//! - symbol observations for the graph builder,
//! - unresolved call/extends/import/returns/reads/writes references.
//!
//! Class spans cover the declaration header only (up to the first
//! method), keeping span line ranges disjoint.

use std::path::Path;

use tree_sitter::{Node, Parser};

use super::lang::{NodeSpec, SupportedLanguage};
use super::{make_span, text, Extraction, RefKind, RefObs, SymbolObs};
use crate::error::{CoreError, Result};
use crate::types::{EntityKind, Span, SpanKind};

pub(super) fn extract_code(
    language: SupportedLanguage,
    path: &Path,
    source: &str,
) -> Result<Extraction> {
    let mut parser = Parser::new();
    parser
        .set_language(&language.tree_sitter_language())
        .map_err(|e| CoreError::parse(path, e.to_string()))?;

    let tree = parser
        .parse(source, None)
        .ok_or_else(|| CoreError::parse(path, "parser produced no tree"))?;
    let root = tree.root_node();

    let mut walker = Walker {
        spec: language.node_spec(),
        language,
        src: source.as_bytes(),
        lines: source.lines().collect(),
        spans: Vec::new(),
        symbols: Vec::new(),
        refs: Vec::new(),
    };
    walker.walk_children(root, &Ctx::default());

    let has_error = root.has_error();
    if has_error && walker.symbols.is_empty() {
        return Err(CoreError::parse(path, "syntax errors throughout file"));
    }

    let mut spans = walker.spans;
    if !has_error {
        cover_leftover_lines(&walker.lines, language.as_str(), &mut spans);
    }
    spans.sort_by_key(|s| s.start_line);

    Ok(Extraction {
        language: language.as_str().to_string(),
        spans,
        symbols: walker.symbols,
        refs: walker.refs,
        partial: has_error,
    })
}

/// Chunk top-level lines not covered by any declaration span.
fn cover_leftover_lines(lines: &[&str], language: &str, spans: &mut Vec<Span>) {
    let mut covered = vec![false; lines.len()];
    for span in spans.iter() {
        for line in span.start_line..=span.end_line {
            if let Some(slot) = covered.get_mut(line as usize - 1) {
                *slot = true;
            }
        }
    }

    let mut run_start: Option<usize> = None;
    let mut runs: Vec<(usize, usize)> = Vec::new();
    for (i, is_covered) in covered.iter().enumerate() {
        match (is_covered, run_start) {
            (false, None) => run_start = Some(i),
            (true, Some(start)) => {
                runs.push((start, i));
                run_start = None;
            }
            _ => {}
        }
    }
    if let Some(start) = run_start {
        runs.push((start, lines.len()));
    }

    for (start, end) in runs {
        text::chunk_range(lines, start, end, "code", language, spans);
    }
}

/// Walk context: the enclosing class/type and function, if any.
#[derive(Debug, Clone, Default)]
struct Ctx {
    class: Option<String>,
    func: Option<String>,
}

struct Walker<'a> {
    spec: &'static NodeSpec,
    language: SupportedLanguage,
    src: &'a [u8],
    lines: Vec<&'a str>,
    spans: Vec<Span>,
    symbols: Vec<SymbolObs>,
    refs: Vec<RefObs>,
}

impl<'a> Walker<'a> {
    fn walk_children(&mut self, node: Node<'a>, ctx: &Ctx) {
        let mut cursor = node.walk();
        let children: Vec<Node<'a>> = node.named_children(&mut cursor).collect();
        for child in children {
            self.visit(child, ctx);
        }
    }

    fn visit(&mut self, node: Node<'a>, ctx: &Ctx) {
        let kind = node.kind();
        if self.spec.function_kinds.contains(&kind) {
            self.handle_function(node, ctx);
        } else if self.spec.class_kinds.contains(&kind) {
            self.handle_class(node, ctx);
        } else if self.spec.container_kinds.contains(&kind) {
            self.handle_container(node, ctx);
        } else if self.spec.call_kinds.contains(&kind) {
            self.handle_call(node, ctx);
        } else if self.spec.import_kinds.contains(&kind) {
            self.handle_import(node);
        } else if self.spec.assignment_kinds.contains(&kind) {
            self.handle_assignment(node, ctx);
        } else {
            self.walk_children(node, ctx);
        }
    }

    // ------------------------------------------------------------------
    // Declarations
    // ------------------------------------------------------------------

    fn handle_function(&mut self, node: Node<'a>, ctx: &Ctx) {
        // Go carries the receiver on the declaration itself rather than on
        // an enclosing type body.
        let receiver_class = if node.kind() == "method_declaration" {
            go_receiver_type(node, self.src)
        } else {
            None
        };
        let class = receiver_class.or_else(|| ctx.class.clone());

        let Some(name) = self.node_name(node) else {
            self.walk_children(node, ctx);
            return;
        };

        let top_level = ctx.func.is_none();
        if top_level {
            let (start, end) = self.node_lines(node);
            let (span_kind, entity_kind, symbol) = match &class {
                Some(class_name) => (
                    SpanKind::Method,
                    EntityKind::Method,
                    format!("{class_name}.{name}"),
                ),
                None => (SpanKind::Function, EntityKind::Function, name.clone()),
            };
            self.push_span(
                span_kind,
                Some(symbol.clone()),
                start,
                end,
                self.language.as_str(),
            );
            self.symbols.push(SymbolObs {
                name: name.clone(),
                kind: entity_kind,
                start_line: start,
                end_line: end,
                parent: class.clone(),
            });

            if let Some(field) = self.spec.return_type_field {
                if let Some(rt) = node.child_by_field_name(field) {
                    if let Some(target) = clean_type_text(self.node_text(rt)) {
                        self.refs.push(RefObs {
                            from: Some(symbol),
                            kind: RefKind::Returns,
                            target,
                            line: start,
                        });
                    }
                }
            }
        }

        let inner = Ctx {
            class,
            // Nested callables attribute their calls to the outermost one.
            func: Some(ctx.func.clone().unwrap_or(name)),
        };
        self.walk_children(node, &inner);
    }

    fn handle_class(&mut self, node: Node<'a>, ctx: &Ctx) {
        let name = if node.kind() == "type_declaration" {
            go_type_name(node, self.src)
        } else {
            self.node_name(node)
        };
        let Some(name) = name else {
            self.walk_children(node, ctx);
            return;
        };

        if ctx.class.is_some() || ctx.func.is_some() {
            // Nested types contribute context only.
            let inner = Ctx {
                class: Some(name),
                func: ctx.func.clone(),
            };
            self.walk_children(node, &inner);
            return;
        }

        let (start, end) = self.node_lines(node);
        self.symbols.push(SymbolObs {
            name: name.clone(),
            kind: EntityKind::Class,
            start_line: start,
            end_line: end,
            parent: None,
        });
        for superclass in self.extends_targets(node) {
            self.refs.push(RefObs {
                from: Some(name.clone()),
                kind: RefKind::Extends,
                target: superclass,
                line: start,
            });
        }

        let before = self.spans.len();
        let inner = Ctx {
            class: Some(name.clone()),
            func: None,
        };
        self.walk_children(node, &inner);

        // Header span: class start up to the first method (exclusive) so
        // line ranges stay disjoint.
        let first_method = self.spans[before..].iter().map(|s| s.start_line).min();
        let header_end = match first_method {
            Some(m) if m > start => m - 1,
            Some(_) => return, // method starts on the class line; no header span
            None => end,
        };
        let span = make_span(
            SpanKind::Class,
            Some(name),
            start,
            header_end,
            &super::join_lines(&self.lines, start as usize - 1, header_end as usize - 1),
            "code",
            self.language.as_str(),
        );
        self.spans.insert(before, span);
    }

    /// Rust `impl` blocks: no span of their own, but members are methods
    /// of the implemented type.
    fn handle_container(&mut self, node: Node<'a>, ctx: &Ctx) {
        let type_name = node
            .child_by_field_name("type")
            .map(|n| strip_generics(self.node_text(n)));
        let inner = Ctx {
            class: type_name.or_else(|| ctx.class.clone()),
            func: ctx.func.clone(),
        };
        self.walk_children(node, &inner);
    }

    // ------------------------------------------------------------------
    // References
    // ------------------------------------------------------------------

    fn handle_call(&mut self, node: Node<'a>, ctx: &Ctx) {
        if let Some(callee) = node.child_by_field_name("function") {
            if let Some(target) = clean_call_target(self.node_text(callee)) {
                self.refs.push(RefObs {
                    from: ctx.func.clone().map(|f| match &ctx.class {
                        Some(class) => format!("{class}.{f}"),
                        None => f,
                    }),
                    kind: RefKind::Calls,
                    target,
                    line: node.start_position().row as u32 + 1,
                });
            }
        }
        self.walk_children(node, ctx);
    }

    fn handle_import(&mut self, node: Node<'a>) {
        let line = node.start_position().row as u32 + 1;
        for target in self.import_targets(node) {
            self.refs.push(RefObs {
                from: None,
                kind: RefKind::Imports,
                target,
                line,
            });
        }
    }

    fn handle_assignment(&mut self, node: Node<'a>, ctx: &Ctx) {
        if let Some(func) = &ctx.func {
            let from = match &ctx.class {
                Some(class) => format!("{class}.{func}"),
                None => func.clone(),
            };
            if let Some(target) = node
                .child_by_field_name("left")
                .and_then(|left| first_identifier_text(left, self.src))
            {
                let line = node.start_position().row as u32 + 1;
                self.refs.push(RefObs {
                    from: Some(from.clone()),
                    kind: RefKind::Writes,
                    target: target.clone(),
                    line,
                });
                // Read-modify-write forms also read the target.
                if node.kind().contains("augmented") || node.kind().contains("compound") {
                    self.refs.push(RefObs {
                        from: Some(from),
                        kind: RefKind::Reads,
                        target,
                        line,
                    });
                }
            }
        }
        self.walk_children(node, ctx);
    }

    /// Extract imported module names, per language.
    fn import_targets(&self, node: Node<'a>) -> Vec<String> {
        let text = self.node_text(node);
        match self.language {
            SupportedLanguage::Python => {
                if node.kind() == "import_from_statement" {
                    node.child_by_field_name("module_name")
                        .map(|m| vec![self.node_text(m).to_string()])
                        .unwrap_or_default()
                } else {
                    text.trim_start_matches("import")
                        .split(',')
                        .filter_map(|part| {
                            let module = part.split_whitespace().next()?;
                            (!module.is_empty()).then(|| module.to_string())
                        })
                        .collect()
                }
            }
            SupportedLanguage::JavaScript
            | SupportedLanguage::TypeScript
            | SupportedLanguage::Tsx => node
                .child_by_field_name("source")
                .map(|s| vec![self.node_text(s).trim_matches(['"', '\'', '`']).to_string()])
                .unwrap_or_default(),
            SupportedLanguage::Rust => node
                .child_by_field_name("argument")
                .map(|a| {
                    let raw = self.node_text(a);
                    // `a::b::{c, d}` imports module `a::b`.
                    let path = raw.split("::{").next().unwrap_or(raw);
                    vec![path.trim().trim_end_matches("::*").to_string()]
                })
                .unwrap_or_default(),
            SupportedLanguage::Go => {
                let mut targets = Vec::new();
                collect_quoted_strings(node, self.src, &mut targets);
                targets
            }
        }
    }

    /// Extract superclass names from a class declaration, per language.
    fn extends_targets(&self, node: Node<'a>) -> Vec<String> {
        match self.language {
            SupportedLanguage::Python => node
                .child_by_field_name("superclasses")
                .map(|args| {
                    let mut cursor = args.walk();
                    args.named_children(&mut cursor)
                        .filter(|c| c.kind() != "keyword_argument")
                        .filter_map(|c| clean_call_target(self.node_text(c)))
                        .collect()
                })
                .unwrap_or_default(),
            SupportedLanguage::JavaScript
            | SupportedLanguage::TypeScript
            | SupportedLanguage::Tsx => {
                let mut out = Vec::new();
                let mut cursor = node.walk();
                for child in node.named_children(&mut cursor) {
                    if child.kind() == "class_heritage" {
                        let mut inner = child.walk();
                        for c in child.named_children(&mut inner) {
                            match c.kind() {
                                // TS wraps the superclass in an extends_clause.
                                "extends_clause" => {
                                    let mut c3 = c.walk();
                                    out.extend(
                                        c.named_children(&mut c3)
                                            .filter_map(|n| clean_call_target(self.node_text(n))),
                                    );
                                }
                                "implements_clause" => {}
                                _ => out.extend(clean_call_target(self.node_text(c))),
                            }
                        }
                    }
                }
                out
            }
            SupportedLanguage::Rust | SupportedLanguage::Go => Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn node_name(&self, node: Node<'a>) -> Option<String> {
        node.child_by_field_name(self.spec.name_field)
            .map(|n| self.node_text(n).to_string())
    }

    fn node_text(&self, node: Node<'a>) -> &'a str {
        node.utf8_text(self.src).unwrap_or("")
    }

    /// 1-based inclusive line range of a node.
    fn node_lines(&self, node: Node<'a>) -> (u32, u32) {
        let start = node.start_position().row as u32 + 1;
        let end_pos = node.end_position();
        let end = if end_pos.column == 0 && end_pos.row > 0 {
            end_pos.row as u32
        } else {
            end_pos.row as u32 + 1
        };
        (start, end.max(start))
    }

    fn push_span(
        &mut self,
        kind: SpanKind,
        symbol: Option<String>,
        start: u32,
        end: u32,
        language: &str,
    ) {
        let text = super::join_lines(&self.lines, start as usize - 1, end as usize - 1);
        self.spans
            .push(make_span(kind, symbol, start, end, &text, "code", language));
    }
}

/// First `identifier`-like named node under `node`, depth-first.
fn first_identifier_text(node: Node<'_>, src: &[u8]) -> Option<String> {
    if node.kind().ends_with("identifier") {
        return node.utf8_text(src).ok().map(String::from);
    }
    let mut cursor = node.walk();
    let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
    for child in children {
        if let Some(found) = first_identifier_text(child, src) {
            return Some(found);
        }
    }
    None
}

/// Collect the contents of quoted string nodes under `node`.
fn collect_quoted_strings(node: Node<'_>, src: &[u8], out: &mut Vec<String>) {
    if node.kind().contains("string") {
        if let Ok(text) = node.utf8_text(src) {
            let cleaned = text.trim_matches(['"', '`']);
            if !cleaned.is_empty() {
                out.push(cleaned.to_string());
            }
        }
        return;
    }
    let mut cursor = node.walk();
    let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
    for child in children {
        collect_quoted_strings(child, src, out);
    }
}

/// Receiver type of a Go method declaration, e.g. `func (s *Server) Run()`.
fn go_receiver_type(node: Node<'_>, src: &[u8]) -> Option<String> {
    let receiver = node.child_by_field_name("receiver")?;
    find_type_identifier(receiver, src)
}

fn find_type_identifier(node: Node<'_>, src: &[u8]) -> Option<String> {
    if node.kind() == "type_identifier" {
        return node.utf8_text(src).ok().map(String::from);
    }
    let mut cursor = node.walk();
    let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
    for child in children {
        if let Some(found) = find_type_identifier(child, src) {
            return Some(found);
        }
    }
    None
}

/// Declared name of a Go `type` declaration (inside the type_spec).
fn go_type_name(node: Node<'_>, src: &[u8]) -> Option<String> {
    let mut cursor = node.walk();
    let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
    for child in children {
        if child.kind() == "type_spec" {
            return child
                .child_by_field_name("name")
                .and_then(|n| n.utf8_text(src).ok())
                .map(String::from);
        }
    }
    None
}

/// Normalize a call target: strip receiver prefixes and reject
/// expressions that are not name-shaped.
fn clean_call_target(raw: &str) -> Option<String> {
    let trimmed = raw
        .trim()
        .trim_start_matches("self.")
        .trim_start_matches("this.");
    if trimmed.is_empty() || trimmed.len() > 120 {
        return None;
    }
    let ok = trimmed
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | ':'));
    ok.then(|| trimmed.replace("::", "."))
}

/// Normalize a type annotation into a bare type name.
fn clean_type_text(raw: &str) -> Option<String> {
    let cleaned = strip_generics(
        raw.trim()
            .trim_start_matches("->")
            .trim_start_matches(':')
            .trim(),
    );
    let cleaned = cleaned.trim_matches(['(', ')', '*', '&', ' ']).to_string();
    // Multi-value returns (Go) don't name a single type.
    if cleaned.contains(',') {
        return None;
    }
    (!cleaned.is_empty() && cleaned.len() <= 80).then_some(cleaned)
}

/// `Vec<String>` → `Vec`, `Result<T, E>` → `Result`.
fn strip_generics(raw: &str) -> String {
    raw.split('<').next().unwrap_or(raw).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn extract(path: &str, source: &str) -> Extraction {
        let lang = SupportedLanguage::from_path(Path::new(path)).unwrap();
        extract_code(lang, Path::new(path), source).unwrap()
    }

    #[test]
    fn test_python_functions_and_methods() {
        let source = r#"
import os

def top():
    return os.getcwd()

class Handler:
    limit = 10

    def run(self):
        return top()
"#;
        let ex = extract("m.py", source);
        let kinds: Vec<_> = ex.spans.iter().map(|s| s.kind).collect();
        assert!(kinds.contains(&SpanKind::Function));
        assert!(kinds.contains(&SpanKind::Class));
        assert!(kinds.contains(&SpanKind::Method));

        let method = ex
            .spans
            .iter()
            .find(|s| s.kind == SpanKind::Method)
            .unwrap();
        assert_eq!(method.symbol_name.as_deref(), Some("Handler.run"));

        // The class header span must not overlap the method span.
        let class = ex.spans.iter().find(|s| s.kind == SpanKind::Class).unwrap();
        assert!(class.end_line < method.start_line);

        // `run` calls `top`.
        assert!(ex
            .refs
            .iter()
            .any(|r| r.kind == RefKind::Calls
                && r.target == "top"
                && r.from.as_deref() == Some("Handler.run")));

        // Import observed.
        assert!(ex
            .refs
            .iter()
            .any(|r| r.kind == RefKind::Imports && r.target == "os"));
    }

    #[test]
    fn test_python_extends() {
        let ex = extract("m.py", "class Child(Base):\n    pass\n");
        assert!(ex
            .refs
            .iter()
            .any(|r| r.kind == RefKind::Extends && r.target == "Base"));
    }

    #[test]
    fn test_python_blank_line_above_function_keeps_hash() {
        let a = extract("m.py", "def f():\n    return 1\n");
        let b = extract("m.py", "\n\ndef f():\n    return 1\n");
        let ha = &a.spans.iter().find(|s| s.kind == SpanKind::Function).unwrap().span_hash;
        let hb = &b.spans.iter().find(|s| s.kind == SpanKind::Function).unwrap().span_hash;
        assert_eq!(ha, hb);
        assert_eq!(a.spans.len(), b.spans.len());
    }

    #[test]
    fn test_python_docstring_changes_hash() {
        let a = extract("m.py", "def f():\n    return 1\n");
        let b = extract("m.py", "def f():\n    \"\"\"doc\"\"\"\n    return 1\n");
        assert_ne!(a.spans[0].span_hash, b.spans[0].span_hash);
    }

    #[test]
    fn test_rust_impl_methods() {
        let source = r#"
struct Server {
    port: u16,
}

impl Server {
    fn run(&self) -> Result<(), Error> {
        listen(self.port)
    }
}
"#;
        let ex = extract("s.rs", source);
        let method = ex.spans.iter().find(|s| s.kind == SpanKind::Method).unwrap();
        assert_eq!(method.symbol_name.as_deref(), Some("Server.run"));
        assert!(ex
            .refs
            .iter()
            .any(|r| r.kind == RefKind::Returns && r.target == "Result"));
        assert!(ex
            .refs
            .iter()
            .any(|r| r.kind == RefKind::Calls && r.target == "listen"));
    }

    #[test]
    fn test_go_method_receiver() {
        let source = r#"
package main

type Server struct{}

func (s *Server) Run() {
    helper()
}

func helper() {}
"#;
        let ex = extract("s.go", source);
        let method = ex.spans.iter().find(|s| s.kind == SpanKind::Method).unwrap();
        assert_eq!(method.symbol_name.as_deref(), Some("Server.Run"));
    }

    #[test]
    fn test_typescript_class() {
        let source = r#"
export class Widget extends Base {
    render(): string {
        return draw();
    }
}
"#;
        let ex = extract("w.ts", source);
        assert!(ex
            .refs
            .iter()
            .any(|r| r.kind == RefKind::Extends && r.target == "Base"));
        let method = ex.spans.iter().find(|s| s.kind == SpanKind::Method).unwrap();
        assert_eq!(method.symbol_name.as_deref(), Some("Widget.render"));
    }

    #[test]
    fn test_parse_error_yields_zero_spans() {
        let lang = SupportedLanguage::Python;
        let result = extract_code(lang, Path::new("bad.py"), "def (((\n%%%%\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_module_level_code_becomes_blocks() {
        let ex = extract("m.py", "CONFIG = {\"a\": 1}\n\ndef f():\n    return CONFIG\n");
        assert!(ex.spans.iter().any(|s| s.kind == SpanKind::Block));
    }

    #[test]
    fn test_clean_call_target() {
        assert_eq!(clean_call_target("db.query"), Some("db.query".to_string()));
        assert_eq!(clean_call_target("self.save"), Some("save".to_string()));
        assert_eq!(clean_call_target("foo::bar"), Some("foo.bar".to_string()));
        assert_eq!(clean_call_target("(lambda)(x)"), None);
    }
}
