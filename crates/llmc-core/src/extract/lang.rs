//! Language dispatch for AST-driven span extraction.
//!
//! Maps file extensions to tree-sitter grammars and describes, per
//! language, which node kinds carry declarations, calls, imports, and
//! assignments. The generic walker in `code.rs` consumes these tables.
//!
//! ## Supported Languages
//!
//! - Python (.py)
//! - JavaScript (.js, .mjs, .cjs)
//! - TypeScript (.ts, .tsx)
//! - Rust (.rs)
//! - Go (.go)
//!
//! Markdown and plain text are handled by the splitters in `text.rs`;
//! everything else falls back to block chunking.

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use tree_sitter::Language;

/// Supported programming languages for AST parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SupportedLanguage {
    Python,
    JavaScript,
    TypeScript,
    Tsx,
    Rust,
    Go,
}

impl SupportedLanguage {
    /// Language name as stored in `content_language`.
    pub fn as_str(&self) -> &'static str {
        match self {
            SupportedLanguage::Python => "python",
            SupportedLanguage::JavaScript => "javascript",
            SupportedLanguage::TypeScript => "typescript",
            SupportedLanguage::Tsx => "typescript", // TSX shares the TypeScript tables
            SupportedLanguage::Rust => "rust",
            SupportedLanguage::Go => "go",
        }
    }

    /// Get the tree-sitter Language for this language.
    pub fn tree_sitter_language(&self) -> Language {
        match self {
            SupportedLanguage::Python => tree_sitter_python::LANGUAGE.into(),
            SupportedLanguage::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            SupportedLanguage::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            SupportedLanguage::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            SupportedLanguage::Rust => tree_sitter_rust::LANGUAGE.into(),
            SupportedLanguage::Go => tree_sitter_go::LANGUAGE.into(),
        }
    }

    /// Detect language from file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        get_extension_map().get(ext.to_lowercase().as_str()).copied()
    }

    /// Detect language from file path.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Node-kind tables driving the generic walker.
    pub fn node_spec(&self) -> &'static NodeSpec {
        match self {
            SupportedLanguage::Python => &PYTHON_SPEC,
            SupportedLanguage::JavaScript => &JAVASCRIPT_SPEC,
            SupportedLanguage::TypeScript | SupportedLanguage::Tsx => &TYPESCRIPT_SPEC,
            SupportedLanguage::Rust => &RUST_SPEC,
            SupportedLanguage::Go => &GO_SPEC,
        }
    }
}

impl std::fmt::Display for SupportedLanguage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Static extension to language mapping.
static EXTENSION_MAP: OnceLock<HashMap<&'static str, SupportedLanguage>> = OnceLock::new();

fn get_extension_map() -> &'static HashMap<&'static str, SupportedLanguage> {
    EXTENSION_MAP.get_or_init(|| {
        let mut map = HashMap::new();
        map.insert("py", SupportedLanguage::Python);
        map.insert("js", SupportedLanguage::JavaScript);
        map.insert("mjs", SupportedLanguage::JavaScript);
        map.insert("cjs", SupportedLanguage::JavaScript);
        map.insert("ts", SupportedLanguage::TypeScript);
        map.insert("tsx", SupportedLanguage::Tsx);
        map.insert("rs", SupportedLanguage::Rust);
        map.insert("go", SupportedLanguage::Go);
        map
    })
}

/// Per-language node-kind tables.
///
/// The walker treats any node whose kind appears in `function_kinds` as a
/// callable declaration, `class_kinds` as a type-like container, and so
/// on. `container_kinds` are walked through without producing spans
/// (e.g. Rust `impl` blocks) but contribute the method context.
pub struct NodeSpec {
    pub function_kinds: &'static [&'static str],
    pub class_kinds: &'static [&'static str],
    /// Containers whose members become methods but which are not spans
    /// themselves.
    pub container_kinds: &'static [&'static str],
    pub call_kinds: &'static [&'static str],
    pub import_kinds: &'static [&'static str],
    pub assignment_kinds: &'static [&'static str],
    /// Field name carrying the declared identifier.
    pub name_field: &'static str,
    /// Field name carrying a return-type annotation, when the grammar
    /// has one.
    pub return_type_field: Option<&'static str>,
}

static PYTHON_SPEC: NodeSpec = NodeSpec {
    function_kinds: &["function_definition"],
    class_kinds: &["class_definition"],
    container_kinds: &[],
    call_kinds: &["call"],
    import_kinds: &["import_statement", "import_from_statement"],
    assignment_kinds: &["assignment", "augmented_assignment"],
    name_field: "name",
    return_type_field: Some("return_type"),
};

static JAVASCRIPT_SPEC: NodeSpec = NodeSpec {
    function_kinds: &[
        "function_declaration",
        "generator_function_declaration",
        "method_definition",
    ],
    class_kinds: &["class_declaration"],
    container_kinds: &[],
    call_kinds: &["call_expression", "new_expression"],
    import_kinds: &["import_statement"],
    assignment_kinds: &["assignment_expression", "augmented_assignment_expression"],
    name_field: "name",
    return_type_field: None,
};

static TYPESCRIPT_SPEC: NodeSpec = NodeSpec {
    function_kinds: &[
        "function_declaration",
        "generator_function_declaration",
        "method_definition",
    ],
    class_kinds: &["class_declaration", "abstract_class_declaration"],
    container_kinds: &[],
    call_kinds: &["call_expression", "new_expression"],
    import_kinds: &["import_statement"],
    assignment_kinds: &["assignment_expression", "augmented_assignment_expression"],
    name_field: "name",
    return_type_field: Some("return_type"),
};

static RUST_SPEC: NodeSpec = NodeSpec {
    function_kinds: &["function_item"],
    class_kinds: &["struct_item", "enum_item", "trait_item", "union_item"],
    container_kinds: &["impl_item"],
    call_kinds: &["call_expression"],
    import_kinds: &["use_declaration"],
    assignment_kinds: &["assignment_expression", "compound_assignment_expr"],
    name_field: "name",
    return_type_field: Some("return_type"),
};

static GO_SPEC: NodeSpec = NodeSpec {
    function_kinds: &["function_declaration", "method_declaration"],
    class_kinds: &["type_declaration"],
    container_kinds: &[],
    call_kinds: &["call_expression"],
    import_kinds: &["import_declaration"],
    assignment_kinds: &["assignment_statement", "short_var_declaration"],
    name_field: "name",
    return_type_field: Some("result"),
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_from_extension() {
        assert_eq!(SupportedLanguage::from_extension("py"), Some(SupportedLanguage::Python));
        assert_eq!(SupportedLanguage::from_extension("RS"), Some(SupportedLanguage::Rust));
        assert_eq!(SupportedLanguage::from_extension("tsx"), Some(SupportedLanguage::Tsx));
        assert_eq!(SupportedLanguage::from_extension("md"), None);
    }

    #[test]
    fn test_from_path() {
        assert_eq!(
            SupportedLanguage::from_path(Path::new("src/main.go")),
            Some(SupportedLanguage::Go)
        );
        assert_eq!(SupportedLanguage::from_path(Path::new("README")), None);
    }

    #[test]
    fn test_tsx_reports_typescript() {
        assert_eq!(SupportedLanguage::Tsx.as_str(), "typescript");
    }

    #[test]
    fn test_grammars_load() {
        for lang in [
            SupportedLanguage::Python,
            SupportedLanguage::JavaScript,
            SupportedLanguage::TypeScript,
            SupportedLanguage::Tsx,
            SupportedLanguage::Rust,
            SupportedLanguage::Go,
        ] {
            let mut parser = tree_sitter::Parser::new();
            parser.set_language(&lang.tree_sitter_language()).unwrap();
        }
    }
}
