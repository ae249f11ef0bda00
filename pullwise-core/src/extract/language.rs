//! Per-language extraction rules backed by tree-sitter grammars

use std::fmt;

use tree_sitter::{Language, Parser};

use crate::models::Snippet;
use crate::{Error, Result};

/// Which code units to extract for one language
#[derive(Clone)]
pub struct LanguageRule {
    name: String,
    grammar: Language,
    node_kinds: Vec<String>,
}

impl LanguageRule {
    /// Create a rule from a grammar and the node kinds to extract
    pub fn new(
        name: impl Into<String>,
        grammar: Language,
        node_kinds: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            grammar,
            node_kinds: node_kinds.into_iter().map(Into::into).collect(),
        }
    }

    /// Go: type, function and method declarations
    pub fn go() -> Self {
        Self::new(
            "go",
            tree_sitter_go::language(),
            ["type_declaration", "function_declaration", "method_declaration"],
        )
    }

    /// Python: class and function definitions
    pub fn python() -> Self {
        Self::new(
            "python",
            tree_sitter_python::language(),
            ["class_definition", "function_definition"],
        )
    }

    /// Language tag attached to extracted snippets
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Node kinds this rule extracts
    pub fn node_kinds(&self) -> &[String] {
        &self.node_kinds
    }

    fn is_target(&self, kind: &str) -> bool {
        self.node_kinds.iter().any(|k| k == kind)
    }

    /// Extract top-level code units from one source file
    pub fn extract(&self, source: &str, filename: &str) -> Result<Vec<Snippet>> {
        let mut parser = Parser::new();
        parser
            .set_language(&self.grammar)
            .map_err(|e| Error::Extract(format!("Failed to load {} grammar: {}", self.name, e)))?;

        let tree = parser
            .parse(source, None)
            .ok_or_else(|| Error::Extract(format!("Failed to parse {}", filename)))?;

        let root = tree.root_node();
        let mut snippets = Vec::new();

        if self.is_target(root.kind()) {
            snippets.push(self.snippet(root, source, filename)?);
        }

        let mut cursor = root.walk();
        for child in root.children(&mut cursor) {
            if self.is_target(child.kind()) {
                snippets.push(self.snippet(child, source, filename)?);
            }
        }

        Ok(snippets)
    }

    fn snippet(&self, node: tree_sitter::Node<'_>, source: &str, filename: &str) -> Result<Snippet> {
        let text = node
            .utf8_text(source.as_bytes())
            .map_err(|e| Error::Extract(format!("Invalid UTF-8 in {}: {}", filename, e)))?;
        Ok(Snippet::new(text, filename, self.name.clone()))
    }
}

impl fmt::Debug for LanguageRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LanguageRule")
            .field("name", &self.name)
            .field("node_kinds", &self.node_kinds)
            .finish_non_exhaustive()
    }
}
