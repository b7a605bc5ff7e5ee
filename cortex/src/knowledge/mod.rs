//! C4: Knowledge Client — semantic code queries against a Memgraph/Neo4j-compatible
//! graph database over the Bolt protocol.
//!
//! Grounded on `knowledge/memgraph_client.py`'s `MemgraphClient`: the Cypher
//! queries below (symbol lookup, reference search, class hierarchy) are a
//! direct port, using `neo4rs` (the Bolt client the `diegorhoger-Brain` example
//! uses) in place of the Python `neo4j` driver. Every query failure is caught
//! and turned into an empty result, matching the original's catch-and-log
//! pattern (spec.md §4.3, §7: knowledge lookups degrade gracefully).

use async_trait::async_trait;
use neo4rs::{query, Graph};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

/// A code symbol: class, function, method.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CodeSymbol {
    pub name: String,
    pub qualified_name: String,
    pub kind: String,
    pub signature: String,
    pub docstring: String,
    pub file_path: String,
    pub line_start: i64,
    pub line_end: i64,
}

/// A directed relationship between two symbols, as returned by a graph query.
#[derive(Clone, Debug)]
pub struct Relationship {
    pub from: String,
    pub rel_type: String,
    pub to: String,
}

/// Aggregated code context for a query, ready to format into a prompt.
#[derive(Clone, Debug, Default)]
pub struct CodeContext {
    pub symbols: Vec<CodeSymbol>,
    pub relationships: Vec<Relationship>,
    pub query: String,
}

const DEFAULT_MAX_CHARS: usize = 2000;

impl CodeContext {
    /// Formats this context into a `<code_knowledge_graph>` block capped at
    /// `max_chars`, truncating with a sentinel line rather than cutting mid-field.
    pub fn to_prompt_context(&self, max_chars: usize) -> String {
        if self.symbols.is_empty() {
            return String::new();
        }

        let mut lines = vec!["<code_knowledge_graph>".to_string()];

        for symbol in self.symbols.iter().take(10) {
            lines.push(format!("- {}: {}", symbol.kind, symbol.qualified_name));
            if !symbol.signature.is_empty() {
                lines.push(format!("  Signature: {}", symbol.signature));
            }
            if !symbol.docstring.is_empty() {
                let doc: String = symbol.docstring.chars().take(200).collect();
                lines.push(format!("  Doc: {doc}"));
            }
            if !symbol.file_path.is_empty() {
                lines.push(format!("  File: {}:{}", symbol.file_path, symbol.line_start));
            }
        }

        if !self.relationships.is_empty() {
            lines.push(String::new());
            lines.push("Relationships:".to_string());
            for rel in self.relationships.iter().take(5) {
                lines.push(format!("  {} --[{}]--> {}", rel.from, rel.rel_type, rel.to));
            }
        }

        lines.push("</code_knowledge_graph>".to_string());

        let result = lines.join("\n");
        if result.chars().count() > max_chars {
            let keep = max_chars.saturating_sub(20);
            let truncated: String = result.chars().take(keep).collect();
            format!("{truncated}\n... (truncated)")
        } else {
            result
        }
    }
}

/// Seam the cognitive graph's `retrieve_knowledge` node calls through, so
/// tests can substitute a fake rather than requiring a live Bolt connection.
#[async_trait]
pub trait KnowledgeClient: Send + Sync {
    async fn health_check(&self) -> bool;
    async fn get_code_context(&self, query_text: &str, limit: usize) -> CodeContext;
}

pub struct GraphKnowledgeClient {
    graph: Graph,
}

impl GraphKnowledgeClient {
    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self, neo4rs::Error> {
        let graph = Graph::new(uri, user, password).await?;
        Ok(Self { graph })
    }

    async fn health_check_impl(&self) -> bool {
        match self.graph.execute(query("RETURN 1 as n")).await {
            Ok(mut stream) => match stream.next().await {
                Ok(Some(row)) => row.get::<i64>("n").unwrap_or(0) == 1,
                _ => false,
            },
            Err(e) => {
                tracing::warn!(error = %e, "knowledge graph health check failed");
                false
            }
        }
    }

    /// Finds symbols whose name contains `name`, optionally filtered by `kind`.
    pub async fn find_symbol(&self, name: &str, kind: Option<&str>) -> Vec<CodeSymbol> {
        let cypher = match kind {
            Some(k) => format!(
                "MATCH (s:{k}) WHERE s.name CONTAINS $name \
                 OPTIONAL MATCH (f:File)-[:CONTAINS*]->(s) \
                 RETURN s, f.path as file_path LIMIT 20"
            ),
            None => "MATCH (s) WHERE (s:Class OR s:Function) AND s.name CONTAINS $name \
                     OPTIONAL MATCH (f:File)-[:CONTAINS*]->(s) \
                     RETURN s, labels(s)[0] as kind, f.path as file_path LIMIT 20"
                .to_string(),
        };

        let result = self
            .graph
            .execute(query(&cypher).param("name", name))
            .await;

        let mut stream = match result {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "find_symbol failed");
                return Vec::new();
            }
        };

        let mut symbols = Vec::new();
        loop {
            match stream.next().await {
                Ok(Some(row)) => {
                    let node_kind = kind
                        .map(|k| k.to_string())
                        .or_else(|| row.get::<String>("kind").ok())
                        .unwrap_or_else(|| "Symbol".to_string());
                    symbols.push(symbol_from_row(&row, node_kind, "file_path"));
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(error = %e, "find_symbol stream failed");
                    break;
                }
            }
        }
        symbols
    }

    /// Finds functions that call `symbol_name`.
    pub async fn find_references(&self, symbol_name: &str) -> Vec<CodeSymbol> {
        let cypher = "MATCH (caller:Function)-[:CALLS]->(target:Function) \
                       WHERE target.name = $name \
                       OPTIONAL MATCH (f:File)-[:CONTAINS*]->(caller) \
                       RETURN caller as s, f.path as file_path LIMIT 20";

        let result = self
            .graph
            .execute(query(cypher).param("name", symbol_name))
            .await;

        let mut stream = match result {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "find_references failed");
                return Vec::new();
            }
        };

        let mut symbols = Vec::new();
        while let Ok(Some(row)) = stream.next().await {
            symbols.push(symbol_from_row(&row, "Function".to_string(), "file_path"));
        }
        symbols
    }

    /// Returns the module names imported by `file_path`.
    pub async fn get_dependencies(&self, file_path: &str) -> Vec<String> {
        let cypher = "MATCH (f:File {path: $path})-[:IMPORTS]->(i:Import) RETURN i.module as module";
        let result = self
            .graph
            .execute(query(cypher).param("path", file_path))
            .await;

        let mut stream = match result {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "get_dependencies failed");
                return Vec::new();
            }
        };

        let mut modules = Vec::new();
        while let Ok(Some(row)) = stream.next().await {
            if let Ok(module) = row.get::<String>("module") {
                modules.push(module);
            }
        }
        modules
    }

    /// Returns `{child, parent}` inheritance edges for `class_name`'s ancestry.
    pub async fn get_class_hierarchy(&self, class_name: &str) -> Vec<(String, String)> {
        let cypher = "MATCH path = (child:Class)-[:INHERITS*]->(ancestor:Class) \
                       WHERE child.name = $name \
                       UNWIND relationships(path) as rel \
                       WITH startNode(rel) as child, endNode(rel) as parent \
                       RETURN child.name as child, parent.name as parent";

        let result = self
            .graph
            .execute(query(cypher).param("name", class_name))
            .await;

        let mut stream = match result {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "get_class_hierarchy failed");
                return Vec::new();
            }
        };

        let mut edges = Vec::new();
        while let Ok(Some(row)) = stream.next().await {
            if let (Ok(child), Ok(parent)) =
                (row.get::<String>("child"), row.get::<String>("parent"))
            {
                edges.push((child, parent));
            }
        }
        edges
    }

    /// Extracts likely symbol names from `query_text` and aggregates their
    /// graph lookups into a single `CodeContext`, deduplicated by qualified name.
    pub async fn get_code_context(&self, query_text: &str, limit: usize) -> CodeContext {
        let search_terms = extract_search_terms(query_text);

        let mut all_symbols = Vec::new();
        for term in search_terms.iter().take(5) {
            all_symbols.extend(self.find_symbol(term, None).await);
        }

        let mut seen = HashSet::new();
        let mut unique_symbols = Vec::new();
        for symbol in all_symbols {
            if seen.insert(symbol.qualified_name.clone()) {
                unique_symbols.push(symbol);
            }
        }
        unique_symbols.truncate(limit);

        CodeContext {
            symbols: unique_symbols,
            relationships: Vec::new(),
            query: query_text.to_string(),
        }
    }
}

#[async_trait]
impl KnowledgeClient for GraphKnowledgeClient {
    async fn health_check(&self) -> bool {
        self.health_check_impl().await
    }

    async fn get_code_context(&self, query_text: &str, limit: usize) -> CodeContext {
        GraphKnowledgeClient::get_code_context(self, query_text, limit).await
    }
}

fn symbol_from_row(row: &neo4rs::Row, kind: String, file_path_field: &str) -> CodeSymbol {
    let node: Option<neo4rs::Node> = row.get("s").ok();
    CodeSymbol {
        name: node
            .as_ref()
            .and_then(|n| n.get("name").ok())
            .unwrap_or_default(),
        qualified_name: node
            .as_ref()
            .and_then(|n| n.get("qualified_name").ok())
            .unwrap_or_default(),
        kind,
        signature: node
            .as_ref()
            .and_then(|n| n.get("signature").ok())
            .unwrap_or_default(),
        docstring: node
            .as_ref()
            .and_then(|n| n.get("docstring").ok())
            .unwrap_or_default(),
        file_path: row.get(file_path_field).unwrap_or_default(),
        line_start: node
            .as_ref()
            .and_then(|n| n.get("line_start").ok())
            .unwrap_or(0),
        line_end: node
            .as_ref()
            .and_then(|n| n.get("line_end").ok())
            .unwrap_or(0),
    }
}

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b([A-Z][a-z]+(?:[A-Z][a-z]+)*|[a-z_][a-z0-9_]+)\b").unwrap())
}

fn skip_keywords() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| {
        [
            "the", "this", "that", "what", "where", "when", "how", "why", "is", "are", "was",
            "were", "be", "been", "being", "have", "has", "had", "do", "does", "did", "will",
            "would", "could", "should", "may", "might", "can", "find", "get", "set", "all",
            "any", "some", "function", "class", "method", "file", "code", "implement",
        ]
        .into_iter()
        .collect()
    })
}

/// Extracts candidate symbol names from a natural-language query, dropping
/// common English stopwords and anything 2 characters or shorter.
pub fn extract_search_terms(query_text: &str) -> Vec<String> {
    let skip = skip_keywords();
    identifier_re()
        .find_iter(query_text)
        .map(|m| m.as_str().to_string())
        .filter(|name| !skip.contains(name.to_lowercase().as_str()) && name.len() > 2)
        .collect()
}
