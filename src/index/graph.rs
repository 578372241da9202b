//! Cross-file reference graph construction.
//!
//! Files are nodes; a reference in file `f` to a symbol defined in file `d`
//! contributes a weighted edge `f -> d`. Weights favor long, distinctive
//! identifiers and discount names defined all over the workspace.

use std::collections::{HashMap, HashSet};

use super::{RefKind, SymbolRef};

const LONG_NAME_THRESHOLD: usize = 8;
const LONG_NAME_WEIGHT: f64 = 1.0;
const SHORT_NAME_WEIGHT: f64 = 0.5;
const UNDERSCORE_WEIGHT: f64 = 0.1;
const COMMON_DEF_THRESHOLD: usize = 5;
const COMMON_DEF_WEIGHT: f64 = 0.1;

/// A directed edge in the reference graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub from: String,
    pub to: String,
    /// The referenced symbol name.
    pub symbol: String,
    pub weight: f64,
}

/// Directed multigraph over workspace files.
#[derive(Debug, Default)]
pub struct ReferenceGraph {
    /// All file paths, sorted.
    pub nodes: Vec<String>,
    /// Aggregated edges, sorted by (from, to, symbol).
    pub edges: Vec<Edge>,
}

/// Build the reference graph from extracted symbols.
///
/// References are grouped by `(from, to, symbol)` and each group becomes one
/// edge weighted `count * identifier_weight * commonness_weight`. Node and
/// edge lists come out sorted so ranking over the same input is
/// reproducible.
pub fn build_graph(symbols: &[SymbolRef]) -> ReferenceGraph {
    // Index definitions: symbol name -> distinct defining files, in
    // first-seen order.
    let mut defs: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut nodes: Vec<String> = Vec::new();
    let mut node_seen: HashSet<&str> = HashSet::new();

    for s in symbols {
        if node_seen.insert(s.file_path.as_str()) {
            nodes.push(s.file_path.clone());
        }
        if s.kind == RefKind::Definition {
            let files = defs.entry(s.name.as_str()).or_default();
            if !files.contains(&s.file_path.as_str()) {
                files.push(s.file_path.as_str());
            }
        }
    }
    nodes.sort();

    let mut edge_counts: HashMap<(&str, &str, &str), usize> = HashMap::new();
    for s in symbols {
        if s.kind != RefKind::Reference {
            continue;
        }
        let Some(def_files) = defs.get(s.name.as_str()) else {
            continue;
        };
        for def_file in def_files {
            if *def_file == s.file_path {
                continue; // no self-loops
            }
            *edge_counts
                .entry((s.file_path.as_str(), def_file, s.name.as_str()))
                .or_insert(0) += 1;
        }
    }

    let mut edges: Vec<Edge> = edge_counts
        .into_iter()
        .map(|((from, to, symbol), count)| Edge {
            from: from.to_string(),
            to: to.to_string(),
            symbol: symbol.to_string(),
            weight: count as f64
                * identifier_weight(symbol)
                * commonness_weight(symbol, &defs),
        })
        .collect();
    edges.sort_by(|a, b| {
        (a.from.as_str(), a.to.as_str(), a.symbol.as_str())
            .cmp(&(b.from.as_str(), b.to.as_str(), b.symbol.as_str()))
    });

    ReferenceGraph { nodes, edges }
}

/// Score a name by shape: underscore-prefixed names are near-noise, long
/// names are strong signals.
fn identifier_weight(name: &str) -> f64 {
    if name.starts_with('_') {
        return UNDERSCORE_WEIGHT;
    }
    if name.len() >= LONG_NAME_THRESHOLD {
        return LONG_NAME_WEIGHT;
    }
    SHORT_NAME_WEIGHT
}

/// Discount names defined in many distinct files.
fn commonness_weight(name: &str, defs: &HashMap<&str, Vec<&str>>) -> f64 {
    if defs.get(name).map(|f| f.len()).unwrap_or(0) >= COMMON_DEF_THRESHOLD {
        return COMMON_DEF_WEIGHT;
    }
    1.0
}
