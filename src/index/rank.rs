//! Personalized PageRank over the reference graph.

use std::collections::{HashMap, HashSet};

use super::graph::ReferenceGraph;
use super::{RankedSymbol, RefKind, SymbolRef};

const DEFAULT_DAMPING: f64 = 0.85;
const DEFAULT_MAX_ITERATIONS: usize = 100;
const DEFAULT_TOLERANCE: f64 = 1e-6;
const PERSONALIZATION_FACTOR: f64 = 100.0;

#[derive(Debug, Clone)]
pub struct RankConfig {
    pub damping: f64,
    pub max_iterations: usize,
    /// Convergence tolerance on the L1 difference between iterations.
    pub tolerance: f64,
    /// Files receiving the 100x personalization bias.
    pub personalized_files: Vec<String>,
}

impl Default for RankConfig {
    fn default() -> Self {
        Self {
            damping: DEFAULT_DAMPING,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tolerance: DEFAULT_TOLERANCE,
            personalized_files: Vec::new(),
        }
    }
}

/// Run PageRank and return definition symbols carrying their file's score,
/// ordered by score descending, then file path, then line.
pub fn rank(graph: &ReferenceGraph, symbols: &[SymbolRef], cfg: RankConfig) -> Vec<RankedSymbol> {
    let n = graph.nodes.len();
    if n == 0 {
        return Vec::new();
    }

    let idx: HashMap<&str, usize> = graph
        .nodes
        .iter()
        .enumerate()
        .map(|(i, node)| (node.as_str(), i))
        .collect();

    // Personalization vector: base 1.0, bias 100x, normalized to sum 1.
    let personal_set: HashSet<&str> = cfg.personalized_files.iter().map(|f| f.as_str()).collect();
    let mut personalization = vec![1.0f64; n];
    for (i, node) in graph.nodes.iter().enumerate() {
        if personal_set.contains(node.as_str()) {
            personalization[i] = PERSONALIZATION_FACTOR;
        }
    }
    let total: f64 = personalization.iter().sum();
    for p in personalization.iter_mut() {
        *p /= total;
    }

    // Adjacency by index, with per-node outgoing weight totals.
    let mut out_edges: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
    let mut out_weight = vec![0.0f64; n];
    for edge in &graph.edges {
        let (Some(&from), Some(&to)) = (idx.get(edge.from.as_str()), idx.get(edge.to.as_str()))
        else {
            continue;
        };
        out_edges[from].push((to, edge.weight));
        out_weight[from] += edge.weight;
    }

    let mut rank = vec![1.0 / n as f64; n];
    let mut next = vec![0.0f64; n];
    let mut iterations = 0;

    for iter in 0..cfg.max_iterations {
        iterations = iter + 1;

        for (i, value) in next.iter_mut().enumerate() {
            *value = (1.0 - cfg.damping) * personalization[i];
        }

        for i in 0..n {
            if out_weight[i] == 0.0 {
                // Dangling node: teleport its mass along the
                // personalization vector.
                for (j, p) in personalization.iter().enumerate() {
                    next[j] += cfg.damping * rank[i] * p;
                }
                continue;
            }
            for &(to, weight) in &out_edges[i] {
                next[to] += cfg.damping * rank[i] * (weight / out_weight[i]);
            }
        }

        let diff: f64 = rank
            .iter()
            .zip(next.iter())
            .map(|(a, b)| (a - b).abs())
            .sum();
        rank.copy_from_slice(&next);
        if diff < cfg.tolerance {
            break;
        }
    }

    tracing::debug!(nodes = n, iterations, "pagerank converged");

    // Each definition inherits its file's score.
    let mut ranked: Vec<RankedSymbol> = symbols
        .iter()
        .filter(|s| s.kind == RefKind::Definition)
        .filter_map(|s| {
            idx.get(s.file_path.as_str()).map(|&i| RankedSymbol {
                file_path: s.file_path.clone(),
                name: s.name.clone(),
                line: s.line,
                signature: String::new(),
                score: rank[i],
            })
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.file_path.cmp(&b.file_path))
            .then_with(|| a.line.cmp(&b.line))
    });

    ranked
}
