//! Related-category graph.
//!
//! Built from `category_relations` in the config. Edges are undirected:
//! `Wallet: [Cash]` also makes `Wallet` related to `Cash`.

use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default)]
pub struct CategoryGraph {
    /// lowercased category → display names of neighbours
    neighbours: BTreeMap<String, BTreeSet<String>>,
}

impl CategoryGraph {
    pub fn from_relations(relations: &BTreeMap<String, Vec<String>>) -> Self {
        let mut graph = Self::default();

        for (source, related) in relations {
            for target in related {
                graph.add_edge(source.trim(), target.trim());
            }
        }

        graph
    }

    fn add_edge(&mut self, a: &str, b: &str) {
        if a.is_empty() || b.is_empty() || a.eq_ignore_ascii_case(b) {
            return;
        }

        self.neighbours
            .entry(a.to_lowercase())
            .or_default()
            .insert(b.to_string());
        self.neighbours
            .entry(b.to_lowercase())
            .or_default()
            .insert(a.to_string());
    }

    /// Categories related to `category`, sorted by name. Unknown
    /// categories have no context.
    pub fn related(&self, category: &str) -> Vec<String> {
        self.neighbours
            .get(&category.trim().to_lowercase())
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbours.is_empty()
    }
}
