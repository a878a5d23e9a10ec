//! Box-drawing rendering of the graph for debug output.

use std::collections::HashMap;
use std::fmt::Write as _;

use super::{Hash, HashGraph, ROOT_HASH};

const NODE_WIDTH: usize = 13;
const GAP: usize = 4;

fn label(hash: &str) -> String {
    match (hash.get(..4), hash.get(hash.len().saturating_sub(4)..)) {
        (Some(head), Some(tail)) if hash.len() > 8 => format!("{head}...{tail}"),
        _ => hash.to_string(),
    }
}

impl HashGraph {
    /// Render the graph as rows of boxes, one row per longest-path layer,
    /// each box followed by the abbreviated hashes it depends on.
    #[must_use]
    pub fn render_ascii(&self) -> String {
        let order = self
            .kahns_algorithm(&ROOT_HASH.to_string(), None)
            .unwrap_or_default();

        let mut layer_of: HashMap<&Hash, usize> = HashMap::new();
        for hash in &order {
            let layer = self
                .dependencies(hash)
                .iter()
                .filter_map(|dep| layer_of.get(dep))
                .max()
                .map_or(0, |l| l + 1);
            layer_of.insert(hash, layer);
        }

        let mut layers: Vec<Vec<&Hash>> = Vec::new();
        for hash in &order {
            let layer = layer_of.get(hash).copied().unwrap_or_default();
            if layers.len() <= layer {
                layers.resize_with(layer + 1, Vec::new);
            }
            layers[layer].push(hash);
        }

        let border = format!("┌{}┐", "─".repeat(NODE_WIDTH - 2));
        let bottom = format!("└{}┘", "─".repeat(NODE_WIDTH - 2));
        let spacer = " ".repeat(GAP);

        let mut out = String::new();
        for (depth, row) in layers.iter().enumerate() {
            if depth > 0 {
                let arrows: Vec<String> = row
                    .iter()
                    .map(|_| format!("{:^width$}", "v", width = NODE_WIDTH))
                    .collect();
                let _ = writeln!(out, "{}", arrows.join(&spacer));
            }
            let tops: Vec<&str> = row.iter().map(|_| border.as_str()).collect();
            let mids: Vec<String> = row
                .iter()
                .map(|h| format!("│{:^width$}│", label(h), width = NODE_WIDTH - 2))
                .collect();
            let bots: Vec<&str> = row.iter().map(|_| bottom.as_str()).collect();
            let _ = writeln!(out, "{}", tops.join(&spacer));
            let _ = writeln!(out, "{}", mids.join(&spacer));
            let _ = writeln!(out, "{}", bots.join(&spacer));
            for hash in row {
                let deps = self.dependencies(hash);
                if !deps.is_empty() {
                    let names: Vec<String> = deps.iter().map(|d| label(d)).collect();
                    let _ = writeln!(out, "  {} <- {}", label(hash), names.join(", "));
                }
            }
        }
        out
    }
}
