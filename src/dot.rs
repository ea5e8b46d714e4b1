//! A minimal writer for the Graphviz DOT language: plain nodes, edges and
//! nested clusters, with every attribute value double quoted and cleaned.

use std::fmt::Write as _;

use crate::utils::clean_name;

#[derive(Debug)]
pub struct DotGraph {
    body: String,
    depth: usize,
}

impl DotGraph {
    pub fn new(graph_attrs: &[(&str, &str)], edge_attrs: &[(&str, &str)]) -> Self {
        let mut graph = DotGraph {
            body: String::from("digraph {\n"),
            depth: 1,
        };
        graph.attr_statement("graph", graph_attrs);
        graph.attr_statement("edge", edge_attrs);
        graph
    }

    fn attr_statement(&mut self, target: &str, attrs: &[(&str, &str)]) {
        if attrs.is_empty() {
            return;
        }
        self.indent();
        self.body.push_str(target);
        self.body.push_str(" [");
        for (position, (key, value)) in attrs.iter().enumerate() {
            if position > 0 {
                self.body.push(' ');
            }
            let _ = write!(self.body, "{key}=\"{}\"", clean_name(value));
        }
        self.body.push_str("]\n");
    }

    fn indent(&mut self) {
        for _ in 0..self.depth {
            self.body.push('\t');
        }
    }

    pub fn node(&mut self, id: &str, attrs: &[(&str, String)]) {
        self.indent();
        let _ = write!(self.body, "\"{}\"", clean_name(id));
        self.write_attrs(attrs);
        self.body.push('\n');
    }

    pub fn edge(&mut self, source: &str, destination: &str, attrs: &[(&str, String)]) {
        self.indent();
        let _ = write!(
            self.body,
            "\"{}\" -> \"{}\"",
            clean_name(source),
            clean_name(destination)
        );
        self.write_attrs(attrs);
        self.body.push('\n');
    }

    fn write_attrs(&mut self, attrs: &[(&str, String)]) {
        if attrs.is_empty() {
            return;
        }
        self.body.push_str(" [");
        for (position, (key, value)) in attrs.iter().enumerate() {
            if position > 0 {
                self.body.push(' ');
            }
            let _ = write!(self.body, "{key}=\"{}\"", clean_name(value));
        }
        self.body.push(']');
    }

    /// Open a cluster subgraph. Graphviz treats any subgraph whose name
    /// starts with `cluster` as a bounded region.
    pub fn begin_cluster(&mut self, id: &str) {
        self.indent();
        let _ = writeln!(self.body, "subgraph \"cluster_{}\" {{", clean_name(id));
        self.depth += 1;
    }

    pub fn end_cluster(&mut self) {
        debug_assert!(self.depth > 1, "unbalanced cluster nesting");
        self.depth = self.depth.saturating_sub(1);
        self.indent();
        self.body.push_str("}\n");
    }

    pub fn source(mut self) -> String {
        while self.depth > 1 {
            self.end_cluster();
        }
        self.body.push_str("}\n");
        self.body
    }
}
