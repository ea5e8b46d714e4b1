//! playgraph turns parsed deployment playbooks into diagrams: an interactive
//! Graphviz SVG, a Mermaid flowchart or a versioned JSON dump.
//!
//! A [`graph::PlaybookGraph`] holds the tree of plays, roles, blocks and
//! tasks. The renderers all walk it the same way through the
//! [`renderer::PlaybookBuilder`] trait, so every output format agrees on
//! traversal order, sibling indices and role identity.
//!
//! ```no_run
//! use playgraph::graph::{NodeInit, PlaybookGraph, Slot};
//! use playgraph::graphviz::GraphvizRenderer;
//! use playgraph::renderer::{RenderOptions, Renderer};
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut graph = PlaybookGraph::new("site.yml".as_ref());
//! let play = graph.add_play(NodeInit::new("deploy"), vec!["web".into()]);
//! graph.add_task(play, Slot::Tasks, NodeInit::new("install nginx"))?;
//!
//! let mut playbooks = vec![graph];
//! GraphvizRenderer::new(&mut playbooks).render(&RenderOptions::new("site"))?;
//! # Ok(())
//! # }
//! ```

pub mod dot;
pub mod graph;
pub mod graphviz;
pub mod json;
pub mod mermaid;
pub mod postprocessor;
pub mod renderer;
pub mod utils;
