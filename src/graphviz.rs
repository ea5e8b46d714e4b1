//! Graphviz output: build the DOT source for one or more playbooks, run the
//! external `dot` layout engine, then post-process the resulting SVG.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Write as _;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use anyhow::{anyhow, bail, Context, Result};
use tracing::{debug, info};

use crate::dot::DotGraph;
use crate::graph::{NodeRef, PlaybookGraph, Slot};
use crate::postprocessor::PostProcessor;
use crate::renderer::{
    DisplayOptions, OpenProtocolFormats, PlaybookBuilder, RenderOptions, Renderer,
};

pub const DEFAULT_GRAPH_ATTRS: &[(&str, &str)] = &[
    ("ratio", "fill"),
    ("rankdir", "LR"),
    ("concentrate", "true"),
    ("ordering", "in"),
];
pub const DEFAULT_EDGE_ATTRS: &[(&str, &str)] = &[("sep", "10"), ("esep", "5")];

/// The layout engine binary. Layout is a black box: we feed it DOT text and
/// get back an SVG whose element ids match the node model.
const LAYOUT_PROGRAM: &str = "dot";

pub struct GraphvizRenderer<'a> {
    playbooks: &'a mut [PlaybookGraph],
}

impl<'a> GraphvizRenderer<'a> {
    pub fn new(playbooks: &'a mut [PlaybookGraph]) -> Self {
        GraphvizRenderer { playbooks }
    }

    /// Build the DOT source for all playbooks. Role identities are shared
    /// across playbooks so a role is only defined once per artifact.
    pub fn dot_source(&mut self, options: &RenderOptions) -> Result<String> {
        for playbook in self.playbooks.iter_mut() {
            playbook.calculate_indices();
        }

        let formats = options.open_protocol.formats()?;
        let mut dot = DotGraph::new(DEFAULT_GRAPH_ATTRS, DEFAULT_EDGE_ATTRS);
        let mut roles_built = HashSet::new();

        for playbook in self.playbooks.iter() {
            let mut builder = GraphvizBuilder {
                graph: playbook,
                formats: &formats,
                display: &options.display,
                roles_usage: playbook.roles_usage(),
                roles_built: &mut roles_built,
                dot: &mut dot,
            };
            builder.build_playbook().with_context(|| {
                format!(
                    "failed to build the playbook '{}'",
                    playbook.node(playbook.root()).name
                )
            })?;
        }

        Ok(dot.source())
    }
}

impl Renderer for GraphvizRenderer<'_> {
    fn render(&mut self, options: &RenderOptions) -> Result<PathBuf> {
        let source = self.dot_source(options)?;

        info!("rendering the graph");
        let svg = run_layout(&source)?;

        debug!("post processing the SVG");
        let mut post_processor = PostProcessor::parse(&svg)?;
        post_processor.post_process(&*self.playbooks, options.collapsible)?;
        let styled = post_processor.to_svg()?;

        let svg_path = options.output_path.with_extension("svg");
        if let Some(parent) = svg_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&svg_path, styled)
            .with_context(|| format!("failed to write {}", svg_path.display()))?;
        info!(path = %svg_path.display(), "the graph has been exported");

        if options.save_source {
            let dot_path = options.output_path.with_extension("dot");
            fs::write(&dot_path, &source)?;
            info!(path = %dot_path.display(), "DOT source has been exported");
        }
        if options.view {
            // Opening a viewer is left to the caller.
            debug!(path = %svg_path.display(), "view requested");
        }

        Ok(svg_path)
    }
}

fn run_layout(source: &str) -> Result<String> {
    let mut child = Command::new(LAYOUT_PROGRAM)
        .arg("-Tsvg")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to start the layout engine '{LAYOUT_PROGRAM}'"))?;

    child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("no stdin handle on the layout engine"))?
        .write_all(source.as_bytes())?;

    let output = child.wait_with_output()?;
    if !output.status.success() {
        bail!(
            "the layout engine exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8(output.stdout)?)
}

struct GraphvizBuilder<'a> {
    graph: &'a PlaybookGraph,
    formats: &'a OpenProtocolFormats,
    display: &'a DisplayOptions,
    roles_usage: HashMap<String, HashSet<NodeRef>>,
    /// Role ids already defined in the artifact, shared across the
    /// sequential builders of a multi-playbook render.
    roles_built: &'a mut HashSet<String>,
    dot: &'a mut DotGraph,
}

impl GraphvizBuilder<'_> {
    fn node_index(&self, node: NodeRef) -> Result<usize> {
        self.graph
            .node(node)
            .index
            .ok_or_else(|| anyhow!("index not computed for node '{}'", self.graph.node(node).id))
    }

    fn edge_id(&self, index: usize, source: NodeRef, destination: NodeRef) -> String {
        format!(
            "edge_{index}_{}_{}",
            self.graph.node(source).id,
            self.graph.node(destination).id
        )
    }

    /// Edge from the node's parent, labelled with the sibling index and the
    /// guard condition.
    fn parent_edge(&mut self, node: NodeRef, color: &str) -> Result<()> {
        let data = self.graph.node(node);
        let parent = data
            .parent
            .ok_or_else(|| anyhow!("node '{}' has no parent to link from", data.id))?;
        let index = self.node_index(node)?;
        let label = format!("{index} {}", data.when);
        self.dot.edge(
            &self.graph.node(parent).id,
            &data.id,
            &[
                ("label", label.clone()),
                ("color", color.to_string()),
                ("fontcolor", color.to_string()),
                ("id", self.edge_id(index, parent, node)),
                ("tooltip", label.clone()),
                ("labeltooltip", label),
            ],
        );
        Ok(())
    }
}

impl PlaybookBuilder for GraphvizBuilder<'_> {
    fn graph(&self) -> &PlaybookGraph {
        self.graph
    }

    fn display(&self) -> &DisplayOptions {
        self.display
    }

    fn build_playbook(&mut self) -> Result<()> {
        let root = self.graph.root();
        let data = self.graph.node(root);
        debug!(playbook = %data.name, "converting the playbook to DOT");

        let mut attrs = vec![
            ("label", data.name.clone()),
            ("style", "dotted".to_string()),
            ("id", data.id.clone()),
        ];
        if let Some(url) = self.formats.node_url(data) {
            attrs.push(("URL", url));
        }
        self.dot.node(&data.id, &attrs);

        for play in self.graph.plays(
            self.display.hide_empty_plays,
            self.display.hide_plays_without_roles,
        ) {
            self.build_play(play)?;
        }
        Ok(())
    }

    fn build_play(&mut self, play: NodeRef) -> Result<()> {
        let root = self.graph.root();
        let data = self.graph.node(play);
        let colors = self
            .graph
            .play_colors(play)
            .ok_or_else(|| anyhow!("play '{}' has no colors", data.id))?
            .clone();
        let index = self.node_index(play)?;

        // Edge from the playbook root, labelled with the play position.
        let edge_label = format!("{index} {}", data.name);
        self.dot.edge(
            &self.graph.node(root).id,
            &data.id,
            &[
                ("label", edge_label.clone()),
                ("color", colors.main.clone()),
                ("fontcolor", colors.main.clone()),
                ("id", self.edge_id(index, root, play)),
                ("tooltip", edge_label.clone()),
                ("labeltooltip", edge_label),
            ],
        );

        let hosts = self.graph.hosts(play);
        let tooltip = if hosts.is_empty() {
            data.name.clone()
        } else {
            hosts.join(",")
        };

        self.dot.begin_cluster(&data.id);
        let mut attrs = vec![
            ("label", data.name.clone()),
            ("id", data.id.clone()),
            ("shape", "box".to_string()),
            ("style", "filled".to_string()),
            ("color", colors.main.clone()),
            ("fontcolor", colors.font.clone()),
            ("tooltip", tooltip),
        ];
        if let Some(url) = self.formats.node_url(data) {
            attrs.push(("URL", url));
        }
        self.dot.node(&data.id, &attrs);

        self.traverse_play(play)?;
        self.dot.end_cluster();
        Ok(())
    }

    fn build_task(
        &mut self,
        task: NodeRef,
        color: &str,
        _font_color: &str,
        label_prefix: &str,
    ) -> Result<()> {
        self.parent_edge(task, color)?;

        let data = self.graph.node(task);
        // Handlers are notified, not sequenced: they get a distinct shape
        // and line style.
        let (shape, style) = if self.graph.is_handler(task) {
            ("hexagon", "dotted")
        } else {
            ("box", "solid")
        };
        let mut attrs = vec![
            ("label", format!("{label_prefix}{}", data.name)),
            ("shape", shape.to_string()),
            ("style", style.to_string()),
            ("id", data.id.clone()),
            ("tooltip", data.name.clone()),
            ("color", color.to_string()),
        ];
        if let Some(url) = self.formats.node_url(data) {
            attrs.push(("URL", url));
        }
        self.dot.node(&data.id, &attrs);
        Ok(())
    }

    fn build_block(&mut self, block: NodeRef, color: &str, font_color: &str) -> Result<()> {
        self.parent_edge(block, color)?;

        let data = self.graph.node(block);
        self.dot.begin_cluster(&data.id);
        let mut attrs = vec![
            ("label", format!("[block] {}", data.name)),
            ("shape", "box".to_string()),
            ("style", "filled".to_string()),
            ("id", data.id.clone()),
            ("tooltip", data.name.clone()),
            ("color", color.to_string()),
            ("fontcolor", font_color.to_string()),
            ("labeltooltip", data.name.clone()),
        ];
        if let Some(url) = self.formats.node_url(data) {
            attrs.push(("URL", url));
        }
        self.dot.node(&data.id, &attrs);

        // Graphviz renders cluster members bottom-up; reversing keeps the
        // display order aligned with the execution order.
        let tasks: Vec<NodeRef> = self.graph.children(block, Slot::Tasks).to_vec();
        for task in tasks.into_iter().rev() {
            self.build_node(task, color, font_color, "")?;
        }
        self.dot.end_cluster();
        Ok(())
    }

    fn build_role(&mut self, role: NodeRef, color: &str, _font_color: &str) -> Result<()> {
        self.parent_edge(role, color)?;

        let data = self.graph.node(role);
        // Only the first reference defines the role; later ones just link.
        if !self.roles_built.insert(data.id.clone()) {
            return Ok(());
        }

        let usage = self
            .roles_usage
            .get(&data.id)
            .map(|plays| plays.len())
            .unwrap_or(0);
        let (role_color, role_font_color) = if usage > 1 {
            // A role shared by several plays belongs to none of them.
            ("black".to_string(), "#ffffff".to_string())
        } else {
            let play = self
                .roles_usage
                .get(&data.id)
                .and_then(|plays| plays.iter().next().copied());
            match play.and_then(|play| self.graph.play_colors(play)) {
                Some(colors) => (colors.main.clone(), colors.font.clone()),
                None => ("black".to_string(), "#ffffff".to_string()),
            }
        };

        self.dot.begin_cluster(&data.id);
        let mut attrs = vec![
            ("label", format!("[role] {}", data.name)),
            ("style", "filled".to_string()),
            ("id", data.id.clone()),
            ("tooltip", data.name.clone()),
            ("color", role_color.clone()),
            ("fontcolor", role_font_color.clone()),
        ];
        if let Some(url) = self.formats.node_url(data) {
            attrs.push(("URL", url));
        }
        self.dot.node(&data.id, &attrs);

        if self.display.include_role_tasks {
            let mut members: Vec<(NodeRef, &str)> = self
                .graph
                .children(role, Slot::Tasks)
                .iter()
                .map(|task| (*task, ""))
                .collect();
            if self.display.show_handlers {
                members.extend(
                    self.graph
                        .children(role, Slot::Handlers)
                        .iter()
                        .map(|handler| (*handler, "[handler] ")),
                );
            }
            for (member, prefix) in members {
                self.build_node(member, &role_color, &role_font_color, prefix)?;
            }
        }
        self.dot.end_cluster();
        Ok(())
    }
}
