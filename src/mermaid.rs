//! Mermaid flowchart output. One statement per node, one per link, with
//! `linkStyle` coloring keyed by the global link order.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use tracing::{debug, info, warn};

use crate::graph::{NodeRef, PlaybookGraph, Slot};
use crate::renderer::{DisplayOptions, PlaybookBuilder, RenderOptions, Renderer};

/// Rendering directive for the generated chart.
/// See https://mermaid.js.org/config/directives.html
pub const DEFAULT_DIRECTIVE: &str = r#"%%{ init: { "flowchart": { "curve": "bumpX" } } }%%"#;
pub const DEFAULT_ORIENTATION: &str = "LR";

/// The flowchart grammar cannot hold literal double quotes inside quoted
/// labels, so they become single quotes.
fn escape_label(text: &str) -> String {
    text.replace('"', "'")
}

pub struct MermaidRenderer<'a> {
    playbooks: &'a mut [PlaybookGraph],
    pub directive: String,
    pub orientation: String,
}

impl<'a> MermaidRenderer<'a> {
    pub fn new(playbooks: &'a mut [PlaybookGraph]) -> Self {
        MermaidRenderer {
            playbooks,
            directive: DEFAULT_DIRECTIVE.to_string(),
            orientation: DEFAULT_ORIENTATION.to_string(),
        }
    }

    pub fn flowchart(&mut self, options: &RenderOptions) -> Result<String> {
        for playbook in self.playbooks.iter_mut() {
            playbook.calculate_indices();
        }

        let mut code = String::from("---\ntitle: Playbook Graph\n---\n");
        code.push_str(&self.directive);
        code.push('\n');
        code.push_str(&format!("flowchart {}\n", self.orientation));

        // Mermaid styles links by their creation order, so the order is
        // global across playbooks.
        let mut link_order = 0;
        let mut roles_built = HashSet::new();

        for playbook in self.playbooks.iter() {
            let mut builder = MermaidBuilder {
                graph: playbook,
                display: &options.display,
                roles_usage: playbook.roles_usage(),
                roles_built: &mut roles_built,
                code: String::new(),
                link_order,
                indent_level: 1,
            };
            builder.build_playbook().with_context(|| {
                format!(
                    "failed to build the playbook '{}'",
                    playbook.node(playbook.root()).name
                )
            })?;
            link_order = builder.link_order;
            code.push_str(&builder.code);
        }

        Ok(code)
    }
}

impl Renderer for MermaidRenderer<'_> {
    fn render(&mut self, options: &RenderOptions) -> Result<PathBuf> {
        let code = self.flowchart(options)?;

        let output_path = options.output_path.with_extension("mmd");
        if let Some(parent) = output_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&output_path, code)
            .with_context(|| format!("failed to write {}", output_path.display()))?;
        info!(path = %output_path.display(), "mermaid code written");

        if options.view {
            warn!("the view option is not supported by the mermaid renderer");
        }
        Ok(output_path)
    }
}

struct MermaidBuilder<'a> {
    graph: &'a PlaybookGraph,
    display: &'a DisplayOptions,
    roles_usage: HashMap<String, HashSet<NodeRef>>,
    roles_built: &'a mut HashSet<String>,
    code: String,
    link_order: usize,
    indent_level: usize,
}

impl MermaidBuilder<'_> {
    fn add_text(&mut self, text: &str) {
        for _ in 0..self.indent_level {
            self.code.push('\t');
        }
        self.code.push_str(text.trim());
        self.code.push('\n');
    }

    fn add_comment(&mut self, text: &str) {
        self.add_text(&format!("%% {text}"));
    }

    /// Add a link between two nodes.
    fn add_link(&mut self, source_id: &str, text: &str, destination_id: &str, style: &str) {
        let text = escape_label(text);
        let text = text.trim();
        self.add_text(&format!("{source_id} --> |\"{text}\"| {destination_id}"));
        if !style.is_empty() {
            self.add_text(&format!("linkStyle {} {style}", self.link_order));
        }
        self.link_order += 1;
    }

    fn indexed_when(&self, node: NodeRef) -> Result<String> {
        let data = self.graph.node(node);
        let index = data
            .index
            .ok_or_else(|| anyhow!("index not computed for node '{}'", data.id))?;
        Ok(format!("{index} {}", data.when))
    }

    fn parent_id(&self, node: NodeRef) -> Result<String> {
        let data = self.graph.node(node);
        let parent = data
            .parent
            .ok_or_else(|| anyhow!("node '{}' has no parent to link from", data.id))?;
        Ok(self.graph.node(parent).id.clone())
    }
}

impl PlaybookBuilder for MermaidBuilder<'_> {
    fn graph(&self) -> &PlaybookGraph {
        self.graph
    }

    fn display(&self) -> &DisplayOptions {
        self.display
    }

    fn build_playbook(&mut self) -> Result<()> {
        let root = self.graph.root();
        let data = self.graph.node(root);
        debug!(playbook = %data.name, "converting the playbook to mermaid");

        self.add_comment(&format!("Start of the playbook '{}'", data.name));
        self.add_text(&format!("{}(\"{}\")", data.id, escape_label(&data.name)));

        let name = data.name.clone();
        self.indent_level += 1;
        for play in self.graph.plays(
            self.display.hide_empty_plays,
            self.display.hide_plays_without_roles,
        ) {
            self.build_play(play)?;
        }
        self.indent_level -= 1;
        self.add_comment(&format!("End of the playbook '{name}'\n"));
        Ok(())
    }

    fn build_play(&mut self, play: NodeRef) -> Result<()> {
        let data = self.graph.node(play);
        let colors = self
            .graph
            .play_colors(play)
            .ok_or_else(|| anyhow!("play '{}' has no colors", data.id))?
            .clone();
        let id = data.id.clone();
        let name = data.name.clone();
        let index = data
            .index
            .ok_or_else(|| anyhow!("index not computed for play '{id}'"))?;
        let parent_id = self.parent_id(play)?;

        self.add_comment(&format!("Start of the play '{name}'"));
        self.add_text(&format!("{id}[\"{}\"]", escape_label(&name)));
        self.add_text(&format!(
            "style {id} fill:{},color:{}",
            colors.main, colors.font
        ));
        self.add_link(
            &parent_id,
            &index.to_string(),
            &id,
            &format!("stroke:{},color:{}", colors.main, colors.main),
        );

        self.indent_level += 1;
        self.traverse_play(play)?;
        self.indent_level -= 1;
        self.add_comment(&format!("End of the play '{name}'"));
        Ok(())
    }

    fn build_task(
        &mut self,
        task: NodeRef,
        color: &str,
        font_color: &str,
        label_prefix: &str,
    ) -> Result<()> {
        let data = self.graph.node(task);
        let id = data.id.clone();
        let name = data.name.clone();
        let label = self.indexed_when(task)?;
        let parent_id = self.parent_id(task)?;

        self.add_text(&format!("{id}[\"{label_prefix}{}\"]", escape_label(&name)));
        self.add_text(&format!("style {id} stroke:{color},fill:{font_color}"));
        self.add_link(
            &parent_id,
            &label,
            &id,
            &format!("stroke:{color},color:{color}"),
        );
        Ok(())
    }

    fn build_role(&mut self, role: NodeRef, color: &str, font_color: &str) -> Result<()> {
        let data = self.graph.node(role);
        let id = data.id.clone();
        let name = data.name.clone();
        let label = self.indexed_when(role)?;
        let parent_id = self.parent_id(role)?;

        self.add_comment(&format!("Start of the role '{name}'"));

        let usage = self
            .roles_usage
            .get(&id)
            .map(|plays| plays.len())
            .unwrap_or(0);
        let node_color = if usage > 1 { "#000000" } else { color };

        self.add_link(
            &parent_id,
            &label,
            &id,
            &format!("stroke:{color},color:{node_color}"),
        );

        if !self.roles_built.insert(id.clone()) {
            return Ok(());
        }

        self.add_text(&format!("{id}(\"[role] {}\")", escape_label(&name)));
        self.add_text(&format!(
            "style {id} fill:{node_color},color:{font_color},stroke:{node_color}"
        ));

        if self.display.include_role_tasks {
            let node_color = node_color.to_string();
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
            self.indent_level += 1;
            for (member, prefix) in members {
                self.build_node(member, &node_color, font_color, prefix)?;
            }
            self.indent_level -= 1;
        }
        self.add_comment(&format!("End of the role '{name}'"));
        Ok(())
    }

    fn build_block(&mut self, block: NodeRef, color: &str, font_color: &str) -> Result<()> {
        let data = self.graph.node(block);
        let id = data.id.clone();
        let name = data.name.clone();
        let label = self.indexed_when(block)?;
        let parent_id = self.parent_id(block)?;

        self.add_comment(&format!("Start of the block '{name}'"));
        self.add_text(&format!("{id}[\"[block] {}\"]", escape_label(&name)));
        self.add_text(&format!(
            "style {id} fill:{color},color:{font_color},stroke:{color}"
        ));
        self.add_link(
            &parent_id,
            &label,
            &id,
            &format!("stroke:{color},color:{color}"),
        );

        self.add_text(&format!("subgraph subgraph_{id}[\"{} \"]", escape_label(&name)));
        let tasks: Vec<NodeRef> = self.graph.children(block, Slot::Tasks).to_vec();
        self.indent_level += 1;
        for task in tasks {
            self.build_node(task, color, font_color, "")?;
        }
        self.indent_level -= 1;
        self.add_text("end");
        self.add_comment(&format!("End of the block '{name}'"));
        Ok(())
    }
}
