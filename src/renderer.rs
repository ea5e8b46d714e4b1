//! The format-agnostic rendering contract: every output format implements
//! [`PlaybookBuilder`] for the per-node emission and a [`Renderer`] that owns
//! artifact writing. The traversal order and the node-kind dispatch live here
//! so that all formats walk the tree identically.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Result};
use tracing::debug;

use crate::graph::{NodeData, NodeLocation, NodeRef, NodeType, PlaybookGraph, Slot};

/// Named open-link handler: how node locations are turned into clickable
/// URLs in the rendered artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenProtocolHandler {
    #[default]
    Default,
    Vscode,
    Custom,
}

/// URL templates for the two location kinds. `{path}`, `{line}` and
/// `{column}` are substituted; `remove_from_path` is stripped from the front
/// of the path first when non-empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenProtocolFormats {
    pub file: String,
    pub folder: String,
    pub remove_from_path: String,
}

impl OpenProtocolFormats {
    pub fn node_url(&self, node: &NodeData) -> Option<String> {
        let location = node.location.as_ref()?;
        let (template, path, line, column) = match location {
            NodeLocation::File { path, line, column } => (&self.file, path.as_str(), *line, *column),
            NodeLocation::Folder { path } => (&self.folder, path.as_str(), 1, 1),
        };

        let path = if self.remove_from_path.is_empty() {
            path
        } else {
            path.strip_prefix(&self.remove_from_path).unwrap_or(path)
        };

        let url = template
            .replace("{path}", path)
            .replace("{line}", &line.to_string())
            .replace("{column}", &column.to_string());
        debug!(node = %node.id, %url, "open protocol URL");
        Some(url)
    }
}

#[derive(Debug, Clone, Default)]
pub struct OpenProtocol {
    pub handler: OpenProtocolHandler,
    /// Required when the handler is [`OpenProtocolHandler::Custom`].
    pub custom_formats: Option<OpenProtocolFormats>,
}

impl OpenProtocol {
    pub fn formats(&self) -> Result<OpenProtocolFormats> {
        match self.handler {
            OpenProtocolHandler::Default => Ok(OpenProtocolFormats {
                file: "{path}".to_string(),
                folder: "{path}".to_string(),
                remove_from_path: String::new(),
            }),
            OpenProtocolHandler::Vscode => Ok(OpenProtocolFormats {
                file: "vscode://file/{path}:{line}:{column}".to_string(),
                folder: "vscode://file/{path}".to_string(),
                remove_from_path: String::new(),
            }),
            OpenProtocolHandler::Custom => self
                .custom_formats
                .clone()
                .ok_or_else(|| anyhow!("the custom open protocol handler requires formats")),
        }
    }
}

/// Filters applied to an already-built tree when rendering.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisplayOptions {
    pub show_handlers: bool,
    /// Render the tasks inside roles, not just the role nodes.
    pub include_role_tasks: bool,
    /// Render only the roles below each play, suppressing tasks and blocks.
    pub only_roles: bool,
    pub hide_empty_plays: bool,
    pub hide_plays_without_roles: bool,
}

#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub open_protocol: OpenProtocol,
    /// Output path without extension; each renderer appends its own.
    pub output_path: PathBuf,
    /// Keep the pre-layout source (e.g. the DOT text) next to the artifact.
    pub save_source: bool,
    /// Inject collapsible-cluster controls into the diagram.
    pub collapsible: bool,
    pub view: bool,
    pub display: DisplayOptions,
}

impl RenderOptions {
    pub fn new(output_path: impl AsRef<Path>) -> Self {
        RenderOptions {
            open_protocol: OpenProtocol::default(),
            output_path: output_path.as_ref().to_path_buf(),
            save_source: false,
            collapsible: true,
            view: false,
            display: DisplayOptions::default(),
        }
    }
}

/// One renderer per output format. A renderer orchestrates one or more
/// playbook trees and owns writing the final artifact.
pub trait Renderer {
    fn render(&mut self, options: &RenderOptions) -> Result<PathBuf>;
}

/// Per-tree traversal, the extension point for format-specific emission.
/// `build_node` and `traverse_play` are contract-level and shared by every
/// format; the remaining methods emit the format's output.
pub trait PlaybookBuilder {
    fn graph(&self) -> &PlaybookGraph;
    fn display(&self) -> &DisplayOptions;

    fn build_playbook(&mut self) -> Result<()>;
    fn build_play(&mut self, play: NodeRef) -> Result<()>;
    fn build_task(
        &mut self,
        task: NodeRef,
        color: &str,
        font_color: &str,
        label_prefix: &str,
    ) -> Result<()>;
    fn build_role(&mut self, role: NodeRef, color: &str, font_color: &str) -> Result<()>;
    fn build_block(&mut self, block: NodeRef, color: &str, font_color: &str) -> Result<()>;

    /// Dispatch on the node kind. Only the kinds that can appear below a
    /// play are valid here; anything else means the traversal is broken.
    fn build_node(
        &mut self,
        node: NodeRef,
        color: &str,
        font_color: &str,
        label_prefix: &str,
    ) -> Result<()> {
        match self.graph().node_type(node) {
            NodeType::Block => self.build_block(node, color, font_color),
            NodeType::Role => self.build_role(node, color, font_color),
            NodeType::Task => self.build_task(node, color, font_color, label_prefix),
            kind @ (NodeType::Playbook | NodeType::Play) => {
                bail!(
                    "internal error: {} nodes are not dispatched through build_node",
                    kind.as_str()
                )
            }
        }
    }

    /// Walk one play in execution order: pre_tasks, roles, tasks,
    /// post_tasks, then handlers when requested. This order is fixed across
    /// all formats. With `only_roles` set, only the roles are visited.
    fn traverse_play(&mut self, play: NodeRef) -> Result<()> {
        let graph = self.graph();
        let colors = graph
            .play_colors(play)
            .ok_or_else(|| anyhow!("traverse_play called on a non-play node"))?
            .clone();
        let pre_tasks = graph.children(play, Slot::PreTasks).to_vec();
        let roles = graph.children(play, Slot::Roles).to_vec();
        let tasks = graph.children(play, Slot::Tasks).to_vec();
        let post_tasks = graph.children(play, Slot::PostTasks).to_vec();
        let handlers = graph.children(play, Slot::Handlers).to_vec();
        let show_handlers = self.display().show_handlers;
        let only_roles = self.display().only_roles;

        if !only_roles {
            for task in pre_tasks {
                self.build_node(task, &colors.main, &colors.font, "[pre_task] ")?;
            }
        }
        for role in roles {
            self.build_role(role, &colors.main, &colors.font)?;
        }
        if !only_roles {
            for task in tasks {
                self.build_node(task, &colors.main, &colors.font, "[task] ")?;
            }
            for task in post_tasks {
                self.build_node(task, &colors.main, &colors.font, "[post_task] ")?;
            }
            if show_handlers {
                for handler in handlers {
                    self.build_node(handler, &colors.main, &colors.font, "[handler] ")?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeInit;
    use std::path::PathBuf;

    fn sample_graph() -> (PlaybookGraph, NodeRef) {
        let mut graph = PlaybookGraph::new(&PathBuf::from("site.yml"));
        let play = graph.add_play(NodeInit::new("play"), vec![]);
        (graph, play)
    }

    /// Records the order in which the contract visits nodes.
    struct RecordingBuilder<'a> {
        graph: &'a PlaybookGraph,
        display: DisplayOptions,
        events: Vec<String>,
    }

    impl PlaybookBuilder for RecordingBuilder<'_> {
        fn graph(&self) -> &PlaybookGraph {
            self.graph
        }

        fn display(&self) -> &DisplayOptions {
            &self.display
        }

        fn build_playbook(&mut self) -> Result<()> {
            Ok(())
        }

        fn build_play(&mut self, play: NodeRef) -> Result<()> {
            self.traverse_play(play)
        }

        fn build_task(
            &mut self,
            task: NodeRef,
            _color: &str,
            _font_color: &str,
            label_prefix: &str,
        ) -> Result<()> {
            self.events
                .push(format!("task:{}{}", label_prefix, self.graph.node(task).name));
            Ok(())
        }

        fn build_role(&mut self, role: NodeRef, _color: &str, _font_color: &str) -> Result<()> {
            self.events
                .push(format!("role:{}", self.graph.node(role).name));
            Ok(())
        }

        fn build_block(&mut self, block: NodeRef, _color: &str, _font_color: &str) -> Result<()> {
            self.events
                .push(format!("block:{}", self.graph.node(block).name));
            Ok(())
        }
    }

    #[test]
    fn traverse_play_follows_execution_order() {
        let (mut graph, play) = sample_graph();
        graph
            .add_task(play, Slot::PostTasks, NodeInit::new("post"))
            .unwrap();
        graph
            .add_task(play, Slot::PreTasks, NodeInit::new("pre"))
            .unwrap();
        graph
            .add_role(play, Slot::Roles, NodeInit::new("role"), false)
            .unwrap();
        graph
            .add_block(play, Slot::Tasks, NodeInit::new("block"))
            .unwrap();
        graph
            .add_task(play, Slot::Handlers, NodeInit::new("restart"))
            .unwrap();

        let mut builder = RecordingBuilder {
            graph: &graph,
            display: DisplayOptions::default(),
            events: Vec::new(),
        };
        builder.build_play(play).unwrap();
        assert_eq!(
            builder.events,
            vec!["task:[pre_task] pre", "role:role", "block:block", "task:[post_task] post"]
        );

        let mut builder = RecordingBuilder {
            graph: &graph,
            display: DisplayOptions {
                show_handlers: true,
                ..DisplayOptions::default()
            },
            events: Vec::new(),
        };
        builder.build_play(play).unwrap();
        assert_eq!(builder.events.last().unwrap(), "task:[handler] restart");
    }

    #[test]
    fn only_roles_limits_traversal_to_the_roles_slot() {
        let (mut graph, play) = sample_graph();
        graph
            .add_task(play, Slot::PreTasks, NodeInit::new("pre"))
            .unwrap();
        graph
            .add_role(play, Slot::Roles, NodeInit::new("role"), false)
            .unwrap();
        graph
            .add_block(play, Slot::Tasks, NodeInit::new("block"))
            .unwrap();
        graph
            .add_task(play, Slot::PostTasks, NodeInit::new("post"))
            .unwrap();
        graph
            .add_task(play, Slot::Handlers, NodeInit::new("restart"))
            .unwrap();

        let mut builder = RecordingBuilder {
            graph: &graph,
            display: DisplayOptions {
                only_roles: true,
                show_handlers: true,
                ..DisplayOptions::default()
            },
            events: Vec::new(),
        };
        builder.build_play(play).unwrap();
        assert_eq!(builder.events, vec!["role:role"]);
    }

    #[test]
    fn build_node_rejects_plays() {
        let (graph, play) = sample_graph();
        let mut builder = RecordingBuilder {
            graph: &graph,
            display: DisplayOptions::default(),
            events: Vec::new(),
        };
        assert!(builder.build_node(play, "black", "#ffffff", "").is_err());
    }

    #[test]
    fn default_handler_returns_plain_paths() {
        let (mut graph, play) = sample_graph();
        let task = graph
            .add_task(
                play,
                Slot::Tasks,
                NodeInit::new("task").location(NodeLocation::File {
                    path: "/src/tasks/main.yml".into(),
                    line: 12,
                    column: 3,
                }),
            )
            .unwrap();

        let formats = OpenProtocol::default().formats().unwrap();
        assert_eq!(
            formats.node_url(graph.node(task)).unwrap(),
            "/src/tasks/main.yml"
        );
    }

    #[test]
    fn vscode_handler_formats_file_and_folder_urls() {
        let (mut graph, play) = sample_graph();
        let task = graph
            .add_task(
                play,
                Slot::Tasks,
                NodeInit::new("task").location(NodeLocation::File {
                    path: "/src/tasks/main.yml".into(),
                    line: 12,
                    column: 3,
                }),
            )
            .unwrap();
        let role = graph
            .add_role(
                play,
                Slot::Roles,
                NodeInit::new("role").location(NodeLocation::Folder {
                    path: "/src/roles/web".into(),
                }),
                false,
            )
            .unwrap();

        let protocol = OpenProtocol {
            handler: OpenProtocolHandler::Vscode,
            custom_formats: None,
        };
        let formats = protocol.formats().unwrap();
        assert_eq!(
            formats.node_url(graph.node(task)).unwrap(),
            "vscode://file//src/tasks/main.yml:12:3"
        );
        assert_eq!(
            formats.node_url(graph.node(role)).unwrap(),
            "vscode://file//src/roles/web"
        );
    }

    #[test]
    fn custom_handler_strips_the_path_prefix() {
        let (mut graph, play) = sample_graph();
        let task = graph
            .add_task(
                play,
                Slot::Tasks,
                NodeInit::new("task").location(NodeLocation::File {
                    path: "/ci/workspace/tasks/main.yml".into(),
                    line: 4,
                    column: 1,
                }),
            )
            .unwrap();
        let bare = graph
            .add_task(play, Slot::Tasks, NodeInit::new("no location"))
            .unwrap();

        let protocol = OpenProtocol {
            handler: OpenProtocolHandler::Custom,
            custom_formats: Some(OpenProtocolFormats {
                file: "https://git.example.com{path}#L{line}".into(),
                folder: "https://git.example.com{path}".into(),
                remove_from_path: "/ci/workspace".into(),
            }),
        };
        let formats = protocol.formats().unwrap();
        assert_eq!(
            formats.node_url(graph.node(task)).unwrap(),
            "https://git.example.com/tasks/main.yml#L4"
        );
        assert_eq!(formats.node_url(graph.node(bare)), None);

        let missing = OpenProtocol {
            handler: OpenProtocolHandler::Custom,
            custom_formats: None,
        };
        assert!(missing.formats().is_err());
    }
}
