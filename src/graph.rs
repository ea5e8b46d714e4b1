//! The playbook node model: an arena-backed tree of typed nodes with stable
//! ids, slot-based composition, positional indices and the derived structures
//! used by the renderers (links and role usage).

use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::path::Path;

use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::utils::{generate_id, play_colors};

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("the composition '{slot}' is not supported by {kind}. Supported: {supported}")]
    UnsupportedComposition {
        slot: Slot,
        kind: &'static str,
        supported: String,
    },
    #[error("task node '{id}' cannot contain other nodes")]
    NotComposite { id: String },
    #[error("no ancestor of kind {kind} found for node '{id}'")]
    AncestorNotFound { kind: &'static str, id: String },
}

/// The compositions a composite node can own. Which slots are declared
/// depends on the node kind, see [`NodeType::declared_slots`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Plays,
    PreTasks,
    Roles,
    Tasks,
    PostTasks,
    Handlers,
}

impl Slot {
    pub fn as_str(self) -> &'static str {
        match self {
            Slot::Plays => "plays",
            Slot::PreTasks => "pre_tasks",
            Slot::Roles => "roles",
            Slot::Tasks => "tasks",
            Slot::PostTasks => "post_tasks",
            Slot::Handlers => "handlers",
        }
    }
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discriminant of the node kinds, used for type queries and dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    Playbook,
    Play,
    Role,
    Block,
    Task,
}

impl NodeType {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeType::Playbook => "PlaybookNode",
            NodeType::Play => "PlayNode",
            NodeType::Role => "RoleNode",
            NodeType::Block => "BlockNode",
            NodeType::Task => "TaskNode",
        }
    }

    pub fn id_prefix(self) -> &'static str {
        match self {
            NodeType::Playbook => "playbook_",
            NodeType::Play => "play_",
            NodeType::Role => "role_",
            NodeType::Block => "block_",
            NodeType::Task => "task_",
        }
    }

    /// Slots in declaration order. The declaration order drives index
    /// assignment and the links structure.
    pub fn declared_slots(self) -> &'static [Slot] {
        match self {
            NodeType::Playbook => &[Slot::Plays],
            NodeType::Play => &[
                Slot::PreTasks,
                Slot::Roles,
                Slot::Tasks,
                Slot::PostTasks,
                Slot::Handlers,
            ],
            NodeType::Role => &[Slot::Tasks, Slot::Handlers],
            NodeType::Block => &[Slot::Tasks],
            NodeType::Task => &[],
        }
    }
}

/// Where a node comes from: either a precise position in a file, or a folder
/// (statically invoked roles point at their directory).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NodeLocation {
    File { path: String, line: u32, column: u32 },
    Folder { path: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayColors {
    pub main: String,
    pub font: String,
}

impl Default for PlayColors {
    fn default() -> Self {
        PlayColors {
            main: "black".to_string(),
            font: crate::utils::PLAY_FONT_COLOR.to_string(),
        }
    }
}

/// Handle to a node inside a [`PlaybookGraph`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeRef(usize);

#[derive(Debug)]
enum NodeKind {
    Playbook {
        plays: Vec<NodeRef>,
    },
    Play {
        hosts: Vec<String>,
        colors: PlayColors,
        pre_tasks: Vec<NodeRef>,
        roles: Vec<NodeRef>,
        tasks: Vec<NodeRef>,
        post_tasks: Vec<NodeRef>,
        handlers: Vec<NodeRef>,
    },
    Role {
        include_role: bool,
        has_loop: bool,
        tasks: Vec<NodeRef>,
        handlers: Vec<NodeRef>,
    },
    Block {
        tasks: Vec<NodeRef>,
    },
    Task {
        is_handler: bool,
        has_loop: bool,
    },
}

impl NodeKind {
    fn node_type(&self) -> NodeType {
        match self {
            NodeKind::Playbook { .. } => NodeType::Playbook,
            NodeKind::Play { .. } => NodeType::Play,
            NodeKind::Role { .. } => NodeType::Role,
            NodeKind::Block { .. } => NodeType::Block,
            NodeKind::Task { .. } => NodeType::Task,
        }
    }

    fn slot(&self, slot: Slot) -> Option<&Vec<NodeRef>> {
        match (self, slot) {
            (NodeKind::Playbook { plays }, Slot::Plays) => Some(plays),
            (NodeKind::Play { pre_tasks, .. }, Slot::PreTasks) => Some(pre_tasks),
            (NodeKind::Play { roles, .. }, Slot::Roles) => Some(roles),
            (NodeKind::Play { tasks, .. }, Slot::Tasks) => Some(tasks),
            (NodeKind::Play { post_tasks, .. }, Slot::PostTasks) => Some(post_tasks),
            (NodeKind::Play { handlers, .. }, Slot::Handlers) => Some(handlers),
            (NodeKind::Role { tasks, .. }, Slot::Tasks) => Some(tasks),
            (NodeKind::Role { handlers, .. }, Slot::Handlers) => Some(handlers),
            (NodeKind::Block { tasks }, Slot::Tasks) => Some(tasks),
            _ => None,
        }
    }

    fn slot_mut(&mut self, slot: Slot) -> Option<&mut Vec<NodeRef>> {
        match (self, slot) {
            (NodeKind::Playbook { plays }, Slot::Plays) => Some(plays),
            (NodeKind::Play { pre_tasks, .. }, Slot::PreTasks) => Some(pre_tasks),
            (NodeKind::Play { roles, .. }, Slot::Roles) => Some(roles),
            (NodeKind::Play { tasks, .. }, Slot::Tasks) => Some(tasks),
            (NodeKind::Play { post_tasks, .. }, Slot::PostTasks) => Some(post_tasks),
            (NodeKind::Play { handlers, .. }, Slot::Handlers) => Some(handlers),
            (NodeKind::Role { tasks, .. }, Slot::Tasks) => Some(tasks),
            (NodeKind::Role { handlers, .. }, Slot::Handlers) => Some(handlers),
            (NodeKind::Block { tasks }, Slot::Tasks) => Some(tasks),
            _ => None,
        }
    }
}

/// A single node of the tree. Two nodes are equal iff their ids are equal;
/// the id is also the sole hash key.
#[derive(Debug)]
pub struct NodeData {
    pub id: String,
    pub name: String,
    pub when: String,
    pub parent: Option<NodeRef>,
    pub location: Option<NodeLocation>,
    /// 1-based position among the siblings of the owning composite, assigned
    /// by [`PlaybookGraph::calculate_indices`]. None until computed.
    pub index: Option<usize>,
    kind: NodeKind,
}

impl NodeData {
    pub fn node_type(&self) -> NodeType {
        self.kind.node_type()
    }
}

impl PartialEq for NodeData {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for NodeData {}

impl Hash for NodeData {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Attributes shared by every new node. The id is generated with the kind
/// prefix when not supplied by the upstream parser.
#[derive(Debug, Clone, Default)]
pub struct NodeInit {
    pub name: String,
    pub id: Option<String>,
    pub when: String,
    pub location: Option<NodeLocation>,
}

impl NodeInit {
    pub fn new(name: &str) -> Self {
        NodeInit {
            name: name.to_string(),
            ..NodeInit::default()
        }
    }

    pub fn id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn when(mut self, when: &str) -> Self {
        self.when = when.to_string();
        self
    }

    pub fn location(mut self, location: NodeLocation) -> Self {
        self.location = Some(location);
        self
    }
}

/// Options for the lossy structural dump produced by
/// [`PlaybookGraph::to_value`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DumpOptions {
    pub exclude_empty_plays: bool,
    pub exclude_plays_without_roles: bool,
    pub include_handlers: bool,
}

/// One playbook tree. The arena owns every node; [`NodeRef`]s address them
/// and `parent` back references never own anything.
#[derive(Debug)]
pub struct PlaybookGraph {
    nodes: Vec<NodeData>,
    root: NodeRef,
}

impl PlaybookGraph {
    /// Create a graph whose root playbook node points at the given source
    /// file. The playbook location is the start of that file.
    pub fn new(playbook_path: &Path) -> Self {
        let name = playbook_path.display().to_string();
        let root = NodeData {
            id: generate_id(NodeType::Playbook.id_prefix()),
            name,
            when: String::new(),
            parent: None,
            location: Some(NodeLocation::File {
                path: playbook_path.display().to_string(),
                line: 1,
                column: 1,
            }),
            index: None,
            kind: NodeKind::Playbook { plays: Vec::new() },
        };
        PlaybookGraph {
            nodes: vec![root],
            root: NodeRef(0),
        }
    }

    pub fn root(&self) -> NodeRef {
        self.root
    }

    pub fn node(&self, node: NodeRef) -> &NodeData {
        &self.nodes[node.0]
    }

    pub fn node_type(&self, node: NodeRef) -> NodeType {
        self.nodes[node.0].node_type()
    }

    /// Direct children in the given slot; empty for undeclared slots.
    pub fn children(&self, node: NodeRef, slot: Slot) -> &[NodeRef] {
        self.nodes[node.0]
            .kind
            .slot(slot)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Direct children across all declared slots, slot-declaration order
    /// first, then insertion order. This ordering is the display/execution
    /// order and drives both index assignment and the links structure.
    pub fn ordered_children(&self, node: NodeRef) -> Vec<NodeRef> {
        let mut children = Vec::new();
        for slot in self.node_type(node).declared_slots() {
            children.extend_from_slice(self.children(node, *slot));
        }
        children
    }

    pub fn hosts(&self, node: NodeRef) -> &[String] {
        match &self.nodes[node.0].kind {
            NodeKind::Play { hosts, .. } => hosts,
            _ => &[],
        }
    }

    pub fn play_colors(&self, node: NodeRef) -> Option<&PlayColors> {
        match &self.nodes[node.0].kind {
            NodeKind::Play { colors, .. } => Some(colors),
            _ => None,
        }
    }

    pub fn include_role(&self, node: NodeRef) -> bool {
        matches!(
            self.nodes[node.0].kind,
            NodeKind::Role {
                include_role: true,
                ..
            }
        )
    }

    pub fn is_handler(&self, node: NodeRef) -> bool {
        matches!(
            self.nodes[node.0].kind,
            NodeKind::Task {
                is_handler: true,
                ..
            }
        )
    }

    /// Whether a loop construct is attached to the node. Roles only report a
    /// loop when they are a dynamic inclusion.
    pub fn has_loop(&self, node: NodeRef) -> bool {
        match self.nodes[node.0].kind {
            NodeKind::Task { has_loop, .. } => has_loop,
            NodeKind::Role {
                has_loop,
                include_role,
                ..
            } => include_role && has_loop,
            _ => false,
        }
    }

    /// Add a play under the root playbook.
    pub fn add_play(&mut self, init: NodeInit, hosts: Vec<String>) -> NodeRef {
        let id = init
            .id
            .clone()
            .unwrap_or_else(|| generate_id(NodeType::Play.id_prefix()));
        let colors = play_colors(&id);
        let kind = NodeKind::Play {
            hosts,
            colors,
            pre_tasks: Vec::new(),
            roles: Vec::new(),
            tasks: Vec::new(),
            post_tasks: Vec::new(),
            handlers: Vec::new(),
        };
        let root = self.root;
        self.attach(root, Slot::Plays, init, Some(id), kind)
            .expect("the root playbook always declares the plays slot")
    }

    pub fn add_role(
        &mut self,
        parent: NodeRef,
        slot: Slot,
        init: NodeInit,
        include_role: bool,
    ) -> Result<NodeRef, GraphError> {
        let kind = NodeKind::Role {
            include_role,
            has_loop: false,
            tasks: Vec::new(),
            handlers: Vec::new(),
        };
        self.attach(parent, slot, init, None, kind)
    }

    pub fn add_block(
        &mut self,
        parent: NodeRef,
        slot: Slot,
        init: NodeInit,
    ) -> Result<NodeRef, GraphError> {
        let kind = NodeKind::Block { tasks: Vec::new() };
        self.attach(parent, slot, init, None, kind)
    }

    /// Add a task. The task is flagged as a handler when it lands in a
    /// handlers slot or carries a handler-prefixed id.
    pub fn add_task(
        &mut self,
        parent: NodeRef,
        slot: Slot,
        init: NodeInit,
    ) -> Result<NodeRef, GraphError> {
        let resolved = self.resolve_slot(parent, slot)?;
        let prefix = if resolved == Slot::Handlers {
            "handler_"
        } else {
            NodeType::Task.id_prefix()
        };
        let id = init.id.clone().unwrap_or_else(|| generate_id(prefix));
        let is_handler = resolved == Slot::Handlers || id.starts_with("handler_");
        let kind = NodeKind::Task {
            is_handler,
            has_loop: false,
        };
        self.attach(parent, resolved, init, Some(id), kind)
    }

    pub fn set_loop(&mut self, node: NodeRef, value: bool) {
        match &mut self.nodes[node.0].kind {
            NodeKind::Task { has_loop, .. } | NodeKind::Role { has_loop, .. } => {
                *has_loop = value;
            }
            _ => {}
        }
    }

    /// Resolve the requested slot against the parent's insertion rules:
    /// blocks route everything to `tasks`, roles route everything but
    /// `handlers` to `tasks`, other composites only accept declared slots.
    fn resolve_slot(&self, parent: NodeRef, slot: Slot) -> Result<Slot, GraphError> {
        let node = &self.nodes[parent.0];
        match node.kind {
            NodeKind::Block { .. } => Ok(Slot::Tasks),
            NodeKind::Role { .. } => {
                if slot == Slot::Handlers {
                    Ok(Slot::Handlers)
                } else {
                    Ok(Slot::Tasks)
                }
            }
            NodeKind::Task { .. } => Err(GraphError::NotComposite {
                id: node.id.clone(),
            }),
            NodeKind::Playbook { .. } | NodeKind::Play { .. } => {
                let declared = node.node_type().declared_slots();
                if declared.contains(&slot) {
                    Ok(slot)
                } else {
                    Err(GraphError::UnsupportedComposition {
                        slot,
                        kind: node.node_type().as_str(),
                        supported: declared
                            .iter()
                            .map(|s| s.as_str())
                            .collect::<Vec<_>>()
                            .join(", "),
                    })
                }
            }
        }
    }

    fn attach(
        &mut self,
        parent: NodeRef,
        slot: Slot,
        init: NodeInit,
        id: Option<String>,
        kind: NodeKind,
    ) -> Result<NodeRef, GraphError> {
        let resolved = self.resolve_slot(parent, slot)?;
        let id = id
            .or(init.id)
            .unwrap_or_else(|| generate_id(kind.node_type().id_prefix()));
        let node = NodeData {
            id,
            name: init.name,
            when: init.when,
            parent: Some(parent),
            location: init.location,
            index: None,
            kind,
        };
        let node_ref = NodeRef(self.nodes.len());
        self.nodes.push(node);
        self.nodes[parent.0]
            .kind
            .slot_mut(resolved)
            .expect("resolved slot is always declared")
            .push(node_ref);
        Ok(node_ref)
    }

    /// Assign 1-based indices to the direct children of every composite,
    /// slot-declaration order then insertion order, recursively from the
    /// root. Indices restart at 1 for each composite. Idempotent.
    pub fn calculate_indices(&mut self) {
        self.assign_indices(self.root);
    }

    fn assign_indices(&mut self, node: NodeRef) {
        let children = self.ordered_children(node);
        for (position, child) in children.iter().enumerate() {
            self.nodes[child.0].index = Some(position + 1);
        }
        for child in children {
            self.assign_indices(child);
        }
    }

    /// True iff every declared slot of the node is empty. Non-recursive: a
    /// play holding an empty role is not empty, its roles slot is occupied.
    pub fn is_empty(&self, node: NodeRef) -> bool {
        self.node_type(node)
            .declared_slots()
            .iter()
            .all(|slot| self.children(node, *slot).is_empty())
    }

    /// Depth-first search over all slots for nodes of the given type.
    pub fn get_all_of_type(&self, node: NodeRef, node_type: NodeType) -> Vec<NodeRef> {
        let mut found = Vec::new();
        self.collect_of_type(node, node_type, &mut found);
        found
    }

    fn collect_of_type(&self, node: NodeRef, node_type: NodeType, found: &mut Vec<NodeRef>) {
        for child in self.ordered_children(node) {
            if self.node_type(child) == node_type {
                found.push(child);
            }
            self.collect_of_type(child, node_type, found);
        }
    }

    /// Every task below the node, display order.
    pub fn get_all_tasks(&self, node: NodeRef) -> Vec<NodeRef> {
        self.get_all_of_type(node, NodeType::Task)
    }

    /// True iff any transitive descendant is of the given type.
    pub fn has_node_type(&self, node: NodeRef, node_type: NodeType) -> bool {
        self.ordered_children(node).iter().any(|child| {
            self.node_type(*child) == node_type || self.has_node_type(*child, node_type)
        })
    }

    /// Walk the parent back references until a node of the given type is
    /// found. The tree shape must guarantee the ancestor exists.
    pub fn first_ancestor_of_type(
        &self,
        node: NodeRef,
        node_type: NodeType,
    ) -> Result<NodeRef, GraphError> {
        let mut current = self.nodes[node.0].parent;
        while let Some(ancestor) = current {
            if self.node_type(ancestor) == node_type {
                return Ok(ancestor);
            }
            current = self.nodes[ancestor.0].parent;
        }
        Err(GraphError::AncestorNotFound {
            kind: node_type.as_str(),
            id: self.nodes[node.0].id.clone(),
        })
    }

    /// The plays of the root playbook, optionally filtered. Filtering never
    /// mutates the tree.
    pub fn plays(&self, exclude_empty: bool, exclude_without_roles: bool) -> Vec<NodeRef> {
        self.children(self.root, Slot::Plays)
            .iter()
            .copied()
            .filter(|play| !exclude_empty || !self.is_empty(*play))
            .filter(|play| !exclude_without_roles || self.has_node_type(*play, NodeType::Role))
            .collect()
    }

    /// Map from every composite below `node` (itself included) to its direct
    /// children across all slots. Composites without children get no entry.
    /// Used for diagram interactivity only.
    pub fn links_structure(&self, node: NodeRef) -> HashMap<NodeRef, Vec<NodeRef>> {
        let mut links = HashMap::new();
        self.collect_links(node, &mut links);
        links
    }

    fn collect_links(&self, node: NodeRef, links: &mut HashMap<NodeRef, Vec<NodeRef>>) {
        let children = self.ordered_children(node);
        if children.is_empty() {
            return;
        }
        for child in &children {
            self.collect_links(*child, links);
        }
        links.insert(node, children);
    }

    /// For each role in the playbook, the distinct plays that reference it,
    /// directly or through any nesting. A role reached inside a block still
    /// attributes to the nearest enclosing play. Keyed by role id: two
    /// references to the same role are the same node by the id-equality
    /// invariant, even when they sit at different tree positions.
    pub fn roles_usage(&self) -> HashMap<String, HashSet<NodeRef>> {
        let mut usages: HashMap<String, HashSet<NodeRef>> = HashMap::new();
        for (node, children) in self.links_structure(self.root) {
            for child in children {
                if self.node_type(child) != NodeType::Role {
                    continue;
                }
                let play = if self.node_type(node) == NodeType::Play {
                    Ok(node)
                } else {
                    self.first_ancestor_of_type(node, NodeType::Play)
                };
                if let Ok(play) = play {
                    usages
                        .entry(self.nodes[child.0].id.clone())
                        .or_default()
                        .insert(play);
                }
            }
        }
        usages
    }

    /// Lossy, display-oriented dump of the subtree rooted at `node`. Not
    /// meant to round-trip back into a graph.
    pub fn to_value(&self, node: NodeRef, options: &DumpOptions) -> Value {
        let data = &self.nodes[node.0];
        let mut map = Map::new();
        map.insert("type".into(), json!(data.node_type().as_str()));
        map.insert("id".into(), json!(data.id));
        map.insert("name".into(), json!(data.name));
        map.insert("when".into(), json!(data.when));
        map.insert("index".into(), json!(data.index));
        map.insert(
            "location".into(),
            serde_json::to_value(&data.location).unwrap_or(Value::Null),
        );

        match &data.kind {
            NodeKind::Playbook { .. } => {
                let plays: Vec<Value> = self
                    .plays(
                        options.exclude_empty_plays,
                        options.exclude_plays_without_roles,
                    )
                    .into_iter()
                    .map(|play| self.to_value(play, options))
                    .collect();
                map.insert("plays".into(), Value::Array(plays));
            }
            NodeKind::Play { hosts, colors, .. } => {
                map.insert("hosts".into(), json!(hosts));
                map.insert("colors".into(), json!(colors));
                self.dump_slots(node, options, &mut map);
            }
            NodeKind::Role { include_role, .. } => {
                map.insert("include_role".into(), json!(include_role));
                self.dump_slots(node, options, &mut map);
            }
            NodeKind::Block { .. } => {
                self.dump_slots(node, options, &mut map);
            }
            NodeKind::Task { .. } => {}
        }

        Value::Object(map)
    }

    fn dump_slots(&self, node: NodeRef, options: &DumpOptions, map: &mut Map<String, Value>) {
        for slot in self.node_type(node).declared_slots() {
            if *slot == Slot::Handlers && !options.include_handlers {
                continue;
            }
            let children: Vec<Value> = self
                .children(node, *slot)
                .iter()
                .map(|child| self.to_value(*child, options))
                .collect();
            map.insert(slot.as_str().into(), Value::Array(children));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::path::PathBuf;

    fn empty_graph() -> PlaybookGraph {
        PlaybookGraph::new(&PathBuf::from("site.yml"))
    }

    #[test]
    fn nodes_are_equal_iff_ids_match() {
        let mut graph = empty_graph();
        let play = graph.add_play(NodeInit::new("play 1").id("play_aaaa0000"), vec![]);
        let task = graph
            .add_task(play, Slot::Tasks, NodeInit::new("play 1").id("task_bbbb0000"))
            .unwrap();

        assert_ne!(graph.node(play), graph.node(task));

        let mut other = empty_graph();
        let twin = other.add_play(NodeInit::new("another name").id("play_aaaa0000"), vec![]);
        assert_eq!(graph.node(play), other.node(twin));

        let hash = |node: &NodeData| {
            let mut hasher = DefaultHasher::new();
            node.hash(&mut hasher);
            hasher.finish()
        };
        assert_eq!(hash(graph.node(play)), hash(other.node(twin)));
    }

    #[test]
    fn undeclared_slot_is_rejected() {
        let mut graph = empty_graph();
        let play = graph.add_play(NodeInit::new("play"), vec![]);

        let err = graph
            .add_task(play, Slot::Plays, NodeInit::new("task"))
            .unwrap_err();
        assert!(matches!(
            err,
            GraphError::UnsupportedComposition {
                slot: Slot::Plays,
                ..
            }
        ));

        let root = graph.root();
        assert!(graph
            .add_task(root, Slot::Tasks, NodeInit::new("task"))
            .is_err());
    }

    #[test]
    fn block_redirects_every_slot_to_tasks() {
        let mut graph = empty_graph();
        let play = graph.add_play(NodeInit::new("play"), vec![]);
        let block = graph
            .add_block(play, Slot::PreTasks, NodeInit::new("block"))
            .unwrap();

        graph
            .add_task(block, Slot::PostTasks, NodeInit::new("task 1"))
            .unwrap();
        graph
            .add_task(block, Slot::Handlers, NodeInit::new("task 2"))
            .unwrap();

        assert_eq!(graph.children(block, Slot::Tasks).len(), 2);
    }

    #[test]
    fn role_redirects_non_handlers_to_tasks() {
        let mut graph = empty_graph();
        let play = graph.add_play(NodeInit::new("play"), vec![]);
        let role = graph
            .add_role(play, Slot::Roles, NodeInit::new("role"), false)
            .unwrap();

        graph
            .add_task(role, Slot::PreTasks, NodeInit::new("task"))
            .unwrap();
        let handler = graph
            .add_task(role, Slot::Handlers, NodeInit::new("restart service"))
            .unwrap();

        assert_eq!(graph.children(role, Slot::Tasks).len(), 1);
        assert_eq!(graph.children(role, Slot::Handlers), &[handler]);
        assert!(graph.is_handler(handler));
        assert!(graph.node(handler).id.starts_with("handler_"));
    }

    #[test]
    fn is_empty_is_not_recursive() {
        let mut graph = empty_graph();
        let play = graph.add_play(NodeInit::new("play"), vec![]);
        assert!(graph.is_empty(play));

        // An empty role still occupies the roles slot.
        let role = graph
            .add_role(play, Slot::Roles, NodeInit::new("role"), false)
            .unwrap();
        assert!(!graph.is_empty(play));
        assert!(graph.is_empty(role));
    }

    #[test]
    fn indices_follow_slot_declaration_then_insertion_order() {
        let mut graph = empty_graph();
        let play = graph.add_play(NodeInit::new("play"), vec![]);
        // Inserted out of slot order on purpose.
        let post = graph
            .add_task(play, Slot::PostTasks, NodeInit::new("post"))
            .unwrap();
        let pre = graph
            .add_task(play, Slot::PreTasks, NodeInit::new("pre"))
            .unwrap();
        let role = graph
            .add_role(play, Slot::Roles, NodeInit::new("role"), false)
            .unwrap();
        let role_task_1 = graph
            .add_task(role, Slot::Tasks, NodeInit::new("role task 1"))
            .unwrap();
        let role_task_2 = graph
            .add_task(role, Slot::Tasks, NodeInit::new("role task 2"))
            .unwrap();

        graph.calculate_indices();

        assert_eq!(graph.node(play).index, Some(1));
        assert_eq!(graph.node(pre).index, Some(1));
        assert_eq!(graph.node(role).index, Some(2));
        assert_eq!(graph.node(post).index, Some(3));
        // Indices restart at 1 inside the role.
        assert_eq!(graph.node(role_task_1).index, Some(1));
        assert_eq!(graph.node(role_task_2).index, Some(2));

        // Idempotent.
        graph.calculate_indices();
        assert_eq!(graph.node(role).index, Some(2));
    }

    #[test]
    fn links_structure_maps_composites_to_ordered_children() {
        let mut graph = empty_graph();
        let play = graph.add_play(NodeInit::new("play"), vec![]);
        let role = graph
            .add_role(play, Slot::Roles, NodeInit::new("role"), false)
            .unwrap();
        let task_1 = graph
            .add_task(role, Slot::Tasks, NodeInit::new("task 1"))
            .unwrap();
        let task_2 = graph
            .add_task(role, Slot::Tasks, NodeInit::new("task 2"))
            .unwrap();
        let task_3 = graph
            .add_task(play, Slot::Tasks, NodeInit::new("task 3"))
            .unwrap();

        let links = graph.links_structure(play);
        assert_eq!(links.len(), 2);
        assert_eq!(links[&play], vec![role, task_3]);
        assert_eq!(links[&role], vec![task_1, task_2]);

        assert_eq!(graph.get_all_tasks(play), vec![task_1, task_2, task_3]);
    }

    #[test]
    fn roles_usage_attributes_to_the_nearest_play() {
        let mut graph = empty_graph();
        let play_a = graph.add_play(NodeInit::new("play a"), vec![]);
        let play_b = graph.add_play(NodeInit::new("play b"), vec![]);

        let shared_id = "role_5f5f5f5f";
        graph
            .add_role(play_a, Slot::Roles, NodeInit::new("shared").id(shared_id), false)
            .unwrap();
        // Referenced from play b through a block.
        let block = graph
            .add_block(play_b, Slot::Tasks, NodeInit::new("block"))
            .unwrap();
        graph
            .add_role(block, Slot::Tasks, NodeInit::new("shared").id(shared_id), false)
            .unwrap();

        let usage = graph.roles_usage();
        assert_eq!(usage[shared_id], HashSet::from([play_a, play_b]));

        // Referenced twice within the same play: set semantics.
        let mut graph = empty_graph();
        let play = graph.add_play(NodeInit::new("play"), vec![]);
        graph
            .add_role(play, Slot::Roles, NodeInit::new("twice").id("role_aa11bb22"), false)
            .unwrap();
        let block = graph
            .add_block(play, Slot::Tasks, NodeInit::new("block"))
            .unwrap();
        graph
            .add_role(block, Slot::Tasks, NodeInit::new("twice").id("role_aa11bb22"), false)
            .unwrap();
        let usage = graph.roles_usage();
        assert_eq!(usage["role_aa11bb22"], HashSet::from([play]));
    }

    #[test]
    fn has_node_type_searches_transitively() {
        let mut graph = empty_graph();
        let play = graph.add_play(NodeInit::new("play"), vec![]);
        let block = graph
            .add_block(play, Slot::Tasks, NodeInit::new("block"))
            .unwrap();
        assert!(!graph.has_node_type(play, NodeType::Role));

        graph
            .add_role(block, Slot::Tasks, NodeInit::new("role"), true)
            .unwrap();
        assert!(graph.has_node_type(play, NodeType::Role));
        assert_eq!(graph.get_all_of_type(play, NodeType::Role).len(), 1);
    }

    #[test]
    fn ancestor_lookup_fails_on_inconsistent_shape() {
        let mut graph = empty_graph();
        let play = graph.add_play(NodeInit::new("play"), vec![]);
        let task = graph
            .add_task(play, Slot::Tasks, NodeInit::new("task"))
            .unwrap();

        assert_eq!(
            graph.first_ancestor_of_type(task, NodeType::Play).unwrap(),
            play
        );
        assert!(matches!(
            graph.first_ancestor_of_type(play, NodeType::Role),
            Err(GraphError::AncestorNotFound { .. })
        ));
    }

    #[test]
    fn dump_filters_plays_without_mutating_the_tree() {
        let mut graph = empty_graph();
        let empty_play = graph.add_play(NodeInit::new("empty"), vec![]);
        let full_play = graph.add_play(NodeInit::new("full"), vec!["web".into()]);
        graph
            .add_task(full_play, Slot::Tasks, NodeInit::new("task"))
            .unwrap();
        graph.calculate_indices();

        let root = graph.root();
        let filtered = graph.to_value(
            root,
            &DumpOptions {
                exclude_empty_plays: true,
                ..DumpOptions::default()
            },
        );
        let plays = filtered["plays"].as_array().unwrap();
        assert_eq!(plays.len(), 1);
        assert_eq!(plays[0]["name"], "full");
        assert_eq!(plays[0]["type"], "PlayNode");
        assert_eq!(plays[0]["hosts"][0], "web");
        assert!(plays[0]["colors"]["main"].is_string());

        // The tree itself keeps both plays.
        assert_eq!(graph.children(root, Slot::Plays).len(), 2);
        assert!(graph.is_empty(empty_play));

        let full = graph.to_value(root, &DumpOptions::default());
        assert_eq!(full["plays"].as_array().unwrap().len(), 2);
        assert_eq!(full["type"], "PlaybookNode");
        assert_eq!(full["location"]["type"], "file");
        assert_eq!(full["location"]["line"], 1);
    }

    #[test]
    fn dump_hides_handlers_unless_requested() {
        let mut graph = empty_graph();
        let play = graph.add_play(NodeInit::new("play"), vec![]);
        graph
            .add_task(play, Slot::Handlers, NodeInit::new("restart"))
            .unwrap();
        graph.calculate_indices();

        let root = graph.root();
        let without = graph.to_value(root, &DumpOptions::default());
        assert!(without["plays"][0].get("handlers").is_none());

        let with = graph.to_value(
            root,
            &DumpOptions {
                include_handlers: true,
                ..DumpOptions::default()
            },
        );
        assert_eq!(with["plays"][0]["handlers"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn loops_only_report_on_dynamic_role_inclusions() {
        let mut graph = empty_graph();
        let play = graph.add_play(NodeInit::new("play"), vec![]);
        let static_role = graph
            .add_role(play, Slot::Roles, NodeInit::new("static"), false)
            .unwrap();
        let include = graph
            .add_role(play, Slot::Tasks, NodeInit::new("dynamic"), true)
            .unwrap();
        graph.set_loop(static_role, true);
        graph.set_loop(include, true);

        assert!(!graph.has_loop(static_role));
        assert!(graph.has_loop(include));
    }
}
