//! End-to-end checks: one playbook rendered through every format.

use std::fs;
use std::path::PathBuf;

use playgraph::graph::{NodeInit, PlaybookGraph, Slot};
use playgraph::graphviz::GraphvizRenderer;
use playgraph::json::JsonRenderer;
use playgraph::mermaid::MermaidRenderer;
use playgraph::renderer::{RenderOptions, Renderer};

/// A play with one pre task, a role holding two tasks, one task and two
/// post tasks.
fn sample_playbook() -> PlaybookGraph {
    let mut graph = PlaybookGraph::new(&PathBuf::from("site.yml"));
    let play = graph.add_play(NodeInit::new("deploy the web app"), vec!["web".into()]);
    graph
        .add_task(play, Slot::PreTasks, NodeInit::new("gather facts"))
        .unwrap();
    let role = graph
        .add_role(play, Slot::Roles, NodeInit::new("nginx"), false)
        .unwrap();
    graph
        .add_task(role, Slot::Tasks, NodeInit::new("install nginx"))
        .unwrap();
    graph
        .add_task(role, Slot::Tasks, NodeInit::new("write the vhost"))
        .unwrap();
    graph
        .add_task(play, Slot::Tasks, NodeInit::new("flush caches"))
        .unwrap();
    graph
        .add_task(play, Slot::PostTasks, NodeInit::new("smoke test"))
        .unwrap();
    graph
        .add_task(play, Slot::PostTasks, NodeInit::new("notify the team"))
        .unwrap();
    graph
}

#[test]
fn dot_source_covers_the_whole_tree() {
    let mut playbooks = vec![sample_playbook()];
    let mut renderer = GraphvizRenderer::new(&mut playbooks);
    let mut options = RenderOptions::new("unused");
    options.display.include_role_tasks = true;
    let source = renderer.dot_source(&options).unwrap();

    assert_eq!(source.matches("subgraph \"cluster_play_").count(), 1);
    assert_eq!(source.matches("subgraph \"cluster_role_").count(), 1);
    assert_eq!(source.matches("[pre_task] ").count(), 1);
    assert_eq!(source.matches("[post_task] ").count(), 2);
    // Six task boxes plus the play node itself.
    assert_eq!(source.matches("shape=\"box\"").count(), 7);
}

#[test]
fn mermaid_file_is_written() {
    let directory = tempfile::tempdir().unwrap();
    let mut playbooks = vec![sample_playbook()];
    let mut renderer = MermaidRenderer::new(&mut playbooks);
    let options = RenderOptions::new(directory.path().join("graphs/site"));
    let output = renderer.render(&options).unwrap();

    assert_eq!(output.extension().unwrap(), "mmd");
    let code = fs::read_to_string(&output).unwrap();
    assert!(code.contains("flowchart LR"));
    assert!(code.contains("[role] nginx"));
    assert!(code.contains("[post_task] notify the team"));
}

#[test]
fn json_document_matches_the_tree_shape() {
    let directory = tempfile::tempdir().unwrap();
    let mut playbooks = vec![sample_playbook()];
    let mut renderer = JsonRenderer::new(&mut playbooks);
    let options = RenderOptions::new(directory.path().join("site"));
    let output = renderer.render(&options).unwrap();

    assert_eq!(output.extension().unwrap(), "json");
    let document: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();

    assert_eq!(document["version"], 1);
    let play = &document["playbooks"][0]["plays"][0];
    assert_eq!(play["type"], "PlayNode");
    assert_eq!(play["hosts"][0], "web");
    assert_eq!(play["pre_tasks"].as_array().unwrap().len(), 1);
    assert_eq!(play["roles"].as_array().unwrap().len(), 1);
    assert_eq!(play["roles"][0]["tasks"].as_array().unwrap().len(), 2);
    assert_eq!(play["tasks"].as_array().unwrap().len(), 1);
    assert_eq!(play["post_tasks"].as_array().unwrap().len(), 2);
}
