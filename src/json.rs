//! JSON output: the playbook trees dumped as a single versioned document.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::graph::{DumpOptions, PlaybookGraph};
use crate::renderer::{RenderOptions, Renderer};

/// Version of the document layout, bumped on breaking changes.
const SCHEMA_VERSION: u32 = 1;

pub struct JsonRenderer<'a> {
    playbooks: &'a mut [PlaybookGraph],
}

impl<'a> JsonRenderer<'a> {
    pub fn new(playbooks: &'a mut [PlaybookGraph]) -> Self {
        JsonRenderer { playbooks }
    }

    pub fn document(&mut self, options: &RenderOptions) -> Value {
        let dump_options = DumpOptions {
            exclude_empty_plays: options.display.hide_empty_plays,
            exclude_plays_without_roles: options.display.hide_plays_without_roles,
            include_handlers: options.display.show_handlers,
        };
        let playbooks: Vec<Value> = self
            .playbooks
            .iter_mut()
            .map(|playbook| {
                playbook.calculate_indices();
                playbook.to_value(playbook.root(), &dump_options)
            })
            .collect();
        json!({
            "version": SCHEMA_VERSION,
            "playbooks": playbooks,
        })
    }
}

impl Renderer for JsonRenderer<'_> {
    fn render(&mut self, options: &RenderOptions) -> Result<PathBuf> {
        let document = self.document(options);

        let output_path = options.output_path.with_extension("json");
        if let Some(parent) = output_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&output_path, serde_json::to_string_pretty(&document)?)
            .with_context(|| format!("failed to write {}", output_path.display()))?;
        info!(path = %output_path.display(), "JSON document written");

        if options.view {
            warn!("the view option is not supported by the JSON renderer");
        }
        Ok(output_path)
    }
}
