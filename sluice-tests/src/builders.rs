//! Type-safe builders for constructing test objects

use serde_json::json;
use sluice_storage::NewDefinition;
use uuid::Uuid;

/// Builder for `NewDefinition` payloads.
///
/// Defaults to a DRAFT with a name and nothing else; chain setters to
/// reach a READY-capable definition.
pub struct DefinitionBuilder {
    name: String,
    description: String,
    ast: Option<serde_json::Value>,
    source: Option<Uuid>,
    dest: Option<Uuid>,
    status: String,
    progress_snapshot: Option<serde_json::Value>,
}

impl DefinitionBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            ast: None,
            source: None,
            dest: None,
            status: "DRAFT".to_string(),
            progress_snapshot: None,
        }
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn ast(mut self, ast: serde_json::Value) -> Self {
        self.ast = Some(ast);
        self
    }

    pub fn simple_ast(self) -> Self {
        self.ast(json!({ "steps": [] }))
    }

    pub fn connections(mut self, source: Uuid, dest: Uuid) -> Self {
        self.source = Some(source);
        self.dest = Some(dest);
        self
    }

    pub fn status(mut self, status: &str) -> Self {
        self.status = status.to_string();
        self
    }

    pub fn progress_snapshot(mut self, snapshot: serde_json::Value) -> Self {
        self.progress_snapshot = Some(snapshot);
        self
    }

    pub fn build(self) -> NewDefinition {
        NewDefinition {
            name: self.name,
            description: self.description,
            ast: self.ast,
            source_connection_id: self.source,
            destination_connection_id: self.dest,
            status: self.status,
            progress_snapshot: self.progress_snapshot,
        }
    }
}
