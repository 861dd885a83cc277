//! Job definition lifecycle state machine
//!
//! Definitions move through `DRAFT → VALIDATING → READY`. A definition may
//! only be READY when all of name, AST, and both connection references are
//! present; autosaving any field change on a READY definition demotes it
//! back to DRAFT.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a job definition. The uppercase strings are part of
/// the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DefinitionStatus {
    #[serde(rename = "DRAFT")]
    Draft,
    #[serde(rename = "VALIDATING")]
    Validating,
    #[serde(rename = "READY")]
    Ready,
}

impl DefinitionStatus {
    /// Parse a status token, trimming and uppercasing. An empty token
    /// defaults to READY, matching the create-definition contract.
    pub fn parse(token: &str) -> crate::Result<DefinitionStatus> {
        match token.trim().to_uppercase().as_str() {
            "" | "READY" => Ok(DefinitionStatus::Ready),
            "DRAFT" => Ok(DefinitionStatus::Draft),
            "VALIDATING" => Ok(DefinitionStatus::Validating),
            other => Err(crate::Error::InvalidStatus(format!(
                "invalid job definition status {other:?}"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DefinitionStatus::Draft => "DRAFT",
            DefinitionStatus::Validating => "VALIDATING",
            DefinitionStatus::Ready => "READY",
        }
    }

    /// Whether a persisted definition may move from `self` to `to`.
    ///
    /// Autosaves keep a DRAFT in DRAFT and demote READY to DRAFT;
    /// validation takes DRAFT to VALIDATING and VALIDATING resolves to
    /// READY (or back to DRAFT when the caller rejects the result).
    pub fn can_transition_to(&self, to: DefinitionStatus) -> bool {
        use DefinitionStatus::*;

        matches!(
            (self, to),
            (Draft, Draft)
                | (Draft, Validating)
                | (Validating, Ready)
                | (Validating, Draft)
                | (Ready, Draft)
                | (Ready, Ready)
        )
    }
}

impl std::fmt::Display for DefinitionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Partial update applied to a definition: `None` leaves the persisted
/// value untouched, `Some` overrides it.
#[derive(Debug, Clone, Default)]
pub struct DefinitionUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub ast: Option<serde_json::Value>,
    pub source_connection_id: Option<String>,
    pub destination_connection_id: Option<String>,
    pub status: Option<DefinitionStatus>,
    pub progress_snapshot: Option<serde_json::Value>,
}

impl DefinitionUpdate {
    /// Whether the update changes any definition field. Used to decide if
    /// an autosave should demote a READY definition to DRAFT.
    pub fn has_changes(&self) -> bool {
        self.name.is_some()
            || self.description.is_some()
            || self.ast.is_some()
            || self.source_connection_id.is_some()
            || self.destination_connection_id.is_some()
            || self.progress_snapshot.is_some()
            || self.status.is_some()
    }
}

/// A definition's fields after overlaying a partial update on the
/// persisted values. This is what validation runs against.
#[derive(Debug, Clone, Default)]
pub struct ResolvedDefinition {
    pub name: String,
    pub description: String,
    pub ast: Option<serde_json::Value>,
    pub source_connection_id: Option<String>,
    pub destination_connection_id: Option<String>,
}

impl ResolvedDefinition {
    /// Overlay `update` on the current persisted fields.
    pub fn resolve(
        current_name: &str,
        current_description: &str,
        current_ast: Option<&serde_json::Value>,
        current_source: Option<&str>,
        current_dest: Option<&str>,
        update: &DefinitionUpdate,
    ) -> Self {
        let pick_id = |override_id: &Option<String>, current: Option<&str>| -> Option<String> {
            match override_id {
                Some(id) => {
                    let trimmed = id.trim();
                    (!trimmed.is_empty()).then(|| trimmed.to_string())
                }
                None => current
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(str::to_string),
            }
        };

        Self {
            name: update
                .name
                .as_deref()
                .unwrap_or(current_name)
                .trim()
                .to_string(),
            description: update
                .description
                .clone()
                .unwrap_or_else(|| current_description.to_string()),
            ast: update.ast.clone().or_else(|| current_ast.cloned()),
            source_connection_id: pick_id(&update.source_connection_id, current_source),
            destination_connection_id: pick_id(&update.destination_connection_id, current_dest),
        }
    }

    /// Validate the READY invariant, collecting every missing field.
    /// An empty list means the definition may become READY.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.name.trim().is_empty() {
            errors.push("name is required".to_string());
        }
        if self.ast.is_none() {
            errors.push("ast is required".to_string());
        }
        if self
            .source_connection_id
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .is_empty()
        {
            errors.push("source_connection_id is required".to_string());
        }
        if self
            .destination_connection_id
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .is_empty()
        {
            errors.push("destination_connection_id is required".to_string());
        }
        errors
    }
}

/// Returns true when the AST payload decodes to a JSON object, which is
/// the only shape the engine accepts.
pub fn ast_is_object(ast: &serde_json::Value) -> bool {
    ast.is_object()
}
