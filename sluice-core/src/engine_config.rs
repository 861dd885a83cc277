//! Engine configuration builder
//!
//! The migration engine consumes a single JSON document: the definition's
//! AST with a `connections` block injected. Assembly is a pure function so
//! it can be exercised without a database or a container daemon.

use crate::connection::DataFormat;
use serde_json::{json, Map, Value};

/// A resolved connection endpoint ready to be injected into the engine
/// config. `conn_str` carries the decrypted credentials; instances of this
/// type must stay on the stack and never be persisted.
#[derive(Debug, Clone)]
pub struct EngineConnection {
    pub format: DataFormat,
    pub conn_str: String,
}

/// Merge the definition AST with the source and destination connections
/// into the config document fed to the engine container.
///
/// The AST must decode to a JSON object; both connection formats must be
/// ones the engine can execute against.
pub fn build_engine_config(
    ast: &[u8],
    source: &EngineConnection,
    dest: &EngineConnection,
) -> crate::Result<Vec<u8>> {
    let parsed: Value = serde_json::from_slice(ast)
        .map_err(|e| crate::Error::InvalidEngineConfig(format!("failed to parse AST: {e}")))?;

    let mut object: Map<String, Value> = match parsed {
        Value::Object(map) => map,
        other => {
            return Err(crate::Error::InvalidEngineConfig(format!(
                "AST must be a JSON object, got {}",
                json_type_name(&other)
            )))
        }
    };

    object.insert(
        "connections".to_string(),
        json!({
            "source": connection_block("Source", source)?,
            "dest": connection_block("Dest", dest)?,
        }),
    );

    serde_json::to_vec(&Value::Object(object))
        .map_err(|e| crate::Error::InvalidEngineConfig(format!("failed to serialize config: {e}")))
}

fn connection_block(conn_type: &str, conn: &EngineConnection) -> crate::Result<Value> {
    let format = conn.format.engine_format().ok_or_else(|| {
        crate::Error::InvalidEngineConfig(format!(
            "data format {} is not executable by the engine",
            conn.format
        ))
    })?;

    Ok(json!({
        "conn_type": conn_type,
        "format": format,
        "conn_str": conn.conn_str,
    }))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn source() -> EngineConnection {
        EngineConnection {
            format: DataFormat::Pg,
            conn_str: "postgres://u:p@src:5432/a".to_string(),
        }
    }

    fn dest() -> EngineConnection {
        EngineConnection {
            format: DataFormat::Mysql,
            conn_str: "mysql://u:p@dst:3306/b".to_string(),
        }
    }

    #[test]
    fn test_injects_connections_block() {
        let ast = serde_json::to_vec(&json!({"steps": [{"op": "copy"}]})).unwrap();
        let config = build_engine_config(&ast, &source(), &dest()).unwrap();
        let parsed: Value = serde_json::from_slice(&config).unwrap();

        assert_eq!(parsed["steps"][0]["op"], "copy");
        assert_eq!(parsed["connections"]["source"]["conn_type"], "Source");
        assert_eq!(parsed["connections"]["source"]["format"], "Postgres");
        assert_eq!(
            parsed["connections"]["source"]["conn_str"],
            "postgres://u:p@src:5432/a"
        );
        assert_eq!(parsed["connections"]["dest"]["conn_type"], "Dest");
        assert_eq!(parsed["connections"]["dest"]["format"], "MySql");
    }

    #[test]
    fn test_rejects_non_object_ast() {
        let err = build_engine_config(b"[1, 2, 3]", &source(), &dest()).unwrap_err();
        assert!(matches!(err, crate::Error::InvalidEngineConfig(_)));
        assert!(err.to_string().contains("array"));
    }

    #[test]
    fn test_rejects_invalid_json() {
        assert!(build_engine_config(b"not json", &source(), &dest()).is_err());
    }

    #[test]
    fn test_rejects_unsupported_format() {
        let csv = EngineConnection {
            format: DataFormat::Csv,
            conn_str: String::new(),
        };
        let ast = serde_json::to_vec(&json!({})).unwrap();
        assert!(build_engine_config(&ast, &csv, &dest()).is_err());
    }

    #[test]
    fn test_overwrites_existing_connections_key() {
        let ast = serde_json::to_vec(&json!({"connections": "stale"})).unwrap();
        let config = build_engine_config(&ast, &source(), &dest()).unwrap();
        let parsed: Value = serde_json::from_slice(&config).unwrap();
        assert!(parsed["connections"].is_object());
    }
}
