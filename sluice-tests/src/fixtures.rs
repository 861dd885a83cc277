//! Pre-built test data factories

use serde_json::json;
use sluice_runtime::EngineSettings;
use sluice_storage::{NewConnection, TenantId};
use std::sync::Arc;

/// Tenant fixtures. Two distinct tenants for isolation tests.
pub mod tenant {
    use super::*;

    pub fn acme() -> TenantId {
        TenantId::new("tenant-acme")
    }

    pub fn globex() -> TenantId {
        TenantId::new("tenant-globex")
    }
}

/// A minimal but valid migration AST.
pub fn simple_ast() -> serde_json::Value {
    json!({ "steps": [] })
}

/// A postgres connection ready to be created under any tenant.
pub fn postgres_connection(name: &str) -> NewConnection {
    NewConnection {
        name: name.to_string(),
        data_format: "pg".to_string(),
        host: "db.internal".to_string(),
        port: 5432,
        username: "app".to_string(),
        password: "s3cret".to_string(),
        db_name: "orders".to_string(),
    }
}

/// A mysql connection ready to be created under any tenant.
pub fn mysql_connection(name: &str) -> NewConnection {
    NewConnection {
        name: name.to_string(),
        data_format: "mysql".to_string(),
        host: "legacy.internal".to_string(),
        port: 3306,
        username: "root".to_string(),
        password: "hunter2".to_string(),
        db_name: "legacy".to_string(),
    }
}

/// Engine settings pointed at a scratch directory, with a fixed callback
/// host so tests never hit the outbound-interface heuristic.
pub fn engine_settings(temp_dir: &std::path::Path) -> EngineSettings {
    EngineSettings {
        engine_image: "sluice/engine:test".to_string(),
        temp_dir: temp_dir.to_path_buf(),
        container_cpu_limit: 1000,
        container_memory_limit: 256 * 1024 * 1024,
        callback_host: Some("127.0.0.1".to_string()),
        callback_port: 8080,
        jwt_secret: b"test-jwt-secret".to_vec(),
    }
}

/// The shared JWT secret used by [`engine_settings`].
pub fn jwt_secret() -> Arc<Vec<u8>> {
    Arc::new(b"test-jwt-secret".to_vec())
}
