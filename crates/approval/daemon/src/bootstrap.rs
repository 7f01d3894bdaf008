//! Wiring the engine from configuration, and the instance snapshot file

use anyhow::Context;
use approval_engine::{
    ApprovalEngine, Directory, EngineConfig, InMemoryDirectory, InMemoryInstanceStore,
    InstanceStore, LoggingNotifier, OpenDirectory, UserRecord,
};
use approval_types::WorkflowInstance;
use std::path::Path;
use std::sync::Arc;

/// Parse a JSON array of directory entries
pub fn parse_users(json: &str) -> anyhow::Result<Vec<UserRecord>> {
    let users: Vec<UserRecord> =
        serde_json::from_str(json).context("users file is not a JSON array of user records")?;
    Ok(users)
}

pub fn load_users(path: &Path) -> anyhow::Result<Vec<UserRecord>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read users file {}", path.display()))?;
    parse_users(&json)
}

/// Parse a JSON array of workflow instances
pub fn parse_instances(json: &str) -> anyhow::Result<Vec<WorkflowInstance>> {
    let instances: Vec<WorkflowInstance> = serde_json::from_str(json)
        .context("instances file is not a JSON array of workflow instances")?;
    Ok(instances)
}

/// Read the instance snapshot; a missing file is an empty store
pub fn load_instances(path: &Path) -> anyhow::Result<Vec<WorkflowInstance>> {
    if !path.exists() {
        tracing::info!(path = %path.display(), "No instance snapshot yet, starting empty");
        return Ok(Vec::new());
    }
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read instances file {}", path.display()))?;
    parse_instances(&json)
}

/// Write every instance the engine holds back to the snapshot file.
///
/// The file is replaced through a rename so a crash mid-write keeps the
/// previous snapshot.
pub async fn save_instances(engine: &ApprovalEngine, path: &Path) -> anyhow::Result<usize> {
    let mut instances = engine.instances().await?;
    instances.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

    let json = serde_json::to_string_pretty(&instances)?;
    let staging = path.with_extension("tmp");
    std::fs::write(&staging, json)
        .with_context(|| format!("failed to write {}", staging.display()))?;
    std::fs::rename(&staging, path)
        .with_context(|| format!("failed to replace {}", path.display()))?;

    tracing::info!(path = %path.display(), instances = instances.len(), "Instance snapshot saved");
    Ok(instances.len())
}

/// Build an in-memory engine seeded with `instances`.
///
/// Without a user list every identifier is accepted as an active user.
pub async fn build_engine(
    config: &EngineConfig,
    users: Option<Vec<UserRecord>>,
    instances: Vec<WorkflowInstance>,
) -> anyhow::Result<Arc<ApprovalEngine>> {
    let directory: Arc<dyn Directory> = match users {
        Some(users) => {
            tracing::info!(users = users.len(), "Using static user directory");
            Arc::new(InMemoryDirectory::with_users(users))
        }
        None => {
            tracing::warn!("No users file given, accepting every user identifier");
            Arc::new(OpenDirectory)
        }
    };

    let store = InMemoryInstanceStore::new();
    for instance in instances {
        let id = instance.id.clone();
        store
            .insert(instance)
            .await
            .with_context(|| format!("failed to restore instance {}", id))?;
    }
    tracing::info!(instances = store.len().await, "Instance store restored");

    let engine = ApprovalEngine::new(Arc::new(store), directory, Arc::new(LoggingNotifier))
        .with_store_config(&config.store);

    Ok(Arc::new(engine))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approval_engine::{ExpirySweeper, StateMachine};
    use approval_types::*;
    use chrono::{Duration, Utc};

    fn scratch_file(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("approvald-{}-{}.json", name, WorkflowInstanceId::generate()))
    }

    fn overdue_instance() -> WorkflowInstance {
        let sm = StateMachine::new();
        let def = WorkflowDefinition::sequential(
            DocumentRef::new("deed-9"),
            [UserId::new("ana"), UserId::new("rui")],
            3600,
        );
        let opened = Utc::now() - Duration::hours(2);
        let mut inst = sm.create(def, UserId::new("req"), opened).unwrap();
        sm.activate(&mut inst, opened).unwrap();
        inst
    }

    #[test]
    fn test_parse_users() {
        let users = parse_users(
            r#"[
                {"id": "ana", "display_name": "Ana Souza", "contact": "ana@example.com"},
                {"id": "rui", "display_name": "Rui Costa", "enabled": false}
            ]"#,
        )
        .unwrap();
        assert_eq!(users.len(), 2);
        assert!(users[0].enabled);
        assert!(!users[1].enabled);
        assert_eq!(users[1].contact, "");
    }

    #[test]
    fn test_parse_users_rejects_garbage() {
        assert!(parse_users(r#"{"id": "ana"}"#).is_err());
        assert!(parse_instances(r#"[{"id": "x"}]"#).is_err());
    }

    #[test]
    fn test_missing_snapshot_is_empty() {
        let path = scratch_file("missing");
        assert!(load_instances(&path).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_engine_uses_static_directory() {
        let engine = build_engine(
            &EngineConfig::default(),
            Some(vec![UserRecord::new("ana", "Ana")]),
            Vec::new(),
        )
        .await
        .unwrap();
        let def = WorkflowDefinition::sequential(
            DocumentRef::new("doc"),
            [UserId::new("ana"), UserId::new("unknown")],
            3600,
        );
        let err = engine.create(def, UserId::new("req")).await.unwrap_err();
        assert!(matches!(err, ApprovalError::InvalidDefinition(_)));
    }

    #[tokio::test]
    async fn test_engine_with_open_directory() {
        let engine = build_engine(&EngineConfig::default(), None, Vec::new())
            .await
            .unwrap();
        let def = WorkflowDefinition::unanimous(
            DocumentRef::new("doc"),
            [UserId::new("x"), UserId::new("y")],
            3600,
        );
        let inst = engine.create(def, UserId::new("req")).await.unwrap();
        assert_eq!(inst.state, WorkflowState::Draft);
    }

    #[tokio::test]
    async fn test_duplicate_ids_in_snapshot_fail() {
        let inst = overdue_instance();
        let result = build_engine(&EngineConfig::default(), None, vec![inst.clone(), inst]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_snapshot_restored_swept_and_saved() {
        let path = scratch_file("sweep");
        let inst = overdue_instance();
        std::fs::write(&path, serde_json::to_string(&vec![inst.clone()]).unwrap()).unwrap();

        let engine = build_engine(&EngineConfig::default(), None, load_instances(&path).unwrap())
            .await
            .unwrap();
        let (sweeper, _rx) = ExpirySweeper::new(Default::default(), engine.clone());
        let report = sweeper.sweep_once().await.unwrap();
        assert_eq!(report.expired, vec![inst.id.clone()]);

        assert_eq!(save_instances(&engine, &path).await.unwrap(), 1);
        let saved = load_instances(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].id, inst.id);
        assert_eq!(saved[0].state, WorkflowState::Expired);
        assert_eq!(saved[0].definition, inst.definition);
    }
}
