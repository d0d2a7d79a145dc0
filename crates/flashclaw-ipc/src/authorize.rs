use flashclaw_core::types::{IpcEnvelope, IpcTargetFolder};

use crate::dispatcher::Dispatcher;
use crate::error::{IpcError, Result};

/// §4.7 step 3: `isMain := sourceGroup == MAIN_GROUP_FOLDER`. Non-main
/// envelopes whose target folder differs from `sourceGroup` are dropped;
/// `register_group` is main-only regardless of its own target folder.
pub async fn authorize(
    env: &IpcEnvelope,
    source_group: &str,
    main_group_folder: &str,
    dispatcher: &dyn Dispatcher,
) -> Result<()> {
    let is_main = source_group == main_group_folder;

    if env.requires_main() && !is_main {
        return Err(IpcError::Authorization(format!(
            "{source_group} is not the main group, cannot register a group"
        )));
    }

    if is_main {
        return Ok(());
    }

    let target = match env.target_folder() {
        IpcTargetFolder::Explicit(folder) => folder,
        IpcTargetFolder::SameAsSource => return Ok(()),
        IpcTargetFolder::ResolveFromTask { task_id } => dispatcher
            .task_group_folder(&task_id)
            .await
            .ok_or_else(|| IpcError::UnknownTask(task_id.clone()))?,
    };

    if target != source_group {
        return Err(IpcError::Authorization(format!(
            "{source_group} may not target folder {target}"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use flashclaw_core::types::{ContextMode, Platform, ScheduleType};

    struct StubDispatcher {
        task_folder: Option<String>,
    }

    #[async_trait]
    impl Dispatcher for StubDispatcher {
        async fn send_message(&self, _: &str, _: &str, _: &str, _: Option<Platform>) -> Result<(), String> {
            Ok(())
        }
        async fn send_image(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: Option<String>,
            _: Option<Platform>,
        ) -> Result<(), String> {
            Ok(())
        }
        async fn schedule_task(
            &self,
            _: &str,
            _: &str,
            _: ScheduleType,
            _: &str,
            _: ContextMode,
            _: Option<u32>,
            _: Option<u64>,
        ) -> Result<(), String> {
            Ok(())
        }
        async fn pause_task(&self, _: &str) -> Result<(), String> {
            Ok(())
        }
        async fn resume_task(&self, _: &str) -> Result<(), String> {
            Ok(())
        }
        async fn cancel_task(&self, _: &str) -> Result<(), String> {
            Ok(())
        }
        async fn register_group(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: &str,
            _: Option<serde_json::Value>,
        ) -> Result<(), String> {
            Ok(())
        }
        async fn task_group_folder(&self, _task_id: &str) -> Option<String> {
            self.task_folder.clone()
        }
    }

    #[tokio::test]
    async fn main_group_may_target_any_folder() {
        let env = IpcEnvelope::Message {
            chat_jid: "1".to_string(),
            text: "hi".to_string(),
            group_folder: Some("other".to_string()),
            platform: None,
        };
        let dispatcher = StubDispatcher { task_folder: None };
        assert!(authorize(&env, "main", "main", &dispatcher).await.is_ok());
    }

    #[tokio::test]
    async fn non_main_cannot_target_other_folder() {
        let env = IpcEnvelope::Message {
            chat_jid: "1".to_string(),
            text: "hi".to_string(),
            group_folder: Some("other".to_string()),
            platform: None,
        };
        let dispatcher = StubDispatcher { task_folder: None };
        assert!(authorize(&env, "self", "main", &dispatcher).await.is_err());
    }

    #[tokio::test]
    async fn non_main_register_group_is_rejected() {
        let env = IpcEnvelope::RegisterGroup {
            jid: "1".to_string(),
            name: "n".to_string(),
            folder: "self".to_string(),
            trigger: "always".to_string(),
            agent_config: None,
        };
        let dispatcher = StubDispatcher { task_folder: None };
        assert!(authorize(&env, "self", "main", &dispatcher).await.is_err());
    }

    #[tokio::test]
    async fn task_op_resolves_owning_folder() {
        let env = IpcEnvelope::PauseTask {
            task_id: "t1".to_string(),
        };
        let dispatcher = StubDispatcher {
            task_folder: Some("self".to_string()),
        };
        assert!(authorize(&env, "self", "main", &dispatcher).await.is_ok());

        let dispatcher = StubDispatcher {
            task_folder: Some("other".to_string()),
        };
        assert!(authorize(&env, "self", "main", &dispatcher).await.is_err());
    }

    #[tokio::test]
    async fn task_op_for_unknown_task_is_unauthorized() {
        let env = IpcEnvelope::CancelTask {
            task_id: "ghost".to_string(),
        };
        let dispatcher = StubDispatcher { task_folder: None };
        assert!(authorize(&env, "self", "main", &dispatcher).await.is_err());
    }
}
