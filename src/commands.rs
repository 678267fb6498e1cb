//! Operator command surface.
//!
//! Group commands act on the group they were issued in; private commands
//! carry the target group id as their first argument. All of them are
//! restricted to a privileged caller by the embedder — this module only
//! parses and dispatches. `None` means "say nothing" (disabled group);
//! errors come back as literal usage strings.

use tracing::error;

use crate::worker::{GroupRegistry, SharedSession};

const GROUP_HELP: &str = "可用命令:
1. set_role <角色名> <角色设定> - 设置角色
2. role - 获取当前角色
3. calm - 冷静
4. reset - 重置会话
5. status - 获取状态
6. presets - 获取可用预设
7. set_preset <预设文件名> - 加载预设
8. help - 显示本帮助信息";

const PRIVATE_HELP: &str = "可用命令:
1. set_role <群号> <角色名> <角色设定> - 设置角色
2. role <群号> - 获取当前角色
3. calm <群号> - 冷静
4. reset <群号> - 重置会话
5. status <群号> - 获取状态
6. presets <群号> - 获取可用预设
7. set_preset <群号> <预设文件名> - 加载预设
8. list_groups - 获取启用的群组列表
9. help - 显示本帮助信息";

/// Handle a command issued inside a group chat.
pub async fn handle_group_command(
    registry: &GroupRegistry,
    group_id: i64,
    input: &str,
) -> Option<String> {
    let (command, rest) = split_command(input);
    if command == "help" {
        return Some(GROUP_HELP.to_string());
    }
    dispatch(registry, group_id, command, rest).await
}

/// Handle a command issued in a private chat; the group id is the first
/// argument except for `help` and `list_groups`.
pub async fn handle_private_command(registry: &GroupRegistry, input: &str) -> Option<String> {
    let (command, rest) = split_command(input);
    match command {
        "help" => return Some(PRIVATE_HELP.to_string()),
        "list_groups" => {
            let groups = registry.enabled_groups();
            if groups.is_empty() {
                return Some("没有启用的群组".to_string());
            }
            let mut message = "启用的群组:\n".to_string();
            for group_id in groups {
                message.push_str(&format!("- {}\n", group_id));
            }
            return Some(message);
        }
        _ => {}
    }

    let (group_arg, rest) = match rest.split_once(char::is_whitespace) {
        Some((first, remainder)) => (first, remainder.trim()),
        None => (rest, ""),
    };
    let Ok(group_id) = group_arg.parse::<i64>() else {
        return Some("请提供<群号>".to_string());
    };
    dispatch(registry, group_id, command, rest).await
}

async fn dispatch(
    registry: &GroupRegistry,
    group_id: i64,
    command: &str,
    rest: &str,
) -> Option<String> {
    match command {
        "status" => {
            let session = acquire(registry, group_id).await?;
            let guard = session.lock().await;
            Some(guard.status().await)
        }
        "role" => {
            let session = acquire(registry, group_id).await?;
            let guard = session.lock().await;
            Some(format!("当前角色: {}", guard.role_text()))
        }
        "set_role" => {
            let Some((name, role)) = rest.split_once(char::is_whitespace) else {
                return Some("请提供<角色名> <角色设定>".to_string());
            };
            let (name, role) = (name.trim(), role.trim());
            if name.is_empty() || role.is_empty() {
                return Some("请提供<角色名> <角色设定>".to_string());
            }
            let session = acquire(registry, group_id).await?;
            session.lock().await.set_role(name, role).await;
            Some(format!("角色已设为: {}\n设定: {}", name, role))
        }
        "calm" => {
            let session = acquire(registry, group_id).await?;
            session.lock().await.calm_down().await;
            Some("已老实".to_string())
        }
        "reset" => {
            let session = acquire(registry, group_id).await?;
            session.lock().await.reset().await;
            Some("已重置会话".to_string())
        }
        "presets" => {
            // Touch the session so the listing only answers for enabled groups.
            acquire(registry, group_id).await?;
            let mut message = "可选的预设:\n".to_string();
            for file_name in registry.presets().visible() {
                message.push_str(&format!("- {}\n", file_name));
            }
            message.push_str("使用方法: set_preset <预设文件名>");
            Some(message)
        }
        "set_preset" => {
            if rest.is_empty() {
                return Some("请提供<预设文件名>".to_string());
            }
            let Some(preset) = registry.presets().get(rest) else {
                return Some(format!("不存在的预设: {}", rest));
            };
            let session = acquire(registry, group_id).await?;
            session.lock().await.apply_preset(preset).await;
            Some(format!("预设已加载: {}", rest))
        }
        _ => Some(format!("未知命令: {}，输入 help 查看可用命令", command)),
    }
}

async fn acquire(registry: &GroupRegistry, group_id: i64) -> Option<SharedSession> {
    match registry.session(group_id).await {
        Ok(session) => session,
        Err(e) => {
            error!("failed to initialize session for group {}: {}", group_id, e);
            None
        }
    }
}

fn split_command(input: &str) -> (&str, &str) {
    let input = input.trim();
    match input.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (input, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterError, ChatPlatform, GroupMember};
    use crate::config::Config;
    use crate::image::{ImageDescriber, ImageError};
    use crate::llm::embeddings::TextEmbedder;
    use crate::llm::provider::{LlmError, LlmProvider};
    use crate::llm::vlm::VisionAnnotation;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct SilentPlatform;

    #[async_trait]
    impl ChatPlatform for SilentPlatform {
        async fn group_member(
            &self,
            _group_id: i64,
            _user_id: &str,
        ) -> Result<GroupMember, AdapterError> {
            Ok(GroupMember::default())
        }
        async fn send_to_group(&self, _group_id: i64, _text: &str) -> Result<(), AdapterError> {
            Ok(())
        }
    }

    struct NoImages;

    #[async_trait]
    impl ImageDescriber for NoImages {
        async fn annotate_url(
            &self,
            _url: &str,
            _is_sticker: bool,
        ) -> Result<VisionAnnotation, ImageError> {
            Err(ImageError::UnknownFormat)
        }
    }

    struct DummyLlm;

    #[async_trait]
    impl LlmProvider for DummyLlm {
        async fn complete(&self, _prompt: &str, _model: &str) -> Result<String, LlmError> {
            Err(LlmError::EmptyCompletion)
        }
    }

    struct ConstantEmbedder;

    #[async_trait]
    impl TextEmbedder for ConstantEmbedder {
        async fn embed(&self, inputs: &[String]) -> Vec<Vec<f32>> {
            inputs.iter().map(|_| vec![1.0]).collect()
        }
    }

    fn registry_in(dir: &std::path::Path) -> GroupRegistry {
        let config = Config {
            enabled_groups: vec![1],
            data_dir: dir.to_path_buf(),
            preset_dir: dir.join("nya_presets"),
            ..Config::default()
        };
        GroupRegistry::new(
            config,
            "self",
            Arc::new(DummyLlm),
            Arc::new(ConstantEmbedder),
            Arc::new(SilentPlatform),
            Arc::new(NoImages),
        )
    }

    #[tokio::test]
    async fn help_lists_every_command() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = registry_in(tmp.path());
        let help = handle_group_command(&registry, 1, "help").await.unwrap();
        for command in ["set_role", "role", "calm", "reset", "status", "presets", "set_preset"] {
            assert!(help.contains(command), "help is missing {}", command);
        }
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn role_round_trips_through_set_role() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = registry_in(tmp.path());

        let initial = handle_group_command(&registry, 1, "role").await.unwrap();
        assert_eq!(initial, "当前角色: terminus（一个男性人类）");

        let set = handle_group_command(&registry, 1, "set_role 喵喵 一个可爱的猫娘")
            .await
            .unwrap();
        assert!(set.contains("角色已设为: 喵喵"));

        let updated = handle_group_command(&registry, 1, "role").await.unwrap();
        assert_eq!(updated, "当前角色: 喵喵（一个可爱的猫娘）");
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn missing_arguments_yield_usage_strings() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = registry_in(tmp.path());
        assert_eq!(
            handle_group_command(&registry, 1, "set_role 喵喵").await.unwrap(),
            "请提供<角色名> <角色设定>"
        );
        assert_eq!(
            handle_group_command(&registry, 1, "set_preset").await.unwrap(),
            "请提供<预设文件名>"
        );
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_command_is_surfaced() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = registry_in(tmp.path());
        let reply = handle_group_command(&registry, 1, "dance").await.unwrap();
        assert!(reply.contains("未知命令"));
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn disabled_groups_stay_silent() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = registry_in(tmp.path());
        assert!(handle_group_command(&registry, 999, "status").await.is_none());
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn presets_lists_the_seeded_example_and_loads_it() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = registry_in(tmp.path());

        let listing = handle_group_command(&registry, 1, "presets").await.unwrap();
        assert!(listing.contains("喵喵.json"));

        let loaded = handle_group_command(&registry, 1, "set_preset 喵喵.json")
            .await
            .unwrap();
        assert_eq!(loaded, "预设已加载: 喵喵.json");

        let missing = handle_group_command(&registry, 1, "set_preset nope.json")
            .await
            .unwrap();
        assert_eq!(missing, "不存在的预设: nope.json");
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn calm_and_reset_acknowledge() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = registry_in(tmp.path());
        assert_eq!(handle_group_command(&registry, 1, "calm").await.unwrap(), "已老实");
        assert_eq!(
            handle_group_command(&registry, 1, "reset").await.unwrap(),
            "已重置会话"
        );
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn status_reports_json() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = registry_in(tmp.path());
        let status = handle_group_command(&registry, 1, "status").await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&status).unwrap();
        assert_eq!(parsed["name"], "terminus");
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn private_commands_take_a_leading_group_id() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = registry_in(tmp.path());

        assert_eq!(
            handle_private_command(&registry, "status").await.unwrap(),
            "请提供<群号>"
        );
        assert_eq!(
            handle_private_command(&registry, "status abc").await.unwrap(),
            "请提供<群号>"
        );

        let status = handle_private_command(&registry, "status 1").await.unwrap();
        assert!(serde_json::from_str::<serde_json::Value>(&status).is_ok());

        let set = handle_private_command(&registry, "set_role 1 喵喵 猫娘")
            .await
            .unwrap();
        assert!(set.contains("角色已设为"));
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn list_groups_is_private_only_and_lists_enabled() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = registry_in(tmp.path());
        let listing = handle_private_command(&registry, "list_groups").await.unwrap();
        assert!(listing.contains("- 1"));
        registry.shutdown().await;
    }
}
