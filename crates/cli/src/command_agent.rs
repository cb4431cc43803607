//! Agent backed by an external command.
//!
//! The command runs under `sh -c` in the agent's workspace (when it exists)
//! with the prompt on stdin and the conversation described in `COURIER_*`
//! environment variables. Stdout is the reply: plain text, or a JSON payload
//! or payload list. `MEDIA:` lines are lifted out downstream.

use std::{path::Path, process::Stdio, sync::Arc, time::Duration};

use {
    anyhow::{Context, Result, bail},
    async_trait::async_trait,
    courier_auto_reply::{AgentInvoker, AgentReply, AgentRequest},
    courier_config::CourierConfig,
    tokio::{io::AsyncWriteExt, process::Command},
    tracing::debug,
};

pub struct CommandAgent {
    command: String,
    timeout: Duration,
    config: Arc<CourierConfig>,
}

impl CommandAgent {
    pub fn new(command: impl Into<String>, timeout: Duration, config: Arc<CourierConfig>) -> Self {
        Self {
            command: command.into(),
            timeout,
            config,
        }
    }

    fn env(request: &AgentRequest, workspace: &Path) -> Vec<(&'static str, String)> {
        let flag = |b: bool| String::from(if b { "1" } else { "0" });
        let mut env = vec![
            ("COURIER_AGENT_ID", request.agent_id.clone()),
            ("COURIER_SESSION_KEY", request.session_key.clone()),
            ("COURIER_SESSION_ID", request.session_id.clone()),
            ("COURIER_NEW_SESSION", flag(request.is_new_session)),
            ("COURIER_CHANNEL", request.channel.clone()),
            ("COURIER_ACCOUNT_ID", request.account_id.clone()),
            ("COURIER_PEER", request.peer.clone()),
            ("COURIER_HEARTBEAT", flag(request.is_heartbeat)),
            ("COURIER_WORKSPACE", workspace.display().to_string()),
        ];
        if let Some(name) = &request.sender_name {
            env.push(("COURIER_SENDER_NAME", name.clone()));
        }
        env
    }
}

#[async_trait]
impl AgentInvoker for CommandAgent {
    async fn invoke(&self, request: &AgentRequest) -> Result<AgentReply> {
        let workspace = self.config.agent_workspace(&request.agent_id);
        debug!(
            command = %self.command,
            agent_id = %request.agent_id,
            session_key = %request.session_key,
            prompt_len = request.prompt.len(),
            "spawning agent command"
        );

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&self.command)
            .envs(Self::env(request, &workspace))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if workspace.is_dir() {
            cmd.current_dir(&workspace);
        }
        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn agent command: {}", self.command))?;

        // Commands that ignore stdin close the pipe early.
        if let Some(mut stdin) = child.stdin.take()
            && let Err(e) = stdin.write_all(request.prompt.as_bytes()).await
            && e.kind() != std::io::ErrorKind::BrokenPipe
        {
            return Err(e.into());
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .with_context(|| format!("agent command timed out after {:?}", self.timeout))?
            .context("agent command failed to complete")?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!(
            exit_code = output.status.code().unwrap_or(-1),
            stdout_len = stdout.len(),
            stderr_len = stderr.len(),
            "agent command completed"
        );

        if !output.status.success() {
            bail!(
                "agent command exited with {}: {}",
                output.status,
                stderr.trim()
            );
        }
        Ok(AgentReply::from_output(&stdout))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, courier_common::types::ReplyPayload};

    fn request() -> AgentRequest {
        AgentRequest {
            agent_id: "main".into(),
            session_key: "agent:main:console:main".into(),
            session_id: "s-1".into(),
            is_new_session: true,
            channel: "console".into(),
            account_id: "default".into(),
            peer: "you".into(),
            sender_name: None,
            prompt: "[console you 10:00] hello".into(),
            is_heartbeat: false,
        }
    }

    fn agent(command: &str, dir: &Path) -> CommandAgent {
        let mut config = CourierConfig::default();
        config.agents.list = vec![courier_config::AgentEntry {
            id: "main".into(),
            workspace: Some(dir.to_path_buf()),
        }];
        CommandAgent::new(command, Duration::from_secs(5), Arc::new(config))
    }

    #[tokio::test]
    async fn stdout_is_the_reply() {
        let dir = tempfile::tempdir().unwrap();
        let reply = agent("tr a-z A-Z", dir.path())
            .invoke(&request())
            .await
            .unwrap();
        assert_eq!(
            reply.into_payloads(),
            vec![ReplyPayload::text("[CONSOLE YOU 10:00] HELLO")]
        );
    }

    #[tokio::test]
    async fn env_and_workspace_are_set() {
        let dir = tempfile::tempdir().unwrap();
        let reply = agent(
            r#"echo "$COURIER_SESSION_KEY $COURIER_NEW_SESSION $COURIER_HEARTBEAT $(basename "$PWD")""#,
            dir.path(),
        )
        .invoke(&request())
        .await
        .unwrap();
        let name = dir.path().file_name().unwrap().to_string_lossy();
        assert_eq!(
            reply.into_payloads(),
            vec![ReplyPayload::text(format!("agent:main:console:main 1 0 {name}"))]
        );
    }

    #[tokio::test]
    async fn json_output_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let reply = agent(r#"echo '{"text":"hi","mediaUrl":"a.png"}'"#, dir.path())
            .invoke(&request())
            .await
            .unwrap();
        let payloads = reply.into_payloads();
        assert_eq!(payloads[0].media(), vec!["a.png"]);
    }

    #[tokio::test]
    async fn failing_command_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = agent("echo broken >&2; exit 3", dir.path())
            .invoke(&request())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("broken"), "{err}");
    }

    #[tokio::test]
    async fn silent_command_is_no_reply() {
        let dir = tempfile::tempdir().unwrap();
        let reply = agent("cat > /dev/null", dir.path())
            .invoke(&request())
            .await
            .unwrap();
        assert_eq!(reply, AgentReply::None);
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let mut slow = agent("sleep 5", dir.path());
        slow.timeout = Duration::from_millis(100);
        let err = slow.invoke(&request()).await.unwrap_err();
        assert!(err.to_string().contains("timed out"), "{err}");
    }
}
