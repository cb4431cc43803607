use std::sync::Arc;

use {
    anyhow::Result,
    chrono::{DateTime, Local, Utc},
    clap::Subcommand,
    courier_config::CourierConfig,
    courier_sessions::{SessionEntry, SessionKey, SessionStores},
};

#[derive(Subcommand)]
pub enum SessionsAction {
    /// List stored sessions, most recent first.
    List {
        /// Only this agent's store (default: every configured agent).
        #[arg(long)]
        agent: Option<String>,
    },
    /// Forget a session so the next message starts a new conversation.
    Reset {
        /// Session key, e.g. `agent:main:whatsapp:dm:+15551234567`.
        key: String,
        /// Store to reset in (default: the agent named in the key).
        #[arg(long)]
        agent: Option<String>,
    },
}

pub async fn handle_sessions(action: SessionsAction, config: Arc<CourierConfig>) -> Result<()> {
    let stores = SessionStores::new(Arc::clone(&config));
    match action {
        SessionsAction::List { agent } => {
            let agents = match agent {
                Some(id) => vec![id],
                None => config.agent_ids(),
            };
            let mut total = 0;
            for agent_id in agents {
                let store = stores.for_agent(&agent_id);
                let entries = store.list().await?;
                if entries.is_empty() {
                    continue;
                }
                println!("{agent_id} ({})", store.path().display());
                for (key, entry) in &entries {
                    println!("  {}", format_entry(key, entry));
                }
                total += entries.len();
            }
            if total == 0 {
                println!("No sessions found.");
            }
        },
        SessionsAction::Reset { key, agent } => {
            let agent_id = reset_agent(&key, agent, &config);
            match stores.for_agent(&agent_id).remove(&key).await? {
                Some(entry) => println!("Reset {key} (was session {}).", entry.session_id),
                None => println!("No session {key} in agent '{agent_id}'."),
            }
        },
    }
    Ok(())
}

fn reset_agent(key: &str, agent: Option<String>, config: &CourierConfig) -> String {
    agent
        .or_else(|| SessionKey(key.to_string()).agent_id().map(str::to_string))
        .unwrap_or_else(|| config.default_agent_id().to_string())
}

fn format_time(ms: u64) -> String {
    i64::try_from(ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".into())
}

fn format_entry(key: &str, entry: &SessionEntry) -> String {
    let mut line = format!(
        "{key}  session={}  updated={}",
        entry.session_id,
        format_time(entry.updated_at)
    );
    if let (Some(channel), Some(account)) = (&entry.last_channel, &entry.last_account_id) {
        line.push_str(&format!("  last={channel}/{account}"));
        if let Some(to) = &entry.last_to {
            line.push_str(&format!(" -> {to}"));
        }
    }
    line
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn reset_agent_prefers_flag_then_key() {
        let config = CourierConfig::default();
        assert_eq!(
            reset_agent("agent:ops:dm:+1", Some("home".into()), &config),
            "home"
        );
        assert_eq!(reset_agent("agent:ops:dm:+1", None, &config), "ops");
        assert_eq!(reset_agent("legacy-key", None, &config), "main");
    }

    #[test]
    fn entry_line_includes_last_route() {
        let mut entry = SessionEntry::new(0);
        entry.session_id = "abc".into();
        assert!(format_entry("k", &entry).starts_with("k  session=abc  updated="));
        assert!(!format_entry("k", &entry).contains("last="));

        entry.record_route("whatsapp", "default", "+1");
        assert!(format_entry("k", &entry).ends_with("last=whatsapp/default -> +1"));
    }

    #[tokio::test]
    async fn reset_removes_the_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = CourierConfig::default();
        config.session.state_dir = Some(dir.path().to_path_buf());
        let config = Arc::new(config);
        let store = SessionStores::new(Arc::clone(&config)).for_agent("main");
        store
            .put("agent:main:console:main", SessionEntry::new(1))
            .await
            .unwrap();

        handle_sessions(
            SessionsAction::Reset {
                key: "agent:main:console:main".into(),
                agent: None,
            },
            Arc::clone(&config),
        )
        .await
        .unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }
}
