use {
    anyhow::{Result, bail},
    clap::Args,
    courier_common::types::PeerRef,
    courier_config::CourierConfig,
    courier_routing::{ResolvedRoute, RouteInput, RouteResolver},
};

/// Show which agent and session a message would be routed to.
#[derive(Args)]
pub struct RouteArgs {
    #[arg(long)]
    pub channel: String,
    #[arg(long, default_value = "default")]
    pub account: String,
    /// Conversation, as `[dm|group|channel:]<id>` (default kind: dm).
    #[arg(long)]
    pub peer: String,
    /// Parent conversation of a thread, same syntax as `--peer`.
    #[arg(long)]
    pub parent_peer: Option<String>,
    #[arg(long)]
    pub guild: Option<String>,
    #[arg(long)]
    pub team: Option<String>,
}

pub fn handle_route(args: &RouteArgs, config: &CourierConfig) -> Result<()> {
    let route = resolve(args, config)?;
    println!("agent:       {}", route.agent_id);
    println!("session key: {}", route.session_key);
    println!("matched by:  {}", route.matched_by.as_str());
    Ok(())
}

fn resolve(args: &RouteArgs, config: &CourierConfig) -> Result<ResolvedRoute> {
    let resolver = RouteResolver::new(config)?;
    let peer = parse_peer(&args.peer)?;
    let parent_peer = args.parent_peer.as_deref().map(parse_peer).transpose()?;
    Ok(resolver.resolve(RouteInput {
        channel: &args.channel,
        account_id: &args.account,
        peer: &peer,
        parent_peer: parent_peer.as_ref(),
        guild_id: args.guild.as_deref(),
        team_id: args.team.as_deref(),
    }))
}

fn parse_peer(raw: &str) -> Result<PeerRef> {
    let peer = match raw.split_once(':') {
        Some(("dm", id)) => PeerRef::dm(id),
        Some(("group", id)) => PeerRef::group(id),
        Some(("channel", id)) => PeerRef::channel(id),
        _ => PeerRef::dm(raw),
    };
    if peer.id.trim().is_empty() {
        bail!("peer id is empty: '{raw}'");
    }
    Ok(peer)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, courier_common::types::PeerKind, courier_routing::MatchedBy};

    fn args(peer: &str) -> RouteArgs {
        RouteArgs {
            channel: "discord".into(),
            account: "default".into(),
            peer: peer.into(),
            parent_peer: None,
            guild: None,
            team: None,
        }
    }

    #[test]
    fn peer_syntax() {
        assert_eq!(parse_peer("+1555").unwrap(), PeerRef::dm("+1555"));
        assert_eq!(parse_peer("group:g1").unwrap().kind, PeerKind::Group);
        assert_eq!(parse_peer("channel:c1").unwrap(), PeerRef::channel("c1"));
        // Unknown prefixes are part of the id.
        assert_eq!(parse_peer("room:7").unwrap(), PeerRef::dm("room:7"));
        assert!(parse_peer("dm: ").is_err());
    }

    #[test]
    fn guild_binding_wins_over_default() {
        let config: CourierConfig = toml::from_str(
            r#"
            [[agents.list]]
            id = "main"

            [[agents.list]]
            id = "guild-bot"

            [[bindings]]
            agent_id = "guild-bot"
            match = { channel = "discord", guild_id = "g1" }
            "#,
        )
        .unwrap();

        let mut a = args("channel:c1");
        a.guild = Some("g1".into());
        let route = resolve(&a, &config).unwrap();
        assert_eq!(route.agent_id, "guild-bot");
        assert_eq!(route.matched_by, MatchedBy::Guild);

        let route = resolve(&args("+1"), &config).unwrap();
        assert_eq!(route.agent_id, "main");
        assert_eq!(route.matched_by, MatchedBy::Default);
    }
}
