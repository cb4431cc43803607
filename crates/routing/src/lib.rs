//! Route inbound messages to agents and build session keys.
//!
//! Binding cascade (precedence, first match wins):
//! 1. Peer binding (exact peer match)
//! 2. Parent-peer binding (thread inherits its parent's binding)
//! 3. Guild binding (Discord guild ID)
//! 4. Team binding (Slack team ID)
//! 5. Account binding (channel + specific account)
//! 6. Channel binding (channel + wildcard account)
//! 7. Default agent (`agents.default`, else the first listed agent)

pub mod error;
pub mod resolve;

pub use {
    error::{Error, Result},
    resolve::{MatchedBy, ResolvedRoute, RouteInput, RouteResolver, resolve_agent_route},
};
