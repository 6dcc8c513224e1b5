//! Structured session identifiers (component D).
//!
//! A `SessionKey` ties every inbound message, agent run, and approval
//! prompt to the conversation it belongs to, including through cron forks
//! (sub-sessions). The wire format is a deterministic string — see §4.4 —
//! and `parse` is total: any string that doesn't match a known shape comes
//! back as [`SessionKey::Unknown`] rather than an error.

use crate::clock::new_id;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PeerKind {
    Dm,
    Group,
    Channel,
    Unknown,
}

impl PeerKind {
    fn as_str(&self) -> &'static str {
        match self {
            PeerKind::Dm => "dm",
            PeerKind::Group => "group",
            PeerKind::Channel => "channel",
            PeerKind::Unknown => "unknown",
        }
    }

    fn parse(s: &str) -> PeerKind {
        match s {
            "dm" => PeerKind::Dm,
            "group" => PeerKind::Group,
            "channel" => PeerKind::Channel,
            _ => PeerKind::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MainKey {
    pub agent_id: String,
    pub sub_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelPeerKey {
    pub agent_id: String,
    pub channel_id: String,
    pub account_id: String,
    pub peer_kind: PeerKind,
    pub peer_id: String,
    pub thread_id: Option<String>,
    pub sub_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SessionKey {
    Main(MainKey),
    ChannelPeer(ChannelPeerKey),
    /// Parsing is total: any string not matching a known shape round-trips
    /// to itself under this variant, rather than erroring.
    Unknown(String),
}

impl SessionKey {
    pub fn main(agent_id: impl Into<String>, sub_id: Option<String>) -> SessionKey {
        SessionKey::Main(MainKey {
            agent_id: agent_id.into(),
            sub_id,
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn channel_peer(
        agent_id: impl Into<String>,
        channel_id: impl Into<String>,
        account_id: impl Into<String>,
        peer_kind: PeerKind,
        peer_id: impl Into<String>,
        thread_id: Option<String>,
        sub_id: Option<String>,
    ) -> SessionKey {
        SessionKey::ChannelPeer(ChannelPeerKey {
            agent_id: agent_id.into(),
            channel_id: channel_id.into(),
            account_id: account_id.into(),
            peer_kind,
            peer_id: peer_id.into(),
            thread_id,
            sub_id,
        })
    }

    /// The base (un-forked) session this key belongs to: strips `sub_id`.
    /// Used by completion forwarding to find the "originating conversation"
    /// even when the run itself happened in a cron-forked sub-session.
    pub fn base(&self) -> SessionKey {
        match self {
            SessionKey::Main(m) => SessionKey::Main(MainKey {
                agent_id: m.agent_id.clone(),
                sub_id: None,
            }),
            SessionKey::ChannelPeer(c) => SessionKey::ChannelPeer(ChannelPeerKey {
                sub_id: None,
                ..c.clone()
            }),
            SessionKey::Unknown(s) => SessionKey::Unknown(s.clone()),
        }
    }

    /// Fork this key to a new sub-session id, preserving every other
    /// field (agent_id, channel_id, account_id, peer_kind, peer_id,
    /// thread_id) per the invariant in §4.4.
    pub fn fork(&self, sub_id: impl Into<String>) -> SessionKey {
        match self {
            SessionKey::Main(m) => SessionKey::Main(MainKey {
                agent_id: m.agent_id.clone(),
                sub_id: Some(sub_id.into()),
            }),
            SessionKey::ChannelPeer(c) => SessionKey::ChannelPeer(ChannelPeerKey {
                sub_id: Some(sub_id.into()),
                ..c.clone()
            }),
            SessionKey::Unknown(s) => SessionKey::Unknown(s.clone()),
        }
    }

    pub fn synthesize(&self) -> String {
        match self {
            SessionKey::Main(m) => match &m.sub_id {
                Some(sub) => format!("agent:{}:main:sub:{}", m.agent_id, sub),
                None => format!("agent:{}:main", m.agent_id),
            },
            SessionKey::ChannelPeer(c) => {
                let mut s = format!(
                    "{}/{}/{}/{}/{}",
                    c.agent_id,
                    c.channel_id,
                    c.account_id,
                    c.peer_kind.as_str(),
                    c.peer_id
                );
                if let Some(thread) = &c.thread_id {
                    s.push('/');
                    s.push_str(thread);
                }
                if let Some(sub) = &c.sub_id {
                    s.push_str("/sub/");
                    s.push_str(sub);
                }
                s
            }
            SessionKey::Unknown(s) => s.clone(),
        }
    }

    pub fn parse(s: &str) -> SessionKey {
        if let Some(rest) = s.strip_prefix("agent:") {
            // agent:{agent_id}:main[:sub:{sub_id}]
            let parts: Vec<&str> = rest.splitn(2, ":main").collect();
            if parts.len() == 2 && (parts[1].is_empty() || parts[1].starts_with(":sub:")) {
                let agent_id = parts[0].to_string();
                if agent_id.is_empty() {
                    return SessionKey::Unknown(s.to_string());
                }
                let sub_id = parts[1].strip_prefix(":sub:").map(|s| s.to_string());
                if parts[1].starts_with(":sub:") && sub_id.as_deref() == Some("") {
                    return SessionKey::Unknown(s.to_string());
                }
                return SessionKey::Main(MainKey { agent_id, sub_id });
            }
            return SessionKey::Unknown(s.to_string());
        }

        let segs: Vec<&str> = s.split('/').collect();
        if segs.len() >= 5 {
            let (agent_id, channel_id, account_id, peer_kind_raw, peer_id) =
                (segs[0], segs[1], segs[2], segs[3], segs[4]);
            if [agent_id, channel_id, account_id, peer_kind_raw, peer_id]
                .iter()
                .any(|p| p.is_empty())
            {
                return SessionKey::Unknown(s.to_string());
            }
            let mut thread_id = None;
            let mut sub_id = None;
            let tail = &segs[5..];
            match tail.len() {
                0 => {}
                2 if tail[0] == "sub" => sub_id = Some(tail[1].to_string()),
                1 => thread_id = Some(tail[0].to_string()),
                3 if tail[1] == "sub" => {
                    thread_id = Some(tail[0].to_string());
                    sub_id = Some(tail[2].to_string());
                }
                _ => return SessionKey::Unknown(s.to_string()),
            }
            return SessionKey::ChannelPeer(ChannelPeerKey {
                agent_id: agent_id.to_string(),
                channel_id: channel_id.to_string(),
                account_id: account_id.to_string(),
                peer_kind: PeerKind::parse(peer_kind_raw),
                peer_id: peer_id.to_string(),
                thread_id,
                sub_id,
            });
        }

        SessionKey::Unknown(s.to_string())
    }
}

/// Mint a unique fork id. Minted from the cron fork path, the id carries
/// the `cron_` prefix so forwarded sub-sessions are recognizable in logs.
pub fn new_sub_id() -> String {
    new_id("sub")
}

pub fn new_cron_sub_id() -> String {
    new_id("cron")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn main_round_trips() {
        let k = SessionKey::main("agent-x", None);
        assert_eq!(SessionKey::parse(&k.synthesize()), k);
    }

    #[test]
    fn main_with_sub_round_trips() {
        let k = SessionKey::main("agent-x", Some("cron_123".to_string()));
        let s = k.synthesize();
        assert_eq!(s, "agent:agent-x:main:sub:cron_123");
        assert_eq!(SessionKey::parse(&s), k);
    }

    #[test]
    fn channel_peer_round_trips_minimal() {
        let k = SessionKey::channel_peer(
            "a",
            "telegram",
            "acct1",
            PeerKind::Dm,
            "user42",
            None,
            None,
        );
        let s = k.synthesize();
        assert_eq!(s, "a/telegram/acct1/dm/user42");
        assert_eq!(SessionKey::parse(&s), k);
    }

    #[test]
    fn channel_peer_round_trips_with_thread_and_sub() {
        let k = SessionKey::channel_peer(
            "a",
            "discord",
            "acct1",
            PeerKind::Group,
            "chan9",
            Some("thread7".to_string()),
            Some("sub1".to_string()),
        );
        let s = k.synthesize();
        assert_eq!(s, "a/discord/acct1/group/chan9/thread7/sub/sub1");
        assert_eq!(SessionKey::parse(&s), k);
    }

    #[test]
    fn unknown_round_trips_as_itself() {
        let s = "not-a-real-key";
        let k = SessionKey::parse(s);
        assert_eq!(k, SessionKey::Unknown(s.to_string()));
        assert_eq!(k.synthesize(), s);
    }

    #[test]
    fn fork_preserves_everything_but_sub_id() {
        let k = SessionKey::channel_peer(
            "a",
            "telegram",
            "acct1",
            PeerKind::Dm,
            "user42",
            Some("t1".to_string()),
            None,
        );
        let forked = k.fork("cron_999");
        match forked {
            SessionKey::ChannelPeer(c) => {
                assert_eq!(c.agent_id, "a");
                assert_eq!(c.channel_id, "telegram");
                assert_eq!(c.account_id, "acct1");
                assert_eq!(c.peer_kind, PeerKind::Dm);
                assert_eq!(c.peer_id, "user42");
                assert_eq!(c.thread_id, Some("t1".to_string()));
                assert_eq!(c.sub_id, Some("cron_999".to_string()));
            }
            _ => panic!("expected ChannelPeer"),
        }
    }

    #[test]
    fn base_strips_sub_id() {
        let k = SessionKey::main("a", Some("cron_1".to_string()));
        assert_eq!(k.base(), SessionKey::main("a", None));
    }

    #[test]
    fn new_sub_id_prefixes_differ_by_path() {
        assert!(new_sub_id().starts_with("sub_"));
        assert!(new_cron_sub_id().starts_with("cron_"));
    }
}
