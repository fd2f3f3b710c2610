//! Pure parse/build functions for the versioned MQTT topic grammar:
//! `v1/<tenant>/<site>/<device_id>[/group/<group_id>]/<kind>[/<subkey>]`.
//!
//! No I/O, no state — these are the "C2 topic codec" half of the
//! protocol layer. The other half, envelope decoding, lives in
//! `crate::envelope`.

use crate::error::CoreError;
use crate::ids::{DeviceId, GroupId, SiteId, TenantId};
use std::fmt;

/// What a topic addresses: a single device, or a broadcast group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceRef {
    Device(DeviceId),
    Group(GroupId),
}

impl fmt::Display for DeviceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device(id) => write!(f, "{id}"),
            Self::Group(id) => write!(f, "group/{id}"),
        }
    }
}

/// The message category named by the last path segment(s) of a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Kind {
    State,
    Attr,
    Lwt,
    Telemetry,
    Evt,
    CmdReq,
    CmdAck,
    CmdRes,
    /// A kind segment (or path) this version of the codec does not
    /// recognize. Parsing still succeeds — routing, not parsing, is
    /// where unknown kinds get dropped and counted (spec.md 4.2/4.7).
    Unknown(String),
}

impl Kind {
    fn as_path(&self) -> &str {
        match self {
            Self::State => "state",
            Self::Attr => "attr",
            Self::Lwt => "lwt",
            Self::Telemetry => "telemetry",
            Self::Evt => "evt",
            Self::CmdReq => "cmd/req",
            Self::CmdAck => "cmd/ack",
            Self::CmdRes => "cmd/res",
            Self::Unknown(raw) => raw,
        }
    }
}

/// A fully parsed topic address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicAddress {
    pub tenant: TenantId,
    pub site: SiteId,
    pub target: DeviceRef,
    pub kind: Kind,
    pub subkey: Option<String>,
}

/// Parse a topic string into its typed address, or a `Protocol` error
/// describing exactly which part was malformed.
pub fn parse(topic: &str) -> Result<TopicAddress, CoreError> {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() < 5 {
        return Err(CoreError::protocol(format!(
            "topic '{topic}' has too few segments"
        )));
    }
    if parts[0] != "v1" {
        return Err(CoreError::protocol(format!(
            "topic '{topic}' has unsupported version prefix '{}'",
            parts[0]
        )));
    }

    let tenant = TenantId::new(parts[1])?;
    let site = SiteId::new(parts[2])?;

    let (target, next) = if parts[3] == "group" {
        let group = parts
            .get(4)
            .ok_or_else(|| CoreError::protocol(format!("topic '{topic}' missing group id")))?;
        (DeviceRef::Group(GroupId::new(*group)?), 5)
    } else {
        (DeviceRef::Device(DeviceId::new(parts[3])?), 4)
    };

    let remaining = &parts[next..];
    if remaining.is_empty() {
        return Err(CoreError::protocol(format!(
            "topic '{topic}' is missing a kind"
        )));
    }

    let (kind, subkey) = match remaining[0] {
        "state" | "attr" | "lwt" => {
            if remaining.len() != 1 {
                return Err(CoreError::protocol(format!(
                    "topic '{topic}' has unexpected trailing segments after '{}'",
                    remaining[0]
                )));
            }
            let kind = match remaining[0] {
                "state" => Kind::State,
                "attr" => Kind::Attr,
                _ => Kind::Lwt,
            };
            (kind, None)
        }
        "telemetry" | "evt" => {
            let subkey = if remaining.len() > 1 {
                Some(remaining[1..].join("/"))
            } else {
                None
            };
            let kind = if remaining[0] == "telemetry" {
                Kind::Telemetry
            } else {
                Kind::Evt
            };
            (kind, subkey)
        }
        "cmd" => {
            if remaining.len() != 2 {
                return Err(CoreError::protocol(format!(
                    "topic '{topic}' has a malformed cmd kind"
                )));
            }
            let kind = match remaining[1] {
                "req" => Kind::CmdReq,
                "ack" => Kind::CmdAck,
                "res" => Kind::CmdRes,
                other => {
                    return Err(CoreError::protocol(format!(
                        "topic '{topic}' has unknown cmd subkind '{other}'"
                    )));
                }
            };
            (kind, None)
        }
        _ => (Kind::Unknown(remaining.join("/")), None),
    };

    Ok(TopicAddress {
        tenant,
        site,
        target,
        kind,
        subkey,
    })
}

/// Reconstruct the topic string for an address. `build(parse(t)) == t`
/// for every valid `t`.
pub fn build(addr: &TopicAddress) -> String {
    let mut s = format!(
        "v1/{}/{}/{}/{}",
        addr.tenant,
        addr.site,
        addr.target,
        addr.kind.as_path()
    );
    if let Some(subkey) = &addr.subkey {
        s.push('/');
        s.push_str(subkey);
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    const TENANT: &str = "acme-corp-network-001";
    const SITE: &str = "building-west-annex-9";
    const DEVICE: &str = "router-core-floor2-07";
    const GROUP: &str = "all-floor2-aps-bcast1";

    fn topic(kind: &str) -> String {
        format!("v1/{TENANT}/{SITE}/{DEVICE}/{kind}")
    }

    #[test]
    fn parses_state_topic() {
        let addr = parse(&topic("state")).unwrap();
        assert_eq!(addr.tenant.as_str(), TENANT);
        assert_eq!(addr.site.as_str(), SITE);
        assert_eq!(addr.target, DeviceRef::Device(DeviceId::new(DEVICE).unwrap()));
        assert_eq!(addr.kind, Kind::State);
        assert!(addr.subkey.is_none());
    }

    #[test]
    fn parses_telemetry_with_metric_subkey() {
        let t = topic("telemetry/cpu-load");
        let addr = parse(&t).unwrap();
        assert_eq!(addr.kind, Kind::Telemetry);
        assert_eq!(addr.subkey.as_deref(), Some("cpu-load"));
    }

    #[test]
    fn parses_evt_with_event_type() {
        let t = topic("evt/link-flap");
        let addr = parse(&t).unwrap();
        assert_eq!(addr.kind, Kind::Evt);
        assert_eq!(addr.subkey.as_deref(), Some("link-flap"));
    }

    #[test]
    fn parses_cmd_variants() {
        assert_eq!(parse(&topic("cmd/req")).unwrap().kind, Kind::CmdReq);
        assert_eq!(parse(&topic("cmd/ack")).unwrap().kind, Kind::CmdAck);
        assert_eq!(parse(&topic("cmd/res")).unwrap().kind, Kind::CmdRes);
    }

    #[test]
    fn parses_group_broadcast_address() {
        let t = format!("v1/{TENANT}/{SITE}/group/{GROUP}/cmd/req");
        let addr = parse(&t).unwrap();
        assert_eq!(addr.target, DeviceRef::Group(GroupId::new(GROUP).unwrap()));
        assert_eq!(addr.kind, Kind::CmdReq);
    }

    #[test]
    fn unknown_kind_parses_but_is_marked_unknown() {
        let t = topic("diagnostics/ping");
        let addr = parse(&t).unwrap();
        assert_eq!(addr.kind, Kind::Unknown("diagnostics/ping".to_string()));
    }

    #[test]
    fn rejects_wrong_version_prefix() {
        let t = format!("v2/{TENANT}/{SITE}/{DEVICE}/state");
        assert!(parse(&t).is_err());
    }

    #[test]
    fn rejects_malformed_cmd_subkind() {
        let t = topic("cmd/bogus");
        assert!(parse(&t).is_err());
    }

    #[test]
    fn build_is_inverse_of_parse_for_every_kind() {
        let topics = vec![
            topic("state"),
            topic("attr"),
            topic("lwt"),
            topic("telemetry/rssi"),
            topic("evt/reboot"),
            topic("cmd/req"),
            topic("cmd/ack"),
            topic("cmd/res"),
            topic("diagnostics/ping/extra"),
            format!("v1/{TENANT}/{SITE}/group/{GROUP}/cmd/req"),
        ];
        for t in topics {
            let addr = parse(&t).unwrap();
            assert_eq!(build(&addr), t);
        }
    }
}
