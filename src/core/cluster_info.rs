// src/core/cluster_info.rs

//! `parse_cib`: extracts `(server_name, role, host)` triples from the
//! opaque `pcs cluster cib` / `pcs status xml` text blob (§4.J). The
//! collaborator surface treats `pcs` as an opaque command executor (§1
//! Non-goals); this parser is the thin, in-scope seam the Shutdown
//! Orchestrator needs to enumerate locally-hosted servers, nothing more.

use std::fmt;

/// A clustered server's role as reported in the CIB/status blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerRole {
    Started,
    Stopped,
    Migrating,
    Unknown(String),
}

impl fmt::Display for ServerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerRole::Started => write!(f, "Started"),
            ServerRole::Stopped => write!(f, "Stopped"),
            ServerRole::Migrating => write!(f, "Migrating"),
            ServerRole::Unknown(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for ServerRole {
    fn from(raw: &str) -> Self {
        match raw {
            "Started" => ServerRole::Started,
            "Stopped" => ServerRole::Stopped,
            "Migrating" | "Promoting" | "Demoting" => ServerRole::Migrating,
            other => ServerRole::Unknown(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStatus {
    pub name: String,
    pub role: ServerRole,
    pub host: Option<String>,
}

/// Extracts `attr="value"` from a tag fragment, tolerating any attribute
/// order.
fn extract_attr(fragment: &str, attr: &str) -> Option<String> {
    let needle = format!("{attr}=\"");
    let start = fragment.find(&needle)? + needle.len();
    let end = fragment[start..].find('"')? + start;
    Some(fragment[start..end].to_string())
}

/// Parses every `<resource ...> ... </resource>` (or self-closed
/// `<resource .../>`) block out of a `pcs status xml`-shaped blob. Only
/// the fields the Shutdown Orchestrator's state machine consumes —
/// resource id, role, and the node it's currently running on — are
/// extracted; everything else in the blob is ignored.
pub fn parse_cib(xml: &str) -> Vec<ServerStatus> {
    let mut out = Vec::new();
    let mut rest = xml;

    while let Some(tag_start) = rest.find("<resource ") {
        rest = &rest[tag_start..];
        let tag_end = match rest.find('>') {
            Some(i) => i + 1,
            None => break,
        };
        let opening_tag = &rest[..tag_end];

        let Some(name) = extract_attr(opening_tag, "id") else {
            rest = &rest[tag_end..];
            continue;
        };
        let role = extract_attr(opening_tag, "role")
            .map(|r| ServerRole::from(r.as_str()))
            .unwrap_or(ServerRole::Unknown(String::new()));

        // A self-closed `<resource .../>` has no nested `<node>`; only
        // scan the body for an element tag with an actual closing tag.
        let body_and_rest = &rest[tag_end..];
        let host = if opening_tag.trim_end().ends_with("/>") {
            None
        } else {
            let close = body_and_rest.find("</resource>").unwrap_or(body_and_rest.len());
            let body = &body_and_rest[..close];
            body.find("<node ")
                .and_then(|i| body[i..].find('>').map(|e| &body[i..i + e + 1]))
                .and_then(|node_tag| extract_attr(node_tag, "name"))
        };

        out.push(ServerStatus { name, role, host });
        rest = body_and_rest;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_started_resource_with_node() {
        let xml = r#"<resources>
          <resource id="s1" resource_agent="ocf:anvil:server" role="Started" active="true">
            <node name="node1" id="1" cached="false"/>
          </resource>
        </resources>"#;
        let servers = parse_cib(xml);
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].name, "s1");
        assert_eq!(servers[0].role, ServerRole::Started);
        assert_eq!(servers[0].host.as_deref(), Some("node1"));
    }

    #[test]
    fn parses_stopped_self_closed_resource() {
        let xml = r#"<resource id="s2" role="Stopped" active="false"/>"#;
        let servers = parse_cib(xml);
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].role, ServerRole::Stopped);
        assert_eq!(servers[0].host, None);
    }

    #[test]
    fn parses_multiple_resources() {
        let xml = r#"
          <resource id="s1" role="Started"><node name="node1"/></resource>
          <resource id="s2" role="Migrating"><node name="node2"/></resource>
        "#;
        let servers = parse_cib(xml);
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[1].role, ServerRole::Migrating);
    }

    #[test]
    fn unknown_role_preserved_verbatim() {
        let xml = r#"<resource id="s1" role="Promoted"/>"#;
        let servers = parse_cib(xml);
        assert_eq!(servers[0].role, ServerRole::Unknown("Promoted".to_string()));
    }
}
