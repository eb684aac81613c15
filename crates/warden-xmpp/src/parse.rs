// SPDX-FileCopyrightText: 2026 Chatwarden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tolerant reader for the inbound stanza shapes the fleet must recognize.
//!
//! One WebSocket text frame carries one stanza. Anything the reader does not
//! recognize becomes [`Stanza::Other`]; inbound parsing is never an error
//! (malformed frames are logged by the caller and dropped).

use crate::stanza::{NS_DELAY, NS_PING, xml_unescape};

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Stanza {
    /// `<open/>` stream framing acknowledgement.
    StreamOpen,
    /// `<stream:features>`; `bind` is set once the stream is authenticated.
    StreamFeatures { bind: bool },
    /// SASL success.
    SaslSuccess,
    /// SASL failure; `not_authorized` distinguishes credential rejection.
    SaslFailure { not_authorized: bool },
    /// Stream-level error (`system-shutdown`, `remote-server-timeout`, ...).
    StreamError { kind: String },
    /// `<close/>`: the server is ending the stream.
    StreamEnd,
    /// Server ping we must answer.
    IqPing { id: String, from: String },
    /// IQ result; `presence_group` set for MUC-Light configuration replies,
    /// `jid` set for bind replies.
    IqResult {
        id: String,
        from: String,
        presence_group: Option<String>,
        jid: Option<String>,
    },
    /// IQ error; `code` carries the legacy error code when present.
    IqError {
        id: String,
        from: String,
        code: Option<u16>,
        not_authorized: bool,
    },
    /// Any other IQ get, answered with `feature-not-implemented`.
    IqGet { id: String, from: String },
    /// Groupchat message. `author_guid` is the lowercased occupant resource,
    /// `author_jid` the original full occupant JID (used for retraction);
    /// `delayed` marks history replays.
    Groupchat {
        id: String,
        room: String,
        author_guid: Option<String>,
        author_jid: String,
        body: String,
        delayed: bool,
    },
    /// Presence shape announcing a newly added member.
    MemberAdded { room: String, member_guid: String },
    /// Anything else.
    Other,
}

impl Stanza {
    /// Classifies a single inbound frame.
    pub fn parse(frame: &str) -> Stanza {
        let xml = frame.trim();
        let Some(tag) = opening_tag(xml) else {
            return Stanza::Other;
        };

        match tag_name(tag) {
            "open" => Stanza::StreamOpen,
            "close" => Stanza::StreamEnd,
            "success" => Stanza::SaslSuccess,
            "failure" => Stanza::SaslFailure {
                not_authorized: xml.contains("<not-authorized"),
            },
            "stream:features" | "features" => Stanza::StreamFeatures {
                bind: xml.contains("urn:ietf:params:xml:ns:xmpp-bind"),
            },
            "stream:error" | "error" => Stanza::StreamError {
                kind: stream_error_kind(xml),
            },
            "iq" => parse_iq(xml, tag),
            "message" => parse_message(xml, tag),
            "presence" => parse_presence(xml, tag),
            _ => Stanza::Other,
        }
    }
}

fn parse_iq(xml: &str, tag: &str) -> Stanza {
    let id = attr(tag, "id").unwrap_or_default().to_string();
    let from = attr(tag, "from").unwrap_or_default().to_string();
    match attr(tag, "type") {
        Some("get") if xml.contains(NS_PING) => Stanza::IqPing { id, from },
        Some("get") => Stanza::IqGet { id, from },
        Some("result") => Stanza::IqResult {
            id,
            from,
            presence_group: element_text(xml, "presence-group").map(|t| xml_unescape(t)),
            jid: element_text(xml, "jid").map(|t| xml_unescape(t)),
        },
        Some("error") => {
            let code = opening_tag_of(xml, "error")
                .and_then(|err_tag| attr(err_tag, "code"))
                .and_then(|c| c.parse().ok());
            Stanza::IqError {
                id,
                from,
                code,
                not_authorized: xml.contains("<not-authorized"),
            }
        }
        _ => Stanza::Other,
    }
}

fn parse_message(xml: &str, tag: &str) -> Stanza {
    if attr(tag, "type") != Some("groupchat") {
        return Stanza::Other;
    }
    let Some(from) = attr(tag, "from") else {
        return Stanza::Other;
    };
    let Some(body) = element_text(xml, "body") else {
        return Stanza::Other;
    };
    let (room, author) = split_jid(from);
    Stanza::Groupchat {
        id: attr(tag, "id").unwrap_or_default().to_string(),
        room: room.to_string(),
        author_guid: author.map(|a| a.to_lowercase()),
        author_jid: from.to_string(),
        body: xml_unescape(body),
        delayed: xml.contains(NS_DELAY),
    }
}

fn parse_presence(xml: &str, tag: &str) -> Stanza {
    if attr(tag, "type") == Some("unavailable") {
        return Stanza::Other;
    }
    let Some(from) = attr(tag, "from") else {
        return Stanza::Other;
    };
    // The "added as member" shape carries a member affiliation grant.
    if !xml.contains("affiliation='member'") && !xml.contains("affiliation=\"member\"") {
        return Stanza::Other;
    }
    let (room, resource) = split_jid(from);
    let member_guid = element_text(xml, "user")
        .map(|t| xml_unescape(t).to_lowercase())
        .or_else(|| resource.map(|r| r.to_lowercase()));
    match member_guid {
        Some(member_guid) if !member_guid.is_empty() => Stanza::MemberAdded {
            room: room.to_string(),
            member_guid,
        },
        _ => Stanza::Other,
    }
}

fn stream_error_kind(xml: &str) -> String {
    for kind in ["system-shutdown", "remote-server-timeout", "conflict", "not-authorized"] {
        if xml.contains(kind) {
            return kind.to_string();
        }
    }
    "unknown".to_string()
}

/// The opening tag of a frame, without the angle brackets' content beyond it.
fn opening_tag(xml: &str) -> Option<&str> {
    let start = xml.find('<')?;
    let end = xml[start..].find('>')?;
    Some(&xml[start..=start + end])
}

/// The opening tag of the first `name` element inside the frame.
fn opening_tag_of<'a>(xml: &'a str, name: &str) -> Option<&'a str> {
    let needle = format!("<{name}");
    let mut offset = 0;
    loop {
        let pos = offset + xml[offset..].find(&needle)?;
        let after = xml.as_bytes().get(pos + needle.len()).copied();
        // Require a real tag boundary, not a prefix of a longer name.
        if matches!(after, Some(b' ') | Some(b'>') | Some(b'/')) {
            let end = xml[pos..].find('>')?;
            return Some(&xml[pos..=pos + end]);
        }
        offset = pos + 1;
    }
}

fn tag_name(tag: &str) -> &str {
    let inner = tag.trim_start_matches('<');
    let end = inner
        .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
        .unwrap_or(inner.len());
    &inner[..end]
}

/// Attribute lookup within a single opening tag. Values may be quoted with
/// either quote character.
fn attr<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    for quote in ['\'', '"'] {
        let needle = format!("{name}={quote}");
        let mut offset = 0;
        while let Some(rel) = tag[offset..].find(&needle) {
            let pos = offset + rel;
            // Must be preceded by whitespace so `from=` does not match `xfrom=`.
            let preceded_ok = pos == 0
                || tag
                    .as_bytes()
                    .get(pos - 1)
                    .is_some_and(|b| b.is_ascii_whitespace());
            if preceded_ok {
                let value_start = pos + needle.len();
                let value_end = tag[value_start..].find(quote)?;
                return Some(&tag[value_start..value_start + value_end]);
            }
            offset = pos + needle.len();
        }
    }
    None
}

/// Text content of the first non-empty `name` element.
fn element_text<'a>(xml: &'a str, name: &str) -> Option<&'a str> {
    let tag = opening_tag_of(xml, name)?;
    if tag.ends_with("/>") {
        return None;
    }
    let tag_pos = xml.find(tag)?;
    let content_start = tag_pos + tag.len();
    let close = format!("</{name}>");
    let content_end = xml[content_start..].find(&close)?;
    let text = &xml[content_start..content_start + content_end];
    if text.is_empty() { None } else { Some(text) }
}

fn split_jid(jid: &str) -> (&str, Option<&str>) {
    match jid.split_once('/') {
        Some((bare, resource)) if !resource.is_empty() => (bare, Some(resource)),
        Some((bare, _)) => (bare, None),
        None => (jid, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_server_ping() {
        let frame = "<iq type='get' id='p1' from='chat.example.com'><ping xmlns='urn:xmpp:ping'/></iq>";
        assert_eq!(
            Stanza::parse(frame),
            Stanza::IqPing {
                id: "p1".into(),
                from: "chat.example.com".into()
            }
        );
    }

    #[test]
    fn classifies_other_get_as_unimplemented_candidate() {
        let frame = "<iq type='get' id='v1' from='x'><query xmlns='jabber:iq:version'/></iq>";
        assert_eq!(
            Stanza::parse(frame),
            Stanza::IqGet {
                id: "v1".into(),
                from: "x".into()
            }
        );
    }

    #[test]
    fn extracts_presence_group_from_config_result() {
        let frame = "<iq type='result' id='q1' from='club-e1-general@muc.x'>\
                     <query xmlns='urn:xmpp:muclight:0#configuration'>\
                     <presence-group>club-e1@sg.x/general</presence-group></query></iq>";
        match Stanza::parse(frame) {
            Stanza::IqResult {
                from,
                presence_group,
                ..
            } => {
                assert_eq!(from, "club-e1-general@muc.x");
                assert_eq!(presence_group.as_deref(), Some("club-e1@sg.x/general"));
            }
            other => panic!("unexpected stanza: {other:?}"),
        }
    }

    #[test]
    fn iq_error_carries_404() {
        let frame = "<iq type='error' id='q2' from='club-eX-general@muc.x'>\
                     <error type='cancel' code='404'><item-not-found/></error></iq>";
        match Stanza::parse(frame) {
            Stanza::IqError { code, from, .. } => {
                assert_eq!(code, Some(404));
                assert_eq!(from, "club-eX-general@muc.x");
            }
            other => panic!("unexpected stanza: {other:?}"),
        }
    }

    #[test]
    fn iq_error_not_authorized() {
        let frame = "<iq type='error' id='a1' from='x'>\
                     <error type='auth'><not-authorized/></error></iq>";
        match Stanza::parse(frame) {
            Stanza::IqError { not_authorized, .. } => assert!(not_authorized),
            other => panic!("unexpected stanza: {other:?}"),
        }
    }

    #[test]
    fn groupchat_message_with_author() {
        let frame = "<message type='groupchat' from='club-e1-general@muc.x/User-GUID' id='m1'>\
                     <body>hello &amp; more</body></message>";
        assert_eq!(
            Stanza::parse(frame),
            Stanza::Groupchat {
                id: "m1".into(),
                room: "club-e1-general@muc.x".into(),
                author_guid: Some("user-guid".into()),
                author_jid: "club-e1-general@muc.x/User-GUID".into(),
                body: "hello & more".into(),
                delayed: false,
            }
        );
    }

    #[test]
    fn delayed_groupchat_is_flagged() {
        let frame = "<message type='groupchat' from='r@muc.x/u'><body>old</body>\
                     <delay xmlns='urn:xmpp:delay' stamp='2026-01-01T00:00:00Z'/></message>";
        match Stanza::parse(frame) {
            Stanza::Groupchat { delayed, .. } => assert!(delayed),
            other => panic!("unexpected stanza: {other:?}"),
        }
    }

    #[test]
    fn chat_type_message_is_other() {
        let frame = "<message type='chat' from='u@x'><body>dm</body></message>";
        assert_eq!(Stanza::parse(frame), Stanza::Other);
    }

    #[test]
    fn bodyless_groupchat_is_other() {
        let frame = "<message type='groupchat' from='r@muc.x/u'><subject>t</subject></message>";
        assert_eq!(Stanza::parse(frame), Stanza::Other);
    }

    #[test]
    fn member_added_presence() {
        let frame = "<presence from='club-e1-general@muc.x/New-Member'>\
                     <x xmlns='urn:xmpp:muclight:0#affiliations'>\
                     <user affiliation='member'>New-Member</user></x></presence>";
        assert_eq!(
            Stanza::parse(frame),
            Stanza::MemberAdded {
                room: "club-e1-general@muc.x".into(),
                member_guid: "new-member".into(),
            }
        );
    }

    #[test]
    fn plain_presence_is_other() {
        assert_eq!(Stanza::parse("<presence from='r@muc.x/u'/>"), Stanza::Other);
        assert_eq!(
            Stanza::parse("<presence from='r@muc.x/u' type='unavailable'/>"),
            Stanza::Other
        );
    }

    #[test]
    fn sasl_outcomes() {
        assert_eq!(
            Stanza::parse("<success xmlns='urn:ietf:params:xml:ns:xmpp-sasl'/>"),
            Stanza::SaslSuccess
        );
        assert_eq!(
            Stanza::parse(
                "<failure xmlns='urn:ietf:params:xml:ns:xmpp-sasl'><not-authorized/></failure>"
            ),
            Stanza::SaslFailure {
                not_authorized: true
            }
        );
    }

    #[test]
    fn stream_error_kinds() {
        match Stanza::parse("<stream:error><system-shutdown xmlns='urn:ietf:params:xml:ns:xmpp-streams'/></stream:error>") {
            Stanza::StreamError { kind } => assert_eq!(kind, "system-shutdown"),
            other => panic!("unexpected stanza: {other:?}"),
        }
    }

    #[test]
    fn garbage_is_other() {
        assert_eq!(Stanza::parse("not xml at all"), Stanza::Other);
        assert_eq!(Stanza::parse(""), Stanza::Other);
        assert_eq!(Stanza::parse("<unterminated"), Stanza::Other);
    }

    #[test]
    fn attr_requires_word_boundary() {
        let tag = "<iq notfrom='a' from='b'>";
        assert_eq!(attr(tag, "from"), Some("b"));
    }

    #[test]
    fn element_text_skips_self_closing() {
        assert_eq!(element_text("<q><body/></q>", "body"), None);
        assert_eq!(element_text("<q><body>x</body></q>", "body"), Some("x"));
    }
}
