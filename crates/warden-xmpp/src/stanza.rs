// SPDX-FileCopyrightText: 2026 Chatwarden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outgoing stanza construction.
//!
//! Builders produce complete wire frames. All interpolated text is
//! XML-escaped; JIDs and ids are caller-validated.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

/// Namespace of the WebSocket stream framing elements.
pub const NS_FRAMING: &str = "urn:ietf:params:xml:ns:xmpp-framing";
/// Namespace of SASL negotiation.
pub const NS_SASL: &str = "urn:ietf:params:xml:ns:xmpp-sasl";
/// Namespace of resource binding.
pub const NS_BIND: &str = "urn:ietf:params:xml:ns:xmpp-bind";
/// Namespace of the MUC-Light configuration query.
pub const NS_MUCLIGHT_CONFIG: &str = "urn:xmpp:muclight:0#configuration";
/// Namespace of supergroup subscription management.
pub const NS_SUPERGROUP: &str = "faceit:supergroup:group:0";
/// Namespace of XMPP pings.
pub const NS_PING: &str = "urn:xmpp:ping";
/// Namespace of history-replay delay tags.
pub const NS_DELAY: &str = "urn:xmpp:delay";
/// Namespace of message upload attachments.
pub const NS_UPLOAD: &str = "msg:upload:1";

/// Escapes text for inclusion in element content or attribute values.
pub fn xml_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Reverses [`xml_escape`] for the entity references we emit and the
/// numeric references the upstream occasionally sends.
pub fn xml_unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        let Some(end) = rest.find(';') else {
            out.push_str(rest);
            return out;
        };
        let entity = &rest[1..end];
        match entity {
            "amp" => out.push('&'),
            "lt" => out.push('<'),
            "gt" => out.push('>'),
            "quot" => out.push('"'),
            "apos" => out.push('\''),
            _ => {
                let decoded = entity
                    .strip_prefix("#x")
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                    .and_then(char::from_u32);
                match decoded {
                    Some(c) => out.push(c),
                    None => out.push_str(&rest[..=end]),
                }
            }
        }
        rest = &rest[end + 1..];
    }
    out.push_str(rest);
    out
}

/// Stream-open frame for the WebSocket framing dialect.
pub fn open_stream(domain: &str) -> String {
    format!(
        "<open xmlns='{NS_FRAMING}' to='{}' version='1.0'/>",
        xml_escape(domain)
    )
}

/// Stream-close frame.
pub fn close_stream() -> String {
    format!("<close xmlns='{NS_FRAMING}'/>")
}

/// SASL-PLAIN payload: `{authzid}\0{authcid}\0{password}` where authzid is
/// `{accountGuid}@{domain}` and the password is the chat-session token.
pub fn sasl_plain_payload(account_guid: &str, domain: &str, chat_token: &str) -> String {
    BASE64.encode(format!("{account_guid}@{domain}\0{account_guid}\0{chat_token}"))
}

/// SASL auth frame carrying a PLAIN payload.
pub fn sasl_auth(payload_b64: &str) -> String {
    format!("<auth xmlns='{NS_SASL}' mechanism='PLAIN'>{payload_b64}</auth>")
}

/// Resource-bind IQ.
pub fn bind(id: &str, resource: &str) -> String {
    format!(
        "<iq type='set' id='{}'><bind xmlns='{NS_BIND}'><resource>{}</resource></bind></iq>",
        xml_escape(id),
        xml_escape(resource)
    )
}

/// Initial global presence announcing the worker online.
pub fn initial_presence() -> String {
    "<presence/>".to_string()
}

/// MUC-Light configuration query for a room; the reply carries the room's
/// presence group.
pub fn muclight_config_query(id: &str, room_jid: &str) -> String {
    format!(
        "<iq type='get' id='{}' to='{}'><query xmlns='{NS_MUCLIGHT_CONFIG}'/></iq>",
        xml_escape(id),
        xml_escape(room_jid)
    )
}

/// Supergroup subscribe/unsubscribe IQ addressed to a presence group.
pub fn supergroup_subscribe(id: &str, presence_group: &str, subscribe: bool) -> String {
    format!(
        "<iq type='set' id='{}' to='{}'><query xmlns='{NS_SUPERGROUP}'><subscribe set='{}'/></query></iq>",
        xml_escape(id),
        xml_escape(presence_group),
        subscribe
    )
}

/// Result for an inbound server ping.
pub fn ping_result(id: &str, to: &str) -> String {
    format!(
        "<iq type='result' id='{}' to='{}'/>",
        xml_escape(id),
        xml_escape(to)
    )
}

/// `feature-not-implemented` error reply for unsupported IQ gets, so the
/// upstream stops retrying.
pub fn feature_not_implemented(id: &str, to: &str) -> String {
    format!(
        "<iq type='error' id='{}' to='{}'><error type='cancel'>\
         <feature-not-implemented xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/>\
         </error></iq>",
        xml_escape(id),
        xml_escape(to)
    )
}

/// Groupchat message with optional upload attachment.
pub fn groupchat_message(id: &str, room_jid: &str, body: &str, attachment_id: Option<&str>) -> String {
    let attachment = match attachment_id {
        Some(img) => format!("<x xmlns='{NS_UPLOAD}'><img id='{}'/></x>", xml_escape(img)),
        None => String::new(),
    };
    format!(
        "<message type='groupchat' id='{}' to='{}'><body>{}</body>{attachment}</message>",
        xml_escape(id),
        xml_escape(room_jid),
        xml_escape(body)
    )
}

/// Direct chat message (welcome messages to new members).
pub fn direct_message(id: &str, to_jid: &str, body: &str) -> String {
    format!(
        "<message type='chat' id='{}' to='{}'><body>{}</body></message>",
        xml_escape(id),
        xml_escape(to_jid),
        xml_escape(body)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_round_trip() {
        let raw = "a <b> & \"c\" 'd'";
        assert_eq!(xml_unescape(&xml_escape(raw)), raw);
    }

    #[test]
    fn unescape_numeric_references() {
        assert_eq!(xml_unescape("&#65;&#x42;"), "AB");
        assert_eq!(xml_unescape("no entities"), "no entities");
        // Unknown entities pass through untouched.
        assert_eq!(xml_unescape("&nope;"), "&nope;");
        // Truncated reference does not panic.
        assert_eq!(xml_unescape("dangling &amp"), "dangling &amp");
    }

    #[test]
    fn sasl_payload_shape() {
        use base64::Engine;
        let payload = sasl_plain_payload("abc-123", "chat.example.com", "tok");
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(payload)
            .unwrap();
        assert_eq!(decoded, b"abc-123@chat.example.com\0abc-123\0tok");
    }

    #[test]
    fn muclight_query_addresses_room() {
        let iq = muclight_config_query("q1", "club-e1-general@muc.x");
        assert!(iq.contains("to='club-e1-general@muc.x'"));
        assert!(iq.contains(NS_MUCLIGHT_CONFIG));
        assert!(iq.contains("type='get'"));
    }

    #[test]
    fn subscribe_flag_is_literal() {
        let on = supergroup_subscribe("s1", "club-e1@sg.x/general", true);
        assert!(on.contains("<subscribe set='true'/>"));
        assert!(on.contains(NS_SUPERGROUP));
        let off = supergroup_subscribe("s2", "club-e1@sg.x/general", false);
        assert!(off.contains("<subscribe set='false'/>"));
    }

    #[test]
    fn groupchat_message_with_attachment() {
        let msg = groupchat_message("m1", "room@muc.x", "hello & welcome", Some("img-9"));
        assert!(msg.contains("<body>hello &amp; welcome</body>"));
        assert!(msg.contains("<img id='img-9'/>"));
        let plain = groupchat_message("m2", "room@muc.x", "hi", None);
        assert!(!plain.contains("<x "));
    }

    #[test]
    fn body_text_is_escaped() {
        let msg = direct_message("m1", "user@x", "<script>alert('hi')</script>");
        assert!(!msg.contains("<script>"));
        assert!(msg.contains("&lt;script&gt;"));
    }
}
