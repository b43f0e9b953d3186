//! Header and body parsing into engine [`Message`]s.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use mail_parser::{MessageParser, MimeHeaders};

use crate::mail::{Message, MessageId};

/// Build a header-only [`Message`] from a fetched header block.
///
/// A missing or unparseable Date header leaves `date` as `None`.
pub fn parse_headers(
    id: MessageId,
    folder: &str,
    header: &[u8],
    flags: BTreeSet<String>,
    size: Option<u64>,
) -> Message {
    let mut message = Message::new(id, folder);
    message.flags = flags;
    message.size = size;

    let Some(parsed) = MessageParser::default().parse_headers(header) else {
        return message;
    };

    message.from = extract_addresses(parsed.from());
    message.to = extract_addresses(parsed.to());
    message.cc = extract_addresses(parsed.cc());
    message.subject = parsed.subject().map(str::to_string);
    message.date = parsed
        .date()
        .and_then(|d| DateTime::<Utc>::from_timestamp(d.to_timestamp(), 0));
    message
}

/// Render every address of an optional header as `Name <addr>` or `addr`.
pub fn extract_addresses(addr: Option<&mail_parser::Address>) -> Vec<String> {
    let Some(addr) = addr else {
        return Vec::new();
    };
    let render = |a: &mail_parser::Addr| -> Option<String> {
        match (a.name.as_deref(), a.address.as_deref()) {
            (Some(name), Some(address)) => Some(format!("{name} <{address}>")),
            (None, Some(address)) => Some(address.to_string()),
            (Some(name), None) => Some(name.to_string()),
            (None, None) => None,
        }
    };
    match addr {
        mail_parser::Address::List(addrs) => addrs.iter().filter_map(render).collect(),
        mail_parser::Address::Group(groups) => groups
            .iter()
            .flat_map(|g| g.addresses.iter().filter_map(render))
            .collect(),
    }
}

/// Extract readable body text from a complete raw message.
pub fn extract_body(raw: &[u8]) -> Option<String> {
    let parsed = MessageParser::default().parse(raw)?;
    if let Some(text) = parsed.body_text(0) {
        return Some(text.to_string());
    }
    if let Some(html) = parsed.body_html(0) {
        return Some(strip_html(html.as_ref()));
    }
    for part in parsed.attachments() {
        if let Some(ct) = MimeHeaders::content_type(part)
            && ct.ctype() == "text"
            && let Ok(text) = std::str::from_utf8(part.contents())
        {
            return Some(text.to_string());
        }
    }
    None
}

/// Strip HTML tags from content (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}
