//! Blocking IMAP4rev1 mailbox over rustls.
//!
//! One `ImapMailbox` is one authenticated session. The session logs out when
//! dropped, so holding it in a scope is enough to guarantee release on every
//! exit path.

use std::collections::BTreeSet;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use secrecy::ExposeSecret;
use tracing::{debug, info, trace, warn};

use crate::config::AccountConfig;
use crate::error::MailboxError;
use crate::mail::message::{extract_body, parse_headers};
use crate::mail::{Mailbox, Message, MessageId, SEEN_FLAG};

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

const READ_TIMEOUT: Duration = Duration::from_secs(60);
const DELETED_FLAG: &str = "\\Deleted";

static FETCH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\* \d+ FETCH \(").expect("valid regex"));
static UID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bUID (\d+)").expect("valid regex"));
static FLAGS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bFLAGS \(([^)]*)\)").expect("valid regex"));
static SIZE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bRFC822\.SIZE (\d+)").expect("valid regex"));
static LIST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\* LIST \(([^)]*)\) (?:"(?:[^"\\]|\\.)*"|NIL) (.+)$"#).expect("valid regex")
});

/// One untagged server response, with any literals pulled out of the text.
///
/// Each literal leaves its `{N}` marker in `text`.
#[derive(Debug, Default, Clone)]
struct Untagged {
    text: String,
    literals: Vec<Vec<u8>>,
}

/// Fields of interest from a `FETCH` response.
#[derive(Debug, Default)]
struct FetchData {
    uid: Option<u32>,
    flags: BTreeSet<String>,
    size: Option<u64>,
    literal: Option<Vec<u8>>,
}

/// Authenticated IMAP session implementing [`Mailbox`].
pub struct ImapMailbox {
    stream: BufReader<TlsStream>,
    next_tag: u32,
    /// `MOVE` advertised at connect time.
    supports_move: bool,
    /// `UIDPLUS` advertised at connect time (enables `UID EXPUNGE`).
    supports_uidplus: bool,
    selected: Option<String>,
    trash_folder: String,
}

impl ImapMailbox {
    /// Connect over TLS, log in and negotiate capabilities.
    pub fn connect(config: &AccountConfig, trash_folder: &str) -> Result<Self, MailboxError> {
        let connect_err = |reason: String| MailboxError::ConnectFailed {
            host: config.imap_host.clone(),
            port: config.imap_port,
            reason,
        };

        let tcp = TcpStream::connect((&*config.imap_host, config.imap_port))
            .map_err(|e| connect_err(e.to_string()))?;
        tcp.set_read_timeout(Some(READ_TIMEOUT))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name = rustls_pki_types::ServerName::try_from(config.imap_host.clone())
            .map_err(|e| connect_err(e.to_string()))?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)?;

        let mut session = Self {
            stream: BufReader::new(rustls::StreamOwned::new(conn, tcp)),
            next_tag: 1,
            supports_move: false,
            supports_uidplus: false,
            selected: None,
            trash_folder: trash_folder.to_string(),
        };

        let greeting = session.read_line()?;
        if !greeting.starts_with("* OK") && !greeting.starts_with("* PREAUTH") {
            return Err(MailboxError::Protocol(format!(
                "unexpected greeting: {}",
                greeting.trim_end()
            )));
        }

        session.login(&config.username, config.password.expose_secret())?;
        session.negotiate_capabilities()?;

        info!(
            host = %config.imap_host,
            supports_move = session.supports_move,
            "IMAP session established"
        );
        Ok(session)
    }

    fn login(&mut self, user: &str, password: &str) -> Result<(), MailboxError> {
        let cmd = format!("LOGIN {} {}", quote(user), quote(password));
        match self.command(&cmd) {
            Ok(_) => Ok(()),
            Err(MailboxError::CommandFailed { .. }) => Err(MailboxError::AuthFailed {
                user: user.to_string(),
            }),
            Err(e) => Err(e),
        }
    }

    fn negotiate_capabilities(&mut self) -> Result<(), MailboxError> {
        let responses = self.command("CAPABILITY")?;
        let caps = parse_capabilities(&responses);
        self.supports_move = caps.contains("MOVE");
        self.supports_uidplus = caps.contains("UIDPLUS");
        Ok(())
    }

    fn require_selected(&self) -> Result<(), MailboxError> {
        if self.selected.is_some() {
            Ok(())
        } else {
            Err(MailboxError::NoFolderSelected)
        }
    }

    fn store(&mut self, id: MessageId, op: &str, flag: &str) -> Result<(), MailboxError> {
        self.require_selected()?;
        self.command(&format!("UID STORE {id} {op}FLAGS.SILENT ({flag})"))?;
        Ok(())
    }

    fn expunge(&mut self, id: MessageId) -> Result<(), MailboxError> {
        if self.supports_uidplus {
            self.command(&format!("UID EXPUNGE {id}"))?;
        } else {
            self.command("EXPUNGE")?;
        }
        Ok(())
    }

    fn fetch_literal(&mut self, id: MessageId, item: &str) -> Result<Option<Vec<u8>>, MailboxError> {
        self.require_selected()?;
        let responses = self.command(&format!("UID FETCH {id} ({item})"))?;
        Ok(responses
            .iter()
            .filter_map(parse_fetch)
            .find(|f| f.uid == Some(id))
            .and_then(|f| f.literal))
    }

    // ── Wire ────────────────────────────────────────────────────────

    /// Send one tagged command and collect its untagged responses.
    fn command(&mut self, cmd: &str) -> Result<Vec<Untagged>, MailboxError> {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;

        let writer = self.stream.get_mut();
        writer.write_all(format!("{tag} {cmd}\r\n").as_bytes())?;
        writer.flush()?;
        trace!(tag = %tag, command = command_verb(cmd), "IMAP command sent");

        let tag_prefix = format!("{tag} ");
        let mut responses = Vec::new();
        loop {
            let response = self.read_response()?;
            if let Some(status) = response.text.strip_prefix(&tag_prefix) {
                if status.starts_with("OK") {
                    return Ok(responses);
                }
                return Err(MailboxError::CommandFailed {
                    command: command_verb(cmd).to_string(),
                    response: status.trim().to_string(),
                });
            }
            responses.push(response);
        }
    }

    fn read_response(&mut self) -> Result<Untagged, MailboxError> {
        let mut response = Untagged::default();
        loop {
            let line = self.read_line()?;
            let line = line.trim_end_matches(['\r', '\n']);
            response.text.push_str(line);
            match literal_length(line) {
                Some(len) => {
                    let mut buf = vec![0u8; len];
                    self.stream.read_exact(&mut buf)?;
                    response.literals.push(buf);
                }
                None => return Ok(response),
            }
        }
    }

    fn read_line(&mut self) -> Result<String, MailboxError> {
        let mut buf = Vec::new();
        let n = self.stream.read_until(b'\n', &mut buf)?;
        if n == 0 {
            return Err(MailboxError::Closed);
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

impl Mailbox for ImapMailbox {
    fn current_folder_name(&self) -> &str {
        self.selected.as_deref().unwrap_or("")
    }

    fn list_folders(&mut self) -> Result<Vec<String>, MailboxError> {
        let responses = self.command("LIST \"\" \"*\"")?;
        Ok(responses
            .iter()
            .filter_map(parse_list_response)
            .filter(|(_, selectable)| *selectable)
            .map(|(name, _)| name)
            .collect())
    }

    fn select_folder(&mut self, folder: &str) -> Result<(), MailboxError> {
        self.selected = None;
        self.command(&format!("SELECT {}", quote(folder)))?;
        debug!(folder = %folder, "Folder selected");
        self.selected = Some(folder.to_string());
        Ok(())
    }

    fn list_message_ids(&mut self) -> Result<Vec<MessageId>, MailboxError> {
        self.require_selected()?;
        let responses = self.command("UID SEARCH ALL")?;
        Ok(parse_search(&responses))
    }

    fn fetch_message(&mut self, id: MessageId) -> Result<Option<Message>, MailboxError> {
        self.require_selected()?;
        let responses =
            self.command(&format!("UID FETCH {id} (UID FLAGS RFC822.SIZE BODY.PEEK[HEADER])"))?;
        let Some(fetched) = responses
            .iter()
            .filter_map(parse_fetch)
            .find(|f| f.uid == Some(id))
        else {
            return Ok(None);
        };
        let header = fetched.literal.unwrap_or_default();
        Ok(Some(parse_headers(
            id,
            self.current_folder_name(),
            &header,
            fetched.flags,
            fetched.size,
        )))
    }

    fn fetch_body(&mut self, id: MessageId) -> Result<Option<String>, MailboxError> {
        Ok(self
            .fetch_literal(id, "BODY.PEEK[]")?
            .and_then(|raw| extract_body(&raw)))
    }

    fn fetch_raw(&mut self, id: MessageId) -> Result<Vec<u8>, MailboxError> {
        self.fetch_literal(id, "BODY.PEEK[]")?
            .ok_or(MailboxError::MessageNotFound(id))
    }

    fn apply_move(
        &mut self,
        id: MessageId,
        dest_folder: &str,
        mark_as_read_before_move: bool,
    ) -> Result<(), MailboxError> {
        self.require_selected()?;
        if mark_as_read_before_move {
            self.store(id, "+", SEEN_FLAG)?;
        }
        if self.supports_move {
            self.command(&format!("UID MOVE {id} {}", quote(dest_folder)))?;
        } else {
            self.command(&format!("UID COPY {id} {}", quote(dest_folder)))?;
            self.store(id, "+", DELETED_FLAG)?;
            self.expunge(id)?;
        }
        Ok(())
    }

    fn apply_delete(&mut self, id: MessageId, permanent: bool) -> Result<(), MailboxError> {
        self.require_selected()?;
        if permanent || self.current_folder_name() == self.trash_folder {
            self.store(id, "+", DELETED_FLAG)?;
            self.expunge(id)
        } else {
            let trash = self.trash_folder.clone();
            self.apply_move(id, &trash, false)
        }
    }

    fn set_flag(&mut self, id: MessageId, flag: &str) -> Result<(), MailboxError> {
        self.store(id, "+", flag)
    }

    fn clear_flag(&mut self, id: MessageId, flag: &str) -> Result<(), MailboxError> {
        self.store(id, "-", flag)
    }
}

impl Drop for ImapMailbox {
    fn drop(&mut self) {
        match self.command("LOGOUT") {
            Ok(_) | Err(MailboxError::Closed) => debug!("IMAP session closed"),
            Err(e) => warn!(error = %e, "IMAP logout failed"),
        }
    }
}

// ── Parsing helpers ─────────────────────────────────────────────────

/// Quote a string for use as an IMAP quoted-string.
fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        if ch == '"' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

fn unquote(s: &str) -> String {
    let inner = s
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(s);
    let mut out = String::with_capacity(inner.len());
    let mut escaped = false;
    for ch in inner.chars() {
        if ch == '\\' && !escaped {
            escaped = true;
            continue;
        }
        escaped = false;
        out.push(ch);
    }
    out
}

/// First word of a command, so credentials never reach the logs.
fn command_verb(cmd: &str) -> &str {
    cmd.split_whitespace().next().unwrap_or("")
}

/// Length of the literal announced at the end of a response line, if any.
fn literal_length(line: &str) -> Option<usize> {
    let inner = line.strip_suffix('}')?;
    let open = inner.rfind('{')?;
    inner[open + 1..].parse().ok()
}

fn parse_capabilities(responses: &[Untagged]) -> BTreeSet<String> {
    responses
        .iter()
        .filter_map(|r| r.text.strip_prefix("* CAPABILITY "))
        .flat_map(|caps| caps.split_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

fn parse_search(responses: &[Untagged]) -> Vec<MessageId> {
    responses
        .iter()
        .filter_map(|r| r.text.strip_prefix("* SEARCH"))
        .flat_map(|ids| ids.split_whitespace())
        .filter_map(|id| id.parse().ok())
        .collect()
}

fn parse_fetch(response: &Untagged) -> Option<FetchData> {
    if !FETCH_RE.is_match(&response.text) {
        return None;
    }
    let text = &response.text;
    Some(FetchData {
        uid: UID_RE
            .captures(text)
            .and_then(|c| c[1].parse().ok()),
        flags: FLAGS_RE
            .captures(text)
            .map(|c| c[1].split_whitespace().map(str::to_string).collect())
            .unwrap_or_default(),
        size: SIZE_RE
            .captures(text)
            .and_then(|c| c[1].parse().ok()),
        literal: response.literals.first().cloned(),
    })
}

/// Folder name and whether it can be selected, from one `LIST` response.
fn parse_list_response(response: &Untagged) -> Option<(String, bool)> {
    let caps = LIST_RE.captures(&response.text)?;
    let attributes = caps[1].to_ascii_lowercase();
    let selectable = !attributes.contains("\\noselect") && !attributes.contains("\\nonexistent");
    let raw_name = caps[2].trim();

    let name = if raw_name.starts_with('"') {
        unquote(raw_name)
    } else if literal_length(raw_name).is_some() {
        String::from_utf8_lossy(response.literals.first()?).into_owned()
    } else {
        raw_name.to_string()
    };
    Some((name, selectable))
}
