//! Line protocol definitions
//!
//! UTF-8, newline-delimited text in both directions. There is no framing
//! beyond the newline and no escaping: a body containing `\n` is simply
//! split into two lines by the reader.
//!
//! Client → server lines are classified into [`ClientLine`]; server →
//! client lines are built with the `format_*` helpers and classified on
//! the client side into [`ServerLine`].

use chrono::Local;

use crate::types::TypingState;

/// Handshake prefix, first line only
pub const JOIN_PREFIX: &str = "__JOIN__:";
/// Typing control prefix
pub const TYPING_PREFIX: &str = "__TYPING__:";
/// Whisper command
pub const WHISPER_COMMAND: &str = "/w";
/// Tag used for system lines
pub const SYS_TAG: &str = "SYS";
/// Roster payload keyword
pub const USERS_KEYWORD: &str = "USERS";
/// Name used when the handshake does not supply one
pub const DEFAULT_NAME: &str = "Guest";

const JOINED_SUFFIX: &str = " has joined";
const LEFT_SUFFIX: &str = " has left";
const TYPING_KEYWORD: &str = "TYPING";

/// Client → Server line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientLine {
    /// `__JOIN__:<name>`, only meaningful as the first line
    Join(String),
    /// `__TYPING__:on` / `__TYPING__:off`
    Typing(TypingState),
    /// `/w <target> <body>`
    Whisper { target: String, body: String },
    /// `/w` without a target or body
    MalformedWhisper,
    /// Anything else
    Chat(String),
}

impl ClientLine {
    /// Classify the first line of a connection
    ///
    /// Only here is a join line recognised.
    pub fn parse_first(line: &str) -> Self {
        match line.strip_prefix(JOIN_PREFIX) {
            Some(name) => ClientLine::Join(normalize_name(name)),
            None => Self::parse(line),
        }
    }

    /// Classify a line received after the handshake
    pub fn parse(line: &str) -> Self {
        if let Some(value) = line.strip_prefix(TYPING_PREFIX) {
            let value = value.trim();
            if value.eq_ignore_ascii_case("on") {
                return ClientLine::Typing(TypingState::On);
            }
            if value.eq_ignore_ascii_case("off") {
                return ClientLine::Typing(TypingState::Off);
            }
            return ClientLine::Chat(line.to_string());
        }

        if let Some(rest) = line.strip_prefix(WHISPER_COMMAND) {
            // "/who" is chat, "/w" and "/w ..." are whispers
            if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                return parse_whisper(rest);
            }
        }

        ClientLine::Chat(line.to_string())
    }
}

fn parse_whisper(rest: &str) -> ClientLine {
    let Some((target, body)) = rest.trim_start().split_once(char::is_whitespace) else {
        return ClientLine::MalformedWhisper;
    };
    let body = body.trim_start();
    if target.is_empty() || body.is_empty() {
        return ClientLine::MalformedWhisper;
    }
    ClientLine::Whisper {
        target: target.to_string(),
        body: body.to_string(),
    }
}

/// Clean a requested display name, defaulting to "Guest"
///
/// Roster separators and tag brackets are removed so a name can neither
/// split a `USERS` list nor forge a tag, and the system tag is reserved.
pub fn normalize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !matches!(*c, ',' | '[' | ']') && !c.is_control())
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned.eq_ignore_ascii_case(SYS_TAG) {
        DEFAULT_NAME.to_string()
    } else {
        cleaned.to_string()
    }
}

// ==================== Client-side encoding ====================

/// `__JOIN__:<name>`
pub fn join_line(name: &str) -> String {
    format!("{}{}", JOIN_PREFIX, normalize_name(name))
}

/// `__TYPING__:on|off`
pub fn typing_line(state: TypingState) -> String {
    format!("{}{}", TYPING_PREFIX, state.as_str())
}

/// `/w <target> <body>`
pub fn whisper_line(target: &str, body: &str) -> String {
    format!("{} {} {}", WHISPER_COMMAND, target, body)
}

// ==================== Server-side formatting ====================

/// Current local time as `HH:MM:SS`
pub fn timestamp() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

/// `[time] [sender] body`
pub fn format_chat(time: &str, sender: &str, body: &str) -> String {
    format!("[{}] [{}] {}", time, sender, body)
}

/// `[time] [SYS] text`
pub fn format_notice(time: &str, text: &str) -> String {
    format!("[{}] [{}] {}", time, SYS_TAG, text)
}

/// `[SYS] text`, sent to a single recipient
pub fn format_direct(text: &str) -> String {
    format!("[{}] {}", SYS_TAG, text)
}

/// `[SYS] USERS a,b,c`
pub fn format_roster(names: &[String]) -> String {
    format_direct(&format!("{} {}", USERS_KEYWORD, names.join(",")))
}

/// `<name> has joined`
pub fn joined_text(name: &str) -> String {
    format!("{}{}", name, JOINED_SUFFIX)
}

/// `<name> has left`
pub fn left_text(name: &str) -> String {
    format!("{}{}", name, LEFT_SUFFIX)
}

/// `TYPING <name> on`
pub fn typing_text(name: &str) -> String {
    format!("{} {} {}", TYPING_KEYWORD, name, TypingState::On.as_str())
}

/// Whisper as delivered to its target
pub fn whisper_delivery_text(sender: &str, body: &str) -> String {
    format!("WHISPER from {}: {}", sender, body)
}

/// Whisper as echoed to its sender
pub fn whisper_echo_text(target: &str, body: &str) -> String {
    format!("WHISPER to {}: {}", target, body)
}

/// Reply for an unknown whisper target
pub fn whisper_not_found_text(target: &str) -> String {
    format!("User '{}' not found", target)
}

/// Reply for a whisper without target or body
pub const WHISPER_USAGE_TEXT: &str = "Usage: /w <name> <message>";

// ==================== Client-side decoding ====================

/// Server → Client line, as seen by a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerLine {
    /// `[SYS] USERS a,b`
    Roster(Vec<String>),
    /// `[time] [SYS] <name> has joined`
    Joined { time: String, name: String },
    /// `[time] [SYS] <name> has left`
    Left { time: String, name: String },
    /// `[time] [SYS] TYPING <name> on`
    Typing { time: String, name: String },
    /// Any other timestamped system notice
    Notice { time: String, text: String },
    /// `[time] [sender] body`
    Chat {
        time: String,
        sender: String,
        body: String,
    },
    /// `[SYS] text`
    Direct(String),
    /// Not recognised
    Unknown(String),
}

impl ServerLine {
    /// Classify one line received from the server
    pub fn parse(line: &str) -> Self {
        if let Some(payload) = line.strip_prefix("[SYS] ") {
            return parse_direct(payload);
        }

        let Some((time, rest)) = split_bracketed(line) else {
            return ServerLine::Unknown(line.to_string());
        };
        if !is_timestamp(time) {
            return ServerLine::Unknown(line.to_string());
        }
        let Some((tag, body)) = split_bracketed(rest) else {
            return ServerLine::Unknown(line.to_string());
        };

        let time = time.to_string();
        if tag == SYS_TAG {
            parse_notice(time, body)
        } else {
            ServerLine::Chat {
                time,
                sender: tag.to_string(),
                body: body.to_string(),
            }
        }
    }
}

fn parse_direct(payload: &str) -> ServerLine {
    if let Some(csv) = payload.strip_prefix(USERS_KEYWORD) {
        if csv.is_empty() || csv.starts_with(' ') {
            let names = csv
                .split(',')
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string)
                .collect();
            return ServerLine::Roster(names);
        }
    }
    ServerLine::Direct(payload.to_string())
}

fn parse_notice(time: String, text: &str) -> ServerLine {
    if let Some(name) = text.strip_suffix(JOINED_SUFFIX) {
        return ServerLine::Joined {
            time,
            name: name.to_string(),
        };
    }
    if let Some(name) = text.strip_suffix(LEFT_SUFFIX) {
        return ServerLine::Left {
            time,
            name: name.to_string(),
        };
    }
    if let Some(name) = text
        .strip_prefix(TYPING_KEYWORD)
        .and_then(|t| t.strip_prefix(' '))
        .and_then(|t| t.strip_suffix(" on"))
    {
        return ServerLine::Typing {
            time,
            name: name.to_string(),
        };
    }
    ServerLine::Notice {
        time,
        text: text.to_string(),
    }
}

/// `[inner] rest` → `(inner, rest)`
fn split_bracketed(s: &str) -> Option<(&str, &str)> {
    s.strip_prefix('[')?.split_once("] ")
}

fn is_timestamp(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() == 8
        && b[2] == b':'
        && b[5] == b':'
        && [0, 1, 3, 4, 6, 7].iter().all(|&i| b[i].is_ascii_digit())
}
