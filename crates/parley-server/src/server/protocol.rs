// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Chat wire protocol.
//!
//! Line-oriented UTF-8 text, one frame per LF-terminated line.
//!
//! Client to server:
//! ```text
//! REG <name>
//! MESG <text>
//! PMSG <recipient> <text>
//! EXIT
//! ```
//!
//! Server to client:
//! ```text
//! <N> [<name1> <name2> ...]          roster (REG and EXIT replies)
//! <name> has joined the chat
//! <name> has left the chat
//! <sender>: <text>
//! Private message from <sender>: <text>
//! ERR <code>
//! ```

use std::fmt;

/// Longest accepted display name, in bytes.
pub const MAX_NAME_LEN: usize = 20;

/// Client command token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Reg,
    Mesg,
    Pmsg,
    Exit,
}

impl Command {
    /// Parse a command token. Tokens are case-sensitive.
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "REG" => Some(Self::Reg),
            "MESG" => Some(Self::Mesg),
            "PMSG" => Some(Self::Pmsg),
            "EXIT" => Some(Self::Exit),
            _ => None,
        }
    }
}

/// Protocol error codes sent as `ERR <code>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NameTaken,
    NameTooLong,
    NameContainsSpace,
    UnknownRecipient,
    InvalidCommand,
}

impl ErrorCode {
    pub fn code(&self) -> u8 {
        match self {
            Self::NameTaken => 0,
            Self::NameTooLong => 1,
            Self::NameContainsSpace => 2,
            Self::UnknownRecipient => 3,
            Self::InvalidCommand => 4,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ERR {}", self.code())
    }
}

/// Check the shape of a display name.
///
/// Uniqueness is the registry's concern and is checked after this passes.
/// An empty name is a malformed `REG`, not a naming error.
pub fn validate_name(name: &str) -> Result<(), ErrorCode> {
    if name.is_empty() {
        return Err(ErrorCode::InvalidCommand);
    }
    if name.len() > MAX_NAME_LEN {
        return Err(ErrorCode::NameTooLong);
    }
    if name.chars().any(char::is_whitespace) {
        return Err(ErrorCode::NameContainsSpace);
    }
    Ok(())
}

/// Split a frame at its first whitespace run.
///
/// Leading whitespace is skipped; the tail loses its leading whitespace run
/// and is otherwise returned raw. Either half may be empty.
pub fn split_first_word(line: &str) -> (&str, &str) {
    let line = line.trim_start();
    match line.find(char::is_whitespace) {
        Some(pos) => (&line[..pos], line[pos..].trim_start()),
        None => (line, ""),
    }
}

/// A frame rendered to one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    /// Current registered names, joiner or leaver perspective.
    Roster(Vec<String>),
    Joined(String),
    Left(String),
    Public { from: String, body: String },
    Private { from: String, body: String },
    Error(ErrorCode),
}

impl fmt::Display for ServerFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Roster(names) => write!(f, "{} [{}]", names.len(), names.join(" ")),
            Self::Joined(name) => write!(f, "{} has joined the chat", name),
            Self::Left(name) => write!(f, "{} has left the chat", name),
            Self::Public { from, body } => write!(f, "{}: {}", from, body),
            Self::Private { from, body } => write!(f, "Private message from {}: {}", from, body),
            Self::Error(code) => fmt::Display::fmt(code, f),
        }
    }
}
