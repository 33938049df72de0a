//! Protocol parser and command definitions for UdsVault
//!
//! Requests are single text lines: `<COMMAND> <KEY> [<VALUE>]`. Tokens are
//! separated by whitespace, so neither keys nor values can contain any.
//! Tokens after the third are ignored.

use crate::error::{Result, UdsVaultError};
use nom::{
    bytes::complete::{take_till1, take_while},
    combinator::opt,
    sequence::{preceded, tuple},
    IResult,
};

/// Longest command token, in bytes
pub const MAX_COMMAND_LEN: usize = 15;

/// Longest key or value token, in bytes
pub const MAX_TOKEN_LEN: usize = 255;

const UNKNOWN_COMMAND: &str = "Unknown command";
const INVALID_FORMAT: &str = "Invalid format";
const STORE_FULL: &str = "Store full";

/// Commands supported by the UdsVault protocol
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Set { key: String, value: String },
    Get { key: String },
}

/// Response types from the server
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Ok,
    Value(String),
    NotFound,
    Error(String),
}

impl Response {
    /// Serialize response to bytes for network transmission
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Response::Ok => b"OK\n".to_vec(),
            Response::Value(v) => format!("{}\n", v).into_bytes(),
            Response::NotFound => b"NOT_FOUND\n".to_vec(),
            Response::Error(e) => format!("ERROR: {}\n", e).into_bytes(),
        }
    }

    /// The error line a client sees for a failed request
    pub fn error_for(err: &UdsVaultError) -> Self {
        let text = match err {
            UdsVaultError::UnknownCommand(_) => UNKNOWN_COMMAND.to_string(),
            UdsVaultError::InvalidFormat => INVALID_FORMAT.to_string(),
            UdsVaultError::StoreFull { .. } => STORE_FULL.to_string(),
            other => other.to_string(),
        };
        Response::Error(text)
    }

    /// Decode one response line as received by a client.
    ///
    /// Values are untagged on the wire, so a stored value that reads `OK`,
    /// `NOT_FOUND` or starts with `ERROR: ` decodes as that response instead.
    pub fn from_line(line: &str) -> Self {
        let line = line.strip_suffix('\n').unwrap_or(line);
        let line = line.strip_suffix('\r').unwrap_or(line);
        match line {
            "OK" => Response::Ok,
            "NOT_FOUND" => Response::NotFound,
            _ => match line.strip_prefix("ERROR: ") {
                Some(e) => Response::Error(e.to_string()),
                None => Response::Value(line.to_string()),
            },
        }
    }
}

/// Parse one request line into a command
pub fn parse_command(line: &str) -> Result<Command> {
    let (_, (command, key, value)) =
        request_tokens(line).map_err(|_| UdsVaultError::InvalidFormat)?;

    let command = truncate_str(command, MAX_COMMAND_LEN);
    let key = truncate_str(key, MAX_TOKEN_LEN).to_string();
    match command {
        "SET" => {
            // `SET key` alone stores the empty string
            let value = truncate_str(value.unwrap_or(""), MAX_TOKEN_LEN).to_string();
            Ok(Command::Set { key, value })
        }
        "GET" => Ok(Command::Get { key }),
        other => Err(UdsVaultError::UnknownCommand(other.to_string())),
    }
}

/// Command, key and optional value; anything after is left unparsed
fn request_tokens(input: &str) -> IResult<&str, (&str, &str, Option<&str>)> {
    tuple((token, token, opt(token)))(input)
}

fn token(input: &str) -> IResult<&str, &str> {
    preceded(take_while(is_space), take_till1(is_space))(input)
}

/// Whitespace as C's `isspace` sees it, vertical tab included
fn is_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\x0b' | '\x0c' | '\r')
}

/// Cut `s` to at most `max` bytes without splitting a character
pub(crate) fn truncate_str(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
