//! Client library for connecting to a UdsVault server
//!
//! Responses are framed by their trailing newline; the client reads exactly
//! one line per request.

use crate::error::{Result, UdsVaultError};
use crate::protocol::Response;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

/// Client for connecting to a UdsVault server
pub struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
}

impl Client {
    /// Connect to the server listening on `path`
    pub async fn connect<P: AsRef<Path>>(path: P) -> Result<Self> {
        let stream = UnixStream::connect(path).await?;
        let (read_half, write_half) = stream.into_split();
        let reader = BufReader::new(read_half);
        let writer = BufWriter::new(write_half);

        Ok(Self { reader, writer })
    }

    /// Send one raw request line and return the response line without its
    /// terminator. A newline is appended to `line` if missing; a newline
    /// anywhere else is rejected.
    pub async fn request(&mut self, line: &str) -> Result<String> {
        // Each newline is a request of its own and would leave a reply unread
        let body = line.strip_suffix('\n').unwrap_or(line);
        if body.contains('\n') {
            return Err(UdsVaultError::Client(
                "request must be a single line".to_string(),
            ));
        }

        self.writer.write_all(body.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;

        let mut response = String::new();
        if self.reader.read_line(&mut response).await? == 0 {
            return Err(UdsVaultError::Client(
                "server closed the connection".to_string(),
            ));
        }
        match response.strip_suffix('\n') {
            Some(body) => Ok(body.to_string()),
            None => Err(UdsVaultError::Protocol(format!(
                "response not newline-terminated: {:?}",
                response
            ))),
        }
    }

    /// Set a key-value pair
    pub async fn set(&mut self, key: &str, value: &str) -> Result<()> {
        check_token("key", key, false)?;
        check_token("value", value, true)?;

        let line = self.request(&format!("SET {} {}", key, value)).await?;
        match Response::from_line(&line) {
            Response::Ok => Ok(()),
            Response::Error(e) => Err(UdsVaultError::Server(e)),
            _ => Err(UdsVaultError::Protocol("Unexpected response for SET".to_string())),
        }
    }

    /// Get a value by key
    pub async fn get(&mut self, key: &str) -> Result<Option<String>> {
        check_token("key", key, false)?;

        let line = self.request(&format!("GET {}", key)).await?;
        match Response::from_line(&line) {
            Response::Value(value) => Ok(Some(value)),
            Response::NotFound => Ok(None),
            Response::Error(e) => Err(UdsVaultError::Server(e)),
            Response::Ok => Err(UdsVaultError::Protocol("Unexpected response for GET".to_string())),
        }
    }

    /// Close the connection
    pub async fn close(mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// The server splits requests on whitespace, so a token containing any
/// would be silently cut short
fn check_token(what: &str, token: &str, allow_empty: bool) -> Result<()> {
    if token.is_empty() && !allow_empty {
        return Err(UdsVaultError::Client(format!("{} must not be empty", what)));
    }
    if token.chars().any(char::is_whitespace) {
        return Err(UdsVaultError::Client(format!(
            "{} must not contain whitespace",
            what
        )));
    }
    Ok(())
}
