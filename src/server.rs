//! UdsVault Unix socket server
//!
//! One tokio task per accepted connection, all sharing a single store.
//! The accept loop runs until a shutdown request or a fatal accept error,
//! then removes the socket file and gives in-flight connections a grace
//! period before aborting them.

use crate::{
    config::ServerConfig,
    error::{Result, UdsVaultError},
    protocol::{parse_command, Command, Response},
    store::{MemoryStore, SetOutcome, Store},
};
use std::{
    fs,
    io::{self, ErrorKind},
    os::unix::fs::{FileTypeExt, PermissionsExt},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::{UnixListener, UnixStream},
    sync::broadcast,
    task::JoinSet,
};
use tracing::{debug, error, info, warn};

/// Requests a running server to shut down
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: broadcast::Sender<()>,
}

impl ShutdownHandle {
    /// Trigger graceful shutdown
    pub fn shutdown(&self) -> Result<()> {
        self.tx.send(()).map_err(|_| {
            UdsVaultError::Server("Failed to send shutdown signal".to_string())
        })?;
        Ok(())
    }
}

/// Removes the socket file when dropped
#[derive(Debug)]
struct SocketFile {
    path: PathBuf,
}

impl Drop for SocketFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed socket file"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove socket file"),
        }
    }
}

/// UdsVault server bound to its socket
pub struct UdsVaultServer {
    config: ServerConfig,
    listener: UnixListener,
    socket_file: SocketFile,
    store: Arc<MemoryStore>,
    shutdown_tx: broadcast::Sender<()>,
    // Subscribed at bind time so a shutdown requested before `run` is kept
    shutdown_rx: broadcast::Receiver<()>,
}

impl UdsVaultServer {
    /// Bind the socket, replacing a stale one, and restrict it to the owner.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let path = config.socket_path.clone();
        remove_stale_socket(&path)?;

        let listener = bind_private(&path)?;
        let socket_file = SocketFile { path: path.clone() };
        info!(path = %path.display(), "UdsVault server listening");

        let store = Arc::new(MemoryStore::with_config(config.store.clone()));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        Ok(Self {
            config,
            listener,
            socket_file,
            store,
            shutdown_tx,
            shutdown_rx,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.config.socket_path
    }

    /// The store shared by every connection
    pub fn store(&self) -> Arc<MemoryStore> {
        Arc::clone(&self.store)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Accept connections until shutdown is requested.
    ///
    /// Returns an error only when accepting fails for a reason other than an
    /// interrupted system call.
    pub async fn run(self) -> Result<()> {
        let UdsVaultServer {
            config,
            listener,
            socket_file,
            store,
            shutdown_tx: _shutdown_tx,
            mut shutdown_rx,
        } = self;

        let mut connections = JoinSet::new();
        let mut next_conn: u64 = 0;

        let result = loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            next_conn += 1;
                            let conn = next_conn;
                            let store = Arc::clone(&store);
                            let max_line_len = config.max_line_len;
                            debug!(conn, "client connected");

                            connections.spawn(async move {
                                match handle_connection(stream, store, max_line_len).await {
                                    Ok(()) => debug!(conn, "client disconnected"),
                                    Err(e) => warn!(conn, error = %e, "connection closed on error"),
                                }
                            });
                        }
                        Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                            break Err(UdsVaultError::Io(e));
                        }
                    }
                }

                // Reap finished connection tasks
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(error = %e, "connection task panicked");
                        }
                    }
                }

                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received, no longer accepting connections");
                    break Ok(());
                }
            }
        };

        drop(listener);
        drop(socket_file);
        drain_connections(connections, config.shutdown_grace()).await;

        info!("server stopped");
        result
    }
}

/// Refuse to clobber anything at `path` that is not a socket
fn remove_stale_socket(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => {
            fs::remove_file(path)?;
            debug!(path = %path.display(), "removed stale socket");
            Ok(())
        }
        Ok(_) => Err(UdsVaultError::Server(format!(
            "{} exists and is not a socket",
            path.display()
        ))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Bind inside a fresh 0700 directory, restrict the socket to 0600, then
/// move it into place, so nobody else can connect before the chmod lands
fn bind_private(path: &Path) -> Result<UnixListener> {
    let parent = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let staging = tempfile::Builder::new()
        .prefix(".udsvault-")
        .tempdir_in(parent)?;
    let staged = staging.path().join("sock");

    let listener = UnixListener::bind(&staged)?;
    fs::set_permissions(&staged, fs::Permissions::from_mode(0o600))?;
    fs::rename(&staged, path)?;
    Ok(listener)
}

async fn drain_connections(mut connections: JoinSet<()>, grace: Duration) {
    if connections.is_empty() {
        return;
    }

    info!(active = connections.len(), "waiting for in-flight connections");
    let drained = tokio::time::timeout(grace, async {
        while connections.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
        warn!(
            abandoned = connections.len(),
            "grace period elapsed, closing remaining connections"
        );
        connections.shutdown().await;
    }
}

/// Serve one client until it disconnects or an I/O error occurs.
///
/// Every request line gets exactly one response line. Protocol errors are
/// answered and the connection carries on.
pub async fn handle_connection(
    mut stream: UnixStream,
    store: Arc<MemoryStore>,
    max_line_len: usize,
) -> Result<()> {
    let (reader, mut writer) = stream.split();
    let mut reader = BufReader::new(reader);
    let mut line = Vec::with_capacity(max_line_len);

    loop {
        line.clear();
        if read_request_line(&mut reader, &mut line, max_line_len).await? == 0 {
            break;
        }

        let request = String::from_utf8_lossy(&line);
        let response = process_line(&request, &store).await;
        write_response(&mut writer, &response.to_bytes()).await?;
    }

    writer.shutdown().await.or_else(|e| match e.kind() {
        ErrorKind::NotConnected | ErrorKind::BrokenPipe => Ok(()),
        _ => Err(e),
    })?;
    Ok(())
}

/// Read one line of at most `max_len` bytes into `buf`.
///
/// The rest of an overlong line is discarded. Returns 0 at end of stream.
async fn read_request_line<R>(reader: &mut R, buf: &mut Vec<u8>, max_len: usize) -> io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let remaining = max_len.saturating_sub(buf.len()) as u64;
        match (&mut *reader).take(remaining).read_until(b'\n', buf).await {
            Ok(_) => break,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    if buf.len() >= max_len && !buf.ends_with(b"\n") {
        discard_line(reader).await?;
    }
    Ok(buf.len())
}

async fn discard_line<R>(reader: &mut R) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let (consumed, done) = match reader.fill_buf().await {
            Ok([]) => return Ok(()),
            Ok(available) => match available.iter().position(|&b| b == b'\n') {
                Some(i) => (i + 1, true),
                None => (available.len(), false),
            },
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        reader.consume(consumed);
        if done {
            return Ok(());
        }
    }
}

async fn write_response<W>(writer: &mut W, mut bytes: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while !bytes.is_empty() {
        match writer.write(bytes).await {
            Ok(0) => return Err(ErrorKind::WriteZero.into()),
            Ok(n) => bytes = &bytes[n..],
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    writer.flush().await
}

/// Process a request line from a client
async fn process_line(line: &str, store: &MemoryStore) -> Response {
    match parse_command(line) {
        Ok(command) => execute_command(command, store).await,
        Err(e) => {
            debug!(error = %e, "rejected request");
            Response::error_for(&e)
        }
    }
}

/// Execute a parsed command
async fn execute_command(command: Command, store: &MemoryStore) -> Response {
    match command {
        Command::Set { key, value } => match store.set(key, value).await {
            Ok(SetOutcome::Inserted | SetOutcome::Updated) => Response::Ok,
            Err(e) => {
                warn!(capacity = store.capacity(), "store full, rejecting insert");
                Response::error_for(&e)
            }
        },
        Command::Get { key } => match store.get(&key).await {
            Some(value) => Response::Value(value),
            None => Response::NotFound,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use tempfile::TempDir;

    async fn exchange(client: &mut BufReader<UnixStream>, request: &[u8]) -> String {
        client.get_mut().write_all(request).await.unwrap();
        let mut response = String::new();
        client.read_line(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_command_processing() {
        let store = MemoryStore::new();

        assert_eq!(process_line("SET key1 value1\n", &store).await, Response::Ok);
        assert_eq!(
            process_line("GET key1\n", &store).await,
            Response::Value("value1".to_string())
        );
        assert_eq!(process_line("GET key2\n", &store).await, Response::NotFound);
        assert_eq!(
            process_line("DELETE key1\n", &store).await,
            Response::Error("Unknown command".to_string())
        );
        assert_eq!(
            process_line("SET\n", &store).await,
            Response::Error("Invalid format".to_string())
        );
    }

    #[tokio::test]
    async fn test_full_store_reported() {
        let store = MemoryStore::with_config(StoreConfig {
            capacity: 1,
            ..StoreConfig::default()
        });

        assert_eq!(process_line("SET a 1\n", &store).await, Response::Ok);
        assert_eq!(
            process_line("SET b 2\n", &store).await,
            Response::Error("Store full".to_string())
        );
        assert_eq!(process_line("SET a 3\n", &store).await, Response::Ok);
    }

    #[tokio::test]
    async fn test_handler_serves_until_eof() {
        let (server_side, client_side) = UnixStream::pair().unwrap();
        let store = Arc::new(MemoryStore::new());
        let handler = tokio::spawn(handle_connection(server_side, Arc::clone(&store), 1024));

        let mut client = BufReader::new(client_side);
        assert_eq!(exchange(&mut client, b"SET color blue\n").await, "OK\n");
        assert_eq!(exchange(&mut client, b"GET color\n").await, "blue\n");
        assert_eq!(exchange(&mut client, b"\n").await, "ERROR: Invalid format\n");

        client.get_mut().shutdown().await.unwrap();
        let mut rest = String::new();
        assert_eq!(client.read_line(&mut rest).await.unwrap(), 0);

        handler.await.unwrap().unwrap();
        assert_eq!(store.get("color").await, Some("blue".to_string()));
    }

    #[tokio::test]
    async fn test_overlong_line_gets_one_response() {
        let (server_side, client_side) = UnixStream::pair().unwrap();
        let store = Arc::new(MemoryStore::new());
        tokio::spawn(handle_connection(server_side, store, 16));

        let mut client = BufReader::new(client_side);
        let long_line = format!("SET key {}\n", "x".repeat(100));
        assert_eq!(exchange(&mut client, long_line.as_bytes()).await, "OK\n");
        assert_eq!(exchange(&mut client, b"GET key\n").await, "xxxxxxxx\n");
    }

    #[tokio::test]
    async fn test_final_line_without_newline() {
        let (server_side, client_side) = UnixStream::pair().unwrap();
        let store = Arc::new(MemoryStore::new());
        let handler = tokio::spawn(handle_connection(server_side, store, 1024));

        let mut client = BufReader::new(client_side);
        client.get_mut().write_all(b"GET missing").await.unwrap();
        client.get_mut().shutdown().await.unwrap();

        let mut response = String::new();
        client.read_line(&mut response).await.unwrap();
        assert_eq!(response, "NOT_FOUND\n");
        handler.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_write_failure_ends_connection() {
        let (server_side, mut client_side) = UnixStream::pair().unwrap();
        let store = Arc::new(MemoryStore::new());
        let handler = tokio::spawn(handle_connection(server_side, store, 1024));

        // Replies are never read, so the server ends up blocked writing them
        let requests = b"GET x\n".repeat(200_000);
        let _ = tokio::time::timeout(
            Duration::from_millis(200),
            client_side.write_all(&requests),
        )
        .await;
        drop(client_side);

        let result = tokio::time::timeout(Duration::from_secs(5), handler)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(UdsVaultError::Io(_))));
    }

    #[tokio::test]
    async fn test_bind_leaves_only_the_socket() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vault.sock");
        let config = ServerConfig {
            socket_path: path.clone(),
            ..ServerConfig::default()
        };

        let server = UdsVaultServer::bind(config).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("vault.sock")]);

        // The moved socket still accepts connections
        let _client = UnixStream::connect(&path).await.unwrap();
        drop(server);
    }

    #[tokio::test]
    async fn test_bind_refuses_regular_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("not-a-socket");
        fs::write(&path, b"data").unwrap();

        let config = ServerConfig {
            socket_path: path.clone(),
            ..ServerConfig::default()
        };
        assert!(matches!(
            UdsVaultServer::bind(config),
            Err(UdsVaultError::Server(_))
        ));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_dropping_unstarted_server_removes_socket() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vault.sock");
        let config = ServerConfig {
            socket_path: path.clone(),
            ..ServerConfig::default()
        };

        let server = UdsVaultServer::bind(config).unwrap();
        assert!(path.exists());
        drop(server);
        assert!(!path.exists());
    }
}
