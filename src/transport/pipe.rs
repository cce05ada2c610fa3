//! Platform-specific pipe/socket implementation.
//!
//! - Unix: Unix Domain Socket
//! - Windows: Named Pipe
//!
//! Every endpoint binds a listener at a well-known path derived from its
//! logical name, so peers reach each other by name alone with no broker.

use std::path::Path;

use crate::error::Result;
use tokio::io::{AsyncRead, AsyncWrite};

/// Derive the endpoint path for a logical peer name.
///
/// Format:
/// - Unix: `{dir}/peerlink-{name}.sock` (default dir `/tmp`)
/// - Windows: `\\.\pipe\peerlink-{name}`
pub fn endpoint_path(name: &str, dir: Option<&Path>) -> String {
    #[cfg(unix)]
    {
        let dir = dir.map(|d| d.display().to_string());
        format!(
            "{}/peerlink-{}.sock",
            dir.as_deref().unwrap_or("/tmp"),
            name
        )
    }

    #[cfg(windows)]
    {
        let _ = dir;
        format!(r"\\.\pipe\peerlink-{}", name)
    }
}

// ============================================================================
// Unix Implementation
// ============================================================================

#[cfg(unix)]
mod unix_impl {
    use super::*;
    use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
    use tokio::net::{UnixListener, UnixStream};

    /// Unix Domain Socket listener.
    pub struct PipeListener {
        listener: UnixListener,
        path: String,
    }

    /// Unix Domain Socket stream (connected).
    pub struct PipeStream {
        stream: UnixStream,
    }

    /// Read half of a split stream.
    pub type PipeReadHalf = OwnedReadHalf;
    /// Write half of a split stream.
    pub type PipeWriteHalf = OwnedWriteHalf;

    impl PipeListener {
        /// Bind to a Unix socket path.
        ///
        /// Removes any stale socket file at the path before binding.
        pub async fn bind(path: &str) -> Result<Self> {
            if Path::new(path).exists() {
                std::fs::remove_file(path)?;
            }

            let listener = UnixListener::bind(path)?;

            Ok(Self {
                listener,
                path: path.to_string(),
            })
        }

        /// Accept a single connection.
        pub async fn accept(&mut self) -> Result<PipeStream> {
            let (stream, _addr) = self.listener.accept().await?;
            Ok(PipeStream { stream })
        }

        /// Get the socket path.
        pub fn path(&self) -> &str {
            &self.path
        }
    }

    impl Drop for PipeListener {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    impl PipeStream {
        /// Open an outbound connection to a peer's endpoint path.
        pub async fn connect(path: &str) -> Result<Self> {
            let stream = UnixStream::connect(path).await?;
            Ok(Self { stream })
        }

        /// Split into owned read and write halves.
        pub fn into_split(self) -> (PipeReadHalf, PipeWriteHalf) {
            self.stream.into_split()
        }
    }

    impl AsyncRead for PipeStream {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::pin::Pin::new(&mut self.stream).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for PipeStream {
        fn poll_write(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            std::pin::Pin::new(&mut self.stream).poll_write(cx, buf)
        }

        fn poll_flush(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::pin::Pin::new(&mut self.stream).poll_flush(cx)
        }

        fn poll_shutdown(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::pin::Pin::new(&mut self.stream).poll_shutdown(cx)
        }
    }
}

// ============================================================================
// Windows Implementation
// ============================================================================

#[cfg(windows)]
mod windows_impl {
    use super::*;
    use tokio::io::{ReadHalf, WriteHalf};
    use tokio::net::windows::named_pipe::{
        ClientOptions, NamedPipeClient, NamedPipeServer, ServerOptions,
    };

    /// Windows Named Pipe listener.
    pub struct PipeListener {
        path: String,
        next: Option<NamedPipeServer>,
    }

    /// Windows Named Pipe stream (connected, either role).
    pub enum PipeStream {
        Server(NamedPipeServer),
        Client(NamedPipeClient),
    }

    /// Read half of a split stream.
    pub type PipeReadHalf = ReadHalf<PipeStream>;
    /// Write half of a split stream.
    pub type PipeWriteHalf = WriteHalf<PipeStream>;

    impl PipeListener {
        /// Create a Named Pipe server for the given path.
        pub async fn bind(path: &str) -> Result<Self> {
            let first = ServerOptions::new()
                .first_pipe_instance(true)
                .create(path)?;

            Ok(Self {
                path: path.to_string(),
                next: Some(first),
            })
        }

        /// Accept a single connection.
        pub async fn accept(&mut self) -> Result<PipeStream> {
            let server = match self.next.take() {
                Some(s) => s,
                None => ServerOptions::new().create(&self.path)?,
            };
            server.connect().await?;
            Ok(PipeStream::Server(server))
        }

        /// Get the pipe path.
        pub fn path(&self) -> &str {
            &self.path
        }
    }

    impl PipeStream {
        /// Open an outbound connection to a peer's endpoint path.
        pub async fn connect(path: &str) -> Result<Self> {
            let client = ClientOptions::new().open(path)?;
            Ok(PipeStream::Client(client))
        }

        /// Split into read and write halves.
        pub fn into_split(self) -> (PipeReadHalf, PipeWriteHalf) {
            tokio::io::split(self)
        }
    }

    impl AsyncRead for PipeStream {
        fn poll_read(
            self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            match self.get_mut() {
                PipeStream::Server(p) => std::pin::Pin::new(p).poll_read(cx, buf),
                PipeStream::Client(p) => std::pin::Pin::new(p).poll_read(cx, buf),
            }
        }
    }

    impl AsyncWrite for PipeStream {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            match self.get_mut() {
                PipeStream::Server(p) => std::pin::Pin::new(p).poll_write(cx, buf),
                PipeStream::Client(p) => std::pin::Pin::new(p).poll_write(cx, buf),
            }
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            match self.get_mut() {
                PipeStream::Server(p) => std::pin::Pin::new(p).poll_flush(cx),
                PipeStream::Client(p) => std::pin::Pin::new(p).poll_flush(cx),
            }
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            match self.get_mut() {
                PipeStream::Server(p) => std::pin::Pin::new(p).poll_shutdown(cx),
                PipeStream::Client(p) => std::pin::Pin::new(p).poll_shutdown(cx),
            }
        }
    }
}

// ============================================================================
// Platform-independent re-exports
// ============================================================================

#[cfg(unix)]
pub use unix_impl::{PipeListener, PipeReadHalf, PipeStream, PipeWriteHalf};

#[cfg(windows)]
pub use windows_impl::{PipeListener, PipeReadHalf, PipeStream, PipeWriteHalf};
