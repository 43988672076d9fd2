//! Line-framed command transport.
//!
//! Unix sockets on Unix, named pipes on Windows. One text line in, one text
//! line out.

use crate::error::{BridgeError, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};

#[cfg(windows)]
use tokio::net::windows::named_pipe::{ClientOptions, NamedPipeClient, NamedPipeServer, ServerOptions};

/// A duplex byte stream framed as newline-terminated text lines.
pub struct LineTransport<S> {
    stream: BufReader<S>,
    max_line: usize,
}

impl<S> LineTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, max_line: usize) -> Self {
        Self {
            stream: BufReader::new(stream),
            max_line,
        }
    }

    /// Next line without its terminator, or `None` once the peer has closed.
    /// A line longer than the limit is a protocol error.
    pub async fn read_line(&mut self) -> Result<Option<String>> {
        let mut buf = Vec::new();
        let read = (&mut self.stream)
            .take(self.max_line as u64)
            .read_until(b'\n', &mut buf)
            .await?;
        if read == 0 {
            return Ok(None);
        }
        if buf.last() != Some(&b'\n') && buf.len() >= self.max_line {
            return Err(BridgeError::ProtocolError(format!(
                "command exceeds {} bytes",
                self.max_line
            )));
        }
        while matches!(buf.last(), Some(b'\n' | b'\r')) {
            buf.pop();
        }
        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }

    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        let stream = self.stream.get_mut();
        stream.write_all(line.as_bytes()).await?;
        stream.write_all(b"\n").await?;
        stream.flush().await?;
        Ok(())
    }
}

#[cfg(unix)]
pub type ServerStream = UnixStream;
#[cfg(windows)]
pub type ServerStream = NamedPipeServer;

#[cfg(unix)]
pub type ClientStream = UnixStream;
#[cfg(windows)]
pub type ClientStream = NamedPipeClient;

/// Connect to a host's command endpoint.
#[cfg(unix)]
pub async fn connect(name: &str, max_line: usize) -> Result<LineTransport<ClientStream>> {
    let stream = UnixStream::connect(name)
        .await
        .map_err(|e| BridgeError::ConnectionFailed(format!("{}: {}", name, e)))?;
    Ok(LineTransport::new(stream, max_line))
}

#[cfg(windows)]
pub async fn connect(name: &str, max_line: usize) -> Result<LineTransport<ClientStream>> {
    let client = ClientOptions::new()
        .open(name)
        .map_err(|e| BridgeError::ConnectionFailed(format!("{}: {}", name, e)))?;
    Ok(LineTransport::new(client, max_line))
}

/// Host side of the command endpoint. Accepts one connection at a time.
pub struct TransportListener {
    #[cfg(unix)]
    listener: UnixListener,
    #[cfg(unix)]
    path: std::path::PathBuf,
    #[cfg(windows)]
    pipe_name: String,
}

impl TransportListener {
    #[cfg(unix)]
    pub fn bind(name: &str) -> Result<Self> {
        let path = std::path::PathBuf::from(name);
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path)?;
        Ok(Self { listener, path })
    }

    #[cfg(windows)]
    pub fn bind(name: &str) -> Result<Self> {
        Ok(Self {
            pipe_name: name.to_string(),
        })
    }

    #[cfg(unix)]
    pub async fn accept(&self) -> Result<ServerStream> {
        let (stream, _) = self.listener.accept().await?;
        Ok(stream)
    }

    #[cfg(windows)]
    pub async fn accept(&self) -> Result<ServerStream> {
        let server = ServerOptions::new()
            .first_pipe_instance(true)
            .create(&self.pipe_name)?;

        // Wait for client to connect
        server.connect().await?;

        Ok(server)
    }
}

#[cfg(unix)]
impl Drop for TransportListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
