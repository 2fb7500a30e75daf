//! Line-protocol client
//!
//! A minimal client for the relay: connects, performs the join handshake,
//! and exposes received lines as parsed [`ServerLine`]s. Front ends build
//! on this; the relay's own tests use it to drive real connections.

use futures_util::{SinkExt, StreamExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, warn};

use crate::error::RelayError;
use crate::protocol::{self, ServerLine};
use crate::types::TypingState;

/// Buffered received lines before the reader task waits
const INCOMING_BUFFER: usize = 256;

/// Connected relay client
#[derive(Debug)]
pub struct ChatClient {
    writer: FramedWrite<OwnedWriteHalf, LinesCodec>,
    incoming: mpsc::Receiver<ServerLine>,
    reader: JoinHandle<()>,
}

impl ChatClient {
    /// Connect and, if a name is given, send the join line
    ///
    /// Without a name the relay registers the connection as "Guest" when
    /// the first line arrives, and treats that line as chat.
    pub async fn connect(
        addr: impl ToSocketAddrs,
        name: Option<&str>,
    ) -> Result<Self, RelayError> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, write_half) = stream.into_split();

        let (tx, incoming) = mpsc::channel(INCOMING_BUFFER);
        let reader = tokio::spawn(async move {
            let mut lines = FramedRead::new(read_half, LinesCodec::new());
            while let Some(next) = lines.next().await {
                match next {
                    Ok(line) => {
                        if tx.send(ServerLine::parse(&line)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Client read error: {}", e);
                        break;
                    }
                }
            }
            debug!("Client reader ended");
        });

        let mut client = Self {
            writer: FramedWrite::new(write_half, LinesCodec::new()),
            incoming,
            reader,
        };

        if let Some(name) = name {
            client.send_raw(protocol::join_line(name)).await?;
        }
        Ok(client)
    }

    /// Send a chat line
    pub async fn send(&mut self, text: &str) -> Result<(), RelayError> {
        self.send_raw(text.to_string()).await
    }

    /// Send a typing indicator
    pub async fn typing(&mut self, state: TypingState) -> Result<(), RelayError> {
        self.send_raw(protocol::typing_line(state)).await
    }

    /// Send a private message
    pub async fn whisper(&mut self, target: &str, body: &str) -> Result<(), RelayError> {
        self.send_raw(protocol::whisper_line(target, body)).await
    }

    /// Next line from the relay; `None` once the connection is closed
    pub async fn recv(&mut self) -> Option<ServerLine> {
        self.incoming.recv().await
    }

    /// Close the connection
    pub async fn close(mut self) -> Result<(), RelayError> {
        let result = SinkExt::<String>::close(&mut self.writer).await;
        self.reader.abort();
        result.map_err(RelayError::from)
    }

    async fn send_raw(&mut self, line: String) -> Result<(), RelayError> {
        self.writer.send(line).await?;
        Ok(())
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
