//! Connection handler
//!
//! Drives one client connection through its lifecycle:
//! handshake, registration, the read loop, and teardown.
//!
//! Each connection runs two tasks. This one reads and dispatches lines in
//! order. A writer task owns the write half and drains the session's
//! outbound queue, so lines from concurrent broadcasts and whispers never
//! interleave on the socket.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, WriteHalf};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::LossyLinesCodec;
use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::error::RelayError;
use crate::identity::IdentityGenerator;
use crate::protocol::{self, ClientLine, DEFAULT_NAME};
use crate::session::Session;
use crate::types::{SessionId, TypingState};

/// Shared state every connection handler needs
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub dispatcher: Dispatcher,
    pub ids: Arc<IdentityGenerator>,
    pub config: Arc<ServerConfig>,
    /// Server-wide shutdown signal; sessions hold child tokens
    pub shutdown: CancellationToken,
}

/// Handle a new connection
///
/// Returns once the connection is closed and its session (if any) has been
/// removed. Errors are transport errors of this connection only.
pub async fn handle_connection<S>(
    stream: S,
    peer: String,
    ctx: ConnectionContext,
) -> Result<(), RelayError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let mut lines = FramedRead::new(
        read_half,
        LossyLinesCodec::new_with_max_length(ctx.config.max_line_length),
    );

    // Connecting: wait for the first line
    let first = tokio::select! {
        biased;
        _ = ctx.shutdown.cancelled() => {
            debug!("Shutdown before handshake from {}", peer);
            return Ok(());
        }
        next = lines.next() => match next {
            Some(Ok(line)) => line,
            Some(Err(e)) => return Err(e.into()),
            None => {
                debug!("Connection from {} closed before handshake", peer);
                return Ok(());
            }
        },
    };

    if ctx.shutdown.is_cancelled() {
        debug!("Shutdown during handshake from {}", peer);
        return Ok(());
    }

    let (display_name, pending) = match ClientLine::parse_first(&first) {
        ClientLine::Join(name) => (name, None),
        _ => (DEFAULT_NAME.to_string(), Some(first)),
    };

    // Joined: register and start the writer
    let closer = ctx.shutdown.child_token();
    let (line_tx, line_rx) = mpsc::channel::<String>(ctx.config.outbound_queue);
    let session = ctx
        .dispatcher
        .registry()
        .register(&ctx.ids, &display_name, |id| {
            Session::new(
                id,
                display_name.clone(),
                line_tx.clone(),
                closer.clone(),
                ctx.config.max_dropped_lines,
            )
        })
        .await;
    drop(line_tx);

    let writer = tokio::spawn(write_lines(
        FramedWrite::new(write_half, LinesCodec::new()),
        line_rx,
        closer.clone(),
        ctx.config.write_timeout(),
        session.id.clone(),
    ));

    info!("User {} connected from {} (id={})", display_name, peer, session.id);
    announce_join(&ctx, &session).await;

    // Active
    let mut result: Result<(), RelayError> = Ok(());
    if let Some(line) = pending {
        dispatch(&ctx, &session, ClientLine::parse(&line)).await;
    }

    loop {
        let next = tokio::select! {
            _ = closer.cancelled() => {
                debug!("Session {} closed by server", session.id);
                break;
            }
            next = lines.next() => next,
        };

        match next {
            Some(Ok(line)) => dispatch(&ctx, &session, ClientLine::parse(&line)).await,
            Some(Err(e)) => {
                warn!("Read error for {}: {}", session.id, e);
                result = Err(e.into());
                break;
            }
            None => {
                debug!("Client {} closed the connection", session.id);
                break;
            }
        }
    }

    // Disconnecting → Removed
    let id = session.id.clone();
    announce_leave(&ctx, &id).await;

    // Lines already queued (e.g. a reply to the last command) are still
    // written; the writer stops once the last session handle is gone.
    drop(session);
    let _ = writer.await;
    closer.cancel();

    info!("Client {} disconnected", id);
    result
}

/// Send the roster to the newcomer and the join notice to everyone
async fn announce_join(ctx: &ConnectionContext, session: &Session) {
    let dispatcher = &ctx.dispatcher;
    dispatcher.events().log(format!(
        "User connected: {} (id={})",
        session.display_name, session.id
    ));

    let roster = dispatcher.publish_presence().await;
    dispatcher.send_to(session, &protocol::format_roster(&roster));

    let notice = protocol::format_notice(
        &protocol::timestamp(),
        &protocol::joined_text(&session.display_name),
    );
    dispatcher.broadcast_to_all(&notice).await;
}

/// Deregister and tell the remaining sessions
///
/// Removal is idempotent: if shutdown already drained the registry,
/// nothing is broadcast. Departures during shutdown only update the
/// presence stream.
async fn announce_leave(ctx: &ConnectionContext, id: &SessionId) {
    let dispatcher = &ctx.dispatcher;
    let removed = dispatcher.registry().remove(id).await;
    if ctx.shutdown.is_cancelled() {
        debug!("Session {} removed during shutdown", id);
        if removed.is_some() {
            dispatcher.publish_presence().await;
        }
    } else if let Some(removed) = removed {
        let notice = protocol::format_notice(
            &protocol::timestamp(),
            &protocol::left_text(&removed.display_name),
        );
        dispatcher.broadcast_to_all(&notice).await;

        let roster = dispatcher.publish_presence().await;
        dispatcher
            .broadcast_to_all(&protocol::format_roster(&roster))
            .await;
    }
    dispatcher.events().log(format!("Client {} disconnected", id));
}

/// Route one classified line
async fn dispatch(ctx: &ConnectionContext, session: &Session, line: ClientLine) {
    let dispatcher = &ctx.dispatcher;
    let name = session.display_name.as_str();

    match line {
        ClientLine::Chat(body) => {
            let line = protocol::format_chat(&protocol::timestamp(), name, &body);
            dispatcher.broadcast_to_all(&line).await;
        }
        ClientLine::Typing(TypingState::On) => {
            let line = protocol::format_notice(&protocol::timestamp(), &protocol::typing_text(name));
            dispatcher.broadcast_except(&line, &session.id).await;
        }
        ClientLine::Typing(TypingState::Off) => {
            // Receivers age typing state out on their own
            debug!("Typing off from {}", session.id);
        }
        ClientLine::Whisper { target, body } => {
            match dispatcher.registry().find_by_name(&target).await {
                Some(recipient) => {
                    let delivery = protocol::whisper_delivery_text(name, &body);
                    dispatcher.send_to(&recipient, &protocol::format_direct(&delivery));
                    let echo = protocol::whisper_echo_text(&recipient.display_name, &body);
                    dispatcher.send_to(session, &protocol::format_direct(&echo));
                }
                None => {
                    let reply = protocol::whisper_not_found_text(&target);
                    dispatcher.send_to(session, &protocol::format_direct(&reply));
                }
            }
        }
        ClientLine::MalformedWhisper => {
            dispatcher.send_to(session, &protocol::format_direct(protocol::WHISPER_USAGE_TEXT));
        }
        ClientLine::Join(_) => {
            debug!("Ignoring join line from {} after handshake", session.id);
        }
    }
}

/// Writer task: the only place a session's socket is written
///
/// Drains the queue until every session handle is dropped. Every write is
/// bounded by `write_timeout`; a timeout, a write error or a cancelled
/// `closer` (stalled session, shutdown) stops it without draining.
async fn write_lines<W>(
    mut sink: FramedWrite<WriteHalf<W>, LinesCodec>,
    mut rx: mpsc::Receiver<String>,
    closer: CancellationToken,
    write_timeout: Duration,
    id: SessionId,
) where
    W: AsyncWrite,
{
    loop {
        let line = tokio::select! {
            _ = closer.cancelled() => break,
            line = rx.recv() => match line {
                Some(line) => line,
                None => break,
            },
        };

        match tokio::time::timeout(write_timeout, sink.send(line)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("Write failed for {}: {}", id, e);
                break;
            }
            Err(_) => {
                warn!("Write to {} timed out, closing session", id);
                break;
            }
        }
    }

    closer.cancel();
    let _ = tokio::time::timeout(write_timeout, SinkExt::<String>::close(&mut sink)).await;
    debug!("Writer ended for {}", id);
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf};
    use tokio::task::JoinHandle;
    use tokio::time::timeout;

    use super::*;
    use crate::events::RelayEvents;
    use crate::protocol::ServerLine;
    use crate::registry::SessionRegistry;

    type Reader = FramedRead<ReadHalf<DuplexStream>, LinesCodec>;
    type Writer = FramedWrite<WriteHalf<DuplexStream>, LinesCodec>;

    fn context(config: ServerConfig) -> ConnectionContext {
        let registry = Arc::new(SessionRegistry::new());
        ConnectionContext {
            dispatcher: Dispatcher::new(registry, RelayEvents::new()),
            ids: Arc::new(IdentityGenerator::from_seed(11)),
            config: Arc::new(config),
            shutdown: CancellationToken::new(),
        }
    }

    fn connect(ctx: &ConnectionContext) -> (Reader, Writer, JoinHandle<Result<(), RelayError>>) {
        let (client, handle) = connect_raw(ctx, 64 * 1024);
        let (r, w) = tokio::io::split(client);
        (
            FramedRead::new(r, LinesCodec::new()),
            FramedWrite::new(w, LinesCodec::new()),
            handle,
        )
    }

    fn connect_raw(
        ctx: &ConnectionContext,
        buffer: usize,
    ) -> (DuplexStream, JoinHandle<Result<(), RelayError>>) {
        let (client, server) = tokio::io::duplex(buffer);
        let handle = tokio::spawn(handle_connection(server, "test".to_string(), ctx.clone()));
        (client, handle)
    }

    async fn next_line(reader: &mut Reader) -> ServerLine {
        let line = timeout(Duration::from_secs(2), reader.next())
            .await
            .expect("timed out waiting for a line")
            .expect("connection closed")
            .expect("codec error");
        ServerLine::parse(&line)
    }

    async fn join(ctx: &ConnectionContext, name: &str) -> (Reader, Writer, JoinHandle<Result<(), RelayError>>) {
        let (mut r, mut w, h) = connect(ctx);
        w.send(protocol::join_line(name)).await.unwrap();
        assert!(matches!(next_line(&mut r).await, ServerLine::Roster(_)));
        assert!(matches!(next_line(&mut r).await, ServerLine::Joined { .. }));
        (r, w, h)
    }

    #[tokio::test]
    async fn test_first_line_without_join_is_guest_chat() {
        let ctx = context(ServerConfig::default());
        let (mut r, mut w, _h) = connect(&ctx);

        w.send("hello").await.unwrap();

        assert_eq!(next_line(&mut r).await, ServerLine::Roster(vec!["Guest".to_string()]));
        assert!(matches!(next_line(&mut r).await, ServerLine::Joined { name, .. } if name == "Guest"));
        match next_line(&mut r).await {
            ServerLine::Chat { sender, body, .. } => {
                assert_eq!(sender, "Guest");
                assert_eq!(body, "hello");
            }
            other => panic!("unexpected line: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_close_before_handshake_registers_nothing() {
        let ctx = context(ServerConfig::default());
        let (r, w, h) = connect(&ctx);
        drop(w);
        drop(r);

        timeout(Duration::from_secs(2), h).await.unwrap().unwrap().unwrap();
        assert!(ctx.dispatcher.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_disconnect_removes_session() {
        let ctx = context(ServerConfig::default());
        let (mut a_r, _a_w, _a_h) = join(&ctx, "Alice").await;
        let (b_r, b_w, b_h) = join(&ctx, "Bob").await;
        assert!(matches!(next_line(&mut a_r).await, ServerLine::Joined { name, .. } if name == "Bob"));

        drop(b_w);
        drop(b_r);
        timeout(Duration::from_secs(2), b_h).await.unwrap().unwrap().unwrap();

        assert!(matches!(next_line(&mut a_r).await, ServerLine::Left { name, .. } if name == "Bob"));
        assert_eq!(next_line(&mut a_r).await, ServerLine::Roster(vec!["Alice".to_string()]));
        assert_eq!(ctx.dispatcher.registry().snapshot().await, vec!["Alice"]);
    }

    #[tokio::test]
    async fn test_malformed_whisper_gets_usage() {
        let ctx = context(ServerConfig::default());
        let (mut r, mut w, _h) = join(&ctx, "Alice").await;

        w.send("/w Bob").await.unwrap();
        assert_eq!(
            next_line(&mut r).await,
            ServerLine::Direct(protocol::WHISPER_USAGE_TEXT.to_string())
        );
    }

    #[tokio::test]
    async fn test_unknown_whisper_target() {
        let ctx = context(ServerConfig::default());
        let (mut r, mut w, _h) = join(&ctx, "Alice").await;

        w.send("/w Zed hello").await.unwrap();
        assert_eq!(
            next_line(&mut r).await,
            ServerLine::Direct("User 'Zed' not found".to_string())
        );
    }

    #[tokio::test]
    async fn test_typing_off_is_silent() {
        let ctx = context(ServerConfig::default());
        let (mut a_r, _a_w, _a_h) = join(&ctx, "Alice").await;
        let (_b_r, mut b_w, _b_h) = join(&ctx, "Bob").await;
        assert!(matches!(next_line(&mut a_r).await, ServerLine::Joined { .. }));

        b_w.send("__TYPING__:off").await.unwrap();
        b_w.send("__TYPING__:on").await.unwrap();

        assert!(matches!(next_line(&mut a_r).await, ServerLine::Typing { name, .. } if name == "Bob"));
    }

    #[tokio::test]
    async fn test_overlong_line_drops_connection() {
        let config = ServerConfig {
            max_line_length: 16,
            ..ServerConfig::default()
        };
        let ctx = context(config);
        let (_r, mut w, h) = join(&ctx, "Alice").await;

        w.send("x".repeat(64)).await.unwrap();

        let result = timeout(Duration::from_secs(2), h).await.unwrap().unwrap();
        assert!(matches!(result, Err(RelayError::Codec(_))));
        assert!(ctx.dispatcher.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_shutdown_closes_session() {
        let ctx = context(ServerConfig::default());
        let (mut r, _w, h) = join(&ctx, "Alice").await;

        ctx.shutdown.cancel();

        timeout(Duration::from_secs(2), h).await.unwrap().unwrap().unwrap();
        let end = timeout(Duration::from_secs(2), r.next()).await.unwrap();
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn test_reply_survives_half_close() {
        for _ in 0..20 {
            let ctx = context(ServerConfig::default());
            let (mut r, mut w, h) = join(&ctx, "Alice").await;

            w.send("/w Zed hi").await.unwrap();
            SinkExt::<String>::close(&mut w).await.unwrap();

            let mut replies = Vec::new();
            while let Some(line) = timeout(Duration::from_secs(2), r.next()).await.unwrap() {
                replies.push(ServerLine::parse(&line.unwrap()));
            }
            assert_eq!(
                replies,
                vec![ServerLine::Direct("User 'Zed' not found".to_string())]
            );
            timeout(Duration::from_secs(2), h).await.unwrap().unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn test_join_racing_shutdown_leaves_nothing_behind() {
        for _ in 0..20 {
            let ctx = context(ServerConfig::default());
            let presence = ctx.dispatcher.events().subscribe_presence();
            let (_r, mut w, h) = connect(&ctx);

            w.send(protocol::join_line("Late")).await.unwrap();
            ctx.shutdown.cancel();

            timeout(Duration::from_secs(2), h).await.unwrap().unwrap().unwrap();
            assert!(ctx.dispatcher.registry().is_empty().await);
            assert!(presence.borrow().is_empty());
        }
    }

    #[tokio::test]
    async fn test_join_after_shutdown_is_not_registered() {
        let ctx = context(ServerConfig::default());
        ctx.shutdown.cancel();
        let (mut r, mut w, h) = connect(&ctx);

        let _ = w.send(protocol::join_line("Late")).await;

        timeout(Duration::from_secs(2), h).await.unwrap().unwrap().unwrap();
        assert!(ctx.dispatcher.registry().is_empty().await);
        assert!(ctx.dispatcher.events().subscribe_presence().borrow().is_empty());
        assert!(timeout(Duration::from_secs(2), r.next()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_timeout_removes_stalled_session() {
        let config = ServerConfig {
            write_timeout_ms: 50,
            ..ServerConfig::default()
        };
        let ctx = context(config);
        let (mut a_r, mut a_w, _a_h) = join(&ctx, "Alice").await;

        // Never read from this end: its 128-byte pipe fills up
        let (mut slow, slow_h) = connect_raw(&ctx, 128);
        slow.write_all(format!("{}\n", protocol::join_line("Slow")).as_bytes())
            .await
            .unwrap();
        assert!(matches!(next_line(&mut a_r).await, ServerLine::Joined { name, .. } if name == "Slow"));

        a_w.send("x".repeat(1024)).await.unwrap();
        assert!(matches!(next_line(&mut a_r).await, ServerLine::Chat { sender, .. } if sender == "Alice"));

        assert!(matches!(next_line(&mut a_r).await, ServerLine::Left { name, .. } if name == "Slow"));
        assert_eq!(next_line(&mut a_r).await, ServerLine::Roster(vec!["Alice".to_string()]));
        timeout(Duration::from_secs(2), slow_h).await.unwrap().unwrap().unwrap();
        assert_eq!(ctx.dispatcher.registry().snapshot().await, vec!["Alice"]);
        drop(slow);
    }

    #[tokio::test]
    async fn test_invalid_utf8_keeps_connection() {
        let ctx = context(ServerConfig::default());
        let (mut r, w, _h) = join(&ctx, "Alice").await;

        let mut raw = w.into_inner();
        raw.write_all(b"caf\xe9\nstill here\n").await.unwrap();

        match next_line(&mut r).await {
            ServerLine::Chat { body, .. } => assert_eq!(body, "caf\u{FFFD}"),
            other => panic!("unexpected line: {:?}", other),
        }
        assert!(matches!(next_line(&mut r).await, ServerLine::Chat { body, .. } if body == "still here"));
        assert_eq!(ctx.dispatcher.registry().len().await, 1);
    }
}
