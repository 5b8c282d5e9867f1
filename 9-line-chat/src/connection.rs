//! The per-connection protocol engine.
//!
//! A connection replays the stored history once, then reads newline
//! terminated lines until the peer goes away. Command lines go to the
//! [`Dispatcher`]; every other non-blank line is recorded in the
//! [`MessageLog`] and answered by [`reply::evaluate`]. Each line gets exactly
//! one reply line, written back to the same connection.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpStream,
};
use tracing::{debug, info, warn};

use crate::{
    command::{self, Dispatcher},
    reply,
    session::{ConnectionId, Session},
    store::{ChatRecord, MessageLog, NewChatRecord, run_blocking},
};

/// Shared collaborators handed to every connection task.
#[derive(Clone)]
pub struct ConnectionContext {
    pub dispatcher: Dispatcher,
    pub messages: Arc<dyn MessageLog>,
}

/// Serves one accepted TCP connection until it closes.
pub async fn handle_connection(
    stream: TcpStream,
    id: ConnectionId,
    peer: SocketAddr,
    context: ConnectionContext,
) -> Result<()> {
    let (reader, writer) = stream.into_split();
    info!(connection = %id, %peer, "client connected");

    let result = serve(
        BufReader::new(reader),
        writer,
        Session::new(id, peer.to_string()),
        context,
    )
    .await;

    info!(connection = %id, %peer, "client disconnected");
    result
}

/// Runs the protocol over any buffered reader / writer pair.
///
/// Returns `Ok(())` when the peer closes the stream and `Err` on a read or
/// write failure. Either way nothing more is processed afterwards; bytes
/// left without a trailing newline at close are discarded.
pub async fn serve<R, W>(
    mut reader: R,
    mut writer: W,
    mut session: Session,
    context: ConnectionContext,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    replay_history(&context.messages, &mut writer, &session).await?;

    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(());
        }
        if buf.last() != Some(&b'\n') {
            debug!(connection = %session.id(), "dropping unterminated line at close");
            return Ok(());
        }

        let line = String::from_utf8_lossy(&buf);
        let line = line.trim();
        if line.is_empty() {
            debug!(connection = %session.id(), "skipping blank line");
            continue;
        }

        let reply = handle_line(line, &mut session, &context).await;
        debug!(connection = %session.id(), %reply, "writing reply");
        write_line(&mut writer, &reply).await?;
        writer.flush().await?;
    }
}

async fn handle_line(line: &str, session: &mut Session, context: &ConnectionContext) -> String {
    if command::is_command(line) {
        return match context.dispatcher.dispatch(line, session).await {
            Ok(reply) => reply,
            Err(err) => {
                if err.is_internal() {
                    warn!(connection = %session.id(), error = ?err, "command failed");
                }
                format!("ERR: {err}")
            }
        };
    }

    record_payload(line, session, &context.messages).await;
    reply::evaluate(line)
}

/// Appends a payload line to the log. Failures are logged and swallowed so
/// the client still gets its reply.
async fn record_payload(line: &str, session: &Session, messages: &Arc<dyn MessageLog>) {
    let record = NewChatRecord {
        author: session.author(),
        origin_address: session.peer().to_string(),
        text: line.to_string(),
        created_at: Utc::now(),
    };
    info!(
        "{} {} {}",
        clock(record.created_at),
        session.display_name(),
        record.text
    );

    let messages = Arc::clone(messages);
    if let Err(err) = run_blocking(move || messages.append(&record)).await {
        warn!(connection = %session.id(), error = ?err, "failed to persist message");
    }
}

async fn replay_history<W>(
    messages: &Arc<dyn MessageLog>,
    writer: &mut W,
    session: &Session,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let messages = Arc::clone(messages);
    let records = match run_blocking(move || messages.scan_ordered()).await {
        Ok(records) => records,
        Err(err) => {
            warn!(connection = %session.id(), error = ?err, "failed to load history");
            return Ok(());
        }
    };

    for record in &records {
        write_line(writer, &history_line(record)).await?;
    }
    writer.flush().await
}

/// Formats a stored record as `<HH:MM> <display-name> <text>`.
pub fn history_line(record: &ChatRecord) -> String {
    format!(
        "{} {} {}",
        clock(record.created_at),
        record.display_name(),
        record.text
    )
}

fn clock(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%H:%M").to_string()
}

async fn write_line<W>(writer: &mut W, line: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut encoded = Vec::with_capacity(line.len() + 1);
    encoded.extend_from_slice(line.as_bytes());
    encoded.push(b'\n');
    writer.write_all(&encoded).await
}
