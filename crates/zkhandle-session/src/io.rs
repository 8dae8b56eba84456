//! The per-session IO task.
//!
//! One task owns the connection for the whole life of a session. It:
//!
//! - takes requests from the [`Session`](crate::Session) handle over a
//!   channel, stamps each with the next transaction id, and writes it out;
//! - matches replies to requests (the server answers in order, so the
//!   oldest outstanding request is always the one being answered);
//! - pings the server when the connection has been idle for a third of the
//!   session timeout, and declares the connection lost when nothing has
//!   been heard for two thirds of it;
//! - reports state changes to the watch channel and the listener.
//!
//! When the task ends for any reason, every request still outstanding or
//! queued is failed, so no caller waits forever.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use zkhandle_protocol::{
    ErrorCode, NOTIFICATION_XID, OpCode, PING_XID, ProtocolError, RecordReader,
    RecordWriter, ReplyHeader, RequestHeader, WatcherEvent,
};
use zkhandle_transport::{Connection, TcpConnection};

use crate::state::StateNotifier;
use crate::{SessionError, SessionId, SessionState};

/// Shortest interval between keep-alive checks.
const MIN_TICK: Duration = Duration::from_millis(10);

/// Reply payload delivered back to the caller: the body bytes that follow
/// the reply header, or the reason there is none.
pub(crate) type Reply = Result<Vec<u8>, SessionError>;

/// A request on its way from a `Session` handle to the IO task.
pub(crate) struct Request {
    pub(crate) op: OpCode,
    /// Encoded request body, without the header.
    pub(crate) body: Vec<u8>,
    pub(crate) reply: oneshot::Sender<Reply>,
}

/// A request that has been written and awaits its reply.
struct Pending {
    xid: i32,
    op: OpCode,
    reply: oneshot::Sender<Reply>,
}

/// How the main loop finished without a connection fault.
enum Exit {
    /// The server acknowledged a close-session request.
    Closed,
    /// Every `Session` handle was dropped.
    Abandoned,
}

pub(crate) struct IoTask {
    conn: TcpConnection,
    session_id: SessionId,
    timeout: Duration,
    requests: mpsc::UnboundedReceiver<Request>,
    pending: VecDeque<Pending>,
    next_xid: i32,
    closing: bool,
    last_send: Instant,
    last_recv: Instant,
    state: watch::Sender<SessionState>,
    notifier: StateNotifier,
}

impl IoTask {
    pub(crate) fn new(
        conn: TcpConnection,
        session_id: SessionId,
        timeout: Duration,
        requests: mpsc::UnboundedReceiver<Request>,
        state: watch::Sender<SessionState>,
        notifier: StateNotifier,
    ) -> Self {
        let now = Instant::now();
        Self {
            conn,
            session_id,
            timeout,
            requests,
            pending: VecDeque::new(),
            next_xid: 1,
            closing: false,
            last_send: now,
            last_recv: now,
            state,
            notifier,
        }
    }

    /// Silence after which the connection counts as lost.
    fn read_timeout(&self) -> Duration {
        self.timeout * 2 / 3
    }

    /// Idle time after which a ping is sent.
    fn ping_interval(&self) -> Duration {
        self.timeout / 3
    }

    /// Drives the connection until it closes, then fails whatever is left.
    pub(crate) async fn run(mut self) {
        let session_id = self.session_id;
        let final_state = match self.drive().await {
            Ok(Exit::Closed) => {
                tracing::info!(%session_id, "session closed");
                SessionState::Closed
            }
            Ok(Exit::Abandoned) => {
                tracing::debug!(%session_id, "session handle dropped");
                SessionState::Closed
            }
            Err(SessionError::Expired) => {
                tracing::warn!(%session_id, "session expired");
                SessionState::Expired
            }
            Err(e) => {
                tracing::warn!(%session_id, error = %e, "connection lost");
                SessionState::Disconnected
            }
        };

        self.fail_outstanding();
        self.set_state(final_state);
        if let Err(e) = self.conn.close().await {
            tracing::debug!(%session_id, error = %e, "error closing connection");
        }
    }

    async fn drive(&mut self) -> Result<Exit, SessionError> {
        let tick = (self.ping_interval() / 2).max(MIN_TICK);
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                request = self.requests.recv(), if !self.closing => {
                    match request {
                        Some(request) => self.send_request(request).await?,
                        None => return Ok(Exit::Abandoned),
                    }
                }
                frame = self.conn.recv() => {
                    let Some(frame) = frame? else {
                        if self.closing {
                            // The server may drop the socket right after
                            // acknowledging the close.
                            self.acknowledge_close();
                            return Ok(Exit::Closed);
                        }
                        return Err(SessionError::ConnectionLoss);
                    };
                    self.last_recv = Instant::now();
                    if self.handle_frame(&frame)? {
                        return Ok(Exit::Closed);
                    }
                }
                _ = ticker.tick() => {
                    if self.last_recv.elapsed() >= self.read_timeout() {
                        tracing::warn!(
                            session_id = %self.session_id,
                            silent_ms = self.last_recv.elapsed().as_millis() as u64,
                            "no reply from server within read timeout"
                        );
                        return Err(SessionError::ConnectionLoss);
                    }
                    if self.last_send.elapsed() >= self.ping_interval() {
                        self.send_ping().await?;
                    }
                }
            }
        }
    }

    async fn send_request(&mut self, request: Request) -> Result<(), SessionError> {
        let xid = self.take_xid();
        let mut w = RecordWriter::new();
        w.write_record(&RequestHeader {
            xid,
            op: request.op.as_i32(),
        });
        let mut frame = w.into_bytes();
        frame.extend_from_slice(&request.body);

        if request.op == OpCode::CloseSession {
            self.closing = true;
        }
        tracing::trace!(session_id = %self.session_id, xid, op = %request.op, "sending request");

        // Queue before writing so a failed write still fails this request
        // with the connection error rather than dropping it.
        self.pending.push_back(Pending {
            xid,
            op: request.op,
            reply: request.reply,
        });
        self.write(&frame).await
    }

    async fn send_ping(&mut self) -> Result<(), SessionError> {
        let mut w = RecordWriter::new();
        w.write_record(&RequestHeader {
            xid: PING_XID,
            op: OpCode::Ping.as_i32(),
        });
        tracing::trace!(session_id = %self.session_id, "sending ping");
        self.write(&w.into_bytes()).await
    }

    async fn write(&mut self, frame: &[u8]) -> Result<(), SessionError> {
        self.conn.send(frame).await?;
        self.last_send = Instant::now();
        Ok(())
    }

    /// Handles one reply frame. Returns `true` once the close-session
    /// request has been answered.
    fn handle_frame(&mut self, frame: &[u8]) -> Result<bool, SessionError> {
        let mut r = RecordReader::new(frame);
        let header: ReplyHeader = r.read_record()?;

        match header.xid {
            PING_XID => {
                tracing::trace!(session_id = %self.session_id, "ping reply");
                Ok(false)
            }
            NOTIFICATION_XID => {
                let event: WatcherEvent = r.read_record()?;
                tracing::debug!(session_id = %self.session_id, %event, "ignoring notification");
                Ok(false)
            }
            xid => {
                let pending = self.pending.pop_front().ok_or_else(|| {
                    ProtocolError::InvalidMessage(format!(
                        "reply for xid {xid} with no request outstanding"
                    ))
                })?;
                if pending.xid != xid {
                    let expected = pending.xid;
                    self.pending.push_front(pending);
                    return Err(ProtocolError::InvalidMessage(format!(
                        "reply for xid {xid}, expected {expected}"
                    ))
                    .into());
                }

                let closed = pending.op == OpCode::CloseSession;
                match header.error() {
                    Some(ErrorCode::SessionExpired) => {
                        let _ = pending.reply.send(Err(SessionError::Expired));
                        Err(SessionError::Expired)
                    }
                    Some(code) => {
                        let _ = pending.reply.send(Err(SessionError::Keeper(code)));
                        Ok(closed)
                    }
                    None => {
                        // The caller may have stopped waiting; that is
                        // not an error.
                        let _ = pending.reply.send(Ok(r.read_rest().to_vec()));
                        Ok(closed)
                    }
                }
            }
        }
    }

    fn take_xid(&mut self) -> i32 {
        let xid = self.next_xid;
        // Negative ids are reserved for pings and notifications.
        self.next_xid = self.next_xid.checked_add(1).unwrap_or(1);
        xid
    }

    /// Completes a pending close-session request whose reply was cut off
    /// by the server closing the socket.
    fn acknowledge_close(&mut self) {
        if let Some(pending) = self.pending.pop_back() {
            if pending.op == OpCode::CloseSession {
                let _ = pending.reply.send(Ok(Vec::new()));
            } else {
                self.pending.push_back(pending);
            }
        }
    }

    /// Fails every written and every still-queued request.
    fn fail_outstanding(&mut self) {
        let failed = self.pending.len();
        for pending in self.pending.drain(..) {
            let _ = pending.reply.send(Err(SessionError::ConnectionLoss));
        }

        self.requests.close();
        let mut queued = 0;
        while let Ok(request) = self.requests.try_recv() {
            let _ = request.reply.send(Err(SessionError::ConnectionLoss));
            queued += 1;
        }

        if failed + queued > 0 {
            tracing::debug!(
                session_id = %self.session_id,
                failed,
                queued,
                "failed outstanding requests"
            );
        }
    }

    fn set_state(&self, state: SessionState) {
        self.state.send_replace(state);
        self.notifier.notify(state);
    }
}
