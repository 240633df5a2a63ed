//! Control-plane client.
//!
//! Keeps one registered control stream alive for the lifetime of a listener:
//! `Register` then `Registered`, acknowledges heartbeats, and hands every
//! `DialRequest` to its own task. Transient failures reconnect with jittered
//! exponential backoff; fatal ones close the accept queue with the error.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use border0_core::messages::{DialRequestPayload, DialResultPayload, RegisterPayload};
use border0_core::{
    frame_encode, Border0Error, Border0Result, ControlMessage, DialFailure, FrameDecoder,
    PROTOCOL_VERSION,
};

use crate::backoff::BackoffConfig;
use crate::credentials::Credentials;
use crate::queue::{AcceptQueue, PushError};
use crate::relay::RelayDialer;
use crate::stream::InboundStream;
use crate::transport::{BoxedStream, Connector};

const READ_BUFFER_SIZE: usize = 16 * 1024;
const OUTGOING_CAPACITY: usize = 256;
/// Budget for final dial results and shutdown once the listener is closing.
const FLUSH_GRACE: Duration = Duration::from_millis(200);
/// Upper bound on waiting for a session's writer to stop.
const WRITER_GRACE: Duration = Duration::from_millis(400);

/// Lifecycle of the control session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Connecting = 0,
    Running = 1,
    Reconnecting = 2,
    Closed = 3,
}

/// Written only by the control task; read by anyone.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new(state: SessionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn get(&self) -> SessionState {
        match self.0.load(Ordering::Acquire) {
            0 => SessionState::Connecting,
            1 => SessionState::Running,
            2 => SessionState::Reconnecting,
            _ => SessionState::Closed,
        }
    }

    pub(crate) fn set(&self, state: SessionState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Timeouts and retry policy for the control session.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ControlTimings {
    pub register: Duration,
    pub heartbeat: Duration,
    pub dial: Duration,
    pub drain: Duration,
    pub backoff: BackoffConfig,
}

/// A registered control stream, ready to serve.
pub(crate) struct ControlSession {
    pub connector_id: Uuid,
    stream: BoxedStream,
    decoder: FrameDecoder,
    /// Messages that arrived in the same read as `Registered`.
    backlog: Vec<ControlMessage>,
}

/// Dial results waiting for a control stream. Shared by every session, so a
/// result produced while reconnecting goes out on the next stream.
struct Outbox {
    rx: mpsc::UnboundedReceiver<DialResultPayload>,
    /// Taken from `rx` but not yet fully written.
    unsent: Option<DialResultPayload>,
}

pub(crate) struct ControlClient {
    endpoint: String,
    connector: Connector,
    credentials: Credentials,
    socket_id: Uuid,
    timings: ControlTimings,
    dials: DialContext,
    outbox: Arc<Mutex<Outbox>>,
    state: Arc<StateCell>,
    cancel: CancellationToken,
}

impl ControlClient {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        endpoint: String,
        connector: Connector,
        credentials: Credentials,
        socket_id: Uuid,
        timings: ControlTimings,
        dialer: RelayDialer,
        queue: Arc<AcceptQueue<InboundStream>>,
        max_inflight: usize,
        state: Arc<StateCell>,
        cancel: CancellationToken,
    ) -> Self {
        let (results, rx) = mpsc::unbounded_channel();
        let dials = DialContext {
            dialer,
            queue,
            permits: Arc::new(Semaphore::new(max_inflight.max(1))),
            results,
            cancel: cancel.clone(),
            budget: timings.dial,
        };
        Self {
            endpoint,
            connector,
            credentials,
            socket_id,
            timings,
            dials,
            outbox: Arc::new(Mutex::new(Outbox { rx, unsent: None })),
            state,
            cancel,
        }
    }

    /// Open the control stream and register the socket.
    ///
    /// Connect, the `Register` write and the wait for `Registered` share one
    /// `register` timeout.
    pub(crate) async fn connect(&mut self) -> Border0Result<ControlSession> {
        let deadline = Instant::now() + self.timings.register;

        let (mut stream, peer) = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Border0Error::Cancelled),
            res = time::timeout_at(deadline, self.connector.connect(&self.endpoint)) => {
                res.map_err(|_| Border0Error::Timeout)??
            }
        };
        debug!(endpoint = %self.endpoint, peer = %peer, "control stream open");

        let register = ControlMessage::Register(RegisterPayload {
            socket_id: self.socket_id,
            version: PROTOCOL_VERSION.to_string(),
            metadata: self.credentials.metadata(),
        });
        let frame = frame_encode(&register)?;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Border0Error::Cancelled),
            res = time::timeout_at(deadline, write_frame(&mut stream, &frame)) => {
                res.map_err(|_| Border0Error::Timeout)??
            }
        }

        let mut decoder = FrameDecoder::new();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            let n = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Border0Error::Cancelled),
                read = time::timeout_at(deadline, stream.read(&mut buf)) => match read {
                    Err(_) => return Err(Border0Error::Timeout),
                    Ok(Ok(0)) => {
                        return Err(Border0Error::Transient(
                            "control stream closed during registration".into(),
                        ))
                    }
                    Ok(Ok(n)) => n,
                    Ok(Err(e)) => return Err(e.into()),
                },
            };

            let mut messages = decoder.feed::<ControlMessage>(&buf[..n])?.into_iter();
            while let Some(msg) = messages.next() {
                match msg {
                    ControlMessage::Registered(reg) => {
                        self.credentials.set_connector_id(reg.connector_id.to_string());
                        info!(
                            socket_id = %self.socket_id,
                            connector_id = %reg.connector_id,
                            "registered with control plane"
                        );
                        return Ok(ControlSession {
                            connector_id: reg.connector_id,
                            stream,
                            decoder,
                            backlog: messages.collect(),
                        });
                    }
                    ControlMessage::Error(err) => {
                        return Err(Border0Error::from_remote(err.code, err.message));
                    }
                    other => {
                        debug!(kind = other.kind(), "ignoring message before registration");
                    }
                }
            }
        }
    }

    /// Serve sessions until the listener is cancelled or a fatal error occurs.
    pub(crate) async fn run(mut self, first: ControlSession) {
        let mut dials = JoinSet::new();
        let mut session = first;

        'outer: loop {
            self.state.set(SessionState::Running);
            match self.serve(session, &mut dials).await {
                Ok(()) => break,
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "control session failed permanently");
                    self.fail(e).await;
                    break;
                }
                Err(e) => warn!(error = %e, "control session lost, reconnecting"),
            }

            self.state.set(SessionState::Reconnecting);
            let mut attempt: u32 = 0;
            session = loop {
                let delay = self.timings.backoff.delay(attempt);
                attempt = attempt.saturating_add(1);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "waiting to reconnect");
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break 'outer,
                    _ = time::sleep(delay) => {}
                }

                self.state.set(SessionState::Connecting);
                match self.connect().await {
                    Ok(s) => {
                        info!(attempt, "control session re-established");
                        break s;
                    }
                    Err(Border0Error::Cancelled) => break 'outer,
                    Err(e) if e.is_fatal() => {
                        error!(error = %e, "reconnect rejected permanently");
                        self.fail(e).await;
                        break 'outer;
                    }
                    Err(e) => warn!(attempt, error = %e, "reconnect failed"),
                }
                self.state.set(SessionState::Reconnecting);
            };
        }

        self.state.set(SessionState::Closed);
        self.drain(dials).await;
        debug!("control loop ended");
    }

    async fn fail(&self, err: Border0Error) {
        self.dials.queue.fail(err).await;
        self.cancel.cancel();
    }

    /// Run one registered session. `Ok` means the listener was cancelled.
    async fn serve(
        &self,
        session: ControlSession,
        dials: &mut JoinSet<()>,
    ) -> Border0Result<()> {
        let ControlSession {
            connector_id,
            stream,
            decoder,
            backlog,
        } = session;
        debug!(connector_id = %connector_id, "serving control session");

        let (reader, writer) = tokio::io::split(stream);
        let (ack_tx, ack_rx) = mpsc::channel::<ControlMessage>(OUTGOING_CAPACITY);
        let session_token = self.cancel.child_token();
        let mut writer_task = tokio::spawn(write_loop(
            writer,
            ack_rx,
            self.outbox.clone(),
            session_token.clone(),
            self.cancel.clone(),
        ));

        let result = self
            .read_loop(reader, decoder, backlog, &ack_tx, &session_token, dials)
            .await;

        session_token.cancel();
        if time::timeout(WRITER_GRACE, &mut writer_task).await.is_err() {
            warn!("control writer did not stop in time, aborting");
            writer_task.abort();
        }
        result
    }

    async fn read_loop(
        &self,
        mut reader: ReadHalf<BoxedStream>,
        mut decoder: FrameDecoder,
        backlog: Vec<ControlMessage>,
        ack_tx: &mpsc::Sender<ControlMessage>,
        session: &CancellationToken,
        dials: &mut JoinSet<()>,
    ) -> Border0Result<()> {
        for msg in backlog {
            self.handle(msg, ack_tx, dials)?;
        }

        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let mut deadline = Instant::now() + self.timings.heartbeat;
        loop {
            let n = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(()),
                _ = session.cancelled() => {
                    return Err(Border0Error::Transient("control stream write failed".into()));
                }
                Some(joined) = dials.join_next(), if !dials.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(error = %e, "dial task panicked");
                        }
                    }
                    continue;
                }
                read = time::timeout_at(deadline, reader.read(&mut buf)) => match read {
                    Err(_) => {
                        return Err(Border0Error::Transient(format!(
                            "control stream silent for {:?}",
                            self.timings.heartbeat
                        )));
                    }
                    Ok(Ok(0)) => {
                        return Err(Border0Error::Transient("control stream closed by peer".into()));
                    }
                    Ok(Ok(n)) => n,
                    Ok(Err(e)) => return Err(e.into()),
                },
            };

            deadline = Instant::now() + self.timings.heartbeat;
            for msg in decoder.feed::<ControlMessage>(&buf[..n])? {
                self.handle(msg, ack_tx, dials)?;
            }
        }
    }

    fn handle(
        &self,
        msg: ControlMessage,
        ack_tx: &mpsc::Sender<ControlMessage>,
        dials: &mut JoinSet<()>,
    ) -> Border0Result<()> {
        match msg {
            ControlMessage::Heartbeat(hb) => {
                trace!(seq = hb.seq, "heartbeat");
                ack_tx
                    .try_send(ControlMessage::HeartbeatAck(hb))
                    .map_err(|e| match e {
                        mpsc::error::TrySendError::Full(_) => {
                            Border0Error::Transient("control writer stalled".into())
                        }
                        mpsc::error::TrySendError::Closed(_) => {
                            Border0Error::Transient("control writer stopped".into())
                        }
                    })?;
            }
            ControlMessage::DialRequest(req) => {
                debug!(request_id = %req.request_id, relay = %req.relay_address, "dial request");
                let ctx = self.dials.clone();
                dials.spawn(ctx.handle(req));
            }
            ControlMessage::Error(err) => {
                return Err(Border0Error::from_remote(err.code, err.message));
            }
            other => debug!(kind = other.kind(), "ignoring unexpected control message"),
        }
        Ok(())
    }

    async fn drain(&self, mut dials: JoinSet<()>) {
        if dials.is_empty() {
            return;
        }
        let drained = time::timeout(self.timings.drain, async {
            while dials.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(pending = dials.len(), "drain deadline elapsed, aborting in-flight dials");
            dials.abort_all();
            while dials.join_next().await.is_some() {}
        }
    }
}

/// Writes heartbeat acks and pending dial results until the session ends.
///
/// Holds the outbox for the whole session. A dial result only leaves the
/// outbox once it is fully written; otherwise the next session retries it.
async fn write_loop(
    mut writer: WriteHalf<BoxedStream>,
    mut acks: mpsc::Receiver<ControlMessage>,
    outbox: Arc<Mutex<Outbox>>,
    session: CancellationToken,
    listener: CancellationToken,
) {
    let mut outbox = outbox.lock().await;
    loop {
        let (msg, is_result) = match outbox.unsent.clone() {
            Some(result) => (ControlMessage::DialResult(result), true),
            None => tokio::select! {
                biased;
                _ = session.cancelled() => break,
                msg = acks.recv() => match msg {
                    Some(msg) => (msg, false),
                    None => break,
                },
                Some(result) = outbox.rx.recv() => {
                    outbox.unsent = Some(result.clone());
                    (ControlMessage::DialResult(result), true)
                }
            },
        };

        let frame = match frame_encode(&msg) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(kind = msg.kind(), error = %e, "failed to encode control message");
                if is_result {
                    outbox.unsent = None;
                }
                continue;
            }
        };
        let written = tokio::select! {
            biased;
            _ = session.cancelled() => break,
            res = write_frame(&mut writer, &frame) => res,
        };
        match written {
            Ok(()) if is_result => outbox.unsent = None,
            Ok(()) => {}
            Err(e) => {
                warn!(error = %e, "control stream write failed");
                session.cancel();
                break;
            }
        }
    }

    let finish = async {
        if listener.is_cancelled() {
            flush_results(&mut writer, &mut outbox).await;
        }
        let _ = writer.shutdown().await;
    };
    if time::timeout(FLUSH_GRACE, finish).await.is_err() {
        debug!("control stream did not take its final writes in time");
    }
}

/// Best-effort send of the results still queued when the listener stops.
async fn flush_results(writer: &mut WriteHalf<BoxedStream>, outbox: &mut Outbox) {
    while let Some(result) = outbox.unsent.take().or_else(|| outbox.rx.try_recv().ok()) {
        let Ok(frame) = frame_encode(&ControlMessage::DialResult(result)) else {
            continue;
        };
        if write_frame(writer, &frame).await.is_err() {
            return;
        }
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> std::io::Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await
}

/// Everything a dial task needs, cloned into each task.
#[derive(Clone)]
struct DialContext {
    dialer: RelayDialer,
    queue: Arc<AcceptQueue<InboundStream>>,
    permits: Arc<Semaphore>,
    results: mpsc::UnboundedSender<DialResultPayload>,
    cancel: CancellationToken,
    budget: Duration,
}

impl DialContext {
    async fn handle(self, req: DialRequestPayload) {
        let request_id = req.request_id;
        let mut fatal = None;
        let reply = match self.establish(req).await {
            Ok(()) => {
                debug!(request_id = %request_id, "inbound stream queued");
                DialResultPayload::ok(request_id)
            }
            Err(e) => {
                let reason = match &e {
                    Border0Error::Dial { reason, .. } => *reason,
                    Border0Error::Auth(_) => DialFailure::RelayRefused,
                    _ => DialFailure::Protocol,
                };
                warn!(request_id = %request_id, reason = %reason, error = %e, "dial failed");
                if e.is_fatal() {
                    fatal = Some(e);
                }
                DialResultPayload::failed(request_id, reason)
            }
        };

        if self.results.send(reply).is_err() {
            debug!(request_id = %request_id, "control loop ended before dial result was queued");
        }
        if let Some(err) = fatal {
            error!(request_id = %request_id, error = %err, "relay rejected listener credentials");
            self.queue.fail(err).await;
            self.cancel.cancel();
        }
    }

    /// Dial the relay and enqueue the stream within the per-dial budget.
    async fn establish(&self, req: DialRequestPayload) -> Border0Result<()> {
        let deadline = Instant::now() + self.budget;
        let work = async {
            let _permit = match time::timeout_at(deadline, self.permits.clone().acquire_owned()).await {
                Err(_) => {
                    return Err(Border0Error::dial(
                        DialFailure::Backpressure,
                        "too many dials in flight",
                    ))
                }
                Ok(Err(_)) => return Err(Border0Error::dial(DialFailure::Closed, "listener closed")),
                Ok(Ok(permit)) => permit,
            };

            let stream = time::timeout_at(deadline, self.dialer.dial(&req))
                .await
                .map_err(|_| {
                    Border0Error::dial(DialFailure::Timeout, "relay handshake exceeded dial budget")
                })??;

            match self.queue.push_until(stream, deadline).await {
                Ok(()) => Ok(()),
                Err(PushError::Full(stream)) => {
                    drop(stream);
                    Err(Border0Error::dial(DialFailure::Backpressure, "accept queue full"))
                }
                Err(PushError::Closed(stream)) => {
                    drop(stream);
                    Err(Border0Error::dial(DialFailure::Closed, "listener closed"))
                }
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Border0Error::dial(DialFailure::Closed, "listener closed")),
            res = work => res,
        }
    }
}
