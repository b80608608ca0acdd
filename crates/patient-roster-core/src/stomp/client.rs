//! STOMP client connection task.
//!
//! One task per activated client. It connects, performs the CONNECT/CONNECTED
//! handshake, executes subscribe/unsubscribe requests and forwards MESSAGE
//! frames. After any failure it waits the reconnect delay and starts over,
//! until deactivated. Lifecycle changes are reported as [`TransportEvent`]s.

use std::time::Duration;

use async_tungstenite::tungstenite::{Error as WsError, Message};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, trace, warn};
use url::Url;

use super::{Command, Frame, FrameDecoder, HeartBeat, Incoming, StompError, StompResult, DEFAULT_MAX_FRAME_SIZE};

/// Connection settings.
#[derive(Debug, Clone)]
pub struct StompConfig {
    /// WebSocket endpoint, e.g. `ws://localhost:8081/ws`
    pub broker_url: Url,
    /// Fixed delay between connection attempts
    pub reconnect_delay: Duration,
    pub heart_beat: HeartBeat,
    /// Bound on opening the socket, and separately on waiting for CONNECTED
    pub handshake_timeout: Duration,
    /// Largest inbound frame; bigger ones drop the connection
    pub max_frame_size: usize,
    /// Extra CONNECT headers (e.g. `Authorization`)
    pub connect_headers: Vec<(String, String)>,
}

impl StompConfig {
    pub fn new(broker_url: Url) -> Self {
        Self {
            broker_url,
            reconnect_delay: Duration::from_millis(5000),
            heart_beat: HeartBeat::new(4000, 4000),
            handshake_timeout: Duration::from_secs(10),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            connect_headers: Vec::new(),
        }
    }

    /// Send `Authorization: Bearer <token>` on CONNECT when a token is given.
    pub fn with_bearer(mut self, token: Option<&str>) -> Self {
        self.connect_headers.retain(|(name, _)| !name.eq_ignore_ascii_case("authorization"));
        if let Some(token) = token {
            self.connect_headers
                .push(("Authorization".to_string(), format!("Bearer {token}")));
        }
        self
    }

    fn host(&self) -> String {
        match (self.broker_url.host_str(), self.broker_url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            _ => "localhost".to_string(),
        }
    }

    fn connect_frame(&self) -> Frame {
        let mut frame = Frame::new(Command::Connect)
            .header("accept-version", "1.2,1.1,1.0")
            .header("host", self.host())
            .header("heart-beat", self.heart_beat.header_value());
        for (name, value) in &self.connect_headers {
            frame = frame.header(name.clone(), value.clone());
        }
        frame
    }
}

/// Lifecycle and data notifications from the connection task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A connection attempt is starting.
    Connecting,
    /// CONNECTED received.
    Connected,
    /// MESSAGE frame on a subscription.
    Message { subscription: String, body: String },
    /// The attempt or the live connection failed.
    Error(String),
    /// The broker closed the connection.
    Closed,
}

#[derive(Debug)]
enum Control {
    Subscribe { id: String, destination: String },
    Unsubscribe { id: String },
    Deactivate,
}

enum Ended {
    Deactivated,
    Closed,
}

/// Handle to an active connection task.
///
/// Dropping the handle deactivates the client.
#[derive(Debug)]
pub struct StompClient {
    control: mpsc::UnboundedSender<Control>,
    task: JoinHandle<()>,
}

impl StompClient {
    /// Spawn the connection task. `on_event` returns `false` once nobody is
    /// listening, which deactivates the client.
    pub fn activate<F>(config: StompConfig, on_event: F) -> Self
    where
        F: FnMut(TransportEvent) -> bool + Send + 'static,
    {
        let (control, control_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(config, control_rx, on_event));
        Self { control, task }
    }

    pub fn subscribe(&self, id: &str, destination: &str) {
        self.send(Control::Subscribe {
            id: id.to_string(),
            destination: destination.to_string(),
        });
    }

    pub fn unsubscribe(&self, id: &str) {
        self.send(Control::Unsubscribe { id: id.to_string() });
    }

    /// Disconnect and stop reconnecting. Safe to call more than once.
    pub fn deactivate(&self) {
        self.send(Control::Deactivate);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Deactivate and wait for the task to exit.
    pub async fn shutdown(self) {
        self.deactivate();
        let Self { control, task } = self;
        drop(control);
        if let Err(e) = task.await {
            warn!("STOMP task ended abnormally: {e}");
        }
    }

    fn send(&self, control: Control) {
        if self.control.send(control).is_err() {
            trace!("STOMP task already stopped");
        }
    }
}

async fn run<F>(config: StompConfig, mut control: mpsc::UnboundedReceiver<Control>, mut on_event: F)
where
    F: FnMut(TransportEvent) -> bool + Send + 'static,
{
    loop {
        if !on_event(TransportEvent::Connecting) {
            return;
        }
        info!(url = %config.broker_url, "Connecting to STOMP broker");

        let event = match connect_once(&config, &mut control, &mut on_event).await {
            Ok(Ended::Deactivated) => {
                info!("STOMP client deactivated");
                return;
            }
            Ok(Ended::Closed) => {
                info!("WebSocket closed");
                TransportEvent::Closed
            }
            Err(e) => {
                warn!("STOMP connection failed: {e}");
                TransportEvent::Error(e.to_string())
            }
        };
        if !on_event(event) {
            return;
        }

        debug!(delay = ?config.reconnect_delay, "Waiting before reconnect");
        let sleep = tokio::time::sleep(config.reconnect_delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                cmd = control.recv() => match cmd {
                    None | Some(Control::Deactivate) => {
                        info!("STOMP client deactivated while disconnected");
                        return;
                    }
                    Some(other) => debug!("Dropping {other:?} while disconnected"),
                },
            }
        }
    }
}

async fn send_frame<S>(sink: &mut S, frame: &Frame) -> StompResult<()>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    let text = String::from_utf8(frame.encode()).map_err(|_| StompError::InvalidUtf8)?;
    trace!(command = %frame.command, "STOMP >>>");
    sink.send(Message::text(text)).await?;
    Ok(())
}

async fn disconnect<S>(sink: &mut S)
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    if let Err(e) = send_frame(sink, &Frame::new(Command::Disconnect)).await {
        debug!("DISCONNECT not delivered: {e}");
    }
    if let Err(e) = sink.close().await {
        debug!("WebSocket close failed: {e}");
    }
}

fn feed(decoder: &mut FrameDecoder, message: Message) -> Option<Ended> {
    match message {
        Message::Text(text) => decoder.push(text.as_bytes()),
        Message::Binary(data) => decoder.push(&data),
        Message::Close(_) => return Some(Ended::Closed),
        _ => {}
    }
    None
}

async fn connect_once<F>(
    config: &StompConfig,
    control: &mut mpsc::UnboundedReceiver<Control>,
    on_event: &mut F,
) -> StompResult<Ended>
where
    F: FnMut(TransportEvent) -> bool,
{
    let connect = tokio::time::timeout(
        config.handshake_timeout,
        async_tungstenite::tokio::connect_async(config.broker_url.as_str()),
    );
    tokio::pin!(connect);
    let ws = loop {
        tokio::select! {
            connected = &mut connect => match connected {
                Ok(result) => break result?.0,
                Err(_) => return Err(StompError::ConnectTimeout(config.handshake_timeout)),
            },
            cmd = control.recv() => match cmd {
                None | Some(Control::Deactivate) => return Ok(Ended::Deactivated),
                Some(other) => debug!("Dropping {other:?} while connecting"),
            },
        }
    };
    let (mut sink, mut stream) = ws.split();

    send_frame(&mut sink, &config.connect_frame()).await?;

    let mut decoder = FrameDecoder::with_max_frame_size(config.max_frame_size);
    let server_beat = match handshake(config, &mut stream, control, &mut decoder).await? {
        Some(beat) => beat,
        None => {
            disconnect(&mut sink).await;
            return Ok(Ended::Deactivated);
        }
    };

    let (send_every, expect_every) = config.heart_beat.negotiate(server_beat);
    info!(send_every, expect_every, "STOMP connected");
    if !on_event(TransportEvent::Connected) {
        disconnect(&mut sink).await;
        return Ok(Ended::Deactivated);
    }

    let send_period = Duration::from_millis(u64::from(send_every.max(1)));
    let expect_period = Duration::from_millis(u64::from(expect_every.max(1)));
    let mut ping = interval_at(Instant::now() + send_period, send_period);
    let mut watchdog = interval_at(Instant::now() + expect_period, expect_period);
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            msg = stream.next() => {
                let msg = match msg {
                    None => return Ok(Ended::Closed),
                    Some(msg) => msg?,
                };
                last_seen = Instant::now();
                if let Some(ended) = feed(&mut decoder, msg) {
                    return Ok(ended);
                }
                while let Some(incoming) = decoder.decode_next()? {
                    let frame = match incoming {
                        Incoming::HeartBeat => {
                            trace!("STOMP <<< heart-beat");
                            continue;
                        }
                        Incoming::Frame(frame) => frame,
                    };
                    trace!(command = %frame.command, "STOMP <<<");
                    match frame.command {
                        Command::Message => {
                            let event = TransportEvent::Message {
                                subscription: frame.get("subscription").unwrap_or_default().to_string(),
                                body: String::from_utf8_lossy(&frame.body).into_owned(),
                            };
                            if !on_event(event) {
                                disconnect(&mut sink).await;
                                return Ok(Ended::Deactivated);
                            }
                        }
                        Command::Error => return Err(broker_error(&frame)),
                        other => debug!("Ignoring {other} frame"),
                    }
                }
            }
            cmd = control.recv() => match cmd {
                Some(Control::Subscribe { id, destination }) => {
                    debug!(%id, %destination, "Subscribing");
                    let frame = Frame::new(Command::Subscribe)
                        .header("id", id)
                        .header("destination", destination)
                        .header("ack", "auto");
                    send_frame(&mut sink, &frame).await?;
                }
                Some(Control::Unsubscribe { id }) => {
                    debug!(%id, "Unsubscribing");
                    send_frame(&mut sink, &Frame::new(Command::Unsubscribe).header("id", id)).await?;
                }
                None | Some(Control::Deactivate) => {
                    disconnect(&mut sink).await;
                    return Ok(Ended::Deactivated);
                }
            },
            _ = ping.tick(), if send_every > 0 => {
                trace!("STOMP >>> heart-beat");
                sink.send(Message::text("\n".to_string())).await?;
            }
            _ = watchdog.tick(), if expect_every > 0 => {
                let silent = last_seen.elapsed();
                if silent > expect_period * 2 {
                    return Err(StompError::HeartbeatTimeout(silent));
                }
            }
        }
    }
}

/// Wait for CONNECTED. `Ok(None)` means deactivation was requested meanwhile.
async fn handshake<S>(
    config: &StompConfig,
    stream: &mut S,
    control: &mut mpsc::UnboundedReceiver<Control>,
    decoder: &mut FrameDecoder,
) -> StompResult<Option<HeartBeat>>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let deadline = tokio::time::sleep(config.handshake_timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => return Err(StompError::HandshakeTimeout(config.handshake_timeout)),
            cmd = control.recv() => match cmd {
                None | Some(Control::Deactivate) => return Ok(None),
                Some(other) => debug!("Dropping {other:?} before handshake"),
            },
            msg = stream.next() => {
                let msg = match msg {
                    None => return Err(StompError::ClosedDuringHandshake),
                    Some(msg) => msg?,
                };
                if feed(decoder, msg).is_some() {
                    return Err(StompError::ClosedDuringHandshake);
                }
                while let Some(incoming) = decoder.decode_next()? {
                    let Incoming::Frame(frame) = incoming else {
                        continue;
                    };
                    return match frame.command {
                        Command::Connected => {
                            debug!(version = frame.get("version"), server = frame.get("server"), "Handshake complete");
                            HeartBeat::parse(frame.get("heart-beat")).map(Some)
                        }
                        Command::Error => Err(broker_error(&frame)),
                        other => Err(StompError::UnexpectedFrame(other)),
                    };
                }
            }
        }
    }
}

fn broker_error(frame: &Frame) -> StompError {
    let message = frame.get("message").unwrap_or("unspecified");
    let details = String::from_utf8_lossy(&frame.body);
    if details.trim().is_empty() {
        StompError::Broker(message.to_string())
    } else {
        StompError::Broker(format!("{message}: {}", details.trim()))
    }
}
