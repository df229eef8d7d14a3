//! Connection supervisor: lifecycle, heartbeat, idle recycle and reconnects
//! layered around the live subscriber.

use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use solana_sdk::commitment_config::CommitmentConfig;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::backfill::backfill;
use super::context::RunContext;
use super::reconnect::ReconnectBackoff;
use super::subscriber::{dispatch, parse_message, subscribe_request, Dispatch, Inbound};
use super::types::{ActivityEvent, ConnectionState, MonitoredPair};
use crate::config::StreamConfig;
use crate::error::{MonitorError, MonitorResult};
use crate::rpc::{RpcClient, RpcTransport, SolanaRpc};
use crate::state::{CursorStore, FileCursorStore};

/// Monitors one pair at a time. All mutable stream state lives here;
/// nothing is global, so independent monitors can coexist.
pub struct PairMonitor {
    config: Arc<StreamConfig>,
    rpc: SolanaRpc,
    store: Arc<dyn CursorStore>,
    events: mpsc::Sender<ActivityEvent>,
    state: Arc<RwLock<ConnectionState>>,
    run: Mutex<Option<ActiveRun>>,
}

struct ActiveRun {
    ctx: Arc<RunContext>,
    connection: Option<JoinHandle<()>>,
}

impl PairMonitor {
    /// Build a monitor over the given transport and cursor store.
    /// Events are delivered on the returned receiver.
    pub fn new(
        config: StreamConfig,
        transport: Arc<dyn RpcTransport>,
        store: Arc<dyn CursorStore>,
    ) -> MonitorResult<(Self, mpsc::Receiver<ActivityEvent>)> {
        config.validate()?;

        let (events, receiver) = mpsc::channel(config.event_buffer);
        let rpc = SolanaRpc::new(transport, config.rpc_timeout(), config.commitment);

        let monitor = Self {
            config: Arc::new(config),
            rpc,
            store,
            events,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            run: Mutex::new(None),
        };
        Ok((monitor, receiver))
    }

    /// HTTP RPC client plus on-disk cursors, as configured
    pub fn from_config(config: StreamConfig) -> MonitorResult<(Self, mpsc::Receiver<ActivityEvent>)> {
        let transport = RpcClient::new(config.rpc_url.clone())
            .map_err(|e| MonitorError::Validation(format!("cannot build rpc client: {e}")))?;
        let store = FileCursorStore::new(config.cursor_dir.clone());
        Self::new(config, Arc::new(transport), Arc::new(store))
    }

    /// Probe, reconcile history, then open the live stream.
    ///
    /// Returns once backfill is done and the connection task is running;
    /// the subscription acknowledgment arrives asynchronously.
    pub async fn start(&self, pair: MonitoredPair) -> MonitorResult<()> {
        if self.run.lock().is_some() {
            info!("monitor already running, stopping previous pair");
            self.stop();
        }

        info!(pair = %pair, "starting pair monitor");

        if let Err(e) = self.rpc.get_health().await {
            error!(pair = %pair.short(), error = %e, "connectivity probe failed");
            return Err(MonitorError::Probe(e));
        }

        let cursor = self
            .store
            .load(&pair)
            .map_err(|e| MonitorError::Store(format!("{e:#}")))?;
        debug!(pair = %pair.short(), last_slot = cursor.last_position, "cursor loaded");

        let ctx = Arc::new(RunContext::new(
            pair,
            Arc::clone(&self.config),
            self.rpc.clone(),
            Arc::clone(&self.store),
            self.events.clone(),
            cursor.clone(),
            Arc::clone(&self.state),
        ));
        *self.run.lock() = Some(ActiveRun {
            ctx: Arc::clone(&ctx),
            connection: None,
        });

        backfill(&ctx, &cursor).await;

        if !ctx.is_active() {
            debug!(pair = %ctx.pair.short(), "stopped during backfill");
            return Ok(());
        }

        ctx.set_state(ConnectionState::Connecting);
        let handle = tokio::spawn(run_connection(Arc::clone(&ctx)));

        let mut slot = self.run.lock();
        match slot.as_mut() {
            Some(run) if Arc::ptr_eq(&run.ctx, &ctx) => run.connection = Some(handle),
            _ => handle.abort(),
        }
        Ok(())
    }

    /// Tear down the current run. Safe to call from any state, any number of times.
    /// The persisted cursor is kept.
    pub fn stop(&self) {
        let run = self.run.lock().take();
        if let Some(run) = run {
            run.ctx.deactivate();
            if let Some(connection) = run.connection {
                connection.abort();
            }
            info!(pair = %run.ctx.pair.short(), "pair monitor stopped");
        }
        *self.state.write() = ConnectionState::Disconnected;
    }

    /// Switch pairs: a full stop followed by a fresh start, never an in-place swap
    pub async fn set_pair(&self, pair: MonitoredPair) -> MonitorResult<()> {
        self.stop();
        self.start(pair).await
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Subscribed
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn current_pair(&self) -> Option<MonitoredPair> {
        self.run.lock().as_ref().map(|run| run.ctx.pair.clone())
    }

    /// Live detail fetches currently running
    pub fn in_flight(&self) -> usize {
        self.run
            .lock()
            .as_ref()
            .map(|run| run.ctx.in_flight())
            .unwrap_or(0)
    }
}

impl Drop for PairMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Why a connection ended
#[derive(Debug)]
enum SessionEnd {
    Transport(String),
    Closed,
    Rejected { code: i64, message: String },
    PongTimeout,
    Idle,
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEnd::Transport(e) => write!(f, "transport error: {e}"),
            SessionEnd::Closed => write!(f, "closed by server"),
            SessionEnd::Rejected { code, message } => write!(f, "subscription rejected ({code}): {message}"),
            SessionEnd::PongTimeout => write!(f, "no pong within liveness timeout"),
            SessionEnd::Idle => write!(f, "no inbound message within idle timeout"),
        }
    }
}

/// Connection loop for one run: session, then backoff and probe, forever,
/// until the run is deactivated or the task aborted.
async fn run_connection(ctx: Arc<RunContext>) {
    let mut backoff = ReconnectBackoff::from_config(&ctx.config);

    loop {
        if !ctx.is_active() {
            return;
        }
        ctx.set_state(ConnectionState::Connecting);

        let end = run_session(&ctx, &mut backoff).await;

        if !ctx.is_active() {
            return;
        }
        ctx.set_state(ConnectionState::Reconnecting);
        warn!(pair = %ctx.pair.short(), reason = %end, "stream session ended");

        if !wait_and_probe(&ctx, &mut backoff).await {
            return;
        }
    }
}

/// Sleep out the backoff, then probe. A failed probe grows the backoff
/// instead of attempting a doomed connection.
async fn wait_and_probe(ctx: &RunContext, backoff: &mut ReconnectBackoff) -> bool {
    let mut probe_failed = false;

    loop {
        let mut delay = backoff.next_delay();
        if probe_failed {
            delay = delay.max(ctx.config.probe_interval());
        }
        info!(pair = %ctx.pair.short(), backoff_ms = delay.as_millis() as u64, "reconnecting after backoff");
        sleep(delay).await;

        if !ctx.is_active() {
            return false;
        }

        match ctx.rpc.get_health().await {
            Ok(()) => return true,
            Err(e) => {
                warn!(pair = %ctx.pair.short(), error = %e, "reconnect probe failed");
                probe_failed = true;
            }
        }
    }
}

/// One websocket connection from open to termination.
/// The timer set lives and dies with it.
async fn run_session(ctx: &Arc<RunContext>, backoff: &mut ReconnectBackoff) -> SessionEnd {
    let config = &ctx.config;

    debug!(url = %config.ws_url, "connecting websocket");
    let ws = match tokio::time::timeout(config.rpc_timeout(), connect_async(config.ws_url.as_str())).await {
        Ok(Ok((ws, _))) => ws,
        Ok(Err(e)) => return SessionEnd::Transport(e.to_string()),
        Err(_) => return SessionEnd::Transport("connect timed out".to_string()),
    };
    let (mut write, mut read) = ws.split();

    let request = subscribe_request(
        &ctx.pair,
        CommitmentConfig {
            commitment: config.commitment,
        },
    );
    if let Err(e) = write.send(Message::Text(request.to_string())).await {
        return SessionEnd::Transport(e.to_string());
    }
    debug!(pair = %ctx.pair.short(), "subscribe request sent");

    let mut timers = SessionTimers::new(config, Instant::now());

    loop {
        tokio::select! {
            frame = read.next() => {
                let now = Instant::now();
                timers.message_received(now);

                match frame {
                    Some(Ok(Message::Text(text))) => match parse_message(&text) {
                        Ok(Inbound::Subscribed { subscription }) => {
                            info!(pair = %ctx.pair.short(), subscription, "subscribed to logs");
                            ctx.set_state(ConnectionState::Subscribed);
                            backoff.reset();
                            timers.start_heartbeat(now);
                        }
                        Ok(Inbound::Rejected { code, message }) => {
                            return SessionEnd::Rejected { code, message };
                        }
                        Ok(Inbound::Notification(notification)) => {
                            let signature = notification.signature.clone();
                            if dispatch(ctx, notification) == Dispatch::Admitted {
                                debug!(%signature, "notification admitted");
                            }
                        }
                        Ok(Inbound::Ignored) => {}
                        Err(e) => {
                            warn!(error = %e, "discarding malformed message");
                        }
                    },
                    Some(Ok(Message::Pong(_))) => timers.pong_received(),
                    // tungstenite answers pings itself while reading
                    Some(Ok(Message::Close(_))) | None => return SessionEnd::Closed,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return SessionEnd::Transport(e.to_string()),
                }
            }
            _ = sleep_until(timers.next_ping_at()), if timers.heartbeat_armed() => {
                if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                    return SessionEnd::Transport(e.to_string());
                }
                timers.ping_sent(Instant::now());
            }
            _ = sleep_until(timers.pong_deadline_at()), if timers.awaiting_pong() => {
                return SessionEnd::PongTimeout;
            }
            _ = sleep_until(timers.idle_deadline()) => {
                return SessionEnd::Idle;
            }
        }
    }
}

/// Heartbeat, liveness and idle-recycle deadlines for one connection
struct SessionTimers {
    ping_interval: Duration,
    pong_timeout: Duration,
    no_msg_timeout: Duration,
    next_ping: Option<Instant>,
    pong_deadline: Option<Instant>,
    idle_deadline: Instant,
}

impl SessionTimers {
    fn new(config: &StreamConfig, now: Instant) -> Self {
        Self {
            ping_interval: config.ping_interval(),
            pong_timeout: config.pong_timeout(),
            no_msg_timeout: config.no_msg_timeout(),
            next_ping: None,
            pong_deadline: None,
            idle_deadline: now + config.no_msg_timeout(),
        }
    }

    fn start_heartbeat(&mut self, now: Instant) {
        self.next_ping = Some(now + self.ping_interval);
    }

    fn message_received(&mut self, now: Instant) {
        self.idle_deadline = now + self.no_msg_timeout;
    }

    fn ping_sent(&mut self, now: Instant) {
        self.next_ping = Some(now + self.ping_interval);
        if self.pong_deadline.is_none() {
            self.pong_deadline = Some(now + self.pong_timeout);
        }
    }

    fn pong_received(&mut self) {
        self.pong_deadline = None;
    }

    fn heartbeat_armed(&self) -> bool {
        self.next_ping.is_some()
    }

    fn awaiting_pong(&self) -> bool {
        self.pong_deadline.is_some()
    }

    fn next_ping_at(&self) -> Instant {
        self.next_ping.unwrap_or_else(far_future)
    }

    fn pong_deadline_at(&self) -> Instant {
        self.pong_deadline.unwrap_or_else(far_future)
    }

    fn idle_deadline(&self) -> Instant {
        self.idle_deadline
    }
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86_400 * 365)
}
