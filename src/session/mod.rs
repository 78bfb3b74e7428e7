//! # Peripheral Session Module
//!
//! Connection lifecycle and telemetry/control session for one drone.
//!
//! This module handles:
//! - Driving the [`DroneRadio`] through scan, connect, discovery, streaming
//! - Routing telemetry notifications through the codec into a snapshot
//! - Serializing control mutations into coalesced single-writer frame writes
//! - Surfacing connection state and telemetry through watch channels
//!
//! All mutable session state lives inside one worker task; the
//! [`DroneSession`] handle only sends commands and reads watch channels, so
//! telemetry arrival and control input never race.

pub mod state;

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::config::LinkConfig;
use crate::error::{DroneLinkError, Result};
use crate::radio::{DroneRadio, PeripheralId, PeripheralInfo, RadioNotification};
use crate::w2st::decoder;
use crate::w2st::encoder::encode_control_frame;
use crate::w2st::protocol::{
    tick_newer, AhrsVariant, CharacteristicKind, ControlAxis, ControlFlag, ControlFrame,
    ControlState, Telemetry,
};

pub use state::{FirstDiscovered, LinkState, SelectPeripheral};

/// Commands the consumer handle sends to the worker.
#[derive(Debug)]
enum Command {
    SetEnableConnect(bool),
    SetAxis(ControlAxis, u8),
    SetFlag(ControlFlag, bool),
}

/// Consumer-facing handle to a drone session.
///
/// All methods are non-blocking: they enqueue work for the session worker
/// and return immediately. Completion is observed through the watch
/// channels.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use drone_link::config::LinkConfig;
/// use drone_link::radio::BleRadio;
/// use drone_link::session::DroneSession;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = LinkConfig::default();
/// let radio = Arc::new(BleRadio::open(&config.radio).await?);
/// let session = DroneSession::spawn(radio, config);
///
/// session.set_enable_connect(true);
///
/// let mut connected = session.watch_connected();
/// connected.changed().await?;
/// println!("connected: {}", *connected.borrow());
/// # Ok(())
/// # }
/// ```
pub struct DroneSession {
    commands: mpsc::UnboundedSender<Command>,
    telemetry_rx: watch::Receiver<Telemetry>,
    connected_rx: watch::Receiver<bool>,
    state_rx: watch::Receiver<LinkState>,
    worker: JoinHandle<()>,
}

impl DroneSession {
    /// Spawn a session worker with the stock first-discovered selection.
    pub fn spawn(radio: Arc<dyn DroneRadio>, config: LinkConfig) -> Self {
        Self::with_selector(radio, config, Box::new(FirstDiscovered))
    }

    /// Spawn a session worker with a custom peripheral-selection strategy.
    pub fn with_selector(
        radio: Arc<dyn DroneRadio>,
        config: LinkConfig,
        selector: Box<dyn SelectPeripheral>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (telemetry_tx, telemetry_rx) =
            watch::channel(Telemetry::new(config.telemetry.console_capacity_bytes));
        let (connected_tx, connected_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(LinkState::Idle);
        let (write_results_tx, write_results) = mpsc::unbounded_channel();
        let (disconnects_tx, disconnects) = mpsc::unbounded_channel();

        radio.watch_disconnects(disconnects_tx.clone());

        let ahrs_variant = config.ahrs_variant();
        let telemetry = telemetry_tx.borrow().clone();
        let worker = SessionWorker {
            control: ControlState::neutral(config.control.throttle_idle),
            radio,
            config,
            selector,
            ahrs_variant,
            state: LinkState::Idle,
            remembered: None,
            pending_frame: None,
            write_in_flight: false,
            telemetry,
            notifications: None,
            write_results,
            write_results_tx,
            disconnects,
            _disconnects_tx: disconnects_tx,
            telemetry_tx,
            connected_tx,
            state_tx,
        };

        let worker = tokio::spawn(worker.run(command_rx));

        Self {
            commands: command_tx,
            telemetry_rx,
            connected_rx,
            state_rx,
            worker,
        }
    }

    /// Request connection establishment (`true`) or teardown (`false`).
    ///
    /// Enabling while already streaming to the remembered peripheral is a
    /// no-op; enabling after a previous session reuses the remembered
    /// peripheral and skips scanning. Disabling is idempotent and cancels
    /// an in-flight connect attempt.
    pub fn set_enable_connect(&self, enabled: bool) {
        let _ = self.commands.send(Command::SetEnableConnect(enabled));
    }

    /// Set one control axis to a raw byte value.
    ///
    /// While streaming, every mutation is encoded and transmitted (with
    /// coalescing); while disconnected, the state is buffered only.
    pub fn set_axis(&self, axis: ControlAxis, value: u8) {
        let _ = self.commands.send(Command::SetAxis(axis, value));
    }

    /// Set one control flag.
    pub fn set_flag(&self, flag: ControlFlag, value: bool) {
        let _ = self.commands.send(Command::SetFlag(flag, value));
    }

    /// Clone of the current telemetry snapshot.
    pub fn telemetry(&self) -> Telemetry {
        self.telemetry_rx.borrow().clone()
    }

    /// Watch channel updated on every accepted telemetry notification.
    pub fn watch_telemetry(&self) -> watch::Receiver<Telemetry> {
        self.telemetry_rx.clone()
    }

    /// Watch channel holding the externally observed connection flag.
    ///
    /// The flag flips exactly once per transition; failures never re-send
    /// `false` when the flag is already `false`.
    pub fn watch_connected(&self) -> watch::Receiver<bool> {
        self.connected_rx.clone()
    }

    /// Watch channel holding the connection lifecycle state.
    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.state_rx.clone()
    }

    /// Tear the session down and wait for the worker to finish.
    pub async fn shutdown(self) {
        let DroneSession {
            commands, worker, ..
        } = self;
        drop(commands);
        let _ = worker.await;
    }
}

/// Receive from an optional notification channel, pending forever while no
/// subscription is active.
async fn recv_notification(
    notifications: &mut Option<mpsc::UnboundedReceiver<RadioNotification>>,
) -> Option<RadioNotification> {
    match notifications.as_mut() {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Single-writer owner of all session state.
struct SessionWorker {
    radio: Arc<dyn DroneRadio>,
    config: LinkConfig,
    selector: Box<dyn SelectPeripheral>,
    ahrs_variant: AhrsVariant,
    state: LinkState,
    remembered: Option<PeripheralInfo>,
    control: ControlState,
    pending_frame: Option<ControlFrame>,
    write_in_flight: bool,
    telemetry: Telemetry,
    notifications: Option<mpsc::UnboundedReceiver<RadioNotification>>,
    write_results: mpsc::UnboundedReceiver<Result<()>>,
    write_results_tx: mpsc::UnboundedSender<Result<()>>,
    disconnects: mpsc::UnboundedReceiver<PeripheralId>,
    // Keeps the disconnect channel open even when no radio holds a sender.
    _disconnects_tx: mpsc::UnboundedSender<PeripheralId>,
    telemetry_tx: watch::Sender<Telemetry>,
    connected_tx: watch::Sender<bool>,
    state_tx: watch::Sender<LinkState>,
}

impl SessionWorker {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd, &mut commands).await,
                    None => {
                        if self.state != LinkState::Idle {
                            self.disconnect_link().await;
                        }
                        debug!("session handle dropped; worker exiting");
                        break;
                    }
                },
                Some(result) = self.write_results.recv() => {
                    self.handle_write_result(result);
                }
                notification = recv_notification(&mut self.notifications) => {
                    match notification {
                        Some(notification) => self.handle_notification(notification),
                        None => self.notifications = None,
                    }
                }
                Some(id) = self.disconnects.recv() => {
                    self.handle_peer_disconnect(id);
                }
            }
        }
    }

    async fn handle_command(
        &mut self,
        command: Command,
        commands: &mut mpsc::UnboundedReceiver<Command>,
    ) {
        match command {
            Command::SetEnableConnect(true) => self.enable_connect(commands).await,
            Command::SetEnableConnect(false) => self.disconnect_link().await,
            Command::SetAxis(axis, value) => {
                self.control.set_axis(axis, value);
                self.queue_control_frame();
            }
            Command::SetFlag(flag, value) => {
                self.control.set_flag(flag, value);
                self.queue_control_frame();
            }
        }
    }

    /// Await a lifecycle step while keeping control mutations flowing and
    /// honoring a disconnect request as cancellation.
    ///
    /// Returns `None` when the attempt was cancelled.
    async fn await_cancellable<T>(
        &mut self,
        commands: &mut mpsc::UnboundedReceiver<Command>,
        fut: impl Future<Output = T>,
    ) -> Option<T> {
        tokio::pin!(fut);
        loop {
            tokio::select! {
                out = &mut fut => return Some(out),
                cmd = commands.recv() => match cmd {
                    None | Some(Command::SetEnableConnect(false)) => return None,
                    Some(Command::SetEnableConnect(true)) => {
                        debug!("connect already in progress");
                    }
                    Some(Command::SetAxis(axis, value)) => self.control.set_axis(axis, value),
                    Some(Command::SetFlag(flag, value)) => self.control.set_flag(flag, value),
                },
            }
        }
    }

    async fn enable_connect(&mut self, commands: &mut mpsc::UnboundedReceiver<Command>) {
        if self.state != LinkState::Idle {
            debug!(state = ?self.state, "connect request ignored; link is not idle");
            return;
        }

        // Stale disconnect events from a previous link must not kill the
        // new one.
        while self.disconnects.try_recv().is_ok() {}

        if self.remembered.is_none() {
            self.set_state(LinkState::Scanning);
            let radio = Arc::clone(&self.radio);
            let timeout = self.config.scan_timeout();
            let scan = async move { radio.scan(timeout).await };
            let candidates = match self.await_cancellable(commands, scan).await {
                None => return self.abort_attempt(None).await,
                Some(Err(error)) => return self.fail(error).await,
                Some(Ok(candidates)) => candidates,
            };

            let chosen = match self.selector.select(&candidates) {
                Some(info) => info.clone(),
                None => return self.fail(DroneLinkError::ScanTimeout).await,
            };
            info!(id = %chosen.id, name = %chosen.name, rssi = ?chosen.rssi, "selected peripheral");
            self.remembered = Some(chosen);
        } else {
            debug!("reusing remembered peripheral; skipping scan");
        }

        let Some(info) = self.remembered.clone() else {
            return;
        };

        self.set_state(LinkState::Connecting);
        let radio = Arc::clone(&self.radio);
        let id = info.id.clone();
        let connect_timeout = self.config.connect_timeout();
        let connect =
            async move { tokio::time::timeout(connect_timeout, radio.connect(&id)).await };
        match self.await_cancellable(commands, connect).await {
            None => return self.abort_attempt(Some(&info.id)).await,
            Some(Err(_elapsed)) => {
                let error = DroneLinkError::ConnectFailed(format!(
                    "timed out after {connect_timeout:?}"
                ));
                return self.fail_with_cleanup(error, &info.id).await;
            }
            Some(Ok(Err(error))) => return self.fail_with_cleanup(error, &info.id).await,
            Some(Ok(Ok(()))) => {}
        }

        self.set_state(LinkState::DiscoveringServices);
        let radio = Arc::clone(&self.radio);
        let id = info.id.clone();
        let discover = async move { radio.discover_characteristics(&id).await };
        let kinds = match self.await_cancellable(commands, discover).await {
            None => return self.abort_attempt(Some(&info.id)).await,
            Some(Err(error)) => return self.fail_with_cleanup(error, &info.id).await,
            Some(Ok(kinds)) => kinds,
        };

        if !kinds.contains(&CharacteristicKind::Control) {
            let error =
                DroneLinkError::ServiceDiscoveryFailed("control characteristic not found".into());
            return self.fail_with_cleanup(error, &info.id).await;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribed = false;
        for kind in kinds.iter().copied().filter(|kind| kind.is_notifying()) {
            if let Err(error) = self.radio.subscribe(&info.id, kind, tx.clone()).await {
                return self.fail_with_cleanup(error, &info.id).await;
            }
            subscribed = true;
        }
        if !subscribed {
            let error = DroneLinkError::SubscriptionFailed(
                "no telemetry characteristics present".into(),
            );
            return self.fail_with_cleanup(error, &info.id).await;
        }

        self.notifications = Some(rx);
        self.set_state(LinkState::Streaming);
        self.set_connected(true);
        info!(id = %info.id, "telemetry streaming");
    }

    async fn disconnect_link(&mut self) {
        if self.state == LinkState::Idle {
            debug!("disconnect requested while idle");
            return;
        }

        self.set_state(LinkState::Disconnecting);
        self.pending_frame = None;
        self.notifications = None;

        if let Some(info) = self.remembered.clone() {
            if let Err(error) = self.radio.disconnect(&info.id).await {
                warn!(id = %info.id, error = %error, "disconnect reported an error");
            }
        }

        // Our own teardown must not surface as an unsolicited disconnect.
        while self.disconnects.try_recv().is_ok() {}

        self.set_state(LinkState::Idle);
        self.set_connected(false);
        info!("link closed; telemetry snapshot frozen at last-known values");
    }

    fn handle_peer_disconnect(&mut self, id: PeripheralId) {
        let active = self
            .remembered
            .as_ref()
            .map(|info| info.id == id)
            .unwrap_or(false);
        if self.state == LinkState::Idle || !active {
            debug!(%id, "ignoring disconnect event for inactive peripheral");
            return;
        }

        error!(%id, error = %DroneLinkError::UnsolicitedDisconnect, "link lost");
        self.pending_frame = None;
        self.notifications = None;
        self.set_state(LinkState::Error);
        self.set_state(LinkState::Idle);
        self.set_connected(false);
    }

    fn handle_notification(&mut self, notification: RadioNotification) {
        let payload = notification.payload.as_ref();
        match notification.kind {
            CharacteristicKind::Arming => match decoder::decode_arming(payload) {
                Ok(record) => {
                    self.trace_tick(self.telemetry.arming.tick, record.tick, "arming");
                    self.telemetry.arming = record;
                }
                Err(error) => return self.report_decode_error(error),
            },
            CharacteristicKind::Environment => match decoder::decode_environment(payload) {
                Ok(record) => {
                    self.trace_tick(self.telemetry.environment.tick, record.tick, "environment");
                    self.telemetry.environment = record;
                }
                Err(error) => return self.report_decode_error(error),
            },
            CharacteristicKind::Ahrs => match decoder::decode_ahrs(payload, self.ahrs_variant) {
                Ok(record) => {
                    self.trace_tick(self.telemetry.ahrs.tick, record.tick, "ahrs");
                    self.telemetry.ahrs = record;
                }
                Err(error) => return self.report_decode_error(error),
            },
            CharacteristicKind::Stdout => {
                self.telemetry
                    .stdout
                    .append(decoder::decode_console(payload).as_bytes());
            }
            CharacteristicKind::Stderr => {
                self.telemetry
                    .stderr
                    .append(decoder::decode_console(payload).as_bytes());
            }
            CharacteristicKind::Control => {
                warn!("unexpected notification on the control characteristic");
                return;
            }
        }
        self.telemetry_tx.send_replace(self.telemetry.clone());
    }

    /// Report a malformed payload. The last good record stays in place.
    fn report_decode_error(&self, error: DroneLinkError) {
        warn!(error = %error, "dropped malformed telemetry payload");
    }

    fn trace_tick(&self, previous: u16, next: u16, stream: &str) {
        if !tick_newer(previous, next) {
            trace!(stream, previous, next, "telemetry tick regressed");
        }
    }

    /// Encode the current control state and transmit it, coalescing while a
    /// write is already in flight.
    fn queue_control_frame(&mut self) {
        if !self.state.is_streaming() {
            trace!("control mutation buffered while disconnected");
            return;
        }

        let frame = encode_control_frame(&self.control);
        if self.write_in_flight {
            // Replace any pending frame; never queue more than one.
            self.pending_frame = Some(frame);
            return;
        }
        self.spawn_write(frame);
    }

    fn spawn_write(&mut self, frame: ControlFrame) {
        let Some(info) = self.remembered.clone() else {
            return;
        };
        self.write_in_flight = true;

        let radio = Arc::clone(&self.radio);
        let results = self.write_results_tx.clone();
        tokio::spawn(async move {
            let result = radio
                .write(&info.id, CharacteristicKind::Control, &frame)
                .await;
            let _ = results.send(result);
        });
    }

    fn handle_write_result(&mut self, result: Result<()>) {
        self.write_in_flight = false;
        if let Err(error) = result {
            // No automatic retry; the next control mutation transmits again.
            warn!(error = %error, "control frame write failed");
        }

        if !self.state.is_streaming() {
            self.pending_frame = None;
            return;
        }
        if let Some(frame) = self.pending_frame.take() {
            self.spawn_write(frame);
        }
    }

    fn set_state(&mut self, state: LinkState) {
        if self.state == state {
            return;
        }
        debug!(from = ?self.state, to = ?state, "link state changed");
        self.state = state;
        self.state_tx.send_replace(state);
    }

    /// Flip the externally observed connection flag, notifying watchers only
    /// on an actual change so each transition is observed exactly once.
    fn set_connected(&mut self, connected: bool) {
        self.connected_tx.send_if_modified(|current| {
            if *current == connected {
                false
            } else {
                *current = connected;
                true
            }
        });
    }

    async fn fail(&mut self, error: DroneLinkError) {
        error!(error = %error, "connection attempt failed");
        self.set_state(LinkState::Error);
        self.set_state(LinkState::Idle);
        self.set_connected(false);
    }

    async fn fail_with_cleanup(&mut self, error: DroneLinkError, id: &PeripheralId) {
        if let Err(cleanup) = self.radio.disconnect(id).await {
            debug!(error = %cleanup, "cleanup disconnect failed");
        }
        self.fail(error).await;
    }

    async fn abort_attempt(&mut self, id: Option<&PeripheralId>) {
        debug!("connect attempt cancelled by disconnect request");
        if let Some(id) = id {
            let _ = self.radio.disconnect(id).await;
        }
        self.set_state(LinkState::Idle);
        self.set_connected(false);
    }
}
