//! Device adapter for one Channels app instance.
//!
//! Owns the connection state machine and the polling loop: fetches
//! `/api/status` on a fixed interval, diffs snapshots, publishes field
//! changes and connectivity transitions on the bus, and dispatches playback
//! commands. The poll task is the only writer of connection state and
//! snapshots; commands only read shared state.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::RwLock;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{DeviceEvent, SharedBus};
use crate::client::{ChannelsClient, DeviceAddress, DeviceApi, DEFAULT_PORT};
use crate::config::DeviceConfig;
use crate::error::{CommandError, ConfigError};
use crate::status::{diff, PlaybackSnapshot, PollOutcome};

/// Default polling interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Consecutive transient failures tolerated while connecting before the
/// device is declared unreachable. Keeps a single lost packet from flapping
/// the connection state.
pub const CONNECT_FAILURE_THRESHOLD: u32 = 3;

/// Connection lifecycle of the adapter. Owned exclusively by the adapter;
/// transitions happen only on the poll path and in configure/start/stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Which outage signal has already been published for the current fault
/// episode, so repeated failed polls do not storm the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    Unreachable,
    Protocol,
}

struct AdapterState {
    address: Option<DeviceAddress>,
    poll_interval: Duration,
    connection: ConnectionState,
    /// Last known snapshot, retained across poll failures
    snapshot: Option<PlaybackSnapshot>,
    /// Diff basis. Cleared on reconfigure and on entering Error so the next
    /// successful poll produces a full-refresh diff.
    previous: Option<PlaybackSnapshot>,
    consecutive_failures: u32,
    reported_fault: Option<Fault>,
    running: bool,
    /// Bumped on configure and stop. A poll captures the epoch before its
    /// fetch; an outcome whose epoch no longer matches is stale (the request
    /// was still in flight across a stop or reconfigure) and is discarded.
    epoch: u64,
}

impl Default for AdapterState {
    fn default() -> Self {
        Self {
            address: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            connection: ConnectionState::Disconnected,
            snapshot: None,
            previous: None,
            consecutive_failures: 0,
            reported_fault: None,
            running: false,
            epoch: 0,
        }
    }
}

/// Adapter for the Channels app.
///
/// One instance manages exactly one device and holds no global state, so
/// multiple devices can be bridged concurrently without interference.
pub struct ChannelsAdapter {
    api: Arc<dyn DeviceApi>,
    state: Arc<RwLock<AdapterState>>,
    bus: SharedBus,
    /// Wrapped in RwLock to allow creating a fresh token on restart
    shutdown: Arc<RwLock<CancellationToken>>,
}

impl ChannelsAdapter {
    pub fn new(bus: SharedBus) -> Self {
        Self::with_api(Arc::new(ChannelsClient::new()), bus)
    }

    /// Construct with a custom transport (used by tests).
    pub fn with_api(api: Arc<dyn DeviceApi>, bus: SharedBus) -> Self {
        Self {
            api,
            state: Arc::new(RwLock::new(AdapterState::default())),
            bus,
            shutdown: Arc::new(RwLock::new(CancellationToken::new())),
        }
    }

    /// Set or replace the device address.
    ///
    /// Resets the connection to `Disconnected` and clears both snapshots,
    /// so the next successful poll produces a full-refresh diff. A running
    /// poll loop picks up the new address on its next tick.
    pub async fn configure(
        &self,
        host: impl Into<String>,
        port: Option<u16>,
    ) -> Result<(), ConfigError> {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(ConfigError::MissingHost);
        }
        let port = port.unwrap_or(DEFAULT_PORT);
        if port == 0 {
            return Err(ConfigError::InvalidPort);
        }

        let mut state = self.state.write().await;
        info!(host, port, "configuring device address");
        state.address = Some(DeviceAddress::new(host, port));
        state.connection = ConnectionState::Disconnected;
        state.snapshot = None;
        state.previous = None;
        state.consecutive_failures = 0;
        state.reported_fault = None;
        state.epoch = state.epoch.wrapping_add(1);
        Ok(())
    }

    /// Set the poll interval. Takes effect on the next `start`.
    pub async fn set_poll_interval(&self, poll_interval: Duration) -> Result<(), ConfigError> {
        if poll_interval <= crate::client::REQUEST_TIMEOUT {
            return Err(ConfigError::PollIntervalTooShort(
                crate::client::REQUEST_TIMEOUT,
            ));
        }
        self.state.write().await.poll_interval = poll_interval;
        Ok(())
    }

    /// Apply a full device configuration (address + poll interval).
    pub async fn apply_config(&self, config: &DeviceConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.set_poll_interval(config.poll_interval()).await?;
        self.configure(config.host.clone(), Some(config.port)).await
    }

    pub async fn is_configured(&self) -> bool {
        self.state.read().await.address.is_some()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.state.read().await.connection
    }

    /// Point-in-time read of the last known snapshot.
    pub async fn current_snapshot(&self) -> Option<PlaybackSnapshot> {
        self.state.read().await.snapshot.clone()
    }

    /// Start the polling loop. Errors if no address is configured; calling
    /// it on a running adapter is a no-op.
    pub async fn start(&self) -> Result<(), ConfigError> {
        let poll_interval = {
            let mut state = self.state.write().await;
            if state.address.is_none() {
                return Err(ConfigError::NotConfigured);
            }
            if state.running {
                return Ok(());
            }
            state.running = true;
            state.connection = ConnectionState::Connecting;
            state.poll_interval
        };

        // Create fresh cancellation token for this run (previous token may
        // be cancelled)
        let shutdown = {
            let mut token = self.shutdown.write().await;
            *token = CancellationToken::new();
            token.clone()
        };

        let api = self.api.clone();
        let state = self.state.clone();
        let bus = self.bus.clone();

        tokio::spawn(async move {
            let mut ticker = interval(poll_interval);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("polling shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        // All diff events for this poll are published before
                        // the next tick is awaited
                        poll_once(api.as_ref(), &state, &bus).await;
                    }
                }
            }

            info!("polling stopped");
        });

        Ok(())
    }

    /// Stop polling. An in-flight request is bounded by the transport
    /// timeout and its outcome is discarded; no poll starts after this
    /// returns.
    pub async fn stop(&self) {
        self.shutdown.read().await.cancel();

        let mut state = self.state.write().await;
        state.running = false;
        state.connection = ConnectionState::Disconnected;
        state.consecutive_failures = 0;
        state.reported_fault = None;
        state.epoch = state.epoch.wrapping_add(1);
    }

    async fn invoke(&self, command: &str, params: Option<Value>) -> Result<(), CommandError> {
        let (address, connection) = {
            let state = self.state.read().await;
            (state.address.clone(), state.connection)
        };
        let address = address.ok_or(CommandError::NotConfigured)?;

        // No command queue: while the loop is not running the call would
        // only time out, so fail fast instead. In Error state the call is
        // still attempted since the device may accept commands even when
        // status polling fails.
        if connection == ConnectionState::Disconnected {
            return Err(CommandError::NotConnected);
        }

        debug!(command, %address, "dispatching command");
        self.api.send_command(&address, command, params).await?;
        Ok(())
    }

    /// Resume playback.
    pub async fn play(&self) -> Result<(), CommandError> {
        self.invoke("resume", None).await
    }

    pub async fn pause(&self) -> Result<(), CommandError> {
        self.invoke("pause", None).await
    }

    pub async fn play_pause(&self) -> Result<(), CommandError> {
        self.invoke("toggle_pause", None).await
    }

    pub async fn stop_playback(&self) -> Result<(), CommandError> {
        self.invoke("stop", None).await
    }

    pub async fn channel_up(&self) -> Result<(), CommandError> {
        self.invoke("channel_up", None).await
    }

    pub async fn channel_down(&self) -> Result<(), CommandError> {
        self.invoke("channel_down", None).await
    }

    /// Jump back to the last watched channel.
    pub async fn previous_channel(&self) -> Result<(), CommandError> {
        self.invoke("previous_channel", None).await
    }

    pub async fn seek_forward(&self) -> Result<(), CommandError> {
        self.invoke("seek_forward", None).await
    }

    pub async fn seek_backward(&self) -> Result<(), CommandError> {
        self.invoke("seek_backward", None).await
    }

    /// Skip forward to the next chapter mark.
    pub async fn skip_forward(&self) -> Result<(), CommandError> {
        self.invoke("skip_forward", None).await
    }

    /// Skip backward to the previous chapter mark.
    pub async fn skip_backward(&self) -> Result<(), CommandError> {
        self.invoke("skip_backward", None).await
    }

    pub async fn mute_toggle(&self) -> Result<(), CommandError> {
        self.invoke("toggle_mute", None).await
    }

    pub async fn toggle_closed_captions(&self) -> Result<(), CommandError> {
        self.invoke("toggle_cc", None).await
    }

    pub async fn toggle_record(&self) -> Result<(), CommandError> {
        self.invoke("toggle_record", None).await
    }

    pub async fn toggle_picture_in_picture(&self) -> Result<(), CommandError> {
        self.invoke("toggle_pip", None).await
    }

    /// Seek to an absolute position. The vendor API only takes a relative
    /// offset, so this converts using the last known playback position; the
    /// next poll reconciles the actual position.
    pub async fn seek(&self, position_secs: f64) -> Result<(), CommandError> {
        let current = self
            .current_snapshot()
            .await
            .map(|s| s.position_secs)
            .unwrap_or(0.0);
        let delta = (position_secs - current).round() as i64;
        if delta == 0 {
            return Ok(());
        }
        self.invoke(&format!("seek/{delta}"), None).await
    }

    /// Tune to a specific channel number.
    pub async fn play_channel(&self, number: &str) -> Result<(), CommandError> {
        self.invoke(&format!("play/channel/{number}"), None).await
    }

    /// Play a specific recording by ID.
    pub async fn play_recording(&self, recording_id: &str) -> Result<(), CommandError> {
        self.invoke(&format!("play/recording/{recording_id}"), None)
            .await
    }

    /// Navigate to a named section of the app.
    pub async fn navigate(&self, section: &str) -> Result<(), CommandError> {
        self.invoke(&format!("navigate/{section}"), None).await
    }

    /// Display an in-app notification on the device.
    pub async fn notify(&self, title: &str, message: &str) -> Result<(), CommandError> {
        self.invoke("notify", Some(json!({ "title": title, "message": message })))
            .await
    }
}

/// One poll cycle: fetch, classify, apply. Shared between the spawned loop
/// and the state machine tests.
async fn poll_once(api: &dyn DeviceApi, state: &Arc<RwLock<AdapterState>>, bus: &SharedBus) {
    let (address, epoch) = {
        let mut state = state.write().await;
        match state.address.clone() {
            Some(address) => {
                // A reconfigure drops back to Disconnected; the next tick
                // re-enters the connect path here
                if state.connection == ConnectionState::Disconnected {
                    state.connection = ConnectionState::Connecting;
                }
                (address, state.epoch)
            }
            None => return,
        }
    };

    let outcome = PollOutcome::from_fetch(api.fetch_status(&address).await);
    apply_outcome(state, bus, &address, epoch, outcome).await;
}

/// A stop or reconfigure while the fetch was in flight invalidates the
/// cycle: its outcome belongs to the old epoch and must not touch state or
/// reach the bus.
fn is_stale(state: &AdapterState, epoch: u64) -> bool {
    state.epoch != epoch
}

async fn apply_outcome(
    state: &Arc<RwLock<AdapterState>>,
    bus: &SharedBus,
    address: &DeviceAddress,
    epoch: u64,
    outcome: PollOutcome,
) {
    match outcome {
        PollOutcome::Success(snapshot) => {
            let (was_error, changes) = {
                let mut state = state.write().await;
                if is_stale(&state, epoch) {
                    debug!(%address, "discarding stale poll outcome");
                    return;
                }
                let was_error = state.connection == ConnectionState::Error;
                let changes = diff(state.previous.as_ref(), &snapshot);
                state.connection = ConnectionState::Connected;
                state.consecutive_failures = 0;
                state.reported_fault = None;
                state.previous = Some(snapshot.clone());
                state.snapshot = Some(snapshot);
                (was_error, changes)
            };

            if was_error {
                info!(%address, "device reachable again");
                bus.publish(DeviceEvent::DeviceReachable {
                    host: address.host.clone(),
                });
            }
            for change in changes {
                bus.publish(DeviceEvent::FieldChanged(change));
            }
        }
        PollOutcome::Transient(err) => {
            let announce = {
                let mut state = state.write().await;
                if is_stale(&state, epoch) {
                    debug!(%address, "discarding stale poll outcome");
                    return;
                }
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                let declare_unreachable = match state.connection {
                    ConnectionState::Connected | ConnectionState::Error => true,
                    ConnectionState::Connecting => {
                        state.consecutive_failures >= CONNECT_FAILURE_THRESHOLD
                    }
                    // Not polling; nothing to declare
                    ConnectionState::Disconnected => false,
                };
                if declare_unreachable {
                    enter_error(&mut state, Fault::Unreachable)
                } else {
                    debug!(%address, failures = state.consecutive_failures, error = %err,
                        "transient poll failure, retrying");
                    false
                }
            };

            if announce {
                warn!(%address, error = %err, "device unreachable");
                bus.publish(DeviceEvent::DeviceUnreachable {
                    host: address.host.clone(),
                });
            }
        }
        PollOutcome::Fatal(err) => {
            let announce = {
                let mut state = state.write().await;
                if is_stale(&state, epoch) {
                    debug!(%address, "discarding stale poll outcome");
                    return;
                }
                enter_error(&mut state, Fault::Protocol)
            };

            if announce {
                warn!(%address, error = %err, "protocol mismatch, polling continues");
                bus.publish(DeviceEvent::ProtocolMismatch {
                    host: address.host.clone(),
                    detail: err.to_string(),
                });
            }
        }
    }
}

/// Move to `Error`, mark the diff basis stale, and return whether this
/// fault kind still needs announcing on the bus.
fn enter_error(state: &mut AdapterState, fault: Fault) -> bool {
    state.connection = ConnectionState::Error;
    state.previous = None;
    if state.reported_fault == Some(fault) {
        return false;
    }
    state.reported_fault = Some(fault);
    true
}
