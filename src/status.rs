//! Typed playback state for the Channels app plus snapshot diffing.
//!
//! The raw `/api/status` payload is validated into a `PlaybackSnapshot`;
//! anything the parser does not recognize is a protocol failure, not a
//! transient one. Diffing two snapshots is a pure function used by the
//! adapter to decide what to publish.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ClientError;

/// Playback state reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackStatus {
    Playing,
    Paused,
    Stopped,
}

impl PlaybackStatus {
    fn from_api(s: &str) -> Option<Self> {
        match s {
            "playing" => Some(Self::Playing),
            "paused" => Some(Self::Paused),
            "stopped" => Some(Self::Stopped),
            _ => None,
        }
    }
}

impl std::fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Playing => write!(f, "playing"),
            Self::Paused => write!(f, "paused"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Last successfully observed device state.
///
/// Replaced atomically on every successful poll; partial field updates are
/// never observable outside the adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSnapshot {
    pub status: PlaybackStatus,
    pub title: Option<String>,
    pub episode_title: Option<String>,
    pub artwork_url: Option<String>,
    pub position_secs: f64,
    /// 0 means unknown.
    pub duration_secs: f64,
    pub muted: bool,
    pub channel_number: Option<String>,
    pub channel_name: Option<String>,
    pub captured_at: DateTime<Utc>,
}

impl PlaybackSnapshot {
    /// Validating parse of a raw `/api/status` payload.
    ///
    /// Field mapping follows the app's API: `playback_time` for position,
    /// `now_playing` for title/episode/duration, artwork from
    /// `now_playing.image_url` then `thumb_url` then `channel.image_url`.
    pub fn from_status(raw: &Value) -> Result<Self, ClientError> {
        let obj = raw
            .as_object()
            .ok_or_else(|| ClientError::Malformed("status payload is not an object".into()))?;

        let status = obj
            .get("status")
            .and_then(Value::as_str)
            .ok_or_else(|| ClientError::Malformed("status field missing or not a string".into()))?;
        let status = PlaybackStatus::from_api(status)
            .ok_or_else(|| ClientError::Malformed(format!("unrecognized status {status:?}")))?;

        let now_playing = obj.get("now_playing").filter(|v| v.is_object());
        let channel = obj.get("channel").filter(|v| v.is_object());

        let title = now_playing
            .and_then(|np| np.get("title"))
            .and_then(Value::as_str)
            .map(str::to_string)
            // Live TV without program metadata: show the channel name
            .or_else(|| opt_string(channel, "name"));

        let episode_title = now_playing
            .and_then(|np| np.get("episode_title"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let artwork_url = now_playing
            .and_then(|np| np.get("image_url"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                now_playing
                    .and_then(|np| np.get("thumb_url"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .or_else(|| opt_string(channel, "image_url"));

        let duration_secs = now_playing
            .and_then(|np| np.get("duration"))
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
            .max(0.0);

        let mut position_secs = obj
            .get("playback_time")
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
            .max(0.0);
        if duration_secs > 0.0 {
            position_secs = position_secs.min(duration_secs);
        }

        // Channel numbers arrive as strings or bare numbers depending on
        // the app version
        let channel_number = channel.and_then(|c| c.get("number")).and_then(|v| {
            v.as_str()
                .map(str::to_string)
                .or_else(|| v.as_f64().map(|n| n.to_string()))
        });

        Ok(Self {
            status,
            title,
            episode_title,
            artwork_url,
            position_secs,
            duration_secs,
            muted: obj.get("muted").and_then(Value::as_bool).unwrap_or(false),
            channel_number,
            channel_name: opt_string(channel, "name"),
            captured_at: Utc::now(),
        })
    }
}

fn opt_string(obj: Option<&Value>, key: &str) -> Option<String> {
    obj.and_then(|o| o.get(key))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Snapshot fields the diff can report on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotField {
    Status,
    Title,
    EpisodeTitle,
    ArtworkUrl,
    Position,
    Duration,
    Muted,
    ChannelNumber,
    ChannelName,
}

/// One field-level change between two snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: SnapshotField,
    pub old: Option<Value>,
    pub new: Option<Value>,
    pub at: DateTime<Utc>,
}

fn field_values(s: &PlaybackSnapshot) -> [(SnapshotField, Option<Value>); 9] {
    [
        (SnapshotField::Status, Some(json!(s.status.to_string()))),
        (SnapshotField::Title, s.title.clone().map(Value::String)),
        (
            SnapshotField::EpisodeTitle,
            s.episode_title.clone().map(Value::String),
        ),
        (
            SnapshotField::ArtworkUrl,
            s.artwork_url.clone().map(Value::String),
        ),
        (SnapshotField::Position, Some(json!(s.position_secs))),
        (
            SnapshotField::Duration,
            // Unknown durations stay unreported rather than flapping on 0
            (s.duration_secs > 0.0).then(|| json!(s.duration_secs)),
        ),
        (SnapshotField::Muted, Some(json!(s.muted))),
        (
            SnapshotField::ChannelNumber,
            s.channel_number.clone().map(Value::String),
        ),
        (
            SnapshotField::ChannelName,
            s.channel_name.clone().map(Value::String),
        ),
    ]
}

/// Field-level changes between `previous` and `current`, in fixed field
/// order. With no previous snapshot, every populated field is reported.
pub fn diff(previous: Option<&PlaybackSnapshot>, current: &PlaybackSnapshot) -> Vec<FieldChange> {
    let at = current.captured_at;
    let old_values = previous.map(field_values);

    field_values(current)
        .into_iter()
        .enumerate()
        .filter_map(|(i, (field, new))| {
            let old = old_values.as_ref().and_then(|values| values[i].1.clone());
            if old == new {
                None
            } else {
                Some(FieldChange { field, old, new, at })
            }
        })
        .collect()
}

/// Result of one poll cycle, consumed immediately by the adapter.
#[derive(Debug)]
pub enum PollOutcome {
    Success(PlaybackSnapshot),
    Transient(ClientError),
    Fatal(ClientError),
}

impl PollOutcome {
    /// Classify one status fetch: network-level failures split on
    /// `ClientError::is_transient`, and a payload that fails the snapshot
    /// parse is fatal even though the HTTP call succeeded.
    pub fn from_fetch(result: Result<Value, ClientError>) -> Self {
        match result {
            Ok(raw) => match PlaybackSnapshot::from_status(&raw) {
                Ok(snapshot) => Self::Success(snapshot),
                Err(err) => Self::Fatal(err),
            },
            Err(err) if err.is_transient() => Self::Transient(err),
            Err(err) => Self::Fatal(err),
        }
    }
}
