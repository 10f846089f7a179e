//! Wire schemas for streamed events and gateway command payloads.
//!
//! Field names follow the node's JSON output, which uses PascalCase.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// One line of the event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Topic and encoded payload
    pub result: EventResult,
}

/// Body of an [`Event`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventResult {
    /// Topic tag selecting the payload schema
    pub topic: String,
    /// JSON-encoded result wrapper
    pub val: String,
}

/// Closed set of topics the dashboard understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topic {
    /// Node status snapshot
    Status,
    /// Confirmed balance
    Balance,
    /// Next settlement time
    Settlement,
    /// Current earnings cycle
    BalanceCycle,
    /// Connected peer count
    Peers,
    /// Node storage settings
    Settings,
    /// Anything else; ignored
    Unrecognized(String),
}

impl Topic {
    /// Map a wire tag to a topic.
    pub fn from_wire(tag: &str) -> Self {
        match tag {
            "Status" => Topic::Status,
            "Balance" => Topic::Balance,
            "Settlement" => Topic::Settlement,
            "BalanceCycle" => Topic::BalanceCycle,
            "Peers" => Topic::Peers,
            "Settings" => Topic::Settings,
            other => Topic::Unrecognized(other.to_string()),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Status => f.write_str("Status"),
            Topic::Balance => f.write_str("Balance"),
            Topic::Settlement => f.write_str("Settlement"),
            Topic::BalanceCycle => f.write_str("BalanceCycle"),
            Topic::Peers => f.write_str("Peers"),
            Topic::Settings => f.write_str("Settings"),
            Topic::Unrecognized(tag) => write!(f, "{tag}"),
        }
    }
}

/// Node status, delivered on the `Status` topic and by `status -j`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Status {
    /// Task manager entries
    pub task_manager_status: Vec<Task>,
    /// Server name → detail; empty values mean the server is not running
    pub server_details: BTreeMap<String, Value>,
    /// Uptime over the node's lifetime
    pub total_uptime_percentage: UptimePercentage,
    /// Daemon session start, unix seconds
    pub session_start_time: i64,
    /// Whether a user is logged in
    pub logged_in: bool,
    /// Whether the daemon is running
    pub daemon_running: bool,
}

/// Task manager entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Task {
    /// Task name
    pub name: String,
    /// Task status
    pub status: String,
    /// Free-form extra status
    pub additional_status: String,
}

/// Uptime percentage record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct UptimePercentage {
    /// Percentage in 0..=100
    pub percentage: f64,
}

/// Next settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Settlement {
    /// Settlement time
    pub date: DateTime<FixedOffset>,
}

/// Earnings cycle counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct BalanceCycle {
    /// Amount owed by the node
    pub owe: f64,
    /// Amount owed to the node
    pub owned: f64,
    /// Bytes downloaded this cycle
    pub bytes_downloaded: f64,
    /// Bytes served this cycle
    pub bytes_served: f64,
}

/// Node settings, delivered on the `Settings` topic and by `settings -g -j`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Settings {
    /// Device name
    pub name: String,
    /// Storage quota in GB
    pub max_storage: f64,
    /// Storage used in GB
    pub used_storage: f64,
    /// Free space on the storage drive in bytes
    pub free_disk_space: f64,
    /// Whether the node may expose a websocket endpoint
    #[serde(rename = "IsDNSEligible")]
    pub is_dns_eligible: bool,
}

/// Output of `id -j`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerIdentity {
    /// Libp2p peer id
    #[serde(rename = "PeerID")]
    pub peer_id: String,
    /// Listen addresses
    #[serde(rename = "Addresses")]
    pub addresses: Vec<String>,
}

/// Output of `earning -g -j`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct NetEarnings {
    /// Devices registered to the account
    pub devices: Vec<Device>,
    /// Aggregate earnings, passed through untouched
    pub device_total: Value,
}

/// Device entry in [`NetEarnings`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Device {
    /// Peer id of the device
    #[serde(rename = "PeerId")]
    pub peer_id: String,
    /// Device name
    #[serde(rename = "Name")]
    pub name: String,
}

/// Output of `profile -j`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Profile {
    /// Account email
    pub email: String,
    /// Account role
    pub role: String,
}

/// Output of `stat bandwidth -j`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Bandwidth {
    /// Incoming bytes
    pub incoming: f64,
    /// Outgoing bytes
    pub outgoing: f64,
}

/// Output of `version -j`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Version {
    /// Application version string
    pub app_version: String,
}

/// Output of `config show -j`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct NodeConfig {
    /// Swarm listen port
    pub swarm_port: String,
    /// Websocket listen port
    pub websocket_port: String,
}
