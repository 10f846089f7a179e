//! Topic projections.
//!
//! Each topic payload is turned into a list of page writes plus the side
//! effects the caller has to run (session bookkeeping, follow-up commands).
//! Projections never touch the page themselves.

use chrono::Local;

use super::codec::{decode_payload, payload_text};
use super::error::CodecResult;
use super::topics::{BalanceCycle, Settings, Settlement, Status, Topic};
use super::view::ViewOp;
use crate::util::format::{
    CURRENCY, format_gigabytes, format_percentage, format_settlement, humanize_bytes,
    truncate_balance,
};

/// Task name that is never listed.
pub const IDLE_TASK: &str = "Idle";

const TASK_NAMES: &str = "taskmanagerstatusname";
const TASK_STATUSES: &str = "taskmanagerstatusstatus";
const TASK_DETAILS: &str = "taskmanagerstatusAS";

/// Follow-up work requested by a projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Record the daemon session start and run the restart banner check
    SessionStarted(i64),
    /// Refresh the full peer list
    RefreshPeers,
}

/// Output of a projection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Projection {
    /// Page writes, in order
    pub ops: Vec<ViewOp>,
    /// Effects to run after the writes
    pub effects: Vec<Effect>,
}

impl Projection {
    fn with_ops(ops: Vec<ViewOp>) -> Self {
        Self {
            ops,
            effects: Vec::new(),
        }
    }
}

/// Project a decoded payload for `topic`.
///
/// Returns `Ok(None)` for unrecognized topics.
pub fn project(topic: &Topic, payload: &[u8]) -> CodecResult<Option<Projection>> {
    let projection = match topic {
        Topic::Status => status(&decode_payload(payload)?),
        Topic::Balance => balance(payload),
        Topic::Settlement => settlement(&decode_payload(payload)?),
        Topic::BalanceCycle => balance_cycle(&decode_payload(payload)?),
        Topic::Peers => peers(payload),
        Topic::Settings => settings(&decode_payload(payload)?),
        Topic::Unrecognized(_) => return Ok(None),
    };
    Ok(Some(projection))
}

/// Task table, server details, login/daemon flags and uptime.
pub fn status(status: &Status) -> Projection {
    let mut ops = vec![
        ViewOp::inner_html(TASK_NAMES, ""),
        ViewOp::inner_html(TASK_STATUSES, ""),
        ViewOp::inner_html(TASK_DETAILS, ""),
    ];

    for task in status
        .task_manager_status
        .iter()
        .filter(|task| task.name != IDLE_TASK)
    {
        ops.push(ViewOp::append_html(TASK_NAMES, "div", &task.name));
        ops.push(ViewOp::append_html(TASK_STATUSES, "div", &task.status));
        let detail = if task.additional_status.is_empty() {
            "&#8212;"
        } else {
            task.additional_status.as_str()
        };
        ops.push(ViewOp::append_html(TASK_DETAILS, "div", detail));
    }

    for (server, detail) in &status.server_details {
        let text = match detail {
            serde_json::Value::String(text) if text.is_empty() => "Not Running".to_string(),
            serde_json::Value::String(text) => text.clone(),
            serde_json::Value::Null => "Not Running".to_string(),
            other => other.to_string(),
        };
        ops.push(ViewOp::inner_html(server, text));
    }

    let logged_in = if status.logged_in { "LoggedIn" } else { "LoggedOut" };
    let daemon = if status.daemon_running { "ONLINE" } else { "OFFLINE" };
    ops.push(ViewOp::inner_html("LoggedIn", logged_in));
    ops.push(ViewOp::inner_html("DaemonRunning", daemon));
    ops.push(ViewOp::inner_html(
        "percentageNumber",
        format_percentage(status.total_uptime_percentage.percentage),
    ));

    Projection {
        ops,
        effects: vec![Effect::SessionStarted(status.session_start_time)],
    }
}

/// Confirmed balance, truncated to four decimals.
pub fn balance(payload: &[u8]) -> Projection {
    let amount = truncate_balance(&payload_text(payload));
    Projection::with_ops(vec![ViewOp::inner_html(
        "confirmedBalance",
        format!("{amount} {CURRENCY}"),
    )])
}

/// Next distribution time in the local timezone.
pub fn settlement(settlement: &Settlement) -> Projection {
    Projection::with_ops(vec![ViewOp::inner_html(
        "NextDistribution",
        format_settlement(&settlement.date, &Local),
    )])
}

/// Pending balance and cycle traffic.
pub fn balance_cycle(cycle: &BalanceCycle) -> Projection {
    Projection::with_ops(vec![
        ViewOp::inner_html(
            "Pending",
            format!("{:.6} {CURRENCY}", cycle.owned - cycle.owe),
        ),
        ViewOp::inner_html("CycleDownloaded", humanize_bytes(cycle.bytes_downloaded)),
        ViewOp::inner_html("CycleServed", humanize_bytes(cycle.bytes_served)),
    ])
}

/// Peer count; asks for the full list to be refreshed.
pub fn peers(payload: &[u8]) -> Projection {
    Projection {
        ops: vec![ViewOp::inner_html("PeersData", payload_text(payload))],
        effects: vec![Effect::RefreshPeers],
    }
}

/// Storage quota and usage.
pub fn settings(settings: &Settings) -> Projection {
    Projection::with_ops(vec![
        ViewOp::inner_html("MaxStorage", format_gigabytes(settings.max_storage)),
        ViewOp::inner_html("UsedStorage", format_gigabytes(settings.used_storage)),
    ])
}
