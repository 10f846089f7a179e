//! Daemon session clock and restart-banner check.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::time::Duration;

use super::view::{DAEMON_STARTED_AT, FlagStore, REFRESH_STATE, ViewAttachment};

/// `RefreshState` value written after a port change, until the daemon restarts.
pub const NOT_REFRESHED: &str = "Not Refreshed";
/// `RefreshState` value once the restart has been observed.
pub const REFRESHED: &str = "Refreshed";

const BANNER: &str = "RestartBanner";

/// The daemon's session start, shared between the event stream and actions.
///
/// Only the Status topic handler and the Status query write it, and every
/// write replaces the whole value.
#[derive(Debug, Default)]
pub struct SessionClock {
    started_at: RwLock<Option<i64>>,
}

impl SessionClock {
    /// Clock with no session observed yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Last observed session start in unix seconds.
    pub fn started_at(&self) -> Option<i64> {
        *self.started_at.read()
    }

    pub(crate) fn record(&self, started_at: i64) {
        *self.started_at.write() = Some(started_at);
    }

    /// Time elapsed between the session start and `now`, rounded to seconds.
    ///
    /// `None` until a non-zero start has been observed.
    pub fn uptime_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        let started = self.started_at().filter(|start| *start != 0)?;
        let elapsed = now.timestamp() - started;
        Some(Duration::from_secs(elapsed.max(0) as u64))
    }
}

/// What the restart banner check decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BannerDecision {
    /// A port change is pending and the daemon has not restarted yet
    Show,
    /// The daemon restarted since the port change
    Hide,
    /// Nothing pending; just remember the start time
    Record,
}

/// Decide the banner state from the persisted flags and the new start time.
pub fn evaluate_banner(
    stored_start: Option<&str>,
    refresh_state: Option<&str>,
    started_at: i64,
) -> BannerDecision {
    if refresh_state != Some(NOT_REFRESHED) {
        return BannerDecision::Record;
    }
    if stored_start == Some(started_at.to_string().as_str()) {
        BannerDecision::Show
    } else {
        BannerDecision::Hide
    }
}

/// Run the restart banner check against the persisted flags.
pub async fn check_banner(
    flags: &dyn FlagStore,
    view: &ViewAttachment,
    started_at: i64,
) -> BannerDecision {
    let stored_start = flags.get(DAEMON_STARTED_AT);
    let refresh_state = flags.get(REFRESH_STATE);
    tracing::debug!(?stored_start, ?refresh_state, started_at, "checking restart banner");

    let decision = evaluate_banner(stored_start.as_deref(), refresh_state.as_deref(), started_at);
    match decision {
        BannerDecision::Show => {
            view.set_display(BANNER, "style", "display: block;").await;
        }
        BannerDecision::Hide => {
            view.set_display(BANNER, "style", "display: none;").await;
            remember_start(flags, started_at);
        }
        BannerDecision::Record => remember_start(flags, started_at),
    }
    decision
}

fn remember_start(flags: &dyn FlagStore, started_at: i64) {
    flags.set(DAEMON_STARTED_AT, &started_at.to_string());
    flags.set(REFRESH_STATE, REFRESHED);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::ViewConfig;
    use crate::bridge::view::{MemoryFlagStore, MemoryPage};
    use chrono::TimeZone;
    use std::sync::Arc;

    #[test]
    fn uptime_needs_a_session() {
        let clock = SessionClock::new();
        let now = Utc.timestamp_opt(1_700_000_100, 0).unwrap();
        assert_eq!(clock.uptime_at(now), None);

        clock.record(0);
        assert_eq!(clock.uptime_at(now), None);

        clock.record(1_700_000_000);
        assert_eq!(clock.uptime_at(now), Some(Duration::from_secs(100)));
    }

    #[test]
    fn banner_decisions() {
        assert_eq!(evaluate_banner(None, None, 10), BannerDecision::Record);
        assert_eq!(
            evaluate_banner(Some("10"), Some(REFRESHED), 10),
            BannerDecision::Record
        );
        assert_eq!(
            evaluate_banner(Some("10"), Some(NOT_REFRESHED), 10),
            BannerDecision::Show
        );
        assert_eq!(
            evaluate_banner(Some("10"), Some(NOT_REFRESHED), 11),
            BannerDecision::Hide
        );
    }

    #[tokio::test]
    async fn restart_hides_banner_and_resets_flags() {
        let page = Arc::new(MemoryPage::auto_mounted());
        let view = ViewAttachment::new(page.clone(), &ViewConfig::default());
        let flags = MemoryFlagStore::new();
        flags.set(DAEMON_STARTED_AT, "100");
        flags.set(REFRESH_STATE, NOT_REFRESHED);

        assert_eq!(check_banner(&flags, &view, 100).await, BannerDecision::Show);
        assert_eq!(page.value(BANNER, "style").as_deref(), Some("display: block;"));
        assert_eq!(flags.get(REFRESH_STATE).as_deref(), Some(NOT_REFRESHED));

        assert_eq!(check_banner(&flags, &view, 200).await, BannerDecision::Hide);
        assert_eq!(page.value(BANNER, "style").as_deref(), Some("display: none;"));
        assert_eq!(flags.get(DAEMON_STARTED_AT).as_deref(), Some("200"));
        assert_eq!(flags.get(REFRESH_STATE).as_deref(), Some(REFRESHED));
    }
}
