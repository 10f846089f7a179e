//! Dashboard actions.
//!
//! [`Dashboard`] owns everything a user action or an event needs: the gateway
//! client, the view, the persisted flags, the session clock and the node
//! settings learned from the last settings query. Actions are triggered
//! through [`Dashboard::trigger`], which goes through the single-flight
//! dispatcher.

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::BridgeConfig;
use super::codec::{Command, decode_payload, decode_result_wrapper, payload_text};
use super::dispatch::ActionDispatcher;
use super::error::{ActionError, ActionResult, RpcError, TransportError};
use super::gateway::GatewayClient;
use super::projection::{Effect, Projection};
use super::session::{NOT_REFRESHED, SessionClock, check_banner};
use super::topics::{Bandwidth, NetEarnings, NodeConfig, PeerIdentity, Profile, Settings, Status, Version};
use super::view::{FlagStore, Page, REFRESH_STATE, ViewAttachment};
use crate::util::format::{format_uptime, humanize_bytes};

/// Lowest port accepted for swarm/websocket listeners.
pub const MIN_PORT: u16 = 1025;
/// Highest port accepted for swarm/websocket listeners.
pub const MAX_PORT: u16 = 49150;

const RED: &str = "color: red;";
const GREEN: &str = "color: #32CD32;";
const GREY: &str = "color: rgba(219,219,219,1);";
const ORANGE: &str = "color: rgba(244,105,50,1);";

/// Actions the dashboard can trigger.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Peer id and listen addresses
    PeerIdentity,
    /// Full list of connected peers
    RefreshPeers,
    /// Device drop-down for the earnings chart
    EarningDevices,
    /// Storage directory
    StorageLocation,
    /// Account email and role
    Profile,
    /// Lifetime bandwidth
    Bandwidth,
    /// Elapsed time since the daemon session started
    Uptime,
    /// Application version
    Version,
    /// Storage settings and slider bounds
    Settings,
    /// Login state and session start
    Status,
    /// Listener ports
    Config,
    /// Change the swarm port to the value in the input field
    SetSwarmPort,
    /// Change the websocket port to the value in the input field
    SetWebsocketPort,
    /// Check whether the swarm port is forwarded
    VerifyPortForward,
    /// Apply the storage slider value and save settings
    ModifyStorage,
}

impl Action {
    /// Stable name, used as the single-flight key and in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Action::PeerIdentity => "GetID",
            Action::RefreshPeers => "GetPeers",
            Action::EarningDevices => "SetEarningDropDown",
            Action::StorageLocation => "GetStorageLocation",
            Action::Profile => "GetProfile",
            Action::Bandwidth => "GetBandwidth",
            Action::Uptime => "GetUptime",
            Action::Version => "GetVersion",
            Action::Settings => "GetSettings",
            Action::Status => "GetStatus",
            Action::Config => "GetConfig",
            Action::SetSwarmPort => "SetSwrmPortNumber",
            Action::SetWebsocketPort => "SetWebsocketPortNumber",
            Action::VerifyPortForward => "VerifyPort",
            Action::ModifyStorage => "ModifyStorageSize",
        }
    }
}

/// Why a port was rejected before reaching the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortRejection(pub String);

/// Validate a port typed by the user.
pub fn check_port(port: &str) -> Result<u16, PortRejection> {
    if port.is_empty() {
        return Err(PortRejection("Enter A Valid Port Number".to_string()));
    }
    let Ok(value) = port.parse::<i64>() else {
        return Err(PortRejection(format!("Port {port} is Not a Number")));
    };
    if value < i64::from(MIN_PORT) || value > i64::from(MAX_PORT) {
        return Err(PortRejection(format!("Port {port} is Unavailable")));
    }
    Ok(value as u16)
}

#[derive(Debug, Clone, Copy, Default)]
struct NodeSettings {
    dns_eligible: bool,
    drive_free_gb: f64,
}

#[derive(Clone, Copy)]
enum PortKind {
    Swarm,
    Websocket,
}

impl PortKind {
    fn config_key(self) -> &'static str {
        match self {
            PortKind::Swarm => "SwarmPort",
            PortKind::Websocket => "WebsocketPort",
        }
    }

    fn input(self) -> &'static str {
        match self {
            PortKind::Swarm => "SwrmPortNumber",
            PortKind::Websocket => "WebSocketPortNumber",
        }
    }

    fn status_target(self) -> &'static str {
        match self {
            PortKind::Swarm => "SwrmPortStatus",
            PortKind::Websocket => "WebsocketPortStatus",
        }
    }

    fn label(self) -> &'static str {
        match self {
            PortKind::Swarm => "SwrmPort",
            PortKind::Websocket => "WebsocketPort",
        }
    }

    fn purpose(self) -> &'static str {
        match self {
            PortKind::Swarm => Action::SetSwarmPort.name(),
            PortKind::Websocket => Action::SetWebsocketPort.name(),
        }
    }
}

/// Shared state behind every action and event.
pub struct Dashboard {
    program: String,
    gateway: GatewayClient,
    view: ViewAttachment,
    flags: Arc<dyn FlagStore>,
    session: SessionClock,
    node: RwLock<NodeSettings>,
    dispatcher: ActionDispatcher,
}

impl Dashboard {
    /// Build a dashboard over a page and a flag store.
    pub fn new(
        config: &BridgeConfig,
        page: Arc<dyn Page>,
        flags: Arc<dyn FlagStore>,
    ) -> Result<Arc<Self>, TransportError> {
        Ok(Arc::new(Self {
            program: config.cli_program.clone(),
            gateway: GatewayClient::new(config)?,
            view: ViewAttachment::new(page, &config.view),
            flags,
            session: SessionClock::new(),
            node: RwLock::new(NodeSettings::default()),
            dispatcher: ActionDispatcher::new(config.max_in_flight),
        }))
    }

    /// Gateway client
    pub fn gateway(&self) -> &GatewayClient {
        &self.gateway
    }

    /// View attachment layer
    pub fn view(&self) -> &ViewAttachment {
        &self.view
    }

    /// Session clock
    pub fn session(&self) -> &SessionClock {
        &self.session
    }

    /// Persisted flags
    pub fn flags(&self) -> &Arc<dyn FlagStore> {
        &self.flags
    }

    /// Whether the last settings query reported DNS eligibility.
    pub fn dns_eligible(&self) -> bool {
        self.node.read().dns_eligible
    }

    /// Free space on the storage drive in GB, from the last settings query.
    pub fn drive_free_gb(&self) -> f64 {
        self.node.read().drive_free_gb
    }

    /// Run `action` on its own task unless it is already in flight.
    pub fn trigger(self: &Arc<Self>, action: Action) -> bool {
        let name = action.name();
        let dashboard = Arc::clone(self);
        self.dispatcher.dispatch(name, async move {
            if let Err(err) = dashboard.run(&action).await {
                tracing::error!(action = action.name(), "action failed: {err}");
            }
        })
    }

    /// Run `action` on the current task.
    pub async fn run(&self, action: &Action) -> ActionResult<()> {
        tracing::debug!(action = action.name(), "running action");
        match action {
            Action::PeerIdentity => self.peer_identity().await,
            Action::RefreshPeers => self.refresh_peers().await,
            Action::EarningDevices => self.earning_devices().await,
            Action::StorageLocation => self.storage_location().await,
            Action::Profile => self.profile().await,
            Action::Bandwidth => self.bandwidth().await,
            Action::Uptime => {
                self.uptime().await;
                Ok(())
            }
            Action::Version => self.version().await,
            Action::Settings => self.settings().await,
            Action::Status => self.status().await,
            Action::Config => self.config().await,
            Action::SetSwarmPort => self.set_port(PortKind::Swarm).await,
            Action::SetWebsocketPort => self.set_port(PortKind::Websocket).await,
            Action::VerifyPortForward => self.verify_port_forward().await,
            Action::ModifyStorage => self.modify_storage().await,
        }
    }

    /// Apply a topic projection: page writes first, then effects.
    pub async fn apply(self: &Arc<Self>, projection: Projection) {
        self.view.apply(&projection.ops).await;
        for effect in projection.effects {
            match effect {
                Effect::SessionStarted(started_at) => self.session_started(started_at).await,
                Effect::RefreshPeers => {
                    self.trigger(Action::RefreshPeers);
                }
            }
        }
    }

    fn command(&self, tokens: &[&str], action: &Action) -> Command {
        Command::new(&self.program, tokens.iter().copied(), action.name())
    }

    async fn session_started(&self, started_at: i64) {
        self.session.record(started_at);
        tracing::debug!(started_at, "daemon session start recorded");
        check_banner(self.flags.as_ref(), &self.view, started_at).await;
    }

    async fn peer_identity(&self) -> ActionResult<()> {
        let command = self.command(&["id", "-j"], &Action::PeerIdentity);
        let id: PeerIdentity = self.gateway.invoke_as(&command).await?;

        self.view.set_display("Address", "innerHTML", "").await;
        for address in &id.addresses {
            self.view.create_element("Address", "div", "innerHTML", address);
            self.view.create_element("Address", "br", "innerHTML", "");
        }
        self.view.set_display("PeerID", "innerHTML", &id.peer_id).await;
        Ok(())
    }

    /// Replace the peer list with the gateway's current one.
    pub async fn refresh_peers(&self) -> ActionResult<()> {
        let command = self.command(&["swarm", "peers", "-j"], &Action::RefreshPeers);
        let peers: Vec<String> = self.gateway.invoke_as(&command).await?;

        self.view.set_display("Peers", "innerHTML", "").await;
        for peer in &peers {
            self.view.create_element("Peers", "div", "innerHTML", peer);
            self.view.create_element("Peers", "br", "innerHTML", "");
        }
        Ok(())
    }

    async fn earning_devices(&self) -> ActionResult<()> {
        let command = self.command(&["earning", "-g", "-j"], &Action::EarningDevices);
        let earnings: NetEarnings = self.gateway.invoke_as(&command).await?;
        tracing::debug!(devices = earnings.devices.len(), "net earnings received");

        let all = [
            ("innerHTML".to_string(), "ALL DEVICES".to_string()),
            ("value".to_string(), "ALL DEVICES".to_string()),
            ("selected".to_string(), "true".to_string()),
        ];
        self.view.append_element("DevicesDropDown", "option", &all);
        for device in &earnings.devices {
            let option = [
                (
                    "innerHTML".to_string(),
                    format!("{}-{}", device.peer_id, device.name),
                ),
                ("value".to_string(), device.peer_id.clone()),
            ];
            self.view.append_element("DevicesDropDown", "option", &option);
        }
        Ok(())
    }

    /// Fetch net earnings and hand back the raw result wrapper JSON, for
    /// callers that chart it themselves.
    pub async fn earnings(&self) -> ActionResult<String> {
        const OPERATION: &str = "GetEarning";
        let command = Command::new(&self.program, ["earning", "-g", "-j"], OPERATION);
        let wrapped = self.gateway.invoke_wrapped(&command).await?;
        decode_result_wrapper(wrapped.as_bytes())
            .and_then(|payload| decode_payload::<NetEarnings>(&payload))
            .map_err(|err| RpcError::new(OPERATION, err))?;
        Ok(wrapped)
    }

    async fn storage_location(&self) -> ActionResult<()> {
        let command = self.command(
            &["config", "get-storage-location", "-j"],
            &Action::StorageLocation,
        );
        let payload = self.gateway.invoke(&command).await?;
        self.view
            .set_display("StoragePath", "innerHTML", &payload_text(&payload))
            .await;
        Ok(())
    }

    async fn profile(&self) -> ActionResult<()> {
        let command = self.command(&["profile", "-j"], &Action::Profile);
        let profile: Profile = self.gateway.invoke_as(&command).await?;
        self.view.set_display("Email", "innerHTML", &profile.email).await;
        self.view.set_display("Role", "innerHTML", &profile.role).await;
        Ok(())
    }

    async fn bandwidth(&self) -> ActionResult<()> {
        let command = self.command(&["stat", "bandwidth", "-j"], &Action::Bandwidth);
        let bandwidth: Bandwidth = self.gateway.invoke_as(&command).await?;
        self.view
            .set_display("Incoming", "innerHTML", &humanize_bytes(bandwidth.incoming))
            .await;
        self.view
            .set_display("Outgoing", "innerHTML", &humanize_bytes(bandwidth.outgoing))
            .await;
        Ok(())
    }

    async fn uptime(&self) {
        if let Some(elapsed) = self.session.uptime_at(Utc::now()) {
            self.view
                .set_display("Time", "innerHTML", &format_uptime(elapsed))
                .await;
        }
    }

    async fn version(&self) -> ActionResult<()> {
        let command = self.command(&["version", "-j"], &Action::Version);
        let version: Version = self.gateway.invoke_as(&command).await?;
        self.view
            .set_display("Version", "innerHTML", &version.app_version)
            .await;
        Ok(())
    }

    async fn settings(&self) -> ActionResult<()> {
        let command = self.command(&["settings", "-g", "-j"], &Action::Settings);
        let settings: Settings = self.gateway.invoke_as(&command).await?;

        let used = settings.used_storage;
        let free = settings.max_storage - settings.used_storage;
        let drive_free_gb = settings.free_disk_space / (1024.0 * 1024.0 * 1024.0);

        self.view.set_display("Name", "innerHTML", &settings.name).await;
        self.view
            .set_display("UsedSpace", "innerHTML", &format!("{:.2} MB", used * 1024.0))
            .await;
        self.view
            .set_display("FreeSpace", "innerHTML", &format!("{:.2} MB", free * 1024.0))
            .await;
        self.view
            .set_display("StorageMin", "innerHTML", &format!("{used:.1} GB"))
            .await;
        self.view
            .set_display("rangeSlider", "min", &format!("{used:.1}"))
            .await;
        self.view
            .set_display("StorageMax", "innerHTML", &format!("{drive_free_gb:.1} GB"))
            .await;
        self.view
            .set_display("rangeSlider", "max", &format!("{drive_free_gb:.1}"))
            .await;
        self.view
            .set_display("rangeSlider", "value", &format!("{:.1}", settings.max_storage))
            .await;

        *self.node.write() = NodeSettings {
            dns_eligible: settings.is_dns_eligible,
            drive_free_gb,
        };
        Ok(())
    }

    async fn status(&self) -> ActionResult<()> {
        let command = self.command(&["status", "-j"], &Action::Status);
        let status: Status = self.gateway.invoke_as(&command).await?;
        let logged_in = if status.logged_in { "LoggedIn" } else { "LoggedOut" };
        self.view.set_display("LoggedIn", "innerHTML", logged_in).await;
        self.session_started(status.session_start_time).await;
        Ok(())
    }

    async fn config(&self) -> ActionResult<()> {
        let command = self.command(&["config", "show", "-j"], &Action::Config);
        let config: NodeConfig = self.gateway.invoke_as(&command).await?;

        self.view
            .set_display("SwrmPortNumber", "placeholder", &config.swarm_port)
            .await;
        if !self.dns_eligible() {
            let hidden = BTreeMap::from([
                ("style".to_string(), "display: none;".to_string()),
                ("aria-hidden".to_string(), "true".to_string()),
                ("visibility".to_string(), "hidden".to_string()),
            ]);
            self.view.set_multiple_display("Group_62_ID", &hidden).await;
            return Ok(());
        }
        self.view
            .set_display("WebSocketPortNumber", "placeholder", &config.websocket_port)
            .await;
        Ok(())
    }

    async fn show_status(&self, target: &str, message: &str, style: &str) {
        let attributes = BTreeMap::from([
            ("innerHTML".to_string(), message.to_string()),
            ("style".to_string(), style.to_string()),
        ]);
        self.view.set_multiple_display(target, &attributes).await;
    }

    async fn set_port(&self, kind: PortKind) -> ActionResult<()> {
        let status_target = kind.status_target();
        self.view.set_display(status_target, "innerHTML", "").await;

        let port = self.view.get_value(kind.input(), "value").unwrap_or_default();
        if let Err(PortRejection(reason)) = check_port(&port) {
            self.show_status(status_target, &reason, RED).await;
            return Err(ActionError::InvalidInput(reason));
        }

        let command = Command::new(
            &self.program,
            ["config", "modify", kind.config_key(), port.as_str()],
            kind.purpose(),
        );
        let answer = self.gateway.modify_config(&command).await?;
        if answer.contains("not") {
            tracing::info!(port = %port, answer = %answer, "port change rejected");
            self.show_status(status_target, &format!("Port {port} is Unavailable"), RED)
                .await;
            return Ok(());
        }

        self.view.set_display(kind.input(), "placeholder", &port).await;
        self.view
            .set_display("RestartBanner", "style", "display: block;")
            .await;
        self.show_status(
            status_target,
            &format!("{} Changed to {port}", kind.label()),
            GREEN,
        )
        .await;
        self.flags.set(REFRESH_STATE, NOT_REFRESHED);
        Ok(())
    }

    async fn verify_port_forward(&self) -> ActionResult<()> {
        self.show_status("PortForward", "Verifying....", GREY).await;

        let command = self.command(&["verify-port-forward"], &Action::VerifyPortForward);
        let answer = match self.gateway.modify_config(&command).await {
            Ok(answer) => answer,
            Err(err) => {
                self.view
                    .set_display("PortForward", "innerHTML", "Error in Checking")
                    .await;
                return Err(err.into());
            }
        };

        if answer.contains("NOT") {
            self.show_status("PortForward", "Not Forwarded &#10008;", ORANGE)
                .await;
        } else {
            self.show_status("PortForward", "Port Forwarded &#10004;", ORANGE)
                .await;
        }
        Ok(())
    }

    async fn modify_storage(&self) -> ActionResult<()> {
        let Some(size) = self.view.get_value("rangeSlider", "value") else {
            return Err(ActionError::MissingPageValue {
                target: "rangeSlider".to_string(),
                attribute: "value".to_string(),
            });
        };
        tracing::debug!(size = %size, "changing storage size");

        let command = self.command(
            &["config", "modify", "Storage", size.as_str()],
            &Action::ModifyStorage,
        );
        self.gateway.modify_config(&command).await?;
        self.save_settings().await
    }

    async fn save_settings(&self) -> ActionResult<()> {
        let command = Command::new(&self.program, ["settings", "-j"], "SaveSettings");
        let answer = self.gateway.modify_config(&command).await?;
        tracing::debug!(answer = %answer, "settings saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_validation() {
        assert_eq!(
            check_port(""),
            Err(PortRejection("Enter A Valid Port Number".into()))
        );
        assert_eq!(
            check_port("abc"),
            Err(PortRejection("Port abc is Not a Number".into()))
        );
        assert_eq!(
            check_port("80"),
            Err(PortRejection("Port 80 is Unavailable".into()))
        );
        assert_eq!(
            check_port("49151"),
            Err(PortRejection("Port 49151 is Unavailable".into()))
        );
        assert_eq!(check_port("1025"), Ok(1025));
        assert_eq!(check_port("49150"), Ok(49150));
    }

    #[test]
    fn action_names_are_unique() {
        let actions = [
            Action::PeerIdentity,
            Action::RefreshPeers,
            Action::EarningDevices,
            Action::StorageLocation,
            Action::Profile,
            Action::Bandwidth,
            Action::Uptime,
            Action::Version,
            Action::Settings,
            Action::Status,
            Action::Config,
            Action::SetSwarmPort,
            Action::SetWebsocketPort,
            Action::VerifyPortForward,
            Action::ModifyStorage,
        ];
        let mut names: Vec<_> = actions.iter().map(Action::name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), actions.len());
    }
}
