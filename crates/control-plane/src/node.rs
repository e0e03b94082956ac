use crate::control::{ControlCommand, ControlTopics, StatusRequest};
use crate::discovery::{node_topics, plan_discovery, DiscoveryLimits};
use crate::messages::{
    AliveStats, Heartbeat, HeartbeatMicrocontroller, IdentityUpdate, MicrocontrollerInfo,
    SettingsEntry,
};
use crate::settings::{
    SettingsStore, KEY_ALIVE_LED, KEY_BROKER_IP, KEY_DEVICES, KEY_INTERVAL_ALIVE, KEY_NAMESPACE,
    KEY_PROJECT,
};
use crate::{Clock, ControlPlaneError, NodeConfig, NodeIdentity, Result};
use bus_transport::{LastWill, Message, MessageBus};
use device_registry::{
    DeviceRegistry, FamilyRegistry, ManifestParser, MetricsHub, Millis, NodeContext, Topic,
};
use node_liveness::{AckLedMode, AckOutcome, LivenessConfig, LivenessMonitor, LoopStallWatchdog};
use std::collections::{BTreeMap, VecDeque};

/// Errors held back while the transport is down.
const MAX_PENDING_ERRORS: usize = 16;
const LOST_TOPIC: &str = "i_am_lost";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    RebootRequested,
    ManifestSaved,
    IdentitySaved,
    ControlLoopStall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    /// All drivers are already released; rebuild the node from persisted state.
    Restart(RestartReason),
}

/// One hub node: owns the bus, the settings store and every driver, and runs
/// one cooperative control-loop iteration per [`Node::step`].
pub struct Node<B: MessageBus, S: SettingsStore> {
    bus: B,
    settings: S,
    clock: Box<dyn Clock>,
    config: NodeConfig,
    identity: NodeIdentity,
    topics: ControlTopics,
    families: FamilyRegistry,
    registry: DeviceRegistry,
    monitor: LivenessMonitor,
    watchdog: LoopStallWatchdog,
    link_session: Option<u32>,
    started_sent: bool,
    pending_errors: VecDeque<String>,
}

impl<B: MessageBus, S: SettingsStore> Node<B, S> {
    /// Build the node from static config plus whatever the settings store holds.
    /// Manifest and driver errors do not fail the boot; they are queued for
    /// the error channel.
    pub fn boot(
        config: NodeConfig,
        bus: B,
        settings: S,
        families: FamilyRegistry,
        clock: Box<dyn Clock>,
    ) -> Self {
        let mut pending_errors = VecDeque::new();
        let identity = persisted_identity(&config, &settings, &mut pending_errors);
        let liveness = persisted_liveness(&config, &settings, &mut pending_errors);
        let ctx = NodeContext::new(identity.base_topic());

        let mut registry = DeviceRegistry::new();
        match MetricsHub::new() {
            Ok(metrics) => registry = registry.with_metrics(metrics),
            Err(e) => tracing::warn!(error = %e, "metrics disabled"),
        }

        match settings.load(KEY_DEVICES) {
            Ok(Some(raw)) if !raw.trim().is_empty() => {
                let parsed = ManifestParser::new(&families)
                    .with_capacity(config.manifest_capacity_bytes)
                    .parse(&raw);
                match parsed {
                    Ok(descriptors) => {
                        for e in registry.instantiate(&descriptors, &families, &ctx) {
                            queue_error(&mut pending_errors, e.to_string());
                        }
                    }
                    Err(e) => queue_error(&mut pending_errors, e.to_string()),
                }
            }
            Ok(_) => tracing::info!("no device manifest stored, node is unconfigured"),
            Err(e) => queue_error(&mut pending_errors, e.to_string()),
        }

        tracing::info!(
            base_topic = %identity.base_topic(),
            drivers = registry.len(),
            families = families.len(),
            "node booted"
        );
        let booted_at = clock.now_ms();
        Self {
            bus,
            settings,
            clock,
            watchdog: LoopStallWatchdog::new(config.stall_ceiling_ms),
            monitor: LivenessMonitor::new(liveness, booted_at),
            topics: ControlTopics::new(&identity),
            config,
            identity,
            families,
            registry,
            link_session: None,
            started_sent: false,
            pending_errors,
        }
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn monitor(&self) -> &LivenessMonitor {
        &self.monitor
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn settings(&self) -> &S {
        &self.settings
    }

    pub fn pending_errors(&self) -> impl Iterator<Item = &str> {
        self.pending_errors.iter().map(String::as_str)
    }

    pub fn loop_period_ms(&self) -> u64 {
        self.config.loop_period_ms
    }

    /// Hand back what a restart needs to rebuild the node.
    pub fn into_parts(self) -> (NodeConfig, B, S, FamilyRegistry) {
        (self.config, self.bus, self.settings, self.families)
    }

    /// Every topic the node announces: node topics, then driver topics in
    /// manifest order.
    pub fn describe_topics(&self) -> Vec<Topic> {
        let mut topics = node_topics(&self.identity);
        topics.extend(self.registry.describe_topics());
        topics
    }

    /// One control-loop iteration: transport service, link bookkeeping,
    /// message dispatch, driver polling, liveness.
    pub fn step(&mut self) -> StepOutcome {
        self.monitor.clear_indicator();
        let start = self.clock.now_ms();
        self.watchdog.begin_iteration(start);

        self.watchdog.begin_stage("transport", start);
        let inbound = match self.bus.service() {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!(error = %e, "transport service failed");
                Vec::new()
            }
        };
        if let Err(stall) = self.watchdog.end_stage(self.clock.now_ms()) {
            self.report_error(ControlPlaneError::from(stall).to_string());
            return self.restart(RestartReason::ControlLoopStall);
        }

        let connected = self.bus.is_connected();
        if connected {
            let session = self.bus.sessions_established();
            if self.link_session != Some(session) {
                self.on_link_established(session);
            }
            for msg in inbound {
                if let Some(reason) = self.dispatch(msg) {
                    return self.restart(reason);
                }
            }
        }

        let now = self.clock.now_ms();
        for fault in self.registry.poll_all(now, &mut self.bus) {
            self.report_error(fault.to_string());
        }

        let tick = self.monitor.poll(now, connected);
        if tick.consumer_lost {
            for fault in self.registry.set_consumer_available(false, &mut self.bus) {
                self.report_error(fault.to_string());
            }
            self.publish_lost();
        }
        if let Some(counter) = tick.heartbeat_due {
            self.publish_heartbeat(counter, now);
        }

        self.watchdog.end_iteration(self.clock.now_ms());
        StepOutcome::Continue
    }

    fn on_link_established(&mut self, session: u32) {
        tracing::info!(session, "transport session established");
        self.link_session = Some(session);

        let will = LastWill {
            topic: self.identity.topic("terminated"),
            payload: "SHUTDOWN".to_string(),
            retain: false,
        };
        if let Err(e) = self.bus.set_last_will(will) {
            tracing::debug!(error = %e, "last will not registered");
        }

        let filters: Vec<String> = self
            .topics
            .subscriptions()
            .iter()
            .map(|f| f.to_string())
            .collect();
        for filter in filters {
            if let Err(e) = self.bus.subscribe(&filter) {
                self.report_error(format!("Unable to subscribe {filter}: {e}"));
            }
        }

        for fault in self.registry.link_established(session, &mut self.bus) {
            self.report_error(fault.to_string());
        }

        match self.publish_discovery() {
            Ok(()) => {
                if !self.started_sent {
                    let topic = self.identity.topic("started");
                    match self.bus.publish(&topic, "STARTED", false) {
                        Ok(()) => self.started_sent = true,
                        Err(e) => tracing::warn!(error = %e, "started message not sent"),
                    }
                }
            }
            Err(e) => self.report_error(format!("Discovery failed: {e}")),
        }

        self.flush_errors();
    }

    /// Send the registration batch followed by any overflow topics. A
    /// registration that cannot fit even without topics is reported and every
    /// topic goes out on the overflow channel.
    pub fn publish_discovery(&mut self) -> Result<()> {
        let topics = self.describe_topics();
        let limits = DiscoveryLimits {
            ceiling_bytes: self.config.discovery_ceiling_bytes.min(self.bus.max_payload()),
            max_batch_topics: self.config.max_batch_topics,
        };
        let plan = plan_discovery(&self.identity, &topics, limits)?;
        if plan.registration_oversized {
            self.report_error(format!(
                "Registration of {} bytes exceeds the {} byte limit, topics sent individually",
                plan.registration_json.len(),
                limits.ceiling_bytes
            ));
        } else {
            self.bus.publish(
                &self.identity.topic("register_microcontroller"),
                &plan.registration_json,
                false,
            )?;
        }
        let overflow_topic = self.identity.topic("register_known_topic");
        for (record, json) in &plan.overflow {
            if let Err(e) = self.bus.publish(&overflow_topic, json, false) {
                self.report_error(format!("Unable to register topic {}: {e}", record.topic));
            }
        }
        tracing::info!(topics = plan.topic_count(), "discovery published");
        Ok(())
    }

    fn dispatch(&mut self, msg: Message) -> Option<RestartReason> {
        let now = self.clock.now_ms();
        match ControlCommand::parse(&self.topics, &msg.topic, &msg.payload) {
            Some(Ok(cmd)) => match self.handle_command(cmd, now) {
                Ok(restart) => restart,
                Err(e) => {
                    self.report_error(e.to_string());
                    None
                }
            },
            Some(Err(e)) => {
                self.report_error(e.to_string());
                None
            }
            None => {
                match self
                    .registry
                    .route_message(&msg.topic, &msg.payload, now, &mut self.bus)
                {
                    Ok(true) => {}
                    Ok(false) => tracing::debug!(topic = %msg.topic, "no handler for message"),
                    Err(fault) => self.report_error(fault.to_string()),
                }
                None
            }
        }
    }

    fn handle_command(&mut self, cmd: ControlCommand, now: Millis) -> Result<Option<RestartReason>> {
        match cmd {
            ControlCommand::AliveAck(payload) => {
                if self.monitor.on_ack(&payload, now) == AckOutcome::Recovered {
                    self.registry.set_consumer_available(true, &mut self.bus);
                }
            }
            ControlCommand::AliveConfig(cfg) => {
                self.monitor
                    .apply_config(cfg)
                    .map_err(ControlPlaneError::Rejected)?;
                self.settings
                    .store(KEY_INTERVAL_ALIVE, &cfg.heartbeat_interval_ms.to_string())?;
                self.settings
                    .store(KEY_ALIVE_LED, &cfg.ack_led_mode.code().to_string())?;
            }
            ControlCommand::Status(StatusRequest::DeviceConfig) => {
                let manifest = self.settings.load(KEY_DEVICES)?.unwrap_or_default();
                self.bus
                    .publish(&self.identity.topic("device_config"), &manifest, false)?;
            }
            ControlCommand::Status(StatusRequest::Alive) => {
                let counter = self.monitor.force_heartbeat(now);
                self.publish_heartbeat(counter, now);
            }
            ControlCommand::SettingsLoad(key) => {
                let data = self.settings.load(&key)?.unwrap_or_default();
                let answer = serde_json::to_string(&SettingsEntry { key, data })?;
                self.bus
                    .publish(&self.identity.topic("settings/key"), &answer, false)?;
            }
            ControlCommand::SettingsSave(entry) => {
                self.settings.store(&entry.key, &entry.data)?;
                tracing::info!(key = %entry.key, "setting stored");
            }
            ControlCommand::Reboot => {
                tracing::warn!("reboot requested");
                return Ok(Some(RestartReason::RebootRequested));
            }
            ControlCommand::SaveManifest(raw) => {
                self.settings.store(KEY_DEVICES, &raw)?;
                tracing::warn!(bytes = raw.len(), "device manifest replaced, restarting");
                return Ok(Some(RestartReason::ManifestSaved));
            }
            ControlCommand::DayMode(day) => self.monitor.set_day_mode(day),
            ControlCommand::SaveIdentity(update) => {
                self.store_identity(&update)?;
                if let Err(e) = self.bus.publish(&self.topics.save_identity, "", true) {
                    tracing::warn!(error = %e, "retained identity message not cleared");
                }
                return Ok(Some(RestartReason::IdentitySaved));
            }
            ControlCommand::IdentityCleared => {}
        }
        Ok(None)
    }

    fn store_identity(&mut self, update: &IdentityUpdate) -> Result<()> {
        self.settings.store(KEY_NAMESPACE, &update.namespace_name)?;
        self.settings.store(KEY_PROJECT, &update.project_name)?;
        self.settings.store(KEY_BROKER_IP, &update.ip_mqtt_broker)?;
        tracing::info!(
            namespace = %update.namespace_name,
            project = %update.project_name,
            "node identity stored"
        );
        Ok(())
    }

    pub fn heartbeat(&self, counter: u64, now: Millis) -> Heartbeat {
        let supported_devices: BTreeMap<String, bool> = self
            .families
            .device_types()
            .map(|t| (t.to_string(), true))
            .collect();
        let cfg = self.monitor.config();
        Heartbeat {
            microcontroller: HeartbeatMicrocontroller::from(&self.identity),
            alive: AliveStats {
                alive_counter: counter,
                loop_counter: self.watchdog.iterations(),
                loop_duration_ms: self.watchdog.last_iteration_ms(),
                reconnection_count: self.bus.sessions_established().saturating_sub(1),
                alive_interval_ms: cfg.heartbeat_interval_ms,
                alive_ack_led_enabled: cfg.ack_led_mode.code(),
                uptime_ms: now,
            },
            supported_devices,
        }
    }

    fn publish_heartbeat(&mut self, counter: u64, now: Millis) {
        let result = serde_json::to_string(&self.heartbeat(counter, now))
            .map_err(ControlPlaneError::from)
            .and_then(|json| {
                self.bus
                    .publish(&self.identity.topic("alive"), &json, false)
                    .map_err(ControlPlaneError::from)
            });
        match result {
            Ok(()) => tracing::debug!(counter, "heartbeat sent"),
            // A lost heartbeat only shows up as a late acknowledgement.
            Err(e) => tracing::warn!(counter, error = %e, "heartbeat not sent"),
        }
    }

    fn publish_lost(&mut self) {
        let info = MicrocontrollerInfo::from(&self.identity);
        match serde_json::to_string(&info) {
            Ok(json) => {
                if let Err(e) = self.bus.publish(LOST_TOPIC, &json, false) {
                    tracing::warn!(error = %e, "lost broadcast not sent");
                }
            }
            Err(e) => tracing::error!(error = %e, "cannot encode lost broadcast"),
        }
    }

    /// Log the error and publish it on the error channel, or queue it until
    /// the next link if that is not possible. Queued errors always go first.
    pub fn report_error(&mut self, message: String) {
        tracing::warn!(error = %message, "control plane error");
        if self.bus.is_connected() && self.link_session.is_some() {
            self.flush_errors();
            if self.pending_errors.is_empty() {
                let topic = self.identity.topic("error");
                if self.bus.publish(&topic, &message, false).is_ok() {
                    return;
                }
            }
        }
        queue_error(&mut self.pending_errors, message);
    }

    fn flush_errors(&mut self) {
        let topic = self.identity.topic("error");
        while let Some(message) = self.pending_errors.pop_front() {
            if let Err(e) = self.bus.publish(&topic, &message, false) {
                tracing::warn!(error = %e, "error channel unavailable");
                self.pending_errors.push_front(message);
                break;
            }
        }
    }

    fn restart(&mut self, reason: RestartReason) -> StepOutcome {
        let released = self.registry.release_all();
        tracing::warn!(?reason, released, "restarting node");
        StepOutcome::Restart(reason)
    }
}

fn queue_error(queue: &mut VecDeque<String>, message: String) {
    tracing::warn!(error = %message, "error queued for the error channel");
    if queue.len() == MAX_PENDING_ERRORS {
        queue.pop_front();
    }
    queue.push_back(message);
}

fn persisted_identity<S: SettingsStore>(
    config: &NodeConfig,
    settings: &S,
    errors: &mut VecDeque<String>,
) -> NodeIdentity {
    let mut identity = config.identity();
    for (key, field) in [
        (KEY_NAMESPACE, &mut identity.namespace_name),
        (KEY_PROJECT, &mut identity.project_name),
        (KEY_BROKER_IP, &mut identity.broker_ip),
    ] {
        match settings.load(key) {
            Ok(Some(value)) => *field = value,
            Ok(None) => {}
            Err(e) => queue_error(errors, e.to_string()),
        }
    }
    if identity.namespace_name.trim().is_empty() {
        identity.namespace_name = NodeConfig::default().namespace_name;
    }
    identity
}

fn persisted_liveness<S: SettingsStore>(
    config: &NodeConfig,
    settings: &S,
    errors: &mut VecDeque<String>,
) -> LivenessConfig {
    let mut liveness = config.liveness();
    match settings.load_parsed::<u64>(KEY_INTERVAL_ALIVE) {
        Ok(Some(interval)) => liveness.heartbeat_interval_ms = interval,
        Ok(None) => {}
        Err(e) => queue_error(errors, e.to_string()),
    }
    match settings.load_parsed::<i64>(KEY_ALIVE_LED) {
        Ok(Some(code)) => match AckLedMode::from_code(code) {
            Some(mode) => liveness.ack_led_mode = mode,
            None => queue_error(errors, format!("stored ack LED mode {code} is invalid")),
        },
        Ok(None) => {}
        Err(e) => queue_error(errors, e.to_string()),
    }
    if let Err(e) = liveness.validate() {
        queue_error(errors, format!("stored liveness settings ignored: {e}"));
        liveness = config.liveness();
    }
    liveness
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MemorySettings;
    use crate::ManualClock;
    use bus_transport::MockBus;

    fn node(settings: MemorySettings) -> (Node<MockBus, MemorySettings>, ManualClock) {
        let clock = ManualClock::new(0);
        let node = Node::boot(
            NodeConfig::default(),
            MockBus::new(),
            settings,
            FamilyRegistry::new(),
            Box::new(clock.clone()),
        );
        (node, clock)
    }

    fn published_on<'a>(msgs: &'a [Message], suffix: &str) -> Vec<&'a Message> {
        msgs.iter().filter(|m| m.topic.ends_with(suffix)).collect()
    }

    #[test]
    fn persisted_settings_override_config() {
        let settings = MemorySettings::new()
            .with(KEY_PROJECT, "garden")
            .with(KEY_INTERVAL_ALIVE, "5000")
            .with(KEY_ALIVE_LED, "1");
        let (node, _) = node(settings);
        assert_eq!(node.identity().base_topic(), "iotzoo/garden/esp32/00:00:00:00:00:00");
        assert_eq!(node.monitor().config().heartbeat_interval_ms, 5000);
        assert_eq!(node.monitor().config().ack_led_mode, AckLedMode::AlwaysOn);
    }

    #[test]
    fn boot_errors_are_flushed_after_link() {
        let (mut node, _) = node(MemorySettings::new().with(KEY_DEVICES, "{broken"));
        assert_eq!(node.pending_errors().count(), 1);
        node.step();
        assert_eq!(node.pending_errors().count(), 1);
        node.bus_mut().connect();
        node.step();
        assert_eq!(node.pending_errors().count(), 0);
        let published = node.bus_mut().take_published();
        assert_eq!(published_on(&published, "/error").len(), 1);
    }

    #[test]
    fn link_establishment_registers_and_announces() {
        let (mut node, _) = node(MemorySettings::new());
        node.bus_mut().connect();
        assert_eq!(node.step(), StepOutcome::Continue);
        let bus = node.bus();
        assert!(bus.is_subscribed("iotzoo/esp32/00:00:00:00:00:00/alive_ack"));
        assert!(bus.is_subscribed("00:00:00:00:00:00/save_microcontroller_config"));
        assert!(bus.is_subscribed("iotzoo/is_day_mode"));
        assert_eq!(
            bus.last_will().map(|w| w.payload.as_str()),
            Some("SHUTDOWN")
        );
        let published = bus.published();
        assert_eq!(published_on(published, "/register_microcontroller").len(), 1);
        assert_eq!(published_on(published, "/started").len(), 1);
        assert_eq!(published_on(published, "/alive").len(), 1);
    }

    #[test]
    fn started_is_sent_once_across_reconnects() {
        let (mut node, clock) = node(MemorySettings::new());
        node.bus_mut().connect();
        node.step();
        node.bus_mut().disconnect();
        clock.advance(100);
        node.step();
        node.bus_mut().connect();
        clock.advance(100);
        node.step();
        let published = node.bus().published();
        assert_eq!(published_on(published, "/register_microcontroller").len(), 2);
        assert_eq!(published_on(published, "/started").len(), 1);
        assert_eq!(published_on(published, "/terminated").len(), 1);
        let hb = node.heartbeat(9, 0);
        assert_eq!(hb.alive.reconnection_count, 1);
    }

    #[test]
    fn reboot_and_manifest_save_request_restart() {
        let (mut node, _) = node(MemorySettings::new());
        node.bus_mut().connect();
        node.step();
        let base = node.identity().base_topic();
        node.bus_mut().inject(format!("{base}/save_device_config"), "[]");
        assert_eq!(node.step(), StepOutcome::Restart(RestartReason::ManifestSaved));
        assert_eq!(node.settings().load(KEY_DEVICES).unwrap().as_deref(), Some("[]"));
        assert!(node.registry().is_destroyed());

        node.bus_mut().inject(format!("{base}/system"), "reboot");
        assert_eq!(node.step(), StepOutcome::Restart(RestartReason::RebootRequested));
    }

    #[test]
    fn identity_save_clears_retained_message() {
        let (mut node, _) = node(MemorySettings::new());
        node.bus_mut().connect();
        node.step();
        node.bus_mut().take_published();
        node.bus_mut().inject(
            "00:00:00:00:00:00/save_microcontroller_config",
            r#"{"NamespaceName":"zoo","ProjectName":"barn","IpMqttBroker":"10.1.1.1"}"#,
        );
        assert_eq!(node.step(), StepOutcome::Restart(RestartReason::IdentitySaved));
        let cleared = node
            .bus()
            .published()
            .iter()
            .find(|m| m.topic == "00:00:00:00:00:00/save_microcontroller_config")
            .cloned()
            .unwrap();
        assert!(cleared.retain);
        assert!(cleared.payload.is_empty());
        let (config, bus, settings, families) = node.into_parts();
        let rebooted = Node::boot(config, bus, settings, families, Box::new(ManualClock::new(0)));
        assert_eq!(rebooted.identity().base_topic(), "zoo/barn/esp32/00:00:00:00:00:00");
        assert_eq!(rebooted.identity().broker_ip, "10.1.1.1");
    }

    #[test]
    fn settings_load_and_save() {
        let (mut node, _) = node(MemorySettings::new());
        node.bus_mut().connect();
        node.step();
        node.bus_mut().take_published();
        let base = node.identity().base_topic();
        node.bus_mut()
            .inject(format!("{base}/settings/save"), r#"{"key":"color","data":"blue"}"#);
        node.bus_mut().inject(format!("{base}/settings/load"), "color");
        node.step();
        let published = node.bus_mut().take_published();
        let answer = published_on(&published, "/settings/key");
        assert_eq!(answer.len(), 1);
        let entry: SettingsEntry = serde_json::from_str(&answer[0].payload).unwrap();
        assert_eq!(entry.data, "blue");
    }

    #[test]
    fn bad_control_payload_goes_to_error_channel() {
        let (mut node, _) = node(MemorySettings::new());
        node.bus_mut().connect();
        node.step();
        node.bus_mut().take_published();
        let base = node.identity().base_topic();
        node.bus_mut().inject(format!("{base}/status"), "weather");
        node.step();
        let published = node.bus_mut().take_published();
        let errors = published_on(&published, "/error");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].payload.contains("weather"));
    }

    #[test]
    fn alive_config_is_persisted_and_applied_on_next_heartbeat() {
        let (mut node, clock) = node(MemorySettings::new());
        node.bus_mut().connect();
        node.step();
        let base = node.identity().base_topic();
        node.bus_mut().inject(
            format!("{base}/alive_config"),
            r#"{"aliveIntervalMs": 5000, "aliveAckLedMode": 0}"#,
        );
        clock.set(100);
        node.step();
        assert_eq!(node.settings().load(KEY_INTERVAL_ALIVE).unwrap().as_deref(), Some("5000"));
        assert_eq!(node.monitor().config().heartbeat_interval_ms, 15_000);
        clock.set(15_000);
        node.step();
        assert_eq!(node.monitor().config().heartbeat_interval_ms, 5_000);
        assert_eq!(node.monitor().config().ack_led_mode, AckLedMode::Off);
    }

    #[test]
    fn queued_errors_are_published_before_new_ones() {
        let config = NodeConfig {
            discovery_ceiling_bytes: 64,
            ..NodeConfig::default()
        };
        let mut node = Node::boot(
            config,
            MockBus::new(),
            MemorySettings::new().with(KEY_DEVICES, "{broken"),
            FamilyRegistry::new(),
            Box::new(ManualClock::new(0)),
        );
        assert_eq!(node.pending_errors().count(), 1);
        node.bus_mut().connect();
        node.step();
        let published = node.bus_mut().take_published();
        let errors = published_on(&published, "/error");
        assert_eq!(errors.len(), 2);
        assert!(errors[0].payload.contains("malformed manifest"));
        assert!(errors[1].payload.contains("exceeds"));
        assert_eq!(node.pending_errors().count(), 0);
    }

    #[test]
    fn stalled_transport_triggers_restart() {
        struct SlowBus {
            inner: MockBus,
            clock: ManualClock,
        }
        impl MessageBus for SlowBus {
            fn is_connected(&self) -> bool {
                self.inner.is_connected()
            }
            fn sessions_established(&self) -> u32 {
                self.inner.sessions_established()
            }
            fn max_payload(&self) -> usize {
                self.inner.max_payload()
            }
            fn service(&mut self) -> bus_transport::Result<Vec<Message>> {
                self.clock.advance(10_001);
                self.inner.service()
            }
            fn publish(&mut self, topic: &str, payload: &str, retain: bool) -> bus_transport::Result<()> {
                self.inner.publish(topic, payload, retain)
            }
            fn subscribe(&mut self, filter: &str) -> bus_transport::Result<()> {
                self.inner.subscribe(filter)
            }
        }
        let clock = ManualClock::new(0);
        let mut node = Node::boot(
            NodeConfig::default(),
            SlowBus {
                inner: MockBus::new(),
                clock: clock.clone(),
            },
            MemorySettings::new(),
            FamilyRegistry::new(),
            Box::new(clock),
        );
        assert_eq!(node.step(), StepOutcome::Restart(RestartReason::ControlLoopStall));
        assert!(node.pending_errors().any(|e| e.contains("transport")));
    }
}
