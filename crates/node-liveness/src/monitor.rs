use crate::{AckLedMode, DayMode, LivenessConfig, LivenessState, Millis};

/// What one liveness evaluation asks the control loop to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LivenessTick {
    /// Counter of the heartbeat that is due now.
    pub heartbeat_due: Option<u64>,
    /// Set exactly once per falling edge of consumer availability.
    pub consumer_lost: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Empty payload; not an acknowledgement.
    Ignored,
    Accepted,
    /// Accepted, and the consumer was unavailable until now.
    Recovered,
}

/// Consumer liveness state machine.
///
/// The consumer is declared unavailable when no acknowledgement arrived for
/// more than two heartbeat intervals. Timestamps are supplied by the caller so
/// the machine runs the same under a simulated clock.
#[derive(Debug, Clone)]
pub struct LivenessMonitor {
    state: LivenessState,
    ack_led_mode: AckLedMode,
    pending: Option<LivenessConfig>,
    day_mode: DayMode,
    indicator_lit: bool,
    alive_counter: u64,
}

impl LivenessMonitor {
    /// `boot_at` counts as the last acknowledgement, so a silent consumer is
    /// detected two intervals after boot.
    pub fn new(config: LivenessConfig, boot_at: Millis) -> Self {
        Self {
            state: LivenessState {
                transport_connected: false,
                last_heartbeat_sent_at: None,
                last_ack_received_at: boot_at,
                heartbeat_interval_ms: config.heartbeat_interval_ms,
                consumer_available: true,
            },
            ack_led_mode: config.ack_led_mode,
            pending: None,
            day_mode: DayMode::Unknown,
            indicator_lit: false,
            alive_counter: 0,
        }
    }

    pub fn state(&self) -> &LivenessState {
        &self.state
    }

    pub fn consumer_available(&self) -> bool {
        self.state.consumer_available
    }

    pub fn config(&self) -> LivenessConfig {
        LivenessConfig {
            heartbeat_interval_ms: self.state.heartbeat_interval_ms,
            ack_led_mode: self.ack_led_mode,
        }
    }

    pub fn pending_config(&self) -> Option<LivenessConfig> {
        self.pending
    }

    pub fn alive_counter(&self) -> u64 {
        self.alive_counter
    }

    pub fn day_mode(&self) -> DayMode {
        self.day_mode
    }

    pub fn set_day_mode(&mut self, day_mode: DayMode) {
        if self.day_mode != day_mode {
            tracing::debug!(?day_mode, "day mode changed");
        }
        self.day_mode = day_mode;
    }

    pub fn indicator_lit(&self) -> bool {
        self.indicator_lit
    }

    /// Called at the start of every loop iteration, so an acknowledgement shows
    /// as a single blink.
    pub fn clear_indicator(&mut self) {
        self.indicator_lit = false;
    }

    /// Queue a new interval and indicator mode. They apply when the next
    /// heartbeat goes out.
    pub fn apply_config(&mut self, config: LivenessConfig) -> Result<(), String> {
        config.validate()?;
        tracing::info!(
            interval_ms = config.heartbeat_interval_ms,
            mode = ?config.ack_led_mode,
            "liveness config queued for next heartbeat"
        );
        self.pending = Some(config);
        Ok(())
    }

    /// Evaluate liveness at `now`. Consumer timeout is checked even while the
    /// transport is down; heartbeats are only scheduled while it is up.
    pub fn poll(&mut self, now: Millis, transport_connected: bool) -> LivenessTick {
        self.state.transport_connected = transport_connected;
        let mut tick = LivenessTick::default();

        let silence = now.saturating_sub(self.state.last_ack_received_at);
        if self.state.consumer_available
            && silence > self.state.heartbeat_interval_ms.saturating_mul(2)
        {
            self.state.consumer_available = false;
            tick.consumer_lost = true;
            tracing::warn!(silence_ms = silence, "consumer stopped acknowledging heartbeats");
        }

        if transport_connected && self.heartbeat_due(now) {
            tick.heartbeat_due = Some(self.record_heartbeat(now));
        }
        tick
    }

    /// Emit a heartbeat outside the regular schedule (e.g. on request).
    pub fn force_heartbeat(&mut self, now: Millis) -> u64 {
        self.record_heartbeat(now)
    }

    pub fn on_ack(&mut self, payload: &str, now: Millis) -> AckOutcome {
        let payload = payload.trim();
        if payload.is_empty() {
            return AckOutcome::Ignored;
        }
        self.state.last_ack_received_at = now;
        if payload != "0" && self.ack_led_mode.lights_for(self.day_mode) {
            self.indicator_lit = true;
        }
        if self.state.consumer_available {
            AckOutcome::Accepted
        } else {
            self.state.consumer_available = true;
            tracing::info!("consumer acknowledged again");
            AckOutcome::Recovered
        }
    }

    fn heartbeat_due(&self, now: Millis) -> bool {
        match self.state.last_heartbeat_sent_at {
            None => true,
            Some(sent) => now.saturating_sub(sent) >= self.state.heartbeat_interval_ms,
        }
    }

    fn record_heartbeat(&mut self, now: Millis) -> u64 {
        if let Some(cfg) = self.pending.take() {
            self.state.heartbeat_interval_ms = cfg.heartbeat_interval_ms;
            self.ack_led_mode = cfg.ack_led_mode;
        }
        self.alive_counter += 1;
        self.state.last_heartbeat_sent_at = Some(now);
        self.alive_counter
    }
}
