use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

#[derive(Clone)]
pub struct DeviceMetrics {
    pub drivers_loaded: IntGauge,
    pub construction_failures: IntCounter,
    pub driver_faults: IntCounter,
    pub safe_mode_fanouts: IntCounter,
}

#[derive(Clone)]
pub struct MetricsHub {
    pub registry: Registry,
    pub dev: DeviceMetrics,
}

impl MetricsHub {
    pub fn new() -> Result<Self, String> {
        let registry = Registry::new();
        let drivers_loaded = IntGauge::new("hub_drivers_loaded", "Number of instantiated drivers")
            .map_err(|e| format!("metrics init error: {e}"))?;
        let construction_failures = IntCounter::new(
            "hub_driver_construction_failures_total",
            "Manifest entries that failed to instantiate",
        )
        .map_err(|e| format!("metrics init error: {e}"))?;
        let driver_faults = IntCounter::new(
            "hub_driver_faults_total",
            "Driver callbacks that returned a fault or panicked",
        )
        .map_err(|e| format!("metrics init error: {e}"))?;
        let safe_mode_fanouts = IntCounter::new(
            "hub_safe_mode_fanouts_total",
            "Times every driver was told the consumer is unavailable",
        )
        .map_err(|e| format!("metrics init error: {e}"))?;
        let dev = DeviceMetrics {
            drivers_loaded,
            construction_failures,
            driver_faults,
            safe_mode_fanouts,
        };
        let _ = registry.register(Box::new(dev.drivers_loaded.clone()));
        let _ = registry.register(Box::new(dev.construction_failures.clone()));
        let _ = registry.register(Box::new(dev.driver_faults.clone()));
        let _ = registry.register(Box::new(dev.safe_mode_fanouts.clone()));
        Ok(Self { registry, dev })
    }

    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

impl core::fmt::Debug for MetricsHub {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MetricsHub")
            .field("drivers_loaded", &self.dev.drivers_loaded.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_exposition_lists_all_series() {
        let hub = MetricsHub::new().unwrap();
        hub.dev.drivers_loaded.set(3);
        hub.dev.driver_faults.inc();
        let text = hub.encode_text();
        assert!(text.contains("hub_drivers_loaded 3"));
        assert!(text.contains("hub_driver_faults_total 1"));
        assert!(text.contains("hub_safe_mode_fanouts_total 0"));
    }
}
