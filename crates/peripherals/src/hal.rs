use crate::PulseCounter;
use device_registry::{DeviceDescriptor, DeviceIdentity, DriverConstructionError, DriverFault};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HalError {
    #[error("gpio {0} does not exist")]
    InvalidPin(i32),
    #[error("gpio {0} is already claimed in another mode")]
    PinInUse(i32),
    #[error("gpio {0} has not been claimed")]
    NotClaimed(i32),
    #[error("sensor error: {0}")]
    Sensor(String),
    #[error("hardware lock poisoned")]
    Poisoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Input,
    InputPullUp,
    Output,
}

/// Digital I/O. Pin numbers are raw gpio numbers from the manifest.
pub trait PinBank {
    fn claim(&mut self, pin: i32, mode: PinMode) -> Result<(), HalError>;

    fn release(&mut self, pin: i32);

    fn read(&mut self, pin: i32) -> Result<bool, HalError>;

    fn write(&mut self, pin: i32, level: bool) -> Result<(), HalError>;

    /// Feed edges on `pin` into `counter` from interrupt context.
    fn attach_counter(&mut self, pin: i32, counter: PulseCounter) -> Result<(), HalError>;
}

/// One-wire temperature bus.
pub trait Thermometer {
    fn sensor_count(&mut self, pin: i32) -> Result<usize, HalError>;

    /// One reading per sensor on the bus, in bus order.
    fn read_celsius(&mut self, pin: i32, resolution: u8) -> Result<Vec<f32>, HalError>;
}

pub type SharedPins = Arc<Mutex<dyn PinBank + Send>>;
pub type SharedThermometer = Arc<Mutex<dyn Thermometer + Send>>;

/// The hardware handles every driver family is built against.
#[derive(Clone)]
pub struct Hardware {
    pub pins: SharedPins,
    pub thermometer: SharedThermometer,
}

impl Hardware {
    pub fn new(pins: SharedPins, thermometer: SharedThermometer) -> Self {
        Self { pins, thermometer }
    }

    /// Fully simulated hardware; the returned handles let callers drive inputs.
    pub fn simulated() -> (
        Self,
        Arc<Mutex<SimulatedPins>>,
        Arc<Mutex<SimulatedThermometer>>,
    ) {
        let pins = Arc::new(Mutex::new(SimulatedPins::new()));
        let thermometer = Arc::new(Mutex::new(SimulatedThermometer::default()));
        let hw = Self {
            pins: pins.clone(),
            thermometer: thermometer.clone(),
        };
        (hw, pins, thermometer)
    }
}

impl core::fmt::Debug for Hardware {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("Hardware")
    }
}

pub(crate) fn lock<T: ?Sized>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>, HalError> {
    m.lock().map_err(|_| HalError::Poisoned)
}

/// A claimed pin, released again when the driver is dropped.
pub struct PinClaim {
    pins: SharedPins,
    gpio: i32,
}

impl PinClaim {
    /// Claim the descriptor's pin `name`, mapping failures to construction errors.
    pub fn acquire(
        pins: &SharedPins,
        desc: &DeviceDescriptor,
        name: &str,
        mode: PinMode,
    ) -> Result<Self, DriverConstructionError> {
        let gpio = desc.require_pin(name)?;
        let result = lock(pins).and_then(|mut bank| bank.claim(gpio, mode));
        match result {
            Ok(()) => Ok(Self {
                pins: pins.clone(),
                gpio,
            }),
            Err(HalError::InvalidPin(_)) => Err(DriverConstructionError::InvalidPin {
                identity: desc.identity(),
                pin: name.to_string(),
                gpio,
            }),
            Err(e) => Err(construction_error(desc, e)),
        }
    }

    pub fn gpio(&self) -> i32 {
        self.gpio
    }

    pub fn read(&self, identity: &DeviceIdentity) -> Result<bool, DriverFault> {
        lock(&self.pins)
            .and_then(|mut bank| bank.read(self.gpio))
            .map_err(|e| DriverFault::new(identity, e.to_string()))
    }

    pub fn write(&self, identity: &DeviceIdentity, level: bool) -> Result<(), DriverFault> {
        lock(&self.pins)
            .and_then(|mut bank| bank.write(self.gpio, level))
            .map_err(|e| DriverFault::new(identity, e.to_string()))
    }

    pub fn attach_counter(&self, counter: PulseCounter) -> Result<(), HalError> {
        lock(&self.pins)?.attach_counter(self.gpio, counter)
    }
}

impl Drop for PinClaim {
    fn drop(&mut self) {
        if let Ok(mut bank) = self.pins.lock() {
            bank.release(self.gpio);
        }
    }
}

impl core::fmt::Debug for PinClaim {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("PinClaim").field(&self.gpio).finish()
    }
}

pub(crate) fn construction_error(desc: &DeviceDescriptor, e: HalError) -> DriverConstructionError {
    DriverConstructionError::Hardware {
        identity: desc.identity(),
        reason: e.to_string(),
    }
}

/// Highest gpio number on the simulated board.
pub const SIMULATED_MAX_GPIO: i32 = 39;

#[derive(Debug, Default)]
pub struct SimulatedPins {
    claims: BTreeMap<i32, (PinMode, usize)>,
    levels: BTreeMap<i32, bool>,
    counters: BTreeMap<i32, PulseCounter>,
}

impl SimulatedPins {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drive an input as the outside world would.
    pub fn set_input(&mut self, pin: i32, level: bool) {
        self.levels.insert(pin, level);
    }

    /// Current level of a pin (outputs included).
    pub fn level(&self, pin: i32) -> bool {
        self.levels.get(&pin).copied().unwrap_or(false)
    }

    pub fn is_claimed(&self, pin: i32) -> bool {
        self.claims.contains_key(&pin)
    }

    /// Simulate one edge on `pin` at `now_ms`.
    pub fn pulse(&mut self, pin: i32, now_ms: u64) {
        if let Some(counter) = self.counters.get(&pin) {
            counter.record_edge(now_ms);
        }
    }

    fn check(pin: i32) -> Result<(), HalError> {
        if (0..=SIMULATED_MAX_GPIO).contains(&pin) {
            Ok(())
        } else {
            Err(HalError::InvalidPin(pin))
        }
    }
}

impl PinBank for SimulatedPins {
    fn claim(&mut self, pin: i32, mode: PinMode) -> Result<(), HalError> {
        Self::check(pin)?;
        match self.claims.get_mut(&pin) {
            Some((existing, users)) if *existing == mode => {
                *users += 1;
                Ok(())
            }
            Some(_) => Err(HalError::PinInUse(pin)),
            None => {
                self.claims.insert(pin, (mode, 1));
                if mode == PinMode::InputPullUp {
                    self.levels.entry(pin).or_insert(true);
                }
                Ok(())
            }
        }
    }

    fn release(&mut self, pin: i32) {
        if let Some((_, users)) = self.claims.get_mut(&pin) {
            *users -= 1;
            if *users == 0 {
                self.claims.remove(&pin);
                self.counters.remove(&pin);
            }
        }
    }

    fn read(&mut self, pin: i32) -> Result<bool, HalError> {
        Self::check(pin)?;
        if !self.claims.contains_key(&pin) {
            return Err(HalError::NotClaimed(pin));
        }
        Ok(self.level(pin))
    }

    fn write(&mut self, pin: i32, level: bool) -> Result<(), HalError> {
        Self::check(pin)?;
        match self.claims.get(&pin) {
            Some((PinMode::Output, _)) => {
                self.levels.insert(pin, level);
                Ok(())
            }
            Some(_) => Err(HalError::PinInUse(pin)),
            None => Err(HalError::NotClaimed(pin)),
        }
    }

    fn attach_counter(&mut self, pin: i32, counter: PulseCounter) -> Result<(), HalError> {
        Self::check(pin)?;
        if !self.claims.contains_key(&pin) {
            return Err(HalError::NotClaimed(pin));
        }
        self.counters.insert(pin, counter);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct SimulatedThermometer {
    readings: BTreeMap<i32, Vec<f32>>,
    failing: bool,
}

impl SimulatedThermometer {
    pub fn set_readings(&mut self, pin: i32, celsius: Vec<f32>) {
        self.readings.insert(pin, celsius);
    }

    pub fn set_failing(&mut self, failing: bool) {
        self.failing = failing;
    }
}

impl Thermometer for SimulatedThermometer {
    fn sensor_count(&mut self, pin: i32) -> Result<usize, HalError> {
        SimulatedPins::check(pin)?;
        Ok(self.readings.get(&pin).map_or(0, Vec::len))
    }

    fn read_celsius(&mut self, pin: i32, resolution: u8) -> Result<Vec<f32>, HalError> {
        if self.failing {
            return Err(HalError::Sensor(format!("no response on gpio {pin}")));
        }
        // Quantize like the sensor does: 9 bits = 0.5 C steps, 12 bits = 0.0625 C.
        let step = 0.5 / f32::from(1u8 << resolution.saturating_sub(9).min(3));
        Ok(self
            .readings
            .get(&pin)
            .map(|r| r.iter().map(|c| (c / step).round() * step).collect())
            .unwrap_or_default())
    }
}
