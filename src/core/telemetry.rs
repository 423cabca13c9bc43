use chrono::{DateTime, Local};

use crate::quantity::power::Kilowatts;

/// Immutable bundle of live readings for one evaluation cycle.
#[derive(Clone, Copy, Debug)]
pub struct TelemetrySnapshot {
    pub timestamp: DateTime<Local>,

    /// Battery state of charge, percent.
    pub battery_soc: f64,

    /// Outdoor temperature, °C.
    pub temperature: f64,

    /// Grid carbon intensity, gCO₂/kWh.
    pub carbon_intensity: f64,

    pub solar_power: Kilowatts,

    /// Household consumption.
    pub load_power: Kilowatts,
}
