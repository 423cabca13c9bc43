//! [GivEnergy Cloud](https://api.givenergy.cloud/) inverter client.

use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use reqwest::{
    Client,
    header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    core::{forecast::ConsumptionRecord, series::DayProfile},
    prelude::*,
    quantity::{energy::KilowattHours, power::Kilowatts},
    settings::ChargeWindow,
};

/// AC charge upper limit, percent.
const CHARGE_TARGET_REGISTER: u32 = 77;

/// AC charge window start.
const CHARGE_START_REGISTER: u32 = 64;

/// AC charge window end.
const CHARGE_END_REGISTER: u32 = 65;

#[derive(Clone)]
pub struct Api {
    client: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct Envelope {
    data: serde_json::Value,
}

#[derive(Clone, Copy, Debug, Deserialize)]
pub struct SystemStatus {
    pub solar: SolarStatus,
    pub battery: BatteryStatus,

    /// Household consumption, watts.
    pub consumption: f64,
}

impl SystemStatus {
    #[must_use]
    pub fn solar_power(&self) -> Kilowatts {
        Kilowatts::from_watts(self.solar.power)
    }

    #[must_use]
    pub fn load_power(&self) -> Kilowatts {
        Kilowatts::from_watts(self.consumption)
    }
}

#[derive(Clone, Copy, Debug, Deserialize)]
pub struct SolarStatus {
    /// Watts.
    pub power: f64,
}

#[derive(Clone, Copy, Debug, Deserialize)]
pub struct BatteryStatus {
    /// State of charge, percent.
    pub percent: f64,

    /// Watts, negative while charging.
    pub power: f64,
}

#[derive(Clone, Copy, Debug, Deserialize)]
pub struct BatteryDetails {
    /// Nameplate capacity, kWh.
    pub nominal_capacity: f64,
}

impl BatteryDetails {
    #[must_use]
    pub fn capacity(&self) -> KilowattHours {
        KilowattHours(self.nominal_capacity)
    }
}

impl Api {
    pub fn try_new(base_url: &str, api_key: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let mut authorization = HeaderValue::from_str(&format!("Bearer {api_key}"))?;
        authorization.set_sensitive(true);
        headers.insert(AUTHORIZATION, authorization);
        let client = Client::builder()
            .user_agent("marten")
            .default_headers(headers)
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string() })
    }

    /// Latest live readings from the inverter.
    #[instrument(skip_all)]
    pub async fn get_system_status(&self) -> Result<SystemStatus> {
        self.get("system-data/latest", &[]).await
    }

    /// Nameplate battery data.
    #[instrument(skip_all)]
    pub async fn get_battery_details(&self) -> Result<BatteryDetails> {
        self.get("battery-data/details", &[]).await
    }

    /// Half-hourly consumption for the given day, derived from the
    /// cumulative meter samples.
    #[instrument(skip_all, fields(date = %date))]
    pub async fn get_consumption(&self, date: NaiveDate) -> Result<ConsumptionRecord> {
        #[derive(Deserialize)]
        struct DataPoint {
            time: NaiveDateTime,
            today: DayTotals,
        }

        #[derive(Deserialize)]
        struct DayTotals {
            /// Cumulative consumption since midnight, kWh.
            consumption: f64,
        }

        let points: Vec<DataPoint> = self
            .get(&format!("data-points/{date}"), &[("page", "1"), ("pageSize", "2000")])
            .await?;

        // The meter reports a running daily total: per-slot energy is the
        // difference between consecutive half-hour boundary samples.
        let mut profile = DayProfile::default();
        let mut previous = 0.0;
        for point in points {
            let time = point.time.time();
            if point.time.date() != date || time.minute() % 30 != 0 {
                continue;
            }
            #[allow(clippy::cast_possible_truncation)]
            let slot = (time.hour() * 2 + time.minute() / 30) as usize;
            profile.set(slot, KilowattHours(point.today.consumption - previous));
            previous = point.today.consumption;
        }
        Ok(ConsumptionRecord { date, profile })
    }

    /// Write the charge target and the overnight window to the inverter.
    #[instrument(skip_all, fields(soc_target = target))]
    pub async fn write_charge_target(&self, target: u8, window: &ChargeWindow) -> Result {
        self.write_register(CHARGE_TARGET_REGISTER, target.to_string()).await?;
        if let Some(start) = window.start {
            self.write_register(CHARGE_START_REGISTER, start.format("%H:%M").to_string()).await?;
        }
        if let Some(end) = window.end {
            self.write_register(CHARGE_END_REGISTER, end.format("%H:%M").to_string()).await?;
        }
        Ok(())
    }

    async fn get<R: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<R> {
        let envelope: Envelope = self
            .client
            .get(format!("{}/{path}", self.base_url))
            .query(query)
            .send()
            .await
            .with_context(|| format!("failed to call `{path}`"))?
            .error_for_status()
            .with_context(|| format!("`{path}` failed"))?
            .json()
            .await
            .with_context(|| format!("failed to deserialize the `{path}` response"))?;
        debug!(data = %envelope.data, "fetched");
        serde_json::from_value(envelope.data)
            .with_context(|| format!("failed to deserialize the `{path}` payload"))
    }

    async fn write_register(&self, register: u32, value: String) -> Result {
        #[derive(Serialize)]
        struct WriteRequest {
            value: String,
        }

        #[derive(Deserialize)]
        struct WriteResponse {
            success: bool,
        }

        info!(register, value = %value, "writing…");
        let envelope: Envelope = self
            .client
            .post(format!("{}/settings/{register}/write", self.base_url))
            .json(&WriteRequest { value: value.clone() })
            .send()
            .await
            .with_context(|| format!("failed to write register {register}"))?
            .error_for_status()
            .with_context(|| format!("the register {register} write failed"))?
            .json()
            .await
            .context("failed to deserialize the write response")?;
        let response: WriteResponse = serde_json::from_value(envelope.data)
            .context("failed to deserialize the write payload")?;
        ensure!(
            response.success,
            "the inverter rejected the value `{value}` for register {register}",
        );
        Ok(())
    }
}
