//! [PVOutput](https://pvoutput.org/) status upload sink.
//!
//! Pure output: nothing here feeds back into the computation.

use std::time::Duration;

use chrono::{DateTime, Local};
use reqwest::Client;

use crate::{prelude::*, quantity::power::Kilowatts};

pub struct Api {
    client: Client,
    api_key: String,
    system_id: String,
}

/// One live status record.
#[derive(Clone, Copy, Debug)]
pub struct StatusUpload {
    pub timestamp: DateTime<Local>,
    pub generating_power: Kilowatts,
    pub consuming_power: Kilowatts,
    pub temperature: f64,
    pub carbon_intensity: f64,
    pub battery_soc: f64,
}

impl Api {
    pub fn try_new(api_key: String, system_id: String) -> Result<Self> {
        let client =
            Client::builder().user_agent("marten").timeout(Duration::from_secs(10)).build()?;
        Ok(Self { client, api_key, system_id })
    }

    #[instrument(skip_all, fields(timestamp = %status.timestamp))]
    pub async fn add_status(&self, status: &StatusUpload) -> Result {
        self.client
            .get("https://pvoutput.org/service/r2/addstatus.jsp")
            .header("X-Pvoutput-Apikey", self.api_key.as_str())
            .header("X-Pvoutput-SystemId", self.system_id.as_str())
            .query(&[
                ("d", status.timestamp.format("%Y%m%d").to_string()),
                ("t", status.timestamp.format("%H:%M").to_string()),
                ("v2", format!("{:.0}", status.generating_power.0 * 1000.0)),
                ("v4", format!("{:.0}", status.consuming_power.0 * 1000.0)),
                ("v5", format!("{:.1}", status.temperature)),
                ("v9", format!("{:.0}", status.carbon_intensity)),
                ("v12", format!("{:.0}", status.battery_soc)),
            ])
            .send()
            .await
            .context("failed to call the status endpoint")?
            .error_for_status()
            .context("the status upload failed")?;
        Ok(())
    }
}
