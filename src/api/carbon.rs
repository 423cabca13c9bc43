//! [Carbon Intensity API](https://api.carbonintensity.org.uk/) client.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;

use crate::prelude::*;

const BASE_URL: &str = "https://api.carbonintensity.org.uk";

pub struct Api {
    client: Client,
    region_id: Option<u32>,
}

#[derive(Deserialize)]
struct Intensity {
    forecast: f64,
    actual: Option<f64>,
}

#[derive(Deserialize)]
struct IntensityPoint {
    intensity: Intensity,
}

#[derive(Deserialize)]
struct NationalResponse {
    data: Vec<IntensityPoint>,
}

#[derive(Deserialize)]
struct RegionalResponse {
    data: Vec<Region>,
}

#[derive(Deserialize)]
struct Region {
    data: Vec<IntensityPoint>,
}

impl Api {
    pub fn try_new(region_id: Option<u32>) -> Result<Self> {
        let client =
            Client::builder().user_agent("marten").timeout(Duration::from_secs(10)).build()?;
        Ok(Self { client, region_id })
    }

    /// Current grid carbon intensity, gCO₂/kWh.
    #[instrument(skip_all, fields(region_id = self.region_id))]
    pub async fn get_current(&self) -> Result<f64> {
        let point = match self.region_id {
            Some(region_id) => {
                let response: RegionalResponse = self
                    .get(&format!("{BASE_URL}/regional/regionid/{region_id}"))
                    .await?;
                response
                    .data
                    .into_iter()
                    .next()
                    .context("no regional data in the response")?
                    .data
                    .into_iter()
                    .next()
                    .context("no intensity points in the regional response")?
            }
            None => {
                let response: NationalResponse = self.get(&format!("{BASE_URL}/intensity")).await?;
                response.data.into_iter().next().context("no intensity points in the response")?
            }
        };
        Ok(point.intensity.actual.unwrap_or(point.intensity.forecast))
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        self.client
            .get(url)
            .send()
            .await
            .context("failed to call the carbon intensity endpoint")?
            .error_for_status()
            .context("the carbon intensity request failed")?
            .json()
            .await
            .context("failed to deserialize the carbon intensity")
    }
}
