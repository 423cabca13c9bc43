//! [Solcast](https://solcast.com/) rooftop forecast client.

use std::{collections::BTreeMap, time::Duration};

use chrono::{DateTime, Local};
use reqwest::Client;
use serde::Deserialize;

use crate::{core::forecast::PowerPoint, prelude::*, quantity::power::Kilowatts};

pub struct Api {
    client: Client,
    site_urls: Vec<String>,
    api_key: String,
}

impl Api {
    pub fn try_new(site_urls: Vec<String>, api_key: String) -> Result<Self> {
        ensure!(!site_urls.is_empty(), "at least one rooftop site URL is required");
        let client =
            Client::builder().user_agent("marten").timeout(Duration::from_secs(10)).build()?;
        Ok(Self { client, site_urls, api_key })
    }

    /// Forecast points for all configured arrays, summed per timestamp.
    #[instrument(skip_all)]
    pub async fn get_forecast(&self) -> Result<Vec<PowerPoint>> {
        let mut combined = Vec::new();
        for site_url in &self.site_urls {
            let points = self.get_site_forecast(site_url).await?;
            combined = merge(combined, points);
        }
        info!(n_points = combined.len(), "fetched");
        Ok(combined)
    }

    #[instrument(skip_all, fields(site_url = site_url))]
    async fn get_site_forecast(&self, site_url: &str) -> Result<Vec<PowerPoint>> {
        #[derive(Deserialize)]
        struct ForecastsResponse {
            forecasts: Vec<Forecast>,
        }

        #[derive(Deserialize)]
        struct Forecast {
            period_end: DateTime<Local>,

            /// Average expected power over the period, kilowatts.
            pv_estimate: f64,
        }

        let response: ForecastsResponse = self
            .client
            .get(format!("{}/forecasts", site_url.trim_end_matches('/')))
            .query(&[("format", "json"), ("api_key", self.api_key.as_str())])
            .send()
            .await
            .context("failed to call the forecast endpoint")?
            .error_for_status()
            .context("the forecast request failed")?
            .json()
            .await
            .context("failed to deserialize the forecast")?;
        ensure!(!response.forecasts.is_empty(), "the forecast came back empty");
        Ok(response
            .forecasts
            .into_iter()
            .map(|forecast| PowerPoint {
                time: forecast.period_end,
                power: Kilowatts(forecast.pv_estimate),
            })
            .collect())
    }
}

/// Sum two point series on their shared timestamps, e.g. two PV arrays.
fn merge(lhs: Vec<PowerPoint>, rhs: Vec<PowerPoint>) -> Vec<PowerPoint> {
    if lhs.is_empty() {
        return rhs;
    }
    let mut by_time: BTreeMap<DateTime<Local>, Kilowatts> = BTreeMap::new();
    for point in lhs.into_iter().chain(rhs) {
        let power = by_time.entry(point.time).or_insert(Kilowatts::ZERO);
        *power += point.power;
    }
    by_time.into_iter().map(|(time, power)| PowerPoint { time, power }).collect()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn point(hour: u32, power: f64) -> PowerPoint {
        PowerPoint {
            time: Local.with_ymd_and_hms(2024, 6, 2, hour, 0, 0).unwrap(),
            power: Kilowatts(power),
        }
    }

    #[test]
    fn merge_sums_aligned_points() {
        let merged = merge(vec![point(10, 1.0), point(11, 2.0)], vec![point(10, 0.5)]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].power, Kilowatts(1.5));
        assert_eq!(merged[1].power, Kilowatts(2.0));
    }

    #[test]
    fn merge_with_an_empty_series_is_identity() {
        let merged = merge(Vec::new(), vec![point(10, 1.0)]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].power, Kilowatts(1.0));
    }
}
