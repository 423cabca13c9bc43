//! [OpenWeatherMap](https://openweathermap.org/current) client.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;

use crate::prelude::*;

pub struct Api {
    client: Client,
    api_key: String,
    latitude: f64,
    longitude: f64,
}

impl Api {
    pub fn try_new(api_key: String, latitude: f64, longitude: f64) -> Result<Self> {
        let client =
            Client::builder().user_agent("marten").timeout(Duration::from_secs(10)).build()?;
        Ok(Self { client, api_key, latitude, longitude })
    }

    /// Current outdoor temperature, °C.
    #[instrument(skip_all)]
    pub async fn get_current_temperature(&self) -> Result<f64> {
        #[derive(Deserialize)]
        struct WeatherResponse {
            main: Main,
        }

        #[derive(Deserialize)]
        struct Main {
            temp: f64,
        }

        let response: WeatherResponse = self
            .client
            .get("https://api.openweathermap.org/data/2.5/weather")
            .query(&[
                ("lat", self.latitude.to_string()),
                ("lon", self.longitude.to_string()),
                ("appid", self.api_key.clone()),
                ("units", "metric".to_string()),
            ])
            .send()
            .await
            .context("failed to call the weather endpoint")?
            .error_for_status()
            .context("the weather request failed")?
            .json()
            .await
            .context("failed to deserialize the weather")?;
        Ok(response.main.temp)
    }
}
