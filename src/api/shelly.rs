//! Shelly Gen2 switch module client.

use std::time::Duration;

use reqwest::Client;

use crate::prelude::*;

pub struct Switch {
    client: Client,
    base_url: String,
}

impl Switch {
    pub fn try_new(base_url: &str) -> Result<Self> {
        let client =
            Client::builder().user_agent("marten").timeout(Duration::from_secs(5)).build()?;
        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string() })
    }

    /// Drive the relay. The module treats a repeated state as a no-op.
    #[instrument(skip_all, fields(base_url = %self.base_url, on = on))]
    pub async fn set(&self, on: bool) -> Result {
        self.client
            .get(format!("{}/rpc/Switch.Set", self.base_url))
            .query(&[("id", "0"), ("on", if on { "true" } else { "false" })])
            .send()
            .await
            .context("failed to call the switch")?
            .error_for_status()
            .context("the switch refused the command")?;
        Ok(())
    }
}
