use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, propagate_version = true)]
pub struct Args {
    /// Path to the settings file.
    #[clap(long, env = "MARTEN_SETTINGS", default_value = "marten.toml")]
    pub settings: PathBuf,

    /// Compute everything but skip the writes to the inverter, the switch
    /// hub, and the upload service.
    #[clap(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Compute tonight's charge target, push it to the inverter, and exit.
    #[clap(name = "nightly")]
    Nightly(Box<NightlyArgs>),

    /// Evaluate the load rules once against live telemetry, then exit.
    #[clap(name = "patrol")]
    Patrol(Box<PatrolArgs>),

    /// Scheduler loop: periodic load sequencing plus the nightly target.
    #[clap(name = "run")]
    Run(Box<RunArgs>),
}

#[derive(Parser)]
pub struct NightlyArgs {
    #[clap(flatten)]
    pub inverter: InverterApiArgs,

    #[clap(flatten)]
    pub solar: SolarApiArgs,
}

#[derive(Parser)]
pub struct PatrolArgs {
    #[clap(flatten)]
    pub inverter: InverterApiArgs,

    #[clap(flatten)]
    pub environment: EnvironmentApiArgs,
}

#[derive(Parser)]
pub struct RunArgs {
    /// Run the nightly path once and exit instead of looping.
    #[clap(long)]
    pub once: bool,

    #[clap(flatten)]
    pub inverter: InverterApiArgs,

    #[clap(flatten)]
    pub solar: SolarApiArgs,

    #[clap(flatten)]
    pub environment: EnvironmentApiArgs,

    #[clap(flatten)]
    pub upload: UploadApiArgs,
}

#[derive(Clone, Parser)]
pub struct InverterApiArgs {
    /// Inverter API base URL, including the inverter serial number.
    /// For example: `https://api.givenergy.cloud/v1/inverter/CE1234`.
    #[clap(long = "inverter-api-url", env = "INVERTER_API_URL")]
    pub base_url: String,

    #[clap(long = "inverter-api-key", env = "INVERTER_API_KEY")]
    pub api_key: String,
}

#[derive(Clone, Parser)]
pub struct SolarApiArgs {
    /// Rooftop site URLs, one per PV array; their forecasts are summed.
    #[clap(
        long = "solar-site-urls",
        env = "SOLAR_SITE_URLS",
        value_delimiter = ',',
        num_args = 1..,
    )]
    pub site_urls: Vec<String>,

    #[clap(long = "solar-api-key", env = "SOLAR_API_KEY")]
    pub api_key: String,
}

#[derive(Clone, Parser)]
pub struct EnvironmentApiArgs {
    /// Carbon-intensity region identifier; the national feed when absent.
    #[clap(long = "carbon-region-id", env = "CARBON_REGION_ID")]
    pub carbon_region_id: Option<u32>,

    #[clap(long = "weather-api-key", env = "WEATHER_API_KEY")]
    pub weather_api_key: Option<String>,

    #[clap(long = "weather-latitude", env = "WEATHER_LATITUDE", allow_hyphen_values = true)]
    pub latitude: Option<f64>,

    #[clap(long = "weather-longitude", env = "WEATHER_LONGITUDE", allow_hyphen_values = true)]
    pub longitude: Option<f64>,
}

#[derive(Clone, Parser)]
pub struct UploadApiArgs {
    #[clap(long = "pv-output-api-key", env = "PV_OUTPUT_API_KEY")]
    pub api_key: Option<String>,

    #[clap(long = "pv-output-system-id", env = "PV_OUTPUT_SYSTEM_ID")]
    pub system_id: Option<String>,
}
