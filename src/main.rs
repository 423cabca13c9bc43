mod api;
mod cli;
mod core;
mod dispatch;
mod fmt;
mod prelude;
mod quantity;
mod settings;
mod tables;

use std::{collections::HashMap, time::Duration};

use chrono::{DateTime, Days, Local, NaiveDate, NaiveTime, Timelike};
use clap::Parser;
use tokio::time::{self, MissedTickBehavior};
use tracing_subscriber::EnvFilter;

use crate::{
    api::{inverter, pvoutput, solcast},
    cli::{Args, Command, EnvironmentApiArgs, NightlyArgs, PatrolArgs, RunArgs, UploadApiArgs},
    core::{
        forecast::{GenerationForecast, PowerPoint, consumption_baseline},
        sequencer::{LoadState, Sequencer},
        soc::{SocCalculator, SocPlan},
        telemetry::TelemetrySnapshot,
    },
    dispatch::{Dispatcher, SwitchRoster},
    prelude::*,
    settings::Settings,
    tables::build_plan_table,
};

/// Stand-in readings until the first successful environment fetch.
const DEFAULT_CARBON_INTENSITY: f64 = 200.0;
const DEFAULT_TEMPERATURE: f64 = 15.0;

#[tokio::main]
async fn main() -> Result {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let settings = Settings::load(&args.settings)?;

    match args.command {
        Command::Nightly(command) => nightly(&settings, &command, args.dry_run).await,
        Command::Patrol(command) => patrol(&settings, &command, args.dry_run).await,
        Command::Run(command) => run(&settings, &command, args.dry_run).await,
    }
}

/// The nightly path: history and forecasts in, one charge target out.
async fn nightly(settings: &Settings, command: &NightlyArgs, dry_run: bool) -> Result {
    let inverter = inverter::Api::try_new(&command.inverter.base_url, &command.inverter.api_key)?;
    let solar =
        solcast::Api::try_new(command.solar.site_urls.clone(), command.solar.api_key.clone())?;
    let dispatcher = Dispatcher::new(
        inverter.clone(),
        SwitchRoster::try_new(&settings.loads)?,
        settings.dispatch.clone(),
        dry_run,
    );
    nightly_cycle(settings, &inverter, &solar, &dispatcher).await
}

async fn nightly_cycle(
    settings: &Settings,
    inverter: &inverter::Api,
    solar: &solcast::Api,
    dispatcher: &Dispatcher<inverter::Api, SwitchRoster>,
) -> Result {
    let now = Local::now();
    let date = next_charge_date(now, settings.battery.charge_window.start);
    let plan = compute_plan(settings, inverter, solar, now, date).await?;
    info!(soc_target = plan.target, source = ?plan.source, "nightly plan ready");
    println!("{}", build_plan_table(&plan, settings.battery.min_soc));
    dispatcher.dispatch_plan(&plan, &settings.battery.charge_window).await
}

async fn compute_plan(
    settings: &Settings,
    inverter: &inverter::Api,
    solar: &solcast::Api,
    now: DateTime<Local>,
    date: NaiveDate,
) -> Result<SocPlan> {
    // Consumption history, newest complete day first. Today only counts once
    // the evening is mostly over; a missing day is skipped, and the baseline
    // falls back to a flat curve when nothing is left at all.
    let today = now.date_naive();
    let newest_back: u64 = if now.time().hour() >= 21 { 0 } else { 1 };
    let mut history = Vec::new();
    for days_back in 0..settings.forecast.history_days as u64 {
        let day = today - Days::new(newest_back + days_back);
        match inverter.get_consumption(day).await {
            Ok(record) => history.push(record),
            Err(error) => warn!(%day, "skipping a history day: {error:#}"),
        }
    }
    let baseline = consumption_baseline(
        &history,
        settings.forecast.history_days,
        settings.forecast.default_consumption,
    );
    info!(source = ?baseline.source, "consumption baseline ready");

    let points = match solar.get_forecast().await {
        Ok(points) => points,
        Err(error) => {
            warn!("solar forecast unavailable: {error:#}");
            Vec::new()
        }
    };
    let tonight = build_forecast(date, &points, settings.forecast.weight);
    let overmorrow = build_forecast(date + Days::new(1), &points, settings.forecast.weight);

    let status = inverter.get_system_status().await.context("no inverter telemetry")?;
    let capacity = match settings.battery.capacity {
        Some(capacity) => capacity,
        None => inverter.get_battery_details().await?.capacity(),
    };

    Ok(SocCalculator::builder()
        .maybe_tonight(tonight.as_ref())
        .maybe_overmorrow(overmorrow.as_ref())
        .baseline(&baseline.profile)
        .current_soc(status.battery.percent)
        .capacity(capacity * settings.battery.utilisation)
        .settings(&settings.battery)
        .date(date)
        .build()
        .compute())
}

fn build_forecast(
    date: NaiveDate,
    points: &[PowerPoint],
    weight: f64,
) -> Option<GenerationForecast> {
    match GenerationForecast::build(date, points, weight) {
        Ok(forecast) => Some(forecast),
        Err(error) => {
            warn!(%date, "no usable forecast: {error:#}");
            None
        }
    }
}

/// The day the next overnight charge period starts on: that is the day the
/// plan applies to.
fn next_charge_date(now: DateTime<Local>, window_start: Option<NaiveTime>) -> NaiveDate {
    let start = window_start.unwrap_or(NaiveTime::MIN);
    if now.time() <= start { now.date_naive() } else { now.date_naive() + Days::new(1) }
}

/// One sequencer cycle against live telemetry.
async fn patrol(settings: &Settings, command: &PatrolArgs, dry_run: bool) -> Result {
    let rules = settings.rule_set()?;
    info!(n_rules = rules.len(), "rules validated");
    let inverter = inverter::Api::try_new(&command.inverter.base_url, &command.inverter.api_key)?;
    let dispatcher = Dispatcher::new(
        inverter.clone(),
        SwitchRoster::try_new(&settings.loads)?,
        settings.dispatch.clone(),
        dry_run,
    );
    let mut environment = Environment::try_new(&command.environment)?;
    let sequencer = Sequencer::new(rules);

    let snapshot = capture_snapshot(&inverter, &mut environment).await?;
    let mut states = HashMap::new();
    let transitions = sequencer.evaluate(&snapshot, &mut states);
    info!(n_transitions = transitions.len(), "evaluated");
    dispatcher.dispatch_transitions(&transitions).await
}

/// The scheduler loop: load sequencing every cycle, the nightly charge
/// target once a day just before the charge window opens.
async fn run(settings: &Settings, command: &RunArgs, dry_run: bool) -> Result {
    let inverter = inverter::Api::try_new(&command.inverter.base_url, &command.inverter.api_key)?;
    let solar =
        solcast::Api::try_new(command.solar.site_urls.clone(), command.solar.api_key.clone())?;
    let dispatcher = Dispatcher::new(
        inverter.clone(),
        SwitchRoster::try_new(&settings.loads)?,
        settings.dispatch.clone(),
        dry_run,
    );

    if command.once {
        nightly_cycle(settings, &inverter, &solar, &dispatcher).await?;
        info!("once mode complete");
        return Ok(());
    }

    let rules = settings.rule_set()?;
    info!(n_rules = rules.len(), "rules validated");
    let sequencer = Sequencer::new(rules);
    let mut environment = Environment::try_new(&command.environment)?;
    let upload = build_upload(&command.upload)?;

    let mut states: HashMap<String, LoadState> = HashMap::new();
    let mut last_plan_date: Option<NaiveDate> = None;

    let mut interval =
        time::interval(Duration::from_secs(settings.sequencer.interval_minutes * 60));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        let now = Local::now();

        let plan_date = next_charge_date(now, settings.battery.charge_window.start);
        if nightly_due(settings, now, plan_date, last_plan_date) {
            match compute_plan(settings, &inverter, &solar, now, plan_date).await {
                Ok(plan) => {
                    println!("{}", build_plan_table(&plan, settings.battery.min_soc));
                    if let Err(error) =
                        dispatcher.dispatch_plan(&plan, &settings.battery.charge_window).await
                    {
                        error!("failed to push the charge target: {error:#}");
                    }
                    last_plan_date = Some(plan.date);
                }
                Err(error) => error!("nightly computation failed: {error:#}"),
            }
        }

        let snapshot = match capture_snapshot(&inverter, &mut environment).await {
            Ok(snapshot) => snapshot,
            Err(error) => {
                // Hold all prior load states rather than guessing.
                warn!("skipping the cycle: {error:#}");
                continue;
            }
        };

        let transitions = sequencer.evaluate(&snapshot, &mut states);
        if !transitions.is_empty() {
            if let Err(error) = dispatcher.dispatch_transitions(&transitions).await {
                error!("load dispatch incomplete: {error:#}");
            }
        }

        if let Some(upload) = &upload {
            if dry_run {
                debug!("dry run, skipping the status upload");
            } else if let Err(error) = upload.add_status(&status_upload(&snapshot)).await {
                warn!("status upload failed: {error:#}");
            }
        }
    }
}

/// The nightly computation is due in the lead window just before the next
/// charge period starts, once per day.
fn nightly_due(
    settings: &Settings,
    now: DateTime<Local>,
    plan_date: NaiveDate,
    last_plan_date: Option<NaiveDate>,
) -> bool {
    if last_plan_date == Some(plan_date) {
        return false;
    }
    let start = settings.battery.charge_window.start.unwrap_or(NaiveTime::MIN);
    let lead_minutes = i64::try_from(settings.sequencer.interval_minutes).unwrap_or(5).max(5);
    let until = (minutes_of(start) - minutes_of(now.time())).rem_euclid(24 * 60);
    until <= lead_minutes
}

fn minutes_of(time: NaiveTime) -> i64 {
    i64::from(time.hour()) * 60 + i64::from(time.minute())
}

/// Environmental collaborators plus the last known readings: a failed fetch
/// holds the previous value instead of guessing.
struct Environment {
    carbon: api::carbon::Api,
    weather: Option<api::weather::Api>,
    last_carbon: f64,
    last_temperature: f64,
}

impl Environment {
    fn try_new(args: &EnvironmentApiArgs) -> Result<Self> {
        let weather = match (&args.weather_api_key, args.latitude, args.longitude) {
            (Some(api_key), Some(latitude), Some(longitude)) => {
                Some(api::weather::Api::try_new(api_key.clone(), latitude, longitude)?)
            }
            (None, _, _) => None,
            _ => bail!("the weather API needs a key, a latitude, and a longitude"),
        };
        Ok(Self {
            carbon: api::carbon::Api::try_new(args.carbon_region_id)?,
            weather,
            last_carbon: DEFAULT_CARBON_INTENSITY,
            last_temperature: DEFAULT_TEMPERATURE,
        })
    }

    async fn carbon_intensity(&mut self) -> f64 {
        match self.carbon.get_current().await {
            Ok(value) => {
                self.last_carbon = value;
                value
            }
            Err(error) => {
                warn!("carbon intensity unavailable, holding the last value: {error:#}");
                self.last_carbon
            }
        }
    }

    async fn temperature(&mut self) -> f64 {
        let Some(weather) = &self.weather else {
            return self.last_temperature;
        };
        match weather.get_current_temperature().await {
            Ok(value) => {
                self.last_temperature = value;
                value
            }
            Err(error) => {
                warn!("weather unavailable, holding the last value: {error:#}");
                self.last_temperature
            }
        }
    }
}

async fn capture_snapshot(
    inverter: &inverter::Api,
    environment: &mut Environment,
) -> Result<TelemetrySnapshot> {
    let status = inverter.get_system_status().await.context("no inverter telemetry")?;
    Ok(TelemetrySnapshot {
        timestamp: Local::now(),
        battery_soc: status.battery.percent,
        temperature: environment.temperature().await,
        carbon_intensity: environment.carbon_intensity().await,
        solar_power: status.solar_power(),
        load_power: status.load_power(),
    })
}

fn build_upload(args: &UploadApiArgs) -> Result<Option<pvoutput::Api>> {
    match (&args.api_key, &args.system_id) {
        (Some(api_key), Some(system_id)) => {
            Ok(Some(pvoutput::Api::try_new(api_key.clone(), system_id.clone())?))
        }
        (None, None) => Ok(None),
        _ => bail!("both the PVOutput API key and system identifier are required"),
    }
}

fn status_upload(snapshot: &TelemetrySnapshot) -> pvoutput::StatusUpload {
    pvoutput::StatusUpload {
        timestamp: snapshot.timestamp,
        generating_power: snapshot.solar_power,
        consuming_power: snapshot.load_power,
        temperature: snapshot.temperature,
        carbon_intensity: snapshot.carbon_intensity,
        battery_soc: snapshot.battery_soc,
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(hour: u32, minute: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 6, 2, hour, minute, 0).unwrap()
    }

    #[test]
    fn next_charge_date_rolls_past_the_window_start() {
        let start = NaiveTime::from_hms_opt(0, 37, 0);
        assert_eq!(
            next_charge_date(at(0, 20), start),
            NaiveDate::from_ymd_opt(2024, 6, 2).unwrap(),
        );
        assert_eq!(
            next_charge_date(at(23, 0), start),
            NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(),
        );
    }

    #[test]
    fn nightly_is_due_only_in_the_lead_window_and_once() {
        let mut settings = Settings::default();
        settings.battery.charge_window.start = NaiveTime::from_hms_opt(0, 37, 0);

        let now = at(0, 35);
        let plan_date = next_charge_date(now, settings.battery.charge_window.start);
        assert!(nightly_due(&settings, now, plan_date, None));
        // Already planned for that date: not due again.
        assert!(!nightly_due(&settings, now, plan_date, Some(plan_date)));
        // Middle of the day: out of the lead window.
        let noon = at(12, 0);
        let noon_date = next_charge_date(noon, settings.battery.charge_window.start);
        assert!(!nightly_due(&settings, noon, noon_date, None));
    }
}
