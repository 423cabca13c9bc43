use std::{fs, path::Path};

use chrono::NaiveTime;
use serde::Deserialize;

use crate::{
    core::sequencer::{Rule, RuleSet},
    fmt,
    prelude::*,
    quantity::energy::KilowattHours,
};

/// Immutable run configuration, loaded once at startup and passed by
/// reference into the core components. Credentials and endpoints come from
/// the command line and environment instead.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub forecast: ForecastSettings,
    pub battery: BatterySettings,
    pub sequencer: SequencerSettings,
    pub dispatch: DispatchSettings,
    pub loads: Vec<LoadSettings>,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read the settings from `{}`", path.display()))?;
        let settings: Self = toml::from_str(&text)
            .with_context(|| format!("failed to parse the settings from `{}`", path.display()))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result {
        ensure!(
            (0.0..=1.0).contains(&self.forecast.weight),
            "the forecast weight must be within [0, 1]",
        );
        ensure!(self.forecast.history_days >= 1, "the history window must cover at least one day");
        ensure!(self.battery.min_soc <= self.battery.max_soc, "the minimum SoC exceeds the maximum");
        ensure!(self.battery.max_soc <= 100, "the maximum SoC exceeds 100");
        if let Some(capacity) = self.battery.capacity {
            ensure!(capacity.0 > 0.0, "the battery capacity must be positive");
        }
        ensure!(
            (0.0..=1.0).contains(&self.battery.utilisation),
            "the battery utilisation must be within [0, 1]",
        );
        ensure!(self.sequencer.interval_minutes >= 1, "the sequencer interval must be non-zero");
        Ok(())
    }

    /// Validate and order the configured rules.
    ///
    /// Separate from [`Settings::load`] on purpose: a malformed rule list is
    /// fatal for the sequencer paths only, the nightly path runs regardless.
    pub fn rule_set(&self) -> Result<RuleSet> {
        let rules = RuleSet::try_new(self.sequencer.rules.clone())?;
        for rule in rules.iter() {
            ensure!(
                self.loads.iter().any(|load| load.id == rule.load),
                "rule at priority {} names unknown load `{}`",
                rule.priority,
                rule.load,
            );
        }
        Ok(rules)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ForecastSettings {
    /// Multiplicative derating of the provider forecast.
    pub weight: f64,

    /// Trailing window for the consumption baseline, days.
    pub history_days: usize,

    /// Per-slot consumption when no history is available, kWh.
    pub default_consumption: KilowattHours,
}

impl Default for ForecastSettings {
    fn default() -> Self {
        Self { weight: 0.35, history_days: 7, default_consumption: KilowattHours(0.2) }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatterySettings {
    /// Reserve floor, percent.
    pub min_soc: u8,

    /// Charge ceiling, percent.
    pub max_soc: u8,

    /// Extra points of charge on top of a projected shortfall.
    pub safety_margin: u8,

    /// How many points worse the overmorrow minimum must project before
    /// tonight's target is raised for it.
    pub overmorrow_threshold: u8,

    /// Target when no usable forecast exists.
    pub fallback_target: u8,

    /// Nominal capacity override; read from the inverter when absent.
    pub capacity: Option<KilowattHours>,

    /// Proportion of the nominal capacity that is actually usable.
    pub utilisation: f64,

    /// Months where the target is pinned to `max_soc`.
    pub winter_months: Vec<u32>,

    /// Months where the reserve floor is raised to `shoulder_min_soc`.
    pub shoulder_months: Vec<u32>,

    pub shoulder_min_soc: u8,

    pub charge_window: ChargeWindow,
}

impl Default for BatterySettings {
    fn default() -> Self {
        Self {
            min_soc: 20,
            max_soc: 100,
            safety_margin: 5,
            overmorrow_threshold: 10,
            fallback_target: 100,
            capacity: None,
            utilisation: 0.85,
            winter_months: vec![1, 2, 11, 12],
            shoulder_months: vec![3, 4, 9, 10],
            shoulder_min_soc: 60,
            charge_window: ChargeWindow::default(),
        }
    }
}

/// Overnight AC charge window written to the inverter alongside the target.
/// An absent bound leaves the corresponding inverter register untouched.
#[derive(Clone, Copy, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChargeWindow {
    #[serde(deserialize_with = "fmt::hh_mm_opt::deserialize")]
    pub start: Option<NaiveTime>,

    #[serde(deserialize_with = "fmt::hh_mm_opt::deserialize")]
    pub end: Option<NaiveTime>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SequencerSettings {
    /// Evaluation cadence of the `run` loop, minutes.
    pub interval_minutes: u64,

    pub rules: Vec<Rule>,
}

impl Default for SequencerSettings {
    fn default() -> Self {
        Self { interval_minutes: 5, rules: Vec::new() }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatchSettings {
    /// Write attempts per collaborator call.
    pub attempts: u32,

    /// Pause between attempts, seconds; grows linearly.
    pub backoff_seconds: u64,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self { attempts: 3, backoff_seconds: 5 }
    }
}

/// One controlled switch.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoadSettings {
    pub id: String,

    /// Base URL of the load's switch module.
    pub switch_url: String,
}
