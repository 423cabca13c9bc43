use bon::Builder;
use chrono::{Datelike, NaiveDate, NaiveTime};
use ordered_float::OrderedFloat;

use crate::{
    core::{
        forecast::GenerationForecast,
        series::{DayProfile, SLOTS_PER_DAY, slot_time},
    },
    prelude::*,
    quantity::energy::KilowattHours,
    settings::BatterySettings,
};

/// How the nightly target was produced.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PlanSource {
    /// The full forward simulation ran.
    Simulated,

    /// No usable forecast, the configured fallback target is in effect.
    Fallback,

    /// Winter month, charging to the configured maximum.
    Winter,
}

/// The nightly charge plan: one target percentage plus the projected SoC
/// trajectory it was derived from.
///
/// The projection is informational only and never feeds back into the
/// target.
#[derive(Clone, Debug)]
pub struct SocPlan {
    /// The day the plan applies to.
    pub date: NaiveDate,

    /// Charge target, percent.
    pub target: u8,

    pub source: PlanSource,

    /// Projected SoC at the end of each half-hour slot of `date`.
    pub projection: Vec<(NaiveTime, f64)>,
}

#[derive(Builder)]
pub struct SocCalculator<'a> {
    /// Forecast for the day the plan applies to.
    tonight: Option<&'a GenerationForecast>,

    /// Forecast for the day after, for the overmorrow adjustment.
    overmorrow: Option<&'a GenerationForecast>,

    baseline: &'a DayProfile,

    /// Battery state of charge right now, percent.
    current_soc: f64,

    /// Usable battery capacity.
    capacity: KilowattHours,

    settings: &'a BatterySettings,

    /// The day the plan applies to.
    date: NaiveDate,
}

impl SocCalculator<'_> {
    /// Compute the overnight charge target.
    #[instrument(skip_all, fields(date = %self.date, current_soc = self.current_soc))]
    pub fn compute(&self) -> SocPlan {
        let settings = self.settings;
        let month = self.date.month();

        if settings.winter_months.contains(&month) {
            info!(month, soc_target = settings.max_soc, "winter month, skipping the simulation");
            return self.plan(settings.max_soc, PlanSource::Winter, Vec::new());
        }

        // Shoulder months carry a higher reserve floor: consumption is more
        // variable with heating coming and going.
        let floor = if settings.shoulder_months.contains(&month) {
            settings.shoulder_min_soc
        } else {
            settings.min_soc
        };

        let Some(tonight) = self.tonight else {
            warn!(
                soc_target = settings.fallback_target,
                "forecast unavailable, using the fallback target",
            );
            let target = settings.fallback_target.clamp(floor, settings.max_soc);
            return self.plan(target, PlanSource::Fallback, Vec::new());
        };

        let trajectory = self.simulate(tonight);
        let projected_min = Self::minimum(&trajectory, self.current_soc);
        let shortfall = (f64::from(floor) - projected_min).max(0.0);
        let mut target = if shortfall > 0.0 {
            f64::from(floor) + shortfall + f64::from(settings.safety_margin)
        } else {
            f64::from(floor)
        };

        if let Some(overmorrow) = self.overmorrow {
            let overmorrow_min = Self::minimum(&self.simulate(overmorrow), self.current_soc);
            let overmorrow_shortfall = (f64::from(floor) - overmorrow_min).max(0.0);
            if projected_min - overmorrow_min > f64::from(settings.overmorrow_threshold)
                && overmorrow_shortfall > shortfall
            {
                // Meet the worse day halfway so the battery enters it with
                // extra reserve instead of reacting a day late.
                let boost = (overmorrow_shortfall - shortfall) / 2.0;
                info!(projected_min, overmorrow_min, boost, "overmorrow correction enabled");
                target += boost;
            }
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let target = target.clamp(f64::from(floor), f64::from(settings.max_soc)).ceil() as u8;
        info!(projected_min, soc_target = target, "computed");

        let projection =
            trajectory.iter().enumerate().map(|(slot, soc)| (slot_time(slot), *soc)).collect();
        self.plan(target, PlanSource::Simulated, projection)
    }

    fn plan(&self, target: u8, source: PlanSource, projection: Vec<(NaiveTime, f64)>) -> SocPlan {
        SocPlan { date: self.date, target, source, projection }
    }

    /// Walk the battery forward through every half-hour slot of the day.
    ///
    /// Each step is clamped to the physical [0, 100] range: the battery can
    /// neither overcharge on surplus nor discharge below empty.
    fn simulate(&self, forecast: &GenerationForecast) -> Vec<f64> {
        let capacity = self.capacity.0;
        let mut soc = self.current_soc.clamp(0.0, 100.0);
        let mut trajectory = Vec::with_capacity(SLOTS_PER_DAY);
        for (generation, consumption) in forecast.slots.iter().zip(self.baseline.iter()) {
            soc = ((generation - consumption).0 / capacity).mul_add(100.0, soc).clamp(0.0, 100.0);
            trajectory.push(soc);
        }
        trajectory
    }

    fn minimum(trajectory: &[f64], start: f64) -> f64 {
        trajectory.iter().copied().map(OrderedFloat).min().map_or(start, |minimum| minimum.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> BatterySettings {
        BatterySettings {
            min_soc: 20,
            max_soc: 100,
            safety_margin: 5,
            overmorrow_threshold: 10,
            fallback_target: 100,
            winter_months: Vec::new(),
            shoulder_months: Vec::new(),
            shoulder_min_soc: 60,
            ..BatterySettings::default()
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 2).unwrap()
    }

    fn forecast(per_slot: f64) -> GenerationForecast {
        GenerationForecast {
            date: date(),
            slots: DayProfile::flat(KilowattHours(per_slot)),
            weight: 1.0,
        }
    }

    fn compute(
        tonight: Option<&GenerationForecast>,
        overmorrow: Option<&GenerationForecast>,
        baseline: &DayProfile,
        settings: &BatterySettings,
    ) -> SocPlan {
        SocCalculator::builder()
            .maybe_tonight(tonight)
            .maybe_overmorrow(overmorrow)
            .baseline(baseline)
            .current_soc(50.0)
            .capacity(KilowattHours(10.0))
            .settings(settings)
            .date(date())
            .build()
            .compute()
    }

    /// Flat 0.5 kWh consumption against flat 0.3 kWh generation drains the
    /// battery to empty: 2 SoC points per slot from 50 %.
    #[test]
    fn deficit_day_raises_the_target() {
        let settings = settings();
        let tonight = forecast(0.3);
        let baseline = DayProfile::flat(KilowattHours(0.5));
        let plan = compute(Some(&tonight), None, &baseline, &settings);
        assert_eq!(plan.source, PlanSource::Simulated);
        // Shortfall of 20 points below the reserve, plus the safety margin.
        assert_eq!(plan.target, 45);
        assert_eq!(plan.projection.len(), SLOTS_PER_DAY);
        assert_eq!(plan.projection[47].1, 0.0);
    }

    /// Generation above consumption in every slot: no grid charge is needed
    /// and the target stays at the reserve floor exactly.
    #[test]
    fn self_sufficient_day_keeps_the_floor() {
        let settings = settings();
        let tonight = forecast(0.6);
        let baseline = DayProfile::flat(KilowattHours(0.5));
        let plan = compute(Some(&tonight), None, &baseline, &settings);
        assert_eq!(plan.target, 20);
    }

    #[test]
    fn projection_never_leaves_the_physical_range() {
        let settings = settings();
        let baseline = DayProfile::flat(KilowattHours(5.0));
        let drained = compute(Some(&forecast(0.0)), None, &baseline, &settings);
        let charged = compute(Some(&forecast(9.0)), None, &baseline, &settings);
        for (_, soc) in drained.projection.iter().chain(&charged.projection) {
            assert!((0.0..=100.0).contains(soc), "projected SoC {soc} out of range");
        }
    }

    #[test]
    fn target_respects_the_configured_ceiling() {
        let settings = BatterySettings { max_soc: 40, ..settings() };
        let tonight = forecast(0.3);
        let baseline = DayProfile::flat(KilowattHours(0.5));
        let plan = compute(Some(&tonight), None, &baseline, &settings);
        assert_eq!(plan.target, 40);
    }

    /// A markedly worse overmorrow raises tonight's target, and lowering its
    /// projected minimum further never lowers the target.
    #[test]
    fn overmorrow_correction_is_monotonic() {
        let settings = settings();
        let tonight = forecast(0.5);
        let baseline = DayProfile::flat(KilowattHours(0.5));

        let base = compute(Some(&tonight), None, &baseline, &settings);
        assert_eq!(base.target, 20);

        // Mild decline: bottoms out at 26 %, still above the reserve.
        let mild = forecast(0.45);
        let with_mild = compute(Some(&tonight), Some(&mild), &baseline, &settings);
        assert_eq!(with_mild.target, 20);

        // Steep decline: bottoms out at 2 %, 18 points short of the reserve.
        let steep = forecast(0.4);
        let with_steep = compute(Some(&tonight), Some(&steep), &baseline, &settings);
        assert_eq!(with_steep.target, 29);

        assert!(with_mild.target >= base.target);
        assert!(with_steep.target >= with_mild.target);
    }

    #[test]
    fn overmorrow_within_threshold_changes_nothing() {
        let settings = settings();
        let tonight = forecast(0.3);
        let baseline = DayProfile::flat(KilowattHours(0.5));
        let base = compute(Some(&tonight), None, &baseline, &settings);
        // Overmorrow is no worse than tomorrow, both drain to empty.
        let with_overmorrow = compute(Some(&tonight), Some(&forecast(0.3)), &baseline, &settings);
        assert_eq!(with_overmorrow.target, base.target);
    }

    #[test]
    fn missing_forecast_uses_the_fallback() {
        let settings = BatterySettings { fallback_target: 80, ..settings() };
        let baseline = DayProfile::flat(KilowattHours(0.5));
        let plan = compute(None, None, &baseline, &settings);
        assert_eq!(plan.source, PlanSource::Fallback);
        assert_eq!(plan.target, 80);
        assert!(plan.projection.is_empty());
    }

    #[test]
    fn winter_month_pins_the_maximum() {
        let settings = BatterySettings { winter_months: vec![6], ..settings() };
        let baseline = DayProfile::flat(KilowattHours(0.5));
        let plan = compute(Some(&forecast(0.6)), None, &baseline, &settings);
        assert_eq!(plan.source, PlanSource::Winter);
        assert_eq!(plan.target, 100);
    }

    #[test]
    fn shoulder_month_raises_the_floor() {
        let settings = BatterySettings { shoulder_months: vec![6], ..settings() };
        // Strong surplus: the trajectory never dips below the raised floor.
        let tonight = forecast(1.5);
        let baseline = DayProfile::flat(KilowattHours(0.5));
        let plan = compute(Some(&tonight), None, &baseline, &settings);
        assert_eq!(plan.target, 60);
    }
}
