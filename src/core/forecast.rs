use chrono::{DateTime, Local, NaiveDate, NaiveTime};
use itertools::Itertools;

use crate::{
    core::series::DayProfile,
    prelude::*,
    quantity::{energy::KilowattHours, power::Kilowatts},
};

/// A single reported point of expected PV output.
#[derive(Clone, Copy, Debug)]
pub struct PowerPoint {
    pub time: DateTime<Local>,
    pub power: Kilowatts,
}

/// Expected PV output for one day on the half-hourly grid, already derated
/// by the conservativeness weight.
#[derive(Clone, Debug)]
pub struct GenerationForecast {
    pub date: NaiveDate,
    pub slots: DayProfile,
    pub weight: f64,
}

impl GenerationForecast {
    /// Normalize the provider points falling on `date` and derate them.
    ///
    /// Providers report at irregular intervals, so the points are first
    /// interpolated onto the half-hourly grid, then every slot is multiplied
    /// by `weight` to hedge against forecast over-optimism.
    pub fn build(date: NaiveDate, points: &[PowerPoint], weight: f64) -> Result<Self> {
        ensure!(
            (0.0..=1.0).contains(&weight),
            "conservativeness weight {weight} is out of range"
        );
        let mut points: Vec<(NaiveTime, Kilowatts)> = points
            .iter()
            .filter(|point| point.time.date_naive() == date)
            .map(|point| (point.time.time(), point.power))
            .collect();
        ensure!(!points.is_empty(), "no forecast points for {date}");
        points.sort_by_key(|(time, _)| *time);
        Ok(Self { date, slots: DayProfile::from_points(&points).scale(weight), weight })
    }
}

/// Consumption history for one day.
#[derive(Clone, Debug)]
pub struct ConsumptionRecord {
    pub date: NaiveDate,
    pub profile: DayProfile,
}

/// Where the consumption baseline came from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BaselineSource {
    /// Averaged over this many days of actual history.
    History { days: usize },

    /// Too little history, a flat default curve is in effect.
    FlatDefault,
}

#[derive(Clone, Debug)]
pub struct ConsumptionBaseline {
    pub profile: DayProfile,
    pub source: BaselineSource,
}

/// Per-slot mean over the most recent `window_days` of history.
///
/// With no usable history the baseline falls back to a flat default curve
/// rather than failing: the nightly path must not depend on history being
/// available, e.g. on a fresh install.
pub fn consumption_baseline(
    history: &[ConsumptionRecord],
    window_days: usize,
    default_slot: KilowattHours,
) -> ConsumptionBaseline {
    let records = history
        .iter()
        .sorted_by_key(|record| std::cmp::Reverse(record.date))
        .take(window_days)
        .collect_vec();

    match DayProfile::mean(records.iter().map(|record| &record.profile)) {
        Some(profile) => {
            ConsumptionBaseline { profile, source: BaselineSource::History { days: records.len() } }
        }
        None => {
            warn!("insufficient consumption history, using the flat default curve");
            ConsumptionBaseline {
                profile: DayProfile::flat(default_slot),
                source: BaselineSource::FlatDefault,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use chrono::TimeZone;

    use super::*;

    fn point(hour: u32, minute: u32, power: f64) -> PowerPoint {
        PowerPoint {
            time: Local.with_ymd_and_hms(2024, 6, 2, hour, minute, 0).unwrap(),
            power: Kilowatts(power),
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 2).unwrap()
    }

    #[test]
    fn build_applies_the_weight_exactly() {
        let points = [point(0, 15, 2.0), point(23, 45, 2.0)];
        let raw = GenerationForecast::build(date(), &points, 1.0).unwrap();
        let derated = GenerationForecast::build(date(), &points, 0.35).unwrap();
        for (raw, derated) in raw.slots.iter().zip(derated.slots.iter()) {
            assert_eq!(derated.0, raw.0 * 0.35);
        }
    }

    #[test]
    fn build_ignores_points_of_other_days() {
        let mut points = vec![point(6, 0, 1.0), point(18, 0, 1.0)];
        points.push(PowerPoint {
            time: Local.with_ymd_and_hms(2024, 6, 3, 12, 0, 0).unwrap(),
            power: Kilowatts(100.0),
        });
        let forecast = GenerationForecast::build(date(), &points, 1.0).unwrap();
        assert_relative_eq!(forecast.slots.get(24).0, 0.5);
    }

    #[test]
    fn build_rejects_an_out_of_range_weight() {
        assert!(GenerationForecast::build(date(), &[point(12, 0, 1.0)], 1.5).is_err());
    }

    #[test]
    fn build_rejects_an_empty_day() {
        assert!(GenerationForecast::build(date(), &[], 0.35).is_err());
    }

    #[test]
    fn baseline_averages_the_window() {
        let history = [
            ConsumptionRecord { date: date(), profile: DayProfile::flat(KilowattHours(0.2)) },
            ConsumptionRecord {
                date: date().pred_opt().unwrap(),
                profile: DayProfile::flat(KilowattHours(0.4)),
            },
        ];
        let baseline = consumption_baseline(&history, 7, KilowattHours(0.1));
        assert_eq!(baseline.source, BaselineSource::History { days: 2 });
        assert_relative_eq!(baseline.profile.get(0).0, 0.3);
    }

    #[test]
    fn baseline_keeps_only_the_most_recent_days() {
        let day = date();
        let history: Vec<ConsumptionRecord> = (0..5)
            .map(|days_back| ConsumptionRecord {
                date: day - chrono::Days::new(days_back),
                profile: DayProfile::flat(KilowattHours(f64::from(u32::try_from(days_back).unwrap()))),
            })
            .collect();
        let baseline = consumption_baseline(&history, 2, KilowattHours(0.1));
        assert_eq!(baseline.source, BaselineSource::History { days: 2 });
        // Days 0 and 1 are the newest two.
        assert_relative_eq!(baseline.profile.get(10).0, 0.5);
    }

    #[test]
    fn baseline_falls_back_on_empty_history() {
        let baseline = consumption_baseline(&[], 7, KilowattHours(0.2));
        assert_eq!(baseline.source, BaselineSource::FlatDefault);
        assert_relative_eq!(baseline.profile.get(0).0, 0.2);
        assert_relative_eq!(baseline.profile.total().0, 0.2 * 48.0);
    }
}
