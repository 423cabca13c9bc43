use chrono::{NaiveTime, Timelike};

use crate::quantity::{energy::KilowattHours, power::Kilowatts};

/// Number of half-hour metering slots in a day.
pub const SLOTS_PER_DAY: usize = 48;

const SLOT_MINUTES: u32 = 30;

/// Start time of the given half-hour slot.
pub fn slot_time(slot: usize) -> NaiveTime {
    let minutes = u32::try_from(slot).unwrap_or_default() * SLOT_MINUTES;
    NaiveTime::from_hms_opt(minutes / 60, minutes % 60, 0).unwrap_or(NaiveTime::MIN)
}

/// One day of energy values on the canonical half-hourly grid.
///
/// Every slot is always present: a missing reading is zero, never absent.
#[derive(Clone, Debug, PartialEq)]
pub struct DayProfile([KilowattHours; SLOTS_PER_DAY]);

impl Default for DayProfile {
    fn default() -> Self {
        Self([KilowattHours::ZERO; SLOTS_PER_DAY])
    }
}

impl DayProfile {
    pub const fn flat(energy: KilowattHours) -> Self {
        Self([energy; SLOTS_PER_DAY])
    }

    /// Resample irregular `(time, power)` points onto the half-hourly grid.
    ///
    /// Power is linearly interpolated at each slot midpoint and converted to
    /// per-slot energy. Slots before the first or after the last reported
    /// point take the nearest reported value. The points must be sorted.
    pub fn from_points(points: &[(NaiveTime, Kilowatts)]) -> Self {
        let mut slots = [KilowattHours::ZERO; SLOTS_PER_DAY];
        if points.is_empty() {
            return Self(slots);
        }
        #[allow(clippy::cast_precision_loss)]
        for (slot, value) in slots.iter_mut().enumerate() {
            let midpoint = (slot as f64).mul_add(f64::from(SLOT_MINUTES), 15.0);
            *value = interpolate(points, midpoint).for_half_hour();
        }
        Self(slots)
    }

    pub fn get(&self, slot: usize) -> KilowattHours {
        self.0.get(slot).copied().unwrap_or_default()
    }

    pub fn set(&mut self, slot: usize, value: KilowattHours) {
        if let Some(entry) = self.0.get_mut(slot) {
            *entry = value;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = KilowattHours> + '_ {
        self.0.iter().copied()
    }

    pub fn total(&self) -> KilowattHours {
        self.0.iter().fold(KilowattHours::ZERO, |total, value| total + *value)
    }

    /// Apply an elementwise factor, e.g. the forecast conservativeness weight.
    #[must_use]
    pub fn scale(mut self, factor: f64) -> Self {
        for value in &mut self.0 {
            *value = *value * factor;
        }
        self
    }

    /// Per-slot mean across the given profiles, `None` when there are none.
    pub fn mean<'a>(profiles: impl IntoIterator<Item = &'a Self>) -> Option<Self> {
        let mut sum = [0.0_f64; SLOTS_PER_DAY];
        let mut count = 0_usize;
        for profile in profiles {
            for (accumulator, value) in sum.iter_mut().zip(&profile.0) {
                *accumulator += value.0;
            }
            count += 1;
        }
        #[allow(clippy::cast_precision_loss)]
        (count != 0).then(|| Self(sum.map(|total| KilowattHours(total / count as f64))))
    }
}

/// Linear interpolation over sorted `(time, power)` points, clamped to the
/// nearest reported value outside the reported range.
fn interpolate(points: &[(NaiveTime, Kilowatts)], minute: f64) -> Kilowatts {
    let minute_of = |time: NaiveTime| f64::from(time.num_seconds_from_midnight()) / 60.0;
    let (first_time, first_value) = points[0];
    if minute <= minute_of(first_time) {
        return first_value;
    }
    for window in points.windows(2) {
        let (left_time, left_value) = window[0];
        let (right_time, right_value) = window[1];
        let (left, right) = (minute_of(left_time), minute_of(right_time));
        if minute <= right {
            if right <= left {
                return right_value;
            }
            let fraction = (minute - left) / (right - left);
            return Kilowatts(left_value.0 + (right_value.0 - left_value.0) * fraction);
        }
    }
    points[points.len() - 1].1
}
