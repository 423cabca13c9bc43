use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Local, NaiveTime};
use serde::Deserialize;

use crate::{core::telemetry::TelemetrySnapshot, fmt, prelude::*};

/// Commanded state of a discretionary load.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum SwitchAction {
    On,
    Off,
}

impl SwitchAction {
    #[must_use]
    pub const fn is_on(self) -> bool {
        matches!(self, Self::On)
    }
}

/// Time-of-day window; an `end` before `start` wraps midnight.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeWindow {
    #[serde(deserialize_with = "fmt::hh_mm::deserialize")]
    pub start: NaiveTime,

    #[serde(deserialize_with = "fmt::hh_mm::deserialize")]
    pub end: NaiveTime,
}

impl TimeWindow {
    /// Half-open containment: the start is inside, the end is not.
    #[must_use]
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start <= self.end {
            self.start <= time && time < self.end
        } else {
            time >= self.start || time < self.end
        }
    }
}

/// Trigger conditions of a rule. All present conditions must hold.
#[derive(Clone, Copy, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Predicate {
    pub time_window: Option<TimeWindow>,
    pub temperature_below: Option<f64>,
    pub temperature_above: Option<f64>,
    pub soc_below: Option<f64>,
    pub soc_above: Option<f64>,
    pub carbon_below: Option<f64>,
    pub carbon_above: Option<f64>,
}

impl Predicate {
    fn is_empty(&self) -> bool {
        self.time_window.is_none()
            && self.temperature_below.is_none()
            && self.temperature_above.is_none()
            && self.soc_below.is_none()
            && self.soc_above.is_none()
            && self.carbon_below.is_none()
            && self.carbon_above.is_none()
    }

    #[must_use]
    pub fn matches(&self, snapshot: &TelemetrySnapshot) -> bool {
        let time = snapshot.timestamp.time();
        self.time_window.is_none_or(|window| window.contains(time))
            && self.temperature_below.is_none_or(|limit| snapshot.temperature < limit)
            && self.temperature_above.is_none_or(|limit| snapshot.temperature > limit)
            && self.soc_below.is_none_or(|limit| snapshot.battery_soc < limit)
            && self.soc_above.is_none_or(|limit| snapshot.battery_soc > limit)
            && self.carbon_below.is_none_or(|limit| snapshot.carbon_intensity < limit)
            && self.carbon_above.is_none_or(|limit| snapshot.carbon_intensity > limit)
    }
}

/// One sequencing rule: when the conditions hold, drive the load to `action`.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Rule {
    /// Evaluation order, ascending. Must be unique across the rule list.
    pub priority: u32,

    pub load: String,

    pub action: SwitchAction,

    pub when: Predicate,
}

/// Validated, priority-ordered rule list.
#[derive(Clone, Debug)]
pub struct RuleSet(Vec<Rule>);

impl RuleSet {
    /// Validate the configured rules.
    ///
    /// Validation happens once at load time so that evaluation itself cannot
    /// fail: a malformed rule is a configuration error, not a runtime one.
    pub fn try_new(mut rules: Vec<Rule>) -> Result<Self> {
        for rule in &rules {
            ensure!(!rule.load.trim().is_empty(), "rule at priority {} names no load", rule.priority);
            ensure!(
                !rule.when.is_empty(),
                "rule at priority {} for `{}` has no conditions",
                rule.priority,
                rule.load,
            );
            for (name, bounds) in [
                ("temperature", (rule.when.temperature_above, rule.when.temperature_below)),
                ("SoC", (rule.when.soc_above, rule.when.soc_below)),
                ("carbon", (rule.when.carbon_above, rule.when.carbon_below)),
            ] {
                if let (Some(above), Some(below)) = bounds {
                    ensure!(
                        above < below,
                        "rule at priority {} for `{}` has an empty {name} band",
                        rule.priority,
                        rule.load,
                    );
                }
            }
            for limit in [rule.when.soc_above, rule.when.soc_below].into_iter().flatten() {
                ensure!(
                    (0.0..=100.0).contains(&limit),
                    "rule at priority {} for `{}` has an out-of-range SoC threshold",
                    rule.priority,
                    rule.load,
                );
            }
        }
        rules.sort_by_key(|rule| rule.priority);
        for pair in rules.windows(2) {
            ensure!(pair[0].priority != pair[1].priority, "duplicate rule priority {}", pair[0].priority);
        }
        Ok(Self(rules))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.0.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Current commanded state of one physical switch.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LoadState {
    pub state: SwitchAction,

    /// When the state last changed.
    pub since: DateTime<Local>,
}

/// A state change to hand to the dispatcher.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Transition {
    pub load: String,
    pub to: SwitchAction,
}

/// The rule-evaluation state machine.
pub struct Sequencer {
    rules: RuleSet,
}

impl Sequencer {
    #[must_use]
    pub const fn new(rules: RuleSet) -> Self {
        Self { rules }
    }

    /// Evaluate the rule list against one snapshot.
    ///
    /// Rules run in ascending priority; the first match decides each load and
    /// lower-priority rules for that load are skipped. Loads with no matching
    /// rule hold their previous state. Only actual state changes come back,
    /// so an unchanged state never reaches the switch hub again.
    pub fn evaluate(
        &self,
        snapshot: &TelemetrySnapshot,
        states: &mut HashMap<String, LoadState>,
    ) -> Vec<Transition> {
        let mut decided: HashSet<&str> = HashSet::new();
        let mut transitions = Vec::new();

        for rule in self.rules.iter() {
            if decided.contains(rule.load.as_str()) || !rule.when.matches(snapshot) {
                continue;
            }
            decided.insert(rule.load.as_str());

            if states.get(&rule.load).is_some_and(|state| state.state == rule.action) {
                continue;
            }
            debug!(load = %rule.load, action = ?rule.action, priority = rule.priority, "transition");
            states.insert(
                rule.load.clone(),
                LoadState { state: rule.action, since: snapshot.timestamp },
            );
            transitions.push(Transition { load: rule.load.clone(), to: rule.action });
        }
        transitions
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::quantity::power::Kilowatts;

    fn snapshot(hour: u32, minute: u32, soc: f64) -> TelemetrySnapshot {
        TelemetrySnapshot {
            timestamp: Local.with_ymd_and_hms(2024, 6, 2, hour, minute, 0).unwrap(),
            battery_soc: soc,
            temperature: 15.0,
            carbon_intensity: 200.0,
            solar_power: Kilowatts(1.0),
            load_power: Kilowatts(0.4),
        }
    }

    fn window(start: (u32, u32), end: (u32, u32)) -> TimeWindow {
        TimeWindow {
            start: NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap(),
            end: NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap(),
        }
    }

    fn rule(priority: u32, load: &str, action: SwitchAction, when: Predicate) -> Rule {
        Rule { priority, load: load.to_string(), action, when }
    }

    #[test]
    fn window_contains_is_half_open() {
        let window = window((9, 0), (17, 0));
        assert!(window.contains(NaiveTime::from_hms_opt(9, 0, 0).unwrap()));
        assert!(window.contains(NaiveTime::from_hms_opt(12, 0, 0).unwrap()));
        assert!(!window.contains(NaiveTime::from_hms_opt(17, 0, 0).unwrap()));
    }

    #[test]
    fn window_wraps_midnight() {
        let window = window((22, 0), (6, 0));
        assert!(window.contains(NaiveTime::from_hms_opt(23, 30, 0).unwrap()));
        assert!(window.contains(NaiveTime::from_hms_opt(1, 0, 0).unwrap()));
        assert!(!window.contains(NaiveTime::from_hms_opt(12, 0, 0).unwrap()));
    }

    /// A low-battery cut-out outranks a time-window rule with the opposite
    /// action: only the highest-priority match may decide the load.
    #[test]
    fn highest_priority_match_wins() {
        let rules = RuleSet::try_new(vec![
            rule(
                1,
                "heater",
                SwitchAction::Off,
                Predicate { soc_below: Some(20.0), ..Predicate::default() },
            ),
            rule(
                2,
                "heater",
                SwitchAction::On,
                Predicate { time_window: Some(window((0, 0), (6, 0))), ..Predicate::default() },
            ),
        ])
        .unwrap();
        let sequencer = Sequencer::new(rules);
        let mut states = HashMap::new();

        let transitions = sequencer.evaluate(&snapshot(3, 0, 15.0), &mut states);
        assert_eq!(transitions, vec![Transition { load: "heater".to_string(), to: SwitchAction::Off }]);
        assert_eq!(states["heater"].state, SwitchAction::Off);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let rules = RuleSet::try_new(vec![rule(
            1,
            "lamp",
            SwitchAction::On,
            Predicate { time_window: Some(window((0, 0), (6, 0))), ..Predicate::default() },
        )])
        .unwrap();
        let sequencer = Sequencer::new(rules);
        let snapshot = snapshot(3, 0, 50.0);

        let mut first = HashMap::new();
        let mut second = HashMap::new();
        assert_eq!(
            sequencer.evaluate(&snapshot, &mut first),
            sequencer.evaluate(&snapshot, &mut second),
        );
        assert_eq!(first, second);
    }

    #[test]
    fn unchanged_state_produces_no_transition() {
        let rules = RuleSet::try_new(vec![rule(
            1,
            "lamp",
            SwitchAction::On,
            Predicate { time_window: Some(window((0, 0), (6, 0))), ..Predicate::default() },
        )])
        .unwrap();
        let sequencer = Sequencer::new(rules);
        let mut states = HashMap::new();

        assert_eq!(sequencer.evaluate(&snapshot(3, 0, 50.0), &mut states).len(), 1);
        assert!(sequencer.evaluate(&snapshot(3, 5, 50.0), &mut states).is_empty());
    }

    #[test]
    fn no_match_holds_the_previous_state() {
        let rules = RuleSet::try_new(vec![rule(
            1,
            "lamp",
            SwitchAction::On,
            Predicate { time_window: Some(window((0, 0), (6, 0))), ..Predicate::default() },
        )])
        .unwrap();
        let sequencer = Sequencer::new(rules);
        let mut states = HashMap::new();

        sequencer.evaluate(&snapshot(3, 0, 50.0), &mut states);
        // Outside the window: no rule matches and the lamp stays on.
        assert!(sequencer.evaluate(&snapshot(12, 0, 50.0), &mut states).is_empty());
        assert_eq!(states["lamp"].state, SwitchAction::On);
    }

    #[test]
    fn carbon_and_temperature_conditions_are_anded() {
        let rules = RuleSet::try_new(vec![rule(
            1,
            "charger",
            SwitchAction::On,
            Predicate {
                carbon_below: Some(150.0),
                temperature_below: Some(20.0),
                ..Predicate::default()
            },
        )])
        .unwrap();
        let sequencer = Sequencer::new(rules);
        let mut states = HashMap::new();

        // Carbon intensity of the stock snapshot is 200: no match.
        assert!(sequencer.evaluate(&snapshot(12, 0, 50.0), &mut states).is_empty());
    }

    #[test]
    fn duplicate_priorities_are_rejected() {
        let predicate = Predicate { soc_below: Some(20.0), ..Predicate::default() };
        let result = RuleSet::try_new(vec![
            rule(1, "a", SwitchAction::Off, predicate),
            rule(1, "b", SwitchAction::Off, predicate),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn empty_conditions_are_rejected() {
        let result =
            RuleSet::try_new(vec![rule(1, "a", SwitchAction::Off, Predicate::default())]);
        assert!(result.is_err());
    }

    #[test]
    fn empty_bands_are_rejected() {
        let result = RuleSet::try_new(vec![rule(
            1,
            "a",
            SwitchAction::Off,
            Predicate {
                temperature_above: Some(20.0),
                temperature_below: Some(10.0),
                ..Predicate::default()
            },
        )]);
        assert!(result.is_err());
    }

    #[test]
    fn out_of_range_soc_thresholds_are_rejected() {
        let result = RuleSet::try_new(vec![rule(
            1,
            "a",
            SwitchAction::Off,
            Predicate { soc_below: Some(120.0), ..Predicate::default() },
        )]);
        assert!(result.is_err());
    }
}
