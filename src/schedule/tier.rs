//! Test tiers and execution presets.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::unit::TestUnit;

/// Tag that excludes a unit from the `fast` preset.
pub const SLOW_TAG: &str = "slow";

/// How a test unit reaches the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// No outbound calls at all.
    Unit,
    /// Calls go through the cassette engine.
    #[default]
    Integration,
    /// Calls go to the real network, never recorded.
    Live,
}

impl Tier {
    /// Every tier, in ascending order of network exposure.
    pub const ALL: [Self; 3] = [Self::Unit, Self::Integration, Self::Live];

    /// Whether units of this tier may share a run with other workers.
    #[must_use]
    pub fn parallel_safe(self) -> bool {
        !matches!(self, Self::Live)
    }

    /// Stable lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unit => "unit",
            Self::Integration => "integration",
            Self::Live => "live",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named selection of test units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    /// Unit tier only.
    Unit,
    /// Integration tier only.
    Integration,
    /// Live tier only.
    Live,
    /// Unit and integration, excluding units tagged `slow`.
    Fast,
    /// Every tier.
    Full,
}

impl Preset {
    /// Every preset, in the order `reel presets` lists them.
    pub const ALL: [Self; 5] = [Self::Unit, Self::Integration, Self::Live, Self::Fast, Self::Full];

    /// Tiers this preset draws from.
    #[must_use]
    pub fn tiers(self) -> &'static [Tier] {
        match self {
            Self::Unit => &[Tier::Unit],
            Self::Integration => &[Tier::Integration],
            Self::Live => &[Tier::Live],
            Self::Fast => &[Tier::Unit, Tier::Integration],
            Self::Full => &Tier::ALL,
        }
    }

    /// One-line description for listings.
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::Unit => "isolated tests with no outbound calls",
            Self::Integration => "cassette-backed tests",
            Self::Live => "tests against the real network, run serially",
            Self::Fast => "unit and integration tests not tagged slow",
            Self::Full => "every test",
        }
    }

    /// Whether `unit` belongs to this preset.
    #[must_use]
    pub fn selects(self, unit: &TestUnit) -> bool {
        if !self.tiers().contains(&unit.tier) {
            return false;
        }
        !(self == Self::Fast && unit.has_tag(SLOW_TAG))
    }

    /// Filters `units` down to this preset, preserving order.
    #[must_use]
    pub fn select(self, units: &[TestUnit]) -> Vec<TestUnit> {
        units.iter().filter(|u| self.selects(u)).cloned().collect()
    }

    /// Stable lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unit => "unit",
            Self::Integration => "integration",
            Self::Live => "live",
            Self::Fast => "fast",
            Self::Full => "full",
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                format!("unknown preset '{s}' (expected unit, integration, live, fast, or full)")
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(id: &str, tier: Tier, tags: &[&str]) -> TestUnit {
        TestUnit {
            id: id.into(),
            tier,
            tags: tags.iter().map(|t| (*t).to_string()).collect(),
            ..TestUnit::default()
        }
    }

    #[test]
    fn fast_excludes_live_and_slow() {
        let units = vec![
            unit("a", Tier::Unit, &[]),
            unit("b", Tier::Integration, &["slow"]),
            unit("c", Tier::Integration, &[]),
            unit("d", Tier::Live, &[]),
        ];
        let ids: Vec<String> = Preset::Fast.select(&units).into_iter().map(|u| u.id).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(Preset::Full.select(&units).len(), 4);
        assert_eq!(Preset::Integration.select(&units).len(), 2);
    }

    #[test]
    fn presets_parse_case_insensitively() {
        assert_eq!("FAST".parse::<Preset>().unwrap(), Preset::Fast);
        assert!("nightly".parse::<Preset>().is_err());
    }

    #[test]
    fn only_live_is_serial() {
        assert!(Tier::Unit.parallel_safe());
        assert!(Tier::Integration.parallel_safe());
        assert!(!Tier::Live.parallel_safe());
    }
}
