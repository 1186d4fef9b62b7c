//! Class and subclass rank tables.
//!
//! Ranks are ordinal priorities used as ranking tie-breaks: lower is better.
//! The tables are fixed; deployments may layer overrides on top through
//! [`RankTable`].

use std::{fmt, str::FromStr};

use ahash::AHashMap as HashMap;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Rank given to any class or subclass missing from the tables.
pub const UNKNOWN_RANK: u32 = 100;

/// Coarse feature category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureClass {
    Division,
    Water,
    Road,
    Infra,
    Address,
    Zipcode,
    Poi,
}

impl FeatureClass {
    pub const ALL: [Self; 7] = [
        Self::Division,
        Self::Water,
        Self::Road,
        Self::Infra,
        Self::Address,
        Self::Zipcode,
        Self::Poi,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Division => "division",
            Self::Water => "water",
            Self::Road => "road",
            Self::Infra => "infra",
            Self::Address => "address",
            Self::Zipcode => "zipcode",
            Self::Poi => "poi",
        }
    }

    pub const fn rank(self) -> u32 {
        match self {
            // Many division names partly share a water name (Maas, IJssel), rank them equally.
            Self::Division | Self::Water => 1,
            Self::Road => 2,
            Self::Infra => 3,
            Self::Address => 4,
            Self::Zipcode => 5,
            Self::Poi => 6,
        }
    }
}

impl fmt::Display for FeatureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeatureClass {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|class| class.as_str() == lowered)
            .ok_or_else(|| ValidationError::UnknownClass(s.to_string()))
    }
}

/// Rank of a raw class name. Unknown classes rank [`UNKNOWN_RANK`].
pub fn class_rank(class: &str) -> u32 {
    FeatureClass::ALL
        .into_iter()
        .find(|c| c.as_str() == class)
        .map_or(UNKNOWN_RANK, FeatureClass::rank)
}

/// Rank of a raw subclass name. Unknown subclasses rank [`UNKNOWN_RANK`].
///
/// Administrative and road subclasses are two independent scales sharing the
/// same numeric space.
pub fn subclass_rank(subclass: &str) -> u32 {
    match subclass {
        "locality" => 1,
        "county" => 2,
        "neighborhood" => 3,
        "microhood" => 4,

        "motorway" => 1,
        "trunk" => 2,
        "primary" => 3,
        "secondary" => 4,
        "tertiary" => 5,
        "unclassified" => 6,
        "residential" => 7,
        "living_street" => 8,
        _ => UNKNOWN_RANK,
    }
}

/// The fixed rank tables plus optional per-name overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RankTable {
    class_overrides: HashMap<String, u32>,
    subclass_overrides: HashMap<String, u32>,
}

impl RankTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_class_override(mut self, class: impl Into<String>, rank: u32) -> Self {
        self.class_overrides.insert(class.into(), rank);
        self
    }

    pub fn with_subclass_override(mut self, subclass: impl Into<String>, rank: u32) -> Self {
        self.subclass_overrides.insert(subclass.into(), rank);
        self
    }

    pub fn class_rank(&self, class: &str) -> u32 {
        self.class_overrides
            .get(class)
            .copied()
            .unwrap_or_else(|| class_rank(class))
    }

    pub fn subclass_rank(&self, subclass: &str) -> u32 {
        self.subclass_overrides
            .get(subclass)
            .copied()
            .unwrap_or_else(|| subclass_rank(subclass))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_rank_is_total() {
        let expected = [
            ("division", 1),
            ("water", 1),
            ("road", 2),
            ("infra", 3),
            ("address", 4),
            ("zipcode", 5),
            ("poi", 6),
        ];
        for (class, rank) in expected {
            assert_eq!(class_rank(class), rank, "rank of {class}");
        }
        for unknown in ["", "forest", "Division", "building"] {
            assert_eq!(class_rank(unknown), UNKNOWN_RANK);
        }
    }

    #[test]
    fn test_subclass_scales() {
        assert_eq!(subclass_rank("locality"), 1);
        assert_eq!(subclass_rank("county"), 2);
        assert_eq!(subclass_rank("neighborhood"), 3);
        assert_eq!(subclass_rank("microhood"), 4);

        assert_eq!(subclass_rank("motorway"), 1);
        assert_eq!(subclass_rank("trunk"), 2);
        assert_eq!(subclass_rank("primary"), 3);
        assert_eq!(subclass_rank("secondary"), 4);
        assert_eq!(subclass_rank("tertiary"), 5);
        assert_eq!(subclass_rank("unclassified"), 6);
        assert_eq!(subclass_rank("residential"), 7);
        assert_eq!(subclass_rank("living_street"), 8);

        assert_eq!(subclass_rank("footway"), UNKNOWN_RANK);
        assert_eq!(subclass_rank(""), UNKNOWN_RANK);
    }

    #[test]
    fn test_feature_class_parsing() {
        assert_eq!("division".parse::<FeatureClass>().unwrap(), FeatureClass::Division);
        assert_eq!(" ROAD ".parse::<FeatureClass>().unwrap(), FeatureClass::Road);
        assert!(matches!(
            "forest".parse::<FeatureClass>(),
            Err(ValidationError::UnknownClass(name)) if name == "forest"
        ));
    }

    #[test]
    fn test_feature_class_rank_matches_table() {
        for class in FeatureClass::ALL {
            assert_eq!(class.rank(), class_rank(class.as_str()));
        }
    }

    #[test]
    fn test_rank_table_overrides() {
        let table = RankTable::new()
            .with_class_override("poi", 2)
            .with_subclass_override("footway", 9);

        assert_eq!(table.class_rank("poi"), 2);
        assert_eq!(table.class_rank("road"), 2);
        assert_eq!(table.subclass_rank("footway"), 9);
        assert_eq!(table.subclass_rank("motorway"), 1);
        assert_eq!(table.subclass_rank("unknown"), UNKNOWN_RANK);
    }
}
