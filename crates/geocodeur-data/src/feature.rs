use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// Separator used by the preparation pipeline for the `relation` column.
pub const RELATION_DELIMITER: char = ';';

/// One prepared feature as emitted by the preparation pipeline.
///
/// Carries no identifier: ids are assigned by the store at write time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFeature {
    /// Display name. Empty when the source row had no name.
    pub name: String,
    /// Coarse category, e.g. `division`, `road`, `poi`.
    pub class: String,
    /// Fine category, e.g. `locality`, `motorway`.
    pub subclass: String,
    /// Names of related areas (containing localities, counties), in source order.
    pub relations: Vec<String>,
    /// Geometry as WKT (EPSG:4326) or GeoJSON.
    pub geometry: Option<String>,
}

impl SourceFeature {
    pub fn new(name: impl Into<String>, class: impl Into<String>, subclass: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            class: class.into(),
            subclass: subclass.into(),
            relations: Vec::new(),
            geometry: None,
        }
    }

    pub fn with_relations<I, S>(mut self, relations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.relations = relations.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_geometry(mut self, geometry: impl Into<String>) -> Self {
        self.geometry = Some(geometry.into());
        self
    }

    /// A feature without a usable name cannot produce any alias.
    pub fn has_name(&self) -> bool {
        !self.name.trim().is_empty()
    }
}

/// Split a delimited relation list into an ordered set of names.
///
/// Blank entries are dropped and only the first occurrence of a repeated name is kept.
pub fn split_relations(raw: &str) -> Vec<String> {
    raw.split(RELATION_DELIMITER)
        .map(str::trim)
        .filter(|relation| !relation.is_empty())
        .unique()
        .map(str::to_owned)
        .collect()
}
