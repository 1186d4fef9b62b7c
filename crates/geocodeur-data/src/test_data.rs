use std::io::Write;

use polars::prelude::*;
use tempfile::NamedTempFile;
use tracing::info;

use crate::RELATION_DELIMITER;
use crate::error::Result;
use crate::feature::SourceFeature;

/// On-disk format of generated test data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestDataFormat {
    Csv,
    Parquet,
}

/// Configuration for test data generation
#[derive(Debug, Clone)]
pub struct TestDataConfig {
    /// Number of feature rows to write. The fixed sample comes first, generated
    /// streets fill up the remainder.
    pub rows: usize,
    pub format: TestDataFormat,
}

impl Default for TestDataConfig {
    fn default() -> Self {
        Self::sample()
    }
}

impl TestDataConfig {
    /// Only the hand-written sample features.
    pub fn minimal() -> Self {
        Self {
            rows: sample_features().len(),
            format: TestDataFormat::Csv,
        }
    }

    /// Sample features padded with generated residential streets.
    pub fn sample() -> Self {
        Self {
            rows: 100,
            format: TestDataFormat::Csv,
        }
    }

    pub fn parquet(mut self) -> Self {
        self.format = TestDataFormat::Parquet;
        self
    }
}

/// A small, realistic set of prepared features around Amsterdam and Den Bosch.
///
/// Contains one unnamed feature on purpose.
pub fn sample_features() -> Vec<SourceFeature> {
    vec![
        SourceFeature::new("Amsterdam", "division", "locality")
            .with_relations(["Amsterdam", "Noord-Holland"])
            .with_geometry("POINT (4.8952 52.3702)"),
        SourceFeature::new("Amsterdamsestraatweg", "road", "residential")
            .with_relations(["Utrecht"])
            .with_geometry("LINESTRING (5.0946 52.1003, 5.0871 52.1102)"),
        SourceFeature::new("Kerkstraat", "road", "residential")
            .with_relations(["Amsterdam"])
            .with_geometry("LINESTRING (4.8847 52.3640, 4.8988 52.3617)"),
        SourceFeature::new("Kerkstraat", "road", "residential")
            .with_relations(["'s-Hertogenbosch"])
            .with_geometry("LINESTRING (5.3031 51.6889, 5.3050 51.6880)"),
        SourceFeature::new("Rijksweg A2", "road", "motorway")
            .with_relations(["Utrecht"])
            .with_geometry("LINESTRING (5.0700 52.0500, 5.0800 52.0000)"),
        SourceFeature::new("'s-Hertogenbosch", "division", "locality")
            .with_relations(["Noord-Brabant"])
            .with_geometry("POINT (5.3037 51.6978)"),
        SourceFeature::new("Utrecht", "division", "locality")
            .with_relations(["Utrecht"])
            .with_geometry("POINT (5.1214 52.0907)"),
        SourceFeature::new("Maas", "water", "river").with_geometry("LINESTRING (5.69 50.85, 5.30 51.75)"),
        SourceFeature::new("Schiphol", "infra", "airport")
            .with_relations(["Haarlemmermeer"])
            .with_geometry("POINT (4.7634 52.3105)"),
        SourceFeature::new("Damrak 1", "address", "")
            .with_relations(["Amsterdam"])
            .with_geometry("POINT (4.8936 52.3763)"),
        SourceFeature::new("1012JS", "zipcode", "")
            .with_relations(["Amsterdam"])
            .with_geometry("POINT (4.8920 52.3740)"),
        SourceFeature::new("Rijksmuseum", "poi", "museum")
            .with_relations(["Amsterdam"])
            .with_geometry("POINT (4.8852 52.3600)"),
        SourceFeature::new("", "road", "residential"),
    ]
}

fn features_for(config: &TestDataConfig) -> Vec<SourceFeature> {
    let mut features = sample_features();
    features.truncate(config.rows);
    let generated = config.rows.saturating_sub(features.len());
    features.extend((0..generated).map(|i| {
        SourceFeature::new(format!("Teststraat {i}"), "road", "residential")
            .with_relations(["Teststad"])
            .with_geometry(format!("POINT ({i} {i})"))
    }));
    features
}

/// Create a temporary feature file according to `config`.
pub fn create_test_data(config: &TestDataConfig) -> Result<NamedTempFile> {
    info!("Creating test data with config: {:?}", config);
    let features = features_for(config);
    match config.format {
        TestDataFormat::Csv => write_features_csv(&features),
        TestDataFormat::Parquet => write_features_parquet(&features),
    }
}

fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

fn joined_relations(feature: &SourceFeature) -> String {
    feature.relations.join(RELATION_DELIMITER.to_string().as_str())
}

/// Write features to a temporary `.csv` file in the preparation pipeline's layout.
pub fn write_features_csv(features: &[SourceFeature]) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new().suffix(".csv").tempfile()?;
    writeln!(file, "name,class,subclass,relation,geom")?;
    for feature in features {
        writeln!(
            file,
            "{},{},{},{},{}",
            quote(&feature.name),
            quote(&feature.class),
            quote(&feature.subclass),
            quote(&joined_relations(feature)),
            quote(feature.geometry.as_deref().unwrap_or_default()),
        )?;
    }
    file.flush()?;
    Ok(file)
}

/// Write features to a temporary `.parquet` file in the preparation pipeline's layout.
pub fn write_features_parquet(features: &[SourceFeature]) -> Result<NamedTempFile> {
    let file = tempfile::Builder::new().suffix(".parquet").tempfile()?;

    let mut df = df!(
        "name" => features.iter().map(|f| f.name.clone()).collect::<Vec<_>>(),
        "class" => features.iter().map(|f| f.class.clone()).collect::<Vec<_>>(),
        "subclass" => features.iter().map(|f| f.subclass.clone()).collect::<Vec<_>>(),
        "relation" => features.iter().map(joined_relations).collect::<Vec<_>>(),
        "geom" => features.iter().map(|f| f.geometry.clone()).collect::<Vec<_>>(),
    )?;
    let mut writer = file.reopen()?;
    ParquetWriter::new(&mut writer).finish(&mut df)?;
    Ok(file)
}
