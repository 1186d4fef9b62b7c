//! Normalisation of feature geometries to GeoJSON.
//!
//! Prepared feature files carry WKT; results carry GeoJSON. Geometries are
//! converted once at ingestion so that stored values can be returned as is.
//! Input that already is a GeoJSON object is validated and passed through.

use serde_json::{Value, json};

/// Deepest GEOMETRYCOLLECTION nesting accepted.
pub const MAX_COLLECTION_DEPTH: usize = 16;

pub use error::{GeometryError, Result};

mod error {
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum GeometryError {
        #[error("Expected {expected} at offset {offset}")]
        Syntax {
            offset: usize,
            expected: &'static str,
        },
        #[error("Unsupported geometry type '{0}'")]
        UnknownType(String),
        #[error("Invalid GeoJSON: {0}")]
        Json(#[from] serde_json::Error),
        #[error("GeoJSON geometry has no type")]
        Untyped,
        #[error("Geometry collections nested deeper than {max} levels")]
        TooDeep { max: usize },
    }

    pub type Result<T> = std::result::Result<T, GeometryError>;
}

/// Convert `raw` (WKT, EWKT or GeoJSON) into a compact GeoJSON geometry.
pub fn to_geojson(raw: &str) -> Result<String> {
    let raw = raw.trim();
    if raw.starts_with('{') {
        let value: Value = serde_json::from_str(raw)?;
        if value.get("type").and_then(Value::as_str).is_none() {
            return Err(GeometryError::Untyped);
        }
        return Ok(value.to_string());
    }

    let wkt = match raw.split_once(';') {
        Some((srid, rest)) if srid.trim().to_ascii_uppercase().starts_with("SRID=") => rest,
        _ => raw,
    };
    let mut parser = WktParser {
        input: wkt,
        pos: 0,
        depth: 0,
    };
    let geometry = parser.geometry()?;
    parser.skip_whitespace();
    if parser.pos != parser.input.len() {
        return Err(parser.error("end of geometry"));
    }
    Ok(geometry.to_string())
}

struct WktParser<'a> {
    input: &'a str,
    pos: usize,
    /// Enclosing GEOMETRYCOLLECTIONs.
    depth: usize,
}

impl WktParser<'_> {
    fn rest(&self) -> &str {
        &self.input[self.pos..]
    }

    fn error(&self, expected: &'static str) -> GeometryError {
        GeometryError::Syntax {
            offset: self.pos,
            expected,
        }
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_whitespace();
        self.rest().chars().next()
    }

    fn expect(&mut self, c: char, expected: &'static str) -> Result<()> {
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            Ok(())
        } else {
            Err(self.error(expected))
        }
    }

    fn word(&mut self) -> String {
        self.skip_whitespace();
        let len = self
            .rest()
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(self.rest().len());
        let word = self.rest()[..len].to_ascii_uppercase();
        self.pos += len;
        word
    }

    fn number(&mut self) -> Result<f64> {
        self.skip_whitespace();
        let len = self
            .rest()
            .find(|c: char| c.is_whitespace() || c == ',' || c == ')')
            .unwrap_or(self.rest().len());
        let value = self.rest()[..len]
            .parse::<f64>()
            .map_err(|_| self.error("a number"))?;
        self.pos += len;
        Ok(value)
    }

    /// `true` when the geometry is `EMPTY`. Dimension markers are skipped.
    fn empty_marker(&mut self) -> bool {
        loop {
            let checkpoint = self.pos;
            match self.word().as_str() {
                "EMPTY" => return true,
                "Z" | "M" | "ZM" => continue,
                _ => {
                    self.pos = checkpoint;
                    return false;
                }
            }
        }
    }

    fn geometry(&mut self) -> Result<Value> {
        let kind = self.word();
        if kind.is_empty() {
            return Err(self.error("a geometry type"));
        }
        let (name, empty) = match kind.as_str() {
            "POINT" => ("Point", json!([])),
            "LINESTRING" => ("LineString", json!([])),
            "POLYGON" => ("Polygon", json!([])),
            "MULTIPOINT" => ("MultiPoint", json!([])),
            "MULTILINESTRING" => ("MultiLineString", json!([])),
            "MULTIPOLYGON" => ("MultiPolygon", json!([])),
            "GEOMETRYCOLLECTION" => {
                if self.depth == MAX_COLLECTION_DEPTH {
                    return Err(GeometryError::TooDeep {
                        max: MAX_COLLECTION_DEPTH,
                    });
                }
                self.depth += 1;
                let geometries = if self.empty_marker() {
                    Vec::new()
                } else {
                    self.list(Self::geometry)?
                };
                self.depth -= 1;
                return Ok(json!({"type": "GeometryCollection", "geometries": geometries}));
            }
            _ => return Err(GeometryError::UnknownType(kind)),
        };
        if self.empty_marker() {
            return Ok(json!({"type": name, "coordinates": empty}));
        }
        let coordinates = match name {
            "Point" => {
                self.expect('(', "'('")?;
                let position = self.position()?;
                self.expect(')', "')'")?;
                position
            }
            "LineString" => self.positions()?,
            "Polygon" => self.rings()?,
            "MultiPoint" => Value::Array(self.list(Self::multipoint_member)?),
            "MultiLineString" => self.rings()?,
            _ => Value::Array(self.list(Self::rings)?),
        };
        Ok(json!({"type": name, "coordinates": coordinates}))
    }

    /// `(item, item, ...)`
    fn list<T>(&mut self, mut item: impl FnMut(&mut Self) -> Result<T>) -> Result<Vec<T>> {
        self.expect('(', "'('")?;
        let mut items = vec![item(self)?];
        while self.peek() == Some(',') {
            self.pos += 1;
            items.push(item(self)?);
        }
        self.expect(')', "')' or ','")?;
        Ok(items)
    }

    fn position(&mut self) -> Result<Value> {
        let mut ordinates = vec![self.number()?, self.number()?];
        while !matches!(self.peek(), Some(',' | ')') | None) {
            ordinates.push(self.number()?);
        }
        Ok(json!(ordinates))
    }

    fn positions(&mut self) -> Result<Value> {
        Ok(Value::Array(self.list(Self::position)?))
    }

    fn rings(&mut self) -> Result<Value> {
        Ok(Value::Array(self.list(Self::positions)?))
    }

    /// Members of a MULTIPOINT may or may not be parenthesised.
    fn multipoint_member(&mut self) -> Result<Value> {
        if self.peek() == Some('(') {
            self.pos += 1;
            let position = self.position()?;
            self.expect(')', "')'")?;
            Ok(position)
        } else {
            self.position()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(raw: &str) -> Value {
        serde_json::from_str(&to_geojson(raw).unwrap()).unwrap()
    }

    #[test]
    fn test_point() {
        assert_eq!(
            parsed("POINT (4.8952 52.3702)"),
            json!({"type": "Point", "coordinates": [4.8952, 52.3702]})
        );
        assert_eq!(
            parsed("SRID=4326;point z(1 2 3)"),
            json!({"type": "Point", "coordinates": [1.0, 2.0, 3.0]})
        );
    }

    #[test]
    fn test_linestring_and_polygon() {
        assert_eq!(
            parsed("LINESTRING (5.0946 52.1003, 5.0871 52.1102)"),
            json!({"type": "LineString", "coordinates": [[5.0946, 52.1003], [5.0871, 52.1102]]})
        );
        assert_eq!(
            parsed("POLYGON ((0 0, 1 0, 1 1, 0 0), (0.2 0.2, 0.4 0.2, 0.2 0.4, 0.2 0.2))"),
            json!({"type": "Polygon", "coordinates": [
                [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]],
                [[0.2, 0.2], [0.4, 0.2], [0.2, 0.4], [0.2, 0.2]]
            ]})
        );
    }

    #[test]
    fn test_multi_geometries() {
        let expected = json!({"type": "MultiPoint", "coordinates": [[1.0, 2.0], [3.0, 4.0]]});
        assert_eq!(parsed("MULTIPOINT ((1 2), (3 4))"), expected);
        assert_eq!(parsed("MULTIPOINT (1 2, 3 4)"), expected);
        assert_eq!(
            parsed("MULTIPOLYGON (((0 0, 1 0, 1 1, 0 0)), ((5 5, 6 5, 6 6, 5 5)))")["coordinates"]
                .as_array()
                .unwrap()
                .len(),
            2
        );
        assert_eq!(
            parsed("GEOMETRYCOLLECTION (POINT (1 2), LINESTRING (0 0, 1 1))")["geometries"][1]["type"],
            "LineString"
        );
    }

    #[test]
    fn test_empty_geometries() {
        assert_eq!(parsed("POINT EMPTY"), json!({"type": "Point", "coordinates": []}));
        assert_eq!(
            parsed("GEOMETRYCOLLECTION EMPTY"),
            json!({"type": "GeometryCollection", "geometries": []})
        );
    }

    #[test]
    fn test_geojson_passes_through() {
        let compact = to_geojson(r#"{ "type": "Point", "coordinates": [1, 2] }"#).unwrap();
        assert!(!compact.contains(' '));
        assert_eq!(parsed(&compact), json!({"type": "Point", "coordinates": [1, 2]}));
        assert!(matches!(
            to_geojson(r#"{"coordinates": [1, 2]}"#),
            Err(GeometryError::Untyped)
        ));
        assert!(matches!(to_geojson("{broken"), Err(GeometryError::Json(_))));
    }

    #[test]
    fn test_rejects_malformed_wkt() {
        for raw in [
            "",
            "POINT (1)",
            "POINT (1 2",
            "POINT (a b)",
            "LINESTRING (0 0, 1 1) trailing",
            "CIRCLE (0 0, 1)",
        ] {
            assert!(to_geojson(raw).is_err(), "{raw:?}");
        }
    }

    fn nested_collections(depth: usize) -> String {
        format!(
            "{}POINT (1 2){}",
            "GEOMETRYCOLLECTION (".repeat(depth),
            ")".repeat(depth)
        )
    }

    #[test]
    fn test_collection_nesting_is_bounded() {
        let deepest = parsed(&nested_collections(MAX_COLLECTION_DEPTH));
        assert_eq!(deepest["type"], "GeometryCollection");

        assert!(matches!(
            to_geojson(&nested_collections(MAX_COLLECTION_DEPTH + 1)),
            Err(GeometryError::TooDeep { max: MAX_COLLECTION_DEPTH })
        ));
        assert!(matches!(
            to_geojson(&nested_collections(100_000)),
            Err(GeometryError::TooDeep { .. })
        ));
    }

    #[test]
    fn test_repeated_dimension_markers() {
        let markers = "Z ".repeat(100_000);
        assert_eq!(
            parsed(&format!("POINT {markers}EMPTY")),
            json!({"type": "Point", "coordinates": []})
        );
    }
}
