//! Registry of nearby safe locations shown on the map screen.
//!
//! Ships with a built-in catalog so the map is never empty, and accepts a
//! replacement catalog as a GeoJSON `FeatureCollection` supplied by the
//! shell. Features that cannot be turned into a usable place are skipped
//! with a warning rather than failing the whole document.

use geojson::{feature::Id as FeatureId, Feature, GeoJson, JsonObject};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::{haversine_distance, ValidatedCoordinate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafePlaceKind {
    PoliceStation,
    Shelter,
}

impl SafePlaceKind {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::PoliceStation => "Police station",
            Self::Shelter => "Safe space",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "police" | "police_station" => Some(Self::PoliceStation),
            "shelter" | "safe_space" => Some(Self::Shelter),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafePlace {
    pub id: String,
    pub name: String,
    pub kind: SafePlaceKind,
    pub coordinate: ValidatedCoordinate,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SafePlaceError {
    #[error("invalid GeoJSON document: {message}")]
    InvalidDocument { message: String },
    #[error("document is not a FeatureCollection")]
    NotACollection,
}

const DEFAULT_CATALOG: &[(&str, &str, SafePlaceKind, f64, f64)] = &[
    (
        "central-police-station",
        "Central Police Station",
        SafePlaceKind::PoliceStation,
        -1.286_389,
        36.817_223,
    ),
    (
        "kilimani-police-station",
        "Kilimani Police Station",
        SafePlaceKind::PoliceStation,
        -1.2921,
        36.7985,
    ),
    (
        "hope-shelter",
        "Hope Shelter",
        SafePlaceKind::Shelter,
        -1.2833,
        36.8167,
    ),
    (
        "serene-haven",
        "Serene Haven",
        SafePlaceKind::Shelter,
        -1.3000,
        36.8000,
    ),
];

/// Built-in catalog used until the shell provides one.
#[must_use]
pub fn default_catalog() -> Vec<SafePlace> {
    DEFAULT_CATALOG
        .iter()
        .filter_map(|&(id, name, kind, lat, lon)| {
            let coordinate = ValidatedCoordinate::new(lat, lon).ok()?;
            Some(SafePlace {
                id: id.to_string(),
                name: name.to_string(),
                kind,
                coordinate,
            })
        })
        .collect()
}

/// Parses a catalog out of a GeoJSON `FeatureCollection`.
///
/// Each usable feature needs a `Point` geometry, a non-empty `name`
/// property, and a recognised `kind` (or legacy `type`) tag. Anything else
/// is skipped with a warning. An empty result is not an error.
pub fn from_geojson(input: &str) -> Result<Vec<SafePlace>, SafePlaceError> {
    let parsed: GeoJson = input
        .parse()
        .map_err(|e: geojson::Error| SafePlaceError::InvalidDocument {
            message: e.to_string(),
        })?;

    let collection = match parsed {
        GeoJson::FeatureCollection(collection) => collection,
        GeoJson::Feature(_) | GeoJson::Geometry(_) => return Err(SafePlaceError::NotACollection),
    };

    let total = collection.features.len();
    let mut places = Vec::with_capacity(total);

    for (index, feature) in collection.features.into_iter().enumerate() {
        match place_from_feature(&feature, index) {
            Some(place) => places.push(place),
            None => warn!(index, "skipping safe place feature without a usable point, name, or kind"),
        }
    }

    if places.len() < total {
        warn!(
            kept = places.len(),
            skipped = total - places.len(),
            "safe place catalog loaded partially"
        );
    }

    Ok(places)
}

fn place_from_feature(feature: &Feature, index: usize) -> Option<SafePlace> {
    let geometry = feature.geometry.as_ref()?;
    let position = match &geometry.value {
        geojson::Value::Point(position) => position,
        _ => return None,
    };

    // GeoJSON positions are [longitude, latitude].
    let lon = *position.first()?;
    let lat = *position.get(1)?;
    let coordinate = ValidatedCoordinate::new(lat, lon).ok()?;

    let properties = feature.properties.as_ref()?;
    let name = properties.get("name")?.as_str()?.trim();
    if name.is_empty() {
        return None;
    }

    let kind = properties
        .get("kind")
        .or_else(|| properties.get("type"))
        .and_then(serde_json::Value::as_str)
        .and_then(SafePlaceKind::from_tag)?;

    Some(SafePlace {
        id: feature_id(feature, properties, index),
        name: name.to_string(),
        kind,
        coordinate,
    })
}

fn feature_id(feature: &Feature, properties: &JsonObject, index: usize) -> String {
    if let Some(id) = &feature.id {
        return match id {
            FeatureId::String(s) => s.clone(),
            FeatureId::Number(n) => n.to_string(),
        };
    }
    if let Some(id) = properties.get("id").and_then(serde_json::Value::as_str) {
        return id.to_string();
    }
    format!("place-{index}")
}

/// Ranks `places` by great-circle distance from `from`, nearest first.
#[must_use]
pub fn nearest_first(places: &[SafePlace], from: ValidatedCoordinate) -> Vec<(SafePlace, f64)> {
    let mut ranked: Vec<(SafePlace, f64)> = places
        .iter()
        .map(|place| (place.clone(), haversine_distance(from, place.coordinate)))
        .collect();
    ranked.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog_json() -> &'static str {
        r#"{
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "id": "station-9",
                    "geometry": { "type": "Point", "coordinates": [36.82, -1.29] },
                    "properties": { "name": "Ninth Station", "kind": "police" }
                },
                {
                    "type": "Feature",
                    "geometry": { "type": "Point", "coordinates": [36.80, -1.30] },
                    "properties": { "name": "Quiet House", "type": "safe_space" }
                },
                {
                    "type": "Feature",
                    "geometry": { "type": "LineString", "coordinates": [[0, 0], [1, 1]] },
                    "properties": { "name": "Not A Point", "kind": "police" }
                },
                {
                    "type": "Feature",
                    "geometry": { "type": "Point", "coordinates": [36.81, -1.28] },
                    "properties": { "name": "  ", "kind": "shelter" }
                }
            ]
        }"#
    }

    #[test]
    fn test_default_catalog_covers_both_kinds() {
        let catalog = default_catalog();
        assert_eq!(catalog.len(), 4);
        assert!(catalog
            .iter()
            .any(|p| p.kind == SafePlaceKind::PoliceStation));
        assert!(catalog.iter().any(|p| p.kind == SafePlaceKind::Shelter));
    }

    #[test]
    fn test_parses_usable_features_and_skips_the_rest() {
        let places = from_geojson(catalog_json()).unwrap();
        assert_eq!(places.len(), 2);

        assert_eq!(places[0].id, "station-9");
        assert_eq!(places[0].name, "Ninth Station");
        assert_eq!(places[0].kind, SafePlaceKind::PoliceStation);
        assert!((places[0].coordinate.lat() - -1.29).abs() < 1e-9);
        assert!((places[0].coordinate.lon() - 36.82).abs() < 1e-9);

        assert_eq!(places[1].id, "place-1");
        assert_eq!(places[1].kind, SafePlaceKind::Shelter);
    }

    #[test]
    fn test_rejects_non_collection_documents() {
        let point = r#"{ "type": "Point", "coordinates": [36.8, -1.3] }"#;
        assert_eq!(from_geojson(point), Err(SafePlaceError::NotACollection));
    }

    #[test]
    fn test_rejects_malformed_documents() {
        assert!(matches!(
            from_geojson("{ not geojson"),
            Err(SafePlaceError::InvalidDocument { .. })
        ));
    }

    #[test]
    fn test_kind_tag_aliases() {
        assert_eq!(
            SafePlaceKind::from_tag("police"),
            Some(SafePlaceKind::PoliceStation)
        );
        assert_eq!(
            SafePlaceKind::from_tag("police_station"),
            Some(SafePlaceKind::PoliceStation)
        );
        assert_eq!(SafePlaceKind::from_tag("shelter"), Some(SafePlaceKind::Shelter));
        assert_eq!(
            SafePlaceKind::from_tag("safe_space"),
            Some(SafePlaceKind::Shelter)
        );
        assert_eq!(SafePlaceKind::from_tag("cafe"), None);
    }

    #[test]
    fn test_nearest_first_orders_by_distance() {
        let catalog = default_catalog();
        let from = ValidatedCoordinate::new(-1.286_389, 36.817_223).unwrap();
        let ranked = nearest_first(&catalog, from);

        assert_eq!(ranked.len(), catalog.len());
        assert_eq!(ranked[0].0.id, "central-police-station");
        assert!(ranked[0].1 < 1.0);
        for pair in ranked.windows(2) {
            assert!(pair[0].1 <= pair[1].1);
        }
    }
}
