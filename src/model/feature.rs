//! Feature payload carried through the pipeline.
//!
//! The hub treats features as mostly opaque JSON. Only the pieces the built-in
//! handlers and the heap storage need are interpreted: the id, the tag list in
//! the xyz namespace, the source id in the meta namespace and the geometry
//! extent.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Property key of the xyz namespace holding hub-managed metadata.
pub const XYZ_NS: &str = "@ns:com:here:xyz";
/// Property key of the meta namespace supplied by clients.
pub const META_NS: &str = "@ns:com:here:mom:meta";
/// Key of the tag array inside the xyz namespace.
pub const TAGS: &str = "tags";
/// Key of the source identifier inside the meta namespace.
pub const SOURCE_ID: &str = "sourceId";

/// Axis-aligned bounding box in WGS84 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    /// Minimum longitude.
    pub west: f64,
    /// Minimum latitude.
    pub south: f64,
    /// Maximum longitude.
    pub east: f64,
    /// Maximum latitude.
    pub north: f64,
}

impl BBox {
    /// Create a bounding box.
    #[must_use]
    pub const fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    /// Whether two boxes share at least one point.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.west <= other.east
            && other.west <= self.east
            && self.south <= other.north
            && other.south <= self.north
    }

    fn extend(self, lon: f64, lat: f64) -> Self {
        Self {
            west: self.west.min(lon),
            south: self.south.min(lat),
            east: self.east.max(lon),
            north: self.north.max(lat),
        }
    }
}

/// A GeoJSON-like feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    /// Feature identifier, unique within a space.
    pub id: String,
    /// Raw GeoJSON geometry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Value>,
    /// Free-form properties, including the namespaces.
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl Feature {
    /// Create a feature without geometry or properties.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            geometry: None,
            properties: Map::new(),
        }
    }

    /// Attach a point geometry.
    #[must_use]
    pub fn with_point(mut self, lon: f64, lat: f64) -> Self {
        self.geometry = Some(serde_json::json!({
            "type": "Point",
            "coordinates": [lon, lat],
        }));
        self
    }

    /// Set a top-level property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Tags currently stored in the xyz namespace.
    #[must_use]
    pub fn tags(&self) -> Vec<String> {
        self.properties
            .get(XYZ_NS)
            .and_then(|ns| ns.get(TAGS))
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether the feature carries the given tag.
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags().iter().any(|t| t == tag)
    }

    /// Add a tag unless already present. Returns `true` if the tag was added.
    pub fn add_tag(&mut self, tag: &str) -> bool {
        let tags = self.tags_mut();
        if tags.iter().any(|t| t.as_str() == Some(tag)) {
            return false;
        }
        tags.push(Value::String(tag.to_owned()));
        true
    }

    /// Remove a tag. Returns `true` if it was present.
    pub fn remove_tag(&mut self, tag: &str) -> bool {
        let tags = self.tags_mut();
        let before = tags.len();
        tags.retain(|t| t.as_str() != Some(tag));
        tags.len() != before
    }

    /// Remove every tag starting with `prefix`, returning how many were removed.
    pub fn remove_tags_with_prefix(&mut self, prefix: &str) -> usize {
        let tags = self.tags_mut();
        let before = tags.len();
        tags.retain(|t| !t.as_str().is_some_and(|s| s.starts_with(prefix)));
        before - tags.len()
    }

    /// The client-supplied source id from the meta namespace, if any.
    #[must_use]
    pub fn source_id(&self) -> Option<String> {
        let value = self.properties.get(META_NS)?.get(SOURCE_ID)?;
        match value {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Look up a property by path, starting below `properties`.
    #[must_use]
    pub fn property(&self, path: &[String]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut current = self.properties.get(first)?;
        for segment in rest {
            current = current.get(segment)?;
        }
        Some(current)
    }

    /// Extent of the geometry, computed from all coordinate pairs.
    #[must_use]
    pub fn bounds(&self) -> Option<BBox> {
        let coordinates = self.geometry.as_ref()?.get("coordinates")?;
        let mut bounds = None;
        collect_bounds(coordinates, &mut bounds);
        bounds
    }

    fn tags_mut(&mut self) -> &mut Vec<Value> {
        let ns = self
            .properties
            .entry(XYZ_NS)
            .or_insert_with(|| Value::Object(Map::new()));
        if !ns.is_object() {
            *ns = Value::Object(Map::new());
        }
        let Value::Object(ns) = ns else {
            unreachable!("namespace was just replaced by an object")
        };
        let tags = ns
            .entry(TAGS)
            .or_insert_with(|| Value::Array(Vec::new()));
        if !tags.is_array() {
            *tags = Value::Array(Vec::new());
        }
        let Value::Array(tags) = tags else {
            unreachable!("tags were just replaced by an array")
        };
        tags
    }
}

fn collect_bounds(value: &Value, bounds: &mut Option<BBox>) {
    let Some(items) = value.as_array() else {
        return;
    };
    if let [Value::Number(lon), Value::Number(lat), ..] = items.as_slice() {
        if let (Some(lon), Some(lat)) = (lon.as_f64(), lat.as_f64()) {
            *bounds = Some(match *bounds {
                Some(b) => b.extend(lon, lat),
                None => BBox::new(lon, lat, lon, lat),
            });
        }
        return;
    }
    for item in items {
        collect_bounds(item, bounds);
    }
}
