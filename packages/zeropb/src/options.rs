//! Codec settings. These are plain data with serde derives, so a host
//! application can keep them in its own config file.

use serde::{Serialize, Deserialize};


/// Default limit on how deeply unmarshaling may descend through lists and
/// maps.
pub const DEFAULT_MAX_DEPTH: usize = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarshalOptions {
    pub map_order: MapOrder,
}

/// Order map entries are written in.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapOrder {
    /// Whatever order the map iterates in. Cheapest, but two marshals of an
    /// equal map may produce different bytes.
    #[default]
    Iteration,
    /// Ascending key order, making the output byte-stable.
    SortedByKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnmarshalOptions {
    /// Maximum list and map nesting depth. Exceeding it is `MalformedData`.
    pub max_depth: usize,
}

impl MarshalOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map_order(mut self, map_order: MapOrder) -> Self {
        self.map_order = map_order;
        self
    }
}

impl UnmarshalOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}

impl Default for UnmarshalOptions {
    fn default() -> Self {
        UnmarshalOptions {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}


#[test]
fn test_options_from_config() {
    let options: MarshalOptions = serde_json::from_str(r#"{"map_order": "sorted_by_key"}"#).unwrap();
    assert_eq!(options, MarshalOptions::new().map_order(MapOrder::SortedByKey));
    let options: MarshalOptions = serde_json::from_str("{}").unwrap();
    assert_eq!(options.map_order, MapOrder::Iteration);
    let options: UnmarshalOptions = serde_json::from_str(r#"{"max_depth": 7}"#).unwrap();
    assert_eq!(options, UnmarshalOptions::new().max_depth(7));
}
