//! # Test Collection and Setup Resolution
//!
//! The test collection is loaded once per run from a YAML or JSON file:
//!
//! ```yaml
//! setups:
//!   base:
//!     cnc: circles
//!     posts: [laserpost-lbrn, laserpost-gcode]
//!     validators:
//!       layers:
//!         post: "*lbrn*"
//!         file: "*.lbrn"
//!         validator: xpath
//!         queries:
//!           - path: //CutSetting
//!   grbl:
//!     extends: base
//!     properties:
//!       machine0100SpeedUnits: mmpm
//! tests:
//!   - name: Circles (grbl)
//!     setup: grbl
//!     posts: [laserpost-gcode]
//! ```
//!
//! Named setups compose through `extends`; a test suite names a base setup and
//! may override any field. Resolution is pure and recomputed per suite.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::errors::{HarnessError, Result};

// =============================================================================
// VALIDATOR DECLARATIONS
// =============================================================================

/// A declarative rule binding a post-name pattern, an artifact-file pattern and a
/// validator kind. Kind-specific parameters are carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorSpec {
    /// Glob matched against the post identifier.
    pub post: String,
    /// Glob matched against artifact file names.
    pub file: String,
    /// Validator kind tag (`xpath`, `text`, ...).
    pub validator: String,
    #[serde(flatten)]
    pub params: serde_json::Map<String, Value>,
}

impl ValidatorSpec {
    pub fn new(post: &str, file: &str, validator: &str) -> Self {
        Self {
            post: post.to_string(),
            file: file.to_string(),
            validator: validator.to_string(),
            params: serde_json::Map::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: Value) -> Self {
        self.params.insert(key.to_string(), value);
        self
    }

    /// Deserializes the kind-specific parameters into an engine's own type.
    pub fn params_as<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(Value::Object(self.params.clone()))
    }
}

/// Validators keyed by name, in declaration order.
///
/// Order matters: validators run in the order they were declared, and a key
/// redeclared by an inheriting setup keeps its original position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatorMap(Vec<(String, ValidatorSpec)>);

impl ValidatorMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a validator, keeping the position of an existing key.
    pub fn insert(&mut self, key: impl Into<String>, spec: ValidatorSpec) {
        let key = key.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = spec,
            None => self.0.push((key, spec)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&ValidatorSpec> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ValidatorSpec)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Overlays `other` on top of `self`, key by key.
    pub fn merge(&mut self, other: &ValidatorMap) {
        for (key, spec) in other.iter() {
            self.insert(key, spec.clone());
        }
    }
}

impl<K: Into<String>> FromIterator<(K, ValidatorSpec)> for ValidatorMap {
    fn from_iter<I: IntoIterator<Item = (K, ValidatorSpec)>>(iter: I) -> Self {
        let mut map = ValidatorMap::new();
        for (key, spec) in iter {
            map.insert(key, spec);
        }
        map
    }
}

impl<'de> Deserialize<'de> for ValidatorMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct ValidatorMapVisitor;

        impl<'de> Visitor<'de> for ValidatorMapVisitor {
            type Value = ValidatorMap;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of validator names to validator declarations")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut map = ValidatorMap::new();
                while let Some((key, spec)) = access.next_entry::<String, ValidatorSpec>()? {
                    map.insert(key, spec);
                }
                Ok(map)
            }

            fn visit_unit<E: serde::de::Error>(self) -> std::result::Result<Self::Value, E> {
                Ok(ValidatorMap::new())
            }
        }

        deserializer.deserialize_map(ValidatorMapVisitor)
    }
}

impl Serialize for ValidatorMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, spec) in &self.0 {
            map.serialize_entry(key, spec)?;
        }
        map.end()
    }
}

// =============================================================================
// COLLECTION TYPES
// =============================================================================

/// A named setup fragment. Every field is optional so fragments compose.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Setup {
    /// Parent setup this fragment inherits from.
    #[serde(default)]
    pub extends: Option<String>,
    #[serde(default)]
    pub cnc: Option<String>,
    #[serde(default)]
    pub posts: Option<Vec<String>>,
    #[serde(default)]
    pub validators: ValidatorMap,
    /// Post properties passed on the post-processor command line.
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

/// One test suite: a base setup plus optional overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSuite {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Name of the base setup.
    #[serde(default)]
    pub setup: Option<String>,
    #[serde(default)]
    pub cnc: Option<String>,
    #[serde(default)]
    pub posts: Option<Vec<String>>,
    #[serde(default)]
    pub validators: ValidatorMap,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

/// Every declared test suite and the named setups they inherit from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestSuiteCollection {
    #[serde(default)]
    pub tests: Vec<TestSuite>,
    #[serde(default)]
    pub setups: BTreeMap<String, Setup>,
}

impl TestSuiteCollection {
    /// Loads a collection from a `.yaml`/`.yml` or `.json` file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| HarnessError::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        let parsed = match ext.as_deref() {
            Some("yaml") | Some("yml") => {
                serde_yaml::from_str::<Self>(&content).map_err(|e| e.to_string())
            }
            Some("json") => serde_json::from_str::<Self>(&content).map_err(|e| e.to_string()),
            _ => {
                return Err(HarnessError::UnsupportedFormat {
                    path: path.to_path_buf(),
                })
            }
        };
        parsed.map_err(|message| HarnessError::ParseConfig {
            path: path.to_path_buf(),
            message,
        })
    }
}

/// The effective configuration of one test suite.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResolvedSetup {
    pub name: String,
    pub cnc: Option<String>,
    pub posts: Vec<String>,
    pub validators: ValidatorMap,
    pub properties: BTreeMap<String, Value>,
}

impl ResolvedSetup {
    /// Returns the configuration problem that makes this setup unrunnable, if any.
    ///
    /// A missing posts list takes precedence over a missing CNC target.
    pub fn structural_error(&self) -> Option<&'static str> {
        if self.posts.is_empty() {
            Some("No posts defined.")
        } else if self.cnc.as_deref().map_or(true, str::is_empty) {
            Some("No CNC defined.")
        } else {
            None
        }
    }

    fn overlay(
        &mut self,
        cnc: &Option<String>,
        posts: &Option<Vec<String>>,
        validators: &ValidatorMap,
        properties: &BTreeMap<String, Value>,
    ) {
        if cnc.is_some() {
            self.cnc = cnc.clone();
        }
        if let Some(posts) = posts {
            self.posts = posts.clone();
        }
        self.validators.merge(validators);
        self.properties
            .extend(properties.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
}

// =============================================================================
// RESOLUTION
// =============================================================================

/// Resolves a named setup by walking its `extends` chain.
///
/// Fragments are applied root first, so a child overrides its parent field by
/// field; validators and properties merge by key.
pub fn aggregate_setup(name: &str, setups: &BTreeMap<String, Setup>) -> Result<ResolvedSetup> {
    let mut chain: Vec<(&str, &Setup)> = Vec::new();
    let mut current = Some(name);
    while let Some(setup_name) = current {
        if chain.iter().any(|(n, _)| *n == setup_name) {
            let mut names: Vec<&str> = chain.iter().map(|(n, _)| *n).collect();
            names.push(setup_name);
            return Err(HarnessError::InheritanceCycle {
                chain: names.join(" -> "),
            });
        }
        let setup = setups
            .get(setup_name)
            .ok_or_else(|| HarnessError::UnknownSetup {
                name: setup_name.to_string(),
            })?;
        chain.push((setup_name, setup));
        current = setup.extends.as_deref();
    }

    let mut resolved = ResolvedSetup {
        name: name.to_string(),
        ..ResolvedSetup::default()
    };
    for (_, setup) in chain.iter().rev() {
        resolved.overlay(&setup.cnc, &setup.posts, &setup.validators, &setup.properties);
    }
    Ok(resolved)
}

/// Applies a test suite's overrides on top of its resolved base setup.
pub fn merge_setups(suite: &TestSuite, base: ResolvedSetup) -> ResolvedSetup {
    let mut merged = base;
    merged.name = suite.name.clone();
    merged.overlay(&suite.cnc, &suite.posts, &suite.validators, &suite.properties);
    merged
}

/// Computes the effective setup of a suite: inheritance first, then overrides.
pub fn resolve_suite(
    suite: &TestSuite,
    setups: &BTreeMap<String, Setup>,
) -> Result<ResolvedSetup> {
    let base = match suite.setup.as_deref() {
        Some(name) => aggregate_setup(name, setups)?,
        None => ResolvedSetup::default(),
    };
    Ok(merge_setups(suite, base))
}
