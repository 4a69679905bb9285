//! # Validator Engines
//!
//! A validator engine turns one artifact file into a canonical snapshot, and may
//! report an explicit failure. Engines are looked up by the kind tag of a
//! [`ValidatorSpec`] in a [`ValidatorRegistry`]; adding a kind means registering
//! an engine, never editing the dispatcher.
//!
//! ## Module Structure
//!
//! - **`text`**: line-oriented regex filtering of text artifacts (G-code, logs)
//! - **`xpath`**: path queries over XML artifacts (LightBurn `.lbrn`, SVG)

use std::collections::HashMap;
use std::path::Path;

use crate::options::CommandOptions;
use crate::setup::ValidatorSpec;

pub mod text;
pub mod xpath;

pub use text::TextValidator;
pub use xpath::XPathValidator;

// ============================================================================
// CORE TYPES AND TRAITS
// ============================================================================

/// Result of one engine invocation.
///
/// The snapshot is persisted even when `failure` is set, so a failed run still
/// leaves its evidence next to the artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorOutcome {
    pub snapshot: String,
    pub failure: Option<String>,
}

impl ValidatorOutcome {
    pub fn passed(snapshot: impl Into<String>) -> Self {
        Self {
            snapshot: snapshot.into(),
            failure: None,
        }
    }

    pub fn failed(snapshot: impl Into<String>, failure: impl Into<String>) -> Self {
        Self {
            snapshot: snapshot.into(),
            failure: Some(failure.into()),
        }
    }
}

/// The uniform engine contract.
///
/// Returning `None` signals an internal engine failure (the artifact could not
/// even be examined).
pub trait ValidatorEngine {
    fn validate(
        &self,
        spec: &ValidatorSpec,
        dir: &Path,
        file: &str,
        options: &CommandOptions,
    ) -> Option<ValidatorOutcome>;
}

impl<F> ValidatorEngine for F
where
    F: Fn(&ValidatorSpec, &Path, &str, &CommandOptions) -> Option<ValidatorOutcome>,
{
    fn validate(
        &self,
        spec: &ValidatorSpec,
        dir: &Path,
        file: &str,
        options: &CommandOptions,
    ) -> Option<ValidatorOutcome> {
        self(spec, dir, file, options)
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Validator engines keyed by kind tag.
#[derive(Default)]
pub struct ValidatorRegistry {
    engines: HashMap<String, Box<dyn ValidatorEngine>>,
}

impl ValidatorRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in `text` and `xpath` engines.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(text::KIND, TextValidator);
        registry.register(xpath::KIND, XPathValidator);
        registry
    }

    pub fn register<E: ValidatorEngine + 'static>(&mut self, kind: &str, engine: E) {
        self.engines.insert(kind.to_string(), Box::new(engine));
    }

    pub fn get(&self, kind: &str) -> Option<&dyn ValidatorEngine> {
        self.engines.get(kind).map(|engine| engine.as_ref())
    }

    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.engines.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

impl std::fmt::Debug for ValidatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatorRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// Reads an artifact for an engine, logging instead of failing loudly.
pub(crate) fn read_artifact(dir: &Path, file: &str) -> Option<String> {
    let path = dir.join(file);
    match std::fs::read(&path) {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "cannot read artifact");
            None
        }
    }
}
