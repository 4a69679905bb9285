//! Text validator: snapshots the lines of a text artifact that survive a set of
//! include/exclude regular expressions.
//!
//! ```yaml
//! gcode:
//!   post: "*gcode*"
//!   file: "*.gcode"
//!   validator: text
//!   include: ['^G[0-3] ', '^M[345]']
//!   exclude: ['^; Generated']
//!   required: true
//! ```

use std::path::Path;

use regex::Regex;
use serde::Deserialize;

use super::{read_artifact, ValidatorEngine, ValidatorOutcome};
use crate::options::CommandOptions;
use crate::setup::ValidatorSpec;

pub const KIND: &str = "text";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TextParams {
    /// Keep only lines matching one of these; empty keeps every line.
    include: Vec<String>,
    /// Drop lines matching any of these (timestamps, version banners).
    exclude: Vec<String>,
    /// Fail when no line survives the filters.
    required: bool,
}

fn compile(patterns: &[String]) -> Result<Vec<Regex>, String> {
    patterns
        .iter()
        .map(|p| Regex::new(p).map_err(|e| format!("Invalid text pattern \"{}\": {}", p, e)))
        .collect()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TextValidator;

impl ValidatorEngine for TextValidator {
    fn validate(
        &self,
        spec: &ValidatorSpec,
        dir: &Path,
        file: &str,
        _options: &CommandOptions,
    ) -> Option<ValidatorOutcome> {
        let params: TextParams = match spec.params_as() {
            Ok(params) => params,
            Err(e) => {
                return Some(ValidatorOutcome::failed(
                    String::new(),
                    format!("Invalid text validator parameters: {}", e),
                ))
            }
        };
        let (include, exclude) = match (compile(&params.include), compile(&params.exclude)) {
            (Ok(include), Ok(exclude)) => (include, exclude),
            (Err(e), _) | (_, Err(e)) => return Some(ValidatorOutcome::failed(String::new(), e)),
        };

        let content = read_artifact(dir, file)?;
        let kept: Vec<&str> = content
            .lines()
            .filter(|line| include.is_empty() || include.iter().any(|re| re.is_match(line)))
            .filter(|line| !exclude.iter().any(|re| re.is_match(line)))
            .collect();

        let mut snapshot = format!("# {}\n", file);
        for line in &kept {
            snapshot.push_str(line);
            snapshot.push('\n');
        }

        if params.required && kept.is_empty() {
            return Some(ValidatorOutcome::failed(
                snapshot,
                format!("No lines in \"{}\" matched the text patterns.", file),
            ));
        }
        Some(ValidatorOutcome::passed(snapshot))
    }
}
