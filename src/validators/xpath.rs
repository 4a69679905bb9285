//! XPath-style validator for XML artifacts.
//!
//! Supports the subset of XPath that LaserPost tests need:
//!
//! - absolute (`/LightBurnProject/CutSetting`) and descendant (`//CutSetting`) steps
//! - the `*` name wildcard
//! - attribute predicates `[@type]` and `[@type='Cut']`, positional predicates `[2]`
//! - a trailing attribute step (`//CutSetting/@type`, `//Shape/@*`)
//!
//! ```yaml
//! layers:
//!   post: "*lbrn*"
//!   file: "*.lbrn"
//!   validator: xpath
//!   queries:
//!     - path: //CutSetting
//!       count: 2
//!     - path: //Shape/@Type
//! ```
//!
//! The snapshot lists every query followed by its matches, each matched element
//! rendered with its subtree.

use std::collections::BTreeSet;
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::Deserialize;

use super::{read_artifact, ValidatorEngine, ValidatorOutcome};
use crate::options::CommandOptions;
use crate::setup::ValidatorSpec;

pub const KIND: &str = "xpath";

// =============================================================================
// DOCUMENT
// =============================================================================

#[derive(Debug, Clone, Default)]
struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    text: String,
    children: Vec<usize>,
}

/// Arena of elements in document order; index 0 is the synthetic document node.
#[derive(Debug)]
struct Document {
    nodes: Vec<Element>,
}

impl Document {
    fn parse(xml: &str) -> Result<Self, String> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);
        let mut nodes = vec![Element::default()];
        let mut stack = vec![0usize];

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    let idx = Self::push(&mut nodes, &stack, &e)?;
                    stack.push(idx);
                }
                Ok(Event::Empty(e)) => {
                    Self::push(&mut nodes, &stack, &e)?;
                }
                Ok(Event::End(_)) => {
                    if stack.len() <= 1 {
                        return Err("unexpected closing tag".to_string());
                    }
                    stack.pop();
                }
                Ok(Event::Text(t)) => {
                    let text = t.unescape().map_err(|e| e.to_string())?;
                    Self::append_text(&mut nodes, &stack, &text);
                }
                Ok(Event::CData(c)) => {
                    let bytes = c.into_inner();
                    Self::append_text(&mut nodes, &stack, &String::from_utf8_lossy(&bytes));
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(format!(
                        "error at position {}: {}",
                        reader.buffer_position(),
                        e
                    ))
                }
            }
        }

        if stack.len() != 1 {
            return Err("unclosed element at end of document".to_string());
        }
        Ok(Self { nodes })
    }

    fn push(nodes: &mut Vec<Element>, stack: &[usize], start: &BytesStart) -> Result<usize, String> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| e.to_string())?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value().map_err(|e| e.to_string())?.into_owned();
            attributes.push((key, value));
        }
        let idx = nodes.len();
        nodes.push(Element {
            name,
            attributes,
            ..Element::default()
        });
        if let Some(&parent) = stack.last() {
            nodes[parent].children.push(idx);
        }
        Ok(idx)
    }

    fn append_text(nodes: &mut [Element], stack: &[usize], text: &str) {
        if let Some(&current) = stack.last() {
            let element = &mut nodes[current];
            if !element.text.is_empty() {
                element.text.push(' ');
            }
            element.text.push_str(text.trim());
        }
    }

    fn attribute(&self, idx: usize, name: &str) -> Option<&str> {
        self.nodes[idx]
            .attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Appends every descendant of `idx` in document order.
    fn descendants(&self, idx: usize, out: &mut Vec<usize>) {
        let mut stack: Vec<usize> = self.nodes[idx].children.iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.nodes[next].children.iter().rev());
        }
    }

    fn render(&self, idx: usize, out: &mut Vec<String>) {
        let mut stack = vec![(idx, 0usize)];
        while let Some((next, depth)) = stack.pop() {
            let element = &self.nodes[next];
            let mut attributes: Vec<&(String, String)> = element.attributes.iter().collect();
            attributes.sort();
            let mut line = format!("{}<{}", "  ".repeat(depth), element.name);
            for (k, v) in attributes {
                line.push_str(&format!(" {}=\"{}\"", k, v));
            }
            line.push('>');
            if !element.text.is_empty() {
                line.push_str(&element.text);
            }
            out.push(line);
            stack.extend(element.children.iter().rev().map(|&child| (child, depth + 1)));
        }
    }
}

// =============================================================================
// PATHS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Descendant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Predicate {
    HasAttribute(String),
    AttributeEquals(String, String),
    Position(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Element {
        axis: Axis,
        name: Option<String>,
        predicates: Vec<Predicate>,
    },
    Attribute {
        axis: Axis,
        name: Option<String>,
    },
}

fn parse_predicate(body: &str) -> Result<Predicate, String> {
    let body = body.trim();
    if let Some(attr) = body.strip_prefix('@') {
        return match attr.split_once('=') {
            None => Ok(Predicate::HasAttribute(attr.trim().to_string())),
            Some((name, value)) => {
                let value = value.trim();
                let unquoted = value
                    .strip_prefix('\'')
                    .and_then(|v| v.strip_suffix('\''))
                    .or_else(|| value.strip_prefix('"').and_then(|v| v.strip_suffix('"')))
                    .ok_or_else(|| format!("unquoted predicate value {}", value))?;
                Ok(Predicate::AttributeEquals(
                    name.trim().to_string(),
                    unquoted.to_string(),
                ))
            }
        };
    }
    match body.parse::<usize>() {
        Ok(n) if n > 0 => Ok(Predicate::Position(n)),
        _ => Err(format!("unsupported predicate [{}]", body)),
    }
}

fn parse_step(axis: Axis, raw: &str) -> Result<Step, String> {
    if raw.is_empty() {
        return Err("empty step".to_string());
    }
    if let Some(attr) = raw.strip_prefix('@') {
        let name = match attr {
            "*" => None,
            "" => return Err("empty attribute name".to_string()),
            other => Some(other.to_string()),
        };
        return Ok(Step::Attribute { axis, name });
    }

    let (name_part, mut rest) = match raw.find('[') {
        Some(i) => (&raw[..i], &raw[i..]),
        None => (raw, ""),
    };
    let mut predicates = Vec::new();
    while !rest.is_empty() {
        let close = rest
            .find(']')
            .ok_or_else(|| format!("unclosed predicate in {}", raw))?;
        if !rest.starts_with('[') {
            return Err(format!("unexpected text in step {}", raw));
        }
        predicates.push(parse_predicate(&rest[1..close])?);
        rest = &rest[close + 1..];
    }
    let name = match name_part {
        "*" => None,
        "" => return Err(format!("missing element name in {}", raw)),
        other => Some(other.to_string()),
    };
    Ok(Step::Element {
        axis,
        name,
        predicates,
    })
}

/// Splits a path into steps, honouring `/` and `//` outside of predicates.
fn parse_path(path: &str) -> Result<Vec<Step>, String> {
    let path = path.trim();
    if !path.starts_with('/') {
        return Err("path must start with / or //".to_string());
    }
    let bytes = path.as_bytes();
    let mut steps = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let axis = if path[i..].starts_with("//") {
            i += 2;
            Axis::Descendant
        } else if bytes[i] == b'/' {
            i += 1;
            Axis::Child
        } else {
            return Err(format!("unexpected character at {}", i));
        };
        let start = i;
        let mut depth = 0usize;
        while i < bytes.len() {
            match bytes[i] {
                b'[' => depth += 1,
                b']' => depth = depth.saturating_sub(1),
                b'/' if depth == 0 => break,
                _ => {}
            }
            i += 1;
        }
        steps.push(parse_step(axis, &path[start..i])?);
    }
    if let Some(pos) = steps
        .iter()
        .position(|s| matches!(s, Step::Attribute { .. }))
    {
        if pos != steps.len() - 1 {
            return Err("attribute step must be last".to_string());
        }
    }
    if steps.is_empty() {
        return Err("empty path".to_string());
    }
    Ok(steps)
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Match {
    Element(usize),
    Attribute(usize, String, String),
}

/// Nodes whose children an element step selects from: the context itself for
/// `/`, the context and all its descendants for `//`.
fn parents(doc: &Document, context: &BTreeSet<usize>, axis: Axis) -> BTreeSet<usize> {
    let mut out = context.clone();
    if axis == Axis::Descendant {
        let mut below = Vec::new();
        for &ctx in context {
            doc.descendants(ctx, &mut below);
        }
        out.extend(below);
    }
    out
}

fn evaluate(doc: &Document, steps: &[Step]) -> Vec<Match> {
    let mut context: BTreeSet<usize> = BTreeSet::from([0]);
    for step in steps {
        match step {
            Step::Element {
                axis,
                name,
                predicates,
            } => {
                // Positions count among the children of one parent.
                let mut next = BTreeSet::new();
                for parent in parents(doc, &context, *axis) {
                    let mut found: Vec<usize> = doc.nodes[parent]
                        .children
                        .iter()
                        .copied()
                        .filter(|&n| name.as_ref().map_or(true, |name| doc.nodes[n].name == *name))
                        .collect();
                    for predicate in predicates {
                        found = match predicate {
                            Predicate::HasAttribute(attr) => found
                                .into_iter()
                                .filter(|&n| doc.attribute(n, attr).is_some())
                                .collect(),
                            Predicate::AttributeEquals(attr, value) => found
                                .into_iter()
                                .filter(|&n| doc.attribute(n, attr) == Some(value.as_str()))
                                .collect(),
                            Predicate::Position(p) => found.get(p - 1).copied().into_iter().collect(),
                        };
                    }
                    next.extend(found);
                }
                context = next;
            }
            Step::Attribute { axis, name } => {
                let owners = parents(doc, &context, *axis);
                let mut matches = Vec::new();
                for owner in owners {
                    for (k, v) in &doc.nodes[owner].attributes {
                        if name.as_ref().map_or(true, |name| k == name) {
                            matches.push(Match::Attribute(owner, k.clone(), v.clone()));
                        }
                    }
                }
                return matches;
            }
        }
    }
    context.into_iter().map(Match::Element).collect()
}

/// Runs an XPath-subset query against an XML string, rendering each match.
pub fn query(xml: &str, path: &str) -> Result<Vec<String>, String> {
    let doc = Document::parse(xml).map_err(|e| format!("invalid XML: {}", e))?;
    let steps = parse_path(path).map_err(|e| format!("invalid path \"{}\": {}", path, e))?;
    Ok(render_matches(&doc, &evaluate(&doc, &steps)))
}

fn render_matches(doc: &Document, matches: &[Match]) -> Vec<String> {
    let mut lines = Vec::new();
    for m in matches {
        match m {
            Match::Element(idx) => doc.render(*idx, &mut lines),
            Match::Attribute(owner, key, value) => {
                lines.push(format!("{}@{}=\"{}\"", doc.nodes[*owner].name, key, value))
            }
        }
    }
    lines
}

// =============================================================================
// ENGINE
// =============================================================================

#[derive(Debug, Deserialize)]
struct XPathQuery {
    path: String,
    /// Exact number of matches expected, when given.
    #[serde(default)]
    count: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct XPathParams {
    #[serde(default)]
    queries: Vec<XPathQuery>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct XPathValidator;

impl ValidatorEngine for XPathValidator {
    fn validate(
        &self,
        spec: &ValidatorSpec,
        dir: &Path,
        file: &str,
        _options: &CommandOptions,
    ) -> Option<ValidatorOutcome> {
        let params: XPathParams = match spec.params_as() {
            Ok(params) => params,
            Err(e) => {
                return Some(ValidatorOutcome::failed(
                    String::new(),
                    format!("Invalid xpath validator parameters: {}", e),
                ))
            }
        };
        if params.queries.is_empty() {
            return Some(ValidatorOutcome::failed(
                String::new(),
                "xpath validator declares no queries.",
            ));
        }

        let content = read_artifact(dir, file)?;
        let doc = match Document::parse(&content) {
            Ok(doc) => doc,
            Err(e) => {
                return Some(ValidatorOutcome::failed(
                    format!("# {}\n", file),
                    format!("Invalid XML in \"{}\": {}", file, e),
                ))
            }
        };

        let mut snapshot = format!("# {}\n", file);
        let mut failures = Vec::new();
        for q in &params.queries {
            let steps = match parse_path(&q.path) {
                Ok(steps) => steps,
                Err(e) => {
                    failures.push(format!("Invalid path \"{}\": {}", q.path, e));
                    continue;
                }
            };
            let matches = evaluate(&doc, &steps);
            snapshot.push_str(&format!("{} ({} matches)\n", q.path, matches.len()));
            for line in render_matches(&doc, &matches) {
                snapshot.push_str("  ");
                snapshot.push_str(&line);
                snapshot.push('\n');
            }
            if let Some(expected) = q.count {
                if matches.len() != expected {
                    failures.push(format!(
                        "Query \"{}\" matched {} node(s), expected {}.",
                        q.path,
                        matches.len(),
                        expected
                    ));
                }
            }
        }

        if failures.is_empty() {
            Some(ValidatorOutcome::passed(snapshot))
        } else {
            Some(ValidatorOutcome::failed(snapshot, failures.join(" ")))
        }
    }
}
