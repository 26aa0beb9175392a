//! Plan document parser.
//!
//! Walks the generic document tree, dispatches every rule mapping to the
//! constructor registered for its keyword, and collects a [`ParseError`] for
//! each problem instead of stopping. A node that fails is replaced by a
//! [`Placeholder`] of the expected family so the walk can continue and every
//! error surfaces in one pass.
//!
//! Error paths name the offending node, e.g. `plans[0].that[1].all_of[0]`.
//!
//! ```yaml
//! plans:
//!   - plan_name: tidy up
//!     from:
//!       - handles: [alice, bob]
//!     that:
//!       - follower: {less_than: 10}
//!     do:
//!       - block
//! ```

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;

use crate::constants::SET_ANY_OF;
use crate::errors::ParseError;
use crate::plan::Plan;
use crate::rules::set::{FilterSet, SourceSet};
use crate::rules::{ActionRule, FilterRule, Placeholder, RuleFamily, RuleRef, RuleRegistry, SourceRule};

const DOCUMENT_KEYS: &[&str] = &["plans"];
const PLAN_KEYS: &[&str] = &["plan_name", "from", "that", "do"];

static NULL: Value = Value::Null;

/// Parse a YAML plan document into plans, or every error found in it.
pub fn parse_plans(text: &str, registry: &RuleRegistry) -> Result<Vec<Plan>, Vec<ParseError>> {
    let document: Value = match serde_yml::from_str(text) {
        Ok(document) => document,
        Err(e) => {
            return Err(vec![ParseError::new(
                "<document>",
                format!("plan file is not valid YAML: {e}"),
            )]);
        }
    };

    let mut parser = Parser::new(registry);
    let plans = parser.parse_document(&document);
    parser.finish(plans)
}

/// One rule mapping split into its keyword and body.
#[derive(Debug)]
pub struct RuleNode<'a> {
    /// Path of the list item or mapping value holding the rule.
    pub path: String,
    pub keyword: String,
    pub body: &'a Value,
}

impl RuleNode<'_> {
    /// Path of the rule's body, `<path>.<keyword>`.
    pub fn body_path(&self) -> String {
        format!("{}.{}", self.path, self.keyword)
    }

    pub fn rule_ref(&self) -> RuleRef {
        RuleRef::new(self.keyword.clone(), self.path.clone())
    }
}

pub struct Parser<'r> {
    registry: &'r RuleRegistry,
    errors: Vec<ParseError>,
}

impl<'r> Parser<'r> {
    pub fn new(registry: &'r RuleRegistry) -> Self {
        Self {
            registry,
            errors: Vec::new(),
        }
    }

    pub fn error(&mut self, path: &str, message: impl Into<String>) {
        self.errors.push(ParseError::new(path, message));
    }

    pub fn errors(&self) -> &[ParseError] {
        &self.errors
    }

    /// Hand back `value` if the walk was clean, otherwise the errors.
    pub fn finish<T>(self, value: T) -> Result<T, Vec<ParseError>> {
        if self.errors.is_empty() {
            Ok(value)
        } else {
            Err(self.errors)
        }
    }

    pub fn parse_document(&mut self, document: &Value) -> Vec<Plan> {
        let Some(map) = document.as_object() else {
            self.error("<document>", "expected a mapping with a 'plans' list");
            return Vec::new();
        };
        self.unknown_fields("<document>", map, DOCUMENT_KEYS);

        let Some(items) = map.get("plans").and_then(Value::as_array) else {
            self.error("plans", "missing required list of plans");
            return Vec::new();
        };
        if items.is_empty() {
            self.error("plans", "must contain at least one plan");
        }

        let mut names = HashSet::new();
        items
            .iter()
            .enumerate()
            .filter_map(|(index, item)| self.parse_plan(&format!("plans[{index}]"), item, &mut names))
            .collect()
    }

    fn parse_plan(&mut self, path: &str, value: &Value, names: &mut HashSet<String>) -> Option<Plan> {
        let Some(map) = value.as_object() else {
            self.error(path, "a plan must be a mapping");
            return None;
        };
        self.unknown_fields(path, map, PLAN_KEYS);

        let name = match map.get("plan_name") {
            Some(Value::String(name)) if !name.trim().is_empty() => {
                if !names.insert(name.clone()) {
                    self.error(&format!("{path}.plan_name"), format!("duplicate plan name '{name}'"));
                }
                Some(name.clone())
            }
            Some(_) => {
                self.error(&format!("{path}.plan_name"), "must be a non-empty string");
                None
            }
            None => {
                self.error(path, "missing required field 'plan_name'");
                None
            }
        };

        let from_path = format!("{path}.from");
        let sources = match map.get("from") {
            Some(value) => self.parse_sources(&from_path, value),
            None => {
                self.error(path, "missing required field 'from'");
                Vec::new()
            }
        };
        if map.contains_key("from") && sources.is_empty() {
            self.error(&from_path, "must contain at least one source rule");
        }

        let that_path = format!("{path}.that");
        let filter = map.get("that").map(|value| {
            let children = self.parse_filters(&that_path, value);
            if children.is_empty() {
                self.error(&that_path, "must contain at least one filter rule when present");
            }
            Arc::new(FilterSet::any_of(RuleRef::new(SET_ANY_OF, &that_path), children))
                as Arc<dyn FilterRule>
        });

        let do_path = format!("{path}.do");
        let actions = match map.get("do") {
            Some(value) => self.parse_actions(&do_path, value),
            None => {
                self.error(path, "missing required field 'do'");
                Vec::new()
            }
        };
        if map.contains_key("do") && actions.is_empty() {
            self.error(&do_path, "must contain at least one action rule");
        }

        let source: Arc<dyn SourceRule> =
            Arc::new(SourceSet::any_of(RuleRef::new(SET_ANY_OF, &from_path), sources));
        name.map(|name| Plan::new(name, source, filter, actions))
    }

    pub fn parse_sources(&mut self, path: &str, value: &Value) -> Vec<Arc<dyn SourceRule>> {
        self.items(path, value)
            .into_iter()
            .map(|(item_path, item)| self.parse_source(&item_path, item))
            .collect()
    }

    pub fn parse_filters(&mut self, path: &str, value: &Value) -> Vec<Arc<dyn FilterRule>> {
        self.items(path, value)
            .into_iter()
            .map(|(item_path, item)| self.parse_filter(&item_path, item))
            .collect()
    }

    pub fn parse_actions(&mut self, path: &str, value: &Value) -> Vec<Arc<dyn ActionRule>> {
        self.items(path, value)
            .into_iter()
            .map(|(item_path, item)| self.parse_action(&item_path, item))
            .collect()
    }

    pub fn parse_source(&mut self, path: &str, value: &Value) -> Arc<dyn SourceRule> {
        let built = self.split(path, value).and_then(|node| {
            match self.registry.source(&node.keyword) {
                Some(constructor) => constructor(self, &node),
                None => {
                    self.unknown_keyword(&node, RuleFamily::Source);
                    None
                }
            }
        });
        built.unwrap_or_else(|| Arc::new(Placeholder::new(path)))
    }

    pub fn parse_filter(&mut self, path: &str, value: &Value) -> Arc<dyn FilterRule> {
        let built = self.split(path, value).and_then(|node| {
            match self.registry.filter(&node.keyword) {
                Some(constructor) => constructor(self, &node),
                None => {
                    self.unknown_keyword(&node, RuleFamily::Filter);
                    None
                }
            }
        });
        built.unwrap_or_else(|| Arc::new(Placeholder::new(path)))
    }

    pub fn parse_action(&mut self, path: &str, value: &Value) -> Arc<dyn ActionRule> {
        let built = self.split(path, value).and_then(|node| {
            match self.registry.action(&node.keyword) {
                Some(constructor) => constructor(self, &node),
                None => {
                    self.unknown_keyword(&node, RuleFamily::Action);
                    None
                }
            }
        });
        built.unwrap_or_else(|| Arc::new(Placeholder::new(path)))
    }

    /// Field reader over a rule body. A missing body reads as an empty mapping.
    pub fn body<'p, 'a>(&'p mut self, node: &RuleNode<'a>) -> Option<Body<'p, 'r, 'a>> {
        let path = node.body_path();
        let map = match node.body {
            Value::Null => None,
            Value::Object(map) => Some(map),
            _ => {
                self.error(&path, format!("'{}' expects a mapping", node.keyword));
                return None;
            }
        };
        Some(Body {
            parser: self,
            path,
            map,
            known: Vec::new(),
            ok: true,
        })
    }

    /// A sequence of strings (numbers are accepted and stringified).
    pub fn string_list(&mut self, path: &str, value: &Value) -> Option<Vec<String>> {
        let Some(items) = value.as_array() else {
            self.error(path, "expected a list of strings");
            return None;
        };
        let mut strings = Vec::with_capacity(items.len());
        let mut ok = true;
        for (index, item) in items.iter().enumerate() {
            match item {
                Value::String(s) if !s.trim().is_empty() => strings.push(s.trim().to_string()),
                Value::Number(n) => strings.push(n.to_string()),
                _ => {
                    self.error(&format!("{path}[{index}]"), "expected a non-empty string");
                    ok = false;
                }
            }
        }
        ok.then_some(strings)
    }

    /// A sequence of positive integer ids, given as numbers or numeric strings.
    pub fn id_list(&mut self, path: &str, value: &Value) -> Option<Vec<u64>> {
        let Some(items) = value.as_array() else {
            self.error(path, "expected a list of ids");
            return None;
        };
        let mut ids = Vec::with_capacity(items.len());
        let mut ok = true;
        for (index, item) in items.iter().enumerate() {
            match as_id(item) {
                Some(id) => ids.push(id),
                None => {
                    self.error(&format!("{path}[{index}]"), "expected a positive integer id");
                    ok = false;
                }
            }
        }
        ok.then_some(ids)
    }

    fn items<'a>(&mut self, path: &str, value: &'a Value) -> Vec<(String, &'a Value)> {
        match value {
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(index, item)| (format!("{path}[{index}]"), item))
                .collect(),
            _ => {
                self.error(path, "expected a list of rules");
                Vec::new()
            }
        }
    }

    fn split<'a>(&mut self, path: &str, value: &'a Value) -> Option<RuleNode<'a>> {
        match value {
            Value::String(keyword) if !keyword.trim().is_empty() => Some(RuleNode {
                path: path.to_string(),
                keyword: keyword.trim().to_string(),
                body: &NULL,
            }),
            Value::Object(map) if map.len() == 1 => {
                let (keyword, body) = map.iter().next()?;
                Some(RuleNode {
                    path: path.to_string(),
                    keyword: keyword.clone(),
                    body,
                })
            }
            Value::Object(map) if map.is_empty() => {
                self.error(path, "empty rule mapping, expected exactly one rule keyword");
                None
            }
            Value::Object(map) => {
                let keys: Vec<&str> = map.keys().map(String::as_str).collect();
                self.error(
                    path,
                    format!("expected exactly one rule keyword, found: {}", keys.join(", ")),
                );
                None
            }
            _ => {
                self.error(path, "expected a rule mapping or a rule keyword");
                None
            }
        }
    }

    fn unknown_keyword(&mut self, node: &RuleNode<'_>, expected: RuleFamily) {
        if self.registry.is_reserved(expected, &node.keyword) {
            self.error(
                &node.path,
                format!(
                    "'{}' is a reserved {expected} rule and is not implemented",
                    node.keyword
                ),
            );
            return;
        }

        let families = self.registry.families_of(&node.keyword);
        let message = match families.first() {
            Some(family) => format!(
                "'{}' is not a {expected} rule, it belongs to the {family} rules",
                node.keyword
            ),
            None => format!(
                "unknown {expected} rule keyword '{}', expected one of: {}",
                node.keyword,
                self.registry.keywords(expected).join(", ")
            ),
        };
        self.error(&node.path, message);
    }

    fn unknown_fields(&mut self, path: &str, map: &Map<String, Value>, allowed: &[&str]) {
        for key in map.keys() {
            if !allowed.contains(&key.as_str()) {
                self.error(path, format!("unknown field '{key}'"));
            }
        }
    }
}

/// Typed field access over one rule body.
///
/// Each reader records an error and marks the body failed when a present
/// field has the wrong shape. [`Body::finish`] flags fields nobody read.
pub struct Body<'p, 'r, 'a> {
    parser: &'p mut Parser<'r>,
    path: String,
    map: Option<&'a Map<String, Value>>,
    known: Vec<&'static str>,
    ok: bool,
}

impl<'a> Body<'_, '_, 'a> {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn has(&self, key: &str) -> bool {
        self.map
            .and_then(|map| map.get(key))
            .is_some_and(|value| !value.is_null())
    }

    /// Raw access for bodies that need custom handling.
    pub fn raw(&mut self, key: &'static str) -> Option<&'a Value> {
        self.known.push(key);
        self.map
            .and_then(|map| map.get(key))
            .filter(|value| !value.is_null())
    }

    /// Record a problem with the body as a whole.
    pub fn error(&mut self, message: impl Into<String>) {
        self.ok = false;
        let path = self.path.clone();
        self.parser.error(&path, message);
    }

    /// Record a problem with one field.
    pub fn field_error(&mut self, key: &str, message: impl Into<String>) {
        self.ok = false;
        let path = format!("{}.{key}", self.path);
        self.parser.error(&path, message);
    }

    pub fn u64(&mut self, key: &'static str) -> Option<u64> {
        let value = self.raw(key)?;
        let parsed = value.as_u64();
        if parsed.is_none() {
            self.field_error(key, "expected a non-negative integer");
        }
        parsed
    }

    pub fn positive(&mut self, key: &'static str) -> Option<u64> {
        let value = self.u64(key)?;
        if value == 0 {
            self.field_error(key, "must be greater than 0");
            return None;
        }
        Some(value)
    }

    pub fn bool(&mut self, key: &'static str) -> Option<bool> {
        let value = self.raw(key)?;
        let parsed = value.as_bool();
        if parsed.is_none() {
            self.field_error(key, "expected true or false");
        }
        parsed
    }

    pub fn string(&mut self, key: &'static str) -> Option<String> {
        let value = self.raw(key)?;
        match value {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => {
                self.field_error(key, "expected a non-empty string");
                None
            }
        }
    }

    pub fn strings(&mut self, key: &'static str) -> Option<Vec<String>> {
        let value = self.raw(key)?;
        let path = format!("{}.{key}", self.path);
        let parsed = self.parser.string_list(&path, value);
        self.ok &= parsed.is_some();
        parsed
    }

    pub fn ids(&mut self, key: &'static str) -> Option<Vec<u64>> {
        let value = self.raw(key)?;
        let path = format!("{}.{key}", self.path);
        let parsed = self.parser.id_list(&path, value);
        self.ok &= parsed.is_some();
        parsed
    }

    pub fn id(&mut self, key: &'static str) -> Option<u64> {
        let value = self.raw(key)?;
        let parsed = as_id(value);
        if parsed.is_none() {
            self.field_error(key, "expected a positive integer id");
        }
        parsed
    }

    pub fn regex(&mut self, key: &'static str) -> Option<Regex> {
        let pattern = self.string(key)?;
        match Regex::new(&pattern) {
            Ok(regex) => Some(regex),
            Err(e) => {
                self.field_error(key, format!("invalid regular expression: {e}"));
                None
            }
        }
    }

    /// RFC 3339 timestamp or a bare `YYYY-MM-DD` date (midnight UTC).
    pub fn date(&mut self, key: &'static str) -> Option<DateTime<Utc>> {
        let text = self.string(key)?;
        let parsed = DateTime::parse_from_rfc3339(&text)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(&text, "%Y-%m-%d")
                    .ok()
                    .and_then(|date| date.and_hms_opt(0, 0, 0))
                    .map(|dt| dt.and_utc())
            });
        if parsed.is_none() {
            self.field_error(key, "expected an RFC 3339 timestamp or YYYY-MM-DD date");
        }
        parsed
    }

    /// Pass `value` through, recording an error if the field is absent.
    pub fn require<T>(&mut self, key: &'static str, value: Option<T>) -> Option<T> {
        if value.is_none() && !self.has(key) {
            self.error(format!("missing required field '{key}'"));
        }
        value
    }

    /// Flag unread fields and report whether the body was clean.
    pub fn finish(mut self) -> Option<()> {
        let unknown: Vec<String> = self
            .map
            .map(|map| {
                map.keys()
                    .filter(|key| !self.known.contains(&key.as_str()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        for key in unknown {
            self.field_error(&key, "unknown field");
        }
        self.ok.then_some(())
    }
}

fn as_id(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|id| *id != 0)
}
