//! Declarative property transforms.
//!
//! `splitProperty` derives several properties from one through regex
//! capture groups. `mergeProperties` renders several properties into one
//! through a `{name}` template. Both are pure functions of the object's
//! values, so replaying a command gives the same result.

use std::collections::BTreeMap;

use regex_lite::Regex;
use serde_json::{Map, Value};
use tracing::info;

use crate::error::{FlexError, Result};
use crate::names::validate_identifier;
use crate::object::{self, StoreOptions};
use crate::property::{compile_regex, PropertyDef, PropertyType};
use crate::registry;
use crate::session::{Session, WriteMode};

use super::alter::coerce_item;
use super::{ensure_property, object_problem, reload, require_properties, select, MergePropertiesArgs, ReportStatus, SplitPropertyArgs};

/// Text form of a scalar. Arrays and objects have none.
fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

// ── Split ──────────────────────────────────────────────────────────

/// Capture group reference: number or name.
#[derive(Debug, Clone, PartialEq)]
enum Group {
    Index(usize),
    Name(String),
}

fn parse_groups(re: &Regex, targets: &BTreeMap<String, String>) -> Result<Vec<(String, Group)>> {
    let names: Vec<&str> = re.capture_names().flatten().collect();
    let mut out = Vec::with_capacity(targets.len());
    for (target, group) in targets {
        validate_identifier(target)?;
        let g = match group.parse::<usize>() {
            Ok(i) if i < re.captures_len() => Group::Index(i),
            Ok(i) => {
                return Err(FlexError::InvalidDefinition(format!(
                    "'{}': pattern has no capture group {}",
                    target, i
                )))
            }
            Err(_) if names.contains(&group.as_str()) => Group::Name(group.clone()),
            Err(_) => {
                return Err(FlexError::InvalidDefinition(format!(
                    "'{}': pattern has no capture group '{}'",
                    target, group
                )))
            }
        };
        out.push((target.clone(), g));
    }
    Ok(out)
}

/// Captured text per target, or `None` when the value does not match.
fn split_value(re: &Regex, groups: &[(String, Group)], text: &str) -> Option<Vec<(String, Option<String>)>> {
    let caps = re.captures(text)?;
    Some(
        groups
            .iter()
            .map(|(target, g)| {
                let m = match g {
                    Group::Index(i) => caps.get(*i),
                    Group::Name(n) => caps.name(n),
                };
                (target.clone(), m.map(|m| m.as_str().to_string()))
            })
            .collect(),
    )
}

pub fn split_property(session: &mut Session<'_>, args: &SplitPropertyArgs) -> Result<()> {
    let class_id = registry::class_id(session.conn(), &args.class)?;
    let class = session.class(class_id)?;

    // ── validate ──
    let source = class.require_property(&args.source)?.clone();
    let re = compile_regex(&args.pattern)?;
    if args.targets.is_empty() {
        return Err(FlexError::InvalidDefinition("no split targets".to_string()));
    }
    if args.targets.contains_key(&args.source) {
        return Err(FlexError::InvalidDefinition(format!(
            "'{}' cannot be split into itself",
            args.source
        )));
    }
    let groups = parse_groups(&re, &args.targets)?;
    let selected = select(session, &class, &args.filter)?;

    // ── schema ──
    for target in args.targets.keys() {
        ensure_property(session, class_id, target, &PropertyDef::new(PropertyType::text()))?;
    }
    let class = session.class(class_id)?;
    let defs: Vec<(String, PropertyDef, Group)> = groups
        .into_iter()
        .map(|(t, g)| -> Result<(String, PropertyDef, Group)> {
            let def = class.require_property(&t)?.def.clone();
            Ok((t, def, g))
        })
        .collect::<Result<_>>()?;

    // ── rewrite ──
    let split_groups: Vec<(String, Group)> = defs.iter().map(|(t, _, g)| (t.clone(), g.clone())).collect();
    let (mut split, mut unmatched) = (0, 0);
    for (record, data) in selected {
        let Some(text) = data.get(&source.name).and_then(text_of) else {
            continue;
        };
        let Some(parts) = split_value(&re, &split_groups, &text) else {
            session.report_mut().warning(&class.name, Some(&source.name), "value does not match the split pattern");
            unmatched += 1;
            continue;
        };
        let Some((record, mut current)) = reload(session, record.id)? else {
            continue;
        };
        for ((target, part), (_, def, _)) in parts.into_iter().zip(&defs) {
            let Some(part) = part.filter(|p| !p.is_empty()) else {
                current.remove(&target);
                continue;
            };
            match coerce_item(def, &Value::String(part)) {
                Ok(v) => {
                    current.insert(target, v);
                }
                Err(message) => {
                    object_problem(session, &class.name, Some(&target), &message, ReportStatus::Warning, record.id)?;
                }
            }
        }
        if args.remove_source {
            current.remove(&source.name);
        }
        object::rewrite_logical(session, &record, &current, StoreOptions::write(WriteMode::Lenient))?;
        session.touch(1);
        split += 1;
    }

    if args.remove_source && args.filter.is_empty() {
        registry::drop_property(session, class_id, source.id, true)?;
    }
    info!(class = %class.name, property = %source.name, split, unmatched, "split property");
    Ok(())
}

// ── Merge ──────────────────────────────────────────────────────────

/// Piece of a parsed template.
#[derive(Debug, Clone, PartialEq)]
enum Piece {
    Text(String),
    Field(String),
}

/// Parse `{name}` placeholders; `{{` and `}}` are literal braces.
fn parse_template(template: &str) -> Result<Vec<Piece>> {
    let bad = |reason: &str| FlexError::InvalidDefinition(format!("template '{}': {}", template, reason));
    let mut pieces = Vec::new();
    let mut text = String::new();
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                text.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                text.push('}');
            }
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) => name.push(ch),
                        None => return Err(bad("unclosed placeholder")),
                    }
                }
                if name.is_empty() {
                    return Err(bad("empty placeholder"));
                }
                if !text.is_empty() {
                    pieces.push(Piece::Text(std::mem::take(&mut text)));
                }
                pieces.push(Piece::Field(name.trim().to_string()));
            }
            '}' => return Err(bad("unmatched '}'")),
            c => text.push(c),
        }
    }
    if !text.is_empty() {
        pieces.push(Piece::Text(text));
    }
    Ok(pieces)
}

/// Render a template. `None` when every placeholder is empty.
fn render(pieces: &[Piece], data: &Map<String, Value>) -> Option<String> {
    let mut out = String::new();
    let mut any = false;
    for piece in pieces {
        match piece {
            Piece::Text(t) => out.push_str(t),
            Piece::Field(name) => {
                if let Some(t) = data.get(name).and_then(text_of) {
                    any = true;
                    out.push_str(&t);
                }
            }
        }
    }
    any.then_some(out)
}

pub fn merge_properties(session: &mut Session<'_>, args: &MergePropertiesArgs) -> Result<()> {
    let class_id = registry::class_id(session.conn(), &args.class)?;
    let class = session.class(class_id)?;

    // ── validate ──
    require_properties(&class, &args.sources)?;
    validate_identifier(&args.target)?;
    let pieces = parse_template(&args.template)?;
    for piece in &pieces {
        if let Piece::Field(name) = piece {
            if !args.sources.contains(name) {
                return Err(FlexError::InvalidDefinition(format!(
                    "template placeholder '{}' is not a source property",
                    name
                )));
            }
        }
    }
    let selected = select(session, &class, &args.filter)?;

    // ── schema ──
    ensure_property(session, class_id, &args.target, &PropertyDef::new(PropertyType::text()))?;
    let class = session.class(class_id)?;
    let target_def = class.require_property(&args.target)?.def.clone();

    // ── rewrite ──
    let mut merged = 0;
    for (record, data) in selected {
        let Some(text) = render(&pieces, &data) else {
            continue;
        };
        let Some((record, mut current)) = reload(session, record.id)? else {
            continue;
        };
        match coerce_item(&target_def, &Value::String(text)) {
            Ok(v) => {
                current.insert(args.target.clone(), v);
            }
            Err(message) => {
                object_problem(session, &class.name, Some(&args.target), &message, ReportStatus::Warning, record.id)?;
            }
        }
        if args.remove_sources {
            for s in args.sources.iter().filter(|s| **s != args.target) {
                current.remove(s);
            }
        }
        object::rewrite_logical(session, &record, &current, StoreOptions::write(WriteMode::Lenient))?;
        session.touch(1);
        merged += 1;
    }

    if args.remove_sources && args.filter.is_empty() {
        for s in args.sources.iter().filter(|s| **s != args.target) {
            let pid = class.require_property(s)?.id;
            registry::drop_property(session, class_id, pid, true)?;
        }
    }
    info!(class = %class.name, target = %args.target, merged, "merged properties");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_split_by_named_and_numbered_groups() {
        let re = compile_regex(r"^(?P<first>\w+)\s+(\w+)$").unwrap();
        let mut targets = BTreeMap::new();
        targets.insert("firstName".to_string(), "first".to_string());
        targets.insert("lastName".to_string(), "2".to_string());
        let groups = parse_groups(&re, &targets).unwrap();
        let parts = split_value(&re, &groups, "Ada Lovelace").unwrap();
        assert_eq!(
            parts,
            vec![
                ("firstName".to_string(), Some("Ada".to_string())),
                ("lastName".to_string(), Some("Lovelace".to_string())),
            ]
        );
        assert!(split_value(&re, &groups, "Plato").is_none());
    }

    #[test]
    fn test_missing_group_rejected() {
        let re = compile_regex(r"(\d+)").unwrap();
        let mut targets = BTreeMap::new();
        targets.insert("x".to_string(), "3".to_string());
        assert!(parse_groups(&re, &targets).is_err());
    }

    #[test]
    fn test_template() {
        let pieces = parse_template("{street} {number}, {{{city}}}").unwrap();
        let data = json!({"street": "Main St", "number": 5, "city": "Oslo"});
        assert_eq!(render(&pieces, data.as_object().unwrap()).as_deref(), Some("Main St 5, {Oslo}"));
        assert_eq!(render(&pieces, &Map::new()), None);
        assert!(parse_template("{open").is_err());
        assert!(parse_template("a } b").is_err());
    }
}
