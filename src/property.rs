//! Property definitions.
//!
//! [`PropertyType`] is a closed tagged union over the logical types. Each
//! variant carries only the constraints that apply to it. The common
//! envelope ([`PropertyDef`]) adds occurrence bounds, default, indexing,
//! change tracking and UI hints.
//!
//! Values are validated in their *stored* form (what sits in the
//! physical document). Conversion between logical and stored form is done
//! by [`PropertyDef::to_storage`] / [`PropertyDef::from_storage`]:
//!
//! | type     | logical            | stored                    |
//! |----------|--------------------|---------------------------|
//! | decimal  | number or string   | integer scaled by 10^scale|
//! | name     | string             | NameId                    |
//! | others   | unchanged          | unchanged                 |

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FlexError, Result};
use crate::flags::{PropertyFlags, RangeRole, RefKind};
use crate::names::NameDirectory;
use crate::types::{ClassId, NameId, PropertyId};

/// Largest supported decimal scale (10^18 fits in i64).
pub const MAX_DECIMAL_SCALE: u32 = 18;

// ── References to classes / properties ─────────────────────────────

/// Class reference in a definition: numeric id or name.
///
/// Stored definitions always carry ids; names are accepted on input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClassRef {
    Id(ClassId),
    Name(String),
}

impl ClassRef {
    pub fn id(&self) -> Option<ClassId> {
        match self {
            ClassRef::Id(id) => Some(*id),
            ClassRef::Name(_) => None,
        }
    }
}

impl From<&str> for ClassRef {
    fn from(name: &str) -> Self {
        ClassRef::Name(name.to_string())
    }
}

impl From<ClassId> for ClassRef {
    fn from(id: ClassId) -> Self {
        ClassRef::Id(id)
    }
}

/// Property reference: numeric id or name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyRef {
    Id(PropertyId),
    Name(String),
}

impl PropertyRef {
    pub fn id(&self) -> Option<PropertyId> {
        match self {
            PropertyRef::Id(id) => Some(*id),
            PropertyRef::Name(_) => None,
        }
    }
}

impl From<&str> for PropertyRef {
    fn from(name: &str) -> Self {
        PropertyRef::Name(name.to_string())
    }
}

impl From<PropertyId> for PropertyRef {
    fn from(id: PropertyId) -> Self {
        PropertyRef::Id(id)
    }
}

// ── Reference definition ───────────────────────────────────────────

/// Decides the concrete class of an inline linked/boxed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ClassResolver {
    /// Value of `property` selects the class from an explicit map.
    Selector {
        property: String,
        classes: BTreeMap<String, ClassRef>,
    },
    /// First rule whose regex matches the value of its property wins.
    Match { rules: Vec<MatchRule> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRule {
    pub property: String,
    pub pattern: String,
    pub class: ClassRef,
}

impl ClassResolver {
    fn validate(&self) -> Result<()> {
        match self {
            ClassResolver::Selector { classes, .. } if classes.is_empty() => Err(
                FlexError::InvalidDefinition("selector resolver has no classes".to_string()),
            ),
            ClassResolver::Selector { .. } => Ok(()),
            ClassResolver::Match { rules } => {
                for rule in rules {
                    compile_regex(&rule.pattern)?;
                }
                Ok(())
            }
        }
    }

    /// Class chosen for an inline logical value, if any rule applies.
    pub fn resolve(&self, value: &Value) -> Result<Option<&ClassRef>> {
        match self {
            ClassResolver::Selector { property, classes } => Ok(value
                .get(property)
                .map(value_key)
                .and_then(|key| classes.get(&key))),
            ClassResolver::Match { rules } => {
                for rule in rules {
                    let Some(v) = value.get(&rule.property) else {
                        continue;
                    };
                    if regex_matches(&rule.pattern, &value_key(v))? {
                        return Ok(Some(&rule.class));
                    }
                }
                Ok(None)
            }
        }
    }

    pub fn class_refs(&self) -> Vec<&ClassRef> {
        match self {
            ClassResolver::Selector { classes, .. } => classes.values().collect(),
            ClassResolver::Match { rules } => rules.iter().map(|r| &r.class).collect(),
        }
    }

    pub(crate) fn class_refs_mut(&mut self) -> Vec<&mut ClassRef> {
        match self {
            ClassResolver::Selector { classes, .. } => classes.values_mut().collect(),
            ClassResolver::Match { rules } => rules.iter_mut().map(|r| &mut r.class).collect(),
        }
    }
}

fn value_key(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn default_link_kind() -> RefKind {
    RefKind::Link
}

/// Target of a link or boxed property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefDef {
    pub class: ClassRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverse_property: Option<PropertyRef>,
    #[serde(default = "default_link_kind")]
    pub ownership: RefKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolver: Option<ClassResolver>,
    /// Target property used to resolve scalar keys into object ids
    /// (imports, scalar-to-link retyping).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolve_by: Option<String>,
}

impl RefDef {
    pub fn to(class: impl Into<ClassRef>) -> Self {
        Self {
            class: class.into(),
            reverse_property: None,
            ownership: RefKind::Link,
            resolver: None,
            resolve_by: None,
        }
    }

    pub fn with_ownership(mut self, kind: RefKind) -> Self {
        self.ownership = kind;
        self
    }

    pub fn with_reverse(mut self, property: impl Into<PropertyRef>) -> Self {
        self.reverse_property = Some(property.into());
        self
    }

    pub fn with_resolve_by(mut self, property: &str) -> Self {
        self.resolve_by = Some(property.to_string());
        self
    }
}

// ── Property type ──────────────────────────────────────────────────

/// Logical property type with its applicable constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum PropertyType {
    Text {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_length: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_length: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        regex: Option<String>,
    },
    Integer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_value: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_value: Option<i64>,
    },
    /// Fixed-point number stored as an integer scaled by `10^scale`.
    Decimal {
        scale: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_value: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_value: Option<f64>,
    },
    Float {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_value: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_value: Option<f64>,
    },
    Boolean,
    /// Boxed object: embedded in the host document.
    Object(RefDef),
    Enum {
        items: Vec<String>,
    },
    /// Lower-case hex string.
    Binary {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_length: Option<usize>,
    },
    Uuid,
    /// Fractional Julian day.
    DateTime,
    /// Interned identifier.
    Name,
    Json,
    /// Linked object: stored as the target's object id.
    Link(RefDef),
    /// Untyped; accepts any scalar or structure.
    Any,
}

impl PropertyType {
    pub fn type_name(&self) -> &'static str {
        match self {
            PropertyType::Text { .. } => "text",
            PropertyType::Integer { .. } => "integer",
            PropertyType::Decimal { .. } => "decimal",
            PropertyType::Float { .. } => "float",
            PropertyType::Boolean => "boolean",
            PropertyType::Object(_) => "object",
            PropertyType::Enum { .. } => "enum",
            PropertyType::Binary { .. } => "binary",
            PropertyType::Uuid => "uuid",
            PropertyType::DateTime => "dateTime",
            PropertyType::Name => "name",
            PropertyType::Json => "json",
            PropertyType::Link(_) => "link",
            PropertyType::Any => "any",
        }
    }

    pub fn text() -> Self {
        PropertyType::Text { min_length: None, max_length: None, regex: None }
    }

    pub fn integer() -> Self {
        PropertyType::Integer { min_value: None, max_value: None }
    }

    pub fn float() -> Self {
        PropertyType::Float { min_value: None, max_value: None }
    }
}

// ── Index kind ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IndexKind {
    #[default]
    None,
    Index,
    Unique,
    FullText,
    Range(RangeRole),
}

// ── Property definition ────────────────────────────────────────────

fn default_max_occurrences() -> Option<u32> {
    Some(1)
}

/// Definition of a class property (stored in `.class_properties.Data`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDef {
    pub rules: PropertyType,
    #[serde(default)]
    pub min_occurrences: u32,
    /// `None` means unbounded.
    #[serde(default = "default_max_occurrences")]
    pub max_occurrences: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default)]
    pub index: IndexKind,
    #[serde(default)]
    pub no_track_changes: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui: Option<Value>,
}

impl PropertyDef {
    pub fn new(rules: PropertyType) -> Self {
        Self {
            rules,
            min_occurrences: 0,
            max_occurrences: Some(1),
            default: None,
            index: IndexKind::None,
            no_track_changes: false,
            ui: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.min_occurrences = self.min_occurrences.max(1);
        self
    }

    pub fn multi(mut self, max: Option<u32>) -> Self {
        self.max_occurrences = max;
        self
    }

    pub fn indexed(mut self, index: IndexKind) -> Self {
        self.index = index;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Whether values are stored as arrays.
    pub fn is_multi(&self) -> bool {
        self.max_occurrences != Some(1)
    }

    pub fn ref_def(&self) -> Option<&RefDef> {
        match &self.rules {
            PropertyType::Object(r) | PropertyType::Link(r) => Some(r),
            _ => None,
        }
    }

    pub fn ref_def_mut(&mut self) -> Option<&mut RefDef> {
        match &mut self.rules {
            PropertyType::Object(r) | PropertyType::Link(r) => Some(r),
            _ => None,
        }
    }

    pub fn is_boxed(&self) -> bool {
        matches!(self.rules, PropertyType::Object(_))
    }

    pub fn is_link(&self) -> bool {
        matches!(self.rules, PropertyType::Link(_))
    }

    pub fn is_reference(&self) -> bool {
        self.ref_def().is_some()
    }

    /// Reference kind implied by the definition.
    pub fn ref_kind(&self) -> RefKind {
        match &self.rules {
            PropertyType::Object(_) => RefKind::OwnForward,
            PropertyType::Link(r) if r.ownership.is_reference() => r.ownership,
            PropertyType::Link(_) => RefKind::Link,
            _ if self.index == IndexKind::Index => RefKind::Index,
            _ => RefKind::None,
        }
    }

    /// Value flags (`ctlv`) derived from the definition.
    pub fn value_flags(&self) -> PropertyFlags {
        PropertyFlags {
            kind: self.ref_kind(),
            full_text: self.index == IndexKind::FullText,
            range: match self.index {
                IndexKind::Range(role) => Some(role),
                _ => None,
            },
            no_track_changes: self.no_track_changes,
            unique: self.index == IndexKind::Unique,
        }
    }

    /// Structural validation of the definition itself.
    pub fn validate_definition(&self, name: &str) -> Result<()> {
        let invalid = |msg: String| Err(FlexError::InvalidDefinition(format!("{}: {}", name, msg)));

        if let Some(max) = self.max_occurrences {
            if max == 0 {
                return invalid("maxOccurrences must be at least 1".to_string());
            }
            if self.min_occurrences > max {
                return invalid(format!(
                    "minOccurrences {} exceeds maxOccurrences {}",
                    self.min_occurrences, max
                ));
            }
        }

        match &self.rules {
            PropertyType::Text { min_length, max_length, regex } => {
                if let (Some(lo), Some(hi)) = (min_length, max_length) {
                    if lo > hi {
                        return invalid(format!("minLength {} exceeds maxLength {}", lo, hi));
                    }
                }
                if let Some(pattern) = regex {
                    compile_regex(pattern)?;
                }
            }
            PropertyType::Integer { min_value: Some(lo), max_value: Some(hi) } if lo > hi => {
                return invalid(format!("minValue {} exceeds maxValue {}", lo, hi));
            }
            PropertyType::Decimal { scale, .. } if *scale > MAX_DECIMAL_SCALE => {
                return invalid(format!("scale {} exceeds {}", scale, MAX_DECIMAL_SCALE));
            }
            PropertyType::Decimal { min_value: Some(lo), max_value: Some(hi), .. }
            | PropertyType::Float { min_value: Some(lo), max_value: Some(hi) }
                if lo > hi =>
            {
                return invalid(format!("minValue {} exceeds maxValue {}", lo, hi));
            }
            PropertyType::Enum { items } if items.is_empty() => {
                return invalid("enum has no items".to_string());
            }
            PropertyType::Object(r) | PropertyType::Link(r) => {
                if let Some(resolver) = &r.resolver {
                    resolver.validate()?;
                }
                if self.is_boxed() && r.ownership != RefKind::Link && r.ownership != RefKind::OwnForward {
                    return invalid("boxed objects are always owned by their host".to_string());
                }
                if matches!(self.index, IndexKind::FullText | IndexKind::Range(_)) {
                    return invalid("references cannot be full-text or range indexed".to_string());
                }
            }
            _ => {}
        }

        if let Some(default) = &self.default {
            if self.is_reference() {
                return invalid("references cannot have a default".to_string());
            }
            for item in items_of(default, self.is_multi()) {
                self.check_logical_item(item)
                    .or_else(|msg| invalid(format!("default: {}", msg)))?;
            }
        }
        Ok(())
    }

    // ── Value validation ───────────────────────────────────────────

    /// Validate a stored value (physical form). `None` means absent.
    ///
    /// Returns a human-readable message on failure.
    pub fn check_stored(&self, value: Option<&Value>) -> std::result::Result<(), String> {
        let items: Vec<&Value> = match value {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(a)) if self.is_multi() => a.iter().filter(|v| !v.is_null()).collect(),
            Some(Value::Array(_)) if !matches!(self.rules, PropertyType::Json | PropertyType::Any) => {
                return Err("expected a single value, got an array".to_string())
            }
            Some(v) => vec![v],
        };

        let count = items.len() as u32;
        if count < self.min_occurrences && self.default.is_none() {
            return Err(if self.min_occurrences == 1 {
                "value is required".to_string()
            } else {
                format!("at least {} values required, got {}", self.min_occurrences, count)
            });
        }
        if let Some(max) = self.max_occurrences {
            if count > max {
                return Err(format!("at most {} values allowed, got {}", max, count));
            }
        }
        for item in items {
            self.check_stored_item(item)?;
        }
        Ok(())
    }

    fn check_stored_item(&self, item: &Value) -> std::result::Result<(), String> {
        match &self.rules {
            PropertyType::Decimal { scale, min_value, max_value } => {
                let raw = item
                    .as_i64()
                    .ok_or_else(|| format!("expected scaled integer, got {}", item))?;
                let v = unscale(raw, *scale);
                check_bounds(v, *min_value, *max_value)
            }
            PropertyType::Name => item
                .as_u64()
                .map(|_| ())
                .ok_or_else(|| format!("expected interned name id, got {}", item)),
            PropertyType::Link(_) => item
                .as_i64()
                .map(|_| ())
                .ok_or_else(|| format!("expected object id, got {}", item)),
            PropertyType::Object(_) => {
                if item.is_object() {
                    Ok(())
                } else {
                    Err(format!("expected object, got {}", item))
                }
            }
            _ => self.check_logical_item(item),
        }
    }

    /// Validate a single logical item against type rules.
    pub fn check_logical_item(&self, item: &Value) -> std::result::Result<(), String> {
        match &self.rules {
            PropertyType::Text { min_length, max_length, regex } => {
                let s = item.as_str().ok_or_else(|| format!("expected text, got {}", item))?;
                let len = s.chars().count();
                if let Some(lo) = min_length {
                    if len < *lo {
                        return Err(format!("text shorter than {}", lo));
                    }
                }
                if let Some(hi) = max_length {
                    if len > *hi {
                        return Err(format!("text longer than {}", hi));
                    }
                }
                if let Some(pattern) = regex {
                    if !regex_matches(pattern, s).map_err(|e| e.to_string())? {
                        return Err(format!("'{}' does not match /{}/", s, pattern));
                    }
                }
                Ok(())
            }
            PropertyType::Integer { min_value, max_value } => {
                let v = item.as_i64().ok_or_else(|| format!("expected integer, got {}", item))?;
                if let Some(lo) = min_value {
                    if v < *lo {
                        return Err(format!("{} is below minimum {}", v, lo));
                    }
                }
                if let Some(hi) = max_value {
                    if v > *hi {
                        return Err(format!("{} is above maximum {}", v, hi));
                    }
                }
                Ok(())
            }
            PropertyType::Decimal { scale, min_value, max_value } => {
                let v = decimal_input(item)?;
                scale_decimal(v, *scale)?;
                check_bounds(v, *min_value, *max_value)
            }
            PropertyType::Float { min_value, max_value } => {
                let v = item.as_f64().ok_or_else(|| format!("expected number, got {}", item))?;
                check_bounds(v, *min_value, *max_value)
            }
            PropertyType::Boolean => item
                .as_bool()
                .map(|_| ())
                .ok_or_else(|| format!("expected boolean, got {}", item)),
            PropertyType::Enum { items } => {
                let s = item.as_str().ok_or_else(|| format!("expected enum text, got {}", item))?;
                if items.iter().any(|i| i == s) {
                    Ok(())
                } else {
                    Err(format!("'{}' is not one of {:?}", s, items))
                }
            }
            PropertyType::Binary { max_length } => {
                let s = item.as_str().ok_or_else(|| format!("expected hex text, got {}", item))?;
                if s.len() % 2 != 0 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err("binary must be an even-length hex string".to_string());
                }
                if let Some(max) = max_length {
                    if s.len() / 2 > *max {
                        return Err(format!("binary longer than {} bytes", max));
                    }
                }
                Ok(())
            }
            PropertyType::Uuid => {
                let s = item.as_str().ok_or_else(|| format!("expected uuid text, got {}", item))?;
                if is_uuid(s) {
                    Ok(())
                } else {
                    Err(format!("'{}' is not a uuid", s))
                }
            }
            PropertyType::DateTime => item
                .as_f64()
                .map(|_| ())
                .ok_or_else(|| format!("expected Julian day number, got {}", item)),
            PropertyType::Name => {
                let s = item.as_str().ok_or_else(|| format!("expected name, got {}", item))?;
                crate::names::validate_identifier(s).map_err(|e| e.to_string())
            }
            PropertyType::Link(_) => {
                if item.as_i64().is_some() || item.is_object() {
                    Ok(())
                } else {
                    Err(format!("expected object id or inline object, got {}", item))
                }
            }
            PropertyType::Object(_) => {
                if item.is_object() {
                    Ok(())
                } else {
                    Err(format!("expected object, got {}", item))
                }
            }
            PropertyType::Json | PropertyType::Any => Ok(()),
        }
    }

    // ── Storage conversion ─────────────────────────────────────────

    /// Convert one logical item into its stored form.
    ///
    /// References and boxed objects are handled by the object store and
    /// pass through unchanged.
    pub fn to_storage(&self, item: &Value, names: &NameDirectory<'_>) -> Result<Value> {
        match &self.rules {
            PropertyType::Decimal { scale, .. } => {
                let v = decimal_input(item).map_err(FlexError::InvalidDefinition)?;
                let raw = scale_decimal(v, *scale).map_err(FlexError::InvalidDefinition)?;
                Ok(Value::from(raw))
            }
            PropertyType::Name => match item.as_str() {
                Some(s) => Ok(Value::from(names.intern(s)?.0)),
                None => Ok(item.clone()),
            },
            _ => Ok(item.clone()),
        }
    }

    /// Convert one stored item back into logical form.
    pub fn from_storage(&self, item: &Value, names: &NameDirectory<'_>) -> Result<Value> {
        match &self.rules {
            PropertyType::Decimal { scale, .. } => match item.as_i64() {
                Some(raw) => Ok(serde_json::Number::from_f64(unscale(raw, *scale))
                    .map(Value::Number)
                    .unwrap_or(Value::Null)),
                None => Ok(item.clone()),
            },
            PropertyType::Name => match item.as_u64() {
                Some(id) => Ok(Value::String(names.get(NameId(id as u32))?)),
                None => Ok(item.clone()),
            },
            _ => Ok(item.clone()),
        }
    }
}

/// Items of a (possibly multi-valued) value, nulls skipped.
pub fn items_of(value: &Value, multi: bool) -> Vec<&Value> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(a) if multi => a.iter().filter(|v| !v.is_null()).collect(),
        v => vec![v],
    }
}

pub(crate) fn compile_regex(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| FlexError::InvalidRegex {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

thread_local! {
    /// Compiled validation patterns, keyed by source text.
    static PATTERNS: RefCell<HashMap<String, Regex>> = RefCell::new(HashMap::new());
}

/// Match `text` against `pattern`, compiling each pattern once per thread.
pub(crate) fn regex_matches(pattern: &str, text: &str) -> Result<bool> {
    PATTERNS.with(|cache| {
        let mut cache = cache.borrow_mut();
        if let Some(re) = cache.get(pattern) {
            return Ok(re.is_match(text));
        }
        let re = compile_regex(pattern)?;
        let matched = re.is_match(text);
        cache.insert(pattern.to_string(), re);
        Ok(matched)
    })
}

fn check_bounds(v: f64, lo: Option<f64>, hi: Option<f64>) -> std::result::Result<(), String> {
    if let Some(lo) = lo {
        if v < lo {
            return Err(format!("{} is below minimum {}", v, lo));
        }
    }
    if let Some(hi) = hi {
        if v > hi {
            return Err(format!("{} is above maximum {}", v, hi));
        }
    }
    Ok(())
}

fn decimal_input(item: &Value) -> std::result::Result<f64, String> {
    let v = match item {
        Value::Number(n) => n.as_f64().ok_or_else(|| format!("{} is not a decimal", n))?,
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("'{}' is not a decimal", s))?,
        other => return Err(format!("expected decimal, got {}", other)),
    };
    if !v.is_finite() {
        return Err(format!("{} is not a finite decimal", v));
    }
    Ok(v)
}

/// Whether a whole float converts to i64 without saturating.
pub(crate) fn fits_i64(v: f64) -> bool {
    // i64::MAX as f64 rounds up to 2^63, which is already out of range
    v >= i64::MIN as f64 && v < i64::MAX as f64
}

pub(crate) fn scale_decimal(v: f64, scale: u32) -> std::result::Result<i64, String> {
    let scaled = (v * 10f64.powi(scale as i32)).round();
    if !scaled.is_finite() || !fits_i64(scaled) {
        return Err(format!("{} does not fit a decimal with scale {}", v, scale));
    }
    Ok(scaled as i64)
}

pub(crate) fn unscale(raw: i64, scale: u32) -> f64 {
    raw as f64 / 10f64.powi(scale as i32)
}

fn is_uuid(s: &str) -> bool {
    const GROUPS: [usize; 5] = [8, 4, 4, 4, 12];
    let parts: Vec<&str> = s.split('-').collect();
    parts.len() == GROUPS.len()
        && parts
            .iter()
            .zip(GROUPS)
            .all(|(p, n)| p.len() == n && p.chars().all(|c| c.is_ascii_hexdigit()))
}
