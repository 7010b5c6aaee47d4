//! Pattern model: typed field values, the [`Patterned`] schema trait, and
//! conversion of a pattern into a weighted [`PatternSet`].
//!
//! A pattern is a set of named primitive values (`topic`, `cmd`, ...). Only
//! primitive fields take part in matching. A field holding its type's zero
//! value (`""`, `false`, `0`, `0.0`) is treated as absent, which is how a
//! registration becomes less specific. Metadata carriers (`meta`, `delegate`)
//! travel next to the pattern but are never match criteria.

use std::collections::BTreeMap;
use std::fmt;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Number, Value as JsonValue};

use crate::error::{HemeraError, Operation};

/// Name of the field that carries the transport topic.
pub const TOPIC_FIELD: &str = "topic";

/// Field names ending with this marker are reserved and never matched.
pub const RESERVED_SUFFIX: char = '_';

/// Opaque key/value carrier used for `meta` and `delegate` data.
pub type Carrier = Map<String, JsonValue>;

/// Field name -> value map of the present (non-zero) fields of a pattern.
///
/// `BTreeMap` keeps iteration deterministic, which fixes the bucket
/// tie-break order in the router.
pub type PatternFields = BTreeMap<String, PatternValue>;

// ---------------------------------------------------------------------------
// PatternValue
// ---------------------------------------------------------------------------

/// A primitive scalar contributed by one pattern field.
///
/// Floats are wrapped in `OrderedFloat` so every value can key the router's
/// inverted index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PatternValue {
    Bool(bool),
    Int(i64),
    Float(OrderedFloat<f64>),
    Str(String),
}

impl PatternValue {
    /// Returns `true` for the zero value of the underlying type.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        match self {
            PatternValue::Bool(b) => !b,
            PatternValue::Int(i) => *i == 0,
            PatternValue::Float(f) => *f == OrderedFloat(0.0),
            PatternValue::Str(s) => s.is_empty(),
        }
    }

    /// Converts a JSON scalar. Objects, arrays and `null` have no pattern value.
    #[must_use]
    pub fn from_json(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::Bool(b) => Some(PatternValue::Bool(*b)),
            JsonValue::Number(n) => n
                .as_i64()
                .map(PatternValue::Int)
                .or_else(|| n.as_f64().map(|f| PatternValue::Float(OrderedFloat(f)))),
            JsonValue::String(s) => Some(PatternValue::Str(s.clone())),
            JsonValue::Null | JsonValue::Array(_) | JsonValue::Object(_) => None,
        }
    }

    /// Converts into the JSON scalar sent on the wire. Non-finite floats become `null`.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        match self {
            PatternValue::Bool(b) => JsonValue::Bool(*b),
            PatternValue::Int(i) => JsonValue::Number(Number::from(*i)),
            PatternValue::Float(f) => Number::from_f64(f.0).map_or(JsonValue::Null, JsonValue::Number),
            PatternValue::Str(s) => JsonValue::String(s.clone()),
        }
    }
}

impl fmt::Display for PatternValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternValue::Bool(b) => write!(f, "{b}"),
            PatternValue::Int(i) => write!(f, "{i}"),
            PatternValue::Float(v) => write!(f, "{}", v.0),
            PatternValue::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for PatternValue {
    fn from(value: &str) -> Self {
        PatternValue::Str(value.to_string())
    }
}

impl From<String> for PatternValue {
    fn from(value: String) -> Self {
        PatternValue::Str(value)
    }
}

impl From<&String> for PatternValue {
    fn from(value: &String) -> Self {
        PatternValue::Str(value.clone())
    }
}

impl From<bool> for PatternValue {
    fn from(value: bool) -> Self {
        PatternValue::Bool(value)
    }
}

impl From<f64> for PatternValue {
    fn from(value: f64) -> Self {
        PatternValue::Float(OrderedFloat(value))
    }
}

impl From<f32> for PatternValue {
    fn from(value: f32) -> Self {
        PatternValue::Float(OrderedFloat(f64::from(value)))
    }
}

macro_rules! int_pattern_value {
    ($($t:ty),*) => {
        $(
            impl From<$t> for PatternValue {
                fn from(value: $t) -> Self {
                    PatternValue::Int(i64::from(value))
                }
            }
        )*
    };
}

int_pattern_value!(i8, i16, i32, i64, u8, u16, u32);

// ---------------------------------------------------------------------------
// PatternField / Patterned
// ---------------------------------------------------------------------------

/// One named primitive field of a pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternField {
    pub name: String,
    pub value: PatternValue,
}

impl PatternField {
    pub fn new(name: impl Into<String>, value: impl Into<PatternValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Reserved fields carry metadata and are excluded from matching and the wire pattern.
    #[must_use]
    pub fn is_reserved(&self) -> bool {
        self.name.ends_with(RESERVED_SUFFIX)
    }
}

/// Schema interface of anything usable as a pattern.
///
/// `fields` lists every primitive field, zero-valued ones included; the
/// pattern model decides which of them are present. Composite data is simply
/// never listed, so the primitive/composite split is fixed at compile time.
///
/// ```
/// use hemera_core::{PatternField, PatternSet, Patterned};
///
/// struct MathPattern {
///     topic: String,
///     cmd: String,
/// }
///
/// impl Patterned for MathPattern {
///     fn fields(&self) -> Vec<PatternField> {
///         vec![
///             PatternField::new("topic", &self.topic),
///             PatternField::new("cmd", &self.cmd),
///         ]
///     }
/// }
///
/// let set = PatternSet::from_pattern(&MathPattern {
///     topic: "math".into(),
///     cmd: String::new(),
/// });
/// assert_eq!(set.weight, 1);
/// ```
pub trait Patterned {
    fn fields(&self) -> Vec<PatternField>;

    /// Metadata sent alongside the pattern.
    fn meta(&self) -> Option<Carrier> {
        None
    }

    /// Delegate data sent alongside the pattern.
    fn delegate(&self) -> Option<Carrier> {
        None
    }
}

impl<P: Patterned + ?Sized> Patterned for &P {
    fn fields(&self) -> Vec<PatternField> {
        (**self).fields()
    }

    fn meta(&self) -> Option<Carrier> {
        (**self).meta()
    }

    fn delegate(&self) -> Option<Carrier> {
        (**self).delegate()
    }
}

// ---------------------------------------------------------------------------
// Pattern builder
// ---------------------------------------------------------------------------

/// Ordered list of typed `(name, value)` pairs plus optional metadata carriers.
///
/// Serializes to a flat JSON object of its fields. Deserializing keeps the
/// scalar members of a JSON object and skips composite ones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pattern {
    fields: Vec<PatternField>,
    meta: Option<Carrier>,
    delegate: Option<Carrier>,
}

impl Pattern {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a field, replacing an earlier value under the same name.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: impl Into<PatternValue>) -> Self {
        self.insert(PatternField::new(name, value));
        self
    }

    #[must_use]
    pub fn with_meta(mut self, meta: Carrier) -> Self {
        self.meta = Some(meta);
        self
    }

    #[must_use]
    pub fn with_delegate(mut self, delegate: Carrier) -> Self {
        self.delegate = Some(delegate);
        self
    }

    pub fn insert(&mut self, field: PatternField) {
        match self.fields.iter_mut().find(|f| f.name == field.name) {
            Some(existing) => existing.value = field.value,
            None => self.fields.push(field),
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PatternValue> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PatternField> {
        self.fields.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Builds a pattern from the scalar members of a JSON object.
    #[must_use]
    pub fn from_json_map(map: &Map<String, JsonValue>) -> Self {
        let fields = map
            .iter()
            .filter_map(|(name, value)| {
                PatternValue::from_json(value).map(|value| PatternField::new(name.clone(), value))
            })
            .collect();
        Self {
            fields,
            meta: None,
            delegate: None,
        }
    }

    /// Copies the non-reserved fields of any pattern, dropping its carriers.
    pub fn cleaned<P: Patterned + ?Sized>(pattern: &P) -> Self {
        Self {
            fields: pattern.fields().into_iter().filter(|f| !f.is_reserved()).collect(),
            meta: None,
            delegate: None,
        }
    }

    /// JSON object of the fields.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        JsonValue::Object(
            self.fields
                .iter()
                .map(|f| (f.name.clone(), f.value.to_json()))
                .collect(),
        )
    }
}

impl Patterned for Pattern {
    fn fields(&self) -> Vec<PatternField> {
        self.fields.clone()
    }

    fn meta(&self) -> Option<Carrier> {
        self.meta.clone()
    }

    fn delegate(&self) -> Option<Carrier> {
        self.delegate.clone()
    }
}

impl Serialize for Pattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = Map::<String, JsonValue>::deserialize(deserializer)?;
        Ok(Self::from_json_map(&map))
    }
}

// ---------------------------------------------------------------------------
// PatternSet
// ---------------------------------------------------------------------------

/// Normalized form of a pattern: its present fields, weight, and payload.
///
/// `weight` is the number of present fields. `sequence` is the 1-based
/// registration order assigned by the router (0 for sets never registered).
#[derive(Debug, Clone)]
pub struct PatternSet<T = ()> {
    pub pattern: Pattern,
    pub fields: PatternFields,
    pub weight: usize,
    pub sequence: u64,
    pub payload: T,
}

impl PatternSet<()> {
    /// Computes the set of present primitive fields of `pattern`.
    ///
    /// Reserved and zero-valued fields are skipped; the weight is the number
    /// of fields kept.
    pub fn from_pattern<P: Patterned + ?Sized>(pattern: &P) -> Self {
        let cleaned = Pattern::cleaned(pattern);
        let fields: PatternFields = cleaned
            .iter()
            .filter(|f| !f.value.is_zero())
            .map(|f| (f.name.clone(), f.value.clone()))
            .collect();
        Self {
            pattern: cleaned,
            weight: fields.len(),
            fields,
            sequence: 0,
            payload: (),
        }
    }
}

impl<T> PatternSet<T> {
    /// Attaches a payload, keeping the computed fields.
    pub fn with_payload<U>(self, payload: U) -> PatternSet<U> {
        PatternSet {
            pattern: self.pattern,
            fields: self.fields,
            weight: self.weight,
            sequence: self.sequence,
            payload,
        }
    }

    /// A registered set matches an incoming one when every field it
    /// constrains is present with an equal value in `incoming`.
    #[must_use]
    pub fn matches(&self, incoming: &PatternFields) -> bool {
        self.fields
            .iter()
            .all(|(name, value)| incoming.get(name) == Some(value))
    }

    /// `name:value` pairs of the present fields joined with `,`.
    #[must_use]
    pub fn method(&self) -> String {
        method_name(&self.fields)
    }
}

/// Renders present fields as `name:value` pairs in name order.
#[must_use]
pub fn method_name(fields: &PatternFields) -> String {
    fields
        .iter()
        .map(|(name, value)| format!("{name}:{value}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Extracts the transport topic of a pattern.
///
/// # Errors
///
/// Returns `HemeraError::TopicRequired` when the `topic` field is missing or
/// zero-valued, and `HemeraError::InvalidTopicType` when it is not a string.
pub fn topic_of<P: Patterned + ?Sized>(pattern: &P, op: Operation) -> Result<String, HemeraError> {
    match pattern.fields().into_iter().find(|f| f.name == TOPIC_FIELD) {
        Some(PatternField {
            value: PatternValue::Str(topic),
            ..
        }) if !topic.is_empty() => Ok(topic),
        Some(field) if !field.value.is_zero() => Err(HemeraError::InvalidTopicType),
        _ => Err(HemeraError::TopicRequired(op)),
    }
}

/// Wire form of a pattern: every non-reserved primitive field, zero values
/// included, without metadata carriers.
pub fn clean_pattern<P: Patterned + ?Sized>(pattern: &P) -> Map<String, JsonValue> {
    match Pattern::cleaned(pattern).to_json() {
        JsonValue::Object(map) => map,
        _ => Map::new(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    struct RequestPattern {
        topic: String,
        cmd: String,
        a: i64,
        b: i64,
        meta: Carrier,
    }

    impl Patterned for RequestPattern {
        fn fields(&self) -> Vec<PatternField> {
            vec![
                PatternField::new("topic", &self.topic),
                PatternField::new("cmd", &self.cmd),
                PatternField::new("a", self.a),
                PatternField::new("b", self.b),
            ]
        }

        fn meta(&self) -> Option<Carrier> {
            Some(self.meta.clone())
        }
    }

    fn request(a: i64, b: i64) -> RequestPattern {
        let mut meta = Carrier::new();
        meta.insert("token".to_string(), json!("secret"));
        RequestPattern {
            topic: "math".to_string(),
            cmd: "add".to_string(),
            a,
            b,
            meta,
        }
    }

    #[test]
    fn zero_values_are_wildcards() {
        let set = PatternSet::from_pattern(&request(0, 2));
        assert_eq!(set.weight, 3);
        assert!(!set.fields.contains_key("a"));
        assert_eq!(set.fields.get("b"), Some(&PatternValue::Int(2)));
    }

    #[test]
    fn meta_never_enters_fields() {
        let set = PatternSet::from_pattern(&request(1, 2));
        assert_eq!(set.weight, 4);
        assert!(!set.fields.contains_key("meta"));
    }

    #[test]
    fn reserved_fields_are_skipped() {
        let pattern = Pattern::new()
            .field("topic", "math")
            .field("meta_", "not-a-criterion");
        let set = PatternSet::from_pattern(&pattern);
        assert_eq!(set.weight, 1);
        assert!(clean_pattern(&pattern).get("meta_").is_none());
    }

    #[test]
    fn identical_input_yields_identical_sets() {
        let first = PatternSet::from_pattern(&request(1, 2));
        let second = PatternSet::from_pattern(&request(1, 2));
        assert_eq!(first.fields, second.fields);
        assert_eq!(first.weight, second.weight);
    }

    #[test]
    fn clean_pattern_keeps_zero_values() {
        let wire = clean_pattern(&request(0, 2));
        assert_eq!(JsonValue::Object(wire), json!({"topic": "math", "cmd": "add", "a": 0, "b": 2}));
    }

    #[test]
    fn topic_checks() {
        assert_eq!(topic_of(&request(1, 2), Operation::Add), Ok("math".to_string()));

        let missing = Pattern::new().field("cmd", "add");
        assert_eq!(
            topic_of(&missing, Operation::Act),
            Err(HemeraError::TopicRequired(Operation::Act))
        );

        let empty = Pattern::new().field("topic", "");
        assert_eq!(
            topic_of(&empty, Operation::Add),
            Err(HemeraError::TopicRequired(Operation::Add))
        );

        let numeric = Pattern::new().field("topic", 7);
        assert_eq!(topic_of(&numeric, Operation::Add), Err(HemeraError::InvalidTopicType));
    }

    #[test]
    fn builder_replaces_duplicate_names() {
        let pattern = Pattern::new().field("cmd", "add").field("cmd", "sub");
        assert_eq!(pattern.len(), 1);
        assert_eq!(pattern.get("cmd"), Some(&PatternValue::from("sub")));
    }

    #[test]
    fn deserialize_skips_composites() {
        let pattern: Pattern = serde_json::from_value(json!({
            "topic": "math",
            "a": 1,
            "ratio": 0.5,
            "flag": true,
            "nested": {"x": 1},
            "list": [1, 2],
            "nothing": null
        }))
        .unwrap();
        assert_eq!(pattern.len(), 4);
        assert_eq!(pattern.get("a"), Some(&PatternValue::Int(1)));
        assert_eq!(pattern.get("ratio"), Some(&PatternValue::from(0.5)));
        assert!(pattern.get("nested").is_none());
    }

    #[test]
    fn method_lists_fields_in_name_order() {
        let set = PatternSet::from_pattern(&Pattern::new().field("topic", "math").field("cmd", "add"));
        assert_eq!(set.method(), "cmd:add,topic:math");
    }

    fn value_strategy() -> impl Strategy<Value = PatternValue> {
        prop_oneof![
            any::<bool>().prop_map(PatternValue::Bool),
            (-3i64..3).prop_map(PatternValue::Int),
            prop_oneof![Just(0.0_f64), Just(-0.0_f64), -2.0_f64..2.0]
                .prop_map(|f| PatternValue::Float(OrderedFloat(f))),
            "[a-c]{0,2}".prop_map(PatternValue::Str),
        ]
    }

    proptest! {
        #[test]
        fn weight_counts_non_zero_fields(
            entries in prop::collection::btree_map("[a-z]{1,6}", value_strategy(), 0..8)
        ) {
            let pattern = entries
                .iter()
                .fold(Pattern::new(), |p, (name, value)| p.field(name.clone(), value.clone()));
            let expected = entries.values().filter(|v| !v.is_zero()).count();
            prop_assert_eq!(PatternSet::from_pattern(&pattern).weight, expected);
        }
    }
}
