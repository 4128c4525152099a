//! Boolean conditions over a schema's fields.
//!
//! A [`Condition`] is a strict binary tree: terms are leaves, `And`/`Or`
//! nodes have exactly two ordered children. There is no `Not` node;
//! [`Condition::not`] pushes negation down to the terms instead.
//!
//! Conditions serialize to a stable JSON shape, keys in this order:
//!
//! ```json
//! {"operation": "AND", "firstOperand": {...}, "secondOperand": {...}}
//! {"operation": "equals", "field": "name", "value": "ethanol"}
//! ```
//!
//! Range values are `{"from", "to"}` objects whose bounds are strings
//! (lexicographic), numbers (numeric) or `null`. A `similar` term carries
//! `{"structure", "metric", "threshold"}`, plus `"alpha"` and `"beta"` for
//! the Tversky metric.

use std::{fmt, hash::Hash};

use serde_json::{Map, Value, json};

use crate::{
    error::{Error, Result},
    field::{Field, FieldKind},
    schema::Schema,
};

const AND: &str = "AND";
const OR: &str = "OR";

/// Comparison applied by a term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    Range,
    NotRange,
    Prefix,
    Similar,
}

impl Operator {
    pub const ALL: [Operator; 8] = [
        Self::Equals,
        Self::NotEquals,
        Self::Contains,
        Self::NotContains,
        Self::Range,
        Self::NotRange,
        Self::Prefix,
        Self::Similar,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            Self::Equals => "equals",
            Self::NotEquals => "notEquals",
            Self::Contains => "contains",
            Self::NotContains => "notContains",
            Self::Range => "range",
            Self::NotRange => "notRange",
            Self::Prefix => "prefix",
            Self::Similar => "similar",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.tag() == tag)
    }

    pub fn negation(self) -> Option<Self> {
        match self {
            Self::Equals => Some(Self::NotEquals),
            Self::NotEquals => Some(Self::Equals),
            Self::Contains => Some(Self::NotContains),
            Self::NotContains => Some(Self::Contains),
            Self::Range => Some(Self::NotRange),
            Self::NotRange => Some(Self::Range),
            Self::Prefix | Self::Similar => None,
        }
    }

    pub fn is_negated(self) -> bool {
        matches!(self, Self::NotEquals | Self::NotContains | Self::NotRange)
    }

    /// The positive form of this operator.
    pub fn positive(self) -> Self {
        if self.is_negated() {
            self.negation().unwrap_or(self)
        } else {
            self
        }
    }

    pub fn takes_range(self) -> bool {
        matches!(self, Self::Range | Self::NotRange)
    }

    pub fn supports(self, kind: FieldKind) -> bool {
        match kind {
            FieldKind::Text => self != Self::Similar,
            FieldKind::Molecule | FieldKind::Reaction => matches!(
                self,
                Self::Equals
                    | Self::NotEquals
                    | Self::Contains
                    | Self::NotContains
                    | Self::Similar
            ),
        }
    }

    /// Whether `value` has the shape this operator compares against.
    pub fn accepts(self, value: &TermValue) -> bool {
        match value {
            TermValue::Text(_) => !self.takes_range() && self != Self::Similar,
            TermValue::Range { .. } | TermValue::NumericRange { .. } => {
                self.takes_range()
            }
            TermValue::Similarity(_) => self == Self::Similar,
        }
    }

    /// Token used for this operator in the backend query syntax.
    pub fn query_token(self) -> &'static str {
        match self {
            Self::Equals | Self::Contains | Self::Prefix => ":",
            Self::NotEquals | Self::NotContains | Self::NotRange => "-",
            Self::Range => "TO",
            Self::Similar => "~",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A finite float, compared and hashed by its bit pattern.
#[derive(Debug, Clone, Copy)]
pub struct Number(f64);

impl Number {
    pub fn new(value: f64) -> Result<Self> {
        if value.is_finite() {
            // Folds -0.0 into 0.0.
            Ok(Self(value + 0.0))
        } else {
            Err(Error::MalformedCondition(format!(
                "{value} is not a finite number"
            )))
        }
    }

    pub fn get(self) -> f64 {
        self.0
    }
}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for Number {}

impl Hash for Number {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How two fingerprints are compared by a `similar` term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    /// Shared tokens over the union of both fingerprints.
    Tanimoto,
    /// Tanimoto with the query-only and record-only parts weighted by
    /// `alpha` and `beta`.
    Tversky { alpha: Number, beta: Number },
    /// Shared tokens over the query's tokens.
    Euclid,
}

impl Metric {
    pub fn name(self) -> &'static str {
        match self {
            Self::Tanimoto => "tanimoto",
            Self::Tversky { .. } => "tversky",
            Self::Euclid => "euclid",
        }
    }

    pub fn tversky(alpha: f64, beta: f64) -> Result<Self> {
        let weight = |value: f64| {
            let number = Number::new(value)?;
            if value < 0.0 {
                return Err(Error::MalformedCondition(format!(
                    "tversky weights must not be negative, got {value}"
                )));
            }
            Ok(number)
        };
        Ok(Self::Tversky {
            alpha: weight(alpha)?,
            beta: weight(beta)?,
        })
    }
}

/// Query side of a `similar` term: a structure, the metric and the
/// smallest score a record must reach.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Similarity {
    pub structure: String,
    pub metric: Metric,
    pub threshold: Number,
}

impl Similarity {
    /// `threshold` must lie in `0.0..=1.0`.
    pub fn new(
        structure: impl Into<String>,
        metric: Metric,
        threshold: f64,
    ) -> Result<Self> {
        let threshold = Number::new(threshold)?;
        if !(0.0..=1.0).contains(&threshold.get()) {
            return Err(Error::MalformedCondition(format!(
                "similarity threshold must be within 0..=1, got {threshold}"
            )));
        }
        Ok(Self {
            structure: structure.into(),
            metric,
            threshold,
        })
    }

    pub fn tanimoto(
        structure: impl Into<String>,
        threshold: f64,
    ) -> Result<Self> {
        Self::new(structure, Metric::Tanimoto, threshold)
    }

    /// Score of a record holding `target` fingerprint tokens, `shared` of
    /// which also appear among the query's `query` tokens.
    pub fn score(&self, query: usize, target: usize, shared: usize) -> f64 {
        let (q, t, c) = (query as f64, target as f64, shared as f64);
        let denominator = match self.metric {
            Metric::Tanimoto => q + t - c,
            Metric::Tversky { alpha, beta } => {
                alpha.get() * (q - c) + beta.get() * (t - c) + c
            }
            Metric::Euclid => q,
        };
        if denominator <= 0.0 {
            0.0
        } else {
            c / denominator
        }
    }

    pub fn matches(&self, score: f64) -> bool {
        score >= self.threshold.get()
    }

    /// Fewest shared tokens a record can have and still reach the
    /// threshold, given a query fingerprint of `query` tokens. Never below
    /// one.
    pub fn min_shared(&self, query: usize) -> usize {
        let t = self.threshold.get();
        let q = query as f64;
        let bound = match self.metric {
            Metric::Tanimoto | Metric::Euclid => t * q,
            Metric::Tversky { alpha, .. } => {
                let alpha = alpha.get();
                let slack = 1.0 - t * (1.0 - alpha);
                if slack > 0.0 { t * alpha * q / slack } else { 0.0 }
            }
        };
        ((bound - 1e-9).ceil().max(1.0) as usize).min(query.max(1))
    }

    fn to_json(&self) -> Value {
        let mut object = Map::new();
        object.insert("structure".into(), json!(self.structure));
        object.insert("metric".into(), json!(self.metric.name()));
        object.insert("threshold".into(), json!(self.threshold.get()));
        if let Metric::Tversky { alpha, beta } = self.metric {
            object.insert("alpha".into(), json!(alpha.get()));
            object.insert("beta".into(), json!(beta.get()));
        }
        Value::Object(object)
    }

    fn from_json(value: &Value) -> Result<Self> {
        let object = value.as_object().ok_or_else(|| {
            Error::MalformedCondition(format!(
                "'similar' expects a {{\"structure\", \"metric\", \
                 \"threshold\"}} object, got {value}"
            ))
        })?;
        let structure =
            required(object, "structure")?.as_str().ok_or_else(|| {
                Error::MalformedCondition("'structure' must be a string".into())
            })?;
        let number = |key: &str, default: f64| match object.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(v) => v.as_f64().ok_or_else(|| {
                Error::MalformedCondition(format!(
                    "'{key}' must be a number, got {v}"
                ))
            }),
        };
        let metric = match object.get("metric") {
            None | Some(Value::Null) => Metric::Tanimoto,
            Some(Value::String(name)) => match name.as_str() {
                "tanimoto" => Metric::Tanimoto,
                "euclid" => Metric::Euclid,
                "tversky" => Metric::tversky(
                    number("alpha", 0.5)?,
                    number("beta", 0.5)?,
                )?,
                other => {
                    return Err(Error::MalformedCondition(format!(
                        "unknown similarity metric '{other}'"
                    )));
                }
            },
            Some(other) => {
                return Err(Error::MalformedCondition(format!(
                    "'metric' must be a string, got {other}"
                )));
            }
        };
        Self::new(structure, metric, number("threshold", 0.0)?)
    }
}

/// Literal compared against a field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TermValue {
    Text(String),
    /// Inclusive lexicographic bounds; `None` leaves that side open.
    Range {
        from: Option<String>,
        to: Option<String>,
    },
    /// Inclusive numeric bounds, matched against field values that read
    /// as numbers.
    NumericRange {
        from: Option<Number>,
        to: Option<Number>,
    },
    Similarity(Similarity),
}

impl TermValue {
    pub fn range(from: Option<&str>, to: Option<&str>) -> Self {
        Self::Range {
            from: from.map(str::to_string),
            to: to.map(str::to_string),
        }
    }

    pub fn numeric_range(from: Option<f64>, to: Option<f64>) -> Result<Self> {
        Ok(Self::NumericRange {
            from: from.map(Number::new).transpose()?,
            to: to.map(Number::new).transpose()?,
        })
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// A range with neither bound set.
    pub fn is_open_range(&self) -> bool {
        matches!(
            self,
            Self::Range {
                from: None,
                to: None
            } | Self::NumericRange {
                from: None,
                to: None
            }
        )
    }

    fn to_json(&self) -> Value {
        match self {
            Self::Text(text) => Value::String(text.clone()),
            Self::Range { from, to } => json!({ "from": from, "to": to }),
            Self::NumericRange { from, to } => json!({
                "from": from.map(Number::get),
                "to": to.map(Number::get),
            }),
            Self::Similarity(similarity) => similarity.to_json(),
        }
    }

    fn from_json(operator: Operator, value: &Value) -> Result<Self> {
        if operator == Operator::Similar {
            return Similarity::from_json(value).map(Self::Similarity);
        }
        if !operator.takes_range() {
            return value
                .as_str()
                .map(|text| Self::Text(text.to_string()))
                .ok_or_else(|| {
                    Error::MalformedCondition(format!(
                        "'{operator}' expects a string value, got {value}"
                    ))
                });
        }

        let object = value.as_object().ok_or_else(|| {
            Error::MalformedCondition(format!(
                "'{operator}' expects a {{\"from\", \"to\"}} object, got {value}"
            ))
        })?;
        let bound = |key: &str| object.get(key).filter(|v| !v.is_null());
        let (from, to) = (bound("from"), bound("to"));
        let numeric = |b: Option<&Value>| b.is_none_or(Value::is_number);
        let textual = |b: Option<&Value>| b.is_none_or(Value::is_string);

        if (from.is_some() || to.is_some()) && numeric(from) && numeric(to) {
            Self::numeric_range(
                from.and_then(Value::as_f64),
                to.and_then(Value::as_f64),
            )
        } else if textual(from) && textual(to) {
            Ok(Self::Range {
                from: from.and_then(Value::as_str).map(str::to_string),
                to: to.and_then(Value::as_str).map(str::to_string),
            })
        } else {
            Err(Error::MalformedCondition(format!(
                "range bounds must both be strings or both be numbers, \
                 got {value}"
            )))
        }
    }
}

impl From<&str> for TermValue {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for TermValue {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Similarity> for TermValue {
    fn from(similarity: Similarity) -> Self {
        Self::Similarity(similarity)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Condition<S> {
    Term {
        field: Field<S>,
        operator: Operator,
        value: TermValue,
    },
    And(Box<Condition<S>>, Box<Condition<S>>),
    Or(Box<Condition<S>>, Box<Condition<S>>),
}

impl<S: Schema> Condition<S> {
    /// Build a term, checking that the field kind supports the operator and
    /// that the value has the shape the operator expects.
    pub fn term(
        field: Field<S>,
        operator: Operator,
        value: impl Into<TermValue>,
    ) -> Result<Self> {
        if !operator.supports(field.kind()) {
            return Err(Error::InvalidOperatorKind {
                field: field.name(),
                operator: operator.tag(),
            });
        }
        let value = value.into();
        if !operator.accepts(&value) {
            return Err(Error::MalformedCondition(format!(
                "value for '{operator}' on '{}' has the wrong shape",
                field.name()
            )));
        }
        Ok(Self::Term {
            field,
            operator,
            value,
        })
    }

    pub fn equals(field: Field<S>, value: &str) -> Result<Self> {
        Self::term(field, Operator::Equals, value)
    }

    pub fn not_equals(field: Field<S>, value: &str) -> Result<Self> {
        Self::term(field, Operator::NotEquals, value)
    }

    pub fn contains(field: Field<S>, value: &str) -> Result<Self> {
        Self::term(field, Operator::Contains, value)
    }

    pub fn not_contains(field: Field<S>, value: &str) -> Result<Self> {
        Self::term(field, Operator::NotContains, value)
    }

    pub fn range(
        field: Field<S>,
        from: Option<&str>,
        to: Option<&str>,
    ) -> Result<Self> {
        Self::term(field, Operator::Range, TermValue::range(from, to))
    }

    pub fn numeric_range(
        field: Field<S>,
        from: Option<f64>,
        to: Option<f64>,
    ) -> Result<Self> {
        Self::term(field, Operator::Range, TermValue::numeric_range(from, to)?)
    }

    pub fn prefix(field: Field<S>, value: &str) -> Result<Self> {
        Self::term(field, Operator::Prefix, value)
    }

    pub fn similar(field: Field<S>, similarity: Similarity) -> Result<Self> {
        Self::term(field, Operator::Similar, similarity)
    }

    pub fn and(first: Self, second: Self) -> Self {
        Self::And(Box::new(first), Box::new(second))
    }

    pub fn or(first: Self, second: Self) -> Self {
        Self::Or(Box::new(first), Box::new(second))
    }

    /// Negate the condition, pushing the negation down to the terms.
    ///
    /// Fails with [`Error::UnsupportedNegation`] if any term's operator has
    /// no negated form.
    pub fn not(&self) -> Result<Self> {
        match self {
            Self::Term {
                field,
                operator,
                value,
            } => {
                let negated = operator
                    .negation()
                    .ok_or(Error::UnsupportedNegation(operator.tag()))?;
                Ok(Self::Term {
                    field: *field,
                    operator: negated,
                    value: value.clone(),
                })
            }
            Self::And(first, second) => {
                Ok(Self::or(first.not()?, second.not()?))
            }
            Self::Or(first, second) => {
                Ok(Self::and(first.not()?, second.not()?))
            }
        }
    }

    pub fn operation_name(&self) -> &'static str {
        match self {
            Self::Term { operator, .. } => operator.tag(),
            Self::And(..) => AND,
            Self::Or(..) => OR,
        }
    }

    /// The operator token this node contributes to a backend query string.
    pub fn query_operation_name(&self) -> &'static str {
        match self {
            Self::Term { operator, .. } => operator.query_token(),
            Self::And(..) => AND,
            Self::Or(..) => OR,
        }
    }

    /// The `similar` term that ranks this condition's matches, if any.
    ///
    /// Only one may appear, and only where every node above it is an
    /// `And`; anything else is [`Error::MalformedCondition`].
    pub fn similarity(&self) -> Result<Option<(Field<S>, &Similarity)>> {
        match self {
            Self::Term {
                field,
                value: TermValue::Similarity(similarity),
                ..
            } => Ok(Some((*field, similarity))),
            Self::Term { .. } => Ok(None),
            Self::And(first, second) => {
                match (first.similarity()?, second.similarity()?) {
                    (Some(_), Some(_)) => Err(Error::MalformedCondition(
                        "only one similarity term may be used".into(),
                    )),
                    (found, None) | (None, found) => Ok(found),
                }
            }
            Self::Or(first, second) => {
                if first.has_similarity() || second.has_similarity() {
                    Err(Error::MalformedCondition(
                        "a similarity term cannot sit under OR".into(),
                    ))
                } else {
                    Ok(None)
                }
            }
        }
    }

    fn has_similarity(&self) -> bool {
        match self {
            Self::Term { operator, .. } => *operator == Operator::Similar,
            Self::And(first, second) | Self::Or(first, second) => {
                first.has_similarity() || second.has_similarity()
            }
        }
    }

    /// Render as a Lucene-style query string.
    pub fn to_query_string(&self) -> String {
        match self {
            Self::Term {
                field,
                operator,
                value,
            } => {
                let sign = if operator.is_negated() { "-" } else { "" };
                let name = field.name();
                let body = match (operator.positive(), value) {
                    (Operator::Range, TermValue::Range { from, to }) => {
                        let bound = |b: &Option<String>| {
                            b.as_deref().map_or("*".to_string(), quote)
                        };
                        range_body(bound(from), bound(to))
                    }
                    (Operator::Range, TermValue::NumericRange { from, to }) => {
                        let bound = |b: &Option<Number>| {
                            b.map_or("*".to_string(), |n| n.to_string())
                        };
                        range_body(bound(from), bound(to))
                    }
                    (Operator::Contains, TermValue::Text(text)) => {
                        format!("*{}*", escape(text))
                    }
                    (Operator::Prefix, TermValue::Text(text)) => {
                        format!("{}*", escape(text))
                    }
                    (_, TermValue::Similarity(sim)) => {
                        let weights = match sim.metric {
                            Metric::Tversky { alpha, beta } => {
                                format!(",{alpha},{beta}")
                            }
                            _ => String::new(),
                        };
                        format!(
                            "{}{}({},{}{weights})",
                            Operator::Similar.query_token(),
                            sim.metric.name(),
                            quote(&sim.structure),
                            sim.threshold
                        )
                    }
                    (_, TermValue::Text(text)) => quote(text),
                    (_, _) => String::new(),
                };
                format!("{sign}{name}:{body}")
            }
            Self::And(first, second) | Self::Or(first, second) => format!(
                "({} {} {})",
                first.to_query_string(),
                self.query_operation_name(),
                second.to_query_string()
            ),
        }
    }

    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        object.insert("operation".into(), json!(self.operation_name()));
        match self {
            Self::Term { field, value, .. } => {
                object.insert("field".into(), json!(field.name()));
                object.insert("value".into(), value.to_json());
            }
            Self::And(first, second) | Self::Or(first, second) => {
                object.insert("firstOperand".into(), first.to_json());
                object.insert("secondOperand".into(), second.to_json());
            }
        }
        Value::Object(object)
    }

    pub fn to_json_string(&self) -> String {
        self.to_json().to_string()
    }

    pub fn from_json(json: &Value) -> Result<Self> {
        let object = json.as_object().ok_or_else(|| {
            Error::MalformedCondition(format!(
                "expected a condition object, got {json}"
            ))
        })?;
        let operation = required(object, "operation")?
            .as_str()
            .ok_or_else(|| {
                Error::MalformedCondition("'operation' must be a string".into())
            })?;

        match operation {
            AND | OR => {
                let first = Self::from_json(operand(object, "firstOperand")?)?;
                let second =
                    Self::from_json(operand(object, "secondOperand")?)?;
                Ok(if operation == AND {
                    Self::and(first, second)
                } else {
                    Self::or(first, second)
                })
            }
            tag => {
                let operator = Operator::from_tag(tag)
                    .ok_or_else(|| Error::UnknownOperationKind(tag.into()))?;
                let name = required(object, "field")?.as_str().ok_or_else(|| {
                    Error::MalformedCondition("'field' must be a string".into())
                })?;
                let field = S::field(name).ok_or_else(|| {
                    Error::MalformedCondition(format!(
                        "schema '{}' has no field '{name}'",
                        S::TYPE_NAME
                    ))
                })?;
                let value =
                    TermValue::from_json(operator, required(object, "value")?)?;
                Self::term(field, operator, value)
            }
        }
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let json: Value = serde_json::from_str(text)
            .map_err(|e| Error::MalformedCondition(e.to_string()))?;
        Self::from_json(&json)
    }

    /// Names of every field the condition touches, each once, in the order
    /// they first appear.
    pub fn fields_involved(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        self.collect_fields(&mut names);
        names
    }

    fn collect_fields(&self, names: &mut Vec<&'static str>) {
        match self {
            Self::Term { field, .. } => {
                if !names.contains(&field.name()) {
                    names.push(field.name());
                }
            }
            Self::And(first, second) | Self::Or(first, second) => {
                first.collect_fields(names);
                second.collect_fields(names);
            }
        }
    }
}

impl<S: Schema> fmt::Display for Condition<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_query_string())
    }
}

fn required<'a>(
    object: &'a Map<String, Value>,
    key: &str,
) -> Result<&'a Value> {
    object
        .get(key)
        .ok_or_else(|| Error::MalformedCondition(format!("missing '{key}'")))
}

fn operand<'a>(object: &'a Map<String, Value>, key: &str) -> Result<&'a Value> {
    let value = required(object, key)?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(Error::MalformedCondition(format!(
            "'{key}' must be a condition object"
        )))
    }
}

fn range_body(from: String, to: String) -> String {
    format!("[{from} {} {to}]", Operator::Range.query_token())
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if "+-&|!(){}[]^\"~*?:\\/ ".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn quote(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}
