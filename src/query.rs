//! Filtering, ordering and paging over one entity kind.
//!
//! Conditions are `(field, op, value)` triples, usually parsed from keys of
//! the form `field__op` (`rec_datetime__gte`, `name__icontains`). A bare
//! field name means `exact`. The field may follow relations to the related
//! kind's fields (`block__name`, `events__label__name`). Every condition is
//! checked against the field catalogue and compiled into a parameterized SQL
//! `where` clause; relations to many rows and every relation hop compile
//! into `exists` subqueries.

use std::fmt;
use std::marker::PhantomData;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use rusqlite::types::Value;

use crate::error::Result;
use crate::model::{EntityId, EntityKind};
use crate::persist;
use crate::repository::{Database, Model};
use crate::schema::{self, FieldInfo, FieldType, Relation};
use crate::validate::{ValidationError, Violation};

lazy_static! {
    static ref FILTER_KEY: Regex = Regex::new(r"^[a-z][a-z0-9]*(?:__?[a-z][a-z0-9]*)*$").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Exact,
    IExact,
    Contains,
    IContains,
    StartsWith,
    Gt,
    Gte,
    Lt,
    Lte,
    IsNull,
    In,
    HasKey,
}
impl Op {
    pub const ALL: [Op; 12] = [
        Op::Exact,
        Op::IExact,
        Op::Contains,
        Op::IContains,
        Op::StartsWith,
        Op::Gt,
        Op::Gte,
        Op::Lt,
        Op::Lte,
        Op::IsNull,
        Op::In,
        Op::HasKey,
    ];
    pub fn name(self) -> &'static str {
        match self {
            Op::Exact => "exact",
            Op::IExact => "iexact",
            Op::Contains => "contains",
            Op::IContains => "icontains",
            Op::StartsWith => "startswith",
            Op::Gt => "gt",
            Op::Gte => "gte",
            Op::Lt => "lt",
            Op::Lte => "lte",
            Op::IsNull => "isnull",
            Op::In => "in",
            Op::HasKey => "has_key",
        }
    }
    pub fn parse(name: &str) -> Option<Op> {
        Op::ALL.into_iter().find(|op| op.name() == name)
    }
    /// Operators a field of the given type can be filtered with.
    pub fn supported(self, field_type: FieldType) -> bool {
        use Op::*;
        match field_type {
            FieldType::Text => !matches!(self, HasKey),
            FieldType::Id | FieldType::Integer | FieldType::Float | FieldType::DateTime => {
                matches!(self, Exact | Gt | Gte | Lt | Lte | IsNull | In)
            }
            FieldType::Boolean => matches!(self, Exact | IsNull),
            FieldType::Annotations => matches!(self, Contains | IContains | HasKey),
            FieldType::ToOne | FieldType::ToMany => matches!(self, Exact | In | IsNull),
            FieldType::FloatArray | FieldType::WaveformArray => false,
        }
    }
}
impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    DateTime(DateTime<Utc>),
    List(Vec<FilterValue>),
}
impl FilterValue {
    /// Loose values as they arrive from JSON documents or query strings.
    pub fn from_json(value: &serde_json::Value) -> Option<FilterValue> {
        match value {
            serde_json::Value::Null => Some(FilterValue::Null),
            serde_json::Value::Bool(b) => Some(FilterValue::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(FilterValue::Integer)
                .or_else(|| n.as_f64().map(FilterValue::Float)),
            serde_json::Value::String(s) => Some(FilterValue::Text(s.clone())),
            serde_json::Value::Array(items) => items
                .iter()
                .map(FilterValue::from_json)
                .collect::<Option<Vec<_>>>()
                .map(FilterValue::List),
            serde_json::Value::Object(_) => None,
        }
    }
}
impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FilterValue::Null => write!(f, "null"),
            FilterValue::Bool(b) => write!(f, "{b}"),
            FilterValue::Integer(i) => write!(f, "{i}"),
            FilterValue::Float(x) => write!(f, "{x}"),
            FilterValue::Text(s) => write!(f, "'{s}'"),
            FilterValue::DateTime(t) => write!(f, "{}", t.to_rfc3339()),
            FilterValue::List(items) => {
                let items: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", items.join(", "))
            }
        }
    }
}
impl From<bool> for FilterValue {
    fn from(v: bool) -> Self { FilterValue::Bool(v) }
}
impl From<i64> for FilterValue {
    fn from(v: i64) -> Self { FilterValue::Integer(v) }
}
impl From<i32> for FilterValue {
    fn from(v: i32) -> Self { FilterValue::Integer(v.into()) }
}
impl From<u32> for FilterValue {
    fn from(v: u32) -> Self { FilterValue::Integer(v.into()) }
}
impl From<EntityId> for FilterValue {
    fn from(v: EntityId) -> Self { FilterValue::Integer(v as i64) }
}
impl From<f64> for FilterValue {
    fn from(v: f64) -> Self { FilterValue::Float(v) }
}
impl From<&str> for FilterValue {
    fn from(v: &str) -> Self { FilterValue::Text(v.to_string()) }
}
impl From<String> for FilterValue {
    fn from(v: String) -> Self { FilterValue::Text(v) }
}
impl From<DateTime<Utc>> for FilterValue {
    fn from(v: DateTime<Utc>) -> Self { FilterValue::DateTime(v) }
}
impl<V: Into<FilterValue>> From<Vec<V>> for FilterValue {
    fn from(v: Vec<V>) -> Self { FilterValue::List(v.into_iter().map(Into::into).collect()) }
}
impl<V: Into<FilterValue>> From<Option<V>> for FilterValue {
    fn from(v: Option<V>) -> Self { v.map_or(FilterValue::Null, Into::into) }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub op: Op,
    pub value: FilterValue,
}
impl Condition {
    pub fn new(field: impl Into<String>, op: Op, value: impl Into<FilterValue>) -> Self {
        Self { field: field.into(), op, value: value.into() }
    }
    pub fn equals(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(field, Op::Exact, value)
    }
    /// Parses a `field__op` or `relation__field__op` key. A trailing segment
    /// that is no operator belongs to the field path, which is only checked
    /// once the condition is compiled against a kind.
    pub fn parse(key: &str, value: impl Into<FilterValue>) -> std::result::Result<Self, Violation> {
        if !FILTER_KEY.is_match(key) {
            return Err(Violation::UnknownField { field: key.to_string() });
        }
        let (field, op) = match key.rsplit_once("__") {
            Some((field, op)) => match Op::parse(op) {
                Some(op) => (field, op),
                None => (key, Op::Exact),
            },
            None => (key, Op::Exact),
        };
        Ok(Self::new(field, op, value))
    }
}

/// A conjunction of conditions, plus disjunctive groups used by `search`.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    all: Vec<Condition>,
    any: Vec<Vec<Condition>>,
    rejected: Vec<Violation>,
}
impl Filter {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with(mut self, condition: Condition) -> Self {
        self.all.push(condition);
        self
    }
    pub fn add(&mut self, condition: Condition) {
        self.all.push(condition);
    }
    /// Adds a parsed `field__op` condition; unparseable keys are reported
    /// when the filter is compiled.
    pub fn add_key(&mut self, key: &str, value: impl Into<FilterValue>) {
        match Condition::parse(key, value) {
            Ok(condition) => self.all.push(condition),
            Err(violation) => self.rejected.push(violation),
        }
    }
    /// Case-insensitive match on name, description or annotations, whichever
    /// of those the kind has.
    pub fn add_search(&mut self, kind: EntityKind, term: &str) {
        let fields = schema::describe(kind);
        let group: Vec<Condition> = ["name", "description", "annotations"]
            .into_iter()
            .filter(|name| fields.field(name).is_some())
            .map(|name| Condition::new(name, Op::IContains, term))
            .collect();
        self.any.push(group);
    }
    pub fn conditions(&self) -> &[Condition] {
        &self.all
    }
    pub fn is_empty(&self) -> bool {
        self.all.is_empty() && self.any.is_empty() && self.rejected.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}
impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self { field: field.into(), descending: false }
    }
    pub fn desc(field: impl Into<String>) -> Self {
        Self { field: field.into(), descending: true }
    }
    /// `"-rec_datetime"` sorts descending, `"index"` ascending.
    pub fn parse(key: &str) -> Self {
        match key.strip_prefix('-') {
            Some(field) => Self::desc(field),
            None => Self::asc(key),
        }
    }
}

/// A filter and ordering ready to be handed to the store.
#[derive(Debug)]
pub struct Compiled {
    pub condition: String,
    pub order: String,
    pub params: Vec<Value>,
}

pub fn compile(kind: EntityKind, filter: &Filter, order: &[OrderBy]) -> Result<Compiled> {
    let mut builder = Builder::new(kind);
    builder.violations.extend(filter.rejected.iter().cloned());
    let mut clauses: Vec<String> = Vec::new();
    for condition in &filter.all {
        if let Some(clause) = builder.condition(condition) {
            clauses.push(clause);
        }
    }
    for group in &filter.any {
        let alternatives: Vec<String> = group.iter().filter_map(|c| builder.condition(c)).collect();
        if alternatives.is_empty() {
            clauses.push("0".to_string());
        } else {
            clauses.push(format!("({})", alternatives.join(" or ")));
        }
    }
    let order = builder.order(order);
    if !builder.violations.is_empty() {
        return Err(ValidationError::new(kind, builder.violations).into());
    }
    let condition = if clauses.is_empty() { "1".to_string() } else { clauses.join(" and ") };
    Ok(Compiled { condition, order, params: builder.params })
}

/// One table of the statement: the listed kind itself, or a related kind
/// reached through a relation hop.
#[derive(Debug, Clone)]
struct Scope {
    kind: EntityKind,
    alias: String,
}
impl Scope {
    fn column(&self, column: &str) -> String {
        format!("{}.{}", self.alias, column)
    }
    fn identity(&self) -> String {
        self.column(&persist::identity(self.kind))
    }
}

struct Builder {
    root: Scope,
    hops: usize,
    params: Vec<Value>,
    violations: Vec<Violation>,
}
impl Builder {
    fn new(kind: EntityKind) -> Self {
        let root = Scope { kind, alias: kind.table().to_string() };
        Self { root, hops: 0, params: Vec::new(), violations: Vec::new() }
    }

    fn reject(&mut self, field: &FieldInfo, message: String) -> Option<String> {
        self.violations.push(Violation::InvalidValue { field: field.name.to_string(), message });
        None
    }

    fn fresh(&mut self) -> String {
        self.hops += 1;
        format!("hop{}", self.hops)
    }
    fn alias(&mut self, kind: EntityKind) -> Scope {
        Scope { kind, alias: self.fresh() }
    }

    fn condition(&mut self, condition: &Condition) -> Option<String> {
        let path: Vec<&str> = condition.field.split("__").collect();
        let root = self.root.clone();
        self.resolve(&root, &path, 0, condition)
    }

    /// Walks `path` from `scope`, one relation per segment, until the last
    /// segment names the field the operator applies to.
    fn resolve(&mut self, scope: &Scope, path: &[&str], at: usize, condition: &Condition) -> Option<String> {
        let Some(field) = schema::describe(scope.kind).field(path[at]) else {
            self.violations.push(Violation::UnknownField { field: condition.field.clone() });
            return None;
        };
        if at + 1 < path.len() {
            let Some(relation) = field.relation else {
                self.violations.push(Violation::UnsupportedOperator {
                    field: path[..=at].join("__"),
                    op: path[at + 1..].join("__"),
                });
                return None;
            };
            return self.hop(scope, field, relation, path, at, condition);
        }
        if !condition.op.supported(field.field_type) {
            self.violations.push(Violation::UnsupportedOperator {
                field: condition.field.clone(),
                op: condition.op.name().to_string(),
            });
            return None;
        }
        match field.relation {
            Some(Relation::Children { target, column }) => {
                let next = self.alias(target);
                let source = format!(
                    "{} as {} where {} = {}",
                    target.table(),
                    next.alias,
                    next.column(column),
                    scope.identity()
                );
                self.exists(field, condition, &source, &next.identity())
            }
            Some(Relation::Link { table, own, other, .. }) => {
                let link = self.fresh();
                let source = format!("{table} as {link} where {link}.{own} = {}", scope.identity());
                self.exists(field, condition, &source, &format!("{link}.{other}"))
            }
            _ => {
                let column = match field.column {
                    Some(column) => scope.column(column),
                    None => scope.identity(),
                };
                self.column(field, condition, &column)
            }
        }
    }

    /// Moves into the related kind: the rest of the path must hold for at
    /// least one related row.
    fn hop(
        &mut self,
        scope: &Scope,
        field: &FieldInfo,
        relation: Relation,
        path: &[&str],
        at: usize,
        condition: &Condition,
    ) -> Option<String> {
        let target = relation.target();
        let next = self.alias(target);
        let (source, join) = match (relation, field.column) {
            (Relation::Reference { .. }, Some(column)) => (
                format!("{} as {}", target.table(), next.alias),
                format!("{} = {}", next.identity(), scope.column(column)),
            ),
            (Relation::Children { column, .. }, _) => (
                format!("{} as {}", target.table(), next.alias),
                format!("{} = {}", next.column(column), scope.identity()),
            ),
            (Relation::Link { table, own, other, .. }, _) => {
                let link = format!("{}_link", next.alias);
                (
                    format!("{table} as {link}, {} as {}", target.table(), next.alias),
                    format!("{link}.{own} = {} and {} = {link}.{other}", scope.identity(), next.identity()),
                )
            }
            (Relation::Reference { .. }, None) => {
                self.violations.push(Violation::UnknownField { field: condition.field.clone() });
                return None;
            }
        };
        let test = self.resolve(&next, path, at + 1, condition)?;
        Some(format!("exists (select 1 from {source} where {join} and {test})"))
    }

    fn exists(&mut self, field: &FieldInfo, condition: &Condition, source: &str, inner: &str) -> Option<String> {
        match (condition.op, &condition.value) {
            (Op::IsNull, FilterValue::Bool(true)) => Some(format!("not exists (select 1 from {source})")),
            (Op::IsNull, FilterValue::Bool(false)) => Some(format!("exists (select 1 from {source})")),
            (Op::IsNull, other) => self.reject(field, format!("isnull expects true or false, got {other}")),
            _ => {
                let test = self.column(field, condition, inner)?;
                Some(format!("exists (select 1 from {source} and {test})"))
            }
        }
    }

    fn column(&mut self, field: &FieldInfo, condition: &Condition, column: &str) -> Option<String> {
        let comparison = match condition.op {
            Op::Exact if condition.value == FilterValue::Null => {
                return Some(format!("{column} is null"));
            }
            Op::IsNull => {
                return match condition.value {
                    FilterValue::Bool(true) => Some(format!("{column} is null")),
                    FilterValue::Bool(false) => Some(format!("{column} is not null")),
                    ref other => self.reject(field, format!("isnull expects true or false, got {other}")),
                };
            }
            Op::In => {
                let FilterValue::List(items) = &condition.value else {
                    return self.reject(field, format!("in expects a list, got {}", condition.value));
                };
                if items.is_empty() {
                    return Some("0".to_string());
                }
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    match param(field, item) {
                        Ok(value) => values.push(value),
                        Err(message) => return self.reject(field, message),
                    }
                }
                let placeholders = vec!["?"; values.len()].join(", ");
                self.params.extend(values);
                return Some(format!("{column} in ({placeholders})"));
            }
            Op::HasKey => {
                let FilterValue::Text(key) = &condition.value else {
                    return self.reject(field, format!("has_key expects a key, got {}", condition.value));
                };
                self.params.push(Value::Text(key.clone()));
                return Some(format!("exists (select 1 from json_each({column}) where json_each.key = ?)"));
            }
            Op::Exact => format!("{column} = ?"),
            Op::IExact => format!("lower({column}) = lower(?)"),
            Op::Contains => format!("instr({column}, ?) > 0"),
            Op::IContains => format!("instr(lower({column}), lower(?)) > 0"),
            Op::StartsWith => format!("instr({column}, ?) = 1"),
            Op::Gt => format!("{column} > ?"),
            Op::Gte => format!("{column} >= ?"),
            Op::Lt => format!("{column} < ?"),
            Op::Lte => format!("{column} <= ?"),
        };
        match param(field, &condition.value) {
            Ok(value) => {
                self.params.push(value);
                Some(comparison)
            }
            Err(message) => self.reject(field, message),
        }
    }

    fn order(&mut self, order: &[OrderBy]) -> String {
        let mut keys: Vec<String> = Vec::new();
        let natural: Vec<OrderBy>;
        let order = if order.is_empty() {
            natural = schema::describe(self.root.kind)
                .natural_order
                .iter()
                .map(|key| OrderBy { field: key.field.to_string(), descending: key.descending })
                .collect();
            &natural[..]
        } else {
            order
        };
        for key in order {
            let Some(field) = schema::describe(self.root.kind).field(&key.field) else {
                self.violations.push(Violation::UnknownField { field: key.field.clone() });
                continue;
            };
            let column = match (field.field_type, field.column) {
                (FieldType::Id, _) => self.root.identity(),
                (FieldType::FloatArray | FieldType::WaveformArray | FieldType::Annotations, _) | (_, None) => {
                    self.violations.push(Violation::UnsupportedOperator {
                        field: field.name.to_string(),
                        op: "order_by".to_string(),
                    });
                    continue;
                }
                (_, Some(column)) => self.root.column(column),
            };
            // unset values sort after set ones in either direction
            keys.push(format!("{column} {} nulls last", if key.descending { "desc" } else { "asc" }));
        }
        keys.push(format!("{} asc", self.root.identity()));
        keys.join(", ")
    }
}

fn param(field: &FieldInfo, value: &FilterValue) -> std::result::Result<Value, String> {
    use FieldType as F;
    match (field.field_type, value) {
        (F::Text | F::Annotations, FilterValue::Text(s)) => Ok(Value::Text(s.clone())),
        (F::Id | F::Integer | F::ToOne | F::ToMany, FilterValue::Integer(i)) => Ok(Value::Integer(*i)),
        (F::Id | F::Integer | F::ToOne | F::ToMany, FilterValue::Text(s)) => s
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|_| format!("'{s}' is not an integer")),
        (F::Float, FilterValue::Integer(i)) => Ok(Value::Real(*i as f64)),
        (F::Float, FilterValue::Float(x)) => Ok(Value::Real(*x)),
        (F::Float, FilterValue::Text(s)) => s
            .parse::<f64>()
            .map(Value::Real)
            .map_err(|_| format!("'{s}' is not a number")),
        (F::Boolean, FilterValue::Bool(b)) => Ok(Value::Integer(i64::from(*b))),
        (F::DateTime, FilterValue::DateTime(t)) => Ok(persist::timestamp(t)),
        (F::DateTime, FilterValue::Text(s)) => DateTime::parse_from_rfc3339(s)
            .map(|t| persist::timestamp(&t.with_timezone(&Utc)))
            .map_err(|e| format!("'{s}' is not an RFC 3339 datetime: {e}")),
        (field_type, other) => Err(format!("{other} cannot be compared with a {field_type:?} field")),
    }
}

/// A lazily evaluated, restartable selection of one entity kind. Nothing
/// touches the store until `fetch`, `count` or `first` is called, and each
/// call reads a fresh consistent snapshot.
pub struct Query<'db, T> {
    db: &'db Database,
    filter: Filter,
    order: Vec<OrderBy>,
    limit: Option<usize>,
    offset: usize,
    kind: PhantomData<fn() -> T>,
}
impl<'db, T> Clone for Query<'db, T> {
    fn clone(&self) -> Self {
        Self {
            db: self.db,
            filter: self.filter.clone(),
            order: self.order.clone(),
            limit: self.limit,
            offset: self.offset,
            kind: PhantomData,
        }
    }
}
impl<'db, T: Model> Query<'db, T> {
    pub fn new(db: &'db Database) -> Self {
        Self { db, filter: Filter::new(), order: Vec::new(), limit: None, offset: 0, kind: PhantomData }
    }
    pub fn filter(mut self, condition: Condition) -> Self {
        self.filter.add(condition);
        self
    }
    pub fn filter_key(mut self, key: &str, value: impl Into<FilterValue>) -> Self {
        self.filter.add_key(key, value);
        self
    }
    pub fn search(mut self, term: &str) -> Self {
        self.filter.add_search(T::KIND, term);
        self
    }
    /// Replaces the natural ordering; keys accumulate in call order.
    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order.push(order);
        self
    }
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
    pub fn fetch(&self) -> Result<Vec<T>> {
        self.db.list::<T>(&self.filter, &self.order, self.limit, self.offset)
    }
    /// Rows matching the filter, ignoring limit and offset.
    pub fn count(&self) -> Result<usize> {
        self.db.count::<T>(&self.filter)
    }
    pub fn first(&self) -> Result<Option<T>> {
        let mut rows = self.db.list::<T>(&self.filter, &self.order, Some(1), self.offset)?;
        Ok(rows.pop())
    }
    pub fn ids(&self) -> Result<Vec<EntityId>> {
        Ok(self.fetch()?.iter().filter_map(|e| e.id()).collect())
    }
}
