//! Translation of a raw query string into a structured list query.
//!
//! `?price[gte]=500&sort=-price,name&fields=name,price&page=2&limit=10`
//! becomes a [`QuerySpec`] with one range filter, two sort keys, an
//! inclusion projection and page 2 of 10.

pub mod sql;

use std::collections::{BTreeMap, BTreeSet};

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

/// Flat query-string map, as extracted by `axum::extract::Query`.
pub type QueryParams = BTreeMap<String, String>;

pub const RESERVED_KEYS: [&str; 4] = ["page", "sort", "limit", "fields"];
pub const VERSION_FIELD: &str = "version";
pub const CREATED_AT_FIELD: &str = "createdAt";
pub const DEFAULT_PAGE: u64 = 1;
pub const DEFAULT_LIMIT: u64 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("Invalid field name: {0}")]
    InvalidField(String),
    #[error("Unsupported operator `{op}` on field {field}")]
    UnsupportedOperator { field: String, op: String },
    #[error("Projection cannot mix included and excluded fields")]
    MixedProjection,
    #[error("Unknown field: {0}")]
    UnknownField(String),
    #[error("Invalid {field}: {value}")]
    InvalidValue { field: String, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "eq" => Some(CompareOp::Eq),
            "gt" => Some(CompareOp::Gt),
            "gte" => Some(CompareOp::Gte),
            "lt" => Some(CompareOp::Lt),
            "lte" => Some(CompareOp::Lte),
            _ => None,
        }
    }

    /// Operator token in document-store syntax.
    pub fn token(self) -> &'static str {
        match self {
            CompareOp::Eq => "$eq",
            CompareOp::Gt => "$gt",
            CompareOp::Gte => "$gte",
            CompareOp::Lt => "$lt",
            CompareOp::Lte => "$lte",
        }
    }

    pub fn sql(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
        }
    }

    /// Same comparison with the operands swapped (`a >= b` is `b <= a`).
    pub fn flipped(self) -> Self {
        match self {
            CompareOp::Eq => CompareOp::Eq,
            CompareOp::Gt => CompareOp::Lt,
            CompareOp::Gte => CompareOp::Lte,
            CompareOp::Lt => CompareOp::Gt,
            CompareOp::Lte => CompareOp::Gte,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Equality { field: String, value: String },
    Range { field: String, op: CompareOp, value: String },
}

impl Filter {
    pub fn field(&self) -> &str {
        match self {
            Filter::Equality { field, .. } | Filter::Range { field, .. } => field,
        }
    }

    pub fn op(&self) -> CompareOp {
        match self {
            Filter::Equality { .. } => CompareOp::Eq,
            Filter::Range { op, .. } => *op,
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Filter::Equality { value, .. } | Filter::Range { value, .. } => value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    Include(BTreeSet<String>),
    Exclude(BTreeSet<String>),
}

impl Default for Projection {
    fn default() -> Self {
        Projection::Exclude(BTreeSet::from([VERSION_FIELD.to_string()]))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u64,
    pub limit: u64,
}

impl Pagination {
    pub fn skip(&self) -> u64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySpec {
    pub filters: Vec<Filter>,
    pub sort: Vec<SortKey>,
    pub projection: Projection,
    pub pagination: Pagination,
}

impl QuerySpec {
    pub fn from_params(params: &QueryParams) -> Result<Self, QueryError> {
        Ok(Self {
            filters: build_filters(params)?,
            sort: build_sort(params)?,
            projection: build_projection(params)?,
            pagination: build_pagination(params),
        })
    }
}

/// Field names reach SQL and JSON keys only through a schema lookup, but the
/// raw name is still restricted to a plain identifier.
fn validate_field_name(name: &str) -> Result<(), QueryError> {
    lazy_static! {
        static ref FIELD_RE: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
    }
    if FIELD_RE.is_match(name) {
        Ok(())
    } else {
        Err(QueryError::InvalidField(name.to_string()))
    }
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

pub fn build_filters(params: &QueryParams) -> Result<Vec<Filter>, QueryError> {
    let mut filters = Vec::new();
    for (key, value) in params {
        if RESERVED_KEYS.contains(&key.as_str()) {
            continue;
        }

        let filter = match key.split_once('[') {
            None => {
                validate_field_name(key)?;
                Filter::Equality {
                    field: key.clone(),
                    value: value.clone(),
                }
            }
            Some((field, rest)) => {
                validate_field_name(field)?;
                let raw_op = rest.strip_suffix(']').unwrap_or(rest);
                let op = rest
                    .strip_suffix(']')
                    .and_then(CompareOp::parse)
                    .ok_or_else(|| QueryError::UnsupportedOperator {
                        field: field.to_string(),
                        op: raw_op.to_string(),
                    })?;
                match op {
                    CompareOp::Eq => Filter::Equality {
                        field: field.to_string(),
                        value: value.clone(),
                    },
                    op => Filter::Range {
                        field: field.to_string(),
                        op,
                        value: value.clone(),
                    },
                }
            }
        };
        filters.push(filter);
    }
    Ok(filters)
}

pub fn build_sort(params: &QueryParams) -> Result<Vec<SortKey>, QueryError> {
    let mut keys = Vec::new();
    if let Some(raw) = params.get("sort") {
        for part in split_list(raw) {
            let (field, direction) = match part.strip_prefix('-') {
                Some(field) => (field, Direction::Desc),
                None => (part, Direction::Asc),
            };
            validate_field_name(field)?;
            keys.push(SortKey {
                field: field.to_string(),
                direction,
            });
        }
    }
    if keys.is_empty() {
        keys.push(SortKey {
            field: CREATED_AT_FIELD.to_string(),
            direction: Direction::Desc,
        });
    }
    Ok(keys)
}

pub fn build_projection(params: &QueryParams) -> Result<Projection, QueryError> {
    let Some(raw) = params.get("fields") else {
        return Ok(Projection::default());
    };

    let mut include = BTreeSet::new();
    let mut exclude = BTreeSet::new();
    for part in split_list(raw) {
        match part.strip_prefix('-') {
            Some(field) => {
                validate_field_name(field)?;
                exclude.insert(field.to_string());
            }
            None => {
                validate_field_name(part)?;
                include.insert(part.to_string());
            }
        }
    }

    match (include.is_empty(), exclude.is_empty()) {
        (true, true) => Ok(Projection::default()),
        (false, true) => Ok(Projection::Include(include)),
        (true, false) => Ok(Projection::Exclude(exclude)),
        (false, false) => Err(QueryError::MixedProjection),
    }
}

pub fn build_pagination(params: &QueryParams) -> Pagination {
    let positive = |key: &str, default: u64| {
        params
            .get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(default)
    };
    Pagination {
        page: positive("page", DEFAULT_PAGE),
        limit: positive("limit", DEFAULT_LIMIT),
    }
}
