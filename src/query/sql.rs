use sqlx::{Postgres, QueryBuilder};
use time::{format_description::well_known::Rfc3339, macros::format_description, Date, OffsetDateTime};
use uuid::Uuid;

use super::{CompareOp, Direction, Filter, Projection, QueryError, QuerySpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Uuid,
    Text,
    Number,
    Bool,
    Timestamp,
    TextArray,
    TimestampArray,
}

impl FieldType {
    fn is_array(self) -> bool {
        matches!(self, FieldType::TextArray | FieldType::TimestampArray)
    }
}

/// One API-visible field and the column that stores it.
#[derive(Debug, Clone, Copy)]
pub struct FieldDef {
    pub name: &'static str,
    pub column: &'static str,
    pub ty: FieldType,
    pub visible_by_default: bool,
}

impl FieldDef {
    pub const fn new(name: &'static str, column: &'static str, ty: FieldType) -> Self {
        Self {
            name,
            column,
            ty,
            visible_by_default: true,
        }
    }

    pub const fn hidden(mut self) -> Self {
        self.visible_by_default = false;
        self
    }
}

#[derive(Debug)]
pub struct CollectionSchema {
    pub table: &'static str,
    /// First entry is the primary key; it is always projected.
    pub fields: &'static [FieldDef],
}

impl CollectionSchema {
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    fn projected(&self, projection: &Projection) -> Vec<&FieldDef> {
        self.fields
            .iter()
            .enumerate()
            .filter(|(i, f)| {
                *i == 0
                    || match projection {
                        Projection::Include(names) => names.contains(f.name),
                        Projection::Exclude(names) => {
                            f.visible_by_default && !names.contains(f.name)
                        }
                    }
            })
            .map(|(_, f)| f)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Uuid(Uuid),
    Text(String),
    Number(f64),
    Bool(bool),
    Timestamp(OffsetDateTime),
}

/// Accepts RFC 3339 timestamps and bare `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_timestamp(raw: &str) -> Option<OffsetDateTime> {
    if let Ok(ts) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Some(ts);
    }
    Date::parse(raw, format_description!("[year]-[month]-[day]"))
        .ok()
        .map(|d| d.midnight().assume_utc())
}

fn cast(field: &FieldDef, raw: &str) -> Result<SqlValue, QueryError> {
    let invalid = || QueryError::InvalidValue {
        field: field.name.to_string(),
        value: raw.to_string(),
    };
    let trimmed = raw.trim();
    match field.ty {
        FieldType::Uuid => Uuid::parse_str(trimmed).map(SqlValue::Uuid).map_err(|_| invalid()),
        FieldType::Text | FieldType::TextArray => Ok(SqlValue::Text(raw.to_string())),
        FieldType::Number => trimmed
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(SqlValue::Number)
            .ok_or_else(invalid),
        FieldType::Bool => match trimmed {
            "true" => Ok(SqlValue::Bool(true)),
            "false" => Ok(SqlValue::Bool(false)),
            _ => Err(invalid()),
        },
        FieldType::Timestamp | FieldType::TimestampArray => parse_timestamp(trimmed)
            .map(SqlValue::Timestamp)
            .ok_or_else(invalid),
    }
}

fn push_value(qb: &mut QueryBuilder<'static, Postgres>, value: SqlValue) {
    match value {
        SqlValue::Uuid(v) => qb.push_bind(v),
        SqlValue::Text(v) => qb.push_bind(v),
        SqlValue::Number(v) => qb.push_bind(v),
        SqlValue::Bool(v) => qb.push_bind(v),
        SqlValue::Timestamp(v) => qb.push_bind(v),
    };
}

fn push_filter(
    qb: &mut QueryBuilder<'static, Postgres>,
    schema: &CollectionSchema,
    filter: &Filter,
) -> Result<(), QueryError> {
    let field = schema
        .field(filter.field())
        .ok_or_else(|| QueryError::UnknownField(filter.field().to_string()))?;
    let value = cast(field, filter.value())?;
    let op: CompareOp = filter.op();

    if field.ty.is_array() {
        // an array matches when any element satisfies the comparison
        push_value(qb, value);
        qb.push(format!(" {} ANY({})", op.flipped().sql(), field.column));
    } else {
        qb.push(format!("{} {} ", field.column, op.sql()));
        push_value(qb, value);
    }
    Ok(())
}

fn push_document_head(
    qb: &mut QueryBuilder<'static, Postgres>,
    schema: &CollectionSchema,
    projection: &Projection,
) {
    qb.push("SELECT jsonb_build_object(");
    for (i, field) in schema.projected(projection).into_iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        qb.push(format!("'{}', {}", field.name, field.column));
    }
    qb.push(format!(") AS doc FROM {}", schema.table));
}

/// Single document by primary key with the default projection.
pub fn select_document_by_id(
    schema: &CollectionSchema,
    id: Uuid,
    base_condition: Option<&'static str>,
) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new("");
    push_document_head(&mut qb, schema, &Projection::default());
    qb.push(format!(" WHERE {} = ", schema.fields[0].column));
    qb.push_bind(id);
    if let Some(cond) = base_condition {
        qb.push(" AND ");
        qb.push(cond);
    }
    qb
}

/// Builds `SELECT jsonb_build_object(..) AS doc FROM <table> ...` for `spec`.
///
/// Every client-supplied value is bound as a parameter; identifiers only
/// ever come from `schema`.
pub fn select_documents(
    schema: &CollectionSchema,
    spec: &QuerySpec,
    base_condition: Option<&'static str>,
) -> Result<QueryBuilder<'static, Postgres>, QueryError> {
    let mut qb = QueryBuilder::new("");
    push_document_head(&mut qb, schema, &spec.projection);

    let mut first = true;
    let mut next_clause = |qb: &mut QueryBuilder<'static, Postgres>| {
        qb.push(if first { " WHERE " } else { " AND " });
        first = false;
    };
    if let Some(cond) = base_condition {
        next_clause(&mut qb);
        qb.push(cond);
    }
    for filter in &spec.filters {
        next_clause(&mut qb);
        push_filter(&mut qb, schema, filter)?;
    }

    qb.push(" ORDER BY ");
    for (i, key) in spec.sort.iter().enumerate() {
        let field = schema
            .field(&key.field)
            .ok_or_else(|| QueryError::UnknownField(key.field.clone()))?;
        if i > 0 {
            qb.push(", ");
        }
        qb.push(field.column);
        qb.push(match key.direction {
            Direction::Asc => " ASC",
            Direction::Desc => " DESC",
        });
    }

    let to_i64 = |n: u64| i64::try_from(n).unwrap_or(i64::MAX);
    qb.push(" LIMIT ");
    qb.push_bind(to_i64(spec.pagination.limit));
    qb.push(" OFFSET ");
    qb.push_bind(to_i64(spec.pagination.skip()));

    Ok(qb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{QueryParams, VERSION_FIELD};

    const FIELDS: &[FieldDef] = &[
        FieldDef::new("id", "id", FieldType::Uuid),
        FieldDef::new("name", "name", FieldType::Text),
        FieldDef::new("price", "price", FieldType::Number),
        FieldDef::new("secretTour", "secret_tour", FieldType::Bool),
        FieldDef::new("startDates", "start_dates", FieldType::TimestampArray),
        FieldDef::new("createdAt", "created_at", FieldType::Timestamp).hidden(),
        FieldDef::new(VERSION_FIELD, "version", FieldType::Number),
    ];
    const SCHEMA: CollectionSchema = CollectionSchema {
        table: "tours",
        fields: FIELDS,
    };

    fn spec(pairs: &[(&str, &str)]) -> QuerySpec {
        let params: QueryParams = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        QuerySpec::from_params(&params).unwrap()
    }

    #[test]
    fn default_query_hides_version_and_hidden_fields() {
        let qb = select_documents(&SCHEMA, &spec(&[]), Some("secret_tour = false")).unwrap();
        assert_eq!(
            qb.sql(),
            "SELECT jsonb_build_object('id', id, 'name', name, 'price', price, \
             'secretTour', secret_tour, 'startDates', start_dates) AS doc FROM tours \
             WHERE secret_tour = false ORDER BY created_at DESC LIMIT $1 OFFSET $2"
        );
    }

    #[test]
    fn filters_are_bound_not_inlined() {
        let qb = select_documents(
            &SCHEMA,
            &spec(&[
                ("price[gte]", "500"),
                ("name", "'; DROP TABLE tours; --"),
                ("sort", "-price,name"),
                ("fields", "name,price"),
            ]),
            None,
        )
        .unwrap();
        let sql = qb.sql();
        assert!(!sql.contains("DROP"));
        assert!(sql.starts_with("SELECT jsonb_build_object('id', id, 'name', name, 'price', price) AS doc"));
        assert!(sql.contains("WHERE name = $1 AND price >= $2"));
        assert!(sql.contains("ORDER BY price DESC, name ASC LIMIT $3 OFFSET $4"));
    }

    #[test]
    fn hidden_field_can_be_projected_explicitly() {
        let qb = select_documents(&SCHEMA, &spec(&[("fields", "createdAt")]), None).unwrap();
        assert!(qb.sql().contains("'id', id, 'createdAt', created_at"));
    }

    #[test]
    fn array_fields_match_any_element() {
        let qb = select_documents(&SCHEMA, &spec(&[("startDates[gte]", "2021-01-01")]), None)
            .unwrap();
        assert!(qb.sql().contains("WHERE $1 <= ANY(start_dates)"));
    }

    #[test]
    fn unknown_filter_or_sort_field_is_rejected() {
        let err = select_documents(&SCHEMA, &spec(&[("colour", "red")]), None).err().unwrap();
        assert_eq!(err, QueryError::UnknownField("colour".into()));

        let err = select_documents(&SCHEMA, &spec(&[("sort", "colour")]), None).err().unwrap();
        assert_eq!(err, QueryError::UnknownField("colour".into()));
    }

    #[test]
    fn unknown_projection_fields_are_ignored() {
        let qb = select_documents(&SCHEMA, &spec(&[("fields", "name,colour")]), None).unwrap();
        assert!(qb.sql().starts_with("SELECT jsonb_build_object('id', id, 'name', name) AS doc"));
    }

    #[test]
    fn values_are_cast_per_field_type() {
        let err = select_documents(&SCHEMA, &spec(&[("price[lt]", "cheap")]), None).err().unwrap();
        assert!(matches!(err, QueryError::InvalidValue { .. }));

        let err = select_documents(&SCHEMA, &spec(&[("secretTour", "yes")]), None).err().unwrap();
        assert!(matches!(err, QueryError::InvalidValue { .. }));

        let err = select_documents(&SCHEMA, &spec(&[("id", "123")]), None).err().unwrap();
        assert!(matches!(err, QueryError::InvalidValue { .. }));
    }

    #[test]
    fn single_document_lookup_binds_id() {
        let qb = select_document_by_id(&SCHEMA, Uuid::nil(), Some("secret_tour = false"));
        assert!(qb.sql().ends_with("FROM tours WHERE id = $1 AND secret_tour = false"));
        assert!(!qb.sql().contains("'version'"));
    }

    #[test]
    fn parse_timestamp_accepts_dates_and_rfc3339() {
        let d = parse_timestamp("2021-03-20").unwrap();
        assert_eq!(d.unix_timestamp(), 1_616_198_400);
        let t = parse_timestamp("2021-03-20T10:00:00Z").unwrap();
        assert_eq!(t.unix_timestamp(), 1_616_234_400);
        assert!(parse_timestamp("20/03/2021").is_none());
    }
}
