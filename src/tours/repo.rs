use serde_json::Value;
use sqlx::{PgPool, Postgres, QueryBuilder};
use time::{Date, Month, OffsetDateTime};
use uuid::Uuid;

use super::{
    dto::{NewTour, TourChanges},
    repo_types::{with_virtuals, MonthlyPlan, TourStats, PUBLIC_TOURS, TOUR_SCHEMA},
};
use crate::{
    error::AppError,
    query::{sql, QuerySpec},
};

pub const STATS_MIN_RATING: f64 = 4.5;

pub async fn list(db: &PgPool, spec: &QuerySpec) -> Result<Vec<Value>, AppError> {
    let mut qb = sql::select_documents(&TOUR_SCHEMA, spec, Some(PUBLIC_TOURS))?;
    let docs = qb.build_query_scalar::<Value>().fetch_all(db).await?;
    Ok(docs.into_iter().map(with_virtuals).collect())
}

pub async fn find(db: &PgPool, id: Uuid) -> Result<Option<Value>, AppError> {
    let mut qb = sql::select_document_by_id(&TOUR_SCHEMA, id, Some(PUBLIC_TOURS));
    let doc = qb.build_query_scalar::<Value>().fetch_optional(db).await?;
    Ok(doc.map(with_virtuals))
}

pub async fn create(db: &PgPool, tour: NewTour) -> Result<Uuid, AppError> {
    let id = sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO tours (
            name, slug, duration, max_group_size, difficulty, ratings_average,
            ratings_quantity, price, price_discount, summary, description,
            image_cover, images, start_dates, secret_tour
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        RETURNING id
        "#,
    )
    .bind(tour.name)
    .bind(tour.slug)
    .bind(tour.duration)
    .bind(tour.max_group_size)
    .bind(tour.difficulty)
    .bind(tour.ratings_average)
    .bind(tour.ratings_quantity)
    .bind(tour.price)
    .bind(tour.price_discount)
    .bind(tour.summary)
    .bind(tour.description)
    .bind(tour.image_cover)
    .bind(tour.images)
    .bind(tour.start_dates)
    .bind(tour.secret_tour)
    .fetch_one(db)
    .await?;
    Ok(id)
}

/// `UPDATE tours SET ..., version = version + 1 WHERE id = $n AND <public>
/// RETURNING secret_tour`. Always bumps the version, even for an empty change
/// set. Secret tours never match.
pub fn update_statement(id: Uuid, changes: TourChanges) -> QueryBuilder<'static, Postgres> {
    let mut qb: QueryBuilder<'static, Postgres> = QueryBuilder::new("UPDATE tours SET ");
    let mut set = qb.separated(", ");

    macro_rules! assign {
        ($column:literal, $value:expr) => {
            if let Some(v) = $value {
                set.push(concat!($column, " = "));
                set.push_bind_unseparated(v);
            }
        };
    }
    assign!("name", changes.name);
    assign!("slug", changes.slug);
    assign!("duration", changes.duration);
    assign!("max_group_size", changes.max_group_size);
    assign!("difficulty", changes.difficulty);
    assign!("ratings_average", changes.ratings_average);
    assign!("ratings_quantity", changes.ratings_quantity);
    assign!("price", changes.price);
    assign!("price_discount", changes.price_discount);
    assign!("summary", changes.summary);
    assign!("description", changes.description);
    assign!("image_cover", changes.image_cover);
    assign!("images", changes.images);
    assign!("start_dates", changes.start_dates);
    assign!("secret_tour", changes.secret_tour);
    set.push("version = version + 1");

    qb.push(" WHERE id = ");
    qb.push_bind(id);
    qb.push(format!(" AND {PUBLIC_TOURS} RETURNING secret_tour"));
    qb
}

/// `None` when no public tour has that id, otherwise whether the tour is
/// secret after the update.
pub async fn update(db: &PgPool, id: Uuid, changes: TourChanges) -> Result<Option<bool>, AppError> {
    let mut qb = update_statement(id, changes);
    let secret = qb.build_query_scalar::<bool>().fetch_optional(db).await?;
    Ok(secret)
}

pub const DELETE_SQL: &str = "DELETE FROM tours WHERE id = $1 AND secret_tour = false";

pub async fn delete(db: &PgPool, id: Uuid) -> Result<bool, AppError> {
    let res = sqlx::query(DELETE_SQL)
        .bind(id)
        .execute(db)
        .await?;
    Ok(res.rows_affected() > 0)
}

pub async fn stats(db: &PgPool) -> Result<Vec<TourStats>, AppError> {
    let rows = sqlx::query_as::<_, TourStats>(&format!(
        r#"
        SELECT upper(difficulty)                    AS difficulty,
               count(*)                             AS num_tours,
               coalesce(sum(ratings_quantity), 0)::bigint AS num_ratings,
               avg(ratings_average)::float8         AS avg_rating,
               avg(price)::float8                   AS avg_price,
               min(price)                           AS min_price,
               max(price)                           AS max_price
          FROM tours
         WHERE {PUBLIC_TOURS} AND ratings_average >= $1
         GROUP BY upper(difficulty)
         ORDER BY avg_price ASC
        "#
    ))
    .bind(STATS_MIN_RATING)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

/// Half-open `[Jan 1 of year, Jan 1 of year + 1)` in UTC.
pub fn year_bounds(year: i32) -> Result<(OffsetDateTime, OffsetDateTime), AppError> {
    let invalid = || AppError::Validation(format!("Invalid year: {year}"));
    let start = Date::from_calendar_date(year, Month::January, 1).map_err(|_| invalid())?;
    let end = Date::from_calendar_date(year + 1, Month::January, 1).map_err(|_| invalid())?;
    Ok((start.midnight().assume_utc(), end.midnight().assume_utc()))
}

pub async fn monthly_plan(db: &PgPool, year: i32) -> Result<Vec<MonthlyPlan>, AppError> {
    let (start, end) = year_bounds(year)?;
    let rows = sqlx::query_as::<_, MonthlyPlan>(&format!(
        r#"
        SELECT extract(month FROM s.start_date AT TIME ZONE 'UTC')::int AS month,
               count(*)                                             AS num_tour_starts,
               array_agg(t.name ORDER BY s.start_date)              AS tours
          FROM tours t
         CROSS JOIN LATERAL unnest(t.start_dates) AS s(start_date)
         WHERE t.{PUBLIC_TOURS}
           AND s.start_date >= $1 AND s.start_date < $2
         GROUP BY 1
         ORDER BY num_tour_starts DESC, month ASC
         LIMIT 12
        "#
    ))
    .bind(start)
    .bind(end)
    .fetch_all(db)
    .await?;
    Ok(rows)
}
