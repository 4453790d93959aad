use serde::Serialize;
use serde_json::Value;
use sqlx::FromRow;

use crate::query::{
    sql::{CollectionSchema, FieldDef, FieldType},
    VERSION_FIELD,
};

/// Row condition applied to every read and aggregate.
pub const PUBLIC_TOURS: &str = "secret_tour = false";

pub const DIFFICULTIES: [&str; 3] = ["easy", "medium", "difficult"];

pub const TOUR_SCHEMA: CollectionSchema = CollectionSchema {
    table: "tours",
    fields: &[
        FieldDef::new("id", "id", FieldType::Uuid),
        FieldDef::new("name", "name", FieldType::Text),
        FieldDef::new("slug", "slug", FieldType::Text),
        FieldDef::new("duration", "duration", FieldType::Number),
        FieldDef::new("maxGroupSize", "max_group_size", FieldType::Number),
        FieldDef::new("difficulty", "difficulty", FieldType::Text),
        FieldDef::new("ratingsAverage", "ratings_average", FieldType::Number),
        FieldDef::new("ratingsQuantity", "ratings_quantity", FieldType::Number),
        FieldDef::new("price", "price", FieldType::Number),
        FieldDef::new("priceDiscount", "price_discount", FieldType::Number),
        FieldDef::new("summary", "summary", FieldType::Text),
        FieldDef::new("description", "description", FieldType::Text),
        FieldDef::new("imageCover", "image_cover", FieldType::Text),
        FieldDef::new("images", "images", FieldType::TextArray),
        FieldDef::new("startDates", "start_dates", FieldType::TimestampArray),
        FieldDef::new("secretTour", "secret_tour", FieldType::Bool),
        FieldDef::new("createdAt", "created_at", FieldType::Timestamp).hidden(),
        FieldDef::new(VERSION_FIELD, "version", FieldType::Number),
    ],
};

/// Per-difficulty aggregate over well rated tours.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TourStats {
    #[serde(rename = "_id")]
    pub difficulty: String,
    pub num_tours: i64,
    pub num_ratings: i64,
    pub avg_rating: f64,
    pub avg_price: f64,
    pub min_price: f64,
    pub max_price: f64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyPlan {
    pub month: i32,
    pub num_tour_starts: i64,
    pub tours: Vec<String>,
}

/// Lowercase, ASCII alphanumerics separated by single dashes.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

/// Adds computed fields to a tour document. `durationWeeks` only appears
/// when `duration` was projected.
pub fn with_virtuals(mut doc: Value) -> Value {
    if let Some(obj) = doc.as_object_mut() {
        if let Some(days) = obj.get("duration").and_then(Value::as_f64) {
            obj.insert("durationWeeks".into(), Value::from(days / 7.0));
        }
    }
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn slug_is_lowercase_and_dashed() {
        assert_eq!(slugify("The Forest Hiker"), "the-forest-hiker");
        assert_eq!(slugify("  The  Sea -- Explorer! "), "the-sea-explorer");
        assert_eq!(slugify("Tour 2021"), "tour-2021");
    }

    #[test]
    fn duration_weeks_follows_duration() {
        let doc = with_virtuals(json!({ "id": "x", "duration": 14 }));
        assert_eq!(doc["durationWeeks"], json!(2.0));

        let doc = with_virtuals(json!({ "id": "x", "name": "a" }));
        assert!(doc.get("durationWeeks").is_none());
    }

    #[test]
    fn schema_hides_created_at_and_version() {
        let created = TOUR_SCHEMA.field("createdAt").unwrap();
        assert!(!created.visible_by_default);
        assert!(TOUR_SCHEMA.field(VERSION_FIELD).is_some());
        assert_eq!(TOUR_SCHEMA.fields[0].name, "id");
    }

    #[test]
    fn stats_serialize_with_group_key() {
        let stats = TourStats {
            difficulty: "EASY".into(),
            num_tours: 4,
            num_ratings: 159,
            avg_rating: 4.7,
            avg_price: 1272.0,
            min_price: 397.0,
            max_price: 1997.0,
        };
        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["_id"], "EASY");
        assert_eq!(json["numTours"], 4);
        assert_eq!(json["numRatings"], 159);
    }
}
