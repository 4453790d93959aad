use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use super::repo_types::{slugify, DIFFICULTIES};
use crate::{error::AppError, query::sql::parse_timestamp};

pub const NAME_MIN: usize = 10;
pub const NAME_MAX: usize = 40;
pub const DEFAULT_RATINGS_AVERAGE: f64 = 4.5;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTourRequest {
    pub name: Option<String>,
    pub duration: Option<i32>,
    pub max_group_size: Option<i32>,
    pub difficulty: Option<String>,
    pub ratings_average: Option<f64>,
    pub ratings_quantity: Option<i32>,
    pub price: Option<f64>,
    pub price_discount: Option<f64>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub image_cover: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub start_dates: Vec<String>,
    pub secret_tour: Option<bool>,
}

/// Partial update. Absent fields keep their stored value.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTourRequest {
    pub name: Option<String>,
    pub duration: Option<i32>,
    pub max_group_size: Option<i32>,
    pub difficulty: Option<String>,
    pub ratings_average: Option<f64>,
    pub ratings_quantity: Option<i32>,
    pub price: Option<f64>,
    pub price_discount: Option<f64>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub image_cover: Option<String>,
    pub images: Option<Vec<String>>,
    pub start_dates: Option<Vec<String>>,
    pub secret_tour: Option<bool>,
}

/// A fully validated tour ready for insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTour {
    pub name: String,
    pub slug: String,
    pub duration: i32,
    pub max_group_size: i32,
    pub difficulty: String,
    pub ratings_average: f64,
    pub ratings_quantity: i32,
    pub price: f64,
    pub price_discount: Option<f64>,
    pub summary: String,
    pub description: Option<String>,
    pub image_cover: String,
    pub images: Vec<String>,
    pub start_dates: Vec<OffsetDateTime>,
    pub secret_tour: bool,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct TourChanges {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub duration: Option<i32>,
    pub max_group_size: Option<i32>,
    pub difficulty: Option<String>,
    pub ratings_average: Option<f64>,
    pub ratings_quantity: Option<i32>,
    pub price: Option<f64>,
    pub price_discount: Option<f64>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub image_cover: Option<String>,
    pub images: Option<Vec<String>>,
    pub start_dates: Option<Vec<OffsetDateTime>>,
    pub secret_tour: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct TourEnvelope {
    pub tour: Value,
}

#[derive(Debug, Serialize)]
pub struct ToursEnvelope {
    pub tours: Vec<Value>,
}

#[derive(Debug, Serialize)]
pub struct StatsEnvelope<T> {
    pub stats: Vec<T>,
}

#[derive(Debug, Serialize)]
pub struct PlanEnvelope<T> {
    pub plan: Vec<T>,
}

/// Collects every failed rule so one response lists them all.
#[derive(Default)]
struct Problems(Vec<String>);

impl Problems {
    fn require<T>(&mut self, value: Option<T>, message: &str) -> Option<T> {
        if value.is_none() {
            self.0.push(message.to_string());
        }
        value
    }

    fn check(&mut self, ok: bool, message: impl Into<String>) {
        if !ok {
            self.0.push(message.into());
        }
    }

    fn finish(self) -> Result<(), AppError> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(format!(
                "Invalid input data. {}",
                self.0.join(". ")
            )))
        }
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string())
}

fn check_name(p: &mut Problems, name: &str) {
    let len = name.chars().count();
    p.check(
        len <= NAME_MAX,
        format!("A tour's name must be less than or equal to {NAME_MAX} characters"),
    );
    p.check(
        len >= NAME_MIN,
        format!("A tour's name must be greater than or equal to {NAME_MIN} characters"),
    );
}

fn check_difficulty(p: &mut Problems, difficulty: &str) {
    p.check(
        DIFFICULTIES.contains(&difficulty),
        "Difficulty is either: easy, medium or difficult",
    );
}

fn check_rating(p: &mut Problems, rating: f64) {
    p.check(rating >= 1.0, "Rating must be above 1.0");
    p.check(rating <= 5.0, "Rating must be below 5.0");
}

fn check_discount(p: &mut Problems, discount: f64, price: f64) {
    p.check(
        discount < price,
        format!("Discount price ({discount}) should be below regular price"),
    );
}

fn parse_dates(p: &mut Problems, raw: &[String]) -> Vec<OffsetDateTime> {
    raw.iter()
        .filter_map(|d| {
            let parsed = parse_timestamp(d.trim());
            if parsed.is_none() {
                p.0.push(format!("Invalid start date: {d}"));
            }
            parsed
        })
        .collect()
}

impl CreateTourRequest {
    pub fn validate(self) -> Result<NewTour, AppError> {
        let mut p = Problems::default();

        let name = p.require(trimmed(self.name), "A tour must have a name");
        if let Some(name) = &name {
            check_name(&mut p, name);
        }
        let duration = p.require(self.duration, "A tour must have a duration");
        let max_group_size = p.require(self.max_group_size, "A tour must have a group size");
        let difficulty = p.require(trimmed(self.difficulty), "A tour must have a difficulty");
        if let Some(difficulty) = &difficulty {
            check_difficulty(&mut p, difficulty);
        }
        let ratings_average = self.ratings_average.unwrap_or(DEFAULT_RATINGS_AVERAGE);
        check_rating(&mut p, ratings_average);
        let price = p.require(self.price, "A tour must have price");
        if let (Some(discount), Some(price)) = (self.price_discount, price) {
            check_discount(&mut p, discount, price);
        }
        let summary = p.require(trimmed(self.summary), "A tour must have a summary");
        let image_cover = p.require(self.image_cover, "A tour must have a cover image");
        let start_dates = parse_dates(&mut p, &self.start_dates);

        p.finish()?;
        match (name, duration, max_group_size, difficulty, price, summary, image_cover) {
            (
                Some(name),
                Some(duration),
                Some(max_group_size),
                Some(difficulty),
                Some(price),
                Some(summary),
                Some(image_cover),
            ) => Ok(NewTour {
                slug: slugify(&name),
                name,
                duration,
                max_group_size,
                difficulty,
                ratings_average,
                ratings_quantity: self.ratings_quantity.unwrap_or(0),
                price,
                price_discount: self.price_discount,
                summary,
                description: trimmed(self.description),
                image_cover,
                images: self.images,
                start_dates,
                secret_tour: self.secret_tour.unwrap_or(false),
            }),
            _ => Err(AppError::Validation("Invalid input data".into())),
        }
    }
}

impl UpdateTourRequest {
    /// Field-level checks. `priceDiscount < price` against the stored price is
    /// enforced by the table constraint.
    pub fn validate(self) -> Result<TourChanges, AppError> {
        let mut p = Problems::default();

        let name = trimmed(self.name);
        if let Some(name) = &name {
            check_name(&mut p, name);
        }
        let difficulty = trimmed(self.difficulty);
        if let Some(difficulty) = &difficulty {
            check_difficulty(&mut p, difficulty);
        }
        if let Some(rating) = self.ratings_average {
            check_rating(&mut p, rating);
        }
        if let (Some(discount), Some(price)) = (self.price_discount, self.price) {
            check_discount(&mut p, discount, price);
        }
        let start_dates = self.start_dates.map(|d| parse_dates(&mut p, &d));
        p.finish()?;

        Ok(TourChanges {
            slug: name.as_deref().map(slugify),
            name,
            duration: self.duration,
            max_group_size: self.max_group_size,
            difficulty,
            ratings_average: self.ratings_average,
            ratings_quantity: self.ratings_quantity,
            price: self.price,
            price_discount: self.price_discount,
            summary: trimmed(self.summary),
            description: trimmed(self.description),
            image_cover: self.image_cover,
            images: self.images,
            start_dates,
            secret_tour: self.secret_tour,
        })
    }
}
