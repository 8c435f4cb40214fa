use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::store::{Attribute, Recipe};

use super::recipes::RecipeDetail;

/// Body for creating or renaming a tag/ingredient.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AttributePayload {
    pub name: Option<String>,
}

/// Body for recipe create/PUT/PATCH. Presence of each field is decided
/// by the operation, not by the type.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RecipePayload {
    pub title: Option<String>,
    pub time_minutes: Option<i64>,
    pub price: Option<Decimal>,
    /// Absent is `None`, an explicit `null` is `Some(None)`.
    #[serde(deserialize_with = "nullable")]
    pub link: Option<Option<String>>,
    pub tags: Option<Vec<Uuid>>,
    pub ingredients: Option<Vec<Uuid>>,
}

fn nullable<'de, D, T>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

#[derive(Debug, Default, Deserialize)]
pub struct AttributeQuery {
    pub assigned_only: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RecipeQuery {
    pub tags: Option<String>,
    pub ingredients: Option<String>,
}

/// `1`/`true` enable the filter, `0`/`false`/empty leave it off.
pub fn parse_flag(raw: Option<&str>) -> AppResult<bool> {
    match raw.map(str::trim) {
        None | Some("") | Some("0") | Some("false") => Ok(false),
        Some("1") | Some("true") => Ok(true),
        Some(other) => Err(AppError::invalid(format!(
            "assigned_only must be 0 or 1, got {other:?}"
        ))),
    }
}

/// Splits a comma separated id list. An empty list means "no filter".
pub fn parse_ids(param: &str, raw: Option<&str>) -> AppResult<Option<Vec<Uuid>>> {
    let Some(raw) = raw else { return Ok(None) };
    let ids = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            Uuid::parse_str(s)
                .map_err(|_| AppError::invalid(format!("{param}: {s:?} is not a valid id")))
        })
        .collect::<AppResult<Vec<_>>>()?;
    Ok(if ids.is_empty() { None } else { Some(ids) })
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttributeResponse {
    pub id: Uuid,
    pub name: String,
}

impl From<Attribute> for AttributeResponse {
    fn from(a: Attribute) -> Self {
        Self { id: a.id, name: a.name }
    }
}

/// List/create/update shape: associations as ids.
#[derive(Debug, Serialize, Deserialize)]
pub struct RecipeResponse {
    pub id: Uuid,
    pub title: String,
    pub time_minutes: i32,
    pub price: Decimal,
    pub link: String,
    pub image: Option<String>,
    pub tags: Vec<Uuid>,
    pub ingredients: Vec<Uuid>,
}

impl From<Recipe> for RecipeResponse {
    fn from(r: Recipe) -> Self {
        Self {
            id: r.id,
            title: r.title,
            time_minutes: r.time_minutes,
            price: r.price,
            link: r.link.unwrap_or_default(),
            image: r.image,
            tags: r.tags,
            ingredients: r.ingredients,
        }
    }
}

/// Retrieve shape: the caller's own tags and ingredients expanded.
#[derive(Debug, Serialize, Deserialize)]
pub struct RecipeDetailResponse {
    pub id: Uuid,
    pub title: String,
    pub time_minutes: i32,
    pub price: Decimal,
    pub link: String,
    pub image: Option<String>,
    pub tags: Vec<AttributeResponse>,
    pub ingredients: Vec<AttributeResponse>,
}

impl From<RecipeDetail> for RecipeDetailResponse {
    fn from(d: RecipeDetail) -> Self {
        let r = d.recipe;
        Self {
            id: r.id,
            title: r.title,
            time_minutes: r.time_minutes,
            price: r.price,
            link: r.link.unwrap_or_default(),
            image: r.image,
            tags: d.tags.into_iter().map(Into::into).collect(),
            ingredients: d.ingredients.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecipeImageResponse {
    pub id: Uuid,
    pub image: Option<String>,
}

impl From<Recipe> for RecipeImageResponse {
    fn from(r: Recipe) -> Self {
        Self { id: r.id, image: r.image }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_accepts_numeric_and_words() {
        assert!(!parse_flag(None).unwrap());
        assert!(!parse_flag(Some("0")).unwrap());
        assert!(parse_flag(Some("1")).unwrap());
        assert!(parse_flag(Some("true")).unwrap());
        assert!(matches!(parse_flag(Some("yes")), Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn ids_split_on_commas() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let raw = format!("{a}, {b},");
        assert_eq!(parse_ids("tags", Some(&raw)).unwrap(), Some(vec![a, b]));
    }

    #[test]
    fn empty_id_list_is_no_filter() {
        assert_eq!(parse_ids("tags", Some("")).unwrap(), None);
        assert_eq!(parse_ids("tags", None).unwrap(), None);
    }

    #[test]
    fn link_null_differs_from_absent() {
        let absent: RecipePayload = serde_json::from_str(r#"{"title":"Soup"}"#).unwrap();
        assert_eq!(absent.link, None);
        let null: RecipePayload = serde_json::from_str(r#"{"link":null}"#).unwrap();
        assert_eq!(null.link, Some(None));
        let set: RecipePayload = serde_json::from_str(r#"{"link":"https://x.test"}"#).unwrap();
        assert_eq!(set.link, Some(Some("https://x.test".to_string())));
    }

    #[test]
    fn malformed_id_is_invalid_input() {
        let err = parse_ids("ingredients", Some("1,2")).unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(m) if m.starts_with("ingredients")));
    }
}
