//! Owner-scoped access to tags, ingredients and recipes.
//!
//! Every operation takes the [`Caller`](crate::auth::Caller) explicitly; the
//! store underneath never checks ownership itself.

pub mod access;
pub mod attributes;
mod dto;
pub mod handlers;
pub mod recipes;

use crate::state::AppState;
use axum::Router;

use handlers::{Ingredients, Tags};

pub fn router(upload_limit: usize) -> Router<AppState> {
    Router::new()
        .merge(handlers::attribute_routes::<Tags>("/recipe/tags"))
        .merge(handlers::attribute_routes::<Ingredients>("/recipe/ingredients"))
        .merge(handlers::recipe_routes())
        .merge(handlers::image_routes(upload_limit))
}
