use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::Redirect,
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use tracing::{instrument, warn};
use uuid::Uuid;

use super::{
    attributes::{self, AttributeFilters},
    dto::{
        parse_flag, parse_ids, AttributePayload, AttributeQuery, AttributeResponse,
        RecipeDetailResponse, RecipeImageResponse, RecipePayload, RecipeQuery, RecipeResponse,
    },
    recipes::{self, RecipeFilters},
};
use crate::{
    auth::Caller,
    error::{AppError, AppResult},
    extract::{JsonBody, PathParam, QueryParams},
    images::services as images,
    state::AppState,
    store::AttributeKind,
};

/// Binds a route set to one attribute table.
pub trait AttributeRoute: Send + Sync + 'static {
    const KIND: AttributeKind;
}

pub struct Tags;
pub struct Ingredients;

impl AttributeRoute for Tags {
    const KIND: AttributeKind = AttributeKind::Tag;
}

impl AttributeRoute for Ingredients {
    const KIND: AttributeKind = AttributeKind::Ingredient;
}

pub fn attribute_routes<K: AttributeRoute>(path: &str) -> Router<AppState> {
    Router::new()
        .route(path, get(list_attributes::<K>).post(create_attribute::<K>))
        .route(
            &format!("{path}/:id"),
            get(get_attribute::<K>)
                .put(put_attribute::<K>)
                .patch(patch_attribute::<K>)
                .delete(delete_attribute::<K>),
        )
}

pub fn recipe_routes() -> Router<AppState> {
    Router::new()
        .route("/recipe/recipes", get(list_recipes).post(create_recipe))
        .route(
            "/recipe/recipes/:id",
            get(get_recipe)
                .put(put_recipe)
                .patch(patch_recipe)
                .delete(delete_recipe),
        )
        .route("/recipe/recipes/:id/image", get(redirect_to_image))
}

pub fn image_routes(upload_limit: usize) -> Router<AppState> {
    Router::new()
        .route(
            "/recipe/recipes/:id/upload-image",
            post(upload_image).delete(delete_image),
        )
        .layer(DefaultBodyLimit::max(upload_limit))
}

// --- tags / ingredients ---

#[instrument(skip(state))]
pub async fn list_attributes<K: AttributeRoute>(
    State(state): State<AppState>,
    caller: Caller,
    QueryParams(q): QueryParams<AttributeQuery>,
) -> AppResult<Json<Vec<AttributeResponse>>> {
    let filters = AttributeFilters {
        assigned_only: parse_flag(q.assigned_only.as_deref())?,
    };
    let rows = attributes::list(state.store.as_ref(), &caller, K::KIND, filters).await?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

#[instrument(skip(state, payload))]
pub async fn create_attribute<K: AttributeRoute>(
    State(state): State<AppState>,
    caller: Caller,
    JsonBody(payload): JsonBody<AttributePayload>,
) -> AppResult<(StatusCode, Json<AttributeResponse>)> {
    let row = attributes::create(
        state.store.as_ref(),
        &caller,
        K::KIND,
        payload.name.as_deref(),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(row.into())))
}

#[instrument(skip(state))]
pub async fn get_attribute<K: AttributeRoute>(
    State(state): State<AppState>,
    caller: Caller,
    PathParam(id): PathParam<Uuid>,
) -> AppResult<Json<AttributeResponse>> {
    let row = attributes::retrieve(state.store.as_ref(), &caller, K::KIND, id).await?;
    Ok(Json(row.into()))
}

#[instrument(skip(state, payload))]
pub async fn put_attribute<K: AttributeRoute>(
    State(state): State<AppState>,
    caller: Caller,
    PathParam(id): PathParam<Uuid>,
    JsonBody(payload): JsonBody<AttributePayload>,
) -> AppResult<Json<AttributeResponse>> {
    let row = attributes::update(
        state.store.as_ref(),
        &caller,
        K::KIND,
        id,
        payload.name.as_deref(),
        false,
    )
    .await?;
    Ok(Json(row.into()))
}

#[instrument(skip(state, payload))]
pub async fn patch_attribute<K: AttributeRoute>(
    State(state): State<AppState>,
    caller: Caller,
    PathParam(id): PathParam<Uuid>,
    JsonBody(payload): JsonBody<AttributePayload>,
) -> AppResult<Json<AttributeResponse>> {
    let row = attributes::update(
        state.store.as_ref(),
        &caller,
        K::KIND,
        id,
        payload.name.as_deref(),
        true,
    )
    .await?;
    Ok(Json(row.into()))
}

#[instrument(skip(state))]
pub async fn delete_attribute<K: AttributeRoute>(
    State(state): State<AppState>,
    caller: Caller,
    PathParam(id): PathParam<Uuid>,
) -> AppResult<StatusCode> {
    attributes::delete(state.store.as_ref(), &caller, K::KIND, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- recipes ---

#[instrument(skip(state))]
pub async fn list_recipes(
    State(state): State<AppState>,
    caller: Caller,
    QueryParams(q): QueryParams<RecipeQuery>,
) -> AppResult<Json<Vec<RecipeResponse>>> {
    let filters = RecipeFilters {
        tag_ids: parse_ids("tags", q.tags.as_deref())?,
        ingredient_ids: parse_ids("ingredients", q.ingredients.as_deref())?,
    };
    let rows = recipes::list(state.store.as_ref(), &caller, filters).await?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

#[instrument(skip(state, payload))]
pub async fn create_recipe(
    State(state): State<AppState>,
    caller: Caller,
    JsonBody(payload): JsonBody<RecipePayload>,
) -> AppResult<(StatusCode, Json<RecipeResponse>)> {
    let recipe = recipes::create(state.store.as_ref(), &caller, payload).await?;
    Ok((StatusCode::CREATED, Json(recipe.into())))
}

#[instrument(skip(state))]
pub async fn get_recipe(
    State(state): State<AppState>,
    caller: Caller,
    PathParam(id): PathParam<Uuid>,
) -> AppResult<Json<RecipeDetailResponse>> {
    let detail = recipes::retrieve(state.store.as_ref(), &caller, id).await?;
    Ok(Json(detail.into()))
}

#[instrument(skip(state, payload))]
pub async fn put_recipe(
    State(state): State<AppState>,
    caller: Caller,
    PathParam(id): PathParam<Uuid>,
    JsonBody(payload): JsonBody<RecipePayload>,
) -> AppResult<Json<RecipeResponse>> {
    let recipe = recipes::update(state.store.as_ref(), &caller, id, payload, false).await?;
    Ok(Json(recipe.into()))
}

#[instrument(skip(state, payload))]
pub async fn patch_recipe(
    State(state): State<AppState>,
    caller: Caller,
    PathParam(id): PathParam<Uuid>,
    JsonBody(payload): JsonBody<RecipePayload>,
) -> AppResult<Json<RecipeResponse>> {
    let recipe = recipes::update(state.store.as_ref(), &caller, id, payload, true).await?;
    Ok(Json(recipe.into()))
}

#[instrument(skip(state))]
pub async fn delete_recipe(
    State(state): State<AppState>,
    caller: Caller,
    PathParam(id): PathParam<Uuid>,
) -> AppResult<StatusCode> {
    recipes::delete(state.store.as_ref(), state.storage.as_ref(), &caller, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- images ---

#[instrument(skip(state, mp))]
pub async fn upload_image(
    State(state): State<AppState>,
    caller: Caller,
    PathParam(id): PathParam<Uuid>,
    mp: Result<Multipart, MultipartRejection>,
) -> AppResult<Json<RecipeImageResponse>> {
    let mut mp = mp?;
    let mut upload: Option<(Option<String>, Bytes)> = None;
    while let Some(field) = mp.next_field().await.map_err(|e| {
        warn!(error = %e, "multipart read failed");
        AppError::invalid(format!("malformed multipart body: {e}"))
    })? {
        if field.name() != Some("image") {
            continue;
        }
        let filename = field.file_name().map(str::to_owned);
        let body = field
            .bytes()
            .await
            .map_err(|e| AppError::invalid(format!("failed to read image field: {e}")))?;
        upload = Some((filename, body));
        break;
    }
    let (filename, body) = upload.ok_or_else(|| AppError::invalid("image is required"))?;

    let recipe = images::attach_image(
        state.store.as_ref(),
        state.storage.as_ref(),
        &caller,
        id,
        filename.as_deref(),
        body,
        state.config.upload_limit_bytes,
    )
    .await?;
    Ok(Json(recipe.into()))
}

#[instrument(skip(state))]
pub async fn delete_image(
    State(state): State<AppState>,
    caller: Caller,
    PathParam(id): PathParam<Uuid>,
) -> AppResult<Json<RecipeImageResponse>> {
    let recipe =
        images::remove_image(state.store.as_ref(), state.storage.as_ref(), &caller, id).await?;
    Ok(Json(recipe.into()))
}

#[instrument(skip(state))]
pub async fn redirect_to_image(
    State(state): State<AppState>,
    caller: Caller,
    PathParam(id): PathParam<Uuid>,
) -> AppResult<Redirect> {
    let url = images::image_url(state.store.as_ref(), state.storage.as_ref(), &caller, id).await?;
    Ok(Redirect::temporary(&url))
}
