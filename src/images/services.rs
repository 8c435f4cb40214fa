use std::io::Cursor;
use std::path::Path;

use anyhow::Context;
use bytes::Bytes;
use image::{ImageFormat, ImageReader, Limits};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::auth::Caller;
use crate::catalog::access::owned_recipe;
use crate::error::{AppError, AppResult};
use crate::storage::StorageClient;
use crate::store::{Recipe, Store};

pub const UPLOAD_PREFIX: &str = "uploads/recipe";
const URL_TTL_SECS: u64 = 30 * 60;
/// Decoded pixels may take this many times the upload size.
const DECODE_EXPANSION: u64 = 16;
const MAX_DIMENSION: u32 = 8192;
const SUPPORTED: [ImageFormat; 4] = [
    ImageFormat::Jpeg,
    ImageFormat::Png,
    ImageFormat::Gif,
    ImageFormat::WebP,
];

/// Decoder budget for an upload of at most `upload_limit` bytes.
pub fn decode_limits(upload_limit: usize) -> Limits {
    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_DIMENSION);
    limits.max_image_height = Some(MAX_DIMENSION);
    limits.max_alloc = Some((upload_limit as u64).saturating_mul(DECODE_EXPANSION));
    limits
}

/// Sniffs and fully decodes the upload within `limits`; anything that is not
/// a supported raster image is rejected.
pub fn detect_format(body: &[u8], limits: Limits) -> AppResult<ImageFormat> {
    let format = image::guess_format(body)
        .map_err(|_| AppError::InvalidImage("upload is not a recognised image".into()))?;
    if !SUPPORTED.contains(&format) {
        return Err(AppError::InvalidImage(format!(
            "{} images are not supported",
            format.extensions_str().first().copied().unwrap_or("these")
        )));
    }
    let mut reader = ImageReader::with_format(Cursor::new(body), format);
    reader.limits(limits);
    reader
        .decode()
        .map_err(|e| AppError::InvalidImage(format!("image could not be decoded: {e}")))?;
    Ok(format)
}

/// `uploads/recipe/<uuid>.<ext>`, keeping the client's extension when it has one.
pub fn image_key(filename: Option<&str>, format: ImageFormat) -> String {
    let from_name = filename
        .and_then(|f| Path::new(f).extension())
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 10 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(str::to_ascii_lowercase);
    let ext = from_name.unwrap_or_else(|| {
        format
            .extensions_str()
            .first()
            .copied()
            .unwrap_or("img")
            .to_string()
    });
    format!("{UPLOAD_PREFIX}/{}.{ext}", Uuid::new_v4())
}

#[instrument(skip(store, storage, body), fields(user_id = %caller.id, size = body.len()))]
pub async fn attach_image(
    store: &dyn Store,
    storage: &dyn StorageClient,
    caller: &Caller,
    recipe_id: Uuid,
    filename: Option<&str>,
    body: Bytes,
    upload_limit: usize,
) -> AppResult<Recipe> {
    let previous = owned_recipe(store, caller, recipe_id).await?.image;

    let sniff = body.clone();
    let limits = decode_limits(upload_limit);
    let format = tokio::task::spawn_blocking(move || detect_format(&sniff, limits))
        .await
        .context("image decode task")??;

    let key = image_key(filename, format);
    storage
        .put_object(&key, body, format.to_mime_type())
        .await
        .with_context(|| format!("put_object {key}"))?;
    let recipe = store.set_recipe_image(recipe_id, Some(&key)).await?;
    if let Some(old) = previous {
        info!(%old, "previous image orphaned");
    }
    info!(%recipe_id, %key, "image attached");
    Ok(recipe)
}

#[instrument(skip(store, storage), fields(user_id = %caller.id))]
pub async fn remove_image(
    store: &dyn Store,
    storage: &dyn StorageClient,
    caller: &Caller,
    recipe_id: Uuid,
) -> AppResult<Recipe> {
    let current = owned_recipe(store, caller, recipe_id).await?;
    let recipe = store.set_recipe_image(recipe_id, None).await?;
    if let Some(key) = current.image {
        if let Err(e) = storage.delete_object(&key).await {
            warn!(error = %e, %key, "failed to delete image blob");
        }
    }
    Ok(recipe)
}

/// `NotFound` when the recipe has no image.
#[instrument(skip(store, storage), fields(user_id = %caller.id))]
pub async fn image_url(
    store: &dyn Store,
    storage: &dyn StorageClient,
    caller: &Caller,
    recipe_id: Uuid,
) -> AppResult<String> {
    let key = owned_recipe(store, caller, recipe_id)
        .await?
        .image
        .ok_or(AppError::NotFound("image"))?;
    let url = storage
        .presign_get(&key, URL_TTL_SECS)
        .await
        .with_context(|| format!("presign url for {key}"))?;
    Ok(url)
}
