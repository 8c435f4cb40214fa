//! Owner-scoped recipe operations.

use rust_decimal::Decimal;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::access::owned_recipe;
use super::dto::RecipePayload;
use crate::auth::Caller;
use crate::error::{AppError, AppResult};
use crate::storage::StorageClient;
use crate::store::{
    Attribute, AttributeKind, NewRecipe, Predicate, QuerySpec, Recipe, RecipeChanges, Store,
};

const MAX_TITLE_LEN: usize = 255;
const MAX_LINK_LEN: usize = 255;
/// NUMERIC(5,2)
const PRICE_CEILING: Decimal = Decimal::ONE_THOUSAND;

#[derive(Debug, Clone, Default)]
pub struct RecipeFilters {
    pub tag_ids: Option<Vec<Uuid>>,
    pub ingredient_ids: Option<Vec<Uuid>>,
}

/// A recipe with the caller's own tags and ingredients resolved.
#[derive(Debug, Clone)]
pub struct RecipeDetail {
    pub recipe: Recipe,
    pub tags: Vec<Attribute>,
    pub ingredients: Vec<Attribute>,
}

fn clean_title(title: &str) -> AppResult<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(AppError::invalid("title may not be blank"));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(AppError::invalid(format!(
            "title may not exceed {MAX_TITLE_LEN} characters"
        )));
    }
    Ok(title.to_string())
}

fn clean_minutes(minutes: i64) -> AppResult<i32> {
    if minutes < 0 {
        return Err(AppError::invalid("time_minutes must be zero or more"));
    }
    i32::try_from(minutes).map_err(|_| AppError::invalid("time_minutes is too large"))
}

/// Non-negative, at most two fractional digits, below 1000. Stored with scale 2.
fn clean_price(price: Decimal) -> AppResult<Decimal> {
    if price.is_sign_negative() && !price.is_zero() {
        return Err(AppError::invalid("price must be zero or more"));
    }
    let mut price = price.normalize();
    if price.scale() > 2 {
        return Err(AppError::invalid(
            "price may not have more than 2 decimal places",
        ));
    }
    if price >= PRICE_CEILING {
        return Err(AppError::invalid(
            "price may not have more than 5 digits in total",
        ));
    }
    price.set_sign_positive(true);
    price.rescale(2);
    Ok(price)
}

/// Blank link means "no link".
fn clean_link(link: Option<String>) -> AppResult<Option<String>> {
    let link = link
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty());
    if matches!(&link, Some(l) if l.chars().count() > MAX_LINK_LEN) {
        return Err(AppError::invalid(format!(
            "link may not exceed {MAX_LINK_LEN} characters"
        )));
    }
    Ok(link)
}

fn required<T>(field: &'static str, value: Option<T>) -> AppResult<T> {
    value.ok_or_else(|| AppError::invalid(format!("{field} is required")))
}

fn new_recipe(payload: RecipePayload) -> AppResult<NewRecipe> {
    Ok(NewRecipe {
        title: clean_title(&required("title", payload.title)?)?,
        time_minutes: clean_minutes(required("time_minutes", payload.time_minutes)?)?,
        price: clean_price(required("price", payload.price)?)?,
        link: clean_link(payload.link.flatten())?,
        tags: payload.tags.unwrap_or_default(),
        ingredients: payload.ingredients.unwrap_or_default(),
    })
}

/// A full update writes every field, clearing the optional ones that are absent.
fn recipe_changes(payload: RecipePayload, partial: bool) -> AppResult<RecipeChanges> {
    if partial {
        return Ok(RecipeChanges {
            title: payload.title.as_deref().map(clean_title).transpose()?,
            time_minutes: payload.time_minutes.map(clean_minutes).transpose()?,
            price: payload.price.map(clean_price).transpose()?,
            link: payload.link.map(clean_link).transpose()?,
            tags: payload.tags,
            ingredients: payload.ingredients,
        });
    }
    let full = new_recipe(payload)?;
    Ok(RecipeChanges {
        title: Some(full.title),
        time_minutes: Some(full.time_minutes),
        price: Some(full.price),
        link: Some(full.link),
        tags: Some(full.tags),
        ingredients: Some(full.ingredients),
    })
}

#[instrument(skip(store), fields(user_id = %caller.id))]
pub async fn list(
    store: &dyn Store,
    caller: &Caller,
    filters: RecipeFilters,
) -> AppResult<Vec<Recipe>> {
    let mut spec = QuerySpec::recipes(caller.id);
    if let Some(ids) = filters.tag_ids {
        spec = spec.filter(Predicate::TaggedWithAny(ids));
    }
    if let Some(ids) = filters.ingredient_ids {
        spec = spec.filter(Predicate::HasIngredientAny(ids));
    }
    Ok(store.select_recipes(&spec).await?)
}

#[instrument(skip(store, payload), fields(user_id = %caller.id))]
pub async fn create(
    store: &dyn Store,
    caller: &Caller,
    payload: RecipePayload,
) -> AppResult<Recipe> {
    let recipe = store.insert_recipe(caller.id, new_recipe(payload)?).await?;
    info!(recipe_id = %recipe.id, "recipe created");
    Ok(recipe)
}

async fn resolve(
    store: &dyn Store,
    caller: &Caller,
    kind: AttributeKind,
    ids: &[Uuid],
) -> AppResult<Vec<Attribute>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let spec = QuerySpec::attributes(kind, caller.id).filter(Predicate::IdIn(ids.to_vec()));
    Ok(store.select_attributes(&spec).await?)
}

/// Linked rows owned by someone else are left out of the expansion.
#[instrument(skip(store), fields(user_id = %caller.id))]
pub async fn retrieve(store: &dyn Store, caller: &Caller, id: Uuid) -> AppResult<RecipeDetail> {
    let recipe = owned_recipe(store, caller, id).await?;
    let tags = resolve(store, caller, AttributeKind::Tag, &recipe.tags).await?;
    let ingredients = resolve(store, caller, AttributeKind::Ingredient, &recipe.ingredients).await?;
    Ok(RecipeDetail {
        recipe,
        tags,
        ingredients,
    })
}

#[instrument(skip(store, payload), fields(user_id = %caller.id))]
pub async fn update(
    store: &dyn Store,
    caller: &Caller,
    id: Uuid,
    payload: RecipePayload,
    partial: bool,
) -> AppResult<Recipe> {
    owned_recipe(store, caller, id).await?;
    let changes = recipe_changes(payload, partial)?;
    let recipe = store.update_recipe(id, changes).await?;
    info!(recipe_id = %id, partial, "recipe updated");
    Ok(recipe)
}

/// Removes the row first; a blob that fails to delete is only logged.
#[instrument(skip(store, storage), fields(user_id = %caller.id))]
pub async fn delete(
    store: &dyn Store,
    storage: &dyn StorageClient,
    caller: &Caller,
    id: Uuid,
) -> AppResult<()> {
    let recipe = owned_recipe(store, caller, id).await?;
    store.delete_recipe(id).await?;
    if let Some(key) = recipe.image {
        if let Err(e) = storage.delete_object(&key).await {
            warn!(error = %e, %key, "failed to delete image blob");
        }
    }
    info!(recipe_id = %id, "recipe deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::FakeStorage;
    use crate::store::MemStore;
    use bytes::Bytes;

    fn caller() -> Caller {
        Caller { id: Uuid::new_v4() }
    }

    fn payload(title: &str) -> RecipePayload {
        RecipePayload {
            title: Some(title.into()),
            time_minutes: Some(22),
            price: Some(Decimal::new(525, 2)),
            ..Default::default()
        }
    }

    async fn tag(store: &MemStore, owner: &Caller, name: &str) -> Attribute {
        store
            .insert_attribute(AttributeKind::Tag, owner.id, name)
            .await
            .unwrap()
    }

    #[test]
    fn price_rules() {
        assert_eq!(clean_price(Decimal::new(5, 0)).unwrap().to_string(), "5.00");
        assert_eq!(clean_price(Decimal::new(5000, 3)).unwrap().to_string(), "5.00");
        assert_eq!(clean_price(Decimal::new(99999, 2)).unwrap().to_string(), "999.99");
        assert!(clean_price(Decimal::new(-1, 2)).is_err());
        assert!(clean_price(Decimal::new(1001, 3)).is_err());
        assert!(clean_price(Decimal::new(1000, 0)).is_err());
    }

    #[tokio::test]
    async fn create_validates_before_writing() {
        let store = MemStore::default();
        let me = caller();
        let mut bad = payload("  ");
        assert!(matches!(
            create(&store, &me, bad).await,
            Err(AppError::InvalidInput(_))
        ));
        bad = payload("Soup");
        bad.time_minutes = Some(-1);
        assert!(matches!(
            create(&store, &me, bad).await,
            Err(AppError::InvalidInput(_))
        ));
        bad = payload("Soup");
        bad.price = None;
        assert!(matches!(
            create(&store, &me, bad).await,
            Err(AppError::InvalidInput(_))
        ));
        assert!(list(&store, &me, RecipeFilters::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_tag_id_is_invalid_input() {
        let store = MemStore::default();
        let me = caller();
        let mut p = payload("Soup");
        p.tags = Some(vec![Uuid::new_v4()]);
        assert!(matches!(
            create(&store, &me, p).await,
            Err(AppError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn other_users_recipes_are_invisible() {
        let store = MemStore::default();
        let (me, other) = (caller(), caller());
        let mine = create(&store, &me, payload("Mine")).await.unwrap();
        create(&store, &other, payload("Theirs")).await.unwrap();

        let rows = list(&store, &me, RecipeFilters::default()).await.unwrap();
        assert_eq!(rows, vec![mine]);
    }

    #[tokio::test]
    async fn tag_filter_never_leaks_foreign_recipes() {
        let store = MemStore::default();
        let (me, other) = (caller(), caller());
        let vegan = tag(&store, &me, "Vegan").await;
        let spicy = tag(&store, &me, "Spicy").await;

        let mut p = payload("Curry");
        p.tags = Some(vec![vegan.id]);
        let curry = create(&store, &me, p).await.unwrap();
        let mut p = payload("Chili");
        p.tags = Some(vec![spicy.id]);
        let chili = create(&store, &me, p).await.unwrap();
        create(&store, &me, payload("Plain")).await.unwrap();
        // lenient linking: another user may reference my tag
        let mut p = payload("Foreign");
        p.tags = Some(vec![vegan.id]);
        create(&store, &other, p).await.unwrap();

        let filters = RecipeFilters {
            tag_ids: Some(vec![vegan.id, spicy.id]),
            ingredient_ids: None,
        };
        let mut ids: Vec<_> = list(&store, &me, filters)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        ids.sort();
        let mut expected = vec![curry.id, chili.id];
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn tag_and_ingredient_filters_intersect() {
        let store = MemStore::default();
        let me = caller();
        let vegan = tag(&store, &me, "Vegan").await;
        let beans = store
            .insert_attribute(AttributeKind::Ingredient, me.id, "Beans")
            .await
            .unwrap();

        let mut p = payload("Both");
        p.tags = Some(vec![vegan.id]);
        p.ingredients = Some(vec![beans.id]);
        let both = create(&store, &me, p).await.unwrap();
        let mut p = payload("Tag only");
        p.tags = Some(vec![vegan.id]);
        create(&store, &me, p).await.unwrap();

        let filters = RecipeFilters {
            tag_ids: Some(vec![vegan.id]),
            ingredient_ids: Some(vec![beans.id]),
        };
        assert_eq!(list(&store, &me, filters).await.unwrap(), vec![both]);
    }

    #[tokio::test]
    async fn full_update_replaces_tags_and_clears_omitted_fields() {
        let store = MemStore::default();
        let me = caller();
        let breakfast = tag(&store, &me, "Breakfast").await;
        let lunch = tag(&store, &me, "Lunch").await;
        let mut p = payload("Toast");
        p.tags = Some(vec![breakfast.id]);
        p.link = Some(Some("https://example.com/toast".into()));
        let toast = create(&store, &me, p).await.unwrap();

        let mut p = payload("Toast");
        p.tags = Some(vec![lunch.id]);
        let updated = update(&store, &me, toast.id, p, false).await.unwrap();
        assert_eq!(updated.tags, vec![lunch.id]);
        assert_eq!(updated.link, None);

        let cleared = update(&store, &me, toast.id, payload("Toast"), false)
            .await
            .unwrap();
        assert!(cleared.tags.is_empty());
    }

    #[tokio::test]
    async fn partial_update_keeps_omitted_fields() {
        let store = MemStore::default();
        let me = caller();
        let t = tag(&store, &me, "Quick").await;
        let mut p = payload("Omelette");
        p.tags = Some(vec![t.id]);
        p.link = Some(Some("https://example.com/omelette".into()));
        let omelette = create(&store, &me, p).await.unwrap();

        let patch = RecipePayload {
            title: Some("Fluffy omelette".into()),
            ..Default::default()
        };
        let updated = update(&store, &me, omelette.id, patch, true).await.unwrap();
        assert_eq!(updated.title, "Fluffy omelette");
        assert_eq!(updated.tags, vec![t.id]);
        assert_eq!(updated.price, omelette.price);
        assert_eq!(updated.link.as_deref(), Some("https://example.com/omelette"));
    }

    #[tokio::test]
    async fn partial_update_with_null_link_clears_it() {
        let store = MemStore::default();
        let me = caller();
        let mut p = payload("Stew");
        p.link = Some(Some("https://example.com/stew".into()));
        let stew = create(&store, &me, p).await.unwrap();

        let patch: RecipePayload = serde_json::from_str(r#"{"link":null}"#).unwrap();
        let updated = update(&store, &me, stew.id, patch, true).await.unwrap();
        assert_eq!(updated.link, None);
        assert_eq!(updated.title, "Stew");
    }

    #[tokio::test]
    async fn foreign_update_is_forbidden_and_leaves_row_alone() {
        let store = MemStore::default();
        let (me, other) = (caller(), caller());
        let theirs = create(&store, &other, payload("Theirs")).await.unwrap();

        let patch = RecipePayload {
            title: Some("Mine now".into()),
            ..Default::default()
        };
        let err = update(&store, &me, theirs.id, patch, true).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden("recipe")));
        let err = retrieve(&store, &me, theirs.id).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden("recipe")));
        assert_eq!(store.recipe(theirs.id).await.unwrap().unwrap().title, "Theirs");
    }

    #[tokio::test]
    async fn detail_expands_only_own_attributes() {
        let store = MemStore::default();
        let (me, other) = (caller(), caller());
        let mine = tag(&store, &me, "Mine").await;
        let theirs = tag(&store, &other, "Theirs").await;
        let mut p = payload("Mixed");
        p.tags = Some(vec![mine.id, theirs.id]);
        let recipe = create(&store, &me, p).await.unwrap();

        let detail = retrieve(&store, &me, recipe.id).await.unwrap();
        assert_eq!(detail.tags, vec![mine]);
        assert_eq!(detail.recipe.tags.len(), 2);
    }

    #[tokio::test]
    async fn delete_removes_row_and_blob() {
        let store = MemStore::default();
        let storage = FakeStorage::default();
        let me = caller();
        let recipe = create(&store, &me, payload("Cake")).await.unwrap();
        let key = "uploads/recipe/cake.png";
        storage
            .put_object(key, Bytes::from_static(b"png"), "image/png")
            .await
            .unwrap();
        store.set_recipe_image(recipe.id, Some(key)).await.unwrap();

        delete(&store, &storage, &me, recipe.id).await.unwrap();
        assert!(store.recipe(recipe.id).await.unwrap().is_none());
        assert!(storage.objects.lock().await.is_empty());
        let err = delete(&store, &storage, &me, recipe.id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound("recipe")));
    }
}
