//! Tags and ingredients: one owner-scoped code path keyed by [`AttributeKind`].

use tracing::{info, instrument};
use uuid::Uuid;

use super::access::owned_attribute;
use crate::auth::Caller;
use crate::error::{AppError, AppResult};
use crate::store::{Attribute, AttributeKind, Predicate, QuerySpec, Store};

const MAX_NAME_LEN: usize = 255;

#[derive(Debug, Clone, Copy, Default)]
pub struct AttributeFilters {
    pub assigned_only: bool,
}

fn clean_name(kind: AttributeKind, name: Option<&str>) -> AppResult<String> {
    let name = name.map(str::trim).unwrap_or_default();
    if name.is_empty() {
        return Err(AppError::invalid(format!("{} name may not be blank", kind.label())));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(AppError::invalid(format!(
            "{} name may not exceed {MAX_NAME_LEN} characters",
            kind.label()
        )));
    }
    Ok(name.to_string())
}

#[instrument(skip(store), fields(user_id = %caller.id))]
pub async fn list(
    store: &dyn Store,
    caller: &Caller,
    kind: AttributeKind,
    filters: AttributeFilters,
) -> AppResult<Vec<Attribute>> {
    let mut spec = QuerySpec::attributes(kind, caller.id);
    if filters.assigned_only {
        spec = spec.filter(Predicate::AssignedToRecipe);
    }
    Ok(store.select_attributes(&spec).await?)
}

#[instrument(skip(store), fields(user_id = %caller.id))]
pub async fn create(
    store: &dyn Store,
    caller: &Caller,
    kind: AttributeKind,
    name: Option<&str>,
) -> AppResult<Attribute> {
    let name = clean_name(kind, name)?;
    let row = store.insert_attribute(kind, caller.id, &name).await?;
    info!(id = %row.id, kind = kind.label(), "created");
    Ok(row)
}

pub async fn retrieve(
    store: &dyn Store,
    caller: &Caller,
    kind: AttributeKind,
    id: Uuid,
) -> AppResult<Attribute> {
    owned_attribute(store, caller, kind, id).await
}

/// Name is the only updatable field, so a partial update without it is a no-op
/// while a full update requires it.
#[instrument(skip(store), fields(user_id = %caller.id))]
pub async fn update(
    store: &dyn Store,
    caller: &Caller,
    kind: AttributeKind,
    id: Uuid,
    name: Option<&str>,
    partial: bool,
) -> AppResult<Attribute> {
    let current = owned_attribute(store, caller, kind, id).await?;
    if partial && name.is_none() {
        return Ok(current);
    }
    let name = clean_name(kind, name)?;
    Ok(store.rename_attribute(kind, id, &name).await?)
}

#[instrument(skip(store), fields(user_id = %caller.id))]
pub async fn delete(
    store: &dyn Store,
    caller: &Caller,
    kind: AttributeKind,
    id: Uuid,
) -> AppResult<()> {
    owned_attribute(store, caller, kind, id).await?;
    store.delete_attribute(kind, id).await?;
    info!(%id, kind = kind.label(), "deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemStore, NewRecipe};
    use rust_decimal::Decimal;

    fn callers() -> (Caller, Caller) {
        (Caller { id: Uuid::new_v4() }, Caller { id: Uuid::new_v4() })
    }

    fn recipe_with(tags: Vec<Uuid>, ingredients: Vec<Uuid>) -> NewRecipe {
        NewRecipe {
            title: "Soup".into(),
            time_minutes: 10,
            price: Decimal::new(500, 2),
            link: None,
            tags,
            ingredients,
        }
    }

    #[tokio::test]
    async fn listing_is_owner_scoped_and_name_descending() {
        let store = MemStore::default();
        let (me, other) = callers();
        for name in ["Breakfast", "Vegan", "Dessert"] {
            create(&store, &me, AttributeKind::Tag, Some(name)).await.unwrap();
        }
        create(&store, &other, AttributeKind::Tag, Some("Fruity")).await.unwrap();

        let names: Vec<_> = list(&store, &me, AttributeKind::Tag, AttributeFilters::default())
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, ["Vegan", "Dessert", "Breakfast"]);
    }

    #[tokio::test]
    async fn blank_name_is_rejected() {
        let store = MemStore::default();
        let (me, _) = callers();
        for name in [None, Some(""), Some("   ")] {
            let err = create(&store, &me, AttributeKind::Ingredient, name).await.unwrap_err();
            assert!(matches!(err, AppError::InvalidInput(_)));
        }
        let rows = list(&store, &me, AttributeKind::Ingredient, AttributeFilters::default())
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn created_tag_is_listed_immediately() {
        let store = MemStore::default();
        let (me, _) = callers();
        let tag = create(&store, &me, AttributeKind::Tag, Some(" Vegan ")).await.unwrap();
        assert_eq!(tag.name, "Vegan");
        assert_eq!(tag.user_id, me.id);
        let rows = list(&store, &me, AttributeKind::Tag, AttributeFilters::default())
            .await
            .unwrap();
        assert_eq!(rows, vec![tag]);
    }

    #[tokio::test]
    async fn assigned_only_returns_each_row_once() {
        let store = MemStore::default();
        let (me, _) = callers();
        let eggs = create(&store, &me, AttributeKind::Ingredient, Some("Eggs")).await.unwrap();
        create(&store, &me, AttributeKind::Ingredient, Some("Lentils")).await.unwrap();
        store.insert_recipe(me.id, recipe_with(vec![], vec![eggs.id])).await.unwrap();
        store.insert_recipe(me.id, recipe_with(vec![], vec![eggs.id])).await.unwrap();

        let rows = list(
            &store,
            &me,
            AttributeKind::Ingredient,
            AttributeFilters { assigned_only: true },
        )
        .await
        .unwrap();
        assert_eq!(rows, vec![eggs]);
    }

    #[tokio::test]
    async fn foreign_rows_are_forbidden_and_missing_rows_not_found() {
        let store = MemStore::default();
        let (me, other) = callers();
        let theirs = create(&store, &other, AttributeKind::Tag, Some("Spicy")).await.unwrap();

        let err = update(&store, &me, AttributeKind::Tag, theirs.id, Some("Mild"), true)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden("tag")));
        let err = delete(&store, &me, AttributeKind::Tag, theirs.id).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden("tag")));
        let err = retrieve(&store, &me, AttributeKind::Tag, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound("tag")));

        let unchanged = retrieve(&store, &other, AttributeKind::Tag, theirs.id).await.unwrap();
        assert_eq!(unchanged.name, "Spicy");
    }

    #[tokio::test]
    async fn rename_and_delete_own_rows() {
        let store = MemStore::default();
        let (me, _) = callers();
        let tag = create(&store, &me, AttributeKind::Tag, Some("Dinner")).await.unwrap();

        let same = update(&store, &me, AttributeKind::Tag, tag.id, None, true).await.unwrap();
        assert_eq!(same.name, "Dinner");
        let err = update(&store, &me, AttributeKind::Tag, tag.id, None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));

        let renamed = update(&store, &me, AttributeKind::Tag, tag.id, Some("Supper"), false)
            .await
            .unwrap();
        assert_eq!(renamed.name, "Supper");

        delete(&store, &me, AttributeKind::Tag, tag.id).await.unwrap();
        let err = retrieve(&store, &me, AttributeKind::Tag, tag.id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
