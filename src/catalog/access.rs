//! Ownership checks shared by every catalog operation.

use tracing::warn;
use uuid::Uuid;

use crate::auth::Caller;
use crate::error::{AppError, AppResult};
use crate::store::{Attribute, AttributeKind, Recipe, Store};

/// A row that belongs to exactly one user.
pub trait Owned {
    fn owner_id(&self) -> Uuid;
}

impl Owned for Attribute {
    fn owner_id(&self) -> Uuid {
        self.user_id
    }
}

impl Owned for Recipe {
    fn owner_id(&self) -> Uuid {
        self.user_id
    }
}

/// `NotFound` when the row is absent, `Forbidden` when someone else owns it.
pub fn ensure_owned<T: Owned>(row: Option<T>, caller: &Caller, kind: &'static str) -> AppResult<T> {
    let row = row.ok_or(AppError::NotFound(kind))?;
    if row.owner_id() != caller.id {
        warn!(user_id = %caller.id, kind, "ownership check failed");
        return Err(AppError::Forbidden(kind));
    }
    Ok(row)
}

pub async fn owned_attribute(
    store: &dyn Store,
    caller: &Caller,
    kind: AttributeKind,
    id: Uuid,
) -> AppResult<Attribute> {
    ensure_owned(store.attribute(kind, id).await?, caller, kind.label())
}

pub async fn owned_recipe(store: &dyn Store, caller: &Caller, id: Uuid) -> AppResult<Recipe> {
    ensure_owned(store.recipe(id).await?, caller, "recipe")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(owner: Uuid) -> Attribute {
        Attribute {
            id: Uuid::new_v4(),
            user_id: owner,
            name: "Vegan".into(),
        }
    }

    #[test]
    fn absent_row_is_not_found() {
        let caller = Caller { id: Uuid::new_v4() };
        let err = ensure_owned::<Attribute>(None, &caller, "tag").unwrap_err();
        assert!(matches!(err, AppError::NotFound("tag")));
    }

    #[test]
    fn foreign_row_is_forbidden() {
        let caller = Caller { id: Uuid::new_v4() };
        let err = ensure_owned(Some(tag(Uuid::new_v4())), &caller, "tag").unwrap_err();
        assert!(matches!(err, AppError::Forbidden("tag")));
    }

    #[test]
    fn own_row_passes() {
        let caller = Caller { id: Uuid::new_v4() };
        let row = tag(caller.id);
        assert_eq!(ensure_owned(Some(row.clone()), &caller, "tag").unwrap(), row);
    }
}
