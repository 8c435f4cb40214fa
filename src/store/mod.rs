//! Persistence for users, tags, ingredients and recipes.
//!
//! Nothing here checks ownership; callers go through `crate::catalog`.

mod mem;
mod models;
mod pg;
pub mod query;

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

pub use mem::MemStore;
pub use models::{
    Attribute, AttributeKind, NewRecipe, NewUser, Recipe, RecipeChanges, User, UserChanges,
};
pub use pg::PgStore;
pub use query::{Predicate, QuerySpec};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0}")]
    Conflict(String),
    #[error("{kind} {id} does not exist")]
    MissingReference { kind: &'static str, id: Uuid },
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Every method runs as one transaction against the backing store.
#[async_trait]
pub trait Store: Send + Sync {
    async fn ping(&self) -> StoreResult<()>;

    async fn insert_user(&self, user: NewUser) -> StoreResult<User>;
    async fn user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn user_by_id(&self, id: Uuid) -> StoreResult<Option<User>>;
    async fn update_user(&self, id: Uuid, changes: UserChanges) -> StoreResult<User>;

    async fn insert_attribute(
        &self,
        kind: AttributeKind,
        owner: Uuid,
        name: &str,
    ) -> StoreResult<Attribute>;
    async fn attribute(&self, kind: AttributeKind, id: Uuid) -> StoreResult<Option<Attribute>>;
    async fn rename_attribute(
        &self,
        kind: AttributeKind,
        id: Uuid,
        name: &str,
    ) -> StoreResult<Attribute>;
    async fn delete_attribute(&self, kind: AttributeKind, id: Uuid) -> StoreResult<()>;
    async fn select_attributes(&self, spec: &QuerySpec) -> StoreResult<Vec<Attribute>>;

    async fn insert_recipe(&self, owner: Uuid, recipe: NewRecipe) -> StoreResult<Recipe>;
    async fn recipe(&self, id: Uuid) -> StoreResult<Option<Recipe>>;
    async fn update_recipe(&self, id: Uuid, changes: RecipeChanges) -> StoreResult<Recipe>;
    async fn set_recipe_image(&self, id: Uuid, image: Option<&str>) -> StoreResult<Recipe>;
    async fn delete_recipe(&self, id: Uuid) -> StoreResult<()>;
    async fn select_recipes(&self, spec: &QuerySpec) -> StoreResult<Vec<Recipe>>;
}

/// Picks the adapter from the database url; `memory://` keeps everything in process.
pub async fn connect(
    database_url: &str,
    attempts: u32,
    interval: std::time::Duration,
) -> anyhow::Result<Arc<dyn Store>> {
    if database_url.starts_with("memory:") {
        tracing::warn!("using in-memory store; data is lost on restart");
        return Ok(Arc::new(MemStore::default()));
    }
    let pool = crate::db::wait_for_db(database_url, attempts, interval).await?;
    crate::db::migrate(&pool).await?;
    Ok(Arc::new(PgStore::new(pool)))
}
