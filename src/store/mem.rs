use async_trait::async_trait;
use std::collections::HashMap;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::models::{
    Attribute, AttributeKind, NewRecipe, NewUser, Recipe, RecipeChanges, User, UserChanges,
};
use super::query::{Collection, Predicate, QuerySpec};
use super::{Store, StoreError, StoreResult};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    tags: HashMap<Uuid, Attribute>,
    ingredients: HashMap<Uuid, Attribute>,
    // (insertion sequence, row); the sequence breaks created_at ties
    recipes: HashMap<Uuid, (u64, Recipe)>,
    seq: u64,
}

impl Tables {
    fn attributes(&self, kind: AttributeKind) -> &HashMap<Uuid, Attribute> {
        match kind {
            AttributeKind::Tag => &self.tags,
            AttributeKind::Ingredient => &self.ingredients,
        }
    }

    fn attributes_mut(&mut self, kind: AttributeKind) -> &mut HashMap<Uuid, Attribute> {
        match kind {
            AttributeKind::Tag => &mut self.tags,
            AttributeKind::Ingredient => &mut self.ingredients,
        }
    }

    fn ensure_exist(&self, kind: AttributeKind, ids: &[Uuid]) -> StoreResult<()> {
        let rows = self.attributes(kind);
        match ids.iter().find(|id| !rows.contains_key(id)) {
            Some(id) => Err(StoreError::MissingReference {
                kind: kind.label(),
                id: *id,
            }),
            None => Ok(()),
        }
    }

    fn is_assigned(&self, kind: AttributeKind, id: Uuid) -> bool {
        self.recipes.values().any(|(_, r)| match kind {
            AttributeKind::Tag => r.tags.contains(&id),
            AttributeKind::Ingredient => r.ingredients.contains(&id),
        })
    }
}

fn dedup(ids: Vec<Uuid>) -> Vec<Uuid> {
    let mut ids = ids;
    ids.sort();
    ids.dedup();
    ids
}

fn not_applicable(p: &Predicate, collection: Collection) -> StoreError {
    StoreError::Backend(anyhow::anyhow!(
        "predicate {p:?} does not apply to {collection:?}"
    ))
}

/// In-process store; one lock acquisition per operation keeps each call atomic.
#[derive(Default)]
pub struct MemStore {
    tables: RwLock<Tables>,
}

#[async_trait]
impl Store for MemStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn insert_user(&self, user: NewUser) -> StoreResult<User> {
        let mut t = self.tables.write().await;
        if t.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Conflict(
                "user with this email already exists".into(),
            ));
        }
        let row = User {
            id: Uuid::new_v4(),
            email: user.email,
            name: user.name,
            password_hash: user.password_hash,
            is_active: true,
            is_staff: user.is_staff,
            is_superuser: user.is_superuser,
            created_at: OffsetDateTime::now_utc(),
        };
        t.users.insert(row.id, row.clone());
        Ok(row)
    }

    async fn user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let t = self.tables.read().await;
        Ok(t.users.values().find(|u| u.email == email).cloned())
    }

    async fn user_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        let t = self.tables.read().await;
        Ok(t.users.get(&id).cloned())
    }

    async fn update_user(&self, id: Uuid, changes: UserChanges) -> StoreResult<User> {
        let mut t = self.tables.write().await;
        let user = t.users.get_mut(&id).ok_or(StoreError::NotFound("user"))?;
        if let Some(name) = changes.name {
            user.name = name;
        }
        if let Some(hash) = changes.password_hash {
            user.password_hash = hash;
        }
        Ok(user.clone())
    }

    async fn insert_attribute(
        &self,
        kind: AttributeKind,
        owner: Uuid,
        name: &str,
    ) -> StoreResult<Attribute> {
        let mut t = self.tables.write().await;
        let row = Attribute {
            id: Uuid::new_v4(),
            user_id: owner,
            name: name.to_string(),
        };
        t.attributes_mut(kind).insert(row.id, row.clone());
        Ok(row)
    }

    async fn attribute(&self, kind: AttributeKind, id: Uuid) -> StoreResult<Option<Attribute>> {
        let t = self.tables.read().await;
        Ok(t.attributes(kind).get(&id).cloned())
    }

    async fn rename_attribute(
        &self,
        kind: AttributeKind,
        id: Uuid,
        name: &str,
    ) -> StoreResult<Attribute> {
        let mut t = self.tables.write().await;
        let row = t
            .attributes_mut(kind)
            .get_mut(&id)
            .ok_or(StoreError::NotFound(kind.label()))?;
        row.name = name.to_string();
        Ok(row.clone())
    }

    async fn delete_attribute(&self, kind: AttributeKind, id: Uuid) -> StoreResult<()> {
        let mut t = self.tables.write().await;
        if t.attributes_mut(kind).remove(&id).is_none() {
            return Err(StoreError::NotFound(kind.label()));
        }
        for (_, r) in t.recipes.values_mut() {
            match kind {
                AttributeKind::Tag => r.tags.retain(|tag| *tag != id),
                AttributeKind::Ingredient => r.ingredients.retain(|i| *i != id),
            }
        }
        Ok(())
    }

    async fn select_attributes(&self, spec: &QuerySpec) -> StoreResult<Vec<Attribute>> {
        let Collection::Attribute(kind) = spec.collection() else {
            return Err(StoreError::Backend(anyhow::anyhow!(
                "not an attribute listing: {:?}",
                spec.collection()
            )));
        };
        let t = self.tables.read().await;
        let mut rows = Vec::new();
        'rows: for a in t.attributes(kind).values() {
            if a.user_id != spec.owner() {
                continue;
            }
            for p in spec.predicates() {
                let keep = match p {
                    Predicate::IdIn(ids) => ids.contains(&a.id),
                    Predicate::AssignedToRecipe => t.is_assigned(kind, a.id),
                    other => return Err(not_applicable(other, spec.collection())),
                };
                if !keep {
                    continue 'rows;
                }
            }
            rows.push(a.clone());
        }
        rows.sort_by(|a, b| b.name.cmp(&a.name).then(a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn insert_recipe(&self, owner: Uuid, recipe: NewRecipe) -> StoreResult<Recipe> {
        let mut t = self.tables.write().await;
        t.ensure_exist(AttributeKind::Tag, &recipe.tags)?;
        t.ensure_exist(AttributeKind::Ingredient, &recipe.ingredients)?;

        let row = Recipe {
            id: Uuid::new_v4(),
            user_id: owner,
            title: recipe.title,
            time_minutes: recipe.time_minutes,
            price: recipe.price,
            link: recipe.link,
            image: None,
            tags: dedup(recipe.tags),
            ingredients: dedup(recipe.ingredients),
            created_at: OffsetDateTime::now_utc(),
        };
        t.seq += 1;
        let seq = t.seq;
        t.recipes.insert(row.id, (seq, row.clone()));
        Ok(row)
    }

    async fn recipe(&self, id: Uuid) -> StoreResult<Option<Recipe>> {
        let t = self.tables.read().await;
        Ok(t.recipes.get(&id).map(|(_, r)| r.clone()))
    }

    async fn update_recipe(&self, id: Uuid, changes: RecipeChanges) -> StoreResult<Recipe> {
        let mut t = self.tables.write().await;
        if !t.recipes.contains_key(&id) {
            return Err(StoreError::NotFound("recipe"));
        }
        if let Some(tags) = &changes.tags {
            t.ensure_exist(AttributeKind::Tag, tags)?;
        }
        if let Some(ingredients) = &changes.ingredients {
            t.ensure_exist(AttributeKind::Ingredient, ingredients)?;
        }

        let (_, r) = t
            .recipes
            .get_mut(&id)
            .ok_or(StoreError::NotFound("recipe"))?;
        if let Some(title) = changes.title {
            r.title = title;
        }
        if let Some(minutes) = changes.time_minutes {
            r.time_minutes = minutes;
        }
        if let Some(price) = changes.price {
            r.price = price;
        }
        if let Some(link) = changes.link {
            r.link = link;
        }
        if let Some(tags) = changes.tags {
            r.tags = dedup(tags);
        }
        if let Some(ingredients) = changes.ingredients {
            r.ingredients = dedup(ingredients);
        }
        Ok(r.clone())
    }

    async fn set_recipe_image(&self, id: Uuid, image: Option<&str>) -> StoreResult<Recipe> {
        let mut t = self.tables.write().await;
        let (_, r) = t
            .recipes
            .get_mut(&id)
            .ok_or(StoreError::NotFound("recipe"))?;
        r.image = image.map(str::to_string);
        Ok(r.clone())
    }

    async fn delete_recipe(&self, id: Uuid) -> StoreResult<()> {
        let mut t = self.tables.write().await;
        t.recipes
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound("recipe"))
    }

    async fn select_recipes(&self, spec: &QuerySpec) -> StoreResult<Vec<Recipe>> {
        if spec.collection() != Collection::Recipe {
            return Err(StoreError::Backend(anyhow::anyhow!(
                "not a recipe listing: {:?}",
                spec.collection()
            )));
        }
        let t = self.tables.read().await;
        let mut rows = Vec::new();
        'rows: for (seq, r) in t.recipes.values() {
            if r.user_id != spec.owner() {
                continue;
            }
            for p in spec.predicates() {
                let keep = match p {
                    Predicate::IdIn(ids) => ids.contains(&r.id),
                    Predicate::TaggedWithAny(ids) => r.tags.iter().any(|tag| ids.contains(tag)),
                    Predicate::HasIngredientAny(ids) => {
                        r.ingredients.iter().any(|i| ids.contains(i))
                    }
                    other => return Err(not_applicable(other, spec.collection())),
                };
                if !keep {
                    continue 'rows;
                }
            }
            rows.push((*seq, r.clone()));
        }
        rows.sort_by(|(a, _), (b, _)| b.cmp(a));
        Ok(rows.into_iter().map(|(_, r)| r).collect())
    }
}
