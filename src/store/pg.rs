use anyhow::Context;
use async_trait::async_trait;
use sqlx::{Executor, PgConnection, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::models::{
    Attribute, AttributeKind, NewRecipe, NewUser, Recipe, RecipeChanges, User, UserChanges,
};
use super::query::{Collection, Predicate, QuerySpec};
use super::{Store, StoreError, StoreResult};

const USER_COLUMNS: &str =
    "id, email, name, password_hash, is_active, is_staff, is_superuser, created_at";

const RECIPE_SELECT: &str = r#"
    SELECT r.id, r.user_id, r.title, r.time_minutes, r.price, r.link, r.image,
           ARRAY(SELECT rt.tag_id FROM recipe_tags rt
                  WHERE rt.recipe_id = r.id ORDER BY rt.tag_id) AS tags,
           ARRAY(SELECT ri.ingredient_id FROM recipe_ingredients ri
                  WHERE ri.recipe_id = r.id ORDER BY ri.ingredient_id) AS ingredients,
           r.created_at
      FROM recipes r
"#;

/// Table names backing one attribute kind: (table, link table, link column).
fn tables(kind: AttributeKind) -> (&'static str, &'static str, &'static str) {
    match kind {
        AttributeKind::Tag => ("tags", "recipe_tags", "tag_id"),
        AttributeKind::Ingredient => ("ingredients", "recipe_ingredients", "ingredient_id"),
    }
}

fn not_applicable(p: &Predicate, collection: Collection) -> StoreError {
    StoreError::Backend(anyhow::anyhow!(
        "predicate {p:?} does not apply to {collection:?}"
    ))
}

/// Translates an attribute listing into SQL.
pub(crate) fn attribute_query(spec: &QuerySpec) -> StoreResult<QueryBuilder<'static, Postgres>> {
    let Collection::Attribute(kind) = spec.collection() else {
        return Err(StoreError::Backend(anyhow::anyhow!(
            "not an attribute listing: {:?}",
            spec.collection()
        )));
    };
    let (table, link, column) = tables(kind);

    let mut qb = QueryBuilder::new(format!(
        "SELECT a.id, a.user_id, a.name FROM {table} a WHERE a.user_id = "
    ));
    qb.push_bind(spec.owner());
    for p in spec.predicates() {
        match p {
            Predicate::IdIn(ids) => {
                qb.push(" AND a.id = ANY(");
                qb.push_bind(ids.clone());
                qb.push(")");
            }
            Predicate::AssignedToRecipe => {
                qb.push(format!(
                    " AND EXISTS (SELECT 1 FROM {link} l WHERE l.{column} = a.id)"
                ));
            }
            other => return Err(not_applicable(other, spec.collection())),
        }
    }
    // byte order, matching MemStore regardless of the database locale
    qb.push(" ORDER BY a.name COLLATE \"C\" DESC, a.id");
    Ok(qb)
}

/// Translates a recipe listing into SQL.
pub(crate) fn recipe_query(spec: &QuerySpec) -> StoreResult<QueryBuilder<'static, Postgres>> {
    if spec.collection() != Collection::Recipe {
        return Err(StoreError::Backend(anyhow::anyhow!(
            "not a recipe listing: {:?}",
            spec.collection()
        )));
    }

    let mut qb = QueryBuilder::new(RECIPE_SELECT);
    qb.push(" WHERE r.user_id = ");
    qb.push_bind(spec.owner());
    for p in spec.predicates() {
        match p {
            Predicate::IdIn(ids) => {
                qb.push(" AND r.id = ANY(");
                qb.push_bind(ids.clone());
                qb.push(")");
            }
            Predicate::TaggedWithAny(ids) => {
                qb.push(
                    " AND EXISTS (SELECT 1 FROM recipe_tags rt \
                     WHERE rt.recipe_id = r.id AND rt.tag_id = ANY(",
                );
                qb.push_bind(ids.clone());
                qb.push("))");
            }
            Predicate::HasIngredientAny(ids) => {
                qb.push(
                    " AND EXISTS (SELECT 1 FROM recipe_ingredients ri \
                     WHERE ri.recipe_id = r.id AND ri.ingredient_id = ANY(",
                );
                qb.push_bind(ids.clone());
                qb.push("))");
            }
            other => return Err(not_applicable(other, spec.collection())),
        }
    }
    qb.push(" ORDER BY r.created_at DESC, r.id DESC");
    Ok(qb)
}

#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

async fn fetch_recipe<'e, E>(ex: E, id: Uuid) -> sqlx::Result<Option<Recipe>>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, Recipe>(&format!("{RECIPE_SELECT} WHERE r.id = $1"))
        .bind(id)
        .fetch_optional(ex)
        .await
}

/// Fails with the first id in `ids` that has no row of `kind`.
async fn ensure_exist(
    conn: &mut PgConnection,
    kind: AttributeKind,
    ids: &[Uuid],
) -> StoreResult<()> {
    if ids.is_empty() {
        return Ok(());
    }
    let (table, _, _) = tables(kind);
    let found: Vec<Uuid> =
        sqlx::query_scalar(&format!("SELECT id FROM {table} WHERE id = ANY($1)"))
            .bind(ids)
            .fetch_all(&mut *conn)
            .await
            .with_context(|| format!("look up {table}"))?;
    match ids.iter().find(|id| !found.contains(id)) {
        Some(id) => Err(StoreError::MissingReference {
            kind: kind.label(),
            id: *id,
        }),
        None => Ok(()),
    }
}

/// Replaces the association set of `recipe_id` for one attribute kind.
async fn relink(
    conn: &mut PgConnection,
    recipe_id: Uuid,
    kind: AttributeKind,
    ids: &[Uuid],
) -> StoreResult<()> {
    let (_, link, column) = tables(kind);
    sqlx::query(&format!("DELETE FROM {link} WHERE recipe_id = $1"))
        .bind(recipe_id)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("clear {link}"))?;
    if ids.is_empty() {
        return Ok(());
    }
    sqlx::query(&format!(
        "INSERT INTO {link} (recipe_id, {column}) \
         SELECT $1, UNNEST($2::uuid[]) ON CONFLICT DO NOTHING"
    ))
    .bind(recipe_id)
    .bind(ids)
    .execute(&mut *conn)
    .await
    .with_context(|| format!("link {link}"))?;
    Ok(())
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.db)
            .await
            .context("ping database")?;
        Ok(())
    }

    async fn insert_user(&self, user: NewUser) -> StoreResult<User> {
        let res = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (id, email, name, password_hash, is_staff, is_superuser)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.password_hash)
        .bind(user.is_staff)
        .bind(user.is_superuser)
        .fetch_one(&self.db)
        .await;

        match res {
            Ok(u) => Ok(u),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(
                StoreError::Conflict("user with this email already exists".into()),
            ),
            Err(e) => Err(anyhow::Error::new(e).context("insert user").into()),
        }
    }

    async fn user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .context("find user by email")?;
        Ok(user)
    }

    async fn user_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find user by id")?;
        Ok(user)
    }

    async fn update_user(&self, id: Uuid, changes: UserChanges) -> StoreResult<User> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
               SET name = COALESCE($2, name),
                   password_hash = COALESCE($3, password_hash)
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(changes.name)
        .bind(changes.password_hash)
        .fetch_optional(&self.db)
        .await
        .context("update user")?
        .ok_or(StoreError::NotFound("user"))
    }

    async fn insert_attribute(
        &self,
        kind: AttributeKind,
        owner: Uuid,
        name: &str,
    ) -> StoreResult<Attribute> {
        let (table, _, _) = tables(kind);
        let attr = sqlx::query_as::<_, Attribute>(&format!(
            "INSERT INTO {table} (id, user_id, name) VALUES ($1, $2, $3) \
             RETURNING id, user_id, name"
        ))
        .bind(Uuid::new_v4())
        .bind(owner)
        .bind(name)
        .fetch_one(&self.db)
        .await
        .with_context(|| format!("insert {}", kind.label()))?;
        Ok(attr)
    }

    async fn attribute(&self, kind: AttributeKind, id: Uuid) -> StoreResult<Option<Attribute>> {
        let (table, _, _) = tables(kind);
        let attr = sqlx::query_as::<_, Attribute>(&format!(
            "SELECT id, user_id, name FROM {table} WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .with_context(|| format!("find {}", kind.label()))?;
        Ok(attr)
    }

    async fn rename_attribute(
        &self,
        kind: AttributeKind,
        id: Uuid,
        name: &str,
    ) -> StoreResult<Attribute> {
        let (table, _, _) = tables(kind);
        sqlx::query_as::<_, Attribute>(&format!(
            "UPDATE {table} SET name = $2 WHERE id = $1 RETURNING id, user_id, name"
        ))
        .bind(id)
        .bind(name)
        .fetch_optional(&self.db)
        .await
        .with_context(|| format!("rename {}", kind.label()))?
        .ok_or(StoreError::NotFound(kind.label()))
    }

    async fn delete_attribute(&self, kind: AttributeKind, id: Uuid) -> StoreResult<()> {
        let (table, _, _) = tables(kind);
        let done = sqlx::query(&format!("DELETE FROM {table} WHERE id = $1"))
            .bind(id)
            .execute(&self.db)
            .await
            .with_context(|| format!("delete {}", kind.label()))?;
        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound(kind.label()));
        }
        Ok(())
    }

    async fn select_attributes(&self, spec: &QuerySpec) -> StoreResult<Vec<Attribute>> {
        let mut qb = attribute_query(spec)?;
        let rows = qb
            .build_query_as::<Attribute>()
            .fetch_all(&self.db)
            .await
            .context("select attributes")?;
        Ok(rows)
    }

    async fn insert_recipe(&self, owner: Uuid, recipe: NewRecipe) -> StoreResult<Recipe> {
        let id = Uuid::new_v4();
        let mut tx = self.db.begin().await.context("begin tx")?;

        ensure_exist(&mut tx, AttributeKind::Tag, &recipe.tags).await?;
        ensure_exist(&mut tx, AttributeKind::Ingredient, &recipe.ingredients).await?;

        sqlx::query(
            r#"
            INSERT INTO recipes (id, user_id, title, time_minutes, price, link)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(id)
        .bind(owner)
        .bind(&recipe.title)
        .bind(recipe.time_minutes)
        .bind(recipe.price)
        .bind(&recipe.link)
        .execute(&mut *tx)
        .await
        .context("insert recipe")?;

        relink(&mut tx, id, AttributeKind::Tag, &recipe.tags).await?;
        relink(&mut tx, id, AttributeKind::Ingredient, &recipe.ingredients).await?;

        let created = fetch_recipe(&mut *tx, id)
            .await
            .context("reload recipe")?
            .ok_or(StoreError::NotFound("recipe"))?;
        tx.commit().await.context("commit tx")?;
        Ok(created)
    }

    async fn recipe(&self, id: Uuid) -> StoreResult<Option<Recipe>> {
        let recipe = fetch_recipe(&self.db, id).await.context("find recipe")?;
        Ok(recipe)
    }

    async fn update_recipe(&self, id: Uuid, changes: RecipeChanges) -> StoreResult<Recipe> {
        let mut tx = self.db.begin().await.context("begin tx")?;

        if let Some(tags) = &changes.tags {
            ensure_exist(&mut tx, AttributeKind::Tag, tags).await?;
        }
        if let Some(ingredients) = &changes.ingredients {
            ensure_exist(&mut tx, AttributeKind::Ingredient, ingredients).await?;
        }

        let (set_link, link) = match changes.link {
            Some(link) => (true, link),
            None => (false, None),
        };
        let done = sqlx::query(
            r#"
            UPDATE recipes
               SET title = COALESCE($2, title),
                   time_minutes = COALESCE($3, time_minutes),
                   price = COALESCE($4, price),
                   link = CASE WHEN $5 THEN $6 ELSE link END
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(changes.title)
        .bind(changes.time_minutes)
        .bind(changes.price)
        .bind(set_link)
        .bind(link)
        .execute(&mut *tx)
        .await
        .context("update recipe")?;
        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound("recipe"));
        }

        if let Some(tags) = &changes.tags {
            relink(&mut tx, id, AttributeKind::Tag, tags).await?;
        }
        if let Some(ingredients) = &changes.ingredients {
            relink(&mut tx, id, AttributeKind::Ingredient, ingredients).await?;
        }

        let updated = fetch_recipe(&mut *tx, id)
            .await
            .context("reload recipe")?
            .ok_or(StoreError::NotFound("recipe"))?;
        tx.commit().await.context("commit tx")?;
        Ok(updated)
    }

    async fn set_recipe_image(&self, id: Uuid, image: Option<&str>) -> StoreResult<Recipe> {
        let mut tx = self.db.begin().await.context("begin tx")?;
        let done = sqlx::query("UPDATE recipes SET image = $2 WHERE id = $1")
            .bind(id)
            .bind(image)
            .execute(&mut *tx)
            .await
            .context("set recipe image")?;
        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound("recipe"));
        }
        let updated = fetch_recipe(&mut *tx, id)
            .await
            .context("reload recipe")?
            .ok_or(StoreError::NotFound("recipe"))?;
        tx.commit().await.context("commit tx")?;
        Ok(updated)
    }

    async fn delete_recipe(&self, id: Uuid) -> StoreResult<()> {
        let done = sqlx::query("DELETE FROM recipes WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .context("delete recipe")?;
        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound("recipe"));
        }
        Ok(())
    }

    async fn select_recipes(&self, spec: &QuerySpec) -> StoreResult<Vec<Recipe>> {
        let mut qb = recipe_query(spec)?;
        let rows = qb
            .build_query_as::<Recipe>()
            .fetch_all(&self.db)
            .await
            .context("select recipes")?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_listing_is_owner_scoped_and_sorted() {
        let spec = QuerySpec::attributes(AttributeKind::Tag, Uuid::new_v4());
        let qb = attribute_query(&spec).unwrap();
        assert_eq!(
            qb.sql(),
            "SELECT a.id, a.user_id, a.name FROM tags a WHERE a.user_id = $1 \
             ORDER BY a.name COLLATE \"C\" DESC, a.id"
        );
    }

    #[test]
    fn assigned_only_uses_exists_on_link_table() {
        let spec = QuerySpec::attributes(AttributeKind::Ingredient, Uuid::new_v4())
            .filter(Predicate::AssignedToRecipe);
        let qb = attribute_query(&spec).unwrap();
        assert!(qb.sql().contains("FROM ingredients a WHERE a.user_id = $1"));
        assert!(qb
            .sql()
            .contains("EXISTS (SELECT 1 FROM recipe_ingredients l WHERE l.ingredient_id = a.id)"));
    }

    #[test]
    fn recipe_filters_bind_in_order_after_owner() {
        let spec = QuerySpec::recipes(Uuid::new_v4())
            .filter(Predicate::TaggedWithAny(vec![Uuid::new_v4()]))
            .filter(Predicate::HasIngredientAny(vec![Uuid::new_v4()]));
        let qb = recipe_query(&spec).unwrap();
        let sql = qb.sql();
        assert!(sql.contains("WHERE r.user_id = $1"));
        assert!(sql.contains("rt.tag_id = ANY($2)"));
        assert!(sql.contains("ri.ingredient_id = ANY($3)"));
        assert!(sql.trim_end().ends_with("ORDER BY r.created_at DESC, r.id DESC"));
    }

    #[test]
    fn recipe_predicate_rejected_on_attribute_listing() {
        let spec = QuerySpec::attributes(AttributeKind::Tag, Uuid::new_v4())
            .filter(Predicate::TaggedWithAny(vec![]));
        assert!(matches!(attribute_query(&spec), Err(StoreError::Backend(_))));
        assert!(matches!(recipe_query(&spec), Err(StoreError::Backend(_))));
    }
}
