//! Declarative description of an owner-scoped listing.
//!
//! A [`QuerySpec`] can only be built with an owner, and every adapter applies
//! the owner filter before any predicate. Ordering is fixed
//! per collection: tags and ingredients by name descending, recipes newest
//! first.

use uuid::Uuid;

use super::models::AttributeKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Attribute(AttributeKind),
    Recipe,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// Row id is one of the given ids.
    IdIn(Vec<Uuid>),
    /// Recipe is linked to at least one of the given tags.
    TaggedWithAny(Vec<Uuid>),
    /// Recipe is linked to at least one of the given ingredients.
    HasIngredientAny(Vec<Uuid>),
    /// Tag/ingredient is referenced by at least one recipe.
    AssignedToRecipe,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySpec {
    collection: Collection,
    owner: Uuid,
    predicates: Vec<Predicate>,
}

impl QuerySpec {
    pub fn attributes(kind: AttributeKind, owner: Uuid) -> Self {
        Self {
            collection: Collection::Attribute(kind),
            owner,
            predicates: Vec::new(),
        }
    }

    pub fn recipes(owner: Uuid) -> Self {
        Self {
            collection: Collection::Recipe,
            owner,
            predicates: Vec::new(),
        }
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn collection(&self) -> Collection {
        self.collection
    }

    pub fn owner(&self) -> Uuid {
        self.owner
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }
}
