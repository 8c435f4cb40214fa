//! Identity store: registration, credential checks and profile updates.

use tracing::{info, warn};
use uuid::Uuid;

use super::email::normalize_email;
use super::password::{hash_password, verify_password};
use crate::error::{AppError, AppResult};
use crate::store::{NewUser, Store, User, UserChanges};

const BAD_CREDENTIALS: &str = "unable to authenticate with provided credentials";

#[derive(Debug, Clone, Default)]
pub struct ProfileChanges {
    pub name: Option<String>,
    pub password: Option<String>,
}

async fn create_user(
    store: &dyn Store,
    email: &str,
    secret: &str,
    name: &str,
    elevated: bool,
) -> AppResult<User> {
    if email.trim().is_empty() {
        return Err(AppError::invalid("users must have an email address"));
    }
    let user = store
        .insert_user(NewUser {
            email: normalize_email(email),
            name: name.to_string(),
            password_hash: hash_password(secret)?,
            is_staff: elevated,
            is_superuser: elevated,
        })
        .await?;
    info!(user_id = %user.id, superuser = elevated, "user created");
    Ok(user)
}

pub async fn register(
    store: &dyn Store,
    email: &str,
    secret: &str,
    name: &str,
) -> AppResult<User> {
    create_user(store, email, secret, name, false).await
}

pub async fn promote_to_superuser(store: &dyn Store, email: &str, secret: &str) -> AppResult<User> {
    create_user(store, email, secret, "", true).await
}

pub async fn verify(store: &dyn Store, email: &str, secret: &str) -> AppResult<User> {
    let email = normalize_email(email);
    let Some(user) = store.user_by_email(&email).await? else {
        warn!(email = %email, "login unknown email");
        return Err(AppError::unauthenticated(BAD_CREDENTIALS));
    };
    if !user.is_active {
        warn!(user_id = %user.id, "login inactive user");
        return Err(AppError::unauthenticated(BAD_CREDENTIALS));
    }
    if !verify_password(secret, &user.password_hash)? {
        warn!(user_id = %user.id, "login invalid password");
        return Err(AppError::unauthenticated(BAD_CREDENTIALS));
    }
    Ok(user)
}

pub async fn update_profile(
    store: &dyn Store,
    user_id: Uuid,
    changes: ProfileChanges,
) -> AppResult<User> {
    let password_hash = match changes.password {
        Some(p) => Some(hash_password(&p)?),
        None => None,
    };
    let user = store
        .update_user(
            user_id,
            UserChanges {
                name: changes.name,
                password_hash,
            },
        )
        .await?;
    info!(user_id = %user.id, "profile updated");
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;

    #[tokio::test]
    async fn register_normalizes_domain_and_hashes_secret() {
        let store = MemStore::default();
        let user = register(&store, "Test@GMAIL.com", "testpass123", "Test")
            .await
            .unwrap();
        assert_eq!(user.email, "Test@gmail.com");
        assert_ne!(user.password_hash, "testpass123");
        assert!(user.is_active);
        assert!(!user.is_staff);
        assert!(!user.is_superuser);
    }

    #[tokio::test]
    async fn register_without_email_fails() {
        let store = MemStore::default();
        let err = register(&store, "", "testpass123", "x").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn duplicate_registration_conflicts() {
        let store = MemStore::default();
        register(&store, "dup@example.com", "testpass", "a").await.unwrap();
        let err = register(&store, "dup@EXAMPLE.com", "other", "b")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn superuser_is_staff() {
        let store = MemStore::default();
        let user = promote_to_superuser(&store, "root@example.com", "rootpass")
            .await
            .unwrap();
        assert!(user.is_staff);
        assert!(user.is_superuser);
    }

    #[tokio::test]
    async fn verify_accepts_registered_case_email() {
        let store = MemStore::default();
        let created = register(&store, "Chef@Kitchen.IO", "secret1", "Chef")
            .await
            .unwrap();
        let user = verify(&store, "Chef@Kitchen.IO", "secret1").await.unwrap();
        assert_eq!(user.id, created.id);
    }

    #[tokio::test]
    async fn verify_rejects_wrong_secret_and_unknown_user() {
        let store = MemStore::default();
        register(&store, "a@b.com", "secret1", "A").await.unwrap();
        assert!(matches!(
            verify(&store, "a@b.com", "wrong").await,
            Err(AppError::AuthenticationFailed(_))
        ));
        assert!(matches!(
            verify(&store, "nobody@b.com", "secret1").await,
            Err(AppError::AuthenticationFailed(_))
        ));
    }

    #[tokio::test]
    async fn update_profile_rehashes_password() {
        let store = MemStore::default();
        let user = register(&store, "a@b.com", "secret1", "A").await.unwrap();
        let updated = update_profile(
            &store,
            user.id,
            ProfileChanges {
                name: Some("New name".into()),
                password: Some("newpassword123".into()),
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.name, "New name");
        assert!(verify(&store, "a@b.com", "newpassword123").await.is_ok());
        assert!(verify(&store, "a@b.com", "secret1").await.is_err());
    }
}
