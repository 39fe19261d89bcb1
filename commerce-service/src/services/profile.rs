use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use super::error::ServiceError;
use super::store::CommerceStore;
use crate::models::{Profile, ProfileChanges, User};

/// A profile with the account it belongs to.
#[derive(Debug, Clone)]
pub struct ProfileDetail {
    pub profile: Profile,
    pub user: User,
}

#[derive(Clone)]
pub struct ProfileService {
    store: Arc<dyn CommerceStore>,
}

impl ProfileService {
    pub fn new(store: Arc<dyn CommerceStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, user_id: Uuid) -> Result<ProfileDetail, ServiceError> {
        let user = self
            .store
            .find_user(user_id)
            .await?
            .ok_or(ServiceError::NotFound("User"))?;
        let profile = self
            .store
            .get_profile(user_id)
            .await?
            .ok_or(ServiceError::NotFound("Profile"))?;
        Ok(ProfileDetail { profile, user })
    }

    #[tracing::instrument(skip(self, changes))]
    pub async fn update(
        &self,
        user_id: Uuid,
        changes: ProfileChanges,
    ) -> Result<ProfileDetail, ServiceError> {
        changes.validate()?;

        let mut tx = self.store.begin().await?;
        let user = tx
            .lock_user(user_id)
            .await?
            .ok_or(ServiceError::NotFound("User"))?;
        let mut profile = tx
            .lock_profile(user_id)
            .await?
            .ok_or(ServiceError::NotFound("Profile"))?;

        profile.apply(changes);
        tx.update_profile(&profile).await?;
        tx.commit().await?;

        tracing::info!(profile_id = %profile.id, "Profile updated");
        Ok(ProfileDetail { profile, user })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::store::{MemoryStore, StoreTx};

    async fn setup() -> (ProfileService, Uuid) {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let (user, _) = tx.find_or_create_user("09123456789").await.unwrap();
        tx.insert_profile(&Profile::new(user.id)).await.unwrap();
        tx.commit().await.unwrap();
        (ProfileService::new(Arc::new(store)), user.id)
    }

    #[tokio::test]
    async fn update_is_persisted_and_partial() {
        let (service, user_id) = setup().await;

        service
            .update(
                user_id,
                ProfileChanges {
                    first_name: Some("Sara".into()),
                    postal_code: Some("1234567890".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        service
            .update(
                user_id,
                ProfileChanges {
                    last_name: Some("Ahmadi".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let detail = service.get(user_id).await.unwrap();
        assert_eq!(detail.user.phone, "09123456789");
        assert_eq!(detail.profile.first_name.as_deref(), Some("Sara"));
        assert_eq!(detail.profile.last_name.as_deref(), Some("Ahmadi"));
        assert_eq!(detail.profile.postal_code.as_deref(), Some("1234567890"));
    }

    #[tokio::test]
    async fn invalid_codes_are_rejected_without_writing() {
        let (service, user_id) = setup().await;

        let err = service
            .update(
                user_id,
                ProfileChanges {
                    first_name: Some("Sara".into()),
                    national_code: Some("12".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::Validation(_)));
        assert!(service.get(user_id).await.unwrap().profile.first_name.is_none());
    }

    #[tokio::test]
    async fn unknown_user_has_no_profile() {
        let (service, _) = setup().await;
        let err = service.get(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound("User")));
    }
}
