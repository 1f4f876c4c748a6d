//! In-memory repository backend.
//!
//! Stores document blobs and publication tokens in process memory behind
//! `parking_lot` locks. Used for tests and single-node development, mirroring
//! the repository contract a durable backend would implement.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Timelike, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use super::repository::{
    PublicationRepository, RepositoryError, RepositoryResult, StateRepository, StoredDocument,
    WebPublication,
};

#[derive(Default)]
pub struct LocalRepository {
    states: RwLock<HashMap<String, StoredDocument>>,
    publications: RwLock<HashMap<String, WebPublication>>,
}

impl LocalRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn generate_token(publications: &HashMap<String, WebPublication>) -> String {
        // Collisions are vanishingly unlikely but cheap to re-roll.
        loop {
            let token = Uuid::new_v4().simple().to_string();
            if !publications.values().any(|p| p.token == token) {
                return token;
            }
        }
    }
}

/// Second-resolution timestamps, matching what HTTP validators can express.
fn utc_now() -> DateTime<Utc> {
    Utc::now().with_nanosecond(0).unwrap_or_else(Utc::now)
}

#[async_trait]
impl StateRepository for LocalRepository {
    async fn load_state(&self, owner: &str) -> RepositoryResult<Option<StoredDocument>> {
        Ok(self.states.read().get(owner).cloned())
    }

    async fn save_state(&self, owner: &str, data: &str) -> RepositoryResult<DateTime<Utc>> {
        let updated_at = utc_now();
        self.states.write().insert(
            owner.to_string(),
            StoredDocument {
                data: data.to_string(),
                updated_at,
            },
        );
        Ok(updated_at)
    }

    async fn delete_state(&self, owner: &str) -> RepositoryResult<()> {
        self.states.write().remove(owner);
        Ok(())
    }
}

#[async_trait]
impl PublicationRepository for LocalRepository {
    async fn publication_for_owner(
        &self,
        owner: &str,
    ) -> RepositoryResult<Option<WebPublication>> {
        Ok(self.publications.read().get(owner).cloned())
    }

    async fn publication_for_token(
        &self,
        token: &str,
    ) -> RepositoryResult<Option<WebPublication>> {
        Ok(self
            .publications
            .read()
            .values()
            .find(|p| p.token == token)
            .cloned())
    }

    async fn publish(&self, owner: &str) -> RepositoryResult<WebPublication> {
        let mut publications = self.publications.write();
        let now = utc_now();
        if let Some(existing) = publications.get_mut(owner) {
            existing.updated_at = now;
            return Ok(existing.clone());
        }
        let token = Self::generate_token(&publications);
        let publication = WebPublication {
            owner: owner.to_string(),
            token,
            created_at: now,
            updated_at: now,
        };
        publications.insert(owner.to_string(), publication.clone());
        Ok(publication)
    }

    async fn rotate(&self, owner: &str) -> RepositoryResult<WebPublication> {
        let mut publications = self.publications.write();
        let token = Self::generate_token(&publications);
        let publication = publications
            .get_mut(owner)
            .ok_or_else(|| RepositoryError::NotFound(format!("No publication for {owner}")))?;
        publication.token = token;
        publication.updated_at = utc_now();
        Ok(publication.clone())
    }

    async fn unpublish(&self, owner: &str) -> RepositoryResult<()> {
        self.publications.write().remove(owner);
        Ok(())
    }
}
