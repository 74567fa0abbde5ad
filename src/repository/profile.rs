/// User-profile repository.
///
/// Profiles are unique per `(user_id, group_id)` and upserted in place, not
/// versioned. The duplicate-key translation keeps the row id stable across
/// updates.
use std::sync::Arc;

use tracing::{debug, error};

use crate::config::StorageMode;
use crate::document::{Collection, DocumentStore, DualDocumentProxy};
use crate::error::EngramError;
use crate::kv::KvStorage;
use crate::models::{UserProfile, USER_PROFILE_SCHEMA};
use crate::query::{Filter, Query};

/// Repository over user profiles.
pub struct UserProfileRepository {
    proxy: DualDocumentProxy<UserProfile>,
}

impl UserProfileRepository {
    /// Build against the shared document store and primary KV.
    pub fn new(store: &DocumentStore, kv: Arc<dyn KvStorage>, mode: StorageMode) -> Self {
        let collection = store.collection(&USER_PROFILE_SCHEMA);
        Self {
            proxy: DualDocumentProxy::new(collection, kv, mode),
        }
    }

    /// The backing collection (validator / test surface).
    pub fn collection(&self) -> &Arc<Collection> {
        self.proxy.collection()
    }

    /// Fetch the profile of one user in one group.
    pub async fn get(&self, user_id: &str, group_id: &str) -> Option<UserProfile> {
        let query = Query::new()
            .filter(Filter::eq("user_id", user_id))
            .filter(Filter::eq("group_id", group_id));
        match self.proxy.find_one(&query).await {
            Ok(profile) => profile,
            Err(e) => {
                error!(user_id, group_id, error = %e, "profile lookup failed");
                None
            }
        }
    }

    /// Every profile in one group.
    pub async fn find_by_group_id(&self, group_id: &str, limit: usize) -> Vec<UserProfile> {
        let query = Query::new()
            .filter(Filter::eq("group_id", group_id))
            .sort_by("updated_at", false)
            .limit(limit);
        match self.proxy.find(&query).await {
            Ok(profiles) => profiles,
            Err(e) => {
                error!(group_id, error = %e, "group profile query failed");
                Vec::new()
            }
        }
    }

    /// Insert-or-update one profile by its composite key.
    pub async fn upsert(&self, mut profile: UserProfile) -> Option<UserProfile> {
        match self.proxy.insert(&mut profile).await {
            Ok(()) => {
                debug!(
                    user_id = %profile.user_id,
                    group_id = %profile.group_id,
                    "profile inserted"
                );
                return Some(profile);
            }
            Err(EngramError::DuplicateKey { .. }) => {}
            Err(e) => {
                error!(
                    user_id = %profile.user_id,
                    group_id = %profile.group_id,
                    error = %e,
                    "profile insert failed"
                );
                return None;
            }
        }

        let mut existing = self.get(&profile.user_id, &profile.group_id).await?;
        merge_profile(&mut existing, &profile);
        match self.proxy.save(&mut existing).await {
            Ok(true) => Some(existing),
            Ok(false) => {
                error!(
                    user_id = %profile.user_id,
                    group_id = %profile.group_id,
                    "profile vanished during upsert"
                );
                None
            }
            Err(e) => {
                error!(
                    user_id = %profile.user_id,
                    group_id = %profile.group_id,
                    error = %e,
                    "profile update failed"
                );
                None
            }
        }
    }

    /// Remove the profile of one user in one group.
    pub async fn delete(&self, user_id: &str, group_id: &str) -> bool {
        let query = Query::new()
            .filter(Filter::eq("user_id", user_id))
            .filter(Filter::eq("group_id", group_id));
        match self.proxy.delete_many(&query).await {
            Ok(removed) => removed > 0,
            Err(e) => {
                error!(user_id, group_id, error = %e, "profile delete failed");
                false
            }
        }
    }
}

fn merge_profile(existing: &mut UserProfile, incoming: &UserProfile) {
    if incoming.profile_data.is_some() {
        existing.profile_data = incoming.profile_data.clone();
    }
    if incoming.scenario.is_some() {
        existing.scenario = incoming.scenario.clone();
    }
    if incoming.confidence.is_some() {
        existing.confidence = incoming.confidence;
    }
    if incoming.version.is_some() {
        existing.version = incoming.version;
    }
    if incoming.cluster_ids.is_some() {
        existing.cluster_ids = incoming.cluster_ids.clone();
    }
    if incoming.memcell_count.is_some() {
        existing.memcell_count = incoming.memcell_count;
    }
    if incoming.last_updated_cluster.is_some() {
        existing.last_updated_cluster = incoming.last_updated_cluster;
    }
}
