//! The helper registry: process-wide conversation state.
//!
//! Helpers are addressed by a composite (user, session) key in one flat map
//! guarded by a single reader/writer lock. For a given key at most one
//! helper exists for the process lifetime; creation is idempotent even under
//! concurrent callers, because the exclusive lock spans both the lookup and
//! the conditional construction.
//!
//! The registry is an explicitly constructed object: the factory and the
//! default persistence strategy are injected, no hidden global state.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use parley_model::{ModelConfig, ModelFactory};

use crate::error::ChatError;
use crate::helper::ConversationHelper;
use crate::message::SessionInfo;
use crate::persist::{noop_save_fn, SaveFn};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SessionKey {
    user: String,
    session: String,
}

impl SessionKey {
    fn new(user: &str, session: &str) -> Self {
        Self {
            user: user.into(),
            session: session.into(),
        }
    }
}

/// Process-wide map from (user, session) to conversation helper.
pub struct HelperRegistry {
    factory: Arc<ModelFactory>,
    save_fn: SaveFn,
    helpers: RwLock<HashMap<SessionKey, Arc<ConversationHelper>>>,
}

impl HelperRegistry {
    /// Create a registry with no-op persistence.
    pub fn new(factory: Arc<ModelFactory>) -> Self {
        Self {
            factory,
            save_fn: noop_save_fn(),
            helpers: RwLock::new(HashMap::new()),
        }
    }

    /// Set the persistence strategy applied to newly created helpers.
    pub fn with_save_fn(mut self, save_fn: SaveFn) -> Self {
        self.save_fn = save_fn;
        self
    }

    /// Fetch the helper for (user, session), constructing it on first use.
    ///
    /// Idempotent: when an entry already exists it is returned unchanged and
    /// `model_type`, `config`, and `title` are ignored. The exclusive lock
    /// is held across lookup and construction, so concurrent callers racing
    /// on a new key construct exactly one helper. Construction failure
    /// leaves no entry behind.
    pub async fn get_or_create(
        &self,
        user: &str,
        session: &str,
        model_type: &str,
        config: &ModelConfig,
        title: Option<&str>,
    ) -> Result<Arc<ConversationHelper>, ChatError> {
        let key = SessionKey::new(user, session);
        let mut helpers = self.helpers.write().await;

        if let Some(existing) = helpers.get(&key) {
            return Ok(existing.clone());
        }

        let model = self.factory.create(model_type, config)?;
        let helper = Arc::new(ConversationHelper::new(
            model,
            session,
            title.unwrap_or_default(),
            self.save_fn.clone(),
        ));
        helpers.insert(key, helper.clone());

        tracing::debug!(user, session, model_type, "created conversation helper");
        Ok(helper)
    }

    /// Read-only lookup; never constructs.
    pub async fn get(&self, user: &str, session: &str) -> Option<Arc<ConversationHelper>> {
        let helpers = self.helpers.read().await;
        helpers.get(&SessionKey::new(user, session)).cloned()
    }

    /// Evict the helper for (user, session).
    ///
    /// With the flat composite key, removing a user's last session leaves no
    /// bookkeeping residue for that user. Operations already in flight
    /// against the removed helper continue independently; eviction neither
    /// flushes nor cancels them.
    pub async fn remove(&self, user: &str, session: &str) {
        let mut helpers = self.helpers.write().await;
        if helpers.remove(&SessionKey::new(user, session)).is_some() {
            tracing::debug!(user, session, "removed conversation helper");
        }
    }

    /// Snapshot the session summaries for one user; empty for an unknown
    /// user. Order is unspecified.
    pub async fn user_sessions(&self, user: &str) -> Vec<SessionInfo> {
        let helpers = self.helpers.read().await;
        helpers
            .iter()
            .filter(|(key, _)| key.user == user)
            .map(|(key, helper)| SessionInfo {
                session_id: key.session.clone(),
                title: helper.title().to_string(),
                model_type: helper.model_type().to_string(),
            })
            .collect()
    }

    /// Total number of live helpers across all users.
    pub async fn session_count(&self) -> usize {
        self.helpers.read().await.len()
    }
}
