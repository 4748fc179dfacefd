use super::{BackendSession, SessionFactory, SessionRequest, SUB_CONVERSATION_SEPARATOR};
use crate::CompletionError;
use dashmap::{mapref::entry::Entry, DashMap};
use std::sync::Arc;

/// Conversation id to live backend session.
///
/// Operations on different ids never wait on each other; creation for one id
/// happens at most once even under concurrent requests.
pub struct SessionRegistry {
    factory: Arc<dyn SessionFactory>,
    sessions: DashMap<String, Arc<dyn BackendSession>>,
    delete_history: bool,
}

impl SessionRegistry {
    /// `delete_history` enables remote teardown of removed sessions
    pub fn new(factory: Arc<dyn SessionFactory>, delete_history: bool) -> Self {
        Self {
            factory,
            sessions: DashMap::new(),
            delete_history,
        }
    }

    pub fn get_or_create(
        &self,
        request: &SessionRequest,
    ) -> Result<Arc<dyn BackendSession>, CompletionError> {
        match self.sessions.entry(request.conversation_id.clone()) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let session = self.factory.create(request)?;
                tracing::info!(
                    conversation_id = %request.conversation_id,
                    model = %request.model,
                    "Created backend session"
                );
                entry.insert(session.clone());
                Ok(session)
            }
        }
    }

    pub fn get(&self, conversation_id: &str) -> Option<Arc<dyn BackendSession>> {
        self.sessions
            .get(conversation_id)
            .map(|entry| entry.value().clone())
    }

    pub fn contains(&self, conversation_id: &str) -> bool {
        self.sessions.contains_key(conversation_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Registered ids, sorted
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Remove `conversation_id` and all of its sub-conversations.
    ///
    /// Always succeeds. With history deletion enabled every removed session
    /// is deleted remotely in the background.
    pub fn remove(&self, conversation_id: &str) -> bool {
        let prefix = format!("{conversation_id}{SUB_CONVERSATION_SEPARATOR}");
        let children: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.key().starts_with(&prefix))
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = Vec::new();
        for id in std::iter::once(conversation_id.to_string()).chain(children) {
            if let Some((id, session)) = self.sessions.remove(&id) {
                if self.delete_history {
                    spawn_remote_delete(id.clone(), session);
                }
                removed.push(id);
            }
        }

        tracing::info!(conversation_id, removed = ?removed, "Removed sessions");
        true
    }

    /// Drop exactly `conversation_id` without remote teardown
    pub fn evict(&self, conversation_id: &str) -> bool {
        let evicted = self.sessions.remove(conversation_id).is_some();
        if evicted {
            tracing::debug!(conversation_id, "Evicted session");
        }
        evicted
    }
}

fn spawn_remote_delete(conversation_id: String, session: Arc<dyn BackendSession>) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        tracing::warn!(%conversation_id, "No runtime available, skipping remote deletion");
        return;
    };
    handle.spawn(async move {
        if let Err(e) = session.delete().await {
            tracing::warn!(%conversation_id, error = %e, "Failed to delete remote history");
        }
    });
}
