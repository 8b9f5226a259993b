// Entity repositories - read queries, mutations, cache keys and invalidation rules
// per entity family. The view layer talks to these, never to the gateway.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::warn;

use crate::entities::{Author, Entity, UserRow};
use crate::error::{AppError, AppResult};
use crate::infrastructure::gateway::{FilterSpec, Gateway};

pub mod comments;
pub mod groups;
pub mod posts;
pub mod realtime;
pub mod thread;

pub use comments::CommentRepository;
pub use groups::GroupRepository;
pub use posts::{PostRepository, PostScope};
pub use realtime::RealtimeBridge;
pub use thread::assemble_thread;

/// Settings shared by every repository
#[derive(Debug, Clone)]
pub struct RepositoryOptions {
    pub cache_capacity: usize,
    /// Re-fetch an invalidated list in the background instead of waiting for the next read.
    pub refetch_on_invalidate: bool,
    pub media_bucket: String,
}

impl Default for RepositoryOptions {
    fn default() -> Self {
        Self {
            cache_capacity: 1000,
            refetch_on_invalidate: true,
            media_bucket: "media".to_string(),
        }
    }
}

/// In-flight counter behind a mutation's `is_pending` flag
#[derive(Debug, Default)]
pub struct MutationTracker {
    in_flight: AtomicUsize,
}

impl MutationTracker {
    pub fn is_pending(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    pub fn begin(&self) -> PendingGuard<'_> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        PendingGuard { tracker: self }
    }
}

pub struct PendingGuard<'a> {
    tracker: &'a MutationTracker,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.tracker.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Look up author projections for a set of user ids in one query.
/// Ids without a user row fall back to `Author::unknown`.
pub(crate) async fn resolve_authors<'a>(
    gateway: &Arc<dyn Gateway>,
    ids: impl IntoIterator<Item = &'a str>,
) -> AppResult<HashMap<String, Author>> {
    let ids: BTreeSet<&str> = ids.into_iter().collect();
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let rows = gateway
        .query(UserRow::table(), &FilterSpec::all().in_list("id", ids.iter().copied()))
        .await
        .map_err(AppError::upstream("resolve_authors"))?;

    let mut authors: HashMap<String, Author> = UserRow::from_rows(rows)?
        .into_iter()
        .map(|row| (row.id.clone(), Author::from(row)))
        .collect();

    for id in ids {
        if !authors.contains_key(id) {
            warn!("No user row for author {}", id);
            authors.insert(id.to_string(), Author::unknown(id));
        }
    }
    Ok(authors)
}

pub(crate) fn author_for(authors: &HashMap<String, Author>, id: Option<&str>) -> Author {
    match id {
        Some(id) => authors.get(id).cloned().unwrap_or_else(|| Author::unknown(id)),
        None => Author::unknown(""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::gateway::{InMemoryGateway, Table};
    use serde_json::json;

    #[test]
    fn test_tracker_pending_while_guard_alive() {
        let tracker = MutationTracker::default();
        assert!(!tracker.is_pending());
        {
            let _first = tracker.begin();
            let _second = tracker.begin();
            assert!(tracker.is_pending());
        }
        assert!(!tracker.is_pending());
    }

    #[tokio::test]
    async fn test_resolve_authors_with_fallback() {
        let memory = InMemoryGateway::new("mem://storage");
        memory
            .seed(
                Table::Users,
                vec![json!({"id": "u1", "full_name": "Lydia", "avatar_url": "https://cdn/l.png"})
                    .as_object()
                    .cloned()
                    .unwrap()],
            )
            .await;
        let gateway: Arc<dyn Gateway> = Arc::new(memory);

        let authors = resolve_authors(&gateway, ["u1", "ghost", "u1"]).await.unwrap();
        assert_eq!(authors.len(), 2);
        assert_eq!(authors["u1"].display_name, "Lydia");
        assert_eq!(authors["ghost"], Author::unknown("ghost"));
    }

    #[tokio::test]
    async fn test_resolve_authors_skips_query_for_no_ids() {
        let memory = InMemoryGateway::new("mem://storage");
        memory.inject_failure(crate::infrastructure::gateway::Fault::Query { table: Table::Users });
        let gateway: Arc<dyn Gateway> = Arc::new(memory);
        let authors = resolve_authors(&gateway, Vec::<&str>::new()).await.unwrap();
        assert!(authors.is_empty());
    }
}
