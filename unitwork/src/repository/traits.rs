//! Result types and preload hooks
//!
//! [`RelationLoader`] is how preload hints in
//! [`QueryParams::preloads`](super::QueryParams) are resolved: the unit of work
//! looks a loader up by relation name and hands it the freshly read page.

use async_trait::async_trait;
use serde::Serialize;

use super::entity::Entity;
use super::error::RepositoryError;

/// Result type for repository operations
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// One page of results plus the total count of the unpaged query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Count over the same filters, ignoring the page window
    pub total: u64,
    pub page: i64,
    pub page_size: i64,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> u64 {
        match u64::try_from(self.page_size) {
            Ok(size) if size > 0 => self.total.div_ceil(size),
            _ => 0,
        }
    }

    pub fn has_next(&self) -> bool {
        u64::try_from(self.page).is_ok_and(|page| page < self.total_pages())
    }

    pub fn has_prev(&self) -> bool {
        self.page > 1
    }
}

/// Eager loader for one named relation of `E`
///
/// Loaders receive the whole page at once so they can batch their lookups.
///
/// ```rust,ignore
/// struct AuthorLoader { authors: AuthorDirectory }
///
/// #[async_trait]
/// impl RelationLoader<Post> for AuthorLoader {
///     fn relation(&self) -> &str {
///         "author"
///     }
///
///     async fn load(&self, posts: &mut [Post]) -> RepositoryResult<()> {
///         let ids: Vec<_> = posts.iter().map(|p| p.author_id).collect();
///         let authors = self.authors.batch(&ids).await?;
///         for post in posts {
///             post.author = authors.get(&post.author_id).cloned();
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait RelationLoader<E: Entity>: Send + Sync {
    /// Preload hint this loader answers to
    fn relation(&self) -> &str;

    /// Populate the relation on every entity in place
    async fn load(&self, entities: &mut [E]) -> RepositoryResult<()>;
}
