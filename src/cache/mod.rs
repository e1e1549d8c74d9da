//! Memoized read endpoints and their invalidation rules.
//!
//! Each cached response is identified by a [`CacheKey`]: the endpoint that
//! produced it and the reader or librarian it was produced for. Mutations
//! map to the keys they make stale through the pure function
//! [`invalidation_for`]; [`ReadCache::invalidate`] applies that mapping and
//! must only be called after the mutation's transaction has committed.

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use moka::future::Cache;
use serde_json::Value;
use tracing::debug;


/// Lifetime of a memoized response.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

/// A memoized read endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Full catalog with ratings, per reader.
    Catalog,
    /// Books held by the reader, with ratings.
    AccessibleBooks,
    /// Sections with their rated books, per reader.
    Sections,
    /// Reader profile with read history.
    Profile,
    /// Librarian book listing.
    LibrarianBooks,
    /// Librarian section listing.
    LibrarianSections,
}

/// Identity of one memoized response.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Endpoint that produced the response.
    pub endpoint: Endpoint,
    /// Reader email or librarian username the response was produced for.
    pub subject: String,
}

impl CacheKey {
    /// Build a key for `endpoint` as seen by `subject`.
    #[must_use]
    pub fn new(endpoint: Endpoint, subject: impl Into<String>) -> Self {
        Self {
            endpoint,
            subject: subject.into(),
        }
    }
}

/// A committed change that may make cached responses stale.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mutation {
    /// A librarian added a book.
    BookCreated,
    /// A librarian edited a book.
    BookUpdated,
    /// A librarian removed a book.
    BookDeleted,
    /// A librarian added a section.
    SectionCreated,
    /// A librarian edited a section.
    SectionUpdated,
    /// A librarian removed a section.
    SectionDeleted,
    /// A borrow request was approved.
    RequestApproved,
    /// A borrow request was rejected.
    RequestRejected,
    /// A librarian took a book back.
    BookRevoked,
    /// The reader marked a book as read.
    MarkedRead(String),
    /// The reader returned a book.
    Returned(String),
    /// The reader left feedback.
    FeedbackSubmitted(String),
    /// The reader bought a book.
    Purchased(String),
    /// The reader edited their profile.
    ProfileEdited(String),
}

/// Cached responses made stale by a mutation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Invalidation {
    /// Everything, for every subject.
    All,
    /// Exactly these keys.
    Keys(Vec<CacheKey>),
}

/// Map a mutation to the responses it invalidates.
///
/// Librarian catalog changes and request decisions clear the whole cache.
/// Reader actions only touch the acting reader's own entries.
#[must_use]
pub fn invalidation_for(mutation: &Mutation) -> Invalidation {
    match mutation {
        Mutation::BookCreated
        | Mutation::BookUpdated
        | Mutation::BookDeleted
        | Mutation::SectionCreated
        | Mutation::SectionUpdated
        | Mutation::SectionDeleted
        | Mutation::RequestApproved
        | Mutation::RequestRejected
        | Mutation::BookRevoked => Invalidation::All,
        Mutation::MarkedRead(user) | Mutation::ProfileEdited(user) => {
            Invalidation::Keys(vec![CacheKey::new(Endpoint::Profile, user.as_str())])
        }
        Mutation::Returned(user) | Mutation::FeedbackSubmitted(user) | Mutation::Purchased(user) => {
            Invalidation::Keys(
                [Endpoint::Catalog, Endpoint::Sections, Endpoint::AccessibleBooks]
                    .into_iter()
                    .map(|endpoint| CacheKey::new(endpoint, user.as_str()))
                    .collect(),
            )
        }
    }
}

/// Time-bounded memo of JSON responses.
///
/// Computations that overlap an invalidation never publish their result:
/// every invalidation advances an epoch, and a value computed under an
/// older epoch is discarded.
#[derive(Clone)]
pub struct ReadCache {
    entries: Cache<CacheKey, Arc<Value>>,
    epoch: Arc<AtomicU64>,
}

impl ReadCache {
    /// Create a cache holding up to `capacity` responses for `ttl` each.
    #[must_use]
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Return the cached response for `key`, computing and storing it on a
    /// miss.
    ///
    /// # Errors
    /// Propagates the error returned by `compute`; nothing is stored then.
    pub async fn get_or_compute<F, Fut, E>(&self, key: CacheKey, compute: F) -> Result<Arc<Value>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
    {
        if let Some(hit) = self.entries.get(&key).await {
            return Ok(hit);
        }
        let started = self.epoch.load(Ordering::SeqCst);
        let value = Arc::new(compute().await?);
        if self.epoch.load(Ordering::SeqCst) == started {
            self.entries.insert(key.clone(), Arc::clone(&value)).await;
            if self.epoch.load(Ordering::SeqCst) != started {
                self.entries.invalidate(&key).await;
            }
        }
        Ok(value)
    }

    /// Drop every response made stale by `mutation`.
    pub async fn invalidate(&self, mutation: &Mutation) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        match invalidation_for(mutation) {
            Invalidation::All => {
                debug!(?mutation, "clearing read cache");
                let stored: Vec<Arc<CacheKey>> = self.entries.iter().map(|(key, _)| key).collect();
                for key in stored {
                    self.entries.invalidate(key.as_ref()).await;
                }
            }
            Invalidation::Keys(keys) => {
                debug!(?mutation, count = keys.len(), "invalidating cached responses");
                for key in &keys {
                    self.entries.invalidate(key).await;
                }
            }
        }
    }
}

impl Default for ReadCache {
    fn default() -> Self { Self::new(10_000, DEFAULT_TTL) }
}
