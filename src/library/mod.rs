//! The library service: every operation the HTTP surface exposes.
//!
//! Each mutating call borrows one pooled connection, runs its store or
//! workflow operation (which commits its own transaction) and only then
//! invalidates the read cache. Memoized reads go through [`ReadCache`].

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use argon2::Argon2;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::{
    auth::{Role, TokenIssuer},
    cache::{CacheKey, Endpoint, Mutation, ReadCache},
    credentials::{hash_password, verify_password},
    db::{BookSearchField, DbPool, catalog, identity, ledger, write_transaction},
    error::{CredentialFailure, Entity, LibraryError, PolicyViolation},
    models::{
        Book,
        BookUpdate,
        FeedbackView,
        NewBook,
        NewLibrarian,
        NewSection,
        NewUser,
        ProfileUpdate,
        RequestOutcome,
        RequestView,
        Section,
        SectionUpdate,
        UserDetails,
    },
    rating::{self, RatedBook},
    reports::{Document, Renderer},
    validation::ValidationError,
    workflow::{self, FeedbackInput},
};

#[cfg(test)]
mod tests;

/// Directory under the data directory holding book artifacts.
pub const BOOKS_DIR: &str = "books";

/// Runtime settings of a [`Library`].
#[derive(Clone)]
pub struct LibrarySettings {
    /// Root directory for book artifacts, reports and exports.
    pub data_dir: PathBuf,
    /// Local time zone used for dates and schedules.
    pub utc_offset: FixedOffset,
    /// Maximum number of memoized responses.
    pub cache_capacity: u64,
    /// Password hashing parameters.
    pub argon2: Argon2<'static>,
    /// Token signing secret.
    pub jwt_secret: Vec<u8>,
}

/// A freshly issued session.
#[derive(Serialize, Debug, Clone)]
pub struct Session<D> {
    /// Bearer token.
    pub token: String,
    /// Account details of the session owner.
    pub details: D,
}

/// Public view of a librarian account.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct LibrarianDetails {
    /// Login name.
    pub username: String,
    /// Contact address; monthly reports are sent here.
    pub email: String,
}

/// Fields of a reader signup.
#[derive(Debug, Clone, Copy)]
pub struct Signup<'a> {
    /// Account email, the reader's identity.
    pub email: &'a str,
    /// First name.
    pub first_name: &'a str,
    /// Optional last name.
    pub last_name: Option<&'a str>,
    /// Phone number.
    pub phone: &'a str,
    /// Display name.
    pub nick_name: &'a str,
    /// Plain-text password, hashed before storage.
    pub password: &'a str,
}

/// Fields of a new catalog book.
#[derive(Debug, Clone, Copy)]
pub struct BookDraft<'a> {
    /// Title.
    pub title: &'a str,
    /// Authors.
    pub author: &'a str,
    /// Book text.
    pub content: &'a str,
    /// Owning section.
    pub section_id: i32,
}

/// A section together with its books.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SectionBooks<B> {
    /// The section.
    #[serde(flatten)]
    pub section: Section,
    /// Books filed in it.
    pub books: Vec<B>,
}

/// A read-marked book with the date of the mark.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ReadEntry {
    /// The book.
    #[serde(flatten)]
    pub book: Book,
    /// Day it was marked read.
    pub on: NaiveDate,
}

/// A reader's profile page.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    /// Display name.
    pub user_name: String,
    /// Account details.
    pub user: UserDetails,
    /// Books the reader has marked as read.
    pub books: Vec<ReadEntry>,
}

/// A held book opened for reading.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Reading {
    /// Location of the stored artifact, relative to the data directory.
    pub url: Option<String>,
    /// The book.
    pub book: Book,
}

/// Librarian dashboard counters.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// All requests ever opened.
    pub requests: i64,
    /// Requests closed as accepted.
    pub arequests: i64,
    /// Requests closed as rejected.
    pub rrequests: i64,
    /// Books in the catalog.
    pub books: i64,
    /// Sections in the catalog.
    pub sections: i64,
}

/// A librarian decision on a pending request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Issue the book.
    Approve,
    /// Decline the request.
    Reject,
}

impl Decision {
    /// Parse the numeric choice used on the wire: `0` approves, `1` rejects.
    ///
    /// # Errors
    /// [`ValidationError::InvalidChoice`] for any other value.
    pub const fn from_choice(choice: i64) -> Result<Self, ValidationError> {
        match choice {
            0 => Ok(Self::Approve),
            1 => Ok(Self::Reject),
            _ => Err(ValidationError::InvalidChoice),
        }
    }
}

/// Map a wire search index to a book column. Holder search is reserved for
/// librarians; readers fall back to author search.
#[must_use]
pub fn search_field(index: &str, librarian: bool) -> BookSearchField {
    match index {
        "1" => BookSearchField::Title,
        "3" if librarian => BookSearchField::Holder,
        _ => BookSearchField::Author,
    }
}

fn group_by_section<B>(sections: Vec<Section>, books: Vec<B>, section_of: impl Fn(&B) -> i32) -> Vec<SectionBooks<B>> {
    let mut filed: HashMap<i32, Vec<B>> = HashMap::new();
    for book in books {
        filed.entry(section_of(&book)).or_default().push(book);
    }
    sections
        .into_iter()
        .map(|section| SectionBooks {
            books: filed.remove(&section.id).unwrap_or_default(),
            section,
        })
        .collect()
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("pdf") => "application/pdf",
        _ => "text/html",
    }
}

/// Shared application state behind the HTTP handlers and background jobs.
#[derive(Clone)]
pub struct Library {
    pool: DbPool,
    cache: ReadCache,
    tokens: TokenIssuer,
    renderer: Arc<Renderer>,
    argon2: Argon2<'static>,
    data_dir: PathBuf,
    utc_offset: FixedOffset,
}

impl Library {
    /// Assemble the service.
    #[must_use]
    pub fn new(pool: DbPool, renderer: Renderer, settings: LibrarySettings) -> Self {
        Self {
            pool,
            cache: ReadCache::new(settings.cache_capacity, crate::cache::DEFAULT_TTL),
            tokens: TokenIssuer::new(&settings.jwt_secret),
            renderer: Arc::new(renderer),
            argon2: settings.argon2,
            data_dir: settings.data_dir,
            utc_offset: settings.utc_offset,
        }
    }

    /// Connection pool.
    #[must_use]
    pub const fn pool(&self) -> &DbPool { &self.pool }

    /// Token issuer used for every session.
    #[must_use]
    pub const fn tokens(&self) -> &TokenIssuer { &self.tokens }

    /// Document renderer.
    #[must_use]
    pub fn renderer(&self) -> &Renderer { &self.renderer }

    /// Root directory for artifacts.
    #[must_use]
    pub fn data_dir(&self) -> &Path { &self.data_dir }

    /// Configured local time zone.
    #[must_use]
    pub const fn utc_offset(&self) -> FixedOffset { self.utc_offset }

    /// Current instant.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> { Utc::now() }

    /// Current date in the configured time zone.
    #[must_use]
    pub fn today(&self) -> NaiveDate { self.now().with_timezone(&self.utc_offset).date_naive() }

    async fn invalidate(&self, mutation: Mutation) { self.cache.invalidate(&mutation).await; }

    async fn memoized<T, F, Fut>(&self, key: CacheKey, compute: F) -> Result<Value, LibraryError>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, LibraryError>>,
    {
        let value = self
            .cache
            .get_or_compute(key, || async move { Ok::<_, LibraryError>(serde_json::to_value(compute().await?)?) })
            .await?;
        Ok(Value::clone(&value))
    }

    // ---- readers ----

    /// Register a reader.
    ///
    /// # Errors
    /// [`PolicyViolation::AccountExists`] when the email is taken.
    pub async fn signup(&self, form: Signup<'_>) -> Result<UserDetails, LibraryError> {
        let hashed = hash_password(&self.argon2, form.password)?;
        let mut conn = self.pool.get().await?;
        if identity::get_user(&mut conn, form.email).await?.is_some() {
            return Err(PolicyViolation::AccountExists.into());
        }
        let created = identity::create_user(
            &mut conn,
            &NewUser {
                email: form.email,
                nick_name: form.nick_name,
                first_name: form.first_name,
                last_name: form.last_name,
                phone: form.phone,
                password: &hashed,
            },
        )
        .await;
        match created {
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                return Err(PolicyViolation::AccountExists.into());
            }
            other => other?,
        };
        let user = identity::get_user(&mut conn, form.email)
            .await?
            .ok_or(LibraryError::NotFound(Entity::User))?;
        info!(email = form.email, "reader registered");
        Ok(UserDetails::from(&user))
    }

    /// Log a reader in, recording today's visit.
    ///
    /// # Errors
    /// [`LibraryError::Credentials`] for an unknown email or wrong password.
    pub async fn login_user(&self, email: &str, password: &str) -> Result<Session<UserDetails>, LibraryError> {
        let mut conn = self.pool.get().await?;
        let user = identity::get_user(&mut conn, email)
            .await?
            .ok_or(LibraryError::Credentials(CredentialFailure::UnknownAccount))?;
        if !verify_password(&user.password, password) {
            return Err(LibraryError::Credentials(CredentialFailure::WrongPassword));
        }
        let now = self.now();
        identity::record_visit(&mut conn, email, self.today()).await?;
        identity::set_last_active(&mut conn, email, Some(now.naive_utc())).await?;
        let token = self.tokens.issue(email, Role::User, now)?;
        info!(email, "reader logged in");
        Ok(Session {
            token,
            details: UserDetails::from(&user),
        })
    }

    /// End a reader session.
    ///
    /// # Errors
    /// Returns a storage error.
    pub async fn logout(&self, email: &str) -> Result<(), LibraryError> {
        let mut conn = self.pool.get().await?;
        identity::set_last_active(&mut conn, email, None).await?;
        Ok(())
    }

    /// Whether a reader account exists.
    ///
    /// # Errors
    /// Returns a storage error.
    pub async fn user_exists(&self, email: &str) -> Result<bool, LibraryError> {
        let mut conn = self.pool.get().await?;
        Ok(identity::get_user(&mut conn, email).await?.is_some())
    }

    /// Full catalog with ratings as seen by `email`. Memoized.
    ///
    /// # Errors
    /// Returns a storage or encoding error.
    pub async fn catalog(&self, email: &str) -> Result<Value, LibraryError> {
        self.memoized(CacheKey::new(Endpoint::Catalog, email), || async {
            let mut conn = self.pool.get().await?;
            let books = catalog::list_books(&mut conn).await?;
            Ok::<_, LibraryError>(rating::rated_for(&mut conn, email, books).await?)
        })
        .await
    }

    /// Books currently held by `email`, with ratings. Memoized.
    ///
    /// # Errors
    /// Returns a storage or encoding error.
    pub async fn accessible_books(&self, email: &str) -> Result<Value, LibraryError> {
        self.memoized(CacheKey::new(Endpoint::AccessibleBooks, email), || async {
            let mut conn = self.pool.get().await?;
            let books = catalog::books_held_by(&mut conn, email).await?;
            Ok::<_, LibraryError>(rating::rated_for(&mut conn, email, books).await?)
        })
        .await
    }

    /// Sections with their rated books as seen by `email`. Memoized.
    ///
    /// # Errors
    /// Returns a storage or encoding error.
    pub async fn sections(&self, email: &str) -> Result<Value, LibraryError> {
        self.memoized(CacheKey::new(Endpoint::Sections, email), || async {
            let mut conn = self.pool.get().await?;
            let sections = catalog::list_sections(&mut conn).await?;
            let books = catalog::list_books(&mut conn).await?;
            let rated = rating::rated_for(&mut conn, email, books).await?;
            Ok::<_, LibraryError>(group_by_section(sections, rated, |r| r.book.section_id))
        })
        .await
    }

    /// Reader profile with read history. Memoized.
    ///
    /// # Errors
    /// [`LibraryError::NotFound`] for an unknown reader.
    pub async fn profile(&self, email: &str) -> Result<Value, LibraryError> {
        self.memoized(CacheKey::new(Endpoint::Profile, email), || async {
            let mut conn = self.pool.get().await?;
            let user = identity::get_user(&mut conn, email)
                .await?
                .ok_or(LibraryError::NotFound(Entity::User))?;
            let books = ledger::reads_for_user(&mut conn, email)
                .await?
                .into_iter()
                .map(|(book, on)| ReadEntry { book, on })
                .collect();
            Ok::<_, LibraryError>(Profile {
                user_name: user.nick_name.clone(),
                user: UserDetails::from(&user),
                books,
            })
        })
        .await
    }

    /// Overwrite a reader's editable profile fields.
    ///
    /// # Errors
    /// [`LibraryError::NotFound`] for an unknown reader.
    pub async fn edit_profile(&self, email: &str, update: &ProfileUpdate<'_>) -> Result<(), LibraryError> {
        let mut conn = self.pool.get().await?;
        if identity::update_profile(&mut conn, email, update).await? == 0 {
            return Err(LibraryError::NotFound(Entity::User));
        }
        drop(conn);
        self.invalidate(Mutation::ProfileEdited(email.to_owned())).await;
        Ok(())
    }

    /// Book search for readers, with ratings.
    ///
    /// # Errors
    /// Returns a storage error.
    pub async fn search_books_for(&self, email: &str, index: &str, key: &str) -> Result<Vec<RatedBook>, LibraryError> {
        let mut conn = self.pool.get().await?;
        let found = catalog::search_books(&mut conn, search_field(index, false), key).await?;
        Ok(rating::rated_for(&mut conn, email, found).await?)
    }

    /// Book search restricted to books `email` holds.
    ///
    /// # Errors
    /// Returns a storage error.
    pub async fn search_accessible(&self, email: &str, index: &str, key: &str) -> Result<Vec<RatedBook>, LibraryError> {
        let mut conn = self.pool.get().await?;
        let found: Vec<Book> = catalog::search_books(&mut conn, search_field(index, false), key)
            .await?
            .into_iter()
            .filter(|b| b.holder.as_deref() == Some(email))
            .collect();
        Ok(rating::rated_for(&mut conn, email, found).await?)
    }

    /// Section search for readers, with rated books.
    ///
    /// # Errors
    /// Returns a storage error.
    pub async fn search_sections_for(&self, email: &str, key: &str) -> Result<Vec<SectionBooks<RatedBook>>, LibraryError> {
        let mut conn = self.pool.get().await?;
        let sections = catalog::search_sections(&mut conn, key).await?;
        let books = catalog::list_books(&mut conn).await?;
        let rated = rating::rated_for(&mut conn, email, books).await?;
        Ok(group_by_section(sections, rated, |r| r.book.section_id))
    }

    /// Open a held book for reading.
    ///
    /// # Errors
    /// [`LibraryError::NotFound`] for an unknown book,
    /// [`PolicyViolation::NoAccess`] when `email` does not hold it.
    pub async fn read_book(&self, email: &str, book: i32) -> Result<Reading, LibraryError> {
        let mut conn = self.pool.get().await?;
        let found = catalog::get_book(&mut conn, book)
            .await?
            .ok_or(LibraryError::NotFound(Entity::Book))?;
        if found.holder.as_deref() != Some(email) {
            return Err(PolicyViolation::NoAccess.into());
        }
        Ok(Reading {
            url: found.file_name.as_ref().map(|f| format!("{BOOKS_DIR}/{f}")),
            book: found,
        })
    }

    /// Mark a held book as read.
    ///
    /// # Errors
    /// As for [`workflow::mark_read`].
    pub async fn mark_read(&self, email: &str, book: i32) -> Result<(), LibraryError> {
        let mut conn = self.pool.get().await?;
        workflow::mark_read(&mut conn, email, book, self.today()).await?;
        drop(conn);
        self.invalidate(Mutation::MarkedRead(email.to_owned())).await;
        Ok(())
    }

    /// Ask to borrow a book.
    ///
    /// # Errors
    /// As for [`workflow::request`].
    pub async fn request_book(&self, email: &str, book: i32) -> Result<(), LibraryError> {
        let mut conn = self.pool.get().await?;
        workflow::request(&mut conn, email, book, self.today()).await?;
        Ok(())
    }

    /// Give a held book back.
    ///
    /// # Errors
    /// As for [`workflow::return_book`].
    pub async fn return_book(&self, email: &str, book: i32) -> Result<(), LibraryError> {
        let mut conn = self.pool.get().await?;
        workflow::return_book(&mut conn, email, book).await?;
        drop(conn);
        self.invalidate(Mutation::Returned(email.to_owned())).await;
        Ok(())
    }

    /// Leave feedback on a book.
    ///
    /// # Errors
    /// As for [`workflow::submit_feedback`].
    pub async fn give_feedback(&self, email: &str, book: i32, input: FeedbackInput<'_>) -> Result<(), LibraryError> {
        let mut conn = self.pool.get().await?;
        workflow::submit_feedback(&mut conn, email, book, input, self.today()).await?;
        drop(conn);
        self.invalidate(Mutation::FeedbackSubmitted(email.to_owned())).await;
        Ok(())
    }

    /// Feedback left on one book.
    ///
    /// # Errors
    /// [`LibraryError::NotFound`] for an unknown book.
    pub async fn feedback_for(&self, book: i32) -> Result<Vec<FeedbackView>, LibraryError> {
        let mut conn = self.pool.get().await?;
        if catalog::get_book(&mut conn, book).await?.is_none() {
            return Err(LibraryError::NotFound(Entity::Book));
        }
        Ok(ledger::feedback_views(&mut conn, Some(book), None).await?)
    }

    /// Buy a book.
    ///
    /// # Errors
    /// As for [`workflow::purchase`].
    pub async fn purchase(&self, email: &str, book: i32) -> Result<(), LibraryError> {
        let mut conn = self.pool.get().await?;
        workflow::purchase(&mut conn, email, book).await?;
        drop(conn);
        self.invalidate(Mutation::Purchased(email.to_owned())).await;
        Ok(())
    }

    /// Locate the stored artifact of a purchased book.
    ///
    /// # Errors
    /// [`LibraryError::NotFound`] for an unknown book or one without a file,
    /// [`PolicyViolation::NoAccess`] when `email` does not own it.
    pub async fn download(&self, email: &str, book: i32) -> Result<Document, LibraryError> {
        let mut conn = self.pool.get().await?;
        let found = catalog::get_book(&mut conn, book)
            .await?
            .ok_or(LibraryError::NotFound(Entity::Book))?;
        if !ledger::owns(&mut conn, email, book).await? {
            return Err(PolicyViolation::NoAccess.into());
        }
        let file = found.file_name.ok_or(LibraryError::NotFound(Entity::Artifact))?;
        let path = self.data_dir.join(BOOKS_DIR).join(file);
        Ok(Document {
            content_type: content_type_for(&path),
            path,
        })
    }

    // ---- librarians ----

    /// Log a librarian in.
    ///
    /// # Errors
    /// [`LibraryError::Credentials`] naming which check failed.
    pub async fn login_librarian(&self, username: &str, password: &str) -> Result<Session<LibrarianDetails>, LibraryError> {
        let mut conn = self.pool.get().await?;
        let librarian = identity::get_librarian(&mut conn, username)
            .await?
            .ok_or(LibraryError::Credentials(CredentialFailure::UnknownAccount))?;
        if !verify_password(&librarian.password, password) {
            return Err(LibraryError::Credentials(CredentialFailure::WrongPassword));
        }
        let token = self.tokens.issue(username, Role::Librarian, self.now())?;
        info!(username, "librarian logged in");
        Ok(Session {
            token,
            details: LibrarianDetails {
                username: librarian.username,
                email: librarian.email,
            },
        })
    }

    /// Whether a librarian account exists.
    ///
    /// # Errors
    /// Returns a storage error.
    pub async fn librarian_exists(&self, username: &str) -> Result<bool, LibraryError> {
        let mut conn = self.pool.get().await?;
        Ok(identity::get_librarian(&mut conn, username).await?.is_some())
    }

    /// Mail address of a librarian account.
    ///
    /// # Errors
    /// [`LibraryError::NotFound`] for an unknown username.
    pub async fn librarian_email(&self, username: &str) -> Result<String, LibraryError> {
        let mut conn = self.pool.get().await?;
        identity::get_librarian(&mut conn, username)
            .await?
            .map(|librarian| librarian.email)
            .ok_or(LibraryError::NotFound(Entity::Librarian))
    }

    /// Create a librarian account.
    ///
    /// # Errors
    /// [`PolicyViolation::AccountExists`] when the username is taken.
    pub async fn create_librarian(&self, username: &str, password: &str, email: &str) -> Result<(), LibraryError> {
        let hashed = hash_password(&self.argon2, password)?;
        let mut conn = self.pool.get().await?;
        let created = identity::create_librarian(
            &mut conn,
            &NewLibrarian {
                username,
                password: &hashed,
                email,
            },
        )
        .await;
        match created {
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                Err(PolicyViolation::AccountExists.into())
            }
            other => other.map(|_| ()).map_err(Into::into),
        }
    }

    /// Every book. Memoized per librarian.
    ///
    /// # Errors
    /// Returns a storage or encoding error.
    pub async fn librarian_books(&self, username: &str) -> Result<Value, LibraryError> {
        self.memoized(CacheKey::new(Endpoint::LibrarianBooks, username), || async {
            let mut conn = self.pool.get().await?;
            Ok::<_, LibraryError>(catalog::list_books(&mut conn).await?)
        })
        .await
    }

    /// Every section with its books. Memoized per librarian.
    ///
    /// # Errors
    /// Returns a storage or encoding error.
    pub async fn librarian_sections(&self, username: &str) -> Result<Value, LibraryError> {
        self.memoized(CacheKey::new(Endpoint::LibrarianSections, username), || async {
            let mut conn = self.pool.get().await?;
            let sections = catalog::list_sections(&mut conn).await?;
            let books = catalog::list_books(&mut conn).await?;
            Ok::<_, LibraryError>(group_by_section(sections, books, |b| b.section_id))
        })
        .await
    }

    /// One book.
    ///
    /// # Errors
    /// [`LibraryError::NotFound`] for an unknown book.
    pub async fn book(&self, book: i32) -> Result<Book, LibraryError> {
        let mut conn = self.pool.get().await?;
        catalog::get_book(&mut conn, book)
            .await?
            .ok_or(LibraryError::NotFound(Entity::Book))
    }

    /// One section with its books.
    ///
    /// # Errors
    /// [`LibraryError::NotFound`] for an unknown section.
    pub async fn section(&self, section: i32) -> Result<SectionBooks<Book>, LibraryError> {
        let mut conn = self.pool.get().await?;
        let found = catalog::get_section(&mut conn, section)
            .await?
            .ok_or(LibraryError::NotFound(Entity::Section))?;
        let books = catalog::books_in_section(&mut conn, section).await?;
        Ok(SectionBooks { section: found, books })
    }

    /// Book search over title, author or holder.
    ///
    /// # Errors
    /// Returns a storage error.
    pub async fn search_books(&self, index: &str, key: &str) -> Result<Vec<Book>, LibraryError> {
        let mut conn = self.pool.get().await?;
        Ok(catalog::search_books(&mut conn, search_field(index, true), key).await?)
    }

    /// Section search by name.
    ///
    /// # Errors
    /// Returns a storage error.
    pub async fn search_sections(&self, key: &str) -> Result<Vec<Section>, LibraryError> {
        let mut conn = self.pool.get().await?;
        Ok(catalog::search_sections(&mut conn, key).await?)
    }

    async fn render_artifact(&self, title: &str, author: &str, content: &str) -> Result<String, LibraryError> {
        let html = self.renderer.book_html(title, author, content)?;
        let stem = format!("book-{}", uuid::Uuid::new_v4());
        let doc = self
            .renderer
            .write_document(&html, &self.data_dir.join(BOOKS_DIR), &stem)
            .await?;
        Ok(doc.file_name())
    }

    async fn discard_artifact(&self, file: &str) {
        let path = self.data_dir.join(BOOKS_DIR).join(file);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = %path.display(), %err, "failed to remove book artifact"),
        }
    }

    /// Add a book and render its artifact.
    ///
    /// # Errors
    /// [`LibraryError::NotFound`] for an unknown section.
    pub async fn add_book(&self, draft: BookDraft<'_>) -> Result<Book, LibraryError> {
        let mut conn = self.pool.get().await?;
        if catalog::get_section(&mut conn, draft.section_id).await?.is_none() {
            return Err(LibraryError::NotFound(Entity::Section));
        }
        let file = self.render_artifact(draft.title, draft.author, draft.content).await?;
        let created = catalog::create_book(
            &mut conn,
            &NewBook {
                title: draft.title,
                author: draft.author,
                content: draft.content,
                file_name: Some(&file),
                section_id: draft.section_id,
            },
        )
        .await;
        drop(conn);
        let book = match created {
            Ok(book) => book,
            Err(err) => {
                self.discard_artifact(&file).await;
                return Err(err.into());
            }
        };
        info!(book = book.id, title = %book.title, "book added");
        self.invalidate(Mutation::BookCreated).await;
        Ok(book)
    }

    /// Edit a book, re-rendering its artifact when the text changed.
    ///
    /// The new artifact is written before the row changes; the field update
    /// and the artifact swap then commit together or not at all.
    ///
    /// # Errors
    /// [`LibraryError::NotFound`] for an unknown book or target section.
    pub async fn modify_book(&self, book: i32, update: &BookUpdate<'_>) -> Result<Book, LibraryError> {
        let mut conn = self.pool.get().await?;
        if let Some(section) = update.section_id {
            if catalog::get_section(&mut conn, section).await?.is_none() {
                return Err(LibraryError::NotFound(Entity::Section));
            }
        }
        let current = catalog::get_book(&mut conn, book)
            .await?
            .ok_or(LibraryError::NotFound(Entity::Book))?;
        let text_changed = update.title.is_some() || update.author.is_some() || update.content.is_some();
        let rendered = if text_changed {
            let file = self
                .render_artifact(
                    update.title.unwrap_or(&current.title),
                    update.author.unwrap_or(&current.author),
                    update.content.unwrap_or(&current.content),
                )
                .await?;
            Some(file)
        } else {
            None
        };

        let file = rendered.clone();
        let saved = write_transaction::<_, LibraryError, _>(&mut conn, |conn| {
            Box::pin(async move {
                let mut updated = catalog::update_book(conn, book, update)
                    .await?
                    .ok_or(LibraryError::NotFound(Entity::Book))?;
                if let Some(name) = file {
                    catalog::set_book_file(conn, book, &name).await?;
                    updated.file_name = Some(name);
                }
                Ok(updated)
            })
        })
        .await;
        drop(conn);
        let updated = match saved {
            Ok(updated) => updated,
            Err(err) => {
                if let Some(file) = &rendered {
                    self.discard_artifact(file).await;
                }
                return Err(err);
            }
        };
        if let (Some(_), Some(old)) = (&rendered, &current.file_name) {
            self.discard_artifact(old).await;
        }
        self.invalidate(Mutation::BookUpdated).await;
        Ok(updated)
    }

    /// Remove a book with its feedback, ownership and read rows.
    ///
    /// # Errors
    /// [`LibraryError::NotFound`] for an unknown book.
    pub async fn remove_book(&self, book: i32) -> Result<(), LibraryError> {
        let mut conn = self.pool.get().await?;
        let removed = catalog::delete_book(&mut conn, book)
            .await?
            .ok_or(LibraryError::NotFound(Entity::Book))?;
        drop(conn);
        if let Some(file) = &removed.file_name {
            self.discard_artifact(file).await;
        }
        info!(book, "book removed");
        self.invalidate(Mutation::BookDeleted).await;
        Ok(())
    }

    /// Add a section.
    ///
    /// # Errors
    /// Returns a storage error.
    pub async fn add_section(&self, name: &str, description: &str) -> Result<Section, LibraryError> {
        let mut conn = self.pool.get().await?;
        let section = catalog::create_section(
            &mut conn,
            &NewSection {
                name,
                description,
                created_on: self.today(),
            },
        )
        .await?;
        drop(conn);
        self.invalidate(Mutation::SectionCreated).await;
        Ok(section)
    }

    /// Rename or redescribe a section.
    ///
    /// # Errors
    /// [`LibraryError::NotFound`] for an unknown section.
    pub async fn modify_section(&self, section: i32, update: &SectionUpdate<'_>) -> Result<Section, LibraryError> {
        let mut conn = self.pool.get().await?;
        let updated = catalog::update_section(&mut conn, section, update)
            .await?
            .ok_or(LibraryError::NotFound(Entity::Section))?;
        drop(conn);
        self.invalidate(Mutation::SectionUpdated).await;
        Ok(updated)
    }

    /// Remove a section, moving its books to the default section.
    ///
    /// # Errors
    /// [`PolicyViolation::DefaultSection`] for the default section,
    /// [`LibraryError::NotFound`] for an unknown one.
    pub async fn remove_section(&self, section: i32) -> Result<(), LibraryError> {
        if section == catalog::DEFAULT_SECTION_ID {
            return Err(PolicyViolation::DefaultSection.into());
        }
        let mut conn = self.pool.get().await?;
        let moved = catalog::delete_section(&mut conn, section)
            .await?
            .ok_or(LibraryError::NotFound(Entity::Section))?;
        drop(conn);
        info!(section, moved, "section removed");
        self.invalidate(Mutation::SectionDeleted).await;
        Ok(())
    }

    /// Take a book back from its holder.
    ///
    /// # Errors
    /// As for [`workflow::revoke`].
    pub async fn revoke(&self, book: i32) -> Result<String, LibraryError> {
        let mut conn = self.pool.get().await?;
        let holder = workflow::revoke(&mut conn, book).await?;
        drop(conn);
        self.invalidate(Mutation::BookRevoked).await;
        Ok(holder)
    }

    /// Approve or reject a pending request.
    ///
    /// # Errors
    /// As for [`workflow::approve`] and [`workflow::reject`].
    pub async fn process_request(&self, request: i32, decision: Decision) -> Result<(), LibraryError> {
        let mut conn = self.pool.get().await?;
        let today = self.today();
        let mutation = match decision {
            Decision::Approve => {
                workflow::approve(&mut conn, request, today).await?;
                Mutation::RequestApproved
            }
            Decision::Reject => {
                workflow::reject(&mut conn, request, today).await?;
                Mutation::RequestRejected
            }
        };
        drop(conn);
        self.invalidate(mutation).await;
        Ok(())
    }

    /// Pending requests with the current holder of each book.
    ///
    /// # Errors
    /// Returns a storage error.
    pub async fn pending_requests(&self) -> Result<Vec<RequestView>, LibraryError> {
        let mut conn = self.pool.get().await?;
        let pending = ledger::list_pending(&mut conn).await?;
        Ok(ledger::request_views(&mut conn, pending).await?)
    }

    /// Readers active within one reader-token lifetime.
    ///
    /// # Errors
    /// Returns a storage error.
    pub async fn active_users(&self) -> Result<Vec<UserDetails>, LibraryError> {
        let since = (self.now() - Role::User.token_lifetime()).naive_utc();
        let mut conn = self.pool.get().await?;
        Ok(identity::active_users(&mut conn, since)
            .await?
            .iter()
            .map(UserDetails::from)
            .collect())
    }

    /// `[issued, not issued]` book counts.
    ///
    /// # Errors
    /// Returns a storage error.
    pub async fn loan_chart(&self) -> Result<[i64; 2], LibraryError> {
        let mut conn = self.pool.get().await?;
        let total = catalog::count_books(&mut conn).await?;
        let issued = catalog::count_issued_books(&mut conn).await?;
        Ok([issued, total - issued])
    }

    /// Dashboard counters.
    ///
    /// # Errors
    /// Returns a storage error.
    pub async fn stats(&self) -> Result<Stats, LibraryError> {
        let mut conn = self.pool.get().await?;
        Ok(Stats {
            requests: ledger::count_requests(&mut conn, None).await?,
            arequests: ledger::count_requests(&mut conn, Some(RequestOutcome::Accepted)).await?,
            rrequests: ledger::count_requests(&mut conn, Some(RequestOutcome::Rejected)).await?,
            books: catalog::count_books(&mut conn).await?,
            sections: catalog::count_sections(&mut conn).await?,
        })
    }
}
