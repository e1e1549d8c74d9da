//! Row types for the catalog, identity and possession stores.

use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::{books, feedback, librarians, owners, reads, requests, sections, users, visits};

/// Reader account. The password hash never leaves the crate in responses;
/// serialise [`UserDetails`] instead.
#[derive(Queryable, Selectable, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = users)]
pub struct User {
    pub email: String,
    pub nick_name: String,
    pub first_name: String,
    pub last_name: Option<String>,
    pub phone: String,
    pub password: String,
    pub about: Option<String>,
    pub last_active_at: Option<NaiveDateTime>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = users)]
pub struct NewUser<'a> {
    pub email: &'a str,
    pub nick_name: &'a str,
    pub first_name: &'a str,
    pub last_name: Option<&'a str>,
    pub phone: &'a str,
    pub password: &'a str,
}

/// Editable profile columns.
#[derive(AsChangeset, Debug)]
#[diesel(table_name = users, treat_none_as_null = true)]
pub struct ProfileUpdate<'a> {
    pub nick_name: &'a str,
    pub first_name: &'a str,
    pub last_name: Option<&'a str>,
    pub phone: &'a str,
    pub about: Option<&'a str>,
}

/// Public view of a [`User`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UserDetails {
    pub email: String,
    pub nick_name: String,
    pub phone_number: String,
    pub about: Option<String>,
    pub first_name: String,
    pub last_name: Option<String>,
}

impl From<&User> for UserDetails {
    fn from(user: &User) -> Self {
        Self {
            email: user.email.clone(),
            nick_name: user.nick_name.clone(),
            phone_number: user.phone.clone(),
            about: user.about.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
        }
    }
}

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = librarians)]
pub struct Librarian {
    pub username: String,
    pub password: String,
    pub email: String,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = librarians)]
pub struct NewLibrarian<'a> {
    pub username: &'a str,
    pub password: &'a str,
    pub email: &'a str,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = visits)]
pub struct NewVisit<'a> {
    pub user_email: &'a str,
    pub visited_on: NaiveDate,
}

#[derive(Queryable, Selectable, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = sections)]
pub struct Section {
    pub id: i32,
    pub name: String,
    pub description: String,
    pub created_on: NaiveDate,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = sections)]
pub struct NewSection<'a> {
    pub name: &'a str,
    pub description: &'a str,
    pub created_on: NaiveDate,
}

#[derive(AsChangeset, Debug)]
#[diesel(table_name = sections)]
pub struct SectionUpdate<'a> {
    pub name: &'a str,
    pub description: &'a str,
}

/// Catalog entry. `holder`, `issue_date` and `due_date` are owned by the
/// borrow workflow; the dates are always set and cleared together.
#[derive(Queryable, Selectable, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = books)]
pub struct Book {
    pub id: i32,
    pub title: String,
    pub author: String,
    pub content: String,
    pub file_name: Option<String>,
    pub section_id: i32,
    pub holder: Option<String>,
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = books)]
pub struct NewBook<'a> {
    pub title: &'a str,
    pub author: &'a str,
    pub content: &'a str,
    pub file_name: Option<&'a str>,
    pub section_id: i32,
}

/// Librarian-editable book columns. Possession columns are deliberately
/// absent.
#[derive(AsChangeset, Debug, Default)]
#[diesel(table_name = books)]
pub struct BookUpdate<'a> {
    pub title: Option<&'a str>,
    pub author: Option<&'a str>,
    pub content: Option<&'a str>,
    pub section_id: Option<i32>,
}

/// Final state of a closed borrow request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestOutcome {
    Accepted,
    Rejected,
}

impl RequestOutcome {
    /// Column representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }

    /// Parse the column representation.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

#[derive(Queryable, Selectable, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = requests)]
pub struct Request {
    pub id: i32,
    pub user_email: String,
    pub book_id: i32,
    pub pending: bool,
    pub opened_on: NaiveDate,
    pub closed_on: Option<NaiveDate>,
    pub outcome: Option<String>,
}

impl Request {
    /// Parsed outcome, `None` while the request is pending.
    #[must_use]
    pub fn outcome(&self) -> Option<RequestOutcome> {
        self.outcome.as_deref().and_then(RequestOutcome::parse)
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = requests)]
pub struct NewRequest<'a> {
    pub user_email: &'a str,
    pub book_id: i32,
    pub pending: bool,
    pub opened_on: NaiveDate,
}

/// A request together with the current holder of its book.
///
/// `held_by` is empty when the book is unissued or has been deleted.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct RequestView {
    #[serde(flatten)]
    pub request: Request,
    pub held_by: String,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = owners)]
pub struct NewOwner<'a> {
    pub user_email: &'a str,
    pub book_id: i32,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = reads)]
pub struct NewRead<'a> {
    pub user_email: &'a str,
    pub book_id: i32,
    pub read_on: NaiveDate,
}

#[derive(Queryable, Selectable, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = feedback)]
pub struct Feedback {
    pub id: i32,
    pub book_id: i32,
    pub user_email: String,
    pub rating: i32,
    pub comment: String,
    pub given_on: NaiveDate,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = feedback)]
pub struct NewFeedback<'a> {
    pub book_id: i32,
    pub user_email: &'a str,
    pub rating: i32,
    pub comment: &'a str,
    pub given_on: NaiveDate,
}

/// A feedback row with the title of the book it refers to.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct FeedbackView {
    pub id: i32,
    pub book_name: String,
    pub rating: i32,
    pub feedback: String,
    pub user_name: String,
    pub on: NaiveDate,
}
