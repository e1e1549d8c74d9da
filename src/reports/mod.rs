//! Monthly reports, generated book artifacts and the CSV export.
//!
//! Documents are rendered to HTML with [`upon`] templates. When a
//! `wkhtmltopdf` binary is found on `PATH` the HTML is converted to PDF;
//! otherwise the HTML file itself is the artifact.

use std::path::{Path, PathBuf};

use chrono::{Datelike, Days, NaiveDate};
use serde::Serialize;
use thiserror::Error;
use tokio::{fs, process::Command};
use tracing::{debug, info};
use upon::{Engine, Template};

use crate::models::FeedbackView;

pub mod export;

const USER_REPORT: &str = include_str!("../../templates/user_report.html");
const LIBRARIAN_REPORT: &str = include_str!("../../templates/librarian_report.html");
const BOOK: &str = include_str!("../../templates/book.html");

/// Failures while producing a report artifact.
#[derive(Debug, Error)]
pub enum ReportError {
    /// A template failed to compile or render.
    #[error("template error: {0}")]
    Template(#[from] upon::Error),
    /// Writing or reading an artifact failed.
    #[error("report I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The CSV encoder failed.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    /// The PDF converter exited unsuccessfully.
    #[error("wkhtmltopdf exited with {0}")]
    Convert(std::process::ExitStatus),
}

/// A file written to disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Document {
    /// Location of the file.
    pub path: PathBuf,
    /// MIME type of the file.
    pub content_type: &'static str,
}

impl Document {
    /// File name component of [`Document::path`].
    #[must_use]
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// One book line of a reader report.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ReadLine {
    /// Book title.
    pub title: String,
    /// Book authors.
    pub author: String,
    /// Date the book was marked read.
    pub on: NaiveDate,
}

/// Context of a reader's monthly report.
#[derive(Serialize, Debug, Clone)]
pub struct UserReport {
    /// Reader display name.
    pub nick_name: String,
    /// Reader email.
    pub email: String,
    /// First day of the period.
    pub month_start: NaiveDate,
    /// Last day of the period.
    pub month_end: NaiveDate,
    /// Days with at least one login.
    pub days_visited: i64,
    /// Borrow requests opened in the period.
    pub requests: usize,
    /// Number of read-marks in the period.
    pub books_read: usize,
    /// Books marked read in the period.
    pub books: Vec<ReadLine>,
}

/// One request line of the librarian report.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    /// Request id.
    pub id: i32,
    /// Requesting reader.
    pub user_email: String,
    /// Requested book.
    pub book_id: i32,
    /// Day the request was opened.
    pub opened_on: NaiveDate,
    /// `pending`, `accepted` or `rejected`.
    pub status: String,
}

/// Context of the librarian's monthly report.
#[derive(Serialize, Debug, Clone)]
pub struct LibrarianReport {
    /// First day of the period.
    pub month_start: NaiveDate,
    /// Last day of the period.
    pub month_end: NaiveDate,
    /// Books in the catalog.
    pub book_count: i64,
    /// Sections in the catalog.
    pub section_count: i64,
    /// Requests opened in the period.
    pub requests: Vec<RequestLine>,
    /// Feedback given in the period.
    pub feedbacks: Vec<FeedbackView>,
}

#[derive(Serialize)]
struct BookPage<'a> {
    title: &'a str,
    authors: &'a str,
    content: &'a str,
}

/// First and last day of the month containing `day`.
#[must_use]
pub fn month_bounds(day: NaiveDate) -> (NaiveDate, NaiveDate) {
    let first = day.with_day(1).unwrap_or(day);
    let last = first
        .checked_add_months(chrono::Months::new(1))
        .and_then(|next| next.checked_sub_days(Days::new(1)))
        .unwrap_or(day);
    (first, last)
}

/// Renders report templates and writes the resulting documents.
pub struct Renderer {
    engine: Engine<'static>,
    user_report: Template<'static>,
    librarian_report: Template<'static>,
    book: Template<'static>,
    converter: Option<PathBuf>,
}

impl Renderer {
    /// Compile the built-in templates. `converter` is the `wkhtmltopdf`
    /// binary to use, if any.
    ///
    /// # Errors
    /// Returns [`ReportError::Template`] if a template fails to compile.
    pub fn new(converter: Option<PathBuf>) -> Result<Self, ReportError> {
        let mut engine = Engine::new();
        engine.set_default_formatter(&upon::fmt::escape_html);
        let user_report = engine.compile(USER_REPORT)?;
        let librarian_report = engine.compile(LIBRARIAN_REPORT)?;
        let book = engine.compile(BOOK)?;
        Ok(Self {
            engine,
            user_report,
            librarian_report,
            book,
            converter,
        })
    }

    /// Like [`Renderer::new`], looking `wkhtmltopdf` up on `PATH`.
    ///
    /// # Errors
    /// Returns [`ReportError::Template`] if a template fails to compile.
    pub fn discover() -> Result<Self, ReportError> {
        let converter = which::which("wkhtmltopdf").ok();
        match &converter {
            Some(path) => info!(converter = %path.display(), "PDF conversion enabled"),
            None => info!("wkhtmltopdf not found in PATH; reports will be written as HTML"),
        }
        Self::new(converter)
    }

    /// Render a reader report to HTML.
    ///
    /// # Errors
    /// Returns [`ReportError::Template`] if rendering fails.
    pub fn user_report_html(&self, report: &UserReport) -> Result<String, ReportError> {
        Ok(self.user_report.render(&self.engine, report).to_string()?)
    }

    /// Render the librarian report to HTML.
    ///
    /// # Errors
    /// Returns [`ReportError::Template`] if rendering fails.
    pub fn librarian_report_html(&self, report: &LibrarianReport) -> Result<String, ReportError> {
        Ok(self.librarian_report.render(&self.engine, report).to_string()?)
    }

    /// Render the page stored for a catalog book.
    ///
    /// # Errors
    /// Returns [`ReportError::Template`] if rendering fails.
    pub fn book_html(&self, title: &str, authors: &str, content: &str) -> Result<String, ReportError> {
        let page = BookPage {
            title,
            authors,
            content,
        };
        Ok(self.book.render(&self.engine, &page).to_string()?)
    }

    /// Write `html` as `<dir>/<stem>.pdf`, or as `<dir>/<stem>.html` when no
    /// converter is available.
    ///
    /// # Errors
    /// Returns an error if the directory or file cannot be written or the
    /// converter fails.
    pub async fn write_document(&self, html: &str, dir: &Path, stem: &str) -> Result<Document, ReportError> {
        fs::create_dir_all(dir).await?;
        let html_path = dir.join(format!("{stem}.html"));
        fs::write(&html_path, html).await?;
        let Some(converter) = &self.converter else {
            debug!(path = %html_path.display(), "wrote HTML document");
            return Ok(Document {
                path: html_path,
                content_type: "text/html",
            });
        };
        let pdf_path = dir.join(format!("{stem}.pdf"));
        let status = Command::new(converter)
            .arg("--quiet")
            .arg(&html_path)
            .arg(&pdf_path)
            .status()
            .await?;
        if !status.success() {
            return Err(ReportError::Convert(status));
        }
        fs::remove_file(&html_path).await?;
        debug!(path = %pdf_path.display(), "wrote PDF document");
        Ok(Document {
            path: pdf_path,
            content_type: "application/pdf",
        })
    }
}
