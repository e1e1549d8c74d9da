//! CSV export of the whole catalog and ledger.
//!
//! The file holds four blocks, each introduced by a title row and a header
//! row: Books, Sections, Requests and Feedbacks.

use std::{collections::HashMap, io::Write, path::Path};

use csv::WriterBuilder;

use super::ReportError;
use crate::models::{Book, FeedbackView, Request, Section};

/// Everything that goes into the export.
#[derive(Debug, Default)]
pub struct ExportData {
    /// Catalog books.
    pub books: Vec<Book>,
    /// Catalog sections.
    pub sections: Vec<Section>,
    /// All borrow requests.
    pub requests: Vec<Request>,
    /// All feedback.
    pub feedbacks: Vec<FeedbackView>,
}

fn text<T: ToString>(value: Option<T>) -> String { value.map(|v| v.to_string()).unwrap_or_default() }

/// Encode `data` as CSV into `out`.
///
/// # Errors
/// Returns [`ReportError::Csv`] if a record cannot be written.
pub fn write_export<W: Write>(out: W, data: &ExportData) -> Result<(), ReportError> {
    let mut writer = WriterBuilder::new().flexible(true).from_writer(out);

    writer.write_record(["Books"])?;
    writer.write_record([
        "ID",
        "Book Name",
        "Authors",
        "Section Id",
        "User_email",
        "Content",
        "Issue Date",
        "Return Date",
    ])?;
    for book in &data.books {
        writer.write_record([
            book.id.to_string(),
            book.title.clone(),
            book.author.clone(),
            book.section_id.to_string(),
            book.holder.clone().unwrap_or_default(),
            book.content.clone(),
            text(book.issue_date),
            text(book.due_date),
        ])?;
    }

    let mut per_section: HashMap<i32, usize> = HashMap::new();
    for book in &data.books {
        *per_section.entry(book.section_id).or_default() += 1;
    }
    writer.write_record(["Sections"])?;
    writer.write_record(["ID", "Name", "Description", "Number of Books"])?;
    for section in &data.sections {
        writer.write_record([
            section.id.to_string(),
            section.name.clone(),
            section.description.clone(),
            per_section.get(&section.id).copied().unwrap_or_default().to_string(),
        ])?;
    }

    writer.write_record(["Requests"])?;
    writer.write_record([
        "ID",
        "User_email",
        "Book Id",
        "Pending Status",
        "Opened On",
        "Closed On",
        "Outcome",
    ])?;
    for request in &data.requests {
        writer.write_record([
            request.id.to_string(),
            request.user_email.clone(),
            request.book_id.to_string(),
            request.pending.to_string(),
            request.opened_on.to_string(),
            text(request.closed_on),
            request.outcome.clone().unwrap_or_default(),
        ])?;
    }

    writer.write_record(["Feedbacks"])?;
    writer.write_record(["ID", "Book Name", "Rating", "Feedback", "User_email", "On"])?;
    for feedback in &data.feedbacks {
        writer.write_record([
            feedback.id.to_string(),
            feedback.book_name.clone(),
            feedback.rating.to_string(),
            feedback.feedback.clone(),
            feedback.user_name.clone(),
            feedback.on.to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

/// Write the export to `path`, replacing any previous file.
///
/// # Errors
/// Returns an error if the file cannot be created or encoded.
pub fn write_export_file(path: &Path, data: &ExportData) -> Result<(), ReportError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    write_export(file, data)
}
