//! The work performed by the recurring and on-demand jobs.

use std::path::PathBuf;

use anyhow::Context;
use chrono::NaiveDate;
use tracing::{info, warn};

use crate::{
    db::{catalog, identity, ledger},
    library::Library,
    mail::{Attachment, Email, Mailer},
    models::{Request, User},
    reminders,
    reports::{
        Document,
        LibrarianReport,
        ReadLine,
        RequestLine,
        UserReport,
        export::{ExportData, write_export_file},
        month_bounds,
    },
};

/// Directory under the data directory holding monthly reports.
pub const REPORTS_DIR: &str = "reports";

/// File name of the CSV export under the data directory.
pub const EXPORT_FILE: &str = "report.csv";

/// Counts of messages handed to the mailer by one reminder run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReminderSummary {
    /// Login reminders sent.
    pub login: usize,
    /// Return reminders sent.
    pub returns: usize,
}

fn stem(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .collect()
}

async fn attachment(doc: &Document) -> anyhow::Result<Attachment> {
    let body = tokio::fs::read(&doc.path)
        .await
        .with_context(|| format!("failed to read {}", doc.path.display()))?;
    Ok(Attachment {
        file_name: doc.file_name(),
        content_type: doc.content_type.to_owned(),
        body,
    })
}

async fn deliver(mailer: &dyn Mailer, email: Email) -> bool {
    let to = email.to.clone();
    match mailer.send(email).await {
        Ok(()) => true,
        Err(err) => {
            warn!(%to, %err, "failed to send email");
            false
        }
    }
}

fn request_line(request: &Request) -> RequestLine {
    let status = if request.pending {
        "pending".to_owned()
    } else {
        request.outcome.clone().unwrap_or_default()
    };
    RequestLine {
        id: request.id,
        user_email: request.user_email.clone(),
        book_id: request.book_id,
        opened_on: request.opened_on,
        status,
    }
}

/// Send a login reminder to every reader who has not visited today and a
/// return reminder to every holder of a due book.
///
/// Individual delivery failures are logged and skipped.
///
/// # Errors
/// Returns an error if the stores cannot be read.
pub async fn send_daily_reminders(library: &Library, mailer: &dyn Mailer) -> anyhow::Result<ReminderSummary> {
    let today = library.today();
    let mut conn = library
        .pool()
        .get()
        .await
        .context("failed to get db connection")?;
    let idle = reminders::unvisited_today(&mut conn, today)
        .await
        .context("failed to select idle readers")?;
    let due = reminders::due_today_or_overdue(&mut conn, today)
        .await
        .context("failed to select due books")?;
    drop(conn);

    let mut summary = ReminderSummary::default();
    for user in idle {
        let email = Email {
            to: user.email.clone(),
            subject: "Login Reminder".to_owned(),
            body: format!(
                "Hello {},\n\nYou have not visited the library today. Log in to see what is new.",
                user.nick_name
            ),
            attachment: None,
        };
        if deliver(mailer, email).await {
            summary.login += 1;
        }
    }
    for (holder, books) in due {
        let titles: Vec<String> = books
            .iter()
            .map(|b| format!("- {} (due {})", b.title, b.due_date.map(|d| d.to_string()).unwrap_or_default()))
            .collect();
        let email = Email {
            to: holder,
            subject: "Return Reminder".to_owned(),
            body: format!(
                "The following books are due for return:\n\n{}\n",
                titles.join("\n")
            ),
            attachment: None,
        };
        if deliver(mailer, email).await {
            summary.returns += 1;
        }
    }
    info!(login = summary.login, returns = summary.returns, "daily reminders sent");
    Ok(summary)
}

async fn user_report(library: &Library, user: &User, from: NaiveDate, to: NaiveDate) -> anyhow::Result<UserReport> {
    let mut conn = library.pool().get().await.context("failed to get db connection")?;
    let days_visited = identity::count_visits(&mut conn, &user.email, from, to).await?;
    let requests = ledger::requests_opened_between(&mut conn, Some(&user.email), from, to)
        .await?
        .len();
    let books: Vec<ReadLine> = ledger::reads_between(&mut conn, &user.email, from, to)
        .await?
        .into_iter()
        .map(|(book, on)| ReadLine {
            title: book.title,
            author: book.author,
            on,
        })
        .collect();
    Ok(UserReport {
        nick_name: user.nick_name.clone(),
        email: user.email.clone(),
        month_start: from,
        month_end: to,
        days_visited,
        requests,
        books_read: books.len(),
        books,
    })
}

/// Write and mail the monthly report of every reader and of the librarian.
///
/// Returns the documents written.
///
/// # Errors
/// Returns an error if the stores cannot be read or a report cannot be
/// rendered or written.
pub async fn send_monthly_reports(library: &Library, mailer: &dyn Mailer) -> anyhow::Result<Vec<PathBuf>> {
    let today = library.today();
    let (from, to) = month_bounds(today);
    let dir = library.data_dir().join(REPORTS_DIR);
    let mut written = Vec::new();

    let users = {
        let mut conn = library.pool().get().await.context("failed to get db connection")?;
        identity::list_users(&mut conn).await.context("failed to list readers")?
    };
    for user in &users {
        let report = user_report(library, user, from, to)
            .await
            .with_context(|| format!("failed to collect report for {}", user.email))?;
        let html = library.renderer().user_report_html(&report)?;
        let doc = library
            .renderer()
            .write_document(&html, &dir, &format!("{}{today}", stem(&user.nick_name)))
            .await?;
        let email = Email {
            to: user.email.clone(),
            subject: "Your Monthly Report".to_owned(),
            body: format!("Your activity report for {from} to {to} is attached."),
            attachment: Some(attachment(&doc).await?),
        };
        deliver(mailer, email).await;
        written.push(doc.path);
    }

    let mut conn = library.pool().get().await.context("failed to get db connection")?;
    let Some(librarian) = identity::first_librarian(&mut conn).await? else {
        info!("no librarian account; skipping librarian report");
        return Ok(written);
    };
    let report = LibrarianReport {
        month_start: from,
        month_end: to,
        book_count: catalog::count_books(&mut conn).await?,
        section_count: catalog::count_sections(&mut conn).await?,
        requests: ledger::requests_opened_between(&mut conn, None, from, to)
            .await?
            .iter()
            .map(request_line)
            .collect(),
        feedbacks: ledger::feedback_views(&mut conn, None, Some((from, to))).await?,
    };
    drop(conn);
    let html = library.renderer().librarian_report_html(&report)?;
    let doc = library
        .renderer()
        .write_document(&html, &dir, &format!("librarian{today}"))
        .await?;
    let email = Email {
        to: librarian.email,
        subject: "Monthly Report".to_owned(),
        body: format!("The library report for {from} to {to} is attached."),
        attachment: Some(attachment(&doc).await?),
    };
    deliver(mailer, email).await;
    written.push(doc.path);
    info!(count = written.len(), "monthly reports written");
    Ok(written)
}

/// Export the catalog and ledger as CSV and mail it to `recipient`.
///
/// # Errors
/// Returns an error if the stores cannot be read, the file cannot be
/// written, or the message cannot be delivered.
pub async fn export_csv(library: &Library, mailer: &dyn Mailer, recipient: &str) -> anyhow::Result<PathBuf> {
    let mut conn = library.pool().get().await.context("failed to get db connection")?;
    let data = ExportData {
        books: catalog::list_books(&mut conn).await?,
        sections: catalog::list_sections(&mut conn).await?,
        requests: ledger::list_requests(&mut conn).await?,
        feedbacks: ledger::feedback_views(&mut conn, None, None).await?,
    };
    drop(conn);

    let path = library.data_dir().join(EXPORT_FILE);
    write_export_file(&path, &data).context("failed to write CSV export")?;
    info!(path = %path.display(), recipient, "CSV export written");

    let body = tokio::fs::read(&path).await?;
    mailer
        .send(Email {
            to: recipient.to_owned(),
            subject: "Async CSV Generation output".to_owned(),
            body: "The requested CSV export is attached.".to_owned(),
            attachment: Some(Attachment {
                file_name: "output.csv".to_owned(),
                content_type: "text/csv".to_owned(),
                body,
            }),
        })
        .await
        .context("failed to mail CSV export")?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use argon2::{Algorithm, Argon2, Params, Version};
    use chrono::FixedOffset;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    use super::*;
    use crate::{
        db::{establish_pool, run_migrations},
        library::{BookDraft, LibrarySettings, Signup},
        mail::OutboxMailer,
        reports::Renderer,
    };

    struct Harness {
        library: Library,
        outbox: OutboxMailer,
        _dir: TempDir,
    }

    #[fixture]
    async fn harness() -> Harness {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = dir.path().join("jobs.db");
        let pool = establish_pool(db.to_str().expect("utf8 path"))
            .await
            .expect("pool");
        {
            let mut conn = pool.get().await.expect("connection");
            run_migrations(&mut conn).await.expect("migrations");
        }
        let settings = LibrarySettings {
            data_dir: dir.path().join("data"),
            utc_offset: FixedOffset::east_opt(0).expect("offset"),
            cache_capacity: 10,
            argon2: Argon2::new(
                Algorithm::Argon2id,
                Version::V0x13,
                Params::new(1024, 1, 1, None).expect("params"),
            ),
            jwt_secret: b"jobs".to_vec(),
        };
        let library = Library::new(pool, Renderer::new(None).expect("templates"), settings);
        library
            .signup(Signup {
                email: "ada@example.com",
                first_name: "Ada",
                last_name: None,
                phone: "1",
                nick_name: "ada/l",
                password: "pw",
            })
            .await
            .expect("signup");
        library
            .create_librarian("admin", "pw", "admin@example.com")
            .await
            .expect("librarian");
        Harness {
            library,
            outbox: OutboxMailer::new(),
            _dir: dir,
        }
    }

    #[test]
    fn stems_drop_path_characters() {
        assert_eq!(stem("ada/../x y"), "ada..xy");
    }

    #[rstest]
    #[tokio::test]
    async fn idle_readers_get_login_reminders(#[future] harness: Harness) {
        let h = harness.await;
        let summary = send_daily_reminders(&h.library, &h.outbox)
            .await
            .expect("reminders");
        assert_eq!(summary, ReminderSummary { login: 1, returns: 0 });

        h.library.login_user("ada@example.com", "pw").await.expect("login");
        let summary = send_daily_reminders(&h.library, &h.outbox)
            .await
            .expect("reminders");
        assert_eq!(summary.login, 0);
        let subjects: Vec<String> = h.outbox.sent().into_iter().map(|e| e.subject).collect();
        assert_eq!(subjects, vec!["Login Reminder".to_owned()]);
    }

    #[rstest]
    #[tokio::test]
    async fn monthly_reports_are_written_and_mailed(#[future] harness: Harness) {
        let h = harness.await;
        let written = send_monthly_reports(&h.library, &h.outbox)
            .await
            .expect("reports");
        let today = h.library.today();
        let names: Vec<String> = written
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        assert_eq!(
            names,
            vec![format!("adal{today}.html"), format!("librarian{today}.html")]
        );
        let sent = h.outbox.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().any(|e| e.to == "admin@example.com" && e.subject == "Monthly Report"));
        assert!(sent.iter().all(|e| e.attachment.is_some()));
    }

    #[rstest]
    #[tokio::test]
    async fn export_is_mailed_to_requesting_librarian(#[future] harness: Harness) {
        let h = harness.await;
        h.library
            .create_librarian("curator", "pw", "curator@example.com")
            .await
            .expect("second librarian");
        h.library
            .add_book(BookDraft {
                title: "Dune",
                author: "Herbert",
                content: "spice",
                section_id: 0,
            })
            .await
            .expect("book");
        let path = export_csv(&h.library, &h.outbox, "curator@example.com")
            .await
            .expect("export");
        let csv = tokio::fs::read_to_string(&path).await.expect("csv");
        assert!(csv.starts_with("Books\n"));
        assert!(csv.contains("Dune"));

        let sent = h.outbox.sent();
        assert_eq!(sent.len(), 1);
        let mail = sent.first().expect("one message");
        assert_eq!(mail.to, "curator@example.com");
        assert_eq!(
            mail.attachment.as_ref().map(|a| a.file_name.as_str()),
            Some("output.csv")
        );
    }
}
