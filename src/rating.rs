//! Display ratings for book listings.
//!
//! Ratings are derived on every read from the feedback table; nothing here
//! is persisted.

use std::collections::{HashMap, HashSet};

use diesel::result::QueryResult;
use serde::Serialize;

use crate::{
    db::{DbConnection, ledger},
    models::Book,
};

/// A book as shown to a reader.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RatedBook {
    /// Catalog entry.
    #[serde(flatten)]
    pub book: Book,
    /// Mean feedback rating rounded to two decimals, `0` without feedback.
    pub rating: f64,
    /// Whether the viewing reader has bought the book.
    pub owner: bool,
}

/// Mean of `scores` rounded to two decimals; `0.0` for no scores.
#[must_use]
pub fn mean_rating(scores: &[i32]) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    let total: f64 = scores.iter().copied().map(f64::from).sum();
    let count = f64::from(u32::try_from(scores.len()).unwrap_or(u32::MAX));
    (total / count * 100.0).round() / 100.0
}

/// Attach ratings and ownership to `books` and order them by descending
/// rating. Books with equal ratings keep no particular order.
#[must_use]
pub fn rate_books<S: std::hash::BuildHasher>(
    books: Vec<Book>,
    ratings: &HashMap<i32, Vec<i32>, S>,
    owned: &HashSet<i32, S>,
) -> Vec<RatedBook> {
    let mut rated: Vec<RatedBook> = books
        .into_iter()
        .map(|book| RatedBook {
            rating: ratings.get(&book.id).map_or(0.0, |s| mean_rating(s)),
            owner: owned.contains(&book.id),
            book,
        })
        .collect();
    rated.sort_by(|a, b| b.rating.total_cmp(&a.rating));
    rated
}

/// Rate `books` as seen by `viewer`.
///
/// # Errors
/// Returns any error produced by the database.
#[must_use = "handle the result"]
pub async fn rated_for(
    conn: &mut DbConnection,
    viewer: &str,
    books: Vec<Book>,
) -> QueryResult<Vec<RatedBook>> {
    let ids: Vec<i32> = books.iter().map(|b| b.id).collect();
    let ratings = ledger::ratings_for_books(conn, &ids).await?;
    let owned: HashSet<i32> = ledger::owned_book_ids(conn, viewer)
        .await?
        .into_iter()
        .collect();
    Ok(rate_books(books, &ratings, &owned))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn book(id: i32) -> Book {
        Book {
            id,
            title: format!("Book {id}"),
            author: "Anon".to_owned(),
            content: String::new(),
            file_name: None,
            section_id: 0,
            holder: None,
            issue_date: None,
            due_date: None,
        }
    }

    #[rstest]
    #[case(&[], 0.0)]
    #[case(&[3, 5], 4.0)]
    #[case(&[1, 2, 2], 1.67)]
    #[case(&[5], 5.0)]
    fn averages_round_to_two_places(#[case] scores: &[i32], #[case] expected: f64) {
        assert!((mean_rating(scores) - expected).abs() < f64::EPSILON);
    }

    #[test]
    fn books_sort_by_descending_rating_with_owner_flag() {
        let ratings = HashMap::from([(1, vec![2]), (2, vec![3, 5]), (3, vec![1])]);
        let owned = HashSet::from([3]);
        let rated = rate_books(vec![book(1), book(2), book(3), book(4)], &ratings, &owned);

        let order: Vec<i32> = rated.iter().map(|r| r.book.id).collect();
        assert_eq!(order, vec![2, 1, 3, 4]);
        let unrated = rated.iter().find(|r| r.book.id == 4).expect("book 4");
        assert!(unrated.rating.abs() < f64::EPSILON);
        assert!(rated.iter().all(|r| r.owner == (r.book.id == 3)));
    }

    #[test]
    fn serialises_flat() {
        let rated = rate_books(vec![book(9)], &HashMap::new(), &HashSet::new());
        let json = serde_json::to_value(&rated).expect("encode");
        assert_eq!(json[0]["id"], 9);
        assert_eq!(json[0]["rating"], 0.0);
        assert_eq!(json[0]["owner"], false);
    }
}
