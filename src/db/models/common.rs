//! Common types and utilities shared across models.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, FromRow};

use crate::db::DbPool;

/// Declares a string-backed enum stored as TEXT, with `Display`, `FromStr`
/// (case-insensitive) and serde names matching the stored text.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $($(#[$vmeta])* #[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            /// Comma-separated list of accepted values, for error messages
            pub fn allowed() -> String {
                Self::ALL
                    .iter()
                    .map(|v| v.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    _ => Err(format!("Invalid value '{}'. Must be one of: {}", s, Self::allowed())),
                }
            }
        }
    };
}

pub(crate) use string_enum;

/// Query parameters for paginated list endpoints
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaginationQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl PaginationQuery {
    pub const DEFAULT_PER_PAGE: i64 = 20;
    pub const MAX_PER_PAGE: i64 = 100;

    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn per_page(&self) -> i64 {
        self.per_page
            .unwrap_or(Self::DEFAULT_PER_PAGE)
            .clamp(1, Self::MAX_PER_PAGE)
    }

    pub fn offset(&self) -> i64 {
        (self.page() - 1).saturating_mul(self.per_page())
    }
}

/// Optional inclusive `YYYY-MM-DD` bounds for summaries
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DateRangeQuery {
    pub from: Option<String>,
    pub to: Option<String>,
}

/// A page of results with totals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: i64, query: &PaginationQuery) -> Self {
        let per_page = query.per_page();
        Self {
            items,
            total,
            page: query.page(),
            per_page,
            total_pages: (total + per_page - 1) / per_page,
        }
    }
}

/// Dynamic WHERE clause built from optional filters, bound positionally
#[derive(Debug, Default, Clone)]
pub struct Filter {
    conditions: Vec<String>,
    bindings: Vec<String>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a condition with one `?` placeholder
    pub fn push(&mut self, condition: &str, value: impl Into<String>) -> &mut Self {
        self.conditions.push(condition.to_string());
        self.bindings.push(value.into());
        self
    }

    /// Add the condition only when a value is present
    pub fn push_opt(&mut self, condition: &str, value: Option<&str>) -> &mut Self {
        if let Some(value) = value {
            self.push(condition, value);
        }
        self
    }

    /// Add a condition without placeholders
    pub fn push_raw(&mut self, condition: &str) -> &mut Self {
        self.conditions.push(condition.to_string());
        self
    }

    pub fn where_clause(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.conditions.join(" AND "))
        }
    }

    pub fn bindings(&self) -> &[String] {
        &self.bindings
    }
}

/// Run a filtered, paginated listing.
///
/// `from` is the FROM/JOIN part of the query, `select` the column list and
/// `order_by` the ordering; the filter supplies the WHERE clause.
pub async fn fetch_page<T>(
    pool: &DbPool,
    select: &str,
    from: &str,
    order_by: &str,
    filter: &Filter,
    pagination: &PaginationQuery,
) -> Result<Page<T>, sqlx::Error>
where
    T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
{
    let where_clause = filter.where_clause();

    let count_sql = format!("SELECT COUNT(*) {} {}", from, where_clause);
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for binding in filter.bindings() {
        count_query = count_query.bind(binding);
    }
    let total = count_query.fetch_one(pool).await?;

    let sql = format!(
        "SELECT {} {} {} ORDER BY {} LIMIT ? OFFSET ?",
        select, from, where_clause, order_by
    );
    let mut query = sqlx::query_as::<_, T>(&sql);
    for binding in filter.bindings() {
        query = query.bind(binding);
    }
    let items = query
        .bind(pagination.per_page())
        .bind(pagination.offset())
        .fetch_all(pool)
        .await?;

    Ok(Page::new(items, total, pagination))
}

/// Parse a `YYYY-MM-DD` date
pub fn parse_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| format!("Invalid date '{}', expected YYYY-MM-DD", value))
}

/// Format a date the way it is stored
pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    string_enum! {
        pub enum Fruit {
            Apple => "apple",
            BloodOrange => "blood_orange",
        }
    }

    #[test]
    fn test_string_enum_round_trip() {
        assert_eq!("Apple".parse::<Fruit>(), Ok(Fruit::Apple));
        assert_eq!("blood_orange".parse::<Fruit>(), Ok(Fruit::BloodOrange));
        assert_eq!(Fruit::BloodOrange.to_string(), "blood_orange");
        assert_eq!(
            serde_json::to_string(&Fruit::BloodOrange).unwrap(),
            "\"blood_orange\""
        );
        let err = "kiwi".parse::<Fruit>().unwrap_err();
        assert!(err.contains("apple, blood_orange"));
    }

    #[test]
    fn test_pagination_clamps() {
        let q = PaginationQuery {
            page: Some(0),
            per_page: Some(1000),
        };
        assert_eq!(q.page(), 1);
        assert_eq!(q.per_page(), 100);
        assert_eq!(q.offset(), 0);

        let q = PaginationQuery {
            page: Some(3),
            per_page: Some(10),
        };
        assert_eq!(q.offset(), 20);

        let q = PaginationQuery {
            page: Some(i64::MAX),
            per_page: Some(50),
        };
        assert_eq!(q.offset(), i64::MAX);
    }

    #[test]
    fn test_page_total_pages() {
        let q = PaginationQuery {
            page: Some(1),
            per_page: Some(10),
        };
        assert_eq!(Page::new(Vec::<u8>::new(), 0, &q).total_pages, 0);
        assert_eq!(Page::new(Vec::<u8>::new(), 10, &q).total_pages, 1);
        assert_eq!(Page::new(Vec::<u8>::new(), 11, &q).total_pages, 2);
    }

    #[test]
    fn test_filter_where_clause() {
        let mut filter = Filter::new();
        assert_eq!(filter.where_clause(), "");
        filter
            .push("household_id = ?", "h1")
            .push_opt("status = ?", None)
            .push_opt("category = ?", Some("rent"))
            .push_raw("deleted_at IS NULL");
        assert_eq!(
            filter.where_clause(),
            "WHERE household_id = ? AND category = ? AND deleted_at IS NULL"
        );
        assert_eq!(filter.bindings(), ["h1".to_string(), "rent".to_string()]);
    }

    #[test]
    fn test_parse_date() {
        let d = parse_date("2024-02-29").unwrap();
        assert_eq!(format_date(d), "2024-02-29");
        assert!(parse_date("2023-02-29").is_err());
        assert!(parse_date("29/02/2024").is_err());
    }
}
