//! Typed lead predicates and ordering, rendered to parameterized SQL.
//!
//! The lead list query is a flat AND of clauses. Each clause is one of a small
//! closed set of shapes, so both backends render identical SQL apart from the
//! placeholder syntax.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Projection shared by every lead read. Columns are positional; see the
/// backends' row mappers.
pub(crate) const LEAD_SELECT_FROM: &str = "SELECT u.id, u.name, u.email, u.company_name, u.role, \
     u.lead_status, u.lead_priority, u.lead_source, u.department, \
     u.min_ticket_size, u.max_ticket_size, \
     u.lead_responsible_id, r.name, u.lead_main_contact_id, mc.name, \
     u.last_contact_date, u.next_follow_up_date, u.created_at, u.updated_at \
     FROM users u \
     LEFT JOIN users r ON r.id = u.lead_responsible_id \
     LEFT JOIN users mc ON mc.id = u.lead_main_contact_id";

/// Lead columns a clause or ordering may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Id,
    Role,
    Name,
    Email,
    CompanyName,
    LeadStatus,
    LeadPriority,
    LeadSource,
    Department,
    LeadResponsibleId,
    LeadMainContactId,
    MinTicketSize,
    MaxTicketSize,
    LastContactDate,
    CreatedAt,
}

impl Column {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Id => "u.id",
            Self::Role => "u.role",
            Self::Name => "u.name",
            Self::Email => "u.email",
            Self::CompanyName => "u.company_name",
            Self::LeadStatus => "u.lead_status",
            Self::LeadPriority => "u.lead_priority",
            Self::LeadSource => "u.lead_source",
            Self::Department => "u.department",
            Self::LeadResponsibleId => "u.lead_responsible_id",
            Self::LeadMainContactId => "u.lead_main_contact_id",
            Self::MinTicketSize => "u.min_ticket_size",
            Self::MaxTicketSize => "u.max_ticket_size",
            Self::LastContactDate => "u.last_contact_date",
            Self::CreatedAt => "u.created_at",
        }
    }
}

/// A bound parameter. Backends convert these into their native types.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
}

/// One predicate over lead columns.
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    Equals {
        column: Column,
        value: SqlValue,
    },
    /// Inclusive on both ends; a missing bound is omitted.
    Range {
        column: Column,
        from: Option<SqlValue>,
        to: Option<SqlValue>,
    },
    /// Case-insensitive substring match.
    Contains { column: Column, needle: String },
    OrGroup(Vec<Clause>),
}

/// Conjunction of clauses applied to the lead list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeadFilter {
    clauses: Vec<Clause>,
}

/// Placeholder syntax of the target backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    /// `$1`, `$2`, ... (PostgreSQL)
    Dollar,
    /// `?1`, `?2`, ... (SQLite / libSQL)
    Question,
}

/// Rendered SQL condition with its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlFragment {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl LeadFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, clause: Clause) {
        self.clauses.push(clause);
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// Render the filter as a `WHERE` body. An empty filter renders `1 = 1`.
    pub fn to_sql(&self, placeholder: Placeholder) -> SqlFragment {
        let mut renderer = Renderer {
            placeholder,
            params: Vec::new(),
        };
        let parts: Vec<String> = self
            .clauses
            .iter()
            .filter_map(|clause| renderer.clause(clause))
            .collect();
        let sql = if parts.is_empty() {
            "1 = 1".to_string()
        } else {
            parts.join(" AND ")
        };
        SqlFragment {
            sql,
            params: renderer.params,
        }
    }
}

struct Renderer {
    placeholder: Placeholder,
    params: Vec<SqlValue>,
}

impl Renderer {
    fn bind(&mut self, value: SqlValue) -> String {
        self.params.push(value);
        let idx = self.params.len();
        match self.placeholder {
            Placeholder::Dollar => format!("${idx}"),
            Placeholder::Question => format!("?{idx}"),
        }
    }

    fn clause(&mut self, clause: &Clause) -> Option<String> {
        match clause {
            Clause::Equals { column, value } => {
                let p = self.bind(value.clone());
                Some(format!("{} = {p}", column.as_sql()))
            }
            Clause::Range { column, from, to } => {
                let mut bounds = Vec::with_capacity(2);
                if let Some(from) = from {
                    let p = self.bind(from.clone());
                    bounds.push(format!("{} >= {p}", column.as_sql()));
                }
                if let Some(to) = to {
                    let p = self.bind(to.clone());
                    bounds.push(format!("{} <= {p}", column.as_sql()));
                }
                match bounds.len() {
                    0 => None,
                    1 => bounds.pop(),
                    _ => Some(format!("({})", bounds.join(" AND "))),
                }
            }
            Clause::Contains { column, needle } => {
                let p = self.bind(SqlValue::Text(like_pattern(needle)));
                // Both sides fold in SQL so the backend's LOWER() applies to each.
                Some(format!(
                    "LOWER({}) LIKE LOWER({p}) ESCAPE '\\'",
                    column.as_sql()
                ))
            }
            Clause::OrGroup(members) => {
                let parts: Vec<String> =
                    members.iter().filter_map(|m| self.clause(m)).collect();
                if parts.is_empty() {
                    None
                } else {
                    Some(format!("({})", parts.join(" OR ")))
                }
            }
        }
    }
}

/// `%needle%` with LIKE metacharacters escaped.
fn like_pattern(needle: &str) -> String {
    let mut out = String::with_capacity(needle.len() + 2);
    out.push('%');
    for ch in needle.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('%');
    out
}

/// Sortable lead fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LeadSortField {
    #[default]
    LastContactDate,
    CreatedAt,
    Name,
    MinTicketSize,
    MaxTicketSize,
}

impl LeadSortField {
    pub fn column(self) -> Column {
        match self {
            Self::LastContactDate => Column::LastContactDate,
            Self::CreatedAt => Column::CreatedAt,
            Self::Name => Column::Name,
            Self::MinTicketSize => Column::MinTicketSize,
            Self::MaxTicketSize => Column::MaxTicketSize,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

/// Ordering for the lead page fetch.
///
/// NULL sorts as the smallest value and `id` breaks ties in the same
/// direction, so `Desc` is the exact reverse of `Asc` and pages are stable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LeadOrder {
    pub field: LeadSortField,
    pub direction: SortDirection,
}

impl LeadOrder {
    /// `ORDER BY` clause for the backend that uses `placeholder`. SQLite keeps
    /// ticket sizes as decimal TEXT, so those sort through a numeric cast.
    pub fn to_sql(&self, placeholder: Placeholder) -> String {
        let column = match (placeholder, self.field.column()) {
            (Placeholder::Question, c @ (Column::MinTicketSize | Column::MaxTicketSize)) => {
                format!("CAST({} AS REAL)", c.as_sql())
            }
            (_, c) => c.as_sql().to_string(),
        };
        let id = Column::Id.as_sql();
        match self.direction {
            SortDirection::Asc => format!("ORDER BY {column} ASC NULLS FIRST, {id} ASC"),
            SortDirection::Desc => format!("ORDER BY {column} DESC NULLS LAST, {id} DESC"),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn empty_filter_renders_tautology() {
        let fragment = LeadFilter::new().to_sql(Placeholder::Dollar);
        assert_eq!(fragment.sql, "1 = 1");
        assert!(fragment.params.is_empty());
    }

    #[test]
    fn clauses_are_anded_and_placeholders_numbered_in_order() {
        let mut filter = LeadFilter::new();
        filter.push(Clause::Equals {
            column: Column::Role,
            value: SqlValue::Text("USER".into()),
        });
        filter.push(Clause::OrGroup(vec![
            Clause::Contains {
                column: Column::Name,
                needle: "Acme".into(),
            },
            Clause::Contains {
                column: Column::Email,
                needle: "Acme".into(),
            },
        ]));

        let fragment = filter.to_sql(Placeholder::Question);
        assert_eq!(
            fragment.sql,
            "u.role = ?1 AND (LOWER(u.name) LIKE LOWER(?2) ESCAPE '\\' OR LOWER(u.email) LIKE LOWER(?3) ESCAPE '\\')"
        );
        assert_eq!(
            fragment.params,
            vec![
                SqlValue::Text("USER".into()),
                SqlValue::Text("%Acme%".into()),
                SqlValue::Text("%Acme%".into()),
            ]
        );
    }

    #[test]
    fn range_omits_missing_bounds() {
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut filter = LeadFilter::new();
        filter.push(Clause::Range {
            column: Column::LastContactDate,
            from: Some(SqlValue::Timestamp(from)),
            to: None,
        });
        filter.push(Clause::Range {
            column: Column::CreatedAt,
            from: None,
            to: None,
        });

        let fragment = filter.to_sql(Placeholder::Dollar);
        assert_eq!(fragment.sql, "u.last_contact_date >= $1");
        assert_eq!(fragment.params, vec![SqlValue::Timestamp(from)]);
    }

    #[test]
    fn range_with_both_bounds_is_parenthesized() {
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 1, 31, 23, 59, 59).unwrap();
        let mut filter = LeadFilter::new();
        filter.push(Clause::Range {
            column: Column::LastContactDate,
            from: Some(SqlValue::Timestamp(from)),
            to: Some(SqlValue::Timestamp(to)),
        });
        assert_eq!(
            filter.to_sql(Placeholder::Dollar).sql,
            "(u.last_contact_date >= $1 AND u.last_contact_date <= $2)"
        );
    }

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("50%_Off\\"), "%50\\%\\_Off\\\\%");
    }

    #[test]
    fn empty_or_group_is_dropped() {
        let mut filter = LeadFilter::new();
        filter.push(Clause::OrGroup(Vec::new()));
        assert_eq!(filter.to_sql(Placeholder::Dollar).sql, "1 = 1");
    }

    #[test]
    fn descending_order_mirrors_ascending() {
        let asc = LeadOrder {
            field: LeadSortField::Name,
            direction: SortDirection::Asc,
        };
        let desc = LeadOrder {
            field: LeadSortField::Name,
            direction: SortDirection::Desc,
        };
        assert_eq!(
            asc.to_sql(Placeholder::Dollar),
            "ORDER BY u.name ASC NULLS FIRST, u.id ASC"
        );
        assert_eq!(
            desc.to_sql(Placeholder::Dollar),
            "ORDER BY u.name DESC NULLS LAST, u.id DESC"
        );
    }

    #[test]
    fn ticket_sizes_sort_numerically_on_sqlite() {
        let order = LeadOrder {
            field: LeadSortField::MaxTicketSize,
            direction: SortDirection::Asc,
        };
        assert_eq!(
            order.to_sql(Placeholder::Question),
            "ORDER BY CAST(u.max_ticket_size AS REAL) ASC NULLS FIRST, u.id ASC"
        );
        assert_eq!(
            order.to_sql(Placeholder::Dollar),
            "ORDER BY u.max_ticket_size ASC NULLS FIRST, u.id ASC"
        );
    }

    #[test]
    fn default_order_is_last_contact_descending() {
        assert_eq!(
            LeadOrder::default().to_sql(Placeholder::Question),
            "ORDER BY u.last_contact_date DESC NULLS LAST, u.id DESC"
        );
    }

    #[test]
    fn sort_field_deserializes_from_camel_case() {
        let field: LeadSortField = serde_json::from_str("\"minTicketSize\"").expect("parse");
        assert_eq!(field, LeadSortField::MinTicketSize);
        assert!(serde_json::from_str::<LeadSortField>("\"email\"").is_err());
    }
}
