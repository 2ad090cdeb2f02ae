//! Table, join and category extraction for remembered queries.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Topic a remembered query is filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryCategory {
    Funnel,
    Billing,
    Cases,
    Leads,
    Clients,
    Staff,
    Courts,
    #[default]
    General,
}

/// When tables from several categories appear, the earliest entry wins.
const CATEGORY_PRIORITY: [QueryCategory; 8] = [
    QueryCategory::Funnel,
    QueryCategory::Billing,
    QueryCategory::Courts,
    QueryCategory::Staff,
    QueryCategory::Leads,
    QueryCategory::Cases,
    QueryCategory::Clients,
    QueryCategory::General,
];

impl QueryCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Funnel => "funnel",
            Self::Billing => "billing",
            Self::Cases => "cases",
            Self::Leads => "leads",
            Self::Clients => "clients",
            Self::Staff => "staff",
            Self::Courts => "courts",
            Self::General => "general",
        }
    }

    /// Heading used in the prompt enrichment block.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Funnel => "Sales Funnel",
            Self::Billing => "Billing & Invoices",
            Self::Cases => "Cases & Services",
            Self::Leads => "Leads & Contact Requests",
            Self::Clients => "Clients & Persons",
            Self::Staff => "Staff & Attorneys",
            Self::Courts => "Courts & Hearings",
            Self::General => "General",
        }
    }

    fn for_table(table: &str) -> Option<Self> {
        let category = match table {
            "sales_funnels" | "campaigns" => Self::Funnel,
            "invoices" | "receipts" | "receipt_allocations" | "payment_plans" | "fees" => {
                Self::Billing
            }
            "cases" | "services" | "service_types" => Self::Cases,
            "contact_requests" | "appointments" => Self::Leads,
            "persons" | "phones" => Self::Clients,
            "users" => Self::Staff,
            "courts" | "judges" | "court_dates" => Self::Courts,
            _ => return None,
        };
        Some(category)
    }
}

impl FromStr for QueryCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CATEGORY_PRIORITY
            .iter()
            .copied()
            .find(|c| c.as_str() == s.to_lowercase())
            .ok_or_else(|| format!("Unknown query category: {s}"))
    }
}

impl fmt::Display for QueryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn table_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(?:FROM|JOIN)\s+`?(\w+)`?").expect("static pattern compiles")
    })
}

fn join_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)ON\s+`?(\w+)`?\.\w+\s*=\s*`?(\w+)`?\.\w+").expect("static pattern compiles")
    })
}

fn push_unique(values: &mut Vec<String>, value: String) {
    if !values.contains(&value) {
        values.push(value);
    }
}

/// Lowercased table names following `FROM` or `JOIN`, in first-seen order.
pub fn extract_tables(sql: &str) -> Vec<String> {
    let mut tables = Vec::new();
    for caps in table_pattern().captures_iter(sql) {
        push_unique(&mut tables, caps[1].to_lowercase());
    }
    tables
}

/// Join pairs from `ON a.x = b.y` conditions, each written `a→b` with the names sorted.
pub fn extract_joins(sql: &str) -> Vec<String> {
    let mut joins = Vec::new();
    for caps in join_pattern().captures_iter(sql) {
        let left = caps[1].to_lowercase();
        let right = caps[2].to_lowercase();
        let pair = if left < right {
            format!("{left}→{right}")
        } else {
            format!("{right}→{left}")
        };
        push_unique(&mut joins, pair);
    }
    joins
}

/// Picks the highest-priority category among the tables a query touches.
pub fn detect_category(tables: &[String]) -> QueryCategory {
    let hits: Vec<QueryCategory> = tables
        .iter()
        .filter_map(|t| QueryCategory::for_table(t))
        .collect();

    CATEGORY_PRIORITY
        .iter()
        .copied()
        .find(|c| hits.contains(c))
        .unwrap_or_default()
}
