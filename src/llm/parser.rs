//! Response parsing for LLM outputs.
//!
//! Model replies are expected to carry a `<message>` segment and an optional `<sql>`
//! segment. Extraction is lenient; every consumer handles the "neither present" case.

use regex::Regex;
use std::sync::OnceLock;

/// Segments extracted from a raw model reply.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedResponse {
    /// Commentary shown to the user.
    pub message: Option<String>,
    /// Candidate SQL statement.
    pub sql: Option<String>,
}

struct Patterns {
    message: Regex,
    sql: Regex,
    fence_open: Regex,
    fence_close: Regex,
    trailing_terminator: Regex,
    line_comment: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let compile = |p: &str| Regex::new(p).expect("static pattern compiles");
        Patterns {
            message: compile(r"(?is)<message>(.*?)</message>"),
            sql: compile(r"(?is)<sql>(.*?)</sql>"),
            fence_open: compile(r"(?i)\A```(?:sql)?\s*\n?"),
            fence_close: compile(r"\n?```\s*\z"),
            trailing_terminator: compile(r";\s*\z"),
            line_comment: compile(r"(?m)^--.*$"),
        }
    })
}

/// Extracts the tagged segments. Empty segments count as absent; a reply with neither
/// segment is treated as bare SQL.
pub fn parse_llm_response(raw: &str) -> ParsedResponse {
    let p = patterns();
    let capture = |re: &Regex| {
        re.captures(raw)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty())
    };

    let message = capture(&p.message);
    let sql = capture(&p.sql);

    if message.is_none() && sql.is_none() {
        return ParsedResponse {
            message: None,
            sql: Some(raw.trim().to_string()),
        };
    }

    ParsedResponse { message, sql }
}

/// Removes a surrounding markdown fence and one trailing `;`.
pub fn clean_sql(sql: &str) -> String {
    let p = patterns();
    let unfenced = p.fence_open.replace(sql.trim(), "");
    let unfenced = p.fence_close.replace(&unfenced, "");
    let unterminated = p.trailing_terminator.replace(unfenced.trim(), "");
    unterminated.trim().to_string()
}

/// The statement with `--` comment lines removed. Empty when only comments remain.
pub fn strip_comment_lines(sql: &str) -> String {
    patterns().line_comment.replace_all(sql, "").trim().to_string()
}

/// First whitespace-delimited token, uppercased.
pub fn leading_keyword(sql: &str) -> Option<String> {
    sql.split_whitespace().next().map(str::to_uppercase)
}
