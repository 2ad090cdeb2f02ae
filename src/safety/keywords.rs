//! Text-level screens that run before the SQL parser.
//!
//! These work on raw text so they also catch constructs the parser would accept
//! in a lenient dialect mode (vendor procedure calls, file exfiltration functions).

use regex::Regex;
use std::sync::OnceLock;

/// Ordered blocklist: (pattern, name reported to the caller).
const FORBIDDEN: &[(&str, &str)] = &[
    (r"(?i)\b(INSERT)\b", "INSERT"),
    (r"(?i)\b(UPDATE)\b", "UPDATE"),
    (r"(?i)\b(DELETE)\b", "DELETE"),
    (r"(?i)\b(DROP)\b", "DROP"),
    (r"(?i)\b(ALTER)\b", "ALTER"),
    (r"(?i)\b(TRUNCATE)\b", "TRUNCATE"),
    (r"(?i)\b(CREATE)\b", "CREATE"),
    (r"(?i)\b(GRANT)\b", "GRANT"),
    (r"(?i)\b(REVOKE)\b", "REVOKE"),
    (r"(?i)\b(EXEC|EXECUTE)\b", "EXEC/EXECUTE"),
    (r"(?i)\b(CALL)\b", "CALL"),
    (r"(?i)\bINTO\s+(OUTFILE|DUMPFILE)\b", "INTO OUTFILE/DUMPFILE"),
    (r"(?i)\bLOAD_FILE\b", "LOAD_FILE"),
    (r"(?i)\bSLEEP\s*\(", "SLEEP()"),
    (r"(?i)\bBENCHMARK\s*\(", "BENCHMARK()"),
];

struct Patterns {
    forbidden: Vec<(Regex, &'static str)>,
    block_comment: Regex,
    line_comment: Regex,
    hash_comment: Regex,
    single_quoted: Regex,
    double_quoted: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let compile = |p: &str| Regex::new(p).expect("static pattern compiles");
        Patterns {
            forbidden: FORBIDDEN
                .iter()
                .map(|(pattern, name)| (compile(pattern), *name))
                .collect(),
            block_comment: compile(r"/\*[\s\S]*?\*/"),
            line_comment: compile(r"--[^\n]*"),
            hash_comment: compile(r"#[^\n]*"),
            single_quoted: compile(r"'[^']*'"),
            double_quoted: compile(r#""[^"]*""#),
        }
    })
}

/// Returns true if a `;` remains after removing quoted literals.
///
/// Runs on the original text: a terminator hidden after a comment still counts.
pub fn has_multiple_statements(sql: &str) -> bool {
    let p = patterns();
    let without_single = p.single_quoted.replace_all(sql, "");
    let stripped = p.double_quoted.replace_all(&without_single, "");
    stripped.contains(';')
}

/// Removes `/* */`, `--` and `#` comments.
pub fn strip_comments(sql: &str) -> String {
    let p = patterns();
    let no_block = p.block_comment.replace_all(sql, "");
    let no_line = p.line_comment.replace_all(&no_block, "");
    p.hash_comment.replace_all(&no_line, "").into_owned()
}

/// Returns the name of the first blocklisted keyword found, in list order.
pub fn find_forbidden_keyword(sql: &str) -> Option<&'static str> {
    patterns()
        .forbidden
        .iter()
        .find(|(re, _)| re.is_match(sql))
        .map(|(_, name)| *name)
}
