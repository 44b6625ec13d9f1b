use chrono::{DateTime, Duration, Local, TimeZone};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;

static BLOCK_BOUNDARY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)</(p|div|li|h[1-6]|blockquote|pre|tr)>|<br\s*/?>").unwrap()
});

/// Plain-text rendering of an entry body (HTML or markdown).
/// Block elements become line breaks; whitespace inside a line is collapsed.
pub fn html_to_text(html: &str) -> String {
    if html.trim().is_empty() {
        return String::new();
    }

    let spaced = BLOCK_BOUNDARY.replace_all(html, "$0\n");
    let fragment = Html::parse_fragment(&spaced);
    let raw: String = fragment.root_element().text().collect();

    raw.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Relative path for an entry created at `at`: `YYYY/Mon/yyMMdd-HHmmss.md`.
pub fn entry_path_for<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!(
        "{}/{}/{}.md",
        at.format("%Y"),
        at.format("%b"),
        at.format("%y%m%d-%H%M%S")
    )
}

/// Next free entry path, advancing the timestamp a second at a time past taken names.
pub fn new_entry_path(now: DateTime<Local>, is_taken: impl Fn(&str) -> bool) -> String {
    let mut at = now;
    loop {
        let candidate = entry_path_for(&at);
        if !is_taken(&candidate) {
            return candidate;
        }
        at += Duration::seconds(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_html_to_text_strips_tags_and_entities() {
        let html = "<p>Hello <b>world</b> &amp; friends</p><p>Second&nbsp;line</p>";
        assert_eq!(html_to_text(html), "Hello world & friends\nSecond line");
    }

    #[test]
    fn test_html_to_text_handles_breaks_and_lists() {
        let html = "<ul><li>one</li><li>two</li></ul>line<br>next";
        assert_eq!(html_to_text(html), "one\ntwo\nline\nnext");
    }

    #[test]
    fn test_html_to_text_passes_plain_text() {
        assert_eq!(html_to_text("just   words\n\nhere"), "just words\nhere");
        assert_eq!(html_to_text("   "), "");
    }

    #[test]
    fn test_entry_path_naming_scheme() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(entry_path_for(&at), "2024/Jan/240101-120000.md");
    }

    #[test]
    fn test_new_entry_path_skips_taken_names() {
        let now = Local.with_ymd_and_hms(2024, 3, 5, 9, 15, 59).unwrap();
        let taken = ["2024/Mar/240305-091559.md", "2024/Mar/240305-091600.md"];
        let path = new_entry_path(now, |p| taken.contains(&p));
        assert_eq!(path, "2024/Mar/240305-091601.md");
    }
}
