use std::iter::Peekable;
use std::sync::LazyLock;

use regex::{Matches, Regex};
use tracing::debug;

static ROW_OPEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<tr(?:\s[^>]*)?>").unwrap());
static ROW_CLOSE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)</tr\s*>").unwrap());
static CELL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<t[hd](?:\s[^>]*)?>(.*?)</t[hd]\s*>").unwrap());
static BR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>").unwrap());
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static SPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// One `<tr>` worth of cells, valid for a single parse pass.
#[derive(Debug, Clone)]
pub struct RawRow<'a> {
    /// 1-based position of the row among all rows in the markup.
    pub ordinal: usize,
    pub cells: Vec<String>,
    /// Inner markup of each cell, kept for image scanning.
    pub markup: Vec<&'a str>,
}

impl RawRow<'_> {
    pub fn cell(&self, index: usize) -> Option<&str> {
        self.cells.get(index).map(String::as_str)
    }
}

/// Lazy iterator over the rows of converted table markup, in document order.
///
/// A row spans from its `<tr>` to the first `</tr>` before the next `<tr>`.
/// A row with no closing tag in that span comes out with zero cells.
pub struct RowExtractor<'a> {
    markup: &'a str,
    opens: Peekable<Matches<'static, 'a>>,
    seen: usize,
}

impl<'a> RowExtractor<'a> {
    pub fn new(markup: &'a str) -> Self {
        RowExtractor {
            markup,
            opens: ROW_OPEN_RE.find_iter(markup).peekable(),
            seen: 0,
        }
    }
}

impl<'a> Iterator for RowExtractor<'a> {
    type Item = RawRow<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let open = self.opens.next()?;
        self.seen += 1;
        let end = self.opens.peek().map_or(self.markup.len(), |m| m.start());
        let span = &self.markup[open.end()..end];

        let inner = match ROW_CLOSE_RE.find(span) {
            Some(close) => &span[..close.start()],
            None => {
                debug!(row = self.seen, "unclosed row");
                ""
            }
        };

        let markup: Vec<&'a str> = CELL_RE
            .captures_iter(inner)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect();
        let cells = markup.iter().map(|m| clean_cell(m)).collect();

        Some(RawRow {
            ordinal: self.seen,
            cells,
            markup,
        })
    }
}

/// Line breaks become newlines, tags go, whitespace collapses to single spaces.
pub fn clean_cell(markup: &str) -> String {
    let text = BR_RE.replace_all(markup, "\n");
    let text = TAG_RE.replace_all(&text, "");
    let text = match quick_xml::escape::unescape(&text) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => text.to_string(),
    };
    SPACE_RE.replace_all(&text, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleans_nested_markup() {
        assert_eq!(
            clean_cell("<p><strong>Ravi</strong>\n  Kumar</p>"),
            "Ravi Kumar"
        );
        assert_eq!(clean_cell("Amritsar,<br/>Phone 98765"), "Amritsar, Phone 98765");
        assert_eq!(clean_cell("  <br>  "), "");
        assert_eq!(clean_cell("M.Sc &amp; B.Ed"), "M.Sc & B.Ed");
    }

    #[test]
    fn undecodable_entities_keep_raw_text() {
        assert_eq!(clean_cell("A&nbsp;B"), "A&nbsp;B");
    }

    #[test]
    fn yields_rows_in_document_order() {
        let html = "<table><tr><th>Sr. No</th><th>Name</th></tr>\
                    <tr><td>1</td><td><p>Ravi</p></td></tr></table>";
        let rows: Vec<_> = RowExtractor::new(html).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].ordinal, 1);
        assert_eq!(rows[0].cells, vec!["Sr. No", "Name"]);
        assert_eq!(rows[1].ordinal, 2);
        assert_eq!(rows[1].cells, vec!["1", "Ravi"]);
        assert_eq!(rows[1].markup[1], "<p>Ravi</p>");
    }

    #[test]
    fn row_without_cells_is_empty() {
        let rows: Vec<_> = RowExtractor::new("<tr>stray text</tr>").collect();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].cells.is_empty());
    }

    #[test]
    fn table_sections_are_not_rows_or_cells() {
        let html = "<table><thead><tr><td>a</td></tr></thead>\
                    <tbody><tr class=\"x\"><td>b</td><td>c</td></tr></tbody></table>";
        let rows: Vec<_> = RowExtractor::new(html).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].cells, vec!["a"]);
        assert_eq!(rows[1].cells, vec!["b", "c"]);
    }

    #[test]
    fn trailing_unclosed_row_has_no_cells() {
        let html = "<tr><td>1</td><td>ok</td></tr><tr><td>2</td><td>broken";
        let rows: Vec<_> = RowExtractor::new(html).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].cells, vec!["1", "ok"]);
        assert!(rows[1].cells.is_empty());
    }

    #[test]
    fn unclosed_row_does_not_swallow_the_next() {
        let html = "<table><tr><td>1</td><td>broken</td>\
                    <tr><td>2</td><td>ok</td></tr>\
                    <tr><td>3</td><td>also ok</td></tr></table>";
        let rows: Vec<_> = RowExtractor::new(html).collect();
        assert_eq!(rows.len(), 3);
        assert!(rows[0].cells.is_empty());
        assert_eq!(rows[1].ordinal, 2);
        assert_eq!(rows[1].cells, vec!["2", "ok"]);
        assert_eq!(rows[2].cells, vec!["3", "also ok"]);
    }

    #[test]
    fn track_is_not_a_row() {
        let html = "<video><track src=\"a.vtt\"><TRACK></video>\
                    <table><tr><td>1</td></tr></table>";
        let rows: Vec<_> = RowExtractor::new(html).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].cells, vec!["1"]);
    }
}
