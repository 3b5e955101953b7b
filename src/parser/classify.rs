pub const HEADER_KEYWORDS: &[&str] = &[
    "sr. no",
    "name",
    "father",
    "date of birth",
    "university",
    "branch",
    "matric",
    "+2 exam",
    "admission",
    "examination",
    "graduate",
    "pg course",
    "varsity",
    "signature",
    "passport",
    "home address",
];

/// Cells carrying a header keyword at or above this count mark a header row.
pub const MIN_KEYWORD_CELLS: usize = 4;
/// Rows with fewer cells than this are legends, titles or fragments.
pub const MIN_CELLS: usize = 5;

pub const NAME_CELL: usize = 1;
pub const REG_NO_CELL: usize = 4;

/// Tunable thresholds for header detection. These were picked against the
/// office's own roster template and may not hold for other layouts.
#[derive(Debug, Clone)]
pub struct HeaderRules {
    pub keywords: Vec<String>,
    pub min_keyword_cells: usize,
    pub min_cells: usize,
}

impl Default for HeaderRules {
    fn default() -> Self {
        HeaderRules {
            keywords: HEADER_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            min_keyword_cells: MIN_KEYWORD_CELLS,
            min_cells: MIN_CELLS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Keep,
    Header,
    TooFewCells,
    Blank,
    MissingIdentity,
}

impl Verdict {
    pub fn is_kept(self) -> bool {
        self == Verdict::Keep
    }
}

/// Number of cells containing at least one header keyword.
pub fn keyword_cells(cells: &[String], rules: &HeaderRules) -> usize {
    cells
        .iter()
        .filter(|cell| {
            let lower = cell.to_lowercase();
            rules.keywords.iter().any(|k| lower.contains(k.as_str()))
        })
        .count()
}

pub fn is_likely_header(cells: &[String], rules: &HeaderRules) -> bool {
    keyword_cells(cells, rules) >= rules.min_keyword_cells || cells.len() < rules.min_cells
}

pub fn classify(cells: &[String], rules: &HeaderRules) -> Verdict {
    if is_likely_header(cells, rules) {
        return if keyword_cells(cells, rules) >= rules.min_keyword_cells {
            Verdict::Header
        } else {
            Verdict::TooFewCells
        };
    }
    if cells.iter().all(|c| c.is_empty()) {
        return Verdict::Blank;
    }
    let present = |i: usize| cells.get(i).is_some_and(|c| !c.is_empty());
    if !present(NAME_CELL) || !present(REG_NO_CELL) {
        return Verdict::MissingIdentity;
    }
    Verdict::Keep
}
