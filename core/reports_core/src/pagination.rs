/// One rendered page of a list.
#[derive(Debug, PartialEq, Eq)]
pub struct Page {
    pub header: String,
    pub lines: Vec<String>,
    pub footer: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum PageError {
    Empty,
    OutOfRange { requested: usize, last: usize },
}

pub const HEADER: &str = "Report IDs. Use /checkreports <id> to check a specific report. Page {page} of {pages}";
pub const FOOTER: &str = "Use /checkreports page {next} for more";

/// Slices `entries` into page `page` (1-based) of `per_page` lines.
pub fn page_of(entries: &[String], page: usize, per_page: usize) -> Result<Page, PageError> {
    let per_page = per_page.max(1);
    if entries.is_empty() {
        return Err(PageError::Empty);
    }
    let pages = entries.len().div_ceil(per_page);
    if page == 0 || page > pages {
        return Err(PageError::OutOfRange {
            requested: page,
            last: pages,
        });
    }

    let start = (page - 1) * per_page;
    let end = (start + per_page).min(entries.len());
    Ok(Page {
        header: HEADER
            .replace("{page}", &page.to_string())
            .replace("{pages}", &pages.to_string()),
        lines: entries[start..end].to_vec(),
        footer: (page < pages).then(|| FOOTER.replace("{next}", &(page + 1).to_string())),
    })
}

/// Parses the page number following `page`; a missing number means page 1.
pub fn parse_page_number(arg: Option<&str>) -> Result<usize, String> {
    match arg {
        None => Ok(1),
        Some(raw) => match raw.parse::<usize>() {
            Ok(n) if n >= 1 => Ok(n),
            _ => Err(format!("\"{raw}\" is not a valid page number.")),
        },
    }
}
