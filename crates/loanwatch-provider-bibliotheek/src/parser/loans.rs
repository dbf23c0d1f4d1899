// Loan detail page of one membership
//
// Loans are grouped by sub-library: every wrapper starts with an `<h2>`
// naming the library, followed by the loan entries of that library.

use loanwatch_core::model::DetailRecord;
use loanwatch_core::{Error, Result};
use scraper::Html;

use super::{first_attr, first_text, selector, text_of};

const LOANS: &str = "my-library-user-library-account-loans";

/// Extract the loans listed on a detail page
///
/// # Parameters
///
/// - `html`: The page body
/// - `source_url`: Page URL, recorded on each record
///
/// # Returns
///
/// - `Ok(records)`: One record per entry with a title, possibly none
/// - `Err(Error::Parse)`: The loan container is missing from the page
pub fn parse_loan_details(html: &str, source_url: &str) -> Result<Vec<DetailRecord>> {
    let document = Html::parse_document(html);

    let container = selector(&format!(".{LOANS}"))?;
    let wrapper = selector(&format!(".{LOANS}__loan-wrapper"))?;
    let heading = selector("h2")?;
    let entry = selector(&format!(".{LOANS}__loan"))?;
    let title_sel = selector(&format!(".{LOANS}__loan-title"))?;
    let author = selector(".author")?;
    let cover = selector("img")?;
    let loan_type = selector(&format!(".{LOANS}__loan-type-label"))?;
    let from_to = selector(&format!(".{LOANS}__loan-from-to span"))?;
    let days = selector(&format!(".{LOANS}__loan-days"))?;
    let checkbox = selector(r#"input[type="checkbox"]"#)?;

    if document.select(&container).next().is_none() {
        return Err(Error::parse(format!("no loan container on {}", source_url)));
    }

    let mut records = Vec::new();
    for group in document.select(&wrapper) {
        let library_name = first_text(group, &heading);

        for item in group.select(&entry) {
            let Some(title) = first_text(item, &title_sel) else {
                tracing::debug!("Skipping loan entry without title on {}", source_url);
                continue;
            };

            let mut dates = item.select(&from_to).map(text_of).filter(|d| !d.is_empty());
            let loan_from = dates.next();
            let loan_till = dates.next();

            records.push(DetailRecord {
                title,
                author: first_text(item, &author),
                cover_url: first_attr(item, &cover, "src"),
                loan_type: first_text(item, &loan_type),
                loan_from,
                loan_till,
                days_remaining: first_text(item, &days)
                    .map(|phrase| parse_days_phrase(&phrase))
                    .unwrap_or(0),
                extend_id: first_attr(item, &checkbox, "id"),
                library_name: library_name.clone(),
                account_id: None,
                account_name: None,
                source_url: Some(source_url.to_string()),
            });
        }
    }

    Ok(records)
}

/// Days remaining from the page's Dutch phrase
///
/// `"Nog 5 dagen"` → 5, `"Nog 1 dag"` → 1, `"2 dagen te laat"` → -2.
/// Anything else → 0.
pub fn parse_days_phrase(text: &str) -> i64 {
    let lower = text.to_lowercase();
    let tokens: Vec<&str> = lower.split_whitespace().collect();

    if let Some(pos) = tokens.iter().position(|token| *token == "nog") {
        if let Some(days) = tokens.get(pos + 1).and_then(|t| t.parse::<i64>().ok()) {
            return days;
        }
    }

    if lower.contains("te laat") {
        if let Some(days) = tokens.iter().find_map(|t| t.parse::<i64>().ok()) {
            return -days.abs();
        }
    }

    0
}
