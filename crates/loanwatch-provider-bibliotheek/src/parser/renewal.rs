// Renewal confirmation form
//
// The renewal URL serves a confirmation form; submitting its inputs back
// unchanged performs the renewal.

use scraper::Html;

use super::selector;

/// A renewal form as served
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenewalForm {
    /// The form's `action` attribute, possibly relative
    pub action: String,
    /// Every named input in document order
    pub fields: Vec<(String, String)>,
}

/// Find the renewal form on a page
///
/// Picks the first form whose action mentions `verlengen`. Inputs without
/// a value are submitted as empty strings.
pub fn parse_renewal_form(html: &str) -> Option<RenewalForm> {
    let document = Html::parse_document(html);
    let form = selector("form").ok()?;
    let input = selector("input[name]").ok()?;

    let found = document.select(&form).find(|el| {
        el.value()
            .attr("action")
            .is_some_and(|action| action.contains("verlengen"))
    })?;

    let fields = found
        .select(&input)
        .filter_map(|el| {
            let name = el.value().attr("name")?;
            let value = el.value().attr("value").unwrap_or_default();
            Some((name.to_string(), value.to_string()))
        })
        .collect();

    Some(RenewalForm {
        action: found.value().attr("action").unwrap_or_default().to_string(),
        fields,
    })
}
