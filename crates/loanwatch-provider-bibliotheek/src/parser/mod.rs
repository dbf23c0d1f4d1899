//! # Page parsing
//!
//! Everything this crate knows about the portal's markup and JSON shapes
//! lives under this module. Each submodule reads one kind of document and
//! returns owned records, so no parsed HTML tree outlives a function call.
//!
//! ## Conventions
//! - A missing **mandatory container** is an [`Error::Parse`]; callers absorb
//!   it into an empty result for that one document.
//! - Missing **optional fields** never abort a record; they become `None`
//!   (or 0 for day counts).
//! - Whitespace is normalized in all extracted text.

mod json;
mod library;
mod lists;
mod loans;
mod renewal;

pub use json::{parse_activities, parse_memberships, parse_overview};
pub use library::{Closure, GpsPosition, LibraryInfo, OpeningDay, parse_library_info, split_gps};
pub use lists::{ListItem, UserList, list_id_from_url, parse_list_items, parse_lists};
pub use loans::{parse_days_phrase, parse_loan_details};
pub use renewal::{RenewalForm, parse_renewal_form};

use loanwatch_core::{Error, Result};
use scraper::{ElementRef, Selector};

/// Compile a CSS selector
fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| Error::parse(format!("invalid selector {:?}: {:?}", css, e)))
}

/// Whitespace-normalized text content of an element
fn text_of(element: ElementRef<'_>) -> String {
    element.text().flat_map(str::split_whitespace).collect::<Vec<_>>().join(" ")
}

/// Text of the first match below `scope`, if non-empty
fn first_text(scope: ElementRef<'_>, selector: &Selector) -> Option<String> {
    scope
        .select(selector)
        .next()
        .map(text_of)
        .filter(|text| !text.is_empty())
}

/// Attribute of the first match below `scope`, if non-empty
fn first_attr(scope: ElementRef<'_>, selector: &Selector, attr: &str) -> Option<String> {
    scope
        .select(selector)
        .next()
        .and_then(|el| el.value().attr(attr))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Non-empty, trimmed text segments of an element (split at tags such as `<br>`)
fn text_segments(element: ElementRef<'_>) -> Vec<String> {
    element
        .text()
        .map(|segment| segment.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|segment| !segment.is_empty())
        .collect()
}
