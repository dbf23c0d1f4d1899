// Library information page
//
// Opening hours, location, contact details and announced closures of one
// library branch.

use loanwatch_core::{Error, Result};
use scraper::Html;
use serde::{Deserialize, Serialize};

use super::{first_text, selector, text_of, text_segments};

/// Opening hours of one weekday
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpeningDay {
    pub day: String,
    /// Time ranges as served, e.g. `"10:00 - 12:30"`; empty when closed
    pub ranges: Vec<String>,
}

/// A coordinate pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPosition {
    pub latitude: f64,
    pub longitude: f64,
}

/// An announced closure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Closure {
    pub date: String,
    pub reason: Option<String>,
}

/// Everything the library page tells about a branch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LibraryInfo {
    pub name: Option<String>,
    /// In page order
    pub opening_hours: Vec<OpeningDay>,
    pub gps: Option<GpsPosition>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub closures: Vec<Closure>,
}

/// Address lines that are page furniture rather than address
const ADDRESS_BOILERPLATE: &[&str] = &["adres", "adres:", "routebeschrijving", "toon op kaart", "bekijk op kaart"];

/// Extract library information
///
/// # Returns
///
/// - `Ok(info)`: Fields that could not be found are left empty
/// - `Err(Error::Parse)`: The page has no library info container
pub fn parse_library_info(html: &str) -> Result<LibraryInfo> {
    let document = Html::parse_document(html);

    let container = selector(".library-info")?;
    let name = selector("h1")?;
    let hours_row = selector(".library-opening-hours tr")?;
    let th = selector("th")?;
    let td = selector("td")?;
    let gps = selector(".library-gps")?;
    let address = selector(".library-address")?;
    let phone = selector(r#"a[href^="tel:"]"#)?;
    let email = selector(".library-email")?;
    let closure_row = selector(".library-closures tr")?;

    let Some(root) = document.select(&container).next() else {
        return Err(Error::parse("no library info container"));
    };

    let opening_hours = root
        .select(&hours_row)
        .filter_map(|row| {
            let day = first_text(row, &th)?;
            let ranges = row
                .select(&td)
                .next()
                .map(text_segments)
                .unwrap_or_default()
                .into_iter()
                .filter(|range| !range.eq_ignore_ascii_case("gesloten"))
                .collect();
            Some(OpeningDay { day, ranges })
        })
        .collect();

    let address = root.select(&address).next().and_then(|el| {
        let lines: Vec<String> = text_segments(el)
            .into_iter()
            .filter(|line| !ADDRESS_BOILERPLATE.contains(&line.to_lowercase().as_str()))
            .collect();
        (!lines.is_empty()).then(|| lines.join(", "))
    });

    let phone = root
        .select(&phone)
        .next()
        .and_then(|el| el.value().attr("href"))
        .and_then(|href| href.strip_prefix("tel:"))
        .map(|number| number.trim().to_string())
        .filter(|number| !number.is_empty());

    let closures = root
        .select(&closure_row)
        .filter_map(|row| {
            let mut cells = row.select(&td).map(text_of);
            let date = cells.next().filter(|d| !d.is_empty())?;
            let reason = cells.next().filter(|r| !r.is_empty());
            Some(Closure { date, reason })
        })
        .collect();

    Ok(LibraryInfo {
        name: first_text(root, &name),
        opening_hours,
        gps: first_text(root, &gps).and_then(|text| split_gps(&text)),
        address,
        phone,
        email: first_text(root, &email).map(|text| deobfuscate_email(&text)),
        closures,
    })
}

/// Split a coordinate string on its directional markers
///
/// Accepts `"NB 51.0543 OL 3.7174"` and `"N 51.0543 E 3.7174"`, with
/// decimal commas or points.
pub fn split_gps(text: &str) -> Option<GpsPosition> {
    let mut latitude = None;
    let mut longitude = None;
    let mut pending: Option<bool> = None;

    for token in text.split_whitespace() {
        let token = token.trim_end_matches([':', ';']).to_uppercase();
        match token.as_str() {
            "NB" | "N" => pending = Some(true),
            "OL" | "E" | "OL." => pending = Some(false),
            number => {
                let Ok(value) = number.trim_end_matches(',').replace(',', ".").parse::<f64>() else {
                    continue;
                };
                match pending.take() {
                    Some(true) => latitude = Some(value),
                    Some(false) => longitude = Some(value),
                    None => {}
                }
            }
        }
    }

    Some(GpsPosition {
        latitude: latitude?,
        longitude: longitude?,
    })
}

/// Undo the page's `[at]` address obfuscation
fn deobfuscate_email(text: &str) -> String {
    text.replace(" [at] ", "@")
        .replace("[at]", "@")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("")
}
