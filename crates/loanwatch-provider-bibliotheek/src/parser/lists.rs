// Personal reading lists
//
// The lists page carries its data as a JSON array in the `data-lists`
// attribute of a marker element. Items are served separately, per list.

use loanwatch_core::{Error, Result};
use scraper::Html;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::selector;

/// One entry of a reading list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListItem {
    pub title: String,
    pub author: Option<String>,
    pub url: Option<String>,
}

/// A reading list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserList {
    /// Trailing path segment of the list URL
    pub id: String,
    pub title: String,
    pub url: String,
    pub item_count: Option<u64>,
    pub last_changed: Option<String>,
    /// Filled by a separate items request
    #[serde(default)]
    pub items: Vec<ListItem>,
}

/// Extract the list summaries from the lists page
///
/// # Returns
///
/// - `Ok(lists)`: Entries without a usable URL are skipped
/// - `Err(Error::Parse)`: No marker element, or its attribute is not a JSON array
pub fn parse_lists(html: &str) -> Result<Vec<UserList>> {
    let raw = {
        let document = Html::parse_document(html);
        let marker = selector("[data-lists]")?;
        document
            .select(&marker)
            .next()
            .and_then(|el| el.value().attr("data-lists"))
            .map(str::to_string)
            .ok_or_else(|| Error::parse("no list marker on lists page"))?
    };

    let entries: Vec<Value> = serde_json::from_str(&raw)
        .map_err(|e| Error::parse(format!("list marker is not a JSON array: {}", e)))?;

    Ok(entries
        .iter()
        .filter_map(|entry| {
            let url = entry.get("url")?.as_str()?.to_string();
            let id = list_id_from_url(&url)?;
            Some(UserList {
                id,
                title: string_field(entry, "title").unwrap_or_default(),
                url,
                item_count: entry.get("numberOfItems").and_then(Value::as_u64),
                last_changed: string_field(entry, "lastChanged"),
                items: Vec::new(),
            })
        })
        .collect())
}

/// Trailing non-empty path segment of a list URL
pub fn list_id_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}

/// Extract the items of one list
///
/// Accepts a bare array or an object with an `items` array.
pub fn parse_list_items(json: &Value) -> Result<Vec<ListItem>> {
    let items = json
        .as_array()
        .or_else(|| json.get("items").and_then(Value::as_array))
        .ok_or_else(|| Error::parse("list items payload is not an array"))?;

    Ok(items
        .iter()
        .filter_map(|item| {
            Some(ListItem {
                title: string_field(item, "title")?,
                author: string_field(item, "author"),
                url: string_field(item, "url"),
            })
        })
        .collect())
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_lists() {
        let html = r#"
<div class="my-library-lists"
     data-lists='[{"title":"Te lezen","url":"/mijn-bibliotheek/lijsten/987","numberOfItems":2,"lastChanged":"2024-03-01"},
                  {"title":"Kapot","url":""}]'></div>"#;

        let lists = parse_lists(html).unwrap();
        assert_eq!(lists.len(), 1);
        assert_eq!(lists[0].id, "987");
        assert_eq!(lists[0].title, "Te lezen");
        assert_eq!(lists[0].item_count, Some(2));
        assert!(lists[0].items.is_empty());
    }

    #[test]
    fn test_parse_lists_without_marker() {
        assert!(matches!(parse_lists("<p>leeg</p>"), Err(Error::Parse(_))));
        assert!(matches!(
            parse_lists(r#"<div data-lists="nope"></div>"#),
            Err(Error::Parse(_))
        ));
    }

    #[test]
    fn test_list_id_from_url() {
        assert_eq!(list_id_from_url("/mijn-bibliotheek/lijsten/987/").as_deref(), Some("987"));
        assert_eq!(
            list_id_from_url("https://bibliotheek.be/mijn-bibliotheek/lijsten/12?tab=1").as_deref(),
            Some("12")
        );
        assert_eq!(list_id_from_url(""), None);
    }

    #[test]
    fn test_parse_list_items() {
        let payload = json!({ "items": [
            { "title": "Kaas", "author": "Willem Elsschot", "url": "/catalogus/kaas" },
            { "author": "zonder titel" }
        ]});
        let items = parse_list_items(&payload).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].author.as_deref(), Some("Willem Elsschot"));

        assert!(parse_list_items(&json!("x")).is_err());
    }
}
