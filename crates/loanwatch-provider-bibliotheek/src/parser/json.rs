// JSON endpoints: memberships, activity counters and the loan overview

use loanwatch_core::model::{Account, ActivityCounts, CoarseRecord};
use loanwatch_core::{Error, Result};
use serde_json::{Map, Value};

/// Flatten the membership listing
///
/// The payload maps a region key to either an array of memberships or a
/// mapping of membership id → membership.
///
/// # Returns
///
/// - `Ok(accounts)`: In region order; entries without an id are skipped
/// - `Err(Error::Parse)`: The payload is not an object
pub fn parse_memberships(json: &Value) -> Result<Vec<Account>> {
    let regions = json
        .as_object()
        .ok_or_else(|| Error::parse("membership payload is not an object"))?;

    let mut accounts = Vec::new();
    for (region, entries) in regions {
        match entries {
            Value::Array(items) => {
                accounts.extend(items.iter().filter_map(|item| membership(item, None, region)));
            }
            Value::Object(items) => {
                accounts.extend(
                    items
                        .iter()
                        .filter_map(|(key, item)| membership(item, Some(key), region)),
                );
            }
            other => {
                tracing::debug!("Ignoring membership region {} of type {}", region, type_name(other));
            }
        }
    }

    Ok(accounts)
}

fn membership(item: &Value, fallback_id: Option<&String>, region: &str) -> Option<Account> {
    let fields = item.as_object()?;
    let id = id_field(fields, "id").or_else(|| fallback_id.cloned())?;

    Some(Account {
        id,
        name: str_field(fields, "name").unwrap_or_default(),
        library_name: str_field(fields, "libraryName").unwrap_or_default(),
        barcode: str_field(fields, "barcode").unwrap_or_default(),
        region: region.to_string(),
        has_error: fields.get("hasError").and_then(Value::as_bool).unwrap_or(false),
    })
}

/// Activity counters of one membership; missing counters are 0
pub fn parse_activities(json: &Value) -> Result<ActivityCounts> {
    let fields = json
        .as_object()
        .ok_or_else(|| Error::parse("activity payload is not an object"))?;

    let count = |key: &str| {
        fields
            .get(key)
            .and_then(Value::as_u64)
            .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
            .unwrap_or(0)
    };

    Ok(ActivityCounts {
        loans: count("numberOfLoans"),
        reservations: count("numberOfReservations"),
        open_amount: fields.get("openAmount").and_then(Value::as_f64).unwrap_or(0.0),
    })
}

/// Loan summaries of the global overview
///
/// Accepts a bare array or an object with a `loans` array. Entries without
/// a title are skipped. `days_remaining` is left at 0.
pub fn parse_overview(json: &Value) -> Result<Vec<CoarseRecord>> {
    let loans = json
        .as_array()
        .or_else(|| json.get("loans").and_then(Value::as_array))
        .ok_or_else(|| Error::parse("overview payload is not an array"))?;

    Ok(loans
        .iter()
        .filter_map(|loan| {
            let fields = loan.as_object()?;
            Some(CoarseRecord {
                title: str_field(fields, "title")?,
                author: str_field(fields, "author"),
                due_date: str_field(fields, "dueDate"),
                days_remaining: 0,
                is_renewable: fields.get("isRenewable").and_then(Value::as_bool).unwrap_or(false),
                extend_id: id_field(fields, "renewalId"),
                account_name: str_field(fields, "accountName"),
                library_name: fields
                    .get("location")
                    .and_then(Value::as_object)
                    .and_then(|location| str_field(location, "libraryName")),
            })
        })
        .collect())
}

fn str_field(fields: &Map<String, Value>, key: &str) -> Option<String> {
    fields
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Identifiers show up both as strings and as numbers
fn id_field(fields: &Map<String, Value>, key: &str) -> Option<String> {
    match fields.get(key)? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
