//! Source adapter contract and the per-source page parsers.

pub mod cad;
pub mod permit;
pub mod redfin;
pub mod storm;
pub mod zillow;

use std::sync::Arc;

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use rlf_core::geo::{county_for_city, parse_address};
use rlf_core::{FetchTarget, FetchedPage, LeadDraft, LeadSource};
use scraper::{ElementRef, Html, Selector};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use cad::CadAdapter;
pub use permit::PermitAdapter;
pub use redfin::RedfinAdapter;
pub use storm::StormAdapter;
pub use zillow::ZillowAdapter;

pub const CRATE_NAME: &str = "rlf-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("invalid selector `{selector}`: {reason}")]
    InvalidSelector { selector: String, reason: String },
    #[error("embedded json in {context} is malformed: {source}")]
    InvalidJson {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// One parser per lead source. Parsing never fails: malformed pages are logged
/// and whatever could be extracted is returned.
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> LeadSource;

    /// Built-in target list used when no registry file overrides it.
    fn default_targets(&self) -> Vec<FetchTarget>;

    fn parse_listing(&self, page: &FetchedPage) -> Vec<LeadDraft>;
}

pub fn adapter_for_source(source: LeadSource) -> Arc<dyn SourceAdapter> {
    match source {
        LeadSource::Zillow => Arc::new(ZillowAdapter),
        LeadSource::Redfin => Arc::new(RedfinAdapter),
        LeadSource::Cad => Arc::new(CadAdapter),
        LeadSource::Permit => Arc::new(PermitAdapter),
        LeadSource::Storm => Arc::new(StormAdapter),
    }
}

pub fn all_adapters() -> Vec<Arc<dyn SourceAdapter>> {
    LeadSource::ALL.into_iter().map(adapter_for_source).collect()
}

pub(crate) fn targets(source: LeadSource, urls: &[&str]) -> Vec<FetchTarget> {
    urls.iter().map(|url| FetchTarget::new(source, *url)).collect()
}

/// Structured data first; the HTML pass only runs when that yields nothing.
pub(crate) fn structured_then_html(
    source: LeadSource,
    page: &FetchedPage,
    structured: impl FnOnce(&Html) -> Result<Vec<LeadDraft>, AdapterError>,
    html: impl FnOnce(&Html) -> Result<Vec<LeadDraft>, AdapterError>,
) -> Vec<LeadDraft> {
    let document = Html::parse_document(&page.body);

    let from_json = match structured(&document) {
        Ok(drafts) => finalize_drafts(drafts),
        Err(err) => {
            debug!(%source, url = %page.url, error = %err, "structured data unusable");
            Vec::new()
        }
    };
    if !from_json.is_empty() {
        info!(%source, url = %page.url, count = from_json.len(), "parsed structured listings");
        return from_json;
    }

    let from_html = match html(&document) {
        Ok(drafts) => finalize_drafts(drafts),
        Err(err) => {
            warn!(%source, url = %page.url, error = %err, "html parsing failed");
            Vec::new()
        }
    };
    info!(%source, url = %page.url, count = from_html.len(), "parsed html listings");
    from_html
}

/// Backfills city/state/zip from the address text and county from the city
/// table, then drops drafts without a usable address.
pub(crate) fn finalize_drafts(drafts: Vec<LeadDraft>) -> Vec<LeadDraft> {
    drafts
        .into_iter()
        .filter_map(|mut draft| {
            if !draft.has_usable_address() {
                debug!(address = %draft.address_text, "discarding draft with short address");
                return None;
            }
            let parts = parse_address(&draft.address_text);
            if draft.city.is_empty() {
                draft.city = parts.city;
            }
            if draft.state.is_empty() {
                draft.state = parts.state;
            }
            if draft.zip_code.is_empty() {
                draft.zip_code = parts.zip_code;
            }
            if draft.county.is_empty() {
                draft.county = county_for_city(&draft.city).to_string();
            }
            Some(draft)
        })
        .collect()
}

pub(crate) fn selector(css: &str) -> Result<Selector, AdapterError> {
    Selector::parse(css).map_err(|e| AdapterError::InvalidSelector {
        selector: css.to_string(),
        reason: e.to_string(),
    })
}

/// Elements of the first selector in `candidates` that matches anything.
pub(crate) fn first_matching<'a>(
    document: &'a Html,
    candidates: &[&str],
) -> Result<Vec<ElementRef<'a>>, AdapterError> {
    for css in candidates {
        let sel = selector(css)?;
        let found: Vec<_> = document.select(&sel).collect();
        if !found.is_empty() {
            return Ok(found);
        }
    }
    Ok(Vec::new())
}

pub(crate) fn text_or_none(value: String) -> Option<String> {
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

/// Element text with whitespace runs collapsed to single spaces.
pub(crate) fn element_text(element: &ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Element text with one line per text node, for label/value blocks.
pub(crate) fn element_lines(element: &ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

pub(crate) fn first_text_in(element: &ElementRef<'_>, candidates: &[&str]) -> Result<Option<String>, AdapterError> {
    for css in candidates {
        let sel = selector(css)?;
        if let Some(found) = element.select(&sel).next() {
            return Ok(text_or_none(element_text(&found)));
        }
    }
    Ok(None)
}

pub(crate) fn first_attr_in(element: &ElementRef<'_>, css: &str, attr: &str) -> Result<Option<String>, AdapterError> {
    let sel = selector(css)?;
    Ok(element
        .select(&sel)
        .next()
        .and_then(|n| n.value().attr(attr))
        .and_then(|s| text_or_none(s.to_string())))
}

pub(crate) fn script_texts(document: &Html) -> Result<Vec<String>, AdapterError> {
    let sel = selector("script")?;
    Ok(document
        .select(&sel)
        .map(|s| s.text().collect::<String>())
        .filter(|s| !s.trim().is_empty())
        .collect())
}

static INT_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d[\d,]*").expect("int token"));
static BEDS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(\d+)\s*(?:beds?|bds?)\b").expect("beds"));
static BATHS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(?:baths?|ba)\b").expect("baths"));
static SQFT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)([\d,]+)\s*(?:sq\.?\s*ft|sqft)").expect("sqft"));

/// First digit run (commas allowed) as an integer: `"$425,000+"` is 425000.
pub(crate) fn parse_int_value(text: &str) -> Option<i64> {
    INT_TOKEN
        .find(text)
        .and_then(|m| m.as_str().replace(',', "").parse().ok())
}

/// Beds and baths from a stats string such as `"3 bed, 2.5 bath"`.
pub(crate) fn parse_bed_bath(text: &str) -> (Option<u32>, Option<f64>) {
    let beds = BEDS.captures(text).and_then(|c| c[1].parse().ok());
    let baths = BATHS.captures(text).and_then(|c| c[1].parse().ok());
    (beds, baths)
}

pub(crate) fn parse_square_feet(text: &str) -> Option<u32> {
    SQFT.captures(text)
        .and_then(|c| c[1].replace(',', "").parse().ok())
}

/// Month-first wins; day-first only matches when the first field exceeds 12.
const DATE_FORMATS: [&str; 7] = [
    "%Y-%m-%d", "%m/%d/%Y", "%m-%d-%Y", "%Y/%m/%d", "%m/%d/%y", "%d/%m/%Y", "%Y%m%d",
];

pub(crate) fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
}

/// Slice of `text` holding the balanced JSON value that opens at byte `start`.
pub(crate) fn balanced_json_at(text: &str, start: usize) -> Option<&str> {
    let bytes = text.as_bytes();
    if !matches!(bytes.get(start), Some(b'{') | Some(b'[')) {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (idx, &byte) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=idx]);
                }
            }
            _ => {}
        }
    }
    None
}

/// JSON value assigned right after `marker`, e.g. `window.__INITIAL_STATE__ = {...}`.
pub(crate) fn json_after_marker<'a>(text: &'a str, marker: &str) -> Option<&'a str> {
    let after = text.find(marker)? + marker.len();
    let rest = &text[after..];
    let offset = rest.find(['{', '['])?;
    let gap = &rest[..offset];
    if !gap.chars().all(|c| c.is_whitespace() || c == '=' || c == ':') {
        return None;
    }
    balanced_json_at(text, after + offset)
}

/// First array assigned to one of `names` (`names = [..]`, `names: [..]` or `"names": [..]`).
pub(crate) fn json_array_assigned(
    text: &str,
    names: &[&str],
    context: &'static str,
) -> Result<Option<Vec<JsonValue>>, AdapterError> {
    let pattern = format!(r#""?\b(?:{})"?\s*[:=]\s*\["#, names.join("|"));
    let Ok(re) = Regex::new(&pattern) else {
        return Ok(None);
    };
    for found in re.find_iter(text) {
        let Some(raw) = balanced_json_at(text, found.end() - 1) else {
            continue;
        };
        let value: JsonValue =
            serde_json::from_str(raw).map_err(|source| AdapterError::InvalidJson { context, source })?;
        if let JsonValue::Array(items) = value {
            return Ok(Some(items));
        }
    }
    Ok(None)
}

pub(crate) fn json_lookup<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    path.iter().try_fold(value, |cur, segment| cur.get(*segment))
}

/// Depth-first search for the first value stored under `key`.
pub(crate) fn find_key<'a>(value: &'a JsonValue, key: &str) -> Option<&'a JsonValue> {
    match value {
        JsonValue::Object(map) => map
            .get(key)
            .or_else(|| map.values().find_map(|v| find_key(v, key))),
        JsonValue::Array(items) => items.iter().find_map(|v| find_key(v, key)),
        _ => None,
    }
}

fn as_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => text_or_none(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Object(map) => map.get("value").and_then(as_text),
        _ => None,
    }
}

fn as_int(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        JsonValue::String(s) => parse_int_value(s),
        JsonValue::Object(map) => map.get("value").and_then(as_int),
        _ => None,
    }
}

fn as_float(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        JsonValue::Object(map) => map.get("value").and_then(as_float),
        _ => None,
    }
}

/// First key holding a non-empty string or a number, as text.
pub(crate) fn json_text(obj: &JsonValue, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| obj.get(*k).and_then(as_text))
}

/// First key holding a non-zero integer (numbers, digit strings and `{"value": n}`).
pub(crate) fn json_int(obj: &JsonValue, keys: &[&str]) -> Option<i64> {
    keys.iter()
        .find_map(|k| obj.get(*k).and_then(as_int).filter(|v| *v != 0))
}

pub(crate) fn json_float(obj: &JsonValue, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .find_map(|k| obj.get(*k).and_then(as_float).filter(|v| *v != 0.0))
}

pub(crate) fn json_flag(obj: &JsonValue, keys: &[&str]) -> bool {
    keys.iter().any(|k| match obj.get(*k) {
        Some(JsonValue::Bool(b)) => *b,
        Some(JsonValue::String(s)) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "yes" | "y" | "1"),
        Some(JsonValue::Number(n)) => n.as_i64().is_some_and(|v| v != 0),
        _ => false,
    })
}

/// Keys whose values may carry a phone number or email for the listing's contact.
const CONTACT_KEYS: [&str; 16] = [
    "phone",
    "phoneNumber",
    "phone_number",
    "agentPhone",
    "brokerPhone",
    "contactPhone",
    "owner_phone",
    "email",
    "agentEmail",
    "brokerEmail",
    "contactEmail",
    "owner_email",
    "contact",
    "agent",
    "broker",
    "brokerName",
];

/// Text for the contact extractor built only from contact-bearing fields, so
/// listing ids and timestamps never read as phone numbers.
pub(crate) fn json_contact_text(obj: &JsonValue) -> String {
    let mut parts = Vec::new();
    for key in CONTACT_KEYS {
        if let Some(value) = obj.get(key) {
            collect_leaf_text(value, &mut parts);
        }
    }
    parts.join(" ")
}

fn collect_leaf_text(value: &JsonValue, out: &mut Vec<String>) {
    match value {
        JsonValue::String(s) if !s.trim().is_empty() => out.push(s.trim().to_string()),
        JsonValue::Number(n) => out.push(n.to_string()),
        JsonValue::Array(items) => items.iter().for_each(|item| collect_leaf_text(item, out)),
        JsonValue::Object(map) => map.values().for_each(|item| collect_leaf_text(item, out)),
        _ => {}
    }
}

pub(crate) fn to_u32(value: Option<i64>) -> Option<u32> {
    value.and_then(|v| u32::try_from(v).ok())
}

pub(crate) fn to_i32(value: Option<i64>) -> Option<i32> {
    value.and_then(|v| i32::try_from(v).ok())
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::fs;
    use std::path::{Path, PathBuf};

    use chrono::{TimeZone, Utc};
    use rlf_core::{FetchedPage, LeadSource};

    pub fn workspace_root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .canonicalize()
            .expect("workspace root")
    }

    pub fn fixture_page(source: LeadSource, file: &str, url: &str) -> FetchedPage {
        let path = workspace_root().join("fixtures").join(source.as_str()).join(file);
        let body = fs::read_to_string(&path).unwrap_or_else(|e| panic!("reading {}: {e}", path.display()));
        let mut page = FetchedPage::from_body(source, url, body);
        page.fetched_at = Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).single().unwrap();
        page
    }

    pub fn inline_page(source: LeadSource, url: &str, body: &str) -> FetchedPage {
        FetchedPage::from_body(source, url, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn int_values_take_first_digit_run() {
        assert_eq!(parse_int_value("$425,000"), Some(425_000));
        assert_eq!(parse_int_value("Est. $1,250,000+ value"), Some(1_250_000));
        assert_eq!(parse_int_value("Contact agent"), None);
    }

    #[test]
    fn bed_bath_stats() {
        assert_eq!(parse_bed_bath("3 bed, 2.5 bath"), (Some(3), Some(2.5)));
        assert_eq!(parse_bed_bath("4 bds | 3 ba | 2,410 sqft"), (Some(4), Some(3.0)));
        assert_eq!(parse_bed_bath("Studio"), (None, None));
        assert_eq!(parse_square_feet("4 bds | 3 ba | 2,410 sqft"), Some(2410));
    }

    #[test]
    fn balanced_json_respects_strings() {
        let text = r#"window.__INITIAL_STATE__ = {"a": "} tricky {", "b": [1, 2]}; more();"#;
        let raw = json_after_marker(text, "window.__INITIAL_STATE__").unwrap();
        let value: JsonValue = serde_json::from_str(raw).unwrap();
        assert_eq!(value["b"], json!([1, 2]));
        assert!(json_after_marker("var x = 1; window.__INITIAL_STATE__", "window.__INITIAL_STATE__").is_none());
    }

    #[test]
    fn assigned_arrays_are_found_by_name() {
        let script = r#"var meta = {}; var accounts = [{"account": "0001", "address": "1 Elm"}];"#;
        let items = json_array_assigned(script, &["properties", "accounts"], "test")
            .unwrap()
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(json_text(&items[0], &["account"]).as_deref(), Some("0001"));

        let quoted = r#"{"reports": [{"id": 7}]}"#;
        let items = json_array_assigned(quoted, &["storms", "reports"], "test").unwrap().unwrap();
        assert_eq!(items[0]["id"], 7);
    }

    #[test]
    fn malformed_assigned_array_is_an_error() {
        let err = json_array_assigned("properties = [{oops}]", &["properties"], "cad").unwrap_err();
        assert!(matches!(err, AdapterError::InvalidJson { context: "cad", .. }));
    }

    #[test]
    fn json_accessors_skip_falsy_values() {
        let obj = json!({"account": "", "id": "A-9", "price": 0, "total_value": "$310,500", "sqFt": {"value": 1850}, "homestead": "Yes"});
        assert_eq!(json_text(&obj, &["account", "id"]).as_deref(), Some("A-9"));
        assert_eq!(json_int(&obj, &["price", "total_value"]), Some(310_500));
        assert_eq!(json_int(&obj, &["sqFt"]), Some(1850));
        assert!(json_flag(&obj, &["homestead"]));
        assert!(find_key(&json!({"a": {"b": [{"listResults": [1]}]}}), "listResults").is_some());
    }

    #[test]
    fn contact_text_reads_only_contact_fields() {
        let obj = json!({
            "zpid": "2053462178",
            "mlsId": "20481133",
            "listingUpdated": 1772409600000u64,
            "agentPhone": "(972) 555-0142",
            "broker": {"name": "Lone Star Homes", "phone": "469.555.0190"}
        });
        let text = json_contact_text(&obj);
        assert!(text.starts_with("(972) 555-0142 "));
        assert!(text.contains("Lone Star Homes") && text.contains("469.555.0190"));
        assert!(!text.contains("2053462178") && !text.contains("20481133"));
        assert_eq!(json_contact_text(&json!({"zpid": "2053462178", "price": 450000})), "");
    }

    #[test]
    fn dates_in_common_formats() {
        let expected = NaiveDate::from_ymd_opt(2026, 3, 20);
        assert_eq!(parse_date("03/20/2026"), expected);
        assert_eq!(parse_date("2026-03-20"), expected);
        assert_eq!(parse_date("20260320"), expected);
        assert_eq!(parse_date("20/03/2026"), expected);
        assert_eq!(parse_date("soon"), None);
    }

    #[test]
    fn short_addresses_are_dropped_and_county_filled() {
        let mut ok = LeadDraft::new(
            "1420 Legacy Dr, Frisco, TX 75034",
            "https://example.test",
            rlf_core::SourceDetails::Redfin {
                mls_number: None,
                days_on_market: None,
            },
        );
        ok.city = "Frisco".into();
        let short = LeadDraft::new("12 Oak", "https://example.test", ok.details.clone());
        let kept = finalize_drafts(vec![ok, short]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].county, "Collin County");
        assert_eq!(kept[0].state, "TX");
        assert_eq!(kept[0].zip_code, "75034");
    }

    #[test]
    fn registry_covers_every_source() {
        for source in LeadSource::ALL {
            let adapter = adapter_for_source(source);
            assert_eq!(adapter.source(), source);
            let targets = adapter.default_targets();
            assert!(!targets.is_empty());
            assert!(targets.iter().all(|t| t.source == source));
        }
        assert_eq!(all_adapters().len(), 5);
    }
}
