//! County appraisal district property searches.

use once_cell::sync::Lazy;
use regex::Regex;
use rlf_core::geo::{county_for_city, parse_address};
use rlf_core::{FetchTarget, FetchedPage, LeadDraft, LeadSource, SourceDetails};
use scraper::{ElementRef, Html};
use serde_json::Value as JsonValue;

use crate::{
    element_text, first_matching, json_array_assigned, json_contact_text, json_flag, json_int, json_text,
    script_texts, selector, structured_then_html, targets, to_i32, to_u32, AdapterError, SourceAdapter,
};

const MAX_JSON_RECORDS: usize = 15;
const MAX_ROWS: usize = 12;
const DEFAULT_PROPERTY_TYPE: &str = "Residential";
/// Dollar amounts at or below this are usually fees, not valuations.
const MIN_APPRAISAL: i64 = 50_000;

const SEARCH_PAGES: [&str; 9] = [
    "https://www.dallascad.org/PropertySearch/Search?searchType=advanced&minValue=300000&maxValue=800000",
    "https://www.dallascad.org/PropertySearch/Search?searchType=street&street=Preston&city=Dallas",
    "https://www.tad.org/property-search?city=Fort+Worth&minValue=250000&maxValue=700000",
    "https://www.tad.org/property-search?city=Arlington&minValue=200000&maxValue=600000",
    "https://www.collincad.org/search?city=Plano&minValue=400000&maxValue=1000000",
    "https://www.collincad.org/search?city=Frisco&minValue=450000&maxValue=1200000",
    "https://www.dentoncad.com/property-search?city=Lewisville&minValue=300000",
    "https://www.dentoncad.com/property-search?city=Flower+Mound&minValue=350000",
    "https://hcad.org/property-search?city=Houston&minValue=300000&maxValue=800000",
];

const ROW_SELECTORS: [&str; 6] = [
    "table.search-results tbody tr",
    ".property-row",
    ".property-card",
    ".search-result-row",
    "[data-account]",
    r#"tr[class*="property"]"#,
];

const HOST_COUNTIES: [(&str, &str); 5] = [
    ("dallascad", "Dallas County"),
    ("tad.org", "Tarrant County"),
    ("collincad", "Collin County"),
    ("dentoncad", "Denton County"),
    ("hcad.org", "Harris County"),
];

static URL_CITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)dallas|fort(?:\+|\s|%20)worth|plano|frisco|arlington|irving|garland|lewisville|flower(?:\+|\s|%20)mound|houston",
    )
    .expect("cad url city")
});
static ACCOUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:account|acct)[#\s:]*([A-Z0-9-]+)").expect("cad account"));
static STREET_ADDRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\d+\s+\w+.*\b(?:st|street|ave|avenue|rd|road|dr|drive|ln|lane|blvd|boulevard)\b")
        .expect("cad street address")
});
static PERSON_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Z][a-z]+\s+[A-Z][a-z]+").expect("cad owner"));
static DOLLARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$([\d,]+)").expect("cad dollars"));

#[derive(Debug, Default, Clone, Copy)]
pub struct CadAdapter;

impl SourceAdapter for CadAdapter {
    fn source(&self) -> LeadSource {
        LeadSource::Cad
    }

    fn default_targets(&self) -> Vec<FetchTarget> {
        targets(LeadSource::Cad, &SEARCH_PAGES)
    }

    fn parse_listing(&self, page: &FetchedPage) -> Vec<LeadDraft> {
        structured_then_html(
            LeadSource::Cad,
            page,
            |doc| parse_script_records(doc, page),
            |doc| parse_rows(doc, page),
        )
    }
}

/// City named in a search URL (`city=Fort+Worth`), title-cased.
pub fn city_from_url(url: &str) -> String {
    URL_CITY
        .find(url)
        .map(|m| title_case(&m.as_str().replace("%20", " ").replace('+', " ")))
        .unwrap_or_default()
}

/// County served by an appraisal district host.
pub fn county_from_url(url: &str) -> &'static str {
    HOST_COUNTIES
        .iter()
        .find(|(host, _)| url.contains(host))
        .map(|(_, county)| *county)
        .unwrap_or("")
}

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let lower = word.to_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_script_records(document: &Html, page: &FetchedPage) -> Result<Vec<LeadDraft>, AdapterError> {
    for script in script_texts(document)? {
        let lowered = script.to_lowercase();
        if !lowered.contains("properties") && !lowered.contains("accounts") {
            continue;
        }
        let Some(items) = json_array_assigned(&script, &["properties", "accounts"], "cad script")? else {
            continue;
        };
        return Ok(items
            .iter()
            .take(MAX_JSON_RECORDS)
            .filter_map(|item| draft_from_record(item, page))
            .collect());
    }
    Ok(Vec::new())
}

fn draft_from_record(item: &JsonValue, page: &FetchedPage) -> Option<LeadDraft> {
    let account = json_text(item, &["account", "account_number", "id"])?;
    let address = json_text(item, &["address", "property_address", "site_address"])?;
    let appraised = json_int(item, &["appraised_value", "total_value", "assessed_value"]).filter(|v| *v > 0)?;
    let market = json_int(item, &["market_value"]).unwrap_or(appraised);

    let details = SourceDetails::Cad {
        account_number: account,
        owner_name: json_text(item, &["owner", "owner_name", "taxpayer"]),
        homestead_exemption: json_flag(item, &["homestead", "homestead_exemption"]),
        market_value: Some(market),
    };
    let mut draft = located_draft(address, page, details);
    draft.value = Some(appraised);
    draft.year_built = to_i32(json_int(item, &["year_built", "year_constructed"]));
    draft.square_feet = to_u32(json_int(item, &["square_feet", "living_area"]));
    draft.property_type =
        json_text(item, &["property_type", "improvement_type"]).unwrap_or_else(|| DEFAULT_PROPERTY_TYPE.to_string());
    draft.contact_text = json_contact_text(item);
    Some(draft)
}

fn parse_rows(document: &Html, page: &FetchedPage) -> Result<Vec<LeadDraft>, AdapterError> {
    let mut drafts = Vec::new();
    for row in first_matching(document, &ROW_SELECTORS)?.into_iter().take(MAX_ROWS) {
        if let Some(draft) = draft_from_row(&row, page)? {
            drafts.push(draft);
        }
    }
    Ok(drafts)
}

fn draft_from_row(row: &ElementRef<'_>, page: &FetchedPage) -> Result<Option<LeadDraft>, AdapterError> {
    let cell_sel = selector("td, div, span")?;
    let cells: Vec<String> = row
        .select(&cell_sel)
        .map(|cell| element_text(&cell))
        .filter(|text| !text.is_empty())
        .collect();

    let account = cells
        .iter()
        .find_map(|text| ACCOUNT.captures(text).map(|c| c[1].to_string()))
        .or_else(|| row.value().attr("data-account").map(|a| a.trim().to_string()))
        .filter(|a| !a.is_empty());
    let address = cells.iter().find(|text| STREET_ADDRESS.is_match(text)).cloned();
    let (Some(account), Some(address)) = (account, address) else {
        return Ok(None);
    };

    let owner = cells
        .iter()
        .find(|text| {
            (6..50).contains(&text.len())
                && **text != address
                && !text.chars().any(|c| c.is_ascii_digit())
                && PERSON_NAME.is_match(text)
        })
        .cloned();

    let mut appraised = None;
    for text in &cells {
        let Some(value) = DOLLARS.captures(text).and_then(|c| c[1].replace(',', "").parse::<i64>().ok()) else {
            continue;
        };
        appraised = Some(value);
        if value > MIN_APPRAISAL {
            break;
        }
    }
    let Some(appraised) = appraised.filter(|v| *v > 0) else {
        return Ok(None);
    };

    let contact_text = cells
        .iter()
        .filter(|text| !text.contains(account.as_str()))
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" ");

    let details = SourceDetails::Cad {
        account_number: account,
        owner_name: owner,
        homestead_exemption: false,
        market_value: Some(appraised),
    };
    let mut draft = located_draft(address, page, details);
    draft.value = Some(appraised);
    draft.property_type = DEFAULT_PROPERTY_TYPE.to_string();
    draft.contact_text = contact_text;
    Ok(Some(draft))
}

/// Draft with city taken from the address, else the search URL, and county
/// from the city table, else the district host.
fn located_draft(address: String, page: &FetchedPage, details: SourceDetails) -> LeadDraft {
    let parts = parse_address(&address);
    let mut draft = LeadDraft::new(address, page.url.clone(), details);
    draft.city = if parts.city.is_empty() { city_from_url(&page.url) } else { parts.city };
    draft.state = if parts.state.is_empty() { "TX".to_string() } else { parts.state };
    draft.zip_code = parts.zip_code;
    draft.county = match county_for_city(&draft.city) {
        "" => county_from_url(&page.url).to_string(),
        county => county.to_string(),
    };
    draft
}
