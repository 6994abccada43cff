//! Municipal building-permit searches.
//!
//! Permit portals do not embed structured state, so rows are classified cell
//! by cell. Labelled `div` cards are the fallback.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use rlf_core::score::permit_priority;
use rlf_core::{FetchTarget, FetchedPage, LeadDraft, LeadSource, SourceDetails};
use scraper::{ElementRef, Html};

use crate::{
    element_lines, element_text, parse_date, parse_int_value, selector, structured_then_html, targets,
    AdapterError, SourceAdapter,
};

const MIN_ROW_CELLS: usize = 4;
const UNKNOWN: &str = "Unknown";

const SEARCH_PAGES: [&str; 14] = [
    "https://www.dallascityhall.com/departments/sustainabledevelopment/Pages/permits-search.aspx?permit_type=roofing",
    "https://www.dallascityhall.com/departments/sustainabledevelopment/Pages/permits-search.aspx?permit_type=residential",
    "https://www.fortworthtexas.gov/departments/development-services/building-inspection/permits?type=roofing",
    "https://www.fortworthtexas.gov/departments/development-services/building-inspection/permits?type=residential",
    "https://www.plano.gov/1207/Building-Permits?category=roofing",
    "https://www.plano.gov/1207/Building-Permits?category=residential",
    "https://www.cityofirving.org/building-permits?type=roofing",
    "https://www.cityofirving.org/building-permits?type=residential",
    "https://www.arlingtontx.gov/building-permits?category=roofing",
    "https://www.arlingtontx.gov/building-permits?category=residential",
    "https://www.garlandtx.gov/permits?filter=roofing",
    "https://www.garlandtx.gov/permits?filter=residential",
    "https://www.cor.net/building-permits?type=roofing",
    "https://www.cor.net/building-permits?type=residential",
];

const TABLES: &str = r#"table[class*="permit"], table[class*="result"], table[class*="data"]"#;
const ROWS: &str = r#"tr[class*="permit"], tr[class*="result"], tr[class*="row"]"#;
const CARDS: &str = r#"div[class*="permit"], div[class*="result"], div[class*="card"]"#;

const STATUSES: [&str; 6] = ["approved", "pending", "issued", "completed", "active", "expired"];

const URL_CITIES: [(&str, &str); 8] = [
    ("dallas", "Dallas"),
    ("fortworth", "Fort Worth"),
    ("plano", "Plano"),
    ("irving", "Irving"),
    ("arlington", "Arlington"),
    ("garland", "Garland"),
    ("richardson", "Richardson"),
    ("cor.net", "Richardson"),
];

static PERMIT_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z0-9-]+$").expect("permit id"));
static STREET_ADDRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\d+\s+\w+\s+(?:st|street|ave|avenue|dr|drive|blvd|boulevard|ln|lane|rd|road)\b")
        .expect("permit address")
});
static WORK_TYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)roof|residential|commercial|repair|replacement").expect("permit type"));
static FILED_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{1,2}/\d{1,2}/\d{4}").expect("permit date"));
static AMOUNT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\$?[\d,]+(?:\.\d+)?$").expect("permit value"));
static ZIP: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{5}").expect("permit zip"));

static LABEL_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)permit\s*(?:#|no\.?|number)\s*:?\s*([A-Z0-9-]*\d[A-Z0-9-]*)").expect("permit id label")
});
static LABEL_ADDRESS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)address\s*:?\s*([^\n]+)").expect("address label"));
static LABEL_TYPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)type\s*:?\s*([^\n]+)").expect("type label"));
static LABEL_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)value\s*:?\s*\$?([\d,]+)").expect("value label"));
static LABEL_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:date|filed)(?:\s+filed)?\s*:?\s*(\d{1,2}/\d{1,2}/\d{4})").expect("date label")
});

#[derive(Debug, Default, Clone, Copy)]
pub struct PermitAdapter;

impl SourceAdapter for PermitAdapter {
    fn source(&self) -> LeadSource {
        LeadSource::Permit
    }

    fn default_targets(&self) -> Vec<FetchTarget> {
        targets(LeadSource::Permit, &SEARCH_PAGES)
    }

    fn parse_listing(&self, page: &FetchedPage) -> Vec<LeadDraft> {
        structured_then_html(LeadSource::Permit, page, |_| Ok(Vec::new()), |doc| parse_permits(doc, page))
    }
}

/// Municipality a permit portal URL belongs to.
pub fn city_from_url(url: &str) -> &'static str {
    let lowered = url.to_lowercase();
    URL_CITIES
        .iter()
        .find(|(needle, _)| lowered.contains(needle))
        .map(|(_, city)| *city)
        .unwrap_or("")
}

/// Fields collected from one permit row or card before it becomes a draft.
#[derive(Debug, Default)]
struct PermitFields {
    permit_id: String,
    address: String,
    permit_type: String,
    value: Option<i64>,
    date_filed: Option<NaiveDate>,
    contractor: Option<String>,
    status: String,
    contact_text: String,
}

fn parse_permits(document: &Html, page: &FetchedPage) -> Result<Vec<LeadDraft>, AdapterError> {
    let tables = selector(TABLES)?;
    let rows = selector(ROWS)?;
    let cards = selector(CARDS)?;
    let any_row = selector("tr")?;

    let mut found = Vec::new();
    let table_list: Vec<_> = document.select(&tables).collect();
    if !table_list.is_empty() {
        for table in table_list {
            for row in table.select(&any_row).skip(1) {
                found.extend(fields_from_row(&row)?);
            }
        }
    } else {
        let row_list: Vec<_> = document.select(&rows).collect();
        if !row_list.is_empty() {
            for row in row_list {
                found.extend(fields_from_row(&row)?);
            }
        } else {
            for card in document.select(&cards) {
                // Wrappers that hold other cards would repeat their first permit.
                if card.select(&cards).next().is_some() {
                    continue;
                }
                found.extend(fields_from_card(&card));
            }
        }
    }

    let today = page.fetched_at.date_naive();
    Ok(found.into_iter().map(|fields| into_draft(fields, page, today)).collect())
}

fn fields_from_row(row: &ElementRef<'_>) -> Result<Option<PermitFields>, AdapterError> {
    let cell_sel = selector("td, th")?;
    let cells: Vec<String> = row.select(&cell_sel).map(|c| element_text(&c)).collect();
    if cells.len() < MIN_ROW_CELLS {
        return Ok(None);
    }

    let mut fields = PermitFields {
        contact_text: cells.iter().skip(1).map(String::as_str).collect::<Vec<_>>().join(" "),
        ..PermitFields::default()
    };
    for (idx, text) in cells.iter().enumerate() {
        if text.is_empty() {
            continue;
        }
        if idx == 0 && PERMIT_ID.is_match(text) {
            fields.permit_id = text.clone();
        } else if STREET_ADDRESS.is_match(text) {
            fields.address = text.clone();
        } else if WORK_TYPE.is_match(text) {
            fields.permit_type = text.clone();
        } else if FILED_DATE.is_match(text) {
            fields.date_filed = FILED_DATE.find(text).and_then(|m| parse_date(m.as_str()));
        } else if AMOUNT.is_match(text) {
            fields.value = parse_int_value(text);
        } else if STATUSES.contains(&text.to_lowercase().as_str()) {
            fields.status = text.clone();
        } else if text.len() > 5
            && !fields.permit_id.is_empty()
            && !fields.address.is_empty()
            && !["permit", "roof", "residential"]
                .iter()
                .any(|word| text.to_lowercase().contains(word))
        {
            fields.contractor = Some(text.clone());
        }
    }

    Ok(complete(fields))
}

fn fields_from_card(card: &ElementRef<'_>) -> Option<PermitFields> {
    let text = element_lines(card);
    let capture = |re: &Regex| re.captures(&text).map(|c| c[1].trim().to_string());

    let fields = PermitFields {
        permit_id: capture(&LABEL_ID).unwrap_or_default(),
        address: capture(&LABEL_ADDRESS).unwrap_or_default(),
        permit_type: capture(&LABEL_TYPE).unwrap_or_default(),
        value: capture(&LABEL_VALUE).and_then(|v| parse_int_value(&v)),
        date_filed: capture(&LABEL_DATE).and_then(|d| parse_date(&d)),
        contractor: None,
        status: String::new(),
        contact_text: LABEL_ID.replace_all(&text, "").into_owned(),
    };
    complete(fields)
}

fn complete(fields: PermitFields) -> Option<PermitFields> {
    if fields.permit_id.is_empty() || fields.address.is_empty() {
        None
    } else {
        Some(fields)
    }
}

fn into_draft(fields: PermitFields, page: &FetchedPage, today: NaiveDate) -> LeadDraft {
    let permit_type = if fields.permit_type.is_empty() {
        UNKNOWN.to_string()
    } else {
        fields.permit_type
    };
    let priority = permit_priority(&permit_type, fields.value, fields.date_filed, today);
    let status = if fields.status.is_empty() {
        UNKNOWN.to_string()
    } else {
        fields.status
    };

    let zip_code = ZIP
        .find(&fields.address)
        .map(|m| m.as_str().to_string())
        .unwrap_or_default();
    let mut draft = LeadDraft::new(
        fields.address,
        page.url.clone(),
        SourceDetails::Permit {
            permit_id: fields.permit_id,
            permit_type: permit_type.clone(),
            date_filed: fields.date_filed.map(|d| d.format("%Y-%m-%d").to_string()),
            contractor_name: fields.contractor,
            status,
            priority,
        },
    );
    draft.city = city_from_url(&page.url).to_string();
    draft.state = "TX".to_string();
    draft.zip_code = zip_code;
    draft.value = fields.value;
    draft.property_type = permit_type;
    draft.contact_text = fields.contact_text;
    draft
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{fixture_page, inline_page};

    const DALLAS: &str =
        "https://www.dallascityhall.com/departments/sustainabledevelopment/Pages/permits-search.aspx?permit_type=roofing";
    const RICHARDSON: &str = "https://www.cor.net/building-permits?type=roofing";

    fn permit_fields(draft: &LeadDraft) -> (&str, &str, Option<&str>, Option<&str>, &str, u8) {
        match &draft.details {
            SourceDetails::Permit {
                permit_id,
                permit_type,
                date_filed,
                contractor_name,
                status,
                priority,
            } => (
                permit_id.as_str(),
                permit_type.as_str(),
                date_filed.as_deref(),
                contractor_name.as_deref(),
                status.as_str(),
                *priority,
            ),
            other => panic!("unexpected details {other:?}"),
        }
    }

    #[test]
    fn portal_urls_map_to_cities() {
        assert_eq!(city_from_url(DALLAS), "Dallas");
        assert_eq!(city_from_url(RICHARDSON), "Richardson");
        assert_eq!(
            city_from_url("https://www.fortworthtexas.gov/departments/permits?type=roofing"),
            "Fort Worth"
        );
        assert_eq!(city_from_url("https://permits.example.gov"), "");
    }

    #[test]
    fn table_rows_are_classified_cell_by_cell() {
        // Fixture pages are stamped 2026-04-01.
        let page = fixture_page(LeadSource::Permit, "search_table.html", DALLAS);
        let drafts = PermitAdapter.parse_listing(&page);

        assert_eq!(drafts.len(), 2);
        let first = &drafts[0];
        assert_eq!(first.address_text, "4418 Bluffview Blvd, Dallas TX 75209");
        assert_eq!(first.city, "Dallas");
        assert_eq!(first.zip_code, "75209");
        assert_eq!(first.county, "Dallas County");
        assert_eq!(first.value, Some(18_500));
        assert_eq!(
            permit_fields(first),
            (
                "BP-2026-004812",
                "Residential Re-Roof",
                Some("2026-03-20"),
                Some("Lone Star Exteriors LLC"),
                "Issued",
                10
            )
        );

        let second = &drafts[1];
        assert_eq!(second.value, Some(6_200));
        let (id, kind, filed, contractor, status, priority) = permit_fields(second);
        assert_eq!(id, "BP-2026-003977");
        assert_eq!(kind, "Foundation Repair");
        assert_eq!(filed, Some("2025-12-15"));
        assert_eq!(contractor, None);
        assert_eq!(status, "Pending");
        assert_eq!(priority, 9);
    }

    #[test]
    fn labelled_cards_are_the_fallback() {
        let page = fixture_page(LeadSource::Permit, "search_cards.html", RICHARDSON);
        let drafts = PermitAdapter.parse_listing(&page);

        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].address_text, "1207 Belt Line Rd, Richardson, TX 75080");
        assert_eq!(drafts[0].city, "Richardson");
        assert_eq!(drafts[0].value, Some(22_000));
        let (id, kind, filed, _, status, priority) = permit_fields(&drafts[0]);
        assert_eq!(id, "RP-26-00311");
        assert_eq!(kind, "Roof Replacement");
        assert_eq!(filed, Some("2026-03-28"));
        assert_eq!(status, "Unknown");
        assert_eq!(priority, 10);

        let (_, kind, _, _, _, priority) = permit_fields(&drafts[1]);
        assert_eq!(kind, "Unknown");
        assert_eq!(priority, 5);
    }

    #[test]
    fn short_rows_and_rows_without_ids_are_ignored() {
        let body = r#"<table class="permit-results">
            <tr><th>Permit</th><th>Address</th><th>Type</th><th>Value</th></tr>
            <tr><td>BP-1</td><td>12 Oak Ln</td><td>Roof</td></tr>
            <tr><td>pending review</td><td>810 Abrams Rd, Dallas TX 75214</td><td>Roof</td><td>$9,000</td></tr>
        </table>"#;
        assert!(PermitAdapter.parse_listing(&inline_page(LeadSource::Permit, DALLAS, body)).is_empty());
    }
}
