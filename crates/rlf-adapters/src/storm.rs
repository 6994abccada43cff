//! Severe-weather report pages (SPC, NWS offices, local news).
//!
//! A storm event is a lead for the area it hit rather than for a single
//! property, so the draft address is `"<location>, <county>, <state>"`.

use once_cell::sync::Lazy;
use regex::Regex;
use rlf_core::geo::county_for_city;
use rlf_core::{FetchTarget, FetchedPage, LeadDraft, LeadSource, SourceDetails};
use scraper::{ElementRef, Html};
use serde_json::Value as JsonValue;

use crate::{
    element_text, first_matching, json_array_assigned, json_float, json_int, json_text, parse_date, script_texts,
    selector, structured_then_html, targets, to_u32, AdapterError, SourceAdapter,
};

const MAX_JSON_EVENTS: usize = 20;
const MAX_ROWS: usize = 15;
const DEFAULT_STATE: &str = "TX";
const MAX_LOCATION_CHARS: usize = 30;

const REPORT_PAGES: [&str; 9] = [
    "https://www.spc.noaa.gov/climo/reports/today_filtered.html",
    "https://www.spc.noaa.gov/climo/reports/yesterday_filtered.html",
    "https://www.weather.gov/fwd/hailreports",
    "https://www.weather.gov/ewx/hailreports",
    "https://www.wunderground.com/severe/us/tx/dallas-county",
    "https://www.wunderground.com/severe/us/tx/tarrant-county",
    "https://www.wunderground.com/severe/us/tx/collin-county",
    "https://www.nbcdfw.com/weather/severe-weather-alerts/",
    "https://www.fox4news.com/weather/severe-weather",
];

const ROW_SELECTORS: [&str; 7] = [
    "table.storm-reports tbody tr",
    ".storm-event",
    ".weather-report",
    ".severe-weather-row",
    "[data-storm-id]",
    r#"tr[class*="storm"]"#,
    ".report-row",
];

const EVENT_KEYWORDS: [&str; 6] = ["hail", "tornado", "wind", "thunderstorm", "severe", "storm"];

/// Common names for hail diameters, in inches.
const HAIL_SIZES: [(&str, f64); 10] = [
    ("tennis ball", 2.5),
    ("golf ball", 1.75),
    ("ping pong", 1.5),
    ("baseball", 2.75),
    ("softball", 4.0),
    ("quarter", 1.0),
    ("marble", 0.5),
    ("nickel", 0.88),
    ("penny", 0.75),
    ("pea", 0.25),
];

const SEVERE_HAIL_INCHES: f64 = 1.0;
const SEVERE_WIND_MPH: u32 = 58;
const SEVERE_DAMAGE: i64 = 10_000;
const HIGH_POTENTIAL_DAMAGE: i64 = 5_000;

static INCHES: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(?:inch|in)\b").expect("hail inches"));
static MPH: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(\d+)\s*mph").expect("wind mph"));
static MAGNITUDE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\d+(?:\.\d+)?\s*(?:inch|in|mph)\b").expect("magnitude"));
static ROW_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{1,2}[/-]\d{1,2}[/-]\d{2,4}").expect("row date"));
static REPORT_TIME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}$").expect("report time"));
static PLACE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Z][a-z]+(?:\s+[A-Z][a-z]+)*\b").expect("place name"));

#[derive(Debug, Default, Clone, Copy)]
pub struct StormAdapter;

impl SourceAdapter for StormAdapter {
    fn source(&self) -> LeadSource {
        LeadSource::Storm
    }

    fn default_targets(&self) -> Vec<FetchTarget> {
        targets(LeadSource::Storm, &REPORT_PAGES)
    }

    fn parse_listing(&self, page: &FetchedPage) -> Vec<LeadDraft> {
        structured_then_html(
            LeadSource::Storm,
            page,
            |doc| parse_script_reports(doc, page),
            |doc| parse_report_rows(doc, page),
        )
    }
}

/// Stored event category for a raw report type.
pub fn categorize_event_type(raw: &str) -> &'static str {
    let lowered = raw.to_lowercase();
    if lowered.contains("hail") {
        "Hail"
    } else if lowered.contains("tornado") || lowered.contains("funnel") {
        "Tornado"
    } else if lowered.contains("wind") || lowered.contains("straight-line") {
        "High Wind"
    } else if lowered.contains("thunderstorm") {
        "Severe Thunderstorm"
    } else if lowered.contains("flood") {
        "Flood"
    } else {
        "Severe Weather"
    }
}

/// Hail diameter from `"1.75 inch"` style text or a named size (`"golf ball"`).
pub fn hail_size_inches(magnitude: &str) -> Option<f64> {
    if let Some(caps) = INCHES.captures(magnitude) {
        return caps[1].parse().ok();
    }
    let lowered = magnitude.to_lowercase();
    HAIL_SIZES
        .iter()
        .find(|(name, _)| lowered.contains(name))
        .map(|(_, inches)| *inches)
}

/// Hail size for a report, reading bare SPC size codes (`175` = 1.75") too.
fn report_hail_size(raw_type: &str, magnitude: Option<&str>) -> Option<f64> {
    let magnitude = magnitude?;
    if let Some(size) = hail_size_inches(magnitude) {
        return Some(size);
    }
    if !raw_type.to_lowercase().contains("hail") {
        return None;
    }
    let bare: f64 = magnitude.trim().parse().ok()?;
    Some(if bare >= 10.0 { bare / 100.0 } else { bare })
}

/// Derived impact assessment for one event.
#[derive(Debug, Clone, PartialEq)]
pub struct StormAssessment {
    pub severity: &'static str,
    pub impact_radius_miles: u32,
    pub roofing_potential: &'static str,
}

/// Severity, impact radius and roofing potential from the raw report type.
pub fn assess_storm(raw_type: &str, hail_size: Option<f64>, wind_mph: Option<u32>, damage: Option<i64>) -> StormAssessment {
    let kind = raw_type.to_lowercase();
    let is_hail = kind.contains("hail");
    let is_tornado = kind.contains("tornado");
    let is_wind = kind.contains("wind") || kind.contains("thunderstorm");
    let big_hail = hail_size.is_some_and(|s| s >= SEVERE_HAIL_INCHES);

    let severity = if is_tornado
        || big_hail
        || wind_mph.is_some_and(|w| w >= SEVERE_WIND_MPH)
        || damage.is_some_and(|d| d > SEVERE_DAMAGE)
    {
        "Severe"
    } else if is_hail || is_wind {
        "Moderate"
    } else {
        "Minor"
    };

    let impact_radius_miles = if is_tornado {
        10
    } else if is_hail {
        if big_hail {
            5
        } else {
            2
        }
    } else if is_wind {
        8
    } else {
        3
    };

    let roofing_potential = if is_hail {
        if big_hail {
            "High"
        } else {
            "Medium"
        }
    } else if is_tornado {
        "High"
    } else if is_wind {
        "Medium"
    } else if damage.is_some_and(|d| d > HIGH_POTENTIAL_DAMAGE) {
        "High"
    } else {
        "Low"
    };

    StormAssessment {
        severity,
        impact_radius_miles,
        roofing_potential,
    }
}

/// Raw report fields shared by the script and table paths.
#[derive(Debug, Default)]
struct StormReport {
    event_id: String,
    raw_type: String,
    location: String,
    county: String,
    state: String,
    event_date: Option<String>,
    event_time: Option<String>,
    magnitude: Option<String>,
    wind_mph: Option<u32>,
    damage: Option<i64>,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

fn parse_script_reports(document: &Html, page: &FetchedPage) -> Result<Vec<LeadDraft>, AdapterError> {
    for script in script_texts(document)? {
        let lowered = script.to_lowercase();
        if !["storm", "hail", "tornado"].iter().any(|k| lowered.contains(k)) {
            continue;
        }
        let Some(items) = json_array_assigned(&script, &["storms", "events", "reports"], "storm script")? else {
            continue;
        };
        return Ok(items
            .iter()
            .take(MAX_JSON_EVENTS)
            .filter_map(report_from_json)
            .map(|report| into_draft(report, page))
            .collect());
    }
    Ok(Vec::new())
}

fn report_from_json(item: &JsonValue) -> Option<StormReport> {
    let event_id = json_text(item, &["id", "event_id", "report_id"])?;
    let raw_type = json_text(item, &["type", "event_type", "phenomenon"])?;
    let location = json_text(item, &["city", "location", "place"])?;

    Some(StormReport {
        event_id,
        raw_type,
        location,
        county: json_text(item, &["county", "county_name"]).unwrap_or_default(),
        state: json_text(item, &["state", "st"]).unwrap_or_else(|| DEFAULT_STATE.to_string()),
        event_date: json_text(item, &["date", "event_date", "begin_date"])
            .and_then(|d| parse_date(&d))
            .map(|d| d.format("%Y-%m-%d").to_string()),
        event_time: json_text(item, &["time", "event_time", "begin_time"]),
        magnitude: json_text(item, &["magnitude", "size", "max_hail_size"]),
        wind_mph: to_u32(json_int(item, &["wind_speed", "max_wind"])),
        damage: json_int(item, &["damage", "damage_property", "damage_crops"]),
        latitude: json_float(item, &["lat", "latitude"]),
        longitude: json_float(item, &["lon", "lng", "longitude"]),
    })
}

fn parse_report_rows(document: &Html, page: &FetchedPage) -> Result<Vec<LeadDraft>, AdapterError> {
    let mut drafts = Vec::new();
    for row in first_matching(document, &ROW_SELECTORS)?.into_iter().take(MAX_ROWS) {
        if let Some(report) = report_from_row(&row)? {
            drafts.push(into_draft(report, page));
        }
    }
    Ok(drafts)
}

fn report_from_row(row: &ElementRef<'_>) -> Result<Option<StormReport>, AdapterError> {
    let row_text = element_text(row);
    let lowered = row_text.to_lowercase();
    let Some(keyword) = EVENT_KEYWORDS.iter().find(|k| lowered.contains(**k)) else {
        return Ok(None);
    };

    let td_sel = selector("td")?;
    let columns: Vec<String> = row.select(&td_sel).map(|c| element_text(&c)).collect();
    let mut report = if columns.len() >= 5 && REPORT_TIME.is_match(&columns[0]) {
        spc_columns(&columns)
    } else {
        let cell_sel = selector("td, div, span")?;
        let cells: Vec<String> = row
            .select(&cell_sel)
            .map(|c| element_text(&c))
            .filter(|t| !t.is_empty())
            .collect();
        scanned_cells(&cells)
    };
    if report.location.is_empty() {
        return Ok(None);
    }

    report.raw_type = title_case_keyword(keyword);
    if report.magnitude.is_none() {
        report.magnitude = MAGNITUDE.find(&row_text).map(|m| m.as_str().to_string());
    }
    report.wind_mph = report.magnitude.as_deref().and_then(|m| match MPH.captures(m) {
        Some(caps) => caps[1].parse().ok(),
        // SPC wind tables carry the bare gust speed.
        None if *keyword == "wind" => m.trim().parse().ok(),
        None => None,
    });
    if report.event_date.is_none() {
        report.event_date = ROW_DATE
            .find(&row_text)
            .and_then(|m| parse_date(m.as_str()))
            .map(|d| d.format("%Y-%m-%d").to_string());
    }
    report.event_id = row
        .value()
        .attr("data-storm-id")
        .map(str::to_string)
        .unwrap_or_else(|| synthetic_event_id(&report));
    Ok(Some(report))
}

/// SPC layout: Time | Size/Speed | Location | County | State | Lat | Lon | Comments.
fn spc_columns(columns: &[String]) -> StormReport {
    let cell = |idx: usize| columns.get(idx).map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
    StormReport {
        event_time: cell(0),
        magnitude: cell(1),
        location: cell(2).unwrap_or_default(),
        county: cell(3).unwrap_or_default(),
        state: cell(4).unwrap_or_else(|| DEFAULT_STATE.to_string()),
        latitude: cell(5).and_then(|v| v.parse().ok()),
        longitude: cell(6).and_then(|v| v.parse().ok()),
        ..StormReport::default()
    }
}

/// Loose cards: the first short place-name cell is the location, a cell
/// mentioning a county is the county.
fn scanned_cells(cells: &[String]) -> StormReport {
    let mut report = StormReport {
        state: DEFAULT_STATE.to_string(),
        ..StormReport::default()
    };
    for text in cells {
        if text.chars().count() >= MAX_LOCATION_CHARS || !PLACE_NAME.is_match(text) {
            continue;
        }
        let lowered = text.to_lowercase();
        if lowered.contains("county") {
            if report.county.is_empty() {
                report.county = text.clone();
            }
        } else if report.location.is_empty()
            && !EVENT_KEYWORDS.iter().any(|k| lowered.contains(k))
            && !text.chars().any(|c| c.is_ascii_digit())
        {
            report.location = text.clone();
        }
    }
    report
}

fn title_case_keyword(keyword: &str) -> String {
    let mut chars = keyword.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn synthetic_event_id(report: &StormReport) -> String {
    let mut id = format!(
        "{}_{}_{}",
        report.raw_type,
        report.location,
        report.event_date.as_deref().unwrap_or_default()
    );
    if let Some(time) = &report.event_time {
        id.push('_');
        id.push_str(time);
    }
    id.replace([' ', '/'], "_")
}

fn county_label(county: &str) -> String {
    let county = county.trim();
    if county.is_empty() || county.to_lowercase().ends_with("county") {
        county.to_string()
    } else {
        format!("{county} County")
    }
}

fn into_draft(report: StormReport, page: &FetchedPage) -> LeadDraft {
    let hail_size = report_hail_size(&report.raw_type, report.magnitude.as_deref());
    let assessment = assess_storm(&report.raw_type, hail_size, report.wind_mph, report.damage);

    let county = match county_label(&report.county) {
        label if label.is_empty() => county_for_city(&report.location).to_string(),
        label => label,
    };
    let address = [report.location.as_str(), county.as_str(), report.state.as_str()]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(", ");

    let details = SourceDetails::Storm {
        event_id: report.event_id,
        event_type: categorize_event_type(&report.raw_type).to_string(),
        event_date: report.event_date,
        event_time: report.event_time,
        magnitude: report.magnitude,
        hail_size_inches: hail_size,
        wind_speed_mph: report.wind_mph,
        latitude: report.latitude,
        longitude: report.longitude,
        severity: assessment.severity.to_string(),
        impact_radius_miles: assessment.impact_radius_miles,
        roofing_potential: assessment.roofing_potential.to_string(),
    };
    let mut draft = LeadDraft::new(address, page.url.clone(), details);
    draft.city = report.location;
    draft.state = report.state;
    draft.county = county;
    draft.value = report.damage;
    draft
}
