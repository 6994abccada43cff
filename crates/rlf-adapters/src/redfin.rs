//! Redfin city search pages.

use once_cell::sync::Lazy;
use regex::Regex;
use rlf_core::geo::parse_address;
use rlf_core::{FetchTarget, FetchedPage, LeadDraft, LeadSource, SourceDetails};
use scraper::{ElementRef, Html};
use serde_json::Value as JsonValue;

use crate::{
    element_text, first_attr_in, first_matching, first_text_in, json_after_marker, json_contact_text, json_float,
    json_int, json_lookup, json_text, parse_bed_bath, parse_int_value, script_texts, structured_then_html, targets,
    to_i32, to_u32, AdapterError, SourceAdapter,
};

const BASE_URL: &str = "https://www.redfin.com";
const DEFAULT_PROPERTY_TYPE: &str = "Single Family Residence";
const MAX_JSON_LISTINGS: usize = 10;
const MAX_CARDS: usize = 8;

const SEARCH_PAGES: [&str; 8] = [
    "https://www.redfin.com/city/30794/TX/Dallas?min_price=200000&max_price=500000",
    "https://www.redfin.com/city/30794/TX/Dallas?min_price=500000&max_price=800000",
    "https://www.redfin.com/city/30805/TX/Fort-Worth?min_price=200000&max_price=500000",
    "https://www.redfin.com/city/30827/TX/Plano?min_price=300000&max_price=700000",
    "https://www.redfin.com/city/30806/TX/Frisco?min_price=400000&max_price=800000",
    "https://www.redfin.com/city/30776/TX/Arlington?min_price=200000&max_price=500000",
    "https://www.redfin.com/city/30817/TX/Irving?min_price=250000&max_price=600000",
    "https://www.redfin.com/city/30808/TX/Garland?min_price=200000&max_price=450000",
];

const STATE_MARKERS: [&str; 2] = ["window.__INITIAL_STATE__", "window.reactAppData"];

const CARD_SELECTORS: [&str; 5] = [
    ".HomeCard",
    ".SearchResultProperty",
    r#"[data-rf-test-id="mapHomeCard"]"#,
    ".home-card",
    ".listing-card",
];
const ADDRESS_SELECTORS: [&str; 3] = [".address", ".home-address", r#"[data-rf-test-id="property-address"]"#];
const PRICE_SELECTORS: [&str; 3] = [".price", ".home-price", r#"[data-rf-test-id="property-price"]"#];

static URL_CITY: Lazy<Regex> = Lazy::new(|| Regex::new(r"/TX/([^/?]+)").expect("redfin url city"));

#[derive(Debug, Default, Clone, Copy)]
pub struct RedfinAdapter;

impl SourceAdapter for RedfinAdapter {
    fn source(&self) -> LeadSource {
        LeadSource::Redfin
    }

    fn default_targets(&self) -> Vec<FetchTarget> {
        targets(LeadSource::Redfin, &SEARCH_PAGES)
    }

    fn parse_listing(&self, page: &FetchedPage) -> Vec<LeadDraft> {
        structured_then_html(
            LeadSource::Redfin,
            page,
            |doc| parse_app_state(doc, page),
            |doc| parse_cards(doc, page),
        )
    }
}

/// City name from the `/TX/<City>` search path, dashes read as spaces.
pub fn city_from_url(url: &str) -> String {
    URL_CITY
        .captures(url)
        .map(|c| c[1].replace('-', " "))
        .unwrap_or_default()
}

fn parse_app_state(document: &Html, page: &FetchedPage) -> Result<Vec<LeadDraft>, AdapterError> {
    for script in script_texts(document)? {
        let Some(raw) = STATE_MARKERS.iter().find_map(|m| json_after_marker(&script, m)) else {
            continue;
        };
        let state: JsonValue = serde_json::from_str(raw).map_err(|source| AdapterError::InvalidJson {
            context: "redfin app state",
            source,
        })?;
        let properties = json_lookup(&state, &["searchResults", "properties"])
            .or_else(|| state.get("homes"))
            .or_else(|| state.get("listings"))
            .and_then(JsonValue::as_array);
        let Some(properties) = properties else {
            continue;
        };
        return Ok(properties
            .iter()
            .take(MAX_JSON_LISTINGS)
            .filter_map(|prop| draft_from_property(prop, page))
            .collect());
    }
    Ok(Vec::new())
}

fn draft_from_property(prop: &JsonValue, page: &FetchedPage) -> Option<LeadDraft> {
    let address = prop.get("address")?;
    let (address_text, city, state, zip) = match address {
        JsonValue::String(text) => {
            let parts = parse_address(text);
            (text.clone(), parts.city, parts.state, parts.zip_code)
        }
        obj => {
            let street = json_text(obj, &["streetAddress"]).unwrap_or_default();
            let city = json_text(obj, &["city"]).unwrap_or_default();
            let state = json_text(obj, &["state"]).unwrap_or_else(|| "TX".to_string());
            let zip = json_text(obj, &["zip"]).unwrap_or_default();
            (format!("{street}, {city}, {state} {zip}").trim().to_string(), city, state, zip)
        }
    };
    let price = json_int(prop, &["price"]).filter(|p| *p > 0)?;
    if address_text.is_empty() {
        return None;
    }

    let url = json_text(prop, &["url"])
        .map(|path| if path.starts_with("http") { path } else { format!("{BASE_URL}{path}") })
        .unwrap_or_else(|| page.url.clone());
    let details = SourceDetails::Redfin {
        mls_number: json_text(prop, &["mlsId"]),
        days_on_market: json_int(prop, &["dom"]),
    };

    let mut draft = LeadDraft::new(address_text, url, details);
    draft.city = if city.is_empty() { city_from_url(&page.url) } else { city };
    draft.state = if state.is_empty() { "TX".to_string() } else { state };
    draft.zip_code = zip;
    draft.value = Some(price);
    draft.bedrooms = to_u32(json_int(prop, &["beds"]));
    draft.bathrooms = json_float(prop, &["baths"]);
    draft.square_feet = to_u32(json_int(prop, &["sqFt"]));
    draft.year_built = to_i32(json_int(prop, &["yearBuilt"]));
    draft.property_type = json_text(prop, &["propertyType"]).unwrap_or_else(|| DEFAULT_PROPERTY_TYPE.to_string());
    draft.contact_text = json_contact_text(prop);
    Some(draft)
}

fn parse_cards(document: &Html, page: &FetchedPage) -> Result<Vec<LeadDraft>, AdapterError> {
    let mut drafts = Vec::new();
    for card in first_matching(document, &CARD_SELECTORS)?.into_iter().take(MAX_CARDS) {
        if let Some(draft) = draft_from_card(&card, page)? {
            drafts.push(draft);
        }
    }
    Ok(drafts)
}

fn draft_from_card(card: &ElementRef<'_>, page: &FetchedPage) -> Result<Option<LeadDraft>, AdapterError> {
    let Some(address) = first_text_in(card, &ADDRESS_SELECTORS)? else {
        return Ok(None);
    };
    let price = first_text_in(card, &PRICE_SELECTORS)?
        .and_then(|p| parse_int_value(&p))
        .filter(|p| *p > 0);
    let Some(price) = price else {
        return Ok(None);
    };

    let card_text = element_text(card);
    let (beds, baths) = parse_bed_bath(&card_text);
    let parts = parse_address(&address);
    let url = first_attr_in(card, r#"a[href*="/home/"]"#, "href")?
        .map(|href| if href.starts_with("http") { href } else { format!("{BASE_URL}{href}") })
        .unwrap_or_else(|| page.url.clone());

    let mut draft = LeadDraft::new(
        address,
        url,
        SourceDetails::Redfin {
            mls_number: None,
            days_on_market: None,
        },
    );
    draft.city = if parts.city.is_empty() { city_from_url(&page.url) } else { parts.city };
    draft.state = if parts.state.is_empty() { "TX".to_string() } else { parts.state };
    draft.zip_code = parts.zip_code;
    draft.value = Some(price);
    draft.bedrooms = beds;
    draft.bathrooms = baths;
    draft.property_type = DEFAULT_PROPERTY_TYPE.to_string();
    draft.contact_text = card_text;
    Ok(Some(draft))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{fixture_page, inline_page};

    const DALLAS: &str = "https://www.redfin.com/city/30794/TX/Dallas?min_price=200000&max_price=500000";
    const FORT_WORTH: &str = "https://www.redfin.com/city/30805/TX/Fort-Worth?min_price=200000&max_price=500000";

    #[test]
    fn city_is_read_from_search_url() {
        assert_eq!(city_from_url(FORT_WORTH), "Fort Worth");
        assert_eq!(city_from_url("https://www.redfin.com/zipcode/75201"), "");
    }

    #[test]
    fn initial_state_listings_are_parsed() {
        let page = fixture_page(LeadSource::Redfin, "search_initial_state.html", DALLAS);
        let drafts = RedfinAdapter.parse_listing(&page);

        assert_eq!(drafts.len(), 3);
        let first = &drafts[0];
        assert_eq!(first.address_text, "6234 Velasco Ave, Dallas, TX 75214");
        assert_eq!(first.value, Some(455_000));
        assert_eq!(first.bedrooms, Some(3));
        assert_eq!(first.bathrooms, Some(2.0));
        assert_eq!(first.square_feet, Some(1766));
        assert_eq!(first.year_built, Some(1941));
        assert_eq!(first.property_type, "Single Family Residence");
        assert_eq!(first.county, "Dallas County");
        assert_eq!(first.source_url, "https://www.redfin.com/TX/Dallas/6234-Velasco-Ave-75214/home/32044120");
        assert_eq!(
            first.details,
            SourceDetails::Redfin {
                mls_number: Some("20551873".into()),
                days_on_market: Some(6),
            }
        );
        assert_eq!(drafts[1].value, Some(389_000));
        assert_eq!(drafts[2].property_type, "Townhouse");
    }

    #[test]
    fn home_cards_are_the_fallback() {
        let page = fixture_page(LeadSource::Redfin, "search_cards.html", FORT_WORTH);
        let drafts = RedfinAdapter.parse_listing(&page);

        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].address_text, "4117 Birchman Ave, Fort Worth, TX 76107");
        assert_eq!(drafts[0].value, Some(412_500));
        assert_eq!(drafts[0].bedrooms, Some(3));
        assert_eq!(drafts[0].bathrooms, Some(2.5));
        assert_eq!(drafts[0].county, "Tarrant County");
        assert_eq!(drafts[1].city, "Fort Worth");
        assert_eq!(drafts[1].state, "TX");
    }

    #[test]
    fn card_limit_is_eight() {
        let cards: String = (0..12)
            .map(|i| {
                format!(
                    r#"<div class="HomeCard"><span class="address">{i}00 Main St, Dallas, TX 75201</span><span class="price">$30{i},000</span></div>"#
                )
            })
            .collect();
        let page = inline_page(LeadSource::Redfin, DALLAS, &format!("<html><body>{cards}</body></html>"));
        assert_eq!(RedfinAdapter.parse_listing(&page).len(), 8);
    }

    #[test]
    fn zero_priced_listings_are_skipped() {
        let body = r#"<script>window.__INITIAL_STATE__ = {"homes": [
            {"address": {"streetAddress": "1 Swiss Ave", "city": "Dallas", "zip": "75204"}, "price": 0},
            {"address": "2700 Swiss Ave, Dallas, TX 75204", "price": {"value": 710000}}
        ]};</script>"#;
        let drafts = RedfinAdapter.parse_listing(&inline_page(LeadSource::Redfin, DALLAS, body));
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].value, Some(710_000));
        assert_eq!(drafts[0].zip_code, "75204");
    }
}
