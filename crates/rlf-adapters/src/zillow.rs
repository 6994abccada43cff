//! Zillow search result pages.

use rlf_core::{FetchTarget, FetchedPage, LeadDraft, LeadSource, SourceDetails};
use scraper::{ElementRef, Html};
use serde_json::Value as JsonValue;

use crate::{
    element_text, find_key, first_attr_in, first_matching, first_text_in, json_after_marker, json_contact_text,
    json_float, json_int, json_lookup, json_text, parse_bed_bath, parse_int_value, parse_square_feet, selector,
    structured_then_html, targets, to_i32, to_u32, AdapterError, SourceAdapter,
};

const BASE_URL: &str = "https://www.zillow.com";

const SEARCH_PAGES: [&str; 10] = [
    "https://www.zillow.com/dallas-tx/",
    "https://www.zillow.com/fort-worth-tx/",
    "https://www.zillow.com/plano-tx/",
    "https://www.zillow.com/frisco-tx/",
    "https://www.zillow.com/arlington-tx/",
    "https://www.zillow.com/irving-tx/",
    "https://www.zillow.com/garland-tx/",
    "https://www.zillow.com/mckinney-tx/",
    "https://www.zillow.com/denton-tx/",
    "https://www.zillow.com/richardson-tx/",
];

const CARD_SELECTORS: [&str; 4] = [
    r#"article[data-test="property-card"]"#,
    ".list-card",
    ".property-card",
    r#"[data-test="list-card"]"#,
];

#[derive(Debug, Default, Clone, Copy)]
pub struct ZillowAdapter;

impl SourceAdapter for ZillowAdapter {
    fn source(&self) -> LeadSource {
        LeadSource::Zillow
    }

    fn default_targets(&self) -> Vec<FetchTarget> {
        targets(LeadSource::Zillow, &SEARCH_PAGES)
    }

    fn parse_listing(&self, page: &FetchedPage) -> Vec<LeadDraft> {
        structured_then_html(
            LeadSource::Zillow,
            page,
            |doc| parse_embedded_results(doc, page),
            |doc| parse_cards(doc, page),
        )
    }
}

/// `listResults` from the `__NEXT_DATA__` blob, or from the inline
/// `"cat1":{"searchResults":{"listResults":[...]` state.
fn parse_embedded_results(document: &Html, page: &FetchedPage) -> Result<Vec<LeadDraft>, AdapterError> {
    let next_data = selector("script#__NEXT_DATA__")?;
    let results = if let Some(script) = document.select(&next_data).next() {
        let raw = script.text().collect::<String>();
        let blob: JsonValue = serde_json::from_str(raw.trim()).map_err(|source| AdapterError::InvalidJson {
            context: "zillow __NEXT_DATA__",
            source,
        })?;
        find_key(&blob, "listResults").cloned()
    } else {
        match json_after_marker(&page.body, r#""listResults":"#) {
            Some(raw) => Some(serde_json::from_str(raw).map_err(|source| AdapterError::InvalidJson {
                context: "zillow listResults",
                source,
            })?),
            None => None,
        }
    };

    let Some(JsonValue::Array(items)) = results else {
        return Ok(Vec::new());
    };
    Ok(items.iter().filter_map(|item| draft_from_result(item, page)).collect())
}

fn draft_from_result(item: &JsonValue, page: &FetchedPage) -> Option<LeadDraft> {
    let street = json_text(item, &["addressStreet"]);
    let city = json_text(item, &["addressCity"]).unwrap_or_default();
    let state = json_text(item, &["addressState"]).unwrap_or_default();
    let zip = json_text(item, &["addressZipcode"]).unwrap_or_default();
    let address = json_text(item, &["address"]).or_else(|| {
        street.map(|s| format!("{s}, {city}, {state} {zip}").trim_end_matches([',', ' ']).to_string())
    })?;

    let home_info = json_lookup(item, &["hdpData", "homeInfo"]).unwrap_or(&JsonValue::Null);
    let details = SourceDetails::Zillow {
        zpid: json_text(item, &["zpid"]),
        days_on_market: json_int(home_info, &["daysOnZillow"]),
        home_status: json_text(home_info, &["homeStatus"]).or_else(|| json_text(item, &["statusType"])),
    };

    let mut draft = LeadDraft::new(address, listing_url(item, page), details);
    draft.city = city;
    draft.state = state;
    draft.zip_code = zip;
    draft.value = json_int(item, &["unformattedPrice", "price"]);
    draft.bedrooms = to_u32(json_int(item, &["beds", "bedrooms"]));
    draft.bathrooms = json_float(item, &["baths", "bathrooms"]);
    draft.square_feet = to_u32(json_int(item, &["area", "livingArea"]));
    draft.year_built = to_i32(json_int(home_info, &["yearBuilt"]));
    draft.property_type = json_text(home_info, &["homeType"]).unwrap_or_default();
    draft.contact_text = json_contact_text(item);
    Some(draft)
}

fn listing_url(item: &JsonValue, page: &FetchedPage) -> String {
    match json_text(item, &["detailUrl"]) {
        Some(url) if url.starts_with("http") => url,
        Some(path) => format!("{BASE_URL}{path}"),
        None => page.url.clone(),
    }
}

fn parse_cards(document: &Html, page: &FetchedPage) -> Result<Vec<LeadDraft>, AdapterError> {
    let mut drafts = Vec::new();
    for card in first_matching(document, &CARD_SELECTORS)? {
        if let Some(draft) = draft_from_card(&card, page)? {
            drafts.push(draft);
        }
    }
    Ok(drafts)
}

fn draft_from_card(card: &ElementRef<'_>, page: &FetchedPage) -> Result<Option<LeadDraft>, AdapterError> {
    let price = first_text_in(card, &[r#"[data-test="property-card-price"]"#, ".list-card-price"])?
        .and_then(|p| parse_int_value(&p));
    let Some(price) = price else {
        return Ok(None);
    };
    let Some(address) = first_text_in(card, &[r#"[data-test="property-card-addr"]"#, ".list-card-addr"])? else {
        return Ok(None);
    };

    let url = first_attr_in(card, r#"a[href*="/homedetails/"]"#, "href")?
        .map(|href| if href.starts_with("http") { href } else { format!("{BASE_URL}{href}") })
        .unwrap_or_else(|| page.url.clone());
    let zpid = card.value().attr("data-zpid").map(str::to_string);

    let mut draft = LeadDraft::new(
        address,
        url,
        SourceDetails::Zillow {
            zpid,
            days_on_market: None,
            home_status: None,
        },
    );
    draft.value = Some(price);
    if let Some(stats) = first_text_in(card, &[r#"[data-test="property-card-details"]"#, ".list-card-details"])? {
        let (beds, baths) = parse_bed_bath(&stats);
        draft.bedrooms = beds;
        draft.bathrooms = baths;
        draft.square_feet = parse_square_feet(&stats);
    }
    draft.contact_text = element_text(card);
    Ok(Some(draft))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{fixture_page, inline_page};
    use rlf_core::contact::{extract_contacts, ContactInfo};

    const DALLAS: &str = "https://www.zillow.com/dallas-tx/";

    #[test]
    fn next_data_results_are_parsed() {
        let page = fixture_page(LeadSource::Zillow, "search_next_data.html", DALLAS);
        let drafts = ZillowAdapter.parse_listing(&page);

        assert_eq!(drafts.len(), 3);
        let first = &drafts[0];
        assert_eq!(first.address_text, "4512 Preston Rd, Dallas, TX 75205");
        assert_eq!(first.city, "Dallas");
        assert_eq!(first.zip_code, "75205");
        assert_eq!(first.county, "Dallas County");
        assert_eq!(first.value, Some(615_000));
        assert_eq!(first.bedrooms, Some(4));
        assert_eq!(first.bathrooms, Some(3.5));
        assert_eq!(first.square_feet, Some(2890));
        assert_eq!(first.year_built, Some(1987));
        assert_eq!(first.source_url, "https://www.zillow.com/homedetails/4512-Preston-Rd-Dallas-TX-75205/26712345_zpid/");
        match &first.details {
            SourceDetails::Zillow {
                zpid,
                days_on_market,
                home_status,
            } => {
                assert_eq!(zpid.as_deref(), Some("26712345"));
                assert_eq!(*days_on_market, Some(9));
                assert_eq!(home_status.as_deref(), Some("FOR_SALE"));
            }
            other => panic!("unexpected details {other:?}"),
        }
        assert!(drafts.iter().all(|d| d.address_text.len() >= 10));
    }

    #[test]
    fn inline_list_results_are_parsed() {
        let body = r#"<html><script>window.state = {"cat1":{"searchResults":{"listResults":[
            {"zpid":"1","addressStreet":"910 Meadow Ln","addressCity":"Plano","addressState":"TX","addressZipcode":"75093","unformattedPrice":389000,"beds":3,"baths":2,"area":1840},
            {"zpid":"2","address":"77 Elm","unformattedPrice":100000}
        ],"mapResults":[]}}};</script></html>"#;
        let drafts = ZillowAdapter.parse_listing(&inline_page(LeadSource::Zillow, DALLAS, body));

        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].address_text, "910 Meadow Ln, Plano, TX 75093");
        assert_eq!(drafts[0].county, "Collin County");
        assert_eq!(drafts[0].source_url, DALLAS);
    }

    #[test]
    fn listing_ids_are_not_read_as_phones() {
        let body = r#"<html><script>window.state = {"cat1":{"searchResults":{"listResults":[
            {"zpid":"2053462178","addressStreet":"4410 Ridgeview Dr","addressCity":"Plano","addressState":"TX","addressZipcode":"75024","unformattedPrice":512000,"timeOnZillow":1772409600000},
            {"zpid":"2053462179","addressStreet":"88 Coit Rd","addressCity":"Plano","addressState":"TX","addressZipcode":"75075","unformattedPrice":430000,"brokerName":"North Texas Realty","agentPhone":"(214) 555-0177","agentEmail":"Sales@NTRealty.com"}
        ],"mapResults":[]}}};</script></html>"#;
        let drafts = ZillowAdapter.parse_listing(&inline_page(LeadSource::Zillow, DALLAS, body));

        assert_eq!(drafts.len(), 2);
        assert!(!drafts[0].contact_text.contains("2053462178"));
        assert_eq!(extract_contacts(&drafts[0].contact_text), ContactInfo::default());

        let contact = extract_contacts(&drafts[1].contact_text);
        assert_eq!(contact.phone.as_deref(), Some("+1-214-555-0177"));
        assert_eq!(contact.email.as_deref(), Some("sales@ntrealty.com"));
    }

    #[test]
    fn property_cards_are_the_fallback() {
        let page = fixture_page(LeadSource::Zillow, "search_cards.html", DALLAS);
        let drafts = ZillowAdapter.parse_listing(&page);

        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].address_text, "2231 Shady Oaks Dr, Arlington, TX 76012");
        assert_eq!(drafts[0].value, Some(349_900));
        assert_eq!(drafts[0].bedrooms, Some(3));
        assert_eq!(drafts[0].bathrooms, Some(2.0));
        assert_eq!(drafts[0].square_feet, Some(1950));
        assert_eq!(drafts[0].county, "Tarrant County");
        assert!(drafts[0].contact_text.contains("(817) 555-0134"));
    }

    #[test]
    fn unrelated_page_yields_nothing() {
        let page = inline_page(LeadSource::Zillow, DALLAS, "<html><body><p>Access denied</p></body></html>");
        assert!(ZillowAdapter.parse_listing(&page).is_empty());
    }
}
