use std::fs;
use std::path::Path;

use rlf_adapters::all_adapters;
use rlf_core::{FetchedPage, MIN_ADDRESS_LEN};

#[test]
fn every_fixture_page_yields_usable_drafts() {
    let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("../..");

    for adapter in all_adapters() {
        let source = adapter.source();
        let dir = root.join("fixtures").join(source.as_str());
        let entries = fs::read_dir(&dir).unwrap_or_else(|e| panic!("reading {}: {e}", dir.display()));

        let mut pages = 0;
        for entry in entries {
            let path = entry.unwrap().path();
            if path.extension().and_then(|e| e.to_str()) != Some("html") {
                continue;
            }
            pages += 1;

            let body = fs::read_to_string(&path).unwrap();
            let url = adapter.default_targets()[0].url.clone();
            let drafts = adapter.parse_listing(&FetchedPage::from_body(source, url, body));

            assert!(!drafts.is_empty(), "{} produced no drafts", path.display());
            for draft in &drafts {
                assert_eq!(draft.source, source);
                assert_eq!(draft.details.source(), source);
                assert!(draft.address_text.chars().count() >= MIN_ADDRESS_LEN, "{}", draft.address_text);
            }
        }
        assert!(pages >= 2, "expected structured and html fixtures for {source}");
    }
}

#[test]
fn adapters_survive_garbage() {
    for adapter in all_adapters() {
        for body in ["", "<html", "<script>var reports = [{\"id\": </script>", "\u{0}\u{feff}{{[[\"\"]]}}"] {
            let page = FetchedPage::from_body(adapter.source(), "https://example.test/", body);
            assert!(adapter.parse_listing(&page).is_empty());
        }
    }
}
