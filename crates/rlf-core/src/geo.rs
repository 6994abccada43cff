//! Address splitting and the static Dallas-Fort Worth geography tables.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static ZIP_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{5}").expect("zip pattern"));
static STATE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[A-Z]{2}\b").expect("state pattern"));

pub const DFW_COUNTIES: [&str; 9] = [
    "Dallas", "Tarrant", "Collin", "Denton", "Rockwall", "Ellis", "Kaufman", "Parker", "Johnson",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressParts {
    pub city: String,
    pub state: String,
    pub zip_code: String,
}

/// Splits `"street, city, ST 12345"`. The last comma segment supplies state and
/// zip, the one before it the city. Without a comma nothing is inferred.
pub fn parse_address(address: &str) -> AddressParts {
    let parts: Vec<&str> = address.split(',').map(str::trim).collect();
    if parts.len() < 2 {
        return AddressParts::default();
    }

    let last = parts[parts.len() - 1];
    let zip_code = ZIP_PATTERN
        .find(last)
        .map(|m| m.as_str().to_string())
        .unwrap_or_default();
    let state = STATE_PATTERN
        .find(last)
        .map(|m| m.as_str().to_string())
        .unwrap_or_default();
    let city = parts[parts.len() - 2].to_string();

    AddressParts {
        city,
        state,
        zip_code,
    }
}

/// County for a DFW city name, or `""` when the city is not in the table.
pub fn county_for_city(city: &str) -> &'static str {
    let key = city.trim().to_lowercase();
    CITY_COUNTIES
        .binary_search_by_key(&key.as_str(), |&(name, _)| name)
        .map(|idx| CITY_COUNTIES[idx].1)
        .unwrap_or_default()
}

pub fn is_dfw_county(county: &str) -> bool {
    let name = county.trim();
    let name = name
        .strip_suffix(" County")
        .or_else(|| name.strip_suffix(" COUNTY"))
        .unwrap_or(name)
        .trim();
    DFW_COUNTIES.iter().any(|c| c.eq_ignore_ascii_case(name))
}

pub fn is_dfw_zip(zip_code: &str) -> bool {
    let digits: String = zip_code.chars().filter(char::is_ascii_digit).take(5).collect();
    digits.len() == 5 && DFW_ZIP_CODES.binary_search(&digits.as_str()).is_ok()
}

pub fn is_dfw_city(city: &str) -> bool {
    !county_for_city(city).is_empty()
}

/// County is checked first, then zip, then city.
pub fn is_dfw(county: &str, zip_code: &str, city: &str) -> bool {
    is_dfw_county(county) || is_dfw_zip(zip_code) || is_dfw_city(city)
}

const DFW_ZIP_CODES: &[&str] = &[
    "75001", "75002", "75006", "75007", "75009", "75010", "75013", "75019", "75022", "75023",
    "75024", "75025", "75026", "75028", "75030", "75032", "75038", "75039", "75041", "75042",
    "75043", "75044", "75048", "75050", "75051", "75052", "75056", "75057", "75060", "75061",
    "75062", "75063", "75065", "75067", "75068", "75069", "75070", "75071", "75072", "75074",
    "75075", "75077", "75078", "75080", "75081", "75082", "75086", "75087", "75088", "75089",
    "75093", "75094", "75104", "75115", "75116", "75117", "75119", "75126", "75134", "75137",
    "75141", "75142", "75143", "75147", "75149", "75150", "75154", "75156", "75159", "75160",
    "75165", "75166", "75167", "75169", "75173", "75180", "75187", "75189", "75201", "75202",
    "75203", "75204", "75205", "75206", "75207", "75208", "75209", "75210", "75211", "75212",
    "75213", "75214", "75215", "75216", "75217", "75218", "75219", "75220", "75221", "75222",
    "75223", "75224", "75225", "75226", "75227", "75228", "75229", "75230", "75231", "75232",
    "75233", "75234", "75235", "75236", "75237", "75238", "75239", "75240", "75241", "75242",
    "75243", "75244", "75245", "75246", "75247", "75248", "75249", "75250", "75251", "75252",
    "75253", "75254", "75255", "75256", "75257", "75258", "75260", "75261", "75262", "75263",
    "75264", "75265", "75266", "75267", "75270", "75275", "75277", "75283", "75284", "75285",
    "75286", "75287", "75294", "75295", "75301", "75303", "75312", "75313", "75315", "75320",
    "75323", "75326", "75336", "75339", "75342", "75346", "75347", "75348", "75349", "75350",
    "75353", "75354", "75355", "75356", "75357", "75358", "75359", "75360", "75363", "75364",
    "75367", "75368", "75370", "75371", "75372", "75373", "75374", "75376", "75378", "75379",
    "75380", "75381", "75382", "75389", "75390", "75391", "75392", "75393", "75394", "75395",
    "75396", "75397", "75398", "75407", "75409", "75442", "75454", "75460", "75485", "75495",
    "75496", "76001", "76002", "76003", "76004", "76005", "76006", "76007", "76008", "76009",
    "76010", "76011", "76012", "76013", "76014", "76015", "76016", "76017", "76018", "76019",
    "76020", "76021", "76022", "76028", "76031", "76032", "76033", "76034", "76035", "76036",
    "76039", "76040", "76049", "76050", "76051", "76052", "76053", "76054", "76055", "76058",
    "76059", "76060", "76061", "76063", "76064", "76065", "76066", "76067", "76070", "76071",
    "76073", "76078", "76082", "76085", "76086", "76087", "76088", "76092", "76094", "76095",
    "76096", "76097", "76099", "76101", "76102", "76103", "76104", "76105", "76106", "76107",
    "76108", "76109", "76110", "76111", "76112", "76113", "76114", "76115", "76116", "76117",
    "76118", "76119", "76120", "76121", "76122", "76123", "76124", "76126", "76127", "76129",
    "76130", "76131", "76132", "76133", "76134", "76135", "76136", "76137", "76140", "76147",
    "76148", "76150", "76155", "76161", "76162", "76163", "76164", "76166", "76177", "76179",
    "76180", "76181", "76182", "76185", "76191", "76192", "76193", "76195", "76196", "76197",
    "76198", "76199", "76201", "76202", "76203", "76204", "76205", "76206", "76207", "76208",
    "76209", "76210", "76225", "76226", "76227", "76244", "76247", "76249", "76258", "76262",
    "76266", "76272",
];

const CITY_COUNTIES: &[(&str, &str)] = &[
    ("addison", "Dallas County"),
    ("aledo", "Parker County"),
    ("allen", "Collin County"),
    ("alvarado", "Johnson County"),
    ("anna", "Collin County"),
    ("annetta", "Parker County"),
    ("annetta north", "Parker County"),
    ("annetta south", "Parker County"),
    ("argyle", "Denton County"),
    ("arlington", "Tarrant County"),
    ("azle", "Tarrant County"),
    ("balch springs", "Dallas County"),
    ("bartonville", "Denton County"),
    ("bedford", "Tarrant County"),
    ("benbrook", "Tarrant County"),
    ("blue mound", "Tarrant County"),
    ("burleson", "Johnson County"),
    ("carrollton", "Dallas County"),
    ("cedar hill", "Dallas County"),
    ("celina", "Collin County"),
    ("cleburne", "Johnson County"),
    ("cockrell hill", "Dallas County"),
    ("colleyville", "Tarrant County"),
    ("combine", "Dallas County"),
    ("cool", "Parker County"),
    ("coppell", "Dallas County"),
    ("copper canyon", "Denton County"),
    ("corinth", "Denton County"),
    ("crandall", "Kaufman County"),
    ("crowley", "Tarrant County"),
    ("dallas", "Dallas County"),
    ("denton", "Denton County"),
    ("desoto", "Dallas County"),
    ("double oak", "Denton County"),
    ("duncanville", "Dallas County"),
    ("ennis", "Ellis County"),
    ("euless", "Tarrant County"),
    ("everman", "Tarrant County"),
    ("fairview", "Collin County"),
    ("farmers branch", "Dallas County"),
    ("fate", "Rockwall County"),
    ("ferris", "Dallas County"),
    ("flower mound", "Denton County"),
    ("forest hill", "Tarrant County"),
    ("forney", "Kaufman County"),
    ("fort worth", "Tarrant County"),
    ("frisco", "Collin County"),
    ("garland", "Dallas County"),
    ("glenn heights", "Dallas County"),
    ("godley", "Johnson County"),
    ("grand prairie", "Dallas County"),
    ("grandview", "Johnson County"),
    ("grapevine", "Tarrant County"),
    ("haltom city", "Tarrant County"),
    ("heath", "Rockwall County"),
    ("hickory creek", "Denton County"),
    ("highland park", "Dallas County"),
    ("highland village", "Denton County"),
    ("hudson oaks", "Parker County"),
    ("hurst", "Tarrant County"),
    ("hutchins", "Dallas County"),
    ("irving", "Dallas County"),
    ("italy", "Ellis County"),
    ("josephine", "Collin County"),
    ("joshua", "Johnson County"),
    ("kaufman", "Kaufman County"),
    ("keene", "Johnson County"),
    ("keller", "Tarrant County"),
    ("kennedale", "Tarrant County"),
    ("lake dallas", "Denton County"),
    ("lake worth", "Tarrant County"),
    ("lancaster", "Dallas County"),
    ("lewisville", "Denton County"),
    ("little elm", "Denton County"),
    ("lowry crossing", "Collin County"),
    ("lucas", "Collin County"),
    ("mansfield", "Tarrant County"),
    ("maypearl", "Ellis County"),
    ("mckinney", "Collin County"),
    ("mclendon-chisholm", "Rockwall County"),
    ("melissa", "Collin County"),
    ("mesquite", "Dallas County"),
    ("midlothian", "Ellis County"),
    ("milford", "Ellis County"),
    ("millsap", "Parker County"),
    ("mobile city", "Rockwall County"),
    ("murphy", "Collin County"),
    ("nevada", "Collin County"),
    ("new hope", "Collin County"),
    ("north richland hills", "Tarrant County"),
    ("northlake", "Denton County"),
    ("ovilla", "Ellis County"),
    ("palmer", "Ellis County"),
    ("parker", "Collin County"),
    ("pecan hill", "Ellis County"),
    ("plano", "Collin County"),
    ("princeton", "Collin County"),
    ("prosper", "Collin County"),
    ("red oak", "Ellis County"),
    ("richardson", "Dallas County"),
    ("richland hills", "Tarrant County"),
    ("rio vista", "Johnson County"),
    ("river oaks", "Tarrant County"),
    ("roanoke", "Denton County"),
    ("rockwall", "Rockwall County"),
    ("rowlett", "Dallas County"),
    ("royse city", "Rockwall County"),
    ("sachse", "Dallas County"),
    ("saginaw", "Tarrant County"),
    ("sansom park", "Tarrant County"),
    ("seagoville", "Dallas County"),
    ("shady shores", "Denton County"),
    ("southlake", "Tarrant County"),
    ("springtown", "Parker County"),
    ("st. paul", "Collin County"),
    ("sunnyvale", "Dallas County"),
    ("terrell", "Kaufman County"),
    ("the colony", "Denton County"),
    ("trophy club", "Denton County"),
    ("university park", "Dallas County"),
    ("venus", "Johnson County"),
    ("watauga", "Tarrant County"),
    ("waxahachie", "Ellis County"),
    ("weatherford", "Parker County"),
    ("westminster", "Collin County"),
    ("westworth village", "Tarrant County"),
    ("white settlement", "Tarrant County"),
    ("willow park", "Parker County"),
    ("wilmer", "Dallas County"),
    ("wylie", "Collin County"),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_full_address() {
        let parts = parse_address("123 Main St, Dallas, TX 75201");
        assert_eq!(parts.city, "Dallas");
        assert_eq!(parts.state, "TX");
        assert_eq!(parts.zip_code, "75201");
    }

    #[test]
    fn no_comma_means_no_components() {
        assert_eq!(parse_address("123 Main St"), AddressParts::default());
        assert_eq!(parse_address(""), AddressParts::default());
    }

    #[test]
    fn two_segments_take_the_first_as_city() {
        let parts = parse_address("Fort Worth, TX 76102");
        assert_eq!(parts.city, "Fort Worth");
        assert_eq!(parts.state, "TX");
        assert_eq!(parts.zip_code, "76102");
    }

    #[test]
    fn missing_state_or_zip_leaves_them_empty() {
        let parts = parse_address("12 Oak Ln, Plano, Texas");
        assert_eq!(parts.city, "Plano");
        assert_eq!(parts.state, "");
        assert_eq!(parts.zip_code, "");
    }

    #[test]
    fn tables_are_sorted_for_binary_search() {
        assert!(DFW_ZIP_CODES.windows(2).all(|w| w[0] < w[1]));
        assert!(CITY_COUNTIES.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn county_lookup_is_case_insensitive() {
        assert_eq!(county_for_city("Dallas"), "Dallas County");
        assert_eq!(county_for_city(" FRISCO "), "Collin County");
        assert_eq!(county_for_city("Weatherford"), "Parker County");
        assert_eq!(county_for_city("Plano"), "Collin County");
        assert_eq!(county_for_city("wylie"), "Collin County");
        assert_eq!(county_for_city("Little Elm"), "Denton County");
        assert_eq!(county_for_city("Houston"), "");
    }

    #[test]
    fn dfw_flag_falls_back_from_county_to_zip_to_city() {
        assert!(is_dfw("Tarrant County", "", ""));
        assert!(is_dfw("", "75070", ""));
        assert!(is_dfw("", "", "McKinney"));
        assert!(!is_dfw("Harris County", "77002", "Houston"));
        assert!(is_dfw_county("DENTON"));
    }
}
