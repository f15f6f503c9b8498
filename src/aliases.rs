//! City/airport alias lookups.
//!
//! Consolidates the city->airport-group, airport->city, and airline-code
//! tables the intent parser and trip planner both need into a single
//! read-only module, per the "regex-heavy natural-language fallback" note:
//! the alias sets here are not required to match any particular upstream
//! source bit-for-bit.

use std::collections::HashMap;

use lazy_static::lazy_static;

lazy_static! {
    /// Canonical city/region code -> set of airport codes it expands to.
    static ref AIRPORT_GROUPS: HashMap<&'static str, &'static [&'static str]> = {
        let mut m = HashMap::new();
        m.insert("NYC", &["JFK", "LGA", "EWR"][..]);
        m.insert("LON", &["LHR", "LGW", "STN", "LTN"][..]);
        m.insert("CHI", &["ORD", "MDW"][..]);
        m.insert("SFO", &["SFO", "OAK", "SJC"][..]);
        m.insert("LAX", &["LAX"][..]);
        m.insert("PAR", &["CDG", "ORY"][..]);
        m.insert("TYO", &["NRT", "HND"][..]);
        m.insert("WAS", &["DCA", "IAD", "BWI"][..]);
        m.insert("MIA", &["MIA", "FLL"][..]);
        m.insert("DXB", &["DXB"][..]);
        m
    };

    /// Airport code -> human city name, used for hotel city substring matching.
    static ref AIRPORT_CITY: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("JFK", "NEW YORK");
        m.insert("LGA", "NEW YORK");
        m.insert("EWR", "NEW YORK");
        m.insert("LHR", "LONDON");
        m.insert("LGW", "LONDON");
        m.insert("STN", "LONDON");
        m.insert("LTN", "LONDON");
        m.insert("ORD", "CHICAGO");
        m.insert("MDW", "CHICAGO");
        m.insert("SFO", "SAN FRANCISCO");
        m.insert("OAK", "OAKLAND");
        m.insert("SJC", "SAN JOSE");
        m.insert("LAX", "LOS ANGELES");
        m.insert("CDG", "PARIS");
        m.insert("ORY", "PARIS");
        m.insert("NRT", "TOKYO");
        m.insert("HND", "TOKYO");
        m.insert("DCA", "WASHINGTON");
        m.insert("IAD", "WASHINGTON");
        m.insert("BWI", "BALTIMORE");
        m.insert("MIA", "MIAMI");
        m.insert("FLL", "FORT LAUDERDALE");
        m.insert("DXB", "DUBAI");
        m
    };

    /// Free-text city name -> 3-letter code, used by the regex fallback and by
    /// validating whether a model-extracted destination is textually grounded
    /// in the raw message.
    static ref CITY_TO_CODE: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("new york", "NYC");
        m.insert("nyc", "NYC");
        m.insert("london", "LON");
        m.insert("chicago", "CHI");
        m.insert("san francisco", "SFO");
        m.insert("los angeles", "LAX");
        m.insert("paris", "PAR");
        m.insert("tokyo", "TYO");
        m.insert("washington", "WAS");
        m.insert("miami", "MIA");
        m.insert("dubai", "DXB");
        m
    };

    /// Words that look like extracted entities but are actually parser noise.
    pub static ref STOPWORDS: &'static [&'static str] =
        &["FIND", "FLIGHT", "FLIGHTS", "FROM", "PLAN", "SEARCH", "BOOK", "HOTEL"];
}

/// Expand a destination code into the set of airport codes it represents.
/// Unknown codes expand to themselves (treated as a literal airport code).
pub fn expand_airport_group(code: &str) -> Vec<String> {
    let upper = code.to_uppercase();
    match AIRPORT_GROUPS.get(upper.as_str()) {
        Some(codes) => codes.iter().map(|s| s.to_string()).collect(),
        None => vec![upper],
    }
}

/// Map an airport code to its human city name, if known.
pub fn airport_to_city(code: &str) -> Option<&'static str> {
    AIRPORT_CITY.get(code.to_uppercase().as_str()).copied()
}

/// Map a free-text city name (case-insensitive) to its 3-letter code.
pub fn city_to_code(name: &str) -> Option<&'static str> {
    CITY_TO_CODE.get(name.to_lowercase().as_str()).copied()
}

/// Iterate every known (lowercase city name, code) alias pair.
pub fn city_aliases() -> impl Iterator<Item = (&'static str, &'static str)> {
    CITY_TO_CODE.iter().map(|(city, code)| (*city, *code))
}

/// Is `candidate` a plausible 3-letter airport/city-group code?
pub fn is_known_code(candidate: &str) -> bool {
    let upper = candidate.to_uppercase();
    AIRPORT_GROUPS.contains_key(upper.as_str()) || AIRPORT_CITY.contains_key(upper.as_str())
}

/// Is `word` one of the parser stopwords (case-insensitive)?
pub fn is_stopword(word: &str) -> bool {
    let upper = word.to_uppercase();
    STOPWORDS.iter().any(|s| *s == upper)
}

/// Does `message` textually contain `destination` under any known alias
/// (the code itself, or any city name that maps to it)?
pub fn destination_present_in_text(message: &str, destination: &str) -> bool {
    let lower = message.to_lowercase();
    let dest_upper = destination.to_uppercase();

    if lower.contains(&destination.to_lowercase()) {
        return true;
    }

    CITY_TO_CODE
        .iter()
        .any(|(city, code)| *code == dest_upper && lower.contains(city))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nyc_expands_to_three_airports() {
        let mut codes = expand_airport_group("NYC");
        codes.sort();
        assert_eq!(codes, vec!["EWR", "JFK", "LGA"]);
    }

    #[test]
    fn unknown_code_expands_to_itself() {
        assert_eq!(expand_airport_group("dxb"), vec!["DXB".to_string()]);
    }

    #[test]
    fn jfk_maps_to_new_york() {
        assert_eq!(airport_to_city("jfk"), Some("NEW YORK"));
    }

    #[test]
    fn dubai_detected_in_text_for_dxb() {
        assert!(destination_present_in_text("cheap flights to dubai", "DXB"));
        assert!(!destination_present_in_text("cheap flights to dubai", "NYC"));
    }

    #[test]
    fn stopwords_are_case_insensitive() {
        assert!(is_stopword("flight"));
        assert!(is_stopword("FROM"));
        assert!(!is_stopword("dubai"));
    }
}
