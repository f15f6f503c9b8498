//! Deterministic regex-based intent extraction, used when no text model is
//! configured or the model path fails. Good enough to keep the pipeline's
//! conversational surface usable without a live model; not a substitute
//! for one on ambiguous phrasing.

use chrono::{Datelike, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Value};

use crate::aliases;
use crate::models::Conversation;

use super::{Intent, ParsedIntent};

lazy_static! {
    static ref FROM_TO_RE: Regex = Regex::new(
        r"(?i)\bfrom\s+([a-z][a-z ]*?)\s+to\s+([a-z][a-z ]*?)(?:\s+(?:on|in|for|under|around|next|this)\b|[,.!?]|$)"
    )
    .unwrap();
    static ref BARE_ROUTE_RE: Regex = Regex::new(
        r"(?i)\b([a-z]{3})\s+to\s+([a-z][a-z ]*?)(?:\s+(?:on|in|for|under|around|next|this)\b|[,.!?]|$)"
    )
    .unwrap();
    static ref DEST_ONLY_RE: Regex = Regex::new(
        r"(?i)\b(?:to|in)\s+([a-z][a-z ]*?)(?:\s+(?:on|for|under|around|next|this)\b|[,.!?]|$)"
    )
    .unwrap();
    static ref MONTH_DAYS_RE: Regex = Regex::new(
        r"(?i)\b(january|february|march|april|may|june|july|august|september|october|november|december|jan|feb|mar|apr|jun|jul|aug|sept?|oct|nov|dec)\s+(\d{1,2})(?:st|nd|rd|th)?(?:\s*(?:to|through|until|-)\s*(\d{1,2})(?:st|nd|rd|th)?)?"
    )
    .unwrap();
    static ref UNDER_BUDGET_RE: Regex =
        Regex::new(r"(?i)(?:under|below|less than|max(?:imum)?(?: of)?|budget(?: of| is)?)\s*\$?(\d+(?:\.\d+)?)").unwrap();
    static ref DOLLARS_RE: Regex =
        Regex::new(r"(?i)(?:\$\s*(\d+(?:\.\d+)?)|(\d+(?:\.\d+)?)\s*(?:dollars|usd|bucks))").unwrap();
    static ref PARTY_RE: Regex =
        Regex::new(r"(?i)(\d+)\s*(?:people|persons?|passengers?|guests?|adults?|travell?ers?)").unwrap();
    static ref POLICY_RE: Regex =
        Regex::new(r"(?i)\b(baggage|cancel|refund|policy|checked bag|carry.?on|check.?in|check.?out)\b").unwrap();
    static ref TRACK_RE: Regex = Regex::new(r"(?i)\b(watch|track|alert|notify)\b").unwrap();
    static ref PLAN_RE: Regex = Regex::new(r"(?i)\b(plan|bundle|package|trip|vacation)\b").unwrap();
    static ref HOTEL_RE: Regex = Regex::new(r"(?i)\b(hotel|hotels|stay|room|lodging)\b").unwrap();
    static ref FLIGHT_RE: Regex = Regex::new(r"(?i)\b(flight|flights|fly|plane)\b").unwrap();
    static ref DEALS_RE: Regex = Regex::new(r"(?i)\b(deal|deals|cheap|cheapest|bargain|discount)\b").unwrap();
    static ref CHEAPER_RE: Regex = Regex::new(r"(?i)\b(cheaper|less expensive|lower price)\b").unwrap();
    static ref DIRECT_RE: Regex = Regex::new(r"(?i)\b(direct|non.?stop)\b").unwrap();
    static ref TIME_OF_DAY_RE: Regex =
        Regex::new(r"(?i)\b(morning|afternoon|evening|night|red.?eye)\b").unwrap();
}

/// Turns a captured free-text place phrase into an airport/group code:
/// exact city alias first, then a bare 3-letter token, then any known code
/// embedded in the phrase. Phrases that resolve to none of those are
/// dropped rather than passed through as garbage entities.
fn resolve_place(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Some(code) = aliases::city_to_code(trimmed) {
        return Some(code.to_string());
    }
    if trimmed.len() == 3 && trimmed.chars().all(|c| c.is_ascii_alphabetic()) && !aliases::is_stopword(trimmed) {
        return Some(trimmed.to_uppercase());
    }
    for word in trimmed.split_whitespace() {
        if word.len() == 3 && aliases::is_known_code(word) && !aliases::is_stopword(word) {
            return Some(word.to_uppercase());
        }
    }
    None
}

fn extract_route(message: &str) -> (Option<String>, Option<String>) {
    if let Some(caps) = FROM_TO_RE.captures(message) {
        let origin = caps.get(1).and_then(|m| resolve_place(m.as_str()));
        let destination = caps.get(2).and_then(|m| resolve_place(m.as_str()));
        if origin.is_some() || destination.is_some() {
            return (origin, destination);
        }
    }
    // The bare `AAA to BBB` form only fires on a known leading code, so
    // "fly to paris" doesn't misread "fly" as an origin.
    if let Some(caps) = BARE_ROUTE_RE.captures(message) {
        let origin = caps
            .get(1)
            .map(|m| m.as_str())
            .filter(|s| aliases::is_known_code(s))
            .map(str::to_uppercase);
        let destination = caps.get(2).and_then(|m| resolve_place(m.as_str()));
        if origin.is_some() && destination.is_some() {
            return (origin, destination);
        }
    }
    if let Some(caps) = DEST_ONLY_RE.captures(message) {
        if let Some(destination) = caps.get(1).and_then(|m| resolve_place(m.as_str())) {
            return (None, Some(destination));
        }
    }
    // Last resort: any known city name or code anywhere in the message.
    let lower = message.to_lowercase();
    for word in lower.split_whitespace() {
        let cleaned = word.trim_matches(|c: char| !c.is_alphanumeric());
        if cleaned.len() == 3 && aliases::is_known_code(cleaned) && !aliases::is_stopword(cleaned) {
            return (None, Some(cleaned.to_uppercase()));
        }
    }
    for (city, code) in aliases::city_aliases() {
        if lower.contains(city) {
            return (None, Some(code.to_string()));
        }
    }
    (None, None)
}

fn month_number(name: &str) -> u32 {
    match &name.to_lowercase()[..3] {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        _ => 12,
    }
}

fn extract_dates(message: &str) -> (Option<String>, Option<String>) {
    let Some(caps) = MONTH_DAYS_RE.captures(message) else {
        return (None, None);
    };
    let month = month_number(caps.get(1).map(|m| m.as_str()).unwrap_or_default());
    let now = Utc::now();
    // A named month earlier than the current one means next year.
    let year = if month < now.month() { now.year() + 1 } else { now.year() };

    let start = caps
        .get(2)
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .map(|day| format!("{year}-{month:02}-{day:02}"));
    let end = caps
        .get(3)
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .map(|day| format!("{year}-{month:02}-{day:02}"));
    (start, end)
}

fn extract_budget(message: &str) -> Option<f64> {
    if let Some(caps) = UNDER_BUDGET_RE.captures(message) {
        return caps.get(1).and_then(|m| m.as_str().parse().ok());
    }
    DOLLARS_RE.captures(message).and_then(|caps| {
        caps.get(1)
            .or_else(|| caps.get(2))
            .and_then(|m| m.as_str().parse().ok())
    })
}

fn extract_party_size(message: &str) -> Option<i64> {
    PARTY_RE
        .captures(message)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Previous turns are a fixed point for this fallback: when nothing in the
/// current message can be classified, the last known entities pass through
/// unchanged rather than being discarded.
fn carry_forward_entities(history: &[Conversation]) -> Value {
    history
        .last()
        .map(|c| c.entities.clone())
        .filter(Value::is_object)
        .unwrap_or_else(|| json!({}))
}

/// Refinement deltas over the prior entities: "cheaper" shaves 20% off the
/// carried budget unless an explicit number overrides it, "direct"/"non-stop"
/// sets the direct-only flag, and a time-of-day word becomes the time
/// preference.
fn apply_refinement_deltas(message: &str, entities: &mut Value) {
    if CHEAPER_RE.is_match(message) {
        let updated = match extract_budget(message) {
            Some(explicit) => Some(explicit),
            None => entities.get("budget_max").and_then(Value::as_f64).map(|b| b * 0.8),
        };
        if let Some(budget) = updated {
            entities["budget_max"] = json!(budget);
        }
    }
    if DIRECT_RE.is_match(message) {
        entities["direct_only"] = json!(true);
    }
    if let Some(caps) = TIME_OF_DAY_RE.captures(message) {
        if let Some(m) = caps.get(1) {
            entities["time_preference"] = json!(m.as_str().to_lowercase());
        }
    }
}

pub fn parse(message: &str, history: &[Conversation]) -> ParsedIntent {
    let mut entities = json!({});

    let (origin, destination) = extract_route(message);
    if let Some(origin) = origin {
        entities["origin"] = json!(origin);
    }
    if let Some(destination) = destination {
        entities["destination"] = json!(destination);
    }
    let (start_date, end_date) = extract_dates(message);
    if let Some(start) = start_date {
        entities["start_date"] = json!(start);
    }
    if let Some(end) = end_date {
        entities["end_date"] = json!(end);
    }
    if let Some(budget) = extract_budget(message) {
        entities["budget_max"] = json!(budget);
    }
    if let Some(party) = extract_party_size(message) {
        entities["party_size"] = json!(party);
    }

    let keyword_intent = if POLICY_RE.is_match(message) {
        Some(Intent::AskPolicy)
    } else if TRACK_RE.is_match(message) {
        Some(Intent::TrackPrice)
    } else if PLAN_RE.is_match(message) {
        Some(Intent::PlanTrip)
    } else if HOTEL_RE.is_match(message) {
        Some(Intent::SearchHotels)
    } else if FLIGHT_RE.is_match(message) {
        Some(Intent::SearchFlights)
    } else if DEALS_RE.is_match(message) {
        Some(Intent::FindDeals)
    } else {
        None
    };

    if let Some(intent) = keyword_intent {
        return ParsedIntent {
            intent,
            entities,
            confidence: 0.7,
        };
    }

    if !history.is_empty() {
        let mut carried = carry_forward_entities(history);
        if let (Some(carried_obj), Some(new_obj)) = (carried.as_object_mut(), entities.as_object()) {
            for (k, v) in new_obj {
                carried_obj.insert(k.clone(), v.clone());
            }
        }
        apply_refinement_deltas(message, &mut carried);
        return ParsedIntent {
            intent: Intent::RefineSearch,
            entities: carried,
            confidence: 0.5,
        };
    }

    ParsedIntent {
        intent: Intent::Unknown,
        entities,
        confidence: 0.2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flight_query_with_destination_and_budget() {
        let parsed = parse("find flights to london under $500", &[]);
        assert_eq!(parsed.intent, Intent::SearchFlights);
        assert_eq!(parsed.entities["destination"], "LON");
        assert_eq!(parsed.entities["budget_max"], 500.0);
    }

    #[test]
    fn from_to_form_extracts_both_ends_of_the_route() {
        let parsed = parse("fly from new york to london on june 3rd to 9th for 2 people", &[]);
        assert_eq!(parsed.intent, Intent::SearchFlights);
        assert_eq!(parsed.entities["origin"], "NYC");
        assert_eq!(parsed.entities["destination"], "LON");
        assert_eq!(parsed.entities["party_size"], 2);
        let start = parsed.entities["start_date"].as_str().unwrap();
        let end = parsed.entities["end_date"].as_str().unwrap();
        assert!(start.ends_with("-06-03"), "start was {start}");
        assert!(end.ends_with("-06-09"), "end was {end}");
    }

    #[test]
    fn bare_code_route_is_recognized() {
        let parsed = parse("JFK to LHR next week please", &[]);
        assert_eq!(parsed.entities["origin"], "JFK");
        assert_eq!(parsed.entities["destination"], "LHR");
    }

    #[test]
    fn hotel_query_detected() {
        let parsed = parse("need a hotel room in paris", &[]);
        assert_eq!(parsed.intent, Intent::SearchHotels);
        assert_eq!(parsed.entities["destination"], "PAR");
    }

    #[test]
    fn cheap_flights_is_a_flight_search_not_find_deals() {
        let parsed = parse("cheap flights to dubai", &[]);
        assert_eq!(parsed.intent, Intent::SearchFlights);
        assert_eq!(parsed.entities["destination"], "DXB");
    }

    #[test]
    fn deal_hunting_without_a_mode_keyword_is_find_deals() {
        let parsed = parse("any good deals to miami?", &[]);
        assert_eq!(parsed.intent, Intent::FindDeals);
        assert_eq!(parsed.entities["destination"], "MIA");
    }

    #[test]
    fn policy_question_detected() {
        let parsed = parse("what's the baggage policy for economy?", &[]);
        assert_eq!(parsed.intent, Intent::AskPolicy);
    }

    #[test]
    fn unrecognized_followup_carries_forward_prior_entities() {
        let history = vec![Conversation {
            user_id: "u1".to_string(),
            message: "flights to tokyo".to_string(),
            response: "ok".to_string(),
            intent: "search_flights".to_string(),
            entities: json!({"destination": "TYO", "budget_max": 1000.0}),
            created_at: chrono::Utc::now(),
        }];
        let parsed = parse("hmm actually not sure", &history);
        assert_eq!(parsed.intent, Intent::RefineSearch);
        assert_eq!(parsed.entities["destination"], "TYO");
    }

    #[test]
    fn cheaper_refinement_shaves_the_carried_budget() {
        let history = vec![Conversation {
            user_id: "u1".to_string(),
            message: "flights to tokyo".to_string(),
            response: "ok".to_string(),
            intent: "search_flights".to_string(),
            entities: json!({"destination": "TYO", "budget_max": 1000.0}),
            created_at: chrono::Utc::now(),
        }];
        let parsed = parse("something cheaper maybe", &history);
        assert_eq!(parsed.intent, Intent::RefineSearch);
        assert_eq!(parsed.entities["budget_max"], 800.0);
    }

    #[test]
    fn direct_refinement_sets_the_flag() {
        let history = vec![Conversation {
            user_id: "u1".to_string(),
            message: "flights to tokyo".to_string(),
            response: "ok".to_string(),
            intent: "search_flights".to_string(),
            entities: json!({"destination": "TYO"}),
            created_at: chrono::Utc::now(),
        }];
        let parsed = parse("only non-stop ones in the morning", &history);
        assert_eq!(parsed.entities["direct_only"], true);
        assert_eq!(parsed.entities["time_preference"], "morning");
    }

    #[test]
    fn truly_unknown_with_no_history_is_unknown() {
        let parsed = parse("asdf qwer", &[]);
        assert_eq!(parsed.intent, Intent::Unknown);
        assert!(parsed.confidence < 0.5);
    }
}
