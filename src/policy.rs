//! Answers policy questions (baggage allowances, cancellation terms) with
//! a small canned knowledge base, cached per (deal_type, question) since
//! the answer only depends on those two things and the text model is the
//! most expensive call in the request path.

use std::sync::Arc;

use crate::cache::{cache_key, Cache};
use crate::intent::TextModelClient;
use crate::models::DealType;

pub struct PolicyAnswerer {
    model: Option<Arc<dyn TextModelClient>>,
}

impl PolicyAnswerer {
    pub fn new(model: Option<Arc<dyn TextModelClient>>) -> Self {
        Self { model }
    }

    fn canned_answer(deal_type: DealType, question: &str) -> Option<&'static str> {
        let q = question.to_lowercase();
        match deal_type {
            DealType::Flight => {
                if q.contains("baggage") || q.contains("checked bag") {
                    Some("Most economy fares include one carry-on; checked bags are usually an extra fee unless the fare explicitly lists baggage as included.")
                } else if q.contains("cancel") || q.contains("refund") {
                    Some("Basic economy fares are typically non-refundable; standard and premium fares allow cancellation for a fee within 24 hours of booking.")
                } else {
                    None
                }
            }
            DealType::Hotel => {
                if q.contains("cancel") || q.contains("refund") {
                    Some("Most hotel rates allow free cancellation up to 48 hours before check-in; non-refundable rates are marked at booking.")
                } else if q.contains("check") && (q.contains("in") || q.contains("out")) {
                    Some("Standard check-in is 3pm and check-out is 11am, though early check-in and late check-out can often be requested.")
                } else {
                    None
                }
            }
        }
    }

    pub async fn answer(&self, cache: &Cache, deal_type: DealType, question: &str) -> String {
        let key = cache_key(&[deal_type.as_str(), question]);
        if let Some(cached) = cache.policy.get::<String>(&key) {
            return cached;
        }

        let answer = self.resolve(deal_type, question).await;
        cache.policy.put(key, &answer);
        answer
    }

    async fn resolve(&self, deal_type: DealType, question: &str) -> String {
        if let Some(canned) = Self::canned_answer(deal_type, question) {
            return canned.to_string();
        }

        if let Some(model) = &self.model {
            let prompt = format!(
                "Answer this travel policy question about a {} booking in one \
                 or two sentences: \"{}\"",
                deal_type.as_str(),
                question
            );
            if let Ok(answer) = model.complete(&prompt).await {
                let trimmed = answer.trim();
                if !trimmed.is_empty() {
                    return trimmed.to_string();
                }
            }
        }

        "I don't have a specific policy answer for that; check the booking details for this listing."
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn test_cache() -> Cache {
        Cache::new(&Config::from_env().unwrap())
    }

    #[tokio::test]
    async fn canned_baggage_answer_for_flights() {
        let answerer = PolicyAnswerer::new(None);
        let cache = test_cache();
        let answer = answerer
            .answer(&cache, DealType::Flight, "what's the baggage allowance?")
            .await;
        assert!(answer.contains("carry-on"));
    }

    #[tokio::test]
    async fn repeated_question_is_served_from_cache() {
        let answerer = PolicyAnswerer::new(None);
        let cache = test_cache();
        let first = answerer
            .answer(&cache, DealType::Hotel, "can I cancel?")
            .await;
        let second = answerer
            .answer(&cache, DealType::Hotel, "can I cancel?")
            .await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn unrecognized_question_gets_generic_fallback() {
        let answerer = PolicyAnswerer::new(None);
        let cache = test_cache();
        let answer = answerer
            .answer(&cache, DealType::Hotel, "do you have a pool")
            .await;
        assert!(answer.contains("don't have a specific policy"));
    }
}
