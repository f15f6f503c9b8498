//! Human-readable explanations for why a deal or trip bundle was
//! surfaced. Always produces a deterministic fallback sentence from the
//! numbers; a configured text model is only used to polish that sentence,
//! never to invent facts the fallback didn't already state.

use std::sync::Arc;

use crate::intent::TextModelClient;
use crate::models::{Deal, TripPlan};

pub struct Explainer {
    model: Option<Arc<dyn TextModelClient>>,
    max_words: usize,
}

impl Explainer {
    pub fn new(model: Option<Arc<dyn TextModelClient>>, max_words: usize) -> Self {
        Self { model, max_words }
    }

    fn deterministic_deal_explanation(deal: &Deal) -> String {
        let mut parts = Vec::new();

        if deal.avg_30d_price > 0.0 {
            let below_avg = ((deal.avg_30d_price - deal.price) / deal.avg_30d_price * 100.0).max(0.0);
            if deal.is_deal_flagged() {
                parts.push(format!(
                    "{:.0}% below its 30-day average price of ${:.0}",
                    below_avg, deal.avg_30d_price
                ));
            } else if below_avg > 0.0 {
                parts.push(format!("{:.0}% below its recent average", below_avg));
            }
        }

        if deal.discount_percent > 0.0 {
            parts.push(format!("{:.0}% off the original price", deal.discount_percent));
        }

        let inventory = deal.metadata.inventory();
        if inventory > 0 && inventory <= 5 {
            parts.push(format!("only {inventory} left"));
        }

        if parts.is_empty() {
            return format!("{} is available at ${:.0}.", deal.title, deal.price);
        }

        format!("{} is {}.", deal.title, parts.join(", "))
    }

    fn cap_words(text: String, max_words: usize) -> String {
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.len() <= max_words {
            return text;
        }
        let mut truncated = words[..max_words].join(" ");
        truncated.push('…');
        truncated
    }

    pub async fn explain_deal(&self, deal: &Deal) -> String {
        let fallback = Self::deterministic_deal_explanation(deal);

        if let Some(model) = &self.model {
            let prompt = format!(
                "Rewrite this travel deal explanation in at most {} words, \
                 keeping every number exactly as given, no new facts: \"{}\"",
                self.max_words, fallback
            );
            if let Ok(polished) = model.complete(&prompt).await {
                let trimmed = polished.trim();
                if !trimmed.is_empty() {
                    return Self::cap_words(trimmed.to_string(), self.max_words);
                }
            }
        }

        Self::cap_words(fallback, self.max_words)
    }

    pub fn explain_trip_plan(plan: &TripPlan, flight: &Deal, hotel: &Deal) -> String {
        format!(
            "Fit score {} of 100: {} paired with {} for a total of ${:.0}.",
            plan.fit_score, flight.title, hotel.title, plan.total_cost
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DealMetadata, DealType};
    use chrono::Utc;

    fn sample_deal() -> Deal {
        let now = Utc::now();
        Deal {
            deal_id: "deal-1".to_string(),
            deal_type: DealType::Flight,
            title: "Delta JFK to LHR".to_string(),
            description: "nonstop".to_string(),
            price: 300.0,
            original_price: 500.0,
            avg_30d_price: 450.0,
            discount_percent: 40.0,
            score: 80,
            tags: Default::default(),
            metadata: DealMetadata::Flight {
                origin: "JFK".to_string(),
                destination: "LHR".to_string(),
                airline: "Delta".to_string(),
                departure: None,
                arrival: None,
                cabin_class: "economy".to_string(),
                baggage_included: true,
                flight_code: None,
                seats_left: 3,
            },
            expires_at: None,
            created_at: now,
            updated_at: now,
            active: true,
        }
    }

    #[tokio::test]
    async fn deterministic_explanation_mentions_discount_and_scarcity() {
        let explainer = Explainer::new(None, 30);
        let text = explainer.explain_deal(&sample_deal()).await;
        assert!(text.contains("40%") || text.contains("below"));
        assert!(text.contains("3 left"));
    }

    #[tokio::test]
    async fn explanation_respects_word_cap() {
        let explainer = Explainer::new(None, 4);
        let text = explainer.explain_deal(&sample_deal()).await;
        assert!(text.split_whitespace().count() <= 5);
    }
}
