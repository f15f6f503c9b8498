//! Bundles a flight and a hotel into ranked trip plans.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use rayon::prelude::*;
use uuid::Uuid;

use crate::aliases;
use crate::explain::Explainer;
use crate::models::{Deal, Itinerary, TripPlan};
use crate::store::Store;

pub struct PlannedTrip {
    pub plan: TripPlan,
    pub explanation: String,
    pub alternatives: Vec<TripPlan>,
}

/// Amenities that earn the convenience sub-score, 8 points each, capped.
const CONVENIENCE_AMENITIES: &[&str] = &["near-transit", "downtown", "airport-shuttle"];

pub struct TripPlanner {
    store: Arc<Store>,
    top_flights: usize,
    top_hotels: usize,
    max_recommendations: usize,
}

impl TripPlanner {
    pub fn new(store: Arc<Store>, top_flights: usize, top_hotels: usize, max_recommendations: usize) -> Self {
        Self {
            store,
            top_flights,
            top_hotels,
            max_recommendations,
        }
    }

    fn budget_sub_score(total_cost: f64, budget_max: Option<f64>) -> f64 {
        match budget_max {
            None => 20.0,
            Some(budget) if budget <= 0.0 => 20.0,
            Some(budget) if total_cost <= 0.8 * budget => 40.0,
            Some(budget) if total_cost <= budget => 30.0,
            Some(budget) if total_cost <= 1.1 * budget => 15.0,
            Some(_) => 0.0,
        }
    }

    fn preferences_sub_score(preferences: &[String], flight: &Deal, hotel: &Deal) -> f64 {
        if preferences.is_empty() {
            return 0.0;
        }
        let bundle_tags: HashSet<&String> = flight.tags.iter().chain(hotel.tags.iter()).collect();
        let matched = preferences.iter().filter(|p| bundle_tags.contains(p)).count() as f64;
        ((matched / preferences.len() as f64) * 35.0).min(35.0)
    }

    fn convenience_sub_score(flight: &Deal, hotel: &Deal) -> f64 {
        let bundle_tags: HashSet<&String> = flight.tags.iter().chain(hotel.tags.iter()).collect();
        let matches = CONVENIENCE_AMENITIES
            .iter()
            .filter(|a| bundle_tags.iter().any(|t| t.as_str() == **a))
            .count() as f64;
        (matches * 8.0).min(25.0)
    }

    /// Budget fit (<=40), preference overlap with the bundle's tags (<=35),
    /// and convenience amenities (<=25), summed and clamped to 100.
    fn fit_score(flight: &Deal, hotel: &Deal, total_cost: f64, budget_max: Option<f64>, preferences: &[String]) -> u32 {
        let score = Self::budget_sub_score(total_cost, budget_max)
            + Self::preferences_sub_score(preferences, flight, hotel)
            + Self::convenience_sub_score(flight, hotel);
        score.clamp(0.0, 100.0).round() as u32
    }

    #[allow(clippy::too_many_arguments)]
    pub fn plan_trip(
        &self,
        user_id: &str,
        origin: Option<&str>,
        destination: Option<&str>,
        budget_max: Option<f64>,
        party_size: i64,
        nights: i64,
        preferences: &[String],
        query_snapshot: serde_json::Value,
    ) -> anyhow::Result<Option<PlannedTrip>> {
        let origins = origin.map(aliases::expand_airport_group).unwrap_or_default();
        let destinations = destination.map(aliases::expand_airport_group).unwrap_or_default();

        let mut flights = self.store.search_flights(&origins, &destinations)?;
        flights.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.deal_id.cmp(&b.deal_id)));
        flights.truncate(self.top_flights);

        // A destination group maps to its member airports' city names for
        // hotel matching (NYC admits hotels in "NEW YORK", not "NYC").
        let dest_cities: Vec<String> = match destination {
            Some(dest) => {
                let mut cities: Vec<String> = aliases::expand_airport_group(dest)
                    .iter()
                    .filter_map(|code| aliases::airport_to_city(code).map(String::from))
                    .collect();
                cities.sort();
                cities.dedup();
                if cities.is_empty() {
                    cities.push(dest.to_uppercase());
                }
                cities
            }
            None => Vec::new(),
        };
        let mut hotels = self.store.search_hotels(&dest_cities)?;
        hotels.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.deal_id.cmp(&b.deal_id)));
        hotels.truncate(self.top_hotels);

        if flights.is_empty() || hotels.is_empty() {
            return Ok(None);
        }

        let party_size = party_size.max(1);
        let nights = nights.max(1);

        // Every flight x hotel combination is scored, even ones over
        // budget: the fit score reflects the overshoot rather than
        // silently dropping the bundle. Scoring is pure, so the cross
        // product fans out across threads.
        let query_snapshot = &query_snapshot;
        let mut bundles: Vec<(TripPlan, &Deal, &Deal)> = flights
            .par_iter()
            .flat_map_iter(|flight| {
                hotels.iter().map(move |hotel| {
                    let total_cost = flight.price * party_size as f64 + hotel.price * nights as f64;
                    let fit_score =
                        Self::fit_score(flight, hotel, total_cost, budget_max, preferences);
                    let plan = TripPlan {
                        plan_id: Uuid::new_v4().to_string(),
                        user_id: user_id.to_string(),
                        query_snapshot: query_snapshot.clone(),
                        itinerary: Itinerary {
                            flight_deal_id: flight.deal_id.clone(),
                            hotel_deal_id: hotel.deal_id.clone(),
                            total_cost,
                        },
                        fit_score,
                        total_cost,
                        created_at: Utc::now(),
                    };
                    (plan, flight, hotel)
                })
            })
            .collect();

        bundles.sort_by(|a, b| {
            b.0.fit_score
                .cmp(&a.0.fit_score)
                .then_with(|| a.0.itinerary.flight_deal_id.cmp(&b.0.itinerary.flight_deal_id))
                .then_with(|| a.0.itinerary.hotel_deal_id.cmp(&b.0.itinerary.hotel_deal_id))
        });
        bundles.truncate(self.max_recommendations);

        for (plan, _, _) in &bundles {
            self.store.save_trip_plan(plan)?;
        }

        let (top_plan, top_flight, top_hotel) = &bundles[0];
        let explanation = Explainer::explain_trip_plan(top_plan, top_flight, top_hotel);
        let alternatives = bundles[1..].iter().map(|(plan, _, _)| plan.clone()).collect();

        Ok(Some(PlannedTrip {
            plan: top_plan.clone(),
            explanation,
            alternatives,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DealMetadata, DealType};
    use std::collections::HashSet;

    fn sample_flight(id: &str, origin: &str, destination: &str, price: f64, score: u32) -> Deal {
        let now = Utc::now();
        Deal {
            deal_id: id.to_string(),
            deal_type: DealType::Flight,
            title: format!("{origin} to {destination}"),
            description: String::new(),
            price,
            original_price: price + 50.0,
            avg_30d_price: 0.0,
            discount_percent: 0.0,
            score,
            tags: HashSet::new(),
            metadata: DealMetadata::Flight {
                origin: origin.to_string(),
                destination: destination.to_string(),
                airline: "Delta".to_string(),
                departure: None,
                arrival: None,
                cabin_class: "economy".to_string(),
                baggage_included: false,
                flight_code: None,
                seats_left: 5,
            },
            expires_at: None,
            created_at: now,
            updated_at: now,
            active: true,
        }
    }

    fn sample_hotel(id: &str, city: &str, price: f64, score: u32) -> Deal {
        let now = Utc::now();
        Deal {
            deal_id: id.to_string(),
            deal_type: DealType::Hotel,
            title: format!("Hotel in {city}"),
            description: String::new(),
            price,
            original_price: price + 20.0,
            avg_30d_price: 0.0,
            discount_percent: 0.0,
            score,
            tags: HashSet::new(),
            metadata: DealMetadata::Hotel {
                city: city.to_string(),
                state: None,
                address: None,
                rating: 4.0,
                amenities: vec![],
                rooms_left: 5,
            },
            expires_at: None,
            created_at: now,
            updated_at: now,
            active: true,
        }
    }

    #[test]
    fn plans_a_bundle_within_budget() {
        let store = Arc::new(Store::in_memory().unwrap());
        store.persist_deal(&sample_flight("f1", "JFK", "LHR", 400.0, 70)).unwrap();
        store.persist_deal(&sample_hotel("h1", "LONDON", 150.0, 60)).unwrap();

        let planner = TripPlanner::new(store, 10, 5, 3);
        let result = planner
            .plan_trip("user-1", Some("NYC"), Some("LON"), Some(1000.0), 1, 1, &[], serde_json::json!({}))
            .unwrap();

        assert!(result.is_some());
        let planned = result.unwrap();
        assert_eq!(planned.plan.total_cost, 550.0);
        // 550 <= 0.8*1000 -> full 40-point budget sub-score.
        assert_eq!(planned.plan.fit_score, 40);
        assert!(planned.explanation.contains("Fit score"));
    }

    #[test]
    fn over_budget_bundle_is_still_returned_with_a_lower_fit_score() {
        let store = Arc::new(Store::in_memory().unwrap());
        store.persist_deal(&sample_flight("f1", "JFK", "LHR", 900.0, 70)).unwrap();
        store.persist_deal(&sample_hotel("h1", "LONDON", 900.0, 60)).unwrap();

        let planner = TripPlanner::new(store, 10, 5, 3);
        let result = planner
            .plan_trip("user-1", Some("NYC"), Some("LON"), Some(500.0), 1, 1, &[], serde_json::json!({}))
            .unwrap();

        let planned = result.expect("over-budget bundles are still returned, scored lower");
        assert_eq!(planned.plan.fit_score, 0);
    }

    #[test]
    fn destination_group_admits_member_airports_and_mapped_city_hotels() {
        let store = Arc::new(Store::in_memory().unwrap());
        // Into the NYC group via two different member airports, plus one
        // route that must be filtered out.
        store.persist_deal(&sample_flight("f-jfk", "LAX", "JFK", 350.0, 80)).unwrap();
        store.persist_deal(&sample_flight("f-ewr", "LAX", "EWR", 300.0, 75)).unwrap();
        store.persist_deal(&sample_flight("f-ord", "LAX", "ORD", 200.0, 90)).unwrap();
        store.persist_deal(&sample_hotel("h-ny", "New York City", 180.0, 70)).unwrap();
        store.persist_deal(&sample_hotel("h-chi", "Chicago", 120.0, 80)).unwrap();

        let planner = TripPlanner::new(store, 10, 5, 10);
        let planned = planner
            .plan_trip("user-1", None, Some("NYC"), Some(1000.0), 1, 1, &[], serde_json::json!({}))
            .unwrap()
            .expect("NYC group should bundle");

        let mut all_plans = vec![planned.plan.clone()];
        all_plans.extend(planned.alternatives.clone());
        for plan in &all_plans {
            assert!(plan.itinerary.flight_deal_id.starts_with("f-jfk") || plan.itinerary.flight_deal_id.starts_with("f-ewr"));
            assert_eq!(plan.itinerary.hotel_deal_id, "h-ny");
        }
        // Every admitted bundle totals under 0.8 * 1000, the full budget sub-score.
        assert_eq!(planned.plan.fit_score, 40);
    }

    #[test]
    fn absent_destination_does_not_filter_flights() {
        let store = Arc::new(Store::in_memory().unwrap());
        store.persist_deal(&sample_flight("f1", "JFK", "LHR", 400.0, 70)).unwrap();
        store.persist_deal(&sample_hotel("h1", "LONDON", 150.0, 60)).unwrap();

        let planner = TripPlanner::new(store, 10, 5, 3);
        let result = planner
            .plan_trip("user-1", None, None, None, 1, 1, &[], serde_json::json!({}))
            .unwrap();

        assert!(result.is_some());
    }
}
