//! The four-stage deal pipeline: Normalizer -> Scorer -> Tagger -> Persister,
//! each a [`crate::bus::Handler`] wired to the next stage's topic.

pub mod normalizer;
pub mod persister;
pub mod scorer;
pub mod tagger;

pub const TOPIC_RAW_FEEDS: &str = "raw_feeds";
pub const TOPIC_NORMALIZED: &str = "normalized";
pub const TOPIC_SCORED: &str = "scored";
pub const TOPIC_TAGGED: &str = "tagged";
pub const TOPIC_EVENTS: &str = "events";

pub use normalizer::Normalizer;
pub use persister::Persister;
pub use scorer::Scorer;
pub use tagger::Tagger;
