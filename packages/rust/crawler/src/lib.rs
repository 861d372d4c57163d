//! Request pacing, retrying transport, and tag listings.
//!
//! This crate provides:
//! - [`PolitenessGate`]: one randomized inter-request delay shared by all workers
//! - [`RetryingFetcher`]: bounded retries around an injected [`Fetcher`](tagcrawl_shared::Fetcher)
//! - [`HttpFetcher`]: the `reqwest` transport
//! - [`TagListing`]: lazy, paginated enumeration of one tag's articles

pub mod gate;
pub mod http;
pub mod listing;
pub mod retry;

pub use gate::PolitenessGate;
pub use http::HttpFetcher;
pub use listing::{ListingPage, TagListing, article_id_from_url, is_article_link, parse_listing_page};
pub use retry::RetryingFetcher;
