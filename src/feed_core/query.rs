//! Server-side filter for the transaction feed.
//!
//! The feed takes a BitQuery document, base64-encoded into the stream URL:
//!
//! ```json
//! {"v": 3, "q": {"find": {"out.e.a": {"$in": ["qz4v8…", "pqhys…"]}}}}
//! ```
//!
//! It only matches transactions with at least one output paying one of the
//! listed addresses, so the query must be rebuilt whenever the address set
//! grows.

use {
    crate::address_set::Address,
    base64::{engine::general_purpose::STANDARD, Engine as _},
    serde_json::json,
};

const QUERY_VERSION: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedQuery {
    addresses: Vec<Address>,
}

impl FeedQuery {
    pub fn for_addresses(addresses: impl IntoIterator<Item = Address>) -> Self {
        let mut addresses: Vec<Address> = addresses.into_iter().collect();
        addresses.sort();
        addresses.dedup();
        Self { addresses }
    }

    pub fn addresses(&self) -> &[Address] {
        &self.addresses
    }

    pub fn to_json(&self) -> serde_json::Value {
        let payloads: Vec<&str> = self.addresses.iter().map(Address::payload).collect();
        json!({
            "v": QUERY_VERSION,
            "q": {
                "find": {
                    "out.e.a": { "$in": payloads }
                }
            }
        })
    }

    /// Base64 of the JSON document, ready to append to the feed URL.
    pub fn encoded(&self) -> String {
        STANDARD.encode(self.to_json().to_string())
    }

    pub fn url(&self, base_url: &str) -> String {
        format!("{}{}", base_url, self.encoded())
    }
}
