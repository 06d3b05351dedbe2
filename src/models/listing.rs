//! Listing record data structures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Prefix for ids derived from a stable field instead of the listing URL.
const DERIVED_ID_PREFIX: &str = "img-";

/// Number of hex characters kept from the SHA-256 digest of a derived id.
const DERIVED_ID_LEN: usize = 16;

/// A listing candidate extracted from a feed page.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListingRecord {
    /// Identifier, unique within a topic
    pub id: String,

    /// Thumbnail shown in the feed
    pub image_url: String,

    /// Absolute URL of the listing page
    pub url: String,

    /// Display price (e.g. "₪12,000"), empty if unknown
    pub price: String,

    /// Room count label, empty if unknown
    pub rooms: String,

    /// Floor label, empty if unknown
    pub floor: String,

    /// Size label, empty if unknown
    pub size: String,

    /// Cleaned card text summary
    pub text: String,

    /// When the record was extracted
    pub observed_at: DateTime<Utc>,
}

impl ListingRecord {
    /// Create a record with only an id, stamped with the current time.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            observed_at: Utc::now(),
            ..Self::default()
        }
    }

    /// Derive a deterministic id from a stable field such as the image URL.
    pub fn derive_id(stable: &str) -> String {
        let digest = Sha256::digest(stable.as_bytes());
        let hex = hex::encode(digest);
        format!("{}{}", DERIVED_ID_PREFIX, &hex[..DERIVED_ID_LEN])
    }

    /// Project the record into its persisted form.
    pub fn to_stored(&self, added_at: DateTime<Utc>) -> StoredListing {
        StoredListing {
            image_url: self.image_url.clone(),
            url: self.url.clone(),
            price: self.price.clone(),
            rooms: self.rooms.clone(),
            floor: self.floor.clone(),
            size: self.size.clone(),
            text: self.text.clone(),
            added_at,
        }
    }
}

/// Persisted projection of a listing, keyed by id in the topic state file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoredListing {
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub rooms: String,
    #[serde(default)]
    pub floor: String,
    #[serde(default)]
    pub size: String,
    #[serde(default)]
    pub text: String,
    pub added_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_id_is_stable() {
        let a = ListingRecord::derive_id("https://img.example.com/Pic/1.jpg");
        let b = ListingRecord::derive_id("https://img.example.com/Pic/1.jpg");
        let c = ListingRecord::derive_id("https://img.example.com/Pic/2.jpg");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("img-"));
        assert_eq!(a.len(), DERIVED_ID_PREFIX.len() + DERIVED_ID_LEN);
    }

    #[test]
    fn test_stored_listing_uses_camel_case() {
        let mut record = ListingRecord::new("zvr626ts");
        record.image_url = "https://img.example.com/a.jpg".into();
        record.price = "₪12,000".into();

        let stored = record.to_stored(Utc::now());
        let json = serde_json::to_value(&stored).unwrap();

        assert_eq!(json["imageUrl"], "https://img.example.com/a.jpg");
        assert_eq!(json["price"], "₪12,000");
        assert!(json.get("addedAt").is_some());
        assert!(json.get("id").is_none());
    }
}
