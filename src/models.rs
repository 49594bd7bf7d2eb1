//! Core marketplace data model
//!
//! The wire/snapshot shapes here mirror what the smart contracts and the
//! web client exchange: camelCase field names, RFC 3339 timestamps and
//! decimal GTK prices (the chain deals in 18-decimal base units, converted
//! at the RPC boundary).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Rarity tier of a card. Variants are ordered lowest to highest; the
/// lowest tier is the default for records created without chain metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Rarity {
    #[default]
    Common,
    Rare,
    Epic,
    Legendary,
}

impl Rarity {
    /// Tier index used by the ranking subsystem's rarity weights.
    pub fn index(self) -> u8 {
        match self {
            Rarity::Common => 0,
            Rarity::Rare => 1,
            Rarity::Epic => 2,
            Rarity::Legendary => 3,
        }
    }
}

/// One attribute inside an NFT metadata blob (OpenSea-style).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataAttribute {
    pub trait_type: String,
    pub value: serde_json::Value,
}

/// Structured off-chain metadata attached to a listing at creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingMetadata {
    pub name: String,
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Vec<MetadataAttribute>>,
}

/// Cached market state of one tradeable card.
///
/// `token_id` is the stable key. `created_at` is set once and survives
/// every later merge; `is_sold` only ever transitions false to true.
/// Sold or cancelled listings stay in the store as terminal records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub token_id: String,
    pub seller: String,
    pub price_gtk: f64,
    pub rarity: Rarity,
    pub name: String,
    pub image_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ListingMetadata>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_sold: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buyer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sold_tx_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sold_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_at: Option<i64>,
}

/// Partial update merged onto a listing. Every present field overwrites
/// the stored value, with two exceptions enforced by the store:
/// `created_at` is only honored when the record is first created, and
/// `is_sold` never transitions back from true to false.
#[derive(Debug, Clone, Default)]
pub struct ListingPatch {
    pub seller: Option<String>,
    pub price_gtk: Option<f64>,
    pub rarity: Option<Rarity>,
    pub name: Option<String>,
    pub image_uri: Option<String>,
    pub metadata_uri: Option<String>,
    pub metadata: Option<ListingMetadata>,
    pub created_at: Option<DateTime<Utc>>,
    pub is_sold: Option<bool>,
    pub buyer: Option<String>,
    pub sold_tx_hash: Option<String>,
    pub sold_at: Option<DateTime<Utc>>,
    pub signature: Option<String>,
    pub signed_at: Option<i64>,
}

impl ListingPatch {
    /// Full-record patch used when replaying a persisted snapshot into the
    /// store through the same merge path as everything else.
    pub fn from_listing(listing: &Listing) -> Self {
        Self {
            seller: Some(listing.seller.clone()),
            price_gtk: Some(listing.price_gtk),
            rarity: Some(listing.rarity),
            name: Some(listing.name.clone()),
            image_uri: Some(listing.image_uri.clone()),
            metadata_uri: listing.metadata_uri.clone(),
            metadata: listing.metadata.clone(),
            created_at: Some(listing.created_at),
            is_sold: Some(listing.is_sold),
            buyer: listing.buyer.clone(),
            sold_tx_hash: listing.sold_tx_hash.clone(),
            sold_at: listing.sold_at,
            signature: listing.signature.clone(),
            signed_at: listing.signed_at,
        }
    }
}

/// Seller-originated listing input from the write path. Listings created
/// here are pending until the matching `Listed` event confirms them.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateListingInput {
    pub token_id: String,
    pub seller: String,
    pub price_gtk: f64,
    pub rarity: Rarity,
    pub name: String,
    pub image_uri: String,
    #[serde(default)]
    pub metadata_uri: Option<String>,
    #[serde(default)]
    pub metadata: Option<ListingMetadata>,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub signed_at: Option<i64>,
}

impl CreateListingInput {
    pub fn validate(&self) -> Result<(), String> {
        if self.token_id.trim().is_empty() {
            return Err("tokenId is required".to_string());
        }
        if self.seller.trim().is_empty() {
            return Err("seller is required".to_string());
        }
        if !self.price_gtk.is_finite() || self.price_gtk < 0.0 {
            return Err("priceGtk must be a non-negative number".to_string());
        }
        if self.name.trim().is_empty() {
            return Err("name is required".to_string());
        }
        if self.image_uri.trim().is_empty() {
            return Err("imageUri is required".to_string());
        }
        Ok(())
    }

    pub fn into_patch(self) -> ListingPatch {
        ListingPatch {
            seller: Some(self.seller),
            price_gtk: Some(self.price_gtk),
            rarity: Some(self.rarity),
            name: Some(self.name),
            image_uri: Some(self.image_uri),
            metadata_uri: self.metadata_uri,
            metadata: self.metadata,
            signature: self.signature,
            signed_at: self.signed_at,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_input() -> CreateListingInput {
        CreateListingInput {
            token_id: "7".to_string(),
            seller: "0xA".to_string(),
            price_gtk: 100.0,
            rarity: Rarity::Rare,
            name: "Ember Drake".to_string(),
            image_uri: "ipfs://img".to_string(),
            metadata_uri: None,
            metadata: None,
            signature: None,
            signed_at: None,
        }
    }

    #[test]
    fn rarity_orders_lowest_first() {
        assert!(Rarity::Common < Rarity::Legendary);
        assert_eq!(Rarity::default(), Rarity::Common);
        assert_eq!(Rarity::Legendary.index(), 3);
    }

    #[test]
    fn rarity_uses_uppercase_wire_names() {
        assert_eq!(serde_json::to_string(&Rarity::Epic).unwrap(), "\"EPIC\"");
        let parsed: Rarity = serde_json::from_str("\"LEGENDARY\"").unwrap();
        assert_eq!(parsed, Rarity::Legendary);
    }

    #[test]
    fn create_input_validation() {
        assert!(valid_input().validate().is_ok());

        let mut missing_token = valid_input();
        missing_token.token_id = "  ".to_string();
        assert!(missing_token.validate().is_err());

        let mut negative_price = valid_input();
        negative_price.price_gtk = -1.0;
        assert!(negative_price.validate().is_err());

        let mut nan_price = valid_input();
        nan_price.price_gtk = f64::NAN;
        assert!(nan_price.validate().is_err());
    }

    #[test]
    fn listing_serializes_with_snapshot_field_names() {
        let listing = Listing {
            id: "7".to_string(),
            token_id: "7".to_string(),
            seller: "0xA".to_string(),
            price_gtk: 100.0,
            rarity: Rarity::Common,
            name: "Ember Drake".to_string(),
            image_uri: "ipfs://img".to_string(),
            metadata_uri: None,
            metadata: None,
            created_at: Utc::now(),
            is_sold: false,
            buyer: None,
            sold_tx_hash: None,
            sold_at: None,
            signature: None,
            signed_at: None,
        };

        let value = serde_json::to_value(&listing).unwrap();
        assert_eq!(value["tokenId"], "7");
        assert_eq!(value["priceGtk"], 100.0);
        assert_eq!(value["isSold"], false);
        // Unset optionals stay off the wire entirely.
        assert!(value.get("buyer").is_none());
        assert!(value.get("soldTxHash").is_none());
    }
}
