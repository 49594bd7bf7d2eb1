//! Listing Store
//!
//! In-memory authoritative map of current listing state, keyed by token id.
//! The one write primitive is `upsert`, an idempotent merge; both the chain
//! event paths and the seller write path funnel through it, which is what
//! makes replay, duplicate delivery and backfill/live races safe.
//!
//! Merge policy:
//! - every field present in the patch overwrites the stored value, except
//! - `created_at`: adopted from the existing record once set, and
//! - `is_sold`: transitions false to true only; a patch trying to reopen a
//!   sold listing is ignored (and logged), never applied.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::debug;

use crate::models::{Listing, ListingPatch};

#[derive(Default)]
pub struct ListingStore {
    inner: RwLock<HashMap<String, Listing>>,
}

impl ListingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges `patch` onto the record for `token_id`, creating it with
    /// defaults (empty seller, zero price, lowest rarity, now, unsold)
    /// when absent. Returns the merged listing.
    pub fn upsert(&self, token_id: &str, patch: ListingPatch) -> Listing {
        let mut inner = self.inner.write();
        let listing = inner.entry(token_id.to_string()).or_insert_with(|| Listing {
            id: token_id.to_string(),
            token_id: token_id.to_string(),
            seller: String::new(),
            price_gtk: 0.0,
            rarity: Default::default(),
            name: String::new(),
            image_uri: String::new(),
            metadata_uri: None,
            metadata: None,
            created_at: patch.created_at.unwrap_or_else(chrono::Utc::now),
            is_sold: false,
            buyer: None,
            sold_tx_hash: None,
            sold_at: None,
            signature: None,
            signed_at: None,
        });

        if let Some(seller) = patch.seller {
            listing.seller = seller;
        }
        if let Some(price_gtk) = patch.price_gtk {
            listing.price_gtk = price_gtk;
        }
        if let Some(rarity) = patch.rarity {
            listing.rarity = rarity;
        }
        if let Some(name) = patch.name {
            listing.name = name;
        }
        if let Some(image_uri) = patch.image_uri {
            listing.image_uri = image_uri;
        }
        if let Some(metadata_uri) = patch.metadata_uri {
            listing.metadata_uri = Some(metadata_uri);
        }
        if let Some(metadata) = patch.metadata {
            listing.metadata = Some(metadata);
        }
        if let Some(is_sold) = patch.is_sold {
            if is_sold {
                listing.is_sold = true;
            } else if listing.is_sold {
                debug!(token_id, "ignoring merge that would reopen a sold listing");
            }
        }
        if let Some(buyer) = patch.buyer {
            listing.buyer = Some(buyer);
        }
        if let Some(sold_tx_hash) = patch.sold_tx_hash {
            listing.sold_tx_hash = Some(sold_tx_hash);
        }
        if let Some(sold_at) = patch.sold_at {
            listing.sold_at = Some(sold_at);
        }
        if let Some(signature) = patch.signature {
            listing.signature = Some(signature);
        }
        if let Some(signed_at) = patch.signed_at {
            listing.signed_at = Some(signed_at);
        }
        // created_at intentionally untouched for existing records.

        listing.clone()
    }

    pub fn get(&self, token_id: &str) -> Option<Listing> {
        self.inner.read().get(token_id).cloned()
    }

    /// All listings, newest first.
    pub fn list(&self) -> Vec<Listing> {
        let mut listings: Vec<Listing> = self.inner.read().values().cloned().collect();
        listings.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.token_id.cmp(&b.token_id))
        });
        listings
    }

    /// Token ids of listings still cached as active, the reconciliation
    /// sweep's work list.
    pub fn active_token_ids(&self) -> Vec<String> {
        self.inner
            .read()
            .values()
            .filter(|l| !l.is_sold)
            .map(|l| l.token_id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
