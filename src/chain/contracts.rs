//! Marketplace contract bindings
//!
//! The `sol!` interface gives us event signature hashes and calldata
//! encoding for the two view functions. Event payloads are parsed straight
//! from topics/data words rather than through the generated decoders: the
//! layouts are trivial and a malformed log must degrade to `None` (skip
//! that event), never to an error that stalls the stream.

use alloy_primitives::{Address, B256, U256};
use alloy_sol_types::sol;
use chrono::{DateTime, Utc};

use crate::market::events::{MarketEvent, MarketEventKind};

sol! {
    /// Emitted when a card is listed for sale.
    event Listed(uint256 indexed tokenId, address indexed seller, uint256 price);

    /// Emitted when a listed card is bought.
    event Sold(uint256 indexed tokenId, address indexed seller, address indexed buyer, uint256 price);

    /// Emitted when a seller withdraws a listing before sale.
    event ListingCancelled(uint256 indexed tokenId, address indexed seller);

    /// True while the token has an active listing.
    function isListed(uint256 tokenId) external view returns (bool);

    /// Authoritative listing record, used by diagnostics.
    function getListing(uint256 tokenId) external view returns (address seller, uint256 price, bool active);
}

/// GTK has 18 decimals on chain; cached listings carry decimal amounts.
const WEI_PER_GTK: u128 = 1_000_000_000_000_000_000;

pub fn wei_to_gtk(wei: U256) -> f64 {
    let unit = U256::from(WEI_PER_GTK);
    let whole = wei / unit;
    let frac = wei % unit;
    whole.saturating_to::<u128>() as f64 + frac.to::<u128>() as f64 / WEI_PER_GTK as f64
}

fn token_id_from_topic(topic: &B256) -> String {
    U256::from_be_slice(&topic[..]).to_string()
}

fn address_from_topic(topic: &B256) -> String {
    Address::from_slice(&topic[12..]).to_string()
}

/// Decodes one raw marketplace log into a `MarketEvent`.
///
/// Returns `None` for logs that are not one of the three marketplace
/// events or whose topic/data layout doesn't match; callers skip those.
pub fn decode_market_event(
    topics: &[B256],
    data: &[u8],
    block_number: u64,
    log_index: u64,
    tx_hash: Option<String>,
    timestamp: Option<DateTime<Utc>>,
) -> Option<MarketEvent> {
    use alloy_sol_types::SolEvent;

    let topic0 = topics.first()?;

    let (token_id, kind) = if *topic0 == Listed::SIGNATURE_HASH {
        // topics: sig, tokenId, seller; data: price
        if topics.len() < 3 || data.len() < 32 {
            return None;
        }
        (
            token_id_from_topic(&topics[1]),
            MarketEventKind::Listed {
                seller: address_from_topic(&topics[2]),
                price_gtk: wei_to_gtk(U256::from_be_slice(&data[..32])),
            },
        )
    } else if *topic0 == Sold::SIGNATURE_HASH {
        // topics: sig, tokenId, seller, buyer; data: price
        if topics.len() < 4 {
            return None;
        }
        let price_gtk = if data.len() >= 32 {
            Some(wei_to_gtk(U256::from_be_slice(&data[..32])))
        } else {
            None
        };
        (
            token_id_from_topic(&topics[1]),
            MarketEventKind::Sold {
                seller: Some(address_from_topic(&topics[2])),
                buyer: address_from_topic(&topics[3]),
                price_gtk,
            },
        )
    } else if *topic0 == ListingCancelled::SIGNATURE_HASH {
        // topics: sig, tokenId, seller
        if topics.len() < 2 {
            return None;
        }
        (
            token_id_from_topic(&topics[1]),
            MarketEventKind::Cancelled {
                seller: topics.get(2).map(address_from_topic),
            },
        )
    } else {
        return None;
    };

    Some(MarketEvent {
        token_id,
        kind,
        block_number,
        log_index,
        tx_hash,
        timestamp,
    })
}
