//! Ethereum JSON-RPC marketplace client
//!
//! Plain JSON-RPC over HTTP: `eth_blockNumber`, `eth_getLogs`, `eth_call`
//! and `eth_getBlockByNumber`. The live subscription is a polling tail of
//! `eth_getLogs` feeding a bounded channel; public RPC endpoints rarely
//! offer reliable websocket filters, and the engine's merge idempotence
//! tolerates the occasional overlap with backfill anyway.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, B256, U256};
use alloy_sol_types::{SolCall, SolEvent};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

use super::contracts::{
    decode_market_event, getListingCall, isListedCall, wei_to_gtk, Listed, ListingCancelled, Sold,
};
use super::{MarketplaceChain, OnchainListing};
use crate::market::events::{sort_events, MarketEvent};

/// Capacity of the live event channel. Marketplace traffic is a trickle;
/// anything near this bound means the consumer has stalled.
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct RpcMarketplaceChain {
    http: reqwest::Client,
    rpc_url: String,
    contract: Address,
    poll_interval: Duration,
    request_id: Arc<AtomicU64>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// Raw log entry as returned by `eth_getLogs`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcLog {
    topics: Vec<String>,
    data: String,
    block_number: String,
    log_index: String,
    transaction_hash: Option<String>,
    #[serde(default)]
    removed: bool,
}

#[derive(Debug, Deserialize)]
struct RpcBlock {
    timestamp: String,
}

impl RpcMarketplaceChain {
    pub fn new(
        http: reqwest::Client,
        rpc_url: String,
        contract: Address,
        poll_interval: Duration,
    ) -> Self {
        Self {
            http,
            rpc_url,
            contract,
            poll_interval,
            request_id: Arc::new(AtomicU64::new(1)),
        }
    }

    async fn rpc_call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response: RpcResponse<T> = self
            .http
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("rpc transport failure for {method}"))?
            .error_for_status()
            .with_context(|| format!("rpc http error for {method}"))?
            .json()
            .await
            .with_context(|| format!("malformed rpc response for {method}"))?;

        if let Some(err) = response.error {
            bail!("rpc error {} for {method}: {}", err.code, err.message);
        }
        response
            .result
            .ok_or_else(|| anyhow!("rpc response for {method} missing result"))
    }

    async fn get_logs(&self, topic0: B256, from_block: u64, to_block: u64) -> Result<Vec<RpcLog>> {
        let filter = json!({
            "address": self.contract.to_string(),
            "fromBlock": to_hex(from_block),
            "toBlock": to_hex(to_block),
            "topics": [format!("{topic0}")],
        });
        self.rpc_call("eth_getLogs", json!([filter])).await
    }

    async fn call_contract(&self, calldata: Vec<u8>) -> Result<Vec<u8>> {
        let tx = json!({
            "to": self.contract.to_string(),
            "data": format!("0x{}", hex::encode(calldata)),
        });
        let raw: String = self.rpc_call("eth_call", json!([tx, "latest"])).await?;
        decode_hex(&raw)
    }

    async fn block_timestamp(&self, block_number: u64) -> Result<DateTime<Utc>> {
        let block: RpcBlock = self
            .rpc_call(
                "eth_getBlockByNumber",
                json!([to_hex(block_number), false]),
            )
            .await?;
        let secs = parse_hex_u64(&block.timestamp)? as i64;
        DateTime::from_timestamp(secs, 0)
            .ok_or_else(|| anyhow!("block {block_number} timestamp out of range"))
    }

    /// Resolves the timestamps of `events` in place, one lookup per unique
    /// block. A failed lookup falls back to "now" rather than dropping the
    /// event; the timestamp is cosmetic, the merge is not.
    async fn resolve_timestamps(&self, events: &mut [MarketEvent]) {
        let mut cache: HashMap<u64, DateTime<Utc>> = HashMap::new();
        for event in events.iter_mut() {
            let ts = match cache.get(&event.block_number) {
                Some(ts) => *ts,
                None => {
                    let ts = match self.block_timestamp(event.block_number).await {
                        Ok(ts) => ts,
                        Err(e) => {
                            warn!(
                                block = event.block_number,
                                error = %e,
                                "block timestamp lookup failed, using wall clock"
                            );
                            Utc::now()
                        }
                    };
                    cache.insert(event.block_number, ts);
                    ts
                }
            };
            event.timestamp = Some(ts);
        }
    }

    fn decode_logs(logs: Vec<RpcLog>, out: &mut Vec<MarketEvent>) {
        for log in logs {
            if log.removed {
                continue;
            }
            match decode_rpc_log(&log) {
                Some(event) => out.push(event),
                None => debug!(
                    topics = log.topics.len(),
                    block = %log.block_number,
                    "skipping undecodable marketplace log"
                ),
            }
        }
    }
}

fn decode_rpc_log(log: &RpcLog) -> Option<MarketEvent> {
    let topics: Vec<B256> = log
        .topics
        .iter()
        .map(|t| t.parse().ok())
        .collect::<Option<Vec<_>>>()?;
    let data = decode_hex(&log.data).ok()?;
    let block_number = parse_hex_u64(&log.block_number).ok()?;
    let log_index = parse_hex_u64(&log.log_index).ok()?;
    decode_market_event(
        &topics,
        &data,
        block_number,
        log_index,
        log.transaction_hash.clone(),
        None,
    )
}

fn to_hex(value: u64) -> String {
    format!("{value:#x}")
}

fn parse_hex_u64(raw: &str) -> Result<u64> {
    let trimmed = raw.trim_start_matches("0x");
    u64::from_str_radix(trimmed, 16).with_context(|| format!("invalid hex quantity {raw:?}"))
}

fn decode_hex(raw: &str) -> Result<Vec<u8>> {
    let trimmed = raw.trim_start_matches("0x");
    hex::decode(trimmed).with_context(|| format!("invalid hex data {raw:?}"))
}

fn parse_token_id(token_id: &str) -> Result<U256> {
    token_id
        .parse()
        .with_context(|| format!("invalid token id {token_id:?}"))
}

#[async_trait]
impl MarketplaceChain for RpcMarketplaceChain {
    async fn latest_block(&self) -> Result<u64> {
        let raw: String = self.rpc_call("eth_blockNumber", json!([])).await?;
        parse_hex_u64(&raw)
    }

    async fn query_events(&self, from_block: u64, to_block: u64) -> Result<Vec<MarketEvent>> {
        // One query per event kind, mirroring the contract's three topic
        // filters, merged and replay-sorted afterwards.
        let mut events = Vec::new();
        for topic0 in [
            Listed::SIGNATURE_HASH,
            Sold::SIGNATURE_HASH,
            ListingCancelled::SIGNATURE_HASH,
        ] {
            let logs = self.get_logs(topic0, from_block, to_block).await?;
            Self::decode_logs(logs, &mut events);
        }
        sort_events(&mut events);
        self.resolve_timestamps(&mut events).await;
        Ok(events)
    }

    async fn is_listed(&self, token_id: &str) -> Result<bool> {
        let call = isListedCall {
            tokenId: parse_token_id(token_id)?,
        };
        let returned = self.call_contract(call.abi_encode()).await?;
        let decoded = isListedCall::abi_decode_returns(&returned, true)
            .context("decode isListed return")?;
        Ok(decoded._0)
    }

    async fn get_listing(&self, token_id: &str) -> Result<OnchainListing> {
        let call = getListingCall {
            tokenId: parse_token_id(token_id)?,
        };
        let returned = self.call_contract(call.abi_encode()).await?;
        let decoded = getListingCall::abi_decode_returns(&returned, true)
            .context("decode getListing return")?;
        Ok(OnchainListing {
            seller: decoded.seller.to_string(),
            price_gtk: wei_to_gtk(decoded.price),
            active: decoded.active,
        })
    }

    fn subscribe(&self, from_block: u64) -> mpsc::Receiver<MarketEvent> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let chain = self.clone();

        tokio::spawn(async move {
            let mut next_block = from_block;
            let mut ticker = interval(chain.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                let head = match chain.latest_block().await {
                    Ok(head) => head,
                    Err(e) => {
                        warn!(error = %e, "chain head poll failed");
                        continue;
                    }
                };
                if head < next_block {
                    continue;
                }

                match chain.query_events(next_block, head).await {
                    Ok(events) => {
                        for event in events {
                            if tx.send(event).await.is_err() {
                                // Consumer dropped; the engine is gone.
                                return;
                            }
                        }
                        next_block = head + 1;
                    }
                    Err(e) => {
                        // Keep next_block where it is; the range is retried
                        // next tick and duplicate application is safe.
                        warn!(
                            from = next_block,
                            to = head,
                            error = %e,
                            "live event tail query failed"
                        );
                    }
                }
            }
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_quantity_parsing() {
        assert_eq!(parse_hex_u64("0x0").unwrap(), 0);
        assert_eq!(parse_hex_u64("0x10").unwrap(), 16);
        assert_eq!(parse_hex_u64("a").unwrap(), 10);
        assert!(parse_hex_u64("0xzz").is_err());
        assert_eq!(to_hex(255), "0xff");
    }

    #[test]
    fn undecodable_rpc_logs_are_skipped() {
        let log = RpcLog {
            topics: vec!["0xnot-a-topic".to_string()],
            data: "0x".to_string(),
            block_number: "0x10".to_string(),
            log_index: "0x0".to_string(),
            transaction_hash: None,
            removed: false,
        };
        assert!(decode_rpc_log(&log).is_none());

        let mut out = Vec::new();
        RpcMarketplaceChain::decode_logs(vec![log], &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn removed_logs_are_dropped() {
        use alloy_primitives::{Address, U256};

        let seller: Address = "0x1111111111111111111111111111111111111111".parse().unwrap();
        let log = RpcLog {
            topics: vec![
                format!("{}", Listed::SIGNATURE_HASH),
                format!("{}", B256::from(U256::from(7u64))),
                format!("{}", seller.into_word()),
            ],
            data: format!("0x{}", hex::encode([0u8; 32])),
            block_number: "0x10".to_string(),
            log_index: "0x0".to_string(),
            transaction_hash: None,
            removed: true,
        };

        // Sanity: the log itself decodes fine...
        assert!(decode_rpc_log(&log).is_some());
        // ...but the reorged-out flag drops it.
        let mut out = Vec::new();
        RpcMarketplaceChain::decode_logs(vec![log], &mut out);
        assert!(out.is_empty());
    }
}
