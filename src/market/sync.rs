//! Chain Event Synchronization & Listing Reconciliation Engine
//!
//! One `MarketSync` instance owns the listing store, the snapshot file and
//! the chain handle. Lifecycle: the first caller of `ensure_ready` runs
//! bootstrap (snapshot restore, historical backfill, live worker spawn)
//! exactly once; every concurrent caller awaits that single outcome.
//! Afterwards reads pass through a rate-limited reconciliation sweep and
//! all mutation funnels through the store's idempotent merge, persisted
//! through a single gate so snapshot writes never overlap.
//!
//! Failure stance: chain-event-driven errors are absorbed locally (the
//! stream must never stall on one bad event or RPC hiccup); write-path
//! errors propagate to the caller. Nothing here is fatal to the process.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Weak};

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::chain::{MarketplaceChain, OnchainListing};
use crate::leaderboard::{RankingEvent, RankingEventKind, RankingSink};
use crate::market::error::MarketError;
use crate::market::events::{sort_events, MarketEvent, MarketEventKind};
use crate::market::snapshot::SnapshotStore;
use crate::market::store::ListingStore;
use crate::models::{CreateListingInput, Listing, ListingPatch};

/// Minimum seconds between reconciliation sweeps, to bound RPC load.
const RECONCILE_COOLDOWN_SECS: i64 = 15;

/// Minimum seconds between bootstrap attempts after a failure. Between
/// attempts, reads serve whatever snapshot state was loaded (stale
/// cache-only behavior).
const BOOTSTRAP_RETRY_SECS: i64 = 30;

pub struct MarketSync {
    store: ListingStore,
    snapshot: SnapshotStore,
    /// None switches the engine into cache-only mode.
    chain: Option<Arc<dyn MarketplaceChain>>,
    ranking: Option<Arc<dyn RankingSink>>,
    sync_from_block: u64,

    ready: AtomicBool,
    /// Single-flight guard for bootstrap; concurrent callers queue here
    /// and observe the one outcome.
    init_lock: Mutex<()>,
    last_init_attempt_ms: AtomicI64,
    last_reconcile_ms: AtomicI64,
    /// Serializes snapshot writes; the engine never issues two
    /// overlapping save operations.
    persist_gate: Mutex<()>,
    /// Handle to hand the spawned live worker an owned reference.
    self_handle: Weak<MarketSync>,
}

impl MarketSync {
    pub fn new(
        snapshot: SnapshotStore,
        chain: Option<Arc<dyn MarketplaceChain>>,
        ranking: Option<Arc<dyn RankingSink>>,
        sync_from_block: u64,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            store: ListingStore::new(),
            snapshot,
            chain,
            ranking,
            sync_from_block,
            ready: AtomicBool::new(false),
            init_lock: Mutex::new(()),
            last_init_attempt_ms: AtomicI64::new(0),
            last_reconcile_ms: AtomicI64::new(0),
            persist_gate: Mutex::new(()),
            self_handle: weak.clone(),
        })
    }

    /// True once bootstrap has completed (successfully or in cache-only
    /// mode).
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Runs bootstrap at most once per process, lazily. A failed attempt
    /// is retried, throttled to one attempt per `BOOTSTRAP_RETRY_SECS`;
    /// callers in between proceed against the stale cache.
    pub async fn ensure_ready(&self) {
        if self.ready.load(Ordering::Acquire) {
            return;
        }

        let _guard = self.init_lock.lock().await;
        if self.ready.load(Ordering::Acquire) {
            return;
        }

        let now_ms = Utc::now().timestamp_millis();
        let last_ms = self.last_init_attempt_ms.load(Ordering::Acquire);
        if last_ms != 0 && now_ms - last_ms < BOOTSTRAP_RETRY_SECS * 1000 {
            return;
        }
        self.last_init_attempt_ms.store(now_ms, Ordering::Release);

        match self.bootstrap().await {
            Ok(()) => self.ready.store(true, Ordering::Release),
            Err(e) => {
                error!(error = %e, "marketplace bootstrap failed; serving stale cache until retry");
            }
        }
    }

    /// Snapshot restore, historical backfill, live worker spawn.
    async fn bootstrap(&self) -> Result<()> {
        let stored = self.snapshot.load().await;
        let mut restored = 0usize;
        for item in stored {
            // Legacy snapshots may carry only one of the two id fields.
            let key = if !item.token_id.is_empty() {
                item.token_id.clone()
            } else if !item.id.is_empty() {
                item.id.clone()
            } else {
                continue;
            };
            self.store.upsert(&key, ListingPatch::from_listing(&item));
            restored += 1;
        }
        info!(listings = restored, "restored marketplace snapshot");

        let Some(chain) = self.chain.clone() else {
            info!("no marketplace contract configured; running cache-only");
            return Ok(());
        };

        let head = chain.latest_block().await.context("query chain head")?;
        let mut events = chain
            .query_events(self.sync_from_block, head)
            .await
            .context("backfill event query")?;
        sort_events(&mut events);

        let replayed = events.len();
        for event in &events {
            self.apply_event(event);
        }
        if replayed > 0 {
            // One save for the whole sweep; per-event persistence would
            // rewrite the snapshot thousands of times on a cold start.
            self.persist().await.context("persist backfilled state")?;
        }
        info!(
            from_block = self.sync_from_block,
            head, events = replayed, "marketplace backfill complete"
        );

        self.spawn_event_worker(chain, head.saturating_add(1));
        Ok(())
    }

    /// Single consumer of the live subscription channel. Applying merges
    /// serially here is what keeps "one mutator at a time" true without a
    /// store-level transaction.
    fn spawn_event_worker(&self, chain: Arc<dyn MarketplaceChain>, from_block: u64) {
        let Some(engine) = self.self_handle.upgrade() else {
            return;
        };
        let mut rx = chain.subscribe(from_block);
        tokio::spawn(async move {
            info!(from_block, "live marketplace event worker started");
            while let Some(event) = rx.recv().await {
                engine.handle_live_event(event).await;
            }
            warn!("live marketplace event stream ended");
        });
    }

    // ------------------------------------------------------------------
    // Event application
    // ------------------------------------------------------------------

    /// Merges one chain event into the store. Used verbatim by both the
    /// backfill replay and the live path, which is what makes duplicate
    /// delivery across the two a no-op.
    fn apply_event(&self, event: &MarketEvent) -> Listing {
        let patch = match &event.kind {
            MarketEventKind::Listed { seller, price_gtk } => ListingPatch {
                seller: Some(seller.clone()),
                price_gtk: Some(*price_gtk),
                created_at: event.timestamp,
                is_sold: Some(false),
                ..Default::default()
            },
            MarketEventKind::Sold {
                seller,
                buyer,
                price_gtk,
            } => ListingPatch {
                seller: seller.clone(),
                price_gtk: *price_gtk,
                is_sold: Some(true),
                buyer: Some(buyer.clone()),
                sold_tx_hash: event.tx_hash.clone(),
                sold_at: Some(event.timestamp.unwrap_or_else(Utc::now)),
                ..Default::default()
            },
            MarketEventKind::Cancelled { .. } => ListingPatch {
                is_sold: Some(true),
                sold_tx_hash: event.tx_hash.clone(),
                sold_at: Some(event.timestamp.unwrap_or_else(Utc::now)),
                ..Default::default()
            },
        };
        self.store.upsert(&event.token_id, patch)
    }

    /// Live path: merge, persist, and for sales notify the ranking
    /// collaborator. Persistence failures are logged, not propagated; the
    /// event stream must keep draining.
    pub(crate) async fn handle_live_event(&self, event: MarketEvent) {
        let listing = self.apply_event(&event);
        debug!(
            token_id = %event.token_id,
            block = event.block_number,
            log_index = event.log_index,
            "applied live marketplace event"
        );

        if let Err(e) = self.persist().await {
            error!(token_id = %event.token_id, error = %e, "failed to persist after live event");
        }

        if let MarketEventKind::Sold { buyer, .. } = &event.kind {
            self.dispatch_sale_rankings(&listing, buyer);
        }
    }

    /// Fire-and-forget ranking notification for a completed sale: one
    /// purchase event for the buyer, one sale event for the seller.
    /// Failures are isolated; the listing update has already happened.
    fn dispatch_sale_rankings(&self, listing: &Listing, buyer: &str) {
        let Some(ranking) = self.ranking.clone() else {
            return;
        };

        let rarity_index = listing.rarity.index();
        let mut events = vec![RankingEvent::new(buyer, RankingEventKind::Purchase, rarity_index)];
        if !listing.seller.is_empty() {
            events.push(RankingEvent::new(
                &listing.seller,
                RankingEventKind::Sale,
                rarity_index,
            ));
        }

        for event in events {
            let sink = Arc::clone(&ranking);
            tokio::spawn(async move {
                if let Err(e) = sink.record_event(event.clone()).await {
                    warn!(address = %event.address, error = %e, "ranking event dispatch failed");
                }
            });
        }
    }

    // ------------------------------------------------------------------
    // Reconciliation
    // ------------------------------------------------------------------

    /// Cross-checks cached-active listings against `isListed`. Rate
    /// limited to one sweep per `RECONCILE_COOLDOWN_SECS` unless forced;
    /// callers inside the cooldown get a cheap no-op. No-op in cache-only
    /// mode.
    pub async fn reconcile(&self, force: bool) {
        let Some(chain) = self.chain.clone() else {
            return;
        };

        let now_ms = Utc::now().timestamp_millis();
        if force {
            self.last_reconcile_ms.store(now_ms, Ordering::Release);
        } else {
            let last_ms = self.last_reconcile_ms.load(Ordering::Acquire);
            if now_ms - last_ms < RECONCILE_COOLDOWN_SECS * 1000 {
                return;
            }
            // Claim the window atomically before sweeping; of N concurrent
            // callers exactly one wins, the rest take the cooldown exit.
            if self
                .last_reconcile_ms
                .compare_exchange(last_ms, now_ms, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
        }

        let mut mutated = false;
        for token_id in self.store.active_token_ids() {
            match chain.is_listed(&token_id).await {
                Ok(true) => {}
                Ok(false) => {
                    // Sold or cancelled out-of-band, or the event stream
                    // missed it. No buyer is known on this path.
                    info!(token_id = %token_id, "chain reports listing inactive, marking sold");
                    self.store.upsert(
                        &token_id,
                        ListingPatch {
                            is_sold: Some(true),
                            sold_at: Some(Utc::now()),
                            ..Default::default()
                        },
                    );
                    mutated = true;
                }
                Err(e) => {
                    // Skipped this sweep, retried on the next one.
                    warn!(token_id = %token_id, error = %e, "reconcile query failed, skipping");
                }
            }
        }

        if mutated {
            if let Err(e) = self.persist().await {
                error!(error = %e, "failed to persist after reconciliation");
            }
        }
    }

    // ------------------------------------------------------------------
    // Operations exposed upward
    // ------------------------------------------------------------------

    /// All cached listings, newest first, after an (at most one per
    /// cooldown window) reconciliation pass.
    pub async fn list_all(&self) -> Vec<Listing> {
        self.ensure_ready().await;
        self.reconcile(false).await;
        self.store.list()
    }

    /// Seller write path: merge the input and persist synchronously.
    /// Persistence failure propagates; a listing the caller believes is
    /// published must not silently lack durability.
    pub async fn create_or_update(
        &self,
        input: CreateListingInput,
    ) -> Result<Listing, MarketError> {
        self.ensure_ready().await;
        let token_id = input.token_id.clone();
        let listing = self.store.upsert(&token_id, input.into_patch());
        self.persist().await.map_err(MarketError::Persistence)?;
        info!(token_id = %token_id, "listing created or updated");
        Ok(listing)
    }

    /// Publishing is one-way once broadcast; removal is permanently
    /// disallowed regardless of prior state.
    pub fn remove_listing(&self, _token_id: &str, _requester: &str) -> Result<(), MarketError> {
        Err(MarketError::RemovalDisabled)
    }

    /// Diagnostic read of the authoritative on-chain record. None in
    /// cache-only mode.
    pub async fn onchain_listing(&self, token_id: &str) -> Result<Option<OnchainListing>> {
        let Some(chain) = self.chain.clone() else {
            return Ok(None);
        };
        let listing = chain
            .get_listing(token_id)
            .await
            .with_context(|| format!("getListing({token_id}) failed"))?;
        Ok(Some(listing))
    }

    pub fn get(&self, token_id: &str) -> Option<Listing> {
        self.store.get(token_id)
    }

    async fn persist(&self) -> Result<()> {
        let _gate = self.persist_gate.lock().await;
        let listings = self.store.list();
        self.snapshot.save(&listings).await
    }
}
