//! Player ranking subsystem
//!
//! Tracks per-address play statistics (draws, ownership, trades, fusions)
//! and derives a composite score. Fed from two directions: explicit events
//! posted by the game client and sale notifications from the marketplace
//! sync engine, which only knows the `RankingSink` seam.
//!
//! Addresses are case-insensitive; everything is stored lowercased.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Hard cap on summary size, also the default when no limit is given.
const MAX_SUMMARY_LIMIT: usize = 100;

/// Points per rarity tier, indexed by `Rarity::index()`. Unknown tiers
/// score zero.
const RARITY_WEIGHTS: [u64; 4] = [1, 4, 9, 16];

const STORE_VERSION: u32 = 1;

fn rarity_weight(index: Option<u8>) -> u64 {
    index
        .and_then(|i| RARITY_WEIGHTS.get(i as usize).copied())
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankingEventKind {
    Draw,
    Purchase,
    Sale,
    Fusion,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingEvent {
    pub address: String,
    #[serde(rename = "type")]
    pub kind: RankingEventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rarity: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_rarity: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
}

impl RankingEvent {
    pub fn new(address: &str, kind: RankingEventKind, rarity: u8) -> Self {
        Self {
            address: address.to_string(),
            kind,
            rarity: Some(rarity),
            target_rarity: None,
            success: None,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.address.trim().is_empty() {
            return Err("address is required".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStats {
    pub address: String,
    pub draws: u64,
    pub owned: u64,
    pub sales: u64,
    pub purchases: u64,
    pub fusions: u64,
    pub rarity_points: u64,
    pub score: u64,
    pub updated_at: DateTime<Utc>,
}

impl PlayerStats {
    fn new(address: String) -> Self {
        Self {
            address,
            draws: 0,
            owned: 0,
            sales: 0,
            purchases: 0,
            fusions: 0,
            rarity_points: 0,
            score: 0,
            updated_at: Utc::now(),
        }
    }

    /// Mutates the counters for one event and recomputes the score.
    fn apply(&mut self, event: &RankingEvent) {
        let rarity_value = rarity_weight(event.rarity);

        match event.kind {
            RankingEventKind::Draw => {
                self.draws += 1;
                self.owned += 1;
                self.rarity_points += rarity_value;
            }
            RankingEventKind::Purchase => {
                self.purchases += 1;
                self.owned += 1;
                self.rarity_points += rarity_value;
            }
            RankingEventKind::Sale => {
                self.sales += 1;
                self.owned = self.owned.saturating_sub(1);
                self.rarity_points = self.rarity_points.saturating_sub(rarity_value);
            }
            RankingEventKind::Fusion => {
                // Five inputs consumed, one (usually higher-tier) card out.
                self.fusions += 1;
                self.rarity_points = self.rarity_points.saturating_sub(rarity_value * 5);
                self.owned = self.owned.saturating_sub(5) + 1;
                let output = rarity_weight(event.target_rarity.or(event.rarity));
                self.rarity_points += output;
            }
        }

        self.score = self.compute_score();
        self.updated_at = Utc::now();
    }

    /// Collecting and trading up score; selling off and burning through
    /// fusions cost points. Never negative.
    fn compute_score(&self) -> u64 {
        let base = self.owned as i64 * 10
            + self.rarity_points as i64 * 3
            + self.draws as i64 * 2
            + self.purchases as i64 * 4;
        let penalty = self.sales as i64 * 4 + self.fusions as i64;
        (base - penalty).max(0) as u64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingEntry {
    pub address: String,
    pub value: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<String>,
}

/// Three independently-sorted views over the same stats.
#[derive(Debug, Clone, Serialize)]
pub struct RankingSummary {
    pub draws: Vec<RankingEntry>,
    pub profits: Vec<RankingEntry>,
    pub rarity: Vec<RankingEntry>,
}

/// On-disk shape. Versioned so a future migration can tell old files
/// apart; a bare legacy array is also accepted on load.
#[derive(Debug, Serialize, Deserialize)]
struct LeaderboardFile {
    version: u32,
    players: Vec<PlayerStats>,
}

/// Seam the marketplace engine uses to report sales without depending on
/// the leaderboard internals.
#[async_trait]
pub trait RankingSink: Send + Sync {
    async fn record_event(&self, event: RankingEvent) -> Result<()>;
}

pub struct Leaderboard {
    path: PathBuf,
    players: RwLock<HashMap<String, PlayerStats>>,
    persist_gate: Mutex<()>,
}

impl Leaderboard {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            players: RwLock::new(HashMap::new()),
            persist_gate: Mutex::new(()),
        }
    }

    /// Restores persisted stats. A missing, unreadable, empty or malformed
    /// file means an empty leaderboard, never a startup failure.
    pub async fn load(&self) {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read leaderboard file, starting empty");
                return;
            }
        };
        if raw.iter().all(|b| b.is_ascii_whitespace()) {
            return;
        }

        let players = match serde_json::from_slice::<LeaderboardFile>(&raw) {
            Ok(file) => file.players,
            // Pre-versioning files were a bare stats array.
            Err(_) => match serde_json::from_slice::<Vec<PlayerStats>>(&raw) {
                Ok(players) => players,
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "malformed leaderboard file, starting empty");
                    return;
                }
            },
        };

        let mut map = self.players.write();
        for player in players {
            map.insert(player.address.to_lowercase(), player);
        }
        info!(players = map.len(), "restored leaderboard");
    }

    /// Applies one event to the player's stats and persists.
    pub async fn record(&self, event: RankingEvent) -> Result<PlayerStats> {
        let address = event.address.trim().to_lowercase();
        let updated = {
            let mut map = self.players.write();
            let stats = map
                .entry(address.clone())
                .or_insert_with(|| PlayerStats::new(address.clone()));
            stats.apply(&event);
            stats.clone()
        };

        self.persist().await?;
        Ok(updated)
    }

    /// Top players by draws, by score and by rarity points. `limit` is
    /// clamped to `1..=100`.
    pub fn summary(&self, limit: Option<usize>) -> RankingSummary {
        let capped = limit.unwrap_or(MAX_SUMMARY_LIMIT).clamp(1, MAX_SUMMARY_LIMIT);
        let players: Vec<PlayerStats> = self.players.read().values().cloned().collect();

        let ranked = |key: fn(&PlayerStats) -> u64,
                      entry: fn(&PlayerStats) -> RankingEntry|
         -> Vec<RankingEntry> {
            let mut sorted = players.clone();
            sorted.sort_by(|a, b| key(b).cmp(&key(a)).then_with(|| a.address.cmp(&b.address)));
            sorted.iter().take(capped).map(entry).collect()
        };

        RankingSummary {
            draws: ranked(
                |p| p.draws,
                |p| RankingEntry {
                    address: p.address.clone(),
                    value: p.draws,
                    meta: Some(format!("Score: {}", p.score)),
                },
            ),
            profits: ranked(
                |p| p.score,
                |p| RankingEntry {
                    address: p.address.clone(),
                    value: p.score,
                    meta: Some(format!("Owned: {}", p.owned)),
                },
            ),
            rarity: ranked(
                |p| p.rarity_points,
                |p| RankingEntry {
                    address: p.address.clone(),
                    value: p.rarity_points,
                    meta: Some(format!("Draws: {}, Fusions: {}", p.draws, p.fusions)),
                },
            ),
        }
    }

    /// Drops all stats and persists the empty board.
    pub async fn reset(&self) -> Result<()> {
        self.players.write().clear();
        self.persist().await
    }

    async fn persist(&self) -> Result<()> {
        let _gate = self.persist_gate.lock().await;
        let file = LeaderboardFile {
            version: STORE_VERSION,
            players: self.players.read().values().cloned().collect(),
        };
        let json = serde_json::to_vec_pretty(&file).context("serialize leaderboard")?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create {}", parent.display()))?;
        }
        // Write-then-rename so a crash mid-write can't truncate the file.
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json)
            .await
            .with_context(|| format!("write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("rename into {}", self.path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl RankingSink for Leaderboard {
    async fn record_event(&self, event: RankingEvent) -> Result<()> {
        self.record(event).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board() -> (Leaderboard, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (Leaderboard::new(dir.path().join("leaderboard.json")), dir)
    }

    #[tokio::test]
    async fn draw_adds_ownership_and_rarity() {
        let (board, _dir) = board();
        let stats = board
            .record(RankingEvent::new("0xA", RankingEventKind::Draw, 2))
            .await
            .unwrap();

        assert_eq!(stats.draws, 1);
        assert_eq!(stats.owned, 1);
        assert_eq!(stats.rarity_points, 9);
        // owned*10 + rarity*3 + draws*2 = 10 + 27 + 2
        assert_eq!(stats.score, 39);
    }

    #[tokio::test]
    async fn sale_decrements_and_never_goes_negative() {
        let (board, _dir) = board();
        let stats = board
            .record(RankingEvent::new("0xA", RankingEventKind::Sale, 3))
            .await
            .unwrap();

        // Nothing owned, nothing to subtract; score floors at zero.
        assert_eq!(stats.owned, 0);
        assert_eq!(stats.rarity_points, 0);
        assert_eq!(stats.sales, 1);
        assert_eq!(stats.score, 0);
    }

    #[tokio::test]
    async fn fusion_consumes_five_cards_for_one() {
        let (board, _dir) = board();
        for _ in 0..5 {
            board
                .record(RankingEvent::new("0xA", RankingEventKind::Draw, 0))
                .await
                .unwrap();
        }

        let stats = board
            .record(RankingEvent {
                address: "0xA".to_string(),
                kind: RankingEventKind::Fusion,
                rarity: Some(0),
                target_rarity: Some(1),
                success: Some(true),
            })
            .await
            .unwrap();

        assert_eq!(stats.owned, 1);
        assert_eq!(stats.fusions, 1);
        // Five commons (5 points) consumed, one rare (4 points) produced.
        assert_eq!(stats.rarity_points, 4);
    }

    #[tokio::test]
    async fn addresses_merge_case_insensitively() {
        let (board, _dir) = board();
        board
            .record(RankingEvent::new("0xAbC", RankingEventKind::Draw, 0))
            .await
            .unwrap();
        let stats = board
            .record(RankingEvent::new("0xABC", RankingEventKind::Draw, 0))
            .await
            .unwrap();

        assert_eq!(stats.address, "0xabc");
        assert_eq!(stats.draws, 2);
    }

    #[tokio::test]
    async fn summary_sorts_each_board_independently() {
        let (board, _dir) = board();
        // "0xA" draws a lot of commons, "0xB" buys one legendary.
        for _ in 0..3 {
            board
                .record(RankingEvent::new("0xA", RankingEventKind::Draw, 0))
                .await
                .unwrap();
        }
        board
            .record(RankingEvent::new("0xB", RankingEventKind::Purchase, 3))
            .await
            .unwrap();

        let summary = board.summary(None);
        assert_eq!(summary.draws[0].address, "0xa");
        assert_eq!(summary.draws[0].value, 3);
        // 0xB: owned*10 + rarity 16*3 + purchases*4 = 62 beats 0xA's
        // owned 3*10 + rarity 3*3 + draws 3*2 = 45.
        assert_eq!(summary.profits[0].address, "0xb");
        assert_eq!(summary.profits[0].value, 62);
        assert_eq!(summary.rarity[0].address, "0xb");
        assert_eq!(summary.rarity[0].value, 16);
    }

    #[tokio::test]
    async fn summary_limit_is_clamped() {
        let (board, _dir) = board();
        for i in 0..5 {
            board
                .record(RankingEvent::new(
                    &format!("0x{i}"),
                    RankingEventKind::Draw,
                    0,
                ))
                .await
                .unwrap();
        }

        assert_eq!(board.summary(Some(2)).draws.len(), 2);
        assert_eq!(board.summary(Some(0)).draws.len(), 1);
        assert_eq!(board.summary(Some(10_000)).draws.len(), 5);
    }

    #[tokio::test]
    async fn persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leaderboard.json");

        let board = Leaderboard::new(&path);
        board
            .record(RankingEvent::new("0xA", RankingEventKind::Draw, 1))
            .await
            .unwrap();

        let reloaded = Leaderboard::new(&path);
        reloaded.load().await;
        let summary = reloaded.summary(None);
        assert_eq!(summary.draws.len(), 1);
        assert_eq!(summary.draws[0].value, 1);
    }

    #[tokio::test]
    async fn loads_legacy_bare_array_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leaderboard.json");
        let legacy = serde_json::json!([{
            "address": "0xa",
            "draws": 2,
            "owned": 2,
            "sales": 0,
            "purchases": 0,
            "fusions": 0,
            "rarityPoints": 5,
            "score": 39,
            "updatedAt": "2025-01-01T00:00:00Z"
        }]);
        std::fs::write(&path, serde_json::to_vec(&legacy).unwrap()).unwrap();

        let board = Leaderboard::new(&path);
        board.load().await;
        assert_eq!(board.summary(None).draws[0].value, 2);
    }

    #[tokio::test]
    async fn malformed_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leaderboard.json");
        std::fs::write(&path, b"{not json").unwrap();

        let board = Leaderboard::new(&path);
        board.load().await;
        assert!(board.summary(None).draws.is_empty());
    }

    #[tokio::test]
    async fn unreadable_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        // Parent is a regular file, so the read fails with NotADirectory
        // rather than NotFound.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();

        let board = Leaderboard::new(blocker.join("leaderboard.json"));
        board.load().await;
        assert!(board.summary(None).draws.is_empty());
    }

    #[tokio::test]
    async fn reset_clears_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leaderboard.json");

        let board = Leaderboard::new(&path);
        board
            .record(RankingEvent::new("0xA", RankingEventKind::Draw, 0))
            .await
            .unwrap();
        board.reset().await.unwrap();

        let reloaded = Leaderboard::new(&path);
        reloaded.load().await;
        assert!(reloaded.summary(None).draws.is_empty());
    }

    #[test]
    fn ranking_event_wire_shape() {
        let event: RankingEvent = serde_json::from_str(
            r#"{"address":"0xA","type":"fusion","rarity":0,"targetRarity":1,"success":true}"#,
        )
        .unwrap();
        assert_eq!(event.kind, RankingEventKind::Fusion);
        assert_eq!(event.target_rarity, Some(1));

        let bad: Result<RankingEvent, _> =
            serde_json::from_str(r#"{"address":"0xA","type":"steal"}"#);
        assert!(bad.is_err());
    }
}
