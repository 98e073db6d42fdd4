// =============================================================================
// Arena event payloads
// =============================================================================
//
// The arena emits trades on two channels (`arena:bot:trade` and
// `continuous:trade` — frequently both for the same fill, which is why the
// orchestrator dedups), plus leaderboard, tournament and evolution events.
// Parsers here are tolerant: a malformed document yields `None`, never a
// failure of the stream loop.
// =============================================================================

use serde_json::Value;
use tracing::warn;

use crate::types::{BotGroup, TradeSide};

pub const EVT_ARENA_TRADE: &str = "arena:bot:trade";
pub const EVT_CONTINUOUS_TRADE: &str = "continuous:trade";
pub const EVT_LEADERBOARD: &str = "arena:leaderboard";
pub const EVT_TOURNAMENT: &str = "arena:tournament";
pub const EVT_EVOLUTION: &str = "arena:evolution";

/// A trade as the arena reports it, before dedup and sequencing.
#[derive(Debug, Clone)]
pub struct RawTrade {
    pub bot_id: String,
    pub bot_name: String,
    pub group: BotGroup,
    pub symbol: String,
    pub side: TradeSide,
    pub quantity: f64,
    pub price: f64,
    pub pnl: f64,
    pub reason: String,
    /// Unix milliseconds, arena clock.
    pub timestamp: i64,
}

pub fn parse_trade(v: &Value) -> Option<RawTrade> {
    let side = match v["side"].as_str()? {
        "buy" | "BUY" => TradeSide::Buy,
        "sell" | "SELL" => TradeSide::Sell,
        other => {
            warn!(side = other, "unknown trade side");
            return None;
        }
    };

    let group = match v["groupName"].as_str().unwrap_or("") {
        "Alpha" => BotGroup::Alpha,
        "Gamma" => BotGroup::Gamma,
        // The equity group is the default home for unknowns.
        _ => BotGroup::Beta,
    };

    Some(RawTrade {
        bot_id: v["botId"].as_str()?.to_string(),
        bot_name: v["botName"].as_str().unwrap_or("").to_string(),
        group,
        symbol: v["symbol"].as_str()?.to_string(),
        side,
        quantity: v["quantity"].as_f64()?,
        price: v["price"].as_f64()?,
        pnl: v["pnl"].as_f64().unwrap_or(0.0),
        reason: v["reason"].as_str().unwrap_or("unknown").to_string(),
        timestamp: v["timestamp"].as_i64()?,
    })
}

#[derive(Debug, Clone)]
pub struct LeaderboardEntry {
    pub bot_id: String,
    pub bot_name: String,
    pub pnl: f64,
    pub rank: usize,
}

pub fn parse_leaderboard(v: &Value) -> Vec<LeaderboardEntry> {
    let rows = match v.as_array() {
        Some(rows) => rows,
        None => return Vec::new(),
    };

    rows.iter()
        .enumerate()
        .filter_map(|(i, row)| {
            Some(LeaderboardEntry {
                bot_id: row["botId"].as_str()?.to_string(),
                bot_name: row["botName"].as_str().unwrap_or("").to_string(),
                pnl: row["pnl"].as_f64().unwrap_or(0.0),
                rank: row["rank"].as_u64().map(|r| r as usize).unwrap_or(i + 1),
            })
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct TournamentUpdate {
    pub kind: String,
    pub round: u32,
    pub total_rounds: u32,
}

impl TournamentUpdate {
    pub fn parse(v: &Value) -> Option<Self> {
        Some(Self {
            kind: v["type"].as_str()?.to_string(),
            round: v["round"].as_u64().unwrap_or(0) as u32,
            total_rounds: v["totalRounds"].as_u64().unwrap_or(0) as u32,
        })
    }
}

#[derive(Debug, Clone)]
pub struct EvolutionUpdate {
    pub kind: String,
    pub generation: u64,
    pub results: Value,
}

impl EvolutionUpdate {
    pub fn parse(v: &Value) -> Option<Self> {
        Some(Self {
            kind: v["type"].as_str()?.to_string(),
            generation: v["generation"].as_u64().unwrap_or(0),
            results: v["results"].clone(),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
