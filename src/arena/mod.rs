// =============================================================================
// Arena event stream — minimal Socket.IO-shaped channel
// =============================================================================

pub mod events;
pub mod stream;

pub use events::{
    parse_leaderboard, parse_trade, EvolutionUpdate, LeaderboardEntry, RawTrade,
    TournamentUpdate, EVT_ARENA_TRADE, EVT_CONTINUOUS_TRADE, EVT_EVOLUTION, EVT_LEADERBOARD,
    EVT_TOURNAMENT,
};
pub use stream::ArenaStream;
