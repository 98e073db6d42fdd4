// =============================================================================
// Session Clock — market-hours predicate per asset class
// =============================================================================
//
// Pure functions over wall-clock UTC; no state. Two consumers:
//
//   - The simulators scale their volatility by the session multiplier.
//   - The WebSocket session gate closes streaming sockets while the
//     endpoint's market is closed (a closed-market socket contributes
//     nothing and costs a reconnection storm on mass wake-up).
//
// Session table (EST = UTC-5; DST is deliberately ignored, the one-hour
// drift twice a year is acceptable for gating purposes):
//
//   FX          Sun 17:00 EST -> Fri 17:00 EST, continuous
//   US equities Mon-Fri, pre 04:00-09:30, regular 09:30-16:00,
//               post 16:00-20:00 EST
//   Commodity   Globex-style: same weekly envelope as FX
//   Crypto      always open
//
// Volatility multipliers reflect historical session character: the
// London-NY overlap (12:00-16:00 UTC) runs hot at 1.5, the Asian session
// cold at 0.8, US pre/post at 0.9.
// =============================================================================

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use serde::Serialize;

use crate::types::AssetType;

/// Coarse session phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Open,
    Closed,
    Pre,
    Post,
}

/// Everything a caller needs to know about the current session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub state: SessionState,
    pub can_trade: bool,
    pub session_name: &'static str,
    pub volatility_multiplier: f64,
}

/// Fixed EST offset in hours. See the header note on DST.
const EST_OFFSET_HOURS: i64 = -5;

/// Evaluate the session for `asset` at instant `now`.
pub fn session_for(asset: AssetType, now: DateTime<Utc>) -> SessionInfo {
    match asset {
        AssetType::Crypto => crypto_session(now),
        AssetType::Forex => fx_session(now),
        AssetType::Commodity => commodity_session(now),
        AssetType::Stock => equity_session(now),
    }
}

/// Convenience: whether a streaming connection for `asset` should exist at
/// `now`. Pre/post count as streamable for equities.
pub fn streaming_allowed(asset: AssetType, now: DateTime<Utc>) -> bool {
    session_for(asset, now).state != SessionState::Closed
}

// -----------------------------------------------------------------------------
// Per-asset rules
// -----------------------------------------------------------------------------

fn crypto_session(now: DateTime<Utc>) -> SessionInfo {
    let (name, mult) = utc_session_character(now);
    SessionInfo {
        state: SessionState::Open,
        can_trade: true,
        session_name: name,
        volatility_multiplier: mult,
    }
}

fn fx_session(now: DateTime<Utc>) -> SessionInfo {
    if fx_week_open(now) {
        let (name, mult) = utc_session_character(now);
        SessionInfo {
            state: SessionState::Open,
            can_trade: true,
            session_name: name,
            volatility_multiplier: mult,
        }
    } else {
        SessionInfo {
            state: SessionState::Closed,
            can_trade: false,
            session_name: "Weekend",
            volatility_multiplier: 0.0,
        }
    }
}

fn commodity_session(now: DateTime<Utc>) -> SessionInfo {
    // Globex futures follow the same weekly envelope as FX closely enough
    // for gating and simulator purposes.
    let mut info = fx_session(now);
    if info.state == SessionState::Open {
        info.session_name = "Globex";
    }
    info
}

fn equity_session(now: DateTime<Utc>) -> SessionInfo {
    let est = now + chrono::Duration::hours(EST_OFFSET_HOURS);
    let weekday = est.weekday();

    if matches!(weekday, Weekday::Sat | Weekday::Sun) {
        return SessionInfo {
            state: SessionState::Closed,
            can_trade: false,
            session_name: "Weekend",
            volatility_multiplier: 0.0,
        };
    }

    let minutes = (est.hour() * 60 + est.minute()) as i64;
    // 04:00, 09:30, 16:00, 20:00 EST as minutes past midnight.
    let (state, name, mult) = match minutes {
        m if (240..570).contains(&m) => (SessionState::Pre, "US Pre-Market", 0.9),
        m if (570..960).contains(&m) => (SessionState::Open, "US Regular", 1.2),
        m if (960..1200).contains(&m) => (SessionState::Post, "US After-Hours", 0.9),
        _ => (SessionState::Closed, "US Closed", 0.0),
    };

    SessionInfo {
        state,
        can_trade: state != SessionState::Closed,
        session_name: name,
        volatility_multiplier: mult,
    }
}

// -----------------------------------------------------------------------------
// Shared helpers
// -----------------------------------------------------------------------------

/// The continuous FX week: Sun 17:00 EST through Fri 17:00 EST.
fn fx_week_open(now: DateTime<Utc>) -> bool {
    let est = now + chrono::Duration::hours(EST_OFFSET_HOURS);
    match est.weekday() {
        Weekday::Sat => false,
        Weekday::Sun => est.hour() >= 17,
        Weekday::Fri => est.hour() < 17,
        _ => true,
    }
}

/// Name and volatility multiplier of the 24h session band containing `now`.
///
/// UTC bands: Asian 00-07, London 07-12, London-NY overlap 12-16 (the kill
/// zone), New York 16-21, Sydney 21-24.
fn utc_session_character(now: DateTime<Utc>) -> (&'static str, f64) {
    match now.hour() {
        0..=6 => ("Asian", 0.8),
        7..=11 => ("London", 1.2),
        12..=15 => ("London-NY Overlap", 1.5),
        16..=20 => ("New York", 1.1),
        _ => ("Sydney", 0.9),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    // 2026-07-20 is a Monday.

    #[test]
    fn crypto_always_open() {
        // Saturday 03:00 UTC.
        let info = session_for(AssetType::Crypto, at(2026, 7, 18, 3, 0));
        assert_eq!(info.state, SessionState::Open);
        assert!(info.can_trade);
    }

    #[test]
    fn fx_closed_on_saturday() {
        let info = session_for(AssetType::Forex, at(2026, 7, 18, 12, 0));
        assert_eq!(info.state, SessionState::Closed);
        assert!(!info.can_trade);
        assert_eq!(info.volatility_multiplier, 0.0);
    }

    #[test]
    fn fx_reopens_sunday_1700_est() {
        // Sunday 21:59 UTC = 16:59 EST — still closed.
        let before = session_for(AssetType::Forex, at(2026, 7, 19, 21, 59));
        assert_eq!(before.state, SessionState::Closed);
        // Sunday 22:00 UTC = 17:00 EST — open.
        let after = session_for(AssetType::Forex, at(2026, 7, 19, 22, 0));
        assert_eq!(after.state, SessionState::Open);
    }

    #[test]
    fn fx_closes_friday_1700_est() {
        // Friday 21:59 UTC = 16:59 EST — open.
        let before = session_for(AssetType::Forex, at(2026, 7, 24, 21, 59));
        assert_eq!(before.state, SessionState::Open);
        // Friday 22:00 UTC = 17:00 EST — closed.
        let after = session_for(AssetType::Forex, at(2026, 7, 24, 22, 0));
        assert_eq!(after.state, SessionState::Closed);
    }

    #[test]
    fn overlap_kill_zone_multiplier() {
        // Monday 13:00 UTC sits in the London-NY overlap.
        let info = session_for(AssetType::Forex, at(2026, 7, 20, 13, 0));
        assert_eq!(info.session_name, "London-NY Overlap");
        assert!((info.volatility_multiplier - 1.5).abs() < 1e-12);
    }

    #[test]
    fn asian_session_multiplier() {
        // Tuesday 03:00 UTC.
        let info = session_for(AssetType::Forex, at(2026, 7, 21, 3, 0));
        assert_eq!(info.session_name, "Asian");
        assert!((info.volatility_multiplier - 0.8).abs() < 1e-12);
    }

    #[test]
    fn equity_phases_over_a_weekday() {
        // 08:00 EST = 13:00 UTC -> pre-market.
        let pre = session_for(AssetType::Stock, at(2026, 7, 20, 13, 0));
        assert_eq!(pre.state, SessionState::Pre);
        assert!(pre.can_trade);

        // 10:00 EST = 15:00 UTC -> regular.
        let open = session_for(AssetType::Stock, at(2026, 7, 20, 15, 0));
        assert_eq!(open.state, SessionState::Open);

        // 17:00 EST = 22:00 UTC -> after-hours.
        let post = session_for(AssetType::Stock, at(2026, 7, 20, 22, 0));
        assert_eq!(post.state, SessionState::Post);
        assert!((post.volatility_multiplier - 0.9).abs() < 1e-12);

        // 02:00 EST = 07:00 UTC -> closed.
        let closed = session_for(AssetType::Stock, at(2026, 7, 20, 7, 0));
        assert_eq!(closed.state, SessionState::Closed);
        assert!(!closed.can_trade);
    }

    #[test]
    fn equity_closed_on_weekend() {
        let info = session_for(AssetType::Stock, at(2026, 7, 18, 15, 0));
        assert_eq!(info.state, SessionState::Closed);
    }

    #[test]
    fn streaming_gate_tracks_session() {
        // Equities stream through pre/post but not overnight.
        assert!(streaming_allowed(AssetType::Stock, at(2026, 7, 20, 13, 0)));
        assert!(!streaming_allowed(AssetType::Stock, at(2026, 7, 20, 7, 0)));
        // Crypto always streams.
        assert!(streaming_allowed(AssetType::Crypto, at(2026, 7, 18, 3, 0)));
        // FX streams midweek, not on Saturday.
        assert!(!streaming_allowed(AssetType::Forex, at(2026, 7, 18, 12, 0)));
    }

    #[test]
    fn commodity_follows_weekly_envelope() {
        let open = session_for(AssetType::Commodity, at(2026, 7, 21, 14, 0));
        assert_eq!(open.state, SessionState::Open);
        assert_eq!(open.session_name, "Globex");

        let closed = session_for(AssetType::Commodity, at(2026, 7, 18, 14, 0));
        assert_eq!(closed.state, SessionState::Closed);
    }
}
