//! Well-known exchanges, routing keys and event payloads shared by game clients.
//!
//! Routing keys are dot-delimited, `<prefix>.<username>`. Subscribers on the
//! topic exchange use [`wildcard`] to receive a prefix for every username.

use serde::{Deserialize, Serialize};

use crate::broker::ExchangeSpec;

pub const EXCHANGE_PERIL_DIRECT: &str = "peril_direct";
pub const EXCHANGE_PERIL_TOPIC: &str = "peril_topic";
/// Shared dead-letter fanout exchange every queue points at.
pub const EXCHANGE_PERIL_DLX: &str = "peril_dlx";

pub const PAUSE_KEY: &str = "pause";
pub const ARMY_MOVES_PREFIX: &str = "army_moves";
pub const WAR_RECOGNITIONS_PREFIX: &str = "war";
pub const GAME_LOG_SLUG: &str = "game_logs";

/// The direct exchange used for pause/resume broadcasts.
pub fn direct_exchange() -> ExchangeSpec {
    ExchangeSpec::direct(EXCHANGE_PERIL_DIRECT)
}

/// The topic exchange used for moves, wars and logs.
pub fn topic_exchange() -> ExchangeSpec {
    ExchangeSpec::topic(EXCHANGE_PERIL_TOPIC)
}

/// `<prefix>.<username>`
pub fn key(prefix: &str, username: &str) -> String {
    format!("{}.{}", prefix, username)
}

/// `<prefix>.*`, matching the prefix for every username.
pub fn wildcard(prefix: &str) -> String {
    format!("{}.*", prefix)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayingState {
    pub is_paused: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitRank {
    Infantry,
    Cavalry,
    Artillery,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Unit {
    pub id: u32,
    pub rank: UnitRank,
    pub location: String,
}

/// A player moving some of their units to a new location.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArmyMove {
    pub player: String,
    pub units: Vec<Unit>,
    pub to_location: String,
}

/// Two players' armies met; war is declared.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionOfWar {
    pub attacker: String,
    pub defender: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameLog {
    /// Milliseconds since the Unix epoch.
    pub current_time: i64,
    pub message: String,
    pub username: String,
}
