use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use ts_rs::TS;

/// Tables exposed by the hosted store
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    TS,
    EnumString,
    Display,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Collection {
    AppUsers,
    Teams,
    Players,
    Positions,
    Games,
    GameRosterSlots,
    Substitutions,
}
