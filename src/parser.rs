//! Parser module for inbound stream frames
//!
//! Every frame is a JSON object tagged by `op`. Change messages carry a list
//! of per-entity deltas where absent fields mean "unchanged", so every
//! delta field is optional.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, StreamError};

/// One ladder row as sent on the wire: `[price, size]` or `[level, price, size]`
pub type LadderRow = Vec<Decimal>;

/// Inbound frame, tagged by `op`
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum ParsedMessage {
    Connection(ConnectionMessage),
    Status(StatusMessage),
    Mcm(ChangeMessage<MarketChange>),
    Ocm(ChangeMessage<OrderMarketChange>),
    Rcm(ChangeMessage<RaceChange>),
}

impl ParsedMessage {
    /// Parse a raw frame; unknown operations are rejected
    pub fn parse(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| StreamError::Listener(format!("{}: {}", e, truncate(raw, 200))))
    }

    /// Request id the frame refers to, if any
    pub fn id(&self) -> Option<u32> {
        match self {
            ParsedMessage::Connection(msg) => msg.id,
            ParsedMessage::Status(msg) => msg.id,
            ParsedMessage::Mcm(msg) => msg.id,
            ParsedMessage::Ocm(msg) => msg.id,
            ParsedMessage::Rcm(msg) => msg.id,
        }
    }
}

fn truncate(raw: &str, max: usize) -> &str {
    match raw.char_indices().nth(max) {
        Some((idx, _)) => &raw[..idx],
        None => raw,
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionMessage {
    pub id: Option<u32>,
    pub connection_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    Success,
    Failure,
}

/// Server-reported failure reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NoAppKey,
    InvalidAppKey,
    NoSession,
    InvalidSessionInformation,
    NotAuthorized,
    InvalidInput,
    InvalidClock,
    UnexpectedError,
    Timeout,
    SubscriptionLimitExceeded,
    InvalidRequest,
    ConnectionFailed,
    MaxConnectionLimitExceeded,
    TooManyRequests,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusMessage {
    pub id: Option<u32>,
    pub status_code: Option<StatusCode>,
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
    pub connection_id: Option<String>,
    pub connections_available: Option<i64>,
    #[serde(default)]
    pub connection_closed: bool,
}

impl StatusMessage {
    pub fn is_failure(&self) -> bool {
        self.status_code == Some(StatusCode::Failure)
    }
}

/// Change message kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    SubImage,
    ResubDelta,
    Heartbeat,
    #[default]
    Update,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SegmentType {
    SegStart,
    Seg,
    SegEnd,
}

/// Market, order or race change message
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeMessage<T> {
    pub id: Option<u32>,
    #[serde(default)]
    pub ct: ChangeType,
    /// Publish time, epoch millis
    #[serde(default)]
    pub pt: u64,
    pub clk: Option<String>,
    pub initial_clk: Option<String>,
    /// Degraded-service marker (e.g. 503); updates resume once healthy
    pub status: Option<u16>,
    pub segment_type: Option<SegmentType>,
    pub con: Option<bool>,
    pub conflate_ms: Option<u64>,
    pub heartbeat_ms: Option<u64>,
    #[serde(alias = "mc", alias = "oc", alias = "rc")]
    pub changes: Option<Vec<T>>,
}

// ---------------------------------------------------------------------------
// Market changes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketChange {
    pub id: String,
    #[serde(default)]
    pub img: bool,
    pub market_definition: Option<MarketDefinition>,
    pub tv: Option<Decimal>,
    pub rc: Option<Vec<RunnerChange>>,
    pub con: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketStatus {
    Inactive,
    Open,
    Suspended,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunnerStatus {
    Active,
    Winner,
    Loser,
    Placed,
    RemovedVacant,
    Removed,
    Hidden,
}

/// Semi-static market description, replaced wholesale when resent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketDefinition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<MarketStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bet_delay: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complete: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runners_voidable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bsp_reconciled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cross_matching: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_play: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number_of_winners: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number_of_active_runners: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_ladder_definition: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_line_definition: Option<Value>,
    #[serde(default)]
    pub runners: Vec<RunnerDefinition>,
    /// Fields passed through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerDefinition {
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hc: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RunnerStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_priority: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adjustment_factor: Option<Decimal>,
    #[serde(
        default,
        deserialize_with = "deserialize_optional_float",
        skip_serializing_if = "Option::is_none"
    )]
    pub bsp: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removal_date: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Per-runner delta; every field optional
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunnerChange {
    pub id: u64,
    pub hc: Option<Decimal>,
    pub ltp: Option<Decimal>,
    pub tv: Option<Decimal>,
    /// Traded volume `[price, size]`
    pub trd: Option<Vec<LadderRow>>,
    /// Full depth `[price, size]`
    pub atb: Option<Vec<LadderRow>>,
    pub atl: Option<Vec<LadderRow>>,
    /// Best-N depth `[level, price, size]`
    pub batb: Option<Vec<LadderRow>>,
    pub batl: Option<Vec<LadderRow>>,
    /// Virtual/display depth `[level, price, size]`
    pub bdatb: Option<Vec<LadderRow>>,
    pub bdatl: Option<Vec<LadderRow>>,
    /// Starting-price back/lay `[price, size]`
    pub spb: Option<Vec<LadderRow>>,
    pub spl: Option<Vec<LadderRow>>,
    #[serde(default, deserialize_with = "deserialize_optional_float")]
    pub spn: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_optional_float")]
    pub spf: Option<f64>,
}

// ---------------------------------------------------------------------------
// Order changes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderMarketChange {
    pub id: String,
    #[serde(default)]
    pub full_image: bool,
    pub closed: Option<bool>,
    pub acc_id: Option<u64>,
    pub orc: Option<Vec<OrderRunnerChange>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRunnerChange {
    pub id: u64,
    pub hc: Option<Decimal>,
    #[serde(default)]
    pub full_image: bool,
    /// Matched lays/backs `[price, size]`
    pub ml: Option<Vec<LadderRow>>,
    pub mb: Option<Vec<LadderRow>>,
    pub uo: Option<Vec<OrderChange>>,
    /// Strategy matches, passed through
    pub smc: Option<Value>,
}

/// Canonical mapping between wire abbreviations and full names for order
/// enumerations: deserialized from the abbreviation, serialized as the name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    #[serde(rename(deserialize = "B", serialize = "BACK"))]
    Back,
    #[serde(rename(deserialize = "L", serialize = "LAY"))]
    Lay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    #[serde(rename(deserialize = "E", serialize = "EXECUTABLE"))]
    Executable,
    #[serde(rename(deserialize = "EC", serialize = "EXECUTION_COMPLETE"))]
    ExecutionComplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PersistenceType {
    #[serde(rename(deserialize = "L", serialize = "LAPSE"))]
    Lapse,
    #[serde(rename(deserialize = "P", serialize = "PERSIST"))]
    Persist,
    #[serde(rename(deserialize = "MOC", serialize = "MARKET_ON_CLOSE"))]
    MarketOnClose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    #[serde(rename(deserialize = "L", serialize = "LIMIT"))]
    Limit,
    #[serde(rename(deserialize = "LOC", serialize = "LIMIT_ON_CLOSE"))]
    LimitOnClose,
    #[serde(rename(deserialize = "MOC", serialize = "MARKET_ON_CLOSE"))]
    MarketOnClose,
}

/// Full record of one own order; the wire never sends partial orders
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OrderChange {
    /// Bet id
    pub id: String,
    pub p: Decimal,
    pub s: Decimal,
    pub bsp: Option<Decimal>,
    pub side: OrderSide,
    pub status: OrderStatus,
    pub pt: Option<PersistenceType>,
    pub ot: OrderType,
    /// Placed/matched/lapsed/cancelled dates, epoch millis
    pub pd: i64,
    pub md: Option<i64>,
    pub ld: Option<i64>,
    pub cd: Option<i64>,
    pub avp: Option<Decimal>,
    #[serde(default)]
    pub sm: Decimal,
    #[serde(default)]
    pub sr: Decimal,
    #[serde(default)]
    pub sl: Decimal,
    #[serde(default)]
    pub sc: Decimal,
    #[serde(default)]
    pub sv: Decimal,
    pub rac: Option<String>,
    pub rc: Option<String>,
    pub rfo: Option<String>,
    pub rfs: Option<String>,
    pub lsrc: Option<String>,
}

// ---------------------------------------------------------------------------
// Race changes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RaceChange {
    /// Market id
    pub mid: String,
    /// Race id
    pub id: Option<String>,
    pub rpc: Option<RaceProgress>,
    pub rrc: Option<Vec<RaceRunnerChange>>,
}

/// Race progress payload, kept in its wire shape
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RaceProgress {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ft: Option<i64>,
    /// Gate name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub g: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub st: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rt: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prg: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ord: Option<Vec<u64>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Race runner payload, replaced whole on every change
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RaceRunnerChange {
    /// Selection id
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ft: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub long: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prg: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sfq: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Floats that may arrive as numbers or as "NaN"/"Infinity" strings
fn deserialize_optional_float<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(f64),
        Text(String),
    }

    match Option::<NumberOrString>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumberOrString::Number(n)) => Ok(Some(n)),
        Some(NumberOrString::Text(s)) => s.parse::<f64>().map(Some).map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_connection() {
        let raw = r#"{"op":"connection","connectionId":"002-051134157842-432409"}"#;
        match ParsedMessage::parse(raw).unwrap() {
            ParsedMessage::Connection(msg) => {
                assert_eq!(msg.connection_id.as_deref(), Some("002-051134157842-432409"));
            }
            other => panic!("Expected Connection, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_status_failure() {
        let raw = r#"{"op":"status","id":2,"statusCode":"FAILURE","errorCode":"INVALID_APP_KEY",
                      "errorMessage":"AppKey is not valid","connectionClosed":true,
                      "connectionId":"005-015616813698-533678"}"#;
        match ParsedMessage::parse(raw).unwrap() {
            ParsedMessage::Status(status) => {
                assert!(status.is_failure());
                assert!(status.connection_closed);
                assert_eq!(status.error_code, Some(ErrorCode::InvalidAppKey));
                assert_eq!(status.id, Some(2));
            }
            other => panic!("Expected Status, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_market_change() {
        let raw = r#"{
            "op": "mcm", "id": 2, "ct": "SUB_IMAGE", "pt": 1471370159007,
            "clk": "AAAAAAAA", "initialClk": "G1T1cq",
            "mc": [{
                "id": "1.102151404", "img": true, "tv": 12.5,
                "marketDefinition": {"status": "OPEN", "inPlay": false, "betDelay": 0,
                                     "runners": [{"id": 10, "status": "ACTIVE", "sortPriority": 1}],
                                     "venue": "Ascot"},
                "rc": [{"id": 10, "ltp": 1.02, "atb": [[1.01, 200]], "batb": [[0, 1.01, 200]], "spn": "NaN"}]
            }]
        }"#;

        let msg = match ParsedMessage::parse(raw).unwrap() {
            ParsedMessage::Mcm(msg) => msg,
            other => panic!("Expected Mcm, got {:?}", other),
        };
        assert_eq!(msg.ct, ChangeType::SubImage);
        assert_eq!(msg.initial_clk.as_deref(), Some("G1T1cq"));

        let changes = msg.changes.unwrap();
        let market = &changes[0];
        assert!(market.img);
        assert_eq!(market.tv, Some(dec!(12.5)));

        let definition = market.market_definition.as_ref().unwrap();
        assert_eq!(definition.status, Some(MarketStatus::Open));
        assert_eq!(definition.runners[0].status, Some(RunnerStatus::Active));
        assert_eq!(definition.extra.get("venue"), Some(&Value::from("Ascot")));

        let runner = &market.rc.as_ref().unwrap()[0];
        assert_eq!(runner.ltp, Some(dec!(1.02)));
        assert_eq!(runner.atb.as_ref().unwrap()[0], vec![dec!(1.01), dec!(200)]);
        assert!(runner.spn.unwrap().is_nan());
    }

    #[test]
    fn test_change_type_defaults_to_update() {
        let raw = r#"{"op":"ocm","id":3,"pt":1,"oc":[{"id":"1.1","orc":[]}]}"#;
        match ParsedMessage::parse(raw).unwrap() {
            ParsedMessage::Ocm(msg) => {
                assert_eq!(msg.ct, ChangeType::Update);
                assert_eq!(msg.changes.unwrap().len(), 1);
            }
            other => panic!("Expected Ocm, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_order_abbreviations() {
        let raw = r#"{"id":"228302937743","p":1.04,"s":2,"side":"L","status":"E","pt":"L",
                      "ot":"L","pd":1502290493000,"sm":0,"sr":2,"sl":0,"sc":0,"sv":0,
                      "rfo":"","rfs":"strategy"}"#;
        let order: OrderChange = serde_json::from_str(raw).unwrap();
        assert_eq!(order.side, OrderSide::Lay);
        assert_eq!(order.status, OrderStatus::Executable);
        assert_eq!(order.pt, Some(PersistenceType::Lapse));
        assert_eq!(order.ot, OrderType::Limit);
        assert_eq!(serde_json::to_value(order.side).unwrap(), Value::from("LAY"));
    }

    #[test]
    fn test_unknown_op_is_rejected() {
        let err = ParsedMessage::parse(r#"{"op":"xyz","id":1}"#).unwrap_err();
        assert!(matches!(err, StreamError::Listener(_)));
    }

    #[test]
    fn test_invalid_json_is_rejected() {
        assert!(ParsedMessage::parse("some content").is_err());
    }

    #[test]
    fn test_parse_race_change() {
        let raw = r#"{"op":"rcm","id":4,"pt":1518626764,"clk":"AAA",
                      "rc":[{"mid":"1.1","id":"28587288.1650",
                             "rpc":{"ft":1518626674,"g":"1f","st":10.43,"ord":[7390417,5600338]},
                             "rrc":[{"ft":1518626674,"id":7390417,"lat":51.4,"long":-0.4,"spd":17.8}]}]}"#;
        match ParsedMessage::parse(raw).unwrap() {
            ParsedMessage::Rcm(msg) => {
                let race = &msg.changes.unwrap()[0];
                assert_eq!(race.mid, "1.1");
                assert_eq!(race.rpc.as_ref().unwrap().g.as_deref(), Some("1f"));
                assert_eq!(race.rrc.as_ref().unwrap()[0].id, 7390417);
            }
            other => panic!("Expected Rcm, got {:?}", other),
        }
    }
}
