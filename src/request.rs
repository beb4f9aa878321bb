//! Outbound stream commands
//!
//! Every command is serialized as one JSON object per line. Empty filter
//! fields are omitted rather than sent as nulls.

use serde::Serialize;

/// Market subscription filter
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketFilter {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub market_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bsp_market: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub betting_types: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub event_type_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub event_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_in_play_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub market_types: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub venues: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub country_codes: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub race_types: Vec<String>,
}

/// Market data filter: which ladders/fields the server should send.
///
/// Fields: `EX_BEST_OFFERS_DISP`, `EX_BEST_OFFERS`, `EX_ALL_OFFERS`,
/// `EX_TRADED`, `EX_TRADED_VOL`, `EX_LTP`, `EX_MARKET_DEF`, `SP_TRADED`,
/// `SP_PROJECTED`. Ladder levels range 1..=10.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketDataFilter {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ladder_levels: Option<u32>,
}

/// Order subscription filter
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_overall_position: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub customer_strategy_refs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition_matched_by_strategy_ref: Option<bool>,
}

/// Options shared by all subscription commands
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscriptionOptions {
    /// Resume tokens retained from a previous subscription
    pub initial_clk: Option<String>,
    pub clk: Option<String>,
    pub conflate_ms: Option<u64>,
    pub heartbeat_ms: Option<u64>,
    pub segmentation_enabled: bool,
}

impl SubscriptionOptions {
    /// Options resuming from previously seen tokens
    pub fn resume(initial_clk: Option<String>, clk: Option<String>) -> Self {
        Self {
            initial_clk,
            clk,
            segmentation_enabled: true,
            ..Self::default()
        }
    }
}

/// Client to server command
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum RequestMessage {
    Authentication {
        id: u32,
        #[serde(rename = "appKey")]
        app_key: String,
        session: String,
    },
    Heartbeat {
        id: u32,
    },
    #[serde(rename_all = "camelCase")]
    MarketSubscription {
        id: u32,
        market_filter: MarketFilter,
        market_data_filter: MarketDataFilter,
        #[serde(skip_serializing_if = "Option::is_none")]
        initial_clk: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        clk: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        conflate_ms: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        heartbeat_ms: Option<u64>,
        segmentation_enabled: bool,
    },
    #[serde(rename_all = "camelCase")]
    OrderSubscription {
        id: u32,
        order_filter: OrderFilter,
        #[serde(skip_serializing_if = "Option::is_none")]
        initial_clk: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        clk: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        conflate_ms: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        heartbeat_ms: Option<u64>,
        segmentation_enabled: bool,
    },
    RaceSubscription {
        id: u32,
    },
}

impl RequestMessage {
    pub fn market_subscription(
        id: u32,
        market_filter: MarketFilter,
        market_data_filter: MarketDataFilter,
        options: SubscriptionOptions,
    ) -> Self {
        RequestMessage::MarketSubscription {
            id,
            market_filter,
            market_data_filter,
            initial_clk: options.initial_clk,
            clk: options.clk,
            conflate_ms: options.conflate_ms,
            heartbeat_ms: options.heartbeat_ms,
            segmentation_enabled: options.segmentation_enabled,
        }
    }

    pub fn order_subscription(id: u32, order_filter: OrderFilter, options: SubscriptionOptions) -> Self {
        RequestMessage::OrderSubscription {
            id,
            order_filter,
            initial_clk: options.initial_clk,
            clk: options.clk,
            conflate_ms: options.conflate_ms,
            heartbeat_ms: options.heartbeat_ms,
            segmentation_enabled: options.segmentation_enabled,
        }
    }

    /// Request id used to correlate the server's status response
    pub fn id(&self) -> u32 {
        match self {
            RequestMessage::Authentication { id, .. }
            | RequestMessage::Heartbeat { id }
            | RequestMessage::MarketSubscription { id, .. }
            | RequestMessage::OrderSubscription { id, .. }
            | RequestMessage::RaceSubscription { id } => *id,
        }
    }

    /// Serialize to a single CRLF-terminated frame
    pub fn to_frame(&self) -> serde_json::Result<Vec<u8>> {
        let mut frame = serde_json::to_vec(self)?;
        frame.extend_from_slice(b"\r\n");
        Ok(frame)
    }
}
