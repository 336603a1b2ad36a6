use chrono::{TimeZone, Utc};
use hermes_core::{
    AckOutcome, AssetType, BookDelta, BookSide, BookKey, Channel, ExchangeId, Frame, Pair, Price, PriceLevel,
    Quantity, Side, SubscriptionSpec, Ticker, Timestamp, Trade,
};
use hermes_ports::{CodecError, FrameCodec};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Reference JSON-RPC codec in Binance's envelope shape
///
/// Each depth diff is sequenced by its `u` field alone and must advance the
/// book by exactly one, which fits feeds that number every message (and the
/// in-memory test exchange). Real Binance depth streams cover the range
/// `U..=u` per diff and need a venue codec of their own; `U` is ignored here.
///
/// Requests are `{"method":"SUBSCRIBE","params":["btcusdt@depth"],"id":1}`.
/// Inbound messages are either acks (`{"result":null,"id":1}` or
/// `{"error":{...},"id":1}`) or combined-stream envelopes
/// `{"stream":"btcusdt@depth","data":{...}}`. Symbols are resolved back to
/// pairs through the specs this codec has encoded, so a stream nobody
/// subscribed to decodes as [`Frame::Unrecognized`].
pub struct JsonRpcCodec {
    exchange: ExchangeId,
    symbols: RwLock<HashMap<String, (Pair, AssetType)>>,
}

#[derive(Serialize)]
struct Request<'a> {
    method: &'a str,
    params: Vec<String>,
    id: u64,
}

#[derive(Deserialize)]
struct RpcError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
}

#[derive(Deserialize)]
struct DepthUpdate {
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "u")]
    final_update_id: u64,
    #[serde(rename = "b", default)]
    bids: Vec<RawLevel>,
    #[serde(rename = "a", default)]
    asks: Vec<RawLevel>,
}

/// `[price, amount]` or `[price, amount, orders]`
#[derive(Deserialize)]
#[serde(untagged)]
enum RawLevel {
    Counted(Price, Quantity, u32),
    Plain(Price, Quantity),
}

impl RawLevel {
    fn into_level(self) -> PriceLevel {
        match self {
            RawLevel::Counted(price, amount, orders) => {
                PriceLevel::new(price, amount).with_order_count(orders)
            }
            RawLevel::Plain(price, amount) => PriceLevel::new(price, amount),
        }
    }
}

#[derive(Deserialize)]
struct TradeEvent {
    #[serde(rename = "t")]
    trade_id: u64,
    #[serde(rename = "p")]
    price: Price,
    #[serde(rename = "q")]
    quantity: Quantity,
    #[serde(rename = "T")]
    trade_time: i64,
    #[serde(rename = "m")]
    is_buyer_maker: bool,
}

#[derive(Deserialize)]
struct TickerEvent {
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "c")]
    last: Price,
    #[serde(rename = "h")]
    high: Price,
    #[serde(rename = "l")]
    low: Price,
    #[serde(rename = "b")]
    bid: Price,
    #[serde(rename = "a")]
    ask: Price,
    #[serde(rename = "v")]
    volume: Quantity,
}

impl JsonRpcCodec {
    pub fn new(exchange: impl Into<ExchangeId>) -> Self {
        Self {
            exchange: exchange.into(),
            symbols: RwLock::new(HashMap::new()),
        }
    }

    /// Wire stream name for a spec, e.g. `btcusdt@depth`
    pub fn stream_name(spec: &SubscriptionSpec) -> String {
        let suffix = match spec.channel {
            Channel::OrderBook => "depth",
            Channel::Trades => "trade",
            Channel::Ticker => "ticker",
            Channel::Account => return "account".to_string(),
        };
        match &spec.pair {
            Some(pair) => format!("{}@{suffix}", symbol(pair)),
            None => suffix.to_string(),
        }
    }

    fn encode(&self, method: &str, request_id: u64, specs: &[SubscriptionSpec]) -> Result<String, CodecError> {
        if specs.is_empty() {
            return Err(CodecError::Malformed("empty request".into()));
        }
        {
            let mut symbols = self.symbols.write();
            for spec in specs {
                if let Some(pair) = &spec.pair {
                    symbols.insert(symbol(pair), (pair.clone(), spec.asset));
                }
            }
        }
        let request = Request {
            method,
            params: specs.iter().map(Self::stream_name).collect(),
            id: request_id,
        };
        Ok(serde_json::to_string(&request)?)
    }

    fn key_for(&self, symbol: &str) -> Option<BookKey> {
        let symbols = self.symbols.read();
        let (pair, asset) = symbols.get(symbol)?;
        Some(BookKey::new(self.exchange.clone(), pair.clone(), *asset))
    }

    fn decode_stream(&self, stream: &str, data: Value) -> Result<Frame, CodecError> {
        let Some((symbol, kind)) = stream.split_once('@') else {
            return Ok(self.unrecognized(stream));
        };
        // `btcusdt@depth@100ms` carries the same payload as `btcusdt@depth`
        let kind = kind.split('@').next().unwrap_or(kind);
        let Some(key) = self.key_for(&symbol.to_ascii_lowercase()) else {
            return Ok(self.unrecognized(stream));
        };

        match kind {
            "depth" => {
                let update: DepthUpdate = serde_json::from_value(data)?;
                let mut delta = BookDelta::new(key, update.final_update_id, millis(update.event_time)?);
                for level in update.bids {
                    delta = delta.level(BookSide::Bid, level.into_level());
                }
                for level in update.asks {
                    delta = delta.level(BookSide::Ask, level.into_level());
                }
                Ok(Frame::Book(delta))
            }
            "trade" => {
                let trade: TradeEvent = serde_json::from_value(data)?;
                // Buyer is maker: the aggressor sold
                let side = if trade.is_buyer_maker { Side::Sell } else { Side::Buy };
                Ok(Frame::Trade(Trade::new(
                    trade.trade_id.to_string(),
                    key,
                    side,
                    trade.price,
                    trade.quantity,
                    millis(trade.trade_time)?,
                )))
            }
            "ticker" => {
                let ticker: TickerEvent = serde_json::from_value(data)?;
                Ok(Frame::Ticker(Ticker {
                    key,
                    last: ticker.last,
                    high: ticker.high,
                    low: ticker.low,
                    bid: ticker.bid,
                    ask: ticker.ask,
                    volume: ticker.volume,
                    last_updated: millis(ticker.event_time)?,
                }))
            }
            _ => Ok(self.unrecognized(stream)),
        }
    }

    fn unrecognized(&self, channel: &str) -> Frame {
        Frame::Unrecognized {
            channel: channel.to_string(),
        }
    }
}

impl FrameCodec for JsonRpcCodec {
    fn encode_subscribe(&self, request_id: u64, specs: &[SubscriptionSpec]) -> Result<String, CodecError> {
        self.encode("SUBSCRIBE", request_id, specs)
    }

    fn encode_unsubscribe(&self, request_id: u64, specs: &[SubscriptionSpec]) -> Result<String, CodecError> {
        self.encode("UNSUBSCRIBE", request_id, specs)
    }

    fn decode(&self, text: &str) -> Result<Vec<Frame>, CodecError> {
        let mut value: Value = serde_json::from_str(text)?;
        let Some(object) = value.as_object_mut() else {
            return Err(CodecError::Malformed(format!("expected object, got {text}")));
        };

        if let Some(data) = object.remove("data") {
            let stream = object
                .get("stream")
                .and_then(Value::as_str)
                .ok_or_else(|| CodecError::Malformed("envelope without stream".into()))?
                .to_string();
            return Ok(vec![self.decode_stream(&stream, data)?]);
        }

        if let Some(id) = object.get("id").and_then(Value::as_u64) {
            let outcome = match object.remove("error") {
                Some(error) => {
                    let error: RpcError = serde_json::from_value(error)?;
                    AckOutcome::Rejected(format!("{}: {}", error.code, error.msg))
                }
                None => AckOutcome::Ok,
            };
            return Ok(vec![Frame::Ack {
                exchange: self.exchange.clone(),
                request_id: id,
                outcome,
            }]);
        }

        match object.get("e").and_then(Value::as_str) {
            Some("ping" | "pong") => Ok(vec![Frame::Heartbeat]),
            Some(event) => Ok(vec![self.unrecognized(event)]),
            None => Err(CodecError::Malformed(format!("unrecognized message: {text}"))),
        }
    }
}

fn symbol(pair: &Pair) -> String {
    format!("{}{}", pair.base, pair.quote).to_ascii_lowercase()
}

fn millis(ms: i64) -> Result<Timestamp, CodecError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| CodecError::Malformed(format!("timestamp out of range: {ms}")))
}
