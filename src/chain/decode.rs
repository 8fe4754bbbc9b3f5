//! EventLog1 decoding and payload flattening.
//!
//! The event's payload is seven sections of `(key, value)` items and
//! `(key, value[])` array items, one section per ABI scalar type. After a
//! bit-exact ABI decode, every section is walked and projected into one flat
//! `name -> value` record; empty values are dropped. Unknown keys pass
//! through untouched, so payload additions on the emitter side need no code
//! changes here.

use anyhow::{anyhow, bail, Context, Result};
use ethers::abi::{self, Token};
use ethers::types::{Log, I256, U256};
use ethers::utils::to_checksum;

use super::abi::EmitterAbi;

/// A decoded payload value, before normalization. Integers keep their full
/// 256-bit width until the rescaling stage decides how to persist them.
#[derive(Debug, Clone, PartialEq)]
pub enum FlatValue {
    Address(String),
    Uint(U256),
    Int(I256),
    Bool(bool),
    Bytes(String),
    Str(String),
    Array(Vec<FlatValue>),
}

/// A position-lifecycle event projected onto the domain: log header fields
/// plus the flattened payload map, in payload order.
#[derive(Debug, Clone)]
pub struct PositionEvent {
    pub block_number: u64,
    pub transaction_hash: String,
    pub msg_sender: String,
    pub event_name: String,
    pub topic1: Option<String>,
    pub fields: Vec<(String, FlatValue)>,
}

impl PositionEvent {
    /// String-like payload field by name (addresses, strings, hex bytes).
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .and_then(|(_, value)| match value {
                FlatValue::Address(s) | FlatValue::Bytes(s) | FlatValue::Str(s) => Some(s.as_str()),
                _ => None,
            })
    }
}

/// Decodes one raw log. Returns `Ok(None)` for event names outside the
/// position lifecycle; errors indicate a payload that does not match the
/// emitter ABI.
pub fn decode_log(emitter: &EmitterAbi, log: &Log) -> Result<Option<PositionEvent>> {
    let tokens = abi::decode(&emitter.param_types(), &log.data).context("ABI decode failed")?;

    let mut msg_sender = None;
    let mut event_name = None;
    for ((name, _), token) in emitter.inputs.iter().zip(&tokens) {
        match (name.as_str(), token) {
            ("msgSender", Token::Address(addr)) => msg_sender = Some(to_checksum(addr, None)),
            ("eventName", Token::String(value)) => event_name = Some(value.clone()),
            _ => {}
        }
    }

    let event_name = event_name.ok_or_else(|| anyhow!("event payload has no eventName"))?;
    if event_name != "PositionIncrease" && event_name != "PositionDecrease" {
        return Ok(None);
    }
    let msg_sender = msg_sender.ok_or_else(|| anyhow!("event payload has no msgSender"))?;

    let payload = match tokens.last() {
        Some(Token::Tuple(sections)) => sections,
        _ => bail!("event payload does not end in a tuple"),
    };

    let block_number = log
        .block_number
        .ok_or_else(|| anyhow!("log has no block number"))?
        .as_u64();
    let transaction_hash = log
        .transaction_hash
        .map(|hash| format!("{:#x}", hash))
        .ok_or_else(|| anyhow!("log has no transaction hash"))?;
    let topic1 = log.topics.get(1).map(|topic| format!("{:#x}", topic));

    Ok(Some(PositionEvent {
        block_number,
        transaction_hash,
        msg_sender,
        event_name,
        topic1,
        fields: flatten_payload(payload),
    }))
}

/// Flattens the seven item-map sections into one `name -> value` record,
/// dropping empty values.
pub fn flatten_payload(sections: &[Token]) -> Vec<(String, FlatValue)> {
    let mut fields = Vec::new();

    for section in sections {
        let Token::Tuple(parts) = section else {
            continue;
        };

        if let Some(Token::Array(items)) = parts.first() {
            for item in items {
                let Token::Tuple(pair) = item else { continue };
                if let (Some(Token::String(key)), Some(value)) = (pair.first(), pair.get(1)) {
                    if let Some(flat) = flat_value(value) {
                        fields.push((key.clone(), flat));
                    }
                }
            }
        }

        if let Some(Token::Array(items)) = parts.get(1) {
            for item in items {
                let Token::Tuple(pair) = item else { continue };
                if let (Some(Token::String(key)), Some(Token::Array(values))) =
                    (pair.first(), pair.get(1))
                {
                    let flat: Vec<FlatValue> = values.iter().filter_map(flat_value).collect();
                    if !flat.is_empty() {
                        fields.push((key.clone(), FlatValue::Array(flat)));
                    }
                }
            }
        }
    }

    fields
}

fn flat_value(token: &Token) -> Option<FlatValue> {
    match token {
        Token::Address(addr) => Some(FlatValue::Address(format!("{:#x}", addr))),
        Token::Uint(value) => Some(FlatValue::Uint(*value)),
        Token::Int(value) => Some(FlatValue::Int(I256::from_raw(*value))),
        Token::Bool(value) => Some(FlatValue::Bool(*value)),
        Token::FixedBytes(bytes) => Some(FlatValue::Bytes(format!("0x{}", hex::encode(bytes)))),
        Token::Bytes(bytes) if bytes.is_empty() => None,
        Token::Bytes(bytes) => Some(FlatValue::Bytes(format!("0x{}", hex::encode(bytes)))),
        Token::String(value) if value.is_empty() => None,
        Token::String(value) => Some(FlatValue::Str(value.clone())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::{Address, H256, U64};

    fn emitter() -> EmitterAbi {
        EmitterAbi::parse(include_str!("../../abi_emitter.json")).unwrap()
    }

    fn pair(key: &str, value: Token) -> Token {
        Token::Tuple(vec![Token::String(key.to_string()), value])
    }

    fn section(items: Vec<Token>, array_items: Vec<Token>) -> Token {
        Token::Tuple(vec![Token::Array(items), Token::Array(array_items)])
    }

    /// Payload with one entry per section kind, plus empties that must drop.
    fn sample_payload(event_name: &str) -> Vec<Token> {
        let market: Address = "0x47c031236e19d024b42f8ae6780e44a573170703"
            .parse()
            .unwrap();
        let payload = Token::Tuple(vec![
            section(vec![pair("market", Token::Address(market))], vec![]),
            section(
                vec![
                    pair("sizeInUsd", Token::Uint(U256::exp10(30))),
                    pair("orderType", Token::Uint(U256::from(4u64))),
                ],
                vec![pair(
                    "orderKeys",
                    Token::Array(vec![Token::Uint(U256::from(7u64))]),
                )],
            ),
            section(
                vec![pair(
                    "basePnlUsd",
                    Token::Int(I256::from_dec_str("-5").unwrap().into_raw()),
                )],
                vec![],
            ),
            section(vec![pair("isLong", Token::Bool(true))], vec![]),
            section(
                vec![pair("positionKey", Token::FixedBytes(vec![0xab; 32]))],
                vec![],
            ),
            section(vec![pair("callback", Token::Bytes(Vec::new()))], vec![]),
            section(vec![pair("note", Token::String(String::new()))], vec![]),
        ]);

        vec![
            Token::Address(Address::repeat_byte(0x11)),
            Token::String(event_name.to_string()),
            payload,
        ]
    }

    fn sample_log(event_name: &str) -> Log {
        Log {
            topics: vec![
                crate::chain::EVENT_SIGNATURE.parse::<H256>().unwrap(),
                H256::repeat_byte(0x22),
            ],
            data: abi::encode(&sample_payload(event_name)).into(),
            block_number: Some(U64::from(123_456u64)),
            transaction_hash: Some(H256::repeat_byte(0x33)),
            ..Default::default()
        }
    }

    #[test]
    fn decodes_a_position_increase() {
        let event = decode_log(&emitter(), &sample_log("PositionIncrease"))
            .unwrap()
            .expect("position event");

        assert_eq!(event.event_name, "PositionIncrease");
        assert_eq!(event.block_number, 123_456);
        assert_eq!(event.transaction_hash, format!("0x{}", "33".repeat(32)));
        assert_eq!(event.topic1, Some(format!("0x{}", "22".repeat(32))));
        // msgSender is checksummed, payload addresses are lowercase.
        assert_eq!(
            event.msg_sender,
            to_checksum(&Address::repeat_byte(0x11), None)
        );
        assert_eq!(
            event.field_str("market"),
            Some("0x47c031236e19d024b42f8ae6780e44a573170703")
        );
    }

    #[test]
    fn flattens_values_and_drops_empties() {
        let event = decode_log(&emitter(), &sample_log("PositionDecrease"))
            .unwrap()
            .unwrap();

        let get = |name: &str| {
            event
                .fields
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.clone())
        };

        assert_eq!(get("sizeInUsd"), Some(FlatValue::Uint(U256::exp10(30))));
        assert_eq!(
            get("basePnlUsd"),
            Some(FlatValue::Int(I256::from_dec_str("-5").unwrap()))
        );
        assert_eq!(get("isLong"), Some(FlatValue::Bool(true)));
        assert_eq!(
            get("positionKey"),
            Some(FlatValue::Bytes(format!("0x{}", "ab".repeat(32))))
        );
        assert_eq!(
            get("orderKeys"),
            Some(FlatValue::Array(vec![FlatValue::Uint(U256::from(7u64))]))
        );
        // Empty bytes and empty string entries are dropped.
        assert_eq!(get("callback"), None);
        assert_eq!(get("note"), None);
    }

    #[test]
    fn ignores_other_event_names() {
        let decoded = decode_log(&emitter(), &sample_log("SwapInfo")).unwrap();
        assert!(decoded.is_none());
    }

    #[test]
    fn garbage_data_is_an_error() {
        let mut log = sample_log("PositionIncrease");
        log.data = vec![0xff; 7].into();
        assert!(decode_log(&emitter(), &log).is_err());
    }
}
