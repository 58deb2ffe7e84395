//! Feed message decoding.
//!
//! Every pushed frame is a JSON object with a `type` field:
//!
//! - `open` - control message sent once the stream is established
//! - `mempool` - `data` holds a batch of new transactions
//! - anything else is surfaced as [`FeedEvent::Unrecognized`]
//!
//! Transaction records look like
//! `{"tx": {"h": "<hash>"}, "out": [{"e": {"v": 9800000, "a": "pqhys…"}}, …]}`.
//! Only `tx.h` and `out` are required; an output without `e.a` is a
//! non-standard output and carries no address.

use {
    crate::address_set::Address,
    serde::Deserialize,
    serde_json::Value,
    thiserror::Error,
};

pub const MSG_OPEN: &str = "open";
pub const MSG_MEMPOOL: &str = "mempool";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    pub amount: u64,
    pub address: Option<Address>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tx {
    pub hash: String,
    pub outputs: Vec<TxOutput>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// Control message: the feed accepted the subscription.
    Opened,
    /// Decoded transactions from one batch; malformed records already dropped.
    Transactions(Vec<Tx>),
    /// A message whose `type` is not one we handle.
    Unrecognized { kind: String },
    /// A frame that is not a feed message at all.
    Malformed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedTx {
    #[error("transaction record is not valid: {0}")]
    InvalidRecord(String),
    #[error("negative or non-integer amount in output {0}")]
    InvalidAmount(usize),
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawTx {
    tx: RawTxId,
    out: Vec<RawOutput>,
}

#[derive(Debug, Deserialize)]
struct RawTxId {
    h: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawOutput {
    #[serde(default)]
    e: RawOutputEdge,
}

#[derive(Debug, Default, Deserialize)]
struct RawOutputEdge {
    #[serde(default)]
    v: Option<Value>,
    #[serde(default)]
    a: Option<String>,
}

/// Decode one feed frame.
pub fn decode_message(text: &str) -> FeedEvent {
    let message: RawMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            return FeedEvent::Malformed {
                reason: e.to_string(),
            }
        }
    };

    match message.kind.as_str() {
        MSG_OPEN => FeedEvent::Opened,
        MSG_MEMPOOL => match message.data {
            None => FeedEvent::Transactions(Vec::new()),
            Some(Value::Array(records)) => FeedEvent::Transactions(decode_batch(records)),
            Some(other) => FeedEvent::Malformed {
                reason: format!("{} data is not a list: {}", MSG_MEMPOOL, other),
            },
        },
        _ => FeedEvent::Unrecognized { kind: message.kind },
    }
}

/// Decode every record in a batch, skipping (and logging) malformed ones.
fn decode_batch(records: Vec<Value>) -> Vec<Tx> {
    records
        .into_iter()
        .enumerate()
        .filter_map(|(index, record)| match decode_tx(record) {
            Ok(tx) => Some(tx),
            Err(e) => {
                log::warn!("Skipping malformed transaction #{} in batch: {}", index, e);
                None
            }
        })
        .collect()
}

pub fn decode_tx(record: Value) -> Result<Tx, MalformedTx> {
    let raw: RawTx =
        serde_json::from_value(record).map_err(|e| MalformedTx::InvalidRecord(e.to_string()))?;

    let outputs = raw
        .out
        .into_iter()
        .enumerate()
        .map(|(index, output)| {
            let amount = match output.e.v {
                None | Some(Value::Null) => 0,
                Some(value) => value.as_u64().ok_or(MalformedTx::InvalidAmount(index))?,
            };
            let address = output.e.a.and_then(|payload| match Address::parse(&payload) {
                Ok(address) => Some(address),
                Err(e) => {
                    log::debug!("Output {} of {} has unusable address {}: {}", index, raw.tx.h, payload, e);
                    None
                }
            });
            Ok(TxOutput { amount, address })
        })
        .collect::<Result<Vec<_>, MalformedTx>>()?;

    Ok(Tx {
        hash: raw.tx.h,
        outputs,
    })
}

#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    fn mempool_message() -> Value {
        json!({
            "type": "mempool",
            "data": [{
                "tx": {"h": "a685412fca8392e13a44a286464b82db925974c529abb78f201b7c8af179b8b2"},
                "in": [{"i": 0, "e": {"h": "db68", "i": 1, "a": "qraqx7hu9g8pduxktlfgyzdnma6nmkaxwsehstwwst"}}],
                "out": [
                    {
                        "i": 0,
                        "str": "OP_HASH160 2e48498c7787140cd964500a65d1d9dfa72eed6d OP_EQUAL",
                        "e": {"v": 9_800_000, "i": 0, "a": "pqhysjvvw7r3grxev3gq5ew3m806wthdd5lqpmma3l"}
                    },
                    {
                        "i": 1,
                        "e": {"v": 1_055_736, "i": 1, "a": "qz4v8lrnv786e42n7xg0czpelp439aytusray7cnh4"}
                    },
                    {
                        "i": 2,
                        "str": "OP_RETURN 6d02",
                        "e": {"v": 0, "i": 2}
                    }
                ],
                "_id": "5c7dcd3d46b82e002f9ee6c3"
            }]
        })
    }

    #[test]
    fn test_decode_mempool_batch() {
        let event = decode_message(&mempool_message().to_string());

        let FeedEvent::Transactions(txs) = event else {
            panic!("expected transactions, got {:?}", event);
        };
        assert_eq!(txs.len(), 1);
        let tx = &txs[0];
        assert_eq!(tx.hash, "a685412fca8392e13a44a286464b82db925974c529abb78f201b7c8af179b8b2");
        assert_eq!(tx.outputs.len(), 3);
        assert_eq!(tx.outputs[0].amount, 9_800_000);
        assert_eq!(
            tx.outputs[0].address.as_ref().unwrap().as_str(),
            "bitcoincash:pqhysjvvw7r3grxev3gq5ew3m806wthdd5lqpmma3l"
        );
        assert_eq!(tx.outputs[1].amount, 1_055_736);
        assert_eq!(
            tx.outputs[1].address.as_ref().unwrap().as_str(),
            "bitcoincash:qz4v8lrnv786e42n7xg0czpelp439aytusray7cnh4"
        );
        assert_eq!(tx.outputs[2].address, None);
    }

    #[test]
    fn test_control_and_unknown_messages() {
        assert_eq!(decode_message(r#"{"type": "open", "data": []}"#), FeedEvent::Opened);
        assert_eq!(
            decode_message(r#"{"type": "block", "data": []}"#),
            FeedEvent::Unrecognized {
                kind: "block".to_string()
            }
        );
        assert!(matches!(decode_message("not json"), FeedEvent::Malformed { .. }));
        assert!(matches!(decode_message(r#"{"data": []}"#), FeedEvent::Malformed { .. }));
    }

    #[test]
    fn test_message_kind_decided_before_data_shape() {
        // Test: Only a mempool batch needs list data; other kinds accept any payload
        assert_eq!(
            decode_message(r#"{"type": "block", "data": {"height": 1}}"#),
            FeedEvent::Unrecognized {
                kind: "block".to_string()
            }
        );
        assert_eq!(decode_message(r#"{"type": "open", "data": null}"#), FeedEvent::Opened);
        assert_eq!(decode_message(r#"{"type": "open"}"#), FeedEvent::Opened);
        assert!(matches!(
            decode_message(r#"{"type": "mempool", "data": {"tx": {"h": "h1"}}}"#),
            FeedEvent::Malformed { .. }
        ));
        assert_eq!(decode_message(r#"{"type": "mempool"}"#), FeedEvent::Transactions(Vec::new()));
    }

    #[test]
    fn test_malformed_record_skipped_rest_kept() {
        let message = json!({
            "type": "mempool",
            "data": [
                {"out": []},
                {"tx": {"h": "h2"}, "out": [{"e": {"v": -5, "a": "qz4v8lrnv786e42n7xg0czpelp439aytusray7cnh4"}}]},
                {"tx": {"h": "h3"}, "out": [{"e": {"v": 42}}]}
            ]
        });

        let FeedEvent::Transactions(txs) = decode_message(&message.to_string()) else {
            panic!("expected transactions");
        };

        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].hash, "h3");
        assert_eq!(txs[0].outputs, vec![TxOutput { amount: 42, address: None }]);
    }

    #[test]
    fn test_missing_amount_is_zero() {
        let tx = decode_tx(json!({"tx": {"h": "h1"}, "out": [{"e": {}}, {}]})).unwrap();

        assert_eq!(tx.outputs.len(), 2);
        assert!(tx.outputs.iter().all(|o| o.amount == 0 && o.address.is_none()));
    }
}
