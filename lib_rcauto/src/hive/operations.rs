//! # Chain Operations
//!
//! Operations in condenser form: a two-element JSON array
//! `[operation_name, body]`. RC delegations have no dedicated operation; they
//! travel as a `custom_json` with id `rc`.

use serde::ser::{Serialize, Serializer};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::hive::signer::KeyRole;

/// `custom_json` id under which `delegate_rc` payloads are interpreted.
pub const RC_CUSTOM_JSON_ID: &str = "rc";

/// A `custom_json` operation body.
#[derive(Debug, Clone, PartialEq, serde::Serialize, Deserialize)]
pub struct CustomJsonOp {
    /// Active-key signers.
    pub required_auths: Vec<String>,
    /// Posting-key signers.
    pub required_posting_auths: Vec<String>,
    /// Application id.
    pub id: String,
    /// Compact JSON payload as a string.
    pub json: String,
}

/// `base`/`quote` pair of a price feed.
#[derive(Debug, Clone, PartialEq, serde::Serialize, Deserialize)]
pub struct ExchangeRate {
    /// HBD side, e.g. `0.312 HBD`.
    pub base: String,
    /// HIVE side, always `1.000 HIVE`.
    pub quote: String,
}

/// A `feed_publish` operation body.
#[derive(Debug, Clone, PartialEq, serde::Serialize, Deserialize)]
pub struct FeedPublishOp {
    /// Witness publishing the feed.
    pub publisher: String,
    /// Published rate.
    pub exchange_rate: ExchangeRate,
}

/// The operations this service broadcasts.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Arbitrary application payload.
    CustomJson(CustomJsonOp),
    /// Witness price feed.
    FeedPublish(FeedPublishOp),
}

impl Operation {
    /// Condenser operation name.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::CustomJson(_) => "custom_json",
            Operation::FeedPublish(_) => "feed_publish",
        }
    }

    /// The key role a signer needs for this operation.
    pub fn required_key_role(&self) -> KeyRole {
        match self {
            Operation::CustomJson(op) if op.required_auths.is_empty() => KeyRole::Posting,
            Operation::CustomJson(_) | Operation::FeedPublish(_) => KeyRole::Active,
        }
    }
}

impl Serialize for Operation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Operation::CustomJson(body) => (self.name(), body).serialize(serializer),
            Operation::FeedPublish(body) => (self.name(), body).serialize(serializer),
        }
    }
}

/// One delegation instruction: set `from`'s grant to `to` to `max_rc`.
///
/// `max_rc` is the new absolute amount, not a delta. Zero removes the grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegateRcInstruction {
    /// Delegator.
    pub from: String,
    /// Receiver.
    pub to: String,
    /// New total delegation.
    pub max_rc: i64,
}

impl DelegateRcInstruction {
    /// The `["delegate_rc", {...}]` payload carried inside the custom_json.
    pub fn payload(&self) -> Value {
        json!([
            "delegate_rc",
            {
                "from": self.from,
                "delegatees": [self.to],
                "max_rc": self.max_rc,
            }
        ])
    }

    /// Wraps the payload as a posting-authorized `custom_json`.
    pub fn to_operation(&self) -> Operation {
        construct_custom_json(&self.payload(), RC_CUSTOM_JSON_ID, None, Some(&self.from))
    }
}

/// Builds a `custom_json` operation with a compact JSON payload.
pub fn construct_custom_json(
    payload: &Value,
    id: &str,
    required_auth: Option<&str>,
    required_posting_auth: Option<&str>,
) -> Operation {
    let op = CustomJsonOp {
        required_auths: required_auth.map(|a| vec![a.to_string()]).unwrap_or_default(),
        required_posting_auths: required_posting_auth.map(|a| vec![a.to_string()]).unwrap_or_default(),
        id: id.to_string(),
        // Value's Display is the compact form.
        json: payload.to_string(),
    };
    log::debug!("custom_json {}: {}", op.id, op.json);
    Operation::CustomJson(op)
}

/// Builds a `feed_publish` quoting `base` HBD per HIVE.
pub fn feed_publish(publisher: &str, base: f64) -> Operation {
    Operation::FeedPublish(FeedPublishOp {
        publisher: publisher.to_string(),
        exchange_rate: ExchangeRate {
            base: format!("{base:.3} HBD"),
            quote: "1.000 HIVE".to_string(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delegate_rc_travels_as_custom_json() {
        let instruction = DelegateRcInstruction {
            from: "podping".into(),
            to: "podping.aaa".into(),
            max_rc: 300_000,
        };
        let op = instruction.to_operation();
        assert_eq!(op.required_key_role(), KeyRole::Posting);
        let value = serde_json::to_value(&op).expect("serialize");
        assert_eq!(value[0], "custom_json");
        assert_eq!(value[1]["required_auths"], json!([]));
        assert_eq!(value[1]["required_posting_auths"], json!(["podping"]));
        assert_eq!(value[1]["id"], "rc");

        let inner = value[1]["json"].as_str().expect("json is a string");
        assert!(!inner.contains(' '), "payload must be compact: {inner}");
        assert_eq!(
            serde_json::from_str::<Value>(inner).expect("payload parses"),
            json!(["delegate_rc", {"from": "podping", "delegatees": ["podping.aaa"], "max_rc": 300000}])
        );
    }

    #[test]
    fn test_active_custom_json_needs_active_key() {
        let op = construct_custom_json(&json!({"a": 1}), "podping", Some("podping"), None);
        assert_eq!(op.required_key_role(), KeyRole::Active);
    }

    #[test]
    fn test_feed_publish_formatting() {
        let op = feed_publish("brianoflondon", 0.31249);
        assert_eq!(op.required_key_role(), KeyRole::Active);
        assert_eq!(
            serde_json::to_value(&op).expect("serialize"),
            json!([
                "feed_publish",
                {
                    "publisher": "brianoflondon",
                    "exchange_rate": {"base": "0.312 HBD", "quote": "1.000 HIVE"}
                }
            ])
        );
    }
}
