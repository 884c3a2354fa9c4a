//! Structural validation of incoming JSON.
//!
//! Every route declares the fields it expects, their JSON type and whether
//! they may be absent. Payloads are checked against these tables before they
//! are decoded into typed structs, so malformed input is rejected with a
//! precise reason and never reaches engine state.

use serde_json::Value;
use thiserror::Error;

/// JSON type tag of one field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    Str,
    Num,
    Bool,
    Arr,
    /// Any JSON object.
    Obj,
    /// An object with its own field table.
    Nested(&'static [FieldSpec]),
    /// Hex string encoding exactly this many bytes.
    Hex(usize),
}

impl FieldKind {
    fn name(&self) -> &'static str {
        match self {
            Self::Str => "string",
            Self::Num => "number",
            Self::Bool => "boolean",
            Self::Arr => "array",
            Self::Obj | Self::Nested(_) => "object",
            Self::Hex(32) => "32-byte hex",
            Self::Hex(64) => "64-byte hex",
            Self::Hex(_) => "hex",
        }
    }
}

/// One entry of a field table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub optional: bool,
}

impl FieldSpec {
    pub const fn req(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            optional: false,
        }
    }

    pub const fn opt(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            optional: true,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("expected a JSON object")]
    NotAnObject,

    #[error("missing field `{0}`")]
    Missing(String),

    #[error("field `{field}` must be {expected}")]
    WrongType {
        field: String,
        expected: &'static str,
    },
}

fn kind_matches(kind: &FieldKind, value: &Value, path: &str) -> Result<(), SchemaError> {
    let ok = match kind {
        FieldKind::Str => value.is_string(),
        FieldKind::Num => value.is_number(),
        FieldKind::Bool => value.is_boolean(),
        FieldKind::Arr => value.is_array(),
        FieldKind::Obj => value.is_object(),
        FieldKind::Nested(fields) => {
            if !value.is_object() {
                false
            } else {
                return validate_at(value, fields, path);
            }
        }
        FieldKind::Hex(len) => value.as_str().is_some_and(|s| {
            s.len() == len * 2 && s.bytes().all(|b| b.is_ascii_hexdigit())
        }),
    };
    if ok {
        Ok(())
    } else {
        Err(SchemaError::WrongType {
            field: path.to_string(),
            expected: kind.name(),
        })
    }
}

fn validate_at(value: &Value, fields: &[FieldSpec], prefix: &str) -> Result<(), SchemaError> {
    let obj = value.as_object().ok_or(SchemaError::NotAnObject)?;
    for spec in fields {
        let path = if prefix.is_empty() {
            spec.name.to_string()
        } else {
            format!("{prefix}.{}", spec.name)
        };
        match obj.get(spec.name) {
            None | Some(Value::Null) if spec.optional => {}
            None | Some(Value::Null) => return Err(SchemaError::Missing(path)),
            Some(v) => kind_matches(&spec.kind, v, &path)?,
        }
    }
    Ok(())
}

/// Check `value` against a field table. Unlisted fields are allowed.
pub fn validate(value: &Value, fields: &[FieldSpec]) -> Result<(), SchemaError> {
    validate_at(value, fields, "")
}

use FieldKind::{Arr, Bool, Hex, Nested, Num, Obj, Str};

pub const SIGN: &[FieldSpec] = &[
    FieldSpec::req("owner", Hex(32)),
    FieldSpec::req("sig", Hex(64)),
];

pub const NODE_INFO: &[FieldSpec] = &[
    FieldSpec::req("publicKey", Hex(32)),
    FieldSpec::req("curvePublicKey", Hex(32)),
    FieldSpec::req("externalIp", Str),
    FieldSpec::req("externalPort", Num),
    FieldSpec::req("internalIp", Str),
    FieldSpec::req("internalPort", Num),
];

pub const JOIN_REQUEST: &[FieldSpec] = &[
    FieldSpec::req("nodeInfo", Nested(NODE_INFO)),
    FieldSpec::req("cycleMarker", Hex(32)),
    FieldSpec::req("timestamp", Num),
    FieldSpec::opt("version", Str),
    FieldSpec::req("sign", Nested(SIGN)),
];

pub const UNJOIN: &[FieldSpec] = &[
    FieldSpec::req("publicKey", Hex(32)),
    FieldSpec::req("timestamp", Num),
    FieldSpec::req("sign", Nested(SIGN)),
];

pub const STANDBY_REFRESH: &[FieldSpec] = &[
    FieldSpec::req("publicKey", Hex(32)),
    FieldSpec::req("cycleNumber", Num),
    FieldSpec::req("sign", Nested(SIGN)),
];

pub const SYNC_STATUS: &[FieldSpec] = &[
    FieldSpec::req("nodeId", Hex(32)),
    FieldSpec::req("cycleNumber", Num),
    FieldSpec::req("sign", Nested(SIGN)),
];

pub const ACTIVE: &[FieldSpec] = &[
    FieldSpec::req("nodeId", Hex(32)),
    FieldSpec::req("timestamp", Num),
    FieldSpec::req("cycleNumber", Num),
    FieldSpec::req("sign", Nested(SIGN)),
];

pub const SCALING: &[FieldSpec] = &[
    FieldSpec::req("nodeId", Hex(32)),
    FieldSpec::req("timestamp", Num),
    FieldSpec::req("counter", Num),
    FieldSpec::req("scale", Str),
    FieldSpec::req("sign", Nested(SIGN)),
];

pub const ADD_TX: &[FieldSpec] = &[
    FieldSpec::req("type", Str),
    FieldSpec::req("txData", Obj),
    FieldSpec::req("cycle", Num),
    FieldSpec::opt("priority", Num),
    FieldSpec::req("sign", Nested(SIGN)),
];

pub const REMOVE_TX: &[FieldSpec] = &[
    FieldSpec::req("txHash", Hex(32)),
    FieldSpec::req("cycle", Num),
    FieldSpec::req("sign", Nested(SIGN)),
];

pub const LOST_DOWN: &[FieldSpec] = &[
    FieldSpec::req("target", Hex(32)),
    FieldSpec::req("checker", Hex(32)),
    FieldSpec::req("cycle", Num),
    FieldSpec::req("sign", Nested(SIGN)),
];

pub const LOST_UP: &[FieldSpec] = &[
    FieldSpec::req("target", Hex(32)),
    FieldSpec::req("cycle", Num),
    FieldSpec::req("sign", Nested(SIGN)),
];

pub const LOST_ARCHIVER_DOWN: &[FieldSpec] = &[
    FieldSpec::req("archiver", Hex(32)),
    FieldSpec::req("investigator", Hex(32)),
    FieldSpec::req("cycle", Num),
    FieldSpec::req("sign", Nested(SIGN)),
];

pub const LOST_ARCHIVER_UP: &[FieldSpec] = &[
    FieldSpec::req("archiver", Hex(32)),
    FieldSpec::req("cycle", Num),
    FieldSpec::req("sign", Nested(SIGN)),
];

pub const APOPTOSIS: &[FieldSpec] = &[
    FieldSpec::req("id", Hex(32)),
    FieldSpec::req("when", Num),
    FieldSpec::req("sign", Nested(SIGN)),
];

pub const SYNC_CYCLES: &[FieldSpec] = &[
    FieldSpec::req("start", Num),
    FieldSpec::req("end", Num),
];

pub const ENVELOPE: &[FieldSpec] = &[
    FieldSpec::req("type", Str),
    FieldSpec::req("payload", Obj),
    FieldSpec::req("tracker", Str),
    FieldSpec::req("sender", Hex(32)),
    FieldSpec::req("origin", Hex(32)),
];

pub const ACCEPTED: &[FieldSpec] = &[
    FieldSpec::req("publicKey", Hex(32)),
    FieldSpec::req("cycleMarker", Hex(32)),
    FieldSpec::req("counter", Num),
    FieldSpec::opt("standby", Bool),
    FieldSpec::opt("peers", Arr),
    FieldSpec::req("sign", Nested(SIGN)),
];

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PAIR: &[FieldSpec] = &[
        FieldSpec::req("a", Str),
        FieldSpec::opt("b", Num),
    ];

    #[test]
    fn optional_field_may_be_absent_or_null() {
        validate(&json!({"a": "x"}), PAIR).unwrap();
        validate(&json!({"a": "x", "b": null}), PAIR).unwrap();
        validate(&json!({"a": "x", "b": 3, "extra": true}), PAIR).unwrap();
    }

    #[test]
    fn missing_and_mistyped_fields_are_named() {
        assert_eq!(
            validate(&json!({"b": 1}), PAIR),
            Err(SchemaError::Missing("a".into()))
        );
        assert_eq!(
            validate(&json!({"a": "x", "b": "1"}), PAIR),
            Err(SchemaError::WrongType {
                field: "b".into(),
                expected: "number"
            })
        );
        assert_eq!(validate(&json!([1]), PAIR), Err(SchemaError::NotAnObject));
    }

    #[test]
    fn nested_paths_are_reported() {
        let v = json!({
            "publicKey": "00".repeat(32),
            "cycleNumber": 4,
            "sign": {"owner": "00".repeat(32), "sig": "zz"}
        });
        assert_eq!(
            validate(&v, STANDBY_REFRESH),
            Err(SchemaError::WrongType {
                field: "sign.sig".into(),
                expected: "64-byte hex"
            })
        );
    }
}
