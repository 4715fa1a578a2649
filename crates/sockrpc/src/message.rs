//! Request/Response envelope codec.
//!
//! Two JSON shapes share the channel and are disambiguated structurally: a
//! frame carrying `Arguments` is a request, a frame carrying `ReturnValue` or
//! `Error` is a response. Decoding is deliberately forgiving: malformed JSON
//! or missing required fields yield the empty sentinel so an unrelated frame
//! is ignored rather than faulting the connection. A structurally valid
//! object whose fields have the wrong type is a hard decode error.

use crate::error::{Result, RpcError};
use serde::Serialize;
use serde_json::Value;

/// The nil call id used by the historical protocol variant without call
/// correlation.
pub const NIL_CALL_ID: &str = "";

/// An RPC request envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    #[serde(rename = "FunctionName")]
    pub function_name: String,
    #[serde(rename = "CallId")]
    pub call_id: String,
    #[serde(rename = "Arguments")]
    pub arguments: Vec<Value>,
}

/// An RPC response envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    #[serde(rename = "FunctionName")]
    pub function_name: String,
    #[serde(rename = "CallId")]
    pub call_id: String,
    #[serde(rename = "ReturnValue")]
    pub return_value: Option<Value>,
    #[serde(rename = "Error")]
    pub error: Option<String>,
}

fn wrong_type(field: &str, value: &Value) -> RpcError {
    RpcError::Json {
        message: format!("field {field} has unexpected type: {value}"),
        source: None,
    }
}

fn take_string(obj: &serde_json::Map<String, Value>, field: &str) -> Result<Option<String>> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(wrong_type(field, other)),
    }
}

impl Request {
    /// The empty sentinel returned for unparseable frames.
    pub fn empty() -> Self {
        Self {
            function_name: String::new(),
            call_id: NIL_CALL_ID.to_string(),
            arguments: Vec::new(),
        }
    }

    /// True when this is the empty sentinel.
    pub fn is_empty(&self) -> bool {
        self.function_name.is_empty() && self.arguments.is_empty()
    }

    /// Decode a request from JSON text.
    ///
    /// Returns the empty sentinel for malformed JSON or when `FunctionName`
    /// or `Arguments` is absent; fails only when a present field carries the
    /// wrong type.
    pub fn from_json(text: &str) -> Result<Self> {
        let root: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(_) => return Ok(Self::empty()),
        };
        let Some(obj) = root.as_object() else {
            return Ok(Self::empty());
        };

        let function_name = take_string(obj, "FunctionName")?;
        let call_id = take_string(obj, "CallId")?.unwrap_or_else(|| NIL_CALL_ID.to_string());
        let arguments = match obj.get("Arguments") {
            None | Some(Value::Null) => None,
            Some(Value::Array(items)) => Some(items.clone()),
            Some(other) => return Err(wrong_type("Arguments", other)),
        };

        match (function_name, arguments) {
            (Some(function_name), Some(arguments)) => Ok(Self {
                function_name,
                call_id,
                arguments,
            }),
            _ => Ok(Self::empty()),
        }
    }

    /// Encode as a JSON text frame.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl Response {
    /// The empty sentinel returned for unparseable frames.
    pub fn empty() -> Self {
        Self {
            function_name: String::new(),
            call_id: NIL_CALL_ID.to_string(),
            return_value: None,
            error: None,
        }
    }

    /// True when this is the empty sentinel.
    pub fn is_empty(&self) -> bool {
        self.function_name.is_empty() && self.return_value.is_none() && self.error.is_none()
    }

    /// Decode a response from JSON text.
    ///
    /// Well-formed iff `FunctionName` and `ReturnValue` are present, or
    /// `Error` is present. Anything else yields the empty sentinel; a present
    /// field of the wrong type is a decode error.
    pub fn from_json(text: &str) -> Result<Self> {
        let root: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(_) => return Ok(Self::empty()),
        };
        let Some(obj) = root.as_object() else {
            return Ok(Self::empty());
        };

        let function_name = take_string(obj, "FunctionName")?;
        let call_id = take_string(obj, "CallId")?.unwrap_or_else(|| NIL_CALL_ID.to_string());
        let return_value = match obj.get("ReturnValue") {
            None | Some(Value::Null) => None,
            Some(value) => Some(value.clone()),
        };
        let error = take_string(obj, "Error")?;

        let well_formed = (function_name.is_some() && return_value.is_some()) || error.is_some();
        if !well_formed {
            return Ok(Self::empty());
        }

        Ok(Self {
            function_name: function_name.unwrap_or_default(),
            call_id,
            return_value,
            error,
        })
    }

    /// Encode as a JSON text frame.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
