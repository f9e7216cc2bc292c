use serde::Serialize;
use serde_json::Value;

use crate::error::CliError;

/// Stdout document for every action.
#[derive(Debug, Serialize)]
pub struct Envelope {
    pub action: &'static str,
    pub destination: &'static str,
    pub ok: bool,
    pub data: Value,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    pub fn ok(action: &'static str, destination: &'static str, data: Value) -> Self {
        Self {
            action,
            destination,
            ok: true,
            data,
            warnings: Vec::new(),
            error: None,
        }
    }

    pub fn failed(mut self, error: impl ToString) -> Self {
        self.ok = false;
        self.error = Some(error.to_string());
        self
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings.extend(warnings);
        self
    }
}

pub fn to_string(envelope: &Envelope, pretty: bool) -> Result<String, CliError> {
    let payload = if pretty {
        serde_json::to_string_pretty(envelope)?
    } else {
        serde_json::to_string(envelope)?
    };
    Ok(payload)
}

pub fn render(envelope: &Envelope, pretty: bool) -> Result<(), CliError> {
    println!("{}", to_string(envelope, pretty)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn failed_envelope_carries_error_and_data() {
        let envelope = Envelope::ok("sync", "duckdb", json!({ "total": 2 })).failed("1 of 2 symbols failed");
        let value: Value = serde_json::from_str(&to_string(&envelope, false).expect("json")).expect("parse");

        assert_eq!(value["ok"], json!(false));
        assert_eq!(value["data"]["total"], json!(2));
        assert_eq!(value["error"], json!("1 of 2 symbols failed"));
    }

    #[test]
    fn successful_envelope_omits_error() {
        let envelope = Envelope::ok("initdb", "lake", Value::Null);
        let rendered = to_string(&envelope, false).expect("json");

        assert!(!rendered.contains("\"error\""));
    }
}
