use serde::Deserialize;

use super::StructuringError;
use crate::models::{lenient, SaleDeed};

/// Parse a model answer into a sale deed.
pub fn parse_sale_deed(response: &str) -> Result<SaleDeed, StructuringError> {
    let json = extract_json_object(response)?;
    let deed: SaleDeed =
        serde_json::from_str(json).map_err(|e| StructuringError::JsonParsing(e.to_string()))?;
    if deed.is_empty() {
        return Err(StructuringError::EmptyResult);
    }
    Ok(deed)
}

/// Parse a vision answer of the form `{"registration_fee": 20400}`.
pub fn parse_fee_response(response: &str) -> Result<Option<f64>, StructuringError> {
    #[derive(Deserialize)]
    struct FeeAnswer {
        #[serde(default, deserialize_with = "lenient::number")]
        registration_fee: Option<f64>,
    }

    let json = extract_json_object(response)?;
    let answer: FeeAnswer =
        serde_json::from_str(json).map_err(|e| StructuringError::JsonParsing(e.to_string()))?;
    Ok(answer.registration_fee)
}

/// The outermost `{…}` of a response, ignoring code fences and prose around it.
pub fn extract_json_object(response: &str) -> Result<&str, StructuringError> {
    let body = strip_code_fence(response.trim());
    let start = body
        .find('{')
        .ok_or_else(|| StructuringError::MalformedResponse("No JSON object found".into()))?;
    let end = body
        .rfind('}')
        .filter(|end| *end > start)
        .ok_or_else(|| StructuringError::MalformedResponse("Unclosed JSON object".into()))?;
    Ok(&body[start..=end])
}

fn strip_code_fence(text: &str) -> &str {
    let Some(open) = text.find("```") else {
        return text;
    };
    let after_open = &text[open + 3..];
    // Skip an info string such as `json`.
    let content = after_open
        .find('\n')
        .map(|nl| &after_open[nl + 1..])
        .unwrap_or(after_open);
    match content.find("```") {
        Some(close) => &content[..close],
        None => content,
    }
}
