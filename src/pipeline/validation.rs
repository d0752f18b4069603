//! Normalisation of model output before it is persisted.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::{BuyerDetail, PropertyDetails, SaleDeed, SellerDetail};

static AADHAAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{12}$").expect("valid aadhaar regex"));
static PAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{5}[0-9]{4}[A-Z]$").expect("valid pan regex"));
static PINCODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{6}$").expect("valid pincode regex"));

/// 12 digits once spaces and dashes are removed.
pub fn clean_aadhaar(raw: Option<&str>) -> Option<String> {
    let cleaned: String = raw?
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();
    AADHAAR.is_match(&cleaned).then_some(cleaned)
}

/// Five letters, four digits, one letter; upper-cased.
pub fn clean_pan(raw: Option<&str>) -> Option<String> {
    let cleaned = raw?.trim().to_uppercase();
    PAN.is_match(&cleaned).then_some(cleaned)
}

/// Six digits once whitespace is removed.
pub fn clean_pincode(raw: Option<&str>) -> Option<String> {
    let cleaned: String = raw?.chars().filter(|c| !c.is_whitespace()).collect();
    PINCODE.is_match(&cleaned).then_some(cleaned)
}

/// Guidance value is one hundred times the registration fee, to the paisa.
pub fn calculate_guidance_value(registration_fee: f64) -> f64 {
    (registration_fee * 100.0 * 100.0).round() / 100.0
}

/// `4000.0` → `"4000"`, `1250.5` → `"1250.50"`.
pub fn format_amount(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        format!("{}", value as i64)
    } else {
        format!("{value:.2}")
    }
}

/// Set the fee and its derived guidance value as display strings.
pub fn apply_registration_fee(property: &mut PropertyDetails, fee: f64) {
    property.registration_fee = Some(format_amount(fee));
    property.guidance_value = Some(format_amount(calculate_guidance_value(fee)));
}

/// Clean identity fields and drop model-supplied fee columns.
///
/// The registration fee only ever comes from the page-table heuristic or the
/// vision resolver, so whatever the text model guessed is discarded here.
pub fn validate_and_clean(deed: SaleDeed) -> SaleDeed {
    let SaleDeed {
        buyers,
        sellers,
        mut property,
        document,
    } = deed;

    let buyers: Vec<BuyerDetail> = buyers
        .into_iter()
        .map(|b| BuyerDetail {
            aadhaar_number: clean_aadhaar(b.aadhaar_number.as_deref()),
            pan_card_number: clean_pan(b.pan_card_number.as_deref()),
            pincode: clean_pincode(b.pincode.as_deref()),
            ..b
        })
        .collect();

    let sellers: Vec<SellerDetail> = sellers
        .into_iter()
        .map(|s| SellerDetail {
            aadhaar_number: clean_aadhaar(s.aadhaar_number.as_deref()),
            pan_card_number: clean_pan(s.pan_card_number.as_deref()),
            pincode: clean_pincode(s.pincode.as_deref()),
            ..s
        })
        .collect();

    property.pincode = clean_pincode(property.pincode.as_deref());
    property.registration_fee = None;
    property.guidance_value = None;
    property.new_ocr_reg_fee = None;

    tracing::debug!(
        buyers = buyers.len(),
        sellers = sellers.len(),
        "Data validation complete"
    );

    SaleDeed {
        buyers,
        sellers,
        property,
        document,
    }
}
