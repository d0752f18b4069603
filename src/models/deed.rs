use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::lenient;

/// One buyer as read from the deed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuyerDetail {
    #[serde(deserialize_with = "lenient::string")]
    pub name: Option<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub gender: Option<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub aadhaar_number: Option<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub pan_card_number: Option<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub address: Option<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub pincode: Option<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub state: Option<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub phone_number: Option<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub secondary_phone_number: Option<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub email: Option<String>,
}

/// One seller. Same identity fields as a buyer plus the share being sold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SellerDetail {
    #[serde(deserialize_with = "lenient::string")]
    pub name: Option<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub gender: Option<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub aadhaar_number: Option<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub pan_card_number: Option<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub address: Option<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub pincode: Option<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub state: Option<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub phone_number: Option<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub secondary_phone_number: Option<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub email: Option<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub property_share: Option<String>,
}

/// Property schedule and the money columns.
///
/// Amounts are kept as display strings (`"28000"`, `"1250.50"`) because that
/// is how they are stored and exported.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PropertyDetails {
    /// Square feet.
    #[serde(deserialize_with = "lenient::number")]
    pub schedule_b_area: Option<f64>,
    #[serde(deserialize_with = "lenient::string")]
    pub schedule_c_property_name: Option<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub schedule_c_property_address: Option<String>,
    /// Square feet.
    #[serde(deserialize_with = "lenient::number")]
    pub schedule_c_property_area: Option<f64>,
    #[serde(deserialize_with = "lenient::string")]
    pub paid_in_cash_mode: Option<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub pincode: Option<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub state: Option<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub sale_consideration: Option<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub stamp_duty_fee: Option<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub registration_fee: Option<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub guidance_value: Option<String>,
    /// Fee read from the OCR text, kept next to the table-derived one for auditing.
    #[serde(deserialize_with = "lenient::string")]
    pub new_ocr_reg_fee: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentDetails {
    #[serde(deserialize_with = "lenient::string")]
    pub transaction_date: Option<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub registration_office: Option<String>,
}

/// Structured content of one sale deed, in the shape the extraction model returns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaleDeed {
    #[serde(rename = "buyer_details", deserialize_with = "lenient::one_or_many")]
    pub buyers: Vec<BuyerDetail>,
    #[serde(rename = "seller_details", deserialize_with = "lenient::one_or_many")]
    pub sellers: Vec<SellerDetail>,
    #[serde(rename = "property_details", deserialize_with = "lenient::object")]
    pub property: PropertyDetails,
    #[serde(rename = "document_details", deserialize_with = "lenient::object")]
    pub document: DocumentDetails,
}

impl SaleDeed {
    /// True when the model returned nothing usable at all.
    pub fn is_empty(&self) -> bool {
        self.buyers.is_empty()
            && self.sellers.is_empty()
            && self.property == PropertyDetails::default()
            && self.document == DocumentDetails::default()
    }
}

/// A persisted deed with its bookkeeping columns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaleDeedRecord {
    pub document_id: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    #[serde(flatten)]
    pub deed: SaleDeed,
}
