pub const SALE_DEED_SYSTEM_PROMPT: &str = r#"
You extract structured data from Indian property sale deeds. The input is OCR
text, often mixed Kannada and English, and may contain recognition errors.

RULES:
1. Extract ONLY what the document states. Use null for anything missing.
2. Preserve names and addresses exactly as written.
3. List every buyer and every seller; multiple parties go in arrays.
4. Areas are in square feet; convert square metres when needed.
5. The property pincode comes ONLY from the Schedule C property description.
6. paid_in_cash_mode is the cash portion of the consideration, or null when
   no explicit cash payment is mentioned.
7. Answer with a single JSON object and nothing else.
"#;

const SCHEMA: &str = r#"{
  "buyer_details": [
    {"name": null, "gender": null, "aadhaar_number": null, "pan_card_number": null,
     "address": null, "pincode": null, "state": null, "phone_number": null,
     "secondary_phone_number": null, "email": null}
  ],
  "seller_details": [
    {"name": null, "gender": null, "aadhaar_number": null, "pan_card_number": null,
     "address": null, "pincode": null, "state": null, "phone_number": null,
     "secondary_phone_number": null, "email": null, "property_share": null}
  ],
  "property_details": {
    "schedule_b_area": null, "schedule_c_property_name": null,
    "schedule_c_property_address": null, "schedule_c_property_area": null,
    "paid_in_cash_mode": null, "pincode": null, "state": null,
    "sale_consideration": null, "stamp_duty_fee": null, "registration_fee": null
  },
  "document_details": {"transaction_date": null, "registration_office": null}
}"#;

/// Build the extraction prompt for one deed.
pub fn build_extraction_prompt(ocr_text: &str) -> String {
    format!(
        "<document>\n{ocr_text}\n</document>\n\n\
         Fill this JSON structure from the document above:\n\n{SCHEMA}"
    )
}

pub const VISION_FEE_PROMPT: &str = r#"This image is a cropped fee table from an Indian registration receipt, printed in Kannada and English.
The first row is the Registration Fee (ನೋಂದಣಿ ಶುಲ್ಕ). Later rows are small charges and the last row is the total.

Return ONLY this JSON object:
{"registration_fee": <first-row amount as a number, no currency symbol>}

If the registration fee cannot be read, return:
{"registration_fee": null}"#;
