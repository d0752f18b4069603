use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::DatabaseError;
use crate::models::*;
use crate::pipeline::validation::{calculate_guidance_value, format_amount};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn now_timestamp() -> String {
    chrono::Local::now().naive_local().format(TIMESTAMP_FORMAT).to_string()
}

fn parse_timestamp(field: &str, value: String) -> Result<NaiveDateTime, DatabaseError> {
    NaiveDateTime::parse_from_str(&value, TIMESTAMP_FORMAT)
        .map_err(|_| DatabaseError::InvalidTimestamp {
            field: field.to_string(),
            value,
        })
}

// ═══════════════════════════════════════════
// Writes
// ═══════════════════════════════════════════

/// Insert or replace everything stored for `document_id`.
///
/// Document and property rows are updated in place (keeping `created_at`);
/// buyers and sellers are deleted and re-inserted. Runs in one transaction.
pub fn upsert_deed(
    conn: &mut Connection,
    document_id: &str,
    deed: &SaleDeed,
) -> Result<(), DatabaseError> {
    let now = now_timestamp();
    let tx = conn.transaction()?;

    tx.execute(
        "INSERT INTO document_details (document_id, transaction_date, registration_office,
         created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)
         ON CONFLICT(document_id) DO UPDATE SET
            transaction_date = excluded.transaction_date,
            registration_office = excluded.registration_office,
            updated_at = excluded.updated_at",
        params![
            document_id,
            deed.document.transaction_date,
            deed.document.registration_office,
            now,
        ],
    )?;

    let p = &deed.property;
    tx.execute(
        "INSERT INTO property_details (document_id, schedule_b_area, schedule_c_property_name,
         schedule_c_property_address, schedule_c_property_area, paid_in_cash_mode, pincode, state,
         sale_consideration, stamp_duty_fee, registration_fee, guidance_value, new_ocr_reg_fee)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
         ON CONFLICT(document_id) DO UPDATE SET
            schedule_b_area = excluded.schedule_b_area,
            schedule_c_property_name = excluded.schedule_c_property_name,
            schedule_c_property_address = excluded.schedule_c_property_address,
            schedule_c_property_area = excluded.schedule_c_property_area,
            paid_in_cash_mode = excluded.paid_in_cash_mode,
            pincode = excluded.pincode,
            state = excluded.state,
            sale_consideration = excluded.sale_consideration,
            stamp_duty_fee = excluded.stamp_duty_fee,
            registration_fee = excluded.registration_fee,
            guidance_value = excluded.guidance_value,
            new_ocr_reg_fee = excluded.new_ocr_reg_fee",
        params![
            document_id,
            p.schedule_b_area,
            p.schedule_c_property_name,
            p.schedule_c_property_address,
            p.schedule_c_property_area,
            p.paid_in_cash_mode,
            p.pincode,
            p.state,
            p.sale_consideration,
            p.stamp_duty_fee,
            p.registration_fee,
            p.guidance_value,
            p.new_ocr_reg_fee,
        ],
    )?;

    tx.execute("DELETE FROM buyer_details WHERE document_id = ?1", params![document_id])?;
    for b in &deed.buyers {
        tx.execute(
            "INSERT INTO buyer_details (document_id, name, gender, aadhaar_number, pan_card_number,
             address, pincode, state, phone_number, secondary_phone_number, email)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                document_id,
                b.name,
                b.gender,
                b.aadhaar_number,
                b.pan_card_number,
                b.address,
                b.pincode,
                b.state,
                b.phone_number,
                b.secondary_phone_number,
                b.email,
            ],
        )?;
    }

    tx.execute("DELETE FROM seller_details WHERE document_id = ?1", params![document_id])?;
    for s in &deed.sellers {
        tx.execute(
            "INSERT INTO seller_details (document_id, name, gender, aadhaar_number, pan_card_number,
             address, pincode, state, phone_number, secondary_phone_number, email, property_share)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                document_id,
                s.name,
                s.gender,
                s.aadhaar_number,
                s.pan_card_number,
                s.address,
                s.pincode,
                s.state,
                s.phone_number,
                s.secondary_phone_number,
                s.email,
                s.property_share,
            ],
        )?;
    }

    tx.commit()?;
    tracing::debug!(
        document_id,
        buyers = deed.buyers.len(),
        sellers = deed.sellers.len(),
        "Deed saved"
    );
    Ok(())
}

/// Set the registration fee and its guidance value on an existing deed.
pub fn update_registration_fee(
    conn: &mut Connection,
    document_id: &str,
    fee: f64,
) -> Result<(), DatabaseError> {
    let now = now_timestamp();
    let tx = conn.transaction()?;

    let touched = tx.execute(
        "UPDATE document_details SET updated_at = ?2 WHERE document_id = ?1",
        params![document_id, now],
    )?;
    if touched == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "Deed".into(),
            id: document_id.to_string(),
        });
    }

    tx.execute(
        "INSERT INTO property_details (document_id, registration_fee, guidance_value)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(document_id) DO UPDATE SET
            registration_fee = excluded.registration_fee,
            guidance_value = excluded.guidance_value",
        params![
            document_id,
            format_amount(fee),
            format_amount(calculate_guidance_value(fee)),
        ],
    )?;

    tx.commit()?;
    Ok(())
}

// ═══════════════════════════════════════════
// Reads
// ═══════════════════════════════════════════

pub fn document_exists(conn: &Connection, document_id: &str) -> Result<bool, DatabaseError> {
    let found = conn
        .query_row(
            "SELECT 1 FROM document_details WHERE document_id = ?1",
            params![document_id],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn list_document_ids(conn: &Connection) -> Result<Vec<String>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT document_id FROM document_details ORDER BY document_id")?;
    let ids = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// Everything stored for one deed, or `None` if it was never saved.
pub fn get_deed(
    conn: &Connection,
    document_id: &str,
) -> Result<Option<SaleDeedRecord>, DatabaseError> {
    let header = conn
        .query_row(
            "SELECT transaction_date, registration_office, created_at, updated_at
             FROM document_details WHERE document_id = ?1",
            params![document_id],
            |row| {
                Ok((
                    DocumentDetails {
                        transaction_date: row.get(0)?,
                        registration_office: row.get(1)?,
                    },
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        )
        .optional()?;

    let Some((document, created_at, updated_at)) = header else {
        return Ok(None);
    };

    let property = conn
        .query_row(
            "SELECT schedule_b_area, schedule_c_property_name, schedule_c_property_address,
             schedule_c_property_area, paid_in_cash_mode, pincode, state, sale_consideration,
             stamp_duty_fee, registration_fee, guidance_value, new_ocr_reg_fee
             FROM property_details WHERE document_id = ?1",
            params![document_id],
            property_from_row,
        )
        .optional()?
        .unwrap_or_default();

    let mut stmt = conn.prepare(
        "SELECT name, gender, aadhaar_number, pan_card_number, address, pincode, state,
         phone_number, secondary_phone_number, email
         FROM buyer_details WHERE document_id = ?1 ORDER BY id",
    )?;
    let buyers = stmt
        .query_map(params![document_id], |row| {
            Ok(BuyerDetail {
                name: row.get(0)?,
                gender: row.get(1)?,
                aadhaar_number: row.get(2)?,
                pan_card_number: row.get(3)?,
                address: row.get(4)?,
                pincode: row.get(5)?,
                state: row.get(6)?,
                phone_number: row.get(7)?,
                secondary_phone_number: row.get(8)?,
                email: row.get(9)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(
        "SELECT name, gender, aadhaar_number, pan_card_number, address, pincode, state,
         phone_number, secondary_phone_number, email, property_share
         FROM seller_details WHERE document_id = ?1 ORDER BY id",
    )?;
    let sellers = stmt
        .query_map(params![document_id], |row| {
            Ok(SellerDetail {
                name: row.get(0)?,
                gender: row.get(1)?,
                aadhaar_number: row.get(2)?,
                pan_card_number: row.get(3)?,
                address: row.get(4)?,
                pincode: row.get(5)?,
                state: row.get(6)?,
                phone_number: row.get(7)?,
                secondary_phone_number: row.get(8)?,
                email: row.get(9)?,
                property_share: row.get(10)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(SaleDeedRecord {
        document_id: document_id.to_string(),
        created_at: parse_timestamp("created_at", created_at)?,
        updated_at: parse_timestamp("updated_at", updated_at)?,
        deed: SaleDeed {
            buyers,
            sellers,
            property,
            document,
        },
    }))
}

fn property_from_row(row: &Row<'_>) -> rusqlite::Result<PropertyDetails> {
    Ok(PropertyDetails {
        schedule_b_area: row.get(0)?,
        schedule_c_property_name: row.get(1)?,
        schedule_c_property_address: row.get(2)?,
        schedule_c_property_area: row.get(3)?,
        paid_in_cash_mode: row.get(4)?,
        pincode: row.get(5)?,
        state: row.get(6)?,
        sale_consideration: row.get(7)?,
        stamp_duty_fee: row.get(8)?,
        registration_fee: row.get(9)?,
        guidance_value: row.get(10)?,
        new_ocr_reg_fee: row.get(11)?,
    })
}
