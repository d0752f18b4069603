//! Registration-fee heuristic over the fee table printed on pages 3–6.
//!
//! The receipt table lists the registration fee first, followed by a few
//! small miscellaneous charges and a total. On a given page:
//! - 2–5 distinct currency values → treat it as the table
//! - more than 5 → too noisy, try the next page
//! - fewer than 2 → give up

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use super::{ExtractionError, PageTextSource};
use crate::models::lenient::parse_number;

static CURRENCY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{2,7}\.\d{2}$").expect("valid currency regex"));

static FEE_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:registration\s*fee|ನೋಂದಣಿ\s*ಶುಲ್ಕ|ನೊಂದಣಿ\s*ಶುಲ್ಕ)[^\d\n]{0,40}(\d[\d,]*(?:\.\d{1,2})?)")
        .expect("valid fee label regex")
});

/// First page (1-based) searched for the fee table.
const FIRST_TABLE_PAGE: usize = 3;
/// Number of pages searched.
const TABLE_PAGE_SPAN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TableCheck {
    Valid,
    TooNoisy,
    Invalid,
}

#[derive(Debug, Clone)]
pub struct RegistrationFeeExtractor {
    threshold_pct: f64,
    max_misc_fee: f64,
    min_fee: f64,
}

impl Default for RegistrationFeeExtractor {
    fn default() -> Self {
        Self::new(0.7, 4000.0, 4000.0)
    }
}

impl RegistrationFeeExtractor {
    pub fn new(threshold_pct: f64, max_misc_fee: f64, min_fee: f64) -> Self {
        Self {
            threshold_pct,
            max_misc_fee,
            min_fee,
        }
    }

    /// Scan the table pages of `pdf`. `Ok(None)` means no plausible fee was found.
    pub fn extract(
        &self,
        source: &dyn PageTextSource,
        pdf: &Path,
    ) -> Result<Option<f64>, ExtractionError> {
        let pages = source.page_texts(pdf)?;
        let table_pages = pages
            .iter()
            .enumerate()
            .skip(FIRST_TABLE_PAGE - 1)
            .take(TABLE_PAGE_SPAN);

        for (index, text) in table_pages {
            let page = index + 1;
            let amounts = ordered_amounts(text);
            if amounts.is_empty() {
                tracing::debug!(page, "No currency values on page");
                continue;
            }

            match check_table(&amounts) {
                TableCheck::Valid => {
                    if let Some(fee) = self.post_process(&amounts) {
                        tracing::info!(page, fee, "Registration fee extracted from page table");
                        return Ok(Some(fee));
                    }
                }
                TableCheck::TooNoisy => {
                    tracing::debug!(page, values = amounts.len(), "Page too noisy, trying next");
                }
                TableCheck::Invalid => {
                    tracing::debug!(page, "Page holds no fee table, stopping");
                    break;
                }
            }
        }

        Ok(None)
    }

    /// Pick the fee from a table's values in top-to-bottom order.
    pub fn post_process(&self, values: &[f64]) -> Option<f64> {
        if values.len() < 2 {
            return None;
        }

        let first_row = values[0];
        let max = values.iter().copied().fold(f64::MIN, f64::max);

        let fee = if first_row >= self.min_fee {
            let ratio = if max != 0.0 { first_row / max } else { 0.0 };
            if ratio < self.threshold_pct {
                tracing::debug!(first_row, ratio, "Top row below total ratio, keeping it");
            }
            first_row
        } else {
            // Top row is a small charge: fee = total − other small charges.
            let misc: f64 = values
                .iter()
                .copied()
                .filter(|v| *v <= self.max_misc_fee && *v != max)
                .sum();
            max - misc
        };

        if fee < self.min_fee {
            tracing::debug!(fee, min = self.min_fee, "Computed fee below minimum, discarding");
            return None;
        }
        Some((fee * 100.0).round() / 100.0)
    }

    /// Fee printed next to a "registration fee" label in OCR text.
    pub fn extract_from_ocr_text(&self, text: &str) -> Option<f64> {
        FEE_LABEL
            .captures_iter(text)
            .filter_map(|c| c.get(1).and_then(|m| parse_number(m.as_str())))
            .find(|fee| *fee >= self.min_fee)
    }
}

/// Currency-looking tokens (`12345.00`) in reading order.
pub fn ordered_amounts(text: &str) -> Vec<f64> {
    text.split_whitespace()
        .filter_map(|token| {
            let cleaned: String = token
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.')
                .collect();
            if CURRENCY.is_match(&cleaned) {
                cleaned.parse().ok()
            } else {
                None
            }
        })
        .collect()
}

fn check_table(values: &[f64]) -> TableCheck {
    let distinct: BTreeSet<i64> = values.iter().map(|v| (v * 100.0).round() as i64).collect();
    match distinct.len() {
        2..=5 => TableCheck::Valid,
        n if n > 5 => TableCheck::TooNoisy,
        _ => TableCheck::Invalid,
    }
}
