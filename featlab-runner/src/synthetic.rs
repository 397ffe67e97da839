//! Deterministic synthetic row assembler.
//!
//! Stands in for a real provider in demos and tests: every value is
//! derived from a blake3 hash of the ticker, date and feature name, so
//! two runs over the same universe produce byte-identical tables and
//! the idempotence of the store is observable end to end.

use chrono::{Datelike, NaiveDate};

use featlab_core::assemble::{AssembleError, AssembledRow, RowAssembler};
use featlab_core::{FeatureRow, StaticRow, Ticker};

const SECTORS: [&str; 4] = ["tech", "energy", "health", "finance"];

/// Hash-derived value in [0, 1).
fn unit(ticker: &Ticker, as_of: NaiveDate, feature: &str) -> f64 {
    let key = format!("{ticker}|{as_of}|{feature}");
    let hash = blake3::hash(key.as_bytes());
    let bytes: [u8; 8] = hash.as_bytes()[..8].try_into().unwrap_or([0u8; 8]);
    u64::from_le_bytes(bytes) as f64 / (u64::MAX as f64 + 1.0)
}

fn scaled(ticker: &Ticker, as_of: NaiveDate, feature: &str, lo: f64, hi: f64) -> f64 {
    lo + unit(ticker, as_of, feature) * (hi - lo)
}

/// Synthetic assembler: deterministic fundamentals per (ticker, date).
///
/// Each ticker gets a hash-derived listing year; snapshot dates before
/// it report insufficient history, so skip accounting is exercised
/// without a real data gap.
#[derive(Debug, Default)]
pub struct SyntheticAssembler;

impl SyntheticAssembler {
    fn listing_year(ticker: &Ticker) -> i32 {
        let hash = blake3::hash(ticker.as_str().as_bytes());
        2015 + i32::from(hash.as_bytes()[0] % 6)
    }

    fn sector(ticker: &Ticker) -> &'static str {
        let hash = blake3::hash(ticker.as_str().as_bytes());
        SECTORS[usize::from(hash.as_bytes()[1]) % SECTORS.len()]
    }
}

impl RowAssembler for SyntheticAssembler {
    fn assemble(
        &mut self,
        ticker: &Ticker,
        as_of: NaiveDate,
    ) -> Result<AssembledRow, AssembleError> {
        if as_of.year() < Self::listing_year(ticker) {
            return Err(AssembleError::InsufficientHistory {
                ticker: ticker.clone(),
                as_of,
            });
        }

        let mut row = FeatureRow::new(ticker.clone(), as_of);
        let fcf = scaled(ticker, as_of, "free_cash_flow", -200.0, 4000.0);
        let ebitda = scaled(ticker, as_of, "ebitda", -100.0, 6000.0);
        let cover = scaled(ticker, as_of, "ebit_interest_cover", 0.0, 30.0);
        row.set("free_cash_flow", fcf);
        row.set("ebitda", ebitda);
        row.set("pe_ratio", scaled(ticker, as_of, "pe_ratio", 4.0, 45.0));
        row.set(
            "dividend_yield",
            scaled(ticker, as_of, "dividend_yield", 0.0, 0.06),
        );
        row.set("pfcf_ratio", scaled(ticker, as_of, "pfcf_ratio", 2.0, 80.0));
        row.set(
            "net_debt_to_ebitda",
            scaled(ticker, as_of, "net_debt_to_ebitda", -2.0, 8.0),
        );
        row.set("ebit_interest_cover", cover);
        row.set("ebit_interest_cover_capped", cover.min(20.0));

        let sector = Self::sector(ticker);
        let mut static_row = StaticRow::new(ticker.clone());
        static_row.set("company_name", format!("{ticker} Holdings"));
        static_row.set(format!("sector_{sector}").as_str(), 1i64);
        static_row.set("country_US", 1i64);

        Ok(AssembledRow {
            dynamic: row,
            static_row: Some(static_row),
            sector: Some(sector.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, 12, 31).unwrap()
    }

    #[test]
    fn rows_are_deterministic() {
        let mut a = SyntheticAssembler;
        let mut b = SyntheticAssembler;
        let t = Ticker::new("AAPL");
        let x = a.assemble(&t, date(2022)).unwrap();
        let y = b.assemble(&t, date(2022)).unwrap();
        assert_eq!(x.dynamic, y.dynamic);
        assert_eq!(x.static_row, y.static_row);
    }

    #[test]
    fn pre_listing_dates_report_insufficient_history() {
        let mut a = SyntheticAssembler;
        let t = Ticker::new("AAPL");
        let first = SyntheticAssembler::listing_year(&t);
        let err = a.assemble(&t, date(first - 1)).unwrap_err();
        assert!(matches!(err, AssembleError::InsufficientHistory { .. }));
        assert!(a.assemble(&t, date(first)).is_ok());
    }

    #[test]
    fn rows_satisfy_the_output_contract() {
        let mut a = SyntheticAssembler;
        let t = Ticker::new("MSFT");
        let first = SyntheticAssembler::listing_year(&t);
        let out = a.assemble(&t, date(first + 1)).unwrap();
        out.check_contract(&t, date(first + 1)).unwrap();
        assert!(out.static_row.is_some());
    }
}
