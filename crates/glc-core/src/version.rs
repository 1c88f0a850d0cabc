//! Deterministic row-version hash.
//!
//! `version` is the first 8 bytes (big-endian) of SHA-256 over the canonical
//! preimage
//!
//! ```text
//! {timestamp_us}{open}{high}{low}{close}{volume}{symbol}{timeframe}{instrument_type}
//! ```
//!
//! with decimals in canonical text (see `decimal::canonical`). The database
//! engine keeps the highest version per identity, so equal content from any
//! source (bulk archive, REST, a re-ingestion) converges to the same
//! logical row. Source metadata (`data_source`), the futures-only
//! `funding_rate`, trade counts and the derived volume fields are excluded on
//! purpose: they must never fork identity.
//!
//! The preimage format is locked by test vectors below. Changing it silently
//! splits every row in every shared database; do not touch it without a
//! migration plan.

use sha2::{Digest, Sha256};

use crate::bar::Bar;
use crate::decimal::canonical;

/// Compute the version hash for a bar's content fields.
pub fn bar_version(bar: &Bar) -> u64 {
    let preimage = format!(
        "{}{}{}{}{}{}{}{}{}",
        bar.timestamp_micros,
        canonical(&bar.open),
        canonical(&bar.high),
        canonical(&bar.low),
        canonical(&bar.close),
        canonical(&bar.volume),
        bar.symbol,
        bar.timeframe.as_str(),
        bar.instrument_type.as_str(),
    );
    let digest = Sha256::digest(preimage.as_bytes());
    u64::from_be_bytes(digest[..8].try_into().expect("sha256 digest is 32 bytes"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bar::{DataSource, InstrumentType};
    use crate::timeframe::Timeframe;
    use rust_decimal::Decimal;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn btc_bar() -> Bar {
        let ts = 1_704_067_200_000_000_i64;
        Bar {
            timestamp_micros: ts,
            close_time_micros: Timeframe::H1.close_time_micros(ts),
            symbol: "BTCUSDT".into(),
            timeframe: Timeframe::H1,
            instrument_type: InstrumentType::Spot,
            data_source: DataSource::Bulk,
            open: dec("42000.1"),
            high: dec("42100.5"),
            low: dec("41900"),
            close: dec("42050.25"),
            volume: dec("123.456"),
            quote_volume: dec("5190000.12"),
            taker_buy_base: dec("60.5"),
            taker_buy_quote: dec("2544000"),
            number_of_trades: 9876,
            funding_rate: None,
            version: 0,
        }
    }

    /// Locked vector: sha256("170406720000000042000.142100.54190042050.25
    /// 123.456BTCUSDT1hspot")[..8] big-endian. If this test fails, the
    /// preimage format changed; see the module docs before "fixing" it.
    #[test]
    fn hash_stability_vector_spot() {
        assert_eq!(bar_version(&btc_bar()), 0xc7d4_d5b6_4ebb_adb1);
    }

    #[test]
    fn hash_stability_vector_futures_month() {
        let ts = 1_706_745_600_000_000_i64; // 2024-02-01T00:00:00Z
        let bar = Bar {
            timestamp_micros: ts,
            close_time_micros: Timeframe::Mo1.close_time_micros(ts),
            symbol: "ETHUSDT".into(),
            timeframe: Timeframe::Mo1,
            instrument_type: InstrumentType::FuturesPerp,
            data_source: DataSource::Rest,
            open: dec("100"),
            high: dec("101.5"),
            low: dec("99.25"),
            close: dec("100.75"),
            volume: dec("0"),
            quote_volume: dec("0"),
            taker_buy_base: dec("0"),
            taker_buy_quote: dec("0"),
            number_of_trades: 0,
            funding_rate: Some(dec("0.0001")),
            version: 0,
        };
        assert_eq!(bar_version(&bar), 0x7a85_1cad_696c_3c65);
    }

    #[test]
    fn source_metadata_does_not_fork_identity() {
        let a = btc_bar();
        let mut b = btc_bar();
        b.data_source = DataSource::Rest;
        b.number_of_trades = 1;
        b.quote_volume = dec("9999");
        b.taker_buy_base = dec("1");
        b.taker_buy_quote = dec("2");
        assert_eq!(bar_version(&a), bar_version(&b));
    }

    #[test]
    fn trailing_zero_renderings_converge() {
        let a = btc_bar();
        let mut b = btc_bar();
        b.open = dec("42000.10000000");
        b.low = dec("41900.000");
        assert_eq!(bar_version(&a), bar_version(&b));
    }

    #[test]
    fn content_change_changes_version() {
        let a = btc_bar();
        let mutations: [fn(&mut Bar); 5] = [
            |b| b.open = "42000.2".parse().unwrap(),
            |b| b.timestamp_micros += 3_600_000_000,
            |b| b.symbol = "ETHUSDT".into(),
            |b| b.timeframe = Timeframe::H2,
            |b| b.instrument_type = InstrumentType::FuturesPerp,
        ];
        for mutate in mutations {
            let mut b = btc_bar();
            mutate(&mut b);
            assert_ne!(bar_version(&a), bar_version(&b));
        }
    }
}
