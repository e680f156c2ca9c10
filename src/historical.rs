use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::drivers::{DriverIdentity, DriverRegistry};
use crate::session_source::LapRecord;

/// One driver's historical session, summarized with medians.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlignedHistoricalRecord {
    pub identity: DriverIdentity,
    pub lap_time: f64,
    pub sector_times: [f64; 3],
    pub best_lap_time: f64,
    pub lap_count: usize,
    pub consistency: f64,
}

impl AlignedHistoricalRecord {
    pub fn total_sector_time(&self) -> f64 {
        self.sector_times.iter().sum()
    }
}

#[derive(Default)]
struct LapBucket {
    identity: Option<DriverIdentity>,
    laps: Vec<f64>,
    sectors: [Vec<f64>; 3],
}

fn positive(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v > 0.0)
}

fn valid_lap(lap: &LapRecord) -> Option<(f64, [f64; 3])> {
    Some((
        positive(lap.lap_time)?,
        [
            positive(lap.sector1)?,
            positive(lap.sector2)?,
            positive(lap.sector3)?,
        ],
    ))
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Groups laps by canonical driver and keeps drivers with at least one lap
/// that has a lap time and all three sectors. Output is ordered by code.
pub fn align(laps: &[LapRecord], registry: &DriverRegistry) -> Vec<AlignedHistoricalRecord> {
    let mut buckets: BTreeMap<String, LapBucket> = BTreeMap::new();
    let mut warned = HashSet::new();

    for lap in laps {
        let resolved = registry.resolve(&lap.driver);
        if let Some(warning) = &resolved.warning
            && warned.insert(warning.raw.clone())
        {
            tracing::warn!(%warning, "historical lap driver not in driver table");
        }
        let bucket = buckets.entry(resolved.identity.code.clone()).or_default();
        if bucket.identity.is_none() {
            bucket.identity = Some(resolved.identity);
        }
        let Some((lap_time, sectors)) = valid_lap(lap) else {
            continue;
        };
        bucket.laps.push(lap_time);
        for (dst, value) in bucket.sectors.iter_mut().zip(sectors) {
            dst.push(value);
        }
    }

    let mut out = Vec::with_capacity(buckets.len());
    for (code, bucket) in buckets {
        let Some(identity) = bucket.identity else {
            continue;
        };
        let (Some(lap_time), Some(s1), Some(s2), Some(s3)) = (
            median(&bucket.laps),
            median(&bucket.sectors[0]),
            median(&bucket.sectors[1]),
            median(&bucket.sectors[2]),
        ) else {
            tracing::debug!(%code, "no valid laps in historical session, dropping driver");
            continue;
        };
        let best_lap_time = bucket.laps.iter().copied().fold(f64::INFINITY, f64::min);
        out.push(AlignedHistoricalRecord {
            identity,
            lap_time,
            sector_times: [s1, s2, s3],
            best_lap_time,
            lap_count: bucket.laps.len(),
            consistency: lap_time - best_lap_time,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lap(driver: &str, lap_time: Option<f64>, s: [Option<f64>; 3]) -> LapRecord {
        LapRecord {
            driver: driver.to_string(),
            lap_time,
            sector1: s[0],
            sector2: s[1],
            sector3: s[2],
        }
    }

    #[test]
    fn medians_per_driver_ordered_by_code() {
        let laps = vec![
            lap("VER", Some(90.0), [Some(30.0), Some(30.0), Some(30.0)]),
            lap("VER", Some(92.0), [Some(31.0), Some(30.5), Some(30.5)]),
            lap("VER", Some(100.0), [Some(33.0), Some(33.0), Some(34.0)]),
            lap("Lando Norris", Some(91.0), [Some(30.0), Some(31.0), Some(30.0)]),
        ];
        let aligned = align(&laps, DriverRegistry::global());
        let codes: Vec<&str> = aligned.iter().map(|r| r.identity.code.as_str()).collect();
        assert_eq!(codes, vec!["NOR", "VER"]);

        let ver = &aligned[1];
        assert_eq!(ver.lap_time, 92.0);
        assert_eq!(ver.sector_times, [31.0, 30.5, 30.5]);
        assert_eq!(ver.best_lap_time, 90.0);
        assert_eq!(ver.lap_count, 3);
        assert_eq!(ver.consistency, 2.0);
        assert_eq!(ver.total_sector_time(), 92.0);
    }

    #[test]
    fn invalid_laps_are_skipped_and_empty_drivers_dropped() {
        let laps = vec![
            lap("HAM", None, [Some(30.0), Some(30.0), Some(30.0)]),
            lap("HAM", Some(91.0), [Some(30.0), None, Some(30.0)]),
            lap("LEC", Some(f64::NAN), [Some(30.0), Some(30.0), Some(30.0)]),
            lap("LEC", Some(89.5), [Some(29.0), Some(30.0), Some(30.5)]),
        ];
        let aligned = align(&laps, DriverRegistry::global());
        assert_eq!(aligned.len(), 1);
        assert_eq!(aligned[0].identity.code, "LEC");
        assert_eq!(aligned[0].lap_count, 1);
    }

    #[test]
    fn unmapped_drivers_keep_raw_key() {
        let laps = vec![lap("99", Some(95.0), [Some(31.0), Some(32.0), Some(32.0)])];
        let aligned = align(&laps, DriverRegistry::global());
        assert_eq!(aligned[0].identity.code, "99");
        assert_eq!(aligned[0].identity.team, "Unknown");
    }

    #[test]
    fn median_even_and_empty() {
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&[]), None);
    }
}
