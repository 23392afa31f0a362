//! Outdoor/indoor temperature timeline for `GET /temperatures/`

use super::types::{IndoorTemps, TimestepTemperature};
use crate::types::{SiteMetricsData, ZoneTemperature};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Merge site rows and zone readings into one entry per timestamp
///
/// Timestamps are the union of both inputs in ascending order. A timestamp
/// with no zone reading gets `indoor_temps: None`; with `aggregate` the zone
/// readings collapse to their mean.
pub fn build_timeline(
    site: &[SiteMetricsData],
    indoor: &[ZoneTemperature],
    aggregate: bool,
) -> Vec<TimestepTemperature> {
    let mut outdoor: BTreeMap<DateTime<Utc>, Option<f64>> = BTreeMap::new();
    for row in site {
        outdoor.insert(row.time, row.outdoor_air_temp);
    }

    let mut zones: BTreeMap<DateTime<Utc>, BTreeMap<String, f64>> = BTreeMap::new();
    for reading in indoor {
        zones
            .entry(reading.time)
            .or_default()
            .insert(reading.zone_id.clone(), reading.value);
    }

    let mut times: Vec<DateTime<Utc>> = outdoor.keys().chain(zones.keys()).copied().collect();
    times.sort_unstable();
    times.dedup();

    times
        .into_iter()
        .map(|time| TimestepTemperature {
            time,
            outdoor_temp: outdoor.get(&time).copied().flatten(),
            indoor_temps: zones.remove(&time).and_then(|readings| {
                if aggregate {
                    mean(readings.values().copied()).map(IndoorTemps::Mean)
                } else {
                    Some(IndoorTemps::Zones(readings))
                }
            }),
        })
        .collect()
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (count > 0).then(|| sum / count as f64)
}
