//! Process-local store

use super::point::Point;
use super::MetricStore;
use crate::error::StoreError;
use crate::types::{
    DataFilter, Measurement, SiteMetricsData, ThermalZoneData, TimeWindow, ZoneTemperature,
    MEAN_AIR_TEMPERATURE, ZONE_TAG,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

type FieldSet = HashMap<String, f64>;

/// In-memory store with InfluxDB query semantics
///
/// Points sharing measurement, tags and timestamp merge their fields, the
/// later write winning per field, as InfluxDB does.
#[derive(Default)]
pub struct MemoryStore {
    points: RwLock<Vec<Point>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored points
    pub fn len(&self) -> usize {
        self.points.read().len()
    }

    /// Whether the store holds no points
    pub fn is_empty(&self) -> bool {
        self.points.read().is_empty()
    }

    /// Copy of every stored point, in write order
    pub fn points(&self) -> Vec<Point> {
        self.points.read().clone()
    }

    /// Merge the fields of matching points keyed by `key`
    fn pivot<K, F>(&self, measurement: Measurement, window: &TimeWindow, key: F) -> BTreeMap<K, FieldSet>
    where
        K: Ord,
        F: Fn(&Point) -> Option<K>,
    {
        let mut rows: BTreeMap<K, FieldSet> = BTreeMap::new();
        for point in self.points.read().iter() {
            if point.measurement != measurement.name() || !window.contains(point.time) {
                continue;
            }
            let Some(k) = key(point) else { continue };
            let fields = rows.entry(k).or_default();
            for (name, value) in &point.fields {
                fields.insert(name.clone(), *value);
            }
        }
        rows
    }
}

#[async_trait]
impl MetricStore for MemoryStore {
    async fn write(&self, points: &[Point]) -> Result<(), StoreError> {
        for point in points {
            point.to_line_protocol()?;
        }
        self.points.write().extend_from_slice(points);
        Ok(())
    }

    async fn thermal_zones(&self, filter: &DataFilter) -> Result<Vec<ThermalZoneData>, StoreError> {
        let rows = self.pivot(Measurement::ThermalZone, &filter.window, |p| {
            let zone = p.tag_value(ZONE_TAG)?;
            filter
                .matches_zone(zone)
                .then(|| (zone.to_string(), p.time))
        });
        Ok(rows
            .into_iter()
            .map(|((zone, time), fields)| {
                ThermalZoneData::from_fields(zone, time, |f| fields.get(f).copied())
            })
            .collect())
    }

    async fn site_metrics(&self, window: &TimeWindow) -> Result<Vec<SiteMetricsData>, StoreError> {
        let rows = self.pivot(Measurement::SiteMetrics, window, |p| Some(p.time));
        Ok(rows
            .into_iter()
            .map(|(time, fields)| SiteMetricsData::from_fields(time, |f| fields.get(f).copied()))
            .collect())
    }

    async fn zone_temperatures(
        &self,
        filter: &DataFilter,
    ) -> Result<Vec<ZoneTemperature>, StoreError> {
        let rows = self.pivot(Measurement::ThermalZone, &filter.window, |p| {
            let zone = p.tag_value(ZONE_TAG)?;
            filter
                .matches_zone(zone)
                .then(|| (p.time, zone.to_string()))
        });
        Ok(rows
            .into_iter()
            .filter_map(|((time, zone_id), fields): ((DateTime<Utc>, String), FieldSet)| {
                Some(ZoneTemperature {
                    time,
                    zone_id,
                    value: *fields.get(MEAN_AIR_TEMPERATURE)?,
                })
            })
            .collect())
    }

    async fn delete_all(&self) -> Result<(), StoreError> {
        self.points.write().retain(|p| Measurement::from_name(&p.measurement).is_none());
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
