//! InfluxDB v2 HTTP backend

use super::annotated::{parse_annotated_csv, FluxRecord};
use super::flux;
use super::point::{to_line_protocol_batch, Point};
use super::{
    sort_site, sort_temperatures, sort_thermal, MetricStore, DELETE_RANGE_START,
    DELETE_RANGE_STOP,
};
use crate::config::InfluxConfig;
use crate::error::{ConfigError, StoreError};
use crate::types::{
    DataFilter, Measurement, SiteMetricsData, ThermalZoneData, TimeWindow, ZoneTemperature,
    ZONE_TAG,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Flux query request body
#[derive(Serialize)]
struct QueryRequest<'a> {
    query: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    dialect: Dialect,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Dialect {
    header: bool,
    annotations: [&'static str; 3],
    delimiter: &'static str,
    date_time_format: &'static str,
}

impl Default for Dialect {
    fn default() -> Self {
        Self {
            header: true,
            annotations: ["datatype", "group", "default"],
            delimiter: ",",
            date_time_format: "RFC3339",
        }
    }
}

/// Delete request body
#[derive(Serialize)]
struct DeleteRequest<'a> {
    start: &'a str,
    stop: &'a str,
    predicate: String,
}

/// Error body returned by the InfluxDB API
#[derive(Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// Store backed by the InfluxDB v2 HTTP API
pub struct InfluxStore {
    client: reqwest::Client,
    url: String,
    token: String,
    org: String,
    bucket: String,
}

impl InfluxStore {
    /// Create a client; no request is made until first use
    pub fn new(config: &InfluxConfig) -> Result<Self, ConfigError> {
        let token = config
            .token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or(ConfigError::Missing("influx.token (or INFLUXDB_TOKEN)"))?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ConfigError::Invalid {
                field: "influx",
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            token,
            org: config.org.clone(),
            bucket: config.bucket.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.url, path)
    }

    fn authorization(&self) -> String {
        format!("Token {}", self.token)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, StoreError> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                StoreError::Timeout
            } else {
                StoreError::Request(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .map(|b| b.message)
            .unwrap_or_else(|_| {
                if body.is_empty() {
                    status.canonical_reason().unwrap_or("request failed").to_string()
                } else {
                    body
                }
            });
        Err(StoreError::Api {
            status: status.as_u16(),
            message,
        })
    }

    /// Run a Flux query and decode the annotated CSV response
    pub async fn query(&self, query: &str) -> Result<Vec<FluxRecord>, StoreError> {
        debug!(query = %query, "Running Flux query");
        let request = self
            .client
            .post(self.endpoint("/api/v2/query"))
            .query(&[("org", self.org.as_str())])
            .header("Authorization", self.authorization())
            .header("Accept", "application/csv")
            .json(&QueryRequest {
                query,
                kind: "flux",
                dialect: Dialect::default(),
            });

        let body = self
            .send(request)
            .await?
            .text()
            .await
            .map_err(|e| StoreError::Decode(format!("failed to read query response: {e}")))?;
        parse_annotated_csv(&body)
    }

    async fn delete_measurement(&self, measurement: Measurement) -> Result<(), StoreError> {
        let request = self
            .client
            .post(self.endpoint("/api/v2/delete"))
            .query(&[("org", self.org.as_str()), ("bucket", self.bucket.as_str())])
            .header("Authorization", self.authorization())
            .json(&DeleteRequest {
                start: DELETE_RANGE_START,
                stop: DELETE_RANGE_STOP,
                predicate: flux::delete_predicate(measurement),
            });
        self.send(request).await?;
        Ok(())
    }
}

#[async_trait]
impl MetricStore for InfluxStore {
    async fn write(&self, points: &[Point]) -> Result<(), StoreError> {
        if points.is_empty() {
            return Ok(());
        }
        let body = to_line_protocol_batch(points)?;
        let request = self
            .client
            .post(self.endpoint("/api/v2/write"))
            .query(&[
                ("org", self.org.as_str()),
                ("bucket", self.bucket.as_str()),
                ("precision", "ns"),
            ])
            .header("Authorization", self.authorization())
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(body);
        self.send(request).await?;
        debug!(points = points.len(), "Wrote points to InfluxDB");
        Ok(())
    }

    async fn thermal_zones(&self, filter: &DataFilter) -> Result<Vec<ThermalZoneData>, StoreError> {
        let records = self.query(&flux::thermal_zone_query(&self.bucket, filter)).await?;
        let mut rows: Vec<ThermalZoneData> = records
            .iter()
            .filter_map(|record| {
                let (Some(zone), Some(time)) = (record.str(ZONE_TAG), record.time()) else {
                    warn!("Skipping thermal zone record without zone_id or _time");
                    return None;
                };
                Some(ThermalZoneData::from_fields(zone.to_string(), time, |f| record.f64(f)))
            })
            .collect();
        sort_thermal(&mut rows);
        Ok(rows)
    }

    async fn site_metrics(&self, window: &TimeWindow) -> Result<Vec<SiteMetricsData>, StoreError> {
        let records = self.query(&flux::site_metrics_query(&self.bucket, window)).await?;
        let mut rows: Vec<SiteMetricsData> = records
            .iter()
            .filter_map(|record| {
                let time = record.time()?;
                Some(SiteMetricsData::from_fields(time, |f| record.f64(f)))
            })
            .collect();
        sort_site(&mut rows);
        Ok(rows)
    }

    async fn zone_temperatures(
        &self,
        filter: &DataFilter,
    ) -> Result<Vec<ZoneTemperature>, StoreError> {
        let records = self
            .query(&flux::zone_temperature_query(&self.bucket, filter))
            .await?;
        let mut rows: Vec<ZoneTemperature> = records
            .iter()
            .filter_map(|record| {
                Some(ZoneTemperature {
                    time: record.time()?,
                    zone_id: record.str(ZONE_TAG)?.to_string(),
                    value: record.value()?,
                })
            })
            .collect();
        sort_temperatures(&mut rows);
        Ok(rows)
    }

    async fn delete_all(&self) -> Result<(), StoreError> {
        for measurement in Measurement::all() {
            self.delete_measurement(*measurement).await?;
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.send(self.client.get(self.endpoint("/health"))).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "influxdb"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use mockito::Matcher;

    fn store_for(url: String) -> InfluxStore {
        InfluxStore::new(&InfluxConfig {
            url,
            token: Some("secret".into()),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_new_requires_token() {
        let result = InfluxStore::new(&InfluxConfig::default());
        assert!(matches!(result, Err(ConfigError::Missing(_))));
    }

    #[tokio::test]
    async fn test_write_sends_line_protocol() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v2/write")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("org".into(), "gp2".into()),
                Matcher::UrlEncoded("bucket".into(), "gp2".into()),
                Matcher::UrlEncoded("precision".into(), "ns".into()),
            ]))
            .match_header("authorization", "Token secret")
            .match_body("site_metrics outdoor_air_temp=-2.5 1104541200000000000")
            .with_status(204)
            .create_async()
            .await;

        let store = store_for(server.url());
        let point = Point::new("site_metrics")
            .field("outdoor_air_temp", -2.5)
            .time(Utc.with_ymd_and_hms(2005, 1, 1, 1, 0, 0).unwrap());
        store.write(&[point]).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_write_error_uses_api_message() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/v2/write")
            .match_query(Matcher::Any)
            .with_status(401)
            .with_body(r#"{"code":"unauthorized","message":"unauthorized access"}"#)
            .create_async()
            .await;

        let store = store_for(server.url());
        let point = Point::new("site_metrics").field("outdoor_air_temp", 1.0);
        let err = store.write(&[point]).await.unwrap_err();
        match err {
            StoreError::Api { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "unauthorized access");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_thermal_zones_decodes_and_sorts() {
        let body = "\
#datatype,string,long,dateTime:RFC3339,string,double,double
#group,false,false,false,true,false,false
#default,_result,,,,,
,result,table,_time,zone_id,mean_air_temperature,thermal_comfort_pmv
,,0,2005-01-01T02:00:00Z,BLOCK2:CORRIDOR:X1F,20.5,
,,0,2005-01-01T01:00:00Z,BLOCK2:CORRIDOR:X1F,20.25,-0.5

#datatype,string,long,dateTime:RFC3339,string,double,double
#group,false,false,false,true,false,false
#default,_result,,,,,
,result,table,_time,zone_id,mean_air_temperature,thermal_comfort_pmv
,,1,2005-01-01T01:00:00Z,BLOCK1:CORRIDOR:X1F,19.0,0.1
";
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v2/query")
            .match_query(Matcher::UrlEncoded("org".into(), "gp2".into()))
            .match_body(Matcher::PartialJson(serde_json::json!({"type": "flux"})))
            .with_status(200)
            .with_header("content-type", "text/csv")
            .with_body(body)
            .create_async()
            .await;

        let store = store_for(server.url());
        let rows = store.thermal_zones(&DataFilter::default()).await.unwrap();
        mock.assert_async().await;

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].zone_id, "BLOCK1:CORRIDOR:X1F");
        assert_eq!(rows[1].zone_id, "BLOCK2:CORRIDOR:X1F");
        assert_eq!(rows[1].mean_air_temperature, Some(20.25));
        assert_eq!(rows[1].thermal_comfort_pmv, Some(-0.5));
        assert_eq!(rows[2].thermal_comfort_pmv, None);
        assert_eq!(rows[2].operative_temperature, None);
    }

    #[tokio::test]
    async fn test_zone_temperatures() {
        let body = "\
#datatype,string,long,dateTime:RFC3339,double,string
,result,table,_time,_value,zone_id
,,0,2005-01-01T01:00:00Z,21,BLOCK1:OFFICEXSW:X1F
,,1,2005-01-01T01:00:00Z,19,BLOCK1:CORRIDOR:X1F
";
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/v2/query")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;

        let rows = store_for(server.url())
            .zone_temperatures(&DataFilter::default())
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].zone_id, "BLOCK1:CORRIDOR:X1F");
        assert_eq!(rows[0].value, 19.0);
    }

    #[tokio::test]
    async fn test_delete_all_clears_both_measurements() {
        let mut server = mockito::Server::new_async().await;
        let thermal = server
            .mock("POST", "/api/v2/delete")
            .match_query(Matcher::Any)
            .match_body(Matcher::PartialJson(serde_json::json!({
                "start": "1970-01-01T00:00:00Z",
                "stop": "2100-01-01T00:00:00Z",
                "predicate": "_measurement=\"thermal_zone\""
            })))
            .with_status(204)
            .create_async()
            .await;
        let site = server
            .mock("POST", "/api/v2/delete")
            .match_query(Matcher::Any)
            .match_body(Matcher::PartialJson(serde_json::json!({
                "predicate": "_measurement=\"site_metrics\""
            })))
            .with_status(204)
            .create_async()
            .await;

        store_for(server.url()).delete_all().await.unwrap();
        thermal.assert_async().await;
        site.assert_async().await;
    }

    #[tokio::test]
    async fn test_ping() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/health")
            .with_status(503)
            .create_async()
            .await;

        let err = store_for(server.url()).ping().await.unwrap_err();
        assert!(matches!(err, StoreError::Api { status: 503, .. }));
    }
}
