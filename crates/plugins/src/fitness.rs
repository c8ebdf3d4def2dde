//! Google Fitness aggregate queries.
//!
//! All three capabilities issue one `users/me/dataset:aggregate` call and fold
//! the returned buckets locally. The folding functions are pure so they can be
//! checked against recorded responses.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use plugboard_core::config::ServicePluginConfig;
use plugboard_core::{CapabilityDescriptor, ParameterKind, ParameterSpec, UpstreamError};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::info;

use crate::http::ServiceClient;
use crate::{typed_handler, Capability, Plugin};

pub const PLUGIN_NAME: &str = "fitness";

pub const STEP_COUNT_DATA_TYPE: &str = "com.google.step_count.delta";
pub const ACTIVITY_SEGMENT_DATA_TYPE: &str = "com.google.activity.segment";
pub const HEART_RATE_DATA_TYPE: &str = "com.google.heart_rate.bpm";
pub const HEART_RATE_BUCKET_MILLIS: i64 = 60_000;

const NANOS_PER_MINUTE: f64 = 60.0 * 1_000_000_000.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        let start = parse_timestamp(start).context("invalid start_time")?;
        let end = parse_timestamp(end).context("invalid end_time")?;
        if end <= start {
            bail!("end_time must be after start_time");
        }
        Ok(Self { start, end })
    }

    pub fn duration_millis(&self) -> i64 {
        (self.end - self.start).num_milliseconds()
    }
}

/// RFC 3339, or an ISO-8601 date-time without offset read as UTC.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
        .with_context(|| format!("`{value}` is not an ISO-8601 timestamp"))
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateRequest {
    pub aggregate_by: Vec<AggregateBy>,
    pub bucket_by_time: BucketByTime,
    pub start_time_millis: i64,
    pub end_time_millis: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateBy {
    pub data_type_name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketByTime {
    pub duration_millis: i64,
}

impl AggregateRequest {
    pub fn new(data_type: &str, range: TimeRange, bucket_millis: i64) -> Self {
        Self {
            aggregate_by: vec![AggregateBy { data_type_name: data_type.to_string() }],
            bucket_by_time: BucketByTime { duration_millis: bucket_millis },
            start_time_millis: range.start.timestamp_millis(),
            end_time_millis: range.end.timestamp_millis(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct AggregateResponse {
    #[serde(default)]
    pub bucket: Vec<AggregateBucket>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct AggregateBucket {
    #[serde(default)]
    pub dataset: Vec<Dataset>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub point: Vec<DataPoint>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPoint {
    #[serde(default, deserialize_with = "int64")]
    pub start_time_nanos: Option<i64>,
    #[serde(default, deserialize_with = "int64")]
    pub end_time_nanos: Option<i64>,
    #[serde(default)]
    pub value: Vec<PointValue>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointValue {
    pub int_val: Option<i64>,
    pub fp_val: Option<f64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Int64Repr {
    Number(i64),
    Text(String),
}

/// Google encodes int64 fields as JSON strings; accept numbers too.
fn int64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Int64Repr>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Int64Repr::Number(value)) => Ok(Some(value)),
        Some(Int64Repr::Text(text)) => {
            text.trim().parse().map(Some).map_err(serde::de::Error::custom)
        }
    }
}

impl AggregateResponse {
    fn points(&self) -> impl Iterator<Item = &DataPoint> {
        self.bucket
            .iter()
            .flat_map(|bucket| bucket.dataset.iter())
            .flat_map(|dataset| dataset.point.iter())
    }
}

pub fn total_steps(response: &AggregateResponse) -> i64 {
    response.points().flat_map(|point| point.value.iter()).filter_map(|value| value.int_val).sum()
}

/// Minutes per activity type. The first integer value of a segment point is
/// its activity type; the duration comes from the point's own bounds.
pub fn activity_minutes(response: &AggregateResponse) -> BTreeMap<String, f64> {
    let mut minutes = BTreeMap::new();
    for point in response.points() {
        let Some(activity) = point.value.iter().find_map(|value| value.int_val) else {
            continue;
        };
        let (Some(start), Some(end)) = (point.start_time_nanos, point.end_time_nanos) else {
            continue;
        };
        if end < start {
            continue;
        }

        *minutes.entry(activity.to_string()).or_insert(0.0) += (end - start) as f64 / NANOS_PER_MINUTE;
    }
    minutes
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HeartRateSample {
    pub timestamp: String,
    pub bpm: i64,
}

/// One sample per point: its start time and first (average) value.
pub fn heart_rate_samples(response: &AggregateResponse) -> Vec<HeartRateSample> {
    response
        .points()
        .filter_map(|point| {
            let start = point.start_time_nanos?;
            let bpm = point.value.iter().find_map(|value| value.fp_val)?;
            Some(HeartRateSample {
                timestamp: Utc
                    .timestamp_nanos(start)
                    .to_rfc3339_opts(SecondsFormat::Secs, true),
                bpm: bpm.round() as i64,
            })
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct RangeInput {
    start_time: String,
    end_time: String,
}

pub struct FitnessPlugin {
    client: ServiceClient,
}

impl FitnessPlugin {
    pub fn from_config(config: &ServicePluginConfig) -> Result<Self, UpstreamError> {
        Ok(Self { client: ServiceClient::from_config(PLUGIN_NAME, config)? })
    }

    async fn aggregate(&self, request: &AggregateRequest) -> Result<AggregateResponse> {
        info!(
            event_name = "plugin.fitness.aggregate",
            data_type = request.aggregate_by.first().map(|by| by.data_type_name.as_str()).unwrap_or_default(),
            start_time_millis = request.start_time_millis,
            end_time_millis = request.end_time_millis,
            "querying fitness aggregate"
        );
        let call = self.client.post("users/me/dataset:aggregate").json(request);
        Ok(self.client.send_json(call).await?)
    }

    pub async fn get_step_count(&self, start_time: &str, end_time: &str) -> Result<i64> {
        let range = TimeRange::parse(start_time, end_time)?;
        let request = AggregateRequest::new(STEP_COUNT_DATA_TYPE, range, range.duration_millis());
        Ok(total_steps(&self.aggregate(&request).await?))
    }

    pub async fn get_activity_minutes(
        &self,
        start_time: &str,
        end_time: &str,
    ) -> Result<BTreeMap<String, f64>> {
        let range = TimeRange::parse(start_time, end_time)?;
        let request =
            AggregateRequest::new(ACTIVITY_SEGMENT_DATA_TYPE, range, range.duration_millis());
        Ok(activity_minutes(&self.aggregate(&request).await?))
    }

    pub async fn get_heart_rate(
        &self,
        start_time: &str,
        end_time: &str,
    ) -> Result<Vec<HeartRateSample>> {
        let range = TimeRange::parse(start_time, end_time)?;
        let request = AggregateRequest::new(HEART_RATE_DATA_TYPE, range, HEART_RATE_BUCKET_MILLIS);
        Ok(heart_rate_samples(&self.aggregate(&request).await?))
    }
}

fn range_descriptor(name: &str, description: &str) -> CapabilityDescriptor {
    CapabilityDescriptor::new(name, description)
        .with_parameter(
            ParameterSpec::required("start_time", ParameterKind::String)
                .with_description("Start time in ISO 8601 format"),
        )
        .with_parameter(
            ParameterSpec::required("end_time", ParameterKind::String)
                .with_description("End time in ISO 8601 format"),
        )
}

impl Plugin for FitnessPlugin {
    fn name(&self) -> &'static str {
        PLUGIN_NAME
    }

    fn capabilities(self: Arc<Self>) -> Vec<Capability> {
        vec![
            (
                range_descriptor("get_step_count", "Gets the user's step count for a specified time range"),
                typed_handler(&self, |plugin: Arc<Self>, input: RangeInput| async move {
                    let steps = plugin.get_step_count(&input.start_time, &input.end_time).await?;
                    anyhow::Ok(serde_json::to_value(steps)?)
                }),
            ),
            (
                range_descriptor(
                    "get_activity_minutes",
                    "Gets the user's activity minutes for a specified time range",
                ),
                typed_handler(&self, |plugin: Arc<Self>, input: RangeInput| async move {
                    let minutes =
                        plugin.get_activity_minutes(&input.start_time, &input.end_time).await?;
                    anyhow::Ok(serde_json::to_value(minutes)?)
                }),
            ),
            (
                range_descriptor(
                    "get_heart_rate",
                    "Gets the user's heart rate data for a specified time range",
                ),
                typed_handler(&self, |plugin: Arc<Self>, input: RangeInput| async move {
                    let samples = plugin.get_heart_rate(&input.start_time, &input.end_time).await?;
                    anyhow::Ok(serde_json::to_value(samples)?)
                }),
            ),
        ]
    }
}
