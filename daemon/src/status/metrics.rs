//! Metric series for the dashboard

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use openapi_client::models::{PrometheusResponse, RangeQueryData};
use reqwest::Client;
use tracing::{debug, error};

use crate::errors::FleetError;
use crate::models::dashboard::{MetricChart, MetricLabel, MetricPoint, MetricSeries};

/// Metrics query collaborator
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Most recent charts for an application, optionally scoped to one cluster
    async fn charts(
        &self,
        app_id: &str,
        cluster_id: Option<&str>,
    ) -> Result<Vec<MetricChart>, FleetError>;
}

/// One dashboard graph and the query that feeds it.
///
/// `$SELECTOR` in `query` is replaced by the label selector for the scope.
#[derive(Debug, Clone)]
pub struct ChartQuery {
    pub title: String,
    pub tick_format: String,
    pub tick_template: String,
    pub legend_template: String,
    pub query: String,
}

impl ChartQuery {
    fn new(title: &str, tick_format: &str, tick_template: &str, legend: &str, query: &str) -> Self {
        Self {
            title: title.to_string(),
            tick_format: tick_format.to_string(),
            tick_template: tick_template.to_string(),
            legend_template: legend.to_string(),
            query: query.to_string(),
        }
    }

    /// Charts shown when an application defines none of its own
    pub fn defaults() -> Vec<ChartQuery> {
        vec![
            ChartQuery::new(
                "Disk Usage",
                "byte",
                "",
                "Used: {{ instance }}",
                "sum((node_filesystem_size_bytes{$SELECTOR} - node_filesystem_avail_bytes{$SELECTOR})) by (instance)",
            ),
            ChartQuery::new(
                "CPU Usage",
                "percent",
                "",
                "{{ pod }}",
                "sum(rate(container_cpu_usage_seconds_total{container!=\"\",$SELECTOR}[5m])) by (pod)",
            ),
            ChartQuery::new(
                "Memory Usage",
                "byte",
                "",
                "{{ pod }}",
                "sum(container_memory_usage_bytes{container!=\"\",$SELECTOR}) by (pod)",
            ),
        ]
    }

    fn render(&self, cluster_id: Option<&str>) -> String {
        match cluster_id {
            Some(cluster) => self
                .query
                .replace("$SELECTOR", &format!("cluster=\"{}\"", cluster)),
            None => self.query.replace(",$SELECTOR", "").replace("$SELECTOR", ""),
        }
    }
}

/// Fill `{{ label }}` placeholders from a series' labels
fn legend(template: &str, labels: &[MetricLabel]) -> String {
    labels.iter().fold(template.to_string(), |acc, label| {
        acc.replace(&format!("{{{{ {} }}}}", label.name), &label.value)
            .replace(&format!("{{{{{}}}}}", label.name), &label.value)
    })
}

/// Convert a `query_range` matrix into a chart
pub fn chart_from_range(query: &ChartQuery, data: RangeQueryData) -> MetricChart {
    let series = data
        .result
        .into_iter()
        .map(|series| {
            let metric: Vec<MetricLabel> = series
                .metric
                .into_iter()
                .map(|(name, value)| MetricLabel { name, value })
                .collect();
            let data = series
                .values
                .into_iter()
                .filter_map(|(timestamp, value)| {
                    value
                        .parse::<f64>()
                        .ok()
                        .filter(|v| v.is_finite())
                        .map(|value| MetricPoint { timestamp, value })
                })
                .collect();
            MetricSeries {
                legend_template: legend(&query.legend_template, &metric),
                metric,
                data,
            }
        })
        .collect();

    MetricChart {
        title: query.title.clone(),
        tick_format: query.tick_format.clone(),
        tick_template: query.tick_template.clone(),
        series,
    }
}

/// Reads charts from a Prometheus server
pub struct PrometheusMetrics {
    client: Client,
    address: String,
    charts: Vec<ChartQuery>,
    window: Duration,
    step: Duration,
}

impl PrometheusMetrics {
    pub fn new(address: &str) -> Result<Self, FleetError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            address: address.trim_end_matches('/').to_string(),
            charts: ChartQuery::defaults(),
            window: Duration::from_secs(60 * 60),
            step: Duration::from_secs(60),
        })
    }

    pub fn with_charts(mut self, charts: Vec<ChartQuery>) -> Self {
        self.charts = charts;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn query_range(&self, query: &str) -> Result<RangeQueryData, FleetError> {
        let end = Utc::now().timestamp();
        let start = end - self.window.as_secs() as i64;
        let url = format!("{}/api/v1/query_range", self.address);
        debug!("GET {} query={}", url, query);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("query", query.to_string()),
                ("start", start.to_string()),
                ("end", end.to_string()),
                ("step", self.step.as_secs().to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Prometheus query failed: {} - {}", status, body);
            return Err(FleetError::CollaboratorError(format!("{}: {}", status, body)));
        }

        let body: PrometheusResponse<RangeQueryData> = response.json().await?;
        if body.status != "success" {
            return Err(FleetError::CollaboratorError(format!(
                "prometheus {}: {}",
                body.error_type.unwrap_or_default(),
                body.error.unwrap_or_default()
            )));
        }
        body.data
            .ok_or_else(|| FleetError::CollaboratorError("prometheus returned no data".to_string()))
    }
}

#[async_trait]
impl MetricsSource for PrometheusMetrics {
    async fn charts(
        &self,
        _app_id: &str,
        cluster_id: Option<&str>,
    ) -> Result<Vec<MetricChart>, FleetError> {
        let mut charts = Vec::with_capacity(self.charts.len());
        for chart in &self.charts {
            let data = self.query_range(&chart.render(cluster_id)).await?;
            charts.push(chart_from_range(chart, data));
        }
        Ok(charts)
    }
}
