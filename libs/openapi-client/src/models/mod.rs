//! Collaborator API models

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Prometheus API envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusResponse<T> {
    pub status: String,

    pub data: Option<T>,

    #[serde(default, rename = "errorType")]
    pub error_type: Option<String>,

    #[serde(default)]
    pub error: Option<String>,
}

/// `data` of a `query_range` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangeQueryData {
    #[serde(rename = "resultType")]
    pub result_type: String,

    #[serde(default)]
    pub result: Vec<RangeSeries>,
}

/// One matrix series: labels plus `[unix_seconds, "value"]` samples
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangeSeries {
    #[serde(default)]
    pub metric: BTreeMap<String, String>,

    #[serde(default)]
    pub values: Vec<(f64, String)>,
}

/// Kubernetes object metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub namespace: Option<String>,

    #[serde(default)]
    pub generation: Option<i64>,
}

/// The subset of object spec fields used to judge readiness
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectSpec {
    #[serde(default)]
    pub replicas: Option<i64>,

    #[serde(default, rename = "type")]
    pub service_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadBalancerStatus {
    #[serde(default)]
    pub ingress: Vec<serde_json::Value>,
}

/// The subset of object status fields used to judge readiness.
///
/// Covers deployments, statefulsets, daemonsets, services, ingresses and
/// persistent volume claims; fields absent on a kind stay `None`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectStatus {
    #[serde(default)]
    pub observed_generation: Option<i64>,

    #[serde(default)]
    pub replicas: Option<i64>,

    #[serde(default)]
    pub ready_replicas: Option<i64>,

    #[serde(default)]
    pub updated_replicas: Option<i64>,

    #[serde(default)]
    pub available_replicas: Option<i64>,

    #[serde(default)]
    pub desired_number_scheduled: Option<i64>,

    #[serde(default)]
    pub number_ready: Option<i64>,

    #[serde(default)]
    pub updated_number_scheduled: Option<i64>,

    #[serde(default)]
    pub phase: Option<String>,

    #[serde(default)]
    pub load_balancer: Option<LoadBalancerStatus>,
}

/// A Kubernetes object as returned by `kubectl get -o json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubeObject {
    pub kind: String,

    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: ObjectSpec,

    #[serde(default)]
    pub status: ObjectStatus,
}
