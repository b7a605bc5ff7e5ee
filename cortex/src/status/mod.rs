//! C5: Status Tool — self-introspection over GPU metrics (DCGM Prometheus
//! exporter) and memory layer health, for status-query short-circuit requests.
//!
//! Grounded on `agent/tools/status.py`: the Prometheus line parser, the
//! per-GPU metric join by the `gpu` label, and the MB-to-GB rounding are
//! ported field-for-field (spec.md §4.4's "used/free frame buffer,
//! utilization, temperature, power" expands to exactly these five metric
//! families, per `SPEC_FULL.md`'s supplemented-features section).

use regex::Regex;
use std::collections::HashMap;
use std::time::Duration;

const DCGM_METRICS: &[&str] = &[
    "DCGM_FI_DEV_FB_USED",
    "DCGM_FI_DEV_FB_FREE",
    "DCGM_FI_DEV_GPU_UTIL",
    "DCGM_FI_DEV_GPU_TEMP",
    "DCGM_FI_DEV_POWER_USAGE",
];

#[derive(Clone, Debug, Default)]
pub struct GpuStatus {
    pub id: String,
    pub name: String,
    pub vram_used_mb: f64,
    pub vram_free_mb: f64,
    pub vram_total_mb: f64,
    pub vram_used_gb: f64,
    pub vram_free_gb: f64,
    pub vram_total_gb: f64,
    pub utilization_pct: f64,
    pub temperature_c: f64,
    pub power_w: f64,
}

#[derive(Clone, Debug)]
pub enum ServiceHealth {
    Ok,
    Degraded(String),
    Error(String),
}

#[derive(Clone, Debug)]
pub struct GpuReport {
    pub health: ServiceHealth,
    pub gpus: Vec<GpuStatus>,
    pub total_vram_used_gb: f64,
    pub total_vram_capacity_gb: f64,
    pub utilization_pct: f64,
}

#[derive(Clone, Debug)]
pub struct MemoryReport {
    pub health: ServiceHealth,
    pub memory_count: u64,
}

#[derive(Clone, Debug)]
pub struct SovereignStatus {
    pub healthy: bool,
    pub gpu: GpuReport,
    pub memory: MemoryReport,
}

struct ParsedMetric {
    labels: HashMap<String, String>,
    value: f64,
}

fn metric_regex(metric_name: &str) -> Regex {
    Regex::new(&format!(r#"^{metric_name}\{{([^}}]+)\}}\s+(\S+)"#)).expect("valid metric regex")
}

/// Parses Prometheus exposition-format text, extracting every occurrence of
/// `metric_name` with its label set and numeric value.
fn parse_prometheus_metric(text: &str, metric_name: &str) -> Vec<ParsedMetric> {
    let re = metric_regex(metric_name);
    let mut results = Vec::new();
    for line in text.lines() {
        let Some(caps) = re.captures(line) else {
            continue;
        };
        let labels_str = &caps[1];
        let value_str = &caps[2];
        let Ok(value) = value_str.parse::<f64>() else {
            continue;
        };
        let mut labels = HashMap::new();
        for pair in labels_str.split(',') {
            if let Some((key, val)) = pair.split_once('=') {
                labels.insert(key.to_string(), val.trim_matches('"').to_string());
            }
        }
        results.push(ParsedMetric { labels, value });
    }
    results
}

fn gpu_label(metric: &ParsedMetric) -> String {
    metric
        .labels
        .get("gpu")
        .cloned()
        .unwrap_or_else(|| "unknown".to_string())
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

/// Aggregates the five DCGM metric families into one `GpuStatus` per GPU id.
pub fn aggregate_gpu_metrics(metrics_text: &str) -> Vec<GpuStatus> {
    let used = parse_prometheus_metric(metrics_text, DCGM_METRICS[0]);
    let free = parse_prometheus_metric(metrics_text, DCGM_METRICS[1]);
    let util = parse_prometheus_metric(metrics_text, DCGM_METRICS[2]);
    let temp = parse_prometheus_metric(metrics_text, DCGM_METRICS[3]);
    let power = parse_prometheus_metric(metrics_text, DCGM_METRICS[4]);

    let mut order: Vec<String> = Vec::new();
    let mut map: HashMap<String, GpuStatus> = HashMap::new();

    for m in &used {
        let id = gpu_label(m);
        let entry = map.entry(id.clone()).or_insert_with(|| {
            order.push(id.clone());
            GpuStatus {
                id: id.clone(),
                name: m
                    .labels
                    .get("modelName")
                    .cloned()
                    .unwrap_or_else(|| "Unknown GPU".to_string()),
                ..Default::default()
            }
        });
        entry.vram_used_mb = m.value;
    }
    for m in &free {
        if let Some(entry) = map.get_mut(&gpu_label(m)) {
            entry.vram_free_mb = m.value;
        }
    }
    for m in &util {
        if let Some(entry) = map.get_mut(&gpu_label(m)) {
            entry.utilization_pct = m.value;
        }
    }
    for m in &temp {
        if let Some(entry) = map.get_mut(&gpu_label(m)) {
            entry.temperature_c = m.value;
        }
    }
    for m in &power {
        if let Some(entry) = map.get_mut(&gpu_label(m)) {
            entry.power_w = m.value;
        }
    }

    order
        .into_iter()
        .filter_map(|id| map.remove(&id))
        .map(|mut gpu| {
            gpu.vram_total_mb = gpu.vram_used_mb + gpu.vram_free_mb;
            gpu.vram_used_gb = round1(gpu.vram_used_mb / 1024.0);
            gpu.vram_free_gb = round1(gpu.vram_free_mb / 1024.0);
            gpu.vram_total_gb = round1(gpu.vram_total_mb / 1024.0);
            gpu
        })
        .collect()
}

pub struct StatusTool {
    http: reqwest::Client,
    dcgm_url: String,
    memory_url: String,
}

impl StatusTool {
    pub fn new(dcgm_url: impl Into<String>, memory_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("reqwest client"),
            dcgm_url: dcgm_url.into(),
            memory_url: memory_url.into(),
        }
    }

    pub async fn gpu_status(&self) -> GpuReport {
        let text = match self.http.get(&self.dcgm_url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.text().await {
                Ok(t) => t,
                Err(e) => return error_gpu_report(format!("DCGM response unreadable: {e}")),
            },
            Ok(resp) => {
                return error_gpu_report(format!("DCGM HTTP {}", resp.status()));
            }
            Err(e) => {
                tracing::error!(error = %e, "DCGM request failed");
                return error_gpu_report(format!("DCGM unreachable: {e}"));
            }
        };

        let gpus = aggregate_gpu_metrics(&text);
        let total_used: f64 = gpus.iter().map(|g| g.vram_used_mb).sum();
        let total_capacity: f64 = gpus.iter().map(|g| g.vram_total_mb).sum();
        let utilization_pct = if total_capacity > 0.0 {
            round1(total_used / total_capacity * 100.0)
        } else {
            0.0
        };

        GpuReport {
            health: ServiceHealth::Ok,
            gpus,
            total_vram_used_gb: round1(total_used / 1024.0),
            total_vram_capacity_gb: round1(total_capacity / 1024.0),
            utilization_pct,
        }
    }

    pub async fn memory_status(&self) -> MemoryReport {
        let result = self
            .http
            .get(format!("{}/v1/memories/", self.memory_url))
            .query(&[("user_id", "system"), ("limit", "1")])
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {
                #[derive(serde::Deserialize, Default)]
                struct Resp {
                    count: Option<u64>,
                    #[serde(default)]
                    memories: Vec<serde_json::Value>,
                }
                let body: Resp = resp.json().await.unwrap_or_default();
                let count = body.count.unwrap_or(body.memories.len() as u64);
                MemoryReport {
                    health: ServiceHealth::Ok,
                    memory_count: count,
                }
            }
            Ok(resp) => {
                let status = resp.status();
                let healthy = self
                    .http
                    .get(format!("{}/health", self.memory_url))
                    .send()
                    .await
                    .map(|r| r.status().is_success())
                    .unwrap_or(false);
                if healthy {
                    MemoryReport {
                        health: ServiceHealth::Ok,
                        memory_count: 0,
                    }
                } else {
                    MemoryReport {
                        health: ServiceHealth::Degraded(format!("Mem0 HTTP {status}")),
                        memory_count: 0,
                    }
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "memory status request failed");
                MemoryReport {
                    health: ServiceHealth::Error(format!("Mem0 unreachable: {e}")),
                    memory_count: 0,
                }
            }
        }
    }

    pub async fn sovereign_status(&self) -> SovereignStatus {
        let gpu = self.gpu_status().await;
        let memory = self.memory_status().await;
        let healthy = matches!(gpu.health, ServiceHealth::Ok) && matches!(memory.health, ServiceHealth::Ok);
        SovereignStatus {
            healthy,
            gpu,
            memory,
        }
    }
}

fn error_gpu_report(error: String) -> GpuReport {
    tracing::error!(%error, "GPU status failed");
    GpuReport {
        health: ServiceHealth::Error(error),
        gpus: Vec::new(),
        total_vram_used_gb: 0.0,
        total_vram_capacity_gb: 0.0,
        utilization_pct: 0.0,
    }
}

/// Renders a `SovereignStatus` as Markdown, for inclusion in a chat response.
pub fn format_status_markdown(status: &SovereignStatus) -> String {
    let overall = if status.healthy { "HEALTHY" } else { "DEGRADED" };
    let mut lines = vec![
        format!("**System Status: {overall}**"),
        String::new(),
        format!(
            "**VRAM:** {:.1}GB / {:.1}GB ({:.1}% utilized)",
            status.gpu.total_vram_used_gb, status.gpu.total_vram_capacity_gb, status.gpu.utilization_pct
        ),
        format!("**GPUs:** {} active", status.gpu.gpus.len()),
    ];

    for gpu in &status.gpu.gpus {
        lines.push(format!(
            "  - GPU {}: {:.1}GB / {:.1}GB | {:.0}C | {:.0}W",
            gpu.id, gpu.vram_used_gb, gpu.vram_total_gb, gpu.temperature_c, gpu.power_w
        ));
    }

    lines.push(String::new());
    lines.push(format!("**Memories:** {} stored", status.memory.memory_count));
    lines.push(String::new());
    lines.push(if status.healthy {
        "All systems operational.".to_string()
    } else {
        "Some systems degraded - check logs.".to_string()
    });

    lines.join("\n")
}
