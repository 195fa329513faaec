//! Discovery of LM Studio / Ollama servers that expose vision models.
//!
//! Probes localhost plus any extra hosts, lists `/v1/models` on each open
//! port, and keeps the ids that look like multimodal models.

use std::time::Duration;

use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Substrings that mark a model id as vision-capable, beyond the Qwen-VL patterns.
pub const DEFAULT_VISION_MODEL_HINTS: &[&str] = &["gemma3"];

static QWEN_VL_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)qwen\d+(\.\d+)?-?vl").unwrap(),
        Regex::new(r"(?i)qwen/qwen\d+(\.\d+)?-?vl").unwrap(),
    ]
});

const PORT_PROBE_TIMEOUT: Duration = Duration::from_millis(300);

/// Which server family a target belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerKind {
    LmStudio,
    Ollama,
}

/// One reachable server with at least one vision model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub kind: ServerKind,
    pub server_address: String,
    pub vision_models: Vec<String>,
}

/// Everything found, grouped by server family, localhost first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryReport {
    pub lm_studio: Vec<ServerInfo>,
    pub ollama: Vec<ServerInfo>,
}

impl DiscoveryReport {
    /// First LM Studio target, else first Ollama target, as `(api_base, model)`.
    pub fn first_target(&self) -> Option<(String, String)> {
        self.lm_studio
            .iter()
            .chain(self.ollama.iter())
            .find_map(|s| {
                s.vision_models
                    .first()
                    .map(|m| (s.server_address.clone(), m.clone()))
            })
    }

    pub fn is_empty(&self) -> bool {
        self.lm_studio.is_empty() && self.ollama.is_empty()
    }
}

#[derive(Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<ModelEntry>,
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
}

/// Discovery probe for vision model servers.
pub struct VisionModelDiscovery {
    pub lm_studio_port: u16,
    pub ollama_port: u16,
    pub timeout: Duration,
    pub hints: Vec<String>,
    /// Hosts to probe besides localhost.
    pub extra_hosts: Vec<String>,
    client: Client,
}

impl Default for VisionModelDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl VisionModelDiscovery {
    pub fn new() -> Self {
        Self {
            lm_studio_port: 1234,
            ollama_port: 11434,
            timeout: Duration::from_secs(2),
            hints: DEFAULT_VISION_MODEL_HINTS.iter().map(|s| s.to_string()).collect(),
            extra_hosts: Vec::new(),
            client: Client::new(),
        }
    }

    pub fn with_hosts(mut self, hosts: Vec<String>) -> Self {
        self.extra_hosts = hosts;
        self
    }

    pub fn with_hints(mut self, hints: Vec<String>) -> Self {
        self.hints.extend(hints);
        self
    }

    /// Whether a model id looks like a multimodal/vision model.
    pub fn is_vision_model(&self, model_id: &str) -> bool {
        if QWEN_VL_PATTERNS.iter().any(|re| re.is_match(model_id)) {
            return true;
        }
        let lower = model_id.to_lowercase();
        self.hints.iter().any(|h| lower.contains(&h.to_lowercase()))
    }

    /// Filter a `/v1/models` body (either `data` or `models` array) to vision ids.
    pub fn vision_models_from(&self, body: &serde_json::Value) -> Vec<String> {
        let Ok(parsed) = serde_json::from_value::<ModelsResponse>(body.clone()) else {
            return Vec::new();
        };
        parsed
            .data
            .into_iter()
            .chain(parsed.models)
            .map(|m| if m.id.is_empty() { m.name } else { m.id })
            .filter(|id| !id.is_empty() && self.is_vision_model(id))
            .collect()
    }

    /// Probe every host for both server kinds.
    pub async fn discover(&self) -> DiscoveryReport {
        let mut hosts = vec!["127.0.0.1".to_string()];
        for host in &self.extra_hosts {
            if !hosts.contains(host) {
                hosts.push(host.clone());
            }
        }

        let mut probes = Vec::new();
        for host in &hosts {
            probes.push(self.probe(host, ServerKind::LmStudio, self.lm_studio_port));
            probes.push(self.probe(host, ServerKind::Ollama, self.ollama_port));
        }

        let mut report = DiscoveryReport::default();
        for info in join_all(probes).await.into_iter().flatten() {
            info!(kind = ?info.kind, address = %info.server_address, models = info.vision_models.len(), "Discovered vision server");
            match info.kind {
                ServerKind::LmStudio => report.lm_studio.push(info),
                ServerKind::Ollama => report.ollama.push(info),
            }
        }
        report
    }

    async fn probe(&self, host: &str, kind: ServerKind, port: u16) -> Option<ServerInfo> {
        if port == 0 || !port_open(host, port).await {
            return None;
        }
        let base = format!("http://{host}:{port}");
        let vision_models = self.fetch_models(&base).await;
        if vision_models.is_empty() {
            debug!(address = %base, "Server has no vision models");
            return None;
        }
        Some(ServerInfo { kind, server_address: base, vision_models })
    }

    async fn fetch_models(&self, base: &str) -> Vec<String> {
        let response = match self
            .client
            .get(format!("{base}/v1/models"))
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                debug!(address = %base, status = %r.status(), "Model listing refused");
                return Vec::new();
            }
            Err(e) => {
                debug!(address = %base, error = %e, "Model listing failed");
                return Vec::new();
            }
        };
        match response.json::<serde_json::Value>().await {
            Ok(body) => self.vision_models_from(&body),
            Err(_) => Vec::new(),
        }
    }
}

async fn port_open(host: &str, port: u16) -> bool {
    matches!(
        tokio::time::timeout(PORT_PROBE_TIMEOUT, TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fetch_models_from_data_key() {
        let d = VisionModelDiscovery::new();
        let body = json!({"data": [{"id": "qwen/qwen3-vl-8b"}, {"id": "qwen/qwen3-vl-30b"}, {"id": "llama-3"}]});
        assert_eq!(d.vision_models_from(&body), vec!["qwen/qwen3-vl-8b", "qwen/qwen3-vl-30b"]);
    }

    #[test]
    fn fetch_models_from_models_key() {
        let d = VisionModelDiscovery::new();
        let body = json!({"models": [{"id": "qwen/qwen3-vl-8b"}, {"name": "gemma3:12b"}]});
        assert_eq!(d.vision_models_from(&body), vec!["qwen/qwen3-vl-8b", "gemma3:12b"]);
    }

    #[test]
    fn hints_extend_detection() {
        let d = VisionModelDiscovery::new().with_hints(vec!["LLaVA".into()]);
        assert!(d.is_vision_model("llava-1.6-mistral"));
        assert!(d.is_vision_model("Qwen2.5-VL-7B"));
        assert!(!d.is_vision_model("mistral-7b"));
    }

    #[test]
    fn malformed_listing_yields_nothing() {
        let d = VisionModelDiscovery::new();
        assert!(d.vision_models_from(&json!({"data": "nope"})).is_empty());
    }

    #[test]
    fn first_target_prefers_lm_studio() {
        let report = DiscoveryReport {
            lm_studio: vec![ServerInfo {
                kind: ServerKind::LmStudio,
                server_address: "http://10.0.0.5:7777".into(),
                vision_models: vec!["autopilot".into()],
            }],
            ollama: vec![ServerInfo {
                kind: ServerKind::Ollama,
                server_address: "http://127.0.0.1:11434".into(),
                vision_models: vec!["gemma3".into()],
            }],
        };
        assert_eq!(
            report.first_target(),
            Some(("http://10.0.0.5:7777".to_string(), "autopilot".to_string()))
        );
        assert!(DiscoveryReport::default().first_target().is_none());
    }
}
