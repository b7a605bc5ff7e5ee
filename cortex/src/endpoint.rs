//! C1: Endpoint Registry — names, URLs, timeouts, and model ids for backends.
//!
//! Immutable once built; shared as a process-wide singleton across requests.

use std::time::Duration;

/// One backend's connection details.
#[derive(Clone, Debug)]
pub struct BackendEndpoint {
    pub name: String,
    pub base_url: String,
    pub model_id: String,
    pub timeout: Duration,
}

/// The two backend roles the classifier routes between.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndpointRole {
    Deep,
    Fast,
}

impl EndpointRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointRole::Deep => "deep",
            EndpointRole::Fast => "fast",
        }
    }
}

/// Process-wide registry of backend endpoints, built once at startup.
#[derive(Clone, Debug)]
pub struct EndpointRegistry {
    deep: BackendEndpoint,
    fast: BackendEndpoint,
}

impl EndpointRegistry {
    pub fn new(deep: BackendEndpoint, fast: BackendEndpoint) -> Self {
        Self { deep, fast }
    }

    /// Builds a registry from environment-style configuration, matching
    /// spec.md §5's timeout defaults (deep 300s, fast 60s).
    pub fn from_env() -> Self {
        let deep_url =
            std::env::var("CORTEX_DEEP_URL").unwrap_or_else(|_| "http://deep-reasoner:8000/v1".into());
        let fast_url =
            std::env::var("CORTEX_FAST_URL").unwrap_or_else(|_| "http://fast-executor:8001/v1".into());
        let deep_model = std::env::var("CORTEX_DEEP_MODEL").unwrap_or_else(|_| "deepseek".into());
        let fast_model = std::env::var("CORTEX_FAST_MODEL").unwrap_or_else(|_| "qwen".into());

        Self::new(
            BackendEndpoint {
                name: "deep".into(),
                base_url: deep_url,
                model_id: deep_model,
                timeout: Duration::from_secs(300),
            },
            BackendEndpoint {
                name: "fast".into(),
                base_url: fast_url,
                model_id: fast_model,
                timeout: Duration::from_secs(60),
            },
        )
    }

    pub fn get(&self, role: EndpointRole) -> &BackendEndpoint {
        match role {
            EndpointRole::Deep => &self.deep,
            EndpointRole::Fast => &self.fast,
        }
    }

    /// Resolves a user-facing model alias (e.g. `"qwen"`, `"deepseek"`) to a
    /// backend role, used by the classifier's explicit-override branch.
    pub fn resolve_alias(&self, alias: &str) -> Option<EndpointRole> {
        let alias = alias.to_lowercase();
        if alias == self.deep.model_id.to_lowercase() || alias == "deep" || alias == "deepseek" {
            Some(EndpointRole::Deep)
        } else if alias == self.fast.model_id.to_lowercase() || alias == "fast" || alias == "qwen" {
            Some(EndpointRole::Fast)
        } else {
            None
        }
    }
}
