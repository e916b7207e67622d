use std::collections::HashMap;
use std::env;
use std::time::Duration;

use anyhow::Result;

use crate::models::ProviderId;

/// Worker/engine configuration, read from the environment.
#[derive(Clone)]
pub struct EngineConfig {
    pub kafka_brokers: String,
    pub kafka_group_id: String,
    pub kafka_topic: String,
    pub max_concurrent: usize,
    pub worker_threads: usize,
    pub database_url: String,
    pub redis_url: String,
    pub xml_bucket: String,
    pub providers: HashMap<ProviderId, ProviderSettings>,
}

/// Per-provider settings. Credentials are per organization and resolved at
/// submission time; what lives here is the endpoint and the provider's
/// published call budgets.
#[derive(Clone, Debug)]
pub struct ProviderSettings {
    pub base_url: String,
    /// Named call budgets, e.g. "per-minute" and "per-day". Provider data,
    /// not engine constants.
    pub limits: Vec<NamedLimit>,
}

/// One independently-windowed call budget.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamedLimit {
    pub name: String,
    pub max_requests: u32,
    pub window: Duration,
}

impl NamedLimit {
    pub fn new(name: impl Into<String>, max_requests: u32, window: Duration) -> Self {
        NamedLimit {
            name: name.into(),
            max_requests,
            window,
        }
    }

    /// Parse a comma-separated spec like `per-minute=1000/60,per-day=5000/86400`
    /// (`name=count/window_secs`).
    pub fn parse_list(spec: &str) -> Result<Vec<NamedLimit>> {
        let mut limits = Vec::new();
        for part in spec.split(',').filter(|p| !p.trim().is_empty()) {
            let (name, budget) = part
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("invalid limit spec: {part}"))?;
            let (count, secs) = budget
                .split_once('/')
                .ok_or_else(|| anyhow::anyhow!("invalid limit budget: {budget}"))?;
            limits.push(NamedLimit::new(
                name.trim(),
                count.trim().parse()?,
                Duration::from_secs(secs.trim().parse()?),
            ));
        }
        Ok(limits)
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        let mut providers = HashMap::new();

        providers.insert(
            ProviderId::EFactura,
            ProviderSettings {
                base_url: env::var("EFACTURA_BASE_URL")
                    .unwrap_or_else(|_| "https://api.anaf.ro/prod/FCTEL/rest".to_string()),
                limits: NamedLimit::parse_list(
                    &env::var("EFACTURA_LIMITS")
                        .unwrap_or_else(|_| "per-minute=1000/60,per-day=5000/86400".to_string()),
                )?,
            },
        );

        providers.insert(
            ProviderId::XRechnung,
            ProviderSettings {
                base_url: env::var("XRECHNUNG_BASE_URL")
                    .unwrap_or_else(|_| "https://xrechnung.bund.de/api/v1".to_string()),
                limits: NamedLimit::parse_list(
                    &env::var("XRECHNUNG_LIMITS")
                        .unwrap_or_else(|_| "per-minute=300/60".to_string()),
                )?,
            },
        );

        Ok(EngineConfig {
            kafka_brokers: env::var("KAFKA_BROKERS").unwrap_or_else(|_| "localhost:9092".to_string()),
            kafka_group_id: env::var("KAFKA_GROUP_ID")
                .unwrap_or_else(|_| "einvoice-workers".to_string()),
            kafka_topic: env::var("KAFKA_TOPIC_EINVOICE")
                .unwrap_or_else(|_| "einvoice.commands".to_string()),
            max_concurrent: env::var("MAX_CONCURRENT")
                .unwrap_or_else(|_| "20".to_string())
                .parse()?,
            worker_threads: env::var("WORKER_THREADS")
                .unwrap_or_else(|_| "4".to_string())
                .parse()?,
            database_url: env::var("DATABASE_URL")?,
            redis_url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost".to_string()),
            xml_bucket: env::var("S3_BUCKET_EINVOICES")
                .unwrap_or_else(|_| "einvoices".to_string()),
            providers,
        })
    }

    pub fn provider(&self, id: ProviderId) -> Option<&ProviderSettings> {
        self.providers.get(&id)
    }
}
