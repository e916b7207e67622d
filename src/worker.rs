use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::StreamExt;
use rdkafka::{
    consumer::{CommitMode, Consumer, StreamConsumer},
    ClientConfig, Message,
};
use tokio::sync::Semaphore;

use einvoice_engine::providers::efactura::{
    EFacturaClient, EFacturaStatusChecker, EFacturaSubmissionHandler,
};
use einvoice_engine::providers::xrechnung::{
    XRechnungClient, XRechnungStatusChecker, XRechnungSubmissionHandler,
};
use einvoice_engine::storage::s3::S3ObjectStore;
use einvoice_engine::store::postgres::PgStore;
use einvoice_engine::{
    Engine, EngineConfig, EngineMessage, KafkaBus, ProviderId, ProviderRegistry,
    RedisRateLimitGuard, StaticCredentials,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting e-invoice worker");

    let config = EngineConfig::from_env()?;

    let worker_pool = WorkerPool::new(config).await?;
    worker_pool.start().await?;

    Ok(())
}

struct WorkerPool {
    consumer: Arc<StreamConsumer>,
    semaphore: Arc<Semaphore>,
    engine: Arc<Engine>,
    worker_threads: usize,
}

impl WorkerPool {
    async fn new(config: EngineConfig) -> Result<Self> {
        // Create Kafka consumer
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.kafka_brokers)
            .set("group.id", &config.kafka_group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "30000")
            .create()?;

        consumer.subscribe(&[config.kafka_topic.as_str()])?;

        // Stores
        let store = Arc::new(PgStore::connect(&config.database_url).await?);
        let storage = Arc::new(S3ObjectStore::new(config.xml_bucket.clone()).await?);

        // Shared rate-limit counters
        let redis_client = redis::Client::open(config.redis_url.clone())?;
        let redis = redis::aio::ConnectionManager::new(redis_client).await?;
        let limits: HashMap<_, _> = config
            .providers
            .iter()
            .map(|(provider, settings)| (*provider, settings.limits.clone()))
            .collect();
        let limiter = Arc::new(RedisRateLimitGuard::new(redis, limits));

        let credentials = Arc::new(credentials_from_env());

        // Provider registry
        let mut registry = ProviderRegistry::new();
        if let Some(settings) = config.provider(ProviderId::EFactura) {
            let client = Arc::new(EFacturaClient::new(settings.base_url.clone(), limiter.clone()));
            registry.register(
                ProviderId::EFactura,
                Arc::new(EFacturaSubmissionHandler::new(
                    client.clone(),
                    storage.clone(),
                    credentials.clone(),
                )),
                Arc::new(EFacturaStatusChecker::new(
                    client,
                    store.clone(),
                    credentials.clone(),
                )),
            );
        }
        if let Some(settings) = config.provider(ProviderId::XRechnung) {
            let client = Arc::new(XRechnungClient::new(settings.base_url.clone(), limiter.clone()));
            registry.register(
                ProviderId::XRechnung,
                Arc::new(XRechnungSubmissionHandler::new(
                    client.clone(),
                    storage.clone(),
                    credentials.clone(),
                )),
                Arc::new(XRechnungStatusChecker::new(
                    client,
                    store.clone(),
                    credentials.clone(),
                )),
            );
        }

        let bus = Arc::new(KafkaBus::new(&config.kafka_brokers, config.kafka_topic.clone())?);

        let engine = Arc::new(Engine::new(
            store.clone(),
            store,
            Arc::new(registry),
            bus,
        ));

        Ok(WorkerPool {
            consumer: Arc::new(consumer),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
            engine,
            worker_threads: config.worker_threads,
        })
    }

    async fn start(self) -> Result<()> {
        let pool = Arc::new(self);

        let mut handles = vec![];

        for i in 0..pool.worker_threads {
            let pool_clone = pool.clone();
            let handle = tokio::spawn(async move {
                tracing::info!("Worker {} started", i);
                pool_clone.process_messages().await
            });
            handles.push(handle);
        }

        for handle in handles {
            handle.await??;
        }

        Ok(())
    }

    async fn process_messages(&self) -> Result<()> {
        let mut stream = self.consumer.stream();

        while let Some(message) = stream.next().await {
            match message {
                Ok(msg) => {
                    let permit = self.semaphore.clone().acquire_owned().await?;
                    let engine = self.engine.clone();

                    let payload = msg.payload().map(|p| p.to_vec());
                    if let Err(e) = self.consumer.commit_message(&msg, CommitMode::Async) {
                        tracing::error!("Commit failed: {:?}", e);
                    }

                    tokio::spawn(async move {
                        if let Err(e) = Self::process_single_message(engine, payload).await {
                            tracing::error!("Error processing message: {:?}", e);
                        }
                        drop(permit);
                    });
                }
                Err(e) => {
                    tracing::error!("Kafka error: {:?}", e);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }

        Ok(())
    }

    async fn process_single_message(engine: Arc<Engine>, payload: Option<Vec<u8>>) -> Result<()> {
        let payload = payload.ok_or_else(|| anyhow::anyhow!("Empty payload"))?;
        let message: EngineMessage = serde_json::from_slice(&payload)?;

        tracing::info!(key = %message.key(), "Processing message");
        engine.handle_message(message).await?;

        Ok(())
    }
}

/// Fallback credentials from the environment; organization-specific entries
/// live with the platform's provider configuration.
fn credentials_from_env() -> StaticCredentials {
    let mut credentials = StaticCredentials::new();

    if let Ok(token) = std::env::var("EFACTURA_TOKEN") {
        credentials = credentials.with(
            "*",
            ProviderId::EFactura,
            HashMap::from([("token".to_string(), token)]),
        );
    }

    if let (Ok(client_id), Ok(client_secret)) = (
        std::env::var("XRECHNUNG_CLIENT_ID"),
        std::env::var("XRECHNUNG_CLIENT_SECRET"),
    ) {
        credentials = credentials.with(
            "*",
            ProviderId::XRechnung,
            HashMap::from([
                ("client_id".to_string(), client_id),
                ("client_secret".to_string(), client_secret),
            ]),
        );
    }

    credentials
}
