use std::sync::Arc;

use tracing::info;

use super::{
    config::{Config, StoreBackend},
    coordinator::VoteCoordinator,
    database::init_redis,
    error::ServerError,
    ledger::{Ledger, MemoryLedger, RedisLedger},
    publisher::BroadcastPublisher,
    session::SessionSigner,
    tally::{MemoryTally, RedisTally, TallyStore},
};

pub struct State {
    pub config: Config,
    pub coordinator: VoteCoordinator,
    pub signer: SessionSigner,
}

impl State {
    /// Acquires the store handles once for the whole process.
    pub async fn new(config: Config) -> Result<Arc<Self>, ServerError> {
        let (ledger, tally): (Arc<dyn Ledger>, Arc<dyn TallyStore>) = match config.backend {
            StoreBackend::Memory => {
                info!("Using in-memory ledger and tally");
                (Arc::new(MemoryLedger::new()), Arc::new(MemoryTally::new()))
            }
            StoreBackend::Redis => {
                let redis_connection = init_redis(&config.redis_url).await?;
                (
                    Arc::new(RedisLedger::new(redis_connection.clone())),
                    Arc::new(RedisTally::new(redis_connection)),
                )
            }
        };

        Ok(Self::with_stores(config, ledger, tally))
    }

    pub fn with_stores(
        config: Config,
        ledger: Arc<dyn Ledger>,
        tally: Arc<dyn TallyStore>,
    ) -> Arc<Self> {
        let publisher = Arc::new(BroadcastPublisher::new(config.channel_capacity));
        let signer = SessionSigner::new(config.session_secret.clone());

        Arc::new(Self {
            coordinator: VoteCoordinator::new(ledger, tally, publisher),
            signer,
            config,
        })
    }
}
