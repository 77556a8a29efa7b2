use std::sync::Arc;
use std::time::Duration;

use charge_core::{
    Admission, ChargeSession, DispatchConfig, DispatchError, DispatchStrategy, FaultRecord,
    PileClass, RateLookup, RequestId, RequestView, RerouteOutcome, RerouteStrategy, Station,
    StationConfig, StationSnapshot, SweepReport, Ticket,
};
use chrono::NaiveDateTime;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::clock::Clock;
use crate::error::EngineError;
use crate::notify::Notifier;
use crate::store::StationStore;

/// Serialized, persisted access to one station.
///
/// Operations take the station lock for their whole duration, so two callers
/// can never interleave on the same queue. Configuration and rates are
/// snapshots swapped as a whole; an operation reads each once.
pub struct Engine {
    station: Mutex<Station>,
    config: RwLock<Arc<DispatchConfig>>,
    rates: RwLock<Arc<dyn RateLookup>>,
    store: Arc<dyn StationStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl Engine {
    /// Restore the station from `store`, or provision it from `config` when the
    /// store is empty, then run one reconciliation pass.
    pub async fn open(
        config: StationConfig,
        store: Arc<dyn StationStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let station = match store.load().await.map_err(EngineError::Persistence)? {
            Some(station) => {
                if station.station_id() != config.station_id {
                    tracing::warn!(
                        "Stored state belongs to {}, configuration names {}",
                        station.station_id(),
                        config.station_id
                    );
                }
                tracing::info!("Restored station {} from the store", station.station_id());
                station
            }
            None => {
                tracing::info!("Provisioning station {}", config.station_id);
                Station::new(&config)
            }
        };

        let rates: Arc<dyn RateLookup> = Arc::new(config.rates.clone());
        let engine = Engine {
            station: Mutex::new(station),
            config: RwLock::new(Arc::new(config.dispatch_config())),
            rates: RwLock::new(rates),
            store,
            notifier,
            clock,
        };
        engine.sweep().await?;
        Ok(engine)
    }

    /// Run `operation` on a draft of the station and commit it once persisted.
    ///
    /// On any error the live station is left exactly as it was.
    async fn transact<T, F>(&self, operation: F) -> Result<T, EngineError>
    where
        F: FnOnce(
                &mut Station,
                &DispatchConfig,
                &dyn RateLookup,
                NaiveDateTime,
            ) -> Result<T, DispatchError>
            + Send,
        T: Send,
    {
        let mut station = self.station.lock().await;
        let config = self.dispatch_config().await;
        let rates = self.rates.read().await.clone();
        let now = self.clock.now();

        let mut draft = station.clone();
        let value = operation(&mut draft, config.as_ref(), rates.as_ref(), now)?;
        let events = draft.take_events();
        self.store
            .save(&draft)
            .await
            .map_err(EngineError::Persistence)?;
        *station = draft;
        drop(station);

        for event in &events {
            self.notifier.notify(event);
        }
        Ok(value)
    }

    pub async fn dispatch_config(&self) -> Arc<DispatchConfig> {
        self.config.read().await.clone()
    }

    pub async fn submit(
        &self,
        class: PileClass,
        energy: f64,
        battery_capacity: f64,
        requester: String,
    ) -> Result<Admission, EngineError> {
        self.transact(move |station, config, _, now| {
            station.submit(class, energy, battery_capacity, requester, config, now)
        })
        .await
    }

    pub async fn cancel(&self, id: RequestId, requester: String) -> Result<(), EngineError> {
        self.transact(move |station, config, rates, now| {
            station.cancel(id, &requester, config, rates, now)
        })
        .await
    }

    pub async fn modify_request(
        &self,
        id: RequestId,
        requester: String,
        class: Option<PileClass>,
        energy: Option<f64>,
    ) -> Result<Ticket, EngineError> {
        self.transact(move |station, config, _, now| {
            station.modify_request(id, &requester, class, energy, config, now)
        })
        .await
    }

    pub async fn finish_charging(
        &self,
        id: RequestId,
        reported: Option<f64>,
    ) -> Result<Option<ChargeSession>, EngineError> {
        self.transact(move |station, config, rates, now| {
            station.finish_charging(id, reported, config, rates, now)
        })
        .await
    }

    pub async fn report_fault(
        &self,
        code: String,
        description: String,
    ) -> Result<usize, EngineError> {
        self.transact(move |station, _, rates, now| {
            station.report_fault(&code, description, rates, now)
        })
        .await
    }

    /// Recover a faulted pile and reroute its queue with `strategy`.
    pub async fn recover_fault(
        &self,
        code: String,
        strategy: RerouteStrategy,
    ) -> Result<RerouteOutcome, EngineError> {
        self.transact(move |station, config, _, now| {
            station.recover_and_reroute(&code, strategy, config, now)
        })
        .await
    }

    pub async fn power_on(&self, code: String) -> Result<(), EngineError> {
        self.transact(move |station, config, _, now| station.power_on(&code, config, now))
            .await
    }

    pub async fn shutdown(&self, code: String) -> Result<(), EngineError> {
        self.transact(move |station, _, _, _| station.shutdown(&code)).await
    }

    pub async fn sweep(&self) -> Result<SweepReport, EngineError> {
        self.transact(|station, config, rates, now| Ok(station.reconcile(config, rates, now)))
            .await
    }

    /// Swap the dispatch strategy. The next dispatch pass uses it.
    pub async fn set_strategy(
        &self,
        strategy: DispatchStrategy,
        bulk_threshold: Option<usize>,
    ) -> Arc<DispatchConfig> {
        let mut config = self.config.write().await;
        let next = Arc::new(config.with_strategy(strategy, bulk_threshold));
        tracing::info!(
            "Dispatch strategy {:?} -> {:?} (bulk threshold {})",
            config.strategy,
            next.strategy,
            next.bulk_threshold
        );
        *config = next.clone();
        next
    }

    /// Replace capacities, strategy and rates. Piles are provisioned once and
    /// are not touched.
    pub async fn reload_config(&self, config: StationConfig) -> Result<(), EngineError> {
        config.validate()?;
        *self.config.write().await = Arc::new(config.dispatch_config());
        *self.rates.write().await = Arc::new(config.rates.clone());
        tracing::info!("Reloaded configuration for {}", config.station_id);
        Ok(())
    }

    pub async fn status(&self, id: RequestId) -> Result<RequestView, EngineError> {
        let station = self.station.lock().await;
        Ok(station.status(id, self.clock.now())?)
    }

    pub async fn queue_snapshot(&self) -> StationSnapshot {
        self.station.lock().await.queue_snapshot(self.clock.now())
    }

    pub async fn bills_for(&self, requester: &str) -> Vec<ChargeSession> {
        let station = self.station.lock().await;
        station.bills_for(requester).into_iter().cloned().collect()
    }

    pub async fn faults(&self) -> Vec<FaultRecord> {
        self.station.lock().await.faults().to_vec()
    }

    /// Run a reconciliation pass every `every` until the returned task is aborted.
    ///
    /// A zero period is raised to one second.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let every = if every.is_zero() {
            tracing::warn!("Sweep interval of zero requested, sweeping every second");
            Duration::from_secs(1)
        } else {
            every
        };
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(error) = engine.sweep().await {
                    tracing::error!("Reconciliation sweep failed: {}", error);
                }
            }
        })
    }
}
