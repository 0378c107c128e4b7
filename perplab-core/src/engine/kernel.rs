//! Kernel: wires the bus, synchronizer, matching engine, ledger and strategy.
//!
//! Each synchronizer batch is published as one `Market` event. Everything that
//! follows from it (ledger updates, strategy callbacks, the orders they queue,
//! the fills those orders produce) runs depth-first inside that `publish` call.
//! Handlers are invoked in registration order:
//!
//! | event | handlers |
//! |---|---|
//! | Market | matching, ledger, strategy |
//! | Order | order journal, matching |
//! | Fill | ledger, strategy |
//! | Stop | matching, ledger, strategy |
//!
//! Observers attached with [`Kernel::add_observer`] run after those, on every event.

use super::clock::{SimClock, TradingWindow};
use super::config::{ConfigError, EngineConfig, Universe};
use super::ledger::{Ledger, LedgerStats};
use super::matching::{MatchStats, MatchingEngine};
use crate::data::{
    DataError, ExhaustionPolicy, RecordSource, StopReason, StreamKey, StreamStatus, StreamWindow,
    SyncStep, Synchronizer,
};
use crate::domain::{Account, OrderId, OrderIntent, Timestamp, Valuation};
use crate::events::{Dispatch, Event, EventBus, EventKind, EventObserver};
use crate::strategy::{Strategy, StrategyContext, StrategyError, StrategyParams};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum KernelError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Strategy(#[from] StrategyError),

    #[error("stream {0} belongs to a symbol outside the configured universe")]
    UnknownStream(String),

    #[error("no streams registered")]
    NoStreams,

    #[error("kernel already started")]
    AlreadyStarted,
}

/// Handler keys registered on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Matching,
    Ledger,
    Strategy,
    OrderJournal,
    Observer(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamReport {
    pub stream: StreamKey,
    pub status: StreamStatus,
}

/// Summary of a finished (or interrupted) run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub strategy: Option<String>,
    pub stop_reason: Option<StopReason>,
    pub first_timestamp: Option<Timestamp>,
    pub last_timestamp: Option<Timestamp>,
    pub batches: u64,
    pub events_published: u64,
    pub orders_submitted: u64,
    /// Orders the strategy context refused (outside the window, below minimum unit).
    pub orders_refused: u64,
    pub matching: MatchStats,
    pub ledger: LedgerStats,
    pub ledger_errors: u64,
    pub streams: Vec<StreamReport>,
    pub accounts: BTreeMap<String, Account>,
}

pub struct Kernel {
    bus: EventBus<Route>,
    clock: SimClock,
    window: TradingWindow,
    universe: Universe,
    valuations: BTreeMap<String, Valuation>,
    min_unit: f64,
    synchronizer: Synchronizer,
    matching: MatchingEngine,
    ledger: Ledger,
    strategy: Option<Box<dyn Strategy>>,
    strategy_stopped: bool,
    observers: Vec<Box<dyn EventObserver>>,
    orders: Vec<OrderIntent>,
    next_order_id: OrderId,
    first_timestamp: Option<Timestamp>,
    orders_refused: u64,
    ledger_errors: u64,
    stop_reason: Option<StopReason>,
}

impl Kernel {
    /// Validate the configuration and build a kernel with no streams attached.
    pub fn new(config: &EngineConfig) -> Result<Self, KernelError> {
        let universe = config.validate()?;
        let window = TradingWindow::new(config.start_time, config.end_time);
        let synchronizer = Synchronizer::new(
            StreamWindow::new(config.lookback_time, config.end_time),
            config.exhaustion,
        );

        let mut bus = EventBus::new().with_history_limit(config.history_limit);
        bus.register(EventKind::Market, Route::Matching);
        bus.register(EventKind::Market, Route::Ledger);
        bus.register(EventKind::Market, Route::Strategy);
        bus.register(EventKind::Order, Route::OrderJournal);
        bus.register(EventKind::Order, Route::Matching);
        bus.register(EventKind::Fill, Route::Ledger);
        bus.register(EventKind::Fill, Route::Strategy);
        bus.register(EventKind::Stop, Route::Matching);
        bus.register(EventKind::Stop, Route::Ledger);
        bus.register(EventKind::Stop, Route::Strategy);

        Ok(Self {
            bus,
            clock: SimClock::new(),
            window,
            valuations: universe.valuations(),
            min_unit: config.min_unit,
            synchronizer,
            matching: MatchingEngine::new(&universe, config.slippage),
            ledger: Ledger::new(&universe),
            universe,
            strategy: None,
            strategy_stopped: false,
            observers: Vec::new(),
            orders: Vec::new(),
            next_order_id: OrderId(1),
            first_timestamp: None,
            orders_refused: 0,
            ledger_errors: 0,
            stop_reason: None,
        })
    }

    fn ensure_not_started(&self) -> Result<(), KernelError> {
        if self.bus.is_started() || self.stop_reason.is_some() {
            return Err(KernelError::AlreadyStarted);
        }
        Ok(())
    }

    /// Register one input stream. Funding streams are keyed by their owning symbol.
    pub fn add_stream(&mut self, key: StreamKey, source: RecordSource) -> Result<(), KernelError> {
        self.ensure_not_started()?;
        if !self.universe.contains(&key.symbol) {
            return Err(KernelError::UnknownStream(key.to_string()));
        }
        self.synchronizer.add_stream(key, source)?;
        Ok(())
    }

    /// Initialize and attach the strategy. Replaces any previous one.
    pub fn attach_strategy(
        &mut self,
        mut strategy: Box<dyn Strategy>,
        params: &StrategyParams,
    ) -> Result<(), KernelError> {
        self.ensure_not_started()?;
        strategy.on_init(params)?;
        info!(strategy = strategy.name(), "strategy attached");
        self.strategy = Some(strategy);
        Ok(())
    }

    pub fn add_observer(&mut self, observer: Box<dyn EventObserver>) {
        let route = Route::Observer(self.observers.len());
        self.observers.push(observer);
        self.bus.register_general(route);
    }

    pub fn universe(&self) -> &Universe {
        &self.universe
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn into_ledger(self) -> Ledger {
        self.ledger
    }

    pub fn matching(&self) -> &MatchingEngine {
        &self.matching
    }

    pub fn bus(&self) -> &EventBus<Route> {
        &self.bus
    }

    pub fn now(&self) -> Option<Timestamp> {
        self.clock.now()
    }

    /// Every order intent published, in publication order.
    pub fn orders(&self) -> &[OrderIntent] {
        &self.orders
    }

    pub fn exhaustion_policy(&self) -> ExhaustionPolicy {
        self.synchronizer.policy()
    }

    pub fn is_finished(&self) -> bool {
        self.stop_reason.is_some()
    }

    /// Start the bus and publish the `Start` event.
    pub fn start(&mut self) -> Result<(), KernelError> {
        self.ensure_not_started()?;
        if self.synchronizer.stream_count() == 0 {
            return Err(KernelError::NoStreams);
        }
        info!(
            streams = self.synchronizer.stream_count(),
            symbols = self.universe.len(),
            start = %self.window.start,
            end = %self.window.end,
            "replay started"
        );
        self.bus.start();
        self.publish(Event::Start { timestamp: None });
        Ok(())
    }

    /// Publish the next batch. Returns false once the run has terminated.
    pub fn step(&mut self) -> bool {
        if self.stop_reason.is_some() {
            return false;
        }
        match self.synchronizer.step() {
            SyncStep::Batch(batch) => {
                if !self.clock.advance(batch.timestamp) {
                    warn!(
                        timestamp = %batch.timestamp,
                        now = ?self.clock.now(),
                        "batch behind the clock"
                    );
                }
                self.first_timestamp.get_or_insert(batch.timestamp);
                self.publish(Event::Market(batch));
                true
            }
            SyncStep::Finished(reason) => {
                self.stop(reason);
                false
            }
        }
    }

    /// Publish the terminal `Stop` event. Only the first call has any effect.
    pub fn stop(&mut self, reason: StopReason) {
        if self.stop_reason.is_some() {
            return;
        }
        self.stop_reason = Some(reason.clone());
        self.publish(Event::Stop {
            timestamp: self.clock.now(),
            reason,
        });
        self.bus.stop();
        info!(
            batches = self.synchronizer.batches(),
            orders = self.orders.len(),
            fills = self.matching.stats().filled,
            "replay finished"
        );
    }

    /// Start if needed and replay until every stream is exhausted.
    pub fn run(&mut self) -> Result<RunReport, KernelError> {
        if !self.bus.is_started() && self.stop_reason.is_none() {
            self.start()?;
        }
        while self.step() {}
        Ok(self.report())
    }

    /// Publish an externally built intent, bypassing the strategy context.
    pub fn submit_order(&mut self, intent: OrderIntent) {
        self.publish(Event::Order(intent));
    }

    pub fn report(&self) -> RunReport {
        RunReport {
            strategy: self.strategy.as_ref().map(|s| s.name().to_string()),
            stop_reason: self.stop_reason.clone(),
            first_timestamp: self.first_timestamp,
            last_timestamp: self.synchronizer.last_timestamp(),
            batches: self.synchronizer.batches(),
            events_published: self.bus.published(),
            orders_submitted: self.orders.len() as u64,
            orders_refused: self.orders_refused,
            matching: self.matching.stats(),
            ledger: self.ledger.stats(),
            ledger_errors: self.ledger_errors,
            streams: self
                .synchronizer
                .statuses()
                .into_iter()
                .map(|(stream, status)| StreamReport { stream, status })
                .collect(),
            accounts: self.ledger.accounts().clone(),
        }
    }

    /// Run a strategy callback, then publish whatever it queued.
    fn with_strategy<F>(&mut self, callback: F)
    where
        F: FnOnce(&mut dyn Strategy, &mut StrategyContext<'_>, &Ledger),
    {
        let Some(mut strategy) = self.strategy.take() else {
            return;
        };
        let (intents, refused) = {
            let mut ctx = StrategyContext::new(
                self.clock.now(),
                &self.window,
                self.matching.last_bars(),
                &self.valuations,
                self.min_unit,
                &mut self.next_order_id,
            );
            callback(strategy.as_mut(), &mut ctx, &self.ledger);
            ctx.into_intents()
        };
        self.strategy = Some(strategy);
        self.orders_refused += refused;
        for intent in intents {
            self.publish(Event::Order(intent));
        }
    }

    fn notify_ledger_update(&mut self) {
        self.with_strategy(|strategy, ctx, ledger| {
            strategy.on_position(ctx, ledger.positions());
            strategy.on_account(ctx, ledger.accounts());
        });
    }

    fn dispatch_matching(&mut self, event: &Event) {
        match event {
            Event::Market(batch) => self.matching.on_market(batch),
            Event::Order(intent) => {
                if let Ok(Some(fill)) = self.matching.match_order(intent) {
                    self.publish(Event::Fill(fill));
                }
            }
            Event::Stop { .. } => self.matching.close(),
            _ => {}
        }
    }

    fn dispatch_ledger(&mut self, event: &Event) {
        let result = match event {
            Event::Market(batch) => self.ledger.on_market(batch),
            Event::Fill(fill) => self.ledger.apply_fill(fill),
            Event::Stop { .. } => {
                self.ledger.finalize();
                return;
            }
            _ => return,
        };
        match result {
            Ok(()) => self.notify_ledger_update(),
            Err(err) => {
                self.ledger_errors += 1;
                warn!(error = %err, "ledger update skipped");
            }
        }
    }

    fn dispatch_strategy(&mut self, event: &Event) {
        match event {
            Event::Market(batch) => {
                if !batch.funding.is_empty() {
                    self.with_strategy(|s, ctx, _| s.on_funding(ctx, &batch.funding));
                }
                if !batch.bars.is_empty() {
                    self.with_strategy(|s, ctx, _| s.on_bar(ctx, &batch.bars));
                }
            }
            Event::Fill(fill) => self.with_strategy(|s, ctx, _| s.on_order(ctx, fill)),
            Event::Stop { reason, .. } => {
                if self.strategy_stopped {
                    return;
                }
                self.strategy_stopped = true;
                if let Some(strategy) = self.strategy.as_mut() {
                    strategy.on_stop(reason);
                }
            }
            _ => {}
        }
    }
}

impl Dispatch for Kernel {
    type Handler = Route;

    fn bus_mut(&mut self) -> &mut EventBus<Route> {
        &mut self.bus
    }

    fn dispatch(&mut self, handler: Route, event: &Event) {
        match handler {
            Route::Matching => self.dispatch_matching(event),
            Route::Ledger => self.dispatch_ledger(event),
            Route::Strategy => self.dispatch_strategy(event),
            Route::OrderJournal => {
                if let Event::Order(intent) = event {
                    self.orders.push(intent.clone());
                }
            }
            Route::Observer(index) => {
                if let Some(observer) = self.observers.get_mut(index) {
                    observer.on_event(event);
                }
            }
        }
    }
}
