//! PerpLab Core: deterministic replay kernel for perpetual-futures backtests.
//!
//! This crate contains the simulation and bookkeeping kernel:
//! - Domain types (bars, funding ticks, orders, fills, positions, accounts, instruments)
//! - Contract math per settlement convention and trade unit
//! - Synchronous event bus with depth-first dispatch
//! - Multi-stream time synchronizer
//! - Matching engine with close-price fills and a fee schedule
//! - Long/short position and per-symbol account ledger with snapshot journal
//! - Strategy trait and the context strategies submit orders through

pub mod data;
pub mod domain;
pub mod engine;
pub mod events;
pub mod strategy;

pub use engine::{EngineConfig, Kernel, KernelError, RunReport};
pub use strategy::{Strategy, StrategyContext, StrategyError, StrategyParams};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: data handed across the kernel boundary is Send + Sync,
    /// and the kernel itself can move to a worker thread.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        // Domain types
        require_send::<domain::Bar>();
        require_sync::<domain::Bar>();
        require_send::<domain::FundingTick>();
        require_sync::<domain::FundingTick>();
        require_send::<domain::OrderIntent>();
        require_sync::<domain::OrderIntent>();
        require_send::<domain::Fill>();
        require_sync::<domain::Fill>();
        require_send::<domain::PositionPair>();
        require_sync::<domain::PositionPair>();
        require_send::<domain::Account>();
        require_sync::<domain::Account>();
        require_send::<domain::Valuation>();
        require_sync::<domain::Valuation>();

        // Events and data
        require_send::<events::Event>();
        require_sync::<events::Event>();
        require_send::<data::MarketBatch>();
        require_sync::<data::MarketBatch>();

        // Engine types
        require_send::<engine::EngineConfig>();
        require_sync::<engine::EngineConfig>();
        require_send::<engine::RunReport>();
        require_sync::<engine::RunReport>();
        require_send::<engine::Journal>();
        require_sync::<engine::Journal>();
        require_send::<engine::Ledger>();
        require_send::<engine::Kernel>();
    }

    /// Architecture contract: strategies never receive mutable ledger state.
    ///
    /// Position and account callbacks take shared references to the ledger maps;
    /// the only way back into the kernel is the order queue on the context.
    #[test]
    fn strategy_callbacks_take_read_only_ledger_state() {
        fn _check_trait_object_builds(
            strategy: &mut dyn Strategy,
            ctx: &mut StrategyContext<'_>,
            ledger: &engine::Ledger,
        ) {
            strategy.on_position(ctx, ledger.positions());
            strategy.on_account(ctx, ledger.accounts());
        }
    }
}
