//! Typed kernel events and the synchronous bus that dispatches them.

pub mod bus;

pub use bus::{BusState, Dispatch, EventBus};

use crate::data::{MarketBatch, StopReason};
use crate::domain::{Fill, OrderIntent, Timestamp};
use serde::Serialize;
use std::fmt;

/// Event kinds. Handlers are registered per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum EventKind {
    Start,
    Market,
    Order,
    Fill,
    Stop,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::Start,
        EventKind::Market,
        EventKind::Order,
        EventKind::Fill,
        EventKind::Stop,
    ];
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::Start => "start",
            EventKind::Market => "market",
            EventKind::Order => "order",
            EventKind::Fill => "fill",
            EventKind::Stop => "stop",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Event {
    Start { timestamp: Option<Timestamp> },
    /// One synchronizer batch: every bar and funding record sharing the batch timestamp.
    Market(MarketBatch),
    Order(OrderIntent),
    Fill(Fill),
    /// Terminal event. Every handler must treat a repeat as a no-op.
    Stop {
        timestamp: Option<Timestamp>,
        reason: StopReason,
    },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Start { .. } => EventKind::Start,
            Event::Market(_) => EventKind::Market,
            Event::Order(_) => EventKind::Order,
            Event::Fill(_) => EventKind::Fill,
            Event::Stop { .. } => EventKind::Stop,
        }
    }

    pub fn timestamp(&self) -> Option<Timestamp> {
        match self {
            Event::Start { timestamp } | Event::Stop { timestamp, .. } => *timestamp,
            Event::Market(batch) => Some(batch.timestamp),
            Event::Order(intent) => Some(intent.timestamp),
            Event::Fill(fill) => Some(fill.timestamp),
        }
    }
}

/// Read-only listener attached to the bus as a general handler.
pub trait EventObserver: Send {
    fn on_event(&mut self, event: &Event);
}

/// Observer that writes every event to the `trace` log level.
#[derive(Debug, Default)]
pub struct TraceObserver;

impl EventObserver for TraceObserver {
    fn on_event(&mut self, event: &Event) {
        match event {
            Event::Market(batch) => tracing::trace!(
                timestamp = %batch.timestamp,
                bars = batch.bars.len(),
                funding = batch.funding.len(),
                "market batch"
            ),
            Event::Order(intent) => tracing::trace!(
                id = %intent.id,
                symbol = %intent.symbol,
                side = %intent.side,
                offset = %intent.offset,
                contracts = intent.contracts,
                "order"
            ),
            Event::Fill(fill) => tracing::trace!(
                id = %fill.order_id,
                symbol = %fill.symbol,
                price = fill.avg_price,
                fee = fill.fee,
                "fill"
            ),
            other => tracing::trace!(kind = %other.kind(), "lifecycle"),
        }
    }
}
