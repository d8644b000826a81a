//! Strategy core: event-driven take-and-hedge state machine.

pub mod take;

pub use take::{compute_arbitrage, plan_hedge, ArbSignal, StrategyEvent, TakeStrategy};
