// Risk management module
pub mod circuit_breakers;
pub mod position;

pub use circuit_breakers::{
    next_utc_midnight, CircuitBreakerTrip, GateDecision, RiskLimits, RiskState, TradingStats,
};
pub use position::{
    can_buy, can_sell, floor_to_step, net_position, open_lot, size_buy, size_sell, Sizing,
};
