use crate::error::{BotError, Result};
use crate::models::{Trade, TradeSide};

/// Quantities closer to zero than this count as flat
pub const QTY_EPSILON: f64 = 1e-9;

/// Net open quantity: BUY minus SELL over PENDING, SENT and FILLED trades
pub fn net_position(trades: &[Trade]) -> f64 {
    trades
        .iter()
        .filter(|t| t.status.counts_toward_position())
        .map(|t| match t.side {
            TradeSide::Buy => t.quantity,
            TradeSide::Sell => -t.quantity,
        })
        .sum()
}

/// One lot per bot: a new entry only when flat
pub fn can_buy(net: f64) -> bool {
    net <= QTY_EPSILON
}

pub fn can_sell(net: f64) -> bool {
    net > QTY_EPSILON
}

/// The BUY that opened the current lot, if a lot is open
pub fn open_lot(trades: &[Trade]) -> Option<&Trade> {
    if !can_sell(net_position(trades)) {
        return None;
    }
    trades
        .iter()
        .filter(|t| t.side == TradeSide::Buy && t.status.counts_toward_position())
        .max_by_key(|t| t.created_at)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sizing {
    Accepted { qty: f64 },
    Rejected { raw_qty: f64, floored_qty: f64, min_qty: f64 },
}

impl Sizing {
    pub fn qty(&self) -> Option<f64> {
        match self {
            Sizing::Accepted { qty } => Some(*qty),
            Sizing::Rejected { .. } => None,
        }
    }
}

/// `steps * step` with float noise such as 0.30000000000000004 stripped
fn step_multiple(steps: f64, step: f64) -> f64 {
    ((steps * step) * 1e12).round() / 1e12
}

/// Floor `qty` to a multiple of `step`. The result never exceeds `qty`.
pub fn floor_to_step(qty: f64, step: f64) -> f64 {
    // The quotient itself can land a hair either side of a whole step
    let mut steps = (qty / step).floor();
    if step_multiple(steps + 1.0, step) <= qty {
        steps += 1.0;
    } else if step_multiple(steps, step) > qty {
        steps -= 1.0;
    }
    step_multiple(steps.max(0.0), step)
}

fn check_step(min_qty: f64, qty_step: f64) -> Result<()> {
    if qty_step <= 0.0 || min_qty < 0.0 {
        return Err(BotError::InvalidParameter(format!(
            "qty_step must be > 0 and min_qty >= 0, got step={} min={}",
            qty_step, min_qty
        )));
    }
    Ok(())
}

/// Size an entry from a quote-currency notional.
///
/// `notional / price` is floored to `qty_step`; anything under `min_qty`
/// is rejected and the signal downgrades to SKIP.
pub fn size_buy(price: f64, notional: f64, min_qty: f64, qty_step: f64) -> Result<Sizing> {
    if price <= 0.0 {
        return Err(BotError::InvalidParameter(format!("price must be > 0, got {}", price)));
    }
    check_step(min_qty, qty_step)?;

    let raw_qty = notional / price;
    let floored_qty = floor_to_step(raw_qty, qty_step);

    if floored_qty < min_qty || floored_qty <= 0.0 {
        return Ok(Sizing::Rejected {
            raw_qty,
            floored_qty,
            min_qty,
        });
    }
    Ok(Sizing::Accepted { qty: floored_qty })
}

/// Size an exit: the whole open lot, floored to `qty_step`, never above `net`
pub fn size_sell(net: f64, min_qty: f64, qty_step: f64) -> Result<Sizing> {
    check_step(min_qty, qty_step)?;

    let floored_qty = floor_to_step(net.max(0.0), qty_step).min(net);
    if floored_qty < min_qty || floored_qty <= 0.0 {
        return Ok(Sizing::Rejected {
            raw_qty: net,
            floored_qty,
            min_qty,
        });
    }
    Ok(Sizing::Accepted { qty: floored_qty })
}
