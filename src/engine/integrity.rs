//! Session tagging for scan output.
//!
//! Every signal of a run is stamped with the same [`MarketContext`], so a
//! reader can tell whether a bar dated `trade_date` is the session the run
//! believed was current. Signals are never dropped here.

use tracing::{debug, warn};

use crate::market::MarketContext;
use crate::types::BreakoutSignal;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    pub consistent: usize,
    pub inconsistent: usize,
}

/// Stamp `signals` in place with the run's session context.
pub fn tag(signals: &mut [BreakoutSignal], context: &MarketContext) -> IntegrityReport {
    let mut report = IntegrityReport::default();

    for signal in signals.iter_mut() {
        let consistent = signal.trade_date == context.effective_trade_date;
        signal.market_state = Some(context.state);
        signal.run_timestamp = Some(context.run_timestamp);
        signal.effective_trade_date = Some(context.effective_trade_date);
        signal.is_date_consistent = Some(consistent);

        if consistent {
            report.consistent += 1;
        } else {
            report.inconsistent += 1;
            debug!(
                key = %signal.key(),
                trade_date = %signal.trade_date,
                effective = %context.effective_trade_date,
                "Stale bar"
            );
        }
    }

    if report.inconsistent > 0 {
        warn!(
            inconsistent = report.inconsistent,
            consistent = report.consistent,
            market_state = %context.state,
            effective_trade_date = %context.effective_trade_date,
            "Signals dated off the effective session"
        );
    }

    report
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
