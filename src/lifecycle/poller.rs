// =============================================================================
// Live fill poller — reconciles outstanding broker orders
// =============================================================================
//
// Walks orders stuck in SUBMITTED / ACCEPTED / PARTIAL_FILL with a broker
// order id, asks the adapter for status, and folds any new fills through the
// position manager. Status failures back off per order; after the attempt
// budget the order is expired with the failure recorded, so the book never
// carries a permanently unknown order.
//
// The loop cadence adapts to the adapter's `estimated_fill_time_ms` hints.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use crate::positions::PositionManager;
use crate::runtime_config::RuntimeConfig;
use crate::store::Store;
use crate::types::{MarketRegime, OrderStatus};

/// Status-fetch failures tolerated per order before it is written off.
const MAX_STATUS_ATTEMPTS: u32 = 5;
/// Cadence bounds around the adapter's estimate.
const MIN_POLL_MS: u64 = 500;
const MAX_POLL_MS: u64 = 30_000;

#[derive(Debug, Clone, Default, Serialize)]
pub struct PollSummary {
    pub polled: usize,
    pub fills_recorded: usize,
    pub orders_resolved: usize,
    pub orders_written_off: usize,
    /// Adapter hint for the next poll delay.
    pub next_poll_ms: u64,
}

pub struct FillPoller {
    store: Arc<Store>,
    positions: Arc<PositionManager>,
    config: Arc<RwLock<RuntimeConfig>>,
    /// Consecutive status failures per order id.
    attempts: Mutex<HashMap<String, u32>>,
}

impl FillPoller {
    pub fn new(
        store: Arc<Store>,
        positions: Arc<PositionManager>,
        config: Arc<RwLock<RuntimeConfig>>,
    ) -> Self {
        Self {
            store,
            positions,
            config,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// One polling pass over the outstanding orders.
    pub async fn poll_once(&self) -> PollSummary {
        let outstanding = self.store.outstanding_orders();
        let mut summary = PollSummary {
            next_poll_ms: self.config.read().workers.fill_poll_interval_ms,
            ..Default::default()
        };
        if outstanding.is_empty() {
            return summary;
        }

        let adapter = self.positions.adapter().clone();
        let mut best_hint: Option<u64> = None;

        for order in outstanding {
            summary.polled += 1;
            let broker_id = order
                .broker_order_id
                .clone()
                .expect("outstanding orders carry a broker id");

            let status = match adapter.get_order_status(&order.id, &broker_id).await {
                Ok(s) => {
                    self.attempts.lock().remove(&order.id);
                    s
                }
                Err(e) => {
                    let attempts = {
                        let mut map = self.attempts.lock();
                        let entry = map.entry(order.id.clone()).or_insert(0);
                        *entry += 1;
                        *entry
                    };
                    warn!(
                        order_id = %order.id,
                        attempts,
                        error = %e,
                        "order status fetch failed"
                    );
                    if attempts >= MAX_STATUS_ATTEMPTS {
                        self.write_off(&order.id, order.status, attempts);
                        summary.orders_written_off += 1;
                    }
                    continue;
                }
            };

            if let Some(hint) = status.estimated_fill_time_ms {
                best_hint = Some(best_hint.map_or(hint, |b: u64| b.min(hint)));
            }

            // ── New fills ───────────────────────────────────────────────
            if status.filled_quantity > order.filled_quantity {
                let fills = adapter
                    .get_order_fills(&order.id, &broker_id)
                    .await
                    .unwrap_or_default();
                let known: Vec<Option<String>> = self
                    .store
                    .trades_for_order(&order.id)
                    .into_iter()
                    .map(|t| t.broker_trade_id)
                    .collect();
                for fill in fills {
                    if fill.broker_trade_id.is_some()
                        && known.contains(&fill.broker_trade_id)
                    {
                        continue;
                    }
                    match self.positions.apply_fill(
                        &order.id,
                        &fill,
                        MarketRegime::Unknown,
                        None,
                        Some("live fill"),
                    ) {
                        Ok(()) => {
                            summary.fills_recorded += 1;
                            info!(
                                order_id = %order.id,
                                price = fill.price,
                                qty = fill.quantity,
                                "live fill recorded"
                            );
                        }
                        Err(e) => {
                            warn!(order_id = %order.id, error = %e, "fill application failed")
                        }
                    }
                }
            }

            // ── Status convergence without fills ────────────────────────
            let current = self
                .store
                .get_order(&order.id)
                .map(|o| o.status)
                .unwrap_or(order.status);
            if current != status.status && current.can_transition_to(status.status) {
                let result =
                    self.store
                        .update_order_status(&order.id, current, status.status, |o| {
                            if status.status == OrderStatus::Rejected {
                                o.rejection_reason =
                                    Some("rejected at broker".to_string());
                            }
                        });
                if let Err(e) = result {
                    debug!(order_id = %order.id, error = %e, "status convergence skipped");
                }
            }
            if status.status.is_terminal() {
                summary.orders_resolved += 1;
            }
        }

        if let Some(hint) = best_hint {
            summary.next_poll_ms = hint.clamp(MIN_POLL_MS, MAX_POLL_MS);
        }
        summary
    }

    /// After the attempt budget, the order is expired so it stops holding
    /// the book open. The failure is visible in the rejection reason.
    fn write_off(&self, order_id: &str, current: OrderStatus, attempts: u32) {
        warn!(order_id, attempts, "order status unknown; writing off as expired");
        let reason = format!("BROKER_STATUS_UNKNOWN after {attempts} attempts");
        let _ = self
            .store
            .update_order_status(order_id, current, OrderStatus::Expired, |o| {
                o.rejection_reason = Some(reason.clone());
            });
        self.attempts.lock().remove(order_id);
    }

    /// Background loop; spawn once at startup when the adapter needs
    /// polling.
    pub async fn run(self: Arc<Self>) {
        info!("fill poller started");
        loop {
            let summary = self.poll_once().await;
            if summary.polled > 0 {
                debug!(
                    polled = summary.polled,
                    fills = summary.fills_recorded,
                    resolved = summary.orders_resolved,
                    next_ms = summary.next_poll_ms,
                    "fill poll pass"
                );
            }
            sleep(Duration::from_millis(summary.next_poll_ms.max(MIN_POLL_MS))).await;
        }
    }
}
