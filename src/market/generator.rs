use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::interval;

use crate::config::{MAX_TICK_DRIFT, PRICE_DECIMALS, TICK_INTERVAL_MS};
use crate::market::{PriceTable, PriceTick, Symbol};
use crate::stream::BroadcastRouter;

/// Per-second simulated price source.
///
/// Each cycle perturbs every tracked symbol independently, overwrites the
/// process-wide price table, and hands one tick per symbol to the broadcast
/// router. Generation is pure arithmetic over in-memory state and must never
/// block or fail; anything odd downstream is the router's problem.
pub struct PriceGenerator {
    table: Arc<PriceTable>,
    router: Arc<BroadcastRouter>,
}

fn round_price(value: f64) -> f64 {
    let scale = 10f64.powi(PRICE_DECIMALS as i32);
    (value * scale).round() / scale
}

/// Applies one bounded random perturbation to a price.
pub fn next_price<R: Rng>(old: f64, rng: &mut R) -> f64 {
    let drift = rng.gen_range(-MAX_TICK_DRIFT..=MAX_TICK_DRIFT);
    round_price(old + old * drift)
}

impl PriceGenerator {
    pub fn new(table: Arc<PriceTable>, router: Arc<BroadcastRouter>) -> Self {
        Self { table, router }
    }

    /// Runs one generation cycle: advances every symbol and returns the ticks
    /// in universe order.
    pub fn tick_once<R: Rng>(&self, rng: &mut R) -> Vec<PriceTick> {
        Symbol::universe()
            .map(|symbol| {
                let price = next_price(self.table.current(symbol), rng);
                self.table.store(symbol, price);
                PriceTick::new(symbol, price)
            })
            .collect()
    }

    /// Spawns the fixed-period broadcast loop.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval_timer = interval(Duration::from_millis(TICK_INTERVAL_MS));
            info!("Price generator started ({}ms tick)", TICK_INTERVAL_MS);

            loop {
                interval_timer.tick().await;

                let mut rng = rand::thread_rng();
                let ticks = self.tick_once(&mut rng);
                drop(rng);

                for tick in &ticks {
                    let delivered = self.router.publish(tick);
                    if delivered > 0 {
                        debug!(
                            "Tick {} @ {} delivered to {} sessions",
                            tick.symbol, tick.price, delivered
                        );
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_next_price_stays_within_drift_bound() {
        let mut rng = StdRng::seed_from_u64(7);
        let old = 238.75;

        for _ in 0..1000 {
            let new = next_price(old, &mut rng);
            assert!(new > 0.0);
            // half a cent of slack for the 2-decimal rounding
            assert!((new - old).abs() <= old * MAX_TICK_DRIFT + 0.005);
        }
    }

    #[test]
    fn test_next_price_rounds_to_two_decimals() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..100 {
            let new = next_price(142.50, &mut rng);
            assert_eq!((new * 100.0).round() / 100.0, new);
        }
    }

    #[tokio::test]
    async fn test_tick_once_advances_every_symbol() {
        let table = Arc::new(PriceTable::with_seed_prices());
        let router = Arc::new(BroadcastRouter::new());
        let generator = PriceGenerator::new(table.clone(), router);

        let mut rng = StdRng::seed_from_u64(1);
        let ticks = generator.tick_once(&mut rng);

        assert_eq!(ticks.len(), Symbol::universe_len());
        for tick in &ticks {
            // the table now holds exactly what was emitted
            assert_eq!(table.current(tick.symbol), tick.price);
        }
    }

    #[test]
    fn test_generation_is_deterministic_under_a_seed() {
        let mut a = StdRng::seed_from_u64(99);
        let mut b = StdRng::seed_from_u64(99);

        for _ in 0..50 {
            assert_eq!(next_price(495.80, &mut a), next_price(495.80, &mut b));
        }
    }
}
