// src/core/engine.rs
use crate::config::AppConfig;
use crate::connectors::traits::{exchange_symbol, split_pair, ExchangeClient, OrderFill};
use crate::core::book::PositionBook;
use crate::core::{indicators, risk, signal};
use crate::error::{EngineError, PairOutcome, SkipReason};
use crate::notify::Notifier;
use crate::storage::ledger::TradeLedger;
use crate::storage::position_store::PositionStore;
use crate::types::{
    EngineCommand, EngineEvent, ExitReason, IndicatorSnapshot, LifecycleState, PairSnapshot,
    PairStatus, Portfolio, Position, Side,
};
use crate::utils::precision::{normalize_quantity, step_down};
use anyhow::{anyhow, Result};
use chrono::Utc;
use futures::future::join_all;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Panic sells below this quote notional are dust and skipped.
const DUST_NOTIONAL: f64 = 11.0;

/// The per-cycle decision engine. One instance owns the position book, the
/// durable stores and the event stream; per-pair evaluation tasks share it
/// by reference within a tick.
pub struct TradingEngine {
    config: AppConfig,
    exchange: Arc<dyn ExchangeClient>,
    book: Mutex<PositionBook>,
    running: AtomicBool,
    /// Latest observed price per pair, for floating PnL over pairs that were
    /// not evaluated this tick.
    last_prices: Mutex<HashMap<String, f64>>,
    store: PositionStore,
    ledger: TradeLedger,
    notifier: Notifier,
    event_sender: mpsc::Sender<EngineEvent>,
}

impl TradingEngine {
    pub fn new(
        config: AppConfig,
        exchange: Arc<dyn ExchangeClient>,
        store: PositionStore,
        ledger: TradeLedger,
        notifier: Notifier,
        event_sender: mpsc::Sender<EngineEvent>,
    ) -> Self {
        Self {
            config,
            exchange,
            book: Mutex::new(PositionBook::default()),
            running: AtomicBool::new(false),
            last_prices: Mutex::new(HashMap::new()),
            store,
            ledger,
            notifier,
            event_sender,
        }
    }

    /// Restores the position set from disk. A PendingEntry left by a crash
    /// mid-buy is dropped (the slot was never confirmed); a PendingExit is
    /// reopened so the exit retries on the first cycle.
    pub async fn load_state(&self) {
        let stored = self.store.load().await;
        let mut positions = HashMap::new();
        for (symbol, mut position) in stored {
            match position.state {
                LifecycleState::PendingEntry => {
                    warn!("Dropping stored {symbol}: entry was never confirmed");
                }
                LifecycleState::PendingExit | LifecycleState::Open => {
                    position.state = LifecycleState::Open;
                    positions.insert(symbol, position);
                }
            }
        }
        *self.book() = PositionBook::with_positions(positions);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
        self.emit_log("▶ ENGINE STARTED - scanning for entries");
        self.notifier.send("▶ *Engine started*").await;
    }

    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.emit_log("⏸ ENGINE PAUSED - exits still managed");
        self.notifier.send("⏸ *Engine paused*").await;
    }

    /// Drives fixed-interval ticks and the start/stop/panic control surface.
    /// Ticks never overlap: the next one waits for the whole fan-out.
    pub async fn run(self: Arc<Self>, mut commands: mpsc::Receiver<EngineCommand>) {
        self.load_state().await;
        info!(
            "Engine loop running. Pairs: {}, sandbox: {}",
            self.config.pairs.len(),
            self.config.sandbox_mode
        );

        let mut ticker = interval(Duration::from_secs(
            self.config.engine.tick_interval_secs.max(1),
        ));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(EngineCommand::Start) => self.start().await,
                    Some(EngineCommand::Stop) => self.stop().await,
                    Some(EngineCommand::Panic) => self.emergency_close_all().await,
                    None => {
                        info!("Control channel closed, engine shutting down");
                        break;
                    }
                },
                _ = ticker.tick() => self.trading_cycle().await,
            }
        }
    }

    /// One tick: fan out every pair (or only held pairs once the slots are
    /// full), then publish portfolio, pair rows and recent history.
    pub async fn trading_cycle(&self) {
        let max_open = self.config.risk.max_open_trades;
        let pairs: Vec<String> = if self.book().is_saturated(max_open) {
            debug!("All {max_open} slots taken, monitoring exits only");
            self.config
                .pairs
                .iter()
                .filter(|p| self.book().has_position(p))
                .cloned()
                .collect()
        } else {
            self.config.pairs.clone()
        };

        let outcomes = join_all(pairs.iter().map(|p| self.process_pair(p))).await;

        let mut snapshots = Vec::new();
        for (pair, outcome) in pairs.iter().zip(outcomes) {
            match outcome {
                PairOutcome::Data(snapshot) => snapshots.push(snapshot),
                PairOutcome::Skipped(reason) => debug!("{pair}: skipped ({reason:?})"),
                PairOutcome::Failed(e) => warn!("{pair}: {e}"),
            }
        }

        if snapshots.is_empty() {
            return;
        }
        self.publish_portfolio().await;
        self.send_event(EngineEvent::PairsData(snapshots));
        match self.ledger.recent_sells(self.config.engine.history_limit) {
            Ok(history) => self.send_event(EngineEvent::TradeHistory(history)),
            Err(e) => warn!("Ledger read failed: {e:#}"),
        }
    }

    /// Evaluates one pair inside its own error boundary; a failure here is
    /// folded into the outcome, never propagated into the tick.
    async fn process_pair(&self, pair: &str) -> PairOutcome {
        let symbol = exchange_symbol(pair);
        let candles = match self
            .call(self.exchange.fetch_candles(
                &symbol,
                &self.config.engine.candle_interval,
                self.config.engine.candle_lookback,
            ))
            .await
        {
            Ok(candles) => candles,
            Err(e) => return PairOutcome::Failed(classify(e)),
        };

        let min_len = self.config.min_history();
        let Some(snapshot) = indicators::compute(&candles, &self.config.strategy, min_len) else {
            let reason = if candles.len() < min_len {
                SkipReason::InsufficientHistory
            } else {
                SkipReason::IndicatorWarmup
            };
            return PairOutcome::Skipped(reason);
        };
        self.last_price_map().insert(pair.to_string(), snapshot.price);

        let now = Utc::now().timestamp();
        // Bind before matching so the book lock is not held across the awaits
        // in the arms.
        let held = self.book().position(pair);
        let status = match held {
            Some(position) if position.state == LifecycleState::Open => {
                self.manage_open_position(pair, &position, &snapshot, now)
                    .await;
                PairStatus::Holding
            }
            Some(_) => PairStatus::Holding,
            None => self.try_enter(pair, &snapshot, now).await,
        };

        PairOutcome::Data(PairSnapshot {
            symbol: pair.to_string(),
            price: snapshot.price,
            rsi: snapshot.rsi,
            status,
            position: self.book().position(pair),
        })
    }

    /// Entry path. Preconditions first (running mode, cooldown, free slot),
    /// then the indicator gate, then the liquidity floor; the slot is
    /// reserved synchronously before the buy call suspends.
    async fn try_enter(&self, pair: &str, snapshot: &IndicatorSnapshot, now: i64) -> PairStatus {
        if !self.is_running() {
            return PairStatus::Idle;
        }
        if let Some(remaining_secs) = self.book().cooldown_remaining(pair, now) {
            return PairStatus::Cooldown { remaining_secs };
        }
        if self.book().is_saturated(self.config.risk.max_open_trades) {
            return PairStatus::Saturated;
        }
        if !signal::entry_signal(snapshot, &self.config.strategy) {
            return PairStatus::Idle;
        }

        let symbol = exchange_symbol(pair);
        if self.config.strategy.min_quote_volume_24h > 0.0 {
            match self.call(self.exchange.fetch_quote_volume_24h(&symbol)).await {
                Ok(volume) if volume < self.config.strategy.min_quote_volume_24h => {
                    debug!("{pair}: 24h volume {volume:.0} below the liquidity floor");
                    return PairStatus::Idle;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("{pair}: liquidity check failed: {e:#}");
                    return PairStatus::Idle;
                }
            }
        }

        if !self.book().try_reserve(pair, self.config.risk.max_open_trades) {
            return PairStatus::Saturated;
        }

        self.emit_log(&format!(
            "🛒 Entry signal: {pair} @ {:.4} (RSI {:.1})",
            snapshot.price, snapshot.rsi
        ));
        match self.execute_entry(pair, &symbol, snapshot.price, now).await {
            Ok(()) => PairStatus::Entering,
            Err(e) => {
                self.book().rollback_entry(pair);
                self.emit_log(&format!("❌ BUY FAILED {pair}: {e:#}"));
                PairStatus::Idle
            }
        }
    }

    async fn execute_entry(&self, pair: &str, symbol: &str, price: f64, now: i64) -> Result<()> {
        if !self.call(self.exchange.market_active(symbol)).await? {
            return Err(EngineError::MarketUnavailable(pair.to_string()).into());
        }

        let step = self.call(self.exchange.quantity_step(symbol)).await?;
        let raw_qty = Decimal::from_f64(self.config.risk.trade_amount / price)
            .ok_or_else(|| anyhow!("unrepresentable order quantity for {pair}"))?;
        let quantity = normalize_quantity(raw_qty, step);
        if quantity.is_zero() {
            return Err(anyhow!("quantity is zero after step rounding"));
        }

        let fill = self.call(self.exchange.market_buy(symbol, quantity)).await?;

        self.book().confirm_entry(Position {
            symbol: pair.to_string(),
            entry_price: fill.avg_price,
            quantity: fill.executed_qty,
            opened_at: now,
            high_watermark: 0.0,
            secured: false,
            state: LifecycleState::Open,
        });
        self.persist().await;

        let msg = format!("🚀 BOUGHT {pair} @ {:.4}", fill.avg_price);
        self.emit_log(&msg);
        self.notifier.send(&msg).await;
        Ok(())
    }

    /// Applies the protection rules to an open position: arming transitions
    /// are persisted even when no exit fires, exactly one exit per cycle.
    async fn manage_open_position(
        &self,
        pair: &str,
        position: &Position,
        snapshot: &IndicatorSnapshot,
        now: i64,
    ) {
        let decision = risk::evaluate(position, snapshot.price, now, &self.config.risk);

        if decision.secure {
            self.book().secure(pair);
            self.persist().await;
            let msg = format!("🛡 Break-even shield armed: {pair}");
            self.emit_log(&msg);
            self.notifier.send(&msg).await;
        }

        if let Some(watermark) = decision.arm_watermark {
            let newly_armed = position.high_watermark == 0.0;
            self.book().raise_watermark(pair, watermark);
            self.persist().await;
            if newly_armed {
                let msg = format!("📈 Trailing stop armed: {pair} peak {watermark:.4}");
                self.emit_log(&msg);
                self.notifier.send(&msg).await;
            }
        }

        if let Some(reason) = decision.exit {
            let profit = position.profit_pct(snapshot.price);
            self.emit_log(&format!("{reason}: {pair} ({:+.2}%)", profit * 100.0));
            if let Err(e) = self.close_position(pair, position, reason).await {
                self.emit_log(&format!("❌ SELL FAILED {pair}: {e:#}"));
            }
        }
    }

    /// Sells what is actually held, not what the books say: rounding drift
    /// and external fee deductions mean the recorded quantity can exceed the
    /// balance. A confirmed insufficient-balance rejection closes the
    /// position anyway, because retrying can never succeed.
    async fn close_position(
        &self,
        pair: &str,
        position: &Position,
        reason: ExitReason,
    ) -> Result<()> {
        let symbol = exchange_symbol(pair);
        let (base, _) = split_pair(pair).ok_or_else(|| anyhow!("malformed pair {pair}"))?;

        self.book().mark_pending_exit(pair);
        self.persist().await;

        let outcome: Result<OrderFill> = async {
            let balance = self.call(self.exchange.fetch_free_balance(base)).await?;
            let step = self.call(self.exchange.quantity_step(&symbol)).await?;
            let mut quantity = normalize_quantity(position.quantity.min(balance), step);
            if quantity > balance {
                quantity = step_down(quantity, step);
            }
            if quantity <= Decimal::ZERO {
                return Err(EngineError::InsufficientBalance(format!(
                    "no sellable {base} balance"
                ))
                .into());
            }
            self.call(self.exchange.market_sell(&symbol, quantity)).await
        }
        .await;

        match outcome {
            Ok(fill) => {
                let sold = fill.executed_qty.to_f64().unwrap_or(0.0);
                let pnl = (fill.avg_price - position.entry_price) * sold;
                if let Err(e) = self.ledger.append(pair, Side::Sell, fill.avg_price, sold, pnl) {
                    error!("Ledger append failed for {pair}: {e:#}");
                }

                let cooldown = if reason.extended_cooldown() {
                    self.config.risk.extended_cooldown_secs
                } else {
                    self.config.risk.standard_cooldown_secs
                };
                {
                    let mut book = self.book();
                    book.remove(pair);
                    book.schedule_cooldown(pair, Utc::now().timestamp() + cooldown);
                }
                self.persist().await;

                let msg = format!(
                    "✅ SOLD {pair} @ {:.4} | PnL ${pnl:+.2} ({reason})",
                    fill.avg_price
                );
                self.emit_log(&msg);
                self.notifier.send(&msg).await;
                Ok(())
            }
            Err(e)
                if matches!(
                    e.downcast_ref::<EngineError>(),
                    Some(EngineError::InsufficientBalance(_))
                ) =>
            {
                warn!("{pair}: nothing left to sell, dropping position: {e:#}");
                self.book().remove(pair);
                self.persist().await;
                self.emit_log(&format!("⚠ {pair} closed without a fill (balance gone)"));
                Ok(())
            }
            Err(e) => {
                // Keep the position; the exit retries on the next cycle.
                self.book().reopen(pair);
                self.persist().await;
                Err(e)
            }
        }
    }

    /// Kill switch. Bypasses exit gating and cooldowns, sells every held
    /// balance above the dust threshold, then clears the book no matter how
    /// the individual sells went.
    pub async fn emergency_close_all(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.emit_log("🚨 PANIC: force-liquidating all positions");
        self.notifier.send("🚨 *PANIC* - liquidating everything").await;

        let held = self.book().held_symbols();
        for pair in held {
            if let Err(e) = self.liquidate(&pair).await {
                warn!("Panic sell failed for {pair}: {e:#}");
                self.emit_log(&format!("❌ Panic sell failed: {pair}"));
            }
        }

        self.book().clear_positions();
        self.persist().await;
        self.emit_log("🏁 PANIC complete");
        self.notifier.send("🏁 Panic liquidation finished").await;
    }

    async fn liquidate(&self, pair: &str) -> Result<()> {
        let symbol = exchange_symbol(pair);
        let (base, _) = split_pair(pair).ok_or_else(|| anyhow!("malformed pair {pair}"))?;

        let balance = self.call(self.exchange.fetch_free_balance(base)).await?;
        let price = self.call(self.exchange.fetch_last_price(&symbol)).await?;
        let notional = balance.to_f64().unwrap_or(0.0) * price;
        if notional <= DUST_NOTIONAL {
            debug!("{pair}: ${notional:.2} is dust, skipping");
            return Ok(());
        }

        let step = self.call(self.exchange.quantity_step(&symbol)).await?;
        let quantity = normalize_quantity(balance, step);
        self.call(self.exchange.market_sell(&symbol, quantity)).await?;
        self.emit_log(&format!("✅ {pair} flattened"));
        Ok(())
    }

    async fn publish_portfolio(&self) {
        let capital = match self
            .call(self.exchange.fetch_free_balance(self.quote_asset()))
            .await
        {
            Ok(balance) => balance.to_f64().unwrap_or(0.0),
            Err(e) => {
                warn!("Balance query failed: {e:#}");
                return;
            }
        };

        let floating_pnl = {
            let prices = self.last_price_map();
            self.book()
                .open_positions()
                .iter()
                .filter_map(|p| {
                    let price = prices.get(&p.symbol)?;
                    Some((price - p.entry_price) * p.quantity.to_f64().unwrap_or(0.0))
                })
                .sum()
        };

        self.send_event(EngineEvent::Portfolio(Portfolio {
            available_capital: capital,
            floating_pnl,
        }));
    }

    /// Full-map store replace; call after every book mutation. Serialized by
    /// taking the snapshot under the book lock.
    async fn persist(&self) {
        let snapshot = self.book().snapshot();
        if let Err(e) = self.store.save(&snapshot).await {
            error!("Failed to save position state: {e:#}");
            self.send_event(EngineEvent::Log(format!("❌ State save failed: {e}")));
        }
    }

    /// Per-call timeout so one hung exchange call skips a pair instead of
    /// stalling the tick forever.
    async fn call<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        let secs = self.config.engine.call_timeout_secs;
        match timeout(Duration::from_secs(secs), fut).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout(secs).into()),
        }
    }

    fn quote_asset(&self) -> &str {
        self.config
            .pairs
            .first()
            .and_then(|p| split_pair(p))
            .map(|(_, quote)| quote)
            .unwrap_or("USDT")
    }

    fn book(&self) -> MutexGuard<'_, PositionBook> {
        self.book.lock().expect("position book lock poisoned")
    }

    fn last_price_map(&self) -> MutexGuard<'_, HashMap<String, f64>> {
        self.last_prices.lock().expect("price map lock poisoned")
    }

    fn emit_log(&self, text: &str) {
        info!("{text}");
        self.send_event(EngineEvent::Log(text.to_string()));
    }

    fn send_event(&self, event: EngineEvent) {
        match self.event_sender.try_send(event) {
            Ok(_) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {}
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!("Event channel closed! Consumer is likely dead.");
            }
        }
    }
}

fn classify(e: anyhow::Error) -> EngineError {
    match e.downcast::<EngineError>() {
        Ok(err) => err,
        Err(other) => EngineError::Exchange(format!("{other:#}")),
    }
}
