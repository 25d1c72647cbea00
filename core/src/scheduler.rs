//! Fixed-timestep tick scheduler.
//!
//! RULES:
//!   - The simulation only advances inside `advance()`, in whole ticks.
//!   - A failing tick or render callback is logged and skipped; the
//!     scheduler keeps running on the next invocation.
//!   - Render runs once per `advance()`, after the drain, and only reads.
//!   - `stop()` takes effect before the next tick and is idempotent.

use crate::{
    clock::SimulationClock,
    config::SchedulerConfig,
    error::{SimError, SimResult},
    types::Tick,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// What the tick handler wants the scheduler to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickFlow {
    Continue,
    Stop,
}

/// The tick/render pair driven by the scheduler.
pub trait TickHandler {
    /// Advance the simulation by exactly one fixed step. Must not block.
    fn on_tick(&mut self, tick: Tick, dt_secs: f64) -> SimResult<TickFlow>;

    /// Present the current state, `alpha` of the way towards the next tick.
    fn on_render(&self, alpha: f64) -> SimResult<()>;
}

/// Cloneable handle that stops a scheduler from anywhere.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of one `advance()` call.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AdvanceReport {
    pub ticks_run:      u64,
    pub interpolation:  f64,
    /// Wall time thrown away by the accumulator clamp.
    pub discarded_ms:   f64,
    /// Whole ticks dropped because the safety cap was reached.
    pub dropped_ticks:  u64,
    pub tick_failures:  u32,
}

pub struct TickScheduler<H: TickHandler> {
    clock:   SimulationClock,
    handler: H,
    stop:    StopHandle,
}

impl<H: TickHandler> TickScheduler<H> {
    /// Single explicit construction point: a bad config fails loudly.
    pub fn new(config: &SchedulerConfig, handler: H) -> SimResult<Self> {
        if config.tick_interval_ms == 0 {
            return Err(SimError::Initialization {
                reason: "tick interval must be positive".into(),
            });
        }
        if !(config.max_accumulator_ms >= config.tick_interval_ms as f64) {
            return Err(SimError::Initialization {
                reason: format!(
                    "max accumulator {}ms is shorter than one tick ({}ms)",
                    config.max_accumulator_ms, config.tick_interval_ms
                ),
            });
        }
        Ok(Self {
            clock: SimulationClock::new(config),
            handler,
            stop: StopHandle::default(),
        })
    }

    pub fn clock(&self) -> &SimulationClock {
        &self.clock
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    /// Consume `elapsed_wall_ms` of wall time: run every whole tick it
    /// covers (bounded by the safety cap), then render once.
    pub fn advance(&mut self, elapsed_wall_ms: f64) -> AdvanceReport {
        let mut report = AdvanceReport::default();
        if self.is_stopped() {
            report.interpolation = self.clock.interpolation_factor();
            return report;
        }

        report.discarded_ms = self.clock.accumulate(elapsed_wall_ms);
        if report.discarded_ms > 0.0 {
            log::debug!("clamped {:.1}ms of wall time", report.discarded_ms);
        }

        let cap = self.clock.safety_cap();
        let dt = self.clock.tick_delta_secs();

        while self.clock.has_pending_tick() && report.ticks_run < cap {
            if self.is_stopped() {
                break;
            }
            let tick = self.clock.consume_tick();
            report.ticks_run += 1;

            match self.handler.on_tick(tick, dt) {
                Ok(TickFlow::Continue) => {}
                Ok(TickFlow::Stop) => {
                    log::info!("tick={tick} handler requested stop");
                    self.stop();
                }
                Err(e) => {
                    report.tick_failures += 1;
                    log::error!("tick={tick} tick callback failed: {e}");
                }
            }
        }

        if self.clock.has_pending_tick() {
            report.dropped_ticks = self.clock.discard_backlog();
            if !self.is_stopped() {
                log::warn!(
                    "safety cap of {cap} ticks reached, dropped {} ticks",
                    report.dropped_ticks
                );
            }
        }

        report.interpolation = self.clock.interpolation_factor();
        if let Err(e) = self.handler.on_render(report.interpolation) {
            log::error!("render callback failed: {e}");
        }
        report
    }
}
