#![forbid(unsafe_code)]

//! Development self-check harness.
//!
//! Replays the counter and coalescing scenarios against a scratch store and
//! history so a host can confirm the engine behaves before wiring real
//! commands into it. Nothing here touches the editor's live state.
//!
//! # Invariants
//!
//! - The gate moves `Uninit -> Running -> Idle` and never back to `Uninit`
//!   once a run has finished.
//! - At most one run is in flight per gate; a second caller while `Running`
//!   gets [`HarnessError::AlreadyRunning`].
//! - Once `Idle`, every caller receives the recorded report without re-running.
//!
//! # Failure Modes
//!
//! | Condition | Behavior |
//! |-----------|----------|
//! | Run future dropped mid-way | Gate returns to `Uninit`; next call re-runs |
//! | A scenario step errors | Recorded as a failed check, run continues |

use std::any::Any;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use easel_history::{
    Command, CommandContext, CommandError, ExecuteOptions, History, HistoryConfig, ManualClock,
    NullSink, SET_PATH, async_trait, register_builtins,
};
use easel_store::{Frozen, Snapshot, Store};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::error::HarnessError;

// ============================================================================
// Report
// ============================================================================

/// Outcome of one scenario step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HarnessCheck {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

/// Everything one self-check run observed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HarnessReport {
    pub checks: Vec<HarnessCheck>,
}

impl HarnessReport {
    /// True when every check passed.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    /// Names of the checks that failed.
    #[must_use]
    pub fn failures(&self) -> Vec<&'static str> {
        self.checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| c.name)
            .collect()
    }

    fn record(&mut self, name: &'static str, passed: bool, detail: impl Into<String>) {
        self.checks.push(HarnessCheck {
            name,
            passed,
            detail: detail.into(),
        });
    }
}

// ============================================================================
// Gate
// ============================================================================

/// Where a gate is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarnessState {
    Uninit,
    Running,
    Idle,
}

#[derive(Debug, Default)]
enum Slot {
    #[default]
    Uninit,
    Running,
    Idle(HarnessReport),
}

/// Single-run gate around the self-check.
#[derive(Debug, Clone, Default)]
pub struct HarnessGate {
    slot: Arc<Mutex<Slot>>,
}

/// What [`HarnessGate::begin`] decided.
#[derive(Debug)]
pub enum GateEntry {
    /// The caller owns the run and must [`finish`](RunTicket::finish) it.
    Run(RunTicket),
    /// A run already finished; here is its report.
    Done(HarnessReport),
}

/// Exclusive right to perform the run. Dropping it unfinished resets the gate.
#[derive(Debug)]
pub struct RunTicket {
    slot: Arc<Mutex<Slot>>,
    finished: bool,
}

impl HarnessGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> HarnessState {
        match &*self.lock() {
            Slot::Uninit => HarnessState::Uninit,
            Slot::Running => HarnessState::Running,
            Slot::Idle(_) => HarnessState::Idle,
        }
    }

    /// Recorded report, once the gate is `Idle`.
    #[must_use]
    pub fn report(&self) -> Option<HarnessReport> {
        match &*self.lock() {
            Slot::Idle(report) => Some(report.clone()),
            _ => None,
        }
    }

    /// Claim the run, or fetch the finished report.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::AlreadyRunning`] while another run is in flight.
    pub fn begin(&self) -> Result<GateEntry, HarnessError> {
        let mut slot = self.lock();
        match &*slot {
            Slot::Running => Err(HarnessError::AlreadyRunning),
            Slot::Idle(report) => Ok(GateEntry::Done(report.clone())),
            Slot::Uninit => {
                *slot = Slot::Running;
                Ok(GateEntry::Run(RunTicket {
                    slot: Arc::clone(&self.slot),
                    finished: false,
                }))
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RunTicket {
    /// Store the report and move the gate to `Idle`.
    pub fn finish(mut self, report: HarnessReport) -> HarnessReport {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Slot::Idle(report.clone());
        self.finished = true;
        report
    }
}

impl Drop for RunTicket {
    fn drop(&mut self) {
        if !self.finished {
            *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Slot::Uninit;
        }
    }
}

// ============================================================================
// Scenario
// ============================================================================

const COUNTER: &str = "counter";
const INC: &str = "inc";

struct Inc {
    amount: i64,
}

fn bump(store: &Store, delta: i64) -> Result<(), CommandError> {
    store.update_slice::<CommandError>(
        COUNTER,
        |c| Ok(Frozen::from(c.as_i64().unwrap_or_default() + delta)),
        "harness/inc",
    )
}

#[async_trait]
impl Command for Inc {
    fn label(&self) -> &str {
        "Increment"
    }

    fn meta(&self) -> Value {
        json!({ "amount": self.amount })
    }

    async fn execute(&mut self, ctx: &CommandContext) -> Result<Value, CommandError> {
        bump(ctx.store(), self.amount)?;
        Ok(Value::Null)
    }

    async fn undo(&mut self, ctx: &CommandContext) -> Result<(), CommandError> {
        bump(ctx.store(), -self.amount)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn counter(history: &History) -> i64 {
    history
        .store()
        .get_state()
        .value(COUNTER)
        .as_i64()
        .unwrap_or_default()
}

fn scratch(config: &HistoryConfig) -> (History, ManualClock) {
    let mut snapshot = Snapshot::new();
    snapshot.insert(COUNTER, json!(0));
    snapshot.insert("tools", json!({}));
    let clock = ManualClock::new();
    let mut history = History::with_config(Store::new(snapshot), Arc::new(NullSink), config.clone())
        .with_clock(Arc::new(clock.clone()));
    register_builtins(&mut history);
    history.register_command(INC, |payload: &Value| {
        let amount = payload["amount"]
            .as_i64()
            .ok_or_else(|| CommandError::InvalidPayload("amount must be an integer".into()))?;
        Ok(Box::new(Inc { amount }) as Box<dyn Command>)
    });
    (history, clock)
}

/// Run every scenario once and collect the results.
pub async fn run_scenarios(config: &HistoryConfig) -> HarnessReport {
    let mut report = HarnessReport::default();
    counter_scenario(config, &mut report).await;
    coalescing_scenario(config, &mut report).await;
    truncation_scenario(config, &mut report).await;
    if report.passed() {
        info!(checks = report.checks.len(), "self-check passed");
    } else {
        warn!(failures = ?report.failures(), "self-check failed");
    }
    report
}

async fn counter_scenario(config: &HistoryConfig, report: &mut HarnessReport) {
    let (mut history, _clock) = scratch(config);
    let opts = ExecuteOptions::default;

    let executed = async {
        history.execute(INC, &json!({ "amount": 2 }), opts()).await?;
        history.execute(INC, &json!({ "amount": 3 }), opts()).await
    }
    .await;
    if let Err(e) = executed {
        report.record("counter.execute", false, e.to_string());
        return;
    }
    let value = counter(&history);
    report.record(
        "counter.execute",
        value == 5 && history.can_undo(),
        format!("counter={value} can_undo={}", history.can_undo()),
    );

    let undone = history.undo().await;
    let value = counter(&history);
    report.record(
        "counter.undo",
        matches!(undone, Ok(true)) && value == 2,
        format!("undo={undone:?} counter={value}"),
    );

    let redone = history.redo().await;
    let value = counter(&history);
    report.record(
        "counter.redo",
        matches!(redone, Ok(true)) && value == 5,
        format!("redo={redone:?} counter={value}"),
    );
}

async fn coalescing_scenario(config: &HistoryConfig, report: &mut HarnessReport) {
    let (mut history, clock) = scratch(config);
    let window = config.default_window;
    let set = |size: u64| {
        json!({
            "slice": "tools",
            "path": "/brush/size",
            "value": size,
            "coalesceKey": "brush-size",
        })
    };

    let mut outcome = Vec::new();
    for size in [4, 8] {
        outcome.push(history.execute(SET_PATH, &set(size), ExecuteOptions::default()).await);
        clock.advance(window / 2);
    }
    let len = history.len();
    let revisions = history.entries().last().map_or(0, |e| e.revisions);
    report.record(
        "coalesce.collapse",
        outcome.iter().all(Result::is_ok) && len == 1 && revisions == 2,
        format!("len={len} revisions={revisions}"),
    );

    clock.advance(window + Duration::from_millis(1));
    let expired = history.execute(SET_PATH, &set(16), ExecuteOptions::default()).await;
    let len = history.len();
    report.record(
        "coalesce.window_expiry",
        expired.is_ok() && len == 2,
        format!("len={len}"),
    );
}

async fn truncation_scenario(config: &HistoryConfig, report: &mut HarnessReport) {
    let (mut history, _clock) = scratch(config);
    let steps = async {
        history
            .execute(INC, &json!({ "amount": 1 }), ExecuteOptions::default())
            .await?;
        history.undo().await?;
        history
            .execute(INC, &json!({ "amount": 7 }), ExecuteOptions::default())
            .await
    }
    .await;
    let can_redo = history.can_redo();
    report.record(
        "redo.truncation",
        steps.is_ok() && !can_redo && counter(&history) == 7,
        format!("can_redo={can_redo} counter={}", counter(&history)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(future)
    }

    #[test]
    fn scenarios_pass_with_defaults() {
        let report = block_on(run_scenarios(&HistoryConfig::default()));
        assert!(report.passed(), "{report:?}");
        assert_eq!(
            report.checks.iter().map(|c| c.name).collect::<Vec<_>>(),
            [
                "counter.execute",
                "counter.undo",
                "counter.redo",
                "coalesce.collapse",
                "coalesce.window_expiry",
                "redo.truncation",
            ]
        );
    }

    #[test]
    fn gate_lifecycle() {
        let gate = HarnessGate::new();
        assert_eq!(gate.state(), HarnessState::Uninit);

        let GateEntry::Run(ticket) = gate.begin().unwrap() else {
            panic!("fresh gate should hand out the run");
        };
        assert_eq!(gate.state(), HarnessState::Running);
        assert_eq!(gate.begin().unwrap_err(), HarnessError::AlreadyRunning);

        let mut report = HarnessReport::default();
        report.record("only", true, "");
        ticket.finish(report.clone());
        assert_eq!(gate.state(), HarnessState::Idle);
        assert_eq!(gate.report(), Some(report.clone()));
        assert!(matches!(gate.begin().unwrap(), GateEntry::Done(r) if r == report));
    }

    #[test]
    fn abandoned_ticket_resets_gate() {
        let gate = HarnessGate::new();
        let entry = gate.begin().unwrap();
        drop(entry);
        assert_eq!(gate.state(), HarnessState::Uninit);
        assert!(matches!(gate.begin().unwrap(), GateEntry::Run(_)));
    }

    #[test]
    fn clones_share_one_lifecycle() {
        let gate = HarnessGate::new();
        let other = gate.clone();
        let _ticket = gate.begin().unwrap();
        assert_eq!(other.state(), HarnessState::Running);
    }

    #[test]
    fn failed_check_is_reported() {
        let mut report = HarnessReport::default();
        report.record("a", true, "");
        report.record("b", false, "boom");
        assert!(!report.passed());
        assert_eq!(report.failures(), vec!["b"]);
    }
}
