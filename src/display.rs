//! Operator-facing result sink.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::warn;

use crate::models::{BatchMeta, RuleOutcome, Verdict};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayAction {
    None,
    Quit,
    Pause,
    Resume,
}

/// Where finished batches are shown. `show` is called once per loop
/// iteration and paces the loop.
pub trait DisplaySink {
    fn update(&mut self, outcomes: &[RuleOutcome], verdict: Verdict, meta: &BatchMeta);

    fn show(&mut self, wait: Duration) -> DisplayAction;

    fn close(&mut self);
}

/// Prints each batch to stdout and turns Ctrl+C into [`DisplayAction::Quit`].
pub struct ConsoleDisplay {
    interrupted: Arc<AtomicBool>,
    quiet: bool,
    max_history: usize,
    history: VecDeque<(u64, Verdict)>,
    total_batches: u64,
    total_ok: u64,
    total_ng: u64,
}

impl ConsoleDisplay {
    pub fn new(max_history: usize) -> Self {
        Self {
            interrupted: Arc::new(AtomicBool::new(false)),
            quiet: false,
            max_history,
            history: VecDeque::with_capacity(max_history),
            total_batches: 0,
            total_ok: 0,
            total_ng: 0,
        }
    }

    /// Route Ctrl+C into this display. Only the first handler in a process wins.
    pub fn with_interrupt_handler(self) -> Self {
        let flag = self.interrupted.clone();
        if let Err(err) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
            warn!("Failed to install Ctrl+C handler: {err}");
        }
        self
    }

    /// Keep counting batches without printing them.
    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Flag that ends the loop on the next `show`.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        self.interrupted.clone()
    }

    pub fn totals(&self) -> (u64, u64, u64) {
        (self.total_batches, self.total_ok, self.total_ng)
    }

    pub fn history(&self) -> Vec<(u64, Verdict)> {
        self.history.iter().copied().collect()
    }
}

impl DisplaySink for ConsoleDisplay {
    fn update(&mut self, outcomes: &[RuleOutcome], verdict: Verdict, meta: &BatchMeta) {
        self.total_batches += 1;
        match verdict {
            Verdict::Ok => self.total_ok += 1,
            Verdict::Ng => self.total_ng += 1,
        }
        if self.max_history > 0 {
            if self.history.len() == self.max_history {
                self.history.pop_front();
            }
            self.history.push_back((meta.batch_num, verdict));
        }
        if self.quiet {
            return;
        }

        let rule = "=".repeat(70);
        println!("\n{}", rule);
        println!(
            "BATCH #{} [{}] - RESULT: {} | Time: {:.2}s",
            meta.batch_num,
            meta.product_code,
            verdict,
            meta.batch_time.as_secs_f64()
        );
        println!("{}", rule);
        for outcome in outcomes {
            let status = if outcome.passed { "[OK]" } else { "[NG]" };
            println!("  {} {} ({}): {}", status, outcome.rule_id, outcome.camera, outcome.reason);
        }
        println!("{}", rule);
        let recent: Vec<&str> = self.history.iter().map(|(_, v)| v.as_str()).collect();
        println!(
            "Total: {} | OK: {} | NG: {} | Recent: {}\n",
            self.total_batches,
            self.total_ok,
            self.total_ng,
            recent.join(" ")
        );
    }

    fn show(&mut self, wait: Duration) -> DisplayAction {
        if self.interrupted.load(Ordering::SeqCst) {
            return DisplayAction::Quit;
        }
        if !wait.is_zero() {
            std::thread::sleep(wait);
        }
        if self.interrupted.load(Ordering::SeqCst) {
            DisplayAction::Quit
        } else {
            DisplayAction::None
        }
    }

    fn close(&mut self) {
        println!(
            "Session: {} batches, {} OK, {} NG",
            self.total_batches, self.total_ok, self.total_ng
        );
    }
}
