//! Progress reporting for long distance-cache builds (feature `progress`).
//!
//! Components
//! -----------------
//! * [`IterTimer`] – per-batch durations smoothed with an exponential moving average,
//!   `ema ← α·dt + (1–α)·ema`, initialised on the first tick.
//! * [`fmt_dur`] – short human-readable durations (`"253µs"`, `"42ms"`, `"3.14s"`).
//! * [`rows_progress_bar`] – the bar shown while cache rows are filled.
//!
//! Only the cache build uses these; the merge loop reports through `tracing`.
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};

pub struct IterTimer {
    last: Instant,
    ema_ns: f64,
    alpha: f64,
    count: u64,
}

impl IterTimer {
    /// `alpha` in `(0, 1]`; `1.0` disables smoothing.
    pub fn new(alpha: f64) -> Self {
        Self {
            last: Instant::now(),
            ema_ns: 0.0,
            alpha,
            count: 0,
        }
    }

    #[inline]
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let dt = now.duration_since(self.last);
        self.last = now;
        self.count += 1;

        let dt_ns = dt.as_nanos() as f64;
        self.ema_ns = if self.count == 1 {
            dt_ns
        } else {
            self.alpha * dt_ns + (1.0 - self.alpha) * self.ema_ns
        };
        dt
    }

    #[inline]
    pub fn avg(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(self.ema_ns as u64)
        }
    }
}

#[inline]
pub fn fmt_dur(d: Duration) -> String {
    let us = d.as_micros();
    if us < 1_000 {
        format!("{us}µs")
    } else if d.as_millis() < 1_000 {
        format!("{}ms", d.as_millis())
    } else {
        format!("{:.2}s", d.as_secs_f32())
    }
}

/// Progress bar counting filled cache rows.
pub fn rows_progress_bar(total_rows: u64) -> ProgressBar {
    let pb = ProgressBar::new(total_rows.max(1));
    let style = ProgressStyle::with_template(
        "{bar:40.cyan/blue} {pos}/{len} rows ({percent:>3}%) | ETA {eta_precise} | {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.enable_steady_tick(Duration::from_millis(200));
    pb
}
