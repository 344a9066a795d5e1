//! Incremental technical indicators
//!
//! The pipeline keeps a fixed-capacity ring of recent bars and updates every
//! indicator in O(1) per bar instead of recomputing whole columns. EMA and
//! Bollinger Bands come from the `ta` crate in streaming mode. RSI and ATR
//! use Wilder's smoothing (same as backtrader), which `ta` does not provide:
//! value = (prev * (period - 1) + current) / period, seeded with an SMA of
//! the first `period` inputs.

use std::collections::VecDeque;

use anyhow::{anyhow, Result};
use ta::indicators::{BollingerBands, ExponentialMovingAverage};
use ta::Next;

use crate::Bar;

/// Window capacity; large enough for the longest default lookback with
/// generous warmup headroom.
pub const WINDOW_CAPACITY: usize = 500;

/// Indicator periods. Not part of the per-symbol policy; overridable at
/// pipeline construction.
#[derive(Debug, Clone)]
pub struct IndicatorConfig {
    pub rsi_period: usize,
    pub atr_period: usize,
    pub ema_fast_period: usize,
    pub ema_mid_period: usize,
    pub ema_slow_period: usize,
    pub bb_period: usize,
    pub bb_std: f64,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        IndicatorConfig {
            rsi_period: 14,
            atr_period: 14,
            ema_fast_period: 9,
            ema_mid_period: 21,
            ema_slow_period: 50,
            bb_period: 20,
            bb_std: 2.0,
        }
    }
}

/// Latest indicator values. Fields are `None` until the corresponding
/// indicator has enough history; consumers suppress dependent behavior
/// until then.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub close: f64,
    pub rsi: Option<f64>,
    pub atr: Option<f64>,
    pub atr_pct: Option<f64>,
    pub ema_fast: Option<f64>,
    pub ema_mid: Option<f64>,
    pub ema_slow: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_lower: Option<f64>,
    /// ATR% from the previous bar, for volatility-spike detection
    pub prev_atr_pct: Option<f64>,
}

/// Incremental RSI with Wilder's smoothing
#[derive(Debug, Clone)]
struct WilderRsi {
    period: usize,
    prev_close: Option<f64>,
    avg_gain: f64,
    avg_loss: f64,
    /// Number of price changes consumed
    count: usize,
}

impl WilderRsi {
    fn new(period: usize) -> Self {
        Self {
            period,
            prev_close: None,
            avg_gain: 0.0,
            avg_loss: 0.0,
            count: 0,
        }
    }

    fn next(&mut self, close: f64) -> Option<f64> {
        let prev = match self.prev_close.replace(close) {
            Some(p) => p,
            None => return None,
        };

        let change = close - prev;
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        self.count += 1;

        if self.count < self.period {
            self.avg_gain += gain;
            self.avg_loss += loss;
            return None;
        }

        if self.count == self.period {
            // Seed with SMA of the first `period` changes
            self.avg_gain = (self.avg_gain + gain) / self.period as f64;
            self.avg_loss = (self.avg_loss + loss) / self.period as f64;
        } else {
            let n = self.period as f64;
            self.avg_gain = (self.avg_gain * (n - 1.0) + gain) / n;
            self.avg_loss = (self.avg_loss * (n - 1.0) + loss) / n;
        }

        if self.avg_loss == 0.0 {
            return Some(100.0);
        }
        let rs = self.avg_gain / self.avg_loss;
        Some(100.0 - 100.0 / (1.0 + rs))
    }
}

/// Incremental ATR with Wilder's smoothing
#[derive(Debug, Clone)]
struct WilderAtr {
    period: usize,
    prev_close: Option<f64>,
    atr: f64,
    /// Number of true ranges consumed
    count: usize,
}

impl WilderAtr {
    fn new(period: usize) -> Self {
        Self {
            period,
            prev_close: None,
            atr: 0.0,
            count: 0,
        }
    }

    fn next(&mut self, high: f64, low: f64, close: f64) -> Option<f64> {
        let tr = match self.prev_close {
            Some(prev) => {
                let hl = high - low;
                let hc = (high - prev).abs();
                let lc = (low - prev).abs();
                hl.max(hc).max(lc)
            }
            // First bar has no prior close; TR is the bar range
            None => high - low,
        };
        self.prev_close = Some(close);
        self.count += 1;

        if self.count < self.period {
            self.atr += tr;
            return None;
        }

        if self.count == self.period {
            self.atr = (self.atr + tr) / self.period as f64;
        } else {
            let n = self.period as f64;
            self.atr = (self.atr * (n - 1.0) + tr) / n;
        }

        Some(self.atr)
    }
}

/// Warmup-gated EMA backed by the `ta` crate
#[derive(Debug, Clone)]
struct GatedEma {
    inner: ExponentialMovingAverage,
    period: usize,
    count: usize,
}

impl GatedEma {
    fn new(period: usize) -> Result<Self> {
        Ok(Self {
            inner: ExponentialMovingAverage::new(period)
                .map_err(|_| anyhow!("invalid EMA period {}", period))?,
            period,
            count: 0,
        })
    }

    fn next(&mut self, value: f64) -> Option<f64> {
        let out = self.inner.next(value);
        self.count += 1;
        (self.count >= self.period).then_some(out)
    }
}

/// Warmup-gated Bollinger Bands backed by the `ta` crate
#[derive(Debug, Clone)]
struct GatedBollinger {
    inner: BollingerBands,
    period: usize,
    count: usize,
}

impl GatedBollinger {
    fn new(period: usize, num_std: f64) -> Result<Self> {
        Ok(Self {
            inner: BollingerBands::new(period, num_std)
                .map_err(|_| anyhow!("invalid Bollinger parameters ({}, {})", period, num_std))?,
            period,
            count: 0,
        })
    }

    fn next(&mut self, value: f64) -> Option<(f64, f64)> {
        let out = self.inner.next(value);
        self.count += 1;
        (self.count >= self.period).then_some((out.upper, out.lower))
    }
}

/// The indicator pipeline: rolling bar window plus incremental indicator
/// state. One instance per symbol, owned by the engine.
pub struct IndicatorPipeline {
    window: VecDeque<Bar>,
    rsi: WilderRsi,
    atr: WilderAtr,
    ema_fast: GatedEma,
    ema_mid: GatedEma,
    ema_slow: GatedEma,
    bollinger: GatedBollinger,
    snapshot: Option<Snapshot>,
}

impl IndicatorPipeline {
    pub fn new(config: IndicatorConfig) -> Result<Self> {
        Ok(Self {
            window: VecDeque::with_capacity(WINDOW_CAPACITY),
            rsi: WilderRsi::new(config.rsi_period),
            atr: WilderAtr::new(config.atr_period),
            ema_fast: GatedEma::new(config.ema_fast_period)?,
            ema_mid: GatedEma::new(config.ema_mid_period)?,
            ema_slow: GatedEma::new(config.ema_slow_period)?,
            bollinger: GatedBollinger::new(config.bb_period, config.bb_std)?,
            snapshot: None,
        })
    }

    /// Consume one bar and replace the snapshot. The caller is responsible
    /// for bar hygiene; this assumes finite, validated values.
    pub fn update(&mut self, bar: &Bar) {
        if self.window.len() == WINDOW_CAPACITY {
            self.window.pop_front();
        }
        self.window.push_back(bar.clone());

        let rsi = self.rsi.next(bar.close);
        let atr = self.atr.next(bar.high, bar.low, bar.close);
        let atr_pct = atr.map(|a| a / bar.close * 100.0);
        let ema_fast = self.ema_fast.next(bar.close);
        let ema_mid = self.ema_mid.next(bar.close);
        let ema_slow = self.ema_slow.next(bar.close);
        let bands = self.bollinger.next(bar.close);

        let prev_atr_pct = self.snapshot.as_ref().and_then(|s| s.atr_pct);

        self.snapshot = Some(Snapshot {
            close: bar.close,
            rsi,
            atr,
            atr_pct,
            ema_fast,
            ema_mid,
            ema_slow,
            bb_upper: bands.map(|(u, _)| u),
            bb_lower: bands.map(|(_, l)| l),
            prev_atr_pct,
        });
    }

    /// Latest snapshot, if any bar has been consumed
    pub fn latest(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    /// Number of bars currently held in the window
    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                Bar::new_unchecked(
                    start + Duration::minutes(i as i64),
                    c,
                    c * 1.005,
                    c * 0.995,
                    c,
                    1_000.0,
                )
            })
            .collect()
    }

    fn warmed_pipeline(closes: &[f64]) -> IndicatorPipeline {
        let mut pipeline = IndicatorPipeline::new(IndicatorConfig::default()).unwrap();
        for bar in bars_from_closes(closes) {
            pipeline.update(&bar);
        }
        pipeline
    }

    #[test]
    fn test_rsi_warmup_and_range() {
        let mut rsi = WilderRsi::new(14);
        let closes = [
            44.0, 44.25, 44.5, 43.75, 44.5, 44.25, 44.0, 43.5, 44.0, 44.5, 45.0, 45.25, 45.5,
            45.0, 44.75,
        ];
        let mut last = None;
        for (i, &c) in closes.iter().enumerate() {
            last = rsi.next(c);
            if i < 14 {
                assert!(last.is_none(), "RSI must be unavailable at bar {}", i);
            }
        }
        let value = last.unwrap();
        assert!((0.0..=100.0).contains(&value));
    }

    #[test]
    fn test_rsi_all_gains_saturates() {
        let mut rsi = WilderRsi::new(14);
        let mut last = None;
        for i in 0..30 {
            last = rsi.next(100.0 + i as f64);
        }
        assert_eq!(last, Some(100.0));
    }

    #[test]
    fn test_atr_warmup_and_wilder_seed() {
        let mut atr = WilderAtr::new(3);
        // Constant range of 1.0 with no gaps: ATR settles at 1.0
        assert!(atr.next(10.5, 9.5, 10.0).is_none());
        assert!(atr.next(10.5, 9.5, 10.0).is_none());
        let seeded = atr.next(10.5, 9.5, 10.0).unwrap();
        assert!((seeded - 1.0).abs() < 1e-9);
        let smoothed = atr.next(10.5, 9.5, 10.0).unwrap();
        assert!((smoothed - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_pipeline_snapshot_availability() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + (i % 7) as f64 * 0.5).collect();
        let pipeline = warmed_pipeline(&closes);
        let snap = pipeline.latest().unwrap();

        assert!(snap.rsi.is_some());
        assert!(snap.atr.is_some());
        assert!(snap.atr_pct.is_some());
        assert!(snap.ema_fast.is_some());
        assert!(snap.ema_mid.is_some());
        assert!(snap.ema_slow.is_some());
        assert!(snap.bb_upper.is_some());
        assert!(snap.bb_lower.is_some());
        assert!(snap.prev_atr_pct.is_some());
        assert!(snap.bb_upper.unwrap() > snap.bb_lower.unwrap());
    }

    #[test]
    fn test_pipeline_slow_ema_unavailable_before_warmup() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64 * 0.1).collect();
        let pipeline = warmed_pipeline(&closes);
        let snap = pipeline.latest().unwrap();

        // 30 bars: fast (9) and mid (21) are warm, slow (50) is not
        assert!(snap.ema_fast.is_some());
        assert!(snap.ema_mid.is_some());
        assert!(snap.ema_slow.is_none());
    }

    #[test]
    fn test_window_capacity_bounded() {
        let closes: Vec<f64> = (0..WINDOW_CAPACITY + 100).map(|i| 100.0 + i as f64).collect();
        let pipeline = warmed_pipeline(&closes);
        assert_eq!(pipeline.len(), WINDOW_CAPACITY);
    }

    #[test]
    fn test_prev_atr_pct_lags_current() {
        let mut pipeline = IndicatorPipeline::new(IndicatorConfig::default()).unwrap();
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64 * 0.2).collect();
        let bars = bars_from_closes(&closes);
        let mut previous_atr_pct = None;
        for bar in &bars {
            pipeline.update(bar);
            let snap = pipeline.latest().unwrap();
            assert_eq!(snap.prev_atr_pct, previous_atr_pct);
            previous_atr_pct = snap.atr_pct;
        }
    }
}
