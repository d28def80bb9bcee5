use chrono::{DateTime, Datelike, Timelike, Utc};
use std::f64::consts::PI;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::indicators::{
    self, atr, bollinger_bands, cci, ema, finite_or_nan, highest, lowest, macd_default, obv,
    pct_change, rate_of_change, rolling_std, rsi, safe_ratio, shift, sma, stochastic,
    volume_price_trend,
};
use crate::types::CandleSeries;

const SMA_PERIODS: [usize; 6] = [5, 10, 20, 50, 100, 200];
const EMA_PERIODS: [usize; 4] = [12, 26, 50, 200];

/// Column-major table of candle features.
///
/// Every column has exactly one value per input candle; undefined values are
/// `NaN` and are dropped later by the sequence labeler.
#[derive(Debug, Clone, Default)]
pub struct FeatureFrame {
    pub timestamps: Vec<Option<DateTime<Utc>>>,
    columns: Vec<String>,
    values: Vec<Vec<f64>>,
}

impl FeatureFrame {
    pub fn n_rows(&self) -> usize {
        self.timestamps.len()
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.column_index(name).map(|i| self.values[i].as_slice())
    }

    pub fn value(&self, row: usize, column: usize) -> f64 {
        self.values[column][row]
    }

    pub fn row(&self, row: usize) -> Vec<f64> {
        self.values.iter().map(|col| col[row]).collect()
    }

    /// True when every feature of the row is defined
    pub fn row_is_complete(&self, row: usize) -> bool {
        self.values.iter().all(|col| !col[row].is_nan())
    }

    fn push(&mut self, name: &str, values: Vec<f64>) {
        debug_assert_eq!(values.len(), self.n_rows(), "column {} has wrong length", name);
        self.columns.push(name.to_string());
        self.values.push(values.into_iter().map(finite_or_nan).collect());
    }

    fn push_flags(&mut self, name: &str, flags: Vec<bool>) {
        self.push(name, flags.into_iter().map(|f| if f { 1.0 } else { 0.0 }).collect());
    }
}

/// Turns OHLCV candles into the full indicator table
#[derive(Debug, Clone, Default)]
pub struct FeatureEngine;

impl FeatureEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn compute(&self, series: &CandleSeries) -> Result<FeatureFrame> {
        if series.is_empty() {
            return Err(PipelineError::InsufficientData("Candle table is empty".to_string()));
        }

        let opens = series.opens();
        let highs = series.highs();
        let lows = series.lows();
        let closes = series.closes();
        let volumes = series.volumes();

        let mut frame = FeatureFrame {
            timestamps: series.candles.iter().map(|c| c.timestamp).collect(),
            ..Default::default()
        };

        frame.push("open", opens.clone());
        frame.push("high", highs.clone());
        frame.push("low", lows.clone());
        frame.push("close", closes.clone());
        frame.push("volume", volumes.clone());
        let base_columns = frame.n_columns();

        Self::price_features(&mut frame, &opens, &highs, &lows, &closes);
        Self::momentum_features(&mut frame, &highs, &lows, &closes);
        Self::volatility_features(&mut frame, &highs, &lows, &closes);
        Self::volume_features(&mut frame, &closes, &volumes);
        Self::pattern_features(&mut frame, series, &highs, &lows, &closes);
        Self::candle_shape_features(&mut frame, &opens, &highs, &lows, &closes, &volumes);
        Self::lag_features(&mut frame, &closes);

        if series.has_timestamps() {
            Self::calendar_features(&mut frame);
        } else {
            debug!("No timestamps on candles, skipping calendar features");
        }

        info!(
            "Calculated {} technical indicators over {} candles",
            frame.n_columns() - base_columns,
            frame.n_rows()
        );
        Ok(frame)
    }

    fn price_features(
        frame: &mut FeatureFrame,
        opens: &[f64],
        highs: &[f64],
        lows: &[f64],
        closes: &[f64],
    ) {
        for period in SMA_PERIODS {
            let avg = sma(closes, period);
            frame.push(&format!("sma_{}_ratio", period), safe_ratio(closes, &avg));
            frame.push(&format!("sma_{}", period), avg);
        }

        for period in EMA_PERIODS {
            let avg = ema(closes, period);
            frame.push(&format!("ema_{}_ratio", period), safe_ratio(closes, &avg));
            frame.push(&format!("ema_{}", period), avg);
        }

        let bb = bollinger_bands(closes, 20, 2.0);
        frame.push("bb_middle", bb.middle);
        frame.push("bb_upper", bb.upper);
        frame.push("bb_lower", bb.lower);
        frame.push("bb_width", bb.width);
        frame.push("bb_position", bb.position);

        frame.push("price_change", pct_change(closes, 1));
        frame.push("price_change_2", pct_change(closes, 2));
        frame.push("price_change_5", pct_change(closes, 5));

        let hl: Vec<f64> = highs.iter().zip(lows).map(|(h, l)| h - l).collect();
        frame.push("hl_spread", safe_ratio(&hl, closes));
        let oc: Vec<f64> = closes.iter().zip(opens).map(|(c, o)| c - o).collect();
        frame.push("oc_spread", safe_ratio(&oc, opens));
    }

    fn momentum_features(frame: &mut FeatureFrame, highs: &[f64], lows: &[f64], closes: &[f64]) {
        frame.push("rsi", rsi(closes, 14));

        let macd = macd_default(closes);
        frame.push("macd", macd.macd_line);
        frame.push("macd_signal", macd.signal_line);
        frame.push("macd_histogram", macd.histogram);

        let stoch = stochastic(highs, lows, closes, 14, 3);
        frame.push("stoch_k", stoch.k);
        frame.push("stoch_d", stoch.d);
        frame.push("williams_r", stoch.williams_r);

        frame.push("roc", rate_of_change(closes, 12));
        frame.push("cci", cci(highs, lows, closes, 20));
    }

    fn volatility_features(frame: &mut FeatureFrame, highs: &[f64], lows: &[f64], closes: &[f64]) {
        frame.push("atr", atr(highs, lows, closes, 14));

        let prev = shift(closes, 1);
        let log_returns: Vec<f64> = closes.iter().zip(&prev).map(|(c, p)| (c / p).ln()).collect();
        let annualized = rolling_std(&log_returns, 20)
            .into_iter()
            .map(|s| s * 252f64.sqrt())
            .collect();
        frame.push("log_returns", log_returns);
        frame.push("volatility_20", annualized);

        frame.push("price_volatility", safe_ratio(&rolling_std(closes, 20), &sma(closes, 20)));
    }

    fn volume_features(frame: &mut FeatureFrame, closes: &[f64], volumes: &[f64]) {
        let volume_sma_20 = sma(volumes, 20);
        frame.push("volume_sma_50", sma(volumes, 50));
        frame.push("volume_ratio", safe_ratio(volumes, &volume_sma_20));
        frame.push("volume_sma_20", volume_sma_20);

        let obv_series = obv(closes, volumes);
        frame.push("obv_sma", sma(&obv_series, 20));
        frame.push("obv", obv_series);

        let vpt = volume_price_trend(volumes, &pct_change(closes, 1));
        frame.push("vpt", vpt.vpt);
        frame.push("vpt_cumulative", vpt.cumulative);
    }

    fn pattern_features(
        frame: &mut FeatureFrame,
        series: &CandleSeries,
        highs: &[f64],
        lows: &[f64],
        closes: &[f64],
    ) {
        let resistance = highest(highs, 20);
        let support = lowest(lows, 20);

        let resistance_gap: Vec<f64> = resistance.iter().zip(closes).map(|(r, c)| r - c).collect();
        let support_gap: Vec<f64> = closes.iter().zip(&support).map(|(c, s)| c - s).collect();
        frame.push("resistance_distance", safe_ratio(&resistance_gap, closes));
        frame.push("support_distance", safe_ratio(&support_gap, closes));
        frame.push("resistance_20", resistance);
        frame.push("support_20", support);

        frame.push_flags("is_doji", series.candles.iter().map(|c| c.is_doji()).collect());
        frame.push_flags("is_hammer", series.candles.iter().map(|c| c.is_hammer()).collect());

        let prev_high = shift(highs, 1);
        let prev_low = shift(lows, 1);
        frame.push_flags("gap_up", lows.iter().zip(&prev_high).map(|(l, ph)| l > ph).collect());
        frame.push_flags("gap_down", highs.iter().zip(&prev_low).map(|(h, pl)| h < pl).collect());
    }

    /// Candle geometry and short-horizon momentum on top of the classic set
    fn candle_shape_features(
        frame: &mut FeatureFrame,
        opens: &[f64],
        highs: &[f64],
        lows: &[f64],
        closes: &[f64],
        volumes: &[f64],
    ) {
        frame.push("ema_9", ema(closes, 9));
        frame.push("ema_21", ema(closes, 21));
        frame.push("ema_spread_pct", indicators::ema_spread_pct(closes, 9, 21));

        let atr_14 = atr(highs, lows, closes, 14);
        frame.push(
            "atr_pct",
            safe_ratio(&atr_14, closes).into_iter().map(|v| v * 100.0).collect(),
        );

        let n = closes.len();
        let upper_wick: Vec<f64> = (0..n).map(|i| highs[i] - closes[i].max(opens[i])).collect();
        let lower_wick: Vec<f64> = (0..n).map(|i| closes[i].min(opens[i]) - lows[i]).collect();
        let body: Vec<f64> = (0..n).map(|i| (closes[i] - opens[i]).abs()).collect();
        let range: Vec<f64> = (0..n).map(|i| highs[i] - lows[i]).collect();
        frame.push("upper_wick", safe_ratio(&upper_wick, closes));
        frame.push("lower_wick", safe_ratio(&lower_wick, closes));
        frame.push("body_pct", safe_ratio(&body, &range));

        let typical: Vec<f64> = (0..n).map(|i| (highs[i] + lows[i] + closes[i]) / 3.0).collect();
        frame.push("typical_price", typical);
        let ohlc4: Vec<f64> = (0..n)
            .map(|i| (opens[i] + highs[i] + lows[i] + closes[i]) / 4.0)
            .collect();
        frame.push("ohlc4", ohlc4);

        frame.push("volume_change", pct_change(volumes, 1));
        frame.push("log_volume", volumes.iter().map(|v| (1.0 + v.max(0.0)).ln()).collect());
        frame.push("price_change_10", pct_change(closes, 10));
        let prev_10 = shift(closes, 10);
        frame.push("momentum_10", closes.iter().zip(&prev_10).map(|(c, p)| c - p).collect());
    }

    /// Lagged returns and oscillators. These keep the table above 80 derived
    /// columns when candles carry no timestamps.
    fn lag_features(frame: &mut FeatureFrame, closes: &[f64]) {
        let returns = pct_change(closes, 1);
        for lag in [1, 2, 3, 5] {
            frame.push(&format!("return_lag_{}", lag), shift(&returns, lag));
        }
        frame.push("return_mean_5", sma(&returns, 5));
        frame.push("return_std_5", rolling_std(&returns, 5));

        let deviation: Vec<f64> = closes.iter().zip(sma(closes, 20)).map(|(c, m)| c - m).collect();
        frame.push("close_zscore_20", safe_ratio(&deviation, &rolling_std(closes, 20)));

        for name in ["rsi", "macd_histogram", "volume_ratio"] {
            let lagged = frame.column(name).map(|col| shift(col, 1));
            if let Some(values) = lagged {
                frame.push(&format!("{}_lag_1", name), values);
            }
        }
    }

    fn calendar_features(frame: &mut FeatureFrame) {
        let stamps: Vec<DateTime<Utc>> = frame.timestamps.iter().flatten().copied().collect();

        let hour: Vec<f64> = stamps.iter().map(|t| t.hour() as f64).collect();
        let day_of_week: Vec<f64> = stamps
            .iter()
            .map(|t| t.weekday().num_days_from_monday() as f64)
            .collect();

        frame.push("day_of_month", stamps.iter().map(|t| t.day() as f64).collect());
        frame.push("month", stamps.iter().map(|t| t.month() as f64).collect());
        frame.push("quarter", stamps.iter().map(|t| ((t.month() - 1) / 3 + 1) as f64).collect());

        frame.push("hour_sin", hour.iter().map(|h| (2.0 * PI * h / 24.0).sin()).collect());
        frame.push("hour_cos", hour.iter().map(|h| (2.0 * PI * h / 24.0).cos()).collect());
        frame.push("day_sin", day_of_week.iter().map(|d| (2.0 * PI * d / 7.0).sin()).collect());
        frame.push("day_cos", day_of_week.iter().map(|d| (2.0 * PI * d / 7.0).cos()).collect());
        frame.push("hour", hour);
        frame.push("day_of_week", day_of_week);
    }

    /// Absolute correlation of every feature with the next-step return,
    /// strongest first
    pub fn feature_importance_by_correlation(frame: &FeatureFrame) -> Vec<(String, f64)> {
        let Some(closes) = frame.column("close") else {
            return Vec::new();
        };
        let n = closes.len();
        let future_return: Vec<f64> = (0..n)
            .map(|i| if i + 1 < n { closes[i + 1] / closes[i] - 1.0 } else { f64::NAN })
            .collect();

        let mut scores: Vec<(String, f64)> = frame
            .columns()
            .iter()
            .enumerate()
            .filter_map(|(j, name)| {
                let corr = pearson(&frame.values[j], &future_return);
                (!corr.is_nan()).then(|| (name.clone(), corr.abs()))
            })
            .collect();
        scores.sort_by(|a, b| b.1.total_cmp(&a.1));
        scores
    }
}

/// Pearson correlation over pairwise-complete observations
fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let pairs: Vec<(f64, f64)> = a
        .iter()
        .zip(b)
        .filter(|(x, y)| !x.is_nan() && !y.is_nan())
        .map(|(x, y)| (*x, *y))
        .collect();
    if pairs.len() < 2 {
        return f64::NAN;
    }
    let n = pairs.len() as f64;
    let mean_a = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_b = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let cov: f64 = pairs.iter().map(|(x, y)| (x - mean_a) * (y - mean_b)).sum();
    let var_a: f64 = pairs.iter().map(|(x, _)| (x - mean_a).powi(2)).sum();
    let var_b: f64 = pairs.iter().map(|(_, y)| (y - mean_b).powi(2)).sum();
    finite_or_nan(cov / (var_a.sqrt() * var_b.sqrt()))
}
