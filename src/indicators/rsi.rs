/// Calculate the Relative Strength Index series
///
/// RSI measures the magnitude of recent price changes to evaluate
/// overbought or oversold conditions, using simple moving averages of
/// gains and losses over the trailing `period` price changes.
///
/// Values:
/// - RSI > 70: Overbought
/// - RSI < 30: Oversold
///
/// The output is aligned one-to-one with `prices`. The first `period`
/// positions are `None` because fewer than `period` changes precede them.
/// A window with losses but no gains reads 0, a window with gains but no
/// losses saturates at 100, and a window with neither is `None`.
pub fn rsi_series(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut series = vec![None; prices.len()];
    if period == 0 || prices.len() < period + 1 {
        return series;
    }

    let mut gains = Vec::with_capacity(prices.len() - 1);
    let mut losses = Vec::with_capacity(prices.len() - 1);

    // Calculate price changes
    for window in prices.windows(2) {
        let change = window[1] - window[0];
        if change > 0.0 {
            gains.push(change);
            losses.push(0.0);
        } else {
            gains.push(0.0);
            losses.push(change.abs());
        }
    }

    // gains[i] and losses[i] describe the move into prices[i + 1]
    for end in period..=gains.len() {
        let start = end - period;
        let avg_gain = gains[start..end].iter().sum::<f64>() / period as f64;
        let avg_loss = losses[start..end].iter().sum::<f64>() / period as f64;
        series[end] = rsi_from_averages(avg_gain, avg_loss);
    }

    series
}

/// Calculate the most recent RSI value, `None` when undefined
pub fn calculate_rsi(prices: &[f64], period: usize) -> Option<f64> {
    rsi_series(prices, period).last().copied().flatten()
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> Option<f64> {
    if avg_loss == 0.0 {
        if avg_gain == 0.0 {
            return None;
        }
        return Some(100.0);
    }

    let rs = avg_gain / avg_loss;
    Some(100.0 - (100.0 / (1.0 + rs)))
}
