use crate::state::AppState;
use std::{sync::{atomic::Ordering, Arc}, time::{Duration, Instant}};
use tokio::time::sleep;
use tripwire::{BreakerSnapshot, BreakerState};

/// Run the live terminal dashboard.
/// - Default: ASCII state labels to avoid column drift.
/// - Set TRIP_TUI_EMOJI=1 to use emoji state (may misalign on some terminals).
/// - Tick interval: TRIP_TUI_INTERVAL_MS (default 2000 ms).
pub async fn run_terminal_dashboard(app: Arc<AppState>) {
    let mut last_total_calls: (u64, Instant) = (0, Instant::now());

    let interval = std::env::var("TRIP_TUI_INTERVAL_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(2000);

    let use_emoji = std::env::var("TRIP_TUI_EMOJI").ok().map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false);

    loop {
        let start = Instant::now();

        let snap = app.breaker().await.snapshot();
        let upstream = truncate(&app.cfg.read().await.upstream.url, 45);

        let total_calls = app.total_calls.load(Ordering::Relaxed);
        let rejected = app.rejected_calls.load(Ordering::Relaxed);
        let failures = app.upstream_failures.load(Ordering::Relaxed);
        let reject_rate = if total_calls == 0 { 0.0 } else { (rejected as f64) * 100.0 / (total_calls as f64) };

        let now = Instant::now();
        let (tps, tpm) = {
            let dt = now.duration_since(last_total_calls.1).as_secs_f64().max(0.001);
            let dc = total_calls.saturating_sub(last_total_calls.0) as f64;
            last_total_calls = (total_calls, now);
            (dc / dt, dc * (60.0 / dt))
        };

        let row = Row {
            upstream,
            state: state_label(snap.state, use_emoji),
            last_err: app.last_error.get().as_str().to_string(),
            snap,
        };

        print_frame(row, total_calls, rejected, failures, reject_rate, tps, tpm);

        // Pace the loop
        let elapsed = start.elapsed();
        if elapsed < Duration::from_millis(interval) {
            sleep(Duration::from_millis(interval) - elapsed).await;
        }
    }
}

struct Row {
    upstream: String,
    state: String,
    last_err: String,
    snap: BreakerSnapshot,
}

fn state_label(state: BreakerState, use_emoji: bool) -> String {
    match (state, use_emoji) {
        (BreakerState::Closed, true) => "🟢 CLOSED".to_string(),
        (BreakerState::Open, true) => "⛔ OPEN".to_string(),
        (BreakerState::HalfOpen, true) => "🟡 HALF".to_string(),
        (BreakerState::Closed, false) => "CLOSED".to_string(),
        (BreakerState::Open, false) => "OPEN".to_string(),
        (BreakerState::HalfOpen, false) => "HALF".to_string(),
    }
}

// --- formatting helpers ---

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width { return s.to_string(); }
    let mut out = String::with_capacity(width);
    for (i, ch) in s.chars().enumerate() {
        if i + 1 >= width { break; }
        out.push(ch);
    }
    out.push('…');
    out
}

fn pad(s: &str, width: usize) -> String {
    let len = s.chars().count();
    if len >= width { s.to_string() } else { format!("{}{}", s, " ".repeat(width - len)) }
}

fn make_summary_line(total_width: usize, content: &str) -> String {
    let inner = total_width.saturating_sub(2);
    let clipped: String = content.chars().take(inner).collect();
    format!("│{}│", pad(&clipped, inner))
}

fn print_frame(row: Row, total_calls: u64, rejected: u64, failures: u64, reject_rate: f64, tps: f64, tpm: f64) {
    // Column widths
    let w_url   = 45usize;
    let w_stat  = 10usize;  // "CLOSED/OPEN/HALF"
    let w_succ  = 9usize;
    let w_fail  = 9usize;
    let w_rate  = 8usize;   // error rate %
    let w_cons  = 8usize;   // consecutive failures
    let w_hof   = 8usize;   // half-open failures
    let w_wait  = 10usize;  // ms until probing
    let w_lerr  = 12usize;  // last error reason (rpc_error/timeout/...)

    let total_w =
        1 + w_url + 1 + w_stat + 1 + w_succ + 1 + w_fail + 1 + w_rate + 1 + w_cons + 1 + w_hof + 1 + w_wait + 1 + w_lerr + 1;

    // Summary header (exact widths, ASCII only to avoid drift)
    println!("╭{}╮", "─".repeat(total_w.saturating_sub(2)));
    let line1 = format!("  Total calls: {} | Rejected: {} ({:.1}%) | Upstream failures: {}",
                        total_calls, rejected, reject_rate, failures);
    println!("{}", make_summary_line(total_w, &line1));
    let line2 = format!("  Ingress: {:.1} TPS | {:.0} TPM   Backoff: {} ms",
                        tps, tpm, row.snap.backoff_ms);
    println!("{}", make_summary_line(total_w, &line2));
    println!("╰{}╯", "─".repeat(total_w.saturating_sub(2)));

    // Table header
    println!(
        "┏{}┳{}┳{}┳{}┳{}┳{}┳{}┳{}┳{}┓",
        pad(" Upstream", w_url),
        pad(" State", w_stat),
        pad(" Succ", w_succ),
        pad(" Fail", w_fail),
        pad(" Err %", w_rate),
        pad(" Consec", w_cons),
        pad(" HO fail", w_hof),
        pad(" Probe ms", w_wait),
        pad(" Last_err", w_lerr),
    );

    println!(
        "┡{}┿{}┿{}┿{}┿{}┿{}┿{}┿{}┿{}┩",
        "━".repeat(w_url),
        "━".repeat(w_stat),
        "━".repeat(w_succ),
        "━".repeat(w_fail),
        "━".repeat(w_rate),
        "━".repeat(w_cons),
        "━".repeat(w_hof),
        "━".repeat(w_wait),
        "━".repeat(w_lerr),
    );

    let s = &row.snap;
    let wait_display = s.probe_in_ms.map(|ms| ms.to_string()).unwrap_or_else(|| "–".to_string());
    println!(
        "│{}│{}│{}│{}│{}│{}│{}│{}│{}│",
        pad(&row.upstream, w_url),
        pad(&row.state, w_stat),
        pad(&s.successes.to_string(), w_succ),
        pad(&s.failures.to_string(), w_fail),
        pad(&format!("{:.1}", s.error_rate * 100.0), w_rate),
        pad(&s.consecutive_failures.to_string(), w_cons),
        pad(&s.half_open_failures.to_string(), w_hof),
        pad(&wait_display, w_wait),
        pad(&row.last_err, w_lerr),
    );

    println!("└{}┘", "─".repeat(total_w.saturating_sub(2)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_keeps_width() {
        assert_eq!(truncate("short", 10), "short");
        let t = truncate("http://a-very-long-upstream.example.com/rpc", 12);
        assert_eq!(t.chars().count(), 12);
        assert!(t.ends_with('…'));
    }

    #[test]
    fn pad_fills_to_width() {
        assert_eq!(pad("ab", 4), "ab  ");
        assert_eq!(pad("abcdef", 4), "abcdef");
    }
}
