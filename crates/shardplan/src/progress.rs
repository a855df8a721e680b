//! 📊 progress.rs: "how many documents have come out of the shards so far?"
//!
//! 🚀 A cluster never tells you up front how big a scroll will be, so this is a spinner and
//! not a bar: running totals, a short sliding-window rate, and a per-partition tally,
//! rendered as a borderless comfy-table under an indicatif spinner.
//!
//! 🦆 The duck watched the spinner for a full minute. It did not go faster.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};
use indicatif::{ProgressBar, ProgressStyle};

const MIB: f64 = 1024.0 * 1024.0;

/// 🔢 `1234567` → `1,234,567`.
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// ⏱️ MM:SS, or HH:MM:SS for the long hauls.
fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

/// 📡 Throughput over the sliding window.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Rates {
    docs_per_sec: f64,
    mib_per_sec: f64,
}

/// 📊 Running totals for a read across every task.
pub struct ReadProgress {
    label: String,
    total_docs: u64,
    total_bytes: u64,
    partitions_total: usize,
    partitions_done: usize,
    spinner: ProgressBar,
    /// 🔄 (when, bytes, docs), oldest first, at most 5 seconds deep
    rate_samples: VecDeque<(Instant, u64, u64)>,
    start_time: Instant,
}

impl std::fmt::Debug for ReadProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- 🎭 ProgressBar has no Debug of its own
        f.debug_struct("ReadProgress")
            .field("label", &self.label)
            .field("total_docs", &self.total_docs)
            .field("total_bytes", &self.total_bytes)
            .field("partitions_done", &self.partitions_done)
            .field("partitions_total", &self.partitions_total)
            .finish()
    }
}

impl ReadProgress {
    /// 🚀 A visible spinner on stderr.
    pub fn new(label: impl Into<String>, partitions_total: usize) -> Self {
        Self::with_bar(label, partitions_total, ProgressBar::new_spinner())
    }

    /// 🙈 Same bookkeeping, nothing drawn. For tests and `--quiet`.
    pub fn hidden(label: impl Into<String>, partitions_total: usize) -> Self {
        Self::with_bar(label, partitions_total, ProgressBar::hidden())
    }

    fn with_bar(label: impl Into<String>, partitions_total: usize, spinner: ProgressBar) -> Self {
        // -- 🎨 the template is a literal; if it ever fails to parse we keep the default style
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            spinner.set_style(style);
        }
        spinner.enable_steady_tick(Duration::from_millis(120));
        let start_time = Instant::now();
        let mut rate_samples = VecDeque::new();
        rate_samples.push_back((start_time, 0u64, 0u64));
        Self {
            label: label.into(),
            total_docs: 0,
            total_bytes: 0,
            partitions_total,
            partitions_done: 0,
            spinner,
            rate_samples,
            start_time,
        }
    }

    /// 🔄 Count `docs` more documents weighing roughly `bytes`.
    pub fn update(&mut self, bytes: u64, docs: u64) {
        self.total_bytes += bytes;
        self.total_docs += docs;
        let rates = self.calculate_rates(Instant::now());
        self.render(rates);
    }

    /// 🏁 One more task finished its whole slice of partitions.
    pub fn partitions_finished(&mut self, count: usize) {
        self.partitions_done = (self.partitions_done + count).min(self.partitions_total);
        let rates = self.calculate_rates(Instant::now());
        self.render(rates);
    }

    pub fn total_docs(&self) -> u64 {
        self.total_docs
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn partitions_done(&self) -> usize {
        self.partitions_done
    }

    /// ✅ Stop the spinner, leave the last table on screen.
    pub fn finish(&self) {
        self.spinner.finish();
    }

    fn calculate_rates(&mut self, now: Instant) -> Rates {
        let window = Duration::from_secs(5);
        while let Some(&(timestamp, _, _)) = self.rate_samples.front() {
            if now.duration_since(timestamp) > window {
                self.rate_samples.pop_front();
            } else {
                break;
            }
        }
        self.rate_samples.push_back((now, self.total_bytes, self.total_docs));

        if let Some(&(oldest_time, oldest_bytes, oldest_docs)) = self.rate_samples.front() {
            let elapsed = now.duration_since(oldest_time).as_secs_f64();
            if elapsed > 0.0 {
                let bytes_delta = self.total_bytes.saturating_sub(oldest_bytes);
                let docs_delta = self.total_docs.saturating_sub(oldest_docs);
                return Rates {
                    docs_per_sec: docs_delta as f64 / elapsed,
                    mib_per_sec: (bytes_delta as f64 / elapsed) / MIB,
                };
            }
        }
        Rates {
            docs_per_sec: 0.0,
            mib_per_sec: 0.0,
        }
    }

    fn summary(&self, rates: Rates) -> Table {
        let mut table = Table::new();
        table.load_preset(NOTHING);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.add_row(vec![
            Cell::new(format!("{} Docs/s", format_number(rates.docs_per_sec as u64)))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{} Docs", format_number(self.total_docs)))
                .set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{:.2} MiB/s", rates.mib_per_sec)).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.2} MiB", self.total_bytes as f64 / MIB))
                .set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{} elapsed", format_duration(self.start_time.elapsed())))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!(
                "{}/{} partitions",
                self.partitions_done, self.partitions_total
            ))
            .set_alignment(CellAlignment::Right),
        ]);
        table
    }

    fn render(&self, rates: Rates) {
        self.spinner
            .set_message(format!("reading: {}\n{}", self.label, self.summary(rates)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_big_numbers_get_commas_and_long_runs_get_hours() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1_234_567), "1,234,567");
        assert_eq!(format_duration(Duration::from_secs(75)), "01:15");
        assert_eq!(format_duration(Duration::from_secs(3_661)), "01:01:01");
    }

    #[test]
    fn the_one_where_the_tally_only_goes_up() {
        let mut progress = ReadProgress::hidden("logs-*", 3);
        progress.update(2 * 1024 * 1024, 10);
        progress.update(0, 5);
        progress.partitions_finished(2);
        progress.partitions_finished(5);
        assert_eq!(progress.total_docs(), 15);
        assert_eq!(progress.total_bytes(), 2 * 1024 * 1024);
        assert_eq!(progress.partitions_done(), 3, "never more done than there are");

        let rendered = progress.summary(Rates { docs_per_sec: 1500.0, mib_per_sec: 0.5 }).to_string();
        assert!(rendered.contains("1,500 Docs/s"), "{rendered}");
        assert!(rendered.contains("15 Docs"), "{rendered}");
        assert!(rendered.contains("2.00 MiB"), "{rendered}");
        assert!(rendered.contains("3/3 partitions"), "{rendered}");
        progress.finish();
    }

    #[test]
    fn the_one_where_the_window_forgets_old_samples() {
        let mut progress = ReadProgress::hidden("logs", 1);
        let start = progress.start_time;
        progress.total_docs = 100;
        let rates = progress.calculate_rates(start + Duration::from_secs(2));
        assert!((rates.docs_per_sec - 50.0).abs() < f64::EPSILON);

        progress.total_docs = 160;
        let rates = progress.calculate_rates(start + Duration::from_secs(10));
        // -- 🔄 the t=0 and t=2 samples are older than 5s by now; only t=10 remains
        assert_eq!(rates, Rates { docs_per_sec: 0.0, mib_per_sec: 0.0 });
        assert_eq!(progress.rate_samples.len(), 1);
    }
}
