// 进度显示
use indicatif::{ProgressBar, ProgressStyle};
use std::cell::Cell;
use std::time::{Duration, Instant};

pub struct ProgressTracker {
    progress_bar: ProgressBar,
    start_time: Instant,
    last_update_time: Cell<Instant>,
    last_bytes: Cell<u64>,
    transferred_bytes: Cell<u64>,
}

impl ProgressTracker {
    pub fn new(total_size: u64, description: &str) -> Self {
        let progress_bar = ProgressBar::new(total_size);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta}) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        progress_bar.set_style(style);
        progress_bar.set_message(description.to_string());

        let now = Instant::now();
        Self {
            progress_bar,
            start_time: now,
            last_update_time: Cell::new(now),
            last_bytes: Cell::new(0),
            transferred_bytes: Cell::new(0),
        }
    }

    /// Progress callback body: `(transferred, total)`.
    pub fn report(&self, transferred: u64, total: u64) {
        if self.progress_bar.length() != Some(total) {
            self.progress_bar.set_length(total);
        }
        self.transferred_bytes.set(transferred);
        self.progress_bar.set_position(transferred);
        self.update_speed(transferred);
    }

    pub fn finish(&self) {
        let elapsed = self.start_time.elapsed();
        let total = self.transferred_bytes.get();

        let avg_speed = if elapsed.as_secs() > 0 {
            total / elapsed.as_secs()
        } else {
            total
        };

        self.progress_bar.finish_with_message(format!(
            "Transfer completed (avg speed: {})",
            format_speed(avg_speed)
        ));
    }

    pub fn finish_with_error(&self, error: &str) {
        self.progress_bar
            .abandon_with_message(format!("Transfer failed: {}", error));
    }

    // 每200ms刷新一次速度
    fn update_speed(&self, current_bytes: u64) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update_time.get());
        if elapsed < Duration::from_millis(200) {
            return;
        }

        let bytes_diff = current_bytes.saturating_sub(self.last_bytes.get());
        let speed = (bytes_diff as f64 / elapsed.as_secs_f64()) as u64;
        self.progress_bar.set_message(format_speed(speed));

        self.last_update_time.set(now);
        self.last_bytes.set(current_bytes);
    }
}

pub fn format_speed(bytes_per_sec: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec))
}

pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.2} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
