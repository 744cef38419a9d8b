//! Terminal rendering of job events and search results.

use tonefetch_core::{EventPayload, JobProgress, ProgressEvent, SearchResult};

/// Formats events of one job, skipping progress lines that add nothing new.
pub struct JobRenderer {
    label: String,
    json: bool,
    last_percent: Option<u64>,
}

impl JobRenderer {
    pub fn new(label: impl Into<String>, json: bool) -> Self {
        Self {
            label: label.into(),
            json,
            last_percent: None,
        }
    }

    /// Returns the line to print for `event`, if any.
    pub fn render(&mut self, event: &ProgressEvent) -> Option<String> {
        if self.json {
            return serde_json::to_string(event).ok();
        }

        let body = match &event.payload {
            EventPayload::Status { status, message } => match message {
                Some(message) => format!("{} ({})", status, message),
                None => status.to_string(),
            },
            EventPayload::Progress(progress) => {
                // Whole percents only; indeterminate progress prints once.
                let percent = progress.percent.map(|p| p.floor() as u64);
                if self.last_percent.is_some() && percent <= self.last_percent {
                    return None;
                }
                self.last_percent = percent.or(Some(0));
                format_progress(progress)
            }
            EventPayload::Warning { message } => format!("warning: {}", message),
            EventPayload::Error(error) => format!("failed ({}): {}", error.kind, error.message),
            EventPayload::Done { path, degraded } => {
                if *degraded {
                    format!("done (degraded): {}", path.display())
                } else {
                    format!("done: {}", path.display())
                }
            }
            EventPayload::Cancelled { message } => format!("cancelled: {}", message),
        };
        Some(format!("[{}] {}", self.label, body))
    }
}

fn format_progress(progress: &JobProgress) -> String {
    let mut line = match progress.percent {
        Some(percent) => format!("{:5.1}%", percent),
        None => "  ?  %".to_string(),
    };
    if let Some(done) = progress.downloaded_bytes {
        line.push_str(&format!(" {}", human_bytes(done)));
        if let Some(total) = progress.total_bytes {
            let marker = if progress.total_is_estimate { "~" } else { "" };
            line.push_str(&format!(" / {}{}", marker, human_bytes(total)));
        }
    }
    if let Some(speed) = progress.speed_bps {
        line.push_str(&format!(" at {}/s", human_bytes(speed as u64)));
    }
    if let Some(eta) = progress.eta_secs {
        line.push_str(&format!(", ETA {}:{:02}", eta / 60, eta % 60));
    }
    line
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// One line per hit, numbered from 1.
pub fn render_search_results(results: &[SearchResult]) -> Vec<String> {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            format!(
                "{:>2}. {} - {} [{}] {}",
                i + 1,
                r.artist,
                r.title,
                r.duration,
                r.url
            )
        })
        .collect()
}
