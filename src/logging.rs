use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Telegram's hard limit is 4096; leave headroom for a header line.
pub const MESSAGE_CHUNK: usize = 4000;

/// Install the global subscriber: stdout plus, when it can be opened, an
/// append-only copy in `log_file` for `/logs`.
pub fn init(log_file: &Path) {
    let file = OpenOptions::new().create(true).append(true).open(log_file);
    let file_layer = file.as_ref().ok().and_then(|f| f.try_clone().ok()).map(|f| {
        fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(Mutex::new(f))
    });

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,promobot=debug".into()))
        .with(fmt::layer())
        .with(file_layer)
        .init();

    if let Err(e) = file {
        tracing::warn!("Log file {} unavailable: {}", log_file.display(), e);
    }
}

/// Last `lines` lines of the log, cut to the final `max_chars` characters.
pub fn tail(path: &Path, lines: usize, max_chars: usize) -> Result<String> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read log file {}", path.display()))?;

    let all: Vec<&str> = content.lines().collect();
    let recent = all[all.len().saturating_sub(lines)..].join("\n");

    let count = recent.chars().count();
    if count <= max_chars {
        return Ok(recent);
    }
    Ok(recent.chars().skip(count - max_chars).collect())
}

/// Split long messages for Telegram's message size limit, preferring line
/// then word boundaries.
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + max_len).min(text.len());
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        let cut = if end < text.len() {
            text[start..end]
                .rfind('\n')
                .or_else(|| text[start..end].rfind(' '))
                .map(|pos| start + pos + 1)
                .unwrap_or(end)
        } else {
            end
        };

        chunks.push(text[start..cut].to_string());
        start = cut;
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_tail_keeps_last_lines() {
        let path = std::env::temp_dir().join(format!("promobot-tail-{}.log", uuid::Uuid::new_v4()));
        {
            let mut f = std::fs::File::create(&path).unwrap();
            for i in 1..=30 {
                writeln!(f, "line {}", i).unwrap();
            }
        }

        let text = tail(&path, 3, 1000).unwrap();
        assert_eq!(text, "line 28\nline 29\nline 30");

        let cut = tail(&path, 3, 7).unwrap();
        assert_eq!(cut, "line 30");

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_tail_missing_file_errors() {
        assert!(tail(Path::new("/nonexistent/promobot.log"), 5, 100).is_err());
    }

    #[test]
    fn test_split_message() {
        assert_eq!(split_message("short", 10), vec!["short"]);

        let text = "alpha beta\ngamma delta epsilon";
        let chunks = split_message(text, 12);
        assert!(chunks.iter().all(|c| c.len() <= 12));
        assert_eq!(chunks.concat(), text);
        assert_eq!(chunks[0], "alpha beta\n");
    }

    #[test]
    fn test_split_respects_char_boundaries() {
        let text = "ééééé";
        let chunks = split_message(text, 3);
        assert_eq!(chunks.concat(), text);
        assert!(chunks.iter().all(|c| c.chars().count() == 1));
    }
}
