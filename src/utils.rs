use chrono::Duration;

/// Format a duration as `HH:MM:SS`. Negative durations clamp to zero;
/// attendance metrics are never negative.
pub fn format_hms(duration: Duration) -> String {
    let total = duration.num_seconds().max(0);
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

/// Parse `HH:MM` or `HH:MM:SS` into a duration. Hours may exceed 23 (these
/// are spans, not times of day).
pub fn parse_hms(raw: &str) -> Option<Duration> {
    let parts: Vec<&str> = raw.split(':').collect();
    if parts.len() != 2 && parts.len() != 3 {
        return None;
    }

    let hours: i64 = parts[0].parse().ok()?;
    let minutes: i64 = match parts[1].parse().ok()? {
        m if m < 60 => m,
        _ => return None,
    };
    let seconds: i64 = if parts.len() == 3 {
        match parts[2].parse().ok()? {
            s if s < 60 => s,
            _ => return None,
        }
    } else {
        0
    };

    Some(Duration::seconds(hours * 3600 + minutes * 60 + seconds))
}
