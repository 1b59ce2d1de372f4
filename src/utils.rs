use chrono::format::{Item, StrftimeItems};
use chrono::Local;
use std::time::Duration;

/// Converts a Duration to a human-readable string with at most 2 units
/// e.g., "1 h, 30 m", "5 m, 20 s", "1 s, 133 ms", "10 ms"
pub fn format_duration(duration: Duration) -> String {
    const UNITS: [(&str, u128); 5] = [
        ("d", 86_400_000),
        ("h", 3_600_000),
        ("m", 60_000),
        ("s", 1_000),
        ("ms", 1),
    ];

    let mut remaining = duration.as_millis();
    if remaining == 0 {
        return "0 ms".to_string();
    }

    let mut parts: Vec<String> = Vec::with_capacity(2);
    for (name, size) in UNITS {
        let amount = remaining / size;
        remaining %= size;
        if amount > 0 {
            parts.push(format!("{} {}", amount, name));
        }
        if parts.len() == 2 {
            break;
        }
    }

    parts.join(", ")
}

/// Expands strftime placeholders with the local time. Templates with invalid
/// placeholders are returned untouched.
pub fn expand_timestamp(template: &str) -> String {
    let items: Vec<Item> = StrftimeItems::new(template).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return template.to_string();
    }
    Local::now().format_with_items(items.into_iter()).to_string()
}

/// File name prefixed with the current timestamp, e.g. `20250101_073000_resultado_1234.png`
pub fn timestamped_name(name: &str) -> String {
    format!(
        "{}_{}",
        Local::now().format("%Y%m%d_%H%M%S"),
        sanitise_file_name::sanitise(name)
    )
}

/// Cuts a message to at most `max` characters
pub fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(0)), "0 ms");
        assert_eq!(format_duration(Duration::from_millis(10)), "10 ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1 s, 500 ms");
        assert_eq!(format_duration(Duration::from_secs(65)), "1 m, 5 s");
        assert_eq!(format_duration(Duration::from_secs(3600 + 120)), "1 h, 2 m");

        // Only the two largest units are shown
        assert_eq!(format_duration(Duration::from_secs(90061)), "1 d, 1 h");
        // Zero units in between are skipped
        assert_eq!(format_duration(Duration::from_millis(3_600_004)), "1 h, 4 ms");
    }

    #[test]
    fn test_expand_timestamp() {
        let expanded = expand_timestamp("resultados_%Y%m%d.csv");
        assert!(expanded.starts_with("resultados_"));
        assert_eq!(expanded.len(), "resultados_20250101.csv".len());

        assert_eq!(expand_timestamp("plain.csv"), "plain.csv");
        assert_eq!(expand_timestamp("broken_%Q.csv"), "broken_%Q.csv");
    }

    #[test]
    fn test_timestamped_name_sanitises() {
        let name = timestamped_name("error_a/b.png");
        assert!(!name.contains('/'));
        assert!(name.ends_with(".png"));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("añadido", 2), "añ");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
