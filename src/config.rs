//! Coordinator configuration.
//!
//! Duration knobs arrive as strings from whatever config layer sits
//! above; a string that fails to parse means the knob is disabled (zero),
//! never a startup failure.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Directory holding the engine's files and the identifier map.
    /// A trailing slash is stripped; empty means in-memory behavior.
    pub index_path: String,
    /// Never load or save anything, regardless of `index_path`.
    pub enable_in_memory_mode: bool,
    pub dimension: usize,
    /// Distance metric name the engine recognizes ("l2", "cosine", ...).
    pub distance_type: String,
    /// Element type name the engine recognizes ("float", ...).
    pub object_type: String,
    /// Upper bound on vectors admitted per engine write-lock acquisition.
    pub bulk_insert_chunk_size: usize,
    /// Graph-build tuning, forwarded to engines that build graphs.
    pub creation_edge_size: usize,
    /// Graph-search tuning, forwarded to engines that build graphs.
    pub search_edge_size: usize,
    /// How often the driver checks the uncommitted-insert threshold.
    pub auto_index_check_duration: String,
    /// Hard deadline: commit-and-save runs at this period regardless of
    /// the threshold. Defaults to twice the check duration when unset.
    pub auto_index_duration_limit: String,
    /// Save period. Defaults to check duration + 1s when unset.
    pub auto_save_index_duration: String,
    /// Upper bound for the randomized initial delay, in whole seconds.
    pub initial_delay_max_duration: String,
    /// Uncommitted-insert threshold that triggers a commit.
    pub auto_index_length: usize,
    /// Pool size the background driver passes to commits.
    pub default_pool_size: u32,
}

impl IndexConfig {
    pub fn new(dimension: usize) -> Self {
        Self {
            index_path: String::new(),
            enable_in_memory_mode: false,
            dimension,
            distance_type: "l2".to_string(),
            object_type: "float".to_string(),
            bulk_insert_chunk_size: 100,
            creation_edge_size: 10,
            search_edge_size: 40,
            auto_index_check_duration: String::new(),
            auto_index_duration_limit: String::new(),
            auto_save_index_duration: String::new(),
            initial_delay_max_duration: String::new(),
            auto_index_length: 0,
            default_pool_size: 1,
        }
    }

    pub fn with_index_path(mut self, path: impl Into<String>) -> Self {
        self.index_path = path.into();
        self
    }

    pub fn with_in_memory_mode(mut self, enabled: bool) -> Self {
        self.enable_in_memory_mode = enabled;
        self
    }

    pub fn with_distance_type(mut self, distance: impl Into<String>) -> Self {
        self.distance_type = distance.into();
        self
    }

    pub fn with_object_type(mut self, object: impl Into<String>) -> Self {
        self.object_type = object.into();
        self
    }

    pub fn with_auto_index_check_duration(mut self, dur: impl Into<String>) -> Self {
        self.auto_index_check_duration = dur.into();
        self
    }

    pub fn with_auto_index_duration_limit(mut self, dur: impl Into<String>) -> Self {
        self.auto_index_duration_limit = dur.into();
        self
    }

    pub fn with_auto_save_index_duration(mut self, dur: impl Into<String>) -> Self {
        self.auto_save_index_duration = dur.into();
        self
    }

    pub fn with_initial_delay_max_duration(mut self, dur: impl Into<String>) -> Self {
        self.initial_delay_max_duration = dur.into();
        self
    }

    pub fn with_auto_index_length(mut self, len: usize) -> Self {
        self.auto_index_length = len;
        self
    }

    pub fn with_default_pool_size(mut self, size: u32) -> Self {
        self.default_pool_size = size;
        self
    }
}

/// Parse a single-unit duration string such as "100ms", "1.5s" or "2m".
/// Returns `Duration::ZERO` for empty or unparsable input — a disabled
/// knob, not an error.
pub(crate) fn parse_duration(s: &str) -> Duration {
    let s = s.trim();
    if s.is_empty() {
        return Duration::ZERO;
    }
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (num, unit) = s.split_at(split);
    let Ok(value) = num.parse::<f64>() else {
        return Duration::ZERO;
    };
    if !value.is_finite() || value < 0.0 {
        return Duration::ZERO;
    }
    let nanos_per_unit = match unit {
        "ns" => 1.0,
        "us" | "µs" => 1e3,
        "ms" => 1e6,
        "s" => 1e9,
        "m" => 60.0 * 1e9,
        "h" => 3600.0 * 1e9,
        _ => return Duration::ZERO,
    };
    Duration::from_nanos((value * nanos_per_unit) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_units() {
        assert_eq!(parse_duration("100ms"), Duration::from_millis(100));
        assert_eq!(parse_duration("1s"), Duration::from_secs(1));
        assert_eq!(parse_duration("1.5s"), Duration::from_millis(1500));
        assert_eq!(parse_duration("2m"), Duration::from_secs(120));
        assert_eq!(parse_duration("1h"), Duration::from_secs(3600));
        assert_eq!(parse_duration("250us"), Duration::from_micros(250));
    }

    #[test]
    fn garbage_disables_the_knob() {
        assert_eq!(parse_duration(""), Duration::ZERO);
        assert_eq!(parse_duration("fast"), Duration::ZERO);
        assert_eq!(parse_duration("10 parsecs"), Duration::ZERO);
        assert_eq!(parse_duration("-5s"), Duration::ZERO);
        assert_eq!(parse_duration("5"), Duration::ZERO);
    }
}
