/// Context-window size (input+output token budget) for known model ids
/// (§4.10). Every Claude-family id in current use shares the same limit;
/// anything unrecognised falls back to [`DEFAULT_CONTEXT_WINDOW`].
pub const DEFAULT_CONTEXT_WINDOW: u64 = 200_000;

/// Ratio of `total_tokens / context_window` at which `checkCompactThreshold`
/// starts suggesting `/compact` (§4.10).
pub const COMPACT_SUGGEST_RATIO: f64 = 0.70;

/// Looks up the context-window size for a model id.
///
/// All listed Claude-family ids map to 200,000 tokens; unknown ids also fall
/// back to 200,000 (§4.10 "unknown -> DEFAULT_CONTEXT_WINDOW"), so in
/// practice this always returns the same constant today — the table exists
/// so a future model with a different window only needs a new match arm.
pub fn context_window_for(model: &str) -> u64 {
    match model {
        m if m.starts_with("claude-") => 200_000,
        _ => DEFAULT_CONTEXT_WINDOW,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_and_unknown_models_share_the_default_window() {
        assert_eq!(context_window_for("claude-sonnet-4-6"), 200_000);
        assert_eq!(context_window_for("some-future-model"), DEFAULT_CONTEXT_WINDOW);
    }
}
