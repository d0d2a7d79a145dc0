use flashclaw_core::types::{ChatMessage, MessageContent};

/// Per-message token estimate (§4.1): `cjkChars + ceil(nonCjk / 4) + 10`,
/// floored at 1. The `+10` is role/framing overhead. This is the one
/// estimator every "estimated tokens" reference in the spec means.
pub fn estimate_text(s: &str) -> usize {
    let (cjk, non_cjk) = s.chars().fold((0usize, 0usize), |(cjk, non_cjk), c| {
        if is_cjk(c) {
            (cjk + 1, non_cjk)
        } else {
            (cjk, non_cjk + 1)
        }
    });
    (cjk + non_cjk.div_ceil(4) + 10).max(1)
}

/// Estimates one `ChatMessage`. Array content is `JSON.stringify`'d first,
/// per §4.1 "Treat array content by `JSON.stringify`ing."
pub fn estimate_message(msg: &ChatMessage) -> usize {
    match &msg.content {
        MessageContent::Text(s) => estimate_text(s),
        MessageContent::Blocks(blocks) => {
            let json = serde_json::to_string(blocks).unwrap_or_default();
            estimate_text(&json)
        }
    }
}

/// Sum of per-message estimates — additive per §8 P2.
pub fn estimate_messages<'a>(msgs: impl IntoIterator<Item = &'a ChatMessage>) -> usize {
    msgs.into_iter().map(estimate_message).sum()
}

fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x2E80..=0x303F   // CJK radicals, punctuation
        | 0x3040..=0x30FF // hiragana, katakana
        | 0x3400..=0x4DBF // CJK extension A
        | 0x4E00..=0x9FFF // CJK unified ideographs
        | 0xAC00..=0xD7A3 // hangul syllables
        | 0xF900..=0xFAFF // CJK compatibility ideographs
        | 0xFF00..=0xFFEF // fullwidth forms
        | 0x20000..=0x2A6DF // CJK extension B
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_text_uses_quarter_rate_plus_overhead() {
        // 8 ascii chars -> ceil(8/4) = 2, +10 = 12
        assert_eq!(estimate_text("abcdefgh"), 12);
    }

    #[test]
    fn cjk_text_counts_one_per_char() {
        // 4 CJK chars -> 4 + 0 + 10 = 14
        assert_eq!(estimate_text("你好世界"), 14);
    }

    #[test]
    fn empty_string_floors_at_one() {
        // 0 + 0 + 10 = 10, still >= 1
        assert_eq!(estimate_text(""), 10);
    }

    #[test]
    fn estimates_are_additive_across_messages() {
        use flashclaw_core::types::Role;
        let a = ChatMessage {
            role: Role::User,
            content: MessageContent::Text("hello".to_string()),
        };
        let b = ChatMessage {
            role: Role::Assistant,
            content: MessageContent::Text("world".to_string()),
        };
        let combined = estimate_message(&a) + estimate_message(&b);
        assert_eq!(estimate_messages([&a, &b]), combined);
    }
}
