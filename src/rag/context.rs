//! Prompt context assembly under a character budget.

use crate::store::format_timestamp;
use crate::vector_index::SegmentHit;

/// Rendered context and the number of segments it holds.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptContext {
    pub text: String,
    /// Segments `0..included` of the ranked input appear in `text`, numbered from 1.
    pub included: usize,
}

/// Render ranked segments as `[n] (MM:SS) text` blocks.
///
/// Segments are appended in rank order while the total stays within
/// `max_chars` characters. The first segment is always included, cut to the
/// budget if it alone exceeds it.
pub fn build_context(segments: &[SegmentHit], max_chars: usize, include_timestamps: bool) -> PromptContext {
    let mut text = String::new();
    let mut used = 0;
    let mut included = 0;

    for (i, seg) in segments.iter().enumerate() {
        let block = render_block(i + 1, seg, include_timestamps);
        let separator = if i == 0 { 0 } else { 2 };
        let len = block.chars().count() + separator;

        if used + len > max_chars {
            if i == 0 {
                text = truncate_chars(&block, max_chars);
                included = 1;
            }
            break;
        }

        if i > 0 {
            text.push_str("\n\n");
        }
        text.push_str(&block);
        used += len;
        included += 1;
    }

    PromptContext { text, included }
}

fn render_block(n: usize, seg: &SegmentHit, include_timestamps: bool) -> String {
    if include_timestamps {
        format!("[{}] ({}) {}", n, format_timestamp(seg.start_seconds), seg.content.trim())
    } else {
        format!("[{}] {}", n, seg.content.trim())
    }
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(id: &str, start: f64, content: &str) -> SegmentHit {
        SegmentHit {
            video_id: "v".to_string(),
            segment_id: id.to_string(),
            start_seconds: start,
            content: content.to_string(),
            score: 0.5,
        }
    }

    #[test]
    fn test_blocks_are_numbered_with_timestamps() {
        let ctx = build_context(
            &[seg("a", 65.0, "first"), seg("b", 3725.0, "second")],
            1000,
            true,
        );
        assert_eq!(ctx.included, 2);
        assert_eq!(ctx.text, "[1] (01:05) first\n\n[2] (01:02:05) second");
    }

    #[test]
    fn test_budget_stops_at_first_segment_that_does_not_fit() {
        let segments = [seg("a", 0.0, "aaaa"), seg("b", 1.0, "bbbbbbbbbbbbbbbbbbbb"), seg("c", 2.0, "c")];
        // Block 2 overflows the budget; block 3 would fit but rank order wins.
        let ctx = build_context(&segments, 20, false);
        assert_eq!(ctx.included, 1);
        assert_eq!(ctx.text, "[1] aaaa");
    }

    #[test]
    fn test_first_segment_always_included_and_truncated() {
        let ctx = build_context(&[seg("a", 0.0, "a long transcript passage")], 10, false);
        assert_eq!(ctx.included, 1);
        assert_eq!(ctx.text.chars().count(), 10);
        assert!(ctx.text.starts_with("[1] a long"));
    }

    #[test]
    fn test_truncation_respects_multibyte_chars() {
        let ctx = build_context(&[seg("a", 0.0, "ééééééé")], 6, false);
        assert_eq!(ctx.text, "[1] éé");
    }

    #[test]
    fn test_empty_input() {
        let ctx = build_context(&[], 100, true);
        assert_eq!(ctx.included, 0);
        assert!(ctx.text.is_empty());
    }
}
