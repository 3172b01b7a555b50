//! Output pacing for reordered frames.

use std::time::Duration;

use flowcast_types::config::{OutputMode, StreamConfig};
use flowcast_types::event::NodeClass;
use flowcast_types::frame::ChatFrame;

/// Splits frames for typewriter output.
///
/// Pacing is a pure transformation: each returned frame comes with the
/// delay the session sleeps after sending it.
#[derive(Debug, Clone)]
pub struct Pacer {
    mode: OutputMode,
    letter_delay: Duration,
    other_delay: Duration,
}

impl Pacer {
    pub fn new(mode: OutputMode, letter_delay: Duration, other_delay: Duration) -> Self {
        Self {
            mode,
            letter_delay,
            other_delay,
        }
    }

    pub fn from_config(config: &StreamConfig) -> Self {
        Self::new(
            config.output_mode,
            Duration::from_millis(config.letter_interval_ms),
            Duration::from_millis(config.typewriter_interval_ms),
        )
    }

    pub fn direct() -> Self {
        Self::new(OutputMode::Direct, Duration::ZERO, Duration::ZERO)
    }

    pub fn pace(&self, frame: ChatFrame) -> Vec<(ChatFrame, Duration)> {
        let splittable = self.mode == OutputMode::Typewriter
            && !frame.forced
            && !frame.content.is_empty()
            && NodeClass::of(&frame.node_id).is_ordered();
        if !splittable {
            return vec![(frame, Duration::ZERO)];
        }

        let mut buf = [0u8; 4];
        frame
            .content
            .chars()
            .map(|c| {
                let delay = if c.is_ascii_alphabetic() {
                    self.letter_delay
                } else {
                    self.other_delay
                };
                (frame.with_content(c.encode_utf8(&mut buf)), delay)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use flowcast_types::event::WorkflowChunk;

    use super::*;

    fn frame(node: &str, content: &str) -> ChatFrame {
        let chunk: WorkflowChunk = serde_json::from_str(&format!(
            r#"{{"code":0,"message":"ok","choices":[{{"delta":{{"content":"{content}"}},"index":0}}],
                "workflow_step":{{"node":{{"id":"{node}","finish_reason":"stop"}}}}}}"#
        ))
        .unwrap();
        ChatFrame::from_chunk(chunk, 2.5)
    }

    fn typewriter() -> Pacer {
        Pacer::new(OutputMode::Typewriter, Duration::from_millis(1), Duration::from_millis(20))
    }

    #[test]
    fn test_typewriter_splits_into_characters() {
        let paced = typewriter().pace(frame("message-1", "AB3"));
        let chars: Vec<&str> = paced.iter().map(|(f, _)| f.content.as_str()).collect();
        assert_eq!(chars, vec!["A", "B", "3"]);
        let delays: Vec<u64> = paced.iter().map(|(_, d)| d.as_millis() as u64).collect();
        assert_eq!(delays, vec![1, 1, 20]);
    }

    #[test]
    fn test_typewriter_copies_metadata() {
        let paced = typewriter().pace(frame("node-end::1", "hé"));
        assert_eq!(paced.len(), 2);
        for (f, _) in &paced {
            assert_eq!(f.node_id, "node-end::1");
            assert_eq!(f.finish_reason.as_deref(), Some("stop"));
            assert_eq!(f.elapsed_seconds, 2.5);
            assert_eq!(f.chunk.content(), f.content);
        }
        assert_eq!(paced[1].0.content, "é");
    }

    #[test]
    fn test_passthrough_nodes_are_not_split() {
        let paced = typewriter().pace(frame("spark-llm::1", "abc"));
        assert_eq!(paced.len(), 1);
        assert_eq!(paced[0].1, Duration::ZERO);
    }

    #[test]
    fn test_direct_mode_forwards_unchanged() {
        let original = frame("message-1", "AB3");
        let paced = Pacer::direct().pace(original.clone());
        assert_eq!(paced, vec![(original, Duration::ZERO)]);
    }
}
