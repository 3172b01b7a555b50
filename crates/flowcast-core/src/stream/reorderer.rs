//! StreamReorderer: per-node ordering of interleaved upstream output.
//!
//! Workflow nodes may run concurrently, so chunks from different message
//! nodes arrive interleaved. The reorderer keeps one queue per ordered node
//! and only releases output from the node at the head of the arrival
//! order; the head is popped once it reports completion. Passthrough
//! chunks are released immediately.
//!
//! One reorderer belongs to one session; node queues live in a map owned
//! by it, indexed by node id.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use flowcast_types::event::WorkflowChunk;
use flowcast_types::frame::ChatFrame;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReorderState {
    /// No chunk seen yet.
    Empty,
    Streaming,
    /// The flow terminus reported `stop`; remaining output is drained.
    Draining,
    Closed,
}

#[derive(Debug)]
struct NodeStream {
    queue: VecDeque<ChatFrame>,
    finished: bool,
}

#[derive(Debug)]
pub struct StreamReorderer {
    state: ReorderState,
    started: Instant,
    arrival: VecDeque<String>,
    nodes: HashMap<String, NodeStream>,
}

impl Default for StreamReorderer {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamReorderer {
    pub fn new() -> Self {
        Self::started_at(Instant::now())
    }

    /// A reorderer measuring elapsed time from `started`.
    pub fn started_at(started: Instant) -> Self {
        Self {
            state: ReorderState::Empty,
            started,
            arrival: VecDeque::new(),
            nodes: HashMap::new(),
        }
    }

    pub fn state(&self) -> ReorderState {
        self.state
    }

    /// Ordered nodes still holding state.
    pub fn pending_nodes(&self) -> usize {
        self.arrival.len()
    }

    /// Accept one upstream chunk and return the frames now ready to send.
    pub fn push(&mut self, chunk: WorkflowChunk) -> Vec<ChatFrame> {
        if self.state == ReorderState::Closed {
            debug!("chunk after close ignored");
            return Vec::new();
        }
        if self.state == ReorderState::Empty {
            self.state = ReorderState::Streaming;
        }
        if chunk.is_terminal() {
            self.state = ReorderState::Draining;
        }

        let elapsed = self.started.elapsed().as_secs_f64();
        let class = chunk.class();
        let finished = chunk.is_node_finished();
        let frame = ChatFrame::from_chunk(chunk, elapsed);

        if !class.is_ordered() {
            let mut out = vec![frame];
            out.extend(self.flush());
            return out;
        }

        let node_id = frame.node_id.clone();
        let node = self.nodes.entry(node_id.clone()).or_insert_with(|| {
            self.arrival.push_back(node_id);
            NodeStream {
                queue: VecDeque::new(),
                finished: false,
            }
        });
        node.queue.push_back(frame);
        if finished {
            node.finished = true;
        }

        self.flush()
    }

    /// Release everything still buffered, marked as forced, and close.
    pub fn finish(&mut self) -> Vec<ChatFrame> {
        let mut out = self.flush();
        while let Some(node_id) = self.arrival.pop_front() {
            if let Some(node) = self.nodes.remove(&node_id) {
                if !node.queue.is_empty() {
                    debug!(node_id = %node_id, frames = node.queue.len(), "force flushing node");
                }
                out.extend(node.queue.into_iter().map(|mut f| {
                    f.forced = true;
                    f
                }));
            }
        }
        self.nodes.clear();
        self.state = ReorderState::Closed;
        out
    }

    fn flush(&mut self) -> Vec<ChatFrame> {
        let mut out = Vec::new();
        while let Some(head) = self.arrival.front() {
            let Some(node) = self.nodes.get_mut(head) else {
                self.arrival.pop_front();
                continue;
            };
            out.extend(node.queue.drain(..));
            if !node.finished {
                break;
            }
            let done = head.clone();
            self.nodes.remove(&done);
            self.arrival.pop_front();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(node: &str, content: &str, node_stop: bool) -> WorkflowChunk {
        let finish = if node_stop { r#","finish_reason":"stop""# } else { "" };
        serde_json::from_str(&format!(
            r#"{{"code":0,"message":"ok","choices":[{{"delta":{{"content":"{content}"}},"index":0}}],
                "workflow_step":{{"node":{{"id":"{node}"{finish}}}}}}}"#
        ))
        .unwrap()
    }

    fn contents(frames: &[ChatFrame]) -> Vec<String> {
        frames.iter().map(|f| f.content.clone()).collect()
    }

    #[test]
    fn test_state_transitions() {
        let mut r = StreamReorderer::new();
        assert_eq!(r.state(), ReorderState::Empty);
        r.push(chunk("message-1", "a", false));
        assert_eq!(r.state(), ReorderState::Streaming);

        let mut end = chunk("node-end::1", "", true);
        end.choices[0].finish_reason = Some("stop".to_string());
        r.push(end);
        assert_eq!(r.state(), ReorderState::Draining);

        r.finish();
        assert_eq!(r.state(), ReorderState::Closed);
        assert!(r.push(chunk("message-2", "late", true)).is_empty());
    }

    #[test]
    fn test_second_node_waits_for_head() {
        let mut r = StreamReorderer::new();
        assert_eq!(contents(&r.push(chunk("message-1", "A1", false))), vec!["A1"]);
        assert!(r.push(chunk("message-2", "B1", false)).is_empty());
        assert_eq!(contents(&r.push(chunk("message-1", "A2", false))), vec!["A2"]);
        assert!(r.push(chunk("message-2", "B2", false)).is_empty());

        // Head finishes: its last fragment and everything buffered behind it flush.
        let out = r.push(chunk("message-1", "A3", true));
        assert_eq!(contents(&out), vec!["A3", "B1", "B2"]);
        assert_eq!(r.pending_nodes(), 1);

        assert_eq!(contents(&r.push(chunk("message-2", "B3", true))), vec!["B3"]);
        assert_eq!(r.pending_nodes(), 0);
    }

    #[test]
    fn test_first_token_order_matches_arrival_order() {
        let mut r = StreamReorderer::new();
        let arrivals = [
            ("message-c", "c1", false),
            ("message-a", "a1", false),
            ("message-b", "b1", false),
            ("message-a", "a2", true),
            ("message-b", "b2", true),
            ("message-c", "c2", true),
        ];
        let mut emitted = Vec::new();
        for (node, content, stop) in arrivals {
            emitted.extend(r.push(chunk(node, content, stop)));
        }
        emitted.extend(r.finish());

        let mut first_seen = Vec::new();
        for f in &emitted {
            if !first_seen.contains(&f.node_id) {
                first_seen.push(f.node_id.clone());
            }
        }
        assert_eq!(first_seen, vec!["message-c", "message-a", "message-b"]);
        assert_eq!(emitted.len(), 6);
        assert!(emitted.iter().all(|f| !f.forced));
    }

    #[test]
    fn test_passthrough_is_not_buffered() {
        let mut r = StreamReorderer::new();
        r.push(chunk("message-1", "A1", false));
        assert!(r.push(chunk("message-2", "B1", false)).is_empty());

        let out = r.push(chunk("spark-llm::7", "thinking", false));
        assert_eq!(contents(&out), vec!["thinking"]);
        assert_eq!(out[0].node_id, "spark-llm::7");
    }

    #[test]
    fn test_finish_force_flushes_buffered_nodes() {
        let mut r = StreamReorderer::new();
        r.push(chunk("message-1", "A1", false));
        r.push(chunk("message-2", "B1", false));
        r.push(chunk("message-2", "B2", false));

        let out = r.finish();
        assert_eq!(contents(&out), vec!["B1", "B2"]);
        assert!(out.iter().all(|f| f.forced));
        assert_eq!(r.pending_nodes(), 0);
    }

    #[test]
    fn test_frame_metadata() {
        let mut r = StreamReorderer::new();
        let out = r.push(chunk("message-1", "done", true));
        assert_eq!(out[0].node_id, "message-1");
        assert_eq!(out[0].finish_reason.as_deref(), Some("stop"));
        assert!(out[0].elapsed_seconds >= 0.0);
    }
}
