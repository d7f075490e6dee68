//! Request sources: who decides what the engine sends on a session.

use std::collections::VecDeque;

use super::messages::{WorkloadInfo, WorkloadRequest};

/// What a request source can see about the session it is feeding.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: u64,
    /// Version announced in the peer's hello.
    pub version: String,
    /// Requests already answered on this session.
    pub completed: usize,
}

/// Pull interface for the requests sent after the handshake.
///
/// Returning `None` ends the session.
pub trait RequestSource: Send {
    fn next_request(&mut self, ctx: &SessionContext) -> Option<WorkloadRequest>;
}

/// Replays a fixed list of requests, in order, on every session.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRequests {
    requests: VecDeque<WorkloadRequest>,
}

impl ScriptedRequests {
    pub fn new(requests: impl IntoIterator<Item = WorkloadRequest>) -> Self {
        Self {
            requests: requests.into_iter().collect(),
        }
    }

    /// A single Add request for a placeholder workload.
    pub fn demo() -> Self {
        Self::new([WorkloadRequest::add(
            "1234-56-512512",
            WorkloadInfo::new("myapp", "default", "default"),
            "1234",
        )])
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

impl RequestSource for ScriptedRequests {
    fn next_request(&mut self, _ctx: &SessionContext) -> Option<WorkloadRequest> {
        self.requests.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> SessionContext {
        SessionContext {
            session_id: 7,
            version: "1.0".to_string(),
            completed: 0,
        }
    }

    #[test]
    fn test_scripted_order() {
        let mut source =
            ScriptedRequests::new([WorkloadRequest::keep("a"), WorkloadRequest::remove("b")]);
        assert_eq!(source.len(), 2);

        assert_eq!(source.next_request(&ctx()).unwrap().uid(), Some("a"));
        assert_eq!(source.next_request(&ctx()).unwrap().uid(), Some("b"));
        assert!(source.next_request(&ctx()).is_none());
        assert!(source.is_empty());
    }

    #[test]
    fn test_demo_is_single_add() {
        let mut source = ScriptedRequests::demo();
        let request = source.next_request(&ctx()).unwrap();
        assert_eq!(request.kind(), "add");
        assert_eq!(request.uid(), Some("1234-56-512512"));
        assert!(source.next_request(&ctx()).is_none());
    }
}
