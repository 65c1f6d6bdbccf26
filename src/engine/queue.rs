//! Pending request queue
//!
//! Every command that waits for a reply takes a slot in one FIFO queue. Each
//! incoming line is attributed to the head slot only, and the head completes
//! when its predicate matches. Timed-out or dropped requests leave an
//! abandoned slot behind that swallows their late output, so it is never
//! credited to the next request.

use log::{debug, warn};
use std::collections::VecDeque;
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::error::{EngineError, EngineResult};
use super::protocol::Completion;

/// Channel used to hand a finished request back to its caller
pub(crate) type Reply = oneshot::Sender<EngineResult<Vec<String>>>;

/// Why the queue stopped accepting requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloseReason {
    Exited(Option<i32>),
    Cancelled,
}

impl CloseReason {
    fn error(self) -> EngineError {
        match self {
            CloseReason::Exited(code) => EngineError::ProcessTerminated(code),
            CloseReason::Cancelled => EngineError::Cancelled,
        }
    }
}

struct PendingRequest {
    seq: u64,
    command: String,
    completion: Completion,
    lines: Vec<String>,
    issued_at: Instant,
    /// `None` once the caller gave up on the request
    reply: Option<Reply>,
}

impl PendingRequest {
    fn is_live(&self) -> bool {
        self.reply.is_some()
    }
}

#[derive(Default)]
pub(crate) struct RequestQueue {
    entries: VecDeque<PendingRequest>,
    closed: Option<CloseReason>,
}

impl RequestQueue {
    /// Fail fast if the process is gone or the session was torn down
    pub fn ensure_open(&self) -> EngineResult<()> {
        match self.closed {
            Some(reason) => Err(reason.error()),
            None => Ok(()),
        }
    }

    /// Append a request behind everything already issued
    pub fn enqueue(
        &mut self,
        seq: u64,
        command: &str,
        completion: Completion,
    ) -> EngineResult<oneshot::Receiver<EngineResult<Vec<String>>>> {
        self.ensure_open()?;

        let (tx, rx) = oneshot::channel();
        self.entries.push_back(PendingRequest {
            seq,
            command: command.to_string(),
            completion,
            lines: Vec::new(),
            issued_at: Instant::now(),
            reply: Some(tx),
        });
        Ok(rx)
    }

    /// Attribute one response line
    pub fn dispatch(&mut self, line: &str) {
        // Abandoned slots at the head swallow lines until their own predicate
        // matches, unless the line completes the first live request behind them.
        loop {
            let (abandoned, head_matches) = match self.entries.front() {
                Some(head) => (!head.is_live(), head.completion.matches(line)),
                None => break,
            };
            if !abandoned {
                break;
            }
            if head_matches {
                if let Some(dropped) = self.entries.pop_front() {
                    debug!(
                        "Late reply to abandoned request {} '{}' dropped",
                        dropped.seq, dropped.command
                    );
                }
                return;
            }

            let claimed = self
                .entries
                .iter()
                .position(PendingRequest::is_live)
                .filter(|&idx| self.entries[idx].completion.matches(line));
            match claimed {
                Some(idx) => {
                    for dropped in self.entries.drain(..idx) {
                        debug!(
                            "Evicting abandoned request {} '{}'",
                            dropped.seq, dropped.command
                        );
                    }
                }
                None => {
                    debug!("Line swallowed by abandoned request: {}", line);
                    return;
                }
            }
        }

        let Some(head) = self.entries.front_mut() else {
            return;
        };
        head.lines.push(line.to_string());

        if head.completion.matches(line) {
            if let Some(done) = self.entries.pop_front() {
                debug!(
                    "Request {} '{}' completed with {} lines in {:?}",
                    done.seq,
                    done.command,
                    done.lines.len(),
                    done.issued_at.elapsed()
                );
                if let Some(reply) = done.reply {
                    let _ = reply.send(Ok(done.lines));
                }
            }
            return;
        }

        let head_seq = head.seq;
        if let Some(later) = self
            .entries
            .iter()
            .skip(1)
            .find(|e| e.is_live() && e.completion.matches(line))
        {
            warn!(
                "Out-of-order reply: '{}' completes request {} '{}' but request {} is still open; keeping FIFO order",
                line, later.seq, later.command, head_seq
            );
        }
    }

    /// Give up on a request. Returns false if it already completed.
    pub fn abandon(&mut self, seq: u64) -> bool {
        match self.entries.iter_mut().find(|e| e.seq == seq) {
            Some(entry) if entry.is_live() => {
                entry.reply = None;
                true
            }
            _ => false,
        }
    }

    /// Remove a request that never reached the process
    pub fn discard(&mut self, seq: u64) {
        self.entries.retain(|e| e.seq != seq);
    }

    /// Fail every live request in issuance order and refuse new ones.
    /// Returns how many callers were notified.
    pub fn close(&mut self, reason: CloseReason) -> usize {
        if self.closed.is_none() {
            self.closed = Some(reason);
        }

        let mut failed = 0;
        for entry in self.entries.drain(..) {
            if let Some(reply) = entry.reply {
                failed += 1;
                let _ = reply.send(Err(reason.error()));
            }
        }
        failed
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_some()
    }

    /// Requests still waiting for their completion line
    pub fn live_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_live()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::protocol::{READY_OK, USI_OK};

    type Rx = oneshot::Receiver<EngineResult<Vec<String>>>;

    fn take(rx: &mut Rx) -> Option<EngineResult<Vec<String>>> {
        rx.try_recv().ok()
    }

    #[test]
    fn test_bare_terminator_yields_single_line() {
        let mut queue = RequestQueue::default();
        let mut rx = queue.enqueue(0, "isready", Completion::exact(READY_OK)).unwrap();

        queue.dispatch("readyok");

        assert_eq!(take(&mut rx).unwrap().unwrap(), vec!["readyok"]);
        assert_eq!(queue.live_count(), 0);
    }

    #[test]
    fn test_lines_accumulate_until_terminator() {
        let mut queue = RequestQueue::default();
        let mut rx = queue.enqueue(0, "usi", Completion::exact(USI_OK)).unwrap();

        queue.dispatch("id name fake");
        assert!(take(&mut rx).is_none());
        queue.dispatch("option name USI_Hash type spin default 256");
        queue.dispatch("usiok");

        let lines = take(&mut rx).unwrap().unwrap();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines.last().map(String::as_str), Some("usiok"));
    }

    #[test]
    fn test_pipelined_requests_complete_in_order() {
        let mut queue = RequestQueue::default();
        let mut first = queue.enqueue(0, "usi", Completion::exact(USI_OK)).unwrap();
        let mut second = queue.enqueue(1, "isready", Completion::exact(READY_OK)).unwrap();

        queue.dispatch("id name fake");
        queue.dispatch("usiok");
        assert!(take(&mut second).is_none());
        queue.dispatch("readyok");

        assert_eq!(take(&mut first).unwrap().unwrap(), vec!["id name fake", "usiok"]);
        assert_eq!(take(&mut second).unwrap().unwrap(), vec!["readyok"]);
    }

    #[test]
    fn test_later_terminator_does_not_jump_the_queue() {
        let mut queue = RequestQueue::default();
        let mut first = queue.enqueue(0, "usi", Completion::exact(USI_OK)).unwrap();
        let mut second = queue.enqueue(1, "isready", Completion::exact(READY_OK)).unwrap();

        queue.dispatch("readyok");
        assert!(take(&mut first).is_none());
        assert!(take(&mut second).is_none());

        queue.dispatch("usiok");
        assert_eq!(take(&mut first).unwrap().unwrap(), vec!["readyok", "usiok"]);
        assert!(take(&mut second).is_none());
        assert_eq!(queue.live_count(), 1);
    }

    #[test]
    fn test_abandoned_request_swallows_its_late_reply() {
        let mut queue = RequestQueue::default();
        let _timed_out = queue.enqueue(0, "go", Completion::prefix("bestmove")).unwrap();
        assert!(queue.abandon(0));
        let mut next = queue.enqueue(1, "isready", Completion::exact(READY_OK)).unwrap();

        queue.dispatch("info depth 10");
        queue.dispatch("bestmove 7g7f");
        assert!(take(&mut next).is_none());

        queue.dispatch("readyok");
        assert_eq!(take(&mut next).unwrap().unwrap(), vec!["readyok"]);
    }

    #[test]
    fn test_abandoned_request_is_evicted_by_live_match() {
        let mut queue = RequestQueue::default();
        let _silent = queue.enqueue(0, "silent", Completion::exact("never")).unwrap();
        queue.abandon(0);
        let mut next = queue.enqueue(1, "isready", Completion::exact(READY_OK)).unwrap();

        queue.dispatch("readyok");

        assert_eq!(take(&mut next).unwrap().unwrap(), vec!["readyok"]);
        assert_eq!(queue.live_count(), 0);
    }

    #[test]
    fn test_abandon_after_completion_reports_false() {
        let mut queue = RequestQueue::default();
        let _rx = queue.enqueue(0, "isready", Completion::exact(READY_OK)).unwrap();
        queue.dispatch("readyok");
        assert!(!queue.abandon(0));
    }

    #[test]
    fn test_close_fails_all_pending_and_rejects_new() {
        let mut queue = RequestQueue::default();
        let mut receivers: Vec<Rx> = (0..3)
            .map(|seq| queue.enqueue(seq, "silent", Completion::exact("never")).unwrap())
            .collect();
        queue.abandon(1);

        assert_eq!(queue.close(CloseReason::Exited(Some(1))), 2);
        assert_eq!(
            take(&mut receivers[0]).unwrap(),
            Err(EngineError::ProcessTerminated(Some(1)))
        );
        assert!(take(&mut receivers[1]).is_none());
        assert_eq!(
            take(&mut receivers[2]).unwrap(),
            Err(EngineError::ProcessTerminated(Some(1)))
        );

        assert!(queue.is_closed());
        assert!(matches!(
            queue.enqueue(3, "isready", Completion::exact(READY_OK)),
            Err(EngineError::ProcessTerminated(Some(1)))
        ));
    }

    #[test]
    fn test_first_close_reason_wins() {
        let mut queue = RequestQueue::default();
        queue.close(CloseReason::Cancelled);
        queue.close(CloseReason::Exited(Some(0)));
        assert_eq!(queue.ensure_open(), Err(EngineError::Cancelled));
    }

    #[test]
    fn test_unsolicited_line_is_ignored() {
        let mut queue = RequestQueue::default();
        queue.dispatch("info string hello");
        assert_eq!(queue.live_count(), 0);
    }
}
