// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 wireup contributors
//
// Port of na/wireup/wiring.c's request free list and outstanding FIFO
// (wiring_free_request_get/put, wiring_outst_request_put,
// wiring_requests_check_status/discard). Completion is assumed to be
// submission-ordered per endpoint, so the outstanding queue only ever
// needs to inspect its head.

use crate::transport::{RequestHandle, RequestStatus};

struct Node<R> {
    request: Option<R>,
    next: Option<usize>,
}

/// Free-list/outstanding-FIFO pool of transport request handles.
///
/// Handles are recycled: a completed request's slot returns to the
/// free list rather than being dropped, the same way the original
/// reuses a fixed-size `request_size`-parameterized allocation instead
/// of allocating per send.
pub struct RequestPool<R> {
    nodes: Vec<Node<R>>,
    free_head: Option<usize>,
    outst_head: Option<usize>,
    outst_tail: Option<usize>,
}

impl<R> Default for RequestPool<R> {
    fn default() -> Self {
        Self { nodes: Vec::new(), free_head: None, outst_head: None, outst_tail: None }
    }
}

impl<R: RequestHandle> RequestPool<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a free slot (growing the pool if none is free) and store
    /// `request` as outstanding.
    pub fn submit(&mut self, request: R) {
        let idx = match self.free_head.take() {
            Some(idx) => {
                self.free_head = self.nodes[idx].next;
                self.nodes[idx].request = Some(request);
                self.nodes[idx].next = None;
                idx
            }
            None => {
                self.nodes.push(Node { request: Some(request), next: None });
                self.nodes.len() - 1
            }
        };
        match self.outst_tail {
            Some(tail) => {
                self.nodes[tail].next = Some(idx);
            }
            None => {
                self.outst_head = Some(idx);
            }
        }
        self.outst_tail = Some(idx);
    }

    /// Walk the outstanding FIFO from the head, recycling every
    /// request that has completed, stopping at the first one still in
    /// progress (submission order is assumed to match completion
    /// order for a given transport). Returns the number recycled.
    pub fn check_status(&mut self) -> usize {
        let mut recycled = 0;
        while let Some(idx) = self.outst_head {
            let status = match &self.nodes[idx].request {
                Some(req) => req.poll(),
                None => RequestStatus::Complete,
            };
            if status == RequestStatus::InProgress {
                break;
            }
            let next = self.nodes[idx].next;
            self.outst_head = next;
            if next.is_none() {
                self.outst_tail = None;
            }
            self.nodes[idx].request = None;
            self.nodes[idx].next = self.free_head;
            self.free_head = Some(idx);
            recycled += 1;
        }
        recycled
    }

    /// Force every outstanding request back to the free list,
    /// regardless of completion status, for best-effort teardown.
    pub fn discard_all(&mut self) {
        let mut cur = self.outst_head.take();
        self.outst_tail = None;
        while let Some(idx) = cur {
            let next = self.nodes[idx].next;
            self.nodes[idx].request = None;
            self.nodes[idx].next = self.free_head;
            self.free_head = Some(idx);
            cur = next;
        }
    }

    pub fn outstanding_count(&self) -> usize {
        let mut n = 0;
        let mut cur = self.outst_head;
        while let Some(idx) = cur {
            n += 1;
            cur = self.nodes[idx].next;
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Eq)]
    struct FakeRequest {
        status: std::cell::Cell<RequestStatus>,
    }

    impl RequestHandle for FakeRequest {
        fn poll(&self) -> RequestStatus {
            self.status.get()
        }
    }

    fn req(status: RequestStatus) -> FakeRequest {
        FakeRequest { status: std::cell::Cell::new(status) }
    }

    #[test]
    fn completed_head_requests_recycle_in_submission_order() {
        let mut pool: RequestPool<FakeRequest> = RequestPool::new();
        pool.submit(req(RequestStatus::Complete));
        pool.submit(req(RequestStatus::InProgress));
        pool.submit(req(RequestStatus::Complete));
        assert_eq!(pool.outstanding_count(), 3);
        let recycled = pool.check_status();
        assert_eq!(recycled, 1);
        assert_eq!(pool.outstanding_count(), 2);
    }

    #[test]
    fn discard_all_empties_outstanding_regardless_of_status() {
        let mut pool: RequestPool<FakeRequest> = RequestPool::new();
        pool.submit(req(RequestStatus::InProgress));
        pool.submit(req(RequestStatus::InProgress));
        pool.discard_all();
        assert_eq!(pool.outstanding_count(), 0);
    }

    #[test]
    fn freed_slots_are_reused_before_growing() {
        let mut pool: RequestPool<FakeRequest> = RequestPool::new();
        pool.submit(req(RequestStatus::Complete));
        pool.check_status();
        pool.submit(req(RequestStatus::InProgress));
        assert_eq!(pool.nodes.len(), 1, "should reuse the freed node instead of growing");
    }
}
