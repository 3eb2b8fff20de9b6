//! Queue of path requests served by a sliced search with a per-update
//! iteration limit

use crate::{NavMesh, NavMeshQuery, PolyRef, QueryFilter, Result, Status, StatusDetail};

/// Handle of a queued path request
pub type PathQueueRef = u32;

/// Handle value returned when the queue is full
pub const PATHQ_INVALID: PathQueueRef = 0;

const MAX_QUEUE: usize = 8;

/// Number of updates a finished request stays readable
const MAX_KEEP_ALIVE: u32 = 2;

#[derive(Debug, Clone)]
struct PathQuery {
    reference: PathQueueRef,
    start_pos: [f32; 3],
    end_pos: [f32; 3],
    start_ref: PolyRef,
    end_ref: PolyRef,
    path: Vec<PolyRef>,
    /// `None` until the search has been started
    status: Option<Status>,
    keep_alive: u32,
    filter: QueryFilter,
}

impl Default for PathQuery {
    fn default() -> Self {
        Self {
            reference: PATHQ_INVALID,
            start_pos: [0.0; 3],
            end_pos: [0.0; 3],
            start_ref: PolyRef::NULL,
            end_ref: PolyRef::NULL,
            path: Vec::new(),
            status: None,
            keep_alive: 0,
            filter: QueryFilter::default(),
        }
    }
}

/// Fixed-size queue of path requests
///
/// Requests are processed one at a time in submission order by a dedicated
/// [`NavMeshQuery`]. A finished request must be collected with
/// [`get_path_result`](Self::get_path_result) within a couple of updates or
/// its slot is recycled.
#[derive(Debug)]
pub struct PathQueue<'a> {
    queue: [PathQuery; MAX_QUEUE],
    next_handle: PathQueueRef,
    max_path_size: usize,
    queue_head: usize,
    query: NavMeshQuery<'a>,
}

impl<'a> PathQueue<'a> {
    pub fn new(nav_mesh: &'a NavMesh, max_path_size: usize, max_search_node_count: usize) -> Self {
        Self {
            queue: std::array::from_fn(|_| PathQuery::default()),
            next_handle: 1,
            max_path_size: max_path_size.max(1),
            queue_head: 0,
            query: NavMeshQuery::new(nav_mesh, max_search_node_count),
        }
    }

    /// Query used to serve the requests
    pub fn nav_query(&self) -> &NavMeshQuery<'a> {
        &self.query
    }

    /// Advances the queued searches by at most `max_iters` node expansions
    pub fn update(&mut self, max_iters: usize) {
        let mut iter_count = max_iters as i64;

        for _ in 0..MAX_QUEUE {
            let head = self.queue_head % MAX_QUEUE;
            let q = &mut self.queue[head];

            if q.reference == PATHQ_INVALID {
                self.queue_head += 1;
                continue;
            }

            // Finished requests are kept alive until collected or timed out
            if q.status.is_some_and(|s| !s.is_in_progress()) {
                q.keep_alive += 1;
                if q.keep_alive > MAX_KEEP_ALIVE {
                    log::debug!("path request {} expired before collection", q.reference);
                    q.reference = PATHQ_INVALID;
                    q.status = None;
                }
                self.queue_head += 1;
                continue;
            }

            if q.status.is_none() {
                q.status = Some(
                    self.query
                        .init_sliced_find_path(q.start_ref, q.end_ref, &q.start_pos, &q.end_pos, &q.filter)
                        .unwrap_or_else(|status| status),
                );
            }

            if q.status.is_some_and(|s| s.is_in_progress()) {
                match self.query.update_sliced_find_path(iter_count.max(0) as usize) {
                    Ok((iters, status)) => {
                        iter_count -= iters as i64;
                        q.status = Some(status);
                    }
                    Err(status) => {
                        self.query.cancel_sliced_find_path();
                        q.status = Some(status);
                    }
                }
            }

            if q.status.is_some_and(|s| s.is_success()) {
                q.status = Some(match self.query.finalize_sliced_find_path(self.max_path_size) {
                    Ok(result) => {
                        q.path = result.polys;
                        result.status
                    }
                    Err(status) => status,
                });
            }

            if iter_count <= 0 {
                break;
            }
            self.queue_head += 1;
        }
    }

    /// Queues a path request. Returns [`PATHQ_INVALID`] when the queue is
    /// full.
    pub fn request(
        &mut self,
        start_ref: PolyRef,
        end_ref: PolyRef,
        start_pos: &[f32; 3],
        end_pos: &[f32; 3],
        filter: &QueryFilter,
    ) -> PathQueueRef {
        let Some(slot) = self.queue.iter().position(|q| q.reference == PATHQ_INVALID) else {
            return PATHQ_INVALID;
        };

        let reference = self.next_handle;
        self.next_handle = self.next_handle.wrapping_add(1);
        if self.next_handle == PATHQ_INVALID {
            self.next_handle = 1;
        }

        let q = &mut self.queue[slot];
        q.reference = reference;
        q.start_ref = start_ref;
        q.end_ref = end_ref;
        q.start_pos = *start_pos;
        q.end_pos = *end_pos;
        q.status = None;
        q.keep_alive = 0;
        q.filter = filter.clone();
        q.path.clear();

        reference
    }

    /// Status of a request; unknown handles report failure and requests not
    /// started yet report in progress
    pub fn get_request_status(&self, reference: PathQueueRef) -> Status {
        self.queue
            .iter()
            .find(|q| q.reference == reference && reference != PATHQ_INVALID)
            .map_or(Status::FAILURE, |q| q.status.unwrap_or(Status::IN_PROGRESS))
    }

    /// Takes the path of a finished request and frees its slot
    ///
    /// The returned status keeps the search details, such as
    /// `PARTIAL_RESULT`.
    pub fn get_path_result(&mut self, reference: PathQueueRef) -> Result<(Vec<PolyRef>, Status)> {
        let q = self
            .queue
            .iter_mut()
            .find(|q| q.reference == reference && reference != PATHQ_INVALID)
            .ok_or(Status::FAILURE)?;

        let status = q.status.unwrap_or(Status::IN_PROGRESS);
        if status.is_in_progress() {
            return Err(Status::in_progress(StatusDetail::empty()));
        }

        q.reference = PATHQ_INVALID;
        q.status = None;
        let path = std::mem::take(&mut q.path);
        if status.is_failure() {
            return Err(status);
        }
        Ok((path, Status::success(status.detail)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_mesh_helpers::create_test_nav_mesh;

    fn refs(mesh: &NavMesh) -> (PolyRef, PolyRef) {
        let base = mesh.get_tile_ref_at(0, 0, 0).id();
        (PolyRef::new(base), PolyRef::new(base | 8))
    }

    #[test]
    fn test_request_completes_within_iteration_limit() {
        let mesh = create_test_nav_mesh().unwrap();
        let (start, end) = refs(&mesh);
        let filter = QueryFilter::default();
        let mut queue = PathQueue::new(&mesh, 64, 256);

        let handle = queue.request(start, end, &[0.5, 0.0, 0.5], &[2.5, 0.0, 2.5], &filter);
        assert_ne!(handle, PATHQ_INVALID);
        assert!(queue.get_request_status(handle).is_in_progress());

        for _ in 0..8 {
            queue.update(2);
            if queue.get_request_status(handle).is_success() {
                break;
            }
        }
        assert!(queue.get_request_status(handle).is_success());

        let (path, status) = queue.get_path_result(handle).unwrap();
        assert!(status.is_success());
        assert_eq!(path.first(), Some(&start));
        assert_eq!(path.last(), Some(&end));
        assert_eq!(path.len(), 5);

        // Collected requests are gone
        assert!(queue.get_request_status(handle).is_failure());
    }

    #[test]
    fn test_queue_full_and_expiry() {
        let mesh = create_test_nav_mesh().unwrap();
        let (start, end) = refs(&mesh);
        let filter = QueryFilter::default();
        let mut queue = PathQueue::new(&mesh, 64, 256);

        let handles: Vec<_> = (0..MAX_QUEUE)
            .map(|_| queue.request(start, end, &[0.5, 0.0, 0.5], &[2.5, 0.0, 2.5], &filter))
            .collect();
        assert!(handles.iter().all(|&h| h != PATHQ_INVALID));
        assert_eq!(
            queue.request(start, end, &[0.5, 0.0, 0.5], &[2.5, 0.0, 2.5], &filter),
            PATHQ_INVALID
        );

        // Never collected, so every slot eventually recycles
        for _ in 0..32 {
            queue.update(1000);
        }
        assert!(handles.iter().all(|&h| queue.get_request_status(h).is_failure()));
        assert_ne!(
            queue.request(start, end, &[0.5, 0.0, 0.5], &[2.5, 0.0, 2.5], &filter),
            PATHQ_INVALID
        );
    }

    #[test]
    fn test_invalid_request_fails() {
        let mesh = create_test_nav_mesh().unwrap();
        let (start, _) = refs(&mesh);
        let mut queue = PathQueue::new(&mesh, 64, 256);
        let handle = queue.request(
            start,
            PolyRef::new(0xdead),
            &[0.5, 0.0, 0.5],
            &[2.5, 0.0, 2.5],
            &QueryFilter::default(),
        );
        queue.update(100);
        assert!(queue.get_request_status(handle).is_failure());
        assert!(queue.get_path_result(handle).is_err());
    }
}
