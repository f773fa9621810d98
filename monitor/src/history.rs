use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info};
use trainwatch_common::{HistoryPoint, JobId};

pub const DEFAULT_MAX_POINTS: usize = 2_000;

/// Bounded, deduplicated, `(epoch, time_step)`-ordered sample buffer for one job.
#[derive(Debug)]
pub struct HistoryStore {
    points: VecDeque<HistoryPoint>,
    max_points: usize,
    last_job: Option<JobId>,
}

impl HistoryStore {
    pub fn new(max_points: usize) -> Self {
        let max_points = max_points.max(1);
        Self {
            points: VecDeque::with_capacity(max_points.min(DEFAULT_MAX_POINTS)),
            max_points,
            last_job: None,
        }
    }

    /// Clears the buffer when `job_id` names a different job than the last one seen.
    ///
    /// Returns `true` exactly once per job transition. A missing id never
    /// triggers a reset and leaves the last known id in place.
    pub fn observe_job(&mut self, job_id: Option<&JobId>) -> bool {
        let Some(job_id) = job_id else {
            return false;
        };
        if self.last_job.as_ref() == Some(job_id) {
            return false;
        }

        info!(
            previous = ?self.last_job.as_ref().map(JobId::as_str),
            next = %job_id,
            dropped = self.points.len(),
            "job changed, clearing history"
        );
        self.points.clear();
        self.last_job = Some(job_id.clone());
        true
    }

    pub fn append(&mut self, point: HistoryPoint, job_id: Option<&JobId>) -> Arc<[HistoryPoint]> {
        self.observe_job(job_id);
        self.insert(point);
        self.snapshot()
    }

    /// Replaces the buffer with a server-provided history snapshot.
    pub fn replace_all<I>(&mut self, points: I, job_id: Option<&JobId>) -> Arc<[HistoryPoint]>
    where
        I: IntoIterator<Item = HistoryPoint>,
    {
        self.observe_job(job_id);
        self.points.clear();
        for point in points {
            self.insert(point);
        }
        self.snapshot()
    }

    pub fn reset(&mut self) {
        self.points.clear();
        self.last_job = None;
    }

    pub fn snapshot(&self) -> Arc<[HistoryPoint]> {
        self.points.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn max_points(&self) -> usize {
        self.max_points
    }

    pub fn last_job(&self) -> Option<&JobId> {
        self.last_job.as_ref()
    }

    fn insert(&mut self, point: HistoryPoint) {
        if !point.is_valid() {
            debug!(time_step = point.time_step, "dropping invalid history point");
            return;
        }

        let key = point.order_key();
        match self.points.back_mut() {
            None => self.points.push_back(point),
            Some(last) if last.order_key() == key => *last = point,
            Some(last) if last.order_key() < key => self.points.push_back(point),
            Some(_) => {
                match self.points.binary_search_by(|p| p.order_key().cmp(&key)) {
                    Ok(index) => self.points[index] = point,
                    Err(index) => self.points.insert(index, point),
                }
            }
        }

        while self.points.len() > self.max_points {
            self.points.pop_front();
        }
    }
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_POINTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(epoch: u64, time_step: u64, loss: f64) -> HistoryPoint {
        HistoryPoint::new(time_step, epoch, loss, loss / 2.0)
    }

    fn job(id: &str) -> Option<JobId> {
        Some(JobId::from(id))
    }

    #[test]
    fn test_same_step_replaces_last_entry() {
        let mut store = HistoryStore::new(10);
        store.append(point(1, 9, 0.9), job("a").as_ref());
        store.append(point(1, 10, 0.5), job("a").as_ref());
        let snapshot = store.append(point(1, 10, 0.4), job("a").as_ref());

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[1].loss, 0.4);
    }

    #[test]
    fn test_invalid_points_are_dropped() {
        let mut store = HistoryStore::new(10);
        store.append(point(1, 1, f64::NAN), None);
        let mut bad_rmse = point(1, 2, 0.3);
        bad_rmse.rmse = f64::NEG_INFINITY;
        store.append(bad_rmse, None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_bound_evicts_oldest_first() {
        let mut store = HistoryStore::new(3);
        for step in 1..=5 {
            store.append(point(1, step, step as f64), None);
        }
        let snapshot = store.snapshot();
        let steps: Vec<u64> = snapshot.iter().map(|p| p.time_step).collect();
        assert_eq!(steps, vec![3, 4, 5]);
    }

    #[test]
    fn test_out_of_order_points_are_sorted() {
        let mut store = HistoryStore::new(10);
        store.append(point(2, 1, 0.5), None);
        store.append(point(1, 7, 0.6), None);
        store.append(point(2, 3, 0.4), None);
        store.append(point(1, 7, 0.65), None);

        let keys: Vec<(u64, u64)> = store.snapshot().iter().map(|p| p.order_key()).collect();
        assert_eq!(keys, vec![(1, 7), (2, 1), (2, 3)]);
        assert_eq!(store.snapshot()[0].loss, 0.65);
    }

    #[test]
    fn test_job_change_resets_exactly_once() {
        let mut store = HistoryStore::new(10);
        assert!(store.observe_job(job("a").as_ref()));
        store.append(point(1, 1, 0.5), job("a").as_ref());
        store.append(point(1, 2, 0.5), job("a").as_ref());
        assert!(!store.observe_job(job("a").as_ref()));
        assert_eq!(store.len(), 2);

        assert!(store.observe_job(job("b").as_ref()));
        assert!(store.is_empty());
        assert!(!store.observe_job(job("b").as_ref()));
    }

    #[test]
    fn test_missing_job_id_keeps_history() {
        let mut store = HistoryStore::new(10);
        store.append(point(1, 1, 0.5), job("a").as_ref());
        assert!(!store.observe_job(None));
        store.append(point(1, 2, 0.5), None);
        assert_eq!(store.len(), 2);
        assert_eq!(store.last_job(), job("a").as_ref());
    }

    #[test]
    fn test_replace_all_wins_wholesale() {
        let mut store = HistoryStore::new(4);
        for step in 1..=4 {
            store.append(point(1, step, 0.5), job("a").as_ref());
        }
        let snapshot = store.replace_all(
            vec![point(1, 2, 0.1), point(1, 1, 0.2), point(1, 2, 0.3)],
            job("a").as_ref(),
        );
        let keys: Vec<(u64, u64)> = snapshot.iter().map(|p| p.order_key()).collect();
        assert_eq!(keys, vec![(1, 1), (1, 2)]);
        assert_eq!(snapshot[1].loss, 0.3);
    }

    #[test]
    fn test_long_mixed_sequence_stays_bounded_and_sorted() {
        let mut store = HistoryStore::new(50);
        let mut step = 0u64;
        for i in 0..500u64 {
            step = if i % 7 == 0 { step.saturating_sub(3) } else { step + 1 };
            let epoch = 1 + i / 100;
            store.append(point(epoch, step, 1.0 / (i + 1) as f64), None);
            let snapshot = store.snapshot();
            assert!(snapshot.len() <= 50);
            assert!(snapshot.windows(2).all(|w| w[0].order_key() < w[1].order_key()));
        }
    }

    #[test]
    fn test_reset_forgets_job() {
        let mut store = HistoryStore::new(10);
        store.append(point(1, 1, 0.5), job("a").as_ref());
        store.reset();
        assert!(store.is_empty());
        assert!(store.observe_job(job("a").as_ref()));
    }
}
