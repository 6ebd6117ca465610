//! Selector — picks one eligible worker by weighted random draw.
//!
//! Implemented via prefix-sum over composite scores plus a single uniform
//! draw against the total, per the explicit guidance to avoid a per-call
//! sort.

use crate::error::DispatchError;
use crate::worker::Worker;
use rand::Rng;
use std::sync::Arc;

/// A worker is eligible iff it is healthy AND has spare capacity.
fn is_eligible(worker: &Worker) -> bool {
    worker.is_healthy() && worker.in_flight() < worker.ceiling()
}

/// Select one worker from `workers` by weighted random draw over
/// [`Worker::score`], restricted to eligible workers. Returns
/// `NoWorkersAvailable` when the eligible set is empty.
pub fn select<'a>(workers: &'a [Arc<Worker>]) -> Result<&'a Arc<Worker>, DispatchError> {
    let eligible: Vec<&Arc<Worker>> = workers.iter().filter(|w| is_eligible(w)).collect();
    if eligible.is_empty() {
        return Err(DispatchError::NoWorkersAvailable);
    }

    let weights: Vec<f64> = eligible.iter().map(|w| w.score()).collect();
    let total: f64 = weights.iter().sum();

    let mut draw = rand::thread_rng().gen_range(0.0..total);
    for (worker, weight) in eligible.iter().zip(weights.iter()) {
        if draw < *weight {
            return Ok(worker);
        }
        draw -= weight;
    }

    // Floating point edge case: draw landed exactly on the running total.
    // Fall back to the last eligible worker rather than treating this as
    // "no workers available".
    Ok(eligible.last().expect("eligible is non-empty"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerSpec;
    use crate::worker::Dialect;

    fn worker(id: &str, ceiling: usize) -> Arc<Worker> {
        Arc::new(Worker::new(&WorkerSpec {
            id: id.to_string(),
            host: "127.0.0.1".to_string(),
            port: 8000,
            dialect: Dialect::OpenAiStyle,
            model: "m".to_string(),
            max_concurrent_requests: ceiling,
        }))
    }

    #[test]
    fn excludes_unhealthy_workers() {
        let w0 = worker("w0", 4);
        let w1 = worker("w1", 4);
        w0.set_healthy(false);
        let workers = vec![w0, w1.clone()];
        for _ in 0..50 {
            let picked = select(&workers).unwrap();
            assert_eq!(picked.id(), "w1");
        }
    }

    #[test]
    fn excludes_saturated_workers() {
        let w0 = worker("w0", 1);
        let w1 = worker("w1", 4);
        assert!(w0.try_acquire_slot());
        let workers = vec![w0, w1.clone()];
        for _ in 0..50 {
            let picked = select(&workers).unwrap();
            assert_eq!(picked.id(), "w1");
        }
    }

    #[test]
    fn no_eligible_worker_is_an_error() {
        let w0 = worker("w0", 4);
        w0.set_healthy(false);
        let workers = vec![w0];
        assert!(matches!(
            select(&workers),
            Err(DispatchError::NoWorkersAvailable)
        ));
    }

    #[test]
    fn setting_healthy_makes_worker_eligible_again() {
        let w0 = worker("w0", 4);
        w0.set_healthy(false);
        let workers = vec![w0.clone()];
        assert!(select(&workers).is_err());
        w0.set_healthy(true);
        assert!(select(&workers).is_ok());
    }

    #[test]
    fn draw_is_biased_toward_higher_score_but_not_exclusive() {
        let fast = worker("fast", 100);
        let slow = worker("slow", 100);
        // Bias slow's score down via a poor success rate.
        for _ in 0..10 {
            slow.record_request(std::time::Duration::from_millis(5), false, Some("http_status_error"));
        }
        for _ in 0..10 {
            fast.record_request(std::time::Duration::from_millis(5), true, None);
        }
        let workers = vec![fast.clone(), slow.clone()];
        let mut fast_count = 0;
        for _ in 0..500 {
            if select(&workers).unwrap().id() == "fast" {
                fast_count += 1;
            }
        }
        assert!(fast_count > 250, "fast worker should win the majority of draws");
        assert!(fast_count < 500, "slow worker should still occasionally be drawn");
    }
}
