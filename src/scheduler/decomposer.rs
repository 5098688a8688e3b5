//! Splitting of jobs into independently dispatchable tasks.

use std::sync::Arc;

use crate::scheduler::job::{Job, Task};

/// Split `job` into tasks.
///
/// Parameterized jobs yield one task per integer of the inclusive range, in
/// ascending order. Replicated jobs need at least one idle worker at
/// decomposition time; they yield `repeat` tasks, or one per idle worker
/// (capped by the requested machine count) when no repeat count was given.
/// An empty result is valid: the job completes immediately with no results.
pub fn decompose(job: &Job, idle_workers: usize) -> Vec<Task> {
    let payload = Arc::new(job.payload.clone());

    if job.is_parameterized() {
        return (job.parameter_start..=job.parameter_end)
            .enumerate()
            .map(|(index, parameter)| Task {
                job_id: job.id,
                index,
                payload: Arc::clone(&payload),
                parameterized: true,
                parameter,
                attempts: 0,
            })
            .collect();
    }

    let count = if idle_workers == 0 {
        0
    } else if job.repeat > 0 {
        job.repeat as usize
    } else if job.machines > 0 {
        idle_workers.min(job.machines as usize)
    } else {
        idle_workers
    };

    (0..count)
        .map(|index| Task {
            job_id: job.id,
            index,
            payload: Arc::clone(&payload),
            parameterized: false,
            parameter: index as i64,
            attempts: 0,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::job::Payload;
    use std::collections::HashSet;

    #[test]
    fn range_is_covered_without_gaps_or_duplicates() {
        for (start, end) in [(1, 3), (-5, 5), (0, 0), (10, 250)] {
            let job = Job::parameterized(Payload::default(), start, end);
            let tasks = decompose(&job, 7);

            assert_eq!(tasks.len() as i64, end - start + 1);
            let params: Vec<i64> = tasks.iter().map(|t| t.parameter).collect();
            let expected: Vec<i64> = (start..=end).collect();
            assert_eq!(params, expected);
            assert!(tasks.iter().all(|t| t.parameterized && t.job_id == job.id));
        }
    }

    #[test]
    fn indices_are_dense() {
        let job = Job::parameterized(Payload::default(), 40, 44);
        let indices: HashSet<usize> = decompose(&job, 0).iter().map(|t| t.index).collect();
        assert_eq!(indices, (0..5).collect());
    }

    #[test]
    fn repeat_count_wins_over_idle_workers() {
        let job = Job::replicated(Payload::default(), 4);
        let tasks = decompose(&job, 9);
        assert_eq!(tasks.len(), 4);
        assert!(tasks.iter().all(|t| !t.parameterized && t.attempts == 0));
    }

    #[test]
    fn zero_repeat_uses_idle_workers() {
        let job = Job::replicated(Payload::default(), 0);
        assert_eq!(decompose(&job, 3).len(), 3);
        assert!(decompose(&job, 0).is_empty());
    }

    #[test]
    fn machine_count_caps_replication() {
        let mut job = Job::replicated(Payload::default(), 0);
        job.machines = 2;
        assert_eq!(decompose(&job, 5).len(), 2);
        assert_eq!(decompose(&job, 1).len(), 1);
    }

    #[test]
    fn replicated_job_without_workers_is_empty() {
        let job = Job::replicated(Payload::default(), 4);
        assert!(decompose(&job, 0).is_empty());
    }

    #[test]
    fn parameterized_job_ignores_worker_count() {
        let job = Job::parameterized(Payload::default(), 1, 3);
        assert_eq!(decompose(&job, 0).len(), 3);
    }

    #[test]
    fn decomposition_is_deterministic() {
        let job = Job::parameterized(
            Payload {
                file_name: "run".into(),
                ..Default::default()
            },
            1,
            20,
        );
        let a: Vec<(usize, i64)> = decompose(&job, 0).iter().map(|t| (t.index, t.parameter)).collect();
        let b: Vec<(usize, i64)> = decompose(&job, 5).iter().map(|t| (t.index, t.parameter)).collect();
        assert_eq!(a, b);
    }
}
