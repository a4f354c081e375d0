use serde::{Deserialize, Serialize};

/// Outcome of one task inside a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskOutcome<R> {
    Pending,
    Success(R),
    Failure(String),
}

impl<R> TaskOutcome<R> {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Success(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, TaskOutcome::Failure(_))
    }

    pub fn success(&self) -> Option<&R> {
        match self {
            TaskOutcome::Success(r) => Some(r),
            _ => None,
        }
    }
}

/// One unit of work; `index` is its position in the submitted batch
#[derive(Debug, Clone)]
pub struct BatchTask<P, R> {
    pub index: usize,
    pub payload: P,
    pub outcome: TaskOutcome<R>,
}

impl<P, R> BatchTask<P, R> {
    pub fn new(index: usize, payload: P) -> Self {
        Self {
            index,
            payload,
            outcome: TaskOutcome::Pending,
        }
    }

    /// Wrap payloads in tasks numbered by input position
    pub fn from_payloads(payloads: impl IntoIterator<Item = P>) -> Vec<Self> {
        payloads
            .into_iter()
            .enumerate()
            .map(|(index, payload)| Self::new(index, payload))
            .collect()
    }
}

/// Outcomes in input order plus aggregate counts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult<R> {
    pub outcomes: Vec<TaskOutcome<R>>,
    pub success_count: usize,
    pub failure_count: usize,
}

impl<R> BatchResult<R> {
    /// Build from outcomes already placed by index
    pub fn from_outcomes(outcomes: Vec<TaskOutcome<R>>) -> Self {
        let success_count = outcomes.iter().filter(|o| o.is_success()).count();
        let failure_count = outcomes.iter().filter(|o| o.is_failure()).count();
        Self {
            outcomes,
            success_count,
            failure_count,
        }
    }

    pub fn empty() -> Self {
        Self::from_outcomes(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failure_count == 0 && self.success_count == self.outcomes.len()
    }

    /// Iterate `(index, result)` for every successful task
    pub fn successes(&self) -> impl Iterator<Item = (usize, &R)> {
        self.outcomes
            .iter()
            .enumerate()
            .filter_map(|(i, o)| o.success().map(|r| (i, r)))
    }
}

impl<R> std::ops::Index<usize> for BatchResult<R> {
    type Output = TaskOutcome<R>;

    fn index(&self, index: usize) -> &Self::Output {
        &self.outcomes[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_follow_outcomes() {
        let result = BatchResult::from_outcomes(vec![
            TaskOutcome::Success("a".to_string()),
            TaskOutcome::Failure("boom".to_string()),
            TaskOutcome::Success("c".to_string()),
        ]);
        assert_eq!(result.success_count, 2);
        assert_eq!(result.failure_count, 1);
        assert!(!result.all_succeeded());
        assert_eq!(result[1], TaskOutcome::Failure("boom".to_string()));

        let indices: Vec<usize> = result.successes().map(|(i, _)| i).collect();
        assert_eq!(indices, vec![0, 2]);
    }

    #[test]
    fn test_tasks_numbered_by_position() {
        let tasks: Vec<BatchTask<&str, ()>> = BatchTask::from_payloads(["x", "y", "z"]);
        assert_eq!(tasks[2].index, 2);
        assert_eq!(tasks[2].payload, "z");
        assert_eq!(tasks[0].outcome, TaskOutcome::Pending);
    }
}
