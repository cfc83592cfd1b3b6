//! FIFO task source feeding the dispatch engine
//!
//! The source is owned exclusively by the engine loop, so insertions and
//! removals follow a single discipline and no task can be lost or
//! duplicated. Fresh tasks enter in submission order; retried tasks
//! re-enter at the back, behind everything already waiting.

use std::collections::VecDeque;

use crate::models::{CrawlTask, TaskState};

/// FIFO queue of pending crawl tasks
#[derive(Debug, Default)]
pub struct TaskSource {
    queue: VecDeque<CrawlTask>,
}

impl TaskSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a freshly submitted task
    pub fn push_new(&mut self, task: CrawlTask) {
        debug_assert_eq!(task.state, TaskState::Queued);
        self.queue.push_back(task);
    }

    /// Re-insert a task awaiting retry at the back of the queue
    pub fn push_retry(&mut self, task: CrawlTask) {
        debug_assert_eq!(task.state, TaskState::Retrying);
        self.queue.push_back(task);
    }

    /// Remove and return the task at the front
    pub fn pop(&mut self) -> Option<CrawlTask> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: usize) -> CrawlTask {
        CrawlTask::new(id, format!("https://example.com/{id}"), "example.com".into())
    }

    #[test]
    fn test_fifo_order() {
        let mut source = TaskSource::new();
        source.push_new(task(0));
        source.push_new(task(1));
        source.push_new(task(2));

        assert_eq!(source.pop().unwrap().id, 0);
        assert_eq!(source.pop().unwrap().id, 1);
        assert_eq!(source.pop().unwrap().id, 2);
        assert!(source.pop().is_none());
    }

    #[test]
    fn test_retry_goes_to_the_back() {
        let mut source = TaskSource::new();
        source.push_new(task(0));
        source.push_new(task(1));

        let mut retried = source.pop().unwrap();
        retried.state = TaskState::Retrying;
        retried.attempt = 1;
        source.push_retry(retried);

        assert_eq!(source.pop().unwrap().id, 1);
        let back = source.pop().unwrap();
        assert_eq!(back.id, 0);
        assert_eq!(back.attempt, 1);
    }

    #[test]
    fn test_len_and_empty() {
        let mut source = TaskSource::new();
        assert!(source.is_empty());

        source.push_new(task(0));
        assert_eq!(source.len(), 1);
        assert!(!source.is_empty());

        source.pop();
        assert!(source.is_empty());
    }
}
