use std::sync::Arc;
use tokio::sync::Semaphore;
use std::future::Future;
use crate::error::{TaskwardenError, Result};

/// Executes futures concurrently with a specified concurrency limit
pub struct ParallelProcessor {
    max_concurrent: usize,
    semaphore: Arc<Semaphore>,
}

impl ParallelProcessor {
    /// Creates a new parallel processor with the specified concurrency limit
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            max_concurrent,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    /// Concurrency limit
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Runs every future to completion and returns their outputs in input order
    ///
    /// All futures are spawned up front; the semaphore bounds how many make
    /// progress at once. A panicking future yields an error in its slot.
    pub async fn process<F, T>(&self, tasks: Vec<F>) -> Vec<Result<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let mut handles = Vec::with_capacity(tasks.len());

        for task in tasks {
            let semaphore = Arc::clone(&self.semaphore);
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| TaskwardenError::Message(format!("semaphore closed: {}", e)))?;
                Ok::<T, TaskwardenError>(task.await)
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(TaskwardenError::Message(format!("parallel task failed: {}", e))),
            };
            results.push(result);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;
    use std::time::Duration;

    #[tokio::test]
    async fn test_results_keep_input_order() {
        let processor = ParallelProcessor::new(3);

        let make_task = |duration: u64, value: i32| async move {
            sleep(Duration::from_millis(duration)).await;
            value
        };

        let tasks = vec![
            make_task(40, 1),
            make_task(10, 2),
            make_task(30, 3),
            make_task(5, 4),
        ];

        let results: Vec<i32> = processor
            .process(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(results, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let processor = ParallelProcessor::new(2);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..6)
            .map(|_| {
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    sleep(Duration::from_millis(20)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                }
            })
            .collect();

        let results = processor.process(tasks).await;
        assert_eq!(results.len(), 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_panicking_task_yields_error() {
        let processor = ParallelProcessor::new(2);
        let tasks: Vec<std::pin::Pin<Box<dyn Future<Output = u8> + Send>>> = vec![
            Box::pin(async { 1 }),
            Box::pin(async {
                let explode = true;
                if explode {
                    panic!("probe blew up");
                }
                2
            }),
        ];

        let results = processor.process(tasks).await;
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }
}
