//! One task per item, results funnelled to a single consumer.

use std::future::Future;

use log::error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

const RESULT_BUFFER: usize = 64;

/// A batch of spawned units of work.
///
/// Results arrive on [`FanOut::next`] in completion order.  `next`
/// returns `None` once every unit has finished, which is the join
/// barrier of the batch.
pub struct FanOut<T> {
    tasks: JoinSet<()>,
    results: mpsc::Receiver<T>,
}

impl<T: Send + 'static> FanOut<T> {
    /// Spawns `work` for every item.  Units yielding `None` report nothing.
    pub fn spawn<I, F, Fut>(items: I, work: F) -> Self
    where
        I: IntoIterator,
        F: Fn(I::Item) -> Fut,
        Fut: Future<Output = Option<T>> + Send + 'static,
    {
        let (tx, results) = mpsc::channel(RESULT_BUFFER);
        let mut tasks = JoinSet::new();
        for item in items {
            let tx = tx.clone();
            let unit = work(item);
            tasks.spawn(async move {
                if let Some(result) = unit.await {
                    // Receiver only goes away when the consumer is dropped
                    let _ = tx.send(result).await;
                }
            });
        }
        Self { tasks, results }
    }

    pub async fn next(&mut self) -> Option<T> {
        self.results.recv().await
    }

    /// Drains every remaining result and waits for all units.
    pub async fn collect(mut self) -> Vec<T> {
        let mut out = Vec::new();
        while let Some(result) = self.next().await {
            out.push(result);
        }
        self.join().await;
        out
    }

    /// Waits for every unit, logging the ones that panicked.
    pub async fn join(mut self) {
        while let Some(res) = self.tasks.join_next().await {
            if let Err(e) = res {
                error!("discovery task failed: {}", e);
            }
        }
    }
}
