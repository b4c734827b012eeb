//! This module provides the bounded task pool part uploads run on.

use std::num::NonZeroU8;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::{self, Future, FutureExt};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

pub use future::RemoteHandle;

type Task = future::BoxFuture<'static, ()>;

/// The pool does not accept tasks, either because it has not been started or because it has been stopped.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("task pool is closed")]
pub struct Closed;

/// A fixed-size pool of workers processing asynchronous tasks in the background.
///
/// The pool runs at most `size` tasks at a time, one per worker. Pending tasks wait in a queue of `size` slots, so that pushing
/// a task to a busy pool suspends the caller until a slot is freed: a producer can prepare the next tasks while earlier ones are
/// still running, without ever buffering more than that.
///
/// Each task hands out a [`RemoteHandle`] on its result. **Dropping the remote handle cancels the task**, whether it is still
/// queued or already running.
///
/// # Example
/// ```
/// # tokio_test::block_on(async {
/// # use uploader::task::Pool;
/// let mut pool = Pool::default();
/// pool.start(3.try_into().unwrap());
///
/// let mut handles = vec![];
/// for i in 0..=5 {
///     handles.push(pool.execute(async move { i * 2 }).await.unwrap());
/// }
///
/// assert_eq!(futures::future::join_all(handles).await, [0, 2, 4, 6, 8, 10]);
///
/// pool.close().await;
/// # })
/// ```
#[derive(Debug, Default)]
pub struct Pool {
    /// The pool of workers.
    workers: Vec<Worker>,
    /// The sending part of a bounded channel to push tasks to the workers.
    ///
    /// The next available worker will wait for a task to be received through the channel.
    sender: Option<mpsc::Sender<Task>>,
}

impl Pool {
    /// Start a pool with `size` workers and as many queue slots.
    ///
    /// # Panics
    /// This method panics if the pool is already running, ie. when called more than once without stopping the pool in between.
    pub fn start(&mut self, size: NonZeroU8) {
        assert!(self.sender.is_none() && self.workers.is_empty());

        let size: usize = size.get().into();
        let (sender, receiver) = mpsc::channel(size);

        let receiver = Arc::new(Mutex::new(receiver));

        static WORKER_ID: AtomicUsize = AtomicUsize::new(0);
        let id = WORKER_ID.fetch_add(size, Ordering::Relaxed);

        self.workers = (0..size).map(|i| Worker::spawn(id.wrapping_add(i), Arc::clone(&receiver))).collect();
        self.sender = Some(sender);
    }

    /// Number of running workers.
    #[inline]
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Push a task and keep a remote handle on its result.
    ///
    /// This waits for a free queue slot when all workers are busy and the queue is full.
    ///
    /// ```
    /// # tokio_test::block_on(async {
    /// # use uploader::task::{Closed, Pool};
    /// let pool = Pool::default();
    ///
    /// assert_eq!(pool.execute(async { "Hello world!" }).await.err(), Some(Closed));
    /// # })
    /// ```
    pub async fn execute<T: Send + 'static>(&self, future: impl Future<Output = T> + Send + 'static) -> Result<RemoteHandle<T>, Closed> {
        let sender = self.sender.as_ref().ok_or(Closed)?;
        let (remote, remote_handle) = future.remote_handle();

        sender.send(remote.boxed()).await.map_err(|_| Closed)?;

        Ok(remote_handle)
    }

    /// Stop accepting tasks and wait for the workers to drain the queue.
    ///
    /// Tasks whose remote handle has been dropped are cancelled rather than awaited. The pool can be restarted afterwards.
    pub async fn stop(&mut self) {
        // workers exit once the last sender is gone and the queue is empty
        self.sender = None;

        let workers = std::mem::take(&mut self.workers);
        tracing::debug!("Stopping pool of {} upload workers", workers.len());

        future::join_all(workers.into_iter().map(Worker::join)).await;
    }

    /// Stop the pool for good.
    pub async fn close(mut self) {
        self.stop().await;
    }
}

type Queue = Arc<Mutex<mpsc::Receiver<Task>>>;

/// A background task pulling tasks off the shared queue, one at a time.
#[derive(Debug)]
struct Worker {
    id: usize,
    handle: tokio::task::JoinHandle<()>,
}

impl Worker {
    fn spawn(id: usize, queue: Queue) -> Self {
        tracing::trace!("Spawning upload worker #{id}");

        let handle = tokio::spawn(async move {
            while let Some(task) = Self::next_task(&queue).await {
                task.await;
            }

            tracing::trace!("Upload worker #{id} drained its queue");
        });

        Self { id, handle }
    }

    /// The queue lock is released before the task runs.
    async fn next_task(queue: &Queue) -> Option<Task> {
        queue.lock().await.recv().await
    }

    async fn join(self) {
        if let Err(err) = self.handle.await {
            tracing::error!("Upload worker #{} did not shut down cleanly: {err}", self.id);
        }
    }
}
