//! Handle to the eventual result of a submitted task

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::channel::oneshot;

use crate::error::TaskError;

/// Identifier of a submitted task, unique per pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) u64);

impl TaskId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

pub(crate) type TaskResult<T> = Result<T, TaskError>;

enum Slot<T> {
    Pending(oneshot::Receiver<TaskResult<T>>),
    Ready(TaskResult<T>),
    Taken,
}

/// Result of one task: pending until a worker finishes it.
///
/// Can be polled (`is_finished`/`try_take`), blocked on (`wait`) or
/// awaited as a future.
pub struct TaskHandle<T> {
    id: TaskId,
    slot: Slot<T>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(id: TaskId, receiver: oneshot::Receiver<TaskResult<T>>) -> Self {
        Self {
            id,
            slot: Slot::Pending(receiver),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Whether the result (or failure) has arrived. Never blocks.
    pub fn is_finished(&mut self) -> bool {
        if let Slot::Pending(receiver) = &mut self.slot {
            match receiver.try_recv() {
                Ok(Some(result)) => self.slot = Slot::Ready(result),
                Ok(None) => return false,
                Err(oneshot::Canceled) => self.slot = Slot::Ready(Err(TaskError::Abandoned)),
            }
        }
        true
    }

    /// Take the result if the task has finished
    pub fn try_take(&mut self) -> Option<TaskResult<T>> {
        if !self.is_finished() {
            return None;
        }
        match std::mem::replace(&mut self.slot, Slot::Taken) {
            Slot::Ready(result) => Some(result),
            _ => None,
        }
    }

    /// Block the calling thread until the task finishes
    pub fn wait(self) -> TaskResult<T> {
        futures::executor::block_on(self)
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = TaskResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.slot {
            Slot::Pending(receiver) => match Pin::new(receiver).poll(cx) {
                Poll::Ready(Ok(result)) => {
                    this.slot = Slot::Taken;
                    Poll::Ready(result)
                }
                Poll::Ready(Err(oneshot::Canceled)) => {
                    this.slot = Slot::Taken;
                    Poll::Ready(Err(TaskError::Abandoned))
                }
                Poll::Pending => Poll::Pending,
            },
            Slot::Ready(_) => match std::mem::replace(&mut this.slot, Slot::Taken) {
                Slot::Ready(result) => Poll::Ready(result),
                _ => Poll::Ready(Err(TaskError::Abandoned)),
            },
            // Result already handed out
            Slot::Taken => Poll::Ready(Err(TaskError::Abandoned)),
        }
    }
}

// The result is moved out, never pinned in place
impl<T> Unpin for TaskHandle<T> {}

impl<T> std::fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.slot {
            Slot::Pending(_) => "pending",
            Slot::Ready(Ok(_)) => "ok",
            Slot::Ready(Err(_)) => "failed",
            Slot::Taken => "taken",
        };
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("state", &state)
            .finish()
    }
}
