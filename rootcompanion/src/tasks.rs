use crossbeam::channel::{bounded, Receiver, Sender, TryRecvError};

/// Allows cancelling a running operation.
///
/// Dropping the canceller also cancels.
pub struct TaskCanceller {
    cancel: Option<Sender<()>>,
}

impl TaskCanceller {
    pub fn new() -> (Self, TaskCancelCheck) {
        let (tx, rx) = bounded(1);
        (Self { cancel: Some(tx) }, TaskCancelCheck { cancelled: rx })
    }

    /// Cancel the task. This can be invoked more than once, but only the first
    /// invocation matters.
    pub fn cancel(&mut self) {
        self.cancel.take();
    }
}

/// The worker side of a [TaskCanceller]
#[derive(Clone)]
pub struct TaskCancelCheck {
    cancelled: Receiver<()>,
}

impl TaskCancelCheck {
    /// Check to see if the task has been cancelled
    pub fn was_cancelled(&self) -> bool {
        matches!(self.cancelled.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Returns `Err(crate::Error::Cancelled)` if the task was cancelled
    pub fn check(&self) -> crate::Result<()> {
        if self.was_cancelled() {
            Err(crate::Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// A channel that becomes ready once the task is cancelled, for passing
    /// to blocking waits
    pub fn channel(&self) -> Receiver<()> {
        self.cancelled.clone()
    }
}

pub trait EventMonitor<T>: Send + Sync {
    fn on_event(&self, evt: T);
}

impl<U> EventMonitor<U> for Box<dyn EventMonitor<U>> {
    fn on_event(&self, evt: U) {
        self.as_ref().on_event(evt)
    }
}

/// An [EventMonitor] that is just a noop
pub struct NoopMonitor;

impl<T> EventMonitor<T> for NoopMonitor {
    fn on_event(&self, _evt: T) {}
}

impl NoopMonitor {
    pub fn new() -> Self {
        Self {}
    }
}

/// An [EventMonitor] that just dumps the events onto a channel.
pub struct ChannelEventMonitor<T>
where
    T: Sync + Send,
{
    chan: Sender<T>,
}

impl<T> ChannelEventMonitor<T>
where
    T: Sync + Send,
{
    pub fn create() -> (Self, Receiver<T>) {
        let (tx, rx) = crossbeam::channel::unbounded();
        (Self { chan: tx }, rx)
    }
}

impl<T> EventMonitor<T> for ChannelEventMonitor<T>
where
    T: Sync + Send,
{
    fn on_event(&self, evt: T) {
        let _ = self.chan.send(evt);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crossbeam::select;
    use std::time::Duration;

    #[test]
    fn test_cancel() {
        let (mut canceller, check) = TaskCanceller::new();
        assert!(!check.was_cancelled());
        assert!(check.check().is_ok());
        canceller.cancel();
        canceller.cancel();
        assert!(check.was_cancelled());
        assert!(matches!(check.check(), Err(crate::Error::Cancelled)));
    }

    #[test]
    fn test_drop_cancels() {
        let (canceller, check) = TaskCanceller::new();
        let chan = check.channel();
        drop(canceller);
        select! {
            recv(chan) -> _ => {},
            default(Duration::from_secs(1)) => panic!("channel should be ready"),
        }
        assert!(check.was_cancelled());
    }

    #[test]
    fn test_channel_monitor() {
        let (mon, rx) = ChannelEventMonitor::create();
        mon.on_event(1u32);
        mon.on_event(2u32);
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![1, 2]);
    }
}
