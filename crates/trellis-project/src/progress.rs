use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgressId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Begin {
        id: ProgressId,
        title: String,
    },
    Report {
        id: ProgressId,
        message: Option<String>,
        percentage: Option<u32>,
    },
    End {
        id: ProgressId,
        message: Option<String>,
    },
}

pub type ProgressReceiver = broadcast::Receiver<ProgressEvent>;

/// Fans progress events out to every subscriber.
///
/// Sending never blocks; events are dropped when nobody listens and lagging subscribers
/// lose the oldest ones.
#[derive(Clone)]
pub struct ProgressSender {
    tx: broadcast::Sender<ProgressEvent>,
    next_id: Arc<AtomicU64>,
}

impl ProgressSender {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn subscribe(&self) -> ProgressReceiver {
        self.tx.subscribe()
    }

    pub fn start(&self, title: impl Into<String>) -> Progress {
        let id = ProgressId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let _ = self.tx.send(ProgressEvent::Begin {
            id,
            title: title.into(),
        });
        Progress {
            id,
            tx: self.tx.clone(),
            finished: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Default for ProgressSender {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// One running unit of work. Ends when [`Progress::finish`] is called or the last clone drops.
#[derive(Clone)]
pub struct Progress {
    id: ProgressId,
    tx: broadcast::Sender<ProgressEvent>,
    finished: Arc<AtomicBool>,
}

impl Progress {
    pub fn id(&self) -> ProgressId {
        self.id
    }

    pub fn report(&self, message: impl Into<Option<String>>, percentage: Option<u32>) {
        let _ = self.tx.send(ProgressEvent::Report {
            id: self.id,
            message: message.into(),
            percentage: percentage.map(|p| p.min(100)),
        });
    }

    pub fn finish(&self, message: impl Into<Option<String>>) {
        if self
            .finished
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let _ = self.tx.send(ProgressEvent::End {
                id: self.id,
                message: message.into(),
            });
        }
    }
}

impl Drop for Progress {
    fn drop(&mut self) {
        if Arc::strong_count(&self.finished) == 1 {
            self.finish(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_ends_once() {
        let sender = ProgressSender::default();
        let mut rx = sender.subscribe();

        let progress = sender.start("Syncing");
        progress.report("collecting".to_string(), Some(250));
        progress.finish("done".to_string());
        drop(progress);

        let id = ProgressId(1);
        assert_eq!(
            rx.try_recv().unwrap(),
            ProgressEvent::Begin {
                id,
                title: "Syncing".to_string()
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            ProgressEvent::Report {
                id,
                message: Some("collecting".to_string()),
                percentage: Some(100),
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            ProgressEvent::End {
                id,
                message: Some("done".to_string())
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dropping_the_last_clone_ends_progress() {
        let sender = ProgressSender::default();
        let mut rx = sender.subscribe();

        let progress = sender.start("Syncing");
        let clone = progress.clone();
        drop(progress);
        assert!(matches!(rx.try_recv(), Ok(ProgressEvent::Begin { .. })));
        assert!(rx.try_recv().is_err());

        drop(clone);
        assert!(matches!(
            rx.try_recv(),
            Ok(ProgressEvent::End { message: None, .. })
        ));
    }
}
