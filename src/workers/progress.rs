use tokio::sync::watch;

/// Write side of a job's progress channel. Values are percentages and never
/// decrease within one attempt.
#[derive(Debug)]
pub struct ProgressReporter {
    tx: watch::Sender<u8>,
}

impl ProgressReporter {
    pub fn channel() -> (Self, watch::Receiver<u8>) {
        let (tx, rx) = watch::channel(0);
        (Self { tx }, rx)
    }

    /// Records a checkpoint. Lower or equal values are ignored and do not
    /// wake receivers.
    pub fn checkpoint(&self, percent: u8) {
        let percent = percent.min(100);
        self.tx.send_if_modified(|current| {
            if percent > *current {
                *current = percent;
                true
            } else {
                false
            }
        });
    }

    pub fn current(&self) -> u8 {
        *self.tx.borrow()
    }
}
