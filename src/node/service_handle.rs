use anyhow::Result;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Holds running tasks and the shutdown channel for the importer.
/// Call `shutdown()` to stop them gracefully.
pub struct ServiceHandle {
    shutdown_tx: watch::Sender<bool>,
    join_handles: Vec<(&'static str, JoinHandle<anyhow::Result<()>>)>,
}

impl ServiceHandle {
    /// Create a new ServiceHandle and return it together with a Receiver clonable by tasks.
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        let handle = ServiceHandle { shutdown_tx: tx, join_handles: vec![] };
        (handle, rx)
    }

    /// Attach a named background task so shutdown waits on it.
    pub fn attach(&mut self, name: &'static str, h: JoinHandle<anyhow::Result<()>>) {
        self.join_handles.push((name, h));
    }

    pub fn len(&self) -> usize {
        self.join_handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.join_handles.is_empty()
    }

    /// Signal shutdown to all tasks and await them in attach order.
    /// Returns the first task error, if any.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);

        let mut first_err = None;
        for (name, h) in self.join_handles {
            match h.await {
                Ok(Ok(())) => tracing::debug!(task = name, "service task stopped"),
                Ok(Err(e)) => {
                    tracing::error!(task = name, "service task returned error: {:?}", e);
                    first_err.get_or_insert(e);
                }
                Err(e) => {
                    tracing::error!(task = name, "task join error: {:?}", e);
                    first_err.get_or_insert(anyhow::anyhow!("task {} panicked: {}", name, e));
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Return a cloneable shutdown receiver for tasks that need to observe shutdown state.
    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Return the shutdown sender so tasks can request a stop themselves.
    pub fn shutdown_sender(&self) -> watch::Sender<bool> {
        self.shutdown_tx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_reports_task_error() {
        let (mut svc, rx) = ServiceHandle::new();
        let mut ok_rx = rx.clone();
        svc.attach("waits", tokio::spawn(async move {
            while !*ok_rx.borrow() {
                if ok_rx.changed().await.is_err() {
                    break;
                }
            }
            Ok(())
        }));
        svc.attach("fails", tokio::spawn(async { Err(anyhow::anyhow!("boom")) }));
        assert_eq!(svc.len(), 2);
        let err = svc.shutdown().await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
