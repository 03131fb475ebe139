//! Periodic poller used by engines to push position and detect end of track

use crossbeam_channel::{bounded, select, tick, Sender};
use std::ops::ControlFlow;
use std::thread::JoinHandle;
use std::time::Duration;

/// Background thread calling `poll` every `interval` until stopped
///
/// Dropping the ticker stops it; the thread exits on its next wakeup.
pub(crate) struct Ticker {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    pub(crate) fn spawn<F>(name: &str, interval: Duration, mut poll: F) -> std::io::Result<Self>
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let ticks = tick(interval);
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticks) -> _ => {
                            if poll().is_break() {
                                break;
                            }
                        }
                    }
                }
            })?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Stop the thread and wait for it, unless called from the ticker itself
    pub(crate) fn stop(mut self) {
        self.stop_tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop_tx.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn polls_until_break() {
        let (tx, rx) = unbounded();
        let mut count = 0;
        let ticker = Ticker::spawn("test-ticker", Duration::from_millis(5), move || {
            count += 1;
            let _ = tx.send(count);
            if count == 3 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .unwrap();

        let seen: Vec<_> = rx.iter().collect();
        assert_eq!(seen, vec![1, 2, 3]);
        ticker.stop();
    }

    #[test]
    fn stop_ends_the_thread() {
        let (tx, rx) = unbounded::<()>();
        let ticker = Ticker::spawn("test-ticker", Duration::from_millis(5), move || {
            let _ = tx.send(());
            ControlFlow::Continue(())
        })
        .unwrap();

        rx.recv_timeout(Duration::from_secs(1)).unwrap();
        ticker.stop();
        while rx.try_recv().is_ok() {}
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }
}
