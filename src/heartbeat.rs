use std::{sync::Arc, time::Duration};
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::{
    link::Link,
    protocol::{Command, Reply},
    types::{ResultCode, SessionState},
};

/// Handle to the running KEEP_ALIVE task
pub(crate) struct Heartbeat {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Heartbeat {
    /// Start sending KEEP_ALIVE every `interval`, the first one after a full interval
    pub(crate) fn spawn(link: Arc<Mutex<Link>>, interval: Duration) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(link, interval, cancel.clone()));

        info!("Heartbeat started ({}ms interval)", interval.as_millis());
        Self { cancel, task }
    }

    /// Cooperative stop: an exchange already in flight runs to completion
    ///
    /// Returns once the task has exited, so no heartbeat begins afterwards.
    pub(crate) async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!("Heartbeat task ended abnormally: {}", e);
        }
        debug!("Heartbeat stopped");
    }

    /// Immediate stop: an exchange in flight is dropped and its lock released
    pub(crate) async fn abort(self) {
        self.cancel.cancel();
        self.task.abort();
        match self.task.await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {}
            Err(e) => warn!("Heartbeat task ended abnormally: {}", e),
        }
        debug!("Heartbeat aborted");
    }

    /// Synchronous cancellation for drop paths; does not wait for the task
    pub(crate) fn cancel_now(&self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

async fn run(link: Arc<Mutex<Link>>, interval: Duration, cancel: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }

        let mut guard = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            guard = link.lock() => guard,
        };

        if cancel.is_cancelled() {
            break;
        }
        if guard.state() != SessionState::Active {
            debug!("Heartbeat found session {}, exiting", guard.state());
            break;
        }

        match guard.exchange(&Command::KeepAlive).await {
            Ok(Reply::Result(ResultCode::Success)) => trace!("Heartbeat acknowledged"),
            Ok(Reply::Result(code)) => warn!("Heartbeat answered with {}", code),
            Ok(other) => warn!("Heartbeat answered with unexpected reply {:?}", other),
            Err(e) => {
                error!("Heartbeat failed, session lost: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeBike;

    fn active_link(bike: &FakeBike) -> Arc<Mutex<Link>> {
        let mut link = Link::new(Some(Box::new(bike.clone())));
        link.set_state(SessionState::Active);
        Arc::new(Mutex::new(link))
    }

    #[tokio::test]
    async fn test_heartbeat_sends_keep_alive() {
        let bike = FakeBike::new();
        let link = active_link(&bike);

        let heartbeat = Heartbeat::spawn(link, Duration::from_millis(5));
        bike.wait_for_keep_alives(3).await;
        heartbeat.stop().await;

        assert!(bike.frames().iter().all(|c| *c == Command::KeepAlive));
        assert_eq!(bike.violations(), 0);
    }

    #[tokio::test]
    async fn test_stop_prevents_further_heartbeats() {
        let bike = FakeBike::new();
        let link = active_link(&bike);

        let heartbeat = Heartbeat::spawn(link, Duration::from_millis(2));
        bike.wait_for_keep_alives(2).await;
        heartbeat.stop().await;

        let sent = bike.keep_alive_count();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(bike.keep_alive_count(), sent);
    }

    #[tokio::test]
    async fn test_abort_releases_lock_held_by_stalled_exchange() {
        let bike = FakeBike::new();
        bike.stall_keep_alive_replies();
        let link = active_link(&bike);

        let heartbeat = Heartbeat::spawn(Arc::clone(&link), Duration::from_millis(1));
        bike.wait_for_keep_alives(1).await;
        heartbeat.abort().await;

        let guard = tokio::time::timeout(Duration::from_secs(1), link.lock())
            .await
            .expect("lock must be released by abort");
        assert_eq!(guard.state(), SessionState::Active);
        assert_eq!(bike.keep_alive_count(), 1);
    }

    #[tokio::test]
    async fn test_fatal_heartbeat_error_closes_link() {
        let bike = FakeBike::new();
        bike.break_after_frames(0);
        let link = active_link(&bike);

        let heartbeat = Heartbeat::spawn(Arc::clone(&link), Duration::from_millis(1));
        bike.wait_until_closed().await;
        heartbeat.stop().await;

        assert_eq!(link.lock().await.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_device_rejection_keeps_heartbeat_running() {
        let bike = FakeBike::new();
        bike.set_command_result(ResultCode::UnspecifiedError);
        let link = active_link(&bike);

        let heartbeat = Heartbeat::spawn(Arc::clone(&link), Duration::from_millis(1));
        bike.wait_for_keep_alives(3).await;
        heartbeat.stop().await;

        assert_eq!(link.lock().await.state(), SessionState::Active);
    }
}
