use std::future::Future;
use std::time::Duration;

use log::debug;
use tokio::task::JoinHandle;

use crate::quiz::round::Tick;

/// Holds at most one running countdown. Arming a new one aborts the old.
#[derive(Default)]
pub struct QuestionClock {
    handle: Option<JoinHandle<()>>,
}

impl QuestionClock {
    pub fn arm<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.disarm();
        self.handle = Some(tokio::spawn(task));
    }

    pub fn disarm(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for QuestionClock {
    fn drop(&mut self) {
        self.disarm();
    }
}

/// Calls `tick` once per `period` until it reports anything but
/// `Tick::Running`, and returns that final tick.
pub async fn countdown<F, Fut>(period: Duration, mut tick: F) -> Tick
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Tick>,
{
    loop {
        tokio::time::sleep(period).await;
        match tick().await {
            Tick::Running(left) => debug!("{}s left", left),
            done => return done,
        }
    }
}
