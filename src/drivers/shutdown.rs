use crossbeam::channel::{self, Receiver, Sender, TryRecvError};
/// Owner side of the stop signal. Triggering (or dropping) it disconnects the
/// channel every [`ShutdownToken`] listens on.
pub struct Shutdown {
    trigger: Option<Sender<()>>,
    token: ShutdownToken,
}
impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = channel::bounded(0);
        Self {
            trigger: Some(tx),
            token: ShutdownToken { rx },
        }
    }
    pub fn token(&self) -> ShutdownToken {
        self.token.clone()
    }
    pub fn trigger(&mut self) {
        if self.trigger.take().is_some() {
            log::debug!("shutdown signalled");
        }
    }
    #[cfg(test)]
    pub fn is_triggered(&self) -> bool {
        self.trigger.is_none()
    }
}
impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
/// Cloneable listener half of the stop signal.
#[derive(Clone)]
pub struct ShutdownToken {
    rx: Receiver<()>,
}
impl ShutdownToken {
    pub fn is_triggered(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }
}
