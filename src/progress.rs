use crossbeam_channel::{Receiver, Sender};

/// One-way, best-effort progress sink for a pipeline run.
pub trait Observer: Send + Sync {
    fn report(&self, message: &str);

    /// The run has finished, successfully or not.
    fn done(&self) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Progress(String),
    Done,
}

/// Forwards progress to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl Observer for LogObserver {
    fn report(&self, message: &str) {
        log::info!("{}", message);
    }
}

/// Sends progress as [`Event`]s to a receiver owned by the caller.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: Sender<Event>,
}

impl Observer for ChannelObserver {
    fn report(&self, message: &str) {
        // A receiver that hung up just stops listening.
        let _ = self.tx.send(Event::Progress(message.to_string()));
    }

    fn done(&self) {
        let _ = self.tx.send(Event::Done);
    }
}

pub fn channel() -> (ChannelObserver, Receiver<Event>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (ChannelObserver { tx }, rx)
}
