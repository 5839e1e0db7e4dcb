use crate::player::{PlayerAction, PlayerNotice};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::broadcast::{self, Receiver, Sender};

#[derive(Clone)]
pub struct EventBus {
    tx: Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(100);
        Self { tx }
    }

    /// Sending without any subscriber is not an error worth more than a trace.
    pub fn send(&self, event: Event) {
        if let Err(e) = self.tx.send(event) {
            trace!("No subscribers for event: {:?}", e.0);
        }
    }

    pub fn subscribe(&self) -> Subscriber {
        Subscriber::new(self.tx.subscribe())
    }
}

pub struct Subscriber {
    rx: Receiver<Event>,
}

impl Subscriber {
    pub fn new(rx: Receiver<Event>) -> Self {
        Self { rx }
    }

    pub fn try_recv(&mut self) -> Result<Event, TryRecvError> {
        self.rx.try_recv()
    }

    /// Next event, or `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.rx.recv().await {
                Ok(event) => break Some(event),
                Err(RecvError::Closed) => break None,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        "EventBus::Subscriber lagging behind senders, skipping {skipped} messages"
                    );
                }
            }
        }
    }
}

#[derive(Clone, Debug)]
pub enum Event {
    /// Command for the playback controller
    Player(PlayerAction),
    /// Something changed in the playback controller
    Notice(PlayerNotice),
}

pub fn debug(bus: &EventBus) {
    let bus = bus.clone();
    tokio::spawn(async move {
        let mut bus = bus.subscribe();
        while let Some(event) = bus.recv().await {
            debug!("Received event: {:?}", event);
        }
    });
}
