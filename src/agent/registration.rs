//! Agent registration state and the message-passing link.

use tokio::sync::{broadcast, mpsc, watch};
use tracing::warn;

/// Capacity of the lifecycle event mailbox. Transitions are rare; 16 is
/// generous.
const EVENT_MAILBOX_CAPACITY: usize = 16;

/// Lifecycle state derived from the registration slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Unregistered,
    Installing,
    /// A new agent version installed but not yet active.
    Waiting,
    Active,
}

/// Snapshot of the registration's slots, the only agent internals the
/// manager is allowed to read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AgentRegistration {
    pub installing: bool,
    pub waiting: bool,
    pub active: bool,
}

impl AgentRegistration {
    pub fn state(&self) -> AgentState {
        if self.waiting {
            AgentState::Waiting
        } else if self.installing {
            AgentState::Installing
        } else if self.active {
            AgentState::Active
        } else {
            AgentState::Unregistered
        }
    }

    /// An update is pending when a new agent version is installing or
    /// already waiting.
    pub fn has_update_pending(&self) -> bool {
        self.waiting || self.installing
    }
}

/// Lifecycle transition messages delivered through the mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentEvent {
    /// A new agent version finished installing.
    Installed,
    /// A new version is parked in the waiting slot.
    UpdateWaiting,
    /// The waiting version took over.
    Activated,
    /// First install completed; the application works offline now.
    OfflineReady,
}

/// Instructions sent to the agent context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentCommand {
    Register,
    /// Revalidate the agent script against the origin.
    CheckForUpdate,
    /// Activate the waiting version immediately.
    SkipWaiting,
}

/// The manager's half of the agent channel: commands out, state and
/// lifecycle events in.
#[derive(Clone)]
pub struct AgentLink {
    commands: mpsc::UnboundedSender<AgentCommand>,
    state: watch::Receiver<AgentRegistration>,
    events: broadcast::Sender<AgentEvent>,
}

/// The agent-context half, handed to whatever drives the real agent (or to
/// a test double).
pub struct AgentEndpoint {
    pub commands: mpsc::UnboundedReceiver<AgentCommand>,
    pub state: watch::Sender<AgentRegistration>,
    pub events: broadcast::Sender<AgentEvent>,
}

impl AgentLink {
    /// Create a connected link/endpoint pair.
    pub fn channel() -> (AgentLink, AgentEndpoint) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(AgentRegistration::default());
        let (event_tx, _) = broadcast::channel(EVENT_MAILBOX_CAPACITY);

        let link = AgentLink {
            commands: cmd_tx,
            state: state_rx,
            events: event_tx.clone(),
        };
        let endpoint = AgentEndpoint {
            commands: cmd_rx,
            state: state_tx,
            events: event_tx,
        };
        (link, endpoint)
    }

    /// Current registration snapshot.
    pub fn registration(&self) -> AgentRegistration {
        *self.state.borrow()
    }

    /// Send a command to the agent context. False when the context is gone.
    pub fn send(&self, command: AgentCommand) -> bool {
        match self.commands.send(command) {
            Ok(()) => true,
            Err(e) => {
                warn!(command = ?e.0, "agent context gone, command dropped");
                false
            }
        }
    }

    /// Subscribe to lifecycle transitions. Dropping the subscription
    /// detaches it.
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.events.subscribe(),
        }
    }
}

/// A live subscription to the lifecycle mailbox.
pub struct Subscription {
    rx: broadcast::Receiver<AgentEvent>,
}

impl Subscription {
    /// Next lifecycle event; `None` once the agent context is gone.
    /// A slow subscriber that misses events skips to the oldest retained
    /// one rather than erroring out.
    pub async fn recv(&mut self) -> Option<AgentEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "agent event subscription lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn unsubscribe(self) {}
}
