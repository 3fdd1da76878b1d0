//! # Connectivity
//!
//! Two layers have to be up before anything is published:
//!
//! ```text
//! network/
//! ├── link.rs            - network link (interface association), bounded connect
//! ├── session.rs         - transport session atop the link, unbounded reconnect
//! └── mqtt_transport.rs  - rumqttc-backed session transport
//! ```
//!
//! The link is the lower layer (e.g. WiFi association), the session is the
//! MQTT connection on top of it. Their combined state is sampled once per
//! scheduler tick as a [`ConnectionState`].

pub mod link;
pub mod mqtt_transport;
pub mod session;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use link::{LinkError, LinkManager};
pub use session::{PublishError, SessionError, SessionManager};

/// Network credentials handed to the link on association
#[derive(Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Credentials {
    pub ssid: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("ssid", &self.ssid)
            .field("password", &"***")
            .finish()
    }
}

/// Snapshot of both connectivity layers, valid for one tick only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectionState {
    pub link: bool,
    pub session: bool,
}

impl ConnectionState {
    pub fn phase(&self) -> ConnectionPhase {
        match (self.link, self.session) {
            (false, _) => ConnectionPhase::LinkDown,
            (true, false) => ConnectionPhase::LinkUpSessionDown,
            (true, true) => ConnectionPhase::Ready,
        }
    }
}

/// Scheduler view of connectivity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    LinkDown,
    LinkUpSessionDown,
    Ready,
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionPhase::LinkDown => write!(f, "LINK_DOWN"),
            ConnectionPhase::LinkUpSessionDown => write!(f, "LINK_UP_SESSION_DOWN"),
            ConnectionPhase::Ready => write!(f, "READY"),
        }
    }
}
