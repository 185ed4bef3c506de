//! Console-facing transports: the USB gadget (wired) and the L2CAP pair
//! (wireless). Shared error classification and the wireless link substate
//! machine live here; the session manager consumes both.

pub mod bt;
pub mod usb;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    /// Connect timed out: the console is powered off or out of range.
    #[error("console not responding")]
    NotResponding,
    /// Connection refused: the console no longer trusts our address.
    #[error("re-pairing over USB required")]
    RepairRequired,
    /// Host is up but the HID channels are busy.
    #[error("console busy")]
    Busy,
    /// The link dropped mid-session.
    #[error("link lost: {0}")]
    LinkLost(String),
    /// The local endpoint could not be prepared (FunctionFS, adapter).
    #[error("transport setup failed: {0}")]
    Setup(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Wireless transport substate. The only path into `Enabled` runs through
/// the full connect chain; [LinkState::advance] rejects shortcuts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    ControlConnected,
    InterruptConnected,
    /// Both channels open, waiting for the console's enable handshake.
    Ready,
    Enabled,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    ConnectStarted,
    ControlOpened,
    InterruptOpened,
    /// The 0xF4 enable was sent on the control channel.
    EnableSent,
    /// The console acknowledged the enable handshake.
    EnableAcked,
    /// The READY watchdog fired; consoles skipping the handshake after a
    /// reconnect are promoted anyway.
    WatchdogFired,
    Failed,
    Closed,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid link transition: {state:?} on {event:?}")]
pub struct InvalidTransition {
    pub state: LinkState,
    pub event: LinkEvent,
}

impl LinkState {
    pub fn advance(self, event: LinkEvent) -> Result<LinkState, InvalidTransition> {
        use LinkEvent::*;
        use LinkState::*;

        let next = match (self, event) {
            (_, Failed) => Error,
            (_, Closed) => Disconnected,
            (Disconnected | Error, ConnectStarted) => Connecting,
            (Connecting, ControlOpened) => ControlConnected,
            (ControlConnected, InterruptOpened) => InterruptConnected,
            (InterruptConnected, EnableSent) => Ready,
            (Ready, EnableAcked | WatchdogFired) => Enabled,
            // A late or duplicate ack is harmless.
            (Enabled, EnableAcked | WatchdogFired) => Enabled,
            (state, event) => return Err(InvalidTransition { state, event }),
        };
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LinkEvent::*;
    use LinkState::*;

    #[test]
    fn enabled_requires_full_chain() {
        let mut state = LinkState::default();
        for event in [ConnectStarted, ControlOpened, InterruptOpened, EnableSent, EnableAcked] {
            state = state.advance(event).unwrap();
        }
        assert_eq!(state, Enabled);
    }

    #[test]
    fn watchdog_promotes_ready() {
        let state = Ready.advance(WatchdogFired).unwrap();
        assert_eq!(state, Enabled);
    }

    #[test]
    fn shortcuts_are_rejected() {
        // No state before READY may enable.
        for state in [Disconnected, Connecting, ControlConnected, InterruptConnected] {
            assert!(state.advance(EnableAcked).is_err(), "{state:?}");
            assert!(state.advance(WatchdogFired).is_err(), "{state:?}");
        }
        // The chain cannot skip a channel.
        assert!(Connecting.advance(InterruptOpened).is_err());
        assert!(Disconnected.advance(ControlOpened).is_err());
        assert!(ControlConnected.advance(EnableSent).is_err());
    }

    #[test]
    fn failure_and_close_from_anywhere() {
        for state in [
            Disconnected,
            Connecting,
            ControlConnected,
            InterruptConnected,
            Ready,
            Enabled,
            Error,
        ] {
            assert_eq!(state.advance(Failed).unwrap(), Error);
            assert_eq!(state.advance(Closed).unwrap(), Disconnected);
        }
    }

    #[test]
    fn reconnect_after_error() {
        let state = Error.advance(ConnectStarted).unwrap();
        assert_eq!(state, Connecting);
    }
}
