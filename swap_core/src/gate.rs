//! Expected-next-message policy.

use crate::error::SwapError;
use crate::message::{Message, MessageKind};
use crate::session::Role;

/// Tracks the only message kind the session will accept next. Everything
/// else is a fatal protocol violation, with one exception: the
/// XMR-offerer accepts `NotifyRefund` in any state, because the peer may
/// legitimately refund at several points.
#[derive(Debug)]
pub struct MessageGate {
    role: Role,
    next_expected: MessageKind,
}

impl MessageGate {
    pub fn new(role: Role, first: MessageKind) -> Self {
        Self {
            role,
            next_expected: first,
        }
    }

    pub fn next_expected(&self) -> MessageKind {
        self.next_expected
    }

    pub fn advance(&mut self, next: MessageKind) {
        self.next_expected = next;
    }

    pub fn check(&self, msg: &Message) -> Result<(), SwapError> {
        let kind = msg.kind();
        if self.role == Role::OffersXmr && kind == MessageKind::NotifyRefund {
            return Ok(());
        }
        if kind != self.next_expected {
            return Err(SwapError::unexpected_message(kind, self.next_expected));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xmr_lock() -> Message {
        Message::NotifyXmrLock {
            address: "44addr".to_string(),
        }
    }

    fn refund() -> Message {
        Message::NotifyRefund {
            tx_hash: "0xdead".to_string(),
        }
    }

    #[test]
    fn accepts_only_the_expected_kind() {
        let gate = MessageGate::new(Role::OffersEth, MessageKind::NotifyXmrLock);
        assert!(gate.check(&xmr_lock()).is_ok());
        assert!(matches!(
            gate.check(&Message::NotifyReady),
            Err(SwapError::Protocol(_))
        ));
    }

    #[test]
    fn duplicate_of_a_consumed_message_is_rejected() {
        let mut gate = MessageGate::new(Role::OffersEth, MessageKind::NotifyXmrLock);
        assert!(gate.check(&xmr_lock()).is_ok());
        gate.advance(MessageKind::NotifyClaimed);
        assert!(gate.check(&xmr_lock()).is_err());
    }

    #[test]
    fn xmr_offerer_accepts_refund_in_any_state() {
        let gate = MessageGate::new(Role::OffersXmr, MessageKind::NotifyReady);
        assert!(gate.check(&refund()).is_ok());
    }

    #[test]
    fn eth_offerer_gets_no_refund_exception() {
        let gate = MessageGate::new(Role::OffersEth, MessageKind::NotifyClaimed);
        assert!(gate.check(&refund()).is_err());
    }
}
