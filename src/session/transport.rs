//! Outbound frame transports.

use crate::error::{EtpError, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

/// Carries encoded frames to the counterpart.
///
/// `send` must not block on the counterpart: it is called while the
/// subscription lock is held.
pub trait Transport: Send + Sync {
    fn send(&self, frame: Vec<u8>) -> Result<()>;

    /// Stop accepting frames. The counterpart observes a disconnect.
    fn close(&self);

    fn is_open(&self) -> bool;
}

/// In-process transport backed by an unbounded channel.
pub struct MemoryTransport {
    sender: Mutex<Option<Sender<Vec<u8>>>>,
}

impl MemoryTransport {
    pub fn new(sender: Sender<Vec<u8>>) -> Self {
        Self {
            sender: Mutex::new(Some(sender)),
        }
    }
}

impl Transport for MemoryTransport {
    fn send(&self, frame: Vec<u8>) -> Result<()> {
        let guard = self.sender.lock();
        match guard.as_ref() {
            Some(sender) => sender.send(frame).map_err(|_| EtpError::SessionClosed),
            None => Err(EtpError::SessionClosed),
        }
    }

    fn close(&self) {
        self.sender.lock().take();
    }

    fn is_open(&self) -> bool {
        self.sender.lock().is_some()
    }
}

/// One end of an in-process connection.
pub struct MemoryConnection {
    pub transport: std::sync::Arc<MemoryTransport>,
    /// Frames sent by the other end.
    pub inbox: Receiver<Vec<u8>>,
}

/// Two connected ends: frames sent on one arrive in the other's inbox.
pub fn memory_pair() -> (MemoryConnection, MemoryConnection) {
    let (to_b, b_inbox) = unbounded();
    let (to_a, a_inbox) = unbounded();

    let a = MemoryConnection {
        transport: std::sync::Arc::new(MemoryTransport::new(to_b)),
        inbox: a_inbox,
    };
    let b = MemoryConnection {
        transport: std::sync::Arc::new(MemoryTransport::new(to_a)),
        inbox: b_inbox,
    };
    (a, b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::TryRecvError;

    #[test]
    fn test_pair_delivers_both_ways() {
        let (a, b) = memory_pair();
        a.transport.send(vec![1]).unwrap();
        b.transport.send(vec![2]).unwrap();
        assert_eq!(b.inbox.try_recv().unwrap(), vec![1]);
        assert_eq!(a.inbox.try_recv().unwrap(), vec![2]);
    }

    #[test]
    fn test_close_disconnects_counterpart() {
        let (a, b) = memory_pair();
        a.transport.close();
        assert!(!a.transport.is_open());
        assert!(matches!(a.transport.send(vec![1]), Err(EtpError::SessionClosed)));
        assert_eq!(b.inbox.try_recv(), Err(TryRecvError::Disconnected));
    }
}
