//! Dispatch thread for one connection.

use super::dispatch::Session;
use crossbeam_channel::{bounded, select, Receiver, Sender};
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

/// Runs a session's inbound loop on its own thread.
///
/// Frames are handled strictly in arrival order. The loop ends when the
/// session closes, the inbox disconnects or [`SessionDriver::stop`] is called;
/// every path tears the session down.
pub struct SessionDriver {
    shutdown: Sender<String>,
    handle: Option<JoinHandle<Session>>,
}

impl SessionDriver {
    pub fn spawn(mut session: Session, inbox: Receiver<Vec<u8>>) -> Self {
        let (shutdown, shutdown_rx) = bounded::<String>(1);

        let handle = thread::spawn(move || {
            loop {
                select! {
                    recv(inbox) -> frame => match frame {
                        Ok(frame) => {
                            if let Err(e) = session.handle_frame(&frame) {
                                error!(session = %session.id(), error = %e, "dispatch failed");
                            }
                            if session.state() == super::SessionState::Closed {
                                break;
                            }
                        }
                        Err(_) => {
                            session.on_transport_closed();
                            break;
                        }
                    },
                    recv(shutdown_rx) -> reason => {
                        let reason = reason.unwrap_or_else(|_| "shutdown".to_string());
                        if let Err(e) = session.close(&reason) {
                            debug!(error = %e, "close on shutdown");
                        }
                        break;
                    }
                }
            }
            session
        });

        Self {
            shutdown,
            handle: Some(handle),
        }
    }

    /// Close the session and wait for the loop to finish.
    pub fn stop(mut self, reason: &str) -> Option<Session> {
        let _ = self.shutdown.try_send(reason.to_string());
        self.join_inner()
    }

    /// Wait for the loop to end on its own.
    pub fn join(mut self) -> Option<Session> {
        self.join_inner()
    }

    fn join_inner(&mut self) -> Option<Session> {
        self.handle.take().and_then(|h| h.join().ok())
    }
}

impl Drop for SessionDriver {
    fn drop(&mut self) {
        if self.handle.is_some() {
            let _ = self.shutdown.try_send("driver dropped".to_string());
            self.join_inner();
        }
    }
}
