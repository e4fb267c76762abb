//! Messages from the window host to the frame loop.
//!
//! The host posts through a [`FrameSender`]; the frame loop drains its
//! [`FrameMailbox`] once per iteration, before rendering.

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

use tracing::trace;

/// A request for the frame loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameMessage {
    /// The window's client area changed size.
    Resize { width: u32, height: u32 },
    /// Turn vertical sync on or off.
    SetVsync(bool),
    /// Drain the GPU and stop rendering.
    Shutdown,
}

/// What the frame loop should do after handling a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopControl {
    Continue,
    Exit,
}

/// Posting half of a mailbox.
#[derive(Clone, Debug)]
pub struct FrameSender {
    sender: Sender<FrameMessage>,
}

impl FrameSender {
    /// Posts a message. Returns `false` once the mailbox is gone.
    pub fn post(&self, message: FrameMessage) -> bool {
        self.sender.send(message).is_ok()
    }
}

/// Receiving half of a mailbox.
#[derive(Debug)]
pub struct FrameMailbox {
    receiver: Receiver<FrameMessage>,
}

impl FrameMailbox {
    /// Creates a connected sender and mailbox.
    pub fn channel() -> (FrameSender, FrameMailbox) {
        let (sender, receiver) = mpsc::channel();
        (FrameSender { sender }, FrameMailbox { receiver })
    }

    /// Takes every pending message in posting order.
    ///
    /// Consecutive resizes collapse into the last one, since only the final
    /// size matters.
    pub fn drain(&mut self) -> Vec<FrameMessage> {
        let mut messages: Vec<FrameMessage> = Vec::new();
        loop {
            match self.receiver.try_recv() {
                Ok(message) => {
                    trace!("Mailbox received {:?}", message);
                    if let FrameMessage::Resize { .. } = message
                        && let Some(FrameMessage::Resize { .. }) = messages.last()
                    {
                        messages.pop();
                    }
                    messages.push(message);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_keeps_order() {
        let (sender, mut mailbox) = FrameMailbox::channel();
        assert!(sender.post(FrameMessage::SetVsync(false)));
        assert!(sender.post(FrameMessage::Shutdown));

        assert_eq!(
            mailbox.drain(),
            vec![FrameMessage::SetVsync(false), FrameMessage::Shutdown]
        );
        assert!(mailbox.drain().is_empty());
    }

    #[test]
    fn test_consecutive_resizes_collapse() {
        let (sender, mut mailbox) = FrameMailbox::channel();
        sender.post(FrameMessage::Resize {
            width: 100,
            height: 100,
        });
        sender.post(FrameMessage::Resize {
            width: 200,
            height: 150,
        });
        sender.post(FrameMessage::SetVsync(true));
        sender.post(FrameMessage::Resize {
            width: 300,
            height: 300,
        });

        assert_eq!(
            mailbox.drain(),
            vec![
                FrameMessage::Resize {
                    width: 200,
                    height: 150
                },
                FrameMessage::SetVsync(true),
                FrameMessage::Resize {
                    width: 300,
                    height: 300
                },
            ]
        );
    }

    #[test]
    fn test_disconnected_sender() {
        let (sender, mut mailbox) = FrameMailbox::channel();
        sender.post(FrameMessage::Shutdown);
        drop(sender);

        assert_eq!(mailbox.drain(), vec![FrameMessage::Shutdown]);
        assert!(mailbox.drain().is_empty());
    }

    #[test]
    fn test_post_after_mailbox_dropped() {
        let (sender, mailbox) = FrameMailbox::channel();
        drop(mailbox);
        assert!(!sender.post(FrameMessage::Shutdown));
    }
}
