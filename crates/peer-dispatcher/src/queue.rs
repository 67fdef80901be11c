use std::collections::VecDeque;
use std::io::Write;

use crate::{
    AbortOutstandingRequestEvent, BandwidthPolicy, BoxedMessage, CancelSendingPieceEvent, ChokingEvent, Peer,
    Result,
};

/// Messages waiting to be sent to a peer.
///
/// Messages leave the queue in FIFO order with two exceptions: a partially sent message goes back to
/// the front and blocks everything behind it, and uploads are held back while an upload speed limit
/// is exceeded.
#[derive(Debug, Default)]
pub struct OutboundMessageQueue {
    messages: VecDeque<BoxedMessage>,
}

impl OutboundMessageQueue {
    pub fn new() -> Self {
        OutboundMessageQueue::default()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn push(&mut self, mut message: BoxedMessage) {
        message.on_queued();
        self.messages.push_back(message);
    }

    pub fn extend(&mut self, messages: impl IntoIterator<Item = BoxedMessage>) {
        for message in messages {
            self.push(message);
        }
    }

    /// Sends queued messages until the queue is empty or a message couldn't be sent completely.
    ///
    /// Uploads that are held back by the bandwidth policy are put back in front of the queue, right
    /// behind the partially sent message if there is one. `on_upload` is called after each upload send.
    pub fn drain(
        &mut self,
        sink: &mut dyn Write,
        bandwidth: &dyn BandwidthPolicy,
        mut on_upload: impl FnMut(),
    ) -> Result<()> {
        let mut deferred = Vec::new();

        let result = loop {
            let Some(mut message) = self.messages.pop_front() else {
                break Ok(());
            };

            if message.is_uploading() && !message.is_sending_in_progress() && bandwidth.is_upload_throttled() {
                deferred.push(message);
                continue;
            }

            if let Err(e) = message.send(sink) {
                self.messages.push_front(message);
                break Err(e);
            }

            if message.is_uploading() {
                on_upload();
            }

            if message.is_sending_in_progress() {
                self.messages.push_front(message);
                break Ok(());
            }
        };

        if !deferred.is_empty() {
            tracing::trace!(deferred = deferred.len(), "upload speed limit exceeded, holding back piece messages");
            self.restore_deferred(deferred);
        }

        result
    }

    /// Whether the first message was sent partially
    pub fn is_sending_in_progress(&self) -> bool {
        self.messages
            .front()
            .is_some_and(|message| message.is_sending_in_progress())
    }

    pub fn count_uploading(&self) -> usize {
        self.messages.iter().filter(|message| message.is_uploading()).count()
    }

    pub fn notify_cancel_sending_piece(&mut self, event: CancelSendingPieceEvent) {
        self.broadcast(|message| message.on_cancel_sending_piece(&event));
    }

    pub fn notify_abort_outstanding_request(&mut self, event: AbortOutstandingRequestEvent) {
        self.broadcast(|message| message.on_abort_outstanding_request(&event));
    }

    /// `peer` answers which pieces are in our allowed fast set at the time of the choke
    pub fn notify_choking(&mut self, peer: &dyn Peer) {
        let event = ChokingEvent::new(peer);
        self.broadcast(|message| message.on_choking(&event));
    }

    /// Delivers an event to the messages queued right now. Follow-up messages are queued afterwards,
    /// so they never see the event themselves.
    fn broadcast<F>(&mut self, mut deliver: F)
    where
        F: FnMut(&mut BoxedMessage) -> Option<BoxedMessage>,
    {
        let follow_ups: Vec<BoxedMessage> = self.messages.iter_mut().filter_map(&mut deliver).collect();
        self.extend(follow_ups);
    }

    fn restore_deferred(&mut self, deferred: Vec<BoxedMessage>) {
        let at = if self.is_sending_in_progress() { 1 } else { 0 };
        let rest = self.messages.split_off(at);
        self.messages.extend(deferred);
        self.messages.extend(rest);
    }
}
