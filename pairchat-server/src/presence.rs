//! Presence fan-out.
//!
//! The online set is never stored on its own: it is the key set of the
//! [`crate::registry::ConnectionRegistry`] at the instant of a mutation.
//! Every change sends the full set to every session; clients replace their
//! copy wholesale.

use pairchat_proto::event::ServerEvent;
use pairchat_proto::message::UserId;

use crate::registry::SessionSender;

/// Collects user ids into a sorted online set.
pub fn online_set<'a>(users: impl Iterator<Item = &'a UserId>) -> Vec<UserId> {
    let mut online: Vec<UserId> = users.cloned().collect();
    online.sort();
    online
}

/// Sends `event` to each of `targets`. Closed channels are skipped.
pub fn fan_out<'a>(event: &ServerEvent, targets: impl Iterator<Item = &'a SessionSender>) {
    let mut reached = 0usize;
    for sender in targets {
        if sender.send(event.clone()).is_ok() {
            reached += 1;
        }
    }
    tracing::debug!(event = event.name(), reached, "broadcast");
}
