//! C6 NotificationSender + C7 NotificationClient.

pub mod client;
pub mod sender;

use crate::beacon::PublicKey;
use crate::registry::PeerStatus;

/// Created by the client once a beacon stream parses to a known sender;
/// consumed exactly once by [`crate::peerpool::PeerPool`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationAction {
    pub remote_public_key: PublicKey,
    pub peer_status: PeerStatus,
}
