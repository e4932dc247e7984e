use std::sync::{Arc, Mutex};

use actix_web::web::Bytes;

/// Encoded display frame ready to be served.
#[derive(Clone)]
pub(crate) struct FramePacket {
    pub(crate) jpeg: Bytes,
    pub(crate) frame_number: u64,
    pub(crate) timestamp_ms: i64,
}

/// Latest display frame, written by the frame loop and read by every client.
///
/// Packets are swapped whole; readers clone the `Bytes` handle and release the
/// lock before touching the network.
#[derive(Clone, Default)]
pub(crate) struct PublishedImage {
    latest: Arc<Mutex<Option<FramePacket>>>,
}

impl PublishedImage {
    pub(crate) fn publish(&self, packet: FramePacket) {
        if let Ok(mut guard) = self.latest.lock() {
            *guard = Some(packet);
        }
    }

    pub(crate) fn latest(&self) -> Option<FramePacket> {
        match self.latest.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => None,
        }
    }
}
