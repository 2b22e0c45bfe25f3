//! A single multiplexed stream within one carrier, handed to the service
//! proxy as a duplex byte channel.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use super::carrier::Carrier;
use crate::error::AppResult;

pub struct TunnelStream {
    pub id: u32,
    carrier: Arc<Carrier>,
    incoming: mpsc::UnboundedReceiver<Bytes>,
}

impl TunnelStream {
    pub(super) fn new(id: u32, carrier: Arc<Carrier>, incoming: mpsc::UnboundedReceiver<Bytes>) -> Self {
        Self { id, carrier, incoming }
    }

    pub fn write(&self, bytes: Bytes) -> AppResult<()> {
        self.carrier.send_data(self.id, bytes)
    }

    /// Awaits the next chunk of data from the upstream helper. Returns
    /// `None` once the stream has ended (an end-frame arrived, or the
    /// carrier tore down).
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.incoming.recv().await
    }

    pub fn end(&self) {
        self.carrier.send_end(self.id);
    }
}

impl Drop for TunnelStream {
    fn drop(&mut self) {
        self.carrier.deregister_stream(self.id);
    }
}
