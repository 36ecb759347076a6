use std::collections::VecDeque;

/// Packets that arrived during the map transfer, held until the world exists.
#[derive(Debug, Default)]
pub struct SavedPacketQueue {
    packets: VecDeque<Vec<u8>>,
}

impl SavedPacketQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, packet: Vec<u8>) {
        self.packets.push_back(packet);
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn clear(&mut self) {
        self.packets.clear();
    }

    /// Hands out every packet in arrival order. Anything not consumed is still gone afterwards.
    pub fn drain(&mut self) -> impl Iterator<Item = Vec<u8>> + use<> {
        std::mem::take(&mut self.packets).into_iter()
    }
}
