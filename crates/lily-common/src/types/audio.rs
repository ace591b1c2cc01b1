/// One chunk of audio moving through a voice session.
///
/// `seq` is assigned at capture time and only ever increases within a
/// session, so consumers can detect gaps left by dropped frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub seq: u64,
    pub data: Vec<u8>,
}

impl AudioFrame {
    pub fn new(seq: u64, data: Vec<u8>) -> Self {
        Self { seq, data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
