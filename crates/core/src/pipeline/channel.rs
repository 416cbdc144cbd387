//! Encoder channel slots shared between the pipeline and the dispatcher.

use parking_lot::RwLock;

use super::rate::RateControl;
use crate::error::{MediaError, Result};
use crate::hal::{EncoderDevice, ReadyHandle};
use crate::media::Codec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Created,
    Bound,
    Receiving,
}

/// One encoder channel slot.
#[derive(Debug, Clone)]
pub struct EncoderChannel {
    pub index: u8,
    pub codec: Option<Codec>,
    pub rate: Option<RateControl>,
    pub state: ChannelState,
    /// Readiness descriptor, acquired lazily by the dispatcher.
    pub descriptor: Option<ReadyHandle>,
    pub framerate: u32,
}

impl EncoderChannel {
    fn idle(index: u8) -> Self {
        Self {
            index,
            codec: None,
            rate: None,
            state: ChannelState::Idle,
            descriptor: None,
            framerate: 0,
        }
    }

    /// Encoder device family, once a codec is configured.
    pub fn device(&self) -> Option<EncoderDevice> {
        self.codec.map(EncoderDevice::for_codec)
    }
}

/// Fixed-size table of encoder channels.
///
/// Owned by the pipeline and shared with the dispatcher by `Arc`. The
/// pipeline is the only writer of lifecycle state; the dispatcher only
/// attaches readiness descriptors.
#[derive(Debug)]
pub struct ChannelTable {
    slots: RwLock<Vec<EncoderChannel>>,
}

impl ChannelTable {
    pub fn new(capacity: u8) -> Self {
        Self {
            slots: RwLock::new((0..capacity).map(EncoderChannel::idle).collect()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.read().len()
    }

    pub fn get(&self, index: u8) -> Result<EncoderChannel> {
        self.slots
            .read()
            .get(index as usize)
            .cloned()
            .ok_or(MediaError::InvalidChannel(index))
    }

    pub fn state(&self, index: u8) -> Option<ChannelState> {
        self.slots.read().get(index as usize).map(|c| c.state)
    }

    /// Snapshot of every channel currently receiving frames.
    pub fn receiving(&self) -> Vec<EncoderChannel> {
        self.slots
            .read()
            .iter()
            .filter(|c| c.state == ChannelState::Receiving)
            .cloned()
            .collect()
    }

    /// Indices of every non-idle channel.
    pub fn active_indices(&self) -> Vec<u8> {
        self.slots
            .read()
            .iter()
            .filter(|c| c.state != ChannelState::Idle)
            .map(|c| c.index)
            .collect()
    }

    pub(crate) fn update<R>(&self, index: u8, f: impl FnOnce(&mut EncoderChannel) -> R) -> Result<R> {
        let mut slots = self.slots.write();
        let slot = slots
            .get_mut(index as usize)
            .ok_or(MediaError::InvalidChannel(index))?;
        Ok(f(slot))
    }

    pub(crate) fn set_state(&self, index: u8, state: ChannelState) -> Result<()> {
        self.update(index, |c| c.state = state)
    }

    /// Store `handle` as the channel's descriptor if it is still receiving.
    /// Returns `false` when the channel moved on in the meantime.
    pub fn attach_descriptor(&self, index: u8, handle: ReadyHandle) -> bool {
        let mut slots = self.slots.write();
        match slots.get_mut(index as usize) {
            Some(c) if c.state == ChannelState::Receiving => {
                c.descriptor = Some(handle);
                true
            }
            _ => false,
        }
    }

    /// Mark the slot idle and hand back what it held.
    pub(crate) fn reset(&self, index: u8) -> Result<EncoderChannel> {
        self.update(index, |c| std::mem::replace(c, EncoderChannel::idle(index)))
    }
}
