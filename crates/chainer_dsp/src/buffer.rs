//! Planar multi-channel sample buffer
//!
//! Every stage of the crossover works on separate per-channel slices.
//! Storage is sized once in `set_size()` (call during prepare, never from the
//! audio callback) and then only overwritten.

/// Planar audio buffer: one `Vec<f32>` per channel, all the same length
#[derive(Debug, Clone, Default)]
pub struct ChannelBuffer {
    channels: Vec<Vec<f32>>,
    len: usize,
}

impl ChannelBuffer {
    pub fn new(num_channels: usize, len: usize) -> Self {
        let mut buffer = Self::default();
        buffer.set_size(num_channels, len);
        buffer
    }

    /// Reallocate to the given shape and zero all samples
    ///
    /// Note: This allocates. Only call during setup, not in audio callback.
    pub fn set_size(&mut self, num_channels: usize, len: usize) {
        self.channels = vec![vec![0.0; len]; num_channels];
        self.len = len;
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Capacity of each channel in samples
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0 || self.channels.is_empty()
    }

    #[inline]
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    #[inline]
    pub fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        &mut self.channels[index]
    }

    pub fn channels(&self) -> impl Iterator<Item = &[f32]> {
        self.channels.iter().map(Vec::as_slice)
    }

    pub fn channels_mut(&mut self) -> impl Iterator<Item = &mut [f32]> {
        self.channels.iter_mut().map(Vec::as_mut_slice)
    }

    /// Zero every sample without reallocating
    pub fn clear(&mut self) {
        for channel in &mut self.channels {
            channel.fill(0.0);
        }
    }

    /// Zero the first `num_samples` samples of one channel
    pub fn clear_channel(&mut self, index: usize, num_samples: usize) {
        let channel = &mut self.channels[index];
        let end = num_samples.min(channel.len());
        channel[..end].fill(0.0);
    }

    /// Copy `num_samples` from each source channel, zero-filling channels the
    /// source does not have
    pub fn copy_from<C: AsRef<[f32]>>(&mut self, source: &[C], num_samples: usize) {
        let num_samples = num_samples.min(self.len);
        for (index, channel) in self.channels.iter_mut().enumerate() {
            match source.get(index) {
                Some(src) => {
                    let src = src.as_ref();
                    let copied = num_samples.min(src.len());
                    channel[..copied].copy_from_slice(&src[..copied]);
                    channel[copied..num_samples].fill(0.0);
                }
                None => channel[..num_samples].fill(0.0),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_zeroed() {
        let buffer = ChannelBuffer::new(2, 16);
        assert_eq!(buffer.num_channels(), 2);
        assert_eq!(buffer.len(), 16);
        assert!(buffer.channels().all(|c| c.iter().all(|&s| s == 0.0)));
    }

    #[test]
    fn test_copy_from_zero_fills_missing_channels() {
        let mut buffer = ChannelBuffer::new(2, 4);
        buffer.channel_mut(1).fill(9.0);

        let mono = [vec![1.0, 2.0, 3.0, 4.0]];
        buffer.copy_from(&mono, 4);

        assert_eq!(buffer.channel(0), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(buffer.channel(1), &[0.0; 4]);
    }

    #[test]
    fn test_copy_from_short_source() {
        let mut buffer = ChannelBuffer::new(1, 4);
        buffer.channel_mut(0).fill(5.0);

        let short = [vec![1.0, 2.0]];
        buffer.copy_from(&short, 4);

        assert_eq!(buffer.channel(0), &[1.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn test_clear_channel_partial() {
        let mut buffer = ChannelBuffer::new(1, 4);
        buffer.channel_mut(0).fill(1.0);
        buffer.clear_channel(0, 2);
        assert_eq!(buffer.channel(0), &[0.0, 0.0, 1.0, 1.0]);
    }
}
