use std::collections::VecDeque;

use crate::models::audio_models::PoolStats;
use crate::models::error::VoiceError;

/// Fixed-capacity capture buffer.
///
/// `len()` is the high-water mark: bytes filled since the buffer was last
/// recycled. `index()` tags which of the pool's buffers this is.
#[derive(Debug)]
pub struct AudioBuffer {
    data: Box<[u8]>,
    filled: usize,
    index: usize,
}

impl AudioBuffer {
    fn allocate(index: usize, byte_size: usize) -> Result<Self, VoiceError> {
        let mut data = Vec::new();
        data.try_reserve_exact(byte_size).map_err(|e| {
            VoiceError::Allocation(format!("buffer {} ({} bytes): {}", index, byte_size, e))
        })?;
        data.resize(byte_size, 0);
        Ok(Self {
            data: data.into_boxed_slice(),
            filled: 0,
            index,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// The filled portion.
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.filled]
    }

    /// Copy as much of `src` as fits below `limit` bytes.
    ///
    /// Returns the number of bytes consumed from `src`. `limit` is clamped
    /// to the buffer capacity.
    pub fn fill_from(&mut self, src: &[u8], limit: usize) -> usize {
        let limit = limit.min(self.data.len());
        let room = limit.saturating_sub(self.filled);
        let n = room.min(src.len());
        self.data[self.filled..self.filled + n].copy_from_slice(&src[..n]);
        self.filled += n;
        n
    }

    pub fn is_full(&self, limit: usize) -> bool {
        self.filled >= limit.min(self.data.len())
    }

    fn clear(&mut self) {
        self.filled = 0;
    }
}

/// Round-robin pool of pre-allocated capture buffers.
///
/// All buffers are allocated once and live as long as the pool. The buffer at
/// the front of the queue is the one being filled. A filled buffer is taken
/// off the front, drained, and recycled to the back.
#[derive(Debug)]
pub struct AudioBufferPool {
    queue: VecDeque<AudioBuffer>,
    allocated: usize,
    buffer_size: usize,
    fills: u64,
    recycles: u64,
}

impl AudioBufferPool {
    /// Reserve `count` buffers of `byte_size` bytes each.
    pub fn allocate(count: usize, byte_size: usize) -> Result<Self, VoiceError> {
        if count == 0 {
            return Err(VoiceError::Allocation("buffer count must be positive".into()));
        }
        if byte_size == 0 {
            return Err(VoiceError::Allocation("buffer size must be positive".into()));
        }

        let mut queue = VecDeque::new();
        queue
            .try_reserve_exact(count)
            .map_err(|e| VoiceError::Allocation(format!("buffer queue: {}", e)))?;
        for index in 0..count {
            queue.push_back(AudioBuffer::allocate(index, byte_size)?);
        }

        log::debug!("allocated {} capture buffers of {} bytes", count, byte_size);
        Ok(Self {
            queue,
            allocated: count,
            buffer_size: byte_size,
            fills: 0,
            recycles: 0,
        })
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// The buffer currently receiving captured bytes.
    pub fn current_mut(&mut self) -> Option<&mut AudioBuffer> {
        self.queue.front_mut()
    }

    /// Hand the buffer at the front of the rotation to the drain path.
    pub fn take_filled(&mut self) -> Option<AudioBuffer> {
        let buffer = self.queue.pop_front()?;
        self.fills += 1;
        Some(buffer)
    }

    /// Return a drained buffer to the back of the fill rotation.
    ///
    /// Buffers that do not belong to this pool, or that are already queued,
    /// are dropped so the pool never holds duplicates.
    pub fn recycle(&mut self, mut buffer: AudioBuffer) {
        if buffer.index >= self.allocated || buffer.capacity() != self.buffer_size {
            log::error!("rejecting foreign buffer {} on recycle", buffer.index);
            return;
        }
        if self.queue.iter().any(|b| b.index == buffer.index) {
            log::error!("rejecting duplicate recycle of buffer {}", buffer.index);
            return;
        }
        buffer.clear();
        self.queue.push_back(buffer);
        self.recycles += 1;
    }

    /// Clear every queued buffer's fill mark.
    pub fn reset(&mut self) {
        for buffer in self.queue.iter_mut() {
            buffer.clear();
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocated: self.allocated,
            queued: self.queue.len(),
            fills: self.fills,
            recycles: self.recycles,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_rejects_empty_pool() {
        assert!(matches!(
            AudioBufferPool::allocate(0, 64),
            Err(VoiceError::Allocation(_))
        ));
        assert!(matches!(
            AudioBufferPool::allocate(3, 0),
            Err(VoiceError::Allocation(_))
        ));
    }

    #[test]
    fn rotation_is_round_robin() {
        let mut pool = AudioBufferPool::allocate(3, 8).unwrap();
        let mut order = Vec::new();
        for _ in 0..7 {
            let buffer = pool.take_filled().unwrap();
            order.push(buffer.index());
            pool.recycle(buffer);
        }
        assert_eq!(order, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn pool_size_constant_across_cycles() {
        let mut pool = AudioBufferPool::allocate(3, 16).unwrap();
        for i in 0..1_000u32 {
            let current = pool.current_mut().unwrap();
            current.fill_from(&i.to_le_bytes(), 16);
            let buffer = pool.take_filled().unwrap();
            pool.recycle(buffer);
        }
        let stats = pool.stats();
        assert_eq!(stats.allocated, 3);
        assert_eq!(stats.queued, 3);
        assert_eq!(stats.fills, 1_000);
        assert_eq!(stats.recycles, stats.fills);
    }

    #[test]
    fn fill_respects_limit_and_capacity() {
        let mut pool = AudioBufferPool::allocate(1, 8).unwrap();
        let buffer = pool.current_mut().unwrap();

        assert_eq!(buffer.fill_from(&[1, 2, 3], 4), 3);
        assert_eq!(buffer.fill_from(&[4, 5, 6], 4), 1);
        assert!(buffer.is_full(4));
        assert_eq!(buffer.bytes(), &[1, 2, 3, 4]);

        // limit above capacity clamps to capacity
        assert_eq!(buffer.fill_from(&[9; 10], 100), 4);
        assert_eq!(buffer.len(), 8);
    }

    #[test]
    fn recycle_clears_high_water_mark() {
        let mut pool = AudioBufferPool::allocate(2, 4).unwrap();
        pool.current_mut().unwrap().fill_from(&[7, 7], 4);
        let buffer = pool.take_filled().unwrap();
        assert_eq!(buffer.len(), 2);
        pool.recycle(buffer);

        if let Some(next) = pool.take_filled() {
            pool.recycle(next);
        }
        let recycled = pool.current_mut().unwrap();
        assert_eq!(recycled.index(), 0);
        assert!(recycled.is_empty());
    }

    #[test]
    fn duplicate_recycle_is_rejected() {
        let mut pool = AudioBufferPool::allocate(2, 4).unwrap();
        let forged = AudioBuffer::allocate(1, 4).unwrap();
        pool.recycle(forged);
        assert_eq!(pool.stats().queued, 2);
        assert_eq!(pool.stats().recycles, 0);

        let foreign = AudioBuffer::allocate(5, 4).unwrap();
        pool.recycle(foreign);
        assert_eq!(pool.stats().queued, 2);
    }

    #[test]
    fn reset_clears_queued_buffers() {
        let mut pool = AudioBufferPool::allocate(3, 4).unwrap();
        pool.current_mut().unwrap().fill_from(&[1, 2], 4);
        pool.reset();
        assert!(pool.current_mut().unwrap().is_empty());
    }
}
