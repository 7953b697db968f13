//! Host-visible per-stream sample buffer

use parking_lot::Mutex;

/// Stand-in for a stream's DMA area
///
/// Preallocated once at the descriptor's maximum size when the stream is
/// opened, so neither configure nor the period tick ever allocate. The
/// host writes playback frames into it and reads capture frames out of
/// it; the period tick moves bytes between it and the device ring.
/// Offsets wrap at `len`, the active buffer size in bytes.
pub struct DmaBuffer {
    area: Mutex<Box<[u8]>>,
}

impl DmaBuffer {
    pub(crate) fn try_new(size: usize) -> Option<Self> {
        let mut storage = Vec::new();
        storage.try_reserve_exact(size).ok()?;
        storage.resize(size, 0u8);
        Some(Self {
            area: Mutex::new(storage.into_boxed_slice()),
        })
    }

    /// Allocated size in bytes
    pub fn size(&self) -> usize {
        self.area.lock().len()
    }

    /// Copy `data` in at `offset`, wrapping at `len`
    pub fn write(&self, offset: usize, len: usize, data: &[u8]) {
        let mut area = self.area.lock();
        let len = len.min(area.len());
        if len == 0 {
            return;
        }
        let mut pos = offset % len;
        for chunk in data.chunks(len) {
            let first = chunk.len().min(len - pos);
            area[pos..pos + first].copy_from_slice(&chunk[..first]);
            area[..chunk.len() - first].copy_from_slice(&chunk[first..]);
            pos = (pos + chunk.len()) % len;
        }
    }

    /// Copy out into `out` from `offset`, wrapping at `len`
    pub fn read(&self, offset: usize, len: usize, out: &mut [u8]) {
        let area = self.area.lock();
        let len = len.min(area.len());
        if len == 0 {
            out.fill(0);
            return;
        }
        let mut pos = offset % len;
        for chunk in out.chunks_mut(len) {
            let first = chunk.len().min(len - pos);
            let n = chunk.len();
            chunk[..first].copy_from_slice(&area[pos..pos + first]);
            chunk[first..].copy_from_slice(&area[..n - first]);
            pos = (pos + n) % len;
        }
    }

    /// Zero the whole area
    pub fn clear(&self) {
        self.area.lock().fill(0);
    }

    /// Run `f` over the contiguous byte range `[start, end)` with the area locked
    pub(crate) fn with_range<R>(&self, start: usize, end: usize, f: impl FnOnce(&[u8]) -> R) -> R {
        let area = self.area.lock();
        f(&area[start..end])
    }

    /// Mutable counterpart of [`with_range`](Self::with_range)
    pub(crate) fn with_range_mut<R>(
        &self,
        start: usize,
        end: usize,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> R {
        let mut area = self.area.lock();
        f(&mut area[start..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_wraps_at_active_len() {
        let dma = DmaBuffer::try_new(32).unwrap();
        dma.write(6, 8, &[1, 2, 3, 4]);

        let mut out = [0u8; 4];
        dma.read(6, 8, &mut out);
        assert_eq!(out, [1, 2, 3, 4]);

        let mut head = [0u8; 2];
        dma.read(0, 8, &mut head);
        assert_eq!(head, [3, 4]);
    }

    #[test]
    fn test_range_access() {
        let dma = DmaBuffer::try_new(16).unwrap();
        dma.with_range_mut(4, 8, |bytes| bytes.copy_from_slice(&[7, 7, 7, 7]));
        let sum: u32 = dma.with_range(0, 16, |bytes| bytes.iter().map(|&b| b as u32).sum());
        assert_eq!(sum, 28);

        dma.clear();
        let sum: u32 = dma.with_range(0, 16, |bytes| bytes.iter().map(|&b| b as u32).sum());
        assert_eq!(sum, 0);
    }
}
