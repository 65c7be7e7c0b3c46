//! Frame envelope for logs persisted in file-backed pools.
//!
//! Each log is stored as a single self-describing frame:
//!
//! ```text
//! magic (4) | version (2) | length (4) | payload (length) | crc32 (4)
//! ```
//!
//! The CRC covers everything before it. A scan over a pool file stops
//! cleanly at a truncated or CRC-damaged tail, which is how a pool
//! recovers from a crash mid-append: the torn frame is simply not part
//! of the pool.

use crate::error::{CoreError, CoreResult};
use crate::log::Log;
use synclog_storage::StorageBackend;

/// Magic bytes identifying a synclog pool frame.
pub(crate) const FRAME_MAGIC: [u8; 4] = *b"SLP1";

/// Frame format version.
pub(crate) const FRAME_VERSION: u16 = 1;

/// magic (4) + version (2) + length (4).
const HEADER_SIZE: usize = 10;

/// CRC32 trailer size.
const CRC_SIZE: usize = 4;

const fn build_crc32_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut j = 0;
        while j < 8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xEDB8_8320;
            } else {
                crc >>= 1;
            }
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

const CRC32_TABLE: [u32; 256] = build_crc32_table();

/// Computes the CRC32 (IEEE) of the given bytes.
pub(crate) fn compute_crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

/// Encodes a log into a complete frame.
pub(crate) fn encode_frame(log: &Log) -> CoreResult<Vec<u8>> {
    let payload = serde_json::to_vec(log)?;

    let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
    data.extend_from_slice(&FRAME_MAGIC);
    data.extend_from_slice(&FRAME_VERSION.to_le_bytes());

    let len = u32::try_from(payload.len())
        .map_err(|_| CoreError::logic("log frame payload too large"))?;
    data.extend_from_slice(&len.to_le_bytes());
    data.extend_from_slice(&payload);

    let crc = compute_crc32(&data);
    data.extend_from_slice(&crc.to_le_bytes());

    Ok(data)
}

/// A streaming scan over the frames in a pool file.
///
/// Stops at the first truncated or CRC-damaged frame; `valid_end()`
/// then reports the offset of the last fully intact frame so the
/// caller can drop the torn tail.
pub(crate) struct FrameScan<'a> {
    backend: &'a dyn StorageBackend,
    offset: u64,
    size: u64,
}

impl<'a> FrameScan<'a> {
    /// Starts a scan at the beginning of the backend.
    pub(crate) fn new(backend: &'a dyn StorageBackend) -> CoreResult<Self> {
        let size = backend.size()?;
        Ok(Self {
            backend,
            offset: 0,
            size,
        })
    }

    /// Offset just past the last intact frame seen so far.
    pub(crate) fn valid_end(&self) -> u64 {
        self.offset
    }

    /// Reads the next intact frame, or `None` at the end of the valid
    /// prefix.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::FrameCorruption`] when a fully present
    /// frame has bad magic or an unsupported version; damage that can
    /// be explained by a torn append terminates the scan instead.
    pub(crate) fn next_frame(&mut self) -> CoreResult<Option<Log>> {
        let remaining = self.size - self.offset;
        if remaining < (HEADER_SIZE + CRC_SIZE) as u64 {
            // Clean EOF or a header torn mid-write.
            return Ok(None);
        }

        let header = self.backend.read_at(self.offset, HEADER_SIZE)?;

        let magic: [u8; 4] = header[0..4].try_into().unwrap_or_default();
        if magic != FRAME_MAGIC {
            return Err(CoreError::frame_corruption(format!(
                "bad frame magic at offset {}",
                self.offset
            )));
        }

        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != FRAME_VERSION {
            return Err(CoreError::frame_corruption(format!(
                "unsupported frame version {version} at offset {}",
                self.offset
            )));
        }

        let len = u32::from_le_bytes([header[6], header[7], header[8], header[9]]) as u64;
        let total = HEADER_SIZE as u64 + len + CRC_SIZE as u64;
        if total > remaining {
            // Frame declared longer than the file; torn tail.
            return Ok(None);
        }

        let frame = self.backend.read_at(self.offset, total as usize)?;
        let (body, crc_bytes) = frame.split_at(frame.len() - CRC_SIZE);

        let stored_crc =
            u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        if compute_crc32(body) != stored_crc {
            // Bytes damaged mid-write; treat as the end of the pool.
            return Ok(None);
        }

        let log: Log = serde_json::from_slice(&body[HEADER_SIZE..])?;
        self.offset += total;
        Ok(Some(log))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::Log;
    use synclog_storage::InMemoryBackend;

    fn scan_all(backend: &InMemoryBackend) -> (Vec<Log>, u64) {
        let mut scan = FrameScan::new(backend).unwrap();
        let mut logs = Vec::new();
        while let Some(log) = scan.next_frame().unwrap() {
            logs.push(log);
        }
        (logs, scan.valid_end())
    }

    #[test]
    fn crc32_known_value() {
        // IEEE CRC32 of "123456789".
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn encode_then_scan() {
        let mut backend = InMemoryBackend::new();
        let a = Log::add("r1", b"one", "v1".to_string());
        let b = Log::del("r1", "v1");

        backend.append(&encode_frame(&a).unwrap()).unwrap();
        backend.append(&encode_frame(&b).unwrap()).unwrap();

        let (logs, end) = scan_all(&backend);
        assert_eq!(logs, vec![a, b]);
        assert_eq!(end, backend.size().unwrap());
    }

    #[test]
    fn torn_tail_is_dropped() {
        let mut backend = InMemoryBackend::new();
        let a = Log::add("r1", b"one", "v1".to_string());
        backend.append(&encode_frame(&a).unwrap()).unwrap();
        let good_end = backend.size().unwrap();

        // Half a frame, as a crash mid-append would leave.
        let frame = encode_frame(&Log::add("r2", b"two", "v2".to_string())).unwrap();
        backend.append(&frame[..frame.len() / 2]).unwrap();

        let (logs, end) = scan_all(&backend);
        assert_eq!(logs.len(), 1);
        assert_eq!(end, good_end);
    }

    #[test]
    fn damaged_crc_ends_scan() {
        let mut backend = InMemoryBackend::new();
        let a = Log::add("r1", b"one", "v1".to_string());
        let mut frame = encode_frame(&a).unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        backend.append(&frame).unwrap();

        let (logs, end) = scan_all(&backend);
        assert!(logs.is_empty());
        assert_eq!(end, 0);
    }

    #[test]
    fn bad_magic_is_corruption() {
        let mut backend = InMemoryBackend::new();
        backend.append(&[0u8; 32]).unwrap();

        let mut scan = FrameScan::new(&backend).unwrap();
        assert!(matches!(
            scan.next_frame(),
            Err(CoreError::FrameCorruption { .. })
        ));
    }
}
