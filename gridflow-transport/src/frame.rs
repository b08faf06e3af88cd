//! The wire frame the buffer transfer manager sends over a
//! [`Transport`](crate::Transport): a fixed-size header followed by a
//! variable-length payload.
//!
//! Pairs a fixed serialized header with a raw trailing payload so the
//! receiver can read the header first and then know exactly how many
//! more bytes to expect.

use gridflow_region::GridBox;
use serde::{Deserialize, Serialize};

/// The serialized size of [`FrameHeader`], in bytes. The subrange is
/// always encoded at three dimensions (offset and range, 8 bytes per
/// `i64` component) regardless of the buffer's actual dimensionality,
/// padding unused trailing dimensions with zero — this keeps the header
/// a fixed size so a receiver can always read exactly this many bytes
/// before it knows anything else about the message.
pub const HEADER_BYTES: usize = 72;

#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct FrameHeader {
    pub buffer_id: u64,
    /// `0` means "not part of a reduction" (mirrors `ReductionId::NONE`).
    pub reduction_id: u64,
    pub offset: [i64; 3],
    pub range: [i64; 3],
    pub transfer_id: u64,
}

/// A single push's wire payload: a header plus the raw bytes of the
/// elements inside `subrange`.
#[derive(Clone, Debug)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(header: FrameHeader, payload: Vec<u8>) -> Self {
        Frame { header, payload }
    }

    /// Embeds a `GridBox<D>` into the header's fixed three-dimensional
    /// slots, zero-padding any dimensions beyond `D`.
    pub fn embed_subrange<const D: usize>(subrange: &GridBox<D>) -> ([i64; 3], [i64; 3]) {
        assert!(D <= 3, "gridflow supports at most 3 dimensions");
        let mut offset = [0i64; 3];
        let mut range = [0i64; 3];
        for d in 0..D {
            offset[d] = subrange.offset[d];
            range[d] = subrange.range[d];
        }
        (offset, range)
    }

    /// The inverse of [`Frame::embed_subrange`]: recovers a `GridBox<D>`
    /// from the header's padded three-dimensional slots.
    pub fn extract_subrange<const D: usize>(offset: [i64; 3], range: [i64; 3]) -> GridBox<D> {
        assert!(D <= 3, "gridflow supports at most 3 dimensions");
        let mut o = [0i64; D];
        let mut r = [0i64; D];
        for d in 0..D {
            o[d] = offset[d];
            r[d] = range[d];
        }
        GridBox::new(o, r)
    }

    /// Serializes this frame as `header_bytes || payload`. The header is
    /// fixed-size (see [`HEADER_BYTES`]), so a receiver only needs the
    /// total message length to know where the payload starts.
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let mut bytes = bincode::serialize(&self.header)?;
        debug_assert_eq!(bytes.len(), HEADER_BYTES);
        bytes.extend_from_slice(&self.payload);
        Ok(bytes)
    }

    /// The inverse of [`Frame::encode`].
    pub fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        anyhow::ensure!(
            bytes.len() >= HEADER_BYTES,
            "frame shorter than its own header: {} bytes",
            bytes.len()
        );
        let header: FrameHeader = bincode::deserialize(&bytes[..HEADER_BYTES])?;
        let payload = bytes[HEADER_BYTES..].to_vec();
        Ok(Frame { header, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_exactly_72_bytes() {
        let header = FrameHeader {
            buffer_id: 1,
            reduction_id: 0,
            offset: [0, 0, 0],
            range: [4, 4, 4],
            transfer_id: 2,
        };
        assert_eq!(bincode::serialize(&header).unwrap().len(), HEADER_BYTES);
    }

    #[test]
    fn encode_decode_round_trips() {
        let header = FrameHeader {
            buffer_id: 7,
            reduction_id: 0,
            offset: [1, 2, 0],
            range: [3, 4, 0],
            transfer_id: 9,
        };
        let frame = Frame::new(header, vec![0xAB; 96]);
        let bytes = frame.encode().unwrap();
        assert_eq!(bytes.len(), HEADER_BYTES + 96);
        let back = Frame::decode(&bytes).unwrap();
        assert_eq!(back.header, frame.header);
        assert_eq!(back.payload, frame.payload);
    }

    #[test]
    fn subrange_embedding_round_trips_for_2d() {
        let subrange = GridBox::<2>::new([3, 5], [10, 20]);
        let (offset, range) = Frame::embed_subrange(&subrange);
        assert_eq!(offset, [3, 5, 0]);
        assert_eq!(range, [10, 20, 0]);
        let back: GridBox<2> = Frame::extract_subrange(offset, range);
        assert_eq!(back, subrange);
    }

    #[test]
    fn decode_rejects_truncated_bytes() {
        assert!(Frame::decode(&[0u8; 10]).is_err());
    }
}
