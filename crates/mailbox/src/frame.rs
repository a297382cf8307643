use crate::errors::MailboxError;

/// Dimensions and element width of one payload. Payloads are rectangular
/// arrays of 1 to 3 dimensions with 1, 4, or 8 byte wide elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameShape {
    pub width: u64,
    pub height: u64,
    pub depth: u64,
    pub elem_width: u64,
}

impl FrameShape {
    /// Build a shape from an explicit dimension list.
    pub fn new(dims: &[u64], elem_width: u64) -> Result<Self, MailboxError> {
        if dims.is_empty() || dims.len() > 3 {
            return Err(MailboxError::UnsupportedShape(
                "payloads must have between 1 and 3 dimensions",
            ));
        }
        if dims.contains(&0) {
            return Err(MailboxError::UnsupportedShape(
                "payload dimensions must be non-zero",
            ));
        }
        if !matches!(elem_width, 1 | 4 | 8) {
            return Err(MailboxError::UnsupportedShape(
                "element width must be 1, 4, or 8 bytes",
            ));
        }
        Ok(Self {
            width: dims[0],
            height: *dims.get(1).unwrap_or(&1),
            depth: *dims.get(2).unwrap_or(&1),
            elem_width,
        })
    }

    /// Shape of a flat byte buffer.
    pub fn bytes(len: usize) -> Result<Self, MailboxError> {
        Self::new(&[len as u64], 1)
    }

    pub fn byte_len(&self) -> usize {
        (self.width * self.height * self.depth * self.elem_width) as usize
    }
}

/// Reader-local scratch for polling one mailbox.
///
/// Reused across reads to avoid reallocation: the buffer only grows, and the
/// view returned by [`Frame::bytes`] stays valid until the next read through
/// the same frame. Holds the last observed generation so the mailbox can
/// report whether a poll returned anything new.
#[derive(Debug)]
pub struct Frame {
    pub(crate) buf: Vec<u8>,
    pub(crate) shape: Option<FrameShape>,
    pub(crate) acquired_at_ms: u64,
    pub(crate) last_uid: u64,
}

impl Frame {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            shape: None,
            acquired_at_ms: 0,
            last_uid: 0,
        }
    }

    /// The most recent successfully read payload; empty before the first
    /// successful read.
    pub fn bytes(&self) -> &[u8] {
        match self.shape {
            Some(shape) => &self.buf[..shape.byte_len()],
            None => &[],
        }
    }

    pub fn shape(&self) -> Option<FrameShape> {
        self.shape
    }

    pub fn acquired_at_ms(&self) -> u64 {
        self.acquired_at_ms
    }

    /// Generation of the last payload this frame observed.
    pub fn uid(&self) -> u64 {
        self.last_uid
    }

    /// Copy the current payload out, for callers that need the data to
    /// outlive the next read.
    pub fn to_owned_bytes(&self) -> Vec<u8> {
        self.bytes().to_vec()
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_fills_trailing_dims() {
        let shape = FrameShape::new(&[8, 8], 1).unwrap();
        assert_eq!(shape.depth, 1);
        assert_eq!(shape.byte_len(), 64);
    }

    #[test]
    fn shape_rejects_bad_dimensionality() {
        assert!(FrameShape::new(&[], 1).is_err());
        assert!(FrameShape::new(&[1, 2, 3, 4], 1).is_err());
        assert!(FrameShape::new(&[4, 0], 1).is_err());
    }

    #[test]
    fn shape_rejects_bad_element_width() {
        for bad in [0, 2, 3, 5, 16] {
            assert!(FrameShape::new(&[4], bad).is_err(), "width {bad} accepted");
        }
        for good in [1, 4, 8] {
            assert!(FrameShape::new(&[4], good).is_ok());
        }
    }

    #[test]
    fn empty_frame_has_no_payload() {
        let frame = Frame::new();
        assert!(frame.bytes().is_empty());
        assert!(frame.shape().is_none());
        assert_eq!(frame.uid(), 0);
    }
}
