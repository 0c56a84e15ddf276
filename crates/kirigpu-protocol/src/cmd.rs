//! Command-buffer wire format.
//!
//! A DMA transfer payload is a sequence of little-endian 32-bit words. Word
//! 0 is the bit-packed [`VertexStreamHeader`]; words `1..=count * stride`
//! are vertex attribute data, typically IEEE-754 floats, whose layout is
//! implied by the header's flags and stride. The device trusts the header
//! fields without independent validation, so producers should build streams
//! through [`VertexStreamWriter`] rather than packing words by hand.

/// Header field bit positions, low to high.
const STRIDE_SHIFT: u32 = 0;
const HAS_POSITION_W_SHIFT: u32 = 5;
const HAS_COLOR3_SHIFT: u32 = 6;
const HAS_COLOR4_SHIFT: u32 = 7;
const PRIMITIVE_SHIFT: u32 = 12;
const VERTEX_COUNT_SHIFT: u32 = 14;
const OPCODE_SHIFT: u32 = 24;

const STRIDE_MAX: u8 = (1 << 5) - 1;
const PRIMITIVE_MAX: u8 = (1 << 2) - 1;
const VERTEX_COUNT_MAX: u16 = (1 << 10) - 1;

/// Header opcodes.
pub mod opcode {
    /// Draw a vertex stream described by the header flags and stride.
    pub const DRAW_VERTEX_STREAM: u8 = 0x14;
}

/// Primitive selectors, shared by the header's `primitive` field and the
/// `RASTER_PRIM` register.
pub mod prim {
    pub const NONE: u8 = 0;
    pub const TRIANGLE_LIST: u8 = 1;
}

/// A header field does not fit its bit width.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeaderFieldOverflow {
    pub field: &'static str,
    pub value: u32,
    pub max: u32,
}

impl core::fmt::Display for HeaderFieldOverflow {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "header field `{}` = {} exceeds maximum {}",
            self.field, self.value, self.max
        )
    }
}

impl std::error::Error for HeaderFieldOverflow {}

/// Word 0 of every command buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VertexStreamHeader {
    /// Words per vertex (5 bits).
    pub stride: u8,
    /// Vertex positions carry a 4th (`w`) component.
    pub has_position_w: bool,
    /// Vertices carry a 3-component color.
    pub has_color3: bool,
    /// Vertices carry a 4-component color.
    pub has_color4: bool,
    /// Primitive selector (2 bits), see [`prim`].
    pub primitive: u8,
    /// Number of vertices in the stream (10 bits).
    pub vertex_count: u16,
    pub opcode: u8,
}

impl VertexStreamHeader {
    /// Pack into the on-wire word. Fails if a field exceeds its bit width;
    /// the reserved bits (8..12) always pack as zero.
    pub fn pack(&self) -> Result<u32, HeaderFieldOverflow> {
        if self.stride > STRIDE_MAX {
            return Err(HeaderFieldOverflow {
                field: "stride",
                value: self.stride.into(),
                max: STRIDE_MAX.into(),
            });
        }
        if self.primitive > PRIMITIVE_MAX {
            return Err(HeaderFieldOverflow {
                field: "primitive",
                value: self.primitive.into(),
                max: PRIMITIVE_MAX.into(),
            });
        }
        if self.vertex_count > VERTEX_COUNT_MAX {
            return Err(HeaderFieldOverflow {
                field: "vertex_count",
                value: self.vertex_count.into(),
                max: VERTEX_COUNT_MAX.into(),
            });
        }

        Ok((u32::from(self.stride) << STRIDE_SHIFT)
            | (u32::from(self.has_position_w) << HAS_POSITION_W_SHIFT)
            | (u32::from(self.has_color3) << HAS_COLOR3_SHIFT)
            | (u32::from(self.has_color4) << HAS_COLOR4_SHIFT)
            | (u32::from(self.primitive) << PRIMITIVE_SHIFT)
            | (u32::from(self.vertex_count) << VERTEX_COUNT_SHIFT)
            | (u32::from(self.opcode) << OPCODE_SHIFT))
    }

    /// Unpack from the on-wire word. Infallible: every field is extracted
    /// by mask, and the device consumes headers the same way.
    pub fn unpack(word: u32) -> Self {
        Self {
            stride: ((word >> STRIDE_SHIFT) & u32::from(STRIDE_MAX)) as u8,
            has_position_w: (word >> HAS_POSITION_W_SHIFT) & 1 != 0,
            has_color3: (word >> HAS_COLOR3_SHIFT) & 1 != 0,
            has_color4: (word >> HAS_COLOR4_SHIFT) & 1 != 0,
            primitive: ((word >> PRIMITIVE_SHIFT) & u32::from(PRIMITIVE_MAX)) as u8,
            vertex_count: ((word >> VERTEX_COUNT_SHIFT) & u32::from(VERTEX_COUNT_MAX)) as u16,
            opcode: (word >> OPCODE_SHIFT) as u8,
        }
    }

    /// Payload words following the header (`vertex_count * stride`).
    pub fn payload_words(&self) -> u32 {
        u32::from(self.vertex_count) * u32::from(self.stride)
    }
}

/// Safe command-stream builder.
///
/// Emits the packed header followed by one `stride`-word attribute group
/// per vertex, and checks the vertex count against the header when
/// finishing. Intended for tests, fixtures, and producer-side tooling.
#[derive(Debug, Clone)]
pub struct VertexStreamWriter {
    header: VertexStreamHeader,
    words: Vec<u32>,
    vertices: u16,
}

impl VertexStreamWriter {
    pub fn new(header: VertexStreamHeader) -> Result<Self, HeaderFieldOverflow> {
        let packed = header.pack()?;
        Ok(Self {
            header,
            words: vec![packed],
            vertices: 0,
        })
    }

    /// Append one vertex worth of attribute words.
    ///
    /// # Panics
    ///
    /// Panics if `attributes.len()` does not match the header stride; a
    /// mismatched group would silently shear every following vertex.
    pub fn push_vertex(&mut self, attributes: &[f32]) {
        assert_eq!(
            attributes.len(),
            usize::from(self.header.stride),
            "vertex attribute group must match header stride"
        );
        self.words.extend(attributes.iter().map(|a| a.to_bits()));
        self.vertices += 1;
    }

    pub fn word_len(&self) -> usize {
        self.words.len()
    }

    /// Byte length of the stream so far; the value handed to the driver's
    /// `start_transfer`.
    pub fn byte_len(&self) -> u32 {
        (self.words.len() * 4) as u32
    }

    pub fn as_words(&self) -> &[u32] {
        &self.words
    }

    /// Serialize the stream as little-endian bytes.
    ///
    /// # Panics
    ///
    /// Panics if the number of pushed vertices differs from the header's
    /// `vertex_count`; the device would read past the payload otherwise.
    pub fn finish(self) -> Vec<u8> {
        assert_eq!(
            self.vertices, self.header.vertex_count,
            "vertex count must match header"
        );
        let mut bytes = Vec::with_capacity(self.words.len() * 4);
        for word in &self.words {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn triangle_header() -> VertexStreamHeader {
        VertexStreamHeader {
            stride: 5,
            has_position_w: false,
            has_color3: true,
            has_color4: false,
            primitive: prim::TRIANGLE_LIST,
            vertex_count: 3,
            opcode: opcode::DRAW_VERTEX_STREAM,
        }
    }

    #[test]
    fn triangle_header_round_trips() {
        let hdr = triangle_header();
        let packed = hdr.pack().unwrap();
        assert_eq!(VertexStreamHeader::unpack(packed), hdr);
    }

    #[test]
    fn packed_fields_land_at_documented_bits() {
        let packed = triangle_header().pack().unwrap();
        assert_eq!(packed & 0x1F, 5, "stride in bits 0..5");
        assert_eq!((packed >> 5) & 1, 0, "has_position_w at bit 5");
        assert_eq!((packed >> 6) & 1, 1, "has_color3 at bit 6");
        assert_eq!((packed >> 7) & 1, 0, "has_color4 at bit 7");
        assert_eq!((packed >> 8) & 0xF, 0, "reserved bits pack as zero");
        assert_eq!((packed >> 12) & 0x3, 1, "primitive at bits 12..14");
        assert_eq!((packed >> 14) & 0x3FF, 3, "vertex_count at bits 14..24");
        assert_eq!(packed >> 24, 0x14, "opcode at bits 24..32");
    }

    #[test]
    fn pack_rejects_oversized_fields() {
        let mut hdr = triangle_header();
        hdr.stride = 32;
        assert!(hdr.pack().is_err());

        let mut hdr = triangle_header();
        hdr.primitive = 4;
        assert!(hdr.pack().is_err());

        let mut hdr = triangle_header();
        hdr.vertex_count = 1024;
        assert!(hdr.pack().is_err());
    }

    #[test]
    fn writer_emits_header_then_vertices() {
        let mut w = VertexStreamWriter::new(triangle_header()).unwrap();
        w.push_vertex(&[1.0, 0.0, 0.0, -0.5, -0.5]);
        w.push_vertex(&[0.0, 1.0, 0.0, 0.5, 0.0]);
        w.push_vertex(&[0.0, 0.0, 1.0, 0.125, 0.5]);

        assert_eq!(w.word_len(), 16);
        assert_eq!(w.byte_len(), 64);
        assert_eq!(w.as_words()[0], triangle_header().pack().unwrap());
        assert_eq!(w.as_words()[1], 1.0f32.to_bits());

        let bytes = w.finish();
        assert_eq!(bytes.len(), 64);
        assert_eq!(
            u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            triangle_header().pack().unwrap()
        );
    }

    #[test]
    #[should_panic(expected = "vertex count must match header")]
    fn writer_rejects_short_streams() {
        let w = VertexStreamWriter::new(triangle_header()).unwrap();
        let _ = w.finish();
    }

    proptest! {
        #[test]
        fn any_valid_header_round_trips(
            stride in 0u8..32,
            has_position_w: bool,
            has_color3: bool,
            has_color4: bool,
            primitive in 0u8..4,
            vertex_count in 0u16..1024,
            opcode: u8,
        ) {
            let hdr = VertexStreamHeader {
                stride,
                has_position_w,
                has_color3,
                has_color4,
                primitive,
                vertex_count,
                opcode,
            };
            let packed = hdr.pack().unwrap();
            prop_assert_eq!(VertexStreamHeader::unpack(packed), hdr);
        }
    }
}
