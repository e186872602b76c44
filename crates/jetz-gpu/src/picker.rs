//! Object id encoding for the picker pass.
//!
//! Ids are written as RGBA8 colors, red holding the least significant byte.
//! The picker image is cleared to white, so `0xFFFF_FFFF` means "no object".

/// Id read back where nothing was drawn.
pub const NO_OBJECT: u32 = 0xFFFF_FFFF;

/// Clear color of the picker attachment.
pub const PICKER_CLEAR_COLOR: [f32; 4] = [1.0, 1.0, 1.0, 1.0];

/// Color a shader must output to tag a fragment with `id`.
pub fn picker_color(id: u32) -> [f32; 4] {
    id.to_le_bytes().map(|byte| f32::from(byte) / 255.0)
}

/// Decode a pixel read from a `B8G8R8A8` picker image.
pub fn decode_bgra(pixel: [u8; 4]) -> Option<u32> {
    let [b, g, r, a] = pixel;
    match u32::from_le_bytes([r, g, b, a]) {
        NO_OBJECT => None,
        id => Some(id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Quantize a shader output color the way a UNORM attachment stores it, as BGRA.
    fn store_bgra(color: [f32; 4]) -> [u8; 4] {
        let [r, g, b, a] = color.map(|c| (c * 255.0).round() as u8);
        [b, g, r, a]
    }

    #[test]
    fn clear_color_decodes_to_nothing() {
        assert_eq!(decode_bgra(store_bgra(PICKER_CLEAR_COLOR)), None);
        assert_eq!(decode_bgra([0xFF; 4]), None);
    }

    #[test]
    fn ids_survive_the_attachment() {
        for id in [0, 1, 255, 256, 0x00AB_CDEF, 0x1234_5678, NO_OBJECT - 1] {
            assert_eq!(decode_bgra(store_bgra(picker_color(id))), Some(id));
        }
    }

    #[test]
    fn red_holds_the_low_byte() {
        let [r, g, b, a] = picker_color(0x0000_00FF);
        assert_relative_eq!(r, 1.0);
        assert_relative_eq!(g, 0.0);
        assert_relative_eq!(b, 0.0);
        assert_relative_eq!(a, 0.0);

        assert_eq!(decode_bgra([0x00, 0x00, 0x2A, 0x00]), Some(42));
    }
}
