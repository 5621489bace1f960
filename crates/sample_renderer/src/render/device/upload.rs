use crate::render::{RenderError, RenderResult};

const BYTES_PER_PIXEL: usize = 4;

/// Copy tightly packed RGBA8 rows into memory whose rows are `row_pitch`
/// bytes apart.
///
/// Drivers may pad linear image rows beyond `width * 4`; when they don't the
/// whole image is copied at once.
pub fn copy_rows(pixels: &[u8], width: u32, height: u32, row_pitch: usize, dst: &mut [u8]) -> RenderResult<()> {
    let row_bytes = width as usize * BYTES_PER_PIXEL;
    let rows = height as usize;

    if pixels.len() != row_bytes * rows {
        return Err(RenderError::InvalidOperation {
            reason: format!(
                "texture data is {} bytes, expected {}x{} RGBA8 ({} bytes)",
                pixels.len(),
                width,
                height,
                row_bytes * rows
            ),
        });
    }
    if row_pitch < row_bytes || dst.len() < row_pitch * rows.saturating_sub(1) + row_bytes {
        return Err(RenderError::InvalidOperation {
            reason: format!("destination of {} bytes with pitch {} cannot hold the image", dst.len(), row_pitch),
        });
    }

    if row_pitch == row_bytes {
        dst[..pixels.len()].copy_from_slice(pixels);
    } else {
        for (row, src) in pixels.chunks_exact(row_bytes).enumerate() {
            let start = row * row_pitch;
            dst[start..start + row_bytes].copy_from_slice(src);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tight_pitch_copies_whole_image() {
        let pixels: Vec<u8> = (0..16).collect();
        let mut dst = vec![0u8; 16];
        copy_rows(&pixels, 2, 2, 8, &mut dst).unwrap();
        assert_eq!(dst, pixels);
    }

    #[test]
    fn test_padded_pitch_leaves_padding_untouched() {
        let pixels: Vec<u8> = (1..=16).collect();
        let mut dst = vec![0xAAu8; 32];
        copy_rows(&pixels, 2, 2, 16, &mut dst).unwrap();

        assert_eq!(&dst[0..8], &pixels[0..8]);
        assert!(dst[8..16].iter().all(|&b| b == 0xAA));
        assert_eq!(&dst[16..24], &pixels[8..16]);
    }

    #[test]
    fn test_last_row_needs_no_padding() {
        let pixels = vec![7u8; 24];
        let mut exact = vec![0u8; 16 + 12];
        copy_rows(&pixels, 3, 2, 16, &mut exact).unwrap();
        assert!(exact[16..].iter().all(|&b| b == 7));

        let mut dst = vec![0xAAu8; 32];
        copy_rows(&pixels, 3, 2, 16, &mut dst).unwrap();
        assert!(dst[0..12].iter().all(|&b| b == 7));
        assert!(dst[12..16].iter().all(|&b| b == 0xAA));
        assert!(dst[16..28].iter().all(|&b| b == 7));
        assert!(dst[28..].iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn test_wrong_pixel_count_is_rejected() {
        let mut dst = vec![0u8; 64];
        assert!(copy_rows(&[0u8; 15], 2, 2, 8, &mut dst).is_err());
    }

    #[test]
    fn test_pitch_smaller_than_row_is_rejected() {
        let mut dst = vec![0u8; 64];
        assert!(copy_rows(&[0u8; 16], 2, 2, 4, &mut dst).is_err());
    }
}
