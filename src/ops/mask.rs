// ============================================================================
// MASK COMPOSITOR - display-resolution ink -> native-resolution binary mask
// ============================================================================
//
// The service expects a mask the size of the original image where white
// marks editable pixels and black marks preserved ones. Translucent ink,
// however faint, counts as "edit here": any non-zero alpha becomes white.

use image::{Rgb, RgbImage, RgbaImage};
use rayon::prelude::*;
use std::ops::Range;

use crate::canvas::nearest_source;
use crate::components::history::MaskSnapshot;
use crate::ops::edit::ValidationError;

const WHITE: [u8; 3] = [255, 255, 255];

/// True when no pixel of the snapshot carries any ink.
pub fn is_mask_empty(snapshot: &MaskSnapshot) -> bool {
    snapshot
        .pixels()
        .as_raw()
        .par_chunks_exact(4)
        .all(|px| px[3] == 0)
}

/// Build the submission mask for an image of `native_width`×`native_height`.
///
/// Fails with [`ValidationError::EmptyMask`] when the snapshot holds no ink.
pub fn build_submission_mask(
    snapshot: &MaskSnapshot,
    native_width: u32,
    native_height: u32,
) -> Result<RgbImage, ValidationError> {
    if is_mask_empty(snapshot) {
        return Err(ValidationError::EmptyMask);
    }
    let mask = coverage_mask(snapshot.pixels(), native_width, native_height);
    crate::log_info!(
        "Mask built: {}x{} from {}x{} snapshot, {} editable pixels",
        native_width,
        native_height,
        snapshot.width(),
        snapshot.height(),
        white_pixel_count(&mask)
    );
    Ok(mask)
}

/// Binary mask of `ink` at `width`×`height`: opaque white where the ink has
/// non-zero alpha, opaque black elsewhere.
///
/// On an axis that grows (or keeps its size) each output pixel samples its
/// nearest ink pixel, matching [`crate::canvas::reproject`]. On an axis that
/// shrinks each output pixel covers its whole footprint and turns white if
/// any ink pixel inside it is inked, so no stroke can vanish on the way down.
pub fn coverage_mask(ink: &RgbaImage, width: u32, height: u32) -> RgbImage {
    let mut out = RgbImage::from_pixel(width, height, Rgb([0, 0, 0]));
    let (sw, sh) = ink.dimensions();
    if width == 0 || height == 0 || sw == 0 || sh == 0 {
        return out;
    }

    let x_spans: Vec<Range<usize>> = (0..width).map(|x| source_span(x, width, sw)).collect();
    let src = ink.as_raw();
    let src_stride = sw as usize * 4;
    let inked = |sx: usize, sy: usize| src[sy * src_stride + sx * 4 + 3] != 0;

    let dst: &mut [u8] = &mut out;
    dst.par_chunks_mut(width as usize * 3)
        .enumerate()
        .for_each(|(y, row_out)| {
            let y_span = source_span(y as u32, height, sh);
            for (x, x_span) in x_spans.iter().enumerate() {
                let hit = y_span
                    .clone()
                    .any(|sy| x_span.clone().any(|sx| inked(sx, sy)));
                if hit {
                    row_out[x * 3..x * 3 + 3].copy_from_slice(&WHITE);
                }
            }
        });
    out
}

/// Source indices feeding output index `dst` along one axis.
fn source_span(dst: u32, dst_len: u32, src_len: u32) -> Range<usize> {
    if dst_len >= src_len {
        let s = nearest_source(dst, dst_len, src_len) as usize;
        return s..s + 1;
    }
    let (d, dl, sl) = (dst as u64, dst_len as u64, src_len as u64);
    let lo = d * sl / dl;
    let hi = ((d + 1) * sl).div_ceil(dl).min(sl);
    lo as usize..hi as usize
}

pub fn white_pixel_count(mask: &RgbImage) -> usize {
    mask.as_raw()
        .par_chunks_exact(3)
        .filter(|px| px[0] == 255)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn snapshot_with(w: u32, h: u32, inked: &[(u32, u32, u8)]) -> MaskSnapshot {
        let mut img = RgbaImage::new(w, h);
        for &(x, y, a) in inked {
            img.put_pixel(x, y, Rgba([255, 0, 0, a]));
        }
        MaskSnapshot::new(img)
    }

    #[test]
    fn empty_snapshot_is_rejected() {
        let blank = MaskSnapshot::blank(40, 30);
        assert!(is_mask_empty(&blank));
        assert_eq!(
            build_submission_mask(&blank, 800, 600),
            Err(ValidationError::EmptyMask)
        );
    }

    #[test]
    fn colour_without_alpha_is_still_empty() {
        let img = RgbaImage::from_pixel(4, 4, Rgba([255, 255, 255, 0]));
        assert!(is_mask_empty(&MaskSnapshot::new(img)));
    }

    #[test]
    fn faint_ink_becomes_pure_white() {
        let mask = coverage_mask(snapshot_with(3, 1, &[(1, 0, 1)]).pixels(), 3, 1);
        assert_eq!(*mask.get_pixel(0, 0), Rgb([0, 0, 0]));
        assert_eq!(*mask.get_pixel(1, 0), Rgb([255, 255, 255]));
        assert_eq!(*mask.get_pixel(2, 0), Rgb([0, 0, 0]));
    }

    #[test]
    fn mask_matches_native_resolution() {
        let snap = snapshot_with(200, 150, &[(100, 75, 128)]);
        let mask = build_submission_mask(&snap, 800, 600).unwrap();
        assert_eq!(mask.dimensions(), (800, 600));
        // One display pixel covers a 4x4 native block.
        assert_eq!(white_pixel_count(&mask), 16);
        assert_eq!(*mask.get_pixel(401, 301), Rgb([255, 255, 255]));
        assert_eq!(*mask.get_pixel(0, 0), Rgb([0, 0, 0]));
    }

    #[test]
    fn mask_is_strictly_binary() {
        let snap = snapshot_with(10, 10, &[(1, 1, 3), (5, 5, 200), (9, 9, 255)]);
        let mask = build_submission_mask(&snap, 37, 23).unwrap();
        assert!(mask.pixels().all(|p| p.0 == [0, 0, 0] || p.0 == [255, 255, 255]));
    }

    #[test]
    fn single_pixel_survives_downscale() {
        // Every display pixel must land in some native footprint.
        for (x, y) in [(0, 0), (3, 5), (7, 7), (799, 599), (401, 333)] {
            let snap = snapshot_with(800, 600, &[(x, y, 255)]);
            let mask = build_submission_mask(&snap, 100, 75).unwrap();
            assert!(white_pixel_count(&mask) >= 1, "ink at ({x}, {y}) lost");
            assert_eq!(mask.get_pixel(x / 8, y / 8).0, WHITE);
        }
    }

    #[test]
    fn downscale_footprints_tile_the_source() {
        for (dst, src) in [(100u32, 800u32), (333, 799), (7, 10)] {
            let spans: Vec<_> = (0..dst).map(|i| source_span(i, dst, src)).collect();
            assert_eq!(spans[0].start, 0);
            assert_eq!(spans[dst as usize - 1].end, src as usize);
            for pair in spans.windows(2) {
                // Adjacent footprints touch or overlap, never leave a gap.
                assert!(pair[1].start <= pair[0].end);
            }
        }
    }

    #[test]
    fn mixed_axes_grow_and_shrink_independently() {
        // Width shrinks 40 -> 10, height grows 5 -> 20.
        let snap = snapshot_with(40, 5, &[(37, 2, 255)]);
        let mask = build_submission_mask(&snap, 10, 20).unwrap();
        assert_eq!(white_pixel_count(&mask), 4);
        for y in 8..12 {
            assert_eq!(mask.get_pixel(9, y).0, WHITE);
        }
    }

    #[test]
    fn upscale_still_matches_nearest_reprojection() {
        let snap = snapshot_with(7, 5, &[(0, 0, 255), (3, 2, 128), (6, 4, 9)]);
        let mask = coverage_mask(snap.pixels(), 21, 15);
        let projected = crate::canvas::reproject(snap.pixels(), 21, 15);
        for (x, y, p) in mask.enumerate_pixels() {
            let expected = projected.get_pixel(x, y)[3] != 0;
            assert_eq!(p.0 == WHITE, expected, "({x}, {y})");
        }
    }
}
