//! Spatial tiling of tall tabular pages.
//!
//! Dense tables read far more reliably when each model call covers a
//! bounded number of rows with explicit header context, so tall pages are
//! cut into overlapping horizontal slices, each paired with the page's
//! header strip. The overlap prevents rows straddling a cut from being
//! lost; resending the header anchors column semantics on every call.

use std::path::Path;

use crate::core::config::TileGeometry;
use crate::error::Result;
use crate::image::{crop_strip, decode, encode_jpeg};
use crate::types::{PageImage, Tile};

/// JPEG quality for re-encoded header and slice strips.
const STRIP_JPEG_QUALITY: u8 = 95;

/// A page is worth tiling when it is taller than 1.5 slice heights.
pub fn should_tile(page_height: u32, geometry: &TileGeometry) -> bool {
    page_height as f64 > 1.5 * geometry.slice_height as f64
}

/// Compute slice origins and heights for a page.
///
/// Slices start below the header strip and step by
/// `slice_height - overlap`; slicing stops once the remaining strip would
/// be no taller than the overlap (it is already covered by the previous
/// slice).
pub fn slice_spans(page_height: u32, geometry: &TileGeometry) -> Vec<(u32, u32)> {
    let mut spans = Vec::new();
    let mut y = geometry.header_height.min(page_height);
    while page_height - y > geometry.overlap {
        let height = geometry.slice_height.min(page_height - y);
        spans.push((y, height));
        if y + height >= page_height {
            break;
        }
        y += geometry.step();
    }
    spans
}

/// Build the tile sequence for all pages.
///
/// When `tiling_enabled` is false, or a page is not tall enough, the page
/// becomes a single untiled tile whose payload is the page itself. Tiles
/// are ordered by `(page_index, slice_index)` and carry a monotonic
/// `global_index`.
pub fn build_tiles(
    pages: &[PageImage],
    geometry: &TileGeometry,
    tiling_enabled: bool,
    debug_dir: Option<&Path>,
) -> Result<Vec<Tile>> {
    let mut tiles = Vec::new();
    let mut global_index = 0usize;

    for (page_index, page) in pages.iter().enumerate() {
        if tiling_enabled && should_tile(page.height, geometry) {
            let sliced = tile_page(page, page_index, &mut global_index, geometry, debug_dir)?;
            tiles.extend(sliced);
        } else {
            tiles.push(Tile {
                page_index,
                slice_index: 0,
                global_index,
                images: vec![page.data.clone()],
                is_tiled: false,
                raw_slice: None,
                raw_header: None,
            });
            global_index += 1;
        }
    }

    Ok(tiles)
}

fn tile_page(
    page: &PageImage,
    page_index: usize,
    global_index: &mut usize,
    geometry: &TileGeometry,
    debug_dir: Option<&Path>,
) -> Result<Vec<Tile>> {
    let decoded = decode(&page.data)?;

    let header_strip = crop_strip(&decoded, 0, geometry.header_height)?;
    let header = encode_jpeg(&header_strip, STRIP_JPEG_QUALITY)?;
    if let Some(dir) = debug_dir {
        dump_strip(dir, page_index, "header", &header);
    }

    let mut tiles = Vec::new();
    for (slice_index, (y, height)) in slice_spans(page.height, geometry).into_iter().enumerate() {
        let strip = crop_strip(&decoded, y, height)?;
        let slice = encode_jpeg(&strip, STRIP_JPEG_QUALITY)?;
        if let Some(dir) = debug_dir {
            dump_strip(dir, page_index, &format!("slice{slice_index}"), &slice);
        }

        let (raw_slice, raw_header) = if debug_dir.is_some() {
            (Some(slice.clone()), Some(header.clone()))
        } else {
            (None, None)
        };

        tiles.push(Tile {
            page_index,
            slice_index,
            global_index: *global_index,
            images: vec![header.clone(), slice],
            is_tiled: true,
            raw_slice,
            raw_header,
        });
        *global_index += 1;
    }

    tracing::debug!(
        page = page_index,
        slices = tiles.len(),
        height = page.height,
        "page tiled"
    );
    Ok(tiles)
}

fn dump_strip(dir: &Path, page_index: usize, label: &str, data: &[u8]) {
    let path = dir.join(format!("page{page_index}_{label}.jpg"));
    if let Err(error) = std::fs::write(&path, data) {
        tracing::warn!(?path, %error, "failed to dump tile strip");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgb, RgbImage};

    fn geometry() -> TileGeometry {
        TileGeometry {
            header_height: 200,
            slice_height: 600,
            overlap: 100,
        }
    }

    fn page(width: u32, height: u32) -> PageImage {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        }));
        let data = crate::image::encode_jpeg(&img, 90).unwrap();
        PageImage { data, width, height }
    }

    #[test]
    fn test_should_tile_boundary() {
        let geometry = geometry();
        // Exactly 1.5 x slice height: not tiled.
        assert!(!should_tile(900, &geometry));
        // One pixel taller: tiled.
        assert!(should_tile(901, &geometry));
    }

    #[test]
    fn test_slice_spans_cover_page_with_overlap() {
        let geometry = geometry();
        let spans = slice_spans(3000, &geometry);

        // Starts under the header, steps by slice - overlap.
        assert_eq!(spans[0], (200, 600));
        assert_eq!(spans[1], (700, 600));

        // Full coverage from header to bottom.
        let last = spans.last().unwrap();
        assert!(last.0 + last.1 >= 3000 - geometry.overlap);

        // Consecutive slices overlap by the configured amount.
        for pair in spans.windows(2) {
            assert_eq!(pair[0].0 + geometry.step(), pair[1].0);
        }
    }

    #[test]
    fn test_slice_spans_tail_handling() {
        let geometry = geometry();
        // The page ends inside the first slice's coverage (200 + 600 = 800),
        // so the strip remaining past the next origin is within the overlap
        // and no tail slice is emitted.
        let spans = slice_spans(800, &geometry);
        assert_eq!(spans, vec![(200, 600)]);

        // 100 px of the page lie beyond the first slice's coverage: a
        // shorter final slice picks them up.
        let spans = slice_spans(900, &geometry);
        assert_eq!(spans, vec![(200, 600), (700, 200)]);
    }

    #[test]
    fn test_build_tiles_untiled_page() {
        let pages = vec![page(400, 500)];
        let tiles = build_tiles(&pages, &geometry(), true, None).unwrap();
        assert_eq!(tiles.len(), 1);
        assert!(!tiles[0].is_tiled);
        assert_eq!(tiles[0].images.len(), 1);
        assert_eq!(tiles[0].images[0], pages[0].data);
    }

    #[test]
    fn test_build_tiles_disabled_never_slices() {
        let pages = vec![page(400, 3000)];
        let tiles = build_tiles(&pages, &geometry(), false, None).unwrap();
        assert_eq!(tiles.len(), 1);
        assert!(!tiles[0].is_tiled);
    }

    #[test]
    fn test_build_tiles_tall_page_has_header_payloads() {
        let pages = vec![page(400, 3000)];
        let tiles = build_tiles(&pages, &geometry(), true, None).unwrap();

        assert!(tiles.len() > 1);
        for tile in &tiles {
            assert!(tile.is_tiled);
            // Header first, then the slice.
            assert_eq!(tile.images.len(), 2);
        }
        // All tiles of one page share the identical header payload.
        assert_eq!(tiles[0].images[0], tiles[1].images[0]);
    }

    #[test]
    fn test_build_tiles_global_index_monotonic_across_pages() {
        let pages = vec![page(400, 3000), page(400, 500), page(400, 3000)];
        let tiles = build_tiles(&pages, &geometry(), true, None).unwrap();

        let indices: Vec<_> = tiles.iter().map(|t| t.global_index).collect();
        let expected: Vec<_> = (0..tiles.len()).collect();
        assert_eq!(indices, expected);

        // Unique (page, slice) pairs, ordered ascending.
        let mut pairs: Vec<_> = tiles.iter().map(|t| (t.page_index, t.slice_index)).collect();
        let original = pairs.clone();
        pairs.sort_unstable();
        pairs.dedup();
        assert_eq!(pairs.len(), tiles.len());
        assert_eq!(original, pairs);
    }

    #[test]
    fn test_build_tiles_debug_dump_writes_strips() {
        let dir = tempfile::tempdir().unwrap();
        let pages = vec![page(400, 2000)];
        let tiles = build_tiles(&pages, &geometry(), true, Some(dir.path())).unwrap();

        assert!(dir.path().join("page0_header.jpg").exists());
        assert!(dir.path().join("page0_slice0.jpg").exists());
        assert!(tiles[0].raw_header.is_some());
        assert!(tiles[0].raw_slice.is_some());
    }

    #[test]
    fn test_default_geometry_three_slices_per_3000px_page() {
        let spans = slice_spans(3000, &TileGeometry::default());
        assert_eq!(spans.len(), 3);
        let last = spans.last().unwrap();
        assert_eq!(last.0 + last.1, 3000);
    }
}
