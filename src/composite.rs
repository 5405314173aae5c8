//! Raster compositor: flattens a document tree into a preview bitmap.
//!
//! Layers are painted in traversal order (depth-first, children in original
//! order), later layers over earlier ones. Invisible layers hide their whole
//! subtree. Text layers contribute no pixels here; glyph rasterization lives
//! behind the [`Compositor`] seam so a font-capable backend can replace the
//! CPU one without touching the pipeline.

use crate::{
    codec::unpremultiply_rgba8_in_place,
    error::{OvertypeError, OvertypeResult},
    model::{Document, Layer, LayerKind, PixelData},
};

/// Flattened, PNG-encoded preview of one document.
#[derive(Clone, Debug)]
pub struct PreviewArtifact {
    pub width: u32,
    pub height: u32,
    pub png: Vec<u8>,
}

/// Compositing seam of the edit pipeline.
pub trait Compositor {
    /// Flatten `doc` and encode a preview no larger than `max_side` on
    /// either axis.
    fn composite(&self, doc: &Document, max_side: u32) -> OvertypeResult<PreviewArtifact>;
}

/// Pure-CPU source-over compositor.
#[derive(Clone, Copy, Debug, Default)]
pub struct CpuCompositor;

impl Compositor for CpuCompositor {
    fn composite(&self, doc: &Document, max_side: u32) -> OvertypeResult<PreviewArtifact> {
        if max_side == 0 {
            return Err(OvertypeError::compositing("preview size must be > 0"));
        }
        doc.validate()
            .map_err(|e| OvertypeError::compositing(e.to_string()))?;

        let (w, h) = (doc.canvas.width, doc.canvas.height);
        let mut surface = vec![0u8; w as usize * h as usize * 4];
        paint_layer(&doc.root, &mut surface, w, h)?;

        unpremultiply_rgba8_in_place(&mut surface);
        let img = image::RgbaImage::from_raw(w, h, surface)
            .ok_or_else(|| OvertypeError::compositing("surface buffer size mismatch"))?;
        let img = if w > max_side || h > max_side {
            image::DynamicImage::ImageRgba8(img).thumbnail(max_side, max_side)
        } else {
            image::DynamicImage::ImageRgba8(img)
        };

        let mut png = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .map_err(|e| OvertypeError::compositing(format!("encode preview png: {e}")))?;

        Ok(PreviewArtifact {
            width: img.width(),
            height: img.height(),
            png,
        })
    }
}

fn paint_layer(layer: &Layer, surface: &mut [u8], w: u32, h: u32) -> OvertypeResult<()> {
    if !layer.visible {
        return Ok(());
    }
    match &layer.kind {
        LayerKind::Group { children } => {
            for child in children {
                paint_layer(child, surface, w, h)?;
            }
            Ok(())
        }
        LayerKind::Text { .. } => Ok(()),
        LayerKind::Other { x, y, pixels } => {
            if let Some(p) = pixels {
                blit_over(surface, w, h, p, *x, *y);
            }
            Ok(())
        }
    }
}

/// Source-over blend `src` onto the surface at (x, y), clipping to bounds.
fn blit_over(surface: &mut [u8], w: u32, h: u32, src: &PixelData, x: i32, y: i32) {
    for sy in 0..src.height {
        let dy = y + sy as i32;
        if dy < 0 || dy >= h as i32 {
            continue;
        }
        for sx in 0..src.width {
            let dx = x + sx as i32;
            if dx < 0 || dx >= w as i32 {
                continue;
            }
            let si = (sy as usize * src.width as usize + sx as usize) * 4;
            let di = (dy as usize * w as usize + dx as usize) * 4;
            let out = over(
                [surface[di], surface[di + 1], surface[di + 2], surface[di + 3]],
                [
                    src.rgba8_premul[si],
                    src.rgba8_premul[si + 1],
                    src.rgba8_premul[si + 2],
                    src.rgba8_premul[si + 3],
                ],
            );
            surface[di..di + 4].copy_from_slice(&out);
        }
    }
}

/// Premultiplied source-over for a single pixel.
pub fn over(dst: [u8; 4], src: [u8; 4]) -> [u8; 4] {
    if src[3] == 0 {
        return dst;
    }
    let inv = 255u16 - u16::from(src[3]);

    let mut out = [0u8; 4];
    for i in 0..4 {
        out[i] = src[i].saturating_add(mul_div255(u16::from(dst[i]), inv));
    }
    out
}

fn mul_div255(x: u16, y: u16) -> u8 {
    (((u32::from(x) * u32::from(y)) + 127) / 255) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Canvas;

    fn solid(rgba: [u8; 4], w: u32, h: u32) -> PixelData {
        PixelData {
            width: w,
            height: h,
            rgba8_premul: rgba.repeat(w as usize * h as usize),
        }
    }

    #[test]
    fn over_src_alpha_0_is_noop() {
        let dst = [10, 20, 30, 40];
        assert_eq!(over(dst, [255, 255, 255, 0]), dst);
    }

    #[test]
    fn over_src_opaque_replaces_dst() {
        let src = [255, 0, 0, 255];
        assert_eq!(over([0, 0, 0, 255], src), src);
    }

    #[test]
    fn over_dst_transparent_returns_src() {
        let src = [100, 110, 120, 200];
        assert_eq!(over([0, 0, 0, 0], src), src);
    }

    #[test]
    fn composite_paints_later_layers_on_top() {
        let doc = Document {
            canvas: Canvas {
                width: 2,
                height: 2,
            },
            root: Layer::group(
                "root",
                vec![
                    Layer::raster("under", 0, 0, solid([0, 0, 255, 255], 2, 2)),
                    Layer::raster("top", 0, 0, solid([255, 0, 0, 255], 1, 1)),
                ],
            ),
        };
        let preview = CpuCompositor.composite(&doc, 512).unwrap();
        assert_eq!((preview.width, preview.height), (2, 2));

        let img = image::load_from_memory(&preview.png).unwrap().to_rgba8();
        assert_eq!(img.get_pixel(0, 0).0, [255, 0, 0, 255]);
        assert_eq!(img.get_pixel(1, 1).0, [0, 0, 255, 255]);
    }

    #[test]
    fn composite_skips_hidden_subtrees() {
        let mut hidden = Layer::group(
            "hidden",
            vec![Layer::raster("red", 0, 0, solid([255, 0, 0, 255], 2, 2))],
        );
        hidden.visible = false;

        let doc = Document {
            canvas: Canvas {
                width: 2,
                height: 2,
            },
            root: Layer::group(
                "root",
                vec![
                    Layer::raster("bg", 0, 0, solid([0, 255, 0, 255], 2, 2)),
                    hidden,
                ],
            ),
        };
        let preview = CpuCompositor.composite(&doc, 512).unwrap();
        let img = image::load_from_memory(&preview.png).unwrap().to_rgba8();
        assert_eq!(img.get_pixel(0, 0).0, [0, 255, 0, 255]);
    }

    #[test]
    fn composite_clips_out_of_bounds_placement() {
        let doc = Document {
            canvas: Canvas {
                width: 2,
                height: 2,
            },
            root: Layer::raster("off", -1, -1, solid([255, 255, 255, 255], 2, 2)),
        };
        let preview = CpuCompositor.composite(&doc, 512).unwrap();
        let img = image::load_from_memory(&preview.png).unwrap().to_rgba8();
        assert_eq!(img.get_pixel(0, 0).0, [255, 255, 255, 255]);
        assert_eq!(img.get_pixel(1, 1).0, [0, 0, 0, 0]);
    }

    #[test]
    fn composite_bounds_preview_to_max_side() {
        let doc = Document {
            canvas: Canvas {
                width: 1024,
                height: 512,
            },
            root: Layer::group("root", vec![]),
        };
        let preview = CpuCompositor.composite(&doc, 512).unwrap();
        assert!(preview.width <= 512 && preview.height <= 512);
        // Aspect ratio is preserved by the downscale.
        assert_eq!(preview.width, 512);
        assert_eq!(preview.height, 256);
    }

    #[test]
    fn composite_succeeds_on_text_only_document() {
        let doc = Document {
            canvas: Canvas {
                width: 4,
                height: 4,
            },
            root: Layer::text("Title", "Hello"),
        };
        let preview = CpuCompositor.composite(&doc, 512).unwrap();
        let img = image::load_from_memory(&preview.png).unwrap().to_rgba8();
        assert_eq!(img.get_pixel(0, 0).0, [0, 0, 0, 0]);
    }
}
