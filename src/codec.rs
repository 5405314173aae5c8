//! Document codec: bytes <-> [`Document`].
//!
//! The on-disk container is a self-describing JSON document (format
//! `overtype`, version 1). Raster pixel payloads travel as base64-encoded
//! PNG strings; they are decoded (and premultiplied) eagerly so that a bad
//! payload surfaces as `MalformedDocument` at decode time rather than deep
//! inside compositing.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::{
    error::{OvertypeError, OvertypeResult},
    model::{Canvas, Document, Layer, LayerKind, PixelData},
};

pub const FORMAT: &str = "overtype";
pub const VERSION: u32 = 1;

#[derive(serde::Serialize, serde::Deserialize)]
struct DocumentFile {
    format: String,
    version: u32,
    canvas: Canvas,
    root: LayerFile,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct LayerFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<u32>,
    name: String,
    #[serde(default = "default_visible")]
    visible: bool,
    kind: LayerFileKind,
}

#[derive(serde::Serialize, serde::Deserialize)]
enum LayerFileKind {
    Group {
        children: Vec<LayerFile>,
    },
    Text {
        text: String,
    },
    Raster {
        #[serde(default)]
        x: i32,
        #[serde(default)]
        y: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        png_base64: Option<String>,
    },
}

fn default_visible() -> bool {
    true
}

/// Parse uploaded bytes into a request-scoped [`Document`].
pub fn decode(bytes: &[u8]) -> OvertypeResult<Document> {
    let file: DocumentFile = serde_json::from_slice(bytes)
        .map_err(|e| OvertypeError::malformed(format!("parse document container: {e}")))?;

    if file.format != FORMAT {
        return Err(OvertypeError::malformed(format!(
            "unknown document format '{}'",
            file.format
        )));
    }
    if file.version != VERSION {
        return Err(OvertypeError::malformed(format!(
            "unsupported document version {}",
            file.version
        )));
    }

    let doc = Document {
        canvas: file.canvas,
        root: decode_layer(file.root)?,
    };
    doc.validate()
        .map_err(|e| OvertypeError::malformed(e.to_string()))?;
    Ok(doc)
}

fn decode_layer(file: LayerFile) -> OvertypeResult<Layer> {
    let kind = match file.kind {
        LayerFileKind::Group { children } => LayerKind::Group {
            children: children
                .into_iter()
                .map(decode_layer)
                .collect::<OvertypeResult<Vec<_>>>()?,
        },
        LayerFileKind::Text { text } => LayerKind::Text { content: text },
        LayerFileKind::Raster { x, y, png_base64 } => {
            let pixels = match png_base64 {
                Some(b64) => Some(decode_pixels(&file.name, &b64)?),
                None => None,
            };
            LayerKind::Other { x, y, pixels }
        }
    };
    Ok(Layer {
        id: file.id,
        name: file.name,
        visible: file.visible,
        kind,
    })
}

fn decode_pixels(layer_name: &str, b64: &str) -> OvertypeResult<PixelData> {
    let png = BASE64
        .decode(b64)
        .map_err(|e| OvertypeError::malformed(format!("layer '{layer_name}' pixel base64: {e}")))?;
    let dyn_img = image::load_from_memory(&png)
        .map_err(|e| OvertypeError::malformed(format!("layer '{layer_name}' pixel png: {e}")))?;
    let rgba = dyn_img.to_rgba8();
    let (width, height) = rgba.dimensions();

    let mut rgba8_premul = rgba.into_raw();
    premultiply_rgba8_in_place(&mut rgba8_premul);

    Ok(PixelData {
        width,
        height,
        rgba8_premul,
    })
}

/// Serialize a (possibly mutated) document back to container bytes.
pub fn encode(doc: &Document) -> OvertypeResult<Vec<u8>> {
    let file = DocumentFile {
        format: FORMAT.to_string(),
        version: VERSION,
        canvas: doc.canvas,
        root: encode_layer(&doc.root)?,
    };
    serde_json::to_vec_pretty(&file)
        .map_err(|e| OvertypeError::encoding(format!("serialize document container: {e}")))
}

fn encode_layer(layer: &Layer) -> OvertypeResult<LayerFile> {
    let kind = match &layer.kind {
        LayerKind::Group { children } => LayerFileKind::Group {
            children: children
                .iter()
                .map(encode_layer)
                .collect::<OvertypeResult<Vec<_>>>()?,
        },
        LayerKind::Text { content } => LayerFileKind::Text {
            text: content.clone(),
        },
        LayerKind::Other { x, y, pixels } => LayerFileKind::Raster {
            x: *x,
            y: *y,
            png_base64: match pixels {
                Some(p) => Some(encode_pixels(&layer.name, p)?),
                None => None,
            },
        },
    };
    Ok(LayerFile {
        id: layer.id,
        name: layer.name.clone(),
        visible: layer.visible,
        kind,
    })
}

fn encode_pixels(layer_name: &str, pixels: &PixelData) -> OvertypeResult<String> {
    let mut straight = pixels.rgba8_premul.clone();
    unpremultiply_rgba8_in_place(&mut straight);

    let img = image::RgbaImage::from_raw(pixels.width, pixels.height, straight).ok_or_else(
        || OvertypeError::encoding(format!("layer '{layer_name}' pixel buffer size mismatch")),
    )?;

    let mut png = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
        .map_err(|e| OvertypeError::encoding(format!("layer '{layer_name}' pixel png: {e}")))?;

    Ok(BASE64.encode(&png))
}

pub(crate) fn premultiply_rgba8_in_place(rgba: &mut [u8]) {
    for px in rgba.chunks_exact_mut(4) {
        let a = px[3] as u16;
        if a == 0 {
            px[0] = 0;
            px[1] = 0;
            px[2] = 0;
            continue;
        }
        px[0] = ((px[0] as u16 * a + 127) / 255) as u8;
        px[1] = ((px[1] as u16 * a + 127) / 255) as u8;
        px[2] = ((px[2] as u16 * a + 127) / 255) as u8;
    }
}

pub(crate) fn unpremultiply_rgba8_in_place(rgba: &mut [u8]) {
    for px in rgba.chunks_exact_mut(4) {
        let a = px[3] as u16;
        if a == 0 || a == 255 {
            continue;
        }
        px[0] = ((px[0] as u16 * 255 + a / 2) / a).min(255) as u8;
        px[1] = ((px[1] as u16 * 255 + a / 2) / a).min(255) as u8;
        px[2] = ((px[2] as u16 * 255 + a / 2) / a).min(255) as u8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address;

    fn raster_png_base64(rgba: &[u8], w: u32, h: u32) -> String {
        let img = image::RgbaImage::from_raw(w, h, rgba.to_vec()).unwrap();
        let mut png = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        BASE64.encode(&png)
    }

    fn sample_bytes() -> Vec<u8> {
        let container = serde_json::json!({
            "format": "overtype",
            "version": 1,
            "canvas": { "width": 16, "height": 16 },
            "root": {
                "name": "root",
                "kind": { "Group": { "children": [
                    {
                        "name": "bg",
                        "kind": { "Raster": {
                            "x": 0, "y": 0,
                            "png_base64": raster_png_base64(&[0, 0, 255, 255], 1, 1),
                        }}
                    },
                    {
                        "name": "Title",
                        "kind": { "Text": { "text": "Hello" } }
                    },
                ]}}
            }
        });
        serde_json::to_vec(&container).unwrap()
    }

    #[test]
    fn decode_builds_the_layer_tree() {
        let doc = decode(&sample_bytes()).unwrap();
        assert_eq!(doc.canvas.width, 16);
        let entries = address::enumerate(&doc);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "Title");
        assert_eq!(entries[0].content, "Hello");
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = decode(b"not even json").unwrap_err();
        assert!(matches!(err, OvertypeError::MalformedDocument(_)));
    }

    #[test]
    fn decode_rejects_wrong_format_or_version() {
        let bad_format = br#"{"format":"psd","version":1,"canvas":{"width":1,"height":1},"root":{"name":"r","kind":{"Group":{"children":[]}}}}"#;
        assert!(matches!(
            decode(bad_format),
            Err(OvertypeError::MalformedDocument(_))
        ));

        let bad_version = br#"{"format":"overtype","version":9,"canvas":{"width":1,"height":1},"root":{"name":"r","kind":{"Group":{"children":[]}}}}"#;
        assert!(matches!(
            decode(bad_version),
            Err(OvertypeError::MalformedDocument(_))
        ));
    }

    #[test]
    fn decode_rejects_bad_pixel_payload() {
        let container = serde_json::json!({
            "format": "overtype",
            "version": 1,
            "canvas": { "width": 4, "height": 4 },
            "root": {
                "name": "bg",
                "kind": { "Raster": { "x": 0, "y": 0, "png_base64": "bm90IGEgcG5n" } }
            }
        });
        let err = decode(&serde_json::to_vec(&container).unwrap()).unwrap_err();
        assert!(matches!(err, OvertypeError::MalformedDocument(_)));
    }

    #[test]
    fn encode_decode_preserves_text_enumeration() {
        let doc = decode(&sample_bytes()).unwrap();
        let reencoded = encode(&doc).unwrap();
        let doc2 = decode(&reencoded).unwrap();
        assert_eq!(address::enumerate(&doc), address::enumerate(&doc2));
        assert_eq!(doc.canvas, doc2.canvas);
    }

    #[test]
    fn encode_decode_preserves_opaque_pixels() {
        let doc = decode(&sample_bytes()).unwrap();
        let doc2 = decode(&encode(&doc).unwrap()).unwrap();

        let pick = |d: &Document| -> PixelData {
            let LayerKind::Group { children } = &d.root.kind else {
                panic!("root must be a group");
            };
            let LayerKind::Other { pixels, .. } = &children[0].kind else {
                panic!("first child must be raster");
            };
            pixels.clone().unwrap()
        };
        assert_eq!(pick(&doc), pick(&doc2));
    }

    #[test]
    fn premultiply_roundtrip_is_stable_for_opaque_and_transparent() {
        let mut buf = vec![10, 20, 30, 255, 99, 99, 99, 0];
        let orig = buf.clone();
        premultiply_rgba8_in_place(&mut buf);
        unpremultiply_rgba8_in_place(&mut buf);
        // Opaque pixels survive exactly; fully transparent pixels collapse to
        // zero color, which is the canonical premultiplied form.
        assert_eq!(&buf[0..4], &orig[0..4]);
        assert_eq!(&buf[4..8], &[0, 0, 0, 0]);
    }
}
