use crate::error::{OvertypeError, OvertypeResult};

/// Overall canvas size of a document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
}

/// One decoded layered-image document.
///
/// A `Document` is scoped to a single request: it is built from uploaded bytes
/// at the start of handling and dropped at the end. Nothing caches or shares
/// it across requests.
#[derive(Clone, Debug)]
pub struct Document {
    pub canvas: Canvas,
    pub root: Layer,
}

/// One node of the document tree.
#[derive(Clone, Debug)]
pub struct Layer {
    /// Codec-native identifier. Not stable across codec versions and never
    /// exposed across the request boundary; layers are addressed by their
    /// deterministic text ordinal instead.
    pub id: Option<u32>,
    pub name: String,
    pub visible: bool,
    pub kind: LayerKind,
}

/// Closed set of layer variants. Consumers match exhaustively.
#[derive(Clone, Debug)]
pub enum LayerKind {
    Group {
        children: Vec<Layer>,
    },
    Text {
        content: String,
    },
    /// Raster/shape leaf, opaque except for placement and decoded pixels.
    Other {
        x: i32,
        y: i32,
        pixels: Option<PixelData>,
    },
}

/// Premultiplied RGBA8 pixel payload of a raster layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PixelData {
    pub width: u32,
    pub height: u32,
    pub rgba8_premul: Vec<u8>,
}

impl PixelData {
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

impl Layer {
    pub fn group(name: impl Into<String>, children: Vec<Layer>) -> Self {
        Self {
            id: None,
            name: name.into(),
            visible: true,
            kind: LayerKind::Group { children },
        }
    }

    pub fn text(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            visible: true,
            kind: LayerKind::Text {
                content: content.into(),
            },
        }
    }

    pub fn raster(name: impl Into<String>, x: i32, y: i32, pixels: PixelData) -> Self {
        Self {
            id: None,
            name: name.into(),
            visible: true,
            kind: LayerKind::Other {
                x,
                y,
                pixels: Some(pixels),
            },
        }
    }
}

impl Document {
    pub fn validate(&self) -> OvertypeResult<()> {
        if self.canvas.width == 0 || self.canvas.height == 0 {
            return Err(OvertypeError::validation("canvas width/height must be > 0"));
        }
        validate_layer(&self.root)
    }
}

fn validate_layer(layer: &Layer) -> OvertypeResult<()> {
    match &layer.kind {
        LayerKind::Group { children } => {
            for child in children {
                validate_layer(child)?;
            }
            Ok(())
        }
        LayerKind::Text { .. } => Ok(()),
        LayerKind::Other { pixels, .. } => {
            if let Some(p) = pixels
                && p.rgba8_premul.len() != p.expected_len()
            {
                return Err(OvertypeError::validation(format!(
                    "layer '{}' pixel buffer length {} does not match {}x{} rgba8",
                    layer.name,
                    p.rgba8_premul.len(),
                    p.width,
                    p.height
                )));
            }
            Ok(())
        }
    }
}
