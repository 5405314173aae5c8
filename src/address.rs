//! Deterministic addressing of text layers.
//!
//! A [`LayerAddress`] is the zero-based position of a text layer in the
//! depth-first, children-in-original-order walk of the document tree,
//! counting text layers only. Groups and raster leaves are descended for
//! structure but never addressed. Because the walk depends only on the
//! decoded tree, two independent decodes of byte-identical input always
//! agree on every address; that agreement is what lets a stateless client
//! reuse an address from an earlier inspect call.

use crate::{
    error::{OvertypeError, OvertypeResult},
    model::{Document, Layer, LayerKind},
};

/// Ordinal of a text layer within one document's traversal.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct LayerAddress(pub usize);

/// Summary of one addressed text layer, as returned by [`enumerate`].
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TextLayerEntry {
    pub address: LayerAddress,
    pub name: String,
    #[serde(rename = "text")]
    pub content: String,
    pub visible: bool,
}

/// A request to set one text layer's content.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct TextEdit {
    pub address: LayerAddress,
    pub new_text: String,
}

/// List every text layer with its address, in traversal order.
pub fn enumerate(doc: &Document) -> Vec<TextLayerEntry> {
    let mut out = Vec::new();
    collect(&doc.root, &mut out);
    out
}

fn collect(layer: &Layer, out: &mut Vec<TextLayerEntry>) {
    match &layer.kind {
        LayerKind::Group { children } => {
            for child in children {
                collect(child, out);
            }
        }
        LayerKind::Text { content } => out.push(TextLayerEntry {
            address: LayerAddress(out.len()),
            name: layer.name.clone(),
            content: content.clone(),
            visible: layer.visible,
        }),
        LayerKind::Other { .. } => {}
    }
}

/// Resolve an address back to its layer node.
pub fn resolve(doc: &Document, address: LayerAddress) -> OvertypeResult<&Layer> {
    let mut remaining = address.0;
    let mut count = 0usize;
    if let Some(layer) = find(&doc.root, &mut remaining, &mut count) {
        return Ok(layer);
    }
    Err(OvertypeError::AddressOutOfRange {
        address: address.0,
        count,
    })
}

/// Resolve an address to a mutable layer node.
pub fn resolve_mut(doc: &mut Document, address: LayerAddress) -> OvertypeResult<&mut Layer> {
    // Counting pass first so the failure can report the text-layer total;
    // the borrow checker disallows carrying the count out of the &mut walk.
    let count = enumerate(doc).len();
    if address.0 >= count {
        return Err(OvertypeError::AddressOutOfRange {
            address: address.0,
            count,
        });
    }
    let mut remaining = address.0;
    find_mut(&mut doc.root, &mut remaining).ok_or(OvertypeError::AddressOutOfRange {
        address: address.0,
        count,
    })
}

fn find<'a>(layer: &'a Layer, remaining: &mut usize, count: &mut usize) -> Option<&'a Layer> {
    match &layer.kind {
        LayerKind::Group { children } => {
            for child in children {
                if let Some(hit) = find(child, remaining, count) {
                    return Some(hit);
                }
            }
            None
        }
        LayerKind::Text { .. } => {
            *count += 1;
            if *remaining == 0 {
                Some(layer)
            } else {
                *remaining -= 1;
                None
            }
        }
        LayerKind::Other { .. } => None,
    }
}

fn find_mut<'a>(layer: &'a mut Layer, remaining: &mut usize) -> Option<&'a mut Layer> {
    // The text arm must not hand `layer` back out of a match on its own
    // `kind` field; that would hold two overlapping mutable borrows.
    if matches!(layer.kind, LayerKind::Text { .. }) {
        if *remaining == 0 {
            return Some(layer);
        }
        *remaining -= 1;
        return None;
    }
    if let LayerKind::Group { children } = &mut layer.kind {
        for child in children {
            if let Some(hit) = find_mut(child, remaining) {
                return Some(hit);
            }
        }
    }
    None
}

/// Apply a text edit in place. The edit touches only the resolved node's
/// content field; tree structure (and hence every address) is unchanged.
pub fn apply_edit(doc: &mut Document, edit: &TextEdit) -> OvertypeResult<TextLayerEntry> {
    let layer = resolve_mut(doc, edit.address)?;
    match &mut layer.kind {
        LayerKind::Text { content } => {
            *content = edit.new_text.clone();
        }
        // Unreachable as long as resolve_mut only returns text nodes, but the
        // producing and resolving traversals must agree on variant.
        LayerKind::Group { .. } | LayerKind::Other { .. } => {
            return Err(OvertypeError::NotATextLayer(edit.address.0));
        }
    }
    Ok(TextLayerEntry {
        address: edit.address,
        name: layer.name.clone(),
        content: edit.new_text.clone(),
        visible: layer.visible,
    })
}
