//! Edit pipeline: inspect / mutate / reserialize.
//!
//! Every operation decodes fresh from the bytes supplied with the call and
//! drops the document when it returns. There is no cross-call state; a
//! client's address stays valid between calls only because the addressing
//! traversal is deterministic over byte-identical input.

use sha2::Digest as _;

use crate::{
    address::{self, TextEdit, TextLayerEntry},
    codec,
    composite::{Compositor, PreviewArtifact},
    error::{OvertypeError, OvertypeResult},
    model::{Canvas, Document},
};

/// Preview bound: neither side of the preview bitmap exceeds this.
pub const PREVIEW_MAX_SIDE: u32 = 512;

/// Result of [`inspect`]. `preview` is `None` when compositing failed; the
/// enumeration is still authoritative.
#[derive(Clone, Debug)]
pub struct InspectOutcome {
    pub digest: String,
    pub canvas: Canvas,
    pub layers: Vec<TextLayerEntry>,
    pub preview: Option<PreviewArtifact>,
}

/// Result of [`mutate`]. The mutation's success and the preview's
/// availability are independent: `applied` is always the post-edit entry,
/// `preview` is `None` when recompositing failed.
#[derive(Clone, Debug)]
pub struct MutateOutcome {
    pub digest: String,
    pub applied: TextLayerEntry,
    pub preview: Option<PreviewArtifact>,
}

/// SHA-256 of the uploaded bytes, lowercase hex. Clients echo it back to
/// detect that an address was computed against different bytes.
pub fn document_digest(bytes: &[u8]) -> String {
    use std::fmt::Write as _;

    let digest = sha2::Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        let _ = write!(out, "{b:02x}");
    }
    out
}

fn check_digest(actual: &str, expected: Option<&str>) -> OvertypeResult<()> {
    if let Some(expected) = expected
        && expected != actual
    {
        return Err(OvertypeError::DocumentChanged {
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

fn try_preview(doc: &Document, compositor: &dyn Compositor) -> Option<PreviewArtifact> {
    match compositor.composite(doc, PREVIEW_MAX_SIDE) {
        Ok(preview) => Some(preview),
        Err(e) => {
            tracing::warn!(error = %e, "preview compositing failed, degrading");
            None
        }
    }
}

/// Decode, enumerate text layers, best-effort preview. No mutation.
#[tracing::instrument(skip(bytes, compositor), fields(len = bytes.len()))]
pub fn inspect(bytes: &[u8], compositor: &dyn Compositor) -> OvertypeResult<InspectOutcome> {
    let doc = codec::decode(bytes)?;
    let layers = address::enumerate(&doc);
    let preview = try_preview(&doc, compositor);
    Ok(InspectOutcome {
        digest: document_digest(bytes),
        canvas: doc.canvas,
        layers,
        preview,
    })
}

/// Decode, apply one text edit in memory, best-effort recomposite.
///
/// The mutation never persists by itself; callers wanting bytes follow up
/// with [`reserialize`].
#[tracing::instrument(skip(bytes, edit, compositor), fields(len = bytes.len(), address = edit.address.0))]
pub fn mutate(
    bytes: &[u8],
    edit: &TextEdit,
    expected_digest: Option<&str>,
    compositor: &dyn Compositor,
) -> OvertypeResult<MutateOutcome> {
    let mut doc = codec::decode(bytes)?;
    let digest = document_digest(bytes);
    check_digest(&digest, expected_digest)?;

    let applied = address::apply_edit(&mut doc, edit)?;
    let preview = try_preview(&doc, compositor);
    Ok(MutateOutcome {
        digest,
        applied,
        preview,
    })
}

/// Decode, apply an optional edit, encode back to container bytes.
///
/// Unlike compositing there is no degraded path here: if the codec cannot
/// produce bytes the whole operation fails with `EncodingFailed`.
#[tracing::instrument(skip_all, fields(len = bytes.len(), edited = edit.is_some()))]
pub fn reserialize(
    bytes: &[u8],
    edit: Option<&TextEdit>,
    expected_digest: Option<&str>,
) -> OvertypeResult<Vec<u8>> {
    let mut doc = codec::decode(bytes)?;
    check_digest(&document_digest(bytes), expected_digest)?;

    if let Some(edit) = edit {
        address::apply_edit(&mut doc, edit)?;
    }
    codec::encode(&doc)
}
