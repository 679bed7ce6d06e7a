//! Forward-reverse-forward arrangement for looping clips.

use crate::device::Frame;

/// Arrange `frames` as forward, reversed, then forward again.
///
/// The output has `3 * frames.len()` entries. Turn points repeat their
/// frame (`..C, C..` and `..A, A..`); no deduplication is done. Frames share
/// pixel storage, so no image data is copied.
pub fn arrange_boomerang(frames: &[Frame]) -> Vec<Frame> {
    let mut out = Vec::with_capacity(frames.len() * 3);
    out.extend_from_slice(frames);
    out.extend(frames.iter().rev().cloned());
    out.extend_from_slice(frames);
    out
}
