use tracing::info;

use crate::detection::{GlyphRecognizer, InferenceParams};
use crate::error::ModelError;
use crate::models::{Glyph, PlateCrop};

/// Deliberately permissive: characters are small and often partly occluded.
pub const GLYPH_PARAMS: InferenceParams = InferenceParams {
    confidence: 0.1,
    iou: 0.3,
};

/// Read the characters on a plate crop, left to right.
///
/// A missing crop short-circuits to an empty string without touching the model.
pub fn recognize(
    recognizer: &dyn GlyphRecognizer,
    crop: Option<&PlateCrop>,
) -> Result<String, ModelError> {
    let Some(crop) = crop else {
        return Ok(String::new());
    };

    let glyphs = recognizer
        .recognize(&crop.image, GLYPH_PARAMS)?
        .iter()
        .filter(|glyph| glyph.confidence >= GLYPH_PARAMS.confidence)
        .map(Glyph::from)
        .collect::<Vec<_>>();

    if glyphs.is_empty() {
        info!("no characters detected on the cropped plate");
        return Ok(String::new());
    }

    let plate = assemble(order_glyphs(glyphs));
    info!(%plate, "raw plate string from character detection");
    Ok(plate)
}

/// Sort glyphs by horizontal center. Single line only, no row grouping.
pub fn order_glyphs(mut glyphs: Vec<Glyph>) -> Vec<Glyph> {
    glyphs.sort_by(|a, b| a.x_center.total_cmp(&b.x_center));
    glyphs
}

pub fn assemble(glyphs: impl IntoIterator<Item = Glyph>) -> String {
    glyphs.into_iter().map(|glyph| glyph.label).collect()
}
