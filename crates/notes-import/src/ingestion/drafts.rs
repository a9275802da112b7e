//! Slide grouping: turns parsed slides into note drafts

use super::slide_parser::Slide;
use crate::types::{ImportMode, NoteDraft};

/// Title of every combined (non `pages`) draft
pub const COMBINED_TITLE: &str = "Imported slides";

const SLIDE_SEPARATOR: &str = "\n\n---\n\n";
const BLOCK_SEPARATOR: &str = "\n\n";

/// Title and body of a single slide
fn slide_note(index: usize, slide: &Slide) -> NoteDraft {
    let title = match slide.title.as_deref() {
        Some(title) if !title.is_empty() => title.to_string(),
        _ => format!("Slide {}", index + 1),
    };

    let text = slide.text.as_deref().unwrap_or("").trim();
    let images = slide
        .images
        .iter()
        .enumerate()
        .map(|(n, image)| format!("![{} image {}]({})", title, n + 1, image))
        .collect::<Vec<_>>()
        .join(BLOCK_SEPARATOR);

    let body = [text, images.as_str()]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(BLOCK_SEPARATOR)
        .trim()
        .to_string();

    NoteDraft { title, body }
}

/// Group slides into drafts according to `mode`.
///
/// `pages` yields one draft per slide (or one empty placeholder for an empty
/// deck); `single` and `slides` yield exactly one draft.
pub fn slides_to_drafts(slides: &[Slide], mode: ImportMode) -> Vec<NoteDraft> {
    let notes: Vec<NoteDraft> = slides
        .iter()
        .enumerate()
        .map(|(index, slide)| slide_note(index, slide))
        .collect();

    let separator = match mode {
        ImportMode::Pages => {
            if notes.is_empty() {
                return vec![NoteDraft::new(COMBINED_TITLE, "")];
            }
            return notes;
        }
        ImportMode::Slides => SLIDE_SEPARATOR,
        ImportMode::Single => BLOCK_SEPARATOR,
    };

    let mut body = notes
        .iter()
        .map(|note| note.body.as_str())
        .filter(|body| !body.is_empty())
        .collect::<Vec<_>>()
        .join(separator);

    // content-free deck: list the slide numbers instead
    if body.is_empty() {
        body = (1..=notes.len())
            .map(|n| format!("Slide {}", n))
            .collect::<Vec<_>>()
            .join("\n");
    }

    vec![NoteDraft::new(COMBINED_TITLE, body)]
}
