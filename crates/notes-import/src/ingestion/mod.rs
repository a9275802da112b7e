//! Document ingestion: slide parsing, slide grouping and PDF drafts

mod drafts;
mod pdf;
pub mod slide_parser;

pub use drafts::{slides_to_drafts, COMBINED_TITLE};
pub use pdf::pdf_draft;
pub use slide_parser::{HttpSlideParser, ParserConfig, Slide, SlideParser};
