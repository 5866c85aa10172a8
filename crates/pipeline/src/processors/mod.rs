//! Text processors applied to streaming model output

mod sentence_detector;

pub use sentence_detector::{SentenceBoundaryDetector, SpeakableUnit, UnitKind};
