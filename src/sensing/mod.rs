pub mod detector;
pub mod imaging;
pub mod source;

pub use detector::{draw_candidates, CandidateDetector, DetectorConfig};
pub use source::{
    build_source, DirectorySource, FallbackSource, FrameError, FrameSource, HttpSnapshotSource,
    MemorySource, SourceConfig,
};
