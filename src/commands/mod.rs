pub mod export_spiral;
pub mod lock;
pub mod post_issues;
pub mod report;
pub mod score;
