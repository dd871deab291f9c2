//! Artifacts written after each run.
//!
//! # Submodules
//!
//! - [`json`]: Writes each target's [`RunReport`](crate::pipeline::RunReport) as JSON
//!
//! # Output Structure
//!
//! ```text
//! json_output_dir/
//! └── 2024-01-10/
//!     ├── techcrunch-com_081500.json
//!     └── news-google-com_081742.json
//! ```

pub mod json;
