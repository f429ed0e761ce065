//! Pipeline stages for page-image-to-Markdown reconstruction.
//!
//! Each submodule implements one transformation step and reads and writes
//! whole directories, so any stage can be re-run on its own against the
//! output of the previous one.
//!
//! ## Data Flow
//!
//! ```text
//! input/<name> ──▶ deskew ──▶ segment ──▶ normalize ──▶ recognize ──▶ merge
//!   (pages)      step1_rotated step2_crops step2_padded step3_md_fragments final_result.md
//! ```
//!
//! 1. [`deskew`]    estimate and undo page rotation
//! 2. [`segment`]   split pages into typed units through a [`layout`] engine
//! 3. [`normalize`] pad undersized units to the minimum edge length
//! 4. [`recognize`] one VLM call per unit; the only stage with async network I/O
//! 5. [`merge`]     order fragments by identity and concatenate them
//!
//! [`input`] owns the directory convention and listings, [`encode`] the
//! image codecs shared by several stages. The image stages are synchronous
//! and run on the blocking pool; see [`crate::run`].

pub mod deskew;
pub mod encode;
pub mod input;
pub mod layout;
pub mod merge;
pub mod normalize;
pub mod recognize;
pub mod segment;
