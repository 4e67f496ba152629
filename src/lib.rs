//! Management report generation from annual securities reports.
//!
//! A run moves a disclosure document through seven stages (extraction,
//! scoring, selection, roadmap, summary, assembly, rendering). Each stage
//! reads the artifacts of earlier stages from the run directory and writes
//! its own, so any stage can be re-run from the files on disk.
pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod run;
pub mod stages;
pub mod util;
