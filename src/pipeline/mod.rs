//! Enrichment and rendering stages.
//!
//! Each submodule implements exactly one transformation. Stages that talk to
//! the outside world (preview toolchain, pdfium) sit behind a trait so the
//! dispatcher can be tested with fakes.
//!
//! ## Data Flow
//!
//! ```text
//! PR files ──▶ project_name ─┐
//! thumbnail payload ──▶ thumbnail ─┤
//! README ──▶ description ──────────┼──▶ mapper ──▶ qr ──▶ render
//! Gerber zip ──▶ preview ──────────┘
//! ```
//!
//! 1. [`project_name`]: derive a project name from a change set's paths
//! 2. [`thumbnail`]: decode either thumbnail payload shape to PNG
//! 3. [`description`]: clean up README markdown and convert to HTML
//! 4. [`preview`]: render a Gerber archive with an external toolchain
//! 5. [`qr`]: encode receipt links as QR images
//! 6. [`render`]: lay out and write the receipt PDF; runs in
//!    `spawn_blocking` because pdfium is not async-safe
//!
//! [`encode`] holds the PNG helpers the image stages share.

pub mod description;
pub mod encode;
pub mod preview;
pub mod project_name;
pub mod qr;
pub mod render;
pub mod thumbnail;
