//! Receipt rendering: [`CanonicalDocument`] → fixed-size PDF via pdfium.
//!
//! Rendering is split in two. [`layout`] turns a document into an ordered
//! list of [`Block`]s and is pure, so what ends up on paper can be tested
//! without the pdfium library. [`PdfiumRenderer`] then stacks those blocks
//! top to bottom on one tall, narrow page.
//!
//! ## Why spawn_blocking?
//!
//! pdfium is a C++ library with thread-local state and no async API. All
//! pdfium calls run on a blocking-pool thread so the poller's runtime keeps
//! serving timers and signals while a receipt is being drawn.
//!
//! The page never grows. Content that does not fit is dropped with a
//! warning rather than spilling onto a second page the printer would cut.

use crate::error::RenderError;
use crate::model::CanonicalDocument;
use crate::pipeline::description::to_plain_text;
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// File name of the receipt inside a record's work directory.
pub const RECEIPT_FILE: &str = "receipt.pdf";

/// Horizontal margin on each side of the page, in millimetres.
const MARGIN_MM: f32 = 4.0;

/// Average Helvetica glyph width as a fraction of the font size.
const GLYPH_WIDTH_EM: f32 = 0.5;

/// Turns a canonical document into a printable file.
#[async_trait]
pub trait ReceiptRenderer: Send + Sync {
    /// Render `document` and write the result to `output`.
    async fn render(&self, document: &CanonicalDocument, output: &Path) -> Result<(), RenderError>;
}

/// One vertically stacked element of the receipt.
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    /// Large bold line (recipient name).
    Title(String),
    /// Bold section heading.
    Heading(String),
    /// Regular wrapped text.
    Body(String),
    /// Small wrapped text.
    Caption(String),
    /// Image scaled to `width_ratio` of the printable width.
    Image { path: PathBuf, width_ratio: f32 },
    /// Vertical whitespace in millimetres.
    Gap(f32),
}

impl Block {
    fn font_size(&self) -> f32 {
        match self {
            Block::Title(_) => 16.0,
            Block::Heading(_) => 11.0,
            Block::Body(_) => 9.0,
            Block::Caption(_) => 7.0,
            Block::Image { .. } | Block::Gap(_) => 0.0,
        }
    }
}

/// Lay out a document as a top-to-bottom sequence of blocks.
pub fn layout(doc: &CanonicalDocument) -> Vec<Block> {
    let mut blocks = vec![
        Block::Title(doc.identity.name.clone()),
        Block::Caption(doc.created_at_display.clone()),
    ];

    if let Some(path) = &doc.identity.avatar_path {
        blocks.push(Block::Image {
            path: path.clone(),
            width_ratio: 0.35,
        });
    }
    if let Some(handle) = &doc.identity.handle {
        blocks.push(Block::Body(format!("@{handle}")));
    }
    let location = doc.identity.location.display_line();
    if !location.is_empty() {
        blocks.push(Block::Body(location));
    }
    if let Some(age) = doc.age {
        blocks.push(Block::Body(format!("Age: {age}")));
    }

    if let Some(project) = &doc.project_info {
        blocks.push(Block::Gap(4.0));
        if !project.name.is_empty() {
            blocks.push(Block::Heading(project.name.clone()));
        }
        if let Some(path) = &project.image_path {
            blocks.push(Block::Image {
                path: path.clone(),
                width_ratio: 1.0,
            });
        }
        if let Some(html) = &project.html_description {
            let text = to_plain_text(html);
            if !text.is_empty() {
                blocks.push(Block::Body(text));
            }
        }
        for qr in &project.qr_codes {
            let Some(path) = &qr.image_path else {
                continue;
            };
            blocks.push(Block::Gap(2.0));
            blocks.push(Block::Image {
                path: path.clone(),
                width_ratio: 0.5,
            });
            blocks.push(Block::Caption(qr.label.clone()));
        }
    }

    let mut qa = doc.visible_qa().peekable();
    if qa.peek().is_some() {
        blocks.push(Block::Gap(4.0));
    }
    for entry in qa {
        blocks.push(Block::Heading(entry.question.clone()));
        blocks.push(Block::Body(entry.answer.clone()));
        blocks.push(Block::Gap(2.0));
    }

    blocks.push(Block::Gap(4.0));
    blocks.push(Block::Caption(format!("{} · {}", doc.grant_type, doc.record_id)));
    blocks
}

/// Greedy word wrap to at most `max_chars` characters per line.
///
/// Words longer than a line are hard-split. Explicit newlines are kept, and
/// blank input lines survive as empty lines.
pub fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut lines = Vec::new();
    for paragraph in text.lines() {
        let mut line = String::new();
        for word in paragraph.split_whitespace() {
            let mut word: Vec<char> = word.chars().collect();
            while word.len() > max_chars {
                if !line.is_empty() {
                    lines.push(std::mem::take(&mut line));
                }
                lines.push(word.drain(..max_chars).collect());
            }
            let word: String = word.into_iter().collect();
            if word.is_empty() {
                continue;
            }
            let needed = if line.is_empty() {
                word.chars().count()
            } else {
                line.chars().count() + 1 + word.chars().count()
            };
            if needed > max_chars && !line.is_empty() {
                lines.push(std::mem::take(&mut line));
            }
            if !line.is_empty() {
                line.push(' ');
            }
            line.push_str(&word);
        }
        lines.push(line);
    }
    lines
}

/// Renders receipts with pdfium.
#[derive(Debug, Clone)]
pub struct PdfiumRenderer {
    library: Option<PathBuf>,
    width_mm: f32,
    height_mm: f32,
}

impl PdfiumRenderer {
    /// `library` is an explicit pdfium shared library; `None` binds to the
    /// system-installed one.
    pub fn new(library: Option<PathBuf>, width_mm: f32, height_mm: f32) -> Self {
        Self {
            library,
            width_mm,
            height_mm,
        }
    }
}

#[async_trait]
impl ReceiptRenderer for PdfiumRenderer {
    async fn render(&self, document: &CanonicalDocument, output: &Path) -> Result<(), RenderError> {
        let blocks = layout(document);
        let library = self.library.clone();
        let (width, height) = (self.width_mm, self.height_mm);
        let path = output.to_path_buf();

        tokio::task::spawn_blocking(move || {
            render_blocking(library.as_deref(), &blocks, width, height, &path)
        })
        .await
        .map_err(|e| RenderError::Panicked(e.to_string()))?
    }
}

fn bind(library: Option<&Path>) -> Result<Pdfium, RenderError> {
    let bindings = match library {
        Some(path) => Pdfium::bind_to_library(path),
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| RenderError::Binding(format!("{:?}", e)))?;
    Ok(Pdfium::new(bindings))
}

fn layout_err(e: PdfiumError) -> RenderError {
    RenderError::Layout(format!("{:?}", e))
}

/// Blocking implementation of receipt rendering.
fn render_blocking(
    library: Option<&Path>,
    blocks: &[Block],
    width_mm: f32,
    height_mm: f32,
    output: &Path,
) -> Result<(), RenderError> {
    let pdfium = bind(library)?;
    let mut document = pdfium.create_new_pdf().map_err(layout_err)?;
    let regular = document.fonts_mut().helvetica();
    let bold = document.fonts_mut().helvetica_bold();

    let page_width = PdfPoints::from_mm(width_mm);
    let page_height = PdfPoints::from_mm(height_mm);
    let margin = PdfPoints::from_mm(MARGIN_MM);
    let usable = page_width.value - 2.0 * margin.value;

    let mut page = document
        .pages_mut()
        .create_page_at_end(PdfPagePaperSize::Custom(page_width, page_height))
        .map_err(layout_err)?;

    // Cursor is the top edge of the next block, in points from the bottom.
    let mut cursor = page_height.value - margin.value;
    let floor = margin.value;
    let mut dropped = 0usize;

    for block in blocks {
        match block {
            Block::Gap(mm) => cursor -= PdfPoints::from_mm(*mm).value,
            Block::Image { path, width_ratio } => {
                let img = match image::open(path) {
                    Ok(img) => img,
                    Err(e) => {
                        warn!("Skipping image '{}': {}", path.display(), e);
                        continue;
                    }
                };
                let w = usable * width_ratio.clamp(0.1, 1.0);
                let h = w * img.height() as f32 / img.width().max(1) as f32;
                if cursor - h < floor {
                    dropped += 1;
                    continue;
                }
                let x = margin.value + (usable - w) / 2.0;
                page.objects_mut()
                    .create_image_object(
                        PdfPoints::new(x),
                        PdfPoints::new(cursor - h),
                        &img,
                        Some(PdfPoints::new(w)),
                        None,
                    )
                    .map_err(layout_err)?;
                cursor -= h + 2.0;
            }
            Block::Title(text) | Block::Heading(text) | Block::Body(text) | Block::Caption(text) => {
                let size = block.font_size();
                let font = match block {
                    Block::Title(_) | Block::Heading(_) => bold,
                    _ => regular,
                };
                let max_chars = (usable / (size * GLYPH_WIDTH_EM)) as usize;
                let leading = size * 1.25;
                for line in wrap_text(text, max_chars) {
                    if cursor - leading < floor {
                        dropped += 1;
                        continue;
                    }
                    cursor -= leading;
                    if line.is_empty() {
                        continue;
                    }
                    page.objects_mut()
                        .create_text_object(
                            margin,
                            PdfPoints::new(cursor),
                            &line,
                            font,
                            PdfPoints::new(size),
                        )
                        .map_err(layout_err)?;
                }
            }
        }
    }

    if dropped > 0 {
        warn!("Receipt overflowed the page: {} lines/images dropped", dropped);
    }
    debug!("Laid out {} blocks, {:.0}pt left", blocks.len(), cursor - floor);

    // Write next to the target and rename so a spooler never reads half a file.
    let tmp = output.with_extension("pdf.part");
    document
        .save_to_file(&tmp)
        .map_err(|e| RenderError::Write {
            path: tmp.clone(),
            detail: format!("{:?}", e),
        })?;
    std::fs::rename(&tmp, output).map_err(|e| RenderError::Write {
        path: output.to_path_buf(),
        detail: e.to_string(),
    })?;

    info!("Receipt written to {}", output.display());
    Ok(())
}
