use chrono::{DateTime, Utc};
use printpdf::{BuiltinFont, IndirectFontRef, Mm, PdfDocument, PdfDocumentReference, PdfLayerReference};

use super::format::display_rows;
use super::intake::FileRef;
use super::schema::FormSchema;
use super::submissions::SubmissionData;

#[derive(Debug, Clone)]
pub struct RenderedPdf {
    pub bytes: bytes::Bytes,
    pub size_bytes: usize,
}

impl RenderedPdf {
    pub fn new(bytes: Vec<u8>) -> Self {
        let size_bytes = bytes.len();
        Self {
            bytes: bytes.into(),
            size_bytes,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PdfError {
    #[error("pdf backend error: {0}")]
    Backend(String),
    #[error("pdf rendering timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("pdf rendering aborted: {0}")]
    Aborted(String),
}

/// Produces the record-keeping document for a submission.
pub trait PdfRenderer: Send + Sync {
    fn render(
        &self,
        schema: &FormSchema,
        data: &SubmissionData,
        files: &[FileRef],
    ) -> Result<RenderedPdf, PdfError>;
}

const PAGE_WIDTH: f32 = 210.0;
const PAGE_HEIGHT: f32 = 297.0;
const MARGIN_X: f32 = 15.0;
const MARGIN_TOP: f32 = 20.0;
const MARGIN_BOTTOM: f32 = 20.0;
const WRAP_COLUMNS: usize = 95;

/// A4 renderer on top of the PDF built-in Helvetica faces.
#[derive(Debug, Clone, Default)]
pub struct SubmissionPdfRenderer;

impl PdfRenderer for SubmissionPdfRenderer {
    fn render(
        &self,
        schema: &FormSchema,
        data: &SubmissionData,
        files: &[FileRef],
    ) -> Result<RenderedPdf, PdfError> {
        self.render_at(schema, data, files, Utc::now())
    }
}

impl SubmissionPdfRenderer {
    pub fn render_at(
        &self,
        schema: &FormSchema,
        data: &SubmissionData,
        files: &[FileRef],
        generated_at: DateTime<Utc>,
    ) -> Result<RenderedPdf, PdfError> {
        let (doc, page, layer) = PdfDocument::new(
            schema.name.as_str(),
            Mm(PAGE_WIDTH),
            Mm(PAGE_HEIGHT),
            "content",
        );
        let regular = doc.add_builtin_font(BuiltinFont::Helvetica).map_err(backend)?;
        let bold = doc.add_builtin_font(BuiltinFont::HelveticaBold).map_err(backend)?;
        let layer = doc.get_page(page).get_layer(layer);
        let mut cursor = Cursor {
            doc: &doc,
            layer,
            y: PAGE_HEIGHT - MARGIN_TOP,
        };
        let stamp = generated_at.format("%d/%m/%Y %H:%M UTC").to_string();

        cursor.line(&schema.name, 16.0, &bold);
        if let Some(description) = schema.description.as_deref().filter(|d| !d.is_empty()) {
            cursor.paragraph(description, 10.0, &regular);
        }
        cursor.gap(3.0);
        cursor.line(&format!("Submission Date: {stamp}"), 10.0, &regular);
        cursor.gap(4.0);

        let rows = display_rows(schema, data);
        if rows.is_empty() {
            cursor.line("No data submitted.", 11.0, &regular);
        }
        for (label, value) in rows {
            cursor.line(&label, 11.0, &bold);
            cursor.paragraph(&value, 11.0, &regular);
            cursor.gap(2.0);
        }

        if !files.is_empty() {
            let names: Vec<&str> = files.iter().map(|file| file.name.as_str()).collect();
            cursor.line("Attached Files", 11.0, &bold);
            cursor.paragraph(&names.join(", "), 11.0, &regular);
        }

        cursor.gap(6.0);
        cursor.line(&format!("Generated on {stamp}"), 8.0, &regular);

        let bytes = doc.save_to_bytes().map_err(backend)?;
        Ok(RenderedPdf::new(bytes))
    }
}

fn backend(err: printpdf::Error) -> PdfError {
    PdfError::Backend(err.to_string())
}

struct Cursor<'a> {
    doc: &'a PdfDocumentReference,
    layer: PdfLayerReference,
    y: f32,
}

impl Cursor<'_> {
    fn line(&mut self, text: &str, size: f32, font: &IndirectFontRef) {
        let height = size * 0.3528 * 1.4;
        if self.y - height < MARGIN_BOTTOM {
            let (page, layer) = self.doc.add_page(Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "content");
            self.layer = self.doc.get_page(page).get_layer(layer);
            self.y = PAGE_HEIGHT - MARGIN_TOP;
        }
        self.y -= height;
        self.layer
            .use_text(latin1(text), size, Mm(MARGIN_X), Mm(self.y), font);
    }

    fn paragraph(&mut self, text: &str, size: f32, font: &IndirectFontRef) {
        for raw_line in text.lines() {
            for wrapped in wrap(raw_line, WRAP_COLUMNS) {
                self.line(&wrapped, size, font);
            }
        }
    }

    fn gap(&mut self, mm: f32) {
        self.y -= mm;
    }
}

/// Built-in PDF fonts only cover Latin-1.
fn latin1(text: &str) -> String {
    text.chars()
        .map(|ch| if (ch as u32) < 0x100 && !ch.is_control() { ch } else { '?' })
        .collect()
}

fn wrap(line: &str, columns: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in line.split_whitespace() {
        let mut word = word.to_string();
        while word.chars().count() > columns {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            let split: String = word.chars().take(columns).collect();
            word = word.chars().skip(columns).collect();
            lines.push(split);
        }
        let needed = if current.is_empty() { 0 } else { 1 } + word.chars().count();
        if current.chars().count() + needed > columns {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&word);
    }
    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}
