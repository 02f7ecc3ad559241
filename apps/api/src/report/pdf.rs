//! Low-level PDF writer over a hand-built lopdf object graph.
//!
//! Pages are buffered as content-stream text plus the image XObjects they
//! reference; `finish` assembles the page tree, catalog and trailer. Fonts
//! are the base-14 Helvetica pair, so no font program is embedded. JPEG
//! uploads pass through as `DCTDecode` streams; every other format is
//! re-encoded as raw RGB.

use image::GenericImageView;
use lopdf::{dictionary, Document, Object, ObjectId, Stream};

use crate::report::ComposeError;

pub const PAGE_WIDTH: f32 = 612.0;
pub const PAGE_HEIGHT: f32 = 792.0;

/// A decoded upload ready for embedding: pixel dimensions plus the stream
/// bytes in whichever encoding the PDF will carry.
pub struct PreparedImage {
    pub width: u32,
    pub height: u32,
    data: Vec<u8>,
    encoding: Encoding,
}

/// Stream encoding of an embedded image. The DCTDecode colorspace must match
/// the JPEG's actual pixel format, so passthrough is limited to the formats
/// whose colorspace is declared here; everything else re-encodes as raw RGB.
enum Encoding {
    JpegRgb,
    JpegGray,
    RawRgb,
}

impl PreparedImage {
    fn colorspace(&self) -> &'static str {
        match self.encoding {
            Encoding::JpegGray => "DeviceGray",
            Encoding::JpegRgb | Encoding::RawRgb => "DeviceRGB",
        }
    }

    fn is_dct(&self) -> bool {
        matches!(self.encoding, Encoding::JpegRgb | Encoding::JpegGray)
    }
}

/// Decodes an uploaded blob for embedding. Fails on unreadable image data —
/// the composer turns that into a visible placeholder, not a fatal error.
pub fn prepare_image(blob: &[u8]) -> Result<PreparedImage, ComposeError> {
    let img = image::load_from_memory(blob)
        .map_err(|e| ComposeError::Image(format!("failed to decode image: {e}")))?;
    let (width, height) = img.dimensions();

    // RGB and grayscale JPEG data embeds as-is with a DCTDecode filter; a
    // JPEG in any other pixel format (e.g. CMYK) goes through the raw path.
    let jpeg = blob.starts_with(&[0xFF, 0xD8]);
    let (data, encoding) = match (jpeg, img.color()) {
        (true, image::ColorType::Rgb8) => (blob.to_vec(), Encoding::JpegRgb),
        (true, image::ColorType::L8) => (blob.to_vec(), Encoding::JpegGray),
        _ => (img.to_rgb8().into_raw(), Encoding::RawRgb),
    };

    Ok(PreparedImage {
        width,
        height,
        data,
        encoding,
    })
}

struct PageBuffer {
    content: String,
    xobjects: Vec<(String, ObjectId)>,
}

pub struct PdfWriter {
    doc: Document,
    pages_id: ObjectId,
    font_regular_id: ObjectId,
    font_bold_id: ObjectId,
    page_ids: Vec<ObjectId>,
    current: Option<PageBuffer>,
    image_counter: usize,
}

impl PdfWriter {
    pub fn new() -> Self {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let font_regular_id = doc.new_object_id();
        doc.objects.insert(
            font_regular_id,
            Object::Dictionary(dictionary! {
                "Type" => "Font",
                "Subtype" => "Type1",
                "BaseFont" => "Helvetica",
            }),
        );

        let font_bold_id = doc.new_object_id();
        doc.objects.insert(
            font_bold_id,
            Object::Dictionary(dictionary! {
                "Type" => "Font",
                "Subtype" => "Type1",
                "BaseFont" => "Helvetica-Bold",
            }),
        );

        Self {
            doc,
            pages_id,
            font_regular_id,
            font_bold_id,
            page_ids: Vec::new(),
            current: None,
            image_counter: 0,
        }
    }

    /// Flushes the current page (if any) and opens a fresh one.
    pub fn start_page(&mut self) {
        self.flush_page();
        self.current = Some(PageBuffer {
            content: String::new(),
            xobjects: Vec::new(),
        });
    }

    fn page(&mut self) -> &mut PageBuffer {
        if self.current.is_none() {
            self.start_page();
        }
        self.current.as_mut().expect("page buffer just created")
    }

    /// Draws a single line of text with its baseline at (x, y).
    pub fn draw_text(&mut self, x: f32, y: f32, size: f32, bold: bool, text: &str) {
        let font = if bold { "F2" } else { "F1" };
        let escaped = escape_pdf_string(text);
        let op = format!("BT\n/{font} {size:.1} Tf\n{x:.2} {y:.2} Td\n({escaped}) Tj\nET\n");
        self.page().content.push_str(&op);
    }

    /// Draws a horizontal rule.
    pub fn draw_rule(&mut self, x1: f32, x2: f32, y: f32) {
        let op = format!("0.5 w\n{x1:.2} {y:.2} m\n{x2:.2} {y:.2} l\nS\n");
        self.page().content.push_str(&op);
    }

    /// Places a prepared image scaled into a w × h box with its bottom-left
    /// corner at (x, y).
    pub fn draw_image(&mut self, img: &PreparedImage, x: f32, y: f32, w: f32, h: f32) {
        let mut dict = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => img.width as i64,
            "Height" => img.height as i64,
            "ColorSpace" => img.colorspace(),
            "BitsPerComponent" => 8,
        };
        if img.is_dct() {
            dict.set("Filter", "DCTDecode");
        }
        let stream = Stream::new(dict, img.data.clone());

        let image_id = self.doc.new_object_id();
        self.doc.objects.insert(image_id, Object::Stream(stream));

        self.image_counter += 1;
        let name = format!("Im{}", self.image_counter);
        let op = format!("q\n{w:.2} 0 0 {h:.2} {x:.2} {y:.2} cm\n/{name} Do\nQ\n");

        let page = self.page();
        page.xobjects.push((name, image_id));
        page.content.push_str(&op);
    }

    fn flush_page(&mut self) {
        let Some(buffer) = self.current.take() else {
            return;
        };

        let content_id = self.doc.new_object_id();
        self.doc.objects.insert(
            content_id,
            Object::Stream(Stream::new(dictionary! {}, buffer.content.into_bytes())),
        );

        let mut xobjects = lopdf::Dictionary::new();
        for (name, id) in buffer.xobjects {
            xobjects.set(name, id);
        }

        let resources = dictionary! {
            "Font" => dictionary! {
                "F1" => self.font_regular_id,
                "F2" => self.font_bold_id,
            },
            "XObject" => xobjects,
        };

        let page_id = self.doc.new_object_id();
        self.doc.objects.insert(
            page_id,
            Object::Dictionary(dictionary! {
                "Type" => "Page",
                "Parent" => self.pages_id,
                "MediaBox" => vec![
                    0.into(),
                    0.into(),
                    (PAGE_WIDTH as i64).into(),
                    (PAGE_HEIGHT as i64).into(),
                ],
                "Resources" => resources,
                "Contents" => content_id,
            }),
        );
        self.page_ids.push(page_id);
    }

    /// Assembles the page tree and serializes the document.
    pub fn finish(mut self) -> Result<Vec<u8>, ComposeError> {
        self.flush_page();
        if self.page_ids.is_empty() {
            self.start_page();
            self.flush_page();
        }

        let kids: Vec<Object> = self.page_ids.iter().map(|id| (*id).into()).collect();
        let count = self.page_ids.len() as i64;
        self.doc.objects.insert(
            self.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );

        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);

        let mut buffer = Vec::new();
        self.doc
            .save_to(&mut buffer)
            .map_err(|e| ComposeError::Pdf(e.to_string()))?;
        Ok(buffer)
    }
}

impl Default for PdfWriter {
    fn default() -> Self {
        Self::new()
    }
}

fn escape_pdf_string(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '(' => "\\(".to_string(),
            ')' => "\\)".to_string(),
            '\\' => "\\\\".to_string(),
            c if c.is_ascii() && !c.is_control() => c.to_string(),
            _ => " ".to_string(),
        })
        .collect()
}
