//! First-page text and image extraction using lopdf.

use image::{DynamicImage, GrayImage, RgbImage};
use lopdf::{Dictionary, Document, Object, ObjectId};
use tracing::{debug, trace};

use super::{PageContent, Result};
use crate::error::PdfError;

const FIRST_PAGE: u32 = 1;

/// Reads the first page of a PDF.
pub struct FirstPageExtractor {
    document: Document,
}

impl FirstPageExtractor {
    /// Parse a PDF from bytes, decrypting it if it uses an empty password.
    pub fn load(data: &[u8]) -> Result<Self> {
        let mut document = Document::load_mem(data).map_err(|e| PdfError::Parse(e.to_string()))?;

        if document.is_encrypted() {
            if document.decrypt("").is_err() {
                return Err(PdfError::Encrypted);
            }
            debug!("Decrypted PDF with empty password");
        }

        let page_count = document.get_pages().len();
        if page_count == 0 {
            return Err(PdfError::NoPages);
        }

        debug!("Loaded PDF with {} pages, reading page {}", page_count, FIRST_PAGE);
        Ok(Self { document })
    }

    pub fn page_count(&self) -> u32 {
        self.document.get_pages().len() as u32
    }

    /// Text embedded in the first page.
    pub fn text(&self) -> Result<String> {
        self.document
            .extract_text(&[FIRST_PAGE])
            .map_err(|e| PdfError::TextExtraction(e.to_string()))
    }

    /// The largest decodable image on the first page.
    pub fn image(&self) -> Result<DynamicImage> {
        let page_id = self.first_page_id()?;

        let mut images: Vec<DynamicImage> = Vec::new();
        if let Some(resources) = self.page_resources(page_id) {
            if let Ok(xobjects) = resources.get(b"XObject") {
                if let Ok((_, Object::Dictionary(xobj_dict))) = self.document.dereference(xobjects) {
                    for (_name, obj_ref) in xobj_dict.iter() {
                        if let Ok((_, obj)) = self.document.dereference(obj_ref) {
                            if let Some(img) = self.decode_image(obj) {
                                images.push(img);
                            }
                        }
                    }
                }
            }
        }

        debug!("Found {} images on page {}", images.len(), FIRST_PAGE);
        images
            .into_iter()
            .max_by_key(|img| u64::from(img.width()) * u64::from(img.height()))
            .ok_or_else(|| PdfError::ImageExtraction("no decodable image on first page".to_string()))
    }

    /// Embedded text when it has at least `min_text_len` non-blank
    /// characters, otherwise the page image.
    pub fn content(&self, min_text_len: usize) -> Result<PageContent> {
        let text = self.text().unwrap_or_default();
        let meaningful = text.chars().filter(|c| !c.is_whitespace()).count();

        if meaningful >= min_text_len {
            debug!("Using {} characters of embedded text", meaningful);
            return Ok(PageContent::Text(text));
        }

        debug!("Embedded text too short ({} chars), falling back to page image", meaningful);
        self.image().map(PageContent::Image)
    }

    fn first_page_id(&self) -> Result<ObjectId> {
        self.document
            .get_pages()
            .get(&FIRST_PAGE)
            .copied()
            .ok_or(PdfError::NoPages)
    }

    fn decode_image(&self, obj: &Object) -> Option<DynamicImage> {
        let Object::Stream(stream) = obj else {
            return None;
        };
        let dict = &stream.dict;

        if dict.get(b"Subtype").ok()?.as_name().ok()? != b"Image" {
            return None;
        }

        let width = u32::try_from(dict.get(b"Width").ok()?.as_i64().ok()?).ok()?;
        let height = u32::try_from(dict.get(b"Height").ok()?.as_i64().ok()?).ok()?;
        trace!("Found image object: {}x{}", width, height);

        if let Ok(filter) = dict.get(b"Filter") {
            let filter_name = match filter {
                Object::Name(name) => Some(name.as_slice()),
                Object::Array(arr) => arr.first().and_then(|o| o.as_name().ok()),
                _ => None,
            };

            match filter_name {
                Some(b"DCTDecode") => {
                    return image::load_from_memory_with_format(&stream.content, image::ImageFormat::Jpeg)
                        .ok();
                }
                Some(b"JPXDecode") | Some(b"CCITTFaxDecode") | Some(b"JBIG2Decode") => {
                    trace!("Unsupported image filter");
                    return None;
                }
                _ => {}
            }
        }

        let data = stream
            .decompressed_content()
            .unwrap_or_else(|_| stream.content.clone());

        let color_space = dict
            .get(b"ColorSpace")
            .ok()
            .and_then(|o| match o {
                Object::Name(name) => Some(name.as_slice()),
                Object::Array(arr) => arr.first().and_then(|o| o.as_name().ok()),
                Object::Reference(r) => self.document.get_object(*r).ok().and_then(|o| o.as_name().ok()),
                _ => None,
            })
            .unwrap_or(b"DeviceRGB");

        let bits = dict
            .get(b"BitsPerComponent")
            .ok()
            .and_then(|o| o.as_i64().ok())
            .unwrap_or(8);

        raw_image(&data, width, height, color_space, bits)
    }

    /// Page resources, following `Parent` links for inherited entries.
    fn page_resources(&self, node_id: ObjectId) -> Option<Dictionary> {
        let Object::Dictionary(dict) = self.document.get_object(node_id).ok()? else {
            return None;
        };

        if let Ok(resources) = dict.get(b"Resources") {
            if let Ok((_, Object::Dictionary(res_dict))) = self.document.dereference(resources) {
                return Some(res_dict.clone());
            }
        }

        match dict.get(b"Parent") {
            Ok(Object::Reference(parent_id)) => self.page_resources(*parent_id),
            _ => None,
        }
    }
}

fn raw_image(data: &[u8], width: u32, height: u32, color_space: &[u8], bits: i64) -> Option<DynamicImage> {
    if bits != 8 {
        trace!("Unsupported bits per component: {}", bits);
        return None;
    }

    let pixels = (width as usize).checked_mul(height as usize)?;
    match color_space {
        b"DeviceRGB" | b"RGB" => {
            let len = pixels.checked_mul(3)?;
            RgbImage::from_raw(width, height, data.get(..len)?.to_vec()).map(DynamicImage::ImageRgb8)
        }
        b"DeviceGray" | b"G" => {
            GrayImage::from_raw(width, height, data.get(..pixels)?.to_vec()).map(DynamicImage::ImageLuma8)
        }
        _ => {
            trace!("Unsupported color space {:?}", String::from_utf8_lossy(color_space));
            None
        }
    }
}
