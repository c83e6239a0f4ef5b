//! Signature form fields and their appearance

use lopdf::{Dictionary, Object, ObjectId, Stream};

use super::{text_string, PdfSignature};

/// Replace characters that cannot appear in a WinAnsi text operand
fn escape_content_string(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '(' => "\\(".to_string(),
            ')' => "\\)".to_string(),
            '\\' => "\\\\".to_string(),
            _ if c.is_ascii() && !c.is_ascii_control() => c.to_string(),
            _ => "?".to_string(),
        })
        .collect()
}

/// A visible signature field to be placed on a page
pub struct SignatureField {
    pub name: String,
    /// `[x, y, width, height]` in PDF user space
    pub rect: [f64; 4],
    pub signature: Option<PdfSignature>,
}

impl SignatureField {
    /// Field in the bottom-left corner, 200x50 points
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rect: [10.0, 10.0, 200.0, 50.0],
            signature: None,
        }
    }

    pub fn with_rect(mut self, rect: [f64; 4]) -> Self {
        self.rect = rect;
        self
    }

    pub fn with_signature(mut self, signature: PdfSignature) -> Self {
        self.signature = Some(signature);
        self
    }

    /// Annotation rectangle as `[llx lly urx ury]`
    pub fn annotation_rect(&self) -> Object {
        let [x, y, width, height] = self.rect;
        Object::Array(vec![
            Object::Real(x as f32),
            Object::Real(y as f32),
            Object::Real((x + width) as f32),
            Object::Real((y + height) as f32),
        ])
    }

    /// Widget annotation merged with its signature field
    pub fn widget(&self, signature: ObjectId, appearance: ObjectId, page: ObjectId) -> Dictionary {
        let mut widget = Dictionary::new();
        widget.set("Type", Object::Name(b"Annot".to_vec()));
        widget.set("Subtype", Object::Name(b"Widget".to_vec()));
        widget.set("FT", Object::Name(b"Sig".to_vec()));
        widget.set("T", text_string(&self.name));
        widget.set("V", Object::Reference(signature));
        widget.set("Rect", self.annotation_rect());
        // Print
        widget.set("F", Object::Integer(4));
        widget.set("P", Object::Reference(page));

        let mut appearances = Dictionary::new();
        appearances.set("N", Object::Reference(appearance));
        widget.set("AP", Object::Dictionary(appearances));
        widget
    }

    /// Normal appearance: a framed box with the signer name and reason
    pub fn appearance_stream(&self, signer: &str, reason: Option<&str>) -> Stream {
        let width = self.rect[2].abs();
        let height = self.rect[3].abs();

        let font_size = (height * 0.25).clamp(6.0, 10.0);
        let line1_y = height - font_size - 2.0;

        let content = format!(
            "q\n\
0.9 0.95 1 rg\n\
0 0 {w} {h} re f\n\
0.2 0.4 0.8 RG\n\
1 w\n\
0.5 0.5 {w2} {h2} re S\n\
0 0 0 rg\n\
BT\n\
/F1 {fs} Tf\n\
4 {y1} Td\n\
(Signed by {signer}) Tj\n\
0 -{fs2} Td\n\
({reason}) Tj\n\
ET\n\
Q",
            w = width,
            h = height,
            w2 = width - 1.0,
            h2 = height - 1.0,
            fs = font_size,
            y1 = line1_y,
            fs2 = font_size + 2.0,
            signer = escape_content_string(signer),
            reason = escape_content_string(reason.unwrap_or("")),
        );

        let mut dict = Dictionary::new();
        dict.set("Type", Object::Name(b"XObject".to_vec()));
        dict.set("Subtype", Object::Name(b"Form".to_vec()));
        dict.set("FormType", Object::Integer(1));
        dict.set(
            "BBox",
            Object::Array(vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(width as f32),
                Object::Real(height as f32),
            ]),
        );

        let mut font = Dictionary::new();
        font.set("Type", Object::Name(b"Font".to_vec()));
        font.set("Subtype", Object::Name(b"Type1".to_vec()));
        font.set("BaseFont", Object::Name(b"Helvetica".to_vec()));
        let mut fonts = Dictionary::new();
        fonts.set("F1", Object::Dictionary(font));
        let mut resources = Dictionary::new();
        resources.set("Font", Object::Dictionary(fonts));
        dict.set("Resources", Object::Dictionary(resources));

        Stream::new(dict, content.into_bytes())
    }
}

/// Fresh AcroForm holding one field
pub fn acroform_with(field: ObjectId) -> Dictionary {
    let mut acroform = Dictionary::new();
    acroform.set("Fields", Object::Array(vec![Object::Reference(field)]));
    // SignaturesExist | AppendOnly
    acroform.set("SigFlags", Object::Integer(3));
    acroform
}

/// Field name that does not clash with `existing`
pub fn unique_field_name(base: &str, existing: &[Vec<u8>]) -> String {
    if !existing.iter().any(|name| name.as_slice() == base.as_bytes()) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{}_{}", base, n))
        .find(|candidate| !existing.iter().any(|name| name.as_slice() == candidate.as_bytes()))
        .unwrap_or_else(|| base.to_string())
}

/// Field names (`T`) of the given field dictionaries
pub fn field_names<'a>(fields: impl Iterator<Item = &'a Dictionary>) -> Vec<Vec<u8>> {
    fields
        .filter_map(|field| match field.get(b"T") {
            Ok(Object::String(name, _)) => Some(name.clone()),
            _ => None,
        })
        .collect()
}
