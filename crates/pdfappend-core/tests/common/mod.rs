//! Fixture documents built through lopdf

#![allow(dead_code)]

use lopdf::content::{Content, Operation};
use lopdf::xref::XrefType;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};

/// Text content stream drawing `text` at the top of the page
fn text_content(text: &str) -> Vec<u8> {
    let content = Content {
        operations: vec![
            Operation::new("BT", vec![]),
            Operation::new(
                "Tf",
                vec![Object::Name(b"F1".to_vec()), Object::Integer(12)],
            ),
            Operation::new("Td", vec![Object::Integer(72), Object::Integer(720)]),
            Operation::new("Tj", vec![Object::string_literal(text)]),
            Operation::new("ET", vec![]),
        ],
    };
    content.encode().unwrap()
}

fn font_resources(doc: &mut Document) -> ObjectId {
    let font = doc.add_object(Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Font".to_vec())),
        ("Subtype", Object::Name(b"Type1".to_vec())),
        ("BaseFont", Object::Name(b"Helvetica".to_vec())),
    ]));
    doc.add_object(Dictionary::from_iter(vec![(
        "Font",
        Object::Dictionary(Dictionary::from_iter(vec![("F1", Object::Reference(font))])),
    )]))
}

/// Document with `num_pages` text pages in a flat page tree
pub fn document(num_pages: u32, prefix: &str) -> Document {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let resources = font_resources(&mut doc);

    let mut kids = Vec::new();
    for i in 0..num_pages {
        let content = doc.add_object(Stream::new(
            Dictionary::new(),
            text_content(&format!("{} page {}", prefix, i + 1)),
        ));
        let page = doc.add_object(Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Page".to_vec())),
            ("Parent", Object::Reference(pages_id)),
            ("Contents", Object::Reference(content)),
        ]));
        kids.push(Object::Reference(page));
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Pages".to_vec())),
            ("Count", Object::Integer(kids.len() as i64)),
            ("Kids", Object::Array(kids)),
            ("Resources", Object::Reference(resources)),
            (
                "MediaBox",
                Object::Array(vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(612),
                    Object::Integer(792),
                ]),
            ),
        ])),
    );

    let catalog = doc.add_object(Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Catalog".to_vec())),
        ("Pages", Object::Reference(pages_id)),
    ]));
    doc.trailer.set("Root", Object::Reference(catalog));
    doc
}

pub fn save(doc: &mut Document) -> Vec<u8> {
    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

/// Serialized document with `num_pages` pages
pub fn pdf(num_pages: u32) -> Vec<u8> {
    save(&mut document(num_pages, "Test"))
}

/// Serialized document with a classic `xref` table and a two-level page tree
///
/// Pages sit under an intermediate node that carries the inherited
/// `MediaBox`, so any page-list change has to flatten them.
pub fn table_pdf(num_pages: u32) -> Vec<u8> {
    let mut doc = document(num_pages, "Table");
    doc.version = "1.4".to_string();
    doc.reference_table.cross_reference_type = XrefType::CrossReferenceTable;

    let root = doc
        .catalog()
        .unwrap()
        .get(b"Pages")
        .unwrap()
        .as_reference()
        .unwrap();
    let kids = doc
        .get_object(root)
        .unwrap()
        .as_dict()
        .unwrap()
        .get(b"Kids")
        .unwrap()
        .clone();
    let node = doc.add_object(Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Pages".to_vec())),
        ("Parent", Object::Reference(root)),
        ("Count", Object::Integer(num_pages as i64)),
        ("Kids", kids.clone()),
    ]));
    for kid in kids.as_array().unwrap() {
        doc.get_object_mut(kid.as_reference().unwrap())
            .unwrap()
            .as_dict_mut()
            .unwrap()
            .set("Parent", Object::Reference(node));
    }
    doc.get_object_mut(root)
        .unwrap()
        .as_dict_mut()
        .unwrap()
        .set("Kids", Object::Array(vec![Object::Reference(node)]));
    save(&mut doc)
}

/// Document whose first page names itself as `Parent`
pub fn self_parent_pdf(num_pages: u32) -> Vec<u8> {
    let mut doc = document(num_pages, "Loop");
    let page = doc.get_pages()[&1];
    doc.get_object_mut(page)
        .unwrap()
        .as_dict_mut()
        .unwrap()
        .set("Parent", Object::Reference(page));
    save(&mut doc)
}

/// Document whose catalog and page point at each other
pub fn cyclic_pdf() -> Vec<u8> {
    let mut doc = document(1, "Cycle");
    let catalog = doc.trailer.get(b"Root").unwrap().as_reference().unwrap();
    let page = doc.get_pages()[&1];
    doc.get_object_mut(page)
        .unwrap()
        .as_dict_mut()
        .unwrap()
        .set("Catalog", Object::Reference(catalog));
    save(&mut doc)
}

/// Page count as seen by a fresh parse
pub fn page_count(bytes: &[u8]) -> usize {
    Document::load_mem(bytes).unwrap().get_pages().len()
}

/// Index of the last `%%EOF` marker
pub fn last_eof(bytes: &[u8]) -> usize {
    bytes
        .windows(5)
        .rposition(|window| window == b"%%EOF")
        .unwrap()
}

/// Object numbers defined in `bytes[from..]`, cross-reference streams excluded
pub fn defined_objects(bytes: &[u8], from: usize) -> Vec<u32> {
    let text = String::from_utf8_lossy(&bytes[from..]);
    let mut numbers = Vec::new();
    let mut current: Option<u32> = None;
    let mut is_xref = false;
    for line in text.lines() {
        let mut parts = line.split_whitespace();
        if let (Some(number), Some(gen), Some("obj")) = (parts.next(), parts.next(), parts.next()) {
            if let (Ok(number), Ok(_)) = (number.parse::<u32>(), gen.parse::<u16>()) {
                current = Some(number);
                is_xref = false;
            }
        }
        if current.is_some() && line.contains("/XRef") {
            is_xref = true;
        }
        if line.trim() == "endobj" {
            if let Some(number) = current.take() {
                if !is_xref {
                    numbers.push(number);
                }
            }
        }
    }
    numbers
}
