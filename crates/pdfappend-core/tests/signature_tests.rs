//! Signing through the appender and validating the result

mod common;

use lopdf::{Document, Object};
use pdfappend_core::{
    validate_signatures, AppendError, Appender, Handle, PdfSignature, Pkcs7Handler,
    SignatureField, SignatureHandler, XrefFormat,
};
use pretty_assertions::assert_eq;
use shared_crypto::EphemeralIdentity;

fn signature(name: &str) -> PdfSignature {
    PdfSignature::new(Pkcs7Handler::new(EphemeralIdentity::generate().with_name(name)))
        .with_reason("Approved")
        .with_location("Test Lab")
}

fn verifier() -> Pkcs7Handler<EphemeralIdentity> {
    Pkcs7Handler::new(EphemeralIdentity::generate())
}

fn sign_and_write(original: &[u8], fields: Vec<(u32, SignatureField)>) -> Vec<u8> {
    let mut appender = Appender::load(original.to_vec()).unwrap();
    for (page, field) in fields {
        appender.sign(page, field).unwrap();
    }
    let mut out = Vec::new();
    let summary = appender.write(&mut out).unwrap();
    assert_eq!(summary.total_len, out.len());
    out
}

#[test]
fn test_signed_document_validates() {
    let original = common::pdf(2);
    let field = SignatureField::new("Signature1").with_signature(signature("Alice"));
    let out = sign_and_write(&original, vec![(1, field)]);

    assert!(out.starts_with(&original));
    assert_eq!(common::page_count(&out), 2);

    let verifier = verifier();
    let reports = validate_signatures(&out, &[&verifier as &dyn SignatureHandler]).unwrap();
    assert_eq!(reports.len(), 1);

    let report = &reports[0];
    assert_eq!(report.field, "Signature1");
    assert_eq!(report.sub_filter, "adbe.pkcs7.detached");
    assert!(report.covers_document);
    assert!(report.valid);

    // Everything but the Contents value is covered
    let (first, second) = (report.byte_range[0], report.byte_range[1]);
    assert_eq!(first.0, 0);
    assert_eq!(out[first.0 + first.1], b'<');
    assert_eq!(out[second.0 - 1], b'>');
    assert_eq!(second.0 + second.1, out.len());
}

#[test]
fn test_edit_and_sign_table_document() {
    let original = common::table_pdf(2);
    let mut appender = Appender::load(original.clone()).unwrap();
    let page = appender.page(1).unwrap();
    let content_id = appender
        .object(page)
        .unwrap()
        .as_dict()
        .unwrap()
        .get(b"Contents")
        .unwrap()
        .as_reference()
        .unwrap();
    appender
        .object_mut(Handle::baseline(content_id))
        .unwrap()
        .as_stream_mut()
        .unwrap()
        .set_content(b"BT /F1 12 Tf 72 700 Td (Edited) Tj ET".to_vec());

    let field = SignatureField::new("Signature1").with_signature(signature("Carol"));
    appender.sign(1, field).unwrap();

    let mut out = Vec::new();
    let summary = appender.write(&mut out).unwrap();
    assert_eq!(summary.xref_format, XrefFormat::Table);
    assert_eq!(summary.signatures, 1);
    assert!(out.starts_with(&original));

    let revision = String::from_utf8_lossy(&out[original.len()..]).into_owned();
    assert!(revision.contains("\nxref\n"));
    assert!(revision.contains("trailer"));

    // The edited stream is written under its old number
    let doc = Document::load_mem(&out).unwrap();
    let page_id = doc.get_pages()[&1];
    assert_eq!(page_id, page.id);
    let contents = doc
        .get_object(page_id)
        .unwrap()
        .as_dict()
        .unwrap()
        .get(b"Contents")
        .unwrap()
        .as_reference()
        .unwrap();
    assert_eq!(contents, content_id);
    let text = String::from_utf8_lossy(&doc.get_page_content(page_id).unwrap()).into_owned();
    assert!(text.contains("(Edited)"));

    let verifier = verifier();
    let reports = validate_signatures(&out, &[&verifier as &dyn SignatureHandler]).unwrap();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].valid);
    assert!(reports[0].covers_document);
}

#[test]
fn test_signature_is_registered_on_page_and_form() {
    let original = common::pdf(1);
    let field = SignatureField::new("Approval")
        .with_rect([300.0, 100.0, 180.0, 60.0])
        .with_signature(signature("Bob"));
    let out = sign_and_write(&original, vec![(1, field)]);

    let doc = Document::load_mem(&out).unwrap();
    let page_id = doc.get_pages()[&1];
    let page = doc.get_object(page_id).unwrap().as_dict().unwrap();
    let annots = page.get(b"Annots").unwrap().as_array().unwrap();
    assert_eq!(annots.len(), 1);
    let widget_id = annots[0].as_reference().unwrap();

    let catalog_id = doc.trailer.get(b"Root").unwrap().as_reference().unwrap();
    let catalog = doc.get_object(catalog_id).unwrap().as_dict().unwrap();
    let acroform_id = catalog.get(b"AcroForm").unwrap().as_reference().unwrap();
    let acroform = doc.get_object(acroform_id).unwrap().as_dict().unwrap();
    assert_eq!(acroform.get(b"SigFlags").unwrap().as_i64().unwrap(), 3);
    let fields = acroform.get(b"Fields").unwrap().as_array().unwrap();
    assert_eq!(fields[0].as_reference().unwrap(), widget_id);

    let widget = doc.get_object(widget_id).unwrap().as_dict().unwrap();
    assert_eq!(widget.get(b"P").unwrap().as_reference().unwrap(), page_id);
    assert_eq!(widget.get(b"FT").unwrap().as_name().unwrap(), b"Sig");
}

#[test]
fn test_multiple_signatures_in_one_revision() {
    let original = common::pdf(2);
    let out = sign_and_write(
        &original,
        vec![
            (1, SignatureField::new("Signature1").with_signature(signature("Alice"))),
            (2, SignatureField::new("Signature1").with_signature(signature("Bob"))),
        ],
    );

    let verifier = verifier();
    let reports = validate_signatures(&out, &[&verifier as &dyn SignatureHandler]).unwrap();
    assert_eq!(reports.len(), 2);

    let mut names: Vec<&str> = reports.iter().map(|r| r.field.as_str()).collect();
    names.sort_unstable();
    assert_eq!(names, vec!["Signature1", "Signature1_2"]);

    for report in &reports {
        assert!(report.valid, "{} did not validate", report.field);
        assert!(report.covers_document);
        // One gap per payload: three ranges around two Contents values
        assert_eq!(report.byte_range.len(), 3);
        for pair in report.byte_range.windows(2) {
            let (offset, length) = pair[0];
            assert!(offset + length < pair[1].0, "ranges overlap or touch");
        }
    }
    assert_eq!(reports[0].byte_range, reports[1].byte_range);
}

#[test]
fn test_tampering_breaks_the_signature() {
    let original = common::pdf(1);
    let field = SignatureField::new("Signature1").with_signature(signature("Alice"));
    let mut out = sign_and_write(&original, vec![(1, field)]);

    let needle = b"Signed by Alice";
    let position = out
        .windows(needle.len())
        .position(|window| window == needle)
        .unwrap();
    out[position] = b'Z';

    let verifier = verifier();
    let reports = validate_signatures(&out, &[&verifier as &dyn SignatureHandler]).unwrap();
    assert!(!reports[0].valid);
}

#[test]
fn test_unknown_sub_filter_is_reported_invalid() {
    let original = common::pdf(1);
    let field = SignatureField::new("Signature1").with_signature(signature("Alice"));
    let out = sign_and_write(&original, vec![(1, field)]);

    let reports = validate_signatures(&out, &[]).unwrap();
    assert_eq!(reports.len(), 1);
    assert!(!reports[0].valid);
}

#[test]
fn test_field_without_signature() {
    let mut appender = Appender::load(common::pdf(1)).unwrap();
    assert!(matches!(
        appender.sign(1, SignatureField::new("Empty")),
        Err(AppendError::MissingSignature)
    ));
}

#[test]
fn test_reservation_too_small_leaves_sink_empty() {
    let mut appender = Appender::load(common::pdf(1)).unwrap();
    let handler = Pkcs7Handler::new(EphemeralIdentity::generate()).with_reserve(64);
    appender
        .sign(1, SignatureField::new("Tiny").with_signature(PdfSignature::new(handler)))
        .unwrap();

    let mut sink = Vec::new();
    assert!(matches!(
        appender.write(&mut sink),
        Err(AppendError::SignatureTooLarge { .. })
    ));
    assert!(sink.is_empty());

    // A failed write still consumes the appender
    assert!(matches!(
        appender.write(&mut sink),
        Err(AppendError::AlreadyWritten)
    ));
    assert!(sink.is_empty());
}

#[test]
fn test_signing_a_second_revision() {
    let original = common::pdf(1);
    let first = sign_and_write(
        &original,
        vec![(1, SignatureField::new("Author").with_signature(signature("Alice")))],
    );
    let second = sign_and_write(
        &first,
        vec![(1, SignatureField::new("Reviewer").with_signature(signature("Bob")))],
    );
    assert!(second.starts_with(&first));

    let verifier = verifier();
    let reports = validate_signatures(&second, &[&verifier as &dyn SignatureHandler]).unwrap();
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|report| report.valid));

    let author = reports.iter().find(|r| r.field == "Author").unwrap();
    let reviewer = reports.iter().find(|r| r.field == "Reviewer").unwrap();
    // The first signature covers its own revision only
    assert!(!author.covers_document);
    assert!(reviewer.covers_document);

    let doc = Document::load_mem(&second).unwrap();
    let page = doc.get_object(doc.get_pages()[&1]).unwrap().as_dict().unwrap();
    let annots = page.get(b"Annots").unwrap().as_array().unwrap();
    assert_eq!(annots.len(), 2);
    assert!(annots.iter().all(|annot| matches!(annot, Object::Reference(_))));
}
