//! Certificate rendering: turns a recorded request back into a printable A4 PDF.

use crate::{
    catalog::{FormData, ServiceCatalog, BIRTH_CERTIFICATE, UNKNOWN_SERVICE},
    entities::request,
    errors::ServiceError,
};
use lopdf::{
    content::{Content, Operation},
    dictionary, Document, Object, Stream,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::sync::Arc;
use tracing::{debug, instrument};
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

pub const PDF_CONTENT_TYPE: &str = "application/pdf";

const FOOTER: &str = "This is an electronically generated document";
const SIGNATURE_LINE: &str = "Authorized Signature: ______________________________";
const FALLBACK_FILE_LABEL: &str = "certificate";
const NAME_FIELDS: [&str; 3] = ["fullName", "businessName", "deceasedName"];

const HEIGHT_FIELD: &str = "height";
const WEIGHT_FIELD: &str = "weight";

// A4 in points
const PAGE_WIDTH: i64 = 595;
const PAGE_HEIGHT: i64 = 842;
const MARGIN: i64 = 36;
const ROW_SPACING: i64 = 22;
const ROW_X: i64 = MARGIN + 30;
const ROW_FONT_SIZE: i64 = 12;
const FOOTER_Y: i64 = 60;
const SIGNATURE_Y: i64 = 160;
// Nothing but the footer goes below this line
const CONTENT_FLOOR: i64 = 100;

/// Synthesised birth measurements, in tenths of a cm and hundredths of a kg.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Measurements {
    height_tenths_cm: u32,
    weight_hundredths_kg: u32,
}

impl Measurements {
    const HEIGHT_RANGE: std::ops::Range<u32> = 450..550;
    const WEIGHT_RANGE: std::ops::Range<u32> = 250..350;

    fn sample<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self {
            height_tenths_cm: rng.gen_range(Self::HEIGHT_RANGE),
            weight_hundredths_kg: rng.gen_range(Self::WEIGHT_RANGE),
        }
    }

    /// e.g. `48.3 cm`
    pub fn height(&self) -> String {
        format!(
            "{}.{} cm",
            self.height_tenths_cm / 10,
            self.height_tenths_cm % 10
        )
    }

    /// e.g. `3.07 kg`
    pub fn weight(&self) -> String {
        format!(
            "{}.{:02} kg",
            self.weight_hundredths_kg / 100,
            self.weight_hundredths_kg % 100
        )
    }
}

/// Source of the height/weight values printed on birth certificates that lack them.
pub trait MeasurementSource: Send + Sync {
    fn measurements(&self, record_id: Option<i32>) -> Measurements;
}

/// Fresh values on every render.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomMeasurements;

impl MeasurementSource for RandomMeasurements {
    fn measurements(&self, _record_id: Option<i32>) -> Measurements {
        Measurements::sample(&mut rand::thread_rng())
    }
}

/// Same values for every render of the same record.
#[derive(Debug, Default, Clone, Copy)]
pub struct SeededMeasurements;

impl MeasurementSource for SeededMeasurements {
    fn measurements(&self, record_id: Option<i32>) -> Measurements {
        let seed = record_id.map_or(0, |id| id as u32 as u64);
        Measurements::sample(&mut StdRng::seed_from_u64(seed))
    }
}

/// Text content of a certificate, independent of the output format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateLayout {
    pub issuer: String,
    pub portal: String,
    pub title: String,
    /// `"<label>: <value>"`
    pub rows: Vec<String>,
    pub signature: String,
    pub footer: String,
}

#[derive(Debug, Clone)]
pub struct RenderedCertificate {
    pub filename: String,
    pub bytes: Vec<u8>,
}

#[derive(Clone)]
pub struct CertificateRenderer {
    catalog: Arc<ServiceCatalog>,
    measurements: Arc<dyn MeasurementSource>,
    issuer_name: String,
    portal_name: String,
}

impl CertificateRenderer {
    pub fn new(
        catalog: Arc<ServiceCatalog>,
        measurements: Arc<dyn MeasurementSource>,
        issuer_name: impl Into<String>,
        portal_name: impl Into<String>,
    ) -> Self {
        Self {
            catalog,
            measurements,
            issuer_name: issuer_name.into(),
            portal_name: portal_name.into(),
        }
    }

    pub fn layout(
        &self,
        form_data: &FormData,
        service_type: &str,
        record_id: Option<i32>,
    ) -> CertificateLayout {
        let present = |name: &str| {
            form_data
                .get(name)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
        };

        let (title, mut rows) = match self.catalog.lookup(service_type) {
            Some(service) => (
                service.display_name.clone(),
                service
                    .fields
                    .iter()
                    .filter_map(|f| present(&f.name).map(|v| format!("{}: {}", f.label, v)))
                    .collect::<Vec<_>>(),
            ),
            None => (
                UNKNOWN_SERVICE.to_string(),
                form_data
                    .iter()
                    .filter(|(_, v)| !v.trim().is_empty())
                    .map(|(k, v)| format!("{}: {}", k, v.trim()))
                    .collect(),
            ),
        };

        if service_type == BIRTH_CERTIFICATE {
            match (present(HEIGHT_FIELD), present(WEIGHT_FIELD)) {
                (None, None) => {
                    // Never written back to the store
                    let m = self.measurements.measurements(record_id);
                    debug!(?record_id, "synthesising birth measurements");
                    rows.push(format!("Height: {}", m.height()));
                    rows.push(format!("Weight: {}", m.weight()));
                }
                (height, weight) => {
                    rows.extend(height.map(|h| format!("Height: {}", h)));
                    rows.extend(weight.map(|w| format!("Weight: {}", w)));
                }
            }
        }

        CertificateLayout {
            issuer: self.issuer_name.clone(),
            portal: self.portal_name.clone(),
            title,
            rows,
            signature: SIGNATURE_LINE.to_string(),
            footer: FOOTER.to_string(),
        }
    }

    #[instrument(skip(self, form_data))]
    pub fn render(
        &self,
        form_data: &FormData,
        service_type: &str,
        record_id: Option<i32>,
    ) -> Result<RenderedCertificate, ServiceError> {
        let layout = self.layout(form_data, service_type, record_id);
        let bytes = encode_pdf(&layout)?;
        Ok(RenderedCertificate {
            filename: certificate_filename(service_type, form_data),
            bytes,
        })
    }

    pub fn render_record(&self, record: &request::Model) -> Result<RenderedCertificate, ServiceError> {
        self.render(
            &form_data_from_json(&record.form_data),
            &record.service_type,
            Some(record.id),
        )
    }
}

/// Flattens stored form data; non-string values keep their JSON text.
pub fn form_data_from_json(value: &serde_json::Value) -> FormData {
    value
        .as_object()
        .map(|map| {
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| {
                    let text = match v {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), text)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// `<service>_<name>.pdf`, restricted to characters safe in a Content-Disposition header.
pub fn certificate_filename(service_type: &str, form_data: &FormData) -> String {
    let name = NAME_FIELDS
        .iter()
        .filter_map(|f| form_data.get(*f))
        .map(|v| v.trim())
        .find(|v| !v.is_empty())
        .unwrap_or(FALLBACK_FILE_LABEL);

    format!("{}_{}.pdf", sanitize(service_type), sanitize(name))
}

fn sanitize(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches(|c| c == '_' || c == '.');
    if trimmed.is_empty() {
        FALLBACK_FILE_LABEL.to_string()
    } else {
        trimmed.to_string()
    }
}

/// WinAnsi bytes. Accented letters outside Latin-1 lose their marks
/// (`Ọ` prints as `O`); anything else unencodable becomes `?`.
fn pdf_text(text: &str) -> Object {
    let mut bytes = Vec::with_capacity(text.len());
    for c in text.nfc() {
        match winansi_byte(c) {
            Some(b) => bytes.push(b),
            None => {
                let base: Vec<u8> = std::iter::once(c)
                    .nfd()
                    .filter(|d| !is_combining_mark(*d))
                    .filter_map(winansi_byte)
                    .collect();
                if base.is_empty() {
                    if !is_combining_mark(c) {
                        bytes.push(b'?');
                    }
                } else {
                    bytes.extend(base);
                }
            }
        }
    }
    Object::string_literal(bytes)
}

fn winansi_byte(c: char) -> Option<u8> {
    match c {
        ' '..='~' | '\u{a0}'..='\u{ff}' => u8::try_from(u32::from(c)).ok(),
        '€' => Some(0x80),
        '…' => Some(0x85),
        '‘' => Some(0x91),
        '’' => Some(0x92),
        '“' => Some(0x93),
        '”' => Some(0x94),
        '•' => Some(0x95),
        '–' => Some(0x96),
        '—' => Some(0x97),
        _ => None,
    }
}

fn int(value: i64) -> Object {
    Object::Integer(value)
}

// Helvetica averages roughly half an em per glyph
fn text_width(text: &str, size: i64) -> i64 {
    text.chars().count() as i64 * size / 2
}

fn centered_x(text: &str, size: i64) -> i64 {
    ((PAGE_WIDTH - text_width(text, size)) / 2).max(MARGIN)
}

/// Splits a row into lines that fit between the row indent and the right margin.
fn wrap_row(row: &str, size: i64) -> Vec<String> {
    let max_chars = (((PAGE_WIDTH - MARGIN - ROW_X) * 2) / size).max(1) as usize;
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in row.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        // Unbroken runs longer than a line are cut
        while word.len() > max_chars {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            lines.push(word.drain(..max_chars).collect());
        }
        if word.is_empty() {
            continue;
        }
        let needed = current.chars().count() + usize::from(!current.is_empty()) + word.len();
        if needed > max_chars && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.extend(word);
    }
    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}

fn text_ops(ops: &mut Vec<Operation>, font: &str, size: i64, x: i64, y: i64, text: &str) {
    ops.push(Operation::new("BT", vec![]));
    ops.push(Operation::new("Tf", vec![font.into(), int(size)]));
    ops.push(Operation::new("Td", vec![int(x), int(y)]));
    ops.push(Operation::new("Tj", vec![pdf_text(text)]));
    ops.push(Operation::new("ET", vec![]));
}

/// Border, header and footer for one page; returns the operations and the first row's y.
fn page_frame(layout: &CertificateLayout, continued: bool) -> (Vec<Operation>, i64) {
    let mut ops = vec![
        Operation::new("w", vec![int(2)]),
        Operation::new(
            "re",
            vec![
                int(MARGIN / 2),
                int(MARGIN / 2),
                int(PAGE_WIDTH - MARGIN),
                int(PAGE_HEIGHT - MARGIN),
            ],
        ),
        Operation::new("S", vec![]),
    ];

    let mut y = PAGE_HEIGHT - 90;
    if continued {
        let heading = format!("{} (continued)", layout.title);
        text_ops(&mut ops, "F2", 14, centered_x(&heading, 14), y, &heading);
        y -= 40;
    } else {
        text_ops(&mut ops, "F2", 14, centered_x(&layout.issuer, 14), y, &layout.issuer);
        y -= 30;
        text_ops(&mut ops, "F2", 20, centered_x(&layout.portal, 20), y, &layout.portal);
        y -= 50;
        text_ops(&mut ops, "F2", 16, centered_x(&layout.title, 16), y, &layout.title);
        y -= 50;
    }
    text_ops(&mut ops, "F1", 10, centered_x(&layout.footer, 10), FOOTER_Y, &layout.footer);
    (ops, y)
}

fn encode_pdf(layout: &CertificateLayout) -> Result<Vec<u8>, ServiceError> {
    let (mut ops, mut y) = page_frame(layout, false);
    let mut pages = Vec::new();

    for line in layout.rows.iter().flat_map(|row| wrap_row(row, ROW_FONT_SIZE)) {
        if y < CONTENT_FLOOR {
            let (next, top) = page_frame(layout, true);
            pages.push(std::mem::replace(&mut ops, next));
            y = top;
        }
        text_ops(&mut ops, "F1", ROW_FONT_SIZE, ROW_X, y, &line);
        y -= ROW_SPACING;
    }

    let mut signature_y = (y - 40).min(SIGNATURE_Y);
    if signature_y < CONTENT_FLOOR {
        let (next, top) = page_frame(layout, true);
        pages.push(std::mem::replace(&mut ops, next));
        signature_y = (top - 40).min(SIGNATURE_Y);
    }
    text_ops(&mut ops, "F1", ROW_FONT_SIZE, ROW_X, signature_y, &layout.signature);
    pages.push(ops);

    if pages.len() > 1 {
        debug!(pages = pages.len(), rows = layout.rows.len(), "certificate spans several pages");
    }

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let bold_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica-Bold",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
            "F2" => bold_id,
        },
    });

    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());
    for operations in pages {
        let content = Content { operations }
            .encode()
            .map_err(|e| ServiceError::RenderError(e.to_string()))?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, content));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => int(count),
        "Resources" => resources_id,
        "MediaBox" => vec![int(0), int(0), int(PAGE_WIDTH), int(PAGE_HEIGHT)],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)
        .map_err(|e| ServiceError::RenderError(e.to_string()))?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;
    use rstest::rstest;
    use std::collections::HashSet;

    struct FixedMeasurements(Measurements);

    impl MeasurementSource for FixedMeasurements {
        fn measurements(&self, _record_id: Option<i32>) -> Measurements {
            self.0
        }
    }

    fn renderer(source: Arc<dyn MeasurementSource>) -> CertificateRenderer {
        CertificateRenderer::new(
            Arc::new(ServiceCatalog::standard()),
            source,
            "Federal Republic of Nigeria",
            "E-Gov MIS Portal",
        )
    }

    fn form(pairs: &[(&str, &str)]) -> FormData {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// `(x, y, text)` of every line drawn, page by page.
    fn page_lines(bytes: &[u8]) -> Vec<Vec<(i64, i64, String)>> {
        let doc = Document::load_mem(bytes).unwrap();
        doc.get_pages()
            .values()
            .map(|page_id| {
                let raw = doc.get_page_content(*page_id).unwrap();
                let (mut x, mut y) = (0, 0);
                let mut lines: Vec<(i64, i64, String)> = Vec::new();
                for op in Content::decode(&raw).unwrap().operations {
                    match op.operator.as_str() {
                        "Td" => {
                            x = op.operands[0].as_i64().unwrap();
                            y = op.operands[1].as_i64().unwrap();
                        }
                        "Tj" => {
                            let text = op.operands[0].as_str().unwrap();
                            lines.push((x, y, text.iter().map(|b| char::from(*b)).collect()));
                        }
                        _ => {}
                    }
                }
                lines
            })
            .collect()
    }

    fn birth_form() -> FormData {
        form(&[
            ("fullName", "Chidi Okeke"),
            ("dateOfBirth", "2024-03-01"),
            ("gender", "Male"),
            ("placeOfBirth", "Enugu"),
        ])
    }

    #[test]
    fn layout_follows_catalog_order_and_skips_blanks() {
        let r = renderer(Arc::new(RandomMeasurements));
        let data = form(&[
            ("paymentPurpose", "Levy"),
            ("fullName", "Ada Obi"),
            ("taxId", "  "),
            ("amount", "5000"),
        ]);
        let layout = r.layout(&data, "tax-receipt", Some(1));
        assert_eq!(layout.title, "Tax Receipt");
        assert_eq!(layout.portal, "E-Gov MIS Portal");
        assert_eq!(
            layout.rows,
            vec!["Full Name: Ada Obi", "Amount Paid: 5000", "Payment Purpose: Levy"]
        );
        assert_eq!(layout.footer, FOOTER);
    }

    #[test]
    fn birth_certificate_gets_measurements_when_both_absent() {
        let fixed = Measurements {
            height_tenths_cm: 483,
            weight_hundredths_kg: 307,
        };
        let r = renderer(Arc::new(FixedMeasurements(fixed)));
        let layout = r.layout(&birth_form(), BIRTH_CERTIFICATE, Some(4));
        let tail: Vec<_> = layout.rows.iter().rev().take(2).rev().cloned().collect();
        assert_eq!(tail, vec!["Height: 48.3 cm", "Weight: 3.07 kg"]);
    }

    #[test]
    fn recorded_measurements_are_not_replaced() {
        let r = renderer(Arc::new(RandomMeasurements));
        let mut data = birth_form();
        data.insert("height".into(), "51.0 cm".into());
        let layout = r.layout(&data, BIRTH_CERTIFICATE, Some(4));
        assert!(layout.rows.contains(&"Height: 51.0 cm".to_string()));
        assert!(!layout.rows.iter().any(|row| row.starts_with("Weight")));
    }

    #[test]
    fn other_services_never_get_measurements() {
        let r = renderer(Arc::new(RandomMeasurements));
        let layout = r.layout(&form(&[("fullName", "Ada Obi")]), "passport-application", None);
        assert!(!layout.rows.iter().any(|row| row.starts_with("Height")));
    }

    #[test]
    fn unknown_service_renders_sorted_raw_keys() {
        let r = renderer(Arc::new(RandomMeasurements));
        let data = form(&[("zeta", "last"), ("alpha", "first")]);
        let layout = r.layout(&data, "land-title", Some(9));
        assert_eq!(layout.title, UNKNOWN_SERVICE);
        assert_eq!(layout.rows, vec!["alpha: first", "zeta: last"]);
        assert!(r.render(&data, "land-title", Some(9)).is_ok());
    }

    #[test]
    fn random_measurements_stay_in_range() {
        let height = Regex::new(r"^(\d+\.\d) cm$").unwrap();
        let weight = Regex::new(r"^(\d+\.\d\d) kg$").unwrap();
        for _ in 0..500 {
            let m = RandomMeasurements.measurements(None);
            let h: f64 = height.captures(&m.height()).unwrap()[1].parse().unwrap();
            let w: f64 = weight.captures(&m.weight()).unwrap()[1].parse().unwrap();
            assert!((45.0..55.0).contains(&h), "height {}", h);
            assert!((2.5..3.5).contains(&w), "weight {}", w);
        }
    }

    #[test]
    fn seeded_measurements_are_stable_per_record() {
        assert_eq!(
            SeededMeasurements.measurements(Some(17)),
            SeededMeasurements.measurements(Some(17))
        );
    }

    #[test]
    fn non_birth_renders_are_byte_identical() {
        let r = renderer(Arc::new(RandomMeasurements));
        let data = form(&[("businessName", "Obi & Sons"), ("businessType", "Partnership")]);
        let first = r.render(&data, "business-registration", Some(2)).unwrap();
        let second = r.render(&data, "business-registration", Some(2)).unwrap();
        assert_eq!(first.bytes, second.bytes);
        assert!(first.bytes.starts_with(b"%PDF-1.5"));
        assert_eq!(first.filename, "business-registration_Obi___Sons.pdf");
    }

    #[test]
    fn pdf_contains_rows() {
        let r = renderer(Arc::new(SeededMeasurements));
        let rendered = r.render(&birth_form(), BIRTH_CERTIFICATE, Some(3)).unwrap();
        let text = String::from_utf8_lossy(&rendered.bytes);
        assert!(text.contains("(Full Name: Chidi Okeke)"));
        assert!(Regex::new(r"\(Height: \d+\.\d cm\)").unwrap().is_match(&text));
        assert!(text.contains("/Helvetica"));
    }

    #[rstest]
    #[case(&[("fullName", "Ada Obi")], "tax-receipt", "tax-receipt_Ada_Obi.pdf")]
    #[case(&[("deceasedName", "Late Chief")], "death-certificate", "death-certificate_Late_Chief.pdf")]
    #[case(&[("husbandName", "Emeka")], "marriage-certificate", "marriage-certificate_certificate.pdf")]
    #[case(&[("fullName", "  "), ("businessName", "Acme")], "x", "x_Acme.pdf")]
    #[case(&[("fullName", "\"/../etc\"")], "tax-receipt", "tax-receipt_etc.pdf")]
    fn filenames(#[case] pairs: &[(&str, &str)], #[case] service: &str, #[case] expected: &str) {
        assert_eq!(certificate_filename(service, &form(pairs)), expected);
    }

    #[test]
    fn stored_json_is_flattened() {
        let value = serde_json::json!({"fullName": "Ada", "amount": 5000, "note": null});
        let data = form_data_from_json(&value);
        assert_eq!(data.get("amount").map(String::as_str), Some("5000"));
        assert!(!data.contains_key("note"));
        assert!(form_data_from_json(&serde_json::json!([1, 2])).is_empty());
    }

    #[test]
    fn random_measurements_differ_between_renders() {
        let r = renderer(Arc::new(RandomMeasurements));
        let layouts: HashSet<_> = (0..20)
            .map(|_| r.layout(&birth_form(), BIRTH_CERTIFICATE, Some(4)).rows)
            .collect();
        assert!(layouts.len() > 1);

        let documents: HashSet<_> = (0..20)
            .map(|_| r.render(&birth_form(), BIRTH_CERTIFICATE, Some(4)).unwrap().bytes)
            .collect();
        assert!(documents.len() > 1);
    }

    #[test]
    fn long_forms_continue_on_further_pages() {
        let r = renderer(Arc::new(RandomMeasurements));
        let data: FormData = (0..40)
            .map(|i| (format!("field{:02}", i), format!("value {}", i)))
            .collect();
        let rendered = r.render(&data, "land-title", Some(1)).unwrap();
        let pages = page_lines(&rendered.bytes);
        assert!(pages.len() > 1, "{} page(s)", pages.len());

        for lines in &pages {
            let (footer, body): (Vec<_>, Vec<_>) =
                lines.iter().partition(|(_, _, text)| text.as_str() == FOOTER);
            assert_eq!(footer.len(), 1);
            assert!(footer.iter().all(|(_, y, _)| *y == FOOTER_Y));
            for (_, y, text) in &body {
                assert!(*y >= CONTENT_FLOOR, "{:?} drawn at y={}", text, y);
            }

            let mut heights: Vec<_> = lines.iter().map(|(_, y, _)| *y).collect();
            heights.sort_unstable();
            heights.dedup();
            assert_eq!(heights.len(), lines.len(), "overlapping lines");
        }

        let printed: Vec<_> = pages.iter().flatten().map(|(_, _, t)| t.as_str()).collect();
        for i in 0..40 {
            let row = format!("field{:02}: value {}", i, i);
            assert!(printed.contains(&row.as_str()), "missing {}", row);
        }
        assert_eq!(printed.iter().filter(|t| **t == SIGNATURE_LINE).count(), 1);
        assert!(pages
            .last()
            .unwrap()
            .iter()
            .any(|(_, _, t)| t.as_str() == SIGNATURE_LINE));
        assert!(pages[1]
            .iter()
            .any(|(_, _, t)| t.as_str() == "Unknown Service (continued)"));
    }

    #[test]
    fn long_values_wrap_inside_the_right_margin() {
        let r = renderer(Arc::new(RandomMeasurements));
        let purpose = "Annual tenement rate for Plot 14 ".repeat(12);
        let tax_id = "X".repeat(200);
        let data = form(&[
            ("fullName", "Ada Obi"),
            ("taxId", tax_id.as_str()),
            ("paymentPurpose", purpose.trim()),
        ]);
        let rendered = r.render(&data, "tax-receipt", Some(5)).unwrap();
        let rows: Vec<_> = page_lines(&rendered.bytes)
            .concat()
            .into_iter()
            .filter(|(x, _, _)| *x == ROW_X)
            .map(|(_, _, text)| text)
            .collect();

        for row in &rows {
            assert!(
                ROW_X + text_width(row, ROW_FONT_SIZE) <= PAGE_WIDTH - MARGIN,
                "{:?} runs past the margin",
                row
            );
        }
        assert!(rows.iter().filter(|row| row.contains("tenement")).count() > 1);
        assert!(rows
            .join(" ")
            .contains(&format!("Payment Purpose: {}", purpose.trim())));
        assert_eq!(
            rows.iter().map(|row| row.matches('X').count()).sum::<usize>(),
            200
        );
    }

    #[test]
    fn short_rows_are_not_wrapped() {
        assert_eq!(wrap_row("Full Name: Ada Obi", ROW_FONT_SIZE), vec!["Full Name: Ada Obi"]);
    }

    #[test]
    fn marks_outside_latin1_are_dropped_not_replaced() {
        let encoded = |text: &str| pdf_text(text).as_str().unwrap().to_vec();

        // Yoruba tone and dot-below marks
        assert_eq!(
            encoded("\u{1ecc}l\u{e1}b\u{ed}s\u{ed} \u{1eb8}\u{300}b\u{1eb9}\u{301}"),
            b"Ol\xe1b\xeds\xed Ebe".to_vec()
        );
        assert_eq!(encoded("\u{143}namdi"), b"Nnamdi".to_vec());
        assert_eq!(encoded("Se\u{301}gun"), b"S\xe9gun".to_vec());
        assert_eq!(encoded("O\u{2019}Neil \u{2013} \u{20ac}5"), b"O\x92Neil \x96 \x805".to_vec());
        assert_eq!(encoded("\u{5f20}"), b"?".to_vec());
    }

    #[test]
    fn accented_names_print_their_base_letters() {
        let r = renderer(Arc::new(SeededMeasurements));
        let mut data = birth_form();
        data.insert("fullName".into(), "\u{1ecc}l\u{e1}b\u{ed}s\u{ed} \u{1eb8}b\u{1eb9}".into());
        let rendered = r.render(&data, BIRTH_CERTIFICATE, Some(3)).unwrap();
        let printed: Vec<_> = page_lines(&rendered.bytes)
            .concat()
            .into_iter()
            .map(|(_, _, text)| text)
            .collect();
        assert!(printed.contains(&"Full Name: Ol\u{e1}b\u{ed}s\u{ed} Ebe".to_string()));
        assert!(!printed.iter().any(|line| line.contains('?')));
    }
}
