use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek};
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tempfile::TempPath;
use tracing::{debug, info, warn};
use zip::result::ZipError;
use zip::ZipArchive;

use crate::error::ConversionError;

const DOCUMENT_PART: &str = "word/document.xml";
const RELS_PART: &str = "word/_rels/document.xml.rels";

/// Turns an uploaded document into HTML-like table markup.
pub trait DocumentConverter {
    fn to_markup(&self, path: &Path) -> Result<String, ConversionError>;
}

/// Already-converted markup, read as is.
pub struct HtmlConverter;

impl DocumentConverter for HtmlConverter {
    fn to_markup(&self, path: &Path) -> Result<String, ConversionError> {
        Ok(fs::read_to_string(path)?)
    }
}

/// Word `.docx` packages. Paragraphs, tables and line breaks are kept;
/// embedded pictures are inlined as base64 `data:` URIs.
pub struct DocxConverter;

impl DocumentConverter for DocxConverter {
    fn to_markup(&self, path: &Path) -> Result<String, ConversionError> {
        let file = File::open(path)?;
        let mut archive = ZipArchive::new(BufReader::new(file))?;

        let document = read_part(&mut archive, DOCUMENT_PART)?
            .ok_or(ConversionError::MissingPart(DOCUMENT_PART))?;
        let rels = match read_part(&mut archive, RELS_PART)? {
            Some(xml) => parse_relationships(&xml)?,
            None => HashMap::new(),
        };

        let mut images = ImageResolver {
            archive: &mut archive,
            rels: &rels,
            cache: HashMap::new(),
        };
        render_html(&document, &mut images)
    }
}

pub fn converter_for(path: &Path) -> Result<Box<dyn DocumentConverter + Send + Sync>, ConversionError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "docx" => Ok(Box::new(DocxConverter)),
        "html" | "htm" => Ok(Box::new(HtmlConverter)),
        "" => Err(ConversionError::Unsupported(format!(
            "{} has no extension",
            path.display()
        ))),
        other => Err(ConversionError::Unsupported(format!(".{}", other))),
    }
}

// ── Staged uploads ──

/// An uploaded document parked in temporary storage. The file is removed
/// when this is discarded or dropped, whichever comes first.
pub struct StagedUpload {
    path: TempPath,
}

impl StagedUpload {
    /// Copy `source` into `dir`, keeping its extension.
    pub fn stage(source: &Path, dir: &Path) -> Result<Self, ConversionError> {
        fs::create_dir_all(dir)?;
        let suffix = source
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e))
            .unwrap_or_default();
        let mut staged = tempfile::Builder::new()
            .prefix("upload-")
            .suffix(&suffix)
            .tempfile_in(dir)?;
        let bytes = io::copy(&mut File::open(source)?, staged.as_file_mut())?;
        info!(source = %source.display(), bytes, "staged upload");
        Ok(StagedUpload {
            path: staged.into_temp_path(),
        })
    }

    /// Take ownership of a file that is already in temporary storage.
    #[cfg(test)]
    pub fn adopt(path: impl Into<PathBuf>) -> io::Result<Self> {
        Ok(StagedUpload {
            path: TempPath::try_from_path(path)?,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn discard(self) {
        let shown = self.path.display().to_string();
        match self.path.close() {
            Ok(()) => debug!(path = %shown, "removed staged upload"),
            Err(e) => warn!(path = %shown, "failed to remove staged upload: {}", e),
        }
    }
}

// ── Package parts ──

fn read_part<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Option<Vec<u8>>, ConversionError> {
    match archive.by_name(name) {
        Ok(mut entry) => {
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf)?;
            Ok(Some(buf))
        }
        Err(ZipError::FileNotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn xml_error(part: &str, e: impl std::fmt::Display) -> ConversionError {
    ConversionError::Xml {
        part: part.to_string(),
        message: e.to_string(),
    }
}

fn attr(e: &BytesStart, local: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == local)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// Relationship id → package part name, internal targets only.
fn parse_relationships(xml: &[u8]) -> Result<HashMap<String, String>, ConversionError> {
    let mut reader = Reader::from_reader(xml);
    let mut rels = HashMap::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                let external = attr(&e, b"TargetMode").as_deref() == Some("External");
                if let (false, Some(id), Some(target)) =
                    (external, attr(&e, b"Id"), attr(&e, b"Target"))
                {
                    rels.insert(id, resolve_target(&target));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(RELS_PART, e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(rels)
}

/// Targets are relative to `word/` unless they start at the package root.
fn resolve_target(target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }
    let mut parts = vec!["word"];
    for seg in target.split('/') {
        match seg {
            ".." => {
                parts.pop();
            }
            "." | "" => {}
            s => parts.push(s),
        }
    }
    parts.join("/")
}

fn image_subtype(part: &str) -> &'static str {
    let ext = part.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => "jpeg",
        "gif" => "gif",
        "bmp" => "bmp",
        "tif" | "tiff" => "tiff",
        "emf" => "x-emf",
        "wmf" => "x-wmf",
        "svg" => "svg+xml",
        _ => "png",
    }
}

struct ImageResolver<'a, R> {
    archive: &'a mut ZipArchive<R>,
    rels: &'a HashMap<String, String>,
    cache: HashMap<String, String>,
}

impl<R: Read + Seek> ImageResolver<'_, R> {
    /// `<img>` tag for a relationship id, or None if the picture can't be found.
    fn img_tag(&mut self, rel_id: &str) -> Result<Option<String>, ConversionError> {
        if let Some(tag) = self.cache.get(rel_id) {
            return Ok(Some(tag.clone()));
        }
        let Some(part) = self.rels.get(rel_id) else {
            debug!(rel_id, "picture relationship not found");
            return Ok(None);
        };
        let Some(bytes) = read_part(self.archive, part)? else {
            debug!(part = %part, "picture part missing from package");
            return Ok(None);
        };
        let tag = format!(
            "<img src=\"data:image/{};base64,{}\" />",
            image_subtype(part),
            BASE64.encode(bytes)
        );
        self.cache.insert(rel_id.to_string(), tag.clone());
        Ok(Some(tag))
    }
}

fn render_html<R: Read + Seek>(
    document: &[u8],
    images: &mut ImageResolver<'_, R>,
) -> Result<String, ConversionError> {
    let mut reader = Reader::from_reader(document);
    let mut out = String::with_capacity(document.len() / 2);
    let mut buf = Vec::new();
    let mut in_text = false;
    // mc:Fallback repeats the picture of its mc:Choice sibling
    let mut fallback_depth = 0usize;
    // (offset of `<td>`, continues a vertical merge) per open cell
    let mut open_cells: Vec<(usize, bool)> = Vec::new();

    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| xml_error(DOCUMENT_PART, e))?
        {
            Event::Start(ref e) if e.local_name().as_ref() == b"Fallback" => fallback_depth += 1,
            Event::End(ref e) if e.local_name().as_ref() == b"Fallback" => {
                fallback_depth = fallback_depth.saturating_sub(1)
            }
            Event::Eof => break,
            _ if fallback_depth > 0 => {}
            Event::Start(ref e) => match e.local_name().as_ref() {
                b"tbl" => out.push_str("<table>"),
                b"tr" => out.push_str("<tr>"),
                b"tc" => {
                    open_cells.push((out.len(), false));
                    out.push_str("<td>");
                }
                b"p" => out.push_str("<p>"),
                b"t" => in_text = true,
                b"br" | b"cr" => out.push_str("<br />"),
                b"tab" => out.push(' '),
                b"blip" | b"imagedata" => push_image(&mut out, e, images)?,
                b"vMerge" => mark_merge_continuation(e, &mut open_cells),
                _ => {}
            },
            Event::Empty(ref e) => match e.local_name().as_ref() {
                b"vMerge" => mark_merge_continuation(e, &mut open_cells),
                b"p" => out.push_str("<p></p>"),
                b"br" | b"cr" => out.push_str("<br />"),
                b"tab" => out.push(' '),
                b"blip" | b"imagedata" => push_image(&mut out, e, images)?,
                _ => {}
            },
            Event::End(ref e) => match e.local_name().as_ref() {
                b"tbl" => out.push_str("</table>"),
                b"tr" => out.push_str("</tr>"),
                b"tc" => match open_cells.pop() {
                    // the cell above already spans this one
                    Some((start, true)) => out.truncate(start),
                    _ => out.push_str("</td>"),
                },
                b"p" => out.push_str("</p>"),
                b"t" => in_text = false,
                _ => {}
            },
            Event::Text(ref t) if in_text => {
                let text = t.unescape().map_err(|e| xml_error(DOCUMENT_PART, e))?;
                out.push_str(&quick_xml::escape::escape(text.as_ref()));
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}

/// `<w:vMerge/>` without `w:val="restart"` continues the cell above.
fn mark_merge_continuation(e: &BytesStart, open_cells: &mut [(usize, bool)]) {
    if attr(e, b"val").as_deref() == Some("restart") {
        return;
    }
    if let Some(cell) = open_cells.last_mut() {
        cell.1 = true;
    }
}

fn push_image<R: Read + Seek>(
    out: &mut String,
    e: &BytesStart,
    images: &mut ImageResolver<'_, R>,
) -> Result<(), ConversionError> {
    let rel_id = attr(e, b"embed").or_else(|| attr(e, b"id"));
    if let Some(rel_id) = rel_id {
        if let Some(tag) = images.img_tag(&rel_id)? {
            out.push_str(&tag);
        }
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::parser::rows::RowExtractor;

    fn convert(body: &str) -> String {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roster.docx");
        write_docx(&path, &document(body));
        DocxConverter.to_markup(&path).unwrap()
    }

    #[test]
    fn docx_table_becomes_rows() {
        let body = format!(
            "<w:p><w:r><w:t>Inter College Football</w:t></w:r></w:p><w:tbl>{}{}</w:tbl>",
            row(&[cell("Sr. No"), cell("Name")]),
            row(&[cell("1"), cell("Ravi &amp; Co"), picture_cell("rId5")]),
        );
        let html = convert(&body);
        assert!(html.starts_with("<p>Inter College Football</p><table><tr>"));

        let rows: Vec<_> = RowExtractor::new(&html).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].cells, vec!["Sr. No", "Name"]);
        assert_eq!(rows[1].cells, vec!["1", "Ravi & Co", ""]);
        assert!(rows[1].markup[2].contains("data:image/png;base64,AQID"));
    }

    #[test]
    fn line_breaks_survive_conversion() {
        let body = "<w:tbl><w:tr><w:tc><w:p><w:r><w:t>Amritsar</w:t><w:br/><w:t>Ph 98</w:t></w:r></w:p></w:tc></w:tr></w:tbl>";
        let html = convert(body);
        assert!(html.contains("Amritsar<br />Ph 98"));
    }

    #[test]
    fn vertically_merged_continuations_are_dropped() {
        let restart = "<w:tc><w:tcPr><w:vMerge w:val=\"restart\"/></w:tcPr><w:p><w:r><w:t>Football</w:t></w:r></w:p></w:tc>";
        let continued = "<w:tc><w:tcPr><w:vMerge/></w:tcPr><w:p/></w:tc>";
        let continued_explicit =
            "<w:tc><w:tcPr><w:vMerge w:val=\"continue\"></w:vMerge></w:tcPr><w:p/></w:tc>";
        let body = format!(
            "<w:tbl>{}{}{}</w:tbl>",
            row(&[restart.to_string(), cell("1"), cell("Ravi")]),
            row(&[continued.to_string(), cell("2"), cell("Anjali")]),
            row(&[continued_explicit.to_string(), cell("3"), cell("Gurpreet")]),
        );
        let html = convert(&body);
        let rows: Vec<_> = RowExtractor::new(&html).collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].cells, vec!["Football", "1", "Ravi"]);
        assert_eq!(rows[1].cells, vec!["2", "Anjali"]);
        assert_eq!(rows[2].cells, vec!["3", "Gurpreet"]);
    }

    #[test]
    fn fallback_pictures_are_not_duplicated() {
        let body = format!(
            "<w:tbl><w:tr><w:tc><w:p><w:r><mc:AlternateContent><mc:Choice Requires=\"wps\"><a:blip r:embed=\"rId6\"/></mc:Choice><mc:Fallback><v:imagedata r:id=\"rId6\"/></mc:Fallback></mc:AlternateContent></w:r></w:p></w:tc>{}</w:tr></w:tbl>",
            cell("x")
        );
        let html = convert(&body);
        assert_eq!(html.matches("<img").count(), 1);
        assert!(html.contains("data:image/jpeg;base64,BAUG"));
    }

    #[test]
    fn missing_document_part_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.docx");
        let mut zip = zip::ZipWriter::new(File::create(&path).unwrap());
        zip.start_file("readme.txt", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.finish().unwrap();
        assert!(matches!(
            DocxConverter.to_markup(&path),
            Err(ConversionError::MissingPart(DOCUMENT_PART))
        ));
    }

    #[test]
    fn corrupt_package_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.docx");
        fs::write(&path, b"not a zip").unwrap();
        assert!(matches!(
            DocxConverter.to_markup(&path),
            Err(ConversionError::Archive(_))
        ));
    }

    #[test]
    fn relationship_targets_resolve_from_word_dir() {
        assert_eq!(resolve_target("media/image1.png"), "word/media/image1.png");
        assert_eq!(resolve_target("../customXml/item1.xml"), "customXml/item1.xml");
        assert_eq!(resolve_target("/word/media/x.png"), "word/media/x.png");

        let rels = parse_relationships(RELS.as_bytes()).unwrap();
        assert_eq!(rels.len(), 2);
        assert_eq!(rels["rId6"], "word/media/image2.jpeg");
    }

    #[test]
    fn converter_is_picked_by_extension() {
        assert!(converter_for(Path::new("a/roster.DOCX")).is_ok());
        assert!(converter_for(Path::new("roster.htm")).is_ok());
        assert!(matches!(
            converter_for(Path::new("roster.pdf")),
            Err(ConversionError::Unsupported(_))
        ));
        assert!(converter_for(Path::new("roster")).is_err());
    }

    #[test]
    fn staged_upload_is_removed_on_discard_and_drop() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("roster.html");
        fs::write(&source, "<tr></tr>").unwrap();
        let uploads = dir.path().join("uploads");

        let staged = StagedUpload::stage(&source, &uploads).unwrap();
        let path = staged.path().to_path_buf();
        assert_eq!(path.extension().unwrap(), "html");
        assert_eq!(fs::read_to_string(&path).unwrap(), "<tr></tr>");
        staged.discard();
        assert!(!path.exists());

        let staged = StagedUpload::stage(&source, &uploads).unwrap();
        let path = staged.path().to_path_buf();
        drop(staged);
        assert!(!path.exists());
        assert!(source.exists());
    }
}
