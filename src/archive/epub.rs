//! EPUB 3 packaging (with an NCX table of contents for older readers).
//!
//! Output is byte-for-byte reproducible: entries are written in a fixed
//! order with a fixed timestamp and permissions, and every identifier or date
//! in the package derives from the manifest alone.

use super::manifest::{ArchiveManifest, Chapter};
use super::BuildError;
use crate::util::strip_control_chars;
use chrono::SecondsFormat;
use quick_xml::escape::escape;
use std::fmt::Write as _;
use std::io::{Cursor, Write};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

const CONTENT_DIR: &str = "OEBPS";

const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#;

const STYLESHEET: &str = "body { margin: 0 0.5em; line-height: 1.4; }
h1 { font-size: 1.4em; margin: 0.5em 0; }
p.byline, p.source { font-size: 0.85em; color: #555; }
img, svg { max-width: 100%; height: auto; }
pre { white-space: pre-wrap; }
section.title-page { text-align: center; }
";

/// Serializes `manifest` to EPUB bytes.
pub fn build_epub(manifest: &ArchiveManifest) -> Result<Vec<u8>, BuildError> {
    if manifest.chapters.is_empty() {
        return Err(BuildError::Empty);
    }

    let stored = FileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .last_modified_time(zip::DateTime::default())
        .unix_permissions(0o644);
    let deflated = stored.compression_method(CompressionMethod::Deflated);

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

    // Readers sniff the first entry: it must be the uncompressed mimetype.
    zip.start_file("mimetype", stored)?;
    zip.write_all(b"application/epub+zip")?;

    zip.start_file("META-INF/container.xml", deflated)?;
    zip.write_all(CONTAINER_XML.as_bytes())?;

    zip.start_file(format!("{CONTENT_DIR}/content.opf"), deflated)?;
    zip.write_all(package_document(manifest).as_bytes())?;

    zip.start_file(format!("{CONTENT_DIR}/nav.xhtml"), deflated)?;
    zip.write_all(nav_document(manifest).as_bytes())?;

    zip.start_file(format!("{CONTENT_DIR}/toc.ncx"), deflated)?;
    zip.write_all(ncx_document(manifest).as_bytes())?;

    zip.start_file(format!("{CONTENT_DIR}/style.css"), deflated)?;
    zip.write_all(STYLESHEET.as_bytes())?;

    zip.start_file(format!("{CONTENT_DIR}/title.xhtml"), deflated)?;
    zip.write_all(title_page(manifest).as_bytes())?;

    for (index, chapter) in manifest.chapters.iter().enumerate() {
        zip.start_file(format!("{CONTENT_DIR}/{}", chapter_file(index)), deflated)?;
        zip.write_all(chapter_document(chapter).as_bytes())?;
    }

    // Images are already compressed.
    if let Some(cover) = &manifest.cover {
        zip.start_file(format!("{CONTENT_DIR}/{}", cover.local_path), stored)?;
        zip.write_all(&cover.bytes)?;
    }
    for asset in manifest.resources() {
        zip.start_file(format!("{CONTENT_DIR}/{}", asset.local_path), stored)?;
        zip.write_all(&asset.bytes)?;
    }

    Ok(zip.finish()?.into_inner())
}

fn chapter_file(index: usize) -> String {
    format!("chapter-{:04}.xhtml", index + 1)
}

fn chapter_id(index: usize) -> String {
    format!("chapter-{:04}", index + 1)
}

/// Escapes text for XML content or attribute values.
fn xml(text: &str) -> String {
    escape(strip_control_chars(text).as_ref()).into_owned()
}

fn package_document(manifest: &ArchiveManifest) -> String {
    let modified = manifest
        .modified
        .to_rfc3339_opts(SecondsFormat::Secs, true);

    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str(
        "<package xmlns=\"http://www.idpf.org/2007/opf\" version=\"3.0\" unique-identifier=\"book-id\">\n",
    );
    out.push_str("  <metadata xmlns:dc=\"http://purl.org/dc/elements/1.1/\">\n");
    let _ = writeln!(out, "    <dc:identifier id=\"book-id\">{}</dc:identifier>", xml(&manifest.identifier));
    let _ = writeln!(out, "    <dc:title>{}</dc:title>", xml(&manifest.title));
    let _ = writeln!(out, "    <dc:language>{}</dc:language>", xml(&manifest.language));
    if let Some(author) = &manifest.author {
        let _ = writeln!(out, "    <dc:creator id=\"creator\">{}</dc:creator>", xml(author));
    }
    if let Some(description) = &manifest.description {
        let _ = writeln!(out, "    <dc:description>{}</dc:description>", xml(description));
    }
    let _ = writeln!(out, "    <dc:date>{modified}</dc:date>");
    let _ = writeln!(out, "    <meta property=\"dcterms:modified\">{modified}</meta>");
    if manifest.cover.is_some() {
        out.push_str("    <meta name=\"cover\" content=\"cover-image\"/>\n");
    }
    let _ = writeln!(
        out,
        "    <meta name=\"generator\" content=\"inkfeed {}\"/>",
        env!("CARGO_PKG_VERSION")
    );
    out.push_str("  </metadata>\n  <manifest>\n");
    out.push_str("    <item id=\"nav\" href=\"nav.xhtml\" media-type=\"application/xhtml+xml\" properties=\"nav\"/>\n");
    out.push_str("    <item id=\"ncx\" href=\"toc.ncx\" media-type=\"application/x-dtbncx+xml\"/>\n");
    out.push_str("    <item id=\"css\" href=\"style.css\" media-type=\"text/css\"/>\n");
    out.push_str("    <item id=\"title-page\" href=\"title.xhtml\" media-type=\"application/xhtml+xml\"/>\n");

    for (index, chapter) in manifest.chapters.iter().enumerate() {
        let properties = if chapter.body.contains("<svg") {
            " properties=\"svg\""
        } else {
            ""
        };
        let _ = writeln!(
            out,
            "    <item id=\"{}\" href=\"{}\" media-type=\"application/xhtml+xml\"{properties}/>",
            chapter_id(index),
            chapter_file(index)
        );
    }

    if let Some(cover) = &manifest.cover {
        let _ = writeln!(
            out,
            "    <item id=\"cover-image\" href=\"{}\" media-type=\"{}\" properties=\"cover-image\"/>",
            xml(&cover.local_path),
            xml(cover.media_type.as_deref().unwrap_or("application/octet-stream"))
        );
    }
    for (index, asset) in manifest.resources().iter().enumerate() {
        let _ = writeln!(
            out,
            "    <item id=\"image-{:04}\" href=\"{}\" media-type=\"{}\"/>",
            index + 1,
            xml(&asset.local_path),
            xml(asset.media_type.as_deref().unwrap_or("application/octet-stream"))
        );
    }

    out.push_str("  </manifest>\n  <spine toc=\"ncx\">\n");
    out.push_str("    <itemref idref=\"title-page\"/>\n");
    for index in 0..manifest.chapters.len() {
        let _ = writeln!(out, "    <itemref idref=\"{}\"/>", chapter_id(index));
    }
    out.push_str("  </spine>\n</package>\n");
    out
}

fn xhtml_page(title: &str, body: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
<!DOCTYPE html>\n\
<html xmlns=\"http://www.w3.org/1999/xhtml\" xmlns:epub=\"http://www.idpf.org/2007/ops\">\n\
<head>\n<meta charset=\"utf-8\"/>\n<title>{}</title>\n\
<link rel=\"stylesheet\" type=\"text/css\" href=\"style.css\"/>\n</head>\n\
<body>\n{body}\n</body>\n</html>\n",
        xml(title)
    )
}

fn nav_document(manifest: &ArchiveManifest) -> String {
    let mut body = String::from("<nav epub:type=\"toc\" id=\"toc\">\n<h1>Contents</h1>\n<ol>\n");
    for (index, chapter) in manifest.chapters.iter().enumerate() {
        let _ = writeln!(
            body,
            "<li><a href=\"{}\">{}</a></li>",
            chapter_file(index),
            xml(&chapter.title)
        );
    }
    body.push_str("</ol>\n</nav>");
    xhtml_page(&manifest.title, &body)
}

fn ncx_document(manifest: &ArchiveManifest) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str("<ncx xmlns=\"http://www.daisy.org/z3986/2005/ncx/\" version=\"2005-1\">\n<head>\n");
    let _ = writeln!(out, "<meta name=\"dtb:uid\" content=\"{}\"/>", xml(&manifest.identifier));
    out.push_str("<meta name=\"dtb:depth\" content=\"1\"/>\n");
    out.push_str("<meta name=\"dtb:totalPageCount\" content=\"0\"/>\n");
    out.push_str("<meta name=\"dtb:maxPageNumber\" content=\"0\"/>\n</head>\n");
    let _ = writeln!(out, "<docTitle><text>{}</text></docTitle>", xml(&manifest.title));
    out.push_str("<navMap>\n");
    for (index, chapter) in manifest.chapters.iter().enumerate() {
        let _ = writeln!(
            out,
            "<navPoint id=\"navpoint-{n}\" playOrder=\"{n}\"><navLabel><text>{}</text></navLabel><content src=\"{}\"/></navPoint>",
            xml(&chapter.title),
            chapter_file(index),
            n = index + 1
        );
    }
    out.push_str("</navMap>\n</ncx>\n");
    out
}

fn title_page(manifest: &ArchiveManifest) -> String {
    let mut body = String::from("<section class=\"title-page\" epub:type=\"titlepage\">\n");
    if let Some(cover) = &manifest.cover {
        let _ = writeln!(body, "<img src=\"{}\" alt=\"\"/>", xml(&cover.local_path));
    }
    let _ = writeln!(body, "<h1>{}</h1>", xml(&manifest.title));
    if let Some(author) = &manifest.author {
        let _ = writeln!(body, "<p class=\"byline\">{}</p>", xml(author));
    }
    if let Some(description) = &manifest.description {
        let _ = writeln!(body, "<p>{}</p>", xml(description));
    }
    body.push_str("</section>");
    xhtml_page(&manifest.title, &body)
}

fn chapter_document(chapter: &Chapter) -> String {
    let mut body = String::from("<section class=\"chapter\">\n");
    let _ = writeln!(body, "<h1>{}</h1>", xml(&chapter.title));

    let mut byline = Vec::new();
    if !chapter.authors.is_empty() {
        byline.push(chapter.authors.join(", "));
    }
    if let Some(published) = chapter.published {
        byline.push(published.format("%Y-%m-%d").to_string());
    }
    if !byline.is_empty() {
        let _ = writeln!(body, "<p class=\"byline\">{}</p>", xml(&byline.join(" | ")));
    }

    body.push_str(&chapter.body);
    body.push('\n');

    if let Some(url) = &chapter.url {
        let _ = writeln!(
            body,
            "<p class=\"source\"><a href=\"{}\">{}</a></p>",
            xml(url.as_str()),
            xml(url.as_str())
        );
    }
    body.push_str("</section>");
    xhtml_page(&chapter.title, &body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{AssetRef, AssetStatus};
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use quick_xml::events::Event;
    use quick_xml::Reader;
    use std::io::Read;
    use url::Url;

    fn image(local_path: &str) -> AssetRef {
        AssetRef {
            source: "/i.png".to_string(),
            remote: Url::parse("https://example.com/i.png").unwrap(),
            local_path: local_path.to_string(),
            media_type: Some("image/png".to_string()),
            bytes: vec![0x89, b'P', b'N', b'G'],
            status: AssetStatus::Fetched,
        }
    }

    fn sample() -> ArchiveManifest {
        let url = Url::parse("https://example.com/feed.xml").unwrap();
        let mut manifest = ArchiveManifest::new("Tom & Jerry <News>", &url);
        manifest.author = Some("Desk".to_string());
        manifest.description = Some("Daily".to_string());
        manifest.cover = Some(AssetRef {
            local_path: "images/cover.png".to_string(),
            ..image("images/cover.png")
        });
        manifest.push_chapter(Chapter {
            title: "First & only".to_string(),
            url: Some(Url::parse("https://example.com/1?a=1&b=2").unwrap()),
            published: Some(Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap()),
            authors: vec!["Ann".to_string()],
            body: "<p>Hello<img src=\"images/abc.png\" alt=\"\"/></p>".to_string(),
            assets: vec![image("images/abc.png")],
        });
        manifest
    }

    fn entries(bytes: &[u8]) -> zip::ZipArchive<Cursor<Vec<u8>>> {
        zip::ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap()
    }

    fn read(archive: &mut zip::ZipArchive<Cursor<Vec<u8>>>, name: &str) -> String {
        let mut out = String::new();
        archive.by_name(name).unwrap().read_to_string(&mut out).unwrap();
        out
    }

    fn assert_well_formed(xml_text: &str) {
        let mut reader = Reader::from_str(xml_text);
        loop {
            match reader.read_event() {
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => panic!("not well-formed: {e}\n{xml_text}"),
            }
        }
    }

    #[test]
    fn test_mimetype_first_and_stored() {
        let bytes = build_epub(&sample()).unwrap();
        let mut archive = entries(&bytes);

        let first = archive.by_index(0).unwrap();
        assert_eq!(first.name(), "mimetype");
        assert_eq!(first.compression(), CompressionMethod::Stored);
        drop(first);
        assert_eq!(read(&mut archive, "mimetype"), "application/epub+zip");
    }

    #[test]
    fn test_expected_entries() {
        let bytes = build_epub(&sample()).unwrap();
        let archive = entries(&bytes);
        let names: Vec<&str> = archive.file_names().collect();

        for expected in [
            "META-INF/container.xml",
            "OEBPS/content.opf",
            "OEBPS/nav.xhtml",
            "OEBPS/toc.ncx",
            "OEBPS/title.xhtml",
            "OEBPS/chapter-0001.xhtml",
            "OEBPS/images/cover.png",
            "OEBPS/images/abc.png",
        ] {
            assert!(names.contains(&expected), "missing {expected}");
        }
    }

    #[test]
    fn test_documents_are_well_formed() {
        let bytes = build_epub(&sample()).unwrap();
        let mut archive = entries(&bytes);
        for name in [
            "META-INF/container.xml",
            "OEBPS/content.opf",
            "OEBPS/nav.xhtml",
            "OEBPS/toc.ncx",
            "OEBPS/title.xhtml",
            "OEBPS/chapter-0001.xhtml",
        ] {
            assert_well_formed(&read(&mut archive, name));
        }
    }

    #[test]
    fn test_package_metadata() {
        let bytes = build_epub(&sample()).unwrap();
        let opf = read(&mut entries(&bytes), "OEBPS/content.opf");

        assert!(opf.contains("<dc:title>Tom &amp; Jerry &lt;News&gt;</dc:title>"));
        assert!(opf.contains("<dc:creator id=\"creator\">Desk</dc:creator>"));
        assert!(opf.contains("<meta property=\"dcterms:modified\">2024-03-09T12:00:00Z</meta>"));
        assert!(opf.contains("properties=\"cover-image\""));
        assert!(opf.contains("href=\"images/abc.png\" media-type=\"image/png\""));
    }

    #[test]
    fn test_omitted_author_has_no_creator() {
        let mut manifest = sample();
        manifest.author = None;
        let bytes = build_epub(&manifest).unwrap();
        let opf = read(&mut entries(&bytes), "OEBPS/content.opf");
        assert!(!opf.contains("dc:creator"));
    }

    #[test]
    fn test_chapter_byline_and_source() {
        let bytes = build_epub(&sample()).unwrap();
        let chapter = read(&mut entries(&bytes), "OEBPS/chapter-0001.xhtml");
        assert!(chapter.contains("<p class=\"byline\">Ann | 2024-03-09</p>"));
        assert!(chapter.contains("href=\"https://example.com/1?a=1&amp;b=2\""));
        assert!(chapter.contains("<img src=\"images/abc.png\" alt=\"\"/>"));
    }

    #[test]
    fn test_output_is_reproducible() {
        assert_eq!(build_epub(&sample()).unwrap(), build_epub(&sample()).unwrap());
    }

    #[test]
    fn test_empty_manifest_rejected() {
        let url = Url::parse("https://example.com/feed.xml").unwrap();
        let manifest = ArchiveManifest::new("Empty", &url);
        assert!(matches!(build_epub(&manifest), Err(BuildError::Empty)));
    }
}
