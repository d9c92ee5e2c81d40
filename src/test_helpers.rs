//! Shared test utilities for the docshrink test suite.
//!
//! Builds synthetic images with the `image` encoders and ZIP containers with
//! the `zip` writer, so tests never depend on fixture files.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = tempfile::TempDir::new().unwrap();
//! let book = tmp.path().join("book.epub");
//! write_epub(&book, &[("OEBPS/cover.jpg", jpeg_bytes(320, 480))]);
//!
//! let entries = read_container(&book);
//! assert_eq!(entries[0].name, "mimetype");
//! ```

use image::{DynamicImage, ImageFormat, RgbImage, RgbaImage};
use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

// =========================================================================
// Images
// =========================================================================

/// RGB image with a smooth gradient, so lossy encoders have real work to do.
pub fn gradient_rgb(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            ((x + y) % 256) as u8,
        ])
    })
}

/// Like [`gradient_rgb`] with a horizontal alpha ramp.
pub fn gradient_rgba(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        image::Rgba([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            ((x + y) % 256) as u8,
            (255 - x * 255 / width.max(1)) as u8,
        ])
    })
}

fn encoded(img: DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, format).unwrap();
    out.into_inner()
}

/// A baseline JPEG of the given size.
pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    encoded(
        DynamicImage::ImageRgb8(gradient_rgb(width, height)),
        ImageFormat::Jpeg,
    )
}

/// An RGB PNG of the given size.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    encoded(
        DynamicImage::ImageRgb8(gradient_rgb(width, height)),
        ImageFormat::Png,
    )
}

// =========================================================================
// Containers
// =========================================================================

/// One member as read back from a container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerEntry {
    pub name: String,
    pub data: Vec<u8>,
    pub compression: CompressionMethod,
}

/// Write a container: `mimetype` Stored, everything else Deflated, in order.
pub fn write_container(path: &Path, entries: &[(&str, Vec<u8>)]) {
    let mut writer = ZipWriter::new(File::create(path).unwrap());
    for (name, data) in entries {
        let method = if *name == "mimetype" {
            CompressionMethod::Stored
        } else {
            CompressionMethod::Deflated
        };
        writer
            .start_file(*name, SimpleFileOptions::default().compression_method(method))
            .unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap();
}

/// Every file member in archive order.
pub fn read_container(path: &Path) -> Vec<ContainerEntry> {
    let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
    (0..archive.len())
        .filter_map(|i| {
            let mut entry = archive.by_index(i).unwrap();
            if entry.is_dir() {
                return None;
            }
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            Some(ContainerEntry {
                name: entry.name().to_string(),
                data,
                compression: entry.compression(),
            })
        })
        .collect()
}

pub const CONTAINER_XML_TEMPLATE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#;

pub const OPF_TEMPLATE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="uid">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="uid">urn:uuid:0f6e8d1c-3b1a-4c55-9d0e-5b8f0f4f2a11</dc:identifier>
    <dc:title>Original Title</dc:title>
    <dc:creator>Original Author</dc:creator>
  </metadata>
  <manifest>
    <item id="text" href="text.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
  <spine>
    <itemref idref="text"/>
  </spine>
</package>
"#;

/// Write a minimal EPUB with `extra` members appended after the text.
pub fn write_epub(path: &Path, extra: &[(&str, Vec<u8>)]) {
    let mut entries: Vec<(&str, Vec<u8>)> = vec![
        ("mimetype", b"application/epub+zip".to_vec()),
        ("META-INF/container.xml", CONTAINER_XML_TEMPLATE.as_bytes().to_vec()),
        ("OEBPS/content.opf", OPF_TEMPLATE.as_bytes().to_vec()),
        (
            "OEBPS/text.xhtml",
            b"<html xmlns=\"http://www.w3.org/1999/xhtml\"><body><p>Hi</p></body></html>".to_vec(),
        ),
    ];
    entries.extend(extra.iter().cloned());
    write_container(path, &entries);
}
