//! C sources embedding a sample image and an exported model into firmware.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use image::{imageops, DynamicImage, GrayImage};

use crate::config::{Interpolation, SAMPLE_IMAGE_SIZE};
use crate::error::{Error, Result};
use crate::preprocess::to_grayscale;

const BYTES_PER_LINE: usize = 12;

/// A header and its matching source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CArray {
    /// File stem shared by `<name>.h` and `<name>.c`.
    pub name: &'static str,
    pub header: String,
    pub source: String,
}

impl CArray {
    /// Writes `<name>.h` to `header_dir` and `<name>.c` to `source_dir`.
    pub fn write(&self, header_dir: &Path, source_dir: &Path) -> Result<()> {
        fs::create_dir_all(header_dir)?;
        fs::create_dir_all(source_dir)?;

        let header = header_dir.join(format!("{}.h", self.name));
        let source = source_dir.join(format!("{}.c", self.name));
        fs::write(&header, &self.header)?;
        fs::write(&source, &self.source)?;

        log::info!("Wrote {} and {}", header.display(), source.display());
        Ok(())
    }
}

/// Grayscale (BT.601 luma) 96×96 bilinear reduction of `image`.
pub fn sample_image(image: &DynamicImage) -> GrayImage {
    let size = SAMPLE_IMAGE_SIZE as u32;
    let gray = to_grayscale(image);

    imageops::resize(&gray, size, size, Interpolation::Bilinear.filter())
}

/// `mock_image.h` / `mock_image.c` for a 96×96 grayscale image, one image row
/// per source line.
pub fn mock_image(image: &GrayImage) -> Result<CArray> {
    let size = SAMPLE_IMAGE_SIZE as u32;
    if image.dimensions() != (size, size) {
        return Err(Error::ShapeMismatch {
            stage: "mock_image",
            expected: vec![SAMPLE_IMAGE_SIZE, SAMPLE_IMAGE_SIZE],
            actual: vec![image.height() as usize, image.width() as usize],
        });
    }

    let header = format!(
        "#ifndef MOCK_IMAGE\n\
         #define MOCK_IMAGE\n\
         \n\
         #include <stdint.h>\n\
         \n\
         extern const uint8_t mock_image[{SAMPLE_IMAGE_SIZE}*{SAMPLE_IMAGE_SIZE}];\n\
         \n\
         extern const unsigned int mock_image_size;\n\
         #endif // MOCK_IMAGE\n"
    );

    let mut source = format!(
        "#include \"mock_image.h\"\n\
         \n\
         const uint8_t mock_image[{SAMPLE_IMAGE_SIZE}*{SAMPLE_IMAGE_SIZE}] = {{\n"
    );
    for row in image.rows() {
        for pixel in row {
            let _ = write!(source, "{}, ", pixel.0[0]);
        }
        source.push('\n');
    }
    source.push_str("};\n");
    let _ = writeln!(source, "const unsigned int mock_image_size = {SAMPLE_IMAGE_SIZE};");

    Ok(CArray {
        name: "mock_image",
        header,
        source,
    })
}

/// `model.h` / `model.c` embedding the serialized artifact.
pub fn model_data(bytes: &[u8]) -> CArray {
    let header = "#ifndef MODEL_H\n\
                  #define MODEL_H\n\
                  \n\
                  extern const unsigned char model_data[];\n\
                  \n\
                  extern const unsigned int model_data_len;\n\
                  \n\
                  #endif // MODEL_H\n"
        .to_string();

    let mut source = String::from("#include \"model.h\"\n\nconst unsigned char model_data[] = {\n");
    for line in bytes.chunks(BYTES_PER_LINE) {
        source.push_str("   ");
        for byte in line {
            let _ = write!(source, " 0x{byte:02x},");
        }
        source.push('\n');
    }
    source.push_str("};\n");
    let _ = writeln!(source, "const unsigned int model_data_len = {};", bytes.len());

    CArray {
        name: "model",
        header,
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb, RgbImage};

    #[test]
    fn sample_image_is_96_gray() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(320, 240, Rgb([0, 255, 0])));

        let sample = sample_image(&image);

        assert_eq!(sample.dimensions(), (96, 96));
        assert!(sample.pixels().all(|p| p.0[0] == 150));
    }

    #[test]
    fn mock_image_layout() {
        let image = GrayImage::from_fn(96, 96, |x, y| Luma([if y == 0 { x as u8 } else { 7 }]));

        let array = mock_image(&image).unwrap();
        let lines: Vec<&str> = array.source.lines().collect();

        assert!(array.header.contains("extern const uint8_t mock_image[96*96];"));
        assert!(array.header.contains("extern const unsigned int mock_image_size;"));
        assert_eq!(lines[2], "const uint8_t mock_image[96*96] = {");
        assert!(lines[3].starts_with("0, 1, 2, 3, "));
        assert!(lines[3].ends_with("95, "));
        assert_eq!(lines[4].matches("7, ").count(), 96);
        assert_eq!(lines[3 + 96], "};");
        assert_eq!(lines[4 + 96], "const unsigned int mock_image_size = 96;");
    }

    #[test]
    fn mock_image_must_be_96_square() {
        let result = mock_image(&GrayImage::new(32, 32));

        assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn model_data_layout() {
        let bytes: Vec<u8> = (0..=12).collect();

        let array = model_data(&bytes);
        let lines: Vec<&str> = array.source.lines().collect();

        assert!(array.header.contains("extern const unsigned char model_data[];"));
        assert_eq!(lines[2], "const unsigned char model_data[] = {");
        assert_eq!(
            lines[3],
            "    0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b,"
        );
        assert_eq!(lines[4], "    0x0c,");
        assert_eq!(lines[5], "};");
        assert_eq!(lines[6], "const unsigned int model_data_len = 13;");
    }

    #[test]
    fn write_places_header_and_source() {
        let dir = tempfile::tempdir().unwrap();
        let array = model_data(&[1, 2, 3]);

        array
            .write(&dir.path().join("include"), &dir.path().join("main"))
            .unwrap();

        assert!(dir.path().join("include/model.h").is_file());
        assert!(dir.path().join("main/model.c").is_file());
    }
}
