use std::{
    fs::File,
    io::{BufWriter, Cursor, Write},
    path::Path,
};

use image::{DynamicImage, ImageFormat, codecs::jpeg::JpegEncoder};
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::error::{Error, Result, StorageError};

/// Hard limit of a stored blob, the capacity of a MySQL MEDIUMBLOB.
pub const MAX_IMAGE_BYTES: usize = 16 * 1024 * 1024;

const EXPORT_JPEG_QUALITY: u8 = 95;

/// How `images` rows are written. Chosen once per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WritePolicy {
    /// Every write atomically replaces all previous rows.
    SingleLatest,
    /// Every write adds a row with a fresh id.
    AppendOnly,
}

impl std::str::FromStr for WritePolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "single-latest" => Ok(WritePolicy::SingleLatest),
            "append-only" => Ok(WritePolicy::AppendOnly),
            other => Err(format!(
                "unknown write policy `{other}`, expected `single-latest` or `append-only`"
            )),
        }
    }
}

/// What the upload's own bytes say about the picture, before decoding
/// expands it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceKind {
    pub format: Option<ImageFormat>,
    /// Pixels are palette indices. Decoding hides this, palette PNGs come
    /// out as plain `Rgb8`.
    pub indexed: bool,
}

impl SourceKind {
    pub fn detect(bytes: &[u8]) -> Self {
        let format = image::guess_format(bytes).ok();
        let indexed = match format {
            Some(ImageFormat::Png) => png::Decoder::new(Cursor::new(bytes))
                .read_info()
                .map(|reader| reader.info().color_type == png::ColorType::Indexed)
                .unwrap_or(false),
            Some(ImageFormat::Gif) => true,
            _ => false,
        };
        Self { format, indexed }
    }
}

/// Image bytes re-encoded for storage.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub data: Vec<u8>,
    pub format: ImageFormat,
}

impl NormalizedImage {
    /// Decode `bytes` and normalize the result.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let source = SourceKind::detect(bytes);
        let frame = image::load_from_memory(bytes).map_err(Error::Decode)?;
        Ok(Self::encode(&frame, source)?)
    }

    /// Frames with an alpha channel or a palette source are flattened to RGB
    /// and stored as JPEG. Anything else keeps its source format, or PNG when
    /// that is unknown or cannot be encoded.
    pub fn encode(frame: &DynamicImage, source: SourceKind) -> Result<Self, StorageError> {
        if frame.color().has_alpha() || source.indexed {
            let rgb = DynamicImage::ImageRgb8(frame.to_rgb8());
            let data = write_image(&rgb, ImageFormat::Jpeg).map_err(StorageError::Encode)?;
            return Ok(Self {
                data,
                format: ImageFormat::Jpeg,
            });
        }

        if let Some(format) = source.format.filter(|format| format.writing_enabled()) {
            match write_image(frame, format) {
                Ok(data) => return Ok(Self { data, format }),
                Err(err) => debug!(?format, %err, "re-encoding in source format failed, using png"),
            }
        }

        let data = write_image(frame, ImageFormat::Png).map_err(StorageError::Encode)?;
        Ok(Self {
            data,
            format: ImageFormat::Png,
        })
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// File extension recorded in the `format` column.
    pub fn format_name(&self) -> &'static str {
        format_name(self.format)
    }

    pub(crate) fn check_size(&self) -> Result<(), StorageError> {
        check_size(self.size())
    }
}

pub fn check_size(size: usize) -> Result<(), StorageError> {
    if size > MAX_IMAGE_BYTES {
        return Err(StorageError::TooLarge {
            size,
            limit: MAX_IMAGE_BYTES,
        });
    }
    Ok(())
}

fn write_image(img: &DynamicImage, format: ImageFormat) -> image::ImageResult<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    img.write_to(&mut buffer, format)?;
    Ok(buffer.into_inner())
}

fn format_name(format: ImageFormat) -> &'static str {
    format.extensions_str().first().copied().unwrap_or("bin")
}

/// What the image store reports after a successful write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageHandle {
    pub id: i64,
    pub filename: String,
    pub size: usize,
    pub format: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredImage {
    pub id: i64,
    pub filename: String,
    #[serde(skip)]
    pub data: Vec<u8>,
    pub size: i64,
    pub format: String,
    #[serde(with = "time::serde::rfc3339")]
    pub upload_time: OffsetDateTime,
}

impl StoredImage {
    pub fn content_type(&self) -> &'static str {
        ImageFormat::from_extension(&self.format)
            .map(|format| format.to_mime_type())
            .unwrap_or("application/octet-stream")
    }

    /// Write the blob to `path` as a JPEG, flattening any alpha channel.
    pub fn export_jpeg(&self, path: &Path) -> Result<ExportedImage> {
        let decoded = image::load_from_memory(&self.data).map_err(Error::Decode)?;
        let rgb = DynamicImage::ImageRgb8(decoded.to_rgb8());

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut writer = BufWriter::new(File::create(path)?);
        rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut writer, EXPORT_JPEG_QUALITY))
            .map_err(StorageError::Encode)?;
        writer.flush()?;

        Ok(ExportedImage {
            file_size: std::fs::metadata(path)?.len(),
            width: rgb.width(),
            height: rgb.height(),
        })
    }
}

/// Delete earlier `image_*.jpg` exports next to `output`, including `output`
/// itself. Returns how many files were removed; failures are only logged.
pub fn remove_old_exports(output: &Path) -> usize {
    let dir = match output.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            debug!(dir = %dir.display(), %err, "no previous exports to remove");
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let is_output = output.file_name() == Some(name.as_os_str());
        let Some(name) = name.to_str() else { continue };
        if !(name.starts_with("image_") && name.ends_with(".jpg")) && !is_output {
            continue;
        }
        if !entry.file_type().is_ok_and(|kind| kind.is_file()) {
            continue;
        }
        match std::fs::remove_file(entry.path()) {
            Ok(()) => {
                info!(path = %entry.path().display(), "removed old export");
                removed += 1;
            }
            Err(err) => warn!(path = %entry.path().display(), %err, "failed to remove old export"),
        }
    }
    removed
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExportedImage {
    pub file_size: u64,
    pub width: u32,
    pub height: u32,
}

pub trait ImageRepository {
    /// Persist one normalized image under the configured write policy.
    fn store_image(
        &self,
        filename: &str,
        image: &NormalizedImage,
    ) -> impl Future<Output = Result<ImageHandle>> + Send;

    fn get_image(&self, id: i64) -> impl Future<Output = Result<StoredImage>> + Send;

    fn latest_image(&self) -> impl Future<Output = Result<Option<StoredImage>>> + Send;

    fn count_images(&self) -> impl Future<Output = Result<i64>> + Send;

    fn delete_image(&self, id: i64) -> impl Future<Output = Result<()>> + Send;
}
