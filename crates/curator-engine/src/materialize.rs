use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use curator_contracts::media::{MediaItem, MediaPatch};
use image::{DynamicImage, ImageFormat};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{OrchestratorError, Result};
use crate::providers::ArtifactBlob;

/// Caller-owned storage location. Only the materializer writes through it.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Opens `name` for writing. With `create == false` a missing file is an error.
    async fn get_file(&self, name: &str, create: bool) -> io::Result<Box<dyn WritableFile>>;
}

#[async_trait]
pub trait WritableFile: Send {
    async fn write(&mut self, bytes: &[u8]) -> io::Result<()>;
    /// Finalizes the handle. Must be called exactly once, on success and failure alike.
    async fn close(&mut self) -> io::Result<()>;
}

/// A plain directory on the local file system. Writes land in a sibling temp
/// file that is renamed over the target on close.
#[derive(Debug, Clone)]
pub struct FsDirectory {
    root: PathBuf,
}

impl FsDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl Directory for FsDirectory {
    async fn get_file(&self, name: &str, create: bool) -> io::Result<Box<dyn WritableFile>> {
        let name = checked_file_name(name)?;
        let target = self.root.join(name);
        if !create && !fs::try_exists(&target).await? {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} does not exist", target.display()),
            ));
        }
        fs::create_dir_all(&self.root).await?;
        let temp = self
            .root
            .join(format!(".{name}.{}.tmp", uuid::Uuid::new_v4().simple()));
        let file = fs::File::create(&temp).await?;
        Ok(Box::new(FsWritableFile {
            target,
            temp,
            file: Some(file),
            failed: false,
        }))
    }
}

struct FsWritableFile {
    target: PathBuf,
    temp: PathBuf,
    file: Option<fs::File>,
    failed: bool,
}

#[async_trait]
impl WritableFile for FsWritableFile {
    async fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let Some(file) = self.file.as_mut() else {
            return Err(io::Error::other("file handle already closed"));
        };
        let result = file.write_all(bytes).await;
        if result.is_err() {
            self.failed = true;
        }
        result
    }

    async fn close(&mut self) -> io::Result<()> {
        let Some(mut file) = self.file.take() else {
            return Ok(());
        };
        let flushed = if self.failed {
            Err(io::Error::other("write did not complete"))
        } else {
            match file.flush().await {
                Ok(()) => file.sync_all().await,
                Err(err) => Err(err),
            }
        };
        drop(file);
        if let Err(err) = flushed {
            let _ = fs::remove_file(&self.temp).await;
            return Err(err);
        }
        if let Err(err) = fs::rename(&self.temp, &self.target).await {
            let _ = fs::remove_file(&self.temp).await;
            return Err(err);
        }
        Ok(())
    }
}

fn checked_file_name(name: &str) -> io::Result<&str> {
    let trimmed = name.trim();
    let plain = !trimmed.is_empty()
        && trimmed != "."
        && trimmed != ".."
        && !trimmed.contains(['/', '\\'])
        && !trimmed.contains('\0');
    if !plain {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid file name '{name}'"),
        ));
    }
    Ok(trimmed)
}

/// A decoded, optionally persisted artifact ready to merge into the dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct Materialized {
    pub file_name: String,
    pub bytes: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
    pub persisted: bool,
}

impl Materialized {
    pub fn into_patch(self, id: impl Into<String>) -> MediaPatch {
        MediaPatch {
            id: id.into(),
            content: self.bytes,
            width: self.width,
            height: self.height,
        }
    }

    /// New dataset entry. The id is random so identical outputs stay distinct.
    pub fn into_item(self, caption: Option<String>) -> MediaItem {
        let mut item = MediaItem::from_content(self.file_name, self.bytes, self.width, self.height);
        item.id = uuid::Uuid::new_v4().simple().to_string();
        item.caption = caption;
        item
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Materializer;

impl Materializer {
    /// Decodes `blob`, re-encodes it when `file_name` implies another format,
    /// and writes it through `directory` when one is given.
    pub async fn materialize(
        &self,
        blob: ArtifactBlob,
        file_name: &str,
        directory: Option<&dyn Directory>,
        create: bool,
    ) -> Result<Materialized> {
        let decoded = image::load_from_memory(&blob.bytes)
            .map_err(|err| OrchestratorError::decode(file_name, err))?;
        let (width, height) = (decoded.width(), decoded.height());
        let bytes = match_extension(blob, &decoded, file_name)?;

        let persisted = match directory {
            Some(directory) => {
                write_scoped(directory, file_name, &bytes, create).await?;
                debug!(file_name, width, height, "artifact written");
                true
            }
            None => false,
        };

        Ok(Materialized {
            file_name: file_name.to_string(),
            bytes: Arc::from(bytes),
            width,
            height,
            persisted,
        })
    }
}

fn match_extension(blob: ArtifactBlob, decoded: &DynamicImage, file_name: &str) -> Result<Vec<u8>> {
    let Ok(wanted) = ImageFormat::from_path(file_name) else {
        return Ok(blob.bytes);
    };
    if blob.format() == Some(wanted) || !wanted.writing_enabled() {
        return Ok(blob.bytes);
    }

    let mut buffer = Vec::new();
    let mut cursor = Cursor::new(&mut buffer);
    let encoded = if wanted == ImageFormat::Jpeg {
        DynamicImage::ImageRgb8(decoded.to_rgb8()).write_to(&mut cursor, wanted)
    } else {
        decoded.write_to(&mut cursor, wanted)
    };
    encoded.map_err(|err| OrchestratorError::encode(file_name, err))?;
    debug!(file_name, format = ?wanted, "artifact re-encoded to match extension");
    Ok(buffer)
}

async fn write_scoped(
    directory: &dyn Directory,
    file_name: &str,
    bytes: &[u8],
    create: bool,
) -> Result<()> {
    let mut handle = directory
        .get_file(file_name, create)
        .await
        .map_err(|err| OrchestratorError::write(file_name, err))?;
    let written = handle.write(bytes).await;
    let closed = handle.close().await;
    if let (Err(_), Err(close_err)) = (&written, &closed) {
        warn!(file_name, error = %close_err, "close after failed write also failed");
    }
    written
        .and(closed)
        .map_err(|err| OrchestratorError::write(file_name, err))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use anyhow::Result;
    use image::RgbaImage;

    use super::*;
    use crate::providers::encode_png;

    fn png(width: u32, height: u32) -> Result<ArtifactBlob> {
        Ok(ArtifactBlob::png(encode_png(&DynamicImage::ImageRgba8(
            RgbaImage::new(width, height),
        ))?))
    }

    #[derive(Default)]
    struct RecordingDirectory {
        log: Arc<Mutex<Vec<String>>>,
        fail_write: bool,
    }

    struct RecordingFile {
        log: Arc<Mutex<Vec<String>>>,
        fail_write: bool,
    }

    #[async_trait]
    impl Directory for RecordingDirectory {
        async fn get_file(&self, name: &str, create: bool) -> io::Result<Box<dyn WritableFile>> {
            if let Ok(mut log) = self.log.lock() {
                log.push(format!("open {name} create={create}"));
            }
            Ok(Box::new(RecordingFile {
                log: self.log.clone(),
                fail_write: self.fail_write,
            }))
        }
    }

    #[async_trait]
    impl WritableFile for RecordingFile {
        async fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
            if let Ok(mut log) = self.log.lock() {
                log.push(format!("write {}", bytes.len()));
            }
            if self.fail_write {
                return Err(io::Error::other("disk full"));
            }
            Ok(())
        }

        async fn close(&mut self) -> io::Result<()> {
            if let Ok(mut log) = self.log.lock() {
                log.push("close".to_string());
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn writes_and_measures_artifact() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let directory = FsDirectory::new(dir.path());
        let blob = png(64, 32)?;
        let expected = blob.bytes.clone();

        let result = Materializer
            .materialize(blob, "gen-sdxl-00.png", Some(&directory), true)
            .await?;
        assert_eq!((result.width, result.height), (64, 32));
        assert!(result.persisted);
        assert_eq!(std::fs::read(dir.path().join("gen-sdxl-00.png"))?, expected);

        let leftovers = std::fs::read_dir(dir.path())?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
        Ok(())
    }

    #[tokio::test]
    async fn decode_failure_is_propagated_and_nothing_is_written() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let directory = FsDirectory::new(dir.path());
        let blob = ArtifactBlob {
            bytes: b"not an image".to_vec(),
            mime_type: None,
        };
        let err = Materializer
            .materialize(blob, "broken.png", Some(&directory), true)
            .await
            .err();
        assert!(matches!(err, Some(OrchestratorError::Decode { .. })));
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn reencodes_when_extension_disagrees() -> Result<()> {
        let result = Materializer
            .materialize(png(16, 16)?, "photo.jpg", None, false)
            .await?;
        assert!(!result.persisted);
        assert_eq!(image::guess_format(&result.bytes)?, ImageFormat::Jpeg);
        assert_eq!((result.width, result.height), (16, 16));
        Ok(())
    }

    #[tokio::test]
    async fn handle_is_closed_even_when_write_fails() -> Result<()> {
        let directory = RecordingDirectory {
            fail_write: true,
            ..RecordingDirectory::default()
        };
        let err = Materializer
            .materialize(png(4, 4)?, "a.png", Some(&directory), false)
            .await
            .err();
        assert!(matches!(err, Some(OrchestratorError::Write { .. })));
        let log = directory.log.lock().map(|log| log.clone()).unwrap_or_default();
        assert_eq!(log.first().map(String::as_str), Some("open a.png create=false"));
        assert_eq!(log.last().map(String::as_str), Some("close"));
        Ok(())
    }

    #[tokio::test]
    async fn existing_file_survives_a_failed_write() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("keep.png"), b"original")?;
        let temp = dir.path().join(".keep.png.test.tmp");
        let mut handle = FsWritableFile {
            target: dir.path().join("keep.png"),
            temp: temp.clone(),
            file: Some(fs::File::create(&temp).await?),
            failed: false,
        };
        handle.write(b"partial").await?;
        handle.failed = true;
        let closed = handle.close().await;
        assert!(closed.is_err());
        assert_eq!(std::fs::read(dir.path().join("keep.png"))?, b"original");
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn missing_file_without_create_is_an_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let directory = FsDirectory::new(dir.path());
        let err = directory.get_file("absent.png", false).await.err();
        assert_eq!(err.map(|err| err.kind()), Some(io::ErrorKind::NotFound));

        let err = directory.get_file("../escape.png", true).await.err();
        assert_eq!(err.map(|err| err.kind()), Some(io::ErrorKind::InvalidInput));
        Ok(())
    }
}
