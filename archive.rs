//! Archive lifecycle: create, open, close and delete Scribble archives.
//!
//! This module provides [`ScribbleArchive`], the primary interface for working
//! with archives on disk, and [`ArchiveSession`], the decrypted working copy
//! of one encrypted file inside an archive.
//!
//! ## Layout
//!
//! ```text
//! <root>/img/vec/    vector assets (encrypted)
//! <root>/txt/        text assets (encrypted)
//! <root>/temp/       staging area for ciphertext being written
//! <root>/.scconfig   metadata document (encrypted)
//! <root>/.scid       container id, scopes the secret-store labels
//! ```
//!
//! ## Access discipline
//!
//! Every content access is decrypt-to-temp, mutate, re-encrypt, discard-temp.
//! Plaintext only lives in a uniquely named file under the scratch directory,
//! which is outside the archive. Ciphertext is written to `temp/` first and
//! renamed over its target, so a failed write never leaves a truncated file.
//!
//! Concurrent sessions on the same file are not coordinated; callers must
//! serialize them.

use crate::codec::{self, Value};
use crate::crypto;
use crate::error::{CodecError, IoFailure, IoResultExt, Result, ScribbleError};
use crate::key_manager::{KeyManager, KeyMaterial, SecretLabel};
use crate::metadata::{self, MetadataDefaults};
use crate::warning::{NoopWarnings, Warning, WarningHandler};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tempfile::TempPath;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const CONFIG_FILE: &str = ".scconfig";
pub const ID_FILE: &str = ".scid";

const STAGING_PREFIX: &str = ".staging-";
const PLAINTEXT_PREFIX: &str = "scribble-";
const PARTIAL_PREFIX: &str = ".partial-";

/// Fixed paths of an archive rooted at `root`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveLayout {
    pub root: PathBuf,
    pub image_dir: PathBuf,
    pub vector_dir: PathBuf,
    pub text_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub config_file: PathBuf,
    pub id_file: PathBuf,
}

impl ArchiveLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let image_dir = root.join("img");
        Self {
            vector_dir: image_dir.join("vec"),
            image_dir,
            text_dir: root.join("txt"),
            temp_dir: root.join("temp"),
            config_file: root.join(CONFIG_FILE),
            id_file: root.join(ID_FILE),
            root,
        }
    }

    pub fn asset_dir(&self, kind: AssetKind) -> &Path {
        match kind {
            AssetKind::Text => &self.text_dir,
            AssetKind::Vector => &self.vector_dir,
        }
    }

    /// Entries that must all exist for the archive to be usable.
    fn required(&self) -> [&Path; 5] {
        [
            &self.vector_dir,
            &self.text_dir,
            &self.temp_dir,
            &self.config_file,
            &self.id_file,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveState {
    /// Root does not exist.
    Absent,
    /// Every layout entry is present.
    Closed,
    /// Root exists but part of the layout is missing.
    Corrupt,
}

/// Asset directories inside an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Text,
    Vector,
}

impl AssetKind {
    pub fn dir_name(self) -> &'static str {
        match self {
            AssetKind::Text => "txt",
            AssetKind::Vector => "img/vec",
        }
    }
}

impl FromStr for AssetKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "txt" | "text" => Ok(AssetKind::Text),
            "vec" | "vector" | "img" => Ok(AssetKind::Vector),
            other => Err(format!("unknown asset kind '{}' (expected txt or vec)", other)),
        }
    }
}

pub struct ScribbleArchive {
    keys: KeyManager,
    namespace: String,
    scratch_dir: PathBuf,
    warnings: Arc<dyn WarningHandler>,
}

impl ScribbleArchive {
    /// `namespace` is the tag that prefixes every secret-store label.
    pub fn new(keys: KeyManager, namespace: impl Into<String>) -> Self {
        Self {
            keys,
            namespace: namespace.into(),
            scratch_dir: std::env::temp_dir(),
            warnings: Arc::new(NoopWarnings),
        }
    }

    /// Directory for decrypted working copies. Must not be inside an archive.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    pub fn with_warning_handler(mut self, handler: Arc<dyn WarningHandler>) -> Self {
        self.warnings = handler;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    pub async fn inspect(&self, root: impl AsRef<Path>) -> ArchiveState {
        let layout = ArchiveLayout::new(root.as_ref());
        if !fs::try_exists(&layout.root).await.unwrap_or(false) {
            return ArchiveState::Absent;
        }
        for path in layout.required() {
            if !fs::try_exists(path).await.unwrap_or(false) {
                debug!(path = %path.display(), "archive entry missing");
                return ArchiveState::Corrupt;
            }
        }
        ArchiveState::Closed
    }

    /// Reads the container id from `.scid`.
    pub async fn container_id(&self, root: impl AsRef<Path>) -> Result<Uuid> {
        read_container_id(&ArchiveLayout::new(root.as_ref())).await
    }

    /// The label under which this archive's key material is stored.
    pub async fn secret_label(&self, root: impl AsRef<Path>) -> Result<SecretLabel> {
        let id = self.container_id(root).await?;
        Ok(SecretLabel::for_container(&self.namespace, &id))
    }

    /// Creates a new archive at `root` with a fresh key and default metadata.
    ///
    /// `root` itself must not exist. A failure part way leaves whatever was
    /// already created in place; nothing is rolled back.
    pub async fn create(&self, root: impl AsRef<Path>, defaults: &MetadataDefaults) -> Result<ArchiveLayout> {
        let layout = ArchiveLayout::new(root.as_ref());
        info!(archive = %layout.root.display(), "creating archive");

        for dir in [
            &layout.root,
            &layout.image_dir,
            &layout.vector_dir,
            &layout.text_dir,
            &layout.temp_dir,
        ] {
            fs::create_dir(dir).await.at(dir, IoFailure::WriteFailed)?;
        }

        let id = Uuid::new_v4();
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&layout.id_file)
            .await
            .at(&layout.id_file, IoFailure::WriteFailed)?;
        fs::write(&layout.id_file, id.to_string())
            .await
            .at(&layout.id_file, IoFailure::WriteFailed)?;

        let label = SecretLabel::for_container(&self.namespace, &id);
        let material = KeyManager::generate()?;
        self.keys.store(&material, &label)?;

        let document = codec::encode(&defaults.to_document());
        let mut reader = document.as_bytes();
        encrypt_into(&material, &mut reader, &layout.config_file, &layout.temp_dir).await?;

        info!(archive = %layout.root.display(), container_id = %id, "archive created");
        Ok(layout)
    }

    /// Decrypts the metadata file into a scratch copy and returns the session.
    pub async fn open(&self, root: impl AsRef<Path>) -> Result<ArchiveSession> {
        let layout = ArchiveLayout::new(root.as_ref());
        let target = layout.config_file.clone();
        self.open_file(&layout, target).await
    }

    /// Deletes the key material and then the archive directory.
    ///
    /// If the key material cannot be retrieved nothing is touched and the
    /// secret-store `NotFound` error is returned.
    pub async fn delete(&self, root: impl AsRef<Path>) -> Result<()> {
        let layout = ArchiveLayout::new(root.as_ref());
        info!(archive = %layout.root.display(), "deleting archive");

        let label = SecretLabel::for_container(&self.namespace, &read_container_id(&layout).await?);
        // Fail closed before removing anything.
        drop(self.keys.retrieve(&label)?);

        let removed = self.keys.delete(&label)?;
        if removed < 2 {
            self.warnings.on_warning(&Warning::SecretAlreadyAbsent {
                label: label.to_string(),
            });
        }

        fs::remove_dir_all(&layout.root)
            .await
            .at(&layout.root, IoFailure::WriteFailed)?;
        info!(archive = %layout.root.display(), "archive deleted");
        Ok(())
    }

    /// Encrypts `data` into the named asset, replacing any previous content.
    pub async fn write_asset(&self, root: impl AsRef<Path>, kind: AssetKind, name: &str, data: &[u8]) -> Result<u64> {
        let mut reader = data;
        self.write_asset_stream(root, kind, name, &mut reader).await
    }

    /// Streaming variant of [`Self::write_asset`]. Returns plaintext bytes written.
    pub async fn write_asset_stream<R>(&self, root: impl AsRef<Path>, kind: AssetKind, name: &str, reader: &mut R) -> Result<u64>
    where
        R: AsyncRead + Unpin,
    {
        let layout = ArchiveLayout::new(root.as_ref());
        let path = asset_path(&layout, kind, name)?;
        debug!(archive = %layout.root.display(), asset = name, kind = kind.dir_name(), "encrypting asset");

        let material = self.material_for(&layout).await?;
        let bytes = encrypt_into(&material, reader, &path, &layout.temp_dir).await?;
        info!(asset = name, kind = kind.dir_name(), bytes, "asset encrypted");
        Ok(bytes)
    }

    pub async fn read_asset(&self, root: impl AsRef<Path>, kind: AssetKind, name: &str) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.read_asset_stream(root, kind, name, &mut out).await?;
        Ok(out)
    }

    /// Decrypts the named asset straight into `writer`.
    pub async fn read_asset_stream<W>(&self, root: impl AsRef<Path>, kind: AssetKind, name: &str, writer: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let layout = ArchiveLayout::new(root.as_ref());
        let path = asset_path(&layout, kind, name)?;
        debug!(archive = %layout.root.display(), asset = name, kind = kind.dir_name(), "decrypting asset");

        let material = self.material_for(&layout).await?;
        let mut input = fs::File::open(&path).await.at(&path, IoFailure::ReadFailed)?;
        let result = crypto::decrypt_stream(&mut input, writer, material.key(), material.iv()).await;
        match &result {
            Ok(bytes) => info!(asset = name, bytes, "asset decrypted"),
            Err(e) => error!(asset = name, error = %e, "asset decryption failed"),
        }
        result
    }

    /// Decrypts the named asset into a new file at `dest`.
    ///
    /// Output is written to a hidden file next to `dest` and renamed into
    /// place only after the padding has been verified. On failure nothing is
    /// left at `dest` and the partial plaintext is removed.
    pub async fn export_asset(&self, root: impl AsRef<Path>, kind: AssetKind, name: &str, dest: impl AsRef<Path>) -> Result<u64> {
        let dest = dest.as_ref();
        let dir = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let partial = tempfile::Builder::new()
            .prefix(PARTIAL_PREFIX)
            .tempfile_in(&dir)
            .at(&dir, IoFailure::WriteFailed)?;
        let (file, partial_path) = partial.into_parts();
        let mut output = fs::File::from_std(file);

        let bytes = self.read_asset_stream(root, kind, name, &mut output).await?;
        output.sync_all().await.at(&partial_path, IoFailure::WriteFailed)?;
        drop(output);

        partial_path
            .persist(dest)
            .map_err(|e| ScribbleError::io(IoFailure::classify(&e.error, IoFailure::WriteFailed), dest, e.error))?;
        info!(asset = name, dest = %dest.display(), bytes, "asset exported");
        Ok(bytes)
    }

    /// Opens a session on one asset. A missing asset is created empty first.
    pub async fn open_asset(&self, root: impl AsRef<Path>, kind: AssetKind, name: &str) -> Result<ArchiveSession> {
        let layout = ArchiveLayout::new(root.as_ref());
        let path = asset_path(&layout, kind, name)?;

        if !fs::try_exists(&path).await.at(&path, IoFailure::ReadFailed)? {
            debug!(asset = name, "creating empty asset before opening");
            let material = self.material_for(&layout).await?;
            let mut empty: &[u8] = &[];
            encrypt_into(&material, &mut empty, &path, &layout.temp_dir).await?;
        }
        self.open_file(&layout, path).await
    }

    /// Removes an asset. A missing asset is not an error.
    pub async fn delete_asset(&self, root: impl AsRef<Path>, kind: AssetKind, name: &str) -> Result<()> {
        let layout = ArchiveLayout::new(root.as_ref());
        let path = asset_path(&layout, kind, name)?;

        match fs::remove_file(&path).await {
            Ok(()) => {
                info!(asset = name, kind = kind.dir_name(), "asset deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(asset = name, "asset not found during delete");
                Ok(())
            }
            Err(e) => Err(ScribbleError::io(
                IoFailure::classify(&e, IoFailure::WriteFailed),
                path,
                e,
            )),
        }
    }

    /// Lists assets of one kind as `(name, encrypted size)`, sorted by name.
    pub async fn list_assets(&self, root: impl AsRef<Path>, kind: AssetKind) -> Result<Vec<(String, u64)>> {
        let layout = ArchiveLayout::new(root.as_ref());
        let dir = layout.asset_dir(kind);
        let mut assets = Vec::new();

        let mut entries = fs::read_dir(dir).await.at(dir, IoFailure::ReadFailed)?;
        while let Some(entry) = entries.next_entry().await.at(dir, IoFailure::ReadFailed)? {
            let meta = entry.metadata().await.at(&entry.path(), IoFailure::ReadFailed)?;
            if !meta.is_file() {
                continue;
            }
            let name = match entry.file_name().to_str() {
                Some(name) => name.to_string(),
                None => continue,
            };
            assets.push((name, meta.len()));
        }

        assets.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(assets)
    }

    async fn material_for(&self, layout: &ArchiveLayout) -> Result<KeyMaterial> {
        require_intact(layout).await?;
        let label = SecretLabel::for_container(&self.namespace, &read_container_id(layout).await?);
        self.keys.retrieve(&label)
    }

    async fn open_file(&self, layout: &ArchiveLayout, target: PathBuf) -> Result<ArchiveSession> {
        require_intact(layout).await?;
        // Compare resolved paths so `..`, relative roots and symlinks cannot
        // place the scratch directory inside the archive unnoticed.
        let root = fs::canonicalize(&layout.root)
            .await
            .at(&layout.root, IoFailure::ReadFailed)?;
        let scratch = fs::canonicalize(&self.scratch_dir)
            .await
            .at(&self.scratch_dir, IoFailure::ReadFailed)?;
        if scratch.starts_with(&root) {
            return Err(ScribbleError::invalid_argument(
                &self.scratch_dir,
                "scratch directory must be outside the archive",
            ));
        }
        let label = SecretLabel::for_container(&self.namespace, &read_container_id(layout).await?);
        debug!(target = %target.display(), label = %label, "opening session");

        let plaintext = {
            let material = self.keys.retrieve(&label)?;
            decrypt_to_scratch(&material, &target, &self.scratch_dir).await?
        };

        info!(target = %target.display(), "session opened");
        Ok(ArchiveSession {
            keys: self.keys.clone(),
            label,
            target,
            staging_dir: layout.temp_dir.clone(),
            plaintext: Some(plaintext),
            warnings: self.warnings.clone(),
        })
    }
}

/// Decrypted working copy of one encrypted archive file.
///
/// All reads and writes go to the scratch copy. [`ArchiveSession::close`]
/// re-encrypts it over the target and removes the copy. Dropping a session
/// without closing removes the copy and discards the changes.
pub struct ArchiveSession {
    keys: KeyManager,
    label: SecretLabel,
    target: PathBuf,
    staging_dir: PathBuf,
    plaintext: Option<TempPath>,
    warnings: Arc<dyn WarningHandler>,
}

impl ArchiveSession {
    /// The encrypted file this session writes back to.
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Path of the decrypted scratch copy.
    pub fn plaintext_path(&self) -> &Path {
        self.plaintext.as_deref().unwrap_or(Path::new(""))
    }

    pub async fn read_raw(&self) -> Result<Vec<u8>> {
        let path = self.plaintext_path();
        fs::read(path).await.at(path, IoFailure::ReadFailed)
    }

    pub async fn write_raw(&self, data: &[u8]) -> Result<()> {
        let path = self.plaintext_path();
        fs::write(path, data).await.at(path, IoFailure::WriteFailed)
    }

    pub async fn read_metadata(&self) -> Result<Value> {
        let bytes = self.read_raw().await?;
        let text = String::from_utf8(bytes).map_err(|e| CodecError::UnexpectedToken {
            position: e.utf8_error().valid_up_to(),
            expected: "UTF-8 text",
            found: char::REPLACEMENT_CHARACTER,
        })?;
        Ok(codec::decode(&text)?)
    }

    pub async fn write_metadata(&self, document: &Value) -> Result<()> {
        self.write_raw(codec::encode(document).as_bytes()).await
    }

    /// Stamps `project.last_changed_at` with the current time.
    pub async fn touch(&self) -> Result<()> {
        let mut document = self.read_metadata().await?;
        if !metadata::touch(&mut document, &metadata::now_rfc3339()) {
            warn!(target = %self.target.display(), "metadata has no project section");
        }
        self.write_metadata(&document).await
    }

    /// Sets `flags.is_Favorite` and refreshes the change timestamp.
    pub async fn set_favorite(&self, favorite: bool) -> Result<()> {
        let mut document = self.read_metadata().await?;
        metadata::set_favorite(&mut document, favorite);
        metadata::touch(&mut document, &metadata::now_rfc3339());
        self.write_metadata(&document).await
    }

    /// Re-encrypts the working copy over the target, then removes the copy
    /// whether or not encryption succeeded. Returns plaintext bytes written.
    pub async fn close(mut self) -> Result<u64> {
        let plaintext = match self.plaintext.take() {
            Some(path) => path,
            None => return Ok(0),
        };

        let result = async {
            let material = self.keys.retrieve(&self.label)?;
            let mut input = fs::File::open(&plaintext)
                .await
                .at(&plaintext, IoFailure::ReadFailed)?;
            encrypt_into(&material, &mut input, &self.target, &self.staging_dir).await
        }
        .await;

        let copy = plaintext.to_path_buf();
        if let Err(e) = plaintext.close() {
            warn!(path = %copy.display(), error = %e, "failed to remove plaintext copy");
            self.warnings.on_warning(&Warning::TempCleanupFailed {
                path: copy,
                reason: e.to_string(),
            });
        }

        match &result {
            Ok(bytes) => info!(target = %self.target.display(), bytes, "session closed"),
            Err(e) => error!(target = %self.target.display(), error = %e, "re-encryption failed"),
        }
        result
    }
}

impl Drop for ArchiveSession {
    fn drop(&mut self) {
        if let Some(plaintext) = self.plaintext.take() {
            warn!(target = %self.target.display(), "session dropped without close");
            self.warnings.on_warning(&Warning::SessionNotClosed {
                target: self.target.clone(),
            });
            let copy = plaintext.to_path_buf();
            if let Err(e) = plaintext.close() {
                self.warnings.on_warning(&Warning::TempCleanupFailed {
                    path: copy,
                    reason: e.to_string(),
                });
            }
        }
    }
}

async fn require_intact(layout: &ArchiveLayout) -> Result<()> {
    for path in layout.required() {
        if !fs::try_exists(path).await.at(path, IoFailure::ReadFailed)? {
            return Err(ScribbleError::io(
                IoFailure::NotFound,
                path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "archive entry missing"),
            ));
        }
    }
    Ok(())
}

async fn read_container_id(layout: &ArchiveLayout) -> Result<Uuid> {
    let path = &layout.id_file;
    let raw = fs::read_to_string(path).await.at(path, IoFailure::ReadFailed)?;
    Uuid::parse_str(raw.trim()).map_err(|e| {
        ScribbleError::io(
            IoFailure::ReadFailed,
            path,
            std::io::Error::new(std::io::ErrorKind::InvalidData, format!("malformed container id: {e}")),
        )
    })
}

fn asset_path(layout: &ArchiveLayout, kind: AssetKind, name: &str) -> Result<PathBuf> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(layout.asset_dir(kind).join(name)),
        _ => Err(ScribbleError::invalid_argument(
            name,
            "asset name must be a single path component",
        )),
    }
}

/// Encrypts `reader` into a staging file and renames it over `target`.
/// On failure the staging file is removed and `target` is untouched.
async fn encrypt_into<R>(material: &KeyMaterial, reader: &mut R, target: &Path, staging_dir: &Path) -> Result<u64>
where
    R: AsyncRead + Unpin,
{
    let staged = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempfile_in(staging_dir)
        .at(staging_dir, IoFailure::WriteFailed)?;
    let (file, staged_path) = staged.into_parts();
    let mut file = fs::File::from_std(file);

    let bytes = crypto::encrypt_stream(reader, &mut file, material.key(), material.iv()).await?;
    file.sync_all().await.at(&staged_path, IoFailure::WriteFailed)?;
    drop(file);

    staged_path
        .persist(target)
        .map_err(|e| ScribbleError::io(IoFailure::classify(&e.error, IoFailure::WriteFailed), target, e.error))?;
    Ok(bytes)
}

/// Decrypts `source` into a fresh, uniquely named file under `scratch_dir`.
/// The returned path removes the file when dropped.
async fn decrypt_to_scratch(material: &KeyMaterial, source: &Path, scratch_dir: &Path) -> Result<TempPath> {
    let mut input = fs::File::open(source).await.at(source, IoFailure::ReadFailed)?;

    let scratch = tempfile::Builder::new()
        .prefix(PLAINTEXT_PREFIX)
        .tempfile_in(scratch_dir)
        .at(scratch_dir, IoFailure::WriteFailed)?;
    let (file, path) = scratch.into_parts();
    let mut output = fs::File::from_std(file);

    let bytes = crypto::decrypt_stream(&mut input, &mut output, material.key(), material.iv()).await?;
    debug!(source = %source.display(), bytes, "decrypted to scratch copy");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secret_store::MemoryStore;
    use tempfile::TempDir;

    struct Fixture {
        _dirs: TempDir,
        root: PathBuf,
        scratch: PathBuf,
        store: Arc<MemoryStore>,
        archive: ScribbleArchive,
    }

    fn fixture() -> Fixture {
        let dirs = TempDir::new().expect("tempdir");
        let root = dirs.path().join("doc.sc");
        let scratch = dirs.path().join("scratch");
        std::fs::create_dir(&scratch).expect("scratch dir");

        let store = Arc::new(MemoryStore::new());
        let archive = ScribbleArchive::new(KeyManager::new(store.clone()), "test.scribble")
            .with_scratch_dir(&scratch);
        Fixture {
            _dirs: dirs,
            root,
            scratch,
            store,
            archive,
        }
    }

    fn scratch_is_empty(dir: &Path) -> bool {
        std::fs::read_dir(dir).expect("read scratch").next().is_none()
    }

    #[test]
    fn test_layout_paths() {
        let layout = ArchiveLayout::new("/tmp/doc.sc");
        assert_eq!(layout.vector_dir, Path::new("/tmp/doc.sc/img/vec"));
        assert_eq!(layout.text_dir, Path::new("/tmp/doc.sc/txt"));
        assert_eq!(layout.temp_dir, Path::new("/tmp/doc.sc/temp"));
        assert_eq!(layout.config_file, Path::new("/tmp/doc.sc/.scconfig"));
        assert_eq!(layout.asset_dir(AssetKind::Vector), layout.vector_dir.as_path());
    }

    #[test]
    fn test_asset_kind_parsing() {
        assert_eq!("txt".parse::<AssetKind>(), Ok(AssetKind::Text));
        assert_eq!("Vector".parse::<AssetKind>(), Ok(AssetKind::Vector));
        assert!("pdf".parse::<AssetKind>().is_err());
    }

    #[test]
    fn test_asset_names_are_single_components() {
        let layout = ArchiveLayout::new("/tmp/doc.sc");
        assert!(asset_path(&layout, AssetKind::Text, "chapter1.txt").is_ok());
        for bad in ["", "../escape", "a/b", "/abs", ".."] {
            let err = asset_path(&layout, AssetKind::Text, bad).unwrap_err();
            assert_eq!(err.io_kind(), Some(IoFailure::InvalidArgument), "{bad:?}");
        }
    }

    #[tokio::test]
    async fn test_create_builds_layout_and_stores_keys() {
        let fx = fixture();
        assert_eq!(fx.archive.inspect(&fx.root).await, ArchiveState::Absent);

        let layout = fx
            .archive
            .create(&fx.root, &MetadataDefaults::new("doc"))
            .await
            .expect("create");

        assert!(layout.vector_dir.is_dir());
        assert!(layout.text_dir.is_dir());
        assert!(layout.temp_dir.is_dir());
        assert!(layout.config_file.is_file());
        assert_eq!(fx.archive.inspect(&fx.root).await, ArchiveState::Closed);

        let label = fx.archive.secret_label(&fx.root).await.expect("label");
        assert!(label.namespace().starts_with("test.scribble."));
        assert!(fx.store.contains(&label.key_entry()));
        assert!(fx.store.contains(&label.iv_entry()));

        // only ciphertext on disk, nothing left in staging
        let raw = std::fs::read(&layout.config_file).expect("read config");
        assert_eq!(raw.len() % crypto::BLOCK_SIZE, 0);
        assert!(codec::decode(&String::from_utf8_lossy(&raw)).is_err());
        assert!(scratch_is_empty(&layout.temp_dir));
    }

    #[tokio::test]
    async fn test_create_on_existing_root_fails() {
        let fx = fixture();
        fx.archive
            .create(&fx.root, &MetadataDefaults::new("doc"))
            .await
            .expect("create");

        let err = fx
            .archive
            .create(&fx.root, &MetadataDefaults::new("doc"))
            .await
            .unwrap_err();
        assert_eq!(err.io_kind(), Some(IoFailure::AlreadyExists));
        assert_eq!(fx.store.len(), 2);
    }

    #[tokio::test]
    async fn test_archives_get_distinct_labels() {
        let fx = fixture();
        let other = fx.root.with_file_name("other.sc");
        fx.archive.create(&fx.root, &MetadataDefaults::new("a")).await.expect("create a");
        fx.archive.create(&other, &MetadataDefaults::new("b")).await.expect("create b");

        let a = fx.archive.secret_label(&fx.root).await.expect("label a");
        let b = fx.archive.secret_label(&other).await.expect("label b");
        assert_ne!(a, b);
        assert_eq!(fx.store.len(), 4);
    }

    #[tokio::test]
    async fn test_session_round_trip_and_cleanup() {
        let fx = fixture();
        fx.archive
            .create(&fx.root, &MetadataDefaults::new("doc"))
            .await
            .expect("create");

        let session = fx.archive.open(&fx.root).await.expect("open");
        let copy = session.plaintext_path().to_path_buf();
        assert!(copy.starts_with(&fx.scratch));
        assert!(!copy.starts_with(&fx.root));

        let document = session.read_metadata().await.expect("metadata");
        assert_eq!(metadata::project_name(&document), Some("doc"));

        session.set_favorite(true).await.expect("favorite");
        session.close().await.expect("close");
        assert!(!copy.exists());
        assert!(scratch_is_empty(&fx.scratch));

        let session = fx.archive.open(&fx.root).await.expect("reopen");
        let document = session.read_metadata().await.expect("metadata");
        assert_eq!(metadata::is_favorite(&document), Some(true));
        session.close().await.expect("close");
    }

    #[tokio::test]
    async fn test_dropped_session_discards_changes() {
        let fx = fixture();
        fx.archive
            .create(&fx.root, &MetadataDefaults::new("doc"))
            .await
            .expect("create");

        let session = fx.archive.open(&fx.root).await.expect("open");
        session.write_raw(b"garbage").await.expect("write");
        drop(session);
        assert!(scratch_is_empty(&fx.scratch));

        let session = fx.archive.open(&fx.root).await.expect("reopen");
        assert!(metadata::has_schema(&session.read_metadata().await.expect("metadata")));
        session.close().await.expect("close");
    }

    #[tokio::test]
    async fn test_close_without_keys_still_removes_copy() {
        let fx = fixture();
        fx.archive
            .create(&fx.root, &MetadataDefaults::new("doc"))
            .await
            .expect("create");
        let before = std::fs::read(fx.root.join(CONFIG_FILE)).expect("read");

        let session = fx.archive.open(&fx.root).await.expect("open");
        session.write_raw(b"{}").await.expect("write");
        let label = fx.archive.secret_label(&fx.root).await.expect("label");
        KeyManager::new(fx.store.clone()).delete(&label).expect("drop keys");

        let err = session.close().await.unwrap_err();
        assert!(err.is_secret_not_found());
        assert!(scratch_is_empty(&fx.scratch));
        assert_eq!(std::fs::read(fx.root.join(CONFIG_FILE)).expect("read"), before);
    }

    #[tokio::test]
    async fn test_scratch_inside_archive_is_rejected() {
        let fx = fixture();
        fx.archive
            .create(&fx.root, &MetadataDefaults::new("doc"))
            .await
            .expect("create");

        let store = fx.store.clone();
        let inside = ScribbleArchive::new(KeyManager::new(store), "test.scribble")
            .with_scratch_dir(fx.root.join("temp"));
        let err = inside.open(&fx.root).await.err().expect("must fail");
        assert_eq!(err.io_kind(), Some(IoFailure::InvalidArgument));

        // the same archive reached through `..` is still the same archive
        let parent = fx.root.parent().expect("parent").to_path_buf();
        std::fs::create_dir(parent.join("sub")).expect("sub dir");
        let aliased = parent.join("sub").join("..").join("doc.sc");
        let err = inside.open(&aliased).await.err().expect("must fail");
        assert_eq!(err.io_kind(), Some(IoFailure::InvalidArgument));
        assert!(scratch_is_empty(&fx.root.join("temp")));
    }

    #[tokio::test]
    async fn test_export_writes_file() {
        let fx = fixture();
        fx.archive
            .create(&fx.root, &MetadataDefaults::new("doc"))
            .await
            .expect("create");
        fx.archive
            .write_asset(&fx.root, AssetKind::Text, "ch1.txt", b"chapter one")
            .await
            .expect("write");

        let out_dir = fx.scratch.join("out");
        std::fs::create_dir(&out_dir).expect("out dir");
        let dest = out_dir.join("ch1.txt");
        let bytes = fx
            .archive
            .export_asset(&fx.root, AssetKind::Text, "ch1.txt", &dest)
            .await
            .expect("export");

        assert_eq!(bytes, 11);
        assert_eq!(std::fs::read(&dest).expect("read export"), b"chapter one");
        assert_eq!(std::fs::read_dir(&out_dir).expect("list").count(), 1);
    }

    #[tokio::test]
    async fn test_failed_export_leaves_no_plaintext() {
        let fx = fixture();
        fx.archive
            .create(&fx.root, &MetadataDefaults::new("doc"))
            .await
            .expect("create");
        let body = vec![b'x'; 200_000];
        fx.archive
            .write_asset(&fx.root, AssetKind::Text, "big.txt", &body)
            .await
            .expect("write");

        // cut into the final block; every earlier block still decrypts
        let asset = fx.root.join("txt/big.txt");
        let mut ciphertext = std::fs::read(&asset).expect("read ciphertext");
        ciphertext.truncate(ciphertext.len() - 3);
        std::fs::write(&asset, &ciphertext).expect("tamper");

        let out_dir = fx.scratch.join("out");
        std::fs::create_dir(&out_dir).expect("out dir");
        let dest = out_dir.join("big.txt");
        let err = fx
            .archive
            .export_asset(&fx.root, AssetKind::Text, "big.txt", &dest)
            .await
            .unwrap_err();

        assert_eq!(err.code(), -13);
        assert!(!dest.exists());
        assert!(scratch_is_empty(&out_dir));
    }

    #[tokio::test]
    async fn test_corrupt_layout_is_detected() {
        let fx = fixture();
        fx.archive
            .create(&fx.root, &MetadataDefaults::new("doc"))
            .await
            .expect("create");
        std::fs::remove_dir(fx.root.join("txt")).expect("remove txt");

        assert_eq!(fx.archive.inspect(&fx.root).await, ArchiveState::Corrupt);
        let err = fx.archive.open(&fx.root).await.err().expect("must fail");
        assert_eq!(err.io_kind(), Some(IoFailure::NotFound));
    }

    #[tokio::test]
    async fn test_asset_round_trip_and_listing() {
        let fx = fixture();
        fx.archive
            .create(&fx.root, &MetadataDefaults::new("doc"))
            .await
            .expect("create");

        fx.archive
            .write_asset(&fx.root, AssetKind::Text, "b.txt", b"second")
            .await
            .expect("write b");
        fx.archive
            .write_asset(&fx.root, AssetKind::Text, "a.txt", b"first chapter")
            .await
            .expect("write a");
        fx.archive
            .write_asset(&fx.root, AssetKind::Vector, "logo.svg", b"<svg/>")
            .await
            .expect("write svg");

        assert_eq!(
            fx.archive.read_asset(&fx.root, AssetKind::Text, "a.txt").await.expect("read"),
            b"first chapter"
        );
        let on_disk = std::fs::read(fx.root.join("txt/a.txt")).expect("raw");
        assert_ne!(on_disk, b"first chapter");

        let texts = fx.archive.list_assets(&fx.root, AssetKind::Text).await.expect("list");
        let names: Vec<&str> = texts.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["a.txt", "b.txt"]);
        assert_eq!(texts[0].1, crypto::padded_len(13));

        fx.archive
            .delete_asset(&fx.root, AssetKind::Text, "a.txt")
            .await
            .expect("delete");
        fx.archive
            .delete_asset(&fx.root, AssetKind::Text, "a.txt")
            .await
            .expect("delete again");
        assert_eq!(fx.archive.list_assets(&fx.root, AssetKind::Text).await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn test_open_asset_session() {
        let fx = fixture();
        fx.archive
            .create(&fx.root, &MetadataDefaults::new("doc"))
            .await
            .expect("create");

        let session = fx
            .archive
            .open_asset(&fx.root, AssetKind::Text, "notes.txt")
            .await
            .expect("open new asset");
        assert!(session.read_raw().await.expect("read").is_empty());
        session.write_raw(b"draft one").await.expect("write");
        session.close().await.expect("close");

        assert_eq!(
            fx.archive.read_asset(&fx.root, AssetKind::Text, "notes.txt").await.expect("read"),
            b"draft one"
        );
    }

    #[tokio::test]
    async fn test_delete_removes_keys_and_directory() {
        let fx = fixture();
        fx.archive
            .create(&fx.root, &MetadataDefaults::new("doc"))
            .await
            .expect("create");

        fx.archive.delete(&fx.root).await.expect("delete");
        assert!(!fx.root.exists());
        assert!(fx.store.is_empty());
        assert_eq!(fx.archive.inspect(&fx.root).await, ArchiveState::Absent);
    }
}
