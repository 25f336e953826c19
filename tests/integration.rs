use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use scribblefs::archive::{ArchiveState, AssetKind, ScribbleArchive};
use scribblefs::codec::{self, Map, Value};
use scribblefs::key_manager::{KeyManager, SecretLabel};
use scribblefs::metadata::{self, MetadataDefaults};
use scribblefs::secret_store::MemoryStore;
use scribblefs::warning::{Warning, WarningHandler};

#[derive(Default)]
struct RecordingWarnings {
    seen: Mutex<Vec<Warning>>,
}

impl WarningHandler for RecordingWarnings {
    fn on_warning(&self, warning: &Warning) {
        self.seen.lock().unwrap().push(warning.clone());
    }
}

struct TestEnv {
    tmp: TempDir,
    store: Arc<MemoryStore>,
    warnings: Arc<RecordingWarnings>,
    archive: ScribbleArchive,
}

impl TestEnv {
    fn root(&self) -> PathBuf {
        self.tmp.path().join("novel.sc")
    }

    fn scratch(&self) -> PathBuf {
        self.tmp.path().join("scratch")
    }

    fn keys(&self) -> KeyManager {
        KeyManager::new(self.store.clone())
    }
}

/// Helper to create an archive handle backed by an in-memory secret store
fn setup_test_env() -> Result<TestEnv> {
    let tmp = TempDir::new()?;
    std::fs::create_dir(tmp.path().join("scratch"))?;

    let store = Arc::new(MemoryStore::new());
    let warnings = Arc::new(RecordingWarnings::default());
    let archive = ScribbleArchive::new(KeyManager::new(store.clone()), "it.scribble")
        .with_scratch_dir(tmp.path().join("scratch"))
        .with_warning_handler(warnings.clone());

    Ok(TestEnv {
        tmp,
        store,
        warnings,
        archive,
    })
}

fn dir_is_empty(dir: &Path) -> Result<bool> {
    Ok(std::fs::read_dir(dir)?.next().is_none())
}

#[tokio::test]
async fn create_lays_out_encrypted_archive() -> Result<()> {
    let env = setup_test_env()?;
    let root = env.root();

    env.archive
        .create(&root, &MetadataDefaults::new("Novel"))
        .await?;

    assert!(root.join("img/vec").is_dir());
    assert!(root.join("txt").is_dir());
    assert!(root.join("temp").is_dir());

    // the metadata file must not be readable as a document
    let raw = std::fs::read(root.join(".scconfig"))?;
    let as_text = String::from_utf8_lossy(&raw);
    assert!(codec::decode(&as_text).is_err());
    Ok(())
}

#[tokio::test]
async fn create_twice_fails_with_already_exists() -> Result<()> {
    let env = setup_test_env()?;
    let root = env.root();

    env.archive.create(&root, &MetadataDefaults::new("Novel")).await?;
    let err = env
        .archive
        .create(&root, &MetadataDefaults::new("Novel"))
        .await
        .unwrap_err();

    assert_eq!(err.io_kind(), Some(scribblefs::error::IoFailure::AlreadyExists));
    assert_eq!(err.code(), -5);
    Ok(())
}

#[tokio::test]
async fn open_close_without_changes_preserves_plaintext() -> Result<()> {
    let env = setup_test_env()?;
    let root = env.root();
    env.archive.create(&root, &MetadataDefaults::new("Novel")).await?;

    let session = env.archive.open(&root).await?;
    let before = session.read_raw().await?;
    session.close().await?;

    let session = env.archive.open(&root).await?;
    let after = session.read_raw().await?;
    session.close().await?;

    assert_eq!(before, after);
    assert!(dir_is_empty(&env.scratch())?);
    Ok(())
}

#[tokio::test]
async fn metadata_changes_persist_across_sessions() -> Result<()> {
    let env = setup_test_env()?;
    let root = env.root();
    env.archive
        .create(&root, &MetadataDefaults::new("Novel").with_author("ada"))
        .await?;

    let session = env.archive.open(&root).await?;
    let mut doc = session.read_metadata().await?;
    assert!(metadata::has_schema(&doc));
    doc.pointer_mut(&[metadata::REFERENCES])
        .and_then(Value::as_object_mut)
        .expect("references section")
        .insert("bibliography", "refs.bib");
    session.write_metadata(&doc).await?;
    session.close().await?;

    let session = env.archive.open(&root).await?;
    let reread = session.read_metadata().await?;
    session.close().await?;

    assert_eq!(reread, doc);
    assert_eq!(
        reread.pointer(&[metadata::PROJECT, "author"]).and_then(Value::as_str),
        Some("ada")
    );
    Ok(())
}

#[tokio::test]
async fn retrieve_unknown_label_is_secret_not_found() -> Result<()> {
    let env = setup_test_env()?;
    let err = env
        .keys()
        .retrieve(&SecretLabel::new("it.scribble.unknown"))
        .unwrap_err();

    assert!(err.is_secret_not_found());
    assert_eq!(err.code(), -23);
    Ok(())
}

#[test]
fn decode_and_reencode_metadata_tree() -> Result<()> {
    let decoded = codec::decode(r#"{"a":1,"b":[true,null]}"#)?;
    let expected: Map = [
        ("a", Value::Number(1.0)),
        ("b", Value::Array(vec![Value::Bool(true), Value::Null])),
    ]
    .into_iter()
    .collect();

    assert_eq!(decoded, Value::Object(expected));
    assert_eq!(codec::decode(&codec::encode(&decoded))?, decoded);
    Ok(())
}

#[tokio::test]
async fn delete_without_secrets_leaves_archive_untouched() -> Result<()> {
    let env = setup_test_env()?;
    let root = env.root();
    env.archive.create(&root, &MetadataDefaults::new("Novel")).await?;

    let label = env.archive.secret_label(&root).await?;
    env.keys().delete(&label)?;

    let err = env.archive.delete(&root).await.unwrap_err();
    assert!(err.is_secret_not_found());
    assert_eq!(env.archive.inspect(&root).await, ArchiveState::Closed);
    Ok(())
}

#[tokio::test]
async fn delete_removes_archive_and_secrets() -> Result<()> {
    let env = setup_test_env()?;
    let root = env.root();
    env.archive.create(&root, &MetadataDefaults::new("Novel")).await?;
    env.archive
        .write_asset(&root, AssetKind::Text, "ch1.txt", b"It was a dark night.")
        .await?;

    env.archive.delete(&root).await?;

    assert!(!root.exists());
    assert!(env.store.is_empty());
    // deleting the secrets a second time still succeeds
    let label = SecretLabel::new("it.scribble.gone");
    assert_eq!(env.keys().delete(&label)?, 0);
    Ok(())
}

#[tokio::test]
async fn assets_round_trip_and_list() -> Result<()> {
    let env = setup_test_env()?;
    let root = env.root();
    env.archive.create(&root, &MetadataDefaults::new("Novel")).await?;

    let chapter = "Chapter one.\nIt begins.".repeat(5000);
    env.archive
        .write_asset(&root, AssetKind::Text, "ch1.txt", chapter.as_bytes())
        .await?;
    env.archive
        .write_asset(&root, AssetKind::Vector, "cover.svg", b"<svg></svg>")
        .await?;

    let back = env.archive.read_asset(&root, AssetKind::Text, "ch1.txt").await?;
    assert_eq!(back, chapter.as_bytes());

    let texts = env.archive.list_assets(&root, AssetKind::Text).await?;
    assert_eq!(texts.len(), 1);
    assert_eq!(texts[0].0, "ch1.txt");
    let vectors = env.archive.list_assets(&root, AssetKind::Vector).await?;
    assert_eq!(vectors[0].0, "cover.svg");

    // staging leftovers would show up here
    assert!(dir_is_empty(&root.join("temp"))?);

    let err = env
        .archive
        .write_asset(&root, AssetKind::Text, "../escape.txt", b"x")
        .await
        .unwrap_err();
    assert_eq!(err.code(), -6);
    Ok(())
}

#[tokio::test]
async fn asset_session_edits_in_place() -> Result<()> {
    let env = setup_test_env()?;
    let root = env.root();
    env.archive.create(&root, &MetadataDefaults::new("Novel")).await?;
    env.archive
        .write_asset(&root, AssetKind::Text, "draft.txt", b"first")
        .await?;

    let session = env.archive.open_asset(&root, AssetKind::Text, "draft.txt").await?;
    let mut text = session.read_raw().await?;
    text.extend_from_slice(b" and second");
    session.write_raw(&text).await?;
    session.close().await?;

    let out = env.archive.read_asset(&root, AssetKind::Text, "draft.txt").await?;
    assert_eq!(out, b"first and second");
    Ok(())
}

#[tokio::test]
async fn dropped_session_reports_warning() -> Result<()> {
    let env = setup_test_env()?;
    let root = env.root();
    env.archive.create(&root, &MetadataDefaults::new("Novel")).await?;

    {
        let session = env.archive.open(&root).await?;
        session.set_favorite(true).await?;
    }

    assert!(dir_is_empty(&env.scratch())?);
    let seen = env.warnings.seen.lock().unwrap().clone();
    assert!(matches!(seen.as_slice(), [Warning::SessionNotClosed { .. }]));

    let session = env.archive.open(&root).await?;
    assert_eq!(metadata::is_favorite(&session.read_metadata().await?), Some(false));
    session.close().await?;
    Ok(())
}
