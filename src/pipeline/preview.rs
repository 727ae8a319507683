//! PCB preview: Gerber archive → rendered board image.
//!
//! OnBoard submissions ship their fabrication files as a zip. We unpack it
//! into a scratch [`TempDir`], keep only recognised Gerber/drill layers
//! (skipping macOS resource forks and dotfiles), and hand that set to an
//! external renderer. The renderer must leave one designated image behind;
//! it is copied into the record's work directory before the scratch
//! directory is dropped.
//!
//! Nothing here retries. A failed render only costs the receipt its image.

use crate::config::PreviewCommand;
use crate::error::ArtifactError;
use async_trait::async_trait;
use std::io::{Cursor, Read};
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info};

/// File name of the preview inside a record's work directory.
pub const PREVIEW_FILE: &str = "preview.png";

/// Gerber, drill and board-outline extensions accepted from an archive.
pub const FABRICATION_EXTENSIONS: &[&str] = &[
    "gbr", "ger", "gtl", "gbl", "gts", "gbs", "gto", "gbo", "gtp", "gbp", "gko", "gm1", "gml",
    "g1", "g2", "g3", "g4", "gl2", "gl3", "drl", "xln", "exc",
];

/// Upper bound on the uncompressed size of the extracted layers.
pub const MAX_EXTRACTED_BYTES: u64 = 64 * 1024 * 1024;

/// Renders a set of fabrication files into one image.
#[async_trait]
pub trait PreviewToolchain: Send + Sync {
    /// Render `inputs` (all inside `workdir`) and return the produced image.
    async fn render(&self, inputs: &[PathBuf], workdir: &Path) -> Result<PathBuf, ArtifactError>;
}

/// Whether an archive entry is a fabrication file worth rendering.
pub fn is_fabrication_entry(path: &Path) -> bool {
    let hidden = path.components().any(|c| match c {
        Component::Normal(part) => {
            let part = part.to_string_lossy();
            part.starts_with('.') || part == "__MACOSX"
        }
        _ => false,
    });
    if hidden {
        return false;
    }
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|ext| FABRICATION_EXTENSIONS.contains(&ext.as_str()))
}

/// Unpack the fabrication files of a zip archive into `dest`.
///
/// Entries whose names escape `dest` are ignored. Returned paths are sorted
/// so the renderer sees layers in a stable order. Extraction stops with
/// [`ArtifactError::Archive`] once the kept entries exceed
/// [`MAX_EXTRACTED_BYTES`].
pub fn extract_fabrication_files(archive: &[u8], dest: &Path) -> Result<Vec<PathBuf>, ArtifactError> {
    extract_with_limit(archive, dest, MAX_EXTRACTED_BYTES)
}

fn extract_with_limit(
    archive: &[u8],
    dest: &Path,
    max_bytes: u64,
) -> Result<Vec<PathBuf>, ArtifactError> {
    let too_large = || ArtifactError::Archive(format!("uncompressed layers exceed {max_bytes} bytes"));
    let mut budget = max_bytes;
    let mut zip = zip::ZipArchive::new(Cursor::new(archive))
        .map_err(|e| ArtifactError::Archive(e.to_string()))?;

    let mut files = Vec::new();
    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| ArtifactError::Archive(e.to_string()))?;
        if entry.is_dir() {
            continue;
        }
        let Some(relative) = entry.enclosed_name().map(|p| p.to_path_buf()) else {
            debug!("Skipping unsafe archive entry '{}'", entry.name());
            continue;
        };
        if !is_fabrication_entry(&relative) {
            debug!("Skipping non-fabrication entry '{}'", relative.display());
            continue;
        }

        if entry.size() > budget {
            return Err(too_large());
        }

        let out = dest.join(&relative);
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::File::create(&out)?;
        // The declared size may lie; never write more than the budget allows.
        let written = std::io::copy(&mut (&mut entry).take(budget + 1), &mut file)?;
        if written > budget {
            return Err(too_large());
        }
        budget -= written;
        files.push(out);
    }

    if files.is_empty() {
        return Err(ArtifactError::NoFabricationFiles);
    }
    files.sort();
    Ok(files)
}

/// Extract `archive`, render it, and store the image at `dest`.
pub async fn render_preview(
    toolchain: &dyn PreviewToolchain,
    archive: Vec<u8>,
    dest: &Path,
) -> Result<PathBuf, ArtifactError> {
    let scratch = TempDir::new()?;
    let scratch_path = scratch.path().to_path_buf();

    let files = tokio::task::spawn_blocking(move || extract_fabrication_files(&archive, &scratch_path))
        .await
        .map_err(|e| ArtifactError::Archive(format!("extraction task panicked: {e}")))??;
    info!("Extracted {} fabrication files", files.len());

    let produced = toolchain.render(&files, scratch.path()).await?;
    if !produced.is_file() {
        return Err(ArtifactError::MissingOutput { path: produced });
    }

    tokio::fs::copy(&produced, dest).await?;
    Ok(dest.to_path_buf())
}

/// Runs a configured external program as the preview toolchain.
#[derive(Debug, Clone)]
pub struct CommandToolchain {
    command: PreviewCommand,
    timeout_secs: u64,
}

impl CommandToolchain {
    pub fn new(command: PreviewCommand, timeout_secs: u64) -> Self {
        Self {
            command,
            timeout_secs,
        }
    }
}

#[async_trait]
impl PreviewToolchain for CommandToolchain {
    async fn render(&self, inputs: &[PathBuf], workdir: &Path) -> Result<PathBuf, ArtifactError> {
        let program = self.command.program.clone();
        let output_path = workdir.join(&self.command.output_name);
        let output_str = output_path.to_string_lossy().to_string();

        let mut cmd = tokio::process::Command::new(&program);
        cmd.args(self.command.args.iter().map(|a| a.replace("{output}", &output_str)))
            .args(inputs)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        debug!("Running preview toolchain: {:?}", cmd);

        let output = tokio::time::timeout(Duration::from_secs(self.timeout_secs), cmd.output())
            .await
            .map_err(|_| ArtifactError::ToolchainTimeout {
                program: program.clone(),
                secs: self.timeout_secs,
            })?
            .map_err(|e| ArtifactError::Toolchain {
                program: program.clone(),
                detail: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ArtifactError::Toolchain {
                program,
                detail: format!("{}: {}", output.status, stderr.trim()),
            });
        }
        if !output_path.is_file() {
            return Err(ArtifactError::MissingOutput { path: output_path });
        }
        Ok(output_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut w = zip::ZipWriter::new(Cursor::new(&mut buf));
            for (name, body) in entries {
                w.start_file(*name, SimpleFileOptions::default()).unwrap();
                w.write_all(body).unwrap();
            }
            w.finish().unwrap();
        }
        buf
    }

    struct CopyFirst;

    #[async_trait]
    impl PreviewToolchain for CopyFirst {
        async fn render(&self, inputs: &[PathBuf], workdir: &Path) -> Result<PathBuf, ArtifactError> {
            let out = workdir.join("board.png");
            std::fs::copy(&inputs[0], &out)?;
            Ok(out)
        }
    }

    struct ProducesNothing;

    #[async_trait]
    impl PreviewToolchain for ProducesNothing {
        async fn render(&self, _inputs: &[PathBuf], workdir: &Path) -> Result<PathBuf, ArtifactError> {
            Ok(workdir.join("never.png"))
        }
    }

    #[test]
    fn allow_list_and_hidden_entries() {
        assert!(is_fabrication_entry(Path::new("gerber/board-F_Cu.gtl")));
        assert!(is_fabrication_entry(Path::new("board.GBR")));
        assert!(is_fabrication_entry(Path::new("drill.drl")));
        assert!(!is_fabrication_entry(Path::new("README.md")));
        assert!(!is_fabrication_entry(Path::new("__MACOSX/board.gtl")));
        assert!(!is_fabrication_entry(Path::new("gerber/._board.gtl")));
        assert!(!is_fabrication_entry(Path::new(".git/x.gbr")));
        assert!(!is_fabrication_entry(Path::new("noextension")));
    }

    #[test]
    fn extraction_filters_entries() {
        let zip = archive(&[
            ("board-F_Cu.gtl", b"G04 top*"),
            ("board-B_Cu.gbl", b"G04 bottom*"),
            ("__MACOSX/._board-F_Cu.gtl", b"junk"),
            ("notes.txt", b"hello"),
            ("drill/board.drl", b"M48"),
        ]);
        let dir = tempfile::tempdir().unwrap();
        let files = extract_fabrication_files(&zip, dir.path()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(names, vec!["board-B_Cu.gbl", "board-F_Cu.gtl", "drill/board.drl"]);
        assert!(!dir.path().join("notes.txt").exists());
    }

    #[test]
    fn archive_without_layers_is_an_error() {
        let zip = archive(&[("README.md", b"# hi")]);
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            extract_fabrication_files(&zip, dir.path()),
            Err(ArtifactError::NoFabricationFiles)
        ));
    }

    #[test]
    fn oversized_archive_is_rejected() {
        let zip = archive(&[("top.gtl", &[b'G'; 600]), ("bottom.gbl", &[b'G'; 600])]);
        let dir = tempfile::tempdir().unwrap();
        let err = extract_with_limit(&zip, dir.path(), 1_000).unwrap_err();
        assert!(matches!(err, ArtifactError::Archive(_)), "got: {err}");

        let files = extract_with_limit(&zip, dir.path(), 1_200).unwrap();
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn garbage_is_an_archive_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            extract_fabrication_files(b"not a zip", dir.path()),
            Err(ArtifactError::Archive(_))
        ));
    }

    #[tokio::test]
    async fn render_preview_copies_output() {
        let zip = archive(&[("board.gtl", b"layer")]);
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join(PREVIEW_FILE);
        let path = render_preview(&CopyFirst, zip, &dest).await.unwrap();
        assert_eq!(path, dest);
        assert_eq!(std::fs::read(&dest).unwrap(), b"layer");
    }

    #[tokio::test]
    async fn missing_output_is_reported() {
        let zip = archive(&[("board.gtl", b"layer")]);
        let dir = tempfile::tempdir().unwrap();
        let err = render_preview(&ProducesNothing, zip, &dir.path().join(PREVIEW_FILE))
            .await
            .unwrap_err();
        assert!(matches!(err, ArtifactError::MissingOutput { .. }), "got: {err}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_toolchain_substitutes_output() {
        let toolchain = CommandToolchain::new(
            PreviewCommand {
                program: "sh".into(),
                args: vec!["-c".into(), "printf rendered > \"$0\"".into(), "{output}".into()],
                output_name: "out.png".into(),
            },
            10,
        );
        let dir = tempfile::tempdir().unwrap();
        let out = toolchain.render(&[], dir.path()).await.unwrap();
        assert_eq!(std::fs::read(out).unwrap(), b"rendered");
    }

    #[tokio::test]
    async fn missing_program_is_a_toolchain_error() {
        let toolchain = CommandToolchain::new(
            PreviewCommand {
                program: "definitely-not-a-real-gerber-renderer".into(),
                args: vec![],
                output_name: "out.png".into(),
            },
            10,
        );
        let dir = tempfile::tempdir().unwrap();
        let err = toolchain.render(&[], dir.path()).await.unwrap_err();
        assert!(matches!(err, ArtifactError::Toolchain { .. }), "got: {err}");
    }
}
