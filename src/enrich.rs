//! Enrichment: carry out an [`EnrichmentPlan`] against the outside world.
//!
//! The resolver is the only impure step between the two pure mapper calls.
//! Failures are split by how much they matter:
//!
//! * Listing a pull request's files (and thus naming the project) is the
//!   project itself. If the plan marks the project required, a failure here
//!   fails the record; otherwise the artifacts come back `skipped`.
//! * Everything derived after that (thumbnail, README, PCB preview, QR
//!   images, avatar) is isolated: a failure is logged with the record id and the
//!   field is left empty.

use crate::clients::assets::AssetService;
use crate::clients::github::{CodeHost, PullRequestRef, RepoRef};
use crate::error::{ArtifactError, EnrichmentError};
use crate::mapper::{EnrichmentPlan, ProjectSource};
use crate::model::{CanonicalDocument, ProjectArtifacts};
use crate::pipeline::description::render_description;
use crate::pipeline::preview::{render_preview, PreviewToolchain, PREVIEW_FILE};
use crate::pipeline::project_name::{
    extract_project_dir, extract_project_name, ONBOARD_PROJECTS_ROOT, SPRIG_GAMES_ROOT,
    SPRIG_GAME_SUFFIX,
};
use crate::pipeline::qr::write_qr_png;
use crate::pipeline::thumbnail::{save_thumbnail, ThumbnailImage, THUMBNAIL_FILE};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// File name of the downloaded avatar inside a record's work directory.
pub const AVATAR_FILE: &str = "avatar.png";

/// Fetches and derives the project artifacts of one record.
#[derive(Clone)]
pub struct EnrichmentResolver {
    code_host: Arc<dyn CodeHost>,
    assets: Arc<dyn AssetService>,
    toolchain: Arc<dyn PreviewToolchain>,
}

impl EnrichmentResolver {
    pub fn new(
        code_host: Arc<dyn CodeHost>,
        assets: Arc<dyn AssetService>,
        toolchain: Arc<dyn PreviewToolchain>,
    ) -> Self {
        Self {
            code_host,
            assets,
            toolchain,
        }
    }

    /// Resolve `plan`, writing image artifacts into `dir`.
    pub async fn resolve(
        &self,
        record_id: &str,
        plan: &EnrichmentPlan,
        dir: &Path,
    ) -> Result<ProjectArtifacts, EnrichmentError> {
        let result = match &plan.project {
            ProjectSource::None => return Ok(ProjectArtifacts::default()),
            ProjectSource::GalleryPullRequest(pr) => self.resolve_gallery(record_id, pr, dir).await,
            ProjectSource::HardwarePullRequest(pr) => self.resolve_hardware(record_id, pr, dir).await,
            ProjectSource::Inline {
                description,
                screenshot_url,
            } => {
                self.resolve_inline(record_id, description.as_deref(), screenshot_url.as_deref(), dir)
                    .await
            }
        };

        match result {
            Ok(artifacts) => Ok(artifacts),
            Err(e) if !plan.project_required => {
                warn!("Record {}: project unavailable, printing without it: {}", record_id, e);
                Ok(ProjectArtifacts {
                    skipped: true,
                    ..Default::default()
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn resolve_gallery(
        &self,
        record_id: &str,
        pr: &PullRequestRef,
        dir: &Path,
    ) -> Result<ProjectArtifacts, EnrichmentError> {
        let files = self.code_host.changed_files(pr).await?;
        let name = extract_project_name(&files, SPRIG_GAMES_ROOT, SPRIG_GAME_SUFFIX).ok_or_else(|| {
            EnrichmentError::MissingField {
                field: "game name".to_string(),
            }
        })?;
        debug!("Record {}: game '{}' from {}", record_id, name, pr);

        let image_path = isolated(record_id, "thumbnail", self.fetch_thumbnail(&name, dir).await);
        Ok(ProjectArtifacts {
            name: Some(name),
            image_path,
            html_description: None,
            skipped: false,
        })
    }

    async fn fetch_thumbnail(&self, game: &str, dir: &Path) -> Result<PathBuf, ArtifactError> {
        let image = self.assets.thumbnail(game).await?.decode()?;
        let path = dir.join(THUMBNAIL_FILE);
        save_thumbnail(image, &path)?;
        Ok(path)
    }

    async fn resolve_hardware(
        &self,
        record_id: &str,
        pr: &PullRequestRef,
        dir: &Path,
    ) -> Result<ProjectArtifacts, EnrichmentError> {
        let files = self.code_host.changed_files(pr).await?;
        let name = extract_project_dir(&files, ONBOARD_PROJECTS_ROOT).ok_or_else(|| {
            EnrichmentError::MissingField {
                field: "project directory".to_string(),
            }
        })?;
        debug!("Record {}: project '{}' from {}", record_id, name, pr);

        let mut artifacts = ProjectArtifacts {
            name: Some(name.clone()),
            ..Default::default()
        };
        let Some(head) = isolated(record_id, "pull request head", self.code_host.head(pr).await) else {
            return Ok(artifacts);
        };

        let prefix = format!("{ONBOARD_PROJECTS_ROOT}{name}/");
        let in_project = |p: &&String| p.starts_with(&prefix);

        if let Some(readme) = files.iter().filter(in_project).find(|p| is_readme(p)) {
            artifacts.html_description =
                isolated(record_id, "description", self.fetch_description(&head, readme).await);
        }
        if let Some(archive) = files.iter().filter(in_project).find(|p| has_extension(p, "zip")) {
            artifacts.image_path =
                isolated(record_id, "PCB preview", self.fetch_preview(&head, archive, dir).await);
        }
        Ok(artifacts)
    }

    async fn fetch_description(&self, repo: &RepoRef, path: &str) -> Result<String, ArtifactError> {
        let text = self.code_host.file(repo, path).await?.into_text(path)?;
        Ok(render_description(&text))
    }

    async fn fetch_preview(&self, repo: &RepoRef, path: &str, dir: &Path) -> Result<PathBuf, ArtifactError> {
        let archive = self.code_host.file(repo, path).await?.into_bytes(path)?;
        render_preview(self.toolchain.as_ref(), archive, &dir.join(PREVIEW_FILE)).await
    }

    async fn resolve_inline(
        &self,
        record_id: &str,
        description: Option<&str>,
        screenshot_url: Option<&str>,
        dir: &Path,
    ) -> Result<ProjectArtifacts, EnrichmentError> {
        let image_path = match screenshot_url {
            Some(url) => isolated(
                record_id,
                "screenshot",
                self.download_image(url, dir.join(THUMBNAIL_FILE)).await,
            ),
            None => None,
        };
        Ok(ProjectArtifacts {
            name: None,
            image_path,
            html_description: description.map(render_description),
            skipped: false,
        })
    }

    /// Download the applicant's avatar into `dir` and record its path.
    ///
    /// Leaves `avatar_path` empty when there is no avatar or it cannot be fetched.
    pub async fn attach_avatar(&self, doc: &mut CanonicalDocument, dir: &Path) {
        let Some(url) = doc.identity.avatar_url.clone() else {
            return;
        };
        let result = self.download_image(&url, dir.join(AVATAR_FILE)).await;
        doc.identity.avatar_path = isolated(&doc.record_id, "avatar", result);
    }

    async fn download_image(&self, url: &str, path: PathBuf) -> Result<PathBuf, ArtifactError> {
        let bytes = self.assets.download(url).await?;
        save_thumbnail(ThumbnailImage::Encoded(bytes), &path)?;
        Ok(path)
    }
}

/// Render every QR code of `doc` into `dir` as `qr-<n>.png`.
///
/// A code that fails to render keeps its label and target but no image.
pub fn attach_qr_codes(doc: &mut CanonicalDocument, dir: &Path) {
    let Some(project) = doc.project_info.as_mut() else {
        return;
    };
    for (i, qr) in project.qr_codes.iter_mut().enumerate() {
        let path = dir.join(format!("qr-{i}.png"));
        match write_qr_png(&qr.target, &path) {
            Ok(()) => qr.image_path = Some(path),
            Err(e) => warn!("Record {}: QR code '{}' unavailable: {}", doc.record_id, qr.label, e),
        }
    }
}

/// Log an artifact failure and turn it into an empty field.
fn isolated<T, E: std::fmt::Display>(record_id: &str, artifact: &str, result: Result<T, E>) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("Record {}: {} unavailable: {}", record_id, artifact, e);
            None
        }
    }
}

fn is_readme(path: &str) -> bool {
    path.rsplit('/')
        .next()
        .is_some_and(|name| name.eq_ignore_ascii_case("readme.md"))
}

fn has_extension(path: &str, ext: &str) -> bool {
    Path::new(path)
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::github::FileContent;
    use crate::error::ServiceError;
    use crate::model::{GrantType, Identity, ProjectInfo, QrCode};
    use crate::pipeline::thumbnail::ThumbnailPayload;
    use async_trait::async_trait;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;

    fn http_error(url: &str) -> ServiceError {
        ServiceError::Http {
            status: 404,
            url: url.to_string(),
        }
    }

    #[derive(Default)]
    struct FakeHost {
        files: Option<Vec<String>>,
        contents: HashMap<String, FileContent>,
    }

    #[async_trait]
    impl CodeHost for FakeHost {
        async fn changed_files(&self, _pr: &PullRequestRef) -> Result<Vec<String>, ServiceError> {
            self.files.clone().ok_or_else(|| http_error("files"))
        }
        async fn head(&self, pr: &PullRequestRef) -> Result<RepoRef, ServiceError> {
            Ok(RepoRef {
                owner: pr.owner.clone(),
                repo: pr.repo.clone(),
                git_ref: "abc123".into(),
            })
        }
        async fn file(&self, _repo: &RepoRef, path: &str) -> Result<FileContent, ServiceError> {
            self.contents.get(path).cloned().ok_or_else(|| http_error(path))
        }
    }

    struct FakeAssets {
        thumbnail: Option<ThumbnailPayload>,
        image: Option<Vec<u8>>,
    }

    #[async_trait]
    impl AssetService for FakeAssets {
        async fn thumbnail(&self, key: &str) -> Result<ThumbnailPayload, ServiceError> {
            self.thumbnail.clone().ok_or_else(|| http_error(key))
        }
        async fn download(&self, url: &str) -> Result<Vec<u8>, ServiceError> {
            self.image.clone().ok_or_else(|| http_error(url))
        }
    }

    struct NoToolchain;

    #[async_trait]
    impl PreviewToolchain for NoToolchain {
        async fn render(&self, _inputs: &[PathBuf], _workdir: &Path) -> Result<PathBuf, ArtifactError> {
            Err(ArtifactError::Toolchain {
                program: "gerbv".into(),
                detail: "not installed".into(),
            })
        }
    }

    fn resolver(host: FakeHost, thumbnail: Option<ThumbnailPayload>) -> EnrichmentResolver {
        EnrichmentResolver::new(
            Arc::new(host),
            Arc::new(FakeAssets {
                thumbnail,
                image: None,
            }),
            Arc::new(NoToolchain),
        )
    }

    fn pr() -> PullRequestRef {
        PullRequestRef::parse("https://github.com/hackclub/sprig/pull/1").unwrap()
    }

    fn raw_thumbnail() -> ThumbnailPayload {
        ThumbnailPayload {
            kind: "raw".into(),
            data: STANDARD.encode([255u8; 2 * 2 * 4]),
            width: Some(2),
            height: Some(2),
        }
    }

    #[tokio::test]
    async fn gallery_resolves_name_and_thumbnail() {
        let dir = tempfile::tempdir().unwrap();
        let host = FakeHost {
            files: Some(vec!["games/img/a.png".into(), "games/Bowls.js".into()]),
            ..Default::default()
        };
        let plan = EnrichmentPlan {
            project: ProjectSource::GalleryPullRequest(pr()),
            project_required: true,
        };
        let artifacts = resolver(host, Some(raw_thumbnail()))
            .resolve("rec1", &plan, dir.path())
            .await
            .unwrap();
        assert_eq!(artifacts.name.as_deref(), Some("Bowls"));
        assert_eq!(artifacts.image_path, Some(dir.path().join(THUMBNAIL_FILE)));
        assert!(dir.path().join(THUMBNAIL_FILE).is_file());
    }

    #[tokio::test]
    async fn thumbnail_failure_keeps_the_name() {
        let dir = tempfile::tempdir().unwrap();
        let host = FakeHost {
            files: Some(vec!["games/Bowls.js".into()]),
            ..Default::default()
        };
        let plan = EnrichmentPlan {
            project: ProjectSource::GalleryPullRequest(pr()),
            project_required: true,
        };
        let artifacts = resolver(host, None).resolve("rec1", &plan, dir.path()).await.unwrap();
        assert_eq!(artifacts.name.as_deref(), Some("Bowls"));
        assert!(artifacts.image_path.is_none());
    }

    #[tokio::test]
    async fn required_listing_failure_fails() {
        let dir = tempfile::tempdir().unwrap();
        let plan = EnrichmentPlan {
            project: ProjectSource::GalleryPullRequest(pr()),
            project_required: true,
        };
        let err = resolver(FakeHost::default(), None)
            .resolve("rec1", &plan, dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, EnrichmentError::Service(ServiceError::Http { .. })));
    }

    #[tokio::test]
    async fn optional_listing_failure_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let plan = EnrichmentPlan {
            project: ProjectSource::HardwarePullRequest(pr()),
            project_required: false,
        };
        let artifacts = resolver(FakeHost::default(), None)
            .resolve("rec1", &plan, dir.path())
            .await
            .unwrap();
        assert!(artifacts.skipped);
        assert!(artifacts.name.is_none());
    }

    #[tokio::test]
    async fn hardware_reads_readme_and_isolates_preview_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut contents = HashMap::new();
        contents.insert(
            "projects/Hackpad/README.md".to_string(),
            FileContent::Text("# Hackpad\n\nA macropad.\n".into()),
        );
        contents.insert(
            "projects/Hackpad/gerbers.zip".to_string(),
            FileContent::Binary(vec![0x50, 0x4b, 0x05, 0x06, 0xff]),
        );
        let host = FakeHost {
            files: Some(vec![
                "projects/Hackpad/README.md".into(),
                "projects/Hackpad/gerbers.zip".into(),
            ]),
            contents,
        };
        let plan = EnrichmentPlan {
            project: ProjectSource::HardwarePullRequest(pr()),
            project_required: false,
        };
        let artifacts = resolver(host, None).resolve("rec1", &plan, dir.path()).await.unwrap();
        assert_eq!(artifacts.name.as_deref(), Some("Hackpad"));
        assert_eq!(artifacts.html_description.as_deref(), Some("<p>A macropad.</p>\n"));
        assert!(artifacts.image_path.is_none());
        assert!(!artifacts.skipped);
    }

    #[tokio::test]
    async fn inline_renders_description_and_isolates_screenshot() {
        let dir = tempfile::tempdir().unwrap();
        let plan = EnrichmentPlan {
            project: ProjectSource::Inline {
                description: Some("# Kernel\n\n## Why\n".into()),
                screenshot_url: Some("https://example.com/shot.png".into()),
            },
            project_required: true,
        };
        let artifacts = resolver(FakeHost::default(), None)
            .resolve("rec1", &plan, dir.path())
            .await
            .unwrap();
        assert_eq!(artifacts.html_description.as_deref(), Some("<h3>Why</h3>\n"));
        assert!(artifacts.image_path.is_none());
    }

    #[test]
    fn qr_images_are_written_per_code() {
        let dir = tempfile::tempdir().unwrap();
        let mut doc = CanonicalDocument {
            grant_type: GrantType::Sprig,
            record_id: "rec1".into(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap().fixed_offset(),
            created_at_display: String::new(),
            identity: Identity::default(),
            age: None,
            qa: vec![],
            project_info: Some(ProjectInfo {
                name: "Bowls".into(),
                qr_codes: vec![
                    QrCode {
                        label: "Play Game".into(),
                        target: "https://sprig.hackclub.com/gallery/Bowls".into(),
                        image_path: None,
                    },
                    QrCode {
                        label: "Broken".into(),
                        target: "".into(),
                        image_path: None,
                    },
                ],
                ..Default::default()
            }),
        };
        attach_qr_codes(&mut doc, dir.path());
        let codes = &doc.project_info.unwrap().qr_codes;
        assert_eq!(codes[0].image_path, Some(dir.path().join("qr-0.png")));
        assert!(dir.path().join("qr-0.png").is_file());
        assert!(codes[1].image_path.is_none());
    }

    fn png_bytes() -> Vec<u8> {
        let mut out = std::io::Cursor::new(Vec::new());
        image::RgbaImage::new(2, 2)
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    fn avatar_doc() -> CanonicalDocument {
        CanonicalDocument {
            grant_type: GrantType::Sprig,
            record_id: "rec1".into(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap().fixed_offset(),
            created_at_display: String::new(),
            identity: Identity {
                avatar_url: Some("https://github.com/ada.png".into()),
                ..Identity::default()
            },
            age: None,
            qa: vec![],
            project_info: None,
        }
    }

    #[tokio::test]
    async fn avatar_is_downloaded_into_the_record_directory() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = EnrichmentResolver::new(
            Arc::new(FakeHost::default()),
            Arc::new(FakeAssets {
                thumbnail: None,
                image: Some(png_bytes()),
            }),
            Arc::new(NoToolchain),
        );
        let mut doc = avatar_doc();
        resolver.attach_avatar(&mut doc, dir.path()).await;
        assert_eq!(doc.identity.avatar_path, Some(dir.path().join(AVATAR_FILE)));
        assert!(dir.path().join(AVATAR_FILE).is_file());
    }

    #[tokio::test]
    async fn avatar_failure_leaves_the_path_empty() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver(FakeHost::default(), None);

        let mut doc = avatar_doc();
        resolver.attach_avatar(&mut doc, dir.path()).await;
        assert!(doc.identity.avatar_path.is_none());

        doc.identity.avatar_url = None;
        resolver.attach_avatar(&mut doc, dir.path()).await;
        assert!(doc.identity.avatar_path.is_none());
        assert!(!dir.path().join(AVATAR_FILE).exists());
    }

    #[test]
    fn readme_and_zip_detection() {
        assert!(is_readme("projects/X/README.md"));
        assert!(is_readme("projects/X/readme.MD"));
        assert!(!is_readme("projects/X/README.txt"));
        assert!(has_extension("projects/X/Gerbers.ZIP", "zip"));
        assert!(!has_extension("projects/X/zip", "zip"));
    }
}
