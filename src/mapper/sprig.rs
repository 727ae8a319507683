//! Sprig game submissions.
//!
//! The game name is not on the record: it comes from the gallery pull
//! request, so the pull request is required.

use super::{
    avatar_url, created_at, location, mailto, qr_codes, questions, EnrichmentPlan, MappingContext,
    ProjectSource,
};
use crate::clients::github::PullRequestRef;
use crate::error::EnrichmentError;
use crate::model::{CanonicalDocument, GrantType, Identity, ProjectArtifacts, ProjectInfo, RawRecord};

const PULL_REQUEST: &str = "Pull Request";
const GALLERY_URL: &str = "https://sprig.hackclub.com/gallery/";

const QUESTIONS: &[(&str, &str)] = &[
    ("How did you hear about Sprig?", "How did you hear about Sprig?"),
    (
        "Is this the first video game you’ve made?",
        "Is this the first video game you've made?",
    ),
    ("What are we doing well?", "What are we doing well?"),
    ("How can we improve?", "How can we improve?"),
    ("Are you in a club?", "In a club?"),
];

pub(super) fn plan(record: &RawRecord) -> Result<EnrichmentPlan, EnrichmentError> {
    let url = record.text(PULL_REQUEST).ok_or_else(|| EnrichmentError::MissingField {
        field: PULL_REQUEST.to_string(),
    })?;
    Ok(EnrichmentPlan {
        project: ProjectSource::GalleryPullRequest(PullRequestRef::parse(&url)?),
        project_required: true,
    })
}

pub(super) fn map(
    record: &RawRecord,
    artifacts: &ProjectArtifacts,
    ctx: &MappingContext,
) -> Result<CanonicalDocument, EnrichmentError> {
    let game = artifacts
        .name
        .clone()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| EnrichmentError::MissingField {
            field: "game name".to_string(),
        })?;
    let handle = record.text("GitHub Username");
    let (created_at, created_at_display) = created_at(record, ctx);

    Ok(CanonicalDocument {
        grant_type: GrantType::Sprig,
        record_id: record.id.clone(),
        created_at,
        created_at_display,
        identity: Identity {
            name: record.text_or_empty("Name"),
            avatar_url: avatar_url(handle.as_deref()),
            avatar_path: None,
            handle,
            location: location(record, "City", "State or Province", "Country"),
        },
        age: record.integer("Age (years)"),
        qa: questions(record, QUESTIONS),
        project_info: Some(ProjectInfo {
            qr_codes: qr_codes(vec![
                ("Play Game", Some(format!("{GALLERY_URL}{game}"))),
                ("Pull Request", record.text(PULL_REQUEST)),
                ("Email", mailto(record, "Email")),
            ]),
            name: game,
            image_path: artifacts.image_path.clone(),
            html_description: artifacts.html_description.clone(),
        }),
    })
}
