//! The shared schema used by newer grant programs.
//!
//! Project details live on the record itself; only the screenshot and the
//! description need resolving.

use super::{
    avatar_url, created_at, location, mailto, qr_codes, questions, years_since, EnrichmentPlan,
    MappingContext, ProjectSource,
};
use crate::error::EnrichmentError;
use crate::model::{CanonicalDocument, GrantType, Identity, ProjectArtifacts, ProjectInfo, RawRecord};

const PROJECT_NAME: &str = "Project Name";

const QUESTIONS: &[(&str, &str)] = &[
    ("How did you hear about this?", "How did you hear about this?"),
    ("What are we doing well?", "What are we doing well?"),
    ("How can we improve?", "How can we improve?"),
];

fn project_name(record: &RawRecord) -> Result<String, EnrichmentError> {
    record.text(PROJECT_NAME).ok_or_else(|| EnrichmentError::MissingField {
        field: PROJECT_NAME.to_string(),
    })
}

pub(super) fn plan(record: &RawRecord) -> Result<EnrichmentPlan, EnrichmentError> {
    project_name(record)?;
    Ok(EnrichmentPlan {
        project: ProjectSource::Inline {
            description: record.text("Description"),
            screenshot_url: record.first_attachment_url("Screenshot"),
        },
        project_required: true,
    })
}

pub(super) fn map(
    record: &RawRecord,
    artifacts: &ProjectArtifacts,
    ctx: &MappingContext,
) -> Result<CanonicalDocument, EnrichmentError> {
    let name = project_name(record)?;
    let handle = record.text("GitHub Username");
    let full_name = [record.text("First Name"), record.text("Last Name")]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");
    let (created_at, created_at_display) = created_at(record, ctx);

    Ok(CanonicalDocument {
        grant_type: GrantType::Unified,
        record_id: record.id.clone(),
        created_at,
        created_at_display,
        identity: Identity {
            name: full_name,
            avatar_url: avatar_url(handle.as_deref()),
            avatar_path: None,
            handle,
            location: location(record, "City", "State / Province", "Country"),
        },
        age: record.date("Birthday").and_then(|d| years_since(d, ctx.now)),
        qa: questions(record, QUESTIONS),
        project_info: Some(ProjectInfo {
            name,
            image_path: artifacts.image_path.clone(),
            html_description: artifacts.html_description.clone(),
            qr_codes: qr_codes(vec![
                ("Play", record.text("Playable URL")),
                ("Code", record.text("Code URL")),
                ("Email", mailto(record, "Email")),
            ]),
        }),
    })
}
