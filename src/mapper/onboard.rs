//! OnBoard PCB grant applications.
//!
//! The pull request is optional. When it is absent, or cannot be resolved,
//! the receipt still carries its QR codes but no project name, preview or
//! description.

use super::{
    avatar_url, created_at, location, mailto, qr_codes, questions, years_since, EnrichmentPlan,
    MappingContext, ProjectSource,
};
use crate::clients::github::PullRequestRef;
use crate::error::EnrichmentError;
use crate::model::{CanonicalDocument, GrantType, Identity, ProjectArtifacts, ProjectInfo, RawRecord};
use tracing::warn;

const PULL_REQUEST: &str = "Pull Request";

const QUESTIONS: &[(&str, &str)] = &[
    ("How did you hear about OnBoard?", "How did you hear about OnBoard?"),
    ("What are we doing well?", "What we are doing well?"),
    ("How can we improve?", "How can we improve?"),
    ("Is this the first PCB you've made?", "Is this the first PCB you've made?"),
];

pub(super) fn plan(record: &RawRecord) -> Result<EnrichmentPlan, EnrichmentError> {
    let project = match record.text(PULL_REQUEST) {
        None => ProjectSource::None,
        Some(url) => match PullRequestRef::parse(&url) {
            Ok(pr) => ProjectSource::HardwarePullRequest(pr),
            Err(e) => {
                warn!("Record {}: {}; printing without project details", record.id, e);
                ProjectSource::None
            }
        },
    };
    Ok(EnrichmentPlan {
        project,
        project_required: false,
    })
}

pub(super) fn map(
    record: &RawRecord,
    artifacts: &ProjectArtifacts,
    ctx: &MappingContext,
) -> Result<CanonicalDocument, EnrichmentError> {
    let handle = record.text("GitHub handle");
    let (created_at, created_at_display) = created_at(record, ctx);

    Ok(CanonicalDocument {
        grant_type: GrantType::OnBoard,
        record_id: record.id.clone(),
        created_at,
        created_at_display,
        identity: Identity {
            name: record.text_or_empty("Full Name"),
            avatar_url: avatar_url(handle.as_deref()),
            avatar_path: None,
            handle,
            location: location(record, "City (shipping address)", "State", "Country"),
        },
        age: record.date("Birthdate").and_then(|d| years_since(d, ctx.now)),
        qa: questions(record, QUESTIONS),
        project_info: Some(ProjectInfo {
            name: artifacts.name.clone().unwrap_or_default(),
            image_path: artifacts.image_path.clone(),
            html_description: artifacts.html_description.clone(),
            qr_codes: qr_codes(vec![
                ("Pull Request", record.text(PULL_REQUEST)),
                ("Email", mailto(record, "Email")),
            ]),
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::test_support::record;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn ctx() -> MappingContext {
        MappingContext::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
            chrono_tz::America::New_York,
        )
    }

    fn application() -> RawRecord {
        record(json!({
            "Full Name": "Grace Hopper",
            "GitHub handle": "grace",
            "City (shipping address)": "Arlington",
            "State": "VA",
            "Country": "USA",
            "Birthdate": "2007-11-20",
            "Email": "grace@example.com",
            "What we are doing well?": "Docs",
            "Is this the first PCB you've made?": "Yes",
        }))
    }

    #[test]
    fn plan_without_pull_request_resolves_nothing() {
        let p = plan(&application()).unwrap();
        assert_eq!(p.project, ProjectSource::None);
        assert!(!p.project_required);
    }

    #[test]
    fn malformed_pull_request_is_not_fatal() {
        let mut r = application();
        r.fields.insert(PULL_REQUEST.into(), json!("github.com/hackclub/OnBoard"));
        assert_eq!(plan(&r).unwrap().project, ProjectSource::None);

        r.fields.insert(PULL_REQUEST.into(), json!("https://github.com/hackclub/OnBoard/pull/88"));
        assert!(matches!(
            plan(&r).unwrap().project,
            ProjectSource::HardwarePullRequest(ref pr) if pr.number == 88
        ));
    }

    #[test]
    fn maps_fields_and_approximate_age() {
        let doc = map(&application(), &ProjectArtifacts::default(), &ctx()).unwrap();
        assert_eq!(doc.identity.name, "Grace Hopper");
        assert_eq!(doc.identity.avatar_url.as_deref(), Some("https://github.com/grace.png"));
        assert_eq!(doc.identity.location.display_line(), "Arlington, VA, USA");
        // 2024 - 2007, even though the birthday has not yet come around.
        assert_eq!(doc.age, Some(17));

        let visible: Vec<_> = doc.visible_qa().map(|e| e.question.as_str()).collect();
        assert_eq!(visible, vec!["What are we doing well?", "Is this the first PCB you've made?"]);

        let project = doc.project_info.unwrap();
        assert_eq!(project.name, "");
        assert_eq!(project.qr_codes.len(), 1);
        assert_eq!(project.qr_codes[0].target, "mailto:grace@example.com");
    }

    #[test]
    fn resolved_project_is_carried() {
        let mut r = application();
        r.fields.insert(PULL_REQUEST.into(), json!("https://github.com/hackclub/OnBoard/pull/88"));
        let artifacts = ProjectArtifacts {
            name: Some("Hackpad".into()),
            image_path: Some("preview.png".into()),
            html_description: Some("<p>A macropad.</p>".into()),
            skipped: false,
        };
        let project = map(&r, &artifacts, &ctx()).unwrap().project_info.unwrap();
        assert_eq!(project.name, "Hackpad");
        assert_eq!(project.image_path.as_deref(), Some(std::path::Path::new("preview.png")));
        let labels: Vec<_> = project.qr_codes.iter().map(|q| q.label.as_str()).collect();
        assert_eq!(labels, vec!["Pull Request", "Email"]);
    }

    #[test]
    fn bad_birthdate_leaves_age_empty() {
        let mut r = application();
        r.fields.insert("Birthdate".into(), json!("20/11/2007"));
        assert_eq!(map(&r, &ProjectArtifacts::default(), &ctx()).unwrap().age, None);
    }
}
