//! One-line notification templates.
//!
//! Every function returns `None` when a field its template needs is absent.

use crate::events::{Account, ApprovalOutcome, Change, PatchSet, RefUpdate};

const TAG_PREFIX: &str = "refs/tags/";

/// Fields shared by every change-scoped template.
struct ChangeLine<'a> {
    project: &'a str,
    subject: &'a str,
    url: &'a str,
}

impl<'a> ChangeLine<'a> {
    fn from_change(change: &'a Change) -> Option<Self> {
        Some(Self {
            project: change.project.as_deref()?,
            subject: change.subject.as_deref()?,
            url: change.url.as_deref()?,
        })
    }
}

pub fn patchset_created(change: &Change, patch_set: Option<&PatchSet>) -> Option<String> {
    let line = ChangeLine::from_change(change)?;
    let branch = change.branch.as_deref()?;
    let uploader = patch_set?.uploader.as_ref()?.name.as_deref()?;
    Some(format!(
        "{uploader} proposed {} {branch}: {}  {}",
        line.project, line.subject, line.url
    ))
}

pub fn change_merged(change: &Change) -> Option<String> {
    let line = ChangeLine::from_change(change)?;
    let branch = change.branch.as_deref()?;
    Some(format!(
        "Merged {} {branch}: {}  {}",
        line.project, line.subject, line.url
    ))
}

pub fn comment_added(change: &Change) -> Option<String> {
    let line = ChangeLine::from_change(change)?;
    Some(format!(
        "A comment has been added to a proposed change to {}: {}  {}",
        line.project, line.subject, line.url
    ))
}

/// The follow-up line sent for a notable vote on a comment.
pub fn approval(outcome: ApprovalOutcome, change: &Change) -> Option<String> {
    let ChangeLine {
        project,
        subject,
        url,
    } = ChangeLine::from_change(change)?;
    Some(match outcome {
        ApprovalOutcome::VerificationFailed => {
            format!("Verification of a change to {project} failed: {subject}  {url}")
        }
        ApprovalOutcome::VerificationSucceeded => {
            format!("Verification of a change to {project} succeeded: {subject}  {url}")
        }
        ApprovalOutcome::Rejected => {
            format!("A change to {project} has been rejected: {subject}  {url}")
        }
        ApprovalOutcome::Approved => {
            format!("A change to {project} has been approved: {subject}  {url}")
        }
    })
}

/// Only tag pushes are announced; branch updates render nothing.
pub fn ref_updated(ref_update: &RefUpdate, submitter: Option<&Account>) -> Option<String> {
    let tag = ref_update
        .ref_name
        .as_deref()?
        .strip_prefix(TAG_PREFIX)
        .filter(|tag| !tag.is_empty())?;
    let project = ref_update.project.as_deref()?;
    let submitter = submitter?;
    let who = submitter
        .username
        .as_deref()
        .or(submitter.name.as_deref())?;
    Some(format!("{who} tagged project {project} with {tag}"))
}
