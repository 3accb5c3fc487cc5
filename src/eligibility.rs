//! Eligibility & Delegation Resolver (C4): validates presence, meeting-user
//! linkage, group entitlement, delegation, and weight for an incoming vote.
//! Read-only against the poll config loader's preload cache; issues no
//! writes.

use crate::domain::{Poll, Weight};
use crate::error::ServiceError;
use crate::poll_loader::PollConfigLoader;

/// The resolved voter and weight a ballot should be recorded under.
pub struct Resolution {
    pub vote_user_id: i64,
    pub weight: Weight,
}

fn not_allowed(msg: impl Into<String>) -> ServiceError {
    ServiceError::NotAllowed(msg.into())
}

/// Run the full eligibility pipeline for `request_user_id` casting a ballot
/// for `body_user_id` (or themselves, if `None`) on `poll`.
pub async fn resolve(
    loader: &PollConfigLoader,
    poll: &Poll,
    request_user_id: i64,
    body_user_id: Option<i64>,
) -> Result<Resolution, ServiceError> {
    // 1. Presence.
    let request_present = loader
        .user_details(poll.meeting_id, request_user_id)
        .await
        .map(|d| d.present)
        .unwrap_or(false);
    if !request_present {
        return Err(not_allowed("requesting user is not present in the meeting"));
    }

    // 2. Decode body user id. Explicit 0 is rejected (anonymous is not a user).
    let vote_user_id = match body_user_id {
        None => request_user_id,
        Some(0) => return Err(not_allowed("user_id 0 is not a valid vote target")),
        Some(id) => id,
    };

    // 3. Meeting-user resolution for voteUser.
    let vote_meeting_user = loader
        .meeting_user(poll.meeting_id, vote_user_id)
        .await
        .ok_or_else(|| not_allowed("voting user has no meeting-user record in this meeting"))?;

    // 4. Group eligibility.
    let entitled = vote_meeting_user
        .group_ids
        .iter()
        .any(|g| poll.entitled_group_ids.contains(g));
    if !entitled {
        return Err(not_allowed("voting user is not a member of an entitled group"));
    }

    let meeting = loader.meeting_settings(poll.meeting_id).await;

    if vote_user_id == request_user_id {
        // 5. Self-block when delegated.
        if meeting.users_forbid_delegator_to_vote && vote_meeting_user.vote_delegated_to_id.is_some()
        {
            return Err(not_allowed(
                "this meeting forbids a delegator from voting themselves",
            ));
        }
    } else {
        // 6. Delegation check.
        if !meeting.users_enable_vote_delegations {
            return Err(not_allowed("this meeting does not allow vote delegation"));
        }
        if vote_meeting_user.vote_delegated_to_id != Some(request_user_id) {
            return Err(not_allowed(
                "requesting user is not the delegation target for this voter",
            ));
        }
    }

    // 7. Weight.
    let weight = if meeting.vote_weight_enabled {
        let from_meeting_user = vote_meeting_user
            .vote_weight
            .as_deref()
            .and_then(|s| s.parse::<Weight>().ok());
        let from_user = loader
            .user_details(poll.meeting_id, vote_user_id)
            .await
            .and_then(|d| d.default_vote_weight)
            .and_then(|s| s.parse::<Weight>().ok());
        from_meeting_user.or(from_user).unwrap_or(Weight::ONE)
    } else {
        Weight::ONE
    };

    Ok(Resolution {
        vote_user_id,
        weight,
    })
}
