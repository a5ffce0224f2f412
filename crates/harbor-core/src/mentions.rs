//! Unread/mention badge derivation.
//!
//! Pure functions over timeline + cursor: badges are recomputed on every
//! change to either, never mutated directly, and the per-server aggregate
//! is always a sum over channels rather than independent state.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::ids::UserUid;
use crate::timeline::ChannelTimeline;
use crate::types::{ChannelBadges, MentionEntity, MentionKind, Message, ReadAckCursor};

/// The recognized set of audience mention tokens.
///
/// Capability-driven and extensible: servers may declare equivalents beyond
/// the defaults, so the set is configuration input rather than a constant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AudienceTokens {
    tokens: HashSet<String>,
}

impl AudienceTokens {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, token: &str) -> bool {
        self.tokens.contains(token)
    }
}

impl Default for AudienceTokens {
    fn default() -> Self {
        Self::new(["@here", "@channel"])
    }
}

/// Extract structured mentions from an outgoing message body.
///
/// Tokens are `@` followed by one or more word characters (`-` and `_`
/// allowed), at the start of the body or after whitespace. Tokens in the
/// audience set become channel mentions; anything else becomes a user
/// mention targeting the token text as a UID. A bare `@` is plain text.
pub fn parse_mentions(body: &str, audience: &AudienceTokens) -> Vec<MentionEntity> {
    let mut mentions = Vec::new();
    let bytes = body.as_bytes();
    let mut at_token_start = true;

    let mut index = 0;
    while index < bytes.len() {
        let byte = bytes[index];
        if byte == b'@' && at_token_start {
            let start = index;
            let mut end = index + 1;
            while end < bytes.len() && is_token_byte(bytes[end]) {
                end += 1;
            }
            if end > index + 1 {
                let token = &body[start..end];
                mentions.push(to_entity(token, (start, end), audience));
                index = end;
                at_token_start = false;
                continue;
            }
        }
        at_token_start = byte.is_ascii_whitespace();
        index += 1;
    }

    mentions
}

fn is_token_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_'
}

fn to_entity(token: &str, range: (usize, usize), audience: &AudienceTokens) -> MentionEntity {
    if audience.contains(token) {
        MentionEntity {
            kind: MentionKind::Channel,
            token: token.to_owned(),
            target: None,
            display_text: token.to_owned(),
            range,
        }
    } else {
        MentionEntity {
            kind: MentionKind::User,
            token: token.to_owned(),
            target: Some(UserUid::new(&token[1..])),
            display_text: token.to_owned(),
            range,
        }
    }
}

/// Whether one mention entity targets the current user.
///
/// Unknown or malformed entities (audience token outside the recognized
/// set, user mention without a target) are plain text: never counted.
fn targets_user(mention: &MentionEntity, current_user: &UserUid, audience: &AudienceTokens) -> bool {
    match mention.kind {
        MentionKind::User => mention.target.as_ref() == Some(current_user),
        MentionKind::Channel => audience.contains(&mention.token),
    }
}

/// Whether a message mentions the current user.
pub fn mentions_user(message: &Message, current_user: &UserUid, audience: &AudienceTokens) -> bool {
    message
        .mentions
        .iter()
        .any(|mention| targets_user(mention, current_user, audience))
}

/// Derive the unread/mention badge pair for one channel.
///
/// Position semantics: messages strictly after the cursor position count as
/// unread. A missing cursor, or a cursor whose message cannot be resolved
/// in the loaded timeline, leaves every loaded message unread; resolution
/// takes over once the referenced history loads.
pub fn channel_badges(
    timeline: &ChannelTimeline,
    cursor: Option<&ReadAckCursor>,
    current_user: &UserUid,
    audience: &AudienceTokens,
) -> ChannelBadges {
    let first_unread = match cursor {
        Some(cursor) => match timeline.position_of(&cursor.last_read_message_id) {
            Some(position) => position + 1,
            None => 0,
        },
        None => 0,
    };

    let mut badges = ChannelBadges::default();
    for entry in timeline.entries().iter().skip(first_unread) {
        badges.unread += 1;
        if mentions_user(&entry.message, current_user, audience) {
            badges.mentions += 1;
        }
    }
    badges
}
