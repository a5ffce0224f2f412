//! Randomized reconciliation invariants.
//!
//! Drives a session through arbitrary interleavings of remote delivery,
//! duplicate replay, optimistic sends, acks and reads across two servers,
//! then checks the properties that must hold regardless of ordering:
//! timelines stay sorted and duplicate-free, badge derivation matches a
//! brute-force recount, server aggregates equal per-channel sums, and the
//! read cursor never moves backwards in timeline order.

use harbor_core::{
    AckReceipt, ChannelId, EntryId, MentionEntity, MentionKind, RealtimeEvent, SendDraft,
    SendReceipt, ServerId, Session, SessionConfig, SyncState, UserUid, WireMessage,
};
use proptest::prelude::*;

const CURRENT_USER: &str = "u-alice";
const SERVERS: [&str; 2] = ["srv-a", "srv-b"];
const CHANNELS: [&str; 2] = ["general", "random"];

#[derive(Debug, Clone)]
struct Lcg {
    state: u64,
}

impl Lcg {
    fn new(seed: u64) -> Self {
        Self {
            state: seed.wrapping_add(0x9E37_79B9_7F4A_7C15),
        }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1);
        self.state
    }

    fn next_usize(&mut self, upper_exclusive: usize) -> usize {
        if upper_exclusive == 0 {
            return 0;
        }
        (self.next_u64() as usize) % upper_exclusive
    }
}

struct Scenario {
    session: Session,
    rng: Lcg,
    now_ms: u64,
    next_message: u64,
    next_event: u64,
    /// Every applied remote event, for exact replay.
    delivered: Vec<RealtimeEvent>,
}

impl Scenario {
    fn new(seed: u64) -> Self {
        let mut session = Session::new(SessionConfig::new(CURRENT_USER));
        for server in SERVERS {
            for channel in CHANNELS {
                session.join_channel(server, channel);
            }
            let server = ServerId::new(server);
            session.connect_server(&server).expect("connect should work");
            session
                .server_connected(&server)
                .expect("established should work");
            session.complete_resync(&server, Vec::new(), 0);
        }
        Self {
            session,
            rng: Lcg::new(seed),
            now_ms: 1_000,
            next_message: 0,
            next_event: 0,
            delivered: Vec::new(),
        }
    }

    fn pick_scope(&mut self) -> (ServerId, ChannelId) {
        let server = SERVERS[self.rng.next_usize(SERVERS.len())];
        let channel = CHANNELS[self.rng.next_usize(CHANNELS.len())];
        (ServerId::new(server), ChannelId::new(channel))
    }

    fn random_mentions(&mut self) -> Vec<MentionEntity> {
        match self.rng.next_usize(4) {
            0 => vec![MentionEntity {
                kind: MentionKind::User,
                token: format!("@{CURRENT_USER}"),
                target: Some(UserUid::new(CURRENT_USER)),
                display_text: format!("@{CURRENT_USER}"),
                range: (0, CURRENT_USER.len() + 1),
            }],
            1 => vec![MentionEntity {
                kind: MentionKind::Channel,
                token: "@here".to_owned(),
                target: None,
                display_text: "@here".to_owned(),
                range: (0, 5),
            }],
            2 => vec![MentionEntity {
                // Token outside the recognized audience set: plain text.
                kind: MentionKind::Channel,
                token: "@martians".to_owned(),
                target: None,
                display_text: "@martians".to_owned(),
                range: (0, 9),
            }],
            _ => Vec::new(),
        }
    }

    fn deliver_remote(&mut self) {
        let (server, channel) = self.pick_scope();
        self.next_message += 1;
        self.next_event += 1;
        // Mostly increasing timestamps with occasional out-of-order
        // delivery.
        let skew = self.rng.next_usize(5) as u64 * 40;
        let created_at_ms = self.now_ms.saturating_sub(skew);
        let mentions = self.random_mentions();
        let event = RealtimeEvent::MessageCreated {
            event_id: format!("ev-{}", self.next_event),
            server_id: server,
            channel_id: channel,
            message: WireMessage {
                id: harbor_core::MessageId::new(format!("m-{}", self.next_message)),
                author: UserUid::new("u-bob"),
                body: "hi".to_owned(),
                created_at_ms,
                mentions,
                reply_to: None,
                attachments: Vec::new(),
                link_previews: Vec::new(),
                nonce: None,
            },
        };
        self.delivered.push(event.clone());
        self.session.handle_realtime(event, self.now_ms);
    }

    fn replay_duplicate(&mut self) {
        if self.delivered.is_empty() {
            return;
        }
        let index = self.rng.next_usize(self.delivered.len());
        let mut event = self.delivered[index].clone();
        // Half the replays arrive under a fresh event id, reaching the
        // store's idempotency check instead of the router shortcut.
        if self.rng.next_usize(2) == 0
            && let RealtimeEvent::MessageCreated { event_id, .. } = &mut event
        {
            self.next_event += 1;
            *event_id = format!("ev-{}", self.next_event);
        }
        self.session.handle_realtime(event, self.now_ms);
    }

    fn optimistic_send(&mut self) {
        let (server, channel) = self.pick_scope();
        let Ok(nonce) =
            self.session
                .submit_send(&server, &channel, SendDraft::text("mine"), self.now_ms)
        else {
            return;
        };
        // Resolve immediately half the time; otherwise leave it pending to
        // interleave with later traffic.
        if self.rng.next_usize(2) == 0 {
            self.next_message += 1;
            self.session.resolve_send(
                &nonce,
                SendReceipt {
                    message_id: harbor_core::MessageId::new(format!("m-{}", self.next_message)),
                    channel_id: channel,
                    created_at_ms: self.now_ms + 1,
                    sync_state: SyncState::Confirmed,
                },
            );
        }
    }

    fn mark_read(&mut self) {
        let (server, channel) = self.pick_scope();
        self.session.mark_channel_read(&server, &channel, self.now_ms);
    }

    fn reconcile_random_ack(&mut self) {
        let (server, channel) = self.pick_scope();
        let confirmed: Vec<_> = self
            .session
            .timeline(&server, &channel)
            .iter()
            .filter_map(|entry| match &entry.entry_id {
                EntryId::Confirmed(id) => Some(id.clone()),
                EntryId::Pending(_) => None,
            })
            .collect();
        if confirmed.is_empty() {
            return;
        }
        let candidate = confirmed[self.rng.next_usize(confirmed.len())].clone();

        let before = self.session.read_cursor(&server, &channel).cloned();
        self.session.reconcile_read_ack(
            &server,
            &channel,
            AckReceipt {
                last_read_message_id: candidate.clone(),
                acked_at_ms: self.now_ms,
                applied: Some(true),
            },
        );
        let after = self
            .session
            .read_cursor(&server, &channel)
            .cloned()
            .expect("cursor should exist after an ack");

        // Monotonicity: a provably earlier ack must not move the cursor.
        if let Some(before) = before {
            let positions = self.session.timeline(&server, &channel);
            let find = |id: &harbor_core::MessageId| {
                positions
                    .iter()
                    .position(|entry| entry.entry_id == EntryId::Confirmed(id.clone()))
            };
            if let (Some(old_pos), Some(candidate_pos)) =
                (find(&before.last_read_message_id), find(&candidate))
                && candidate_pos < old_pos
            {
                assert_eq!(
                    after.last_read_message_id, before.last_read_message_id,
                    "stale ack moved the cursor backwards"
                );
            }
        }
    }

    fn step(&mut self) {
        self.now_ms += 100;
        match self.rng.next_usize(6) {
            0 | 1 => self.deliver_remote(),
            2 => self.replay_duplicate(),
            3 => self.optimistic_send(),
            4 => self.mark_read(),
            _ => self.reconcile_random_ack(),
        }
    }

    fn check_invariants(&self) {
        for server in SERVERS {
            let server = ServerId::new(server);
            let mut summed_unread = 0;
            let mut summed_mentions = 0;
            for channel in CHANNELS {
                let channel = ChannelId::new(channel);
                let entries = self.session.timeline(&server, &channel);

                // Sorted by (created_at, id), no duplicate confirmed ids.
                let mut seen = std::collections::HashSet::new();
                for pair in entries.windows(2) {
                    let key = |entry: &harbor_core::TimelineEntry| {
                        let token = match &entry.entry_id {
                            EntryId::Pending(nonce) => nonce.as_str().to_owned(),
                            EntryId::Confirmed(id) => id.as_str().to_owned(),
                        };
                        (entry.message.created_at_ms, token)
                    };
                    assert!(key(&pair[0]) <= key(&pair[1]), "timeline out of order");
                }
                for entry in entries {
                    if let EntryId::Confirmed(id) = &entry.entry_id {
                        assert!(seen.insert(id.clone()), "duplicate visible entry: {id}");
                    }
                }

                // Badge derivation equals a brute-force recount.
                let cursor = self.session.read_cursor(&server, &channel);
                let first_unread = cursor
                    .and_then(|c| {
                        entries.iter().position(|entry| {
                            entry.entry_id == EntryId::Confirmed(c.last_read_message_id.clone())
                        })
                    })
                    .map(|position| position + 1)
                    .unwrap_or(0);
                let mut expected_unread = 0;
                let mut expected_mentions = 0;
                for entry in entries.iter().skip(first_unread) {
                    expected_unread += 1;
                    let mentioned = entry.message.mentions.iter().any(|m| match m.kind {
                        MentionKind::User => {
                            m.target.as_ref() == Some(&UserUid::new(CURRENT_USER))
                        }
                        MentionKind::Channel => m.token == "@here" || m.token == "@channel",
                    });
                    if mentioned {
                        expected_mentions += 1;
                    }
                }

                let badges = self.session.channel_badges(&server, &channel);
                assert_eq!(badges.unread, expected_unread, "unread count drifted");
                assert_eq!(badges.mentions, expected_mentions, "mention count drifted");
                summed_unread += expected_unread;
                summed_mentions += expected_mentions;
            }

            let aggregate = self.session.server_badges(&server);
            assert_eq!(aggregate.unread, summed_unread, "server unread != sum");
            assert_eq!(aggregate.mentions, summed_mentions, "server mentions != sum");
        }
    }
}

proptest! {
    #[test]
    fn randomized_interleavings_keep_derived_state_consistent(
        seed in any::<u64>(),
        steps in 1_usize..80,
    ) {
        let mut scenario = Scenario::new(seed);
        for _ in 0..steps {
            scenario.step();
            scenario.check_invariants();
        }
    }
}

#[test]
fn servers_with_identical_channel_ids_stay_isolated_under_load() {
    let mut scenario = Scenario::new(42);
    for _ in 0..200 {
        scenario.step();
    }
    scenario.check_invariants();

    // Both servers carry a channel literally named "general"; their
    // states must have evolved independently.
    let a = ServerId::new("srv-a");
    let b = ServerId::new("srv-b");
    let general = ChannelId::new("general");
    let ids = |server: &ServerId| -> Vec<String> {
        scenario
            .session
            .timeline(server, &general)
            .iter()
            .filter_map(|entry| match &entry.entry_id {
                EntryId::Confirmed(id) => Some(id.as_str().to_owned()),
                EntryId::Pending(_) => None,
            })
            .collect()
    };
    let a_ids: std::collections::HashSet<_> = ids(&a).into_iter().collect();
    let b_ids: std::collections::HashSet<_> = ids(&b).into_iter().collect();
    assert!(a_ids.is_disjoint(&b_ids), "message ids leaked across servers");
}
