//! Headless scripted run of the reconciliation core.
//!
//! Drives a session against the in-memory transport through the
//! interesting paths (optimistic send, failed send with retry, reconnect
//! replay, stale acks, cross-server isolation) and prints the derived
//! state after each step.

mod config;
mod logging;

use std::process;

use harbor_core::{
    ChannelId, RealtimeEvent, SendDraft, ServerId, Session, UserUid,
};
use harbor_transport::{InMemoryTransport, Transport, TransportError};
use tracing::info;

use crate::config::SmokeConfig;

#[tokio::main]
async fn main() {
    logging::init();

    let config = match SmokeConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Failed to parse configuration: {err}");
            process::exit(1);
        }
    };
    info!(user = %config.user, "starting smoke run");

    let mut session = Session::new(config.session_config());
    let mut changes = session.subscribe_changes();
    let transport = InMemoryTransport::new();
    transport.advance_clock(1_000);

    let server_a = ServerId::new("srv-a");
    let server_b = ServerId::new("srv-b");
    let general = ChannelId::new("general");

    // Membership and connection bring-up on both servers.
    for server in [&server_a, &server_b] {
        session.join_channel(server.clone(), general.clone());
        if let Err(err) = session
            .connect_server(server)
            .and_then(|()| session.server_connected(server))
        {
            eprintln!("Failed to bring up {server}: {err}");
            process::exit(1);
        }
        session.complete_resync(server, Vec::new(), 0);
    }

    // Remote traffic, including a mention, delivered as wire JSON.
    let incoming = r#"{
        "type": "message.created",
        "event_id": "ev-1",
        "server_id": "srv-a",
        "channel_id": "general",
        "message": {
            "id": "remote-1",
            "author": "u-bob",
            "body": "@u-alice morning",
            "created_at_ms": 1000,
            "mentions": [{
                "kind": "user",
                "token": "@u-alice",
                "target": "u-alice",
                "display_text": "@u-alice",
                "range": [0, 8]
            }]
        }
    }"#;
    match serde_json::from_str::<RealtimeEvent>(incoming) {
        Ok(event) => session.handle_realtime(event, 1_000),
        Err(err) => {
            eprintln!("Wire event failed to parse: {err}");
            process::exit(1);
        }
    }
    report(&session, &server_a, &general, "after remote mention");

    // Optimistic send confirmed through the transport round trip.
    let nonce = match session.submit_send(&server_a, &general, SendDraft::text("morning!"), 1_100) {
        Ok(nonce) => nonce,
        Err(err) => {
            eprintln!("Submit rejected: {err}");
            process::exit(1);
        }
    };
    let draft = SendDraft::text("morning!");
    match transport.send_message(&server_a, &general, &nonce, &draft) {
        Ok(receipt) => session.resolve_send(&nonce, receipt),
        Err(err) => session.fail_send(&nonce, err.into_core_error()),
    }
    report(&session, &server_a, &general, "after confirmed send");

    // A send that times out, then succeeds on manual retry.
    transport.fail_next(TransportError::Timeout);
    let nonce = match session.submit_send(&server_a, &general, SendDraft::text("again?"), 1_200) {
        Ok(nonce) => nonce,
        Err(err) => {
            eprintln!("Submit rejected: {err}");
            process::exit(1);
        }
    };
    let draft = SendDraft::text("again?");
    match transport.send_message(&server_a, &general, &nonce, &draft) {
        Ok(receipt) => session.resolve_send(&nonce, receipt),
        Err(err) => session.fail_send(&nonce, err.into_core_error()),
    }
    if let Some((_, error)) = session.last_send_error(&server_a, &general) {
        println!(
            "send failed with '{}', retry suggested in {:?}",
            error.code,
            session.next_retry_delay(&nonce)
        );
    }
    if session.retry_send(&nonce).is_some() {
        match transport.send_message(&server_a, &general, &nonce, &draft) {
            Ok(receipt) => session.resolve_send(&nonce, receipt),
            Err(err) => session.fail_send(&nonce, err.into_core_error()),
        }
    }
    report(&session, &server_a, &general, "after retried send");

    // Reconnect gap: the stream replays an already-applied message.
    let replayed = RealtimeEvent::MessageCreated {
        event_id: "ev-replay".to_owned(),
        server_id: server_a.clone(),
        channel_id: general.clone(),
        message: match serde_json::from_str(
            r#"{"id":"remote-1","author":"u-bob","body":"@u-alice morning","created_at_ms":1000}"#,
        ) {
            Ok(message) => message,
            Err(err) => {
                eprintln!("Wire message failed to parse: {err}");
                process::exit(1);
            }
        },
    };
    if let Err(err) = session
        .server_connection_lost(&server_a)
        .and_then(|()| session.server_reconnected(&server_a))
    {
        eprintln!("Reconnect transitions failed: {err}");
        process::exit(1);
    }
    session.handle_realtime(replayed, 2_000);
    let replay_count = session.complete_resync(&server_a, Vec::new(), 2_000);
    println!("reconnect replayed {replay_count} buffered event(s), timeline deduplicated");
    report(&session, &server_a, &general, "after reconnect replay");

    // Read-ack round trip clears the badges; a stale ack then bounces off.
    if let Some(read_up_to) = session.mark_channel_read(&server_a, &general, 2_100) {
        match transport.put_read_ack(&server_a, &general, &read_up_to, 2_100) {
            Ok(receipt) => session.reconcile_read_ack(&server_a, &general, receipt),
            Err(err) => info!(error = %err, "read ack failed; cursor stays optimistic"),
        }
    }
    session.handle_realtime(
        RealtimeEvent::ReadAckUpdated {
            event_id: "ev-stale".to_owned(),
            server_id: server_a.clone(),
            channel_id: general.clone(),
            last_read_message_id: harbor_core::MessageId::new("remote-1"),
            acked_at_ms: 2_200,
        },
        2_200,
    );
    report(&session, &server_a, &general, "after read ack + stale replay");

    // Typing indicator with TTL expiry.
    session.mark_typing(&server_a, &general, UserUid::new("u-bob"), 2_300);
    println!(
        "typing now: {:?}, after ttl: {:?}",
        session.typing_users(&server_a, &general, 2_400),
        session.typing_users(&server_a, &general, 10_000),
    );

    // Server B never saw any of this.
    println!(
        "isolation check: srv-b timeline has {} entries, badges {:?}",
        session.timeline(&server_b, &general).len(),
        session.channel_badges(&server_b, &general),
    );

    let mut change_count = 0_usize;
    while changes.try_recv().is_ok() {
        change_count += 1;
    }
    println!("observed {change_count} state change notifications");
}

fn report(session: &Session, server: &ServerId, channel: &ChannelId, label: &str) {
    let badges = session.channel_badges(server, channel);
    println!(
        "[{label}] {} entries, unread={}, mentions={}, server total unread={}",
        session.timeline(server, channel).len(),
        badges.unread,
        badges.mentions,
        session.server_badges(server).unread,
    );
}
