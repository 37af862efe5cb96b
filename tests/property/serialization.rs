//! Property-based tests for the wire protocol.
//!
//! Uses proptest to verify:
//! 1. Status transitions are monotonic for any order of incoming targets.
//! 2. Random text never causes a panic in the frame decoders.
//! 3. Any message pushed as `new-message` decodes to the same record.

use pairchat_proto::codec;
use pairchat_proto::event::ServerEvent;
use pairchat_proto::message::{Message, MessageId, MessageStatus, Timestamp, UserId};
use proptest::prelude::*;
use uuid::Uuid;

fn arb_status() -> impl Strategy<Value = MessageStatus> {
    prop_oneof![
        Just(MessageStatus::Sent),
        Just(MessageStatus::Delivered),
        Just(MessageStatus::Seen),
    ]
}

fn arb_user_id() -> impl Strategy<Value = UserId> {
    "[a-z0-9]{1,24}".prop_map(UserId::new)
}

fn arb_message() -> impl Strategy<Value = Message> {
    (
        any::<u128>(),
        arb_user_id(),
        arb_user_id(),
        proptest::option::of("[^\x00]{0,256}"),
        proptest::option::of("https://[a-z]{1,16}\\.example/[a-z0-9]{1,16}"),
        arb_status(),
        any::<u64>(),
    )
        .prop_map(
            |(id, sender_id, receiver_id, text, image_url, status, created)| Message {
                id: MessageId::from_uuid(Uuid::from_u128(id)),
                sender_id,
                receiver_id,
                text,
                image_url,
                status,
                created_at: Timestamp::from_millis(created),
            },
        )
}

proptest! {
    /// Applying targets in any order yields a non-decreasing sequence of
    /// observed statuses that ends at the highest target seen.
    #[test]
    fn status_is_monotonic_under_any_event_order(
        targets in prop::collection::vec(arb_status(), 0..32)
    ) {
        let mut current = MessageStatus::Sent;
        let mut observed = vec![current];
        for target in &targets {
            if let Some(next) = current.advance_to(*target) {
                current = next;
                observed.push(current);
            }
        }
        for pair in observed.windows(2) {
            prop_assert!(pair[0] < pair[1]);
        }
        let highest = targets.iter().copied().max().unwrap_or(MessageStatus::Sent);
        prop_assert_eq!(current, highest.max(MessageStatus::Sent));
    }

    /// Arbitrary text never panics the decoders.
    #[test]
    fn random_text_never_panics(text in ".{0,512}") {
        let _ = codec::decode_server(&text);
        let _ = codec::decode_client(&text);
    }

    /// A pushed message decodes to the same record.
    #[test]
    fn new_message_frame_preserves_record(msg in arb_message()) {
        let event = ServerEvent::NewMessage(msg);
        let text = codec::encode_server(&event).expect("encode should succeed");
        let decoded = codec::decode_server(&text).expect("decode should succeed");
        prop_assert_eq!(decoded, event);
    }
}
