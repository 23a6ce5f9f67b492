//! Property tests for push-channel frame decoding.
//!
//! Collaborator bytes are untrusted: decoding arbitrary input must never
//! panic, and a stream of framed frames must split back into the frames
//! that produced it.

use dmsync_proto::codec;
use dmsync_proto::event::{ChannelFrame, PushEvent};
use dmsync_proto::message::{ConversationId, MessageId, Timestamp, UserId, WireMessage};
use proptest::prelude::*;

fn arb_wire_message() -> impl Strategy<Value = WireMessage> {
    (
        proptest::option::of(any::<i64>()),
        proptest::option::of("[a-z0-9]{1,12}"),
        proptest::option::of("[a-z]{1,8}"),
        proptest::option::of(".{0,64}"),
        proptest::option::of(any::<u64>()),
    )
        .prop_map(|(id, conv, sender, content, at)| WireMessage {
            id: id.map(MessageId::new),
            conversation_id: conv.map(ConversationId::new),
            sender_id: sender.map(UserId::new),
            content,
            created_at: at.map(Timestamp::from_millis),
        })
}

fn arb_frame() -> impl Strategy<Value = ChannelFrame> {
    prop_oneof![
        "[a-z]{1,8}".prop_map(|u| ChannelFrame::Join {
            user_id: UserId::new(u)
        }),
        "[a-z]{1,8}".prop_map(|u| ChannelFrame::Joined {
            user_id: UserId::new(u)
        }),
        ("[a-z0-9]{1,12}", arb_wire_message()).prop_map(|(c, message)| {
            ChannelFrame::Event(PushEvent::MessageReceived {
                conversation_id: ConversationId::new(c),
                message,
            })
        }),
        ("[a-z0-9]{1,12}", arb_wire_message()).prop_map(|(c, message)| {
            ChannelFrame::Event(PushEvent::MessageSendConfirmed {
                conversation_id: ConversationId::new(c),
                message,
            })
        }),
        ".{0,32}".prop_map(|reason| ChannelFrame::Error { reason }),
    ]
}

proptest! {
    #[test]
    fn decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
        let _ = codec::decode(&bytes);
        let _ = codec::decode_framed(&bytes);
    }

    #[test]
    fn framed_stream_splits_into_original_frames(
        frames in proptest::collection::vec(arb_frame(), 1..8)
    ) {
        let mut buffer = Vec::new();
        for frame in &frames {
            buffer.extend_from_slice(&codec::encode_framed(frame).unwrap());
        }

        let mut offset = 0;
        let mut decoded = Vec::new();
        while offset < buffer.len() {
            let (frame, consumed) = codec::decode_framed(&buffer[offset..]).unwrap();
            decoded.push(frame);
            offset += consumed;
        }
        prop_assert_eq!(decoded, frames);
    }
}
