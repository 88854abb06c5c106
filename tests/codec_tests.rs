use cabinet_bridge::codec::PacketCodec;
use cabinet_bridge::protocol::*;

#[cfg(test)]
mod codec_tests {
    use super::*;

    #[test]
    fn test_inbound_batch_splits_into_frames() {
        let mut buffer =
            PacketCodec::encode_inbound(0x11, &[0xAA, 0xBB, 0xCC, 0xDD, 0x00, 0x01]).unwrap();
        buffer.extend(
            PacketCodec::encode_inbound(0x21, &[0xAA, 0xBB, 0xCC, 0xDD, 0x80, 0x80]).unwrap(),
        );
        buffer.extend(PacketCodec::encode_inbound(0x00, &[]).unwrap());

        let frames = PacketCodec::decode_inbound(&buffer);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].event_id, 0x11);
        assert_eq!(frames[0].station_payload(), &[0x00, 0x01]);
        assert_eq!(frames[1].event_id, 0x21);
        assert_eq!(frames[2], RawFrame::new(0x00, vec![]));
    }

    #[test]
    fn test_inbound_wire_layout() {
        // [len][event][hash BE][input BE]
        let bytes = [0x07, 0x11, 0xAA, 0xBB, 0xCC, 0xDD, 0x00, 0x01];
        let frames = PacketCodec::decode_inbound(&bytes);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].station_hash().map(|h| h.get()), Some(0xAABB_CCDD));
    }

    #[test]
    fn test_zero_length_frame_is_skipped() {
        let bytes = [0x00, 0x02, 0x00, 0x7F, 0x00, 0x01, 0x05];
        let frames = PacketCodec::decode_inbound(&bytes);
        assert_eq!(
            frames,
            vec![RawFrame::new(0x00, vec![0x7F]), RawFrame::new(0x05, vec![])]
        );
    }

    #[test]
    fn test_truncated_tail_keeps_earlier_frames() {
        let mut buffer = PacketCodec::encode_inbound(0x46, &[1, 2, 3, 4]).unwrap();
        buffer.extend_from_slice(&[0x09, 0x11, 0xAA]);

        let frames = PacketCodec::decode_inbound(&buffer);
        assert_eq!(frames, vec![RawFrame::new(0x46, vec![1, 2, 3, 4])]);
    }

    #[test]
    fn test_empty_buffer_decodes_to_nothing() {
        assert!(PacketCodec::decode_inbound(&[]).is_empty());
        assert!(PacketCodec::decode_outbound(&[]).is_empty());
    }

    #[test]
    fn test_inbound_payload_limit() {
        let max = vec![0u8; MAX_INBOUND_PAYLOAD];
        let frame = PacketCodec::encode_inbound(0x03, &max).unwrap();
        assert_eq!(frame[0], 0xFF);
        assert_eq!(frame.len(), 256);

        let too_big = vec![0u8; MAX_INBOUND_PAYLOAD + 1];
        assert_eq!(
            PacketCodec::encode_inbound(0x03, &too_big),
            Err(ProtocolError::PayloadTooLarge {
                size: MAX_INBOUND_PAYLOAD + 1,
                max: MAX_INBOUND_PAYLOAD,
            })
        );
    }

    #[test]
    fn test_outbound_prefix_is_big_endian_u16() {
        let payload = vec![0x5A; 300];
        let frame = PacketCodec::encode_outbound(0x03, &payload).unwrap();
        assert_eq!(&frame[..3], &[0x01, 0x2D, 0x03]);
        assert_eq!(frame.len(), 303);

        let frames = PacketCodec::decode_outbound(&frame);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].body.len(), 300);
    }

    #[test]
    fn test_outbound_payload_limit() {
        let too_big = vec![0u8; MAX_OUTBOUND_PAYLOAD + 1];
        assert!(matches!(
            PacketCodec::encode_outbound(0x03, &too_big),
            Err(ProtocolError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_outbound_batch_preserves_order() {
        let mut batch = PacketCodec::encode_outbound(0x04, &[]).unwrap();
        batch.extend(PacketCodec::encode_outbound(0x00, &[]).unwrap());
        batch.extend(PacketCodec::encode_outbound(0x13, &[0, 0, 0, 1, 0x00, 0x20]).unwrap());

        let ids: Vec<u8> = PacketCodec::decode_outbound(&batch)
            .iter()
            .map(|frame| frame.event_id)
            .collect();
        assert_eq!(ids, vec![0x04, 0x00, 0x13]);
    }

    #[test]
    fn test_unknown_event_id_still_frames() {
        let frames = PacketCodec::decode_inbound(&[0x02, 0x7E, 0x01]);
        assert_eq!(frames, vec![RawFrame::new(0x7E, vec![0x01])]);
        assert_eq!(EventId::try_from(0x7E), Err(ProtocolError::UnknownEvent(0x7E)));
    }

    #[test]
    fn test_require_len_reports_sizes() {
        assert!(require_len(&[1, 2], 2).is_ok());
        assert_eq!(
            require_len(&[1], 4),
            Err(ProtocolError::ShortPayload { needed: 4, actual: 1 })
        );
    }
}
